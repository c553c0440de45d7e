use tree_sitter::Node;

use super::{Classified, Dialect, node_text};

#[derive(Clone, Copy)]
pub enum JsDialect {
    JavaScript,
    TypeScript,
    Tsx,
}

/// JavaScript and its TypeScript dialects share one node vocabulary.
pub(crate) struct JavaScript(pub JsDialect);

impl Dialect for JavaScript {
    const NAME: &'static str = "JavaScript/TypeScript";

    fn language(&self) -> tree_sitter::Language {
        match self.0 {
            JsDialect::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            JsDialect::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            JsDialect::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        }
    }

    fn classify<'t>(&self, node: Node<'t>, source: &str) -> Classified<'t> {
        match node.kind() {
            "call_expression" => classify_call(node, source),
            "binary_expression" => match node.child_by_field_name("operator") {
                Some(operator) if !is_string_concat(node, operator) => Classified::Binary { operator },
                _ => Classified::Other,
            },
            "true" | "false" => Classified::Literal,
            // 'use strict' and friends
            "expression_statement" if node.named_child_count() == 1 => match node.named_child(0) {
                Some(child) if child.kind() == "string" => Classified::Skip,
                _ => Classified::Other,
            },
            _ => Classified::Other,
        }
    }
}

fn classify_call<'t>(node: Node<'t>, source: &str) -> Classified<'t> {
    let Some(function) = node.child_by_field_name("function") else {
        return Classified::Other;
    };
    if node_text(function, source).starts_with("console.") {
        return Classified::Skip;
    }
    if function.kind() != "member_expression" {
        return Classified::Other;
    }
    let Some(name) = function.child_by_field_name("property") else {
        return Classified::Other;
    };
    let mut cursor = function.walk();
    let optional = function
        .children(&mut cursor)
        .any(|child| child.kind() == "optional_chain");
    Classified::MethodCall {
        name,
        receiver: function.child_by_field_name("object"),
        arguments: node.child_by_field_name("arguments"),
        optional,
    }
}

fn is_string_concat(node: Node<'_>, operator: Node<'_>) -> bool {
    operator.kind() == "+"
        && node
            .child_by_field_name("left")
            .is_some_and(|left| left.kind() == "string" || left.kind() == "template_string")
}
