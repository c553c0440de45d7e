use tree_sitter::Node;

use super::{Classified, Dialect, node_text};

pub(crate) struct Python;

impl Dialect for Python {
    const NAME: &'static str = "Python";

    fn language(&self) -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
    }

    fn classify<'t>(&self, node: Node<'t>, source: &str) -> Classified<'t> {
        match node.kind() {
            "call" => classify_call(node, source),
            "boolean_operator" | "binary_operator" => match node.child_by_field_name("operator") {
                Some(operator) if !is_string_concat(node) => Classified::Binary { operator },
                _ => Classified::Other,
            },
            "comparison_operator" => {
                // Chained comparisons (`a < b < c`) have no single operator to swap.
                let mut cursor = node.walk();
                let operators: Vec<Node<'t>> = node.children_by_field_name("operators", &mut cursor).collect();
                match operators.as_slice() {
                    [operator] => Classified::Binary { operator: *operator },
                    _ => Classified::Other,
                }
            }
            "true" | "false" => Classified::Literal,
            // Docstrings
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
    let text = node_text(function, source);
    if text == "print" || text.starts_with("logging.") || text.starts_with("log.") || text.starts_with("logger.") {
        return Classified::Skip;
    }
    if function.kind() != "attribute" {
        return Classified::Other;
    }
    match function.child_by_field_name("attribute") {
        Some(name) => Classified::MethodCall {
            name,
            receiver: function.child_by_field_name("object"),
            arguments: node.child_by_field_name("arguments"),
            optional: false,
        },
        None => Classified::Other,
    }
}

fn is_string_concat(node: Node<'_>) -> bool {
    node.child_by_field_name("left")
        .is_some_and(|left| left.kind() == "string" || left.kind() == "concatenated_string")
}
