use tree_sitter::Node;

use super::{Classified, Dialect, node_text};

pub(crate) struct Rust;

const NOISE_MACROS: &[&str] = &[
    "println", "eprintln", "print", "eprint", "format", "write", "writeln", "log", "debug", "info", "warn",
    "error", "trace",
];

impl Dialect for Rust {
    const NAME: &'static str = "Rust";

    fn language(&self) -> tree_sitter::Language {
        tree_sitter_rust::LANGUAGE.into()
    }

    fn classify<'t>(&self, node: Node<'t>, source: &str) -> Classified<'t> {
        match node.kind() {
            "macro_invocation" => match node.child_by_field_name("macro") {
                Some(mac) if is_noise_macro(node_text(mac, source)) => Classified::Skip,
                _ => Classified::Other,
            },
            // Tests live next to the code in Rust; never mutate them.
            "attribute_item" if node_text(node, source).contains("cfg(test)") => Classified::Skip,
            "mod_item" if preceded_by_cfg_test(node, source) => Classified::Skip,
            "call_expression" => classify_call(node),
            "binary_expression" => match node.child_by_field_name("operator") {
                Some(operator) => Classified::Binary { operator },
                None => Classified::Other,
            },
            "boolean_literal" => Classified::Literal,
            _ => Classified::Other,
        }
    }
}

fn is_noise_macro(name: &str) -> bool {
    let last = name.rsplit("::").next().unwrap_or(name);
    NOISE_MACROS.contains(&last)
}

fn preceded_by_cfg_test(node: Node<'_>, source: &str) -> bool {
    node.prev_named_sibling()
        .is_some_and(|prev| prev.kind() == "attribute_item" && node_text(prev, source).contains("cfg(test)"))
}

fn classify_call(node: Node<'_>) -> Classified<'_> {
    let Some(mut function) = node.child_by_field_name("function") else {
        return Classified::Other;
    };
    // `iter.collect::<Vec<_>>()`
    if function.kind() == "generic_function" {
        match function.child_by_field_name("function") {
            Some(inner) => function = inner,
            None => return Classified::Other,
        }
    }
    if function.kind() != "field_expression" {
        return Classified::Other;
    }
    match function.child_by_field_name("field") {
        Some(name) => Classified::MethodCall {
            name,
            receiver: function.child_by_field_name("value"),
            arguments: node.child_by_field_name("arguments"),
            optional: false,
        },
        None => Classified::Other,
    }
}
