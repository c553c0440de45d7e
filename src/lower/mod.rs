//! Tree-sitter adapters that lower a parse tree into the language-neutral
//! [`SyntaxTree`].
//!
//! Each dialect only classifies nodes; the walk, span bookkeeping and the
//! conditional-access wrapping live here.

pub mod javascript;
pub mod python;
pub mod rust;

use camino::Utf8Path;
use thiserror::Error;
use tree_sitter::{Node, Parser};

use crate::syntax::{Member, MemberKind, NodeId, NodeShape, SourceFile, Span, SyntaxTree, SyntaxTreeBuilder};
use crate::Language;

#[derive(Debug, Error)]
pub enum LowerError {
    #[error("unsupported file type: {0}. Supported: .py, .rs, .js, .ts, .tsx, .jsx")]
    UnsupportedLanguage(String),
    #[error("failed to load {language} grammar: {message}")]
    Grammar { language: &'static str, message: String },
    #[error("tree-sitter returned no tree for {0}")]
    Parse(String),
}

/// What a dialect recognizes in a tree-sitter node.
pub(crate) enum Classified<'t> {
    /// A call through a member access. `receiver` is the object the member is
    /// read from; `optional` marks a null-propagating access (`a?.b()`).
    MethodCall {
        name: Node<'t>,
        receiver: Option<Node<'t>>,
        arguments: Option<Node<'t>>,
        optional: bool,
    },
    Binary { operator: Node<'t> },
    Literal,
    /// Logging and other noise; the whole subtree is dropped.
    Skip,
    Other,
}

pub(crate) trait Dialect {
    const NAME: &'static str;

    fn language(&self) -> tree_sitter::Language;

    fn classify<'t>(&self, node: Node<'t>, source: &str) -> Classified<'t>;
}

/// Parse `source` with the grammar for `language` and lower it.
pub fn lower_source(language: Language, source: &str) -> Result<SyntaxTree, LowerError> {
    match language {
        Language::Python => lower_with(&python::Python, source),
        Language::Rust => lower_with(&rust::Rust, source),
        Language::JavaScript => lower_with(&javascript::JavaScript(javascript::JsDialect::JavaScript), source),
        Language::TypeScript => lower_with(&javascript::JavaScript(javascript::JsDialect::TypeScript), source),
        Language::Tsx => lower_with(&javascript::JavaScript(javascript::JsDialect::Tsx), source),
    }
}

/// Detect the language from the path and lower `source` into a [`SourceFile`].
pub fn parse_file(path: &Utf8Path, source: &str) -> Result<SourceFile, LowerError> {
    let language = crate::detect_language(path.as_std_path())
        .ok_or_else(|| LowerError::UnsupportedLanguage(path.to_string()))?;
    let tree = lower_source(language, source)?;
    Ok(SourceFile::new(path, tree))
}

pub(crate) fn lower_with<D: Dialect>(dialect: &D, source: &str) -> Result<SyntaxTree, LowerError> {
    let mut parser = Parser::new();
    parser
        .set_language(&dialect.language())
        .map_err(|e| LowerError::Grammar { language: D::NAME, message: e.to_string() })?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| LowerError::Parse(D::NAME.to_string()))?;

    let mut builder = SyntaxTreeBuilder::new(source);
    lower_node(dialect, &mut builder, tree.root_node(), None, source);
    Ok(builder.build())
}

fn span_of(node: Node<'_>) -> Span {
    Span::new(
        node.start_byte(),
        node.end_byte(),
        node.start_position().row + 1,
        node.start_position().column + 1,
    )
}

pub(crate) fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    &source[node.start_byte()..node.end_byte()]
}

/// Named, non-comment children of an argument list.
pub(crate) fn argument_count(arguments: Option<Node<'_>>) -> usize {
    let Some(arguments) = arguments else {
        return 0;
    };
    let mut cursor = arguments.walk();
    arguments
        .named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .count()
}

fn lower_children<D: Dialect>(
    dialect: &D,
    builder: &mut SyntaxTreeBuilder,
    node: Node<'_>,
    parent: NodeId,
    source: &str,
) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        lower_node(dialect, builder, child, Some(parent), source);
    }
}

fn lower_node<D: Dialect>(
    dialect: &D,
    builder: &mut SyntaxTreeBuilder,
    node: Node<'_>,
    parent: Option<NodeId>,
    source: &str,
) {
    let span = span_of(node);
    match dialect.classify(node, source) {
        Classified::Skip => {}
        Classified::MethodCall { name, receiver, arguments, optional: true } => {
            // `receiver?.name(args)` becomes ConditionalAccess(receiver, Invocation(.name(args)))
            let access = builder.push(parent, NodeShape::Other, span);
            if let Some(receiver) = receiver {
                lower_node(dialect, builder, receiver, Some(access), source);
            }
            let member = Member { kind: MemberKind::Binding, name: span_of(name) };
            let shape = NodeShape::Invocation { member: Some(member), arg_count: argument_count(arguments) };
            let invocation = builder.push(Some(access), shape, span);
            if let Some(arguments) = arguments {
                lower_children(dialect, builder, arguments, invocation, source);
            }
            builder.set_shape(access, NodeShape::ConditionalAccess { when_not_null: invocation });
        }
        Classified::MethodCall { name, arguments, .. } => {
            let member = Member { kind: MemberKind::Access, name: span_of(name) };
            let shape = NodeShape::Invocation { member: Some(member), arg_count: argument_count(arguments) };
            let id = builder.push(parent, shape, span);
            lower_children(dialect, builder, node, id, source);
        }
        Classified::Binary { operator } => {
            let id = builder.push(parent, NodeShape::Binary { operator: span_of(operator) }, span);
            lower_children(dialect, builder, node, id, source);
        }
        Classified::Literal => {
            builder.push(parent, NodeShape::Literal, span);
        }
        Classified::Other => {
            let id = builder.push(parent, NodeShape::Other, span);
            lower_children(dialect, builder, node, id, source);
        }
    }
}
