//! Language-neutral syntax model walked by the mutant generator.
//!
//! A [`SyntaxTree`] is an arena of nodes over an owned source string. Each node
//! only records the shape the catalog can act on (an invocation through a
//! member, a null-propagating access, a binary operator, a literal) and
//! everything else is [`NodeShape::Other`]. Trees are built by the adapters in
//! [`crate::lower`] or by hand through [`SyntaxTreeBuilder`].

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Byte range in the source plus the 1-based line/column of its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start_byte: usize,
    pub end_byte: usize,
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(start_byte: usize, end_byte: usize, line: usize, column: usize) -> Self {
        Span { start_byte, end_byte, line, column }
    }

    /// Span for a byte range, computing line/column from `source`.
    pub fn from_bytes(source: &str, start_byte: usize, end_byte: usize) -> Self {
        let prefix = &source[..start_byte.min(source.len())];
        let line = prefix.matches('\n').count() + 1;
        let column = match prefix.rfind('\n') {
            Some(nl) => start_byte - nl,
            None => start_byte + 1,
        };
        Span { start_byte, end_byte, line, column }
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.start_byte <= other.start_byte && other.end_byte <= self.end_byte
    }

    pub fn is_empty(&self) -> bool {
        self.start_byte >= self.end_byte
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// How an invocation reaches its method name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// `receiver.name(..)`
    Access,
    /// `.name(..)` bound to the receiver of an enclosing conditional access.
    Binding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub kind: MemberKind,
    pub name: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeShape {
    /// A call. `member` is `None` for plain function calls.
    Invocation { member: Option<Member>, arg_count: usize },
    /// A null-propagating access (`a?.b()`); `when_not_null` is the part
    /// evaluated when the receiver is present.
    ConditionalAccess { when_not_null: NodeId },
    /// Binary expression; `operator` is the span of the operator token.
    Binary { operator: Span },
    /// Literal whose whole text is its identity (`true`, `False`, ...).
    Literal,
    Other,
}

#[derive(Debug, Clone)]
pub struct SyntaxNode {
    pub shape: NodeShape,
    pub span: Span,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Read-only tree over one source text.
#[derive(Debug, Clone)]
pub struct SyntaxTree {
    source: String,
    nodes: Vec<SyntaxNode>,
}

impl SyntaxTree {
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &SyntaxNode {
        &self.nodes[id.index()]
    }

    pub fn parent(&self, id: NodeId) -> Option<&SyntaxNode> {
        self.node(id).parent.map(|p| self.node(p))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Source text of a span, or `""` if the span does not fit the source.
    pub fn text(&self, span: Span) -> &str {
        self.source.get(span.start_byte..span.end_byte).unwrap_or("")
    }
}

/// Incremental construction of a [`SyntaxTree`]; the first node pushed is the root.
#[derive(Debug)]
pub struct SyntaxTreeBuilder {
    source: String,
    nodes: Vec<SyntaxNode>,
}

impl SyntaxTreeBuilder {
    pub fn new(source: impl Into<String>) -> Self {
        SyntaxTreeBuilder { source: source.into(), nodes: Vec::new() }
    }

    /// Span for a byte range of the builder's source.
    pub fn span(&self, start_byte: usize, end_byte: usize) -> Span {
        Span::from_bytes(&self.source, start_byte, end_byte)
    }

    pub fn push(&mut self, parent: Option<NodeId>, shape: NodeShape, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(SyntaxNode { shape, span, parent, children: Vec::new() });
        if let Some(parent) = parent {
            self.nodes[parent.index()].children.push(id);
        }
        id
    }

    /// Replace the shape of an already pushed node. Needed when a shape refers
    /// to a child that can only be pushed after its parent.
    pub fn set_shape(&mut self, id: NodeId, shape: NodeShape) {
        self.nodes[id.index()].shape = shape;
    }

    pub fn build(self) -> SyntaxTree {
        SyntaxTree { source: self.source, nodes: self.nodes }
    }
}

/// One parsed file handed to the generator.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: Utf8PathBuf,
    pub tree: SyntaxTree,
    /// Whole file marked no-mutate.
    pub excluded: bool,
    /// Byte regions marked no-mutate.
    pub excluded_regions: Vec<Span>,
}

impl SourceFile {
    pub fn new(path: impl Into<Utf8PathBuf>, tree: SyntaxTree) -> Self {
        SourceFile { path: path.into(), tree, excluded: false, excluded_regions: Vec::new() }
    }

    pub fn excluded(mut self, excluded: bool) -> Self {
        self.excluded = excluded;
        self
    }

    pub fn with_excluded_region(mut self, region: Span) -> Self {
        self.excluded_regions.push(region);
        self
    }
}
