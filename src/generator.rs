//! Walks syntax trees and emits one mutant per qualifying node per matching rule.

use std::collections::VecDeque;

use tracing::trace;

use crate::catalog::{Catalog, Operation, RuleTarget};
use crate::mutants::{Location, Mutant, MutantId, Verdict};
use crate::syntax::{Member, MemberKind, NodeId, NodeShape, SourceFile, Span, SyntaxTree};

pub struct Generator<'c> {
    catalog: &'c Catalog,
}

impl<'c> Generator<'c> {
    pub fn new(catalog: &'c Catalog) -> Self {
        Generator { catalog }
    }

    /// Lazy single pass over `files` in order. Ids restart at 1 for every call.
    pub fn generate<'a>(&'a self, files: &'a [SourceFile]) -> Mutants<'a> {
        Mutants {
            catalog: self.catalog,
            files: files.iter(),
            current: None,
            stack: Vec::new(),
            pending: VecDeque::new(),
            next_id: 1,
        }
    }
}

/// Iterator returned by [`Generator::generate`].
pub struct Mutants<'a> {
    catalog: &'a Catalog,
    files: std::slice::Iter<'a, SourceFile>,
    current: Option<&'a SourceFile>,
    stack: Vec<NodeId>,
    pending: VecDeque<Mutant>,
    next_id: u32,
}

impl Iterator for Mutants<'_> {
    type Item = Mutant;

    fn next(&mut self) -> Option<Mutant> {
        loop {
            if let Some(mutant) = self.pending.pop_front() {
                return Some(mutant);
            }
            let file = match (self.current, self.stack.pop()) {
                (Some(file), Some(id)) => {
                    let node = file.tree.node(id);
                    self.stack.extend(node.children.iter().rev());
                    self.visit(file, id);
                    continue;
                }
                _ => self.files.next()?,
            };
            self.current = Some(file);
            if !file.tree.is_empty() {
                self.stack.push(file.tree.root());
            }
        }
    }
}

impl<'a> Mutants<'a> {
    fn visit(&mut self, file: &'a SourceFile, id: NodeId) {
        let tree = &file.tree;
        if let Some(parent) = tree.parent(id) {
            if matches!(parent.shape, NodeShape::ConditionalAccess { .. }) {
                return;
            }
        }
        let Some(op) = resolve_operation(tree, id) else {
            return;
        };

        let span = tree.node(id).span;
        let original = tree.text(span);
        let ignore_reason = ignore_reason(file, span);

        for rule in self.catalog.lookup(&op) {
            if !rule.guard_allows(&op) {
                trace!(
                    file = %file.path,
                    line = span.line,
                    rule = %rule.display_name(),
                    "skipping rule: replacement requires arguments"
                );
                continue;
            }
            let Some(replacement) = rule.transform(&op, original, span) else {
                continue;
            };
            let id = MutantId(self.next_id);
            self.next_id += 1;
            self.pending.push_back(Mutant {
                id,
                kind: rule.kind,
                location: Location { file: file.path.clone(), span },
                replacement_span: op.name_span,
                original: original.to_string(),
                replacement: replacement.fragment,
                display_name: replacement.display_name,
                status: Verdict::Pending,
                ignore_reason: ignore_reason.clone(),
            });
        }
    }
}

/// Operation identity of a node. Conditional accesses are unwrapped to the
/// invocation they guard; the caller still claims the outer node.
fn resolve_operation(tree: &SyntaxTree, id: NodeId) -> Option<Operation<'_>> {
    let node = tree.node(id);
    match node.shape {
        // A bound call only means something under its conditional access.
        NodeShape::Invocation { member: Some(member), arg_count } if member.kind == MemberKind::Access => {
            Some(method_call(tree, member, arg_count))
        }
        NodeShape::Invocation { .. } => None,
        NodeShape::ConditionalAccess { when_not_null } => {
            let mut inner = when_not_null;
            while let NodeShape::ConditionalAccess { when_not_null } = tree.node(inner).shape {
                inner = when_not_null;
            }
            match tree.node(inner).shape {
                NodeShape::Invocation { member: Some(member), arg_count } => Some(method_call(tree, member, arg_count)),
                _ => None,
            }
        }
        NodeShape::Binary { operator } => Some(Operation {
            target: RuleTarget::Operator,
            name: tree.text(operator),
            name_span: operator,
            arg_count: 0,
        }),
        NodeShape::Literal => Some(Operation {
            target: RuleTarget::Literal,
            name: tree.text(node.span),
            name_span: node.span,
            arg_count: 0,
        }),
        NodeShape::Other => None,
    }
}

fn method_call(tree: &SyntaxTree, member: Member, arg_count: usize) -> Operation<'_> {
    Operation {
        target: RuleTarget::Method,
        name: tree.text(member.name),
        name_span: member.name,
        arg_count,
    }
}

fn ignore_reason(file: &SourceFile, span: Span) -> Option<String> {
    if file.excluded {
        return Some("file marked no-mutate".to_string());
    }
    file.excluded_regions
        .iter()
        .find(|region| region.contains(&span))
        .map(|region| format!("inside no-mutate region at line {}", region.line))
}
