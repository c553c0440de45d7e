//! Mutation operator catalog.
//!
//! Rules are plain data: which kind of operation they recognize, the name they
//! match, the name they substitute, and whether the substitute needs call
//! arguments. A [`Catalog`] is built once and passed to the generator.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::syntax::Span;

/// Closed set of mutation families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// Swap a collection query method for its counterpart (`First` ↔ `FirstOrDefault`).
    Linq,
    /// Move a comparison across its boundary (`>` → `>=`).
    Boundary,
    /// Invert a comparison (`>` → `<=`, `==` → `!=`).
    NegateComparison,
    /// Swap conjunction and disjunction.
    Logical,
    Arithmetic,
    /// Flip a boolean literal.
    Boolean,
}

impl MutationKind {
    pub const ALL: [MutationKind; 6] = [
        MutationKind::Linq,
        MutationKind::Boundary,
        MutationKind::NegateComparison,
        MutationKind::Logical,
        MutationKind::Arithmetic,
        MutationKind::Boolean,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::Linq => "linq",
            MutationKind::Boundary => "boundary",
            MutationKind::NegateComparison => "negate_comparison",
            MutationKind::Logical => "logical",
            MutationKind::Arithmetic => "arithmetic",
            MutationKind::Boolean => "boolean",
        }
    }

    pub fn display_label(self) -> &'static str {
        match self {
            MutationKind::Linq => "Linq method",
            MutationKind::Boundary => "Boundary",
            MutationKind::NegateComparison => "Negate comparison",
            MutationKind::Logical => "Logical",
            MutationKind::Arithmetic => "Arithmetic",
            MutationKind::Boolean => "Boolean",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MutationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<_> = MutationKind::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown mutation kind '{}'. Valid: {}", s, valid.join(", "))
            })
    }
}

/// Which part of a node a rule keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleTarget {
    /// Method name of an invocation through a member access or binding.
    Method,
    /// Operator token of a binary expression.
    Operator,
    /// Whole text of a literal.
    Literal,
}

/// The operation a node performs, as resolved by the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation<'t> {
    pub target: RuleTarget,
    pub name: &'t str,
    /// Span of `name` in the source.
    pub name_span: Span,
    /// Argument count for invocations, 0 otherwise.
    pub arg_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRule {
    pub kind: MutationKind,
    pub target: RuleTarget,
    pub from: &'static str,
    pub to: &'static str,
    /// The substitute is only valid with at least one call argument.
    pub requires_arguments: bool,
}

/// A proposed rewrite of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    /// Full replacement text for the claimed node.
    pub fragment: String,
    pub display_name: String,
}

impl MutationRule {
    pub const fn method(kind: MutationKind, from: &'static str, to: &'static str) -> Self {
        MutationRule { kind, target: RuleTarget::Method, from, to, requires_arguments: false }
    }

    pub const fn operator(kind: MutationKind, from: &'static str, to: &'static str) -> Self {
        MutationRule { kind, target: RuleTarget::Operator, from, to, requires_arguments: false }
    }

    pub const fn literal(kind: MutationKind, from: &'static str, to: &'static str) -> Self {
        MutationRule { kind, target: RuleTarget::Literal, from, to, requires_arguments: false }
    }

    pub const fn requiring_arguments(mut self) -> Self {
        self.requires_arguments = true;
        self
    }

    /// The rule matches the operation's shape and name.
    pub fn recognizes(&self, op: &Operation<'_>) -> bool {
        self.target == op.target && self.from == op.name
    }

    /// False when the substitute needs arguments the call does not have.
    pub fn guard_allows(&self, op: &Operation<'_>) -> bool {
        !self.requires_arguments || op.arg_count > 0
    }

    pub fn applies(&self, op: &Operation<'_>) -> bool {
        self.recognizes(op) && self.guard_allows(op)
    }

    /// Rewrite `node_text` (spanning `node_span`) by substituting the operation name.
    ///
    /// Returns `None` when the name does not sit inside the node, which only
    /// happens for inconsistent trees.
    pub fn transform(&self, op: &Operation<'_>, node_text: &str, node_span: Span) -> Option<Replacement> {
        if !node_span.contains(&op.name_span) {
            return None;
        }
        let start = op.name_span.start_byte - node_span.start_byte;
        let end = op.name_span.end_byte - node_span.start_byte;
        let head = node_text.get(..start)?;
        let tail = node_text.get(end..)?;
        Some(Replacement {
            fragment: format!("{}{}{}", head, self.to, tail),
            display_name: self.display_name(),
        })
    }

    pub fn display_name(&self) -> String {
        match self.target {
            RuleTarget::Method => format!(
                "{} mutation ({}() to {}())",
                self.kind.display_label(),
                self.from,
                self.to
            ),
            RuleTarget::Operator | RuleTarget::Literal => format!(
                "{} mutation ({} to {})",
                self.kind.display_label(),
                self.from,
                self.to
            ),
        }
    }
}

/// Query method swaps. Substitutes that take a predicate or selector are
/// marked as requiring arguments.
const LINQ_RULES: &[MutationRule] = &[
    MutationRule::method(MutationKind::Linq, "FirstOrDefault", "First"),
    MutationRule::method(MutationKind::Linq, "First", "FirstOrDefault"),
    MutationRule::method(MutationKind::Linq, "SingleOrDefault", "Single"),
    MutationRule::method(MutationKind::Linq, "Single", "SingleOrDefault"),
    MutationRule::method(MutationKind::Linq, "Last", "First"),
    MutationRule::method(MutationKind::Linq, "All", "Any"),
    MutationRule::method(MutationKind::Linq, "Any", "All").requiring_arguments(),
    MutationRule::method(MutationKind::Linq, "Skip", "Take"),
    MutationRule::method(MutationKind::Linq, "Take", "Skip"),
    MutationRule::method(MutationKind::Linq, "SkipWhile", "TakeWhile").requiring_arguments(),
    MutationRule::method(MutationKind::Linq, "TakeWhile", "SkipWhile").requiring_arguments(),
    MutationRule::method(MutationKind::Linq, "Min", "Max"),
    MutationRule::method(MutationKind::Linq, "Max", "Min"),
    MutationRule::method(MutationKind::Linq, "Sum", "Count"),
    MutationRule::method(MutationKind::Linq, "Count", "Sum").requiring_arguments(),
    MutationRule::method(MutationKind::Linq, "OrderBy", "OrderByDescending").requiring_arguments(),
    MutationRule::method(MutationKind::Linq, "OrderByDescending", "OrderBy").requiring_arguments(),
    MutationRule::method(MutationKind::Linq, "ThenBy", "ThenByDescending").requiring_arguments(),
    MutationRule::method(MutationKind::Linq, "ThenByDescending", "ThenBy").requiring_arguments(),
];

const OPERATOR_RULES: &[MutationRule] = &[
    MutationRule::operator(MutationKind::Boundary, ">", ">="),
    MutationRule::operator(MutationKind::NegateComparison, ">", "<="),
    MutationRule::operator(MutationKind::Boundary, ">=", ">"),
    MutationRule::operator(MutationKind::NegateComparison, ">=", "<"),
    MutationRule::operator(MutationKind::Boundary, "<", "<="),
    MutationRule::operator(MutationKind::NegateComparison, "<", ">="),
    MutationRule::operator(MutationKind::Boundary, "<=", "<"),
    MutationRule::operator(MutationKind::NegateComparison, "<=", ">"),
    MutationRule::operator(MutationKind::NegateComparison, "==", "!="),
    MutationRule::operator(MutationKind::NegateComparison, "!=", "=="),
    MutationRule::operator(MutationKind::NegateComparison, "===", "!=="),
    MutationRule::operator(MutationKind::NegateComparison, "!==", "==="),
    MutationRule::operator(MutationKind::NegateComparison, "is", "is not"),
    MutationRule::operator(MutationKind::NegateComparison, "is not", "is"),
    MutationRule::operator(MutationKind::NegateComparison, "in", "not in"),
    MutationRule::operator(MutationKind::NegateComparison, "not in", "in"),
    MutationRule::operator(MutationKind::Logical, "&&", "||"),
    MutationRule::operator(MutationKind::Logical, "||", "&&"),
    MutationRule::operator(MutationKind::Logical, "and", "or"),
    MutationRule::operator(MutationKind::Logical, "or", "and"),
    MutationRule::operator(MutationKind::Arithmetic, "+", "-"),
    MutationRule::operator(MutationKind::Arithmetic, "-", "+"),
    MutationRule::operator(MutationKind::Arithmetic, "*", "/"),
    MutationRule::operator(MutationKind::Arithmetic, "/", "*"),
    MutationRule::operator(MutationKind::Arithmetic, "//", "/"),
    MutationRule::operator(MutationKind::Arithmetic, "%", "/"),
    MutationRule::operator(MutationKind::Arithmetic, "**", "*"),
];

const LITERAL_RULES: &[MutationRule] = &[
    MutationRule::literal(MutationKind::Boolean, "true", "false"),
    MutationRule::literal(MutationKind::Boolean, "false", "true"),
    MutationRule::literal(MutationKind::Boolean, "True", "False"),
    MutationRule::literal(MutationKind::Boolean, "False", "True"),
];

/// Immutable rule set with a lookup by operation identity.
#[derive(Debug, Clone)]
pub struct Catalog {
    rules: Vec<MutationRule>,
    index: HashMap<RuleTarget, HashMap<&'static str, Vec<usize>>>,
}

impl Catalog {
    pub fn new(rules: impl IntoIterator<Item = MutationRule>) -> Self {
        let rules: Vec<MutationRule> = rules.into_iter().collect();
        let mut index: HashMap<RuleTarget, HashMap<&'static str, Vec<usize>>> = HashMap::new();
        for (i, rule) in rules.iter().enumerate() {
            index
                .entry(rule.target)
                .or_default()
                .entry(rule.from)
                .or_default()
                .push(i);
        }
        Catalog { rules, index }
    }

    /// Every built-in rule.
    pub fn standard() -> Self {
        Catalog::new(
            LINQ_RULES
                .iter()
                .chain(OPERATOR_RULES)
                .chain(LITERAL_RULES)
                .cloned(),
        )
    }

    /// Copy of this catalog without rules of the given kinds.
    pub fn without_kinds(&self, kinds: &[MutationKind]) -> Self {
        Catalog::new(self.rules.iter().filter(|r| !kinds.contains(&r.kind)).cloned())
    }

    /// Rules recognizing the operation, in registration order. The
    /// requires-arguments guard is not applied here.
    pub fn lookup<'c>(&'c self, op: &Operation<'_>) -> impl Iterator<Item = &'c MutationRule> + 'c {
        let hits: &[usize] = self
            .index
            .get(&op.target)
            .and_then(|by_name| by_name.get(op.name))
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        hits.iter().map(move |&i| &self.rules[i])
    }

    pub fn rules(&self) -> &[MutationRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Catalog::standard()
    }
}
