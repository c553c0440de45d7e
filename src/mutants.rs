use std::fmt;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::catalog::MutationKind;
use crate::syntax::Span;

/// Sequential id of a mutant within one run, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutantId(pub u32);

impl fmt::Display for MutantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub file: Utf8PathBuf,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pending,
    Killed,
    Survived,
    Timeout,
    RuntimeError,
    NotCovered,
    Ignored,
}

impl Verdict {
    pub fn is_terminal(self) -> bool {
        self != Verdict::Pending
    }

    pub fn label(self) -> &'static str {
        match self {
            Verdict::Pending => "pending",
            Verdict::Killed => "killed",
            Verdict::Survived => "survived",
            Verdict::Timeout => "timeout",
            Verdict::RuntimeError => "runtime error",
            Verdict::NotCovered => "not covered",
            Verdict::Ignored => "ignored",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutant {
    pub id: MutantId,
    pub kind: MutationKind,
    /// The node the mutation claims. `original` is its text.
    pub location: Location,
    /// Bytes actually rewritten inside `location` (a method name, an operator).
    pub replacement_span: Span,
    pub original: String,
    pub replacement: String,
    pub display_name: String,
    pub status: Verdict,
    /// Set when the mutant was generated inside a no-mutate file or region.
    pub ignore_reason: Option<String>,
}

/// Source text with the mutant's node replaced by its replacement fragment.
pub fn apply_mutation(source: &str, mutant: &Mutant) -> String {
    let span = mutant.location.span;
    let mut result = String::with_capacity(source.len());
    result.push_str(&source[..span.start_byte]);
    result.push_str(&mutant.replacement);
    result.push_str(&source[span.end_byte..]);
    result
}

pub fn generate_diff(original: &str, mutated: &str) -> String {
    use similar::TextDiff;
    let diff = TextDiff::from_lines(original, mutated);
    let mut output = String::new();
    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Delete => {
                output.push_str(&format!("- {}", change));
            }
            similar::ChangeTag::Insert => {
                output.push_str(&format!("+ {}", change));
            }
            _ => {}
        }
    }
    output
}
