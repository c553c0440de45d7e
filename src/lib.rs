//! Mutation testing in two halves: a generator that turns source files into
//! mutants, and a scheduler that runs covering tests against them in batched
//! sessions and aggregates verdicts into a score.

pub mod aggregator;
pub mod catalog;
pub mod config;
pub mod coverage;
pub mod error;
pub mod generator;
pub mod lower;
pub mod mutants;
pub mod output;
pub mod planner;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod syntax;

/// Source languages with a tree-sitter adapter in [`lower`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    Rust,
    JavaScript,
    TypeScript,
    Tsx,
}

pub fn detect_language(path: &std::path::Path) -> Option<Language> {
    match path.extension()?.to_str()? {
        "py" => Some(Language::Python),
        "rs" => Some(Language::Rust),
        "js" | "mjs" | "cjs" => Some(Language::JavaScript),
        "ts" | "mts" | "cts" => Some(Language::TypeScript),
        "tsx" | "jsx" => Some(Language::Tsx),
        _ => None,
    }
}
