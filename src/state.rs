//! The last run, persisted for `mutator show` and `mutator status`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::aggregator::{RunReport, ScoreSummary};
use crate::catalog::MutationKind;
use crate::mutants::{Mutant, MutantId, apply_mutation, generate_diff};

const STATE_FILE: &str = ".mutator-state.json";
const CONTEXT_LINES: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub score: Option<f64>,
    pub summary: ScoreSummary,
    pub duration_ms: u64,
    pub survived_mutants: Vec<SurvivedMutant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurvivedMutant {
    pub id: MutantId,
    pub file: Utf8PathBuf,
    pub line: usize,
    pub column: usize,
    pub kind: MutationKind,
    pub display_name: String,
    pub original: String,
    pub replacement: String,
    pub diff: String,
    pub context_before: Vec<String>,
    pub context_after: Vec<String>,
}

impl RunRecord {
    /// Snapshot `report`. `sources` maps each mutated file to its text, for
    /// survivor diffs and context; files missing from it get neither.
    pub fn from_report(
        run_id: impl Into<String>,
        report: &RunReport,
        duration_ms: u64,
        sources: &BTreeMap<Utf8PathBuf, String>,
    ) -> Self {
        let survived_mutants = report
            .survivors()
            .map(|m| SurvivedMutant::new(m, sources.get(&m.location.file).map(String::as_str)))
            .collect();
        RunRecord {
            run_id: run_id.into(),
            score: report.summary.score(),
            summary: report.summary,
            duration_ms,
            survived_mutants,
        }
    }

    /// Look up a survivor by `m3`, `@m3` or `3`.
    pub fn survivor(&self, reference: &str) -> Option<&SurvivedMutant> {
        let id = parse_ref(reference)?;
        self.survived_mutants.iter().find(|m| m.id == id)
    }
}

impl SurvivedMutant {
    fn new(mutant: &Mutant, source: Option<&str>) -> Self {
        let span = mutant.location.span;
        let (diff, (context_before, context_after)) = match source {
            Some(source) if span.end_byte <= source.len() => {
                let mutated = apply_mutation(source, mutant);
                let lines: Vec<&str> = source.lines().collect();
                let line_idx = span.line.saturating_sub(1);
                (generate_diff(source, &mutated), get_context(&lines, line_idx, CONTEXT_LINES))
            }
            _ => (String::new(), (Vec::new(), Vec::new())),
        };
        SurvivedMutant {
            id: mutant.id,
            file: mutant.location.file.clone(),
            line: span.line,
            column: span.column,
            kind: mutant.kind,
            display_name: mutant.display_name.clone(),
            original: mutant.original.clone(),
            replacement: mutant.replacement.clone(),
            diff,
            context_before,
            context_after,
        }
    }
}

pub fn parse_ref(reference: &str) -> Option<MutantId> {
    let digits = reference.trim().trim_start_matches('@');
    let digits = digits.strip_prefix('m').unwrap_or(digits);
    digits.parse().ok().map(MutantId)
}

fn get_context(lines: &[&str], line_idx: usize, range: usize) -> (Vec<String>, Vec<String>) {
    if line_idx >= lines.len() {
        return (vec![], vec![]);
    }
    let start = line_idx.saturating_sub(range);
    let end = (line_idx + range + 1).min(lines.len());
    let before: Vec<String> = lines[start..line_idx].iter().map(|s| s.to_string()).collect();
    let after: Vec<String> = lines[line_idx + 1..end].iter().map(|s| s.to_string()).collect();
    (before, after)
}

fn state_path() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join(STATE_FILE)
}

pub fn save_last_run(record: &RunRecord) {
    save_to_path(record, &state_path());
}

pub fn load_last_run() -> Option<RunRecord> {
    load_from_path(&state_path())
}

pub fn save_to_path(record: &RunRecord, path: &Path) {
    match serde_json::to_string(record) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                warn!(path = %path.display(), error = %e, "could not persist run state");
            }
        }
        Err(e) => warn!(error = %e, "could not serialize run state"),
    }
}

pub fn load_from_path(path: &Path) -> Option<RunRecord> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}
