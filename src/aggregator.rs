//! Final verdict bookkeeping and the mutation score.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::VerdictError;
use crate::mutants::{Mutant, MutantId, Verdict};

/// Counts per verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub total: usize,
    pub killed: usize,
    pub survived: usize,
    pub timeout: usize,
    pub runtime_error: usize,
    pub not_covered: usize,
    pub ignored: usize,
}

impl ScoreSummary {
    pub fn from_mutants<'a>(mutants: impl IntoIterator<Item = &'a Mutant>) -> Self {
        let mut summary = ScoreSummary::default();
        for mutant in mutants {
            summary.total += 1;
            match mutant.status {
                Verdict::Killed => summary.killed += 1,
                Verdict::Survived => summary.survived += 1,
                Verdict::Timeout => summary.timeout += 1,
                Verdict::RuntimeError => summary.runtime_error += 1,
                Verdict::NotCovered => summary.not_covered += 1,
                Verdict::Ignored => summary.ignored += 1,
                Verdict::Pending => {}
            }
        }
        summary
    }

    /// Mutants that count toward the score.
    pub fn scored(&self) -> usize {
        self.killed + self.survived + self.timeout + self.runtime_error
    }

    /// Killed / (Killed + Survived + Timeout + RuntimeError), or `None` when
    /// nothing was scored.
    pub fn score(&self) -> Option<f64> {
        match self.scored() {
            0 => None,
            n => Some(self.killed as f64 / n as f64),
        }
    }

    /// Score as a percentage string, `n/a` when undefined.
    pub fn score_label(&self) -> String {
        match self.score() {
            Some(score) => format!("{:.1}%", score * 100.0),
            None => "n/a".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub mutants: Vec<Mutant>,
    pub summary: ScoreSummary,
}

impl RunReport {
    pub fn survivors(&self) -> impl Iterator<Item = &Mutant> {
        self.mutants.iter().filter(|m| m.status == Verdict::Survived)
    }

    pub fn get(&self, id: MutantId) -> Option<&Mutant> {
        self.mutants.iter().find(|m| m.id == id)
    }
}

/// Every mutant receives exactly one verdict.
#[derive(Debug)]
pub struct VerdictAggregator {
    mutants: Vec<Mutant>,
    index: HashMap<MutantId, usize>,
}

impl VerdictAggregator {
    /// Mutants arrive `Pending`; any other status counts as already assigned.
    pub fn new(mutants: Vec<Mutant>) -> Self {
        let index = mutants.iter().enumerate().map(|(i, m)| (m.id, i)).collect();
        VerdictAggregator { mutants, index }
    }

    pub fn mutants(&self) -> &[Mutant] {
        &self.mutants
    }

    pub fn assign(&mut self, id: MutantId, verdict: Verdict) -> Result<(), VerdictError> {
        let &i = self.index.get(&id).ok_or(VerdictError::UnknownMutant(id))?;
        let mutant = &mut self.mutants[i];
        if mutant.status.is_terminal() {
            return Err(VerdictError::AlreadyAssigned { id, existing: mutant.status });
        }
        mutant.status = verdict;
        Ok(())
    }

    pub fn status(&self, id: MutantId) -> Option<Verdict> {
        self.index.get(&id).map(|&i| self.mutants[i].status)
    }

    pub fn pending(&self) -> usize {
        self.mutants.iter().filter(|m| m.status == Verdict::Pending).count()
    }

    pub fn finish(self) -> Result<RunReport, VerdictError> {
        match self.pending() {
            0 => {
                let summary = ScoreSummary::from_mutants(&self.mutants);
                Ok(RunReport { mutants: self.mutants, summary })
            }
            n => Err(VerdictError::Incomplete(n)),
        }
    }
}
