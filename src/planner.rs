//! Groups coverable mutants into conflict-free batches.
//!
//! Two mutants conflict when some test covers both: a failure of that test
//! could not be attributed to either. Batching is a greedy coloring of the
//! conflict graph: mutants in descending order of covering-test count (ties by
//! ascending id), each placed into the first batch it does not conflict with.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::coverage::TestId;
use crate::mutants::MutantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerStrategy {
    /// Conflict-free batches; the runner activates one mutant per test.
    Batched,
    /// One mutant per batch, for runners without per-test activation.
    Isolated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub u32);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// A coverable mutant with the tests that reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoveredMutant {
    pub id: MutantId,
    pub tests: BTreeSet<TestId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub id: BatchId,
    /// Members in placement order.
    pub mutants: Vec<MutantId>,
    /// The single active mutant for every test the batch runs.
    pub active: BTreeMap<TestId, MutantId>,
}

impl Batch {
    pub fn singleton(id: BatchId, mutant: &CoveredMutant) -> Self {
        Batch {
            id,
            mutants: vec![mutant.id],
            active: mutant.tests.iter().map(|t| (t.clone(), mutant.id)).collect(),
        }
    }

    pub fn tests(&self) -> impl Iterator<Item = &TestId> {
        self.active.keys()
    }

    pub fn tests_for(&self, mutant: MutantId) -> impl Iterator<Item = &TestId> {
        self.active
            .iter()
            .filter(move |(_, active)| **active == mutant)
            .map(|(test, _)| test)
    }

    pub fn len(&self) -> usize {
        self.mutants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutants.is_empty()
    }

    fn conflicts_with(&self, tests: &BTreeSet<TestId>) -> bool {
        tests.iter().any(|t| self.active.contains_key(t))
    }

    fn add(&mut self, mutant: &CoveredMutant) {
        self.mutants.push(mutant.id);
        for test in &mutant.tests {
            self.active.insert(test.clone(), mutant.id);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Planner {
    strategy: PlannerStrategy,
}

impl Planner {
    pub fn new(strategy: PlannerStrategy) -> Self {
        Planner { strategy }
    }

    /// Batches numbered from `first_id`. Mutants without covering tests do not
    /// belong here and are dropped.
    pub fn plan(&self, mutants: &[CoveredMutant], first_id: u32) -> Vec<Batch> {
        let mut order: Vec<&CoveredMutant> = mutants.iter().filter(|m| !m.tests.is_empty()).collect();
        order.sort_by_key(|m| (Reverse(m.tests.len()), m.id));

        let mut batches: Vec<Batch> = Vec::new();
        for mutant in order {
            if self.strategy == PlannerStrategy::Batched {
                if let Some(batch) = batches.iter_mut().find(|b| !b.conflicts_with(&mutant.tests)) {
                    batch.add(mutant);
                    continue;
                }
            }
            let id = BatchId(first_id + batches.len() as u32);
            batches.push(Batch::singleton(id, mutant));
        }
        batches
    }
}

/// True when no test in any batch is shared by two of its mutants' coverage sets.
pub fn is_conflict_free(batches: &[Batch], mutants: &[CoveredMutant]) -> bool {
    let coverage: BTreeMap<MutantId, &BTreeSet<TestId>> = mutants.iter().map(|m| (m.id, &m.tests)).collect();
    batches.iter().all(|batch| {
        let mut seen: BTreeSet<&TestId> = BTreeSet::new();
        batch
            .mutants
            .iter()
            .filter_map(|id| coverage.get(id))
            .flat_map(|tests| tests.iter())
            .all(|test| seen.insert(test))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covered(id: u32, tests: &[&str]) -> CoveredMutant {
        CoveredMutant { id: MutantId(id), tests: tests.iter().map(|t| TestId::from(*t)).collect() }
    }

    #[test]
    fn larger_coverage_sets_are_placed_first() {
        let mutants = vec![covered(1, &["a"]), covered(2, &["a", "b", "c"]), covered(3, &["d"])];
        let batches = Planner::new(PlannerStrategy::Batched).plan(&mutants, 1);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].mutants, vec![MutantId(2), MutantId(3)]);
        assert_eq!(batches[1].mutants, vec![MutantId(1)]);
    }

    #[test]
    fn ties_break_on_ascending_id() {
        let mutants = vec![covered(5, &["x"]), covered(4, &["x"])];
        let batches = Planner::new(PlannerStrategy::Batched).plan(&mutants, 1);
        assert_eq!(batches[0].mutants, vec![MutantId(4)]);
        assert_eq!(batches[1].mutants, vec![MutantId(5)]);
    }
}
