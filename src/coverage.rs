//! Test → location coverage relation, built once from a baseline run or a
//! precomputed map and read-only afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mutants::Location;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(pub String);

impl TestId {
    pub fn new(id: impl Into<String>) -> Self {
        TestId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestId {
    fn from(id: &str) -> Self {
        TestId(id.to_string())
    }
}

impl From<String> for TestId {
    fn from(id: String) -> Self {
        TestId(id)
    }
}

/// Byte range of a file executed by some test.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CodeRegion {
    pub file: Utf8PathBuf,
    pub start_byte: usize,
    pub end_byte: usize,
}

impl CodeRegion {
    pub fn new(file: impl Into<Utf8PathBuf>, start_byte: usize, end_byte: usize) -> Self {
        CodeRegion { file: file.into(), start_byte, end_byte }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageEntry {
    pub region: CodeRegion,
    pub tests: BTreeSet<TestId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineTest {
    pub id: TestId,
    pub duration_ms: u64,
    #[serde(default)]
    pub covered: Vec<CodeRegion>,
}

/// Result of an instrumented, unmutated test run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BaselineRun {
    pub tests: Vec<BaselineTest>,
}

/// On-disk form accepted by [`CoverageMap::load`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoverageSource {
    Baseline(BaselineRun),
    Precomputed {
        entries: Vec<CoverageEntry>,
        durations_ms: BTreeMap<TestId, u64>,
    },
}

#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("region {file}:{start}..{end} ends before it starts")]
    InvertedRegion { file: Utf8PathBuf, start: usize, end: usize },
    #[error("test {0} covers code but has no baseline duration")]
    MissingDuration(TestId),
    #[error("test {0} appears more than once in the baseline")]
    DuplicateTest(TestId),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageMap {
    /// Per file, regions sorted by (start, end) with the tests that touched them.
    regions: BTreeMap<Utf8PathBuf, BTreeMap<(usize, usize), BTreeSet<TestId>>>,
    durations: BTreeMap<TestId, Duration>,
}

impl CoverageMap {
    pub fn from_baseline(run: &BaselineRun) -> Result<Self, CoverageError> {
        let mut map = CoverageMap::default();
        for test in &run.tests {
            if map
                .durations
                .insert(test.id.clone(), Duration::from_millis(test.duration_ms))
                .is_some()
            {
                return Err(CoverageError::DuplicateTest(test.id.clone()));
            }
            for region in &test.covered {
                map.insert(region, std::iter::once(test.id.clone()))?;
            }
        }
        Ok(map)
    }

    pub fn from_entries(
        entries: &[CoverageEntry],
        durations: &BTreeMap<TestId, Duration>,
    ) -> Result<Self, CoverageError> {
        let mut map = CoverageMap { regions: BTreeMap::new(), durations: durations.clone() };
        for entry in entries {
            if let Some(missing) = entry.tests.iter().find(|t| !durations.contains_key(*t)) {
                return Err(CoverageError::MissingDuration(missing.clone()));
            }
            map.insert(&entry.region, entry.tests.iter().cloned())?;
        }
        Ok(map)
    }

    pub fn from_source(source: &CoverageSource) -> Result<Self, CoverageError> {
        match source {
            CoverageSource::Baseline(run) => CoverageMap::from_baseline(run),
            CoverageSource::Precomputed { entries, durations_ms } => {
                let durations = durations_ms
                    .iter()
                    .map(|(id, ms)| (id.clone(), Duration::from_millis(*ms)))
                    .collect();
                CoverageMap::from_entries(entries, &durations)
            }
        }
    }

    /// Read a JSON [`CoverageSource`].
    pub fn load(path: &Path) -> Result<Self, CoverageError> {
        let display = path.display().to_string();
        let data = std::fs::read_to_string(path)
            .map_err(|source| CoverageError::Read { path: display.clone(), source })?;
        let source: CoverageSource = serde_json::from_str(&data)
            .map_err(|source| CoverageError::Parse { path: display, source })?;
        CoverageMap::from_source(&source)
    }

    fn insert(
        &mut self,
        region: &CodeRegion,
        tests: impl IntoIterator<Item = TestId>,
    ) -> Result<(), CoverageError> {
        if region.start_byte > region.end_byte {
            return Err(CoverageError::InvertedRegion {
                file: region.file.clone(),
                start: region.start_byte,
                end: region.end_byte,
            });
        }
        self.regions
            .entry(region.file.clone())
            .or_default()
            .entry((region.start_byte, region.end_byte))
            .or_default()
            .extend(tests);
        Ok(())
    }

    /// Tests whose baseline run touched a region enclosing `location`.
    pub fn tests_covering(&self, location: &Location) -> BTreeSet<TestId> {
        let Some(regions) = self.regions.get(&location.file) else {
            return BTreeSet::new();
        };
        regions
            .range(..=(location.span.start_byte, usize::MAX))
            .filter(|((_, end), _)| location.span.end_byte <= *end)
            .flat_map(|(_, tests)| tests.iter().cloned())
            .collect()
    }

    pub fn is_covered(&self, location: &Location) -> bool {
        !self.tests_covering(location).is_empty()
    }

    pub fn baseline_duration(&self, test: &TestId) -> Option<Duration> {
        self.durations.get(test).copied()
    }

    pub fn test_count(&self) -> usize {
        self.durations.len()
    }
}
