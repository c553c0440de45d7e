//! Configuration-level failures: the only errors that abort a run.

use thiserror::Error;

use crate::mutants::MutantId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no batch planner strategy configured; set `planner` to \"batched\" or \"isolated\"")]
    MissingPlanner,
    #[error(
        "batched planning needs a test runner that can activate mutants per test; \
         this runner cannot, so set `planner` to \"isolated\" explicitly"
    )]
    ActivationUnsupported,
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("timeout factor must be a positive finite number, got {0}")]
    InvalidTimeoutFactor(f64),
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerdictError {
    #[error("mutant {0} is not part of this run")]
    UnknownMutant(MutantId),
    #[error("mutant {id} already has verdict {existing:?}")]
    AlreadyAssigned { id: MutantId, existing: crate::mutants::Verdict },
    #[error("{0} mutant(s) finished the run without a verdict")]
    Incomplete(usize),
}

/// Everything that can abort [`crate::scheduler::run`].
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Verdict(#[from] VerdictError),
}
