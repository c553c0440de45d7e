use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::MutationKind;
use crate::error::ConfigError;
use crate::planner::PlannerStrategy;

pub const DEFAULT_TIMEOUT_FACTOR: f64 = 3.0;
pub const DEFAULT_TIMEOUT_OVERHEAD_MS: u64 = 2000;
pub const DEFAULT_RETRY_LIMIT: u32 = 2;

/// Knobs for one scheduling run. Every field has a default, so a config file
/// only needs the values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Sessions in flight at once; one runner process each.
    pub concurrency: usize,
    /// `None` is rejected by [`RunConfig::validate`].
    pub planner: Option<PlannerStrategy>,
    pub timeout_factor: f64,
    pub timeout_overhead_ms: u64,
    /// Isolated re-runs a mutant gets after crashes or ambiguous results.
    pub retry_limit: u32,
    /// Wall-clock budget for the whole run; exceeding it cancels what is left.
    pub run_budget_ms: Option<u64>,
    /// Kinds marked `Ignored` before execution.
    pub ignored_kinds: Vec<MutationKind>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            planner: Some(PlannerStrategy::Batched),
            timeout_factor: DEFAULT_TIMEOUT_FACTOR,
            timeout_overhead_ms: DEFAULT_TIMEOUT_OVERHEAD_MS,
            retry_limit: DEFAULT_RETRY_LIMIT,
            run_budget_ms: None,
            ignored_kinds: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Read a JSON config file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let data = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: display.clone(), source })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse { path: display, source })
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_planner(mut self, planner: Option<PlannerStrategy>) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_timeout_factor(mut self, factor: f64) -> Self {
        self.timeout_factor = factor;
        self
    }

    pub fn with_timeout_overhead(mut self, overhead: Duration) -> Self {
        self.timeout_overhead_ms = overhead.as_millis() as u64;
        self
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn with_run_budget(mut self, budget: Option<Duration>) -> Self {
        self.run_budget_ms = budget.map(|b| b.as_millis() as u64);
        self
    }

    pub fn with_ignored_kinds(mut self, kinds: impl IntoIterator<Item = MutationKind>) -> Self {
        self.ignored_kinds = kinds.into_iter().collect();
        self
    }

    /// Resolve the planner strategy and check the numeric knobs.
    /// `supports_activation` is what the runner factory reports.
    pub fn validate(&self, supports_activation: bool) -> Result<PlannerStrategy, ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if !self.timeout_factor.is_finite() || self.timeout_factor <= 0.0 {
            return Err(ConfigError::InvalidTimeoutFactor(self.timeout_factor));
        }
        match self.planner {
            None => Err(ConfigError::MissingPlanner),
            Some(PlannerStrategy::Batched) if !supports_activation => Err(ConfigError::ActivationUnsupported),
            Some(strategy) => Ok(strategy),
        }
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            factor: self.timeout_factor,
            overhead: Duration::from_millis(self.timeout_overhead_ms),
        }
    }

    pub fn run_budget(&self) -> Option<Duration> {
        self.run_budget_ms.map(Duration::from_millis)
    }
}

/// Deadline = Σ baseline durations × factor + overhead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeoutPolicy {
    pub factor: f64,
    pub overhead: Duration,
}

impl TimeoutPolicy {
    pub fn deadline(&self, baseline: impl IntoIterator<Item = Duration>) -> Duration {
        let total: Duration = baseline.into_iter().sum();
        total.mul_f64(self.factor) + self.overhead
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        RunConfig::default().timeout_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: RunConfig = serde_json::from_str(r#"{"retry_limit": 5, "planner": "isolated"}"#).unwrap();
        assert_eq!(config.retry_limit, 5);
        assert_eq!(config.planner, Some(PlannerStrategy::Isolated));
        assert_eq!(config.timeout_factor, DEFAULT_TIMEOUT_FACTOR);
        assert_eq!(config.timeout_overhead_ms, DEFAULT_TIMEOUT_OVERHEAD_MS);
    }

    #[test]
    fn explicit_null_planner_is_rejected() {
        let config: RunConfig = serde_json::from_str(r#"{"planner": null}"#).unwrap();
        assert!(matches!(config.validate(true), Err(ConfigError::MissingPlanner)));
    }

    #[test]
    fn batched_needs_activation() {
        let config = RunConfig::default();
        assert!(matches!(config.validate(false), Err(ConfigError::ActivationUnsupported)));
        assert_eq!(config.validate(true).unwrap(), PlannerStrategy::Batched);

        let isolated = config.with_planner(Some(PlannerStrategy::Isolated));
        assert_eq!(isolated.validate(false).unwrap(), PlannerStrategy::Isolated);
    }

    #[test]
    fn rejects_zero_concurrency_and_bad_factor() {
        let config = RunConfig::default().with_concurrency(0);
        assert!(matches!(config.validate(true), Err(ConfigError::ZeroConcurrency)));

        let config = RunConfig::default().with_timeout_factor(f64::NAN);
        assert!(matches!(config.validate(true), Err(ConfigError::InvalidTimeoutFactor(_))));
    }

    #[test]
    fn deadline_scales_baseline() {
        let policy = TimeoutPolicy { factor: 3.0, overhead: Duration::from_millis(2000) };
        let deadline = policy.deadline([Duration::from_millis(100), Duration::from_millis(400)]);
        assert_eq!(deadline, Duration::from_millis(3500));
    }
}
