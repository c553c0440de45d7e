//! Executes one batch against one pooled runner.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError, select};
use tracing::{debug, warn};

use crate::config::TimeoutPolicy;
use crate::coverage::{CoverageMap, TestId};
use crate::mutants::MutantId;
use crate::planner::{Batch, BatchId};
use crate::runner::{RunRequest, RunnerEvent, RunnerPool, TestOutcome, TestRunner};

/// Closing the source cancels every token cloned from it.
pub struct CancelSource {
    tx: Option<Sender<()>>,
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
}

impl CancelSource {
    pub fn pair() -> (CancelSource, CancelToken) {
        let (tx, rx) = crossbeam_channel::bounded(0);
        (CancelSource { tx: Some(tx) }, CancelToken { rx })
    }

    pub fn cancel(&mut self) {
        self.tx = None;
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.is_none()
    }
}

impl CancelToken {
    /// A token that never fires.
    pub fn never() -> Self {
        CancelToken { rx: crossbeam_channel::never() }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Becomes ready (with an error) once cancelled; for use in `select!`.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Completed,
    TimedOut,
    Crashed,
    Cancelled,
    /// No runner could be acquired or started.
    StartFailed,
}

/// Per-mutant result of one session, before retry handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionVerdict {
    Killed { test: TestId },
    Survived,
    Timeout,
    /// The runner died before this mutant was determined.
    Crashed,
    /// Results could not be attributed to this mutant.
    Ambiguous,
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub batch: BatchId,
    pub end: SessionEnd,
    pub verdicts: Vec<(MutantId, SessionVerdict)>,
    pub elapsed: Duration,
}

impl SessionReport {
    pub fn verdict(&self, mutant: MutantId) -> Option<&SessionVerdict> {
        self.verdicts.iter().find(|(id, _)| *id == mutant).map(|(_, v)| v)
    }
}

/// Bookkeeping for the outcomes of one batch.
struct Tally<'b> {
    batch: &'b Batch,
    remaining: BTreeMap<MutantId, BTreeSet<TestId>>,
    reported: BTreeSet<TestId>,
    killed: BTreeMap<MutantId, TestId>,
    ambiguous: BTreeSet<MutantId>,
}

impl<'b> Tally<'b> {
    fn new(batch: &'b Batch) -> Self {
        let mut remaining: BTreeMap<MutantId, BTreeSet<TestId>> =
            batch.mutants.iter().map(|m| (*m, BTreeSet::new())).collect();
        for (test, mutant) in &batch.active {
            remaining.entry(*mutant).or_default().insert(test.clone());
        }
        Tally {
            batch,
            remaining,
            reported: BTreeSet::new(),
            killed: BTreeMap::new(),
            ambiguous: BTreeSet::new(),
        }
    }

    /// Record one outcome. Returns tests that no longer need to run when it
    /// kills a mutant.
    fn record(&mut self, outcome: TestOutcome) -> Option<Vec<TestId>> {
        let batch = self.batch.id;
        if outcome.batch_id.is_some_and(|id| id != batch) {
            warn!(%batch, echoed = ?outcome.batch_id, test = %outcome.test_id, "dropping outcome for another batch");
            return None;
        }
        let Some(&mutant) = self.batch.active.get(&outcome.test_id) else {
            warn!(%batch, test = %outcome.test_id, "ignoring outcome for unknown test");
            return None;
        };
        if !self.reported.insert(outcome.test_id.clone()) {
            warn!(%batch, test = %outcome.test_id, "dropping duplicate outcome");
            return None;
        }
        if let Some(echoed) = outcome.active_mutant {
            if echoed != mutant {
                warn!(%batch, test = %outcome.test_id, expected = %mutant, %echoed, "runner activated the wrong mutant");
                self.ambiguous.insert(mutant);
                return None;
            }
        }

        let remaining = self.remaining.entry(mutant).or_default();
        remaining.remove(&outcome.test_id);
        if self.killed.contains_key(&mutant) || !outcome.result.detects() {
            return None;
        }
        debug!(%batch, %mutant, test = %outcome.test_id, "mutant killed");
        self.killed.insert(mutant, outcome.test_id);
        let skipped: Vec<TestId> = std::mem::take(remaining).into_iter().collect();
        (!skipped.is_empty()).then_some(skipped)
    }

    /// Neither killed nor fully reported.
    fn is_undetermined(&self, mutant: MutantId) -> bool {
        !self.killed.contains_key(&mutant)
            && (self.ambiguous.contains(&mutant) || self.remaining.get(&mutant).is_some_and(|t| !t.is_empty()))
    }

    fn verdict(&self, mutant: MutantId, end: SessionEnd) -> SessionVerdict {
        if let Some(test) = self.killed.get(&mutant) {
            return SessionVerdict::Killed { test: test.clone() };
        }
        if !self.is_undetermined(mutant) {
            return SessionVerdict::Survived;
        }
        match end {
            // A hang shared by several mutants cannot be pinned on one of them.
            SessionEnd::TimedOut if self.batch.mutants.iter().filter(|m| self.is_undetermined(**m)).count() > 1 => {
                SessionVerdict::Ambiguous
            }
            SessionEnd::TimedOut | SessionEnd::Cancelled => SessionVerdict::Timeout,
            _ if self.ambiguous.contains(&mutant) => SessionVerdict::Ambiguous,
            // Complete arrived with tests still unreported.
            SessionEnd::Completed => SessionVerdict::Ambiguous,
            SessionEnd::Crashed | SessionEnd::StartFailed => SessionVerdict::Crashed,
        }
    }
}

/// Run `batch` to completion, timeout, crash or cancellation.
///
/// The runner is returned to `pool` only after a clean completion; otherwise
/// it is terminated.
pub fn execute(
    batch: &Batch,
    coverage: &CoverageMap,
    pool: &RunnerPool<'_>,
    policy: TimeoutPolicy,
    cancel: &CancelToken,
) -> SessionReport {
    let started = Instant::now();
    let finish = |end: SessionEnd, tally: &Tally<'_>| SessionReport {
        batch: batch.id,
        end,
        verdicts: batch.mutants.iter().map(|m| (*m, tally.verdict(*m, end))).collect(),
        elapsed: started.elapsed(),
    };
    let mut tally = Tally::new(batch);

    if cancel.is_cancelled() {
        debug!(batch = %batch.id, "cancelled before start");
        return finish(SessionEnd::Cancelled, &tally);
    }

    let mut runner = match pool.acquire() {
        Ok(runner) => runner,
        Err(e) => {
            warn!(batch = %batch.id, error = %e, "could not acquire a test runner");
            return finish(SessionEnd::StartFailed, &tally);
        }
    };

    let timeout = policy.deadline(batch.tests().filter_map(|t| coverage.baseline_duration(t)));
    let deadline = started + timeout;
    debug!(batch = %batch.id, mutants = batch.len(), tests = batch.active.len(), ?timeout, "starting session");

    let events = match runner.start(&RunRequest::from(batch)) {
        Ok(events) => events,
        Err(e) => {
            warn!(batch = %batch.id, error = %e, "test runner failed to start batch");
            pool.discard(runner);
            return finish(SessionEnd::StartFailed, &tally);
        }
    };

    let end = collect(batch, &events, runner.as_mut(), &mut tally, deadline, cancel);
    match end {
        SessionEnd::Completed => pool.release(runner),
        SessionEnd::Crashed => {
            warn!(batch = %batch.id, "discarding crashed test runner");
            pool.discard(runner);
        }
        _ => {
            debug!(batch = %batch.id, ?end, "terminating runner");
            pool.discard(runner);
        }
    }
    finish(end, &tally)
}

fn collect(
    batch: &Batch,
    events: &Receiver<RunnerEvent>,
    runner: &mut dyn TestRunner,
    tally: &mut Tally<'_>,
    deadline: Instant,
    cancel: &CancelToken,
) -> SessionEnd {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        select! {
            recv(events) -> event => match event {
                Ok(RunnerEvent::Outcome(outcome)) => {
                    if let Some(skipped) = tally.record(outcome) {
                        if let Err(e) = runner.skip(batch.id, &skipped) {
                            debug!(batch = %batch.id, error = %e, "skip hint not delivered");
                        }
                    }
                }
                Ok(RunnerEvent::Complete { batch_id, error }) => {
                    if batch_id.is_some_and(|id| id != batch.id) {
                        warn!(batch = %batch.id, echoed = ?batch_id, "ignoring completion for another batch");
                    } else if let Some(error) = error {
                        warn!(batch = %batch.id, %error, "test runner failed while completing");
                        return SessionEnd::Crashed;
                    } else {
                        return SessionEnd::Completed;
                    }
                }
                Ok(RunnerEvent::Exited { code }) => {
                    debug!(batch = %batch.id, ?code, "runner exited");
                    return SessionEnd::Crashed;
                }
                Err(_) => return SessionEnd::Crashed,
            },
            recv(cancel.receiver()) -> _ => return SessionEnd::Cancelled,
            default(remaining) => return SessionEnd::TimedOut,
        }
    }
}
