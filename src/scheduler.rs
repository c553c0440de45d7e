//! The run loop: static verdicts, planning, a worker pool of sessions, and
//! retry handling for crashed or unattributable mutants.

use std::collections::{BTreeMap, HashMap};
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, SendError, Sender, select};
use tracing::{debug, info, warn};

use crate::aggregator::{RunReport, VerdictAggregator};
use crate::config::RunConfig;
use crate::coverage::CoverageMap;
use crate::error::RunError;
use crate::mutants::{Mutant, MutantId, Verdict};
use crate::planner::{Batch, BatchId, CoveredMutant, Planner};
use crate::runner::{RunnerFactory, RunnerPool};
use crate::session::{self, CancelSource, CancelToken, SessionEnd, SessionReport, SessionVerdict};

/// Assign a verdict to every mutant.
///
/// Only configuration defects abort; runner trouble is retried and eventually
/// recorded as `RuntimeError`. `cancel` stops the run early, leaving the
/// undetermined mutants as `Timeout`.
pub fn run(
    mutants: Vec<Mutant>,
    coverage: &CoverageMap,
    factory: &dyn RunnerFactory,
    config: &RunConfig,
    cancel: &CancelToken,
) -> Result<RunReport, RunError> {
    let strategy = config.validate(factory.supports_activation())?;
    let started = Instant::now();

    let covered = classify(&mutants, coverage, config);
    let mut aggregator = VerdictAggregator::new(mutants);
    for (id, verdict) in &covered.statically {
        aggregator.assign(*id, *verdict)?;
    }

    let batches = Planner::new(strategy).plan(&covered.runnable, 1);
    info!(
        mutants = aggregator.mutants().len(),
        runnable = covered.runnable.len(),
        batches = batches.len(),
        ?strategy,
        "planned run"
    );

    if !batches.is_empty() {
        let mut coordinator = Coordinator {
            aggregator: &mut aggregator,
            runnable: covered.runnable.iter().map(|m| (m.id, m)).collect(),
            retries: HashMap::new(),
            retry_limit: config.retry_limit,
            next_batch: batches.len() as u32 + 1,
        };
        dispatch(batches, coverage, factory, config, cancel, &mut coordinator)?;
    }

    let report = aggregator.finish()?;
    info!(
        killed = report.summary.killed,
        survived = report.summary.survived,
        score = %report.summary.score_label(),
        elapsed = ?started.elapsed(),
        "run finished"
    );
    Ok(report)
}

struct Classified {
    statically: Vec<(MutantId, Verdict)>,
    runnable: Vec<CoveredMutant>,
}

/// Verdicts that need no session: ignored and uncovered mutants.
fn classify(mutants: &[Mutant], coverage: &CoverageMap, config: &RunConfig) -> Classified {
    let mut classified = Classified { statically: Vec::new(), runnable: Vec::new() };
    for mutant in mutants.iter().filter(|m| m.status == Verdict::Pending) {
        if mutant.ignore_reason.is_some() || config.ignored_kinds.contains(&mutant.kind) {
            classified.statically.push((mutant.id, Verdict::Ignored));
            continue;
        }
        let tests = coverage.tests_covering(&mutant.location);
        if tests.is_empty() {
            debug!(mutant = %mutant.id, "not covered by any test");
            classified.statically.push((mutant.id, Verdict::NotCovered));
        } else {
            classified.runnable.push(CoveredMutant { id: mutant.id, tests });
        }
    }
    classified
}

/// Turns session reports into verdicts and requeues what needs another try.
struct Coordinator<'a> {
    aggregator: &'a mut VerdictAggregator,
    runnable: BTreeMap<MutantId, &'a CoveredMutant>,
    retries: HashMap<MutantId, u32>,
    retry_limit: u32,
    next_batch: u32,
}

impl Coordinator<'_> {
    fn absorb(&mut self, report: SessionReport, cancelled: bool) -> Result<Vec<Batch>, RunError> {
        debug!(batch = %report.batch, end = ?report.end, elapsed = ?report.elapsed, "session finished");
        let timed_out = report.end == SessionEnd::TimedOut;
        let mut requeue = Vec::new();
        for (id, verdict) in report.verdicts {
            let verdict = match verdict {
                SessionVerdict::Killed { .. } => Verdict::Killed,
                SessionVerdict::Survived => Verdict::Survived,
                SessionVerdict::Timeout => Verdict::Timeout,
                SessionVerdict::Crashed | SessionVerdict::Ambiguous if cancelled => Verdict::Timeout,
                SessionVerdict::Crashed | SessionVerdict::Ambiguous => {
                    let attempts = self.retries.entry(id).or_insert(0);
                    match self.runnable.get(&id) {
                        Some(mutant) if *attempts < self.retry_limit => {
                            *attempts += 1;
                            let batch = Batch::singleton(BatchId(self.next_batch), mutant);
                            self.next_batch += 1;
                            warn!(mutant = %id, attempt = *attempts, batch = %batch.id, ?verdict, "requeueing in isolation");
                            requeue.push(batch);
                            continue;
                        }
                        _ if timed_out => Verdict::Timeout,
                        _ => {
                            warn!(mutant = %id, ?verdict, "retry limit reached");
                            Verdict::RuntimeError
                        }
                    }
                }
            };
            self.aggregator.assign(id, verdict)?;
        }
        Ok(requeue)
    }

    /// Queue `batch` for a worker. Returns whether it is now in flight; a
    /// batch that cannot be queued leaves its mutants as `RuntimeError`.
    fn enqueue(&mut self, work: &Sender<Batch>, batch: Batch) -> Result<bool, RunError> {
        let Err(SendError(batch)) = work.send(batch) else {
            return Ok(true);
        };
        warn!(batch = %batch.id, mutants = batch.len(), "work queue closed; batch not run");
        for id in &batch.mutants {
            self.aggregator.assign(*id, Verdict::RuntimeError)?;
        }
        Ok(false)
    }
}

fn dispatch(
    batches: Vec<Batch>,
    coverage: &CoverageMap,
    factory: &dyn RunnerFactory,
    config: &RunConfig,
    cancel: &CancelToken,
    coordinator: &mut Coordinator<'_>,
) -> Result<(), RunError> {
    let pool = RunnerPool::new(factory);
    let policy = config.timeout_policy();
    let (mut run_cancel, session_cancel) = CancelSource::pair();
    let (work_tx, work_rx) = crossbeam_channel::unbounded::<Batch>();
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<SessionReport>();
    let workers = config.concurrency.min(batches.len()).max(1);
    if cancel.is_cancelled() {
        run_cancel.cancel();
    }

    let mut in_flight = 0;
    for batch in batches {
        if coordinator.enqueue(&work_tx, batch)? {
            in_flight += 1;
        }
    }

    let outcome = thread::scope(|scope| {
        for worker in 0..workers {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let (pool, token) = (&pool, session_cancel.clone());
            scope.spawn(move || {
                for batch in work_rx.iter() {
                    debug!(worker, batch = %batch.id, "picked up batch");
                    let report = session::execute(&batch, coverage, pool, policy, &token);
                    if result_tx.send(report).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let result = coordinate(coordinator, &result_rx, &work_tx, &mut run_cancel, cancel, config, in_flight);

        // Workers drain and exit once the queue closes.
        drop(work_tx);
        run_cancel.cancel();
        result
    });

    pool.shutdown();
    outcome
}

/// Collect reports until nothing is in flight, requeueing retries and closing
/// `run_cancel` on external cancellation or an exhausted budget.
fn coordinate(
    coordinator: &mut Coordinator<'_>,
    results: &Receiver<SessionReport>,
    work: &Sender<Batch>,
    run_cancel: &mut CancelSource,
    cancel: &CancelToken,
    config: &RunConfig,
    mut in_flight: usize,
) -> Result<(), RunError> {
    let mut external: Receiver<()> = cancel.receiver().clone();
    let mut budget = match config.run_budget() {
        Some(budget) => crossbeam_channel::after(budget),
        None => crossbeam_channel::never(),
    };

    while in_flight > 0 {
        select! {
            recv(results) -> report => {
                let Ok(report) = report else {
                    warn!(in_flight, "all workers exited early");
                    return Ok(());
                };
                in_flight -= 1;
                for batch in coordinator.absorb(report, run_cancel.is_cancelled())? {
                    if coordinator.enqueue(work, batch)? {
                        in_flight += 1;
                    }
                }
            }
            recv(external) -> _ => {
                info!("run cancelled");
                run_cancel.cancel();
                external = crossbeam_channel::never();
            }
            recv(budget) -> _ => {
                warn!(budget_ms = config.run_budget_ms, "run budget exhausted; cancelling remaining sessions");
                run_cancel.cancel();
                budget = crossbeam_channel::never();
            }
        }
    }
    Ok(())
}
