//! Test-runner processes and the pool that hands them to sessions.
//!
//! A [`TestRunner`] takes a batch request and streams [`RunnerEvent`]s back on
//! a channel. [`ProcessRunner`] is the real implementation: one long-lived
//! child speaking JSON lines on stdin/stdout.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::coverage::TestId;
use crate::mutants::MutantId;
use crate::planner::{Batch, BatchId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestResult {
    Passed,
    Failed,
    Error,
}

impl TestResult {
    /// Failed or errored: the active mutant was detected.
    pub fn detects(self) -> bool {
        matches!(self, TestResult::Failed | TestResult::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    pub test_id: TestId,
    pub result: TestResult,
    pub duration: Duration,
    /// Batch the runner believes it is executing, if it echoes it.
    pub batch_id: Option<BatchId>,
    /// Mutant the runner activated for this test, if it echoes it.
    pub active_mutant: Option<MutantId>,
}

impl TestOutcome {
    pub fn new(test_id: impl Into<TestId>, result: TestResult) -> Self {
        TestOutcome {
            test_id: test_id.into(),
            result,
            duration: Duration::ZERO,
            batch_id: None,
            active_mutant: None,
        }
    }

    pub fn with_active_mutant(mut self, mutant: MutantId) -> Self {
        self.active_mutant = Some(mutant);
        self
    }

    pub fn with_batch(mut self, batch: BatchId) -> Self {
        self.batch_id = Some(batch);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerEvent {
    Outcome(TestOutcome),
    /// End of the batch. `error` set means the runner failed while
    /// completing and cannot be trusted with another batch.
    Complete { batch_id: Option<BatchId>, error: Option<String> },
    /// The runner went away before completing.
    Exited { code: Option<i32> },
}

/// What a session asks a runner to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub batch_id: BatchId,
    pub tests: Vec<TestId>,
    pub active_mutants: BTreeMap<TestId, MutantId>,
}

impl From<&Batch> for RunRequest {
    fn from(batch: &Batch) -> Self {
        RunRequest {
            batch_id: batch.id,
            tests: batch.tests().cloned().collect(),
            active_mutants: batch.active.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("runner command is empty")]
    EmptyCommand,
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write to runner: {0}")]
    Send(#[source] std::io::Error),
    #[error("runner exited (code {0:?})")]
    Exited(Option<i32>),
    #[error("{0}")]
    Other(String),
}

pub trait TestRunner: Send {
    /// Begin a batch. Events for it arrive on the returned channel; the
    /// channel disconnecting means the runner is gone.
    fn start(&mut self, request: &RunRequest) -> Result<Receiver<RunnerEvent>, RunnerError>;

    /// Hint that `tests` no longer need to run for this batch.
    fn skip(&mut self, batch: BatchId, tests: &[TestId]) -> Result<(), RunnerError> {
        let _ = (batch, tests);
        Ok(())
    }

    /// Whether the runner can still take a batch. Checked before an idle
    /// runner is handed out again.
    fn is_alive(&mut self) -> bool {
        true
    }

    fn terminate(&mut self);
}

pub trait RunnerFactory: Send + Sync {
    fn spawn(&self) -> Result<Box<dyn TestRunner>, RunnerError>;

    /// Whether runners can activate a different mutant per test.
    fn supports_activation(&self) -> bool;
}

/// Idle runners waiting for the next session. A runner is owned by exactly one
/// session while checked out.
pub struct RunnerPool<'f> {
    factory: &'f dyn RunnerFactory,
    idle: Mutex<Vec<Box<dyn TestRunner>>>,
}

impl<'f> RunnerPool<'f> {
    pub fn new(factory: &'f dyn RunnerFactory) -> Self {
        RunnerPool { factory, idle: Mutex::new(Vec::new()) }
    }

    /// An idle runner that is still alive, or a freshly spawned one.
    pub fn acquire(&self) -> Result<Box<dyn TestRunner>, RunnerError> {
        loop {
            let Some(mut runner) = self.idle.lock().pop() else {
                break;
            };
            if runner.is_alive() {
                return Ok(runner);
            }
            debug!("idle test runner exited; dropping it");
            runner.terminate();
        }
        debug!("spawning test runner");
        self.factory.spawn()
    }

    /// Return a runner that finished its session cleanly.
    pub fn release(&self, runner: Box<dyn TestRunner>) {
        self.idle.lock().push(runner);
    }

    /// Drop a runner that crashed, timed out or was cancelled.
    pub fn discard(&self, mut runner: Box<dyn TestRunner>) {
        runner.terminate();
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn shutdown(&self) {
        for mut runner in self.idle.lock().drain(..) {
            runner.terminate();
        }
    }
}

impl Drop for RunnerPool<'_> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn parse_test_cmd(cmd: &str) -> (String, Vec<String>) {
    let parts: Vec<&str> = cmd.split_whitespace().collect();
    if parts.len() > 1 {
        (parts[0].to_string(), parts[1..].iter().map(|s| s.to_string()).collect())
    } else {
        (cmd.trim().to_string(), vec![])
    }
}

/// Absolute path for a relative command that exists under `cwd` or
/// `working_dir`; bare names are left for PATH lookup.
pub fn resolve_cmd(cmd: &str, working_dir: &Path, cwd: &Path) -> String {
    let p = Path::new(cmd);
    if p.is_absolute() || !cmd.contains('/') {
        return cmd.to_string();
    }
    for base in [cwd, working_dir] {
        let candidate = base.join(p);
        if candidate.exists() {
            return candidate.to_string_lossy().to_string();
        }
    }
    cmd.to_string()
}

#[derive(Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum WireRequest<'a> {
    Run {
        batch_id: BatchId,
        tests: &'a [TestId],
        active_mutants: &'a BTreeMap<TestId, MutantId>,
    },
    Skip {
        batch_id: BatchId,
        tests: &'a [TestId],
    },
}

#[derive(Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WireEvent {
    Outcome {
        test_id: TestId,
        result: TestResult,
        #[serde(default)]
        duration_ms: u64,
        #[serde(default)]
        batch_id: Option<BatchId>,
        #[serde(default)]
        active_mutant: Option<MutantId>,
    },
    Complete {
        #[serde(default)]
        batch_id: Option<BatchId>,
        #[serde(default)]
        error: Option<String>,
    },
}

impl From<WireEvent> for RunnerEvent {
    fn from(event: WireEvent) -> Self {
        match event {
            WireEvent::Outcome { test_id, result, duration_ms, batch_id, active_mutant } => {
                RunnerEvent::Outcome(TestOutcome {
                    test_id,
                    result,
                    duration: Duration::from_millis(duration_ms),
                    batch_id,
                    active_mutant,
                })
            }
            WireEvent::Complete { batch_id, error } => RunnerEvent::Complete { batch_id, error },
        }
    }
}

/// Parse one stdout line. Blank and malformed lines yield `None`.
pub fn parse_event_line(line: &str) -> Option<RunnerEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<WireEvent>(line) {
        Ok(event) => Some(event.into()),
        Err(e) => {
            trace!(line, error = %e, "ignoring runner output");
            None
        }
    }
}

/// Spawns [`ProcessRunner`]s from a shell-style command line.
#[derive(Debug, Clone)]
pub struct ProcessRunnerFactory {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
    activation: bool,
}

impl ProcessRunnerFactory {
    pub fn new(command: &str) -> Result<Self, RunnerError> {
        let (program, args) = parse_test_cmd(command);
        if program.is_empty() {
            return Err(RunnerError::EmptyCommand);
        }
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let program = resolve_cmd(&program, &cwd, &cwd);
        Ok(ProcessRunnerFactory { program, args, working_dir: None, envs: Vec::new(), activation: true })
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        self.program = resolve_cmd(&self.program, &dir, &cwd);
        self.working_dir = Some(dir);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Declare that the runner cannot activate mutants per test.
    pub fn without_activation(mut self) -> Self {
        self.activation = false;
        self
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl RunnerFactory for ProcessRunnerFactory {
    fn spawn(&self) -> Result<Box<dyn TestRunner>, RunnerError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("OBJC_DISABLE_INITIALIZE_FORK_SAFETY", "YES")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        let child = cmd
            .spawn()
            .map_err(|source| RunnerError::Spawn { command: self.command_line(), source })?;
        Ok(Box::new(ProcessRunner::attach(child)?))
    }

    fn supports_activation(&self) -> bool {
        self.activation
    }
}

#[derive(Default)]
struct Sink {
    current: Option<Sender<RunnerEvent>>,
    closed: bool,
}

/// One child process reused across sessions.
pub struct ProcessRunner {
    child: Child,
    stdin: Option<ChildStdin>,
    sink: Arc<Mutex<Sink>>,
}

impl ProcessRunner {
    fn attach(mut child: Child) -> Result<Self, RunnerError> {
        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::Other("runner stdout not captured".to_string()))?;
        let sink = Arc::new(Mutex::new(Sink::default()));
        let pid = child.id();

        let reader_sink = Arc::clone(&sink);
        std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                let Some(event) = parse_event_line(&line) else { continue };
                if let Some(tx) = &reader_sink.lock().current {
                    let _ = tx.send(event);
                }
            }
            let mut sink = reader_sink.lock();
            sink.closed = true;
            if let Some(tx) = sink.current.take() {
                let _ = tx.send(RunnerEvent::Exited { code: None });
            }
        });

        if let Some(stderr) = child.stderr.take() {
            std::thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    debug!(pid, "{line}");
                }
            });
        }

        Ok(ProcessRunner { child, stdin, sink })
    }

    fn write(&mut self, request: &WireRequest<'_>) -> Result<(), RunnerError> {
        let stdin = self.stdin.as_mut().ok_or(RunnerError::Exited(None))?;
        let mut line = serde_json::to_string(request).map_err(|e| RunnerError::Other(e.to_string()))?;
        line.push('\n');
        stdin.write_all(line.as_bytes()).map_err(RunnerError::Send)?;
        stdin.flush().map_err(RunnerError::Send)
    }
}

impl TestRunner for ProcessRunner {
    fn start(&mut self, request: &RunRequest) -> Result<Receiver<RunnerEvent>, RunnerError> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Err(RunnerError::Exited(status.code()));
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        {
            let mut sink = self.sink.lock();
            if sink.closed {
                return Err(RunnerError::Exited(None));
            }
            sink.current = Some(tx);
        }
        self.write(&WireRequest::Run {
            batch_id: request.batch_id,
            tests: &request.tests,
            active_mutants: &request.active_mutants,
        })?;
        Ok(rx)
    }

    fn skip(&mut self, batch: BatchId, tests: &[TestId]) -> Result<(), RunnerError> {
        self.write(&WireRequest::Skip { batch_id: batch, tests })
    }

    fn is_alive(&mut self) -> bool {
        !self.sink.lock().closed && matches!(self.child.try_wait(), Ok(None))
    }

    fn terminate(&mut self) {
        self.sink.lock().current = None;
        self.stdin = None;
        if let Err(e) = self.child.kill() {
            trace!(error = %e, "runner already gone");
        }
        match self.child.wait() {
            Ok(status) => debug!(pid = self.child.id(), ?status, "runner terminated"),
            Err(e) => warn!(error = %e, "failed to reap runner"),
        }
    }
}

impl Drop for ProcessRunner {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            self.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_outcome_with_echoes() {
        let event = parse_event_line(
            r#"{"event":"outcome","test_id":"t1","result":"failed","duration_ms":12,"batch_id":3,"active_mutant":7}"#,
        );
        let expected = TestOutcome {
            test_id: TestId::from("t1"),
            result: TestResult::Failed,
            duration: Duration::from_millis(12),
            batch_id: Some(BatchId(3)),
            active_mutant: Some(MutantId(7)),
        };
        assert_eq!(event, Some(RunnerEvent::Outcome(expected)));
    }

    #[test]
    fn ignores_noise_lines() {
        assert_eq!(parse_event_line(""), None);
        assert_eq!(parse_event_line("collected 4 items"), None);
        assert_eq!(parse_event_line(r#"{"event":"bogus"}"#), None);
        assert_eq!(
            parse_event_line(r#"{"event":"complete"}"#),
            Some(RunnerEvent::Complete { batch_id: None, error: None })
        );
        assert_eq!(
            parse_event_line(r#"{"event":"complete","batch_id":2,"error":"pipe closed"}"#),
            Some(RunnerEvent::Complete { batch_id: Some(BatchId(2)), error: Some("pipe closed".into()) })
        );
    }

    #[test]
    fn run_request_wire_shape() {
        let tests = vec![TestId::from("a")];
        let active = BTreeMap::from([(TestId::from("a"), MutantId(2))]);
        let line = serde_json::to_string(&WireRequest::Run {
            batch_id: BatchId(1),
            tests: &tests,
            active_mutants: &active,
        })
        .unwrap();
        assert_eq!(line, r#"{"cmd":"run","batch_id":1,"tests":["a"],"active_mutants":{"a":2}}"#);
    }

    #[test]
    fn test_parse_test_cmd() {
        let (program, args) = parse_test_cmd("python -m pytest -x");
        assert_eq!(program, "python");
        assert_eq!(args, vec!["-m", "pytest", "-x"]);
    }
}
