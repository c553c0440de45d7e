use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crossbeam_channel::Receiver;
use mutator::coverage::TestId;
use mutator::mutants::MutantId;
use mutator::planner::BatchId;
use mutator::runner::{
    self, ProcessRunnerFactory, RunRequest, RunnerError, RunnerEvent, RunnerFactory, RunnerPool, TestResult,
};

/// Answers every run request: tests named `kills*` fail, the rest pass.
const ECHO_RUNNER: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"cmd":"run"'*) ;;
    *) continue ;;
  esac
  batch=$(printf '%s\n' "$line" | sed 's/.*"batch_id":\([0-9]*\).*/\1/')
  tests=$(printf '%s\n' "$line" | sed 's/.*"tests":\[\([^]]*\)\].*/\1/' | tr -d '"' | tr ',' ' ')
  echo "runner noise"
  for t in $tests; do
    case "$t" in
      kills*) result=failed ;;
      *) result=passed ;;
    esac
    printf '{"event":"outcome","test_id":"%s","result":"%s","batch_id":%s}\n' "$t" "$result" "$batch"
  done
  printf '{"event":"complete","batch_id":%s}\n' "$batch"
done
"#;

/// Completes a single batch, then exits cleanly.
const ONE_SHOT_RUNNER: &str = r#"
read -r line
printf '{"event":"complete"}\n'
"#;

/// Reports one test, then dies.
const CRASHING_RUNNER: &str = r#"
read -r line
printf '{"event":"outcome","test_id":"a","result":"passed"}\n'
exit 3
"#;

fn script_factory(dir: &Path, body: &str) -> ProcessRunnerFactory {
    let script = dir.join("runner.sh");
    std::fs::write(&script, body).unwrap();
    ProcessRunnerFactory::new(&format!("sh {}", script.display())).unwrap()
}

fn request(batch: u32, tests: &[&str]) -> RunRequest {
    let tests: Vec<TestId> = tests.iter().map(|t| TestId::from(*t)).collect();
    let active_mutants: BTreeMap<TestId, MutantId> = tests.iter().map(|t| (t.clone(), MutantId(1))).collect();
    RunRequest { batch_id: BatchId(batch), tests, active_mutants }
}

/// Events up to and including the first terminal one.
fn drain(events: &Receiver<RunnerEvent>) -> Vec<RunnerEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.recv_timeout(Duration::from_secs(10)) {
        let done = matches!(event, RunnerEvent::Complete { .. } | RunnerEvent::Exited { .. });
        seen.push(event);
        if done {
            break;
        }
    }
    seen
}

fn results(events: &[RunnerEvent]) -> Vec<(String, TestResult)> {
    events
        .iter()
        .filter_map(|e| match e {
            RunnerEvent::Outcome(o) => Some((o.test_id.to_string(), o.result)),
            _ => None,
        })
        .collect()
}

// --- ProcessRunner ---

#[cfg(unix)]
#[test]
fn process_runner_streams_outcomes_then_completes() {
    let dir = tempfile::TempDir::new().unwrap();
    let factory = script_factory(dir.path(), ECHO_RUNNER);
    let mut runner = factory.spawn().unwrap();

    let events = drain(&runner.start(&request(4, &["ok", "kills_it"])).unwrap());
    assert_eq!(
        results(&events),
        vec![("ok".to_string(), TestResult::Passed), ("kills_it".to_string(), TestResult::Failed)]
    );
    assert_eq!(events.last(), Some(&RunnerEvent::Complete { batch_id: Some(BatchId(4)), error: None }));
    let RunnerEvent::Outcome(first) = &events[0] else { panic!("expected an outcome") };
    assert_eq!(first.batch_id, Some(BatchId(4)));
    runner.terminate();
}

#[cfg(unix)]
#[test]
fn process_runner_serves_several_sessions() {
    let dir = tempfile::TempDir::new().unwrap();
    let factory = script_factory(dir.path(), ECHO_RUNNER);
    let mut runner = factory.spawn().unwrap();

    let first = drain(&runner.start(&request(1, &["a"])).unwrap());
    runner.skip(BatchId(1), &[TestId::from("b")]).unwrap();
    let second = drain(&runner.start(&request(2, &["b", "c"])).unwrap());

    assert_eq!(first.len(), 2);
    assert_eq!(results(&second).len(), 2);
    assert_eq!(second.last(), Some(&RunnerEvent::Complete { batch_id: Some(BatchId(2)), error: None }));
}

#[cfg(unix)]
#[test]
fn crashed_process_reports_exit_and_refuses_new_work() {
    let dir = tempfile::TempDir::new().unwrap();
    let factory = script_factory(dir.path(), CRASHING_RUNNER);
    let mut runner = factory.spawn().unwrap();

    let events = drain(&runner.start(&request(1, &["a", "b"])).unwrap());
    assert_eq!(results(&events), vec![("a".to_string(), TestResult::Passed)]);
    assert_eq!(events.last(), Some(&RunnerEvent::Exited { code: None }));
    assert!(matches!(runner.start(&request(2, &["b"])), Err(RunnerError::Exited(_))));
}

#[cfg(unix)]
#[test]
fn missing_program_fails_to_spawn() {
    let factory = ProcessRunnerFactory::new("/nonexistent/bin/test-runner --flag").unwrap();
    match factory.spawn() {
        Err(RunnerError::Spawn { command, .. }) => assert_eq!(command, "/nonexistent/bin/test-runner --flag"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("spawn should fail"),
    }
}

#[cfg(unix)]
#[test]
fn runner_starts_in_its_working_dir() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("runner.sh"), ECHO_RUNNER).unwrap();
    let factory = ProcessRunnerFactory::new("sh runner.sh").unwrap().with_working_dir(dir.path());
    let mut runner = factory.spawn().unwrap();

    let events = drain(&runner.start(&request(1, &["kills_a"])).unwrap());
    assert_eq!(results(&events), vec![("kills_a".to_string(), TestResult::Failed)]);
    runner.terminate();
}

#[test]
fn empty_command_is_rejected() {
    assert!(matches!(ProcessRunnerFactory::new("   "), Err(RunnerError::EmptyCommand)));
}

#[test]
fn activation_support_can_be_disabled() {
    let factory = ProcessRunnerFactory::new("pytest").unwrap();
    assert!(factory.supports_activation());
    assert!(!factory.without_activation().supports_activation());
}

// --- RunnerPool ---

#[cfg(unix)]
#[test]
fn pool_reuses_released_runners() {
    let dir = tempfile::TempDir::new().unwrap();
    let factory = script_factory(dir.path(), ECHO_RUNNER);
    let pool = RunnerPool::new(&factory);

    let runner = pool.acquire().unwrap();
    assert_eq!(pool.idle_count(), 0);
    pool.release(runner);
    assert_eq!(pool.idle_count(), 1);

    let mut runner = pool.acquire().unwrap();
    assert_eq!(pool.idle_count(), 0);
    let events = drain(&runner.start(&request(9, &["x"])).unwrap());
    assert_eq!(events.len(), 2);

    pool.discard(runner);
    assert_eq!(pool.idle_count(), 0);
    pool.shutdown();
}

#[cfg(unix)]
#[test]
fn pool_replaces_runners_that_died_while_idle() {
    let dir = tempfile::TempDir::new().unwrap();
    let factory = script_factory(dir.path(), ONE_SHOT_RUNNER);
    let pool = RunnerPool::new(&factory);

    let mut runner = pool.acquire().unwrap();
    let events = drain(&runner.start(&request(1, &["a"])).unwrap());
    assert_eq!(events, vec![RunnerEvent::Complete { batch_id: None, error: None }]);
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while runner.is_alive() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!runner.is_alive());
    pool.release(runner);

    let mut fresh = pool.acquire().unwrap();
    assert_eq!(pool.idle_count(), 0);
    let events = drain(&fresh.start(&request(2, &["b"])).unwrap());
    assert_eq!(events.len(), 1);
    pool.shutdown();
}

// --- parse_event_line ---

#[test]
fn complete_without_batch_echo_parses() {
    assert_eq!(
        runner::parse_event_line(r#"{"event":"complete"}"#),
        Some(RunnerEvent::Complete { batch_id: None, error: None })
    );
}

#[test]
fn complete_carries_runner_error() {
    assert_eq!(
        runner::parse_event_line(r#"{"event":"complete","batch_id":3,"error":"test host crashed"}"#),
        Some(RunnerEvent::Complete { batch_id: Some(BatchId(3)), error: Some("test host crashed".to_string()) })
    );
}

#[test]
fn unknown_event_kinds_are_ignored() {
    assert_eq!(runner::parse_event_line(r#"{"event":"progress","pct":50}"#), None);
    assert_eq!(runner::parse_event_line("   "), None);
}

// --- parse_test_cmd ---

#[test]
fn parse_test_cmd_single_word() {
    let (program, args) = runner::parse_test_cmd("pytest");
    assert_eq!(program, "pytest");
    assert!(args.is_empty());
}

#[test]
fn parse_test_cmd_multi_word() {
    let (program, args) = runner::parse_test_cmd("python -m pytest");
    assert_eq!(program, "python");
    assert_eq!(args, vec!["-m", "pytest"]);
}

#[test]
fn parse_test_cmd_npx() {
    let (program, args) = runner::parse_test_cmd("npx vitest run");
    assert_eq!(program, "npx");
    assert_eq!(args, vec!["vitest", "run"]);
}

// --- resolve_cmd ---

#[test]
fn resolve_cmd_bare_name_passes_through() {
    assert_eq!(runner::resolve_cmd("pytest", Path::new("/work"), Path::new("/here")), "pytest");
}

#[test]
fn resolve_cmd_absolute_passes_through() {
    assert_eq!(runner::resolve_cmd("/usr/bin/pytest", Path::new("/work"), Path::new("/here")), "/usr/bin/pytest");
}

#[test]
fn resolve_cmd_relative_prefers_cwd_then_working_dir() {
    let cwd = tempfile::TempDir::new().unwrap();
    let work = tempfile::TempDir::new().unwrap();
    let bin = work.path().join(".venv").join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    std::fs::write(bin.join("pytest"), "#!/bin/sh\n").unwrap();

    let resolved = runner::resolve_cmd(".venv/bin/pytest", work.path(), cwd.path());
    assert_eq!(Path::new(&resolved), bin.join("pytest"));

    let missing = runner::resolve_cmd("./nowhere/pytest", work.path(), cwd.path());
    assert_eq!(missing, "./nowhere/pytest");
}
