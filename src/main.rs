use mutator::aggregator::RunReport;
use mutator::catalog::{Catalog, MutationKind};
use mutator::config::RunConfig;
use mutator::coverage::CoverageMap;
use mutator::error::RunError;
use mutator::generator::Generator;
use mutator::lower::{self, LowerError};
use mutator::mutants::Mutant;
use mutator::output;
use mutator::planner::PlannerStrategy;
use mutator::runner::ProcessRunnerFactory;
use mutator::scheduler;
use mutator::session::CancelToken;
use mutator::state::{self, RunRecord};
use mutator::syntax::SourceFile;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mutator", version, about = "Coverage-aware mutation testing with batched test sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate mutants for source files without running anything
    List {
        /// Source files to mutate
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Files whose mutants are generated but marked ignored
        #[arg(long = "no-mutate")]
        no_mutate: Vec<PathBuf>,
        /// Output JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
    /// Run mutation testing against a coverage map and a test-runner process
    Run {
        /// Source files to mutate
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Coverage map JSON (baseline run or precomputed entries)
        #[arg(short, long)]
        coverage: PathBuf,
        /// Test-runner command speaking the JSON-lines protocol
        #[arg(short, long)]
        runner: String,
        /// Directory the test runner starts in; relative runner paths resolve against it
        #[arg(long)]
        runner_dir: Option<PathBuf>,
        /// Run configuration JSON; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// Files whose mutants are generated but marked ignored
        #[arg(long = "no-mutate")]
        no_mutate: Vec<PathBuf>,
        /// Concurrent runner sessions (default: available parallelism)
        #[arg(long)]
        concurrency: Option<usize>,
        /// One mutant per session, for runners without per-test activation
        #[arg(long)]
        isolated: bool,
        /// Timeout multiplier over baseline test durations (default: 3)
        #[arg(long)]
        timeout_mult: Option<f64>,
        /// Overall budget in milliseconds; remaining mutants time out
        #[arg(long)]
        budget_ms: Option<u64>,
        /// Mutation kinds to mark ignored (repeatable)
        #[arg(long = "ignore-kind")]
        ignore_kind: Vec<MutationKind>,
        /// Run id passed to the runner (default: auto-generated)
        #[arg(long, env = "MUTATOR_RUN_ID")]
        run_id: Option<String>,
        /// Output JSON instead of human-readable text
        #[arg(long)]
        json: bool,
        /// Exit code only, no output
        #[arg(short, long)]
        quiet: bool,
    },
    /// Show details for a survived mutant by ref
    Show {
        /// Mutant ref (e.g. @m1 or m1)
        #[arg(name = "ref")]
        mutant_ref: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Summary of last run
    Status {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::List { files, no_mutate, json } => cmd_list(&files, &no_mutate, json),
        Commands::Run {
            files,
            coverage,
            runner,
            runner_dir,
            config,
            no_mutate,
            concurrency,
            isolated,
            timeout_mult,
            budget_ms,
            ignore_kind,
            run_id,
            json,
            quiet,
        } => {
            let overrides = Overrides { concurrency, isolated, timeout_mult, budget_ms, ignore_kind };
            let run = RunArgs { files, no_mutate, coverage, runner, runner_dir, config, run_id, json, quiet };
            cmd_run(run, overrides)
        }
        Commands::Show { mutant_ref, json } => cmd_show(&mutant_ref, json),
        Commands::Status { json } => cmd_status(json),
    };

    process::exit(exit_code);
}

/// Logs go to stderr so `--json` output stays parseable.
fn init_logging() {
    let filter = EnvFilter::try_from_env("MUTATOR_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn generate_run_id() -> String {
    format!("{:08x}", fastrand::u32(..))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), i32> {
    match serde_json::to_string(value) {
        Ok(json) => {
            println!("{}", json);
            Ok(())
        }
        Err(e) => {
            output::print_error(&format!("Failed to serialize output: {}", e));
            Err(3)
        }
    }
}

/// Read and lower every file. Errors come back as (message, exit code).
fn load_sources(
    files: &[PathBuf],
    no_mutate: &[PathBuf],
) -> Result<(Vec<SourceFile>, BTreeMap<Utf8PathBuf, String>), (String, i32)> {
    let mut parsed = Vec::with_capacity(files.len());
    let mut sources = BTreeMap::new();
    for file in files {
        let path = Utf8PathBuf::from_path_buf(file.clone())
            .map_err(|p| (format!("Path is not valid UTF-8: {}", p.display()), 2))?;
        if !path.exists() {
            return Err((format!("Source file not found: {}. Check the path and try again.", path), 2));
        }
        let source = std::fs::read_to_string(&path).map_err(|e| (format!("Failed to read {}: {}", path, e), 3))?;
        let parsed_file = lower::parse_file(&path, &source).map_err(|e| match e {
            LowerError::UnsupportedLanguage(_) => (e.to_string(), 2),
            _ => (e.to_string(), 3),
        })?;
        let excluded = no_mutate.iter().any(|p| p == file);
        parsed.push(parsed_file.excluded(excluded));
        sources.insert(path, source);
    }
    Ok((parsed, sources))
}

fn cmd_list(files: &[PathBuf], no_mutate: &[PathBuf], json_mode: bool) -> i32 {
    let (parsed, _) = match load_sources(files, no_mutate) {
        Ok(loaded) => loaded,
        Err((msg, code)) => {
            output::print_error(&msg);
            return code;
        }
    };
    let catalog = Catalog::standard();
    let mutants: Vec<Mutant> = Generator::new(&catalog).generate(&parsed).collect();

    if json_mode {
        return print_json(&mutants).err().unwrap_or(0);
    }
    if mutants.is_empty() {
        output::print_success("No mutable code found.");
    } else {
        output::print_mutants(&mutants);
    }
    0
}

struct RunArgs {
    files: Vec<PathBuf>,
    no_mutate: Vec<PathBuf>,
    coverage: PathBuf,
    runner: String,
    runner_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    run_id: Option<String>,
    json: bool,
    quiet: bool,
}

struct Overrides {
    concurrency: Option<usize>,
    isolated: bool,
    timeout_mult: Option<f64>,
    budget_ms: Option<u64>,
    ignore_kind: Vec<MutationKind>,
}

impl Overrides {
    fn apply(self, mut config: RunConfig) -> RunConfig {
        if let Some(concurrency) = self.concurrency {
            config = config.with_concurrency(concurrency);
        }
        if self.isolated {
            config = config.with_planner(Some(PlannerStrategy::Isolated));
        }
        if let Some(factor) = self.timeout_mult {
            config = config.with_timeout_factor(factor);
        }
        if let Some(budget) = self.budget_ms {
            config = config.with_run_budget(Some(Duration::from_millis(budget)));
        }
        if !self.ignore_kind.is_empty() {
            config.ignored_kinds.extend(self.ignore_kind);
        }
        config
    }
}

#[derive(Serialize)]
struct RunOutput<'a> {
    #[serde(flatten)]
    record: &'a RunRecord,
    mutants: &'a [Mutant],
}

fn cmd_run(args: RunArgs, overrides: Overrides) -> i32 {
    let started = Instant::now();

    let config = match &args.config {
        Some(path) => match RunConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                output::print_error(&e.to_string());
                return 2;
            }
        },
        None => RunConfig::default(),
    };
    let config = overrides.apply(config);

    let (parsed, sources) = match load_sources(&args.files, &args.no_mutate) {
        Ok(loaded) => loaded,
        Err((msg, code)) => {
            output::print_error(&msg);
            return code;
        }
    };

    let catalog = Catalog::standard();
    let mutants: Vec<Mutant> = Generator::new(&catalog).generate(&parsed).collect();
    if mutants.is_empty() {
        if args.quiet {
            return 0;
        }
        let record = RunRecord::from_report(
            args.run_id.unwrap_or_else(generate_run_id),
            &RunReport { mutants: vec![], summary: Default::default() },
            0,
            &sources,
        );
        if args.json {
            return print_json(&RunOutput { record: &record, mutants: &[] }).err().unwrap_or(0);
        }
        output::print_success("No mutable code found.");
        return 0;
    }

    let coverage = match CoverageMap::load(&args.coverage) {
        Ok(coverage) => coverage,
        Err(e) => {
            output::print_error(&format!("Malformed coverage map: {}", e));
            return 2;
        }
    };

    let run_id = args.run_id.unwrap_or_else(generate_run_id);
    let factory = match ProcessRunnerFactory::new(&args.runner) {
        Ok(factory) => {
            let factory = factory.with_env("MUTATOR_RUN_ID", run_id.as_str());
            match args.runner_dir {
                Some(dir) => factory.with_working_dir(dir),
                None => factory,
            }
        }
        Err(e) => {
            output::print_error(&e.to_string());
            return 2;
        }
    };

    let report = match scheduler::run(mutants, &coverage, &factory, &config, &CancelToken::never()) {
        Ok(report) => report,
        Err(e) => {
            output::print_error(&e.to_string());
            return match e {
                RunError::Config(_) => 2,
                RunError::Verdict(_) => 3,
            };
        }
    };

    let record = RunRecord::from_report(run_id, &report, started.elapsed().as_millis() as u64, &sources);
    state::save_last_run(&record);
    let exit = if report.summary.survived > 0 { 1 } else { 0 };

    if args.quiet {
        return exit;
    }
    if args.json {
        if let Err(code) = print_json(&RunOutput { record: &record, mutants: &report.mutants }) {
            return code;
        }
    } else {
        output::print_run_result(&record);
    }
    exit
}

fn cmd_show(mutant_ref: &str, json_mode: bool) -> i32 {
    let last_run = match state::load_last_run() {
        Some(r) => r,
        None => {
            output::print_error("No previous run found. Run `mutator run` first.");
            return 2;
        }
    };

    match last_run.survivor(mutant_ref) {
        Some(m) => {
            if json_mode {
                return print_json(m).err().unwrap_or(0);
            }
            output::print_mutant_detail(m);
            0
        }
        None => {
            let valid: Vec<_> = last_run.survived_mutants.iter().map(|m| format!("@{}", m.id)).collect();
            output::print_error(&format!(
                "Mutant {} not found. Valid refs: {}",
                mutant_ref,
                valid.join(", ")
            ));
            2
        }
    }
}

fn cmd_status(json_mode: bool) -> i32 {
    match state::load_last_run() {
        Some(record) => {
            if json_mode {
                return print_json(&record).err().unwrap_or(0);
            }
            output::print_status(&record);
            0
        }
        None => {
            output::print_error("No previous run found. Run `mutator run` first.");
            2
        }
    }
}
