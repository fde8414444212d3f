//! Litmus - run JavaScript/TypeScript solutions against test cases.
//!
//! `litmus run` judges a solution file; `litmus normalize` prints what would be
//! executed. The hidden `litmus worker` command serves process isolation.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use console::style;
use serde::Deserialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use litmus::isolation::{worker, WorkerResponse};
use litmus::{
    normalize, Dialect, EvalResult, IsolationMode, Judge, JudgeConfig, RunRequest, TestCase,
    TestStatus, Verdict,
};

/// Exit code of a run that completed without being accepted
const EXIT_NOT_ACCEPTED: u8 = 1;
/// Exit code of a rejected run or a usage error
const EXIT_REJECTED: u8 = 2;

#[derive(Parser)]
#[command(
    name = "litmus",
    version,
    about = "Sandboxed judge for JavaScript and TypeScript exercise solutions"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a solution against a test file.
    Run(RunArgs),
    /// Print the executable form of a solution.
    Normalize {
        /// Solution source file
        source: PathBuf,
        /// Source dialect (js or ts); inferred from the extension when omitted
        #[arg(long)]
        dialect: Option<Dialect>,
    },
    /// Serve a single run over stdin and stdout.
    #[command(hide = true)]
    Worker,
}

#[derive(Args)]
struct RunArgs {
    /// Solution source file
    source: PathBuf,
    /// JSON test file: an array of test cases, or an object with a `tests` array
    #[arg(short, long)]
    tests: PathBuf,
    /// Source dialect (js or ts); inferred from the extension when omitted
    #[arg(long)]
    dialect: Option<Dialect>,
    /// Per-test time limit in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Isolation mode (thread or process)
    #[arg(long)]
    isolation: Option<IsolationMode>,
    /// Configuration file (default: ~/.litmus/config.json if present)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the raw result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TestFile {
    List(Vec<TestCase>),
    Problem { tests: Vec<TestCase> },
}

fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Run(args) => cmd_run(&args),
        Command::Normalize { source, dialect } => cmd_normalize(&source, dialect),
        Command::Worker => worker::serve_stdio()
            .map(|()| ExitCode::SUCCESS)
            .context("worker failed"),
    };

    outcome.unwrap_or_else(|err| {
        eprintln!("{} {err:#}", style("error:").red().bold());
        ExitCode::from(EXIT_REJECTED)
    })
}

/// Diagnostics go to stderr, filtered by `RUST_LOG` (default `warn`).
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

fn cmd_run(args: &RunArgs) -> Result<ExitCode> {
    let mut config = JudgeConfig::load_or_default(args.config.as_deref())?;
    if let Some(mode) = args.isolation {
        config.isolation = mode;
    }

    let code = fs::read_to_string(&args.source)
        .with_context(|| format!("read {}", args.source.display()))?;
    let dialect = args.dialect.unwrap_or_else(|| infer_dialect(&args.source));
    let tests = load_tests(&args.tests)?;
    let timeout_ms = args.timeout_ms.unwrap_or(config.default_timeout_ms);
    let request = RunRequest::new(code, dialect, tests).with_timeout_ms(timeout_ms);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    let judge = Judge::new(config);

    match runtime.block_on(judge.run_tests(request)) {
        Ok(result) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_report(&result);
            }
            Ok(if result.accepted() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_NOT_ACCEPTED)
            })
        }
        Err(err) => {
            if args.json {
                let response = WorkerResponse::failure(&err);
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                eprintln!("{} {err}", style("rejected:").red().bold());
            }
            Ok(ExitCode::from(EXIT_REJECTED))
        }
    }
}

fn cmd_normalize(source: &Path, dialect: Option<Dialect>) -> Result<ExitCode> {
    let code =
        fs::read_to_string(source).with_context(|| format!("read {}", source.display()))?;
    let dialect = dialect.unwrap_or_else(|| infer_dialect(source));
    let executable = normalize(&code, dialect)?;
    print!("{executable}");
    Ok(ExitCode::SUCCESS)
}

fn infer_dialect(path: &Path) -> Dialect {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(Dialect::from_extension)
        .unwrap_or_default()
}

fn load_tests(path: &Path) -> Result<Vec<TestCase>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let file: TestFile = serde_json::from_str(&raw)
        .with_context(|| format!("parse test cases in {}", path.display()))?;
    Ok(match file {
        TestFile::List(tests) | TestFile::Problem { tests } => tests,
    })
}

fn print_report(result: &EvalResult) {
    let verdict = match result.verdict {
        Verdict::Accepted => style(result.verdict.as_str()).green().bold(),
        Verdict::WrongAnswer => style(result.verdict.as_str()).red().bold(),
        Verdict::RuntimeError | Verdict::Tle => {
            style(result.verdict.as_str()).yellow().bold()
        }
    };
    println!(
        "{verdict}  {}/{} passed  ({} ms)",
        result.passed,
        result.total,
        result.runtime_ms.unwrap_or_default()
    );

    for detail in &result.details {
        let mark = match detail.status {
            TestStatus::Pass => style("pass ").green(),
            TestStatus::Fail => style("fail ").red(),
            TestStatus::Error => style("error").yellow(),
        };
        let timing = style(format!("{} ms", detail.runtime_ms)).dim();
        match &detail.info {
            Some(info) => println!("  {mark} {}  {timing}  {info}", detail.name),
            None => println!("  {mark} {}  {timing}", detail.name),
        }
    }
}
