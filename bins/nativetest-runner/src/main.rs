use anyhow::Result;
use clap::{Parser, Subcommand};
use nativetest_common::types::{TestOutcome, TestResult};
use nativetest_runner::discovery;
use nativetest_runner::sink::ConsoleSink;
use nativetest_runner::{BatchScheduler, RunnerConfig};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "nativetest")]
#[command(about = "Discover and run native unit-test executables", long_about = None)]
struct Cli {
    /// Runner config file (defaults to config/runner.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true, default_value = "false")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every test container found among the given paths
    Run {
        /// Test executables or directories containing them
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Per-container timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Maximum number of containers running at once
        #[arg(short, long)]
        parallelism: Option<usize>,

        /// Wrapper program each container is passed to (e.g. wine, qemu)
        #[arg(long)]
        launcher: Option<String>,

        /// Print one JSON result per line instead of a summary
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// List the test cases that would run
    Discover {
        /// Test executables or directories containing them
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<RunnerConfig> {
    let config = match path {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig::load_default()?,
    };
    config.with_env_overrides()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = load_config(cli.config.as_ref()).map_err(|e| {
        error!("Failed to load runner configuration: {:#}", e);
        e
    })?;

    match cli.command {
        Commands::Run {
            paths,
            timeout_secs,
            parallelism,
            launcher,
            json,
        } => {
            if let Some(secs) = timeout_secs {
                config.timeout_secs = secs;
            }
            if parallelism.is_some() {
                config.max_parallelism = parallelism;
            }
            if launcher.is_some() {
                config.launcher = launcher;
            }
            config.validate()?;

            let all_passed = run(config, &paths, json).await?;
            if !all_passed {
                std::process::exit(1);
            }
        }
        Commands::Discover { paths } => {
            let sources = discovery::expand_sources(&paths)?;
            let pattern = config.executable_regex()?;
            let tests = discovery::discover(&sources, &pattern, &ConsoleSink::new(false));

            for test in &tests {
                println!("{}  {}  {}", test.id, test.name, test.source.display());
            }
            println!("{} test case(s)", tests.len());
        }
    }

    Ok(())
}

/// Run all discovered containers; true when every case passed
async fn run(config: RunnerConfig, paths: &[PathBuf], json: bool) -> Result<bool> {
    let sink = Arc::new(ConsoleSink::new(json));
    let sources = discovery::expand_sources(paths)?;
    let pattern = config.executable_regex()?;
    let requested = discovery::discover(&sources, &pattern, sink.as_ref());

    info!(
        containers = requested.len(),
        timeout_secs = config.timeout_secs,
        parallelism = config.parallelism(),
        launcher = config.launcher.as_deref().unwrap_or("-"),
        "nativetest starting"
    );

    let scheduler = BatchScheduler::new(config);

    // Ctrl-C stops new launches; running containers finish or time out
    let flag = scheduler.cancellation_flag();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt, finishing running test containers...");
            flag.cancel();
        }
    });

    scheduler.execute(requested.clone(), sink.clone()).await;

    let results = sink.results();
    let reported: HashSet<_> = results.iter().map(|r| r.test_case.id).collect();
    let not_run: Vec<_> = requested
        .iter()
        .filter(|t| !reported.contains(&t.id))
        .collect();

    if !json {
        print_summary(&results, not_run.len());
        for test in &not_run {
            println!("  - {} [{}] ({})", test.name, test.source.display(), TestOutcome::NotRun);
        }
    }

    let failed = results
        .iter()
        .filter(|r| r.outcome == TestOutcome::Failed)
        .count();
    Ok(failed == 0 && not_run.is_empty())
}

fn print_summary(results: &[TestResult], not_run: usize) {
    let passed = results
        .iter()
        .filter(|r| r.outcome == TestOutcome::Passed)
        .count();
    let failed = results.len() - passed;

    println!();
    println!("→ Test run complete");
    println!("  Passed:  {}", passed);
    println!("  Failed:  {}", failed);
    println!("  Not run: {}", not_run);
}
