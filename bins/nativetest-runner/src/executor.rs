/// Batch Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Run a batch of test cases: one process per container, containers in
/// parallel, results pushed to the host as each container finishes.
///
/// **Architecture:**
/// 1. Group test cases by container (one launch serves the whole group)
/// 2. Run each group with ProcessRunner (engine.rs) under a worker permit
/// 3. Decode structured failures from stdout (decoder.rs)
/// 4. Fan the outcome out into per-test results (reporter.rs)
///
/// **Cancellation:**
/// Cooperative. The flag is checked before every group launch; groups
/// already running are left to finish (or to hit their own timeout).
///
/// **Failure Isolation:**
/// A group that cannot run (missing container, launch failure, panic) is
/// logged as an error and contributes no results. Sibling groups proceed.

use crate::config::RunnerConfig;
use crate::decoder::{ResultDecoder, XmlFailureDecoder};
use crate::discovery;
use crate::engine::{CommandLine, ProcessRunner};
use crate::reporter;
use anyhow::{Context, Result, bail};
use chrono::Utc;
use nativetest_common::host::{FrameworkHandle, MessageLevel};
use nativetest_common::types::{ContainerGroup, TestCase};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument};

/// One-way, shareable cancellation signal
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent; never transitions back to not-cancelled
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Group test cases by container, keeping first-appearance order
pub fn group_by_container(test_cases: Vec<TestCase>) -> Vec<ContainerGroup> {
    let mut groups: Vec<ContainerGroup> = Vec::new();
    let mut index: HashMap<PathBuf, usize> = HashMap::new();

    for test_case in test_cases {
        match index.get(&test_case.source) {
            Some(&i) => groups[i].test_cases.push(test_case),
            None => {
                index.insert(test_case.source.clone(), groups.len());
                groups.push(ContainerGroup {
                    source: test_case.source.clone(),
                    test_cases: vec![test_case],
                });
            }
        }
    }

    groups
}

fn format_collection<T: std::fmt::Display>(items: impl IntoIterator<Item = T>) -> String {
    let parts: Vec<String> = items.into_iter().map(|i| i.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

/// Runs one container group; cheap to clone into worker tasks
#[derive(Clone)]
struct GroupRunner {
    config: Arc<RunnerConfig>,
    runner: ProcessRunner,
    decoder: Arc<dyn ResultDecoder>,
}

impl GroupRunner {
    fn command_for(&self, container: &Path) -> CommandLine {
        match &self.config.launcher {
            Some(launcher) => CommandLine::new(launcher)
                .args(&self.config.launcher_args)
                .arg(container)
                .args(&self.config.container_args),
            None => CommandLine::new(container).args(&self.config.container_args),
        }
    }

    #[instrument(
        skip(self, group, handle),
        fields(
            container = %group.source.display(),
            test_count = group.test_cases.len()
        )
    )]
    async fn run_group(&self, group: ContainerGroup, handle: &dyn FrameworkHandle) -> Result<()> {
        let mut start_times = HashMap::with_capacity(group.test_cases.len());
        for test_case in &group.test_cases {
            handle.record_start(test_case);
            start_times.insert(test_case.id, Utc::now());
        }

        let container = fs::canonicalize(&group.source)
            .with_context(|| format!("Test container not found: {}", group.source.display()))?;
        if !container.is_file() {
            bail!("Test container is not a file: {}", container.display());
        }

        let command = self.command_for(&container);
        let working_dir = self.config.working_dir();

        handle.send_message(
            MessageLevel::Informational,
            &format!("[{}] Running {}", working_dir.display(), command),
        );

        let outcome = self
            .runner
            .run(&command, &working_dir, self.config.timeout(), handle)
            .await
            .with_context(|| format!("Failed to run test container {}", container.display()))?;

        let failures = self.decoder.decode(&outcome.stdout);
        let results = reporter::report(&group, &start_times, &outcome, &failures);

        info!(
            exit = ?outcome.exit,
            decoded_failures = failures.len(),
            duration_ms = (outcome.end_time - outcome.start_time).num_milliseconds(),
            "Test container completed"
        );

        for result in results {
            handle.record_result(result);
        }

        Ok(())
    }
}

/// Runs batches of test cases against their containers
pub struct BatchScheduler {
    worker: GroupRunner,
    cancelled: CancellationFlag,
}

impl BatchScheduler {
    /// Scheduler with the default XML failure decoder
    pub fn new(config: RunnerConfig) -> Self {
        Self::with_decoder(config, Arc::new(XmlFailureDecoder))
    }

    pub fn with_decoder(config: RunnerConfig, decoder: Arc<dyn ResultDecoder>) -> Self {
        Self {
            worker: GroupRunner {
                config: Arc::new(config),
                runner: ProcessRunner::new(),
                decoder,
            },
            cancelled: CancellationFlag::new(),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.worker.config
    }

    /// Handle for cancelling from another task or thread
    pub fn cancellation_flag(&self) -> CancellationFlag {
        self.cancelled.clone()
    }

    /// Stop launching new containers; running ones finish normally
    pub fn cancel(&self) {
        self.cancelled.cancel();
    }

    /// Run the given test cases. Returns the number of containers launched.
    pub async fn execute(&self, test_cases: Vec<TestCase>, handle: Arc<dyn FrameworkHandle>) -> usize {
        handle.send_message(
            MessageLevel::Informational,
            &format!(
                "Running {} tests...",
                format_collection(test_cases.iter().map(|t| &t.name))
            ),
        );
        self.execute_batch(test_cases, handle).await
    }

    /// "Run all": discover test containers among `sources`, then run them
    pub async fn run_sources(&self, sources: &[PathBuf], handle: Arc<dyn FrameworkHandle>) -> Result<usize> {
        let pattern = self.worker.config.executable_regex()?;
        let test_cases = discovery::discover(sources, &pattern, handle.as_ref());

        handle.send_message(MessageLevel::Informational, "Running all tests...");
        Ok(self.execute_batch(test_cases, handle).await)
    }

    async fn execute_batch(&self, test_cases: Vec<TestCase>, handle: Arc<dyn FrameworkHandle>) -> usize {
        let groups = group_by_container(test_cases);
        if groups.is_empty() {
            handle.send_message(MessageLevel::Informational, "No tests to run");
            return 0;
        }

        let parallelism = self.worker.config.parallelism();
        let total = groups.len();
        info!(containers = total, parallelism, "Starting test batch");

        let semaphore = Arc::new(Semaphore::new(parallelism));
        let mut tasks = JoinSet::new();
        let mut launched = 0;

        for (idx, group) in groups.into_iter().enumerate() {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };

            if self.cancelled.is_cancelled() {
                let skipped = total - idx;
                info!(launched, skipped, "Batch cancelled - not launching remaining containers");
                handle.send_message(
                    MessageLevel::Informational,
                    &format!("Run cancelled, skipped {} test container(s)", skipped),
                );
                break;
            }

            let worker = self.worker.clone();
            let handle = handle.clone();
            launched += 1;

            tasks.spawn(async move {
                let _permit = permit;
                let source = group.source.clone();

                if let Err(e) = worker.run_group(group, handle.as_ref()).await {
                    error!(
                        container = %source.display(),
                        error = %format!("{:#}", e),
                        "Test container run failed"
                    );
                    handle.send_message(MessageLevel::Error, &format!("{:#}", e));
                    handle.send_message(MessageLevel::Error, &format!("{:?}", e));
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Test container task aborted");
                handle.send_message(
                    MessageLevel::Error,
                    &format!("Test container task aborted: {}", e),
                );
            }
        }

        info!(launched, total, "Test batch finished");
        launched
    }
}
