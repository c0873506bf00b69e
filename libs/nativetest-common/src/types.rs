use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One logical test, always attributed to exactly one test container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestCase {
    pub id: Uuid,
    pub name: String,
    pub source: PathBuf,
}

impl TestCase {
    /// Build a test case; the id is stable for the same name + container.
    pub fn new(name: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        let name = name.into();
        let source = source.into();
        let id = test_case_id(&name, &source);
        Self { id, name, source }
    }
}

/// UUIDv5 over `<container>::<name>`
pub fn test_case_id(name: &str, source: &Path) -> Uuid {
    let key = format!("{}::{}", source.display(), name);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
}

/// All requested test cases that share one container.
///
/// Only the scheduler builds these; `test_cases` is never empty.
#[derive(Debug, Clone)]
pub struct ContainerGroup {
    pub source: PathBuf,
    pub test_cases: Vec<TestCase>,
}

/// How a container process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessExit {
    Exited(i32),
    /// Terminated by a signal the runner did not send (unix only)
    Signaled(i32),
    TimedOut,
}

impl ProcessExit {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessExit::Exited(0))
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessExit::Exited(code) => write!(f, "Exit code: {}", code),
            ProcessExit::Signaled(signal) => write!(f, "Killed by signal {}", signal),
            ProcessExit::TimedOut => write!(f, "Timed out"),
        }
    }
}

/// Result of running one container once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub exit: ProcessExit,
    pub stdout: String,
    pub stderr: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureLocation {
    pub file: String,
    pub line: u32,
}

impl fmt::Display for FailureLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// One failure record decoded from a container's structured payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub test_name: String,
    pub failure_type: String,
    pub location: FailureLocation,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestOutcome {
    Passed,
    Failed,
    NotRun,
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestOutcome::Passed => "Passed",
            TestOutcome::Failed => "Failed",
            TestOutcome::NotRun => "NotRun",
        };
        write!(f, "{}", s)
    }
}

/// Final record for one requested test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub test_case: TestCase,
    pub outcome: TestOutcome,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub error_message: String,
    pub error_stack_trace: Option<String>,
    pub stdout_log: String,
    pub stderr_log: String,
}
