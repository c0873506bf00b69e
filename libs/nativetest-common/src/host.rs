use crate::types::{TestCase, TestResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Host-facing contract - defines only what the engine calls, not how the
/// host surfaces it. Implementations must be callable from every worker task.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageLevel {
    Informational,
    Warning,
    Error,
}

impl fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageLevel::Informational => "info",
            MessageLevel::Warning => "warning",
            MessageLevel::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Leveled free-text message sink
pub trait MessageLogger: Send + Sync {
    fn send_message(&self, level: MessageLevel, message: &str);
}

/// Receives results as soon as each container finishes
pub trait FrameworkHandle: MessageLogger {
    fn record_start(&self, _test_case: &TestCase) {}

    fn record_result(&self, result: TestResult);
}
