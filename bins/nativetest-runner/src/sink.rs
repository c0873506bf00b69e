/// Host Sinks - Ready-Made FrameworkHandle Implementations
///
/// - ChannelSink: forwards every message, start and result as a HostEvent
///   over an unbounded channel, for hosts that consume a stream
/// - RecordingSink: keeps everything in memory (tests, embedding)
/// - ConsoleSink: prints each result as it arrives (the CLI host)
///
/// All of them are called concurrently from worker tasks.

use nativetest_common::host::{FrameworkHandle, MessageLevel, MessageLogger};
use nativetest_common::types::{TestCase, TestOutcome, TestResult};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Everything the engine pushes to a host
#[derive(Debug, Clone)]
pub enum HostEvent {
    Message(MessageLevel, String),
    Started(TestCase),
    Result(TestResult),
}

/// Turns a batch into a stream of host events
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: HostEvent) {
        // Receiver gone means nobody is listening anymore
        let _ = self.tx.send(event);
    }
}

impl MessageLogger for ChannelSink {
    fn send_message(&self, level: MessageLevel, message: &str) {
        self.emit(HostEvent::Message(level, message.to_string()));
    }
}

impl FrameworkHandle for ChannelSink {
    fn record_start(&self, test_case: &TestCase) {
        self.emit(HostEvent::Started(test_case.clone()));
    }

    fn record_result(&self, result: TestResult) {
        self.emit(HostEvent::Result(result));
    }
}

/// Collects everything in memory
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<(MessageLevel, String)>>,
    started: Mutex<Vec<TestCase>>,
    results: Mutex<Vec<TestResult>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(MessageLevel, String)> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn messages_at(&self, level: MessageLevel) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }

    pub fn started(&self) -> Vec<TestCase> {
        self.started.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn results(&self) -> Vec<TestResult> {
        self.results.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl MessageLogger for RecordingSink {
    fn send_message(&self, level: MessageLevel, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((level, message.to_string()));
    }
}

impl FrameworkHandle for RecordingSink {
    fn record_start(&self, test_case: &TestCase) {
        self.started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(test_case.clone());
    }

    fn record_result(&self, result: TestResult) {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(result);
    }
}

/// Prints results to the terminal as they arrive (CLI host)
pub struct ConsoleSink {
    json: bool,
    results: Mutex<Vec<TestResult>>,
}

impl ConsoleSink {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            results: Mutex::new(Vec::new()),
        }
    }

    /// Results printed so far
    pub fn results(&self) -> Vec<TestResult> {
        self.results.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn print(&self, result: &TestResult) {
        if self.json {
            match serde_json::to_string(result) {
                Ok(line) => println!("{}", line),
                Err(e) => error!(error = %e, "Failed to serialize test result"),
            }
            return;
        }

        let mark = match result.outcome {
            TestOutcome::Passed => "✓",
            TestOutcome::Failed => "✗",
            TestOutcome::NotRun => "-",
        };
        println!(
            "  {} {} ({}ms) [{}]",
            mark,
            result.test_case.name,
            result.duration_ms,
            result.test_case.source.display()
        );
        if result.outcome == TestOutcome::Failed {
            for line in result.error_message.lines() {
                println!("      {}", line);
            }
            if let Some(first) = result.stderr_log.lines().next() {
                println!("      stderr: {}", first);
            }
        }
    }
}

impl MessageLogger for ConsoleSink {
    fn send_message(&self, level: MessageLevel, message: &str) {
        match level {
            MessageLevel::Informational => info!("{}", message),
            MessageLevel::Warning => warn!("{}", message),
            MessageLevel::Error => error!("{}", message),
        }
    }
}

impl FrameworkHandle for ConsoleSink {
    fn record_result(&self, result: TestResult) {
        self.print(&result);
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(result);
    }
}
