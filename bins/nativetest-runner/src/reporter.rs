/// Result Reporter - Container Outcome to Per-Test Results
///
/// **Core Responsibility:**
/// Fan one container's ProcessOutcome out into one TestResult per requested
/// test case of that container.
///
/// **Critical Properties:**
/// - Knows nothing about processes, pipes or timeouts
/// - Pure function: (group, start times, outcome, failures) → results
///
/// **Judgment Rules:**
/// - Exit code 0 → every test case in the group Passed
/// - Non-zero exit, signal or timeout → every test case in the group Failed
/// - Decoded failures only enrich the error text; they never change the
///   outcome of an individual case (a container is judged as a whole)

use chrono::{DateTime, Utc};
use nativetest_common::types::{
    ContainerGroup, FailureDetail, ProcessOutcome, TestOutcome, TestResult,
};
use std::collections::HashMap;
use uuid::Uuid;

/// Shared error text: exit line followed by every decoded failure and
/// where it was raised
fn error_message(outcome: &ProcessOutcome, failures: &[FailureDetail]) -> String {
    let mut message = format!("{}\n", outcome.exit);
    for failure in failures {
        message.push_str(&format!(
            "{}: {} at {}\n{}\n",
            failure.test_name, failure.failure_type, failure.location, failure.message
        ));
    }
    message
}

/// One `file:line` per decoded failure, None when nothing was decoded
fn error_stack_trace(failures: &[FailureDetail]) -> Option<String> {
    if failures.is_empty() {
        return None;
    }
    Some(
        failures
            .iter()
            .map(|f| format!("{}\n", f.location))
            .collect(),
    )
}

fn duration_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}

/// Build one TestResult per test case in `group`.
///
/// `start_times` holds the instant each case was reported as started; a case
/// without an entry falls back to the process start time. All results share
/// the process end time.
pub fn report(
    group: &ContainerGroup,
    start_times: &HashMap<Uuid, DateTime<Utc>>,
    outcome: &ProcessOutcome,
    failures: &[FailureDetail],
) -> Vec<TestResult> {
    let judgment = if outcome.exit.is_success() {
        TestOutcome::Passed
    } else {
        TestOutcome::Failed
    };

    let message = error_message(outcome, failures);
    let stack_trace = error_stack_trace(failures);

    group
        .test_cases
        .iter()
        .map(|test_case| {
            let start_time = start_times
                .get(&test_case.id)
                .copied()
                .unwrap_or(outcome.start_time);

            TestResult {
                test_case: test_case.clone(),
                outcome: judgment,
                start_time,
                end_time: outcome.end_time,
                duration_ms: duration_ms(start_time, outcome.end_time),
                error_message: message.clone(),
                error_stack_trace: stack_trace.clone(),
                stdout_log: outcome.stdout.clone(),
                stderr_log: outcome.stderr.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use nativetest_common::types::{FailureLocation, ProcessExit, TestCase};
    use std::path::PathBuf;

    /// Helper to create a group of `names` in one container
    fn make_group(source: &str, names: &[&str]) -> ContainerGroup {
        ContainerGroup {
            source: PathBuf::from(source),
            test_cases: names.iter().map(|n| TestCase::new(*n, source)).collect(),
        }
    }

    /// Helper to create an outcome that ran for `ms` milliseconds
    fn make_outcome(exit: ProcessExit, ms: i64) -> ProcessOutcome {
        let start_time = Utc::now();
        ProcessOutcome {
            exit,
            stdout: "stdout text\n".to_string(),
            stderr: "stderr text\n".to_string(),
            start_time,
            end_time: start_time + Duration::milliseconds(ms),
        }
    }

    fn make_failure(name: &str, line: u32) -> FailureDetail {
        FailureDetail {
            test_name: name.to_string(),
            failure_type: "Assertion".to_string(),
            location: FailureLocation {
                file: "math_test.cpp".to_string(),
                line,
            },
            message: format!("{} broke", name),
        }
    }

    #[test]
    fn test_exit_zero_passes_every_case() {
        let group = make_group("/t/uTests", &["a", "b", "c"]);
        let outcome = make_outcome(ProcessExit::Exited(0), 40);

        let results = report(&group, &HashMap::new(), &outcome, &[]);

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.outcome == TestOutcome::Passed));
        assert_eq!(results[0].error_message, "Exit code: 0\n");
        assert!(results[0].error_stack_trace.is_none());
    }

    #[test]
    fn test_nonzero_exit_fails_every_case() {
        let group = make_group("/t/uTests", &["a", "b"]);
        let outcome = make_outcome(ProcessExit::Exited(2), 40);

        let results = report(&group, &HashMap::new(), &outcome, &[]);

        assert!(results.iter().all(|r| r.outcome == TestOutcome::Failed));
        assert_eq!(results[1].error_message, "Exit code: 2\n");
    }

    #[test]
    fn test_timeout_and_signal_fail() {
        let group = make_group("/t/uTests", &["a"]);

        let results = report(&group, &HashMap::new(), &make_outcome(ProcessExit::TimedOut, 5), &[]);
        assert_eq!(results[0].outcome, TestOutcome::Failed);
        assert_eq!(results[0].error_message, "Timed out\n");

        let results = report(&group, &HashMap::new(), &make_outcome(ProcessExit::Signaled(11), 5), &[]);
        assert_eq!(results[0].outcome, TestOutcome::Failed);
        assert_eq!(results[0].error_message, "Killed by signal 11\n");
    }

    #[test]
    fn test_failures_enrich_every_result() {
        let group = make_group("/t/qTests", &["add", "sub"]);
        let outcome = make_outcome(ProcessExit::Exited(1), 10);
        let failures = vec![make_failure("add", 12), make_failure("div", 30)];

        let results = report(&group, &HashMap::new(), &outcome, &failures);

        // "sub" is not named by the payload but still shares the judgment
        for result in &results {
            assert_eq!(result.outcome, TestOutcome::Failed);
            assert_eq!(
                result.error_message,
                "Exit code: 1\nadd: Assertion at math_test.cpp:12\nadd broke\ndiv: Assertion at math_test.cpp:30\ndiv broke\n"
            );
            assert_eq!(
                result.error_stack_trace.as_deref(),
                Some("math_test.cpp:12\nmath_test.cpp:30\n")
            );
        }
    }

    #[test]
    fn test_failures_do_not_override_exit_zero() {
        let group = make_group("/t/qTests", &["add"]);
        let outcome = make_outcome(ProcessExit::Exited(0), 10);

        let results = report(&group, &HashMap::new(), &outcome, &[make_failure("add", 1)]);

        assert_eq!(results[0].outcome, TestOutcome::Passed);
        assert!(results[0].error_message.contains("add broke"));
    }

    #[test]
    fn test_streams_attached_to_every_result() {
        let group = make_group("/t/uTests", &["a", "b"]);
        let results = report(&group, &HashMap::new(), &make_outcome(ProcessExit::Exited(1), 1), &[]);

        for result in &results {
            assert_eq!(result.stdout_log, "stdout text\n");
            assert_eq!(result.stderr_log, "stderr text\n");
        }
    }

    #[test]
    fn test_durations_use_recorded_start_times() {
        let group = make_group("/t/uTests", &["early", "unrecorded"]);
        let outcome = make_outcome(ProcessExit::Exited(0), 100);

        let mut start_times = HashMap::new();
        start_times.insert(group.test_cases[0].id, outcome.start_time - Duration::milliseconds(50));

        let results = report(&group, &start_times, &outcome, &[]);

        assert_eq!(results[0].duration_ms, 150);
        assert_eq!(results[1].duration_ms, 100);
        assert_eq!(results[1].start_time, outcome.start_time);
        assert!(results.iter().all(|r| r.end_time == outcome.end_time));
    }

    #[test]
    fn test_negative_duration_clamped() {
        let group = make_group("/t/uTests", &["late"]);
        let outcome = make_outcome(ProcessExit::Exited(0), 0);

        let mut start_times = HashMap::new();
        start_times.insert(group.test_cases[0].id, outcome.end_time + Duration::milliseconds(5));

        let results = report(&group, &start_times, &outcome, &[]);
        assert_eq!(results[0].duration_ms, 0);
    }
}
