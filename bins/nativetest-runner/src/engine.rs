/// Process Runner - Executes One Test Container
///
/// **Core Responsibility:**
/// Launch an external executable, capture its stdout/stderr and exit status.
///
/// **Critical Architectural Boundary:**
/// - Runner knows HOW to execute (spawn, pipes, timeout, kill)
/// - Runner does NOT know about test cases or pass/fail rules
/// - Runner returns a raw ProcessOutcome for the reporter to judge
///
/// **Pipe Handling:**
/// Both pipes are drained by independent reader tasks while the process
/// runs, so a child writing heavily to one stream never blocks on a full
/// pipe buffer while the other stream is being waited on.

use anyhow::{Context, Result};
use chrono::Utc;
use nativetest_common::host::{MessageLevel, MessageLogger};
use nativetest_common::types::{ProcessExit, ProcessOutcome};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// How long to keep collecting already-written output after a timeout kill
const DRAIN_GRACE: Duration = Duration::from_millis(100);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Program plus arguments, passed to the OS without a shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl CommandLine {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Per-stream line buffers, owned by the supervising task
#[derive(Default)]
struct CapturedOutput {
    stdout: String,
    stderr: String,
}

impl CapturedOutput {
    fn push(&mut self, stream: Stream, line: String) {
        let buffer = match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        };
        buffer.push_str(&line);
        buffer.push('\n');
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run `command` in `working_dir` and wait for it under one budget.
    ///
    /// The budget covers process exit and end-of-stream on both pipes. On
    /// expiry the process group is killed and the outcome is
    /// `ProcessExit::TimedOut` carrying whatever output was captured.
    /// Only a failure to launch is returned as `Err`.
    pub async fn run<L>(
        &self,
        command: &CommandLine,
        working_dir: &Path,
        timeout: Duration,
        logger: &L,
    ) -> Result<ProcessOutcome>
    where
        L: MessageLogger + ?Sized,
    {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so a timeout kill reaches grandchildren too
        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let start_time = Utc::now();

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to launch '{}'", command))?;

        // Taken now: the id is gone once the child has been reaped, but the
        // group outlives it while descendants still hold the pipes
        let pgid = child.id();

        let stdout = child
            .stdout
            .take()
            .context("Failed to capture stdout")?;
        let stderr = child
            .stderr
            .take()
            .context("Failed to capture stderr")?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let stdout_reader = tokio::spawn(forward_lines(stdout, Stream::Stdout, tx.clone()));
        let stderr_reader = tokio::spawn(forward_lines(stderr, Stream::Stderr, tx));

        let mut captured = CapturedOutput::default();

        let completion = async {
            // Channel closes once both readers have seen end-of-stream
            let collect = async {
                while let Some((stream, line)) = rx.recv().await {
                    captured.push(stream, line);
                }
            };
            let ((), status) = tokio::join!(collect, child.wait());
            status
        };

        let exit = match tokio::time::timeout(timeout, completion).await {
            Ok(status) => {
                let status = status
                    .with_context(|| format!("Failed to wait for '{}'", command))?;
                exit_from_status(status)
            }
            Err(_) => {
                warn!(
                    command = %command,
                    timeout_secs = timeout.as_secs(),
                    "Test container exceeded its time budget, killing it"
                );
                logger.send_message(
                    MessageLevel::Warning,
                    &format!("Had to kill {} after {:?}", command, timeout),
                );

                kill_process_tree(&mut child, pgid).await;

                let _ = tokio::time::timeout(DRAIN_GRACE, async {
                    while let Some((stream, line)) = rx.recv().await {
                        captured.push(stream, line);
                    }
                })
                .await;
                while let Ok((stream, line)) = rx.try_recv() {
                    captured.push(stream, line);
                }

                ProcessExit::TimedOut
            }
        };

        stdout_reader.abort();
        stderr_reader.abort();

        let end_time = Utc::now();

        debug!(
            command = %command,
            exit = ?exit,
            stdout_bytes = captured.stdout.len(),
            stderr_bytes = captured.stderr.len(),
            duration_ms = (end_time - start_time).num_milliseconds(),
            "Test container finished"
        );

        Ok(ProcessOutcome {
            exit,
            stdout: captured.stdout,
            stderr: captured.stderr,
            start_time,
            end_time,
        })
    }
}

/// Read `pipe` line by line and forward each line until end-of-stream
async fn forward_lines<R>(pipe: R, stream: Stream, tx: mpsc::UnboundedSender<(Stream, String)>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send((stream, line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(stream = ?stream, error = %e, "Stopped reading container output");
                break;
            }
        }
    }
}

fn exit_from_status(status: ExitStatus) -> ProcessExit {
    if let Some(code) = status.code() {
        return ProcessExit::Exited(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ProcessExit::Signaled(signal);
        }
    }

    ProcessExit::Exited(-1)
}

/// SIGKILL the child's process group (unix), then the child itself.
///
/// On other targets only the direct child is killed; descendants it started
/// keep running.
async fn kill_process_tree(child: &mut Child, pgid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pgid) = pgid {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
            debug!(pgid, error = %e, "Failed to kill test container process group");
        }
    }
    #[cfg(not(unix))]
    let _ = pgid;

    if let Err(e) = child.kill().await {
        debug!(error = %e, "Failed to kill timed-out test container");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;
    use std::time::Instant;

    fn sh(script: &str) -> CommandLine {
        CommandLine::new("/bin/sh").arg("-c").arg(script)
    }

    async fn run_sh(script: &str, timeout: Duration) -> Result<ProcessOutcome> {
        let sink = RecordingSink::new();
        ProcessRunner::new()
            .run(&sh(script), &std::env::temp_dir(), timeout, &sink)
            .await
    }

    #[tokio::test]
    async fn test_captures_streams_and_exit_code() {
        let outcome = run_sh("echo one; echo two; echo oops >&2; exit 3", Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(outcome.exit, ProcessExit::Exited(3));
        assert_eq!(outcome.stdout, "one\ntwo\n");
        assert_eq!(outcome.stderr, "oops\n");
        assert!(outcome.end_time >= outcome.start_time);
    }

    #[tokio::test]
    async fn test_exit_zero() {
        let outcome = run_sh("true", Duration::from_secs(10)).await.unwrap();
        assert_eq!(outcome.exit, ProcessExit::Exited(0));
        assert!(outcome.stdout.is_empty());
        assert!(outcome.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_crlf_and_unterminated_lines() {
        let outcome = run_sh("printf 'a\\r\\nb'", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(outcome.stdout, "a\nb\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_large_interleaved_output_does_not_deadlock() {
        // ~250 KiB per stream, well past a 64 KiB pipe buffer
        let script = r#"
i=0
while [ $i -lt 5000 ]; do
  echo "stdout line padded to overflow the pipe buffer $i"
  echo "stderr line padded to overflow the pipe buffer $i" >&2
  i=$((i+1))
done
"#;
        let outcome = run_sh(script, Duration::from_secs(60)).await.unwrap();

        assert_eq!(outcome.exit, ProcessExit::Exited(0));
        let out: Vec<&str> = outcome.stdout.lines().collect();
        let err: Vec<&str> = outcome.stderr.lines().collect();
        assert_eq!(out.len(), 5000);
        assert_eq!(err.len(), 5000);
        for (i, line) in out.iter().enumerate() {
            assert_eq!(*line, format!("stdout line padded to overflow the pipe buffer {}", i));
        }
        for (i, line) in err.iter().enumerate() {
            assert_eq!(*line, format!("stderr line padded to overflow the pipe buffer {}", i));
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_and_keeps_partial_output() {
        let sink = RecordingSink::new();
        let started = Instant::now();

        let outcome = ProcessRunner::new()
            .run(
                &sh("echo started; echo warming >&2; sleep 30; echo never"),
                &std::env::temp_dir(),
                Duration::from_millis(500),
                &sink,
            )
            .await
            .unwrap();

        assert_eq!(outcome.exit, ProcessExit::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(outcome.stdout, "started\n");
        assert_eq!(outcome.stderr, "warming\n");
        assert!(outcome.end_time >= outcome.start_time);

        let warnings = sink.messages_at(MessageLevel::Warning);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("/bin/sh"));
        assert!(warnings[0].contains("after 500ms"));
    }

    /// Alive and not a zombie waiting to be reaped
    fn is_running(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => !stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
            Err(_) => nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok(),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_background_process_after_parent_exits() {
        // The parent exits at once; the background sleep keeps stdout open
        let outcome = run_sh("sleep 30 & echo $!; exit 0", Duration::from_millis(500))
            .await
            .unwrap();

        assert_eq!(outcome.exit, ProcessExit::TimedOut);
        let pid: i32 = outcome.stdout.trim().parse().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while is_running(pid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!is_running(pid), "background process {} outlived the timeout", pid);
    }

    #[tokio::test]
    async fn test_launch_failure_is_an_error() {
        let sink = RecordingSink::new();
        let result = ProcessRunner::new()
            .run(
                &CommandLine::new("/definitely/not/a/test/binary"),
                &std::env::temp_dir(),
                Duration::from_secs(5),
                &sink,
            )
            .await;

        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to launch"));
    }

    #[tokio::test]
    async fn test_runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RecordingSink::new();
        let outcome = ProcessRunner::new()
            .run(&sh("pwd -P"), dir.path(), Duration::from_secs(10), &sink)
            .await
            .unwrap();

        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(outcome.stdout.trim_end(), expected.to_string_lossy());
    }

    #[tokio::test]
    async fn test_killed_by_signal() {
        let outcome = run_sh("kill -9 $$", Duration::from_secs(10)).await.unwrap();
        assert_eq!(outcome.exit, ProcessExit::Signaled(9));
        assert!(!outcome.exit.is_success());
    }

    #[test]
    fn test_command_line_display() {
        let cmd = CommandLine::new("/usr/bin/qemu").args(["-L", "/sysroot"]).arg("unitTests");
        assert_eq!(cmd.to_string(), "/usr/bin/qemu -L /sysroot unitTests");
    }
}
