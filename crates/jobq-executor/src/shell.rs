//! Local shell executor implementation.

use async_trait::async_trait;
use jobq_core::executor::{ExecutionResult, ExecutionSpec, Executor, FAILURE_SENTINEL_CODE};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How long output readers may take to drain once the process group is dead.
const OUTPUT_GRACE: Duration = Duration::from_secs(1);

/// Runs job commands through a local shell with captured output.
///
/// Each command gets its own process group so a timeout can kill everything
/// the command started, not just the shell.
pub struct ShellExecutor {
    shell: String,
}

impl ShellExecutor {
    /// Create an executor using `sh`.
    pub fn new() -> Self {
        Self::with_shell("sh")
    }

    /// Create an executor using a specific shell binary. It is invoked as
    /// `<shell> -c <command>`.
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    fn name(&self) -> &'static str {
        "shell"
    }

    #[tracing::instrument(skip(self, spec), fields(job_id = %spec.job_id))]
    async fn execute(&self, spec: &ExecutionSpec) -> ExecutionResult {
        let started = Instant::now();

        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&spec.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(shell = %self.shell, error = %e, "Failed to spawn command");
                return ExecutionResult::launch_failure(
                    format!("failed to spawn {}: {}", self.shell, e),
                    elapsed_ms(started),
                );
            }
        };
        let pgid = child.id();
        debug!(pid = ?pgid, "Command started");

        let mut stdout = tokio::spawn(read_stream(child.stdout.take()));
        let mut stderr = tokio::spawn(read_stream(child.stderr.take()));

        // One deadline covers the shell and anything it left holding the pipes.
        let deadline = spec.timeout.and_then(|limit| started.checked_add(limit));

        let (mut return_code, mut timed_out, mut failure) =
            match until(deadline, child.wait()).await {
                Some(Ok(status)) => (return_code(status), false, None),
                Some(Err(e)) => {
                    warn!(error = %e, "Failed waiting for command");
                    terminate(&mut child).await;
                    (FAILURE_SENTINEL_CODE, false, Some(format!("failed waiting for command: {}", e)))
                }
                None => {
                    info!(timeout_secs = timeout_secs(spec), "Command timed out, killing process group");
                    terminate(&mut child).await;
                    (FAILURE_SENTINEL_CODE, true, Some(timeout_marker(spec)))
                }
            };

        let read_deadline = match failure {
            Some(_) => Some(Instant::now() + OUTPUT_GRACE),
            None => deadline,
        };
        let mut output = until(read_deadline, collect(&mut stdout, &mut stderr)).await;
        if output.is_none() && failure.is_none() {
            info!(
                timeout_secs = timeout_secs(spec),
                "Background processes outlived the timeout, killing process group"
            );
            kill_process_group(pgid);
            return_code = FAILURE_SENTINEL_CODE;
            timed_out = true;
            failure = Some(timeout_marker(spec));
            output = until(
                Some(Instant::now() + OUTPUT_GRACE),
                collect(&mut stdout, &mut stderr),
            )
            .await;
        }

        let (stdout, mut stderr) = match output {
            Some(output) => output,
            None => {
                warn!("Output pipes still open after kill, discarding output");
                stdout.abort();
                stderr.abort();
                (String::new(), String::new())
            }
        };
        if let Some(marker) = failure {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&marker);
        }

        let duration_ms = elapsed_ms(started);
        debug!(return_code, duration_ms, "Command finished");

        ExecutionResult {
            return_code,
            stdout,
            stderr,
            duration_ms,
            timed_out,
        }
    }
}

/// Run `fut` to completion, or give up at `deadline` when one is set.
async fn until<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

async fn collect(
    stdout: &mut JoinHandle<String>,
    stderr: &mut JoinHandle<String>,
) -> (String, String) {
    let (stdout, stderr) = tokio::join!(stdout, stderr);
    (stdout.unwrap_or_default(), stderr.unwrap_or_default())
}

fn timeout_secs(spec: &ExecutionSpec) -> u64 {
    spec.timeout.map(|t| t.as_secs()).unwrap_or_default()
}

fn timeout_marker(spec: &ExecutionSpec) -> String {
    format!("TIMEOUT after {}s", timeout_secs(spec))
}

async fn read_stream<R>(stream: Option<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        if let Err(e) = stream.read_to_end(&mut buf).await {
            debug!(error = %e, "Output stream closed with error");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Exit code, or the negated signal number when the process was killed by a
/// signal.
fn return_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    FAILURE_SENTINEL_CODE
}

/// Kill the command's whole process group, then reap the shell.
async fn terminate(child: &mut Child) {
    kill_process_group(child.id());
    if let Err(e) = child.kill().await {
        debug!(error = %e, "kill failed");
    }
}

/// SIGKILL the group led by the shell. The group outlives the shell itself,
/// so this also works after the shell has been reaped.
fn kill_process_group(pgid: Option<u32>) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Some(pgid) = pgid.and_then(|pgid| i32::try_from(pgid).ok()) {
            if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                debug!(pgid, error = %e, "killpg failed");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pgid;
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use jobq_core::JobId;
    use std::time::Duration;

    fn spec(command: &str, timeout: Option<Duration>) -> ExecutionSpec {
        ExecutionSpec {
            job_id: JobId::parse("test-job").unwrap(),
            command: command.to_string(),
            timeout,
        }
    }

    #[tokio::test]
    async fn test_success_captures_stdout() {
        let result = ShellExecutor::new()
            .execute(&spec("echo hello", None))
            .await;
        assert!(result.is_success());
        assert_eq!(result.stdout, "hello\n");
        assert!(result.stderr.is_empty());
        assert!(!result.timed_out);
        assert!(result.duration_ms >= 0);
    }

    #[tokio::test]
    async fn test_failure_captures_code_and_stderr() {
        let result = ShellExecutor::new()
            .execute(&spec("echo oops >&2; exit 3", None))
            .await;
        assert_eq!(result.return_code, 3);
        assert_eq!(result.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_command_is_passed_to_shell_verbatim() {
        let result = ShellExecutor::new()
            .execute(&spec("X=1; [ \"$X\" = 1 ] && printf '%s' \"a b\"", None))
            .await;
        assert!(result.is_success());
        assert_eq!(result.stdout, "a b");
    }

    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        let started = Instant::now();
        let result = ShellExecutor::new()
            .execute(&spec(
                "echo partial; sleep 30 & sleep 30",
                Some(Duration::from_secs(1)),
            ))
            .await;

        assert!(result.timed_out);
        assert_eq!(result.return_code, FAILURE_SENTINEL_CODE);
        assert_eq!(result.stdout, "partial\n");
        assert!(result.stderr.ends_with("TIMEOUT after 1s"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timeout_covers_background_children() {
        let started = Instant::now();
        let result = ShellExecutor::new()
            .execute(&spec("echo hi; sleep 30 &", Some(Duration::from_secs(1))))
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(result.timed_out);
        assert_eq!(result.return_code, FAILURE_SENTINEL_CODE);
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.stderr, "TIMEOUT after 1s");
    }

    #[tokio::test]
    async fn test_background_child_without_timeout_is_awaited() {
        let result = ShellExecutor::new()
            .execute(&spec("(sleep 0.2; echo late) &", None))
            .await;
        assert!(result.is_success());
        assert_eq!(result.stdout, "late\n");
    }

    #[tokio::test]
    async fn test_killed_by_signal() {
        let result = ShellExecutor::new()
            .execute(&spec("kill -9 $$", None))
            .await;
        assert_eq!(result.return_code, -9);
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_missing_shell_is_launch_failure() {
        let result = ShellExecutor::with_shell("/nonexistent/shell")
            .execute(&spec("true", None))
            .await;
        assert_eq!(result.return_code, FAILURE_SENTINEL_CODE);
        assert!(result.stderr.contains("failed to spawn"));
        assert!(!result.timed_out);
    }
}
