// databasebackup/src/backup/process.rs
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::command::ToolCommand;
use crate::errors::{BackupError, Result};

/// Per-stream cap on captured output. Anything beyond is read and dropped.
pub const MAX_CAPTURED_OUTPUT: usize = 1024 * 1024;
pub const TERMINATE_GRACE_PERIOD: Duration = Duration::from_secs(5);
const TRUNCATED_MARKER: &str = "\n[output truncated]";

#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
pub enum ExitStatus {
    Successful,
    Failed(Option<i32>),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self == &ExitStatus::Successful
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Successful => Some(0),
            ExitStatus::Failed(code) => *code,
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        if status.success() {
            ExitStatus::Successful
        } else {
            ExitStatus::Failed(status.code())
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// Turns a non-zero exit into `ProcessExecutionFailure`.
    pub fn check_status(self) -> Result<ProcessOutput> {
        match self.status {
            ExitStatus::Successful => Ok(self),
            ExitStatus::Failed(code) => Err(BackupError::ProcessExecutionFailure {
                code,
                stderr: self.stderr,
            }),
        }
    }
}

/// Runs one external tool to completion and captures its output.
///
/// stdout and stderr are drained on their own tasks while we wait for the
/// exit, so a chatty tool can never block on a full pipe. If `cancel` fires
/// first the child is terminated and `Cancelled` is returned.
#[tracing::instrument(level = "debug", skip_all, fields(program = %command.program.display()))]
pub async fn run_tool(command: &ToolCommand, cancel: &CancellationToken) -> Result<ProcessOutput> {
    if !command.program.is_file() {
        return Err(BackupError::ToolNotFound(command.program.clone()));
    }
    if cancel.is_cancelled() {
        return Err(BackupError::Cancelled);
    }

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // final fallback, normally the process gets terminated gracefully
        .kill_on_drop(true);

    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);

    let mut child = cmd.spawn().map_err(|source| BackupError::ProcessSpawn {
        program: command.program.clone(),
        source,
    })?;
    tracing::debug!(pid = child.id(), "process started");

    let stdout = child
        .stdout
        .take()
        .map(|io| tokio::spawn(drain_capped(io, MAX_CAPTURED_OUTPUT)));
    let stderr = child
        .stderr
        .take()
        .map(|io| tokio::spawn(drain_capped(io, MAX_CAPTURED_OUTPUT)));

    let status = tokio::select! {
        status = child.wait() => status.map_err(BackupError::ProcessIo)?,
        _ = cancel.cancelled() => {
            tracing::warn!(pid = child.id(), "cancellation requested, terminating process");
            if let Err(error) = terminate(&mut child, TERMINATE_GRACE_PERIOD).await {
                tracing::warn!(%error, "failed to terminate process after cancellation");
            }
            abort_reader(stdout);
            abort_reader(stderr);
            return Err(BackupError::Cancelled);
        }
    };

    let (stdout, stderr) = tokio::select! {
        output = async { tokio::try_join!(collect_reader(stdout), collect_reader(stderr)) } => output?,
        _ = cancel.cancelled() => return Err(BackupError::Cancelled),
    };

    let status = ExitStatus::from(status);
    if status.success() {
        tracing::debug!(stdout_len = stdout.len(), "process exited successfully");
    } else {
        tracing::debug!(exit_code = ?status.code(), stderr = %stderr, "process exited with failure");
    }
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
    })
}

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

async fn drain_capped<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> std::io::Result<String> {
    let mut captured = Vec::new();
    let mut buf = [0u8; 8192];
    let mut truncated = false;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(captured.len());
        captured.extend_from_slice(&buf[..n.min(room)]);
        truncated |= n > room;
    }
    let mut text = String::from_utf8_lossy(&captured).into_owned();
    if truncated {
        text.push_str(TRUNCATED_MARKER);
    }
    Ok(text)
}

async fn collect_reader(reader: Option<JoinHandle<std::io::Result<String>>>) -> Result<String> {
    match reader {
        Some(handle) => handle
            .await
            .map_err(|e| BackupError::ProcessIo(std::io::Error::other(e)))?
            .map_err(BackupError::ProcessIo),
        None => Ok(String::new()),
    }
}

fn abort_reader(reader: Option<JoinHandle<std::io::Result<String>>>) {
    if let Some(handle) = reader {
        handle.abort();
    }
}

#[cfg(unix)]
fn ask_to_terminate(child: &mut Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        // already reaped
        return Ok(());
    };
    // SAFETY: kill(2) has no memory-safety preconditions; pid belongs to our unreaped child.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn ask_to_terminate(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

#[tracing::instrument(level = "debug", skip_all, fields(pid = child.id(), grace_period_secs = grace_period.as_secs_f64()))]
async fn terminate(child: &mut Child, grace_period: Duration) -> std::io::Result<()> {
    tracing::debug!("trying to terminate gracefully");
    ask_to_terminate(child)?;
    match tokio::time::timeout(grace_period, child.wait()).await {
        Ok(result) => {
            tracing::debug!("process terminated before timeout");
            result?;
        }
        Err(_) => {
            tracing::debug!("process did not terminate before timeout, killing it instead");
            child.kill().await?;
        }
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::backup::test_support::write_script;
    use std::path::PathBuf;
    use std::time::Instant;

    fn command(program: PathBuf, args: &[&str], env: &[(&str, &str)]) -> ToolCommand {
        ToolCommand {
            program,
            args: args.iter().map(|a| a.to_string()).collect(),
            env: env.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let tool = write_script(dir.path(), "tool", "echo \"out $1\"\necho err >&2\nexit 0\n")?;

        let output = run_tool(&command(tool, &["first"], &[]), &CancellationToken::new()).await?;

        assert!(output.status.success());
        assert_eq!(output.stdout, "out first\n");
        assert_eq!(output.stderr, "err\n");
        Ok(())
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported_not_fabricated() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let tool = write_script(dir.path(), "tool", "echo 'connection refused' >&2\nexit 3\n")?;

        let output = run_tool(&command(tool, &[], &[]), &CancellationToken::new()).await?;
        assert_eq!(output.status, ExitStatus::Failed(Some(3)));
        assert_eq!(output.status.code(), Some(3));

        match output.check_status() {
            Err(BackupError::ProcessExecutionFailure { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr.trim(), "connection refused");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn environment_overlay_reaches_the_child() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let tool = write_script(dir.path(), "tool", "printf '%s' \"$PGPASSWORD\"\n")?;

        let output = run_tool(
            &command(tool, &[], &[("PGPASSWORD", "s3cret value")]),
            &CancellationToken::new(),
        )
        .await?;
        assert_eq!(output.stdout, "s3cret value");
        Ok(())
    }

    #[tokio::test]
    async fn verbose_output_on_both_streams_does_not_deadlock() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let tool = write_script(
            dir.path(),
            "tool",
            "head -c 3000000 /dev/zero | tr '\\0' 'a' >&2\nhead -c 3000000 /dev/zero | tr '\\0' 'b'\n",
        )?;

        let output = tokio::time::timeout(
            Duration::from_secs(60),
            run_tool(&command(tool, &[], &[]), &CancellationToken::new()),
        )
        .await??;

        assert!(output.status.success());
        assert_eq!(output.stdout.len(), MAX_CAPTURED_OUTPUT + TRUNCATED_MARKER.len());
        assert!(output.stdout.ends_with(TRUNCATED_MARKER));
        assert!(output.stderr.starts_with("aaaa"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_tool_is_a_precondition_failure() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let missing = dir.path().join("pg_dump");

        let result = run_tool(&command(missing.clone(), &[], &[]), &CancellationToken::new()).await;
        assert!(matches!(result, Err(BackupError::ToolNotFound(ref p)) if *p == missing));
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_terminates_the_child() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let marker = dir.path().join("terminated");
        let tool = write_script(
            dir.path(),
            "tool",
            "trap 'echo terminated > \"$1\"; exit 143' TERM\nwhile :; do sleep 0.1; done\n",
        )?;

        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                cancel.cancel();
            })
        };

        let started = Instant::now();
        let marker_arg = marker.display().to_string();
        let result = run_tool(&command(tool, &[&marker_arg], &[]), &cancel).await;
        canceller.await?;

        assert!(matches!(result, Err(BackupError::Cancelled)), "{:?}", result);
        assert!(started.elapsed() < TERMINATE_GRACE_PERIOD);
        assert_eq!(std::fs::read_to_string(&marker)?.trim(), "terminated");
        Ok(())
    }

    #[tokio::test]
    async fn already_cancelled_token_never_spawns() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let marker = dir.path().join("ran");
        let tool = write_script(dir.path(), "tool", "touch \"$1\"\n")?;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let marker_arg = marker.display().to_string();
        let result = run_tool(&command(tool, &[&marker_arg], &[]), &cancel).await;
        assert!(matches!(result, Err(BackupError::Cancelled)));
        assert!(!marker.exists());
        Ok(())
    }
}
