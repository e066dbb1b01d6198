//! Shell command execution for declarative workflow nodes

use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

use crate::workflow::CancellationToken;

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("failed reading {stream} of '{command}': {source}")]
    Read {
        command: String,
        stream: &'static str,
        source: std::io::Error,
    },

    #[error("failed waiting for '{command}': {source}")]
    Wait {
        command: String,
        source: std::io::Error,
    },

    #[error("'{command}' was cancelled")]
    Cancelled { command: String },
}

/// Exit code, using 128+signal for signal-terminated processes on Unix
fn exit_code_parts(code: Option<i32>, _signal: Option<i32>) -> Option<i32> {
    if code.is_some() {
        return code;
    }
    #[cfg(unix)]
    {
        if let Some(signal) = _signal {
            return Some(128 + signal);
        }
    }
    None
}

pub(crate) fn exit_status_code(status: &std::process::ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    let signal = status.signal();
    #[cfg(not(unix))]
    let signal = None;
    exit_code_parts(status.code(), signal)
}

/// Run `command` through `sh -c`, capturing both streams.
///
/// The child is killed if `cancel` fires first. A non-zero exit is not an
/// error here; callers decide what it means.
pub async fn run_shell(
    command: &str,
    cwd: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<CommandOutput, ProcessError> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        command: command.to_string(),
        source,
    })?;
    tracing::trace!(command, pid = child.id(), "Spawned shell command");

    tokio::select! {
        result = collect_output(command, &mut child) => result,
        _ = cancel.cancelled() => {
            // Killing may race with a normal exit
            let _ = child.kill().await;
            Err(ProcessError::Cancelled { command: command.to_string() })
        }
    }
}

/// Read stdout and stderr concurrently so neither pipe can fill and block
async fn collect_output(command: &str, child: &mut Child) -> Result<CommandOutput, ProcessError> {
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    let (stdout, stderr) = tokio::try_join!(
        read_pipe(stdout_pipe, "stdout"),
        read_pipe(stderr_pipe, "stderr")
    )
    .map_err(|(stream, source)| ProcessError::Read {
        command: command.to_string(),
        stream,
        source,
    })?;

    let status = child.wait().await.map_err(|source| ProcessError::Wait {
        command: command.to_string(),
        source,
    })?;

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code: exit_status_code(&status),
    })
}

async fn read_pipe<R>(
    pipe: Option<R>,
    stream: &'static str,
) -> Result<String, (&'static str, std::io::Error)>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf)
            .await
            .map_err(|source| (stream, source))?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
