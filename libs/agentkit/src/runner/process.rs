//! Child process handling shared by the native and container runners.

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::log_forwarder::{StreamKind, spawn_forwarder};
use super::{CommandSpec, ExecOutput, ProcessInfo, RunnerError};

/// How long stop waits for the output forwarders to drain.
const FORWARDER_DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

/// SIGTERM `child`. Returns `false` when the process already exited or the
/// signal could not be delivered.
#[cfg(unix)]
fn send_terminate_signal(child: &Child) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };
    let Ok(pid) = i32::try_from(pid) else {
        tracing::warn!(pid, "pid does not fit in i32, cannot send SIGTERM");
        return false;
    };
    kill(Pid::from_raw(pid), Signal::SIGTERM).is_ok()
}

#[cfg(windows)]
fn send_terminate_signal(_child: &Child) -> bool {
    false
}

/// SIGTERM, wait up to `grace`, then kill.
async fn stop_child_with_grace(child: &mut Child, info: &ProcessInfo, grace: Duration) {
    let graceful = send_terminate_signal(child);
    tracing::debug!(
        service = %info.service,
        instance_id = %info.instance_id,
        pid = ?info.pid,
        graceful,
        "stopping service process"
    );

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(service = %info.service, status = ?status, "service process exited");
        }
        Ok(Err(e)) => {
            tracing::warn!(service = %info.service, error = %e, "failed to wait for service process");
        }
        Err(_) => {
            tracing::debug!(service = %info.service, ?grace, "grace period expired, killing");
            if let Err(e) = child.kill().await {
                tracing::warn!(service = %info.service, error = %e, "failed to kill service process");
            }
        }
    }
}

async fn drain(handle: Option<JoinHandle<()>>) {
    if let Some(h) = handle {
        let _ = tokio::time::timeout(FORWARDER_DRAIN_TIMEOUT, h).await;
    }
}

/// A spawned child with its output forwarders.
pub(crate) struct ManagedProcess {
    info: ProcessInfo,
    child: Child,
    cancel: CancellationToken,
    stdout: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<()>>,
}

impl ManagedProcess {
    /// Spawn `command` detached from the caller; output goes to tracing.
    pub(crate) fn spawn(
        service: &str,
        command: &CommandSpec,
        container: Option<String>,
    ) -> Result<Self, RunnerError> {
        let mut cmd = command.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let instance_id = Uuid::now_v7();
        let cancel = CancellationToken::new();
        let stdout = child.stdout.take().map(|out| {
            spawn_forwarder(
                out,
                service.to_owned(),
                instance_id,
                StreamKind::Stdout,
                cancel.clone(),
            )
        });
        let stderr = child.stderr.take().map(|err| {
            spawn_forwarder(
                err,
                service.to_owned(),
                instance_id,
                StreamKind::Stderr,
                cancel.clone(),
            )
        });

        let info = ProcessInfo {
            service: service.to_owned(),
            instance_id,
            pid: child.id(),
            container,
            started_at: Instant::now(),
        };
        tracing::info!(
            service = %service,
            instance_id = %instance_id,
            pid = ?info.pid,
            "spawned service process"
        );

        Ok(Self {
            info,
            child,
            cancel,
            stdout,
            stderr,
        })
    }

    pub(crate) fn info(&self) -> &ProcessInfo {
        &self.info
    }

    /// `true` while the child has not exited.
    pub(crate) fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    pub(crate) async fn stop(mut self, grace: Duration) {
        stop_child_with_grace(&mut self.child, &self.info, grace).await;
        drain(self.stdout.take()).await;
        drain(self.stderr.take()).await;
        self.cancel.cancel();
    }
}

/// Run `command` to completion and capture its output.
///
/// # Errors
/// `RunnerError::Command` when the program cannot be started.
pub(crate) async fn output(command: &CommandSpec) -> Result<ExecOutput, RunnerError> {
    tracing::debug!(command = %command, "running command");
    let out = command
        .to_command()
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| RunnerError::Command {
            command: command.to_string(),
            source,
        })?;
    Ok(ExecOutput {
        success: out.status.success(),
        code: out.status.code(),
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
    })
}

/// Run `command` and turn a non-zero exit into `RunnerError::CommandFailed`.
pub(crate) async fn checked(command: &CommandSpec) -> Result<ExecOutput, RunnerError> {
    let out = output(command).await?;
    if out.success {
        return Ok(out);
    }
    let status = out
        .code
        .map_or_else(|| "signal".to_owned(), |c| format!("exit code {c}"));
    let output = if out.stderr.trim().is_empty() {
        out.stdout.trim().to_owned()
    } else {
        out.stderr.trim().to_owned()
    };
    Err(RunnerError::CommandFailed {
        command: command.to_string(),
        status,
        output,
    })
}
