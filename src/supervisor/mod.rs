//! Supervisor module - child process lifecycle
//!
//! This module owns every subprocess of a run:
//! - spawning children in their own process group
//! - the live-handle set (insert on spawn, remove on confirmed exit)
//! - waits that race against the shutdown token and optional timeouts
//! - graceful-then-forceful termination of whole process groups
//!
//! The supervisor does NOT:
//! - Decide statuses or exit codes
//! - Parse target output
//! - Know which strategy built the command

pub mod invocation;
pub mod signals;

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{pipe2, Pid};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::unix::pipe;
use tokio::process::{Child, ChildStdout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use invocation::{limited_invocation, CommandSpec, Limiter, LogPaths};
pub use signals::{forward_shutdown_signals, ShutdownSignals, SignalState};

/// Grace period between SIGTERM and SIGKILL
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for {command}: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} did not finish within {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    #[error("interrupted by shutdown request")]
    Interrupted,
}

/// Result of a helper run with captured stdout
#[derive(Debug)]
pub struct CapturedRun {
    pub status: ExitStatus,
    pub stdout: String,
}

struct TrackedChild {
    child: Child,
    command: String,
}

/// Owner of the live-handle set.
///
/// Only one logical thread touches the set: spawn inserts, a confirmed exit
/// removes, and `terminate_all` drains it.
pub struct ProcessSupervisor {
    live: HashMap<u32, TrackedChild>,
    shutdown: CancellationToken,
    grace: Duration,
}

impl ProcessSupervisor {
    pub fn new(shutdown: CancellationToken, grace: Duration) -> Self {
        Self {
            live: HashMap::new(),
            shutdown,
            grace,
        }
    }

    /// Number of children spawned and not yet confirmed exited
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn live_pids(&self) -> Vec<u32> {
        self.live.keys().copied().collect()
    }

    /// Run a command to completion with its stdout sent to `stdout`
    pub async fn run(
        &mut self,
        cmd: &CommandSpec,
        stdout: Stdio,
    ) -> Result<ExitStatus, SupervisorError> {
        let (pid, _) = self.spawn_tracked(cmd, stdout, Stdio::inherit())?;
        let (status, _) = self.wait_tracked(pid, None::<ChildStdout>, None).await?;
        Ok(status)
    }

    /// Run a helper and collect its stdout, bounded by `timeout`
    pub async fn run_capturing(
        &mut self,
        cmd: &CommandSpec,
        timeout: Option<Duration>,
    ) -> Result<CapturedRun, SupervisorError> {
        let (pid, stdout) = self.spawn_tracked(cmd, Stdio::piped(), Stdio::inherit())?;
        let (status, captured) = self.wait_tracked(pid, stdout, timeout).await?;
        Ok(CapturedRun {
            status,
            stdout: String::from_utf8_lossy(&captured).into_owned(),
        })
    }

    /// Like `run_capturing`, but stderr shares the stdout pipe so both
    /// streams come back interleaved in write order
    pub async fn run_capturing_merged(
        &mut self,
        cmd: &CommandSpec,
        timeout: Option<Duration>,
    ) -> Result<CapturedRun, SupervisorError> {
        let spawn_error = |source: std::io::Error| SupervisorError::Spawn {
            command: cmd.display(),
            source,
        };

        let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).map_err(|e| spawn_error(e.into()))?;
        let stderr_end = write_end.try_clone().map_err(spawn_error)?;
        let output = pipe::Receiver::from_owned_fd(read_end).map_err(spawn_error)?;

        // the parent's write ends close with the spawned command
        let (pid, _) =
            self.spawn_tracked(cmd, Stdio::from(write_end), Stdio::from(stderr_end))?;
        let (status, captured) = self.wait_tracked(pid, Some(output), timeout).await?;
        Ok(CapturedRun {
            status,
            stdout: String::from_utf8_lossy(&captured).into_owned(),
        })
    }

    /// Terminate every live child. Returns how many were still alive.
    pub async fn terminate_all(&mut self) -> usize {
        let tracked: Vec<(u32, TrackedChild)> = self.live.drain().collect();
        let count = tracked.len();
        for (pid, mut child) in tracked {
            warn!("Killing the target run: pid={} ({})", pid, child.command);
            terminate_group(pid, &mut child, self.grace).await;
        }
        count
    }

    fn spawn_tracked(
        &mut self,
        cmd: &CommandSpec,
        stdout: Stdio,
        stderr: Stdio,
    ) -> Result<(u32, Option<ChildStdout>), SupervisorError> {
        if self.shutdown.is_cancelled() {
            return Err(SupervisorError::Interrupted);
        }

        let command = cmd.display();
        debug!("Spawning: {}", command);

        let mut child = cmd
            .to_tokio_command()
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                command: command.clone(),
                source,
            })?;

        let pid = match child.id() {
            Some(pid) => pid,
            None => {
                return Err(SupervisorError::Spawn {
                    command,
                    source: std::io::Error::other("child exited before its pid was read"),
                })
            }
        };
        let stdout = child.stdout.take();

        info!("Started pid={} in its own process group", pid);
        self.live.insert(pid, TrackedChild { child, command });
        Ok((pid, stdout))
    }

    async fn wait_tracked<R: AsyncRead + Unpin>(
        &mut self,
        pid: u32,
        output: Option<R>,
        timeout: Option<Duration>,
    ) -> Result<(ExitStatus, Vec<u8>), SupervisorError> {
        let shutdown = self.shutdown.clone();
        let outcome = {
            let Some(tracked) = self.live.get_mut(&pid) else {
                return Err(SupervisorError::Wait {
                    command: format!("pid {}", pid),
                    source: std::io::Error::other("child is not tracked"),
                });
            };
            let command = tracked.command.clone();
            let child = &mut tracked.child;

            let finished = async {
                let mut captured = Vec::new();
                if let Some(mut out) = output {
                    out.read_to_end(&mut captured).await?;
                }
                let status = child.wait().await?;
                Ok::<_, std::io::Error>((status, captured))
            };
            let deadline = async {
                match timeout {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => Err(SupervisorError::Interrupted),
                res = finished => res.map_err(|source| SupervisorError::Wait {
                    command: command.clone(),
                    source,
                }),
                _ = deadline => Err(SupervisorError::TimedOut {
                    command: command.clone(),
                    timeout: timeout.unwrap_or_default(),
                }),
            }
        };

        match &outcome {
            Ok((status, _)) => {
                self.live.remove(&pid);
                info!("pid={} exited: {}", pid, status);
            }
            Err(SupervisorError::Interrupted) => {
                // stays tracked; cleanup owns it now
                debug!("Wait for pid={} interrupted", pid);
            }
            Err(_) => {
                if let Some(mut tracked) = self.live.remove(&pid) {
                    terminate_group(pid, &mut tracked, self.grace).await;
                }
            }
        }

        outcome
    }
}

/// SIGTERM the group, give the leader `grace` to exit, then SIGKILL the group.
///
/// Returns true when the leader had to be force-killed.
async fn terminate_group(pid: u32, tracked: &mut TrackedChild, grace: Duration) -> bool {
    let pgid = Pid::from_raw(pid as i32);

    if let Err(e) = killpg(pgid, Signal::SIGTERM) {
        debug!("SIGTERM to process group {} failed: {}", pid, e);
    }

    debug!("Wait {:?} for process group {} ...", grace, pid);
    let exited = tokio::time::timeout(grace, tracked.child.wait()).await.is_ok();

    // members that ignored SIGTERM go down with the group
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("SIGKILL to process group {} failed: {}", pid, e),
    }

    if !exited {
        warn!("pid={} survived SIGTERM for {:?}; killed", pid, grace);
        if let Err(e) = tracked.child.kill().await {
            warn!("Failed to reap pid={}: {}", pid, e);
        }
    }
    !exited
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").with_args(["-c", script])
    }

    fn supervisor() -> (ProcessSupervisor, CancellationToken) {
        let token = CancellationToken::new();
        (
            ProcessSupervisor::new(token.clone(), Duration::from_millis(200)),
            token,
        )
    }

    #[tokio::test]
    async fn test_run_capturing_collects_stdout() {
        let (mut sup, _) = supervisor();
        let run = sup
            .run_capturing(&sh("echo first; echo second"), None)
            .await
            .unwrap();

        assert!(run.status.success());
        assert_eq!(run.stdout, "first\nsecond\n");
        assert_eq!(sup.live_count(), 0);
    }

    #[tokio::test]
    async fn test_merged_capture_keeps_stderr() {
        let (mut sup, _) = supervisor();
        let run = sup
            .run_capturing_merged(&sh("echo out; echo err >&2; echo last >&2"), None)
            .await
            .unwrap();

        assert!(run.status.success());
        assert_eq!(run.stdout, "out\nerr\nlast\n");
        assert_eq!(sup.live_count(), 0);
    }

    #[tokio::test]
    async fn test_merged_capture_timeout_kills_group() {
        let (mut sup, _) = supervisor();
        let err = sup
            .run_capturing_merged(
                &sh("echo started >&2; sleep 30"),
                Some(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SupervisorError::TimedOut { .. }));
        assert_eq!(sup.live_count(), 0);
    }

    #[tokio::test]
    async fn test_exit_code_is_reported() {
        let (mut sup, _) = supervisor();
        let status = sup.run(&sh("exit 7"), Stdio::null()).await.unwrap();
        assert_eq!(status.code(), Some(7));
        assert_eq!(sup.live_count(), 0);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let (mut sup, _) = supervisor();
        let err = sup
            .run(&CommandSpec::new("/nonexistent/ta-wrapper-solver"), Stdio::null())
            .await
            .unwrap_err();

        assert!(matches!(err, SupervisorError::Spawn { .. }));
        assert_eq!(sup.live_count(), 0);
    }

    #[tokio::test]
    async fn test_helper_timeout_kills_group() {
        let (mut sup, _) = supervisor();
        let started = Instant::now();
        let err = sup
            .run_capturing(&sh("sleep 30"), Some(Duration::from_millis(100)))
            .await
            .unwrap_err();

        assert!(matches!(err, SupervisorError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(sup.live_count(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_leaves_child_for_cleanup() {
        let (mut sup, token) = supervisor();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let err = sup.run(&sh("sleep 30"), Stdio::null()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Interrupted));
        assert_eq!(sup.live_count(), 1);

        let started = Instant::now();
        assert_eq!(sup.terminate_all().await, 1);
        assert_eq!(sup.live_count(), 0);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_no_spawn_after_shutdown() {
        let (mut sup, token) = supervisor();
        token.cancel();
        let err = sup.run(&sh("true"), Stdio::null()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Interrupted));
        assert_eq!(sup.live_count(), 0);
    }
}
