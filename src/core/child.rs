//! Child process lifecycle: launch, signalling, reaping.
//!
//! One [`Child`] wraps one OS process for one run. Launching makes the
//! child a process-group leader so that "terminate the child" always
//! means "SIGTERM the whole family it may have forked". A per-child
//! reaper task waits for the process, enforces the minimum-uptime
//! debounce and publishes an [`ExitReport`] on a one-shot channel; the
//! supervisor owns the receiving end and interprets the exit against
//! its state machine.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::resource::{getrusage, UsageWho};
use nix::sys::signal::{kill, Signal as OsSignal};
use nix::sys::time::TimeVal;
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::time;
use tracing::warn;

use crate::config::{Config, RunAs};
use crate::error::ChildError;
use crate::sink::LogSink;

/// The reaper withholds the exit report until the child has nominally
/// been alive this long. Rate-limits crash loops to one spawn per
/// window without any logic in the event loop.
const MIN_RUN_INTERVAL: Duration = Duration::from_secs(5);

/// How long `force_kill_with_timeout` waits after the group SIGTERM
/// before escalating to SIGKILL.
const FORCE_KILL_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything the reaper learned about one finished run.
#[derive(Debug)]
pub(crate) struct ExitReport {
    pub(crate) status: io::Result<ExitStatus>,
    pub(crate) started_at: Instant,
    pub(crate) ended_at: Instant,
    pub(crate) user_time: Duration,
    pub(crate) sys_time: Duration,
}

impl ExitReport {
    /// Renders the wait-result the way the stat record stores it:
    /// `None` for a clean exit.
    pub(crate) fn exit_error(&self) -> Option<String> {
        match &self.status {
            Ok(status) if status.success() => None,
            Ok(status) => Some(status.to_string()),
            Err(e) => Some(e.to_string()),
        }
    }

    pub(crate) fn uptime(&self) -> Duration {
        self.ended_at.saturating_duration_since(self.started_at)
    }

    /// Placeholder report for the pathological case of a reaper that
    /// died without publishing.
    pub(crate) fn lost() -> Self {
        let now = Instant::now();
        Self {
            status: Err(io::Error::other("reaper finished without reporting")),
            started_at: now,
            ended_at: now,
            user_time: Duration::ZERO,
            sys_time: Duration::ZERO,
        }
    }
}

/// One run of the configured program.
pub(crate) struct Child {
    cfg: Arc<Config>,
    run_as: Option<RunAs>,
    sink: Option<Box<dyn LogSink>>,
    pid: i32,
    started_at: Option<Instant>,
    exit_rx: Option<oneshot::Receiver<ExitReport>>,
}

impl Child {
    pub(crate) fn new(
        cfg: Arc<Config>,
        run_as: Option<RunAs>,
        sink: Option<Box<dyn LogSink>>,
    ) -> Self {
        Self {
            cfg,
            run_as,
            sink,
            pid: 0,
            started_at: None,
            exit_rx: None,
        }
    }

    /// Launches the program and spawns its reaper task.
    ///
    /// The child becomes a process-group leader. The config environment
    /// is merged onto the inherited one (config wins on clashes). When
    /// a sink is present both streams are piped and handed to it;
    /// otherwise stdio stays inherited.
    pub(crate) fn start(&mut self) -> Result<(), ChildError> {
        let mut cmd = Command::new(&self.cfg.cmd);
        cmd.args(&self.cfg.args);
        cmd.envs(&self.cfg.env);
        if let Some(cwd) = &self.cfg.cwd {
            cmd.current_dir(cwd);
        }
        cmd.process_group(0);
        if let Some(run_as) = self.run_as {
            cmd.uid(run_as.uid.as_raw());
            cmd.gid(run_as.gid.as_raw());
        }
        if self.sink.is_some() {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        }

        let mut proc = cmd
            .spawn()
            .map_err(|source| ChildError::SpawnFailed { source })?;

        let started_at = Instant::now();
        self.pid = proc.id().map(|pid| pid as i32).unwrap_or(0);
        self.started_at = Some(started_at);

        let mut sink = self.sink.take();
        if let Some(sink) = sink.as_mut() {
            // Both streams exist: stdio was set to piped above.
            if let (Some(out), Some(err)) = (proc.stdout.take(), proc.stderr.take()) {
                sink.start(out, err);
            }
        }

        let usage_base = children_cpu_times();
        let (tx, rx) = oneshot::channel();
        self.exit_rx = Some(rx);
        tokio::spawn(reap(proc, sink, tx, started_at, usage_base));
        Ok(())
    }

    /// 0 before launch, the OS pid afterwards.
    pub(crate) fn pid(&self) -> i32 {
        self.pid
    }

    pub(crate) fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Hands the exit channel to the event loop. The reaper publishes
    /// exactly one report on it per run.
    pub(crate) fn take_exit_rx(&mut self) -> Option<oneshot::Receiver<ExitReport>> {
        self.exit_rx.take()
    }

    /// Sends an OS signal to the child process itself.
    pub(crate) fn signal(&self, signal: OsSignal) -> Result<(), ChildError> {
        // Never signal pid 0: that is our own process group.
        if self.pid <= 0 {
            return Err(ChildError::SignalFailed {
                pid: self.pid,
                signal,
                errno: Errno::ESRCH,
            });
        }
        kill(Pid::from_raw(self.pid), signal).map_err(|errno| ChildError::SignalFailed {
            pid: self.pid,
            signal,
            errno,
        })
    }

    /// SIGTERMs the whole process group rooted at the child. The child
    /// is the group leader, so the negated pid addresses the group.
    pub(crate) fn group_kill(&self) -> Result<(), ChildError> {
        if self.pid <= 0 {
            return Err(ChildError::SignalFailed {
                pid: self.pid,
                signal: OsSignal::SIGTERM,
                errno: Errno::ESRCH,
            });
        }
        let pgrp = -self.pid;
        kill(Pid::from_raw(pgrp), OsSignal::SIGTERM).map_err(|errno| ChildError::SignalFailed {
            pid: pgrp,
            signal: OsSignal::SIGTERM,
            errno,
        })
    }

    /// Group-kills and waits for the exit report; escalates to SIGKILL
    /// on the leader after [`FORCE_KILL_TIMEOUT`], then waits for the
    /// report unconditionally.
    pub(crate) async fn force_kill_with_timeout(&mut self) -> Result<(), ChildError> {
        self.group_kill()?;
        let Some(mut rx) = self.exit_rx.take() else {
            return Ok(());
        };
        match time::timeout(FORCE_KILL_TIMEOUT, &mut rx).await {
            Ok(_) => Ok(()),
            Err(_) => {
                warn!(
                    pid = self.pid,
                    "kill waiting timeout, sending SIGKILL to the leader"
                );
                self.signal(OsSignal::SIGKILL)?;
                let _ = rx.await;
                Ok(())
            }
        }
    }
}

/// Waits for the process, debounces, stops the sink, publishes.
async fn reap(
    mut proc: tokio::process::Child,
    mut sink: Option<Box<dyn LogSink>>,
    tx: oneshot::Sender<ExitReport>,
    started_at: Instant,
    usage_base: (Duration, Duration),
) {
    let status = proc.wait().await;
    let ended_at = Instant::now();

    let uptime = ended_at.saturating_duration_since(started_at);
    if uptime < MIN_RUN_INTERVAL {
        time::sleep(MIN_RUN_INTERVAL - uptime).await;
    }

    if let Some(sink) = sink.as_mut() {
        sink.stop().await;
    }

    let (user_now, sys_now) = children_cpu_times();
    let _ = tx.send(ExitReport {
        status,
        started_at,
        ended_at,
        user_time: user_now.saturating_sub(usage_base.0),
        sys_time: sys_now.saturating_sub(usage_base.1),
    });
}

/// Cumulative CPU times of all reaped children, per getrusage(2).
///
/// With at most one child in flight, the delta between a baseline taken
/// at spawn and a reading taken at reap is that child's usage.
fn children_cpu_times() -> (Duration, Duration) {
    match getrusage(UsageWho::RUSAGE_CHILDREN) {
        Ok(usage) => (
            timeval_to_duration(usage.user_time()),
            timeval_to_duration(usage.system_time()),
        ),
        Err(_) => (Duration::ZERO, Duration::ZERO),
    }
}

fn timeval_to_duration(tv: TimeVal) -> Duration {
    let secs = tv.tv_sec().max(0) as u64;
    let micros = tv.tv_usec().max(0) as u32;
    Duration::new(secs, micros * 1_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_error_renders_clean_and_failed_exits() {
        let clean = std::process::Command::new("true").status().unwrap();
        let failed = std::process::Command::new("false").status().unwrap();

        let report = |status: ExitStatus| ExitReport {
            status: Ok(status),
            started_at: Instant::now(),
            ended_at: Instant::now(),
            user_time: Duration::ZERO,
            sys_time: Duration::ZERO,
        };

        assert_eq!(report(clean).exit_error(), None);
        assert!(report(failed).exit_error().is_some());
    }

    #[test]
    fn unstarted_child_refuses_to_signal() {
        let cfg = Arc::new(Config::new("svc", "/bin/true", "/tmp"));
        let child = Child::new(cfg, None, None);
        assert_eq!(child.pid(), 0);
        let err = child.signal(OsSignal::SIGTERM).unwrap_err();
        assert!(err.is_no_such_process());
    }
}
