//! # Error types used by the supervisor runtime and child processes.
//!
//! This module defines two main error enums:
//!
//! - [`SupervisorError`] errors raised by the supervision runtime itself.
//! - [`ChildError`] errors raised while launching or signalling the child.
//!
//! Both types provide an `as_label` helper for logs/metrics.
//! `SignalFailed` with `ESRCH` ("no such process") is warning-class: the
//! state machine advances as if delivery succeeded, because the common
//! case is that the process has already died. Use
//! [`SupervisorError::is_no_such_process`] to detect it.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::Signal as OsSignal;
use thiserror::Error;

use crate::signal::Signal;
use crate::state::ProcessState;

/// # Errors produced by the supervision runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Structural config problem detected before anything was started.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What exactly is wrong.
        reason: String,
    },

    /// The configured run-as user could not be resolved to a uid/gid.
    #[error("looking up user [{name}] failed: {reason}")]
    UserLookupFailed { name: String, reason: String },

    /// Reading or writing the pid file failed.
    #[error("pid file [{}] io failed: {source}", .path.display())]
    PidFileIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The requested signal is not legal in the current state.
    #[error("can't handle signal [{signal}] from state [{from}]")]
    IllegalTransition { from: ProcessState, signal: Signal },

    /// The event loop did not reply within the request deadline.
    #[error("waiting timeout {timeout:?} for signal [{signal}]")]
    SignalTimeout { signal: Signal, timeout: Duration },

    /// A child exit was reaped in a state the protocol does not allow.
    ///
    /// This indicates a supervisor bug and terminates the event loop.
    #[error("process exit from unexpected state: {state}")]
    UnexpectedExitState { state: ProcessState },

    /// `supervise` was called while the event loop is already running.
    #[error("supervisor event loop is already running")]
    AlreadySupervising,

    /// The event loop is gone; no one will ever reply to the request.
    #[error("supervisor event loop is not running")]
    NotSupervising,

    /// A child-level failure bubbled up through the runtime.
    #[error(transparent)]
    Child(#[from] ChildError),
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::ConfigInvalid { .. } => "config_invalid",
            SupervisorError::UserLookupFailed { .. } => "user_lookup_failed",
            SupervisorError::PidFileIo { .. } => "pid_file_io_failed",
            SupervisorError::IllegalTransition { .. } => "illegal_transition",
            SupervisorError::SignalTimeout { .. } => "signal_timeout",
            SupervisorError::UnexpectedExitState { .. } => "unexpected_exit_state",
            SupervisorError::AlreadySupervising => "already_supervising",
            SupervisorError::NotSupervising => "not_supervising",
            SupervisorError::Child(e) => e.as_label(),
        }
    }

    /// True when the underlying failure was "no such process" —
    /// warning-class, the target was already gone.
    pub fn is_no_such_process(&self) -> bool {
        matches!(self, SupervisorError::Child(e) if e.is_no_such_process())
    }
}

/// # Errors produced while launching or signalling the child process.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ChildError {
    /// Launching the program failed (pipes, credentials, exec).
    #[error("start process failed: {source}")]
    SpawnFailed {
        #[source]
        source: io::Error,
    },

    /// Delivering an OS signal to the child (or its group) failed.
    #[error("sending signal [{signal}] to pid [{pid}] failed: {errno}")]
    SignalFailed {
        pid: i32,
        signal: OsSignal,
        errno: Errno,
    },
}

impl ChildError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            ChildError::SpawnFailed { .. } => "spawn_failed",
            ChildError::SignalFailed { .. } => "signal_failed",
        }
    }

    /// True when the signal target was already gone (`ESRCH`).
    pub fn is_no_such_process(&self) -> bool {
        matches!(
            self,
            ChildError::SignalFailed {
                errno: Errno::ESRCH,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        let e = SupervisorError::ConfigInvalid {
            reason: "x".into(),
        };
        assert_eq!(e.as_label(), "config_invalid");

        let e = SupervisorError::from(ChildError::SpawnFailed {
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        });
        assert_eq!(e.as_label(), "spawn_failed");
    }

    #[test]
    fn esrch_is_no_such_process() {
        let e = ChildError::SignalFailed {
            pid: 12345,
            signal: OsSignal::SIGTERM,
            errno: Errno::ESRCH,
        };
        assert!(e.is_no_such_process());
        assert!(SupervisorError::from(e).is_no_such_process());

        let e = ChildError::SignalFailed {
            pid: 1,
            signal: OsSignal::SIGKILL,
            errno: Errno::EPERM,
        };
        assert!(!e.is_no_such_process());
    }
}
