//! # Runtime statistics of the supervised process.
//!
//! [`RunStat`] keeps counters and last-lifetime timings across child
//! runs. The supervisor holds it behind a read/write lock; readers take
//! a deep copy via
//! [`Supervisor::running_stat`](crate::Supervisor::running_stat) so a
//! snapshot is never torn.
//!
//! All instants come from the monotonic clock except the CPU times,
//! which are the OS post-mortem usage of the child.

use std::time::{Duration, Instant};

use crate::state::ProcessState;

/// Statistics of the supervisor runtime, updated by the event loop.
#[derive(Clone, Debug)]
pub struct RunStat {
    /// When the last finished child was started.
    pub last_start: Option<Instant>,
    /// When the last finished child exited.
    pub last_end: Option<Instant>,
    /// Wall-clock lifetime of the last finished child.
    pub last_uptime: Duration,
    /// User CPU time of the last finished child.
    pub last_user_time: Duration,
    /// System CPU time of the last finished child.
    pub last_sys_time: Duration,
    /// How the last child ended: `Stopped`, `Killed` or `Exited`.
    pub last_terminate_state: ProcessState,
    /// Wait-result of the last finished child; `None` for a clean exit.
    pub last_exit_error: Option<String>,
    /// When the first child of this supervisor was started.
    pub start_time: Option<Instant>,
    /// Number of successful spawns.
    pub run_count: u32,
    /// Exits reaped while stopping or restarting.
    pub stopped_count: u32,
    /// Exits reaped while running (the program died on its own).
    pub exited_count: u32,
    /// Exits reaped while killing.
    pub killed_count: u32,
    /// Pid of the live child, 0 when none.
    pub pid: i32,
}

impl Default for RunStat {
    fn default() -> Self {
        Self {
            last_start: None,
            last_end: None,
            last_uptime: Duration::ZERO,
            last_user_time: Duration::ZERO,
            last_sys_time: Duration::ZERO,
            last_terminate_state: ProcessState::Unknown,
            last_exit_error: None,
            start_time: None,
            run_count: 0,
            stopped_count: 0,
            exited_count: 0,
            killed_count: 0,
            pid: 0,
        }
    }
}
