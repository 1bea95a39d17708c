//! Runtime core: child lifecycle and the supervision event loop.
//!
//! The only public API re-exported from here is [`Supervisor`].
//! Everything else is an internal building block it wires together:
//!
//! - **supervisor.rs**: public facade; owns the shared state (config,
//!   state machine, latch, stat record, channels) and drives the
//!   select!-based event loop.
//! - **child.rs**: one OS process per run — launch as a process-group
//!   leader, signalling, the per-child reaper with the minimum-uptime
//!   debounce.
//! - **latch.rs**: the at-most-one-in-flight gate plus the restart
//!   policy carried across an exit.
//! - **pidfile.rs**: pid file read/write and previous-instance reclaim.

mod child;
mod latch;
mod pidfile;
mod supervisor;

pub use supervisor::Supervisor;
