//! # procvisor
//!
//! **Procvisor** is a single-process supervision library.
//!
//! One [`Supervisor`] instance launches one configured program, watches
//! its lifetime and reacts to operator requests expressed as symbolic
//! [`Signal`]s — letting the program die, killing it forcibly, or
//! restarting it immediately, depending on the operator's intent.
//!
//! ## Features
//!
//! | Area           | Description                                                  | Key types / traits                  |
//! |----------------|--------------------------------------------------------------|-------------------------------------|
//! | **Supervision**| Launch, observe and restart one child process.               | [`Supervisor`], [`Config`]          |
//! | **Signals**    | Symbolic operator commands mapped onto the state machine.    | [`Signal`], [`ProcessState`]        |
//! | **Statistics** | Counters and last-lifetime timings, snapshot without tearing.| [`RunStat`]                         |
//! | **Log sinks**  | Pluggable consumers for the child's stdout/stderr.           | [`LogSink`], [`LogSinkFactory`]     |
//! | **Errors**     | Typed errors for the runtime and the child.                  | [`SupervisorError`], [`ChildError`] |
//!
//! ## Optional features
//! - `logging`: exports [`ConsoleLogSink`], a reference sink that
//!   forwards child output into `tracing` _(demo/reference only)_.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use procvisor::{Config, NullLogSinkFactory, Signal, Supervisor};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::new("demo", "sleep", "/tmp");
//!     cfg.args = vec!["3600".into()];
//!
//!     let sup = Supervisor::new(cfg, Some(Arc::new(NullLogSinkFactory)))?;
//!
//!     // Run the event loop until the token fires.
//!     let token = CancellationToken::new();
//!     let handle = sup.supervise(token.clone()).await?;
//!
//!     // Stop and start the child again.
//!     sup.signal(Signal::Restart).await?;
//!
//!     token.cancel();
//!     handle.await??;
//!     Ok(())
//! }
//! ```
//!
//! ---

mod config;
mod core;
mod error;
mod signal;
mod sink;
mod stat;
mod state;

// ---- Public re-exports ----

pub use config::Config;
pub use crate::core::Supervisor;
pub use error::{ChildError, SupervisorError};
pub use signal::Signal;
pub use sink::{LogSink, LogSinkFactory, NullLogSink, NullLogSinkFactory};
pub use stat::RunStat;
pub use state::ProcessState;

// Optional: expose the reference tracing-backed sink.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use sink::{ConsoleLogSink, ConsoleLogSinkFactory};
