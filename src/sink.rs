//! # Log sink seam for the child's standard streams.
//!
//! A [`LogSink`] consumes the child's piped stdout/stderr; a
//! [`LogSinkFactory`] produces one sink per spawn — sinks are never
//! reused across restarts. The supervisor calls
//! [`start`](LogSink::start) right after the child is launched and
//! [`stop`](LogSink::stop) from the reaper once the child is gone.
//!
//! When no factory is given to the supervisor, the child's stdio stays
//! inherited and no pipes are created.
//!
//! [`NullLogSink`] discards everything and exists mostly for tests.
//! With the `logging` feature, [`ConsoleLogSink`] is a small reference
//! sink that forwards child output line by line into `tracing`.

use async_trait::async_trait;
use tokio::process::{ChildStderr, ChildStdout};

/// Consumes one child's stdout and stderr streams.
#[async_trait]
pub trait LogSink: Send + 'static {
    /// Begins consuming the two readable stream ends.
    fn start(&mut self, out: ChildStdout, err: ChildStderr);

    /// Releases both streams. Must be idempotent.
    async fn stop(&mut self);
}

/// Produces a fresh [`LogSink`] for every child spawn.
pub trait LogSinkFactory: Send + Sync + 'static {
    fn new_sink(&self) -> Box<dyn LogSink>;
}

/// Sink that holds the streams without reading them and drops both on
/// [`stop`](LogSink::stop). For tests.
#[derive(Default)]
pub struct NullLogSink {
    streams: Option<(ChildStdout, ChildStderr)>,
}

#[async_trait]
impl LogSink for NullLogSink {
    fn start(&mut self, out: ChildStdout, err: ChildStderr) {
        self.streams = Some((out, err));
    }

    async fn stop(&mut self) {
        self.streams = None;
    }
}

/// Factory for [`NullLogSink`].
pub struct NullLogSinkFactory;

impl LogSinkFactory for NullLogSinkFactory {
    fn new_sink(&self) -> Box<dyn LogSink> {
        Box::new(NullLogSink::default())
    }
}

#[cfg(feature = "logging")]
pub use console::{ConsoleLogSink, ConsoleLogSinkFactory};

#[cfg(feature = "logging")]
mod console {
    use async_trait::async_trait;
    use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
    use tokio::process::{ChildStderr, ChildStdout};
    use tokio::task::JoinHandle;
    use tracing::{error, info};

    use super::{LogSink, LogSinkFactory};

    /// Reference sink that pumps child output line by line into
    /// `tracing` (target `procvisor::child`). Enabled via the `logging`
    /// feature; useful for demos and debugging.
    #[derive(Default)]
    pub struct ConsoleLogSink {
        pumps: Vec<JoinHandle<()>>,
    }

    #[async_trait]
    impl LogSink for ConsoleLogSink {
        fn start(&mut self, out: ChildStdout, err: ChildStderr) {
            self.pumps
                .push(tokio::spawn(pump("stdout", BufReader::new(out))));
            self.pumps
                .push(tokio::spawn(pump("stderr", BufReader::new(err))));
        }

        async fn stop(&mut self) {
            for pump in self.pumps.drain(..) {
                pump.abort();
                let _ = pump.await;
            }
        }
    }

    async fn pump(stream: &'static str, reader: impl AsyncBufRead + Unpin) {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    info!(target: "procvisor::child", stream, "{line}");
                }
                Ok(None) => break,
                Err(err) => {
                    error!(target: "procvisor::child", stream, ?err, "reading child output failed");
                    break;
                }
            }
        }
    }

    /// Factory for [`ConsoleLogSink`].
    pub struct ConsoleLogSinkFactory;

    impl LogSinkFactory for ConsoleLogSinkFactory {
        fn new_sink(&self) -> Box<dyn LogSink> {
            Box::new(ConsoleLogSink::default())
        }
    }
}
