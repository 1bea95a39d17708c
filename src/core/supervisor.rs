//! # The supervisor core: event loop, state machine, operator requests.
//!
//! One long-lived task owns the event loop; everything that mutates the
//! lifecycle goes through it. Operator calls, child exits and restart
//! triggers are multiplexed over channels, so handlers never race each
//! other:
//!
//! ```text
//!  callers ──signal(sig)──► sigch ─┐
//!                                  │
//!        runch (capacity 1) ───────┤
//!   "start a new child now"        ├──► select! ──► handler ──┐
//!                                  │      ▲                   │
//!  reaper ──ExitReport──► exitch ──┤      └────── loop ◄──────┘
//!                                  │
//!  CancellationToken ──────────────┘
//! ```
//!
//! - **runch** fires → spawn a child (the latch admits one in flight).
//! - **sigch** delivers a request → dispatch against the state machine,
//!   reply before re-entering the select.
//! - **exitch** fires → interpret the exit against the state in effect
//!   *now*, update counters, maybe schedule the next spawn.
//! - **token** cancelled → take the child down and leave.
//!
//! A child exit is always interpreted against the state in effect when
//! it is reaped, not when the OS signal landed: racing operator
//! requests either refine the intent (Stopping → Killing) or are
//! rejected as illegal transitions.

use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::Signal as OsSignal;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::config::{resolve_user, Config, RunAs};
use crate::core::child::{Child, ExitReport};
use crate::core::latch::Latch;
use crate::core::pidfile;
use crate::error::{ChildError, SupervisorError};
use crate::signal::{Signal, SignalRequest};
use crate::sink::LogSinkFactory;
use crate::stat::RunStat;
use crate::state::ProcessState;

/// How long `signal` waits for the event loop's reply.
const SIGNAL_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Cooperative pause after launching the event loop, giving the first
/// spawn time to complete before `supervise` returns.
const SUPERVISE_WARMUP: Duration = Duration::from_secs(1);

/// Single-process supervisor: launches one configured program, watches
/// its lifetime and reacts to operator signals.
///
/// Construction validates the config, resolves the run-as user and
/// adopts the status directory (reclaiming a previous instance if its
/// pid file names a live process). Nothing runs until
/// [`supervise`](Supervisor::supervise) is called.
pub struct Supervisor {
    shared: Arc<Shared>,
    parts: Mutex<Option<LoopParts>>,
}

/// State shared between the public facade and the event loop task.
struct Shared {
    cfg: Arc<Config>,
    run_as: Option<RunAs>,
    sink_factory: Option<Arc<dyn LogSinkFactory>>,
    state: Mutex<ProcessState>,
    latch: Latch,
    stat: RwLock<RunStat>,
    runtx: mpsc::Sender<()>,
    sigtx: mpsc::Sender<SignalRequest>,
}

/// Receiving halves handed to the event loop; consumed by the first
/// `supervise` call.
struct LoopParts {
    runrx: mpsc::Receiver<()>,
    sigrx: mpsc::Receiver<SignalRequest>,
}

impl Shared {
    fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    fn change_to_state(&self, state: ProcessState) {
        *self.state.lock() = state;
    }

    /// Schedules a spawn. `runch` has capacity 1; a full channel means
    /// a wakeup is already pending and this one coalesces into it.
    fn push_run(&self) {
        let _ = self.runtx.try_send(());
    }
}

impl Supervisor {
    /// Creates a supervisor for the given config.
    ///
    /// Fails with `ConfigInvalid`, `UserLookupFailed` or a pid-file
    /// error from adopting the status directory.
    pub fn new(
        cfg: Config,
        sink_factory: Option<Arc<dyn LogSinkFactory>>,
    ) -> Result<Self, SupervisorError> {
        cfg.validate()?;
        let run_as = resolve_user(&cfg)?;
        pidfile::adopt_status_dir(&cfg)?;

        let (runtx, runrx) = mpsc::channel(1);
        let (sigtx, sigrx) = mpsc::channel(1);

        Ok(Self {
            shared: Arc::new(Shared {
                cfg: Arc::new(cfg),
                run_as,
                sink_factory,
                state: Mutex::new(ProcessState::Stopped),
                latch: Latch::new(),
                stat: RwLock::new(RunStat::default()),
                runtx,
                sigtx,
            }),
            parts: Mutex::new(Some(LoopParts { runrx, sigrx })),
        })
    }

    /// Launches the event loop and pauses briefly so the first spawn
    /// can complete; the child is expected to be `Running` shortly
    /// after this returns.
    ///
    /// The returned handle resolves when supervision ends: `Ok` after a
    /// cooperative shutdown through the token, `Err` when the loop
    /// dies (spawn failure, pid-file failure, protocol error).
    pub async fn supervise(
        &self,
        token: CancellationToken,
    ) -> Result<JoinHandle<Result<(), SupervisorError>>, SupervisorError> {
        let parts = self
            .parts
            .lock()
            .take()
            .ok_or(SupervisorError::AlreadySupervising)?;

        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            let name = shared.cfg.name.clone();
            let res = event_loop(shared, parts, token).await;
            if let Err(e) = &res {
                error!(supervisor = %name, error = %e, "supervise error exit");
            }
            res
        });

        time::sleep(SUPERVISE_WARMUP).await;
        Ok(handle)
    }

    /// Sends an operator signal and waits for the event loop's reply.
    ///
    /// The state transition and the OS signal delivery happen before
    /// the reply; concurrent callers are serialised in arrival order.
    /// Times out with `SignalTimeout` after 30 seconds.
    pub async fn signal(&self, signal: Signal) -> Result<(), SupervisorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared
            .sigtx
            .send(SignalRequest {
                signal,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SupervisorError::NotSupervising)?;

        match time::timeout(SIGNAL_REPLY_TIMEOUT, reply_rx).await {
            Ok(Ok(res)) => res,
            Ok(Err(_)) => Err(SupervisorError::NotSupervising),
            Err(_) => Err(SupervisorError::SignalTimeout {
                signal,
                timeout: SIGNAL_REPLY_TIMEOUT,
            }),
        }
    }

    /// Current lifecycle state.
    pub fn process_state(&self) -> ProcessState {
        self.shared.state()
    }

    /// Deep copy of the runtime statistics, taken under the read lock.
    pub fn running_stat(&self) -> RunStat {
        self.shared.stat.read().clone()
    }

    /// The config this supervisor was built from.
    pub fn config(&self) -> &Config {
        &self.shared.cfg
    }
}

/// Loop-local runtime: the current child and everything the handlers
/// touch. The channel receivers and the token stay as locals in
/// [`event_loop`] so the select arms borrow disjoint values.
struct Runtime {
    shared: Arc<Shared>,
    child: Option<Child>,
}

/// What the reaper reaction decided about the loop's future.
enum Flow {
    Continue,
    Done,
}

async fn event_loop(
    shared: Arc<Shared>,
    parts: LoopParts,
    token: CancellationToken,
) -> Result<(), SupervisorError> {
    let LoopParts {
        mut runrx,
        mut sigrx,
    } = parts;
    let mut rt = Runtime {
        shared,
        child: None,
    };
    let mut exitch: Option<oneshot::Receiver<ExitReport>> = None;

    if let Err(e) = rt.spawn_child(&mut exitch).await {
        rt.shared.latch.settle();
        return Err(e);
    }

    loop {
        tokio::select! {
            Some(()) = runrx.recv() => {
                if let Err(e) = rt.spawn_child(&mut exitch).await {
                    rt.shared.latch.settle();
                    return Err(e);
                }
            }
            Some(req) = sigrx.recv() => {
                rt.handle_signal(req);
            }
            report = next_exit(&mut exitch) => {
                exitch = None;
                match rt.reap(report)? {
                    Flow::Continue => {}
                    Flow::Done => return Ok(()),
                }
            }
            _ = token.cancelled() => {
                return rt.shutdown(&mut exitch).await;
            }
        }
    }
}

/// Resolves once the current child's reaper publishes; pends forever
/// when no child is in flight.
async fn next_exit(exitch: &mut Option<oneshot::Receiver<ExitReport>>) -> ExitReport {
    match exitch.as_mut() {
        Some(rx) => match rx.await {
            Ok(report) => report,
            Err(_) => ExitReport::lost(),
        },
        None => std::future::pending().await,
    }
}

impl Runtime {
    /// Spawns a new child if none is in flight.
    ///
    /// Silently returns when the latch is already taken — an exit is
    /// still being reaped and will schedule the next spawn itself.
    async fn spawn_child(
        &mut self,
        exitch: &mut Option<oneshot::Receiver<ExitReport>>,
    ) -> Result<(), SupervisorError> {
        if !self.shared.latch.acquire() {
            return Ok(());
        }

        let sink = self.shared.sink_factory.as_ref().map(|f| f.new_sink());
        let mut child = Child::new(self.shared.cfg.clone(), self.shared.run_as, sink);
        child.start()?;

        if let Err(e) = pidfile::write(&self.shared.cfg.pid_file(), child.pid()) {
            if let Err(kerr) = child.force_kill_with_timeout().await {
                warn!(error = %kerr, "killing child after pid file write failure failed");
            }
            return Err(e);
        }

        *exitch = child.take_exit_rx();
        let pid = child.pid();
        let started_at = child.started_at();
        self.child = Some(child);

        self.shared.change_to_state(ProcessState::Running);
        {
            let mut stat = self.shared.stat.write();
            stat.run_count += 1;
            if stat.start_time.is_none() {
                stat.start_time = started_at;
            }
            stat.pid = pid;
        }
        Ok(())
    }

    /// Dispatches one operator request and replies. Never blocks: every
    /// handler body is synchronous and `runch` pushes coalesce.
    fn handle_signal(&mut self, req: SignalRequest) {
        let res = self.dispatch(req.signal);
        if let Err(e) = &res {
            if e.is_no_such_process() {
                warn!(signal = %req.signal, error = %e, "signal target already gone");
            }
        }
        // A caller that timed out dropped the receiver; nothing to do.
        let _ = req.reply.send(res);
    }

    fn dispatch(&mut self, signal: Signal) -> Result<(), SupervisorError> {
        match signal {
            Signal::Alrm => self.signal_child(OsSignal::SIGALRM),
            Signal::Cont => self.signal_child(OsSignal::SIGCONT),
            Signal::Down => self.handle_down(),
            Signal::Hup => self.signal_child(OsSignal::SIGHUP),
            Signal::Restart => self.handle_restart(),
            Signal::Interrupt => self.signal_child(OsSignal::SIGINT),
            Signal::Ttin => self.signal_child(OsSignal::SIGTTIN),
            Signal::Kill => self.handle_kill(),
            Signal::Ttou => self.signal_child(OsSignal::SIGTTOU),
            Signal::Stop => self.signal_child(OsSignal::SIGSTOP),
            Signal::Quit => self.signal_child(OsSignal::SIGQUIT),
            Signal::Up => self.handle_up(),
            Signal::Usr1 => self.signal_child(OsSignal::SIGUSR1),
            Signal::Usr2 => self.signal_child(OsSignal::SIGUSR2),
            Signal::Winch => self.signal_child(OsSignal::SIGWINCH),
        }
    }

    /// Forwards an OS signal to the child process itself. The pid of a
    /// child that already exited yields the usual warning-class ESRCH.
    fn signal_child(&self, signal: OsSignal) -> Result<(), SupervisorError> {
        match &self.child {
            Some(child) => child.signal(signal).map_err(SupervisorError::from),
            None => Err(ChildError::SignalFailed {
                pid: 0,
                signal,
                errno: Errno::ESRCH,
            }
            .into()),
        }
    }

    fn group_kill_child(&self) -> Result<(), SupervisorError> {
        match &self.child {
            Some(child) => child.group_kill().map_err(SupervisorError::from),
            None => Err(ChildError::SignalFailed {
                pid: 0,
                signal: OsSignal::SIGTERM,
                errno: Errno::ESRCH,
            }
            .into()),
        }
    }

    /// `Down`: stop the child and keep it down.
    fn handle_down(&mut self) -> Result<(), SupervisorError> {
        match self.shared.state() {
            ProcessState::Running => {
                self.shared.change_to_state(ProcessState::Stopping);
                self.shared.latch.set_once(true);
                self.group_kill_child()
            }
            from => Err(SupervisorError::IllegalTransition {
                from,
                signal: Signal::Down,
            }),
        }
    }

    /// `Restart`: stop the child, auto-restart on exit.
    fn handle_restart(&mut self) -> Result<(), SupervisorError> {
        match self.shared.state() {
            ProcessState::Running => {
                self.shared.change_to_state(ProcessState::Restarting);
                self.shared.latch.set_once(false);
                self.group_kill_child()
            }
            from => Err(SupervisorError::IllegalTransition {
                from,
                signal: Signal::Restart,
            }),
        }
    }

    /// `Kill`: SIGKILL the leader and keep it down. Also legal while a
    /// stop or restart is already in progress — it refines the intent.
    fn handle_kill(&mut self) -> Result<(), SupervisorError> {
        match self.shared.state() {
            ProcessState::Running | ProcessState::Stopping | ProcessState::Restarting => {
                self.shared.change_to_state(ProcessState::Killing);
                self.shared.latch.set_once(true);
                self.signal_child(OsSignal::SIGKILL)
            }
            from => Err(SupervisorError::IllegalTransition {
                from,
                signal: Signal::Kill,
            }),
        }
    }

    /// `Up`: start from a terminal state.
    fn handle_up(&mut self) -> Result<(), SupervisorError> {
        match self.shared.state() {
            ProcessState::Stopped | ProcessState::Killed | ProcessState::Exited => {
                self.shared.change_to_state(ProcessState::Starting);
                self.shared.latch.set_once(false);
                self.shared.latch.release();
                self.shared.push_run();
                Ok(())
            }
            from => Err(SupervisorError::IllegalTransition {
                from,
                signal: Signal::Up,
            }),
        }
    }

    /// Interprets a reaped exit against the state in effect now.
    fn reap(&mut self, report: ExitReport) -> Result<Flow, SupervisorError> {
        self.record_exit(&report);

        match self.shared.state() {
            ProcessState::Stopping | ProcessState::Restarting => {
                self.finish(ProcessState::Stopped);
            }
            ProcessState::Killing => {
                self.finish(ProcessState::Killed);
            }
            ProcessState::Running => {
                self.finish(ProcessState::Exited);
            }
            ProcessState::Terminating => {
                // Cooperative shutdown complete.
                return Ok(Flow::Done);
            }
            state => {
                self.shared.change_to_state(ProcessState::Fatal);
                return Err(SupervisorError::UnexpectedExitState { state });
            }
        }

        if !self.shared.latch.hold_once() {
            self.shared.change_to_state(ProcessState::Starting);
        }
        self.shared.latch.settle();
        // Pushed even when auto-restart is withheld; the follow-up
        // spawn attempt finds the latch shut and returns silently.
        self.shared.push_run();
        Ok(Flow::Continue)
    }

    /// Records the terminal state and bumps its counter.
    fn finish(&self, terminal: ProcessState) {
        self.shared.change_to_state(terminal);
        let mut stat = self.shared.stat.write();
        match terminal {
            ProcessState::Stopped => stat.stopped_count += 1,
            ProcessState::Killed => stat.killed_count += 1,
            ProcessState::Exited => stat.exited_count += 1,
            _ => {}
        }
        stat.last_terminate_state = terminal;
    }

    /// Snapshots the finished run into the stat record.
    fn record_exit(&self, report: &ExitReport) {
        let mut stat = self.shared.stat.write();
        stat.last_start = Some(report.started_at);
        stat.last_end = Some(report.ended_at);
        stat.last_uptime = report.uptime();
        stat.last_user_time = report.user_time;
        stat.last_sys_time = report.sys_time;
        stat.last_exit_error = report.exit_error();
        stat.pid = 0;
    }

    /// Token cancelled: take the child down, wait for its exit, leave.
    async fn shutdown(
        &mut self,
        exitch: &mut Option<oneshot::Receiver<ExitReport>>,
    ) -> Result<(), SupervisorError> {
        match self.shared.state() {
            ProcessState::Running => {
                self.shared.change_to_state(ProcessState::Terminating);
                self.shared.latch.set_once(true);
                if let Err(e) = self.group_kill_child() {
                    warn!(error = %e, "terminating child failed");
                }
            }
            ProcessState::Stopping | ProcessState::Restarting | ProcessState::Killing => {
                // The child is already on its way down.
                self.shared.change_to_state(ProcessState::Terminating);
                self.shared.latch.set_once(true);
            }
            _ => return Ok(()),
        }

        let Some(rx) = exitch.take() else {
            return Ok(());
        };
        let report = match rx.await {
            Ok(report) => report,
            Err(_) => ExitReport::lost(),
        };
        self.record_exit(&report);
        Ok(())
    }
}
