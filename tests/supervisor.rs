//! Lifecycle scenarios driven against a real child process.
//!
//! Every test supervises a `sleep 3600` child inside its own temp
//! status dir, then drives the supervisor through operator signals and
//! asserts states and counters. Waits are generous because the reaper
//! withholds exits until the child has nominally run for 5 seconds.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal as OsSignal};
use nix::unistd::Pid;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use procvisor::{
    Config, NullLogSinkFactory, ProcessState, Signal, Supervisor, SupervisorError,
};

fn sleep_config(name: &str, dir: &TempDir) -> Config {
    let mut cfg = Config::new(name, "sleep", dir.path());
    cfg.args = vec!["3600".to_string()];
    cfg
}

fn is_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Honors RUST_LOG when debugging a failing scenario.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

type LoopHandle = JoinHandle<Result<(), SupervisorError>>;

async fn setup(name: &str, dir: &TempDir) -> (Supervisor, CancellationToken, LoopHandle) {
    init_tracing();
    let sup = Supervisor::new(sleep_config(name, dir), Some(Arc::new(NullLogSinkFactory)))
        .expect("supervisor construction");
    let token = CancellationToken::new();
    let handle = sup.supervise(token.clone()).await.expect("supervise");
    (sup, token, handle)
}

async fn teardown(token: CancellationToken, handle: LoopHandle) {
    token.cancel();
    let _ = handle.await;
}

#[tokio::test(flavor = "multi_thread")]
async fn supervises_and_restarts_after_crash() {
    let dir = TempDir::new().unwrap();
    let (sup, token, handle) = setup("restart_after_crash", &dir).await;

    assert_eq!(sup.process_state(), ProcessState::Running);
    let pid = sup.running_stat().pid;
    assert!(pid > 0);
    assert!(is_alive(pid));

    // The pid file names the live child.
    let written = fs::read_to_string(dir.path().join("restart_after_crash.pid")).unwrap();
    assert_eq!(written.trim().parse::<i32>().unwrap(), pid);

    // Kill the child behind the supervisor's back.
    kill(Pid::from_raw(pid), OsSignal::SIGKILL).unwrap();
    sleep(Duration::from_secs(7)).await;

    assert_eq!(sup.process_state(), ProcessState::Running);
    let stat = sup.running_stat();
    assert!(stat.last_uptime > Duration::ZERO);
    assert_eq!(stat.last_terminate_state, ProcessState::Exited);
    assert_eq!(stat.run_count, 2);
    assert_eq!(stat.exited_count, 1);
    assert_ne!(stat.pid, pid);
    assert!(is_alive(stat.pid));

    teardown(token, handle).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn manual_kill_keeps_child_down() {
    let dir = TempDir::new().unwrap();
    let (sup, token, handle) = setup("manual_kill", &dir).await;

    assert_eq!(sup.process_state(), ProcessState::Running);
    let pid = sup.running_stat().pid;
    assert!(is_alive(pid));

    sup.signal(Signal::Kill).await.unwrap();
    sleep(Duration::from_secs(5)).await;

    assert_eq!(sup.process_state(), ProcessState::Killed);
    let stat = sup.running_stat();
    assert!(stat.last_uptime > Duration::ZERO);
    assert_eq!(stat.last_terminate_state, ProcessState::Killed);
    assert_eq!(stat.run_count, 1);
    assert_eq!(stat.killed_count, 1);
    assert_eq!(stat.pid, 0);
    assert!(!is_alive(pid));

    teardown(token, handle).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn manual_stop_then_start() {
    let dir = TempDir::new().unwrap();
    let (sup, token, handle) = setup("manual_stop_and_start", &dir).await;

    assert_eq!(sup.process_state(), ProcessState::Running);
    let pid = sup.running_stat().pid;
    assert!(is_alive(pid));

    sup.signal(Signal::Down).await.unwrap();
    sleep(Duration::from_secs(5)).await;

    assert_eq!(sup.process_state(), ProcessState::Stopped);
    let stat = sup.running_stat();
    assert!(stat.last_uptime > Duration::ZERO);
    assert_eq!(stat.last_terminate_state, ProcessState::Stopped);
    assert_eq!(stat.run_count, 1);
    assert_eq!(stat.stopped_count, 1);
    assert!(!is_alive(pid));

    sup.signal(Signal::Up).await.unwrap();
    sleep(Duration::from_secs(1)).await;

    assert_eq!(sup.process_state(), ProcessState::Running);
    let stat = sup.running_stat();
    assert_eq!(stat.run_count, 2);
    assert_eq!(stat.stopped_count, 1);
    assert!(is_alive(stat.pid));

    // The pid file was rewritten for the new child.
    let written = fs::read_to_string(dir.path().join("manual_stop_and_start.pid")).unwrap();
    assert_eq!(written.trim().parse::<i32>().unwrap(), stat.pid);

    teardown(token, handle).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn manual_restart_spawns_a_new_child() {
    let dir = TempDir::new().unwrap();
    let (sup, token, handle) = setup("manual_restart", &dir).await;

    assert_eq!(sup.process_state(), ProcessState::Running);
    let pid = sup.running_stat().pid;
    assert!(is_alive(pid));

    sup.signal(Signal::Restart).await.unwrap();
    sleep(Duration::from_secs(5)).await;

    assert_eq!(sup.process_state(), ProcessState::Running);
    let stat = sup.running_stat();
    assert!(stat.last_uptime > Duration::ZERO);
    assert_eq!(stat.last_terminate_state, ProcessState::Stopped);
    assert_eq!(stat.run_count, 2);
    assert_eq!(stat.stopped_count, 1);
    assert!(!is_alive(pid));
    assert_ne!(stat.pid, pid);

    teardown(token, handle).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn kill_during_restart_refines_the_intent() {
    let dir = TempDir::new().unwrap();
    let (sup, token, handle) = setup("kill_after_restart", &dir).await;

    assert_eq!(sup.process_state(), ProcessState::Running);
    let pid = sup.running_stat().pid;
    assert!(is_alive(pid));

    sup.signal(Signal::Restart).await.unwrap();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(sup.process_state(), ProcessState::Restarting);

    // The child is usually gone already, so delivery may report
    // "no such process" — the state machine advances regardless.
    let _ = sup.signal(Signal::Kill).await;
    sleep(Duration::from_secs(1)).await;
    assert_eq!(sup.process_state(), ProcessState::Killing);

    sleep(Duration::from_secs(3)).await;
    assert_eq!(sup.process_state(), ProcessState::Killed);
    let stat = sup.running_stat();
    assert!(stat.last_uptime > Duration::ZERO);
    assert_eq!(stat.last_terminate_state, ProcessState::Killed);
    assert_eq!(stat.run_count, 1);
    assert_eq!(stat.killed_count, 1);
    assert!(!is_alive(pid));

    teardown(token, handle).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn illegal_transitions_are_rejected() {
    let dir = TempDir::new().unwrap();
    let (sup, token, handle) = setup("illegal_transitions", &dir).await;

    sup.signal(Signal::Down).await.unwrap();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(sup.process_state(), ProcessState::Stopped);

    // A second Down has nothing to stop.
    let err = sup.signal(Signal::Down).await.unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::IllegalTransition {
            from: ProcessState::Stopped,
            signal: Signal::Down,
        }
    ));
    assert_eq!(sup.process_state(), ProcessState::Stopped);

    // Restart and Kill are just as illegal from a terminal state.
    assert!(matches!(
        sup.signal(Signal::Restart).await.unwrap_err(),
        SupervisorError::IllegalTransition { .. }
    ));
    assert!(matches!(
        sup.signal(Signal::Kill).await.unwrap_err(),
        SupervisorError::IllegalTransition { .. }
    ));

    teardown(token, handle).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_terminates_child_and_loop() {
    let dir = TempDir::new().unwrap();
    let (sup, token, handle) = setup("graceful_shutdown", &dir).await;

    assert_eq!(sup.process_state(), ProcessState::Running);
    let pid = sup.running_stat().pid;
    assert!(is_alive(pid));

    token.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(sup.process_state(), ProcessState::Terminating);
    assert!(!is_alive(pid));
    assert_eq!(sup.running_stat().pid, 0);

    // The loop is gone; further requests cannot be served.
    assert!(matches!(
        sup.signal(Signal::Hup).await.unwrap_err(),
        SupervisorError::NotSupervising
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn first_spawn_failure_ends_supervision() {
    let dir = TempDir::new().unwrap();
    let cfg = Config::new("bad_command", "/definitely/not/a/binary", dir.path());
    let sup = Supervisor::new(cfg, Some(Arc::new(NullLogSinkFactory))).unwrap();

    let token = CancellationToken::new();
    let handle = sup.supervise(token).await.unwrap();

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, SupervisorError::Child(_)));
    assert_eq!(sup.process_state(), ProcessState::Stopped);
    assert_eq!(sup.running_stat().run_count, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn supervise_can_only_be_called_once() {
    let dir = TempDir::new().unwrap();
    let (sup, token, handle) = setup("supervise_twice", &dir).await;
    assert_eq!(sup.config().name, "supervise_twice");

    let second = CancellationToken::new();
    assert!(matches!(
        sup.supervise(second).await.unwrap_err(),
        SupervisorError::AlreadySupervising
    ));

    teardown(token, handle).await;
}

#[test]
fn adoption_reclaims_a_live_previous_instance() {
    use std::os::unix::process::ExitStatusExt;

    let dir = TempDir::new().unwrap();
    let cfg = sleep_config("reclaim_live", &dir);

    let mut previous = std::process::Command::new("sleep")
        .arg("300")
        .spawn()
        .unwrap();
    fs::write(cfg.pid_file(), format!("{}\n", previous.id())).unwrap();

    let _sup = Supervisor::new(cfg, None).unwrap();

    let status = previous.wait().unwrap();
    assert_eq!(status.signal(), Some(OsSignal::SIGKILL as i32));
}

#[test]
fn adoption_ignores_garbage_and_dead_pids() {
    let dir = TempDir::new().unwrap();

    let cfg = sleep_config("garbage_pidfile", &dir);
    fs::write(cfg.pid_file(), "definitely not a pid\n").unwrap();
    assert!(Supervisor::new(cfg, None).is_ok());

    // A pid that was valid once but is long gone.
    let cfg = sleep_config("dead_pidfile", &dir);
    let mut gone = std::process::Command::new("true").spawn().unwrap();
    let pid = gone.id();
    gone.wait().unwrap();
    fs::write(cfg.pid_file(), format!("{pid}\n")).unwrap();
    assert!(Supervisor::new(cfg, None).is_ok());
}
