//! Pid file management and previous-instance reclaim.
//!
//! The pid file lives at `{status_dir}/{name}.pid`, holds the decimal
//! pid on its first line and is written with mode 0644. On startup the
//! supervisor adopts the status dir: a pid file naming a live process
//! means a previous instance is still around and gets reclaimed with
//! SIGKILL. Missing or unparseable files count as "no previous
//! instance" and are simply overwritten later.

use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::sys::signal::{kill, Signal as OsSignal};
use nix::unistd::Pid;
use tracing::warn;

use crate::config::Config;
use crate::error::{ChildError, SupervisorError};

/// Checks the configured status dir for a previous instance and
/// reclaims it. Called once, before the event loop starts.
pub(crate) fn adopt_status_dir(cfg: &Config) -> Result<(), SupervisorError> {
    let path = cfg.pid_file();
    if !path.is_file() {
        return Ok(());
    }
    let Some(pid) = read(&path) else {
        return Ok(());
    };
    if is_alive(pid) {
        warn!(
            pid,
            path = %path.display(),
            "previous instance still alive, reclaiming with SIGKILL"
        );
        kill(Pid::from_raw(pid), OsSignal::SIGKILL).map_err(|errno| {
            ChildError::SignalFailed {
                pid,
                signal: OsSignal::SIGKILL,
                errno,
            }
        })?;
    }
    Ok(())
}

/// Reads the pid from the file's first line; `None` when the file is
/// missing or does not parse.
pub(crate) fn read(path: &Path) -> Option<i32> {
    let data = fs::read_to_string(path).ok()?;
    data.lines().next()?.trim().parse().ok()
}

/// Writes the pid atomically: temp file in the same directory, then
/// rename over the final path.
pub(crate) fn write(path: &Path, pid: i32) -> Result<(), SupervisorError> {
    let tmp = path.with_extension("pid.tmp");
    let res = (|| {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&tmp)?;
        file.write_all(format!("{pid}\n").as_bytes())?;
        fs::rename(&tmp, path)
    })();
    res.map_err(|source| SupervisorError::PidFileIo {
        path: path.to_path_buf(),
        source,
    })
}

/// Null-signal probe: true when a process with this pid exists.
pub(crate) fn is_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn round_trips_the_pid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("svc.pid");
        write(&path, 4242).unwrap();
        assert_eq!(read(&path), Some(4242));

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn garbage_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("svc.pid");
        fs::write(&path, "not a pid\n").unwrap();
        assert_eq!(read(&path), None);
    }

    #[test]
    fn first_line_is_authoritative() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("svc.pid");
        fs::write(&path, "123\ntrailing junk\n").unwrap();
        assert_eq!(read(&path), Some(123));
    }

    #[test]
    fn probes_live_and_dead_pids() {
        assert!(is_alive(std::process::id() as i32));
        // Pids above the default kernel pid_max are never allocated.
        assert!(!is_alive(i32::MAX));
    }

    #[test]
    fn adopts_garbage_files_silently() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::new("svc", "/bin/true", dir.path());
        cfg.args = Vec::new();
        fs::write(cfg.pid_file(), "###\n").unwrap();
        adopt_status_dir(&cfg).unwrap();
    }
}
