//! # Supervisor configuration.
//!
//! [`Config`] describes the one program a supervisor instance manages:
//! what to launch, where, with which environment and credentials, and
//! where the supervisor keeps its pid file.
//!
//! The config is a plain value type, immutable once handed to
//! [`Supervisor::new`](crate::Supervisor::new). Validation and run-as
//! user resolution happen at construction time, not at spawn time.
//!
//! # Example
//! ```
//! use procvisor::Config;
//!
//! let mut cfg = Config::new("web", "/usr/bin/sleep", "/tmp");
//! cfg.args = vec!["3600".into()];
//! cfg.env.insert("RUST_LOG".into(), "info".into());
//!
//! assert_eq!(cfg.pid_file(), std::path::PathBuf::from("/tmp/web.pid"));
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use nix::unistd::{Gid, Uid, User};

use crate::error::SupervisorError;

/// Configuration for one supervised program.
#[derive(Clone, Debug)]
pub struct Config {
    /// Supervisor name; the pid file name is derived from it.
    pub name: String,
    /// Program to launch.
    pub cmd: PathBuf,
    /// Arguments passed to the program, in order.
    pub args: Vec<String>,
    /// Working directory for the child (inherited when `None`).
    pub cwd: Option<PathBuf>,
    /// Extra environment merged onto the inherited environment.
    /// Wins over inherited variables on key clashes.
    pub env: HashMap<String, String>,
    /// Run the child as this user (needs privileges to drop uid/gid).
    pub user: Option<String>,
    /// Existing directory holding the pid file.
    pub status_dir: PathBuf,
}

impl Config {
    /// Creates a config with the required fields; everything else
    /// defaults to empty and can be set directly on the public fields.
    pub fn new(
        name: impl Into<String>,
        cmd: impl Into<PathBuf>,
        status_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            user: None,
            status_dir: status_dir.into(),
        }
    }

    /// Path of the pid file: `{status_dir}/{name}.pid`.
    pub fn pid_file(&self) -> PathBuf {
        self.status_dir.join(format!("{}.pid", self.name))
    }

    pub(crate) fn validate(&self) -> Result<(), SupervisorError> {
        if self.name.is_empty() {
            return Err(SupervisorError::ConfigInvalid {
                reason: "supervisor name can not be empty".into(),
            });
        }
        if self.status_dir.as_os_str().is_empty() {
            return Err(SupervisorError::ConfigInvalid {
                reason: "status dir can not be empty".into(),
            });
        }
        if !self.status_dir.is_dir() {
            return Err(SupervisorError::ConfigInvalid {
                reason: format!("status dir [{}] not exists", self.status_dir.display()),
            });
        }
        Ok(())
    }
}

/// Resolved credentials for the configured run-as user.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RunAs {
    pub(crate) uid: Uid,
    pub(crate) gid: Gid,
}

/// Resolves `cfg.user` to a uid/gid pair, once, at construction time.
pub(crate) fn resolve_user(cfg: &Config) -> Result<Option<RunAs>, SupervisorError> {
    let Some(name) = cfg.user.as_deref() else {
        return Ok(None);
    };
    match User::from_name(name) {
        Ok(Some(user)) => Ok(Some(RunAs {
            uid: user.uid,
            gid: user.gid,
        })),
        Ok(None) => Err(SupervisorError::UserLookupFailed {
            name: name.to_string(),
            reason: "user not exists".into(),
        }),
        Err(errno) => Err(SupervisorError::UserLookupFailed {
            name: name.to_string(),
            reason: errno.to_string(),
        }),
    }
}
