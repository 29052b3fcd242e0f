//! Single-server ownership of a work directory.
//!
//! A running server records `{pid, unix-socket-path, server-initiator}` in
//! `<work>/status.json`. Starting another server against the same work dir is
//! refused while that pid is alive; a file left by a dead process is removed.

use crate::config::Config;
use crate::services::Randomness;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Random bytes in the socket file name. Socket paths are capped near 108
/// bytes, so the name stays short.
pub const UNIX_SOCKET_RANDNUM_SIZE_BYTES: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerInitiator {
    PrimaryServer,
    CmdServer,
    CmdTestServer,
}

impl ServerInitiator {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerInitiator::PrimaryServer => "primary-server",
            ServerInitiator::CmdServer => "cmd-server",
            ServerInitiator::CmdTestServer => "cmd-test-server",
        }
    }
}

impl fmt::Display for ServerInitiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub pid: u32,
    #[serde(rename = "unix-socket-path")]
    pub unix_socket_path: PathBuf,
    #[serde(rename = "server-initiator")]
    pub server_initiator: ServerInitiator,
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("Cannot start server, a {initiator} is already running (pid {pid}).")]
    AlreadyRunning {
        pid: u32,
        initiator: ServerInitiator,
    },
    #[error("Cannot start server, another server ({initiator}) is running (pid {pid}).")]
    OtherServerRunning {
        pid: u32,
        initiator: ServerInitiator,
    },
    #[error("Status file '{}' does not exist.", path.display())]
    NotRunning { path: PathBuf },
    #[error("The unix socket path is empty.")]
    EmptySocketPath,
    #[error("Failed to access status file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse status file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to generate a unix socket name: {0}")]
    Random(String),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StatusError + '_ {
    move |source| StatusError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Whether `pid` names a live process.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    // SAFETY: signal 0 performs only the existence and permission checks.
    let result = unsafe { libc::kill(pid, 0) };
    result == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    true
}

/// The status file of one work dir.
#[derive(Clone, Debug)]
pub struct StatusFile {
    path: PathBuf,
    pid_path: PathBuf,
    run_dir: PathBuf,
}

impl StatusFile {
    pub fn new(config: &Config) -> Self {
        Self {
            path: config.status_path(),
            pid_path: config.pid_path(),
            run_dir: config.run_dir(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<StatusInfo>, StatusError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&self.path)(e)),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StatusError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    /// The live server's status. A file left by a dead process is removed.
    pub fn current(&self) -> Result<Option<StatusInfo>, StatusError> {
        let Some(info) = self.read()? else {
            return Ok(None);
        };

        if is_alive(info.pid) {
            return Ok(Some(info));
        }

        warn!(path = %self.path.display(), pid = info.pid, "Removing stale status file");
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&self.path)(e)),
        }
    }

    /// Socket of the live server, for clients.
    pub fn unix_socket_path(&self) -> Result<PathBuf, StatusError> {
        let info = self.current()?.ok_or_else(|| StatusError::NotRunning {
            path: self.path.clone(),
        })?;

        if info.unix_socket_path.as_os_str().is_empty() {
            return Err(StatusError::EmptySocketPath);
        }
        Ok(info.unix_socket_path)
    }

    /// Record this process as the server for the work dir.
    ///
    /// Fails if a live server holds the file, whatever its initiator.
    pub fn claim(
        &self,
        initiator: ServerInitiator,
        random: &dyn Randomness,
    ) -> Result<StatusGuard, StatusError> {
        if let Some(existing) = self.current()? {
            return Err(if existing.server_initiator == initiator {
                StatusError::AlreadyRunning {
                    pid: existing.pid,
                    initiator,
                }
            } else {
                StatusError::OtherServerRunning {
                    pid: existing.pid,
                    initiator: existing.server_initiator,
                }
            });
        }

        let suffix = random
            .hex(UNIX_SOCKET_RANDNUM_SIZE_BYTES)
            .map_err(|e| StatusError::Random(format!("{e:#}")))?;

        fs::create_dir_all(&self.run_dir).map_err(io_error(&self.run_dir))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }

        let info = StatusInfo {
            pid: std::process::id(),
            unix_socket_path: self.run_dir.join(format!("autograder-{suffix}.sock")),
            server_initiator: initiator,
        };

        let json = serde_json::to_vec_pretty(&info).map_err(|source| StatusError::Parse {
            path: self.path.clone(),
            source,
        })?;

        // create_new closes the race between two servers passing the check above.
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let pid = self.read()?.map(|other| other.pid).unwrap_or_default();
                return Err(StatusError::AlreadyRunning { pid, initiator });
            }
            Err(e) => return Err(io_error(&self.path)(e)),
        };
        file.write_all(&json).map_err(io_error(&self.path))?;

        let pid_path = if initiator == ServerInitiator::PrimaryServer {
            fs::write(&self.pid_path, info.pid.to_string()).map_err(io_error(&self.pid_path))?;
            Some(self.pid_path.clone())
        } else {
            None
        };

        debug!(
            path = %self.path.display(),
            pid = info.pid,
            initiator = %initiator,
            "Status file written"
        );

        Ok(StatusGuard {
            status_path: self.path.clone(),
            pid_path,
            info,
        })
    }
}

/// Owns the status file for the life of the server. Dropping it removes the
/// status file, the pid file and the socket.
#[derive(Debug)]
pub struct StatusGuard {
    status_path: PathBuf,
    pid_path: Option<PathBuf>,
    info: StatusInfo,
}

impl StatusGuard {
    pub fn info(&self) -> &StatusInfo {
        &self.info
    }

    pub fn socket_path(&self) -> &Path {
        &self.info.unix_socket_path
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove server file");
        }
    }
}

impl Drop for StatusGuard {
    fn drop(&mut self) {
        remove_quietly(&self.status_path);
        if let Some(pid_path) = &self.pid_path {
            remove_quietly(pid_path);
        }
        remove_quietly(&self.info.unix_socket_path);
    }
}
