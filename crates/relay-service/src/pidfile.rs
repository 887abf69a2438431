//! PID-file lifecycle for the supervisor process (spec §4.10).
//!
//! Simplified from `the-snesler-spacebot::daemon`'s `DaemonPaths`/`is_running`
//! pattern: this service runs in the foreground under whatever process
//! supervisor starts it rather than forking or daemonizing itself, so only
//! the PID-file liveness half of that module applies — no Unix socket, no
//! double-fork.

use std::path::{Path, PathBuf};

use relay_core::error::{RelayError, Result};
use tracing::warn;

pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Acquire the PID file at `path`, refusing to start if a live process
    /// already holds it. A PID file referencing a dead process is stale and
    /// gets replaced.
    pub fn acquire(path: &str) -> Result<Self> {
        let path = PathBuf::from(path);

        if let Some(existing) = read_pid(&path) {
            if is_process_alive(existing) {
                return Err(RelayError::Config(format!(
                    "relay-service already running (pid {existing}, pid file {})",
                    path.display()
                )));
            }
            warn!(pid = existing, path = %path.display(), "removing stale pid file");
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, std::process::id().to_string())?;
        Ok(Self { path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// `kill(pid, 0)` checks whether a process exists without signaling it.
fn is_process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_current_pid_and_drop_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay-service.pid");
        let path_str = path.to_str().unwrap();

        {
            let _pid_file = PidFile::acquire(path_str).unwrap();
            let written = std::fs::read_to_string(&path).unwrap();
            assert_eq!(written.trim().parse::<u32>().unwrap(), std::process::id());
        }
        assert!(!path.exists());
    }

    #[test]
    fn acquire_replaces_a_stale_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay-service.pid");
        std::fs::write(&path, "999999999").unwrap();

        let _pid_file = PidFile::acquire(path.to_str().unwrap()).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.trim().parse::<u32>().unwrap(), std::process::id());
    }

    #[test]
    fn acquire_refuses_when_pid_file_names_a_live_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay-service.pid");
        std::fs::write(&path, std::process::id().to_string()).unwrap();

        assert!(PidFile::acquire(path.to_str().unwrap()).is_err());
    }
}
