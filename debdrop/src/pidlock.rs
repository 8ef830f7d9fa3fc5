//! PID lock file.
//!
//! Ensures a single daemon instance per toplevel directory. The lock file
//! holds the owning process id; a lock naming a live process refuses
//! acquisition, anything else (garbage content, dead process) is reported
//! as invalid and left for the operator to remove.

use crate::error::{DinstallError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// An acquired PID lock. Released on drop.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    locked: bool,
}

fn process_running(pid: i32) -> bool {
    // signal 0 probes for existence without delivering anything
    unsafe { libc::kill(pid, 0) == 0 }
}

impl PidLock {
    /// Acquire the lock at `path`, writing our own pid into it.
    pub fn acquire(path: &Path) -> Result<Self> {
        if path.is_file() {
            let contents = fs::read_to_string(path).map_err(|e| DinstallError::LockInvalid {
                path: path.to_path_buf(),
                detail: format!("unreadable: {}", e),
            })?;
            let pid: i32 =
                contents
                    .trim()
                    .parse()
                    .map_err(|_| DinstallError::LockInvalid {
                        path: path.to_path_buf(),
                        detail: format!("invalid content {:?}", contents.trim()),
                    })?;
            if process_running(pid) {
                return Err(DinstallError::LockHeld {
                    path: path.to_path_buf(),
                    pid,
                });
            }
            return Err(DinstallError::LockInvalid {
                path: path.to_path_buf(),
                detail: format!("process {} is dead", pid),
            });
        }
        fs::write(path, std::process::id().to_string())?;
        debug!("acquired lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            locked: true,
        })
    }

    /// Release the lock, removing the file.
    pub fn release(&mut self) -> Result<()> {
        if self.locked {
            fs::remove_file(&self.path)?;
            self.locked = false;
            debug!("released lock {}", self.path.display());
        }
        Ok(())
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if self.locked {
            let _ = fs::remove_file(&self.path);
        }
    }
}
