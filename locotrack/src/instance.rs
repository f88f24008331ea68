//! Single-instance guard for the tracker.
//!
//! The lock is a plain text file holding the decimal pid of its owner. A
//! record whose process no longer exists is stale and is replaced. With
//! preemption the previous owner is asked to stop (SIGTERM) and given a short
//! grace period before liveness is checked.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

/// File name of the lock inside the home directory.
pub const LOCK_FILE: &str = "locotrack.lock";

/// How long a preempted instance is given to exit.
const PREEMPT_GRACE: Duration = Duration::from_secs(2);

const PREEMPT_POLL: Duration = Duration::from_millis(100);

/// Errors acquiring the instance lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Another instance is running (pid {pid}, lock file {path})")]
    Held { pid: i32, path: PathBuf },

    #[error("Failed to access lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Path of the lock file inside a home directory.
pub fn lock_file_path(home_dir: &Path) -> PathBuf {
    home_dir.join(LOCK_FILE)
}

/// A held instance lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    released: bool,
}

impl InstanceLock {
    /// Acquire the lock at `path`, optionally preempting a running owner.
    pub fn acquire(path: &Path, preempt: bool) -> Result<Self, LockError> {
        let own = own_pid();

        if preempt {
            if let Some(pid) = read_pid(path) {
                if pid != own && process_alive(pid) {
                    preempt_owner(pid);
                }
            }
        }

        if path.exists() {
            match read_pid(path) {
                Some(pid) if process_alive(pid) => {
                    return Err(LockError::Held {
                        pid,
                        path: path.to_path_buf(),
                    });
                }
                Some(pid) => info!(pid, path = %path.display(), "Removing stale lock"),
                None => warn!(path = %path.display(), "Removing unreadable lock"),
            }
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(LockError::Io {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, own.to_string()).map_err(|source| LockError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(pid = own, path = %path.display(), "Instance lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock now.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if remove_if_owned(&self.path) {
            debug!(path = %self.path.display(), "Instance lock released");
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Delete the lock file at `path` if it records this process.
///
/// Returns `true` if the file was removed.
pub fn remove_if_owned(path: &Path) -> bool {
    if read_pid(path) != Some(own_pid()) {
        return false;
    }
    fs::remove_file(path).is_ok()
}

/// Whether a process with this pid exists.
///
/// Uses signal 0: only "no such process" counts as dead. Permission errors
/// mean the process exists under another user.
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs the existence and permission checks only.
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

fn preempt_owner(pid: i32) {
    info!(pid, "Stopping previous instance");
    // SAFETY: plain kill(2) on a positive pid read from the lock file.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        warn!(pid, error = %io::Error::last_os_error(), "Failed to signal previous instance");
        return;
    }

    let deadline = Instant::now() + PREEMPT_GRACE;
    while process_alive(pid) && Instant::now() < deadline {
        thread::sleep(PREEMPT_POLL);
    }
}

/// The pid recorded at `path`, or `None` when missing or garbled.
fn read_pid(path: &Path) -> Option<i32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse::<i32>().ok().filter(|pid| *pid > 0)
}

fn own_pid() -> i32 {
    std::process::id() as i32
}
