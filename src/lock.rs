use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};

const DEFAULT_POLL: Duration = Duration::from_millis(100);

/// File-backed exclusive lock guarding the shared work tree.
///
/// The lock is an advisory `flock`-style lock on `path`, so it excludes other
/// threads and other processes alike. Acquisition polls until `timeout`.
#[derive(Debug, Clone)]
pub struct WorkdirLock {
    path: PathBuf,
    timeout: Duration,
    poll: Duration,
}

/// Held lock. Unlocks on drop.
#[derive(Debug)]
pub struct WorkdirGuard {
    file: File,
    path: PathBuf,
}

impl WorkdirLock {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
            poll: DEFAULT_POLL,
        }
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the lock is held or `timeout` elapses.
    pub fn acquire(&self) -> Result<WorkdirGuard> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;

        let start = Instant::now();
        let mut logged = false;
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    debug!(
                        path = %self.path.display(),
                        waited_ms = start.elapsed().as_millis() as u64,
                        "acquired work tree lock"
                    );
                    return Ok(WorkdirGuard {
                        file,
                        path: self.path.clone(),
                    });
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    let waited = start.elapsed();
                    if waited >= self.timeout {
                        return Err(Error::LockTimeout {
                            path: self.path.clone(),
                            waited,
                        });
                    }
                    if !logged {
                        debug!(path = %self.path.display(), "work tree lock busy, waiting");
                        logged = true;
                    }
                    std::thread::sleep(self.poll.min(self.timeout - waited));
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }
}

impl Drop for WorkdirGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release work tree lock");
        } else {
            debug!(path = %self.path.display(), "released work tree lock");
        }
    }
}
