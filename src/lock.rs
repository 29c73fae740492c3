//! Preventing two runs from using the same project at once.
use crate::error::RunError;
use anyhow::{Context, Result};
use log::{debug, warn};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// The name of the lock file in the state directory
const LOCK_FILE_NAME: &str = "run.lock";

/// A held run lock. The lock is released when this is dropped.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Take the run lock for the project whose state is kept in `state_dir`.
    ///
    /// A lock left behind by a process which is no longer running is taken over. Fails with
    /// [`RunError::RunInProgress`] if a live process holds the lock.
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir)
            .with_context(|| format!("Failed to create {}", state_dir.display()))?;
        let path = state_dir.join(LOCK_FILE_NAME);

        let mut file = loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break file,
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    let Some(pid) = stale_owner(&path) else {
                        return Err(RunError::RunInProgress { lock_path: path }.into());
                    };
                    warn!(
                        "Taking over lock file {} left by process {pid}, which is no longer running",
                        path.display()
                    );
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(err) if err.kind() == ErrorKind::NotFound => {}
                        Err(err) => {
                            return Err(err).with_context(|| {
                                format!("Failed to remove stale lock file {}", path.display())
                            });
                        }
                    }
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("Failed to create lock file {}", path.display()));
                }
            }
        };
        writeln!(file, "{}", std::process::id())
            .with_context(|| format!("Failed to write lock file {}", path.display()))?;
        debug!("Acquired run lock {}", path.display());

        Ok(Self { path })
    }

    /// The path to the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The process which left the lock file at `path`, if it is no longer running.
///
/// A lock file which can't be read or doesn't hold a process ID is assumed to belong to a run
/// which is still starting.
fn stale_owner(path: &Path) -> Option<u32> {
    let pid = fs::read_to_string(path).ok()?.trim().parse().ok()?;
    (!process_is_running(pid)).then_some(pid)
}

/// Whether a process with the given ID exists
#[cfg(unix)]
fn process_is_running(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    // EPERM means the process exists but belongs to another user
    !matches!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH))
}

/// Whether a process with the given ID exists
#[cfg(not(unix))]
fn process_is_running(_pid: u32) -> bool {
    true
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!("Could not remove lock file {}: {err}", self.path.display());
        }
    }
}
