use std::fs::{self, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use crate::error::{DssError, Result};

/// Keys the system-wide mutex by a hash of the canonicalized config-file
/// path, so two daemons configured against the same `.dssrc` (hence the
/// same destination directory) can never both hold the lock, while
/// daemons for different destinations never contend.
fn lock_path(config_file: &Path) -> PathBuf {
    let canonical = fs::canonicalize(config_file).unwrap_or_else(|_| config_file.to_path_buf());
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    canonical.hash(&mut hasher);
    std::env::temp_dir().join(format!("dss-{:016x}.lock", hasher.finish()))
}

/// Held for the lifetime of a running daemon. Dropping it releases the
/// advisory lock (the OS does this automatically on fd close, same as the
/// original's SysV semaphore auto-release on process exit).
pub struct InstanceLock {
    guard: fd_lock::RwLockWriteGuard<'static, fs::File>,
}

impl InstanceLock {
    /// Acquire the lock and record our pid in counter 1's place (the file's
    /// contents), or fail with `AlreadyRunning(existing_pid)`.
    pub fn acquire(config_file: &Path) -> Result<InstanceLock> {
        let path = lock_path(config_file);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        let lock: &'static mut fd_lock::RwLock<fs::File> = Box::leak(Box::new(fd_lock::RwLock::new(file)));
        let mut guard = lock.try_write().map_err(|_| {
            DssError::AlreadyRunning(read_pid(&path).unwrap_or(0))
        })?;
        guard.set_len(0)?;
        guard.write_all(std::process::id().to_string().as_bytes())?;
        guard.flush()?;
        Ok(InstanceLock { guard })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = self.guard.set_len(0);
    }
}

fn read_pid(path: &Path) -> Option<i32> {
    let mut contents = String::new();
    OpenOptions::new().read(true).open(path).ok()?.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Returns the pid of the daemon currently holding `config_file`'s lock,
/// or `NotRunning` if the lock is free (a bare `try_write` succeeding
/// proves nobody holds it, regardless of what stale pid the file
/// contains).
pub fn get_pid(config_file: &Path) -> Result<i32> {
    let path = lock_path(config_file);
    if !path.exists() {
        return Err(DssError::NotRunning);
    }
    let file = OpenOptions::new().read(true).write(true).open(&path)?;
    let mut probe = fd_lock::RwLock::new(file);
    if probe.try_write().is_ok() {
        return Err(DssError::NotRunning);
    }
    read_pid(&path).ok_or_else(|| DssError::Bug("lock file pid unreadable".into()))
}

pub fn send_signal(config_file: &Path, sig: Signal) -> Result<()> {
    let pid = get_pid(config_file)?;
    kill(Pid::from_raw(pid), sig).map_err(DssError::Errno)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn acquire_then_acquire_again_fails() {
        let cfg = NamedTempFile::new().unwrap();
        let _first = InstanceLock::acquire(cfg.path()).unwrap();
        let second = InstanceLock::acquire(cfg.path());
        assert!(matches!(second, Err(DssError::AlreadyRunning(_))));
    }

    #[test]
    fn get_pid_fails_when_nobody_holds_the_lock() {
        let cfg = NamedTempFile::new().unwrap();
        assert!(matches!(get_pid(cfg.path()), Err(DssError::NotRunning)));
    }

    #[test]
    fn get_pid_returns_holders_pid() {
        let cfg = NamedTempFile::new().unwrap();
        let _lock = InstanceLock::acquire(cfg.path()).unwrap();
        let pid = get_pid(cfg.path()).unwrap();
        assert_eq!(pid, std::process::id() as i32);
    }
}
