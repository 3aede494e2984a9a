use std::path::PathBuf;

/// Stable, scriptable error kind. `name()` is the identifier logged and
/// returned to callers of `kill`/`reload`/`create`/`prune` — it must never
/// change once released, regardless of how the display message is worded.
#[derive(Debug, thiserror::Error)]
pub enum DssError {
    #[error("daemon is not running")]
    NotRunning,

    #[error("daemon is already running (pid {0})")]
    AlreadyRunning(i32),

    #[error("failed to acquire instance lock at {0}")]
    LockFailed(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("rsync exited with status {0}")]
    RsyncFailed(i32),

    #[error("hook {name} exited with status {status}")]
    HookFailed { name: String, status: i32 },

    #[error("no such snapshot: {0}")]
    NoSuchSnapshot(String),

    #[error("disk space too low: {0}")]
    DiskSpaceLow(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("system call failed: {0}")]
    Errno(#[from] nix::Error),

    #[error("terminated by signal")]
    Terminated,

    #[error("invariant violated: {0}")]
    Bug(String),

    #[error(transparent)]
    Exec(#[from] subprocess::PopenError),
}

impl DssError {
    /// Stable textual name, independent of the `Display` wording above.
    pub fn name(&self) -> &'static str {
        match self {
            DssError::NotRunning => "NOT_RUNNING",
            DssError::AlreadyRunning(_) => "ALREADY_RUNNING",
            DssError::LockFailed(_) => "LOCK_FAILED",
            DssError::InvalidConfig(_) => "INVALID_CONFIG",
            DssError::RsyncFailed(_) => "RSYNC_FAILED",
            DssError::HookFailed { .. } => "HOOK_FAILED",
            DssError::NoSuchSnapshot(_) => "NO_SUCH_SNAPSHOT",
            DssError::DiskSpaceLow(_) => "DISK_SPACE_LOW",
            DssError::Io(_) => "IO",
            DssError::Errno(_) => "ERRNO",
            DssError::Terminated => "SIGNAL",
            DssError::Bug(_) => "BUG",
            DssError::Exec(_) => "EXEC",
        }
    }
}

pub type Result<T> = std::result::Result<T, DssError>;
