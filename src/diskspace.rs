use std::path::Path;

use nix::sys::statvfs::statvfs;

use crate::error::{DssError, Result};

/// Snapshot of free-space figures for the filesystem backing the snapshot
/// root, gathered the way the original's disk-space sensor reads
/// `statvfs(2)`.
#[derive(Debug, Clone, Copy)]
pub struct DiskSpace {
    pub free_mb: u64,
    pub free_percent: f64,
    pub free_inode_percent: f64,
}

impl DiskSpace {
    pub fn read(path: &Path) -> Result<DiskSpace> {
        let vfs = statvfs(path).map_err(DssError::Errno)?;
        let block_size = vfs.fragment_size().max(1);
        let free_bytes = vfs.blocks_available() as u64 * block_size as u64;
        let total_bytes = vfs.blocks() as u64 * block_size as u64;
        let free_percent = if total_bytes == 0 {
            100.0
        } else {
            free_bytes as f64 * 100.0 / total_bytes as f64
        };
        let total_inodes = vfs.files() as u64;
        let free_inodes = vfs.files_available() as u64;
        let free_inode_percent = if total_inodes == 0 {
            100.0
        } else {
            free_inodes as f64 * 100.0 / total_inodes as f64
        };
        Ok(DiskSpace {
            free_mb: free_bytes / (1024 * 1024),
            free_percent,
            free_inode_percent,
        })
    }

    /// True once any configured threshold is breached — the disk-space
    /// sensor treats `0` as "this threshold is disabled".
    pub fn is_low(&self, min_free_mb: u64, min_free_percent: f64, min_free_inode_percent: f64) -> bool {
        (min_free_mb > 0 && self.free_mb < min_free_mb)
            || (min_free_percent > 0.0 && self.free_percent < min_free_percent)
            || (min_free_inode_percent > 0.0 && self.free_inode_percent < min_free_inode_percent)
    }
}
