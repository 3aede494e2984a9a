use std::path::Path;

use crate::error::Result;
use crate::snapshot::Snapshot;

/// All snapshot directories under one root, sorted ascending (oldest
/// first) by creation time, plus a per-interval count used by the
/// retention policy.
#[derive(Debug, Clone)]
pub struct SnapshotList {
    pub now: i64,
    pub snapshots: Vec<Snapshot>,
    /// `interval_count[i]` is the number of snapshots in interval `i`;
    /// `interval_count[num_intervals]` holds everything beyond that.
    pub interval_count: Vec<u32>,
}

impl SnapshotList {
    pub fn scan(root: &Path, now: i64, unit_interval_secs: i64, num_intervals: u32) -> Result<SnapshotList> {
        let mut snapshots = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(s) = Snapshot::parse(&name, now, unit_interval_secs) {
                snapshots.push(s);
            }
        }
        snapshots.sort_by_key(|s| s.creation_time);

        let mut interval_count = vec![0u32; num_intervals as usize + 1];
        for s in &snapshots {
            let bucket = s.interval.min(num_intervals) as usize;
            interval_count[bucket] += 1;
        }

        Ok(SnapshotList {
            now,
            snapshots,
            interval_count,
        })
    }

    pub fn oldest(&self) -> Option<&Snapshot> {
        self.snapshots.first()
    }

    pub fn newest(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    /// Most recently created complete snapshot, scanning from the newest
    /// end — this is the `--link-dest` reference for the next creation.
    pub fn newest_complete(&self) -> Option<&Snapshot> {
        self.snapshots.iter().rev().find(|s| {
            s.is_complete() && !s.is_being_deleted()
        })
    }

    pub fn count_in_interval(&self, interval: u32, num_intervals: u32) -> u32 {
        self.interval_count[interval.min(num_intervals) as usize]
    }
}
