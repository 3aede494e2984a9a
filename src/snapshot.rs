use std::fmt;

use bitflags::bitflags;
use chrono::{Local, TimeZone};

bitflags! {
    /// `complete, not being deleted: 1204565370-1204565371.Sun_Mar_02_2008_14_33-...`
    /// `complete, being deleted: 1204565370-1204565371.being_deleted`
    /// `incomplete, not being deleted: 1204565370-incomplete`
    /// `incomplete, being deleted: 1204565370-incomplete.being_deleted`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SnapshotFlags: u8 {
        const COMPLETE = 1;
        const BEING_DELETED = 2;
    }
}

/// One directory under the snapshot root, parsed from its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub name: String,
    pub creation_time: i64,
    /// `-1` when the snapshot is incomplete.
    pub completion_time: i64,
    pub flags: SnapshotFlags,
    pub interval: u32,
}

impl Snapshot {
    pub fn is_complete(&self) -> bool {
        self.flags.contains(SnapshotFlags::COMPLETE)
    }

    pub fn is_being_deleted(&self) -> bool {
        self.flags.contains(SnapshotFlags::BEING_DELETED)
    }

    /// Parse a directory name into a `Snapshot`, computing its interval
    /// bucket against `now` and `unit_interval_secs`. Returns `None` for any
    /// name that isn't a well-formed snapshot directory — non-snapshot
    /// entries under the root are silently skipped by the caller, matching
    /// the original scanner's tolerance of stray files.
    pub fn parse(dirname: &str, now: i64, unit_interval_secs: i64) -> Option<Snapshot> {
        let dash = dirname.find('-')?;
        if dash == 0 {
            return None;
        }
        let (head, rest) = dirname.split_at(dash);
        let rest = &rest[1..];
        if rest.is_empty() || !head.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let creation_time: i64 = head.parse().ok()?;
        if creation_time > now {
            return None;
        }
        let interval = ((now - creation_time) / unit_interval_secs).max(0) as u32;

        if rest == "incomplete" {
            return Some(Snapshot {
                name: dirname.to_string(),
                creation_time,
                completion_time: -1,
                flags: SnapshotFlags::empty(),
                interval,
            });
        }
        if rest == "incomplete.being_deleted" {
            return Some(Snapshot {
                name: dirname.to_string(),
                creation_time,
                completion_time: -1,
                flags: SnapshotFlags::BEING_DELETED,
                interval,
            });
        }

        let dot = rest.find('.')?;
        if dot == 0 {
            return None;
        }
        let (comp_head, comp_rest) = rest.split_at(dot);
        let comp_rest = &comp_rest[1..];
        if comp_rest.is_empty() || !comp_head.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let completion_time: i64 = comp_head.parse().ok()?;
        if completion_time > now || completion_time < creation_time {
            return None;
        }
        let mut flags = SnapshotFlags::COMPLETE;
        if comp_rest == "being_deleted" {
            flags |= SnapshotFlags::BEING_DELETED;
        }
        Some(Snapshot {
            name: dirname.to_string(),
            creation_time,
            completion_time,
            flags,
            interval,
        })
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

pub fn incomplete_name(start: i64) -> String {
    format!("{start}-incomplete")
}

pub fn being_deleted_name(s: &Snapshot) -> String {
    if s.is_complete() {
        format!("{}-{}.being_deleted", s.creation_time, s.completion_time)
    } else {
        format!("{}-incomplete.being_deleted", s.creation_time)
    }
}

/// Decorative human-readable suffix, e.g. `Sun_Mar_02_2008_14_33_00`. Never
/// parsed back: only the numeric `<start>-<end>` prefix is authoritative.
fn strftime_suffix(epoch_secs: i64) -> String {
    Local
        .timestamp_opt(epoch_secs, 0)
        .single()
        .map(|dt| dt.format("%a_%b_%d_%Y_%H_%M_%S").to_string())
        .unwrap_or_else(|| epoch_secs.to_string())
}

pub fn complete_name(start: i64, end: i64) -> String {
    format!(
        "{start}-{end}.{}-{}",
        strftime_suffix(start),
        strftime_suffix(end)
    )
}
