use std::fmt::Write as _;

use crate::snapshot_list::SnapshotList;

/// Renders the `ls` command's output: one line per snapshot, oldest first,
/// as `<interval>\t<name>\t<H>:<MM>` where `H:MM` is the creation duration
/// (floor-divided minutes, split into hours and minutes) for complete
/// snapshots, and `0:00` for anything still incomplete.
pub fn format_ls(list: &SnapshotList) -> String {
    let mut out = String::new();
    for s in &list.snapshots {
        let minutes = if s.is_complete() {
            (s.completion_time - s.creation_time) / 60
        } else {
            0
        };
        let hours = minutes / 60;
        let mins = minutes % 60;
        let _ = writeln!(out, "{}\t{}\t{:3}:{:02}", s.interval, s.name, hours, mins);
    }
    out
}

pub fn print_ls(list: &SnapshotList) {
    print!("{}", format_ls(list));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Snapshot, SnapshotFlags};

    fn list(snapshots: Vec<Snapshot>) -> SnapshotList {
        SnapshotList {
            now: 1_000_000,
            snapshots,
            interval_count: vec![0; 5],
        }
    }

    #[test]
    fn complete_snapshot_shows_creation_duration() {
        let s = Snapshot {
            name: "100-3820.x-y".into(),
            creation_time: 100,
            completion_time: 3820, // 3720s = 62 minutes -> 1:02
            flags: SnapshotFlags::COMPLETE,
            interval: 2,
        };
        let out = format_ls(&list(vec![s]));
        assert_eq!(out, "2\t100-3820.x-y\t  1:02\n");
    }

    #[test]
    fn incomplete_snapshot_shows_zero_duration() {
        let s = Snapshot {
            name: "100-incomplete".into(),
            creation_time: 100,
            completion_time: -1,
            flags: SnapshotFlags::empty(),
            interval: 0,
        };
        let out = format_ls(&list(vec![s]));
        assert_eq!(out, "0\t100-incomplete\t  0:00\n");
    }

    #[test]
    fn multiple_snapshots_print_oldest_first() {
        let a = Snapshot {
            name: "100-200.x-y".into(),
            creation_time: 100,
            completion_time: 200,
            flags: SnapshotFlags::COMPLETE,
            interval: 0,
        };
        let b = Snapshot {
            name: "300-400.x-y".into(),
            creation_time: 300,
            completion_time: 400,
            flags: SnapshotFlags::COMPLETE,
            interval: 0,
        };
        let out = format_ls(&list(vec![a, b]));
        let mut lines = out.lines();
        assert!(lines.next().unwrap().contains("100-200.x-y"));
        assert!(lines.next().unwrap().contains("300-400.x-y"));
    }
}
