use crate::snapshot::Snapshot;
use crate::snapshot_list::SnapshotList;

/// Desired number of snapshots in `interval`: each interval holds twice as
/// many as the next-older one, so the oldest retained interval holds
/// exactly one. Intervals at or beyond `num_intervals` retain none.
pub fn desired(interval: u32, num_intervals: u32) -> u32 {
    if interval >= num_intervals {
        return 0;
    }
    1u32 << (num_intervals - interval - 1)
}

/// A snapshot is off-limits to every selection function if it's already
/// being deleted, or if its creation time matches one of `excluded` — the
/// in-progress creation and the `--link-dest` reference snapshot, per
/// invariants 4 and 5.
fn removable(s: &Snapshot, excluded: &[i64]) -> bool {
    if s.is_being_deleted() {
        return false;
    }
    !excluded.contains(&s.creation_time)
}

/// A snapshot whose interval is past the last retained interval — it no
/// longer fits any bucket of the geometric schedule and is removed first,
/// regardless of how full its (nonexistent) bucket is.
pub fn find_outdated_snapshot<'a>(
    list: &'a SnapshotList,
    num_intervals: u32,
    excluded: &[i64],
) -> Option<&'a Snapshot> {
    list.snapshots
        .iter()
        .filter(|s| s.is_complete())
        .filter(|s| removable(s, excluded))
        .find(|s| s.interval >= num_intervals)
}

/// A snapshot whose interval holds more copies than the policy wants.
///
/// Scans intervals from the oldest (`num_intervals - 1`) down to the
/// newest (`0`), carrying a running `missing` count forward: an interval
/// that is under its quota adds its shortfall to `missing`, which then
/// lets a later (newer) interval run over its own quota by that much
/// before being flagged redundant. This is the accumulator from the
/// original selection algorithm, not a per-interval-only comparison —
/// without it an old, sparsely-populated interval would never let a
/// younger, over-full one borrow its spare capacity.
///
/// Within an over-full interval we remove whichever adjacent pair sits
/// closest together in time, dropping the newer of the two — this keeps
/// the surviving snapshots as evenly spread across the interval as
/// possible instead of always shaving off one end.
pub fn find_redundant_snapshot<'a>(
    list: &'a SnapshotList,
    num_intervals: u32,
    excluded: &[i64],
) -> Option<&'a Snapshot> {
    let mut missing: u32 = 0;
    for interval in (0..num_intervals).rev() {
        let keep = desired(interval, num_intervals);
        let actual = list.count_in_interval(interval, num_intervals);
        if keep >= actual {
            missing += keep - actual;
        }
        if keep + missing >= actual {
            continue;
        }
        let bucket: Vec<&Snapshot> = list
            .snapshots
            .iter()
            .filter(|s| removable(s, excluded))
            .filter(|s| s.interval == interval)
            .collect();
        let mut best: Option<(&Snapshot, i64)> = None;
        for pair in bucket.windows(2) {
            let gap = pair[1].creation_time - pair[0].creation_time;
            if best.map(|(_, g)| gap < g).unwrap_or(true) {
                best = Some((pair[1], gap));
            }
        }
        let victim = best.map(|(v, _)| v).or_else(|| bucket.first().copied());
        if let Some(victim) = victim {
            return list.snapshots.iter().find(|s| s.name == victim.name);
        }
    }
    None
}

/// Either a `being_deleted` directory whose `rm` isn't running (evidence
/// of a past aborted remove), or an incomplete snapshot that isn't the
/// one the creation pipeline is currently working on — left behind by a
/// daemon that died mid-creation.
pub fn find_orphaned_snapshot<'a>(
    list: &'a SnapshotList,
    excluded: &[i64],
) -> Option<&'a Snapshot> {
    list.snapshots
        .iter()
        .filter(|s| s.is_being_deleted() || !s.is_complete())
        .find(|s| !excluded.contains(&s.creation_time))
}

/// Last-resort victim when disk space is low and nothing is outdated,
/// redundant, or orphaned: simply the oldest removable snapshot.
pub fn find_oldest_removable_snapshot<'a>(
    list: &'a SnapshotList,
    excluded: &[i64],
) -> Option<&'a Snapshot> {
    list.snapshots.iter().find(|s| removable(s, excluded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotFlags;

    fn snap(creation_time: i64, interval: u32, flags: SnapshotFlags) -> Snapshot {
        Snapshot {
            name: format!("{creation_time}-x"),
            creation_time,
            completion_time: if flags.contains(SnapshotFlags::COMPLETE) {
                creation_time + 10
            } else {
                -1
            },
            flags,
            interval,
        }
    }

    fn list(snapshots: Vec<Snapshot>, num_intervals: u32) -> SnapshotList {
        let mut interval_count = vec![0u32; num_intervals as usize + 1];
        for s in &snapshots {
            interval_count[s.interval.min(num_intervals) as usize] += 1;
        }
        SnapshotList {
            now: 1_000_000,
            snapshots,
            interval_count,
        }
    }

    #[test]
    fn desired_halves_each_interval_out() {
        assert_eq!(desired(0, 3), 4);
        assert_eq!(desired(1, 3), 2);
        assert_eq!(desired(2, 3), 1);
        assert_eq!(desired(3, 3), 0);
        assert_eq!(desired(99, 3), 0);
    }

    #[test]
    fn outdated_is_past_last_interval() {
        let l = list(
            vec![
                snap(100, 0, SnapshotFlags::COMPLETE),
                snap(200, 5, SnapshotFlags::COMPLETE),
            ],
            3,
        );
        let outdated = find_outdated_snapshot(&l, 3, &[]).unwrap();
        assert_eq!(outdated.creation_time, 200);
    }

    #[test]
    fn redundant_picks_closest_pair() {
        let l = list(
            vec![
                snap(100, 0, SnapshotFlags::COMPLETE),
                snap(110, 0, SnapshotFlags::COMPLETE),
                snap(500, 0, SnapshotFlags::COMPLETE),
            ],
            1,
        );
        // desired(0, 1) == 1, bucket has 3 -> redundant.
        let victim = find_redundant_snapshot(&l, 1, &[]).unwrap();
        assert_eq!(victim.creation_time, 110);
    }

    #[test]
    fn redundant_none_when_within_budget() {
        let l = list(vec![snap(100, 0, SnapshotFlags::COMPLETE)], 1);
        assert!(find_redundant_snapshot(&l, 1, &[]).is_none());
    }

    #[test]
    fn redundant_carries_shortfall_from_older_interval() {
        // num_intervals=2: desired(0)=2, desired(1)=1. Interval 1 (older)
        // is short by one (0 instead of 1), which must let interval 0 run
        // one over its own quota of 2 before being flagged.
        let l = list(
            vec![
                snap(100, 0, SnapshotFlags::COMPLETE),
                snap(110, 0, SnapshotFlags::COMPLETE),
                snap(120, 0, SnapshotFlags::COMPLETE),
            ],
            2,
        );
        assert!(find_redundant_snapshot(&l, 2, &[]).is_none());
    }

    #[test]
    fn redundant_flags_once_shortfall_budget_exhausted() {
        // Same setup but interval 0 now has 4 snapshots: desired(0)=2 plus
        // the 1 borrowed from interval 1's shortfall still isn't enough.
        let l = list(
            vec![
                snap(100, 0, SnapshotFlags::COMPLETE),
                snap(110, 0, SnapshotFlags::COMPLETE),
                snap(120, 0, SnapshotFlags::COMPLETE),
                snap(130, 0, SnapshotFlags::COMPLETE),
            ],
            2,
        );
        let victim = find_redundant_snapshot(&l, 2, &[]).unwrap();
        assert_eq!(victim.creation_time, 110);
    }

    #[test]
    fn orphaned_is_incomplete_and_not_current() {
        let l = list(
            vec![snap(100, 0, SnapshotFlags::empty()), snap(200, 0, SnapshotFlags::empty())],
            3,
        );
        let orphan = find_orphaned_snapshot(&l, &[200]).unwrap();
        assert_eq!(orphan.creation_time, 100);
    }

    #[test]
    fn orphaned_excludes_in_progress_creation() {
        let l = list(vec![snap(100, 0, SnapshotFlags::empty())], 3);
        assert!(find_orphaned_snapshot(&l, &[100]).is_none());
    }

    #[test]
    fn orphaned_includes_being_deleted_snapshots() {
        let l = list(
            vec![snap(100, 0, SnapshotFlags::COMPLETE | SnapshotFlags::BEING_DELETED)],
            3,
        );
        let orphan = find_orphaned_snapshot(&l, &[]).unwrap();
        assert_eq!(orphan.creation_time, 100);
    }

    #[test]
    fn excluded_list_skips_both_current_and_reference() {
        let l = list(
            vec![
                snap(100, 5, SnapshotFlags::COMPLETE),
                snap(200, 5, SnapshotFlags::COMPLETE),
            ],
            3,
        );
        assert!(find_outdated_snapshot(&l, 3, &[100, 200]).is_none());
    }

    #[test]
    fn oldest_removable_skips_being_deleted() {
        let l = list(
            vec![
                snap(100, 0, SnapshotFlags::COMPLETE | SnapshotFlags::BEING_DELETED),
                snap(200, 0, SnapshotFlags::COMPLETE),
            ],
            3,
        );
        let victim = find_oldest_removable_snapshot(&l, &[]).unwrap();
        assert_eq!(victim.creation_time, 200);
    }
}
