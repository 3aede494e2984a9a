use crate::policy::desired;
use crate::snapshot_list::SnapshotList;

/// Average `completion_time - creation_time` over every complete
/// snapshot currently on disk, or `0` if there are none. Recomputed from
/// a fresh scan each time rather than tracked incrementally in memory,
/// so a freshly restarted daemon schedules identically to one that has
/// been running for weeks — the history lives on disk, not in process
/// state.
pub fn average_creation_duration(list: &SnapshotList) -> i64 {
    let mut total = 0i64;
    let mut count = 0i64;
    for s in &list.snapshots {
        if s.is_complete() {
            total += s.completion_time - s.creation_time;
            count += 1;
        }
    }
    if count == 0 {
        0
    } else {
        total / count
    }
}

/// `next = last_complete.completion_time + U/W - x`
///
/// `U` is the span of the newest interval in seconds
/// (`unit_interval_days * 86400`), `W` is how many snapshots that interval
/// should hold (`desired(0, num_intervals)`), and `x` is the average
/// historical creation duration — starting the next snapshot slightly
/// early compensates for how long creation itself takes. If the budget
/// `U` can't even cover `x * W` (creation alone would eat the whole
/// interval `W` times over), the schedule can't keep up and the next
/// snapshot is due immediately.
pub fn next_snapshot_time(list: &SnapshotList, unit_interval_days: i64, num_intervals: u32) -> i64 {
    let Some(last) = list.snapshots.iter().rev().find(|s| s.is_complete()) else {
        return list.now;
    };
    let x = average_creation_duration(list);
    let unit_interval_secs = unit_interval_days * 86_400;
    let w = desired(0, num_intervals).max(1) as i64;
    if unit_interval_secs < x * w {
        return list.now;
    }
    last.completion_time + unit_interval_secs / w - x
}

pub fn next_snapshot_is_due(list: &SnapshotList, unit_interval_days: i64, num_intervals: u32) -> bool {
    list.now >= next_snapshot_time(list, unit_interval_days, num_intervals)
}
