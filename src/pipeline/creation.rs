use std::path::Path;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::hooks;
use crate::pipeline::{ChildOutcome, HookStatus};
use crate::policy;
use crate::rsync::{self, RsyncOutcome};
use crate::snapshot::{self, Snapshot};
use crate::snapshot_list::SnapshotList;

/// Drives one creation attempt: pre-hook, rsync (possibly restarted),
/// rename-to-complete, post-hook (§4.5). Owns everything the state
/// machine needs between loop iterations so the daemon's main loop stays
/// a thin dispatcher.
pub struct CreationPipeline {
    pub status: HookStatus,
    pub pid: Option<i32>,
    pub stopped: bool,
    /// `<start>` of the snapshot currently being created, or 0 when idle.
    pub current_creation_time: i64,
    pub reference_snapshot: Option<String>,
    pub last_complete_snapshot: Option<String>,
    rsync_argv: Option<Vec<String>>,
    warn_countdown: i32,
}

impl Default for CreationPipeline {
    fn default() -> Self {
        CreationPipeline {
            status: HookStatus::Ready,
            pid: None,
            stopped: false,
            current_creation_time: 0,
            reference_snapshot: None,
            last_complete_snapshot: None,
            rsync_argv: None,
            warn_countdown: 0,
        }
    }
}

impl CreationPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The creation time and the reference snapshot must never be picked
    /// as removal victims while this pipeline is active (invariants 4, 5).
    pub fn excluded_creation_times(&self) -> Vec<i64> {
        let mut excluded = Vec::new();
        if self.current_creation_time != 0 {
            excluded.push(self.current_creation_time);
        }
        if let Some(r) = &self.reference_snapshot {
            if let Some(dash) = r.find('-') {
                if let Ok(t) = r[..dash].parse() {
                    excluded.push(t);
                }
            }
        }
        excluded
    }

    /// `READY -[snapshot due]-> PRE_RUNNING | PRE_SUCCESS`.
    pub fn maybe_begin(&mut self, due: bool, cfg: &Config) -> Result<()> {
        if self.status != HookStatus::Ready || !due {
            return Ok(());
        }
        match &cfg.pre_create_hook {
            Some(hook) => {
                info!(%hook, "executing pre-create hook");
                self.pid = Some(hooks::spawn_async(hook, &[])?);
                self.status = HookStatus::PreRunning;
            }
            None => self.status = HookStatus::PreSuccess,
        }
        Ok(())
    }

    /// `PRE_RUNNING -[hook exit]-> PRE_SUCCESS | READY (deferred)`.
    pub fn on_pre_hook_exit(&mut self, outcome: ChildOutcome, now: i64, next_snapshot_time: &mut i64) {
        self.pid = None;
        match outcome {
            ChildOutcome::Exited(0) => {
                self.warn_countdown = 0;
                self.status = HookStatus::PreSuccess;
            }
            other => {
                if self.warn_countdown <= 0 {
                    warn!(?other, "pre-create hook failed, deferring snapshot creation");
                    self.warn_countdown = 60;
                } else {
                    self.warn_countdown -= 1;
                }
                *next_snapshot_time = now + 60;
                self.status = HookStatus::Ready;
            }
        }
    }

    /// `PRE_SUCCESS -> RUNNING`: pick a recycling victim and/or the
    /// `--link-dest` reference, build the rsync argv, and spawn it.
    pub fn begin_rsync(
        &mut self,
        root: &Path,
        list: &SnapshotList,
        cfg: &Config,
        now: i64,
        local_user: &str,
    ) -> Result<()> {
        self.reference_snapshot = list.newest_complete().map(|s| s.name.clone());
        let excluded = self.excluded_creation_times();
        self.current_creation_time = now;
        let incomplete = snapshot::incomplete_name(now);

        if !cfg.no_resume {
            if let Some(victim) = recycle_candidate(list, cfg.num_intervals, &excluded) {
                info!(victim = %victim.name, new_name = %incomplete, "recycling snapshot directory");
                std::fs::rename(root.join(&victim.name), root.join(&incomplete))?;
            }
        }
        info!("creating new snapshot {incomplete}");

        let argv = rsync::build_argv(cfg, self.reference_snapshot.as_deref(), &incomplete, local_user);
        let pid = spawn_argv(&argv)?;
        self.pid = Some(pid);
        self.rsync_argv = Some(argv);
        self.status = HookStatus::Running;
        Ok(())
    }

    /// `RUNNING -[rsync exit]-> SUCCESS | NEEDS_RESTART | READY`.
    pub fn on_rsync_exit(&mut self, outcome: ChildOutcome, now: i64, next_snapshot_time: &mut i64) {
        self.pid = None;
        self.stopped = false;
        let code = match outcome {
            ChildOutcome::Exited(code) => code,
            ChildOutcome::Signaled => {
                self.status = HookStatus::Ready;
                self.reference_snapshot = None;
                return;
            }
        };
        match rsync::classify_exit(code) {
            RsyncOutcome::Ok => self.status = HookStatus::Success,
            RsyncOutcome::Restartable => {
                *next_snapshot_time = now + 60;
                self.status = HookStatus::NeedsRestart;
            }
            RsyncOutcome::Fatal => {
                self.status = HookStatus::Ready;
                self.reference_snapshot = None;
            }
        }
    }

    /// `NEEDS_RESTART -[60s elapsed]-> RUNNING`, respawning the exact same
    /// argv so rsync resumes via `--link-dest` against the still-present
    /// incomplete directory.
    pub fn restart_rsync_if_due(&mut self, due: bool) -> Result<()> {
        if self.status != HookStatus::NeedsRestart || !due {
            return Ok(());
        }
        let argv = self
            .rsync_argv
            .clone()
            .expect("NEEDS_RESTART always follows a RUNNING attempt that recorded its argv");
        self.pid = Some(spawn_argv(&argv)?);
        self.status = HookStatus::Running;
        Ok(())
    }

    /// `SUCCESS -> POST_RUNNING`: rename the incomplete directory to its
    /// final complete name, busy-waiting one second if needed so the two
    /// timestamps in the name are guaranteed unique, then spawn the
    /// post-create hook.
    pub fn finish_success(&mut self, root: &Path, cfg: &Config, now_fn: impl Fn() -> i64) -> Result<()> {
        let start = self.current_creation_time;
        let mut end = now_fn();
        while end == start {
            std::thread::sleep(std::time::Duration::from_millis(200));
            end = now_fn();
        }
        let complete = snapshot::complete_name(start, end);
        std::fs::rename(root.join(snapshot::incomplete_name(start)), root.join(&complete))?;
        info!(from = %snapshot::incomplete_name(start), to = %complete, "snapshot complete");
        self.last_complete_snapshot = Some(complete.clone());
        self.reference_snapshot = None;
        self.current_creation_time = 0;
        self.rsync_argv = None;

        match &cfg.post_create_hook {
            Some(hook) => {
                self.pid = Some(hooks::spawn_async(hook, &[root.join(&complete).to_string_lossy().as_ref()])?);
                self.status = HookStatus::PostRunning;
            }
            None => self.status = HookStatus::Ready,
        }
        Ok(())
    }

    /// `POST_RUNNING -[hook exit]-> READY`, invalidating the schedule so
    /// it's recomputed against the snapshot we just finished.
    pub fn on_post_hook_exit(&mut self, next_snapshot_time: &mut i64) {
        self.pid = None;
        self.status = HookStatus::Ready;
        *next_snapshot_time = 0;
    }
}

fn spawn_argv(argv: &[String]) -> Result<i32> {
    let child = std::process::Command::new(&argv[0])
        .args(&argv[1..])
        .spawn()?;
    Ok(child.id() as i32)
}

/// Priority order from §4.5: the aborted (newest-but-incomplete) snapshot,
/// then outdated, then redundant, then orphaned.
fn recycle_candidate<'a>(
    list: &'a SnapshotList,
    num_intervals: u32,
    excluded: &[i64],
) -> Option<&'a Snapshot> {
    if let Some(newest) = list.newest() {
        if !newest.is_complete() && !excluded.contains(&newest.creation_time) {
            return Some(newest);
        }
    }
    policy::find_outdated_snapshot(list, num_intervals, excluded)
        .or_else(|| policy::find_redundant_snapshot(list, num_intervals, excluded))
        .or_else(|| policy::find_orphaned_snapshot(list, excluded))
}
