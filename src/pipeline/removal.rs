use std::path::Path;

use tracing::{error, info};

use crate::config::Config;
use crate::error::Result;
use crate::hooks;
use crate::pipeline::{ChildOutcome, HookStatus};
use crate::snapshot::{self, Snapshot};

/// Drives one removal: pre-hook, rename-to-`being_deleted`, `rm -rf`,
/// post-hook (§4.6). Only one removal pipeline runs system-wide, enforced
/// by the control loop never starting a second one while this is busy.
#[derive(Default)]
pub struct RemovalPipeline {
    pub status: HookStatus,
    pub pid: Option<i32>,
    /// A copy of the snapshot under removal; kept so the pipeline survives
    /// a rename (the list on disk changes shape under it) and so the
    /// controller knows which snapshot not to pick again.
    pub victim: Option<Snapshot>,
}

impl RemovalPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.status != HookStatus::Ready
    }

    /// `READY -[victim chosen]-> PRE_RUNNING | PRE_SUCCESS`.
    pub fn begin(&mut self, victim: Snapshot, cfg: &Config) -> Result<()> {
        self.victim = Some(victim);
        match &cfg.pre_remove_hook {
            Some(hook) => {
                let path = self.victim.as_ref().unwrap().name.clone();
                info!(%hook, snapshot = %path, "executing pre-remove hook");
                self.pid = Some(hooks::spawn_async(hook, &[&path])?);
                self.status = HookStatus::PreRunning;
            }
            None => self.status = HookStatus::PreSuccess,
        }
        Ok(())
    }

    /// `PRE_RUNNING -[hook exit]-> PRE_SUCCESS | READY`.
    pub fn on_pre_hook_exit(&mut self, outcome: ChildOutcome, now: i64, next_removal_check: &mut i64) {
        self.pid = None;
        match outcome {
            ChildOutcome::Exited(0) => self.status = HookStatus::PreSuccess,
            _ => {
                *next_removal_check = now + 60;
                self.victim = None;
                self.status = HookStatus::Ready;
            }
        }
    }

    /// `PRE_SUCCESS -> RUNNING`: rename the victim to its `being_deleted`
    /// name (so a crashed `rm` leaves unambiguous on-disk evidence) and
    /// spawn `rm -rf` on the renamed path.
    pub fn begin_rm(&mut self, root: &Path) -> Result<()> {
        let victim = self.victim.as_mut().expect("begin_rm requires a chosen victim");
        let renamed = if victim.is_being_deleted() {
            victim.name.clone()
        } else {
            let renamed = snapshot::being_deleted_name(victim);
            std::fs::rename(root.join(&victim.name), root.join(&renamed))?;
            victim.name = renamed.clone();
            renamed
        };
        self.pid = Some(spawn_rm(&root.join(&renamed))?);
        self.status = HookStatus::Running;
        Ok(())
    }

    /// `RUNNING -[rm exit]-> SUCCESS | READY`.
    pub fn on_rm_exit(&mut self, outcome: ChildOutcome) {
        self.pid = None;
        match outcome {
            ChildOutcome::Exited(0) => self.status = HookStatus::Success,
            other => {
                error!(?other, "rm failed");
                self.victim = None;
                self.status = HookStatus::Ready;
            }
        }
    }

    /// `SUCCESS -> POST_RUNNING`.
    pub fn begin_post_hook(&mut self, cfg: &Config) -> Result<()> {
        match &cfg.post_remove_hook {
            Some(hook) => {
                let path = self.victim.as_ref().expect("post-remove hook needs the victim name").name.clone();
                self.pid = Some(hooks::spawn_async(hook, &[&path])?);
                self.status = HookStatus::PostRunning;
            }
            None => {
                self.victim = None;
                self.status = HookStatus::Ready;
            }
        }
        Ok(())
    }

    /// `POST_RUNNING -[hook exit]-> READY`.
    pub fn on_post_hook_exit(&mut self) {
        self.pid = None;
        self.victim = None;
        self.status = HookStatus::Ready;
    }
}

fn spawn_rm(path: &Path) -> Result<i32> {
    let child = std::process::Command::new("rm")
        .arg("-rf")
        .arg(path)
        .spawn()?;
    Ok(child.id() as i32)
}
