pub mod creation;
pub mod removal;

/// Shared by both pipelines (§4 HookStatus). Each pipeline instantiates
/// its own independent copy — the creation and removal state machines
/// never share a value of this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookStatus {
    #[default]
    Ready,
    PreRunning,
    PreSuccess,
    Running,
    Success,
    NeedsRestart,
    PostRunning,
}

/// What a reaped child told us. `Signaled` covers both being killed by a
/// signal and any other non-`WIFEXITED` outcome the original lumps
/// together as `E_INVOLUNTARY_EXIT`.
#[derive(Debug, Clone, Copy)]
pub enum ChildOutcome {
    Exited(i32),
    Signaled,
}
