use std::os::fd::AsRawFd;
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, PollTimeout};
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use signal_hook::consts::{SIGCHLD, SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::error::Result;

/// What the control loop should do this iteration, decoded from whichever
/// signal woke it (or from the poll timing out, meaning nothing arrived
/// and it's time to check the scheduler again).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Timeout,
    ChildExited,
    ReloadRequested,
    ShutdownRequested,
}

/// Self-pipe-equivalent signal source: `signal_hook::iterator::Signals`
/// already implements Bernstein's trick (write a byte to a pipe from the
/// handler, read it back in the event loop) behind a safe API, so the
/// control loop only has to poll its file descriptor alongside its other
/// wait conditions.
pub struct SignalSource {
    signals: Signals,
}

impl SignalSource {
    pub fn new() -> Result<SignalSource> {
        let signals = Signals::new([SIGINT, SIGTERM, SIGHUP, SIGCHLD])?;
        Ok(SignalSource { signals })
    }

    /// Block until a registered signal arrives or `timeout` elapses.
    pub fn wait(&mut self, timeout: Duration) -> Result<WakeReason> {
        let fd = self.signals.as_raw_fd();
        let mut fds = [PollFd::new(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, PollFlags::POLLIN)];
        let timeout_ms: i32 = timeout.as_millis().try_into().unwrap_or(i32::MAX);
        let n = nix::poll::poll(&mut fds, PollTimeout::try_from(timeout_ms).unwrap_or(PollTimeout::MAX))?;
        if n == 0 {
            return Ok(WakeReason::Timeout);
        }
        for signal in self.signals.pending() {
            match signal {
                SIGINT | SIGTERM => return Ok(WakeReason::ShutdownRequested),
                SIGHUP => return Ok(WakeReason::ReloadRequested),
                SIGCHLD => return Ok(WakeReason::ChildExited),
                _ => {}
            }
        }
        Ok(WakeReason::Timeout)
    }
}

/// Reap any terminated children without blocking, mirroring
/// `waitpid(-1, &status, WNOHANG)` in a loop until none remain.
pub fn reap_children() -> Vec<(i32, WaitStatus)> {
    let mut reaped = Vec::new();
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(status) => {
                let pid = status.pid().map(Pid::as_raw).unwrap_or(-1);
                reaped.push((pid, status));
            }
        }
    }
    reaped
}

pub fn stop_process(pid: i32) -> Result<()> {
    nix::sys::signal::kill(Pid::from_raw(pid), Signal::SIGSTOP)?;
    Ok(())
}

pub fn resume_process(pid: i32) -> Result<()> {
    nix::sys::signal::kill(Pid::from_raw(pid), Signal::SIGCONT)?;
    Ok(())
}

pub fn terminate_process(pid: i32) -> Result<()> {
    nix::sys::signal::kill(Pid::from_raw(pid), Signal::SIGTERM)?;
    Ok(())
}
