use std::process::{Command, Stdio};

use shell_words::split;

use crate::error::{DssError, Result};

/// Split a hook's configured command line and append the arguments the
/// protocol for that hook passes (post-create/post-remove get the
/// snapshot path, `exit_hook` gets the error name).
fn argv(cmdline: &str, extra_args: &[&str]) -> Result<(String, Vec<String>)> {
    let mut parts = split(cmdline)
        .map_err(|e| DssError::InvalidConfig(format!("bad hook command line {cmdline:?}: {e}")))?;
    if parts.is_empty() {
        return Err(DssError::InvalidConfig(format!(
            "empty hook command line: {cmdline:?}"
        )));
    }
    let program = parts.remove(0);
    parts.extend(extra_args.iter().map(|s| s.to_string()));
    Ok((program, parts))
}

/// Spawn a hook and return its raw pid without waiting for it. Used by the
/// daemon's pipelines, which reap children asynchronously through the
/// self-pipe (`signals::reap_children`) rather than blocking here.
pub fn spawn_async(cmdline: &str, extra_args: &[&str]) -> Result<i32> {
    let (program, args) = argv(cmdline, extra_args)?;
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .spawn()?;
    Ok(child.id() as i32)
}

/// Run a hook to completion, for the `create`/`prune` one-shot commands
/// which wait synchronously for every step.
pub fn run_blocking(cmdline: &str, extra_args: &[&str]) -> Result<i32> {
    let (program, args) = argv(cmdline, extra_args)?;
    let status = subprocess::Exec::cmd(program).args(&args).join()?;
    Ok(exit_code(&status))
}

pub fn exit_code(status: &subprocess::ExitStatus) -> i32 {
    match status {
        subprocess::ExitStatus::Exited(code) => *code as i32,
        _ => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_splits_and_appends_extra_args() {
        let (program, args) = argv("/bin/sh -c 'true'", &["/snap/1000-incomplete"]).unwrap();
        assert_eq!(program, "/bin/sh");
        assert_eq!(args, vec!["-c", "true", "/snap/1000-incomplete"]);
    }

    #[test]
    fn empty_command_line_is_rejected() {
        assert!(argv("", &[]).is_err());
    }

    #[test]
    fn run_blocking_reports_exit_code() {
        let code = run_blocking("/bin/sh -c 'exit 7'", &[]).unwrap();
        assert_eq!(code, 7);
    }

    #[test]
    fn spawn_async_returns_a_live_pid() {
        let pid = spawn_async("/bin/sh -c 'sleep 0'", &[]).unwrap();
        assert!(pid > 0);
        // Reap it so the test doesn't leak a zombie.
        let _ = nix::sys::wait::waitpid(nix::unistd::Pid::from_raw(pid), None);
    }
}
