use nix::unistd::{Uid, User};

use crate::config::Config;
use crate::error::{DssError, Result};
use crate::snapshot;

/// True when the source is reachable without going through rsync's
/// remote-shell transport: the configured host is `localhost`/`127.0.0.1`
/// and either no remote user was given or it matches the user we're
/// running as.
pub fn use_rsync_locally(cfg: &Config, local_user: &str) -> bool {
    if cfg.remote_host != "localhost" && cfg.remote_host != "127.0.0.1" {
        return false;
    }
    match &cfg.remote_user {
        Some(u) => u == local_user,
        None => true,
    }
}

pub fn local_username() -> Result<String> {
    match User::from_uid(Uid::current()).map_err(DssError::Errno)? {
        Some(u) => Ok(u.name),
        None => Err(DssError::Bug("current uid has no passwd entry".into())),
    }
}

/// Build the `rsync` argv for one creation attempt. `reference` is the
/// snapshot to `--link-dest` against (the newest complete snapshot),
/// `incomplete_name` is the destination directory rsync will create,
/// relative to the current (destination) directory.
pub fn build_argv(
    cfg: &Config,
    reference: Option<&str>,
    incomplete_name: &str,
    local_user: &str,
) -> Vec<String> {
    let mut argv = vec!["rsync".to_string(), "-aq".to_string(), "--delete".to_string()];
    argv.extend(cfg.rsync_options.iter().cloned());
    if let Some(patterns) = &cfg.exclude_patterns {
        argv.push("--exclude-from".to_string());
        argv.push(patterns.display().to_string());
    }
    if let Some(r) = reference {
        argv.push(format!("--link-dest=../{r}"));
    }
    if use_rsync_locally(cfg, local_user) {
        argv.push(cfg.source_dir.display().to_string());
    } else {
        let user = cfg.remote_user.as_deref().unwrap_or(local_user);
        argv.push(format!(
            "{user}@{}:{}/",
            cfg.remote_host,
            cfg.source_dir.display()
        ));
    }
    argv.push(incomplete_name.to_string());
    argv
}

/// rsync's own exit-code contract: 0 is clean, 23/24 are partial-transfer
/// warnings we treat as success, 12/13 mean the transport died and is
/// worth retrying, anything else is fatal for this attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsyncOutcome {
    Ok,
    Restartable,
    Fatal,
}

pub fn classify_exit(code: i32) -> RsyncOutcome {
    match code {
        0 | 23 | 24 => RsyncOutcome::Ok,
        12 | 13 => RsyncOutcome::Restartable,
        _ => RsyncOutcome::Fatal,
    }
}

pub fn incomplete_name(start: i64) -> String {
    snapshot::incomplete_name(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cfg() -> Config {
        Config {
            config_file: PathBuf::from("/tmp/.dssrc"),
            source_dir: PathBuf::from("/data"),
            dest_dir: PathBuf::from("/backups"),
            remote_host: "localhost".into(),
            remote_user: None,
            rsync_options: vec![],
            exclude_patterns: None,
            unit_interval_days: 1,
            num_intervals: 4,
            min_free_mb: 0,
            min_free_percent: 0.0,
            min_free_percent_inodes: 0.0,
            keep_redundant: false,
            no_resume: false,
            pre_create_hook: None,
            post_create_hook: None,
            pre_remove_hook: None,
            post_remove_hook: None,
            exit_hook: None,
            logfile: None,
            loglevel: crate::config::LogLevel::Notice,
            daemon: false,
            dry_run: false,
        }
    }

    #[test]
    fn local_source_has_no_link_dest_without_reference() {
        let argv = build_argv(&cfg(), None, "1000-incomplete", "alice");
        assert_eq!(argv, vec!["rsync", "-aq", "--delete", "/data", "1000-incomplete"]);
    }

    #[test]
    fn reference_adds_link_dest() {
        let argv = build_argv(&cfg(), Some("100-200.x-y"), "1000-incomplete", "alice");
        assert!(argv.contains(&"--link-dest=../100-200.x-y".to_string()));
    }

    #[test]
    fn remote_host_builds_user_at_host_source() {
        let mut c = cfg();
        c.remote_host = "backup.example.com".into();
        c.remote_user = Some("bob".into());
        let argv = build_argv(&c, None, "1000-incomplete", "alice");
        assert!(argv.contains(&"bob@backup.example.com:/data/".to_string()));
    }

    #[test]
    fn remote_host_falls_back_to_local_user() {
        let mut c = cfg();
        c.remote_host = "backup.example.com".into();
        let argv = build_argv(&c, None, "1000-incomplete", "alice");
        assert!(argv.contains(&"alice@backup.example.com:/data/".to_string()));
    }

    #[test]
    fn mismatched_remote_user_forces_remote_transport() {
        let mut c = cfg();
        c.remote_user = Some("bob".into());
        assert!(!use_rsync_locally(&c, "alice"));
    }

    #[test]
    fn classify_exit_codes() {
        assert_eq!(classify_exit(0), RsyncOutcome::Ok);
        assert_eq!(classify_exit(23), RsyncOutcome::Ok);
        assert_eq!(classify_exit(24), RsyncOutcome::Ok);
        assert_eq!(classify_exit(12), RsyncOutcome::Restartable);
        assert_eq!(classify_exit(13), RsyncOutcome::Restartable);
        assert_eq!(classify_exit(1), RsyncOutcome::Fatal);
    }
}
