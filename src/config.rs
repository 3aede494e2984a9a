use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};

use crate::error::{DssError, Result};

/// Command-line surface. All of the plain options double as config-file
/// overrides: whatever the user passes on the command line wins over the
/// same key in `.dssrc`, matching gengetopt's override-on-reparse
/// semantics the original used for `SIGHUP`.
#[derive(Parser, Debug, Clone)]
#[command(name = "dssd", version, about = "rsync snapshot scheduling daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Explicit config file path. Defaults to `$HOME/.dssrc`.
    #[arg(long, global = true)]
    pub config_file: Option<PathBuf>,

    #[arg(long, global = true)]
    pub source_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    pub dest_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    pub remote_host: Option<String>,
    #[arg(long, global = true)]
    pub remote_user: Option<String>,
    #[arg(long = "rsync-option", global = true)]
    pub rsync_options: Vec<String>,
    #[arg(long, global = true)]
    pub exclude_patterns: Option<PathBuf>,
    #[arg(long, global = true)]
    pub unit_interval: Option<u32>,
    #[arg(long, global = true)]
    pub num_intervals: Option<u32>,
    #[arg(long, global = true)]
    pub min_free_mb: Option<u64>,
    #[arg(long, global = true)]
    pub min_free_percent: Option<f64>,
    #[arg(long, global = true)]
    pub min_free_percent_inodes: Option<f64>,
    #[arg(long, global = true)]
    pub keep_redundant: bool,
    #[arg(long, global = true)]
    pub no_resume: bool,
    #[arg(long, global = true)]
    pub pre_create_hook: Option<String>,
    #[arg(long, global = true)]
    pub post_create_hook: Option<String>,
    #[arg(long, global = true)]
    pub pre_remove_hook: Option<String>,
    #[arg(long, global = true)]
    pub post_remove_hook: Option<String>,
    #[arg(long, global = true)]
    pub exit_hook: Option<String>,
    #[arg(long, global = true)]
    pub logfile: Option<PathBuf>,
    #[arg(long, global = true, value_enum)]
    pub loglevel: Option<LogLevel>,
    #[arg(long, global = true)]
    pub daemon: bool,
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Print every snapshot and its retention interval.
    Ls,
    /// Perform one full creation cycle and wait for it to finish.
    Create,
    /// Remove outdated and redundant snapshots until none remain.
    Prune,
    /// Enter the daemon control loop.
    Run,
    /// Ask the running daemon (identified by `config_file`) to terminate.
    Kill,
    /// Ask the running daemon to reload its configuration.
    Reload,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Crit,
    Alert,
    Emerg,
}

/// Fully resolved configuration: config file merged with CLI overrides and
/// validated. The daemon's control loop only ever reads from a `Config`
/// that has already passed [`Config::validate`].
#[derive(Debug, Clone)]
pub struct Config {
    pub config_file: PathBuf,
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
    pub remote_host: String,
    pub remote_user: Option<String>,
    pub rsync_options: Vec<String>,
    pub exclude_patterns: Option<PathBuf>,
    pub unit_interval_days: u32,
    pub num_intervals: u32,
    pub min_free_mb: u64,
    pub min_free_percent: f64,
    pub min_free_percent_inodes: f64,
    pub keep_redundant: bool,
    pub no_resume: bool,
    pub pre_create_hook: Option<String>,
    pub post_create_hook: Option<String>,
    pub pre_remove_hook: Option<String>,
    pub post_remove_hook: Option<String>,
    pub exit_hook: Option<String>,
    pub logfile: Option<PathBuf>,
    pub loglevel: LogLevel,
    pub daemon: bool,
    pub dry_run: bool,
}

/// `key = value` lines, `#` comments, blank lines ignored. Keys may repeat
/// (`rsync_option` is given once per extra rsync flag); later occurrences
/// of a single-valued key override earlier ones, matching gengetopt's
/// config-file-then-override-on-SIGHUP behavior.
fn parse_entries(path: &Path) -> Result<Vec<(String, String)>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path)?;
    let mut entries = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => match line.split_once(char::is_whitespace) {
                Some((k, v)) => (k.trim(), v.trim()),
                None => continue,
            },
        };
        entries.push((key.to_string(), value.to_string()));
    }
    Ok(entries)
}

pub fn default_config_file() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DssError::InvalidConfig("could not determine home directory".into()))?;
    Ok(home.join(".dssrc"))
}

impl Config {
    pub fn load(cli: &Cli) -> Result<Config> {
        let config_file = match &cli.config_file {
            Some(p) => p.clone(),
            None => default_config_file()?,
        };
        let entries = parse_entries(&config_file)?;
        let get = |key: &str| -> Option<String> {
            entries.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        };
        let get_all = |key: &str| -> Vec<String> {
            entries.iter().filter(|(k, _)| k == key).map(|(_, v)| v.clone()).collect()
        };
        let parse_num = |key: &str| -> Result<Option<u32>> {
            match get(key) {
                None => Ok(None),
                Some(v) => v
                    .parse()
                    .map(Some)
                    .map_err(|_| DssError::InvalidConfig(format!("{key}: not a number: {v}"))),
            }
        };
        let parse_f64 = |key: &str| -> Result<Option<f64>> {
            match get(key) {
                None => Ok(None),
                Some(v) => v
                    .parse()
                    .map(Some)
                    .map_err(|_| DssError::InvalidConfig(format!("{key}: not a number: {v}"))),
            }
        };

        let source_dir = cli
            .source_dir
            .clone()
            .or_else(|| get("source_dir").map(PathBuf::from))
            .ok_or_else(|| DssError::InvalidConfig("source_dir is required".into()))?;
        let dest_dir = cli
            .dest_dir
            .clone()
            .or_else(|| get("dest_dir").map(PathBuf::from))
            .ok_or_else(|| DssError::InvalidConfig("dest_dir is required".into()))?;
        let remote_host = cli
            .remote_host
            .clone()
            .or_else(|| get("remote_host"))
            .unwrap_or_else(|| "localhost".to_string());
        let remote_user = cli.remote_user.clone().or_else(|| get("remote_user"));

        let mut rsync_options = get_all("rsync_option");
        rsync_options.extend(cli.rsync_options.iter().cloned());

        let exclude_patterns = cli
            .exclude_patterns
            .clone()
            .or_else(|| get("exclude_patterns").map(PathBuf::from));

        let unit_interval_days = cli
            .unit_interval
            .or(parse_num("unit_interval")?)
            .unwrap_or(7);
        let num_intervals = cli.num_intervals.or(parse_num("num_intervals")?).unwrap_or(14);
        let min_free_mb = cli
            .min_free_mb
            .map(Some)
            .unwrap_or(match get("min_free_mb") {
                None => None,
                Some(v) => Some(
                    v.parse()
                        .map_err(|_| DssError::InvalidConfig(format!("min_free_mb: {v}")))?,
                ),
            })
            .unwrap_or(0);
        let min_free_percent = cli.min_free_percent.or(parse_f64("min_free_percent")?).unwrap_or(0.0);
        let min_free_percent_inodes = cli
            .min_free_percent_inodes
            .or(parse_f64("min_free_percent_inodes")?)
            .unwrap_or(0.0);

        let keep_redundant = cli.keep_redundant || get("keep_redundant").is_some();
        let no_resume = cli.no_resume || get("no_resume").is_some();

        let pre_create_hook = cli.pre_create_hook.clone().or_else(|| get("pre_create_hook"));
        let post_create_hook = cli.post_create_hook.clone().or_else(|| get("post_create_hook"));
        let pre_remove_hook = cli.pre_remove_hook.clone().or_else(|| get("pre_remove_hook"));
        let post_remove_hook = cli.post_remove_hook.clone().or_else(|| get("post_remove_hook"));
        let exit_hook = cli.exit_hook.clone().or_else(|| get("exit_hook"));

        let logfile = cli.logfile.clone().or_else(|| get("logfile").map(PathBuf::from));
        let loglevel = cli.loglevel.unwrap_or(match get("loglevel").as_deref() {
            Some("DEBUG") => LogLevel::Debug,
            Some("INFO") => LogLevel::Info,
            Some("NOTICE") => LogLevel::Notice,
            Some("WARNING") => LogLevel::Warning,
            Some("ERROR") => LogLevel::Error,
            Some("CRIT") => LogLevel::Crit,
            Some("ALERT") => LogLevel::Alert,
            Some("EMERG") => LogLevel::Emerg,
            _ => LogLevel::Notice,
        });
        let daemon = cli.daemon || get("daemon").is_some();
        let dry_run = cli.dry_run || get("dry_run").is_some();

        let config = Config {
            config_file,
            source_dir,
            dest_dir,
            remote_host,
            remote_user,
            rsync_options,
            exclude_patterns,
            unit_interval_days,
            num_intervals,
            min_free_mb,
            min_free_percent,
            min_free_percent_inodes,
            keep_redundant,
            no_resume,
            pre_create_hook,
            post_create_hook,
            pre_remove_hook,
            post_remove_hook,
            exit_hook,
            logfile,
            loglevel,
            daemon,
            dry_run,
        };
        config.validate()?;
        Ok(config)
    }

    /// Re-read the config file in place (`SIGHUP`). CLI overrides from the
    /// original invocation still win, and `daemon`/`logfile` are frozen —
    /// they can't change at runtime (§5).
    pub fn reload(&self, cli: &Cli) -> Result<Config> {
        let mut fresh = Config::load(cli)?;
        fresh.daemon = self.daemon;
        fresh.logfile = self.logfile.clone();
        Ok(fresh)
    }

    pub fn validate(&self) -> Result<()> {
        if self.unit_interval_days == 0 {
            return Err(DssError::InvalidConfig(format!(
                "bad unit interval: {}",
                self.unit_interval_days
            )));
        }
        if self.num_intervals == 0 || self.num_intervals > 30 {
            return Err(DssError::InvalidConfig(format!(
                "bad number of intervals: {}",
                self.num_intervals
            )));
        }
        Ok(())
    }

    pub fn unit_interval_secs(&self) -> i64 {
        self.unit_interval_days as i64 * 86_400
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, contents: &str) {
        fs::write(path, contents).unwrap();
    }

    fn base_cli() -> Cli {
        Cli {
            command: Command::Ls,
            config_file: None,
            source_dir: None,
            dest_dir: None,
            remote_host: None,
            remote_user: None,
            rsync_options: vec![],
            exclude_patterns: None,
            unit_interval: None,
            num_intervals: None,
            min_free_mb: None,
            min_free_percent: None,
            min_free_percent_inodes: None,
            keep_redundant: false,
            no_resume: false,
            pre_create_hook: None,
            post_create_hook: None,
            pre_remove_hook: None,
            post_remove_hook: None,
            exit_hook: None,
            logfile: None,
            loglevel: None,
            daemon: false,
            dry_run: false,
        }
    }

    #[test]
    fn cli_overrides_config_file() {
        let dir = tempdir().unwrap();
        let cfg_path = dir.path().join("dssrc");
        write(
            &cfg_path,
            "source_dir = /data\ndest_dir = /backups\nunit_interval = 3\n",
        );
        let mut cli = base_cli();
        cli.config_file = Some(cfg_path);
        cli.unit_interval = Some(9);
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.unit_interval_days, 9);
        assert_eq!(cfg.source_dir, PathBuf::from("/data"));
    }

    #[test]
    fn repeated_rsync_option_accumulates() {
        let dir = tempdir().unwrap();
        let cfg_path = dir.path().join("dssrc");
        write(
            &cfg_path,
            "source_dir = /data\ndest_dir = /backups\nrsync_option = -z\nrsync_option = --bwlimit=1000\n",
        );
        let mut cli = base_cli();
        cli.config_file = Some(cfg_path);
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.rsync_options, vec!["-z", "--bwlimit=1000"]);
    }

    #[test]
    fn missing_source_dir_is_invalid() {
        let dir = tempdir().unwrap();
        let cfg_path = dir.path().join("dssrc");
        write(&cfg_path, "dest_dir = /backups\n");
        let mut cli = base_cli();
        cli.config_file = Some(cfg_path);
        assert!(Config::load(&cli).is_err());
    }

    #[test]
    fn rejects_num_intervals_out_of_range() {
        let dir = tempdir().unwrap();
        let cfg_path = dir.path().join("dssrc");
        write(
            &cfg_path,
            "source_dir = /data\ndest_dir = /backups\nnum_intervals = 0\n",
        );
        let mut cli = base_cli();
        cli.config_file = Some(cfg_path);
        assert!(Config::load(&cli).is_err());
    }
}
