use std::os::unix::io::AsRawFd;

use clap::Parser;
use color_eyre::eyre::{self, WrapErr};

mod config;
mod daemon;
mod diskspace;
mod error;
mod hooks;
mod lock;
mod pipeline;
mod policy;
mod rsync;
mod scheduler;
mod signals;
mod snapshot;
mod snapshot_list;
mod status;

use config::{Cli, Command, Config, LogLevel};
use error::{DssError, Result};
use snapshot_list::SnapshotList;

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs() as i64
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let config = Config::load(&cli).wrap_err("loading configuration")?;
    init_logging(&config)?;

    let result = run_command(&cli, config);
    if let Err(err) = &result {
        tracing::error!(error = err.name(), "{err}");
    }
    result.map_err(Into::into)
}

fn run_command(cli: &Cli, config: Config) -> Result<()> {
    match cli.command {
        Command::Ls => cmd_ls(&config),
        Command::Create => cmd_create(&config),
        Command::Prune => cmd_prune(&config),
        Command::Run => cmd_run(cli, config),
        Command::Kill => lock::send_signal(&config.config_file, nix::sys::signal::Signal::SIGTERM),
        Command::Reload => lock::send_signal(&config.config_file, nix::sys::signal::Signal::SIGHUP),
    }
}

fn cmd_ls(cfg: &Config) -> Result<()> {
    let list = SnapshotList::scan(&cfg.dest_dir, now_secs(), cfg.unit_interval_secs(), cfg.num_intervals)?;
    status::print_ls(&list);
    Ok(())
}

/// `create`: one full pipeline cycle, run synchronously to completion.
fn cmd_create(cfg: &Config) -> Result<()> {
    let local_user = rsync::local_username()?;

    if let Some(hook) = &cfg.pre_create_hook {
        run_hook_blocking(cfg, hook, &[])?;
    }

    let start = now_secs();
    let list = SnapshotList::scan(&cfg.dest_dir, start, cfg.unit_interval_secs(), cfg.num_intervals)?;
    let reference = list.newest_complete().map(|s| s.name.clone());
    let incomplete = snapshot::incomplete_name(start);
    let argv = rsync::build_argv(cfg, reference.as_deref(), &incomplete, &local_user);

    if cfg.dry_run {
        println!("would run: {}", argv.join(" "));
        return Ok(());
    }

    let status = subprocess::Exec::cmd(&argv[0]).args(&argv[1..]).join()?;
    let code = hooks::exit_code(&status);
    if !matches!(rsync::classify_exit(code), rsync::RsyncOutcome::Ok) {
        return Err(DssError::RsyncFailed(code));
    }

    let mut end = now_secs();
    while end == start {
        std::thread::sleep(std::time::Duration::from_millis(200));
        end = now_secs();
    }
    let complete = snapshot::complete_name(start, end);
    std::fs::rename(cfg.dest_dir.join(&incomplete), cfg.dest_dir.join(&complete))?;
    println!("created {complete}");

    if let Some(hook) = &cfg.post_create_hook {
        run_hook_blocking(cfg, hook, &[cfg.dest_dir.join(&complete).to_string_lossy().as_ref()])?;
    }
    Ok(())
}

/// `prune`: remove outdated then redundant snapshots, one at a time, until
/// neither kind remains.
fn cmd_prune(cfg: &Config) -> Result<()> {
    loop {
        let now = now_secs();
        let list = SnapshotList::scan(&cfg.dest_dir, now, cfg.unit_interval_secs(), cfg.num_intervals)?;
        let victim = policy::find_outdated_snapshot(&list, cfg.num_intervals, &[])
            .or_else(|| policy::find_redundant_snapshot(&list, cfg.num_intervals, &[]))
            .cloned();
        let Some(victim) = victim else {
            break;
        };

        if cfg.dry_run {
            println!("would remove {}", victim.name);
            break;
        }

        if let Some(hook) = &cfg.pre_remove_hook {
            run_hook_blocking(cfg, hook, &[&victim.name])?;
        }

        let renamed = if victim.is_being_deleted() {
            victim.name.clone()
        } else {
            let renamed = snapshot::being_deleted_name(&victim);
            std::fs::rename(cfg.dest_dir.join(&victim.name), cfg.dest_dir.join(&renamed))?;
            renamed
        };

        let status = subprocess::Exec::cmd("rm").arg("-rf").arg(cfg.dest_dir.join(&renamed)).join()?;
        let code = hooks::exit_code(&status);
        if code != 0 {
            return Err(DssError::HookFailed { name: "rm".into(), status: code });
        }
        println!("removed {renamed}");

        if let Some(hook) = &cfg.post_remove_hook {
            run_hook_blocking(cfg, hook, &[&renamed])?;
        }
    }
    Ok(())
}

fn run_hook_blocking(cfg: &Config, hook: &str, extra_args: &[&str]) -> Result<()> {
    if cfg.dry_run {
        println!("would run hook: {hook} {}", extra_args.join(" "));
        return Ok(());
    }
    let status = hooks::run_blocking(hook, extra_args)?;
    if status != 0 {
        return Err(DssError::HookFailed { name: hook.to_string(), status });
    }
    Ok(())
}

fn cmd_run(cli: &Cli, config: Config) -> Result<()> {
    if config.dry_run {
        return Err(DssError::InvalidConfig("dry_run cannot be combined with run".into()));
    }
    let _lock = lock::InstanceLock::acquire(&config.config_file)?;
    std::env::set_current_dir(&config.dest_dir)?;
    if config.daemon {
        daemonize()?;
    }
    let mut daemon = daemon::Daemon::new(config, cli.clone())?;
    daemon.run()
}

/// Detach from the controlling terminal: fork, start a new session, and
/// point stdio at `/dev/null`. The parent exits immediately.
fn daemonize() -> Result<()> {
    use nix::unistd::{ForkResult, dup2, fork, setsid};
    match unsafe { fork() }.map_err(DssError::Errno)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }
    setsid().map_err(DssError::Errno)?;
    let devnull = std::fs::OpenOptions::new().read(true).write(true).open("/dev/null")?;
    let fd = devnull.as_raw_fd();
    for target in [0, 1, 2] {
        dup2(fd, target).map_err(DssError::Errno)?;
    }
    Ok(())
}

fn init_logging(cfg: &Config) -> Result<()> {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::new(loglevel_filter(cfg.loglevel));
    match &cfg.logfile {
        Some(path) => {
            let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(move || file.try_clone().expect("logfile descriptor"))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        }
    }
    Ok(())
}

fn loglevel_filter(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Notice | LogLevel::Warning => "warn",
        LogLevel::Error | LogLevel::Crit | LogLevel::Alert | LogLevel::Emerg => "error",
    }
}
