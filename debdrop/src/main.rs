//! debdrop daemon entry point.

use clap::Parser;
use debdrop::config::Config;
use debdrop::control;
use debdrop::indexer::ArchiveIndexer;
use debdrop::installer::ArchiveInstaller;
use debdrop::layout;
use debdrop::notifier::ChangeNotifier;
use debdrop::pidlock::PidLock;
use debdrop::verify::{GpgVerifier, SignatureVerifier};
use debdrop::worker::{ArchiveEntry, IncomingWorker};
use debdrop::{DinstallError, EXIT_CONFIG, EXIT_LOCK_HELD, EXIT_LOCK_INVALID, EXIT_OK};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "debdrop",
    about = "Watch an incoming directory and publish package uploads into per-distribution archives"
)]
struct Args {
    /// Parse configuration from FILE
    #[arg(short = 'c', long, env = "DEBDROP_CONFIG")]
    config: Option<PathBuf>,

    /// Don't daemonize; process the queue once, then exit
    #[arg(short = 'b', long)]
    batch: bool,

    /// Ask a running daemon to process its queue immediately
    #[arg(short = 'r', long)]
    run: bool,

    /// Shut down a running daemon
    #[arg(short = 'k', long)]
    kill: bool,

    /// External tool invoked to build package indices
    #[arg(long, default_value = "apt-ftparchive")]
    index_tool: String,

    /// Display extra information
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Display less information
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Toplevel directory; overrides the configured one
    directory: Option<PathBuf>,
}

/// Default configuration file locations, tried in order.
fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(home) = std::env::var("HOME") {
        paths.push(PathBuf::from(home).join(".debdrop.conf"));
    }
    paths.push(PathBuf::from("/etc/debdrop.conf"));
    paths
}

fn load_config(args: &Args) -> Result<Config, DinstallError> {
    let mut config = if let Some(path) = &args.config {
        Config::load(path)?
    } else {
        match default_config_paths().iter().find(|p| p.is_file()) {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        }
    };
    if let Some(directory) = &args.directory {
        config.global.toplevel_dir = Some(directory.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "debug"
    } else if args.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match run(args).await {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => {
            error!("{}", e);
            let code = match e {
                DinstallError::LockHeld { .. } => EXIT_LOCK_HELD,
                DinstallError::LockInvalid { .. } => EXIT_LOCK_INVALID,
                _ => EXIT_CONFIG,
            };
            ExitCode::from(code)
        }
    }
}

async fn run(args: Args) -> Result<(), DinstallError> {
    let config = load_config(&args)?;

    if args.kill || args.run {
        let command = if args.kill { "DIE" } else { "RUN" };
        let response = control::send_command(&config.socket_path()?, command).await?;
        println!("{}", response);
        return Ok(());
    }

    let toplevel = config.toplevel()?.to_path_buf();
    std::fs::create_dir_all(&toplevel)?;
    std::fs::create_dir_all(config.incoming_dir()?)?;
    std::fs::create_dir_all(config.reject_dir()?)?;

    let mut lock = PidLock::acquire(&config.lockfile_path()?)?;
    let targets = config.resolve_targets()?;
    let cancel = CancellationToken::new();
    let poll_time = Duration::from_secs(config.global.poll_time);

    let mut archives = Vec::new();
    let mut indexers = Vec::new();
    for target in targets {
        let target = Arc::new(target);
        let layout = layout::make_layout(Arc::clone(&target));
        layout.ensure_dirs()?;
        let verifier: Arc<dyn SignatureVerifier> =
            Arc::new(GpgVerifier::new(target.keyrings.clone()));
        let (indexer, handle) = ArchiveIndexer::new(
            Arc::clone(&target),
            Arc::clone(&layout),
            args.index_tool.clone(),
            cancel.clone(),
        );
        let installer = ArchiveInstaller::new(
            Arc::clone(&target),
            Arc::clone(&layout),
            config.reject_dir()?,
            verifier,
        );
        archives.push(ArchiveEntry {
            installer,
            indexer: handle,
        });
        indexers.push((indexer, target, layout));
    }

    let mut worker = IncomingWorker::new(
        config.incoming_dir()?,
        archives,
        Duration::from_secs(config.global.max_retry_time),
        poll_time,
        config.global.trigger_reindex,
        cancel.clone(),
    );

    if args.batch {
        // install everything installable, then one forced index pass so the
        // indices include what just landed
        worker.run_batch().await;
        for (indexer, target, _layout) in indexers {
            if let Err(e) = indexer.run_batch().await {
                error!("indexing {} failed: {}", target.name, e);
            }
        }
        lock.release()?;
        return Ok(());
    }

    let mut notifiers = Vec::new();
    let mut tasks = Vec::new();
    for (indexer, target, layout) in indexers {
        let watch_rx = if target.dynamic_reindex {
            let (notifier, rx) = ChangeNotifier::spawn(
                layout.watch_dirs(),
                config.global.use_inotify,
                poll_time,
                cancel.clone(),
            );
            notifiers.push(notifier);
            Some(rx)
        } else {
            None
        };
        // a core loop exiting unexpectedly takes the daemon down in order
        let loop_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            indexer.run(watch_rx).await;
            loop_cancel.cancel();
        }));
    }

    let (incoming_notifier, notify_rx) = ChangeNotifier::spawn(
        vec![config.incoming_dir()?],
        config.global.use_inotify,
        poll_time,
        cancel.clone(),
    );
    notifiers.push(incoming_notifier);

    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let loop_cancel = cancel.clone();
    tasks.push(tokio::spawn(async move {
        worker.run(cmd_rx, notify_rx).await;
        loop_cancel.cancel();
    }));
    let control_task = tokio::spawn(control::serve(
        config.socket_path()?,
        cmd_tx,
        cancel.clone(),
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received; shutting down");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }

    for task in tasks {
        let _ = task.await;
    }
    let _ = control_task.await;
    lock.release()?;
    info!("shutdown complete");
    Ok(())
}
