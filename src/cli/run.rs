use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use tokio::signal;
use tracing::{error, info, warn};

use super::CliContext;
use bridge_protocol::LogLevel;
use cardbridge::collection::Collection;
use cardbridge::config::BridgeConfig;
use cardbridge::connection::ConnectionManager;
use cardbridge::host::HostEventLoop;
use cardbridge::logger::init_tracing;
use cardbridge::operations;

const RUN_SLICE: Duration = Duration::from_secs(3600);

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Log level override (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<LogLevel>,

    /// Also write rolling log files into this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Port override; 0 picks a free port
    #[arg(long)]
    pub port: Option<u16>,

    /// Connect even when CARDBRIDGE_AUTO_CONNECT is false
    #[arg(long, default_value_t = false)]
    pub connect: bool,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    pub duration_secs: Option<u64>,
}

impl RunArgs {
    pub fn default_runtime() -> Self {
        Self {
            log_level: None,
            log_dir: None,
            port: None,
            connect: false,
            duration_secs: None,
        }
    }
}

pub fn execute(args: RunArgs, context: &CliContext) -> anyhow::Result<()> {
    let mut config = BridgeConfig::load(&context.config_manager)
        .with_context(|| format!("loading configuration from {}", context.env_file.display()))?;
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    init_tracing(config.log_level, args.log_dir.as_deref())?;

    if !config.auto_connect_on_startup && !args.connect {
        warn!("auto connect is disabled; pass --connect to start the server anyway");
        println!("Auto connect disabled, nothing to do.");
        return Ok(());
    }

    let mut event_loop = HostEventLoop::new(Collection::new());
    let table = Rc::new(operations::table()?);
    let mut manager = ConnectionManager::new(config, event_loop.scheduler().clone(), table);
    manager.start()?;
    if let Some(addr) = manager.local_addr() {
        println!("cardbridge listening on {addr}");
    }

    let stop = Arc::new(AtomicBool::new(false));
    spawn_ctrl_c_watcher(stop.clone())?;

    match args.duration_secs {
        Some(secs) => {
            event_loop.run_until(|_| stop.load(Ordering::SeqCst), Duration::from_secs(secs));
        }
        None => while !event_loop.run_until(|_| stop.load(Ordering::SeqCst), RUN_SLICE) {},
    }

    info!("shutting down");
    manager.stop();
    let collection = event_loop.into_state();
    println!(
        "Stopped. {} notes, {} UI refreshes.",
        collection.note_count(),
        collection.ui_refreshes()
    );
    Ok(())
}

/// Ctrl-C is awaited on a side thread so the host loop stays on this one.
fn spawn_ctrl_c_watcher(stop: Arc<AtomicBool>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;
    thread::Builder::new()
        .name("cardbridge-signal".into())
        .spawn(move || {
            runtime.block_on(async {
                if let Err(e) = signal::ctrl_c().await {
                    error!(error = %e, "could not listen for Ctrl-C");
                    return;
                }
                info!("Ctrl-C received");
            });
            stop.store(true, Ordering::SeqCst);
        })
        .context("spawning signal thread")?;
    Ok(())
}
