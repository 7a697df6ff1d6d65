use crate::cli::{Commands, GSweep};
use anyhow::{Context, Result};
use clap::CommandFactory;
use gsweep::config::load_config;
use gsweep::core::run_dir::LOG_FILE;
use gsweep::driver::{render_dry_run, render_summary, SweepDriver};
use std::io::Write;
use std::path::Path;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub async fn handle(args: GSweep) -> Result<u8> {
    if let Some(Commands::Completions { shell }) = args.command {
        write_completions(shell)?;
        return Ok(0);
    }

    let config = load_config(args.config.as_ref()).context("Failed to load config")?;
    let level = args.verbose.tracing_level_filter();
    let driver = SweepDriver::new(args.sweep.into_request(), config.sweep);

    let plan = driver.plan()?;
    if driver.request().dry_run {
        init_tracing(level, None)?;
        print!("{}", render_dry_run(&plan));
        return Ok(0);
    }

    let gpus = driver.resolve_gpus()?;
    let sweep_dir = driver.create_sweep_dir()?;
    let _guard = init_tracing(level, Some(sweep_dir.root()))?;

    let interrupts = listen_for_interrupts();
    let report = driver.run(plan, sweep_dir, gpus, interrupts).await?;
    print!("{}", render_summary(&report));
    Ok(report.summary.exit_code())
}

/// Console logging on stderr, plus `gsweep.log` inside the sweep directory
/// for live runs. The returned guard flushes the file writer on drop.
fn init_tracing(level: LevelFilter, sweep_root: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let (file_layer, guard) = match sweep_root {
        Some(root) => {
            let file_appender = tracing_appender::rolling::never(root, LOG_FILE);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(level)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

/// Forward every SIGINT, SIGTERM and SIGHUP to the scheduler. The handlers
/// are installed before this returns. If they cannot be installed the sweep
/// runs without interrupt support.
fn listen_for_interrupts() -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(4);
    match StopSignals::install() {
        Ok(mut signals) => {
            tokio::spawn(async move {
                loop {
                    let name = signals.next().await;
                    tracing::warn!("Received {}", name);
                    if tx.send(()).await.is_err() {
                        break;
                    }
                }
            });
        }
        Err(e) => tracing::error!("Failed to install signal handlers: {}", e),
    }
    rx
}

#[cfg(unix)]
struct StopSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl StopSignals {
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn next(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.hangup.recv() => "SIGHUP",
        }
    }
}

#[cfg(not(unix))]
struct StopSignals;

#[cfg(not(unix))]
impl StopSignals {
    fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> &'static str {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "Ctrl-C",
            Err(e) => {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending().await
            }
        }
    }
}

fn write_completions(shell: clap_complete::Shell) -> Result<()> {
    let mut buf = Vec::<u8>::new();
    clap_complete::generate(shell, &mut GSweep::command(), "gsweep", &mut buf);

    match std::io::stdout().write_all(&buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(e.into()),
    }
}
