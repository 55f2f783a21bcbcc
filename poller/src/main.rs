//! Poller process: hosts a collection of independently scheduled
//! collectors and fans their samples out to one or more exporters.
//!
//! Responsible for initializing logging and configuration, parsing
//! command-line arguments, and managing the process lifecycle including
//! graceful shutdown.

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod collectors;
mod exporters;
mod poller;

use poller::Poller;

/// Command-line arguments for the poller.
#[derive(Parser, Debug)]
#[command(name = "poller")]
#[command(about = "Monitoring poller that hosts collectors and exporters", long_about = None)]
struct CliArgs {
    /// Path to the configuration directory containing poller.toml.
    #[arg(value_name = "CONFIG_DIR")]
    config_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("./logs", "poller.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("poller=info,shared=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let cli_args = CliArgs::parse();
    info!("poller starting up");
    info!(config_dir = %cli_args.config_dir.display(), "loading configuration");

    let mut poller = match Poller::load(&cli_args.config_dir) {
        Ok(p) => p,
        Err(e) => {
            error!("FATAL ERROR: failed to load poller configuration");
            error!("Error: {}", e);
            let mut source = e.source();
            while let Some(err) = source {
                error!("  caused by: {}", err);
                source = err.source();
            }
            std::process::exit(1);
        }
    };

    if let Err(e) = poller.start().await {
        error!("FATAL ERROR: failed to start collectors/exporters: {}", e);
        std::process::exit(1);
    }

    let shutdown_signal = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate()).unwrap();
            let mut sigint = signal(SignalKind::interrupt()).unwrap();
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = sigint.recv() => info!("received SIGINT"),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.unwrap();
            info!("received Ctrl+C");
        }
    };
    tokio::pin!(shutdown_signal);

    let mut report_tick = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = report_tick.tick() => report(&poller).await,
            _ = &mut shutdown_signal => break,
        }
    }

    info!("shutdown signal received, stopping collectors");
    poller.shutdown().await;
    info!("poller shutdown complete");
    Ok(())
}

/// Periodic self-report: collector status plus the read-reset sample
/// count accumulated since the last report.
async fn report(poller: &Poller) {
    for (name, status) in poller.statuses().await {
        info!(collector = name.as_str(), status = ?status, "collector status");
    }
    for (name, count) in poller.collect_counts() {
        info!(collector = name.as_str(), count, "samples collected since last report");
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn cli_args_parse_config_dir() {
        use super::CliArgs;
        use clap::Parser;
        let args = CliArgs::parse_from(["poller", "/etc/monitoring-poller"]);
        assert_eq!(args.config_dir, std::path::PathBuf::from("/etc/monitoring-poller"));
    }
}
