//! Modbus Engine
//!
//! Polls the devices described by a YAML file and logs tag changes and a
//! periodic status report until interrupted.
//!
//! Usage: modbus-engine --config engine.yaml [--log-level debug]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use modbus_engine::{Driver, EngineConfig, LogSink, MonitorInterface, StatusReport, TagSynchronizer};

#[derive(Parser, Debug)]
#[command(name = "modbus-engine", version, about = "Block-polling Modbus TCP master")]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "MODBUS_ENGINE_CONFIG")]
    config: PathBuf,

    /// Log level used when RUST_LOG is not set
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Interval between status reports, 0 disables them
    #[arg(long, default_value_t = 10_000)]
    status_interval_ms: u64,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn report_status<M: MonitorInterface + 'static>(
    monitor: Arc<M>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = cancel.cancelled() => break,
        }
        match StatusReport::collect(monitor.as_ref()).await {
            Ok(report) => match serde_json::to_string(&report) {
                Ok(json) => info!("Status: {}", json),
                Err(e) => error!("Status serialization failed: {}", e),
            },
            Err(e) => error!("Status collection failed: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("Loading configuration from {}", args.config.display());
    let config = EngineConfig::load(&args.config)?;
    info!(
        "{} devices, {} blocks, {} tags",
        config.devices.len(),
        config.devices.iter().map(|d| d.blocks.len()).sum::<usize>(),
        config.tags.len()
    );

    let driver = Arc::new(Driver::from_config(&config.devices)?);
    let tasks = driver.start();

    let shutdown = CancellationToken::new();
    // Nothing feeds writes here; the sender stays alive so the queue stays open.
    let (sync, _writes) = TagSynchronizer::new(driver.clone(), &config.tags, LogSink);
    let mut helpers = vec![tokio::spawn(sync.run(shutdown.clone()))];
    if args.status_interval_ms > 0 {
        helpers.push(tokio::spawn(report_status(
            driver.clone(),
            Duration::from_millis(args.status_interval_ms),
            shutdown.clone(),
        )));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    shutdown.cancel();
    for helper in helpers {
        if let Err(e) = helper.await {
            warn!("Task ended abnormally: {}", e);
        }
    }
    driver.shutdown(tasks).await;
    Ok(())
}
