//! tickmatch - exchange simulator entry point
//!
//! Loads the YAML configuration, wires the pipeline, and runs until ctrl-c
//! or until a worker raises the shutdown flag (fatal invariant violation).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use tickmatch::config::Config;
use tickmatch::exchange::Exchange;
use tickmatch::logging::init_logging;
use tickmatch::shutdown::ShutdownSignal;

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    let _log_guard = init_logging("info", None);

    let config = Config::load_from_file(&config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;
    info!(
        name = %config.exchange.name,
        tcp_port = config.exchange.tcp_port,
        udp_group = %config.exchange.udp_group,
        udp_port = config.exchange.udp_port,
        symbols = config.symbols.len(),
        "configuration loaded"
    );

    let mut exchange = Exchange::new(config)?;
    exchange.start();

    wait_for_shutdown(exchange.shutdown_signal())?;

    exchange.stop();
    Ok(())
}

/// Block until ctrl-c arrives or some worker requests shutdown
fn wait_for_shutdown(shutdown: Arc<ShutdownSignal>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;
    runtime.block_on(async {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, shutting down");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_millis(200)) => {
                    if shutdown.is_requested() {
                        info!("shutdown flag raised, exiting");
                        return;
                    }
                }
            }
        }
    });
    Ok(())
}
