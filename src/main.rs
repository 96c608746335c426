//! caddy-discovery daemon entry point.

use log::{error, info};
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod caddy;
mod config;
mod driver;
mod error;
mod reconcile;
mod retry;
mod runtime;
#[cfg(test)]
mod testing;
mod types;

use caddy::CaddyAdmin;
use config::Config;
use driver::Driver;
use runtime::DockerRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting caddy-discovery with config: {:?}", cfg);
    info!("Using caddy admin url: {}", cfg.admin_url);

    // Collaborators
    let runtime = DockerRuntime::connect(cfg.labels.clone(), cfg.retry)?;
    let admin = CaddyAdmin::new(&cfg.admin_url, cfg.admin_timeout(), cfg.listen.clone())?;
    let driver = Driver::new(admin, runtime, cfg.driver_settings());

    // Graceful Shutdown
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down...");
                shutdown.cancel();
            }
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        }
    });

    driver.run(cancel).await?;

    info!("Shutdown complete.");
    Ok(())
}
