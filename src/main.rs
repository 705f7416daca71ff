use anyhow::Context;
use pageserve::{Config, Server};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config::load()?;
    let server = Server::bind(&cfg).context("server setup failed")?;

    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received");
        shutdown.shutdown();
    })?;

    server.run()?;
    Ok(())
}
