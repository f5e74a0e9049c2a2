//! Agent binary: reads kill events as JSON lines from stdin

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use lazarus_agent::{Agent, StdinKillSource};
use lazarus_common::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    info!(mode = ?config.mode, "starting lazarus agent");

    let agent = Agent::new(config).await?;
    let source = Arc::new(StdinKillSource::new());

    tokio::select! {
        result = agent.run(source) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}
