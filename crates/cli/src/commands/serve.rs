//! Run both gateways in this process

use anyhow::{Context, Result};
use gateway::Daemon;
use gateway_core::Config;
use tracing::info;

pub async fn cmd_serve(config: Config) -> Result<()> {
  info!(
    movies = %config.input.movies_address,
    credits = %config.input.credits_address,
    ratings = %config.input.ratings_address,
    results = %config.output.address,
    routes = config.routes.len(),
    "Starting gateway"
  );

  Daemon::new(config).run().await.context("Gateway stopped with an error")?;

  info!("Gateway stopped");
  Ok(())
}
