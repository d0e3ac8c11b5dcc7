//! Stream a file of records into an ingestion listener

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use gateway::client::{Batcher, IngestClient, request_client_id};
use gateway_core::{ClientId, Config, EntityKind, QueryId};
use tracing::{debug, info};

use super::dial_address;

pub struct ProduceOptions {
  pub entity: EntityKind,
  pub queries: Vec<String>,
  pub file: PathBuf,
  pub client_id: Option<String>,
  pub address: Option<String>,
  pub batch_size: usize,
  pub skip_header: bool,
}

pub async fn cmd_produce(config: &Config, options: ProduceOptions) -> Result<()> {
  if options.queries.is_empty() {
    bail!("At least one --query is required");
  }
  if !options.entity.is_primary() && options.queries.len() > 1 {
    bail!("{} records feed a single query, got {}", options.entity, options.queries.len());
  }
  let queries: Vec<QueryId> = options.queries.iter().map(|q| QueryId::from(q.as_str())).collect();

  let content = tokio::fs::read_to_string(&options.file)
    .await
    .with_context(|| format!("Failed to read {}", options.file.display()))?;

  let client_id = match options.client_id {
    Some(id) => ClientId::from(id),
    None => {
      let Some(ref assign) = config.input.connections_address else {
        bail!("No --client-id given and input.connections_address is not configured");
      };
      request_client_id(&dial_address(assign))
        .await
        .context("Failed to obtain a client id")?
    }
  };
  // stdout carries the id so it can be piped into `gateway results`
  println!("{}", client_id);

  let address = options
    .address
    .unwrap_or_else(|| dial_address(config.input.address(options.entity)));
  let mut client = IngestClient::connect(&address, options.entity, client_id.clone())
    .await
    .with_context(|| format!("Failed to connect to {}", address))?;

  let mut batcher = Batcher::new(options.batch_size, client.header_reserve(&queries));
  let mut batches = 0u64;
  let mut records = 0usize;

  let lines = content.lines().skip(usize::from(options.skip_header));
  for line in lines.filter(|l| !l.trim().is_empty()) {
    records += 1;
    if let Some(batch) = batcher.push(line)? {
      let batch_id = client.send_batch(&queries, &batch).await?;
      debug!(batch_id, records = batch.len(), "Batch acknowledged");
      batches += 1;
    }
  }
  if let Some(batch) = batcher.finish() {
    client.send_batch(&queries, &batch).await?;
    batches += 1;
  }

  client.send_end_of_stream(&queries).await?;

  info!(
    client_id = %client_id,
    entity = %options.entity,
    records,
    batches,
    "Stream finished"
  );
  Ok(())
}
