//! Announce on the result listener and print what arrives

use anyhow::{Context, Result, bail};
use gateway::client::ResultClient;
use gateway_core::{ClientId, Config, QueryId};
use ipc::ResultBody;

use super::dial_address;

pub async fn cmd_results(
  config: &Config,
  client_id: String,
  queries: Vec<String>,
  address: Option<String>,
  json: bool,
) -> Result<()> {
  if queries.is_empty() {
    bail!("At least one --query is required");
  }

  let address = address.unwrap_or_else(|| dial_address(&config.output.address));
  let queries = queries.into_iter().map(QueryId::from);
  let mut client = ResultClient::connect(&address, ClientId::from(client_id), queries)
    .await
    .with_context(|| format!("Failed to connect to {}", address))?;

  while let Some(frame) = client.next().await? {
    if json {
      let value = match frame.body {
        ResultBody::Rows(ref rows) => serde_json::json!({ "query": frame.query, "rows": rows }),
        ResultBody::EndOfStream => serde_json::json!({ "query": frame.query, "eof": true }),
      };
      println!("{}", serde_json::to_string(&value)?);
      continue;
    }

    match frame.body {
      ResultBody::Rows(ref rows) => {
        println!("--- {} ---", frame.query);
        println!("{}", rows);
      }
      ResultBody::EndOfStream => println!("=== {} finished ===", frame.query),
    }
  }

  Ok(())
}
