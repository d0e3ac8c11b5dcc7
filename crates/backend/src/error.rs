use gateway_core::ConfigError;
use ipc::WireError;

use crate::broker::BrokerError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
  #[error("Failed to bind {listener} listener on {address}: {source}")]
  Bind {
    listener: &'static str,
    address: String,
    #[source]
    source: std::io::Error,
  },
  #[error("Configuration error: {0}")]
  Config(#[from] ConfigError),
  #[error("Broker error: {0}")]
  Broker(#[from] BrokerError),
  #[error("Wire error: {0}")]
  Wire(#[from] WireError),
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Task failed: {0}")]
  Task(String),
}
