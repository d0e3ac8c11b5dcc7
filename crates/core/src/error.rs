use std::path::PathBuf;

use crate::{EntityKind, QueryId};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
  #[error("Duplicate route for query {query} on {entity}")]
  DuplicateRoute { query: QueryId, entity: EntityKind },
  #[error("Route for query {query} on {entity} has an empty queue name")]
  EmptyQueue { query: QueryId, entity: EntityKind },
  #[error("EOF multiplicity for query {query} must be at least 1")]
  ZeroMultiplicity { query: QueryId },
  #[error("Invalid address for {listener}: {value}")]
  InvalidAddress { listener: &'static str, value: String },
}
