//! Static lookup tables built once at startup.
//!
//! The routing table answers "which queue does query Q read entity E from",
//! and the multiplicity table answers "how many termination signals must the
//! consumers of that queue observe". Both are read-only after construction
//! and shared between every connection task through an `Arc`.

use std::collections::{BTreeSet, HashMap};

use crate::{
  ConfigError, EntityKind, QueryId,
  config::{Config, RouteConfig},
};

type RouteKey = (QueryId, EntityKind);

// ============================================================================
// Routing Table
// ============================================================================

/// Maps `(query, entity)` to a destination queue name.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
  routes: HashMap<RouteKey, String>,
}

impl RoutingTable {
  pub fn from_routes(routes: &[RouteConfig]) -> Result<Self, ConfigError> {
    let mut table = HashMap::with_capacity(routes.len());

    for route in routes {
      if route.queue.trim().is_empty() {
        return Err(ConfigError::EmptyQueue {
          query: route.query.clone(),
          entity: route.entity,
        });
      }

      let key = (route.query.clone(), route.entity);
      if table.insert(key, route.queue.clone()).is_some() {
        return Err(ConfigError::DuplicateRoute {
          query: route.query.clone(),
          entity: route.entity,
        });
      }
    }

    Ok(Self { routes: table })
  }

  /// Destination queue for a query's stream of the given entity
  pub fn queue(&self, query: &QueryId, entity: EntityKind) -> Option<&str> {
    self.routes.get(&(query.clone(), entity)).map(String::as_str)
  }

  /// Every distinct destination queue, sorted
  pub fn queues(&self) -> Vec<&str> {
    let unique: BTreeSet<&str> = self.routes.values().map(String::as_str).collect();
    unique.into_iter().collect()
  }

  pub fn len(&self) -> usize {
    self.routes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.routes.is_empty()
  }
}

// ============================================================================
// EOF Multiplicity Table
// ============================================================================

/// Number of termination signals per stream, on both sides of the pipeline.
///
/// `ingest` is the fan-out count: one producer notice becomes N queue
/// messages, one per worker replica reading that queue. `results` is the
/// fan-in count: N terminations must arrive on the results queue for a
/// `(client, query)` before the client is told the query is done.
#[derive(Debug, Clone, Default)]
pub struct EofMultiplicity {
  ingest: HashMap<RouteKey, u32>,
  results: HashMap<QueryId, u32>,
}

impl EofMultiplicity {
  pub fn new(ingest: HashMap<(QueryId, EntityKind), u32>, results: HashMap<QueryId, u32>) -> Result<Self, ConfigError> {
    if let Some(((query, _), _)) = ingest.iter().find(|(_, n)| **n == 0) {
      return Err(ConfigError::ZeroMultiplicity { query: query.clone() });
    }
    if let Some((query, _)) = results.iter().find(|(_, n)| **n == 0) {
      return Err(ConfigError::ZeroMultiplicity { query: query.clone() });
    }
    Ok(Self { ingest, results })
  }

  /// Fan-out count for a routed stream, `None` when the stream is not routed
  pub fn ingest(&self, query: &QueryId, entity: EntityKind) -> Option<u32> {
    self.ingest.get(&(query.clone(), entity)).copied()
  }

  /// Fan-in count on the results queue; unconfigured queries expect one signal
  pub fn results(&self, query: &QueryId) -> u32 {
    self.results.get(query).copied().unwrap_or(1)
  }
}

/// Build both tables from a loaded configuration.
pub fn build_tables(config: &Config) -> Result<(RoutingTable, EofMultiplicity), ConfigError> {
  let routing = RoutingTable::from_routes(&config.routes)?;

  let ingest = config
    .routes
    .iter()
    .map(|r| ((r.query.clone(), r.entity), r.eof_count))
    .collect();
  let results = config
    .output
    .eof_counts
    .iter()
    .map(|(q, n)| (QueryId::from(q.as_str()), *n))
    .collect();

  let multiplicity = EofMultiplicity::new(ingest, results)?;
  Ok((routing, multiplicity))
}
