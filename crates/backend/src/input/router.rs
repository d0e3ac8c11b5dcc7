//! Routing decisions for ingested frames.
//!
//! The router owns nothing mutable: it resolves queues through the routing
//! table, projects batch bodies, and publishes. Fan-out turns one producer
//! end-of-stream notice into N termination messages per routed query.

use std::{sync::Arc, time::Duration};

use gateway_core::{EofMultiplicity, QueryId, RoutingTable, config::InputConfig};
use ipc::{Batch, BatchHeader};
use tracing::{debug, error, info, warn};

use crate::{
  broker::{Broker, QueueMessage},
  records,
};

const RETRY_BACKOFF: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct RouterSettings {
  /// Idle deadline for a producer connection
  pub read_timeout: Duration,
  /// Extra attempts for a failed termination publish
  pub fan_out_retries: u32,
}

impl RouterSettings {
  pub fn from_config(config: &InputConfig) -> Self {
    Self {
      read_timeout: Duration::from_secs(config.read_timeout_secs),
      fan_out_retries: config.fan_out_retries,
    }
  }
}

impl Default for RouterSettings {
  fn default() -> Self {
    Self::from_config(&InputConfig::default())
  }
}

/// Outcome of fanning out one query's termination signals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOutReport {
  pub query: QueryId,
  pub queue: String,
  pub expected: u32,
  pub published: u32,
}

impl FanOutReport {
  pub fn is_complete(&self) -> bool {
    self.published == self.expected
  }
}

/// Result of routing one data batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
  /// Queries whose publish succeeded
  pub published: Vec<QueryId>,
  /// Queries with no route, or whose publish failed
  pub skipped: Vec<QueryId>,
}

pub struct Router {
  routing: Arc<RoutingTable>,
  multiplicity: Arc<EofMultiplicity>,
  broker: Arc<dyn Broker>,
  settings: RouterSettings,
}

impl Router {
  pub fn new(
    routing: Arc<RoutingTable>,
    multiplicity: Arc<EofMultiplicity>,
    broker: Arc<dyn Broker>,
    settings: RouterSettings,
  ) -> Self {
    Self {
      routing,
      multiplicity,
      broker,
      settings,
    }
  }

  pub fn settings(&self) -> &RouterSettings {
    &self.settings
  }

  /// Publish a data batch to every query it feeds.
  ///
  /// A routing miss or a failed publish skips that query only.
  pub async fn route_batch(&self, batch: &Batch<'_>, batch_id: u64) -> BatchOutcome {
    let header = &batch.header;
    let projected = records::project(header.entity, batch.records());
    if projected.dropped > 0 {
      debug!(
        entity = %header.entity,
        batch_id,
        dropped = projected.dropped,
        "Dropped incomplete records"
      );
    }

    let mut outcome = BatchOutcome::default();
    for query in &header.queries {
      let Some(queue) = self.routing.queue(query, header.entity) else {
        warn!(query = %query, entity = %header.entity, "No route for query, skipping");
        outcome.skipped.push(query.clone());
        continue;
      };

      let message = QueueMessage::batch(query, &header.client_id, batch_id, header.entity, projected.body.clone());
      match self.broker.publish(queue, message).await {
        Ok(()) => outcome.published.push(query.clone()),
        Err(e) => {
          error!(query = %query, queue, batch_id, error = %e, "Failed to publish batch");
          outcome.skipped.push(query.clone());
        }
      }
    }

    outcome
  }

  /// Publish the configured number of termination messages for every
  /// routed query named in an end-of-stream header.
  pub async fn fan_out(&self, header: &BatchHeader) -> Vec<FanOutReport> {
    let mut reports = Vec::with_capacity(header.queries.len());

    for query in &header.queries {
      let Some(queue) = self.routing.queue(query, header.entity) else {
        warn!(query = %query, entity = %header.entity, "No route for query, skipping end of stream");
        continue;
      };
      let expected = self.multiplicity.ingest(query, header.entity).unwrap_or(1);

      info!(
        query = %query,
        client_id = %header.client_id,
        queue,
        count = expected,
        tag = header.entity.eof_tag(),
        "Fanning out end of stream"
      );

      let published = self.fan_out_query(header, query, queue, expected).await;
      let report = FanOutReport {
        query: query.clone(),
        queue: queue.to_string(),
        expected,
        published,
      };

      if !report.is_complete() {
        error!(
          query = %query,
          client_id = %header.client_id,
          queue,
          expected,
          published,
          "Fan-out incomplete, downstream will under-count terminations"
        );
      }
      reports.push(report);
    }

    reports
  }

  async fn fan_out_query(&self, header: &BatchHeader, query: &QueryId, queue: &str, expected: u32) -> u32 {
    let mut published = 0;

    while published < expected {
      let message = QueueMessage::end_of_stream(query, &header.client_id, header.entity);
      if !self.publish_with_retry(queue, message).await {
        break;
      }
      published += 1;
    }

    published
  }

  async fn publish_with_retry(&self, queue: &str, message: QueueMessage) -> bool {
    let attempts = self.settings.fan_out_retries + 1;

    for attempt in 1..=attempts {
      match self.broker.publish(queue, message.clone()).await {
        Ok(()) => return true,
        Err(e) if attempt < attempts => {
          warn!(queue, attempt, error = %e, "Termination publish failed, retrying");
          tokio::time::sleep(RETRY_BACKOFF * attempt).await;
        }
        Err(e) => {
          error!(queue, attempts, error = %e, "Termination publish failed, giving up");
        }
      }
    }

    false
  }
}
