//! Result delivery service (output gateway).
//!
//! Two concurrent activities share the [`ClientRegistry`]:
//!
//! - the listener accepts result connections, reads each one's
//!   announcement and registers it;
//! - one consumer task drains the results queue and delivers every message
//!   to the client it belongs to, holding back termination signals until
//!   the fan-in count for that `(client, query)` is complete.
//!
//! On shutdown the consumer stops pulling, the listener closes, and every
//! registered connection is closed.

mod announce;
mod consumer;
mod countdown;
mod registry;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use gateway_core::{EofMultiplicity, config::OutputConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use announce::accept_announcement;
pub use consumer::{Delivery, ResultConsumer};
pub use countdown::{Countdown, FanInCountdown};
pub use registry::{AckOutcome, ClientHandle, ClientRegistry};

use crate::{GatewayError, broker::Broker, server};

pub struct OutputGateway {
  listener: TcpListener,
  registry: Arc<ClientRegistry<TcpStream>>,
  consumer: Arc<ResultConsumer<TcpStream>>,
  broker: Arc<dyn Broker>,
  results_queue: String,
  announce_timeout: Duration,
}

impl OutputGateway {
  pub async fn bind(
    config: &OutputConfig,
    broker: Arc<dyn Broker>,
    multiplicity: Arc<EofMultiplicity>,
  ) -> Result<Self, GatewayError> {
    let listener = server::bind("results", &config.address).await?;
    let registry = Arc::new(ClientRegistry::new());
    let consumer = Arc::new(ResultConsumer::new(
      Arc::clone(&registry),
      multiplicity,
      Duration::from_secs(config.ack_timeout_secs),
    ));

    Ok(Self {
      listener,
      registry,
      consumer,
      broker,
      results_queue: config.results_queue.clone(),
      announce_timeout: Duration::from_secs(config.announce_timeout_secs),
    })
  }

  pub fn local_addr(&self) -> Option<SocketAddr> {
    self.listener.local_addr().ok()
  }

  pub fn registry(&self) -> Arc<ClientRegistry<TcpStream>> {
    Arc::clone(&self.registry)
  }

  /// Serve until `cancel` fires.
  ///
  /// Fails only if the results queue cannot be consumed.
  pub async fn run(self, cancel: CancellationToken) -> Result<(), GatewayError> {
    self.broker.declare(&self.results_queue).await?;
    let subscription = self.broker.consume(&self.results_queue).await?;
    info!(queue = %self.results_queue, "Consuming results");

    let consumer_task = {
      let consumer = Arc::clone(&self.consumer);
      let cancel = cancel.clone();
      tokio::spawn(async move { consumer.run(subscription, cancel).await })
    };

    let registry = Arc::clone(&self.registry);
    let announce_timeout = self.announce_timeout;
    let announce_cancel = cancel.clone();
    server::accept_loop(self.listener, "results", cancel.clone(), move |stream, peer| {
      let registry = Arc::clone(&registry);
      let cancel = announce_cancel.clone();
      async move {
        if let Some(client_id) = accept_announcement(stream, &registry, announce_timeout, &cancel).await {
          debug!(%peer, client_id = %client_id, "Result connection announced");
        }
      }
    })
    .await;

    let processed = consumer_task
      .await
      .map_err(|e| GatewayError::Task(e.to_string()))?;
    let closed = self.registry.close_all().await;
    info!(processed, closed, "Result delivery stopped");

    Ok(())
  }
}
