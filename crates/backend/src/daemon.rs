//! Process lifecycle.
//!
//! ```text
//! Daemon
//!   ├── MemoryBroker (routed queues + results queue)
//!   ├── InputGateway (entity listeners, client-id listener)
//!   └── OutputGateway (result listener, results consumer)
//! ```
//!
//! 1. Build the routing and multiplicity tables from config
//! 2. Create the broker and declare every queue
//! 3. Bind all listeners (fails fast on a taken address)
//! 4. Run both gateways with child cancellation tokens
//! 5. On ctrl-c or cancellation: stop gateways, then close the broker

use std::sync::Arc;

use gateway_core::Config;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
  GatewayError,
  broker::{Broker, MemoryBroker},
  input::{InputGateway, Router, RouterSettings},
  output::OutputGateway,
};

pub struct Daemon {
  config: Config,
  broker: Arc<dyn Broker>,
}

impl Daemon {
  /// A daemon backed by the in-process broker
  pub fn new(config: Config) -> Self {
    let broker = Arc::new(MemoryBroker::new(config.broker.queue_capacity));
    Self::with_broker(config, broker)
  }

  pub fn with_broker(config: Config, broker: Arc<dyn Broker>) -> Self {
    Self { config, broker }
  }

  /// Run until ctrl-c.
  pub async fn run(self) -> Result<(), GatewayError> {
    let cancel = CancellationToken::new();

    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
      if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        return;
      }
      info!("Received ctrl-c, shutting down...");
      cancel_for_signal.cancel();
    });

    self.run_until(cancel).await
  }

  /// Run until `cancel` fires.
  pub async fn run_until(self, cancel: CancellationToken) -> Result<(), GatewayError> {
    info!("Starting gateway");

    let (routing, multiplicity) = self.config.tables()?;
    let routing = Arc::new(routing);
    let multiplicity = Arc::new(multiplicity);
    info!(routes = routing.len(), "Routing table built");

    for queue in routing.queues() {
      self.broker.declare(queue).await?;
    }
    self.broker.declare(&self.config.output.results_queue).await?;

    let router = Router::new(
      Arc::clone(&routing),
      Arc::clone(&multiplicity),
      Arc::clone(&self.broker),
      RouterSettings::from_config(&self.config.input),
    );
    let input = InputGateway::bind(&self.config.input, router).await?;
    let output = OutputGateway::bind(&self.config.output, Arc::clone(&self.broker), multiplicity).await?;

    let input_task = tokio::spawn(input.run(cancel.child_token()));
    let output_task = {
      let cancel = cancel.clone();
      tokio::spawn(async move {
        let result = output.run(cancel.child_token()).await;
        if result.is_err() {
          cancel.cancel();
        }
        result
      })
    };

    cancel.cancelled().await;
    info!("Shutting down...");

    if let Err(e) = input_task.await {
      error!(error = %e, "Ingestion router task failed");
    }
    match output_task.await {
      Ok(Ok(())) => {}
      Ok(Err(e)) => error!(error = %e, "Result delivery failed"),
      Err(e) => error!(error = %e, "Result delivery task failed"),
    }

    self.broker.close().await;
    info!("Gateway shutdown complete");
    Ok(())
  }
}
