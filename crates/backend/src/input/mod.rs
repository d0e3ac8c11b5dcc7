//! Ingestion router (input gateway).
//!
//! One listener per entity kind accepts producer connections; each
//! connection gets its own task running [`serve_producer`]. An optional
//! extra listener hands out client ids.
//!
//! ```text
//! producer ──frame──> session ──publish──> broker queue
//!          <──ack────         (fan-out N on end of stream)
//! ```

mod assign;
mod router;
mod session;

use std::{net::SocketAddr, sync::Arc};

use gateway_core::{EntityKind, config::InputConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use assign::{assign_client_id, new_client_id};
pub use router::{BatchOutcome, FanOutReport, Router, RouterSettings};
pub use session::{SessionSummary, serve_producer};

use crate::{GatewayError, server};

/// Bound listeners of the ingestion side, ready to serve
pub struct InputGateway {
  router: Arc<Router>,
  listeners: Vec<(EntityKind, TcpListener)>,
  assign: Option<TcpListener>,
}

impl InputGateway {
  /// Bind every configured listener. Fails if any address is unavailable.
  pub async fn bind(config: &InputConfig, router: Router) -> Result<Self, GatewayError> {
    let mut listeners = Vec::with_capacity(EntityKind::ALL.len());
    for entity in EntityKind::ALL {
      let listener = server::bind(entity.as_str(), config.address(entity)).await?;
      listeners.push((entity, listener));
    }

    let assign = match config.connections_address.as_deref() {
      Some(address) => Some(server::bind("connections", address).await?),
      None => None,
    };

    Ok(Self {
      router: Arc::new(router),
      listeners,
      assign,
    })
  }

  pub fn local_addr(&self, entity: EntityKind) -> Option<SocketAddr> {
    self
      .listeners
      .iter()
      .find(|(e, _)| *e == entity)
      .and_then(|(_, l)| l.local_addr().ok())
  }

  pub fn assign_addr(&self) -> Option<SocketAddr> {
    self.assign.as_ref().and_then(|l| l.local_addr().ok())
  }

  /// Serve until `cancel` fires. Listeners close when this returns.
  pub async fn run(self, cancel: CancellationToken) {
    let mut loops = Vec::with_capacity(self.listeners.len() + 1);

    for (entity, listener) in self.listeners {
      let router = Arc::clone(&self.router);
      let session_cancel = cancel.clone();
      loops.push(tokio::spawn(server::accept_loop(
        listener,
        entity.as_str(),
        cancel.clone(),
        move |stream, peer| {
          let router = Arc::clone(&router);
          let cancel = session_cancel.clone();
          async move {
            match serve_producer(stream, entity, &router, cancel).await {
              Ok(summary) => debug!(%peer, %entity, batches = summary.batches, "Producer session ended"),
              Err(e) => warn!(%peer, %entity, error = %e, "Producer session failed"),
            }
          }
        },
      )));
    }

    if let Some(listener) = self.assign {
      loops.push(tokio::spawn(server::accept_loop(
        listener,
        "connections",
        cancel.clone(),
        |stream, peer| async move {
          if let Err(e) = assign_client_id(stream).await {
            warn!(%peer, error = %e, "Failed to assign client id");
          }
        },
      )));
    }

    for handle in loops {
      if let Err(e) = handle.await {
        warn!(error = %e, "Listener task failed");
      }
    }
    info!("Ingestion router stopped");
  }
}
