//! TCP listener plumbing shared by both gateways.
//!
//! Every listener runs the same loop: accept until cancelled, spawn one task
//! per connection. What the task does is up to the caller.

use std::{future::Future, net::SocketAddr};

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::GatewayError;

pub(crate) async fn bind(listener: &'static str, address: &str) -> Result<TcpListener, GatewayError> {
  TcpListener::bind(address)
    .await
    .map_err(|source| GatewayError::Bind {
      listener,
      address: address.to_string(),
      source,
    })
}

/// Accept connections until `cancel` fires, spawning `on_connection` for each.
///
/// Accept errors are logged and the loop keeps going. The listener is
/// dropped (closed) when the loop exits.
pub(crate) async fn accept_loop<F, Fut>(
  listener: TcpListener,
  name: &'static str,
  cancel: CancellationToken,
  mut on_connection: F,
)
where
  F: FnMut(TcpStream, SocketAddr) -> Fut,
  Fut: Future<Output = ()> + Send + 'static,
{
  match listener.local_addr() {
    Ok(addr) => info!(listener = name, %addr, "Listening"),
    Err(e) => error!(listener = name, error = %e, "Listener has no local address"),
  }

  loop {
    tokio::select! {
      biased;

      _ = cancel.cancelled() => {
        info!(listener = name, "Listener shutting down");
        break;
      }

      result = listener.accept() => {
        match result {
          Ok((stream, peer)) => {
            debug!(listener = name, %peer, "Connection accepted");
            tokio::spawn(on_connection(stream, peer));
          }
          Err(e) => {
            error!(listener = name, error = %e, "Accept error");
          }
        }
      }
    }
  }
}
