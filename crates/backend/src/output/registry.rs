//! Client registry.
//!
//! Maps a client id to the one live connection its results go to. Lookups
//! happen for every result message, inserts once per client session, so
//! the map sits behind a read-write lock. All access goes through the
//! methods here.

use std::{
  collections::HashMap,
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use gateway_core::ClientId;
use ipc::{FramedConnection, RESULT_ACK, ResultFrame, WireError};
use tokio::{
  io::{AsyncRead, AsyncWrite},
  sync::{Mutex, RwLock},
};
use tracing::{debug, info};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// How a client answered a delivered frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
  Acked,
  Mismatch(String),
  TimedOut,
  /// An earlier frame's acknowledgement never arrived; nothing was written
  Desynchronised,
}

/// The connection plus the replies it still owes for timed-out frames
#[derive(Debug)]
struct Link<T> {
  conn: FramedConnection<T>,
  owed_replies: u32,
}

/// A registered result connection.
///
/// Clones share the connection. Each handle created with [`ClientHandle::new`]
/// has its own identity, so a stale handle can be told apart from the one
/// that replaced it.
#[derive(Debug)]
pub struct ClientHandle<T> {
  id: u64,
  link: Arc<Mutex<Link<T>>>,
}

impl<T> Clone for ClientHandle<T> {
  fn clone(&self) -> Self {
    Self {
      id: self.id,
      link: Arc::clone(&self.link),
    }
  }
}

impl<T> ClientHandle<T>
where
  T: AsyncRead + AsyncWrite + Unpin + Send,
{
  pub fn new(conn: FramedConnection<T>) -> Self {
    Self {
      id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
      link: Arc::new(Mutex::new(Link { conn, owed_replies: 0 })),
    }
  }

  pub fn same_connection(&self, other: &Self) -> bool {
    self.id == other.id
  }

  /// Write a result frame and wait for the client's acknowledgement.
  ///
  /// A missing or wrong acknowledgement is reported, not raised. A reply
  /// that arrives after its timeout is consumed before the next frame is
  /// written, so replies stay paired with their frames; if it does not show
  /// up within `ack_timeout` either, the link is [`AckOutcome::Desynchronised`].
  pub async fn deliver(&self, frame: &ResultFrame, ack_timeout: Duration) -> Result<AckOutcome, WireError> {
    let mut link = self.link.lock().await;

    while link.owed_replies > 0 {
      match tokio::time::timeout(ack_timeout, link.conn.read()).await {
        Err(_) => return Ok(AckOutcome::Desynchronised),
        Ok(Err(e)) => return Err(e),
        Ok(Ok(reply)) => {
          debug!(reply = %reply, "Late acknowledgement consumed");
          link.owed_replies -= 1;
        }
      }
    }

    link.conn.write(&frame.to_string()).await?;

    match tokio::time::timeout(ack_timeout, link.conn.read()).await {
      Err(_) => {
        link.owed_replies += 1;
        Ok(AckOutcome::TimedOut)
      }
      Ok(Err(e)) => Err(e),
      Ok(Ok(reply)) if reply.trim() == RESULT_ACK => Ok(AckOutcome::Acked),
      Ok(Ok(reply)) => Ok(AckOutcome::Mismatch(reply)),
    }
  }

  /// Shut down the write half; the client sees end-of-stream.
  pub async fn close(&self) {
    let mut link = self.link.lock().await;
    if let Err(e) = link.conn.shutdown().await {
      debug!(error = %e, "Error closing client connection");
    }
  }
}

pub struct ClientRegistry<T> {
  clients: RwLock<HashMap<ClientId, ClientHandle<T>>>,
}

impl<T> Default for ClientRegistry<T> {
  fn default() -> Self {
    Self {
      clients: RwLock::new(HashMap::new()),
    }
  }
}

impl<T> ClientRegistry<T>
where
  T: AsyncRead + AsyncWrite + Unpin + Send,
{
  pub fn new() -> Self {
    Self::default()
  }

  /// Map `client_id` to `handle`. A previous connection for the same id is
  /// closed and returned.
  pub async fn register(&self, client_id: ClientId, handle: ClientHandle<T>) -> Option<ClientHandle<T>> {
    let displaced = {
      let mut clients = self.clients.write().await;
      let displaced = clients.insert(client_id.clone(), handle);
      debug!(active_count = clients.len(), "Registered clients");
      displaced
    };

    match displaced {
      Some(old) => {
        info!(client_id = %client_id, "Client re-announced, replacing previous connection");
        old.close().await;
        Some(old)
      }
      None => {
        info!(client_id = %client_id, "Client registered");
        None
      }
    }
  }

  pub async fn get(&self, client_id: &ClientId) -> Option<ClientHandle<T>> {
    let clients = self.clients.read().await;
    clients.get(client_id).cloned()
  }

  pub async fn remove(&self, client_id: &ClientId) -> Option<ClientHandle<T>> {
    let mut clients = self.clients.write().await;
    let removed = clients.remove(client_id);
    if removed.is_some() {
      info!(client_id = %client_id, "Client removed");
    }
    removed
  }

  /// Remove the entry only if it still points at `handle`.
  ///
  /// Returns false when a newer announcement already replaced it.
  pub async fn remove_if_current(&self, client_id: &ClientId, handle: &ClientHandle<T>) -> bool {
    let mut clients = self.clients.write().await;
    match clients.get(client_id) {
      Some(current) if current.same_connection(handle) => {
        clients.remove(client_id);
        info!(client_id = %client_id, "Client removed");
        true
      }
      _ => false,
    }
  }

  /// Close and forget every registered connection. Returns how many there were.
  pub async fn close_all(&self) -> usize {
    let drained: Vec<(ClientId, ClientHandle<T>)> = {
      let mut clients = self.clients.write().await;
      clients.drain().collect()
    };

    for (client_id, handle) in &drained {
      info!(client_id = %client_id, "Closing client connection");
      handle.close().await;
    }
    drained.len()
  }

  pub async fn len(&self) -> usize {
    self.clients.read().await.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.clients.read().await.is_empty()
  }
}
