//! Fan-in barrier for termination signals on the results queue.
//!
//! Every worker replica of a query's last stage emits one termination per
//! client. The client may only be told the query is finished once all of
//! them arrived. Signals are counted per `(client, query)` and the order in
//! which replicas report does not matter.

use std::collections::HashMap;

use gateway_core::{ClientId, QueryId};
use tokio::sync::Mutex;

type Key = (ClientId, QueryId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
  /// More signals are expected before the client is notified
  Pending { remaining: u32 },
  /// This signal was the last one; forward the terminal marker now
  Complete,
}

#[derive(Debug, Default)]
pub struct FanInCountdown {
  entries: Mutex<HashMap<Key, u32>>,
}

impl FanInCountdown {
  pub fn new() -> Self {
    Self::default()
  }

  /// Count one termination signal for `(client_id, query)` out of `expected`.
  ///
  /// The first signal creates the entry with `expected - 1` remaining; each
  /// later one decrements it. The entry is removed when it reaches zero, so
  /// a completed pair starts from scratch if signals ever arrive again.
  pub async fn observe(&self, client_id: &ClientId, query: &QueryId, expected: u32) -> Countdown {
    let key = (client_id.clone(), query.clone());
    let mut entries = self.entries.lock().await;

    let remaining = match entries.get_mut(&key) {
      Some(remaining) => {
        *remaining = remaining.saturating_sub(1);
        *remaining
      }
      None => expected.saturating_sub(1),
    };

    if remaining == 0 {
      entries.remove(&key);
      Countdown::Complete
    } else {
      entries.insert(key, remaining);
      Countdown::Pending { remaining }
    }
  }

  /// Signals still outstanding, `None` when no count is in progress
  pub async fn remaining(&self, client_id: &ClientId, query: &QueryId) -> Option<u32> {
    let entries = self.entries.lock().await;
    entries.get(&(client_id.clone(), query.clone())).copied()
  }

  /// Drop an in-progress count
  pub async fn forget(&self, client_id: &ClientId, query: &QueryId) -> Option<u32> {
    let mut entries = self.entries.lock().await;
    entries.remove(&(client_id.clone(), query.clone()))
  }

  pub async fn len(&self) -> usize {
    self.entries.lock().await.len()
  }
}
