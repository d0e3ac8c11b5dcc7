//! In-process broker backed by bounded tokio channels.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{Broker, BrokerError, QueueMessage, Subscription};

type SharedReceiver = Arc<Mutex<mpsc::Receiver<QueueMessage>>>;

struct Queue {
  tx: mpsc::Sender<QueueMessage>,
  rx: SharedReceiver,
}

/// Named FIFO queues living in this process.
///
/// Each queue is a bounded channel, so a slow consumer applies back-pressure
/// to publishers. Consumers of the same queue share one receiver and
/// therefore compete for messages, like worker replicas on a real broker.
pub struct MemoryBroker {
  queues: RwLock<HashMap<String, Queue>>,
  capacity: usize,
  closed: CancellationToken,
}

impl MemoryBroker {
  pub fn new(capacity: usize) -> Self {
    Self {
      queues: RwLock::new(HashMap::new()),
      capacity: capacity.max(1),
      closed: CancellationToken::new(),
    }
  }

  /// Messages currently waiting in a queue
  pub async fn pending(&self, queue: &str) -> Option<usize> {
    let queues = self.queues.read().await;
    queues.get(queue).map(|q| q.tx.max_capacity() - q.tx.capacity())
  }

  pub fn is_closed(&self) -> bool {
    self.closed.is_cancelled()
  }

  async fn sender(&self, queue: &str) -> Result<mpsc::Sender<QueueMessage>, BrokerError> {
    let queues = self.queues.read().await;
    queues
      .get(queue)
      .map(|q| q.tx.clone())
      .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))
  }
}

impl Default for MemoryBroker {
  fn default() -> Self {
    Self::new(1024)
  }
}

#[async_trait]
impl Broker for MemoryBroker {
  async fn declare(&self, queue: &str) -> Result<(), BrokerError> {
    if self.is_closed() {
      return Err(BrokerError::Closed);
    }

    let mut queues = self.queues.write().await;
    if !queues.contains_key(queue) {
      let (tx, rx) = mpsc::channel(self.capacity);
      queues.insert(
        queue.to_string(),
        Queue {
          tx,
          rx: Arc::new(Mutex::new(rx)),
        },
      );
      debug!(queue, capacity = self.capacity, "Queue declared");
    }
    Ok(())
  }

  async fn publish(&self, queue: &str, message: QueueMessage) -> Result<(), BrokerError> {
    if self.is_closed() {
      return Err(BrokerError::Closed);
    }
    let tx = self.sender(queue).await?;

    tokio::select! {
      biased;

      _ = self.closed.cancelled() => Err(BrokerError::Closed),

      sent = tx.send(message) => {
        sent.map_err(|_| BrokerError::Closed)?;
        trace!(queue, "Message published");
        Ok(())
      }
    }
  }

  async fn consume(&self, queue: &str) -> Result<Box<dyn Subscription>, BrokerError> {
    if self.is_closed() {
      return Err(BrokerError::Closed);
    }

    let queues = self.queues.read().await;
    let rx = queues
      .get(queue)
      .map(|q| Arc::clone(&q.rx))
      .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;

    Ok(Box::new(MemorySubscription {
      rx,
      closed: self.closed.clone(),
    }))
  }

  async fn close(&self) {
    if !self.closed.is_cancelled() {
      debug!("Broker closing");
      self.closed.cancel();
    }
  }
}

struct MemorySubscription {
  rx: SharedReceiver,
  closed: CancellationToken,
}

#[async_trait]
impl Subscription for MemorySubscription {
  async fn next(&mut self) -> Option<QueueMessage> {
    tokio::select! {
      biased;

      _ = self.closed.cancelled() => None,

      message = async {
        let mut rx = self.rx.lock().await;
        rx.recv().await
      } => message,
    }
  }
}
