//! Queue broker seam.
//!
//! Both gateways talk to the pipeline through named, ordered queues. The
//! [`Broker`] trait is the whole contract they rely on; [`MemoryBroker`] is
//! the in-process implementation used by the daemon and the tests.

mod memory;
mod message;

use async_trait::async_trait;

pub use memory::MemoryBroker;
pub use message::{MessageError, QueueMessage, RESULT_EOF_TYPE, ResultKind, ResultMeta, headers};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
  #[error("Broker is closed")]
  Closed,
  #[error("Queue not declared: {0}")]
  UnknownQueue(String),
  #[error("Broker unavailable: {0}")]
  Unavailable(String),
}

/// Ordered, at-least-once delivery over named queues.
#[async_trait]
pub trait Broker: Send + Sync {
  /// Create the queue if it does not exist yet. Idempotent.
  async fn declare(&self, queue: &str) -> Result<(), BrokerError>;

  /// Append a message to a declared queue, waiting for capacity.
  async fn publish(&self, queue: &str, message: QueueMessage) -> Result<(), BrokerError>;

  /// Attach a consumer. Several consumers of one queue compete for messages.
  async fn consume(&self, queue: &str) -> Result<Box<dyn Subscription>, BrokerError>;

  /// Stop accepting publishes and end every subscription.
  async fn close(&self);
}

/// A consumer attached to one queue.
#[async_trait]
pub trait Subscription: Send {
  /// Next message in queue order, `None` once the broker is closed.
  async fn next(&mut self) -> Option<QueueMessage>;
}
