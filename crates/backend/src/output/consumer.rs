//! Results-queue consumption.
//!
//! A single task drains the results queue in order. Result rows go straight
//! to the owning client; termination signals pass through the fan-in
//! barrier first and only the last one is forwarded.

use std::{sync::Arc, time::Duration};

use gateway_core::{ClientId, EofMultiplicity};
use ipc::ResultFrame;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
  countdown::{Countdown, FanInCountdown},
  registry::{AckOutcome, ClientRegistry},
};
use crate::broker::{MessageError, QueueMessage, ResultKind, Subscription};

/// What processing one results-queue message led to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
  /// Frame written and acknowledged
  Delivered,
  /// Frame written, client answered something else
  AckMismatch(String),
  /// Frame written, no answer in time
  AckTimedOut,
  /// Termination counted, more are expected
  Awaiting { remaining: u32 },
  /// No connection registered for the client; message dropped
  NoClient,
  /// Connection failed during delivery; client removed
  Disconnected,
  /// An earlier frame was never acknowledged; client removed and closed
  Desynchronised,
  /// Frame could not be encoded, e.g. too large; client kept
  Undeliverable(String),
  /// Message metadata or body unusable; message dropped
  Malformed(MessageError),
}

impl Delivery {
  /// Whether a frame reached the client's connection
  pub fn forwarded(&self) -> bool {
    matches!(self, Delivery::Delivered | Delivery::AckMismatch(_) | Delivery::AckTimedOut)
  }
}

pub struct ResultConsumer<T> {
  registry: Arc<ClientRegistry<T>>,
  countdown: FanInCountdown,
  multiplicity: Arc<EofMultiplicity>,
  ack_timeout: Duration,
}

impl<T> ResultConsumer<T>
where
  T: AsyncRead + AsyncWrite + Unpin + Send,
{
  pub fn new(registry: Arc<ClientRegistry<T>>, multiplicity: Arc<EofMultiplicity>, ack_timeout: Duration) -> Self {
    Self {
      registry,
      countdown: FanInCountdown::new(),
      multiplicity,
      ack_timeout,
    }
  }

  pub fn countdown(&self) -> &FanInCountdown {
    &self.countdown
  }

  /// Drain `subscription` until it ends or `cancel` fires.
  ///
  /// A message already being processed finishes; no new one is pulled after
  /// cancellation.
  pub async fn run(&self, mut subscription: Box<dyn Subscription>, cancel: CancellationToken) -> u64 {
    let mut processed = 0u64;
    let mut forwarded = 0u64;

    loop {
      let message = tokio::select! {
        biased;

        _ = cancel.cancelled() => {
          info!(processed, forwarded, "Result consumer stopping (cancelled)");
          break;
        }

        message = subscription.next() => message,
      };

      let Some(message) = message else {
        warn!(processed, forwarded, "Results subscription ended");
        break;
      };

      if self.process(&message).await.forwarded() {
        forwarded += 1;
      }
      processed += 1;
    }

    processed
  }

  /// Handle one results-queue message.
  pub async fn process(&self, message: &QueueMessage) -> Delivery {
    let meta = match message.result_meta() {
      Ok(meta) => meta,
      Err(e) => {
        warn!(error = %e, "Dropping result message");
        return Delivery::Malformed(e);
      }
    };

    let frame = match meta.kind {
      ResultKind::EndOfStream => {
        let expected = self.multiplicity.results(&meta.query);
        match self.countdown.observe(&meta.client_id, &meta.query, expected).await {
          Countdown::Pending { remaining } => {
            debug!(
              client_id = %meta.client_id,
              query = %meta.query,
              remaining,
              "Termination counted, waiting for more"
            );
            return Delivery::Awaiting { remaining };
          }
          Countdown::Complete => {
            info!(client_id = %meta.client_id, query = %meta.query, "All terminations received");
            ResultFrame::end_of_stream(meta.query)
          }
        }
      }
      ResultKind::Rows => match message.body_text() {
        Ok(rows) => ResultFrame::rows(meta.query, rows),
        Err(e) => {
          warn!(client_id = %meta.client_id, query = %meta.query, error = %e, "Dropping result message");
          return Delivery::Malformed(e);
        }
      },
    };

    self.deliver(&meta.client_id, &frame).await
  }

  async fn deliver(&self, client_id: &ClientId, frame: &ResultFrame) -> Delivery {
    let Some(handle) = self.registry.get(client_id).await else {
      warn!(client_id = %client_id, query = %frame.query, "Client not connected, dropping result");
      return Delivery::NoClient;
    };

    match handle.deliver(frame, self.ack_timeout).await {
      Ok(AckOutcome::Acked) => {
        debug!(
          client_id = %client_id,
          query = %frame.query,
          end_of_stream = frame.is_end_of_stream(),
          "Result delivered"
        );
        Delivery::Delivered
      }
      Ok(AckOutcome::Mismatch(reply)) => {
        warn!(client_id = %client_id, query = %frame.query, reply = %reply, "Unexpected result acknowledgement");
        Delivery::AckMismatch(reply)
      }
      Ok(AckOutcome::TimedOut) => {
        warn!(
          client_id = %client_id,
          query = %frame.query,
          timeout_secs = self.ack_timeout.as_secs(),
          "No result acknowledgement in time"
        );
        Delivery::AckTimedOut
      }
      Ok(AckOutcome::Desynchronised) => {
        error!(client_id = %client_id, query = %frame.query, "Earlier result never acknowledged, dropping client");
        if self.registry.remove_if_current(client_id, &handle).await {
          handle.close().await;
        }
        Delivery::Desynchronised
      }
      Err(e) if !e.is_connection_lost() => {
        error!(client_id = %client_id, query = %frame.query, error = %e, "Result frame not deliverable, dropping");
        Delivery::Undeliverable(e.to_string())
      }
      Err(e) => {
        error!(client_id = %client_id, query = %frame.query, error = %e, "Client connection lost");
        self.registry.remove_if_current(client_id, &handle).await;
        Delivery::Disconnected
      }
    }
  }
}
