//! One producer connection.
//!
//! Frames are handled strictly in arrival order: decode, publish, then
//! acknowledge. The acknowledgement for a frame is written only after every
//! publish for it has completed, so a producer never sees an ack for data
//! the router has not handed to the broker.
//!
//! A connection may carry several end-of-stream notices, one per query it
//! feeds; it stays open until the producer closes it.

use gateway_core::{ClientId, EntityKind};
use ipc::{Ack, Batch, FramedConnection, Marker, WireError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::router::{FanOutReport, Router};

/// What happened on a connection by the time its task ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
  pub client_id: Option<ClientId>,
  pub batches: u64,
  pub malformed: u64,
  /// Query routes a batch could not be published to
  pub skipped: u64,
  pub end_of_streams: u64,
  /// One report per routed query, across every end-of-stream notice
  pub fan_out: Vec<FanOutReport>,
}

enum Next {
  Frame(String),
  Stop,
}

/// Serve one producer connection on the listener for `entity`.
///
/// Returns when the producer disconnects, idles past the read deadline, or
/// `cancel` fires. Wire errors other than
/// a clean close end the session with an error.
pub async fn serve_producer<T>(
  io: T,
  entity: EntityKind,
  router: &Router,
  cancel: CancellationToken,
) -> Result<SessionSummary, WireError>
where
  T: AsyncRead + AsyncWrite + Unpin,
{
  let mut conn = FramedConnection::new(io);
  let mut summary = SessionSummary::default();
  let read_timeout = router.settings().read_timeout;

  loop {
    let next = tokio::select! {
      biased;

      _ = cancel.cancelled() => Next::Stop,

      read = tokio::time::timeout(read_timeout, conn.read()) => match read {
        Err(_) => {
          warn!(%entity, timeout_secs = read_timeout.as_secs(), "Producer idle past read deadline, closing");
          Next::Stop
        }
        Ok(Err(e)) if e.is_end_of_stream() => {
          debug!(%entity, error = %e, "Producer disconnected");
          Next::Stop
        }
        Ok(Err(e)) => return Err(e),
        Ok(Ok(payload)) => Next::Frame(payload),
      },
    };

    let payload = match next {
      Next::Frame(payload) => payload,
      Next::Stop => break,
    };

    let batch = match Batch::parse(&payload) {
      Ok(batch) => batch,
      Err(e) => {
        warn!(%entity, error = %e, "Malformed batch header, skipping frame");
        summary.malformed += 1;
        continue;
      }
    };

    let header = &batch.header;
    if header.entity != entity {
      debug!(listener = %entity, header = %header.entity, "Frame entity differs from listener");
    }
    if summary.client_id.is_none() {
      summary.client_id = Some(header.client_id.clone());
    }

    match header.marker {
      Marker::Batch(batch_id) => {
        let outcome = router.route_batch(&batch, batch_id).await;
        summary.skipped += outcome.skipped.len() as u64;
        let ack = Ack::Batch {
          entity: header.entity,
          batch_id,
        };
        conn.write(&ack.to_string()).await?;
        summary.batches += 1;
      }
      Marker::EndOfStream => {
        let reports = router.fan_out(header).await;
        let ack = Ack::EndOfStream { entity: header.entity };
        conn.write(&ack.to_string()).await?;

        summary.end_of_streams += 1;
        info!(
          client_id = %header.client_id,
          entity = %header.entity,
          batches = summary.batches,
          notices = summary.end_of_streams,
          "End of stream acknowledged"
        );
        summary.fan_out.extend(reports);
      }
    }
  }

  Ok(summary)
}
