//! Producer side of the wire protocol.
//!
//! [`IngestClient`] sends batches to one entity listener and insists on the
//! matching acknowledgement for every frame. [`ResultClient`] announces
//! itself to the result delivery service and drains result frames until
//! every awaited query has ended. [`Batcher`] groups records so no frame
//! exceeds the codec limit.

use std::collections::BTreeSet;

use gateway_core::{ClientId, EntityKind, QueryId};
use ipc::{
  Ack, Announcement, Batch, BatchHeader, FramedConnection, MAX_FRAME_LEN, RESULT_ACK, ResultFrame, WireError,
};
use tokio::{
  io::{AsyncRead, AsyncWrite},
  net::TcpStream,
};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
  #[error("Failed to connect to {address}: {source}")]
  Connect {
    address: String,
    #[source]
    source: std::io::Error,
  },
  #[error("Wire error: {0}")]
  Wire(#[from] WireError),
  #[error("Expected acknowledgement {expected:?}, received {received:?}")]
  AckMismatch { expected: String, received: String },
  #[error("Record of {len} bytes cannot fit in a frame (limit {max})")]
  RecordTooLarge { len: usize, max: usize },
  #[error("Unexpected frame: {0:?}")]
  UnexpectedFrame(String),
  #[error("{entity} batches feed a single query, got {count}")]
  TooManyQueries { entity: EntityKind, count: usize },
}

async fn connect(address: &str) -> Result<TcpStream, ClientError> {
  TcpStream::connect(address)
    .await
    .map_err(|source| ClientError::Connect {
      address: address.to_string(),
      source,
    })
}

/// Ask the assignment listener for a fresh client id.
pub async fn request_client_id(address: &str) -> Result<ClientId, ClientError> {
  let mut conn = FramedConnection::new(connect(address).await?);
  let id = conn.read().await?;
  let id = id.trim();
  if id.is_empty() {
    return Err(ClientError::UnexpectedFrame(id.to_string()));
  }
  Ok(ClientId::from(id))
}

// ============================================================================
// Ingestion
// ============================================================================

/// Sends one entity's records to the ingestion router
pub struct IngestClient<T> {
  conn: FramedConnection<T>,
  entity: EntityKind,
  client_id: ClientId,
  next_batch: u64,
}

impl IngestClient<TcpStream> {
  pub async fn connect(address: &str, entity: EntityKind, client_id: ClientId) -> Result<Self, ClientError> {
    Ok(Self::new(connect(address).await?, entity, client_id))
  }
}

impl<T> IngestClient<T>
where
  T: AsyncRead + AsyncWrite + Unpin,
{
  pub fn new(io: T, entity: EntityKind, client_id: ClientId) -> Self {
    Self {
      conn: FramedConnection::new(io),
      entity,
      client_id,
      next_batch: 0,
    }
  }

  /// Only the primary entity may name several queries in one header.
  fn check_queries(&self, queries: &[QueryId]) -> Result<(), ClientError> {
    if !self.entity.is_primary() && queries.len() > 1 {
      return Err(ClientError::TooManyQueries {
        entity: self.entity,
        count: queries.len(),
      });
    }
    Ok(())
  }

  /// Bytes the header line of a batch for `queries` can take, for sizing a [`Batcher`]
  pub fn header_reserve(&self, queries: &[QueryId]) -> usize {
    BatchHeader::batch(queries.to_vec(), self.entity, self.client_id.clone(), u64::MAX)
      .to_string()
      .len()
  }

  /// Send one batch and wait for its acknowledgement. Returns the batch id.
  pub async fn send_batch<S: AsRef<str>>(&mut self, queries: &[QueryId], records: &[S]) -> Result<u64, ClientError> {
    self.check_queries(queries)?;
    let batch_id = self.next_batch;
    let header = BatchHeader::batch(queries.to_vec(), self.entity, self.client_id.clone(), batch_id);

    self.conn.write(&Batch::encode(&header, records)).await?;
    self
      .expect_ack(Ack::Batch {
        entity: self.entity,
        batch_id,
      })
      .await?;

    self.next_batch += 1;
    debug!(entity = %self.entity, batch_id, records = records.len(), "Batch acknowledged");
    Ok(batch_id)
  }

  /// Tell the router this entity's stream is over for `queries`.
  pub async fn send_end_of_stream(&mut self, queries: &[QueryId]) -> Result<(), ClientError> {
    self.check_queries(queries)?;
    let header = BatchHeader::end_of_stream(queries.to_vec(), self.entity, self.client_id.clone());
    self.conn.write(&header.to_string()).await?;
    self.expect_ack(Ack::EndOfStream { entity: self.entity }).await?;

    info!(entity = %self.entity, batches = self.next_batch, "End of stream acknowledged");
    Ok(())
  }

  async fn expect_ack(&mut self, expected: Ack) -> Result<(), ClientError> {
    let received = self.conn.read().await?;
    match received.parse::<Ack>() {
      Ok(ack) if ack == expected => Ok(()),
      _ => Err(ClientError::AckMismatch {
        expected: expected.to_string(),
        received,
      }),
    }
  }
}

// ============================================================================
// Batching
// ============================================================================

/// Groups records into batches bounded by count and by frame size.
#[derive(Debug)]
pub struct Batcher {
  max_records: usize,
  max_bytes: usize,
  pending: Vec<String>,
  bytes: usize,
}

impl Batcher {
  /// `header_reserve` is the room kept for the header line of each frame.
  pub fn new(max_records: usize, header_reserve: usize) -> Self {
    Self {
      max_records: max_records.max(1),
      max_bytes: MAX_FRAME_LEN.saturating_sub(header_reserve),
      pending: Vec::new(),
      bytes: 0,
    }
  }

  /// Add a record. Returns the previous batch when this record did not fit.
  pub fn push(&mut self, record: impl Into<String>) -> Result<Option<Vec<String>>, ClientError> {
    let record = record.into();
    // every record is preceded by a newline in the frame
    let cost = record.len() + 1;
    if cost > self.max_bytes {
      return Err(ClientError::RecordTooLarge {
        len: record.len(),
        max: self.max_bytes.saturating_sub(1),
      });
    }

    let full = self.pending.len() >= self.max_records || self.bytes + cost > self.max_bytes;
    let flushed = if full { self.finish() } else { None };

    self.bytes += cost;
    self.pending.push(record);
    Ok(flushed)
  }

  /// Take whatever is pending
  pub fn finish(&mut self) -> Option<Vec<String>> {
    if self.pending.is_empty() {
      return None;
    }
    self.bytes = 0;
    Some(std::mem::take(&mut self.pending))
  }
}

// ============================================================================
// Results
// ============================================================================

/// Receives query results on an announced connection
pub struct ResultClient<T> {
  conn: FramedConnection<T>,
  awaiting: BTreeSet<QueryId>,
}

impl ResultClient<TcpStream> {
  pub async fn connect(
    address: &str,
    client_id: ClientId,
    queries: impl IntoIterator<Item = QueryId>,
  ) -> Result<Self, ClientError> {
    Self::announce(connect(address).await?, client_id, queries).await
  }
}

impl<T> ResultClient<T>
where
  T: AsyncRead + AsyncWrite + Unpin,
{
  pub async fn announce(
    io: T,
    client_id: ClientId,
    queries: impl IntoIterator<Item = QueryId>,
  ) -> Result<Self, ClientError> {
    let mut conn = FramedConnection::new(io);
    conn.write(&Announcement::new(client_id).to_string()).await?;

    Ok(Self {
      conn,
      awaiting: queries.into_iter().collect(),
    })
  }

  /// Next result frame, acknowledged. `None` once every awaited query ended.
  pub async fn next(&mut self) -> Result<Option<ResultFrame>, ClientError> {
    if self.awaiting.is_empty() {
      return Ok(None);
    }

    let payload = self.conn.read().await?;
    let frame = ResultFrame::parse(&payload).ok_or(ClientError::UnexpectedFrame(payload))?;
    self.conn.write(RESULT_ACK).await?;

    if frame.is_end_of_stream() {
      self.awaiting.remove(&frame.query);
      info!(query = %frame.query, remaining = self.awaiting.len(), "Query finished");
    }
    Ok(Some(frame))
  }
}
