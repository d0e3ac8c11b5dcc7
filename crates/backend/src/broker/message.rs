use std::collections::BTreeMap;

use bytes::Bytes;
use gateway_core::{ClientId, EntityKind, QueryId};

/// Metadata keys shared with the worker processes
pub mod headers {
  pub const QUERY: &str = "Query";
  pub const CLIENT_ID: &str = "ClientID";
  pub const BATCH_ID: &str = "BatchID";
  pub const MESSAGE_ID: &str = "MessageID";
  pub const TYPE: &str = "type";
}

/// `type` value marking a termination signal on the results queue
pub const RESULT_EOF_TYPE: &str = "EOF";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
  #[error("Message is missing the {0} header")]
  MissingHeader(&'static str),
  #[error("Message body is not valid UTF-8")]
  InvalidBody,
}

/// A message as it travels through a queue: key-value metadata plus an opaque body
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueMessage {
  pub headers: BTreeMap<String, String>,
  pub body: Bytes,
}

impl QueueMessage {
  pub fn new(body: impl Into<Bytes>) -> Self {
    Self {
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
    self.headers.insert(key.to_string(), value.into());
    self
  }

  pub fn header(&self, key: &str) -> Option<&str> {
    self.headers.get(key).map(String::as_str)
  }

  /// A batch of projected records for one query's pipeline
  pub fn batch(
    query: &QueryId,
    client_id: &ClientId,
    batch_id: u64,
    entity: EntityKind,
    body: impl Into<Bytes>,
  ) -> Self {
    let batch_id = batch_id.to_string();
    Self::new(body)
      .with_header(headers::QUERY, query.as_str())
      .with_header(headers::CLIENT_ID, client_id.as_str())
      .with_header(headers::MESSAGE_ID, batch_id.clone())
      .with_header(headers::BATCH_ID, batch_id)
      .with_header(headers::TYPE, entity.as_str())
  }

  /// One termination signal for one worker replica
  pub fn end_of_stream(query: &QueryId, client_id: &ClientId, entity: EntityKind) -> Self {
    Self::new(Bytes::new())
      .with_header(headers::QUERY, query.as_str())
      .with_header(headers::CLIENT_ID, client_id.as_str())
      .with_header(headers::TYPE, entity.eof_tag())
  }

  /// A worker's output for a client's query; used by workers and tests
  pub fn result(query: &QueryId, client_id: &ClientId, rows: impl Into<Bytes>) -> Self {
    Self::new(rows)
      .with_header(headers::QUERY, query.as_str())
      .with_header(headers::CLIENT_ID, client_id.as_str())
  }

  /// A worker's termination signal on the results queue
  pub fn result_end_of_stream(query: &QueryId, client_id: &ClientId) -> Self {
    Self::result(query, client_id, Bytes::new()).with_header(headers::TYPE, RESULT_EOF_TYPE)
  }

  /// Classify a results-queue message
  pub fn result_meta(&self) -> Result<ResultMeta, MessageError> {
    let client_id = self
      .header(headers::CLIENT_ID)
      .filter(|v| !v.is_empty())
      .ok_or(MessageError::MissingHeader(headers::CLIENT_ID))?;
    let query = self
      .header(headers::QUERY)
      .filter(|v| !v.is_empty())
      .ok_or(MessageError::MissingHeader(headers::QUERY))?;

    let kind = match self.header(headers::TYPE) {
      Some(RESULT_EOF_TYPE) => ResultKind::EndOfStream,
      _ => ResultKind::Rows,
    };

    Ok(ResultMeta {
      client_id: ClientId::from(client_id),
      query: QueryId::from(query),
      kind,
    })
  }

  pub fn body_text(&self) -> Result<&str, MessageError> {
    std::str::from_utf8(&self.body).map_err(|_| MessageError::InvalidBody)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
  Rows,
  EndOfStream,
}

/// Typed view of a results-queue message's metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultMeta {
  pub client_id: ClientId,
  pub query: QueryId,
  pub kind: ResultKind,
}
