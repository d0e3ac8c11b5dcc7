//! Batch header grammar.
//!
//! The first line of every ingestion frame is a header:
//!
//! ```text
//! <query-list>,<ENTITY>,<client-id>,<batch-id | EOF>
//! ```
//!
//! `<query-list>` is pipe-delimited for the primary entity and a single
//! token otherwise. The remaining lines are records.

use std::fmt;

use gateway_core::{ClientId, EntityKind, QueryId};

use crate::{EOF_SENTINEL, HeaderError};

const FIELD_SEPARATOR: char = ',';
const QUERY_SEPARATOR: char = '|';

/// What a frame carries: a numbered batch of records, or the end of the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
  Batch(u64),
  EndOfStream,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchHeader {
  /// Queries fed by this frame, in header order, without duplicates
  pub queries: Vec<QueryId>,
  pub entity: EntityKind,
  pub client_id: ClientId,
  pub marker: Marker,
}

impl BatchHeader {
  pub fn batch(queries: Vec<QueryId>, entity: EntityKind, client_id: ClientId, batch_id: u64) -> Self {
    Self {
      queries,
      entity,
      client_id,
      marker: Marker::Batch(batch_id),
    }
  }

  pub fn end_of_stream(queries: Vec<QueryId>, entity: EntityKind, client_id: ClientId) -> Self {
    Self {
      queries,
      entity,
      client_id,
      marker: Marker::EndOfStream,
    }
  }

  pub fn is_end_of_stream(&self) -> bool {
    matches!(self.marker, Marker::EndOfStream)
  }

  pub fn parse(line: &str) -> Result<Self, HeaderError> {
    let line = line.trim();
    if line.is_empty() {
      return Err(HeaderError::Empty);
    }

    let fields: Vec<&str> = line.split(FIELD_SEPARATOR).map(str::trim).collect();
    if fields.len() < 2 || fields[1].is_empty() {
      return Err(HeaderError::MissingField("entity"));
    }
    let entity: EntityKind = fields[1]
      .parse()
      .map_err(|_| HeaderError::UnknownEntity(fields[1].to_string()))?;

    let client_id = match fields.get(2) {
      Some(id) if !id.is_empty() => ClientId::from(*id),
      _ => return Err(HeaderError::MissingField("client-id")),
    };

    // The sentinel is recognised in the last position even when extra
    // fields were appended after the batch id.
    let marker = match fields.get(3) {
      None => return Err(HeaderError::MissingField("batch-id")),
      Some(_) if fields.last() == Some(&EOF_SENTINEL) => Marker::EndOfStream,
      Some(raw) => raw
        .parse::<u64>()
        .map(Marker::Batch)
        .map_err(|_| HeaderError::InvalidBatchId(raw.to_string()))?,
    };

    let queries = parse_queries(fields[0], entity);
    if queries.is_empty() {
      return Err(HeaderError::NoQueries);
    }

    Ok(Self {
      queries,
      entity,
      client_id,
      marker,
    })
  }
}

fn parse_queries(raw: &str, entity: EntityKind) -> Vec<QueryId> {
  let mut queries: Vec<QueryId> = Vec::new();
  let mut push = |token: &str| {
    let token = token.trim();
    if !token.is_empty() && !queries.iter().any(|q| q.as_str() == token) {
      queries.push(QueryId::from(token));
    }
  };

  if entity.is_primary() {
    raw.split(QUERY_SEPARATOR).for_each(&mut push);
  } else {
    push(raw);
  }

  queries
}

impl fmt::Display for BatchHeader {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, query) in self.queries.iter().enumerate() {
      if i > 0 {
        write!(f, "{}", QUERY_SEPARATOR)?;
      }
      write!(f, "{}", query)?;
    }
    write!(f, ",{},{},", self.entity, self.client_id)?;
    match self.marker {
      Marker::Batch(id) => write!(f, "{}", id),
      Marker::EndOfStream => f.write_str(EOF_SENTINEL),
    }
  }
}

// ============================================================================
// Batch frame
// ============================================================================

/// A decoded ingestion frame: header plus the raw record lines
#[derive(Debug, Clone)]
pub struct Batch<'a> {
  pub header: BatchHeader,
  body: &'a str,
}

impl<'a> Batch<'a> {
  pub fn parse(payload: &'a str) -> Result<Self, HeaderError> {
    let (first, body) = payload.split_once('\n').unwrap_or((payload, ""));
    let header = BatchHeader::parse(first)?;
    Ok(Self { header, body })
  }

  /// Non-blank record lines
  pub fn records(&self) -> impl Iterator<Item = &'a str> + 'a {
    self
      .body
      .split('\n')
      .map(|line| line.trim_end_matches('\r'))
      .filter(|line| !line.trim().is_empty())
  }

  /// Render a frame payload from a header and its records
  pub fn encode<S: AsRef<str>>(header: &BatchHeader, records: &[S]) -> String {
    let mut out = header.to_string();
    for record in records {
      out.push('\n');
      out.push_str(record.as_ref());
    }
    out
  }
}
