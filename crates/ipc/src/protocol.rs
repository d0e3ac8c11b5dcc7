//! Fixed payload shapes exchanged over frames.
//!
//! | direction                  | payload                         |
//! |----------------------------|---------------------------------|
//! | router -> producer         | `MOVIES_ACK:<batch>` / `MOVIES_EOF_ACK` |
//! | producer -> delivery       | `CLIENT_ID,<client-id>`         |
//! | delivery -> producer       | `<query>\n<rows>` / `<query>\nEOF` |
//! | producer -> delivery       | `RESULT_ACK`                    |

use std::{fmt, str::FromStr};

use gateway_core::{ClientId, EntityKind, QueryId};

/// Reserved token meaning "no more data"
pub const EOF_SENTINEL: &str = "EOF";

/// Literal a producer sends back for every delivered result frame
pub const RESULT_ACK: &str = "RESULT_ACK";

/// First token of a result-connection announcement
pub const ANNOUNCEMENT_TAG: &str = "CLIENT_ID";

const ACK_SUFFIX: &str = "_ACK:";
const EOF_ACK_SUFFIX: &str = "_EOF_ACK";

// ============================================================================
// Acknowledgements
// ============================================================================

/// Router response to one ingestion frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
  Batch { entity: EntityKind, batch_id: u64 },
  EndOfStream { entity: EntityKind },
}

impl fmt::Display for Ack {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Ack::Batch { entity, batch_id } => write!(f, "{}{}{}", entity, ACK_SUFFIX, batch_id),
      Ack::EndOfStream { entity } => write!(f, "{}{}", entity, EOF_ACK_SUFFIX),
    }
  }
}

impl FromStr for Ack {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();

    if let Some(entity) = s.strip_suffix(EOF_ACK_SUFFIX) {
      let entity = entity.parse()?;
      return Ok(Ack::EndOfStream { entity });
    }

    if let Some((entity, batch_id)) = s.split_once(ACK_SUFFIX) {
      let entity = entity.parse()?;
      let batch_id = batch_id
        .parse()
        .map_err(|_| format!("Invalid batch id in ack: {}", batch_id))?;
      return Ok(Ack::Batch { entity, batch_id });
    }

    Err(format!("Not an acknowledgement: {}", s))
  }
}

// ============================================================================
// Announcement
// ============================================================================

/// First frame on a result connection: which client this connection serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
  pub client_id: ClientId,
}

impl Announcement {
  pub fn new(client_id: ClientId) -> Self {
    Self { client_id }
  }

  /// Parse `CLIENT_ID,<client-id>`. The payload must be a single line.
  pub fn parse(payload: &str) -> Option<Self> {
    let line = payload.trim_end_matches(['\r', '\n']);
    if line.contains('\n') {
      return None;
    }

    let (tag, id) = line.split_once(',')?;
    let id = id.trim();
    if tag.trim() != ANNOUNCEMENT_TAG || id.is_empty() {
      return None;
    }

    Some(Self {
      client_id: ClientId::from(id),
    })
  }
}

impl fmt::Display for Announcement {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{},{}", ANNOUNCEMENT_TAG, self.client_id)
  }
}

// ============================================================================
// Result frames
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultBody {
  Rows(String),
  EndOfStream,
}

/// One frame of query output sent to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFrame {
  pub query: QueryId,
  pub body: ResultBody,
}

impl ResultFrame {
  pub fn rows(query: QueryId, rows: impl Into<String>) -> Self {
    Self {
      query,
      body: ResultBody::Rows(rows.into()),
    }
  }

  pub fn end_of_stream(query: QueryId) -> Self {
    Self {
      query,
      body: ResultBody::EndOfStream,
    }
  }

  pub fn is_end_of_stream(&self) -> bool {
    matches!(self.body, ResultBody::EndOfStream)
  }

  pub fn parse(payload: &str) -> Option<Self> {
    let (query, rest) = payload.split_once('\n').unwrap_or((payload, ""));
    let query = query.trim();
    if query.is_empty() {
      return None;
    }

    let body = if rest.trim() == EOF_SENTINEL {
      ResultBody::EndOfStream
    } else {
      ResultBody::Rows(rest.to_string())
    };

    Some(Self {
      query: QueryId::from(query),
      body,
    })
  }
}

impl fmt::Display for ResultFrame {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.body {
      ResultBody::Rows(rows) => write!(f, "{}\n{}", self.query, rows),
      ResultBody::EndOfStream => write!(f, "{}\n{}", self.query, EOF_SENTINEL),
    }
  }
}
