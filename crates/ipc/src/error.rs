use thiserror::Error;

/// Failures of the framing layer. All of them end the connection.
#[derive(Debug, Error)]
pub enum WireError {
  #[error("Connection closed")]
  Closed,

  #[error("Connection closed mid-frame ({remaining} bytes buffered)")]
  Truncated { remaining: usize },

  #[error("Frame of {len} bytes exceeds the {max} byte limit")]
  FrameTooLarge { len: usize, max: usize },

  #[error("Frame payload is not valid UTF-8")]
  InvalidUtf8,

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

impl WireError {
  /// True when the peer went away rather than the socket failing
  pub fn is_end_of_stream(&self) -> bool {
    matches!(self, WireError::Closed | WireError::Truncated { .. })
  }

  /// True when the connection can no longer carry frames.
  ///
  /// An oversized or undecodable frame is scoped to that frame.
  pub fn is_connection_lost(&self) -> bool {
    self.is_end_of_stream() || matches!(self, WireError::Io(_))
  }
}

/// A frame whose header line could not be understood. Scoped to that frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
  #[error("Empty header")]
  Empty,

  #[error("Header is missing the {0} field")]
  MissingField(&'static str),

  #[error("Unknown entity kind: {0}")]
  UnknownEntity(String),

  #[error("Invalid batch id: {0}")]
  InvalidBatchId(String),

  #[error("Header names no queries")]
  NoQueries,
}
