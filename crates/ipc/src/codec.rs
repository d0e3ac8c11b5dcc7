//! Length-prefixed framing.
//!
//! ```text
//! +----------------+---------------------+
//! | len: u16 (BE)  | payload: len bytes  |
//! +----------------+---------------------+
//! ```
//!
//! `FrameCodec` plugs into `tokio_util::codec::Framed`, which takes care of
//! short reads and partial writes. `FramedConnection` wraps the framed stream
//! with the two operations every caller needs: read one frame, write one frame.

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder, Framed, LengthDelimitedCodec};

use crate::WireError;

/// Largest payload a 2-byte length prefix can describe
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

// ============================================================================
// Codec
// ============================================================================

/// Decodes frames into UTF-8 strings and encodes string payloads into frames.
#[derive(Debug)]
pub struct FrameCodec {
  inner: LengthDelimitedCodec,
}

impl FrameCodec {
  pub fn new() -> Self {
    let inner = LengthDelimitedCodec::builder()
      .length_field_length(2)
      .big_endian()
      .max_frame_length(MAX_FRAME_LEN)
      .new_codec();
    Self { inner }
  }
}

impl Default for FrameCodec {
  fn default() -> Self {
    Self::new()
  }
}

impl Decoder for FrameCodec {
  type Item = String;
  type Error = WireError;

  fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, WireError> {
    match self.inner.decode(src)? {
      Some(frame) => String::from_utf8(frame.to_vec())
        .map(Some)
        .map_err(|_| WireError::InvalidUtf8),
      None => Ok(None),
    }
  }

  fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, WireError> {
    match self.decode(src)? {
      Some(frame) => Ok(Some(frame)),
      None if src.is_empty() => Ok(None),
      None => Err(WireError::Truncated { remaining: src.len() }),
    }
  }
}

impl<'a> Encoder<&'a str> for FrameCodec {
  type Error = WireError;

  fn encode(&mut self, item: &'a str, dst: &mut BytesMut) -> Result<(), WireError> {
    if item.len() > MAX_FRAME_LEN {
      return Err(WireError::FrameTooLarge {
        len: item.len(),
        max: MAX_FRAME_LEN,
      });
    }
    self.inner.encode(Bytes::copy_from_slice(item.as_bytes()), dst)?;
    Ok(())
  }
}

// ============================================================================
// Connection
// ============================================================================

/// A byte stream speaking the frame protocol.
#[derive(Debug)]
pub struct FramedConnection<T> {
  framed: Framed<T, FrameCodec>,
}

impl<T> FramedConnection<T>
where
  T: AsyncRead + AsyncWrite + Unpin,
{
  pub fn new(io: T) -> Self {
    Self {
      framed: Framed::new(io, FrameCodec::new()),
    }
  }

  /// Read exactly one frame.
  ///
  /// Returns `WireError::Closed` when the peer closes between frames and
  /// `WireError::Truncated` when it closes inside one.
  pub async fn read(&mut self) -> Result<String, WireError> {
    match self.framed.next().await {
      Some(frame) => frame,
      None => Err(WireError::Closed),
    }
  }

  /// Write one frame and flush it to the socket.
  pub async fn write(&mut self, payload: &str) -> Result<(), WireError> {
    self.framed.send(payload).await
  }

  /// Close the write half; the peer observes end-of-stream.
  pub async fn shutdown(&mut self) -> Result<(), WireError> {
    self.framed.get_mut().shutdown().await?;
    Ok(())
  }
}
