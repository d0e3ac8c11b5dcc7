//! Wire protocol shared by producers and both gateways.
//!
//! Every message is a frame: a 2-byte big-endian length followed by that many
//! payload bytes. Payloads are text. [`codec`] handles the framing; [`header`]
//! and [`protocol`] give the payloads their structure.

pub mod codec;
mod error;
pub mod header;
pub mod protocol;

pub use codec::{FrameCodec, FramedConnection, MAX_FRAME_LEN};
pub use error::{HeaderError, WireError};
pub use header::{Batch, BatchHeader, Marker};
pub use protocol::{Ack, Announcement, EOF_SENTINEL, RESULT_ACK, ResultBody, ResultFrame};
