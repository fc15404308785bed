//! HTTP/1.1 request framing: locating message boundaries in a raw byte
//! stream, selecting the body-length strategy, and decoding chunked bodies,
//! with leftover bytes preserved across pipelined requests.

mod chunked;
mod engine;
mod head;

pub use chunked::{ChunkDecoder, ChunkInfo, ChunkStep};
pub use engine::{BodyReader, FramingConfig, FramingEngine};
pub use head::{parse_head, BodyStrategy, RequestHead};

use std::io;

/// Framing failures. All are fatal to the owning connection: either byte
/// alignment is lost or the client is non-conformant or abusive. They never
/// propagate past the connection driver.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// The header block grew past the configured ceiling before the
    /// `\r\n\r\n` delimiter was found.
    #[error("header block exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },

    /// The request line or a header line failed to parse.
    #[error("malformed request head: {reason}")]
    MalformedHead { reason: String },

    /// Chunk framing was violated (bad size line, missing chunk CRLF).
    #[error("malformed chunk encoding: {reason}")]
    MalformedChunkEncoding { reason: String },

    /// The receive timeout elapsed while waiting for more bytes.
    #[error("read timed out")]
    ReadTimeout,

    /// The peer closed the connection mid-request.
    #[error("connection closed mid-request")]
    UnexpectedEof,

    /// Transport-level failure.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

impl FramingError {
    /// Map a socket read error, folding timeout kinds into `ReadTimeout`.
    pub(crate) fn from_read(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => FramingError::ReadTimeout,
            _ => FramingError::Io(err),
        }
    }

    /// A best-effort status code for notifying the client before the
    /// connection is dropped, where one is still meaningful.
    pub fn notify_status(&self) -> Option<u16> {
        match self {
            FramingError::HeaderTooLarge { .. } => Some(431),
            FramingError::ReadTimeout => Some(408),
            FramingError::MalformedHead { .. } => Some(400),
            _ => None,
        }
    }
}
