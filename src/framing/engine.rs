//! Per-connection framing engine - the streaming state machine between the
//! socket and the parser.
//!
//! The engine owns one growable buffer per connection and guarantees that no
//! byte is ever lost or duplicated across request boundaries:
//!
//! `AwaitingHeaders` → scan for `\r\n\r\n` (bounded by the header ceiling) →
//! `HeadersFound` → body strategy chosen from the head → `StreamingBody` →
//! bounded reads handed to the handler → `RequestComplete` → undrained bytes
//! discarded, leftover shifted to buffer front → back to `AwaitingHeaders`
//! (keep-alive) or the connection closes.
//!
//! All state is per-connection and never shared across coroutines, so the
//! engine needs no locking. Reading the socket is its only suspension
//! point; the receive timeout configured on the stream surfaces here as
//! [`FramingError::ReadTimeout`].

use std::io::{self, Read};

use tracing::{debug, trace};

use super::chunked::{ChunkDecoder, ChunkInfo};
use super::head::{parse_head, BodyStrategy, RequestHead};
use super::FramingError;
use crate::ids::ConnectionId;

/// The 4-byte header/body boundary.
const HEADER_DELIMITER: &[u8; 4] = b"\r\n\r\n";

/// Framing limits and tuning.
#[derive(Debug, Clone, Copy)]
pub struct FramingConfig {
    /// Ceiling on the header block size. Exceeding it before the delimiter
    /// is found fails the connection with `HeaderTooLarge` - the defense
    /// against slow-loris-style clients growing the buffer forever.
    pub max_header_bytes: usize,
    /// Socket read granularity.
    pub read_buffer_bytes: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 64 * 1024,
            read_buffer_bytes: 8 * 1024,
        }
    }
}

#[derive(Debug)]
enum BodyState {
    /// Between requests.
    Idle,
    /// Current request declared no body.
    NoBody,
    /// Fixed-length body with `remaining` bytes still owed to the handler.
    Fixed { remaining: u64 },
    /// Chunked body being decoded.
    Chunked(ChunkDecoder),
    /// Body fully consumed.
    Drained,
}

/// The framing engine for one connection.
///
/// Generic over the byte stream so tests can drive it from in-memory
/// buffers; in production `S` is the connection's `may` TCP stream.
pub struct FramingEngine<S: Read> {
    stream: S,
    conn_id: ConnectionId,
    config: FramingConfig,
    /// Accumulation buffer. `buf[pos..]` is buffered-but-unconsumed input.
    buf: Vec<u8>,
    pos: usize,
    /// Header-boundary search cursor, so bytes are never rescanned.
    scan: usize,
    body: BodyState,
    /// Decoder of the last completed chunked body, kept so chunk metadata
    /// stays inspectable until the next request starts.
    completed_chunked: Option<ChunkDecoder>,
    fatal: Option<FramingError>,
}

impl<S: Read> FramingEngine<S> {
    pub fn new(stream: S, conn_id: ConnectionId, config: FramingConfig) -> Self {
        Self {
            stream,
            conn_id,
            config,
            buf: Vec::with_capacity(config.read_buffer_bytes),
            pos: 0,
            scan: 0,
            body: BodyState::Idle,
            completed_chunked: None,
            fatal: None,
        }
    }

    /// Bytes buffered ahead of the current consumption point (the leftover
    /// available to the next pipelined request).
    pub fn buffered_len(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// The underlying stream, for writing responses. Reads and writes never
    /// overlap on a connection: the driver writes only between body reads,
    /// on the same coroutine.
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Chunk metadata of the current or most recently completed chunked
    /// body, terminal chunk included.
    pub fn chunks(&self) -> &[ChunkInfo] {
        match &self.body {
            BodyState::Chunked(decoder) => decoder.chunks(),
            _ => self
                .completed_chunked
                .as_ref()
                .map(|d| d.chunks())
                .unwrap_or(&[]),
        }
    }

    /// Trailer headers of the current or most recently completed chunked
    /// body.
    pub fn trailers(&self) -> &[(String, String)] {
        match &self.body {
            BodyState::Chunked(decoder) => decoder.trailers(),
            _ => self
                .completed_chunked
                .as_ref()
                .map(|d| d.trailers())
                .unwrap_or(&[]),
        }
    }

    /// Frame the next request off the connection.
    ///
    /// Returns `Ok(None)` on a clean close (the peer disconnected between
    /// requests). The previous request must have been completed with
    /// [`finish_request`](Self::finish_request).
    ///
    /// # Errors
    ///
    /// `HeaderTooLarge`, `MalformedHead`, `ReadTimeout`, `UnexpectedEof`, or
    /// a transport error - all fatal to this connection.
    pub fn next_request(&mut self) -> Result<Option<RequestHead>, FramingError> {
        if let Some(fatal) = self.fatal.take() {
            return Err(fatal);
        }
        debug_assert!(matches!(self.body, BodyState::Idle));
        self.completed_chunked = None;

        loop {
            if let Some(delimiter) = self.find_delimiter() {
                let head_len = delimiter - self.pos;
                if head_len > self.config.max_header_bytes {
                    return Err(self.poison(FramingError::HeaderTooLarge {
                        limit: self.config.max_header_bytes,
                    }));
                }
                let head = match parse_head(&self.buf[self.pos..delimiter]) {
                    Ok(head) => head,
                    Err(err) => return Err(self.poison(err)),
                };
                self.pos = delimiter + HEADER_DELIMITER.len();
                self.scan = self.pos;
                self.body = match head.body {
                    BodyStrategy::None => BodyState::NoBody,
                    BodyStrategy::Fixed(n) => BodyState::Fixed { remaining: n },
                    BodyStrategy::Chunked => BodyState::Chunked(ChunkDecoder::new()),
                };
                debug!(
                    conn_id = %self.conn_id,
                    method = %head.method,
                    target = %head.target,
                    head_bytes = head_len,
                    body_strategy = ?head.body,
                    leftover = self.buffered_len(),
                    "Request head framed"
                );
                return Ok(Some(head));
            }

            if self.buffered_len() > self.config.max_header_bytes {
                return Err(self.poison(FramingError::HeaderTooLarge {
                    limit: self.config.max_header_bytes,
                }));
            }

            let n = match self.fill() {
                Ok(n) => n,
                Err(err) => return Err(self.poison(err)),
            };
            if n == 0 {
                return if self.buffered_len() == 0 {
                    Ok(None)
                } else {
                    Err(self.poison(FramingError::UnexpectedEof))
                };
            }
        }
    }

    /// Read body bytes for the current request.
    ///
    /// Bounded by the declared body length: reading past it yields `Ok(0)`
    /// (end-of-stream), never an error, and never consumes bytes belonging
    /// to the next pipelined request.
    pub fn read_body(&mut self, out: &mut [u8]) -> Result<usize, FramingError> {
        if self.fatal.is_some() {
            return Err(FramingError::Io(io::Error::other(
                "connection already failed framing",
            )));
        }
        if out.is_empty() {
            return Ok(0);
        }

        enum Pending {
            Fixed,
            Chunked,
        }

        loop {
            let pending = match &self.body {
                BodyState::Idle | BodyState::NoBody | BodyState::Drained => return Ok(0),
                BodyState::Fixed { remaining } => {
                    if *remaining == 0 {
                        self.body = BodyState::Drained;
                        return Ok(0);
                    }
                    Pending::Fixed
                }
                BodyState::Chunked(decoder) => {
                    if decoder.is_done() {
                        self.retire_chunked();
                        return Ok(0);
                    }
                    Pending::Chunked
                }
            };

            if self.buffered_len() == 0 {
                match self.fill() {
                    Ok(0) => return Err(self.poison(FramingError::UnexpectedEof)),
                    Ok(_) => {}
                    Err(err) => return Err(self.poison(err)),
                }
            }

            match pending {
                Pending::Fixed => {
                    let available = self.buf.len() - self.pos;
                    let BodyState::Fixed { remaining } = &mut self.body else {
                        return Ok(0);
                    };
                    let take = (*remaining).min(out.len() as u64) as usize;
                    let take = take.min(available);
                    out[..take].copy_from_slice(&self.buf[self.pos..self.pos + take]);
                    self.pos += take;
                    *remaining -= take as u64;
                    if *remaining == 0 {
                        self.body = BodyState::Drained;
                    }
                    return Ok(take);
                }
                Pending::Chunked => {
                    let input = &self.buf[self.pos..];
                    let BodyState::Chunked(decoder) = &mut self.body else {
                        return Ok(0);
                    };
                    let step = match decoder.decode(input, out) {
                        Ok(step) => step,
                        Err(err) => return Err(self.poison(err)),
                    };
                    let done = decoder.is_done();
                    self.pos += step.consumed;
                    if step.written > 0 {
                        return Ok(step.written);
                    }
                    if done {
                        self.retire_chunked();
                        return Ok(0);
                    }
                    // No data produced and not done: the decoder needs more
                    // input than was buffered.
                }
            }
        }
    }

    /// Complete the current request.
    ///
    /// Discards whatever body the handler left undrained - required for
    /// pipelining correctness, a handler that ignores the body must not
    /// corrupt the next request's framing - then shifts the unconsumed
    /// leftover to buffer position zero and returns to the between-requests
    /// state.
    pub fn finish_request(&mut self) -> Result<(), FramingError> {
        if let Some(fatal) = self.fatal.take() {
            return Err(fatal);
        }

        let mut discarded = 0usize;
        let mut scratch = [0u8; 4096];
        loop {
            match self.read_body(&mut scratch) {
                Ok(0) => break,
                Ok(n) => discarded += n,
                Err(err) => return Err(err),
            }
        }
        if discarded > 0 {
            trace!(
                conn_id = %self.conn_id,
                discarded_bytes = discarded,
                "Undrained body discarded to realign framing"
            );
        }

        self.body = BodyState::Idle;
        self.buf.drain(..self.pos);
        self.pos = 0;
        self.scan = 0;
        Ok(())
    }

    fn retire_chunked(&mut self) {
        if let BodyState::Chunked(decoder) = std::mem::replace(&mut self.body, BodyState::Drained)
        {
            self.completed_chunked = Some(decoder);
        }
    }

    /// Locate the header delimiter, advancing the scan cursor past bytes
    /// already searched.
    fn find_delimiter(&mut self) -> Option<usize> {
        let start = self.scan.max(self.pos);
        if self.buf.len() < start + HEADER_DELIMITER.len() {
            return None;
        }
        match self.buf[start..]
            .windows(HEADER_DELIMITER.len())
            .position(|w| w == HEADER_DELIMITER)
        {
            Some(offset) => Some(start + offset),
            None => {
                // Keep the last three bytes rescannable; the delimiter may
                // straddle this fill and the next.
                self.scan = (self.buf.len() - (HEADER_DELIMITER.len() - 1)).max(self.pos);
                None
            }
        }
    }

    /// Read more bytes off the stream into the buffer. Returns the number
    /// read; zero means the peer closed.
    fn fill(&mut self) -> Result<usize, FramingError> {
        if self.pos == self.buf.len() && self.pos > 0 {
            self.buf.clear();
            self.pos = 0;
            self.scan = 0;
        }
        let old = self.buf.len();
        self.buf.resize(old + self.config.read_buffer_bytes, 0);
        match self.stream.read(&mut self.buf[old..]) {
            Ok(n) => {
                self.buf.truncate(old + n);
                trace!(conn_id = %self.conn_id, bytes = n, "Socket read");
                Ok(n)
            }
            Err(err) => {
                self.buf.truncate(old);
                Err(FramingError::from_read(err))
            }
        }
    }

    /// Record a fatal framing failure and hand the error back to the caller.
    /// The stored duplicate resurfaces from `finish_request`/`next_request`
    /// so the connection driver sees the failure even when the handler was
    /// the one whose body read tripped it.
    fn poison(&mut self, err: FramingError) -> FramingError {
        debug!(conn_id = %self.conn_id, error = %err, "Framing failed - connection poisoned");
        self.body = BodyState::Drained;
        self.fatal = Some(duplicate(&err));
        err
    }
}

/// `FramingError` is not `Clone` (the transport variant owns an
/// `io::Error`), so the poisoned copy is rebuilt field by field.
fn duplicate(err: &FramingError) -> FramingError {
    match err {
        FramingError::HeaderTooLarge { limit } => FramingError::HeaderTooLarge { limit: *limit },
        FramingError::MalformedHead { reason } => FramingError::MalformedHead {
            reason: reason.clone(),
        },
        FramingError::MalformedChunkEncoding { reason } => FramingError::MalformedChunkEncoding {
            reason: reason.clone(),
        },
        FramingError::ReadTimeout => FramingError::ReadTimeout,
        FramingError::UnexpectedEof => FramingError::UnexpectedEof,
        FramingError::Io(inner) => FramingError::Io(io::Error::new(inner.kind(), inner.to_string())),
    }
}

/// `io::Read` view over the current request's body, handed to handlers.
///
/// For fixed-length bodies, reads are capped at exactly the declared length
/// across however many underlying reads are needed; reading past it yields
/// end-of-stream. For chunked bodies, reads yield de-chunked data bytes.
pub struct BodyReader<'a, S: Read> {
    engine: &'a mut FramingEngine<S>,
}

impl<'a, S: Read> BodyReader<'a, S> {
    pub fn new(engine: &'a mut FramingEngine<S>) -> Self {
        Self { engine }
    }
}

impl<S: Read> Read for BodyReader<'_, S> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.engine
            .read_body(out)
            .map_err(|err| io::Error::other(err.to_string()))
    }
}
