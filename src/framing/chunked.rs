//! Incremental chunked transfer-encoding decoder.
//!
//! Wire format consumed: `<hex-size>[;name=value[;...]]\r\n<data>\r\n`,
//! repeated, terminated by a `0` chunk, optionally followed by trailer
//! header lines, then a final `\r\n`. The decoder validates that exactly
//! `size` data bytes precede each chunk's trailing CRLF; any violation is
//! `MalformedChunkEncoding`, which the connection driver treats as fatal to
//! the connection - byte alignment is unrecoverable once chunk framing lies.
//!
//! The decoder is push-based and incremental: it is handed whatever bytes
//! are buffered and reports how many it consumed and how many data bytes it
//! produced. It never reads from a socket itself, so the framing engine
//! remains the only suspension point on the connection.

use tracing::trace;

use super::FramingError;

/// Longest accepted chunk-size line (hex digits plus extensions). A size
/// line that exceeds this without a CRLF is malformed, not merely slow.
const MAX_SIZE_LINE: usize = 1024;

/// Metadata recorded for one decoded chunk, including the empty terminal
/// chunk. Extensions are parsed but not semantically interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    pub size: usize,
    pub extensions: Vec<(String, String)>,
}

#[derive(Debug)]
enum State {
    /// Accumulating the `<hex-size>[;ext]` line up to its CRLF.
    SizeLine,
    /// Copying chunk data through to the caller.
    Data { remaining: usize },
    /// Expecting the `\r` of the chunk's trailing CRLF.
    DataCr,
    /// Expecting the `\n` of the chunk's trailing CRLF.
    DataLf,
    /// Accumulating a trailer line; an empty line completes the body.
    TrailerLine,
    Done,
}

/// Progress report from one [`ChunkDecoder::decode`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkStep {
    /// Input bytes consumed.
    pub consumed: usize,
    /// Data bytes written to the output buffer.
    pub written: usize,
}

pub struct ChunkDecoder {
    state: State,
    line: Vec<u8>,
    chunks: Vec<ChunkInfo>,
    trailers: Vec<(String, String)>,
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            state: State::SizeLine,
            line: Vec::new(),
            chunks: Vec::new(),
            trailers: Vec::new(),
        }
    }

    /// True once the terminal chunk and its trailer section have been
    /// consumed.
    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// Metadata for every chunk seen so far, terminal chunk included.
    pub fn chunks(&self) -> &[ChunkInfo] {
        &self.chunks
    }

    /// Trailer headers, if the peer sent any.
    pub fn trailers(&self) -> &[(String, String)] {
        &self.trailers
    }

    /// Decode as much as possible from `input` into `out`.
    ///
    /// Returns with `written == 0` either because more input is needed (the
    /// caller should refill and try again) or because the body is done.
    pub fn decode(&mut self, input: &[u8], out: &mut [u8]) -> Result<ChunkStep, FramingError> {
        let mut consumed = 0;
        let mut written = 0;

        while consumed < input.len() && written < out.len() && !self.is_done() {
            match self.state {
                State::SizeLine => {
                    consumed += self.take_line(&input[consumed..])?;
                    if let Some(line) = self.finished_line() {
                        let info = parse_size_line(&line)?;
                        trace!(size = info.size, extensions = info.extensions.len(), "Chunk header");
                        let size = info.size;
                        self.chunks.push(info);
                        self.state = if size == 0 {
                            State::TrailerLine
                        } else {
                            State::Data { remaining: size }
                        };
                    }
                }
                State::Data { remaining } => {
                    let take = remaining
                        .min(input.len() - consumed)
                        .min(out.len() - written);
                    out[written..written + take]
                        .copy_from_slice(&input[consumed..consumed + take]);
                    consumed += take;
                    written += take;
                    let left = remaining - take;
                    self.state = if left == 0 {
                        State::DataCr
                    } else {
                        State::Data { remaining: left }
                    };
                }
                State::DataCr => {
                    if input[consumed] != b'\r' {
                        return Err(FramingError::MalformedChunkEncoding {
                            reason: "chunk data not terminated by CR".to_string(),
                        });
                    }
                    consumed += 1;
                    self.state = State::DataLf;
                }
                State::DataLf => {
                    if input[consumed] != b'\n' {
                        return Err(FramingError::MalformedChunkEncoding {
                            reason: "chunk data not terminated by CRLF".to_string(),
                        });
                    }
                    consumed += 1;
                    self.state = State::SizeLine;
                }
                State::TrailerLine => {
                    consumed += self.take_line(&input[consumed..])?;
                    if let Some(line) = self.finished_line() {
                        if line.is_empty() {
                            self.state = State::Done;
                        } else if let Some((name, value)) = split_trailer(&line) {
                            self.trailers.push((name, value));
                        } else {
                            return Err(FramingError::MalformedChunkEncoding {
                                reason: "trailer line without ':'".to_string(),
                            });
                        }
                    }
                }
                State::Done => {}
            }
        }

        Ok(ChunkStep { consumed, written })
    }

    /// Accumulate bytes of the current line, returning how many were taken.
    /// The line (without its CRLF) becomes available via `finished_line`
    /// once the LF arrives.
    fn take_line(&mut self, input: &[u8]) -> Result<usize, FramingError> {
        for (idx, &byte) in input.iter().enumerate() {
            self.line.push(byte);
            if self.line.len() > MAX_SIZE_LINE {
                return Err(FramingError::MalformedChunkEncoding {
                    reason: "chunk size line too long".to_string(),
                });
            }
            if byte == b'\n' {
                return Ok(idx + 1);
            }
        }
        Ok(input.len())
    }

    fn finished_line(&mut self) -> Option<Vec<u8>> {
        if self.line.last() != Some(&b'\n') {
            return None;
        }
        let mut line = std::mem::take(&mut self.line);
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }
}

impl std::fmt::Debug for ChunkDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkDecoder")
            .field("state", &self.state)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

fn parse_size_line(line: &[u8]) -> Result<ChunkInfo, FramingError> {
    let text = std::str::from_utf8(line).map_err(|_| FramingError::MalformedChunkEncoding {
        reason: "chunk size line is not valid UTF-8".to_string(),
    })?;
    let mut parts = text.split(';');
    let size_str = parts.next().unwrap_or_default().trim();
    let size =
        usize::from_str_radix(size_str, 16).map_err(|_| FramingError::MalformedChunkEncoding {
            reason: format!("bad chunk size {size_str:?}"),
        })?;

    let mut extensions = Vec::new();
    for ext in parts {
        let ext = ext.trim();
        if ext.is_empty() {
            return Err(FramingError::MalformedChunkEncoding {
                reason: "empty chunk extension".to_string(),
            });
        }
        let (name, value) = match ext.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim().trim_matches('"')),
            None => (ext, ""),
        };
        extensions.push((name.to_string(), value.to_string()));
    }

    Ok(ChunkInfo { size, extensions })
}

fn split_trailer(line: &[u8]) -> Option<(String, String)> {
    let text = std::str::from_utf8(line).ok()?;
    let (name, value) = text.split_once(':')?;
    Some((name.trim().to_ascii_lowercase(), value.trim().to_string()))
}
