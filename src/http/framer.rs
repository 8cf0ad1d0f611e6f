//! Body framing for both directions.
//!
//! [`BodyWriter`] frames a request body as fixed-length or chunked and can
//! keep an unframed copy for replay. [`BodyReader`] reads a response body
//! according to its [`Framing`], serving bytes left over from the head parse
//! before touching the socket.

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::http::buffer::ParseBuffer;
use crate::http::chunked::{encode_chunk, ChunkDecoder, Decoded, LAST_CHUNK};
use crate::http::parser::Framing;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Largest replay copy kept for a chunked body of unknown size.
pub const MAX_REPLAY_BUFFER: usize = 16 * 1024 * 1024;

/// How a request body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFraming {
    Length(u64),
    Chunked,
}

/// Writes one request body to `io`.
pub struct BodyWriter<'a, W: ?Sized> {
    io: &'a mut W,
    framing: WriteFraming,
    written: u64,
    replay: Option<BytesMut>,
    replay_overflow: bool,
}

impl<'a, W> BodyWriter<'a, W>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    /// `buffer_for_replay` mirrors every written byte, unframed.
    pub fn new(io: &'a mut W, framing: WriteFraming, buffer_for_replay: bool) -> Self {
        let replay = buffer_for_replay.then(|| {
            let hint = match framing {
                WriteFraming::Length(len) => usize::try_from(len).unwrap_or(MAX_REPLAY_BUFFER),
                WriteFraming::Chunked => 8 * 1024,
            };
            BytesMut::with_capacity(hint.min(MAX_REPLAY_BUFFER))
        });
        Self {
            io,
            framing,
            written: 0,
            replay,
            replay_overflow: false,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<(), NetError> {
        if data.is_empty() {
            return Ok(());
        }
        match self.framing {
            WriteFraming::Length(declared) => {
                if self.written + data.len() as u64 > declared {
                    tracing::warn!(
                        declared,
                        attempted = self.written + data.len() as u64,
                        "request body exceeds Content-Length"
                    );
                    return Err(NetError::ContentLengthMismatch);
                }
                self.io.write_all(data).await.transfer_context()?;
            }
            WriteFraming::Chunked => {
                let mut framed = BytesMut::new();
                encode_chunk(data, &mut framed);
                self.io.write_all(&framed).await.transfer_context()?;
            }
        }
        self.written += data.len() as u64;
        self.mirror(data);
        Ok(())
    }

    fn mirror(&mut self, data: &[u8]) {
        let Some(replay) = self.replay.as_mut() else {
            return;
        };
        if replay.len() + data.len() > MAX_REPLAY_BUFFER {
            tracing::debug!("replay buffer limit reached, dropping copy");
            self.replay = None;
            self.replay_overflow = true;
            return;
        }
        replay.extend_from_slice(data);
    }

    /// Complete the body and flush. Returns the replay copy when one was kept.
    pub async fn finish(self) -> Result<Option<Bytes>, NetError> {
        match self.framing {
            WriteFraming::Length(declared) if self.written != declared => {
                tracing::warn!(
                    declared,
                    written = self.written,
                    "request body shorter than Content-Length"
                );
                return Err(NetError::ContentLengthMismatch);
            }
            WriteFraming::Length(_) => {}
            WriteFraming::Chunked => {
                self.io.write_all(LAST_CHUNK).await.transfer_context()?;
            }
        }
        self.io.flush().await.transfer_context()?;
        Ok(self.replay.map(BytesMut::freeze))
    }

    /// True when buffering was requested but the body outgrew the replay limit.
    pub fn replay_overflowed(&self) -> bool {
        self.replay_overflow
    }
}

/// Reads one response body.
#[derive(Debug)]
pub struct BodyReader {
    framing: Framing,
    remaining: u64,
    decoder: ChunkDecoder,
    done: bool,
}

impl BodyReader {
    pub fn new(framing: Framing) -> Self {
        let (remaining, done) = match framing {
            Framing::Empty => (0, true),
            Framing::Length(len) => (len, len == 0),
            Framing::Chunked | Framing::UntilClose => (0, false),
        };
        Self {
            framing,
            remaining,
            decoder: ChunkDecoder::new(),
            done,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Declared bytes not yet read, for fixed-length bodies.
    pub fn remaining(&self) -> Option<u64> {
        match self.framing {
            Framing::Length(_) => Some(self.remaining),
            Framing::Empty => Some(0),
            _ => None,
        }
    }

    /// True when the rest of the body already sits in `buf`.
    pub fn is_buffered(&self, buf: &ParseBuffer) -> bool {
        match self.framing {
            Framing::Empty => true,
            Framing::Length(_) => buf.len() as u64 >= self.remaining,
            Framing::Chunked => self.done || self.decoder.completes_within(buf.as_slice()),
            Framing::UntilClose => self.done,
        }
    }

    /// Read body bytes into `out`. Returns 0 once the body is complete.
    pub async fn read<R>(
        &mut self,
        io: &mut R,
        buf: &mut ParseBuffer,
        out: &mut [u8],
    ) -> Result<usize, NetError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if self.done || out.is_empty() {
            return Ok(0);
        }
        match self.framing {
            Framing::Empty => {
                self.done = true;
                Ok(0)
            }
            Framing::Length(_) => {
                if buf.is_empty() && buf.fill_from(io).await? == 0 {
                    tracing::warn!(
                        remaining = self.remaining,
                        "connection closed inside fixed-length body"
                    );
                    return Err(NetError::ContentLengthMismatch);
                }
                let want = usize::try_from(self.remaining).unwrap_or(usize::MAX).min(out.len());
                let n = buf.copy_to(&mut out[..want]);
                self.remaining -= n as u64;
                if self.remaining == 0 {
                    self.done = true;
                }
                Ok(n)
            }
            Framing::Chunked => loop {
                match self.decoder.decode(buf, out)? {
                    Decoded::Data(n) => return Ok(n),
                    Decoded::Done => {
                        self.done = true;
                        return Ok(0);
                    }
                    Decoded::NeedMore => {
                        if buf.fill_from(io).await? == 0 {
                            tracing::warn!("connection closed inside chunked body");
                            return Err(NetError::IncompleteChunkedEncoding);
                        }
                    }
                }
            },
            Framing::UntilClose => {
                if buf.is_empty() && buf.fill_from(io).await? == 0 {
                    self.done = true;
                    return Ok(0);
                }
                Ok(buf.copy_to(out))
            }
        }
    }
}
