//! Chunked transfer-coding.
//!
//! Encoding frames one write as `<hex length>\r\n<bytes>\r\n`; the body is
//! closed by [`LAST_CHUNK`]. Decoding is incremental over a [`ParseBuffer`]
//! and never reads from the socket itself.

use crate::base::neterror::NetError;
use crate::http::buffer::ParseBuffer;
use bytes::BytesMut;

/// Zero-length terminal chunk with an empty trailer.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Longest chunk-size line (extensions included) accepted from a server.
const MAX_SIZE_LINE: usize = 4096;

/// Append one framed chunk holding `data` to `dst`. Empty input writes nothing.
pub fn encode_chunk(data: &[u8], dst: &mut BytesMut) {
    if data.is_empty() {
        return;
    }
    let header = format!("{:X}\r\n", data.len());
    dst.reserve(header.len() + data.len() + 2);
    dst.extend_from_slice(header.as_bytes());
    dst.extend_from_slice(data);
    dst.extend_from_slice(b"\r\n");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    Data,
    DataEnd,
    Trailer,
    Done,
}

/// Result of one [`ChunkDecoder::decode`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// This many body bytes were written to the output.
    Data(usize),
    /// The buffer ran dry; pull more bytes from the connection.
    NeedMore,
    /// Terminal chunk and trailer consumed.
    Done,
}

#[derive(Debug, Clone)]
pub struct ChunkDecoder {
    state: State,
    remaining: u64,
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Size,
            remaining: 0,
        }
    }

    /// Bytes left in the chunk currently being read.
    pub fn remaining_in_chunk(&self) -> u64 {
        self.remaining
    }

    pub fn more_chunks_expected(&self) -> bool {
        self.state != State::Done
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// True when `data` holds the rest of the body, terminal chunk and
    /// trailer included. Nothing is consumed.
    pub fn completes_within(&self, data: &[u8]) -> bool {
        let mut state = self.state;
        let mut remaining = self.remaining;
        let mut rest = data;
        loop {
            match state {
                State::Size => {
                    let Some(line) = split_line(&mut rest) else {
                        return false;
                    };
                    match parse_chunk_size(line) {
                        Ok(0) => state = State::Trailer,
                        Ok(size) => {
                            remaining = size;
                            state = State::Data;
                        }
                        Err(_) => return false,
                    }
                }
                State::Data => {
                    if (rest.len() as u64) < remaining {
                        return false;
                    }
                    rest = &rest[remaining as usize..];
                    remaining = 0;
                    state = State::DataEnd;
                }
                State::DataEnd => match split_line(&mut rest) {
                    Some([]) => state = State::Size,
                    _ => return false,
                },
                State::Trailer => {
                    let Some(line) = split_line(&mut rest) else {
                        return false;
                    };
                    if line.is_empty() {
                        state = State::Done;
                    }
                }
                State::Done => return true,
            }
        }
    }

    /// Decode from `buf` into `out`, returning as soon as any body bytes
    /// were produced.
    pub fn decode(&mut self, buf: &mut ParseBuffer, out: &mut [u8]) -> Result<Decoded, NetError> {
        loop {
            match self.state {
                State::Size => {
                    let Some(line) = buf.read_line() else {
                        if buf.len() > MAX_SIZE_LINE {
                            return Err(NetError::InvalidChunkedEncoding);
                        }
                        return Ok(Decoded::NeedMore);
                    };
                    let size = parse_chunk_size(line)?;
                    tracing::trace!(size, "chunk header");
                    if size == 0 {
                        self.state = State::Trailer;
                    } else {
                        self.remaining = size;
                        self.state = State::Data;
                    }
                }
                State::Data => {
                    if buf.is_empty() {
                        return Ok(Decoded::NeedMore);
                    }
                    let want = usize::try_from(self.remaining).unwrap_or(usize::MAX);
                    let n = want.min(out.len());
                    let n = buf.copy_to(&mut out[..n]);
                    self.remaining -= n as u64;
                    if self.remaining == 0 {
                        self.state = State::DataEnd;
                    }
                    return Ok(Decoded::Data(n));
                }
                State::DataEnd => {
                    let Some(line) = buf.read_line() else {
                        if buf.len() >= 2 {
                            return Err(NetError::InvalidChunkedEncoding);
                        }
                        return Ok(Decoded::NeedMore);
                    };
                    if !line.is_empty() {
                        return Err(NetError::InvalidChunkedEncoding);
                    }
                    self.state = State::Size;
                }
                State::Trailer => {
                    let Some(line) = buf.read_line() else {
                        if buf.len() > MAX_SIZE_LINE {
                            return Err(NetError::InvalidChunkedEncoding);
                        }
                        return Ok(Decoded::NeedMore);
                    };
                    // Trailer fields are skipped.
                    if line.is_empty() {
                        self.state = State::Done;
                    }
                }
                State::Done => return Ok(Decoded::Done),
            }
        }
    }
}

/// Split one line off the front of `rest`, without its line ending.
fn split_line<'a>(rest: &mut &'a [u8]) -> Option<&'a [u8]> {
    let pos = rest.iter().position(|&b| b == b'\n')?;
    let mut line = &rest[..pos];
    if let [head @ .., b'\r'] = line {
        line = head;
    }
    *rest = &rest[pos + 1..];
    Some(line)
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, NetError> {
    let digits = match line.iter().position(|&b| b == b';') {
        Some(ext) => &line[..ext],
        None => line,
    };
    let digits = std::str::from_utf8(digits)
        .map_err(|_| NetError::InvalidChunkedEncoding)?
        .trim();
    if digits.is_empty() || digits.len() > 16 {
        return Err(NetError::InvalidChunkedEncoding);
    }
    u64::from_str_radix(digits, 16).map_err(|_| NetError::InvalidChunkedEncoding)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(raw: &[u8]) -> Result<Vec<u8>, NetError> {
        let mut buf = ParseBuffer::from_bytes(raw);
        let mut decoder = ChunkDecoder::new();
        let mut body = Vec::new();
        let mut out = [0u8; 7];
        loop {
            match decoder.decode(&mut buf, &mut out)? {
                Decoded::Data(n) => body.extend_from_slice(&out[..n]),
                Decoded::NeedMore => return Err(NetError::IncompleteChunkedEncoding),
                Decoded::Done => return Ok(body),
            }
        }
    }

    #[test]
    fn test_encode_chunk() {
        let mut dst = BytesMut::new();
        encode_chunk(b"hello world, hi!", &mut dst);
        assert_eq!(&dst[..], b"10\r\nhello world, hi!\r\n");

        encode_chunk(b"", &mut dst);
        assert_eq!(dst.len(), 22);
    }

    #[test]
    fn test_decode_with_extension_and_trailer() {
        let raw = b"5;name=value\r\nhello\r\n6\r\n world\r\n0\r\nX-Trailer: 1\r\n\r\n";
        assert_eq!(decode_all(raw).unwrap(), b"hello world");
    }

    #[test]
    fn test_decode_empty_body() {
        assert_eq!(decode_all(LAST_CHUNK).unwrap(), b"");
    }

    #[test]
    fn test_decode_lowercase_hex() {
        let mut raw = b"a\r\n".to_vec();
        raw.extend_from_slice(b"0123456789\r\n0\r\n\r\n");
        assert_eq!(decode_all(&raw).unwrap(), b"0123456789");
    }

    #[test]
    fn test_bad_size_line() {
        assert_eq!(decode_all(b"zz\r\nab\r\n").unwrap_err(), NetError::InvalidChunkedEncoding);
        assert_eq!(decode_all(b"\r\n").unwrap_err(), NetError::InvalidChunkedEncoding);
    }

    #[test]
    fn test_missing_crlf_after_data() {
        assert_eq!(
            decode_all(b"2\r\nabXY\r\n0\r\n\r\n").unwrap_err(),
            NetError::InvalidChunkedEncoding
        );
    }

    #[test]
    fn test_incremental_feed() {
        let raw = b"3\r\nabc\r\n0\r\n\r\n";
        let mut buf = ParseBuffer::new();
        let mut decoder = ChunkDecoder::new();
        let mut out = [0u8; 16];
        let mut body = Vec::new();
        for byte in raw.iter() {
            buf.extend_from_slice(&[*byte]);
            while let Decoded::Data(n) = decoder.decode(&mut buf, &mut out).unwrap() {
                body.extend_from_slice(&out[..n]);
            }
        }
        assert!(decoder.is_done());
        assert_eq!(body, b"abc");
    }

    #[test]
    fn test_remaining_in_chunk() {
        let mut buf = ParseBuffer::from_bytes(b"8\r\nabc");
        let mut decoder = ChunkDecoder::new();
        let mut out = [0u8; 16];
        assert_eq!(decoder.decode(&mut buf, &mut out).unwrap(), Decoded::Data(3));
        assert_eq!(decoder.remaining_in_chunk(), 5);
        assert!(decoder.more_chunks_expected());
        assert_eq!(decoder.decode(&mut buf, &mut out).unwrap(), Decoded::NeedMore);
    }
}
