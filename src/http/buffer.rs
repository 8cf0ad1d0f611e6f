//! Growable receive buffer with an explicit read cursor.
//!
//! Bytes are appended at `end` and consumed from `start`. When the tail is
//! full the live region is compacted to the front; when it is still full the
//! storage doubles, up to `limit`. The buffer knows nothing about sockets
//! beyond [`ParseBuffer::fill_from`], so parsers can run on fixtures.

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const INITIAL_CAPACITY: usize = 4096;

/// Upper bound on buffered, unparsed response bytes.
pub const DEFAULT_LIMIT: usize = 1024 * 1024;

#[derive(Debug)]
pub struct ParseBuffer {
    data: Vec<u8>,
    start: usize,
    end: usize,
    limit: usize,
}

impl Default for ParseBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ParseBuffer {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY, DEFAULT_LIMIT)
    }

    pub fn with_capacity(capacity: usize, limit: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: vec![0; capacity],
            start: 0,
            end: 0,
            limit: limit.max(capacity),
        }
    }

    /// Buffer preloaded with `bytes`, used by tests and by the tunnel parser.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = Self::with_capacity(bytes.len().max(INITIAL_CAPACITY), DEFAULT_LIMIT);
        buf.extend_from_slice(bytes);
        buf
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Advance the cursor past `n` unread bytes.
    pub fn consume(&mut self, n: usize) {
        self.start = (self.start + n).min(self.end);
        if self.start == self.end {
            self.clear();
        }
    }

    /// Move up to `out.len()` unread bytes into `out`.
    pub fn copy_to(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len());
        out[..n].copy_from_slice(&self.data[self.start..self.start + n]);
        self.consume(n);
        n
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        let mut rest = bytes;
        while !rest.is_empty() {
            // Fixture data may exceed the receive limit; grow without bound here.
            if self.end == self.data.len() {
                self.make_room(usize::MAX);
            }
            let n = rest.len().min(self.data.len() - self.end);
            self.data[self.end..self.end + n].copy_from_slice(&rest[..n]);
            self.end += n;
            rest = &rest[n..];
        }
    }

    /// Free space at the tail, compacting or doubling when none is left.
    pub fn spare_mut(&mut self) -> Result<&mut [u8], NetError> {
        if self.end == self.data.len() && !self.make_room(self.limit) {
            return Err(NetError::ResponseHeadersTooBig);
        }
        Ok(&mut self.data[self.end..])
    }

    /// Mark `n` bytes written into [`spare_mut`](Self::spare_mut) as readable.
    pub fn commit(&mut self, n: usize) {
        self.end = (self.end + n).min(self.data.len());
    }

    fn make_room(&mut self, limit: usize) -> bool {
        if self.start > 0 {
            self.data.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
            return true;
        }
        let doubled = self.data.len().saturating_mul(2);
        if doubled > limit {
            return false;
        }
        tracing::trace!(from = self.data.len(), to = doubled, "growing parse buffer");
        self.data.resize(doubled, 0);
        true
    }

    /// Pop one line, without its terminator. Accepts `\r\n` and bare `\n`.
    ///
    /// Returns `None` without consuming anything when no full line is buffered.
    pub fn read_line(&mut self) -> Option<&[u8]> {
        let pos = self.as_slice().iter().position(|&b| b == b'\n')?;
        let line_start = self.start;
        let mut line_end = self.start + pos;
        if line_end > line_start && self.data[line_end - 1] == b'\r' {
            line_end -= 1;
        }
        self.consume(pos + 1);
        Some(&self.data[line_start..line_end])
    }

    /// Read once from `reader` into the tail. Returns 0 on EOF.
    ///
    /// Cancel-safe: nothing is committed unless the read completes.
    pub async fn fill_from<R>(&mut self, reader: &mut R) -> Result<usize, NetError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let spare = self.spare_mut()?;
        let n = reader.read(spare).await.transfer_context()?;
        self.commit(n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_line_crlf_and_bare_lf() {
        let mut buf = ParseBuffer::from_bytes(b"first\r\nsecond\nthird");
        assert_eq!(buf.read_line().unwrap(), b"first");
        assert_eq!(buf.read_line().unwrap(), b"second");
        assert!(buf.read_line().is_none());
        assert_eq!(buf.as_slice(), b"third");
    }

    #[test]
    fn test_empty_line() {
        let mut buf = ParseBuffer::from_bytes(b"\r\n\nx");
        assert_eq!(buf.read_line().unwrap(), b"");
        assert_eq!(buf.read_line().unwrap(), b"");
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_grows_by_doubling() {
        let mut buf = ParseBuffer::with_capacity(4, 64);
        let spare = buf.spare_mut().unwrap();
        assert_eq!(spare.len(), 4);
        spare.copy_from_slice(b"abcd");
        buf.commit(4);

        let spare = buf.spare_mut().unwrap();
        assert_eq!(spare.len(), 4);
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.as_slice(), b"abcd");
    }

    #[test]
    fn test_compacts_before_growing() {
        let mut buf = ParseBuffer::with_capacity(4, 64);
        buf.extend_from_slice(b"ab\ncd");
        let cap = buf.capacity();
        buf.read_line();
        buf.extend_from_slice(b"efg");
        assert_eq!(buf.as_slice(), b"cdefg");
        assert!(buf.capacity() >= cap);
    }

    #[test]
    fn test_limit_reached() {
        let mut buf = ParseBuffer::with_capacity(4, 4);
        buf.spare_mut().unwrap().copy_from_slice(b"abcd");
        buf.commit(4);
        assert_eq!(buf.spare_mut().unwrap_err(), NetError::ResponseHeadersTooBig);
    }

    #[test]
    fn test_copy_to_consumes() {
        let mut buf = ParseBuffer::from_bytes(b"hello");
        let mut out = [0u8; 3];
        assert_eq!(buf.copy_to(&mut out), 3);
        assert_eq!(&out, b"hel");
        assert_eq!(buf.as_slice(), b"lo");
    }

    #[tokio::test]
    async fn test_fill_from_reader() {
        let mut reader: &[u8] = b"HTTP/1.1 200 OK\r\n";
        let mut buf = ParseBuffer::new();
        let n = buf.fill_from(&mut reader).await.unwrap();
        assert_eq!(n, 17);
        assert_eq!(buf.read_line().unwrap(), b"HTTP/1.1 200 OK");
        assert_eq!(buf.fill_from(&mut reader).await.unwrap(), 0);
    }
}
