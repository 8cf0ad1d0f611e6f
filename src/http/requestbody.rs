//! Request body sources.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// A streamed body source.
pub type BodyReaderBox = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Rebuilds a request body from scratch when a redirect or authentication
/// round needs to resend it and no buffered copy exists.
pub type BodyRegenerator = Arc<dyn Fn() -> RequestBody + Send + Sync>;

/// Request body for HTTP methods that send data.
#[derive(Default)]
pub enum RequestBody {
    /// No body (GET, HEAD, DELETE).
    #[default]
    Empty,
    /// Body with raw bytes. Always replayable.
    Bytes(Bytes),
    /// Body pulled from a reader. Sent with `Content-Length` when `length`
    /// is known, chunked otherwise. Consumed by the first send.
    Stream {
        reader: BodyReaderBox,
        length: Option<u64>,
    },
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            RequestBody::Stream { length, .. } => {
                f.debug_struct("Stream").field("length", length).finish()
            }
        }
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Bytes(Bytes::from(s))
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(v: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(v))
    }
}

impl From<&str> for RequestBody {
    fn from(s: &str) -> Self {
        RequestBody::Bytes(Bytes::from(s.to_owned()))
    }
}

impl From<Bytes> for RequestBody {
    fn from(b: Bytes) -> Self {
        RequestBody::Bytes(b)
    }
}

impl RequestBody {
    /// Wrap a reader; `length` selects fixed-length over chunked framing.
    pub fn stream<R>(reader: R, length: Option<u64>) -> Self
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
    {
        RequestBody::Stream {
            reader: Box::new(reader),
            length,
        }
    }

    /// True for no body or a zero-length one.
    pub fn is_empty(&self) -> bool {
        match self {
            RequestBody::Empty => true,
            RequestBody::Bytes(b) => b.is_empty(),
            RequestBody::Stream { length, .. } => *length == Some(0),
        }
    }

    /// Length in bytes when known up front.
    pub fn content_length(&self) -> Option<u64> {
        match self {
            RequestBody::Empty => Some(0),
            RequestBody::Bytes(b) => Some(b.len() as u64),
            RequestBody::Stream { length, .. } => *length,
        }
    }

    /// A second copy of this body, if it can be produced without reading.
    pub fn try_clone(&self) -> Option<RequestBody> {
        match self {
            RequestBody::Empty => Some(RequestBody::Empty),
            RequestBody::Bytes(b) => Some(RequestBody::Bytes(b.clone())),
            RequestBody::Stream { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body() {
        let body = RequestBody::Empty;
        assert!(body.is_empty());
        assert_eq!(body.content_length(), Some(0));
    }

    #[test]
    fn test_bytes_body() {
        let body = RequestBody::Bytes(Bytes::from("hello"));
        assert!(!body.is_empty());
        assert_eq!(body.content_length(), Some(5));
    }

    #[test]
    fn test_from_conversions() {
        let body: RequestBody = "hello world".to_string().into();
        assert_eq!(body.content_length(), Some(11));
        let body: RequestBody = vec![1u8, 2, 3, 4].into();
        assert_eq!(body.content_length(), Some(4));
        let body: RequestBody = Bytes::from_static(b"raw").into();
        assert_eq!(body.content_length(), Some(3));
    }

    #[test]
    fn test_stream_is_not_cloneable() {
        let body = RequestBody::stream(&b"abc"[..], None);
        assert_eq!(body.content_length(), None);
        assert!(body.try_clone().is_none());
        assert!(RequestBody::from("x").try_clone().is_some());
    }
}
