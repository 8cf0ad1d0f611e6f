//! HTTP/1.1 wire protocol.
//!
//! - [`parser`]: status line and header block parsing
//! - [`chunked`], [`framer`]: body framing in both directions
//! - [`transaction`]: one request/response exchange on a connection
//! - [`auth`], [`retry`]: decisions the coordinator makes between attempts

pub mod auth;
pub mod buffer;
pub mod chunked;
pub mod framer;
pub mod orderedheaders;
pub mod parser;
pub mod requestbody;
pub mod response;
pub mod responsebody;
pub mod retry;
pub mod transaction;

// Re-exports for convenience
pub use requestbody::RequestBody;
pub use response::HttpResponse;
pub use responsebody::ResponseBody;
