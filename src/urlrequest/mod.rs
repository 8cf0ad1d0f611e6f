//! High-level request API.
//!
//! - [`URLRequestContext`]: engine configuration plus the shared pool
//! - [`URLRequest`]: one logical request, sent directly or as a task
//! - [`URLRequestHttpJob`]: the coordinator behind [`URLRequest::send`]

pub mod context;
pub mod job;
pub mod request;

pub use context::{ContentCoding, EngineConfig, URLRequestContext, URLRequestContextBuilder};
pub use job::URLRequestHttpJob;
pub use request::{ProxyChoice, RequestHandle, RequestOptions, URLRequest};
