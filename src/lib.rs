//! # servicenet
//!
//! An HTTP/1.1 client engine for service-to-service traffic, modelled on
//! Chromium's `net/` stack.
//!
//! The engine owns everything between "send this request" and "here is the
//! final response": per-endpoint connection pools, connection setup through
//! an optional forward proxy, request serialization, response parsing,
//! body framing, authentication and redirect handling.
//!
//! ## Features
//!
//! - **Connection pooling**: a per-endpoint connection limit (6 by default),
//!   FIFO queueing of waiting requests and idle recycling
//! - **Framing**: chunked and fixed-length bodies in both directions, with a
//!   replay buffer for resending bodies after auth challenges and redirects
//! - **Redirects and auth**: automatic redirects, pluggable challenge
//!   resolution, and NTLM connection pinning
//! - **Proxies**: absolute-form forwarding for `http` and `CONNECT` tunnels
//!   for `https`
//! - **Cancellation**: every request can be aborted or timed out from any
//!   thread
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use servicenet::urlrequest::{URLRequest, URLRequestContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), servicenet::base::neterror::NetError> {
//!     let ctx = URLRequestContext::new();
//!     let response = URLRequest::new(&ctx, "http://service.internal/health")?
//!         .send()
//!         .await?;
//!     println!("Status: {}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error codes, load states and abort signals
//! - [`cookies`] - Cookie store boundary
//! - [`dns`] - Host resolution
//! - [`http`] - Wire protocol: parsing, framing, single exchanges
//! - [`socket`] - Pools, connection setup, proxy tunnels
//! - [`urlrequest`] - Context, requests and the redirect/auth coordinator

pub mod base;
pub mod cookies;
pub mod dns;
pub mod http;
pub mod socket;
pub mod urlrequest;
