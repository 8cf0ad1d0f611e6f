//! Socket and connection management.
//!
//! Mirrors Chromium's `net/socket/`:
//! - [`pool`]: per-endpoint pools (6 connections by default, FIFO queueing, NTLM pinning)
//! - [`connectjob`]: DNS → TCP → CONNECT tunnel → TLS upgrade
//! - [`connection`]: one HTTP/1.1 connection and its parse state
//! - [`proxy`]: forward HTTP proxy settings
//! - [`tls`]: the external TLS upgrade boundary

pub mod authcache;
pub mod connection;
pub mod connectjob;
pub mod pool;
pub mod proxy;
pub mod stream;
pub mod tls;
