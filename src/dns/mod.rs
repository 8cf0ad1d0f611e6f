//! Endpoint resolution.
//!
//! The connect path resolves a host into an ordered address list and tries
//! each address in turn. Resolution is pluggable so that pools can be
//! exercised against fixed addresses in tests.
//!
//! - [`GaiResolver`]: system resolver (`getaddrinfo` on the blocking pool)
//! - [`StaticResolver`]: fixed host → address table with optional fallback

mod gai;
mod resolve;

pub use gai::GaiResolver;
pub use resolve::{Addrs, Name, Resolve, Resolving, StaticResolver};
