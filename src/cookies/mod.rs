//! Cookie store boundary.
//!
//! The engine does not own cookie policy. Before each attempt it asks a
//! [`CookieStore`] for the `Cookie` header of the target URL and hands every
//! `Set-Cookie` value of the response back to it.
//!
//! | Chromium (C++) | servicenet (Rust) | Responsibility |
//! |----------------|-------------------|----------------|
//! | `net::CookieStore` | [`CookieStore`] | Header lookup / response intake |
//! | `net::CookieMonster` | [`StaticCookieStore`] | Minimal in-memory jar |

mod store;

pub use store::{CookieStore, NoCookies, StaticCookieStore};
