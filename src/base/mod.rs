//! Base types and error handling.
//!
//! Foundational types shared by every layer, modelled on Chromium's `net/base/`:
//! - [`NetError`](neterror::NetError): error codes matching `net_error_list.h`
//! - [`LoadState`](loadstate::LoadState): request progress reporting
//! - [`AbortSignal`](abort::AbortSignal): cancellation and timeouts

pub mod abort;
pub mod context;
pub mod loadstate;
pub mod neterror;

#[cfg(test)]
mod tests;
