//! Translation between the consumer-facing and upstream chat formats.
//!
//! Requests are enriched on the way out, responses have their reasoning
//! folded into the visible text on the way back. All functions here are pure
//! (no I/O), streaming included.

pub mod request;
pub mod response;
pub mod streaming;
pub mod types;
