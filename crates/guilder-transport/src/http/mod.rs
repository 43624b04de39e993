//! REST transport.
//!
//! [`HttpClient`] owns the retry rules of the API: rate limits honour
//! `Retry-After`, transient server errors and dropped connections are retried
//! with a linear delay, everything else fails immediately.

mod client;
mod route;

pub use client::{HttpClient, HttpClientConfig, fallback_delay, retry_delay};
pub use route::Route;
