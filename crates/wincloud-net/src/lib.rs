#![warn(missing_docs)]

//! Network layer for the WinCloud client.
//!
//! Provides the HTTP implementation of the cloud store contract defined
//! in `wincloud-core`, plus the retry policy it runs under. The archive
//! engine only sees the `CloudStore` trait; everything wire-specific
//! (auth tokens, chunk headers, status mapping) lives here.

pub mod http;
pub mod retry;

pub use http::HttpCloudStore;
pub use retry::{RetryConfig, RetryExecutor};
