//! WinCloud Test & Validation Infrastructure
//!
//! Cross-crate test suites for the hybrid archive client: container
//! format parsing and truncation handling, end-to-end archive/extract
//! integration, chunked upload conformance, and property-based
//! roundtrip tests for the split/compress/encrypt layers.

pub mod chunked_upload_tests;
pub mod pipeline_integration;
pub mod proptest_roundtrip;
