//! Turnstile - Sliding-Window Rate Limiting
//!
//! This crate implements per-client admission control for HTTP services.
//! Each client key keeps the timestamps of its counted requests; a request is
//! admitted while fewer than the configured maximum fall inside the sliding
//! window. Admission is two-phase: the limiter evaluates a request, and the
//! caller records the final response status so presets can ignore successful
//! or failed requests.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
