//! # Utility Modules
//!
//! Supporting utilities for compression, logging, metrics and timing.
//!
//! ## Components
//! - **Compression**: the compression codec registry (zlib, gzip, zstd, lz4) with size limits
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Time**: Unix timestamps for envelopes
//!
//! ## Security
//! - Decompression bomb protection (bounded by the frame ceiling)

pub mod compression;
pub mod logging;
pub mod metrics;
pub mod time;

pub use compression::CompressionKind;
pub use metrics::{Metrics, MetricsSnapshot};
