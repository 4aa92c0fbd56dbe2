//! # Media Format Implementations
//!
//! This module provides the container and delivery formats the gateway
//! speaks:
//!
//! - **TS**: MPEG Transport Stream muxing, demuxing and PES handling
//! - **HLS**: segmentation, playlists, the remote puller and the HTTP surface
//!
//! ## Example: demuxing a segment
//!
//! ```rust,no_run
//! use hlsgate::format::{Demuxer, ts::TsDemuxer};
//!
//! # async fn example(segment: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
//! let mut demuxer = TsDemuxer::new(segment);
//! while let Some(payload) = demuxer.next_payload().await? {
//!     println!("pid {} pts {}", payload.pid, payload.pts);
//! }
//! # Ok(())
//! # }
//! ```

use crate::format::ts::demuxer::TsPayload;
use crate::Result;

/// HLS segmentation, stores, puller and HTTP surface
pub mod hls;

/// MPEG Transport Stream (TS) format implementation
pub mod ts;

/// Common trait for demuxers that extract elementary payloads from
/// container formats
#[async_trait::async_trait]
pub trait Demuxer: Send {
    /// Reads the next elementary payload, or `None` at end of input.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure; corrupt packets inside the stream
    /// are skipped rather than surfaced here.
    async fn next_payload(&mut self) -> Result<Option<TsPayload>>;
}

// Re-export commonly used types
pub use self::hls::{HlsPlugin, HlsPuller, HlsWriter};
pub use self::ts::{TsDemuxer, TsMuxer, TsReader};
