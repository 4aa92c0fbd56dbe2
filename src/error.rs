//! # Error Types
//!
//! This module provides the error types used throughout the hlsgate library.
//! It defines a central error type `HlsError` that encapsulates all possible
//! errors that can occur while segmenting, muxing, or pulling HLS streams.
//!
//! ## Example Usage
//!
//! ```rust
//! use hlsgate::error::{HlsError, Result};
//!
//! fn check_audio_config(data: &[u8]) -> Result<()> {
//!     if data.len() < 4 {
//!         return Err(HlsError::BadAudioConfig("config too short".to_string()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Primary error type for the hlsgate library
#[derive(Error, Debug)]
pub enum HlsError {
    /// I/O errors that occur during file or network operations
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or missing AudioSpecificConfig, or an audio frame that
    /// cannot be represented in a bounded PES packet
    #[error("bad audio config: {0}")]
    BadAudioConfig(String),

    /// Malformed or insufficient video codec configuration
    #[error("bad video config: {0}")]
    BadVideoConfig(String),

    /// Failure while packetizing into MPEG-TS
    #[error("ts mux error: {0}")]
    TsMux(String),

    /// Failure while parsing an m3u8 manifest
    #[error("manifest parse error: {0}")]
    ManifestParse(String),

    /// HTTP request or response failure
    #[error("http error: {0}")]
    Http(String),

    /// A wait for a manifest, segment, or keyframe ran out of time
    #[error("timeout: {0}")]
    Timeout(String),

    /// The underlying stream was closed while work was still pending
    #[error("stream closed")]
    StreamClosed,

    /// Errors for invalid or malformed input data
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// A specialized Result type for hlsgate operations.
pub type Result<T> = std::result::Result<T, HlsError>;
