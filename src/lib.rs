#![doc(html_root_url = "https://docs.rs/hlsgate/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

//! # hlsgate - HLS Gateway for Live-Media Servers
//!
//! `hlsgate` is an embeddable HLS (HTTP Live Streaming) gateway. Dropped
//! into a live-media server, it bridges the server's internal frame streams
//! and rolling HLS presentations in both directions:
//!
//! - **Egress**: subscribe to a published stream of decoded frames, cut it
//!   into MPEG-TS segments at keyframe boundaries, maintain a sliding
//!   manifest window, and serve both over HTTP.
//! - **Ingress**: poll a remote `.m3u8`, download fresh segments, and demux
//!   them into the server's publishing pipeline and/or relay the bytes
//!   verbatim under a local manifest.
//!
//! ## Quick Start
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! hlsgate = "0.1.0"
//! ```
//!
//! ### Serving a published stream as HLS
//!
//! ```rust,no_run
//! use hlsgate::av::StreamHub;
//! use hlsgate::config::HlsConfig;
//! use hlsgate::format::hls::HlsPlugin;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = StreamHub::new();
//!     let plugin = HlsPlugin::new(HlsConfig::default(), hub.clone())?;
//!     plugin.clone().start();
//!
//!     // The host engine publishes frames into the hub; the gateway
//!     // segments them and serves /hls/<streamPath>.m3u8
//!     let app = axum::Router::new()
//!         .nest("/hls", plugin.clone().router())
//!         .nest("/api/hls", plugin.api_router());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ### Pulling a remote HLS stream
//!
//! ```rust,no_run
//! # use hlsgate::{av::StreamHub, config::HlsConfig, format::hls::HlsPlugin};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let plugin = HlsPlugin::new(HlsConfig::default(), StreamHub::new())?;
//! plugin.pull("live/remote", "https://example.com/stream/index.m3u8", false)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - `av`: the frame model shared with the host engine, frame rings with
//!   keyframe tracking, and the stream registry
//! - `codec`: AAC ADTS/AudioSpecificConfig handling and H.264/H.265 NAL
//!   unit classification
//! - `format`: MPEG-TS muxing/demuxing and the HLS gateway itself
//!   (segmenter, puller, stores, HTTP surface)
//! - `config`: the gateway's configuration knobs
//! - `error`: error types and the crate's `Result` alias
//! - `utils`: bit readers, MPEG CRC32 and pooled byte buffers

/// Audio/Video frame model, rings and the stream hub
pub mod av;

/// Codec-level framing for AAC, H.264 and H.265
pub mod codec;

/// Error types and utilities
pub mod error;

/// Media format implementations (TS, HLS)
pub mod format;

/// Common utilities and helper functions
pub mod utils;

/// Gateway configuration
pub mod config;

pub use config::HlsConfig;
pub use error::{HlsError, Result};
pub use format::hls::HlsPlugin;
