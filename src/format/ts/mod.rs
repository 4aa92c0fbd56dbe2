//! # MPEG Transport Stream (TS) Implementation
//!
//! This module provides the MPEG-TS plumbing the gateway is built on:
//!
//! - TS packet generation with PAT/PMT, continuity counters and PCR
//! - PES encoding of H.264/H.265 access units and AAC frames
//! - TS packet and PSI parsing
//! - Demuxing back into elementary payloads, and on into published frames
//!
//! ## Example: packetizing one frame
//!
//! ```rust
//! use hlsgate::av::VideoFrame;
//! use hlsgate::format::ts::{encode_video_pes, TsMuxer, PID_VIDEO, TS_PACKET_SIZE};
//! use bytes::{Bytes, BytesMut};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let params = hlsgate::av::VideoParams {
//!     codec: hlsgate::av::CodecId::H264,
//!     width: 1280,
//!     height: 720,
//!     sps: Bytes::from_static(&[0x67, 0x42]),
//!     pps: Bytes::from_static(&[0x68, 0xce]),
//!     vps: None,
//! };
//! let frame = VideoFrame::from_millis(0, vec![Bytes::from_static(&[0x65, 0x88])], true);
//!
//! let mut muxer = TsMuxer::new();
//! let mut buf = BytesMut::new();
//! let pes = encode_video_pes(&frame, &params)?;
//! muxer.write_pes(&mut buf, PID_VIDEO, &pes, true)?;
//! assert_eq!(buf.len() % TS_PACKET_SIZE, 0);
//! # Ok(())
//! # }
//! ```

/// TS demuxer extracting elementary payloads
pub mod demuxer;

/// TS muxer turning PES packets into 188-byte packets
pub mod muxer;

/// Low-level TS packet and PSI parsing
pub mod parser;

/// PES packet building for video and audio frames
pub mod pes;

/// Feeding demuxed transport streams into published frame tracks
pub mod reader;

/// Core TS types, tables and constants
pub mod types;

// Re-export commonly used types and constants
pub use demuxer::{TsDemuxer, TsPayload};
pub use muxer::TsMuxer;
pub use pes::{encode_audio_pes, encode_video_pes, PesHeader, PesPacket};
pub use reader::TsReader;
pub use types::{
    pat_packet, pmt_packet, TrackSet, TsHeader, PID_AUDIO, PID_PAT, PID_PMT, PID_VIDEO,
    STREAM_TYPE_AAC, STREAM_TYPE_H264, STREAM_TYPE_H265, TS_PACKET_SIZE,
};
