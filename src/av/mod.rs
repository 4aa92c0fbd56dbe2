//! # Audio/Video Core Types
//!
//! This module provides the frame model the gateway exchanges with its host
//! media engine, plus the in-process plumbing for it: a broadcast frame ring
//! with keyframe tracking and a process-scoped stream registry.
//!
//! The engine side (publish/subscribe bus, ingest protocols, decoders) is an
//! external collaborator; what crosses the seam is decoded access units:
//!
//! - [`VideoFrame`]: one access unit as an AnnexB NAL unit list, with a
//!   keyframe flag and 90 kHz PTS/DTS
//! - [`AudioFrame`]: one raw AAC frame
//!
//! ## Timestamp convention
//!
//! Frames carry PTS/DTS in 90 kHz units. Constructors that synthesize frames
//! from millisecond timestamps multiply by 90 exactly once, at construction;
//! nothing downstream rescales.
//!
//! ```rust
//! use hlsgate::av::VideoFrame;
//! use bytes::Bytes;
//!
//! let frame = VideoFrame::from_millis(2000, vec![Bytes::from_static(&[0x65, 0x88])], true);
//! assert_eq!(frame.pts, 180_000);
//! ```

use crate::codec::aac::AudioSpecificConfig;
use bytes::Bytes;
use std::time::Duration;

/// Frame ring with keyframe tracking
pub mod ring;

/// Process-scoped stream registry and events
pub mod hub;

pub use hub::{Stream, StreamEvent, StreamHub, StreamOrigin, Track};
pub use ring::{FrameRing, RingReader};

/// Codec identifiers for the elementary streams the gateway carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecId {
    /// H.264/AVC video
    H264,
    /// H.265/HEVC video
    H265,
    /// AAC audio
    Aac,
}

impl CodecId {
    /// True for the video codecs
    pub fn is_video(&self) -> bool {
        matches!(self, CodecId::H264 | CodecId::H265)
    }
}

/// One decoded video access unit
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Position of the frame on the stream timeline
    pub timestamp: Duration,
    /// Presentation timestamp, 90 kHz
    pub pts: u64,
    /// Decoding timestamp, 90 kHz
    pub dts: u64,
    /// True when the frame is an IDR/IRAP picture
    pub keyframe: bool,
    /// NAL unit payloads without start codes
    pub nalus: Vec<Bytes>,
}

impl VideoFrame {
    /// Builds a frame from a millisecond timestamp; PTS and DTS both become
    /// `millis * 90`
    pub fn from_millis(millis: u64, nalus: Vec<Bytes>, keyframe: bool) -> Self {
        let ticks = millis * 90;
        Self {
            timestamp: Duration::from_millis(millis),
            pts: ticks,
            dts: ticks,
            keyframe,
            nalus,
        }
    }

    /// Sets a distinct presentation timestamp (90 kHz) for B-frame reordering
    pub fn with_pts(mut self, pts: u64) -> Self {
        self.pts = pts;
        self
    }
}

/// One raw AAC frame
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Position of the frame on the stream timeline
    pub timestamp: Duration,
    /// Presentation timestamp, 90 kHz
    pub pts: u64,
    /// Raw AAC frame payload, without ADTS framing
    pub data: Bytes,
}

impl AudioFrame {
    /// Builds a frame from a millisecond timestamp; PTS becomes `millis * 90`
    pub fn from_millis(millis: u64, data: Bytes) -> Self {
        Self {
            timestamp: Duration::from_millis(millis),
            pts: millis * 90,
            data,
        }
    }
}

/// A frame of either kind, as stored in a track ring
#[derive(Debug, Clone)]
pub enum Frame {
    /// Video access unit
    Video(VideoFrame),
    /// Audio frame
    Audio(AudioFrame),
}

impl Frame {
    /// Timeline position of the frame
    pub fn timestamp(&self) -> Duration {
        match self {
            Frame::Video(f) => f.timestamp,
            Frame::Audio(f) => f.timestamp,
        }
    }

    /// True for video keyframes
    pub fn is_keyframe(&self) -> bool {
        matches!(self, Frame::Video(f) if f.keyframe)
    }
}

/// Codec configuration of a video track
#[derive(Debug, Clone)]
pub struct VideoParams {
    /// Video codec in use
    pub codec: CodecId,
    /// Picture width in pixels
    pub width: u32,
    /// Picture height in pixels
    pub height: u32,
    /// Sequence parameter set payload
    pub sps: Bytes,
    /// Picture parameter set payload
    pub pps: Bytes,
    /// Video parameter set payload (H.265 only)
    pub vps: Option<Bytes>,
}

/// Codec configuration of a track, video or audio
#[derive(Debug, Clone)]
pub enum TrackParams {
    /// Video track configuration
    Video(VideoParams),
    /// Audio track configuration
    Audio(AudioSpecificConfig),
}

impl TrackParams {
    /// The codec this track carries
    pub fn codec(&self) -> CodecId {
        match self {
            TrackParams::Video(p) => p.codec,
            TrackParams::Audio(_) => CodecId::Aac,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_to_90khz() {
        let v = VideoFrame::from_millis(1000, Vec::new(), false);
        assert_eq!(v.pts, 90_000);
        assert_eq!(v.dts, 90_000);
        assert_eq!(v.timestamp, Duration::from_secs(1));

        let a = AudioFrame::from_millis(23, Bytes::new());
        assert_eq!(a.pts, 2070);
    }

    #[test]
    fn test_frame_keyframe() {
        let v = Frame::Video(VideoFrame::from_millis(0, Vec::new(), true));
        assert!(v.is_keyframe());
        let a = Frame::Audio(AudioFrame::from_millis(0, Bytes::new()));
        assert!(!a.is_keyframe());
    }
}
