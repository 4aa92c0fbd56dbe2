//! # Video and Audio Codec Implementations
//!
//! This module provides the codec-level framing the TS muxer and demuxer
//! need: AAC AudioSpecificConfig/ADTS handling and H.264/H.265 NAL unit
//! classification. Bitstream parsing beyond that (slice headers, SPS
//! contents, ...) is intentionally out of scope; parameter sets travel as
//! opaque byte strings supplied by the publishing side.
//!
//! ## Supported Codecs
//!
//! ### H.264/AVC
//! - NAL unit type classification and keyframe detection
//! - Access Unit Delimiter constant for PES payload framing
//! - AnnexB start-code splitting
//!
//! ### H.265/HEVC
//! - NAL unit type classification (6-bit header) and IRAP detection
//! - Access Unit Delimiter constant
//!
//! ### AAC Audio
//! - AudioSpecificConfig parsing from AAC sequence headers
//! - ADTS header generation and parsing
//! - ADTS elementary-stream splitting

/// AAC AudioSpecificConfig and ADTS framing
pub mod aac;

/// H.264/AVC NAL unit handling
pub mod h264;

/// H.265/HEVC NAL unit handling
pub mod h265;

use bytes::Bytes;

/// Splits an AnnexB elementary stream into NAL unit payloads.
///
/// Both 3-byte (`00 00 01`) and 4-byte (`00 00 00 01`) start codes are
/// accepted. The returned payloads do not include start codes. Data before
/// the first start code is ignored.
pub fn split_annexb(data: &[u8]) -> Vec<Bytes> {
    let mut nalus = Vec::new();
    let mut start = None;
    let mut i = 0;

    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let code_start = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            if let Some(s) = start {
                if code_start > s {
                    nalus.push(Bytes::copy_from_slice(&data[s..code_start]));
                }
            }
            start = Some(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    if let Some(s) = start {
        if s < data.len() {
            nalus.push(Bytes::copy_from_slice(&data[s..]));
        }
    }

    nalus
}
