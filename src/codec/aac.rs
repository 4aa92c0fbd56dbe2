use crate::utils::BitReader;
use crate::{HlsError, Result};
use bytes::Bytes;

/// Compact AAC codec parameters carried alongside an audio track.
///
/// Mirrors the MPEG-4 AudioSpecificConfig fields the TS muxer needs to build
/// ADTS headers.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSpecificConfig {
    /// MPEG-4 audio object type (2 = AAC-LC)
    pub object_type: u8,
    /// Sampling frequency index (4 = 44100 Hz)
    pub sampling_index: u8,
    /// Channel configuration (2 = stereo)
    pub channel_config: u8,
    /// Frame length flag (0 = 1024-sample frames)
    pub frame_length_flag: u8,
    /// Depends-on-core-coder flag
    pub depends_on_core_coder: u8,
    /// Extension flag
    pub extension_flag: u8,
}

impl Default for AudioSpecificConfig {
    fn default() -> Self {
        Self {
            object_type: 2,
            sampling_index: 4,
            channel_config: 2,
            frame_length_flag: 0,
            depends_on_core_coder: 0,
            extension_flag: 0,
        }
    }
}

impl AudioSpecificConfig {
    /// Parses the config out of an AAC sequence-header packet.
    ///
    /// The packet layout is two bytes of audio tag info (the second of which
    /// must be zero, marking a sequence header rather than a raw frame)
    /// followed by the two AudioSpecificConfig bytes.
    pub fn parse_sequence_header(audio: &[u8]) -> Result<Self> {
        if audio.len() < 4 {
            return Err(HlsError::BadAudioConfig(
                "sequence header shorter than 4 bytes".into(),
            ));
        }
        if audio[1] != 0 {
            return Err(HlsError::BadAudioConfig(
                "packet is not an AAC sequence header".into(),
            ));
        }

        Ok(Self {
            object_type: (audio[2] & 0xF8) >> 3,
            sampling_index: (audio[2] & 0x07) << 1 | (audio[3] >> 7),
            channel_config: (audio[3] >> 3) & 0x0F,
            frame_length_flag: (audio[3] >> 2) & 0x01,
            depends_on_core_coder: (audio[3] >> 1) & 0x01,
            extension_flag: audio[3] & 0x01,
        })
    }

    /// Builds the config from a parsed ADTS header
    pub fn from_adts(header: &AdtsHeader) -> Self {
        Self {
            object_type: header.profile + 1,
            sampling_index: header.sample_rate_index,
            channel_config: header.channel_configuration,
            ..Default::default()
        }
    }

    /// Returns the sampling rate in Hz, if the index is a defined one
    pub fn sample_rate(&self) -> Option<u32> {
        sample_rate_for_index(self.sampling_index)
    }

    /// Renders the 7-byte ADTS header framing a raw AAC frame of
    /// `raw_len` bytes.
    ///
    /// The ADTS frame-length field is 13 bits wide and covers header plus
    /// payload; frames that cannot be represented are rejected.
    pub fn adts_header(&self, raw_len: usize) -> Result<[u8; 7]> {
        let frame_length = raw_len + 7;
        if frame_length > 0x1FFF {
            return Err(HlsError::BadAudioConfig(format!(
                "aac frame of {} bytes exceeds the ADTS length field",
                raw_len
            )));
        }
        let frame_length = frame_length as u16;
        // ADTS profile is object type minus one
        let profile = self.object_type.saturating_sub(1) & 0x03;

        Ok([
            0xFF,
            0xF1, // MPEG-4, layer 0, no CRC
            (profile << 6) | ((self.sampling_index & 0x0F) << 2) | ((self.channel_config >> 2) & 0x01),
            ((self.channel_config & 0x03) << 6) | ((frame_length >> 11) & 0x03) as u8,
            ((frame_length >> 3) & 0xFF) as u8,
            (((frame_length & 0x07) << 5) as u8) | 0x1F, // buffer fullness = 0x7FF
            0xFC,
        ])
    }
}

/// A parsed 7-byte ADTS header
#[derive(Debug, Clone)]
pub struct AdtsHeader {
    /// MPEG version bit (0 = MPEG-4)
    pub id: u8,
    /// ADTS profile (object type minus one)
    pub profile: u8,
    /// Sampling frequency index
    pub sample_rate_index: u8,
    /// Channel configuration
    pub channel_configuration: u8,
    /// Whole frame length including the header, 13 bits
    pub frame_length: u16,
    /// True when no CRC words follow the header
    pub protection_absent: bool,
}

impl AdtsHeader {
    /// Parses an ADTS header from the start of `data`
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 7 {
            return Err(HlsError::BadAudioConfig("ADTS header too short".into()));
        }

        let mut reader = BitReader::new(data);
        let sync_word = reader.read_bits(12)?;
        if sync_word != 0xFFF {
            return Err(HlsError::BadAudioConfig("invalid ADTS sync word".into()));
        }

        let id = reader.read_bits(1)? as u8;
        reader.skip_bits(2)?; // layer
        let protection_absent = reader.read_bits(1)? == 1;
        let profile = reader.read_bits(2)? as u8;
        let sample_rate_index = reader.read_bits(4)? as u8;
        reader.skip_bits(1)?; // private bit
        let channel_configuration = reader.read_bits(3)? as u8;
        reader.skip_bits(4)?; // original/copy, home, copyright bits
        let frame_length = reader.read_bits(13)? as u16;

        if frame_length < 7 {
            return Err(HlsError::BadAudioConfig("ADTS frame length too small".into()));
        }

        Ok(Self {
            id,
            profile,
            sample_rate_index,
            channel_configuration,
            frame_length,
            protection_absent,
        })
    }

    /// Returns the sampling rate in Hz, if the index is a defined one
    pub fn sample_rate(&self) -> Option<u32> {
        sample_rate_for_index(self.sample_rate_index)
    }

    /// Size of the header in bytes (9 when CRC words are present)
    pub fn header_len(&self) -> usize {
        if self.protection_absent {
            7
        } else {
            9
        }
    }
}

fn sample_rate_for_index(index: u8) -> Option<u32> {
    match index {
        0 => Some(96000),
        1 => Some(88200),
        2 => Some(64000),
        3 => Some(48000),
        4 => Some(44100),
        5 => Some(32000),
        6 => Some(24000),
        7 => Some(22050),
        8 => Some(16000),
        9 => Some(12000),
        10 => Some(11025),
        11 => Some(8000),
        12 => Some(7350),
        _ => None,
    }
}

/// Splits a concatenation of ADTS frames into `(header, raw)` pairs.
///
/// Truncated or unparseable trailing bytes end the iteration; upstream
/// reports such corruption per frame without aborting the stream.
pub fn split_adts(data: &[u8]) -> Vec<(AdtsHeader, Bytes)> {
    let mut frames = Vec::new();
    let mut pos = 0;

    while pos + 7 <= data.len() {
        let Ok(header) = AdtsHeader::parse(&data[pos..]) else {
            break;
        };
        let frame_end = pos + header.frame_length as usize;
        if frame_end > data.len() {
            break;
        }
        let raw_start = pos + header.header_len();
        if raw_start <= frame_end {
            frames.push((
                header.clone(),
                Bytes::copy_from_slice(&data[raw_start..frame_end]),
            ));
        }
        pos = frame_end;
    }

    frames
}
