use super::types::{STREAM_ID_AUDIO, STREAM_ID_VIDEO};
use crate::av::{AudioFrame, CodecId, VideoFrame, VideoParams};
use crate::codec::aac::AudioSpecificConfig;
use crate::codec::{h264, h265};
use crate::error::{HlsError, Result};
use bytes::{BufMut, BytesMut};

/// 4-byte start code prefixed to parameter sets on keyframes
const START_CODE_4: [u8; 4] = [0x00, 0x00, 0x00, 0x01];
/// 3-byte start code prefixed to each access-unit NAL unit
const START_CODE_3: [u8; 3] = [0x00, 0x00, 0x01];

/// A PES packet header: start code, stream id, length, flags, PTS/DTS
#[derive(Debug, Clone)]
pub struct PesHeader {
    /// Stream ID: 0xe0 for video, 0xc0 for audio
    pub stream_id: u8,
    /// PES packet length field; 0 means unbounded (video only)
    pub packet_length: u16,
    /// PTS/DTS flags byte: 0x80 = PTS only, 0xc0 = PTS and DTS
    pub pts_dts_flags: u8,
    /// Length of the optional header data that follows
    pub header_data_length: u8,
    /// Presentation timestamp, 90 kHz
    pub pts: Option<u64>,
    /// Decoding timestamp, 90 kHz
    pub dts: Option<u64>,
}

impl PesHeader {
    /// Serializes the header per ITU-T H.222.0
    pub fn write_to(&self, buf: &mut BytesMut) {
        // Packet start code prefix 0x000001
        buf.put_u8(0x00);
        buf.put_u8(0x00);
        buf.put_u8(0x01);
        buf.put_u8(self.stream_id);
        buf.put_u16(self.packet_length);
        // '10' marker, no scrambling, no priority/alignment/copyright flags
        buf.put_u8(0x80);
        buf.put_u8(self.pts_dts_flags);
        buf.put_u8(self.header_data_length);

        if let Some(pts) = self.pts {
            let marker = if self.dts.is_some() { 0x30 } else { 0x20 };
            write_timestamp(buf, marker, pts);
        }
        if let Some(dts) = self.dts {
            write_timestamp(buf, 0x10, dts);
        }
    }
}

/// A complete PES packet ready for TS packetization
#[derive(Debug)]
pub struct PesPacket {
    /// Packet header
    pub header: PesHeader,
    /// Elementary stream payload
    pub payload: Vec<u8>,
}

impl PesPacket {
    /// Serializes header followed by payload
    pub fn write_to(&self, buf: &mut BytesMut) {
        self.header.write_to(buf);
        buf.extend_from_slice(&self.payload);
    }

    /// Total serialized size in bytes
    pub fn len(&self) -> usize {
        9 + (if self.header.pts.is_some() { 5 } else { 0 })
            + (if self.header.dts.is_some() { 5 } else { 0 })
            + self.payload.len()
    }

    /// True when the packet has no payload
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Builds the PES packet for one video access unit.
///
/// The payload is the access unit delimiter, then on keyframes each
/// parameter set (VPS for H.265, SPS, PPS) behind a 4-byte start code, then
/// every NAL unit of the frame behind a 3-byte start code. Missing parameter
/// sets on a keyframe are tolerated with a warning; the keyframe prefix is
/// best-effort.
pub fn encode_video_pes(frame: &VideoFrame, params: &VideoParams) -> Result<PesPacket> {
    if frame.nalus.is_empty() {
        return Err(HlsError::BadVideoConfig("video frame has no NAL units".into()));
    }

    let mut data = Vec::new();
    match params.codec {
        CodecId::H264 => data.extend_from_slice(&h264::AUD),
        CodecId::H265 => data.extend_from_slice(&h265::AUD),
        CodecId::Aac => {
            return Err(HlsError::BadVideoConfig("audio codec on a video track".into()))
        }
    }

    if frame.keyframe {
        if params.codec == CodecId::H265 {
            match &params.vps {
                Some(vps) => {
                    data.extend_from_slice(&START_CODE_4);
                    data.extend_from_slice(vps);
                }
                None => log::warn!("keyframe without VPS, emitting segment anyway"),
            }
        }
        if params.sps.is_empty() || params.pps.is_empty() {
            log::warn!("keyframe without SPS/PPS, emitting segment anyway");
        }
        if !params.sps.is_empty() {
            data.extend_from_slice(&START_CODE_4);
            data.extend_from_slice(&params.sps);
        }
        if !params.pps.is_empty() {
            data.extend_from_slice(&START_CODE_4);
            data.extend_from_slice(&params.pps);
        }
    }

    for nalu in &frame.nalus {
        data.extend_from_slice(&START_CODE_3);
        data.extend_from_slice(nalu);
    }

    // Optional header: flags(2) + length(1) + PTS(5) + DTS(5); the length
    // field caps at 0xffff, beyond which video PES goes unbounded
    let pkt_length = data.len() + 10 + 3;
    let pkt_length = if pkt_length > 0xffff { 0 } else { pkt_length as u16 };

    Ok(PesPacket {
        header: PesHeader {
            stream_id: STREAM_ID_VIDEO,
            packet_length: pkt_length,
            pts_dts_flags: 0xc0,
            header_data_length: 10,
            pts: Some(frame.pts),
            dts: Some(frame.dts),
        },
        payload: data,
    })
}

/// Builds the PES packet for one AAC frame: ADTS header plus raw payload.
///
/// Audio PES packets must stay bounded; a frame that would overflow the
/// 16-bit length field is an error.
pub fn encode_audio_pes(frame: &AudioFrame, asc: &AudioSpecificConfig) -> Result<PesPacket> {
    let adts = asc.adts_header(frame.data.len())?;

    let mut data = Vec::with_capacity(adts.len() + frame.data.len());
    data.extend_from_slice(&adts);
    data.extend_from_slice(&frame.data);

    let pkt_length = data.len() + 8;
    if pkt_length > 0xffff {
        return Err(HlsError::BadAudioConfig(format!(
            "audio PES of {} bytes exceeds the length field",
            pkt_length
        )));
    }

    Ok(PesPacket {
        header: PesHeader {
            stream_id: STREAM_ID_AUDIO,
            packet_length: pkt_length as u16,
            pts_dts_flags: 0x80,
            header_data_length: 5,
            pts: Some(frame.pts),
            dts: None,
        },
        payload: data,
    })
}

// 33-bit timestamp over five bytes with marker bits
fn write_timestamp(buf: &mut BytesMut, marker: u8, ts: u64) {
    let ts = ts & 0x1_ffff_ffff;
    buf.put_u8(marker | ((ts >> 29) & 0x0e) as u8 | 0x01);
    buf.put_u16((((ts >> 14) & 0xfffe) | 0x01) as u16);
    buf.put_u16((((ts << 1) & 0xfffe) | 0x01) as u16);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn test_params() -> VideoParams {
        VideoParams {
            codec: CodecId::H264,
            width: 1280,
            height: 720,
            sps: Bytes::from_static(&[0x67, 0x64, 0x00, 0x1f]),
            pps: Bytes::from_static(&[0x68, 0xee, 0x3c, 0x80]),
            vps: None,
        }
    }

    #[test]
    fn test_video_pes_keyframe_layout() {
        let frame = VideoFrame::from_millis(0, vec![Bytes::from_static(&[0x65, 0x88, 0x84])], true);
        let params = test_params();
        let pes = encode_video_pes(&frame, &params).unwrap();

        // AUD first
        assert_eq!(&pes.payload[..6], &h264::AUD);
        // SPS with 4-byte start code
        assert_eq!(&pes.payload[6..10], &START_CODE_4);
        assert_eq!(pes.payload[10], 0x67);
        // PPS follows the SPS
        let pps_at = 10 + params.sps.len();
        assert_eq!(&pes.payload[pps_at..pps_at + 4], &START_CODE_4);
        assert_eq!(pes.payload[pps_at + 4], 0x68);
        // Slice NALU behind a 3-byte start code
        let slice_at = pps_at + 4 + params.pps.len();
        assert_eq!(&pes.payload[slice_at..slice_at + 3], &START_CODE_3);
        assert_eq!(pes.payload[slice_at + 3], 0x65);

        assert_eq!(pes.header.pts_dts_flags, 0xc0);
        assert_eq!(pes.header.header_data_length, 10);
        assert_eq!(pes.header.packet_length as usize, pes.payload.len() + 13);
    }

    #[test]
    fn test_video_pes_non_keyframe_has_no_parameter_sets() {
        let frame = VideoFrame::from_millis(33, vec![Bytes::from_static(&[0x41, 0x9a])], false);
        let pes = encode_video_pes(&frame, &test_params()).unwrap();
        assert_eq!(&pes.payload[..6], &h264::AUD);
        assert_eq!(&pes.payload[6..9], &START_CODE_3);
        assert_eq!(pes.payload[9], 0x41);
    }

    #[test]
    fn test_video_pes_oversized_goes_unbounded() {
        let big = vec![0x41u8; 0x1_0000];
        let frame = VideoFrame::from_millis(0, vec![Bytes::from(big)], false);
        let pes = encode_video_pes(&frame, &test_params()).unwrap();
        assert_eq!(pes.header.packet_length, 0);
    }

    #[test]
    fn test_video_pes_h265_vps_prefix() {
        let mut params = test_params();
        params.codec = CodecId::H265;
        params.vps = Some(Bytes::from_static(&[0x40, 0x01]));
        params.sps = Bytes::from_static(&[0x42, 0x01]);
        params.pps = Bytes::from_static(&[0x44, 0x01]);

        let frame = VideoFrame::from_millis(0, vec![Bytes::from_static(&[0x26, 0x01])], true);
        let pes = encode_video_pes(&frame, &params).unwrap();
        assert_eq!(&pes.payload[..7], &h265::AUD);
        // VPS comes before SPS and PPS
        assert_eq!(&pes.payload[7..11], &START_CODE_4);
        assert_eq!(pes.payload[11], 0x40);
    }

    #[test]
    fn test_audio_pes_layout() {
        let frame = AudioFrame::from_millis(23, Bytes::from_static(&[0x21, 0x22, 0x23]));
        let asc = AudioSpecificConfig::default();
        let pes = encode_audio_pes(&frame, &asc).unwrap();

        // ADTS sync word leads the payload
        assert_eq!(pes.payload[0], 0xff);
        assert_eq!(pes.payload[1] & 0xf0, 0xf0);
        assert_eq!(pes.header.packet_length as usize, pes.payload.len() + 8);
        assert_eq!(pes.header.pts_dts_flags, 0x80);
        assert_eq!(pes.header.header_data_length, 5);
        assert!(pes.header.dts.is_none());

        // ADTS frame_length covers header + raw
        let frame_length =
            (((pes.payload[3] & 0x03) as usize) << 11) | ((pes.payload[4] as usize) << 3)
                | ((pes.payload[5] as usize) >> 5);
        assert_eq!(frame_length, pes.payload.len());
    }

    #[test]
    fn test_audio_pes_overflow_is_rejected() {
        let frame = AudioFrame::from_millis(0, Bytes::from(vec![0u8; 0x1_0000]));
        let asc = AudioSpecificConfig::default();
        assert!(matches!(
            encode_audio_pes(&frame, &asc),
            Err(HlsError::BadAudioConfig(_))
        ));
    }

    #[test]
    fn test_header_serialization() {
        let mut buf = BytesMut::new();
        let header = PesHeader {
            stream_id: STREAM_ID_VIDEO,
            packet_length: 100,
            pts_dts_flags: 0xc0,
            header_data_length: 10,
            pts: Some(90_000),
            dts: Some(90_000),
        };
        header.write_to(&mut buf);

        assert_eq!(&buf[0..3], &[0x00, 0x00, 0x01]);
        assert_eq!(buf[3], STREAM_ID_VIDEO);
        assert_eq!(u16::from_be_bytes([buf[4], buf[5]]), 100);
        assert_eq!(buf[6], 0x80);
        assert_eq!(buf[7], 0xc0);
        assert_eq!(buf[8], 10);
        // 9 fixed + 10 timestamp bytes
        assert_eq!(buf.len(), 19);
        // PTS marker for a PTS+DTS pair is '0011'
        assert_eq!(buf[9] & 0xf0, 0x30);
        assert_eq!(buf[14] & 0xf0, 0x10);
    }
}
