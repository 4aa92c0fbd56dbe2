use super::pes::PesPacket;
use super::types::{pcr_from_base, TsHeader, TS_PACKET_SIZE};
use crate::error::{HlsError, Result};
use bytes::{BufMut, BytesMut};
use std::collections::HashMap;

/// Payload capacity of a TS packet without an adaptation field
const TS_PAYLOAD_SIZE: usize = TS_PACKET_SIZE - 4;

/// Packetizes PES packets into 188-byte transport stream packets.
///
/// The muxer owns per-PID continuity counters. One muxer lives in each
/// track reader so counters stay monotonic (modulo 16) across segment cuts
/// of the same track.
pub struct TsMuxer {
    counters: HashMap<u16, u8>,
}

impl TsMuxer {
    /// Creates a muxer with all counters at zero
    pub fn new() -> Self {
        Self {
            counters: HashMap::new(),
        }
    }

    /// Current continuity counter value for a PID (the next packet's value)
    pub fn continuity_counter(&self, pid: u16) -> u8 {
        self.counters.get(&pid).copied().unwrap_or(0)
    }

    fn next_cc(&mut self, pid: u16) -> u8 {
        let counter = self.counters.entry(pid).or_insert(0);
        let cc = *counter;
        *counter = (*counter + 1) & 0x0f;
        cc
    }

    /// Splits one PES packet into TS packets appended to `buf`.
    ///
    /// The first packet carries PUSI; for keyframes it also carries an
    /// adaptation field with the PCR (base taken from DTS, falling back to
    /// PTS) and the random-access indicator. Short tails are absorbed with
    /// adaptation-field stuffing so every packet is exactly 188 bytes.
    pub fn write_pes(
        &mut self,
        buf: &mut BytesMut,
        pid: u16,
        pes: &PesPacket,
        keyframe: bool,
    ) -> Result<()> {
        if pes.is_empty() {
            return Err(HlsError::TsMux("empty PES payload".into()));
        }

        let mut data = BytesMut::with_capacity(pes.len());
        pes.write_to(&mut data);

        let pcr_base = pes.header.dts.or(pes.header.pts).unwrap_or(0);
        let mut first = true;
        let mut pos = 0;

        while pos < data.len() {
            let remaining = data.len() - pos;
            let with_pcr = first && keyframe;

            // length byte + flags + 6 PCR bytes when the clock rides along
            let mut af_len: usize = if with_pcr { 8 } else { 0 };
            let mut capacity = TS_PAYLOAD_SIZE - af_len;
            if remaining < capacity {
                af_len = TS_PAYLOAD_SIZE - remaining;
                capacity = remaining;
            }

            let header = TsHeader {
                payload_unit_start: first,
                pid,
                adaptation_field_exists: af_len > 0,
                continuity_counter: self.next_cc(pid),
                ..TsHeader::default()
            };
            header.write_to(buf);

            if af_len > 0 {
                buf.put_u8((af_len - 1) as u8);
                if af_len > 1 {
                    let mut flags = 0u8;
                    if with_pcr {
                        // PCR flag + random access indicator
                        flags |= 0x50;
                    }
                    buf.put_u8(flags);

                    let mut stuffing = af_len - 2;
                    if with_pcr {
                        let pcr = pcr_from_base(pcr_base);
                        buf.put_u32((pcr >> 16) as u32);
                        buf.put_u16((pcr & 0xffff) as u16);
                        stuffing -= 6;
                    }
                    for _ in 0..stuffing {
                        buf.put_u8(0xff);
                    }
                }
            }

            buf.extend_from_slice(&data[pos..pos + capacity]);
            pos += capacity;
            first = false;
        }

        Ok(())
    }
}

impl Default for TsMuxer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::{AudioFrame, VideoFrame};
    use crate::codec::aac::AudioSpecificConfig;
    use crate::format::ts::pes::{encode_audio_pes, encode_video_pes};
    use crate::format::ts::types::{PID_AUDIO, PID_VIDEO};
    use bytes::Bytes;

    fn video_params() -> crate::av::VideoParams {
        crate::av::VideoParams {
            codec: crate::av::CodecId::H264,
            width: 640,
            height: 480,
            sps: Bytes::from_static(&[0x67, 0x42]),
            pps: Bytes::from_static(&[0x68, 0xce]),
            vps: None,
        }
    }

    #[test]
    fn test_packets_are_188_bytes() {
        let mut muxer = TsMuxer::new();
        let mut buf = BytesMut::new();
        let frame = VideoFrame::from_millis(0, vec![Bytes::from(vec![0x65; 1000])], true);
        let pes = encode_video_pes(&frame, &video_params()).unwrap();
        muxer.write_pes(&mut buf, PID_VIDEO, &pes, true).unwrap();

        assert_eq!(buf.len() % TS_PACKET_SIZE, 0);
        for packet in buf.chunks(TS_PACKET_SIZE) {
            assert_eq!(packet[0], 0x47);
        }
    }

    #[test]
    fn test_continuity_counter_increments_mod_16() {
        let mut muxer = TsMuxer::new();
        let mut buf = BytesMut::new();
        let frame = VideoFrame::from_millis(0, vec![Bytes::from(vec![0x65; 8000])], false);
        let pes = encode_video_pes(&frame, &video_params()).unwrap();
        muxer.write_pes(&mut buf, PID_VIDEO, &pes, false).unwrap();

        let packets: Vec<&[u8]> = buf.chunks(TS_PACKET_SIZE).collect();
        assert!(packets.len() > 16);
        for (i, packet) in packets.iter().enumerate() {
            assert_eq!((packet[3] & 0x0f) as usize, i % 16);
        }
    }

    #[test]
    fn test_counters_survive_across_calls() {
        let mut muxer = TsMuxer::new();
        let mut buf = BytesMut::new();
        let asc = AudioSpecificConfig::default();
        for i in 0..3 {
            let frame = AudioFrame::from_millis(i * 23, Bytes::from(vec![0x11; 50]));
            let pes = encode_audio_pes(&frame, &asc).unwrap();
            muxer.write_pes(&mut buf, PID_AUDIO, &pes, false).unwrap();
        }
        let packets: Vec<&[u8]> = buf.chunks(TS_PACKET_SIZE).collect();
        assert_eq!(packets.len(), 3);
        for (i, packet) in packets.iter().enumerate() {
            assert_eq!((packet[3] & 0x0f) as usize, i);
        }
    }

    #[test]
    fn test_first_keyframe_packet_has_pcr() {
        let mut muxer = TsMuxer::new();
        let mut buf = BytesMut::new();
        let frame = VideoFrame::from_millis(1000, vec![Bytes::from(vec![0x65; 500])], true);
        let pes = encode_video_pes(&frame, &video_params()).unwrap();
        muxer.write_pes(&mut buf, PID_VIDEO, &pes, true).unwrap();

        let first = &buf[..TS_PACKET_SIZE];
        // PUSI set
        assert_ne!(first[1] & 0x40, 0);
        // Adaptation field present
        assert_ne!(first[3] & 0x20, 0);
        // PCR flag + random access
        assert_eq!(first[5] & 0x50, 0x50);

        // PCR base recovers the 90 kHz timestamp
        let base = ((first[6] as u64) << 25)
            | ((first[7] as u64) << 17)
            | ((first[8] as u64) << 9)
            | ((first[9] as u64) << 1)
            | ((first[10] as u64) >> 7);
        assert_eq!(base, 90_000);
    }

    #[test]
    fn test_short_payload_is_stuffed() {
        let mut muxer = TsMuxer::new();
        let mut buf = BytesMut::new();
        let frame = AudioFrame::from_millis(0, Bytes::from_static(&[0x01, 0x02]));
        let pes = encode_audio_pes(&frame, &AudioSpecificConfig::default()).unwrap();
        muxer.write_pes(&mut buf, PID_AUDIO, &pes, false).unwrap();

        assert_eq!(buf.len(), TS_PACKET_SIZE);
        // Adaptation field absorbs the slack
        assert_ne!(buf[3] & 0x20, 0);
        let af_len = buf[4] as usize;
        // Tail of the packet is the PES data, front of the field is stuffing
        assert_eq!(4 + 1 + af_len + pes.len(), TS_PACKET_SIZE);
    }

    #[test]
    fn test_empty_pes_rejected() {
        let mut muxer = TsMuxer::new();
        let mut buf = BytesMut::new();
        let pes = PesPacket {
            header: crate::format::ts::pes::PesHeader {
                stream_id: 0xe0,
                packet_length: 0,
                pts_dts_flags: 0,
                header_data_length: 0,
                pts: None,
                dts: None,
            },
            payload: Vec::new(),
        };
        assert!(muxer.write_pes(&mut buf, PID_VIDEO, &pes, false).is_err());
    }
}
