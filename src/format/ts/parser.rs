use super::types::*;
use crate::error::{HlsError, Result};

/// Adaptation field contents the demuxer cares about
#[derive(Debug, Clone)]
pub struct AdaptationField {
    /// Field length as carried on the wire (bytes following the length byte)
    pub length: usize,
    /// Discontinuity indicator
    pub discontinuity: bool,
    /// Random access indicator (keyframe marker)
    pub random_access: bool,
    /// Program Clock Reference in 27 MHz units, when present
    pub pcr: Option<u64>,
}

/// Parser for MPEG Transport Stream packets and PSI tables.
///
/// Handles the low-level details of TS parsing: packet headers, adaptation
/// fields, the Program Association Table and the Program Map Table.
#[derive(Debug, Default)]
pub struct TsPacketParser {}

impl TsPacketParser {
    /// Creates a new TS packet parser
    pub fn new() -> Self {
        Self {}
    }

    /// Parses the fixed 4-byte TS packet header
    pub fn parse_header(&self, data: &[u8]) -> Result<TsHeader> {
        if data.len() < TS_HEADER_SIZE {
            return Err(HlsError::InvalidData("TS packet too short".into()));
        }

        if data[0] != 0x47 {
            return Err(HlsError::InvalidData("invalid sync byte".into()));
        }

        Ok(TsHeader {
            sync_byte: data[0],
            transport_error: (data[1] & 0x80) != 0,
            payload_unit_start: (data[1] & 0x40) != 0,
            transport_priority: (data[1] & 0x20) != 0,
            pid: (((data[1] & 0x1f) as u16) << 8) | data[2] as u16,
            scrambling_control: (data[3] >> 6) & 0x03,
            adaptation_field_exists: (data[3] & 0x20) != 0,
            contains_payload: (data[3] & 0x10) != 0,
            continuity_counter: data[3] & 0x0f,
        })
    }

    /// Parses the adaptation field when the header flags one.
    ///
    /// `offset` is the position of the adaptation-field length byte, i.e.
    /// directly behind the 4-byte header.
    pub fn parse_adaptation_field(
        &self,
        data: &[u8],
        offset: usize,
    ) -> Result<Option<AdaptationField>> {
        if (data[3] & 0x20) == 0 {
            return Ok(None);
        }

        let length = data[offset] as usize;
        if length == 0 {
            return Ok(Some(AdaptationField {
                length: 0,
                discontinuity: false,
                random_access: false,
                pcr: None,
            }));
        }

        if data.len() < offset + length + 1 {
            return Err(HlsError::InvalidData("adaptation field too short".into()));
        }

        let flags = data[offset + 1];
        let mut field = AdaptationField {
            length,
            discontinuity: (flags & 0x80) != 0,
            random_access: (flags & 0x40) != 0,
            pcr: None,
        };

        if (flags & 0x10) != 0 {
            let pos = offset + 2;
            if data.len() < pos + 6 {
                return Err(HlsError::InvalidData("PCR data too short".into()));
            }
            let pcr_base = ((data[pos] as u64) << 25)
                | ((data[pos + 1] as u64) << 17)
                | ((data[pos + 2] as u64) << 9)
                | ((data[pos + 3] as u64) << 1)
                | ((data[pos + 4] & 0x80) as u64 >> 7);
            let pcr_ext = (((data[pos + 4] & 0x01) as u64) << 8) | (data[pos + 5] as u64);
            field.pcr = Some(pcr_base * 300 + pcr_ext);
        }

        Ok(Some(field))
    }

    /// Parses a PAT section starting at its table-id byte
    pub fn parse_pat(&self, data: &[u8]) -> Result<Pat> {
        let mut pat = Pat::default();

        if data.len() < 8 {
            return Err(HlsError::InvalidData("PAT section too short".into()));
        }

        if data[0] != TABLE_ID_PAT {
            return Err(HlsError::InvalidData(format!(
                "invalid PAT table ID: 0x{:02x}",
                data[0]
            )));
        }

        let section_length = ((data[1] as usize & 0x0f) << 8) | data[2] as usize;
        let total_length = 3 + section_length;

        if data.len() < total_length {
            return Err(HlsError::InvalidData(
                "PAT data shorter than section length".into(),
            ));
        }

        // Program loop sits between the fixed header and the CRC
        let mut pos = 8;
        while pos + 4 <= total_length - 4 {
            let program_number = ((data[pos] as u16) << 8) | data[pos + 1] as u16;
            let pid = ((data[pos + 2] as u16 & 0x1f) << 8) | data[pos + 3] as u16;

            if program_number != 0 {
                pat.entries.push(PatEntry {
                    program_number,
                    program_map_pid: pid,
                });
            }
            pos += 4;
        }

        Ok(pat)
    }

    /// Parses a PMT section starting at its table-id byte
    pub fn parse_pmt(&self, data: &[u8]) -> Result<Pmt> {
        let mut pmt = Pmt::default();

        if data.len() < 12 {
            return Err(HlsError::InvalidData("PMT section too short".into()));
        }

        if data[0] != TABLE_ID_PMT {
            return Err(HlsError::InvalidData(format!(
                "invalid PMT table ID: 0x{:02x}",
                data[0]
            )));
        }

        let section_length = ((data[1] as usize & 0x0f) << 8) | data[2] as usize;
        let total_length = 3 + section_length;

        if data.len() < total_length {
            return Err(HlsError::InvalidData(
                "PMT data shorter than section length".into(),
            ));
        }

        let mut pos = 8;
        pmt.pcr_pid = ((data[pos] as u16 & 0x1f) << 8) | data[pos + 1] as u16;
        pos += 2;

        let program_info_length = ((data[pos] as usize & 0x0f) << 8) | data[pos + 1] as usize;
        pos += 2;
        if pos + program_info_length > total_length - 4 {
            return Err(HlsError::InvalidData(
                "program info extends beyond section".into(),
            ));
        }
        pos += program_info_length;

        while pos + 5 <= total_length - 4 {
            let stream_type = data[pos];
            let elementary_pid = ((data[pos + 1] as u16 & 0x1f) << 8) | data[pos + 2] as u16;
            let es_info_length = ((data[pos + 3] as usize & 0x0f) << 8) | data[pos + 4] as usize;
            pos += 5;

            if pos + es_info_length > total_length - 4 {
                return Err(HlsError::InvalidData(
                    "ES info extends beyond section".into(),
                ));
            }
            pos += es_info_length;

            pmt.elementary_stream_infos.push(ElementaryStreamInfo {
                stream_type,
                elementary_pid,
            });
        }

        Ok(pmt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ts_header() {
        let parser = TsPacketParser::new();
        let data = [0x47, 0x41, 0x01, 0x1a];

        let header = parser.parse_header(&data).unwrap();
        assert!(header.payload_unit_start);
        assert_eq!(header.pid, PID_VIDEO);
        assert!(!header.adaptation_field_exists);
        assert!(header.contains_payload);
        assert_eq!(header.continuity_counter, 0x0a);
    }

    #[test]
    fn test_reject_bad_sync_byte() {
        let parser = TsPacketParser::new();
        assert!(parser.parse_header(&[0x48, 0x00, 0x00, 0x10]).is_err());
    }

    #[test]
    fn test_parse_pat() {
        let parser = TsPacketParser::new();
        let data = [
            TABLE_ID_PAT,
            0xb0,
            0x0d, // section length 13
            0x00,
            0x01, // transport stream id
            0xc1,
            0x00,
            0x00,
            0x00,
            0x01, // program number 1
            0xf0,
            0x00, // PMT PID 0x1000
            0x00,
            0x00,
            0x00,
            0x00, // CRC
        ];

        let pat = parser.parse_pat(&data).unwrap();
        assert_eq!(pat.entries.len(), 1);
        assert_eq!(pat.entries[0].program_number, 1);
        assert_eq!(pat.entries[0].program_map_pid, 0x1000);
    }

    #[test]
    fn test_header_round_trip() {
        use bytes::BytesMut;

        let header = TsHeader {
            payload_unit_start: true,
            pid: PID_AUDIO,
            adaptation_field_exists: true,
            continuity_counter: 7,
            ..TsHeader::default()
        };
        let mut buf = BytesMut::new();
        header.write_to(&mut buf);

        let parser = TsPacketParser::new();
        let parsed = parser.parse_header(&buf).unwrap();
        assert_eq!(parsed.pid, PID_AUDIO);
        assert!(parsed.payload_unit_start);
        assert!(parsed.adaptation_field_exists);
        assert_eq!(parsed.continuity_counter, 7);
    }

    #[test]
    fn test_parse_adaptation_field_with_pcr() {
        let parser = TsPacketParser::new();
        let mut packet = vec![0x47, 0x01, 0x01, 0x30];
        packet.push(7); // adaptation field length
        packet.push(0x10); // PCR flag
        // PCR base = 90000 (1 second), ext = 0
        let base: u64 = 90_000;
        packet.push((base >> 25) as u8);
        packet.push((base >> 17) as u8);
        packet.push((base >> 9) as u8);
        packet.push((base >> 1) as u8);
        packet.push(((base & 1) << 7) as u8 | 0x7e);
        packet.push(0x00);

        let field = parser
            .parse_adaptation_field(&packet, 4)
            .unwrap()
            .unwrap();
        assert_eq!(field.pcr, Some(90_000 * 300));
    }
}
