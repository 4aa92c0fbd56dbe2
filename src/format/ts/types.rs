use crate::av::CodecId;
use crate::utils::Crc32Mpeg2;
use bytes::{BufMut, BytesMut};
use std::time::Duration;

// Stream IDs
/// Stream ID for video streams in PES packets
pub const STREAM_ID_VIDEO: u8 = 0xe0;
/// Stream ID for audio streams in PES packets
pub const STREAM_ID_AUDIO: u8 = 0xc0;

// PIDs
/// PID for Program Association Table (PAT)
pub const PID_PAT: u16 = 0x0000;
/// PID for Program Map Table (PMT)
pub const PID_PMT: u16 = 0x1000;
/// PID carrying the video elementary stream
pub const PID_VIDEO: u16 = 0x0101;
/// PID carrying the audio elementary stream
pub const PID_AUDIO: u16 = 0x0102;

// Table IDs
/// Table ID for Program Association Table (PAT)
pub const TABLE_ID_PAT: u8 = 0x00;
/// Table ID for Program Map Table (PMT)
pub const TABLE_ID_PMT: u8 = 0x02;

// Elementary Stream Types
/// Stream type for H.264 video streams
pub const STREAM_TYPE_H264: u8 = 0x1b;
/// Stream type for H.265 video streams
pub const STREAM_TYPE_H265: u8 = 0x24;
/// Stream type for AAC audio streams
pub const STREAM_TYPE_AAC: u8 = 0x0f;

// Constants
/// Size of a Transport Stream packet in bytes
pub const TS_PACKET_SIZE: usize = 188;
/// Size of a Transport Stream header in bytes
pub const TS_HEADER_SIZE: usize = 4;
/// Clock frequency for Presentation Time Stamps (PTS) in Hz
pub const PTS_HZ: u64 = 90_000;
/// Clock frequency for Program Clock Reference (PCR) in Hz
pub const PCR_HZ: u64 = 27_000_000;

/// Maps a codec to its PMT elementary stream type
pub fn stream_type_for(codec: CodecId) -> u8 {
    match codec {
        CodecId::H264 => STREAM_TYPE_H264,
        CodecId::H265 => STREAM_TYPE_H265,
        CodecId::Aac => STREAM_TYPE_AAC,
    }
}

/// The codec set muxed into one segment.
///
/// Determines the PMT contents and the PCR PID: video carries the clock when
/// present, otherwise audio does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackSet {
    /// Video codec present in the segment, if any
    pub video: Option<CodecId>,
    /// True when AAC audio is present
    pub audio: bool,
}

impl TrackSet {
    /// Records that a codec was muxed into the segment
    pub fn mark(&mut self, codec: CodecId) {
        if codec.is_video() {
            self.video = Some(codec);
        } else {
            self.audio = true;
        }
    }

    /// True when nothing has been muxed yet
    pub fn is_empty(&self) -> bool {
        self.video.is_none() && !self.audio
    }

    /// The PID that carries the program clock
    pub fn pcr_pid(&self) -> u16 {
        if self.video.is_some() {
            PID_VIDEO
        } else {
            PID_AUDIO
        }
    }
}

/// Represents an entry in the Program Association Table (PAT)
#[derive(Debug, Clone)]
pub struct PatEntry {
    /// Program number (16-bit); 0 is reserved for the network PID
    pub program_number: u16,
    /// PID of the PMT associated with this program
    pub program_map_pid: u16,
}

/// Program Association Table (PAT) in MPEG Transport Stream
#[derive(Debug, Clone, Default)]
pub struct Pat {
    /// PAT entries, each mapping a program number to a PMT PID
    pub entries: Vec<PatEntry>,
}

impl Pat {
    /// The single-program PAT every segment starts with
    pub fn single_program() -> Self {
        Self {
            entries: vec![PatEntry {
                program_number: 1,
                program_map_pid: PID_PMT,
            }],
        }
    }

    /// Writes the PAT entry loop to `buf`
    pub fn write_to(&self, buf: &mut BytesMut) {
        for entry in &self.entries {
            buf.put_u16(entry.program_number);
            buf.put_u16(entry.program_map_pid & 0x1fff | 7 << 13);
        }
    }
}

/// Elementary stream entry in a PMT
#[derive(Debug, Clone)]
pub struct ElementaryStreamInfo {
    /// Stream type (e.g. 0x1b for H.264)
    pub stream_type: u8,
    /// PID of the packets carrying this elementary stream
    pub elementary_pid: u16,
}

/// Program Map Table (PMT) for the single program a segment carries
#[derive(Debug, Clone, Default)]
pub struct Pmt {
    /// PID carrying the Program Clock Reference
    pub pcr_pid: u16,
    /// One entry per elementary stream
    pub elementary_stream_infos: Vec<ElementaryStreamInfo>,
}

impl Pmt {
    /// Builds the PMT matching a segment's codec set
    pub fn for_tracks(set: TrackSet) -> Self {
        let mut infos = Vec::new();
        if let Some(codec) = set.video {
            infos.push(ElementaryStreamInfo {
                stream_type: stream_type_for(codec),
                elementary_pid: PID_VIDEO,
            });
        }
        if set.audio {
            infos.push(ElementaryStreamInfo {
                stream_type: STREAM_TYPE_AAC,
                elementary_pid: PID_AUDIO,
            });
        }
        Self {
            pcr_pid: set.pcr_pid(),
            elementary_stream_infos: infos,
        }
    }

    /// Writes the PMT body (PCR PID, program info, ES loop) to `buf`
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.pcr_pid & 0x1fff | 7 << 13);
        // No program descriptors
        buf.put_u16(0xf << 12);

        for info in &self.elementary_stream_infos {
            buf.put_u8(info.stream_type);
            buf.put_u16(info.elementary_pid & 0x1fff | 7 << 13);
            // No ES descriptors
            buf.put_u16(0xf << 12);
        }
    }
}

/// Transport Stream packet header, the fixed 4-byte prefix of each packet
#[derive(Debug)]
pub struct TsHeader {
    /// Always 0x47
    pub sync_byte: u8,
    /// Set when the packet carries an uncorrectable error
    pub transport_error: bool,
    /// Set on the packet where a PES packet or PSI section begins
    pub payload_unit_start: bool,
    /// Transport priority bit
    pub transport_priority: bool,
    /// Packet identifier (13-bit)
    pub pid: u16,
    /// Scrambling mode (2-bit); 0 = clear
    pub scrambling_control: u8,
    /// Set when an adaptation field follows the header
    pub adaptation_field_exists: bool,
    /// Set when payload bytes follow
    pub contains_payload: bool,
    /// Per-PID counter, modulo 16
    pub continuity_counter: u8,
}

impl Default for TsHeader {
    fn default() -> Self {
        Self {
            sync_byte: 0x47,
            transport_error: false,
            payload_unit_start: false,
            transport_priority: false,
            pid: 0,
            scrambling_control: 0,
            adaptation_field_exists: false,
            contains_payload: true,
            continuity_counter: 0,
        }
    }
}

impl TsHeader {
    /// Packs the header into 4 bytes at the end of `buf`
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.sync_byte);

        let mut b1 = 0u8;
        if self.transport_error {
            b1 |= 0x80;
        }
        if self.payload_unit_start {
            b1 |= 0x40;
        }
        if self.transport_priority {
            b1 |= 0x20;
        }
        b1 |= ((self.pid >> 8) & 0x1f) as u8;
        buf.put_u8(b1);

        buf.put_u8((self.pid & 0xff) as u8);

        let mut b3 = self.scrambling_control << 6;
        if self.adaptation_field_exists {
            b3 |= 0x20;
        }
        if self.contains_payload {
            b3 |= 0x10;
        }
        b3 |= self.continuity_counter & 0x0f;
        buf.put_u8(b3);
    }
}

/// Frames a complete PSI section into one 188-byte packet with pointer
/// field and 0xFF stuffing
fn psi_packet(pid: u16, section: &[u8]) -> [u8; TS_PACKET_SIZE] {
    let mut packet = [0xFFu8; TS_PACKET_SIZE];
    packet[0] = 0x47;
    packet[1] = 0x40 | ((pid >> 8) as u8 & 0x1f);
    packet[2] = (pid & 0xff) as u8;
    packet[3] = 0x10;
    packet[4] = 0x00; // pointer field
    packet[5..5 + section.len()].copy_from_slice(section);
    packet
}

/// Wraps a table body into a full section: header, body, CRC32
fn build_section(table_id: u8, table_ext: u16, body: &[u8]) -> Vec<u8> {
    let section_length = body.len() + 5 + 4;
    let mut section = Vec::with_capacity(3 + section_length);
    section.push(table_id);
    section.push(0xb0 | ((section_length >> 8) as u8 & 0x0f));
    section.push((section_length & 0xff) as u8);
    section.extend_from_slice(&table_ext.to_be_bytes());
    section.push(0xc1); // version 0, current
    section.push(0x00); // section number
    section.push(0x00); // last section number
    section.extend_from_slice(body);
    let crc = Crc32Mpeg2::new().calculate(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    section
}

/// The constant single-program PAT packet prepended to every segment
pub fn pat_packet() -> [u8; TS_PACKET_SIZE] {
    let mut body = BytesMut::new();
    Pat::single_program().write_to(&mut body);
    psi_packet(PID_PAT, &build_section(TABLE_ID_PAT, 1, &body))
}

/// The PMT packet describing a segment's codec set
pub fn pmt_packet(set: TrackSet) -> [u8; TS_PACKET_SIZE] {
    let mut body = BytesMut::new();
    Pmt::for_tracks(set).write_to(&mut body);
    psi_packet(PID_PMT, &build_section(TABLE_ID_PMT, 1, &body))
}

/// Converts a 42-bit PCR value to a Duration
pub fn pcr_to_time(pcr: u64) -> Duration {
    let base = pcr >> 15;
    let ext = pcr & 0x1ff;
    let ts = base * 300 + ext;
    Duration::from_nanos((ts * 1_000_000_000) / PCR_HZ)
}

/// Builds the 42-bit PCR field value from a 90 kHz base timestamp
pub fn pcr_from_base(base: u64) -> u64 {
    (base & 0x1_ffff_ffff) << 15 | 0x3f << 9
}

/// Converts a 90 kHz PTS value to a Duration
pub fn pts_to_time(pts: u64) -> Duration {
    Duration::from_nanos((pts * 1_000_000_000) / PTS_HZ)
}

/// Converts a Duration to a 90 kHz PTS value
pub fn time_to_pts(time: Duration) -> u64 {
    (time.as_nanos() as u64) * PTS_HZ / 1_000_000_000
}
