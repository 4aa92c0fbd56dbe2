use super::parser::TsPacketParser;
use super::types::*;
use crate::av::CodecId;
use crate::error::{HlsError, Result};
use crate::format::Demuxer;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use tokio::io::{AsyncRead, AsyncReadExt};

/// One reassembled PES payload extracted from a transport stream
#[derive(Debug, Clone)]
pub struct TsPayload {
    /// Codec of the elementary stream, from the PMT
    pub codec: CodecId,
    /// PID the payload arrived on
    pub pid: u16,
    /// Presentation timestamp, 90 kHz
    pub pts: u64,
    /// Decoding timestamp, 90 kHz, when the PES header carried one
    pub dts: Option<u64>,
    /// The elementary stream bytes (PES header stripped)
    pub data: Bytes,
}

/// MPEG Transport Stream demuxer.
///
/// Reads 188-byte packets from any `AsyncRead`, discovers the program
/// layout from PAT/PMT, and reassembles PES packets per elementary PID.
/// Corrupt packets are skipped; the demuxer keeps going.
pub struct TsDemuxer<R: AsyncRead + Unpin + Send> {
    reader: R,
    parser: TsPacketParser,
    pmt_pid: Option<u16>,
    streams: HashMap<u16, StreamState>,
    pending: VecDeque<TsPayload>,
    eof: bool,
}

struct StreamState {
    codec: CodecId,
    builder: Option<PesBuilder>,
}

/// Accumulates one PES packet across TS packets
struct PesBuilder {
    pts: u64,
    dts: Option<u64>,
    /// Expected payload size; `None` for unbounded video PES
    expected: Option<usize>,
    data: Vec<u8>,
}

impl PesBuilder {
    fn is_complete(&self) -> bool {
        self.expected.is_some_and(|size| self.data.len() >= size)
    }

    fn into_payload(self, codec: CodecId, pid: u16) -> TsPayload {
        let mut data = self.data;
        if let Some(size) = self.expected {
            data.truncate(size);
        }
        TsPayload {
            codec,
            pid,
            pts: self.pts,
            dts: self.dts,
            data: Bytes::from(data),
        }
    }
}

/// Parses a PES header at the start of `payload`.
///
/// Returns the builder primed with timestamps plus the offset where
/// elementary data begins.
fn parse_pes_header(payload: &[u8]) -> Result<(PesBuilder, usize)> {
    if payload.len() < 9 || payload[0] != 0 || payload[1] != 0 || payload[2] != 1 {
        return Err(HlsError::InvalidData("malformed PES start".into()));
    }

    let packet_length = ((payload[4] as usize) << 8) | payload[5] as usize;
    let flags = payload[7];
    let header_data_length = payload[8] as usize;
    let data_start = 9 + header_data_length;
    if payload.len() < data_start {
        return Err(HlsError::InvalidData("PES header truncated".into()));
    }

    let mut pts = 0;
    let mut dts = None;
    if flags & 0x80 != 0 && header_data_length >= 5 {
        pts = read_timestamp(&payload[9..14]);
        if flags & 0x40 != 0 && header_data_length >= 10 {
            dts = Some(read_timestamp(&payload[14..19]));
        }
    }

    // The length field counts everything after the 6-byte prefix
    let expected = if packet_length == 0 {
        None
    } else {
        (packet_length + 6).checked_sub(data_start)
    };

    Ok((
        PesBuilder {
            pts,
            dts,
            expected,
            data: Vec::new(),
        },
        data_start,
    ))
}

fn read_timestamp(bytes: &[u8]) -> u64 {
    (((bytes[0] >> 1) & 0x07) as u64) << 30
        | (bytes[1] as u64) << 22
        | (((bytes[2] >> 1) & 0x7f) as u64) << 15
        | (bytes[3] as u64) << 7
        | ((bytes[4] >> 1) & 0x7f) as u64
}

impl<R: AsyncRead + Unpin + Send> TsDemuxer<R> {
    /// Creates a demuxer over `reader`
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: TsPacketParser::new(),
            pmt_pid: None,
            streams: HashMap::new(),
            pending: VecDeque::new(),
            eof: false,
        }
    }

    async fn read_packet_data(&mut self) -> Result<Option<[u8; TS_PACKET_SIZE]>> {
        let mut packet = [0u8; TS_PACKET_SIZE];
        match self.reader.read_exact(&mut packet).await {
            Ok(_) => Ok(Some(packet)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn flush_builders(&mut self) {
        for (pid, stream) in self.streams.iter_mut() {
            if let Some(builder) = stream.builder.take() {
                if !builder.data.is_empty() {
                    self.pending.push_back(builder.into_payload(stream.codec, *pid));
                }
            }
        }
    }

    fn process_packet(&mut self, data: &[u8]) -> Result<()> {
        let header = self.parser.parse_header(data)?;
        if header.transport_error || !header.contains_payload {
            return Ok(());
        }

        let mut payload_offset = TS_HEADER_SIZE;
        if header.adaptation_field_exists {
            if let Some(field) = self.parser.parse_adaptation_field(data, payload_offset)? {
                payload_offset += field.length + 1;
            }
        }
        if payload_offset >= data.len() {
            return Ok(());
        }

        match header.pid {
            PID_PAT if header.payload_unit_start => {
                let table_offset = payload_offset + data[payload_offset] as usize + 1;
                if table_offset >= data.len() {
                    return Err(HlsError::InvalidData("PAT pointer out of range".into()));
                }
                let pat = self.parser.parse_pat(&data[table_offset..])?;
                if let Some(entry) = pat.entries.first() {
                    self.pmt_pid = Some(entry.program_map_pid);
                }
            }

            pid if Some(pid) == self.pmt_pid && header.payload_unit_start => {
                let table_offset = payload_offset + data[payload_offset] as usize + 1;
                if table_offset >= data.len() {
                    return Err(HlsError::InvalidData("PMT pointer out of range".into()));
                }
                let pmt = self.parser.parse_pmt(&data[table_offset..])?;
                for info in &pmt.elementary_stream_infos {
                    let codec = match info.stream_type {
                        STREAM_TYPE_H264 => CodecId::H264,
                        STREAM_TYPE_H265 => CodecId::H265,
                        STREAM_TYPE_AAC => CodecId::Aac,
                        _ => continue,
                    };
                    self.streams
                        .entry(info.elementary_pid)
                        .or_insert(StreamState {
                            codec,
                            builder: None,
                        });
                }
            }

            pid if self.streams.contains_key(&pid) => {
                let stream = self
                    .streams
                    .get_mut(&pid)
                    .ok_or(HlsError::StreamClosed)?;
                let payload = &data[payload_offset..];

                if header.payload_unit_start {
                    // An unbounded PES ends where the next one starts
                    if let Some(builder) = stream.builder.take() {
                        if !builder.data.is_empty() {
                            self.pending
                                .push_back(builder.into_payload(stream.codec, pid));
                        }
                    }

                    match parse_pes_header(payload) {
                        Ok((mut builder, data_start)) => {
                            builder.data.extend_from_slice(&payload[data_start..]);
                            stream.builder = Some(builder);
                        }
                        Err(e) => {
                            log::warn!("skipping corrupt PES start on pid {}: {}", pid, e);
                            return Ok(());
                        }
                    }
                } else if let Some(builder) = stream.builder.as_mut() {
                    builder.data.extend_from_slice(payload);
                }

                if stream.builder.as_ref().is_some_and(|b| b.is_complete()) {
                    let builder = stream
                        .builder
                        .take()
                        .ok_or(HlsError::StreamClosed)?;
                    self.pending
                        .push_back(builder.into_payload(stream.codec, pid));
                }
            }

            _ => {}
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl<R: AsyncRead + Unpin + Send> Demuxer for TsDemuxer<R> {
    async fn next_payload(&mut self) -> Result<Option<TsPayload>> {
        loop {
            if let Some(payload) = self.pending.pop_front() {
                return Ok(Some(payload));
            }
            if self.eof {
                return Ok(None);
            }
            match self.read_packet_data().await? {
                Some(packet) => {
                    if let Err(e) = self.process_packet(&packet) {
                        log::warn!("skipping corrupt TS packet: {}", e);
                    }
                }
                None => {
                    self.eof = true;
                    self.flush_builders();
                }
            }
        }
    }
}
