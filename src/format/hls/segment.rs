use crate::av::{AudioFrame, VideoFrame, VideoParams};
use crate::codec::aac::AudioSpecificConfig;
use crate::error::Result;
use crate::format::ts::pes::{encode_audio_pes, encode_video_pes};
use crate::format::ts::types::{pat_packet, pmt_packet, TrackSet, PID_AUDIO, PID_VIDEO};
use crate::format::ts::TsMuxer;
use crate::utils::{BytesPool, PooledBuf};
use bytes::{BufMut, Bytes, BytesMut};

/// Initial pooled capacity for a segment buffer
const SEGMENT_BUF_SIZE: usize = 256 * 1024;

/// An in-memory MPEG-TS segment under construction or being served.
///
/// The body collects the TS-packetized PES stream written since the last
/// cut; PAT and PMT are rendered on output so the table always matches the
/// codec set that actually landed in the segment. Storage comes from the
/// owning component's [`BytesPool`] and returns there when the last holder
/// drops the segment.
pub struct MemoryTs {
    buf: PooledBuf,
    tracks: TrackSet,
}

impl MemoryTs {
    /// Creates an empty segment drawing storage from `pool`
    pub fn new(pool: &BytesPool) -> Self {
        Self {
            buf: pool.get(SEGMENT_BUF_SIZE),
            tracks: TrackSet::default(),
        }
    }

    /// Encodes and packetizes one video access unit into the segment
    pub fn write_video(
        &mut self,
        muxer: &mut TsMuxer,
        frame: &VideoFrame,
        params: &VideoParams,
    ) -> Result<()> {
        let pes = encode_video_pes(frame, params)?;
        muxer.write_pes(&mut self.buf, PID_VIDEO, &pes, frame.keyframe)?;
        self.tracks.mark(params.codec);
        Ok(())
    }

    /// Encodes and packetizes one AAC frame into the segment
    pub fn write_audio(
        &mut self,
        muxer: &mut TsMuxer,
        frame: &AudioFrame,
        asc: &AudioSpecificConfig,
    ) -> Result<()> {
        let pes = encode_audio_pes(frame, asc)?;
        muxer.write_pes(&mut self.buf, PID_AUDIO, &pes, false)?;
        self.tracks.mark(crate::av::CodecId::Aac);
        Ok(())
    }

    /// Body size in bytes, excluding PAT/PMT
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing was muxed since the last cut
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The codec set muxed into this segment
    pub fn tracks(&self) -> TrackSet {
        self.tracks
    }

    /// Streams PAT ∥ PMT ∥ body into `writer`
    pub fn write_to<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&pat_packet())?;
        writer.write_all(&pmt_packet(self.tracks))?;
        writer.write_all(&self.buf)
    }

    /// Materializes the served form (PAT ∥ PMT ∥ body) as one buffer
    pub fn assemble(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.buf.len() + 2 * 188);
        out.put_slice(&pat_packet());
        out.put_slice(&pmt_packet(self.tracks));
        out.put_slice(&self.buf);
        out.freeze()
    }
}
