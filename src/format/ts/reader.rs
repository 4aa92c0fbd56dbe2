use super::demuxer::{TsDemuxer, TsPayload};
use super::types::pts_to_time;
use crate::av::{AudioFrame, CodecId, Stream, Track, TrackParams, VideoFrame, VideoParams};
use crate::codec::aac::AudioSpecificConfig;
use crate::codec::{h264, h265, split_annexb};
use crate::error::Result;
use crate::format::Demuxer;
use bytes::Bytes;
use std::sync::Arc;

/// Samples per AAC frame
const AAC_FRAME_SAMPLES: u64 = 1024;

/// Turns downloaded TS segments back into frames on a published stream.
///
/// The reader keeps codec state across segments: parameter sets gathered
/// from one segment configure the track that the following segments feed.
/// Corrupt payloads are reported per frame and skipped; feeding never aborts
/// the stream.
pub struct TsReader {
    stream: Arc<Stream>,
    video_track: Option<Arc<Track>>,
    audio_track: Option<Arc<Track>>,
    // Parameter sets seen so far, waiting for a complete video config
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    vps: Option<Bytes>,
    video_codec: Option<CodecId>,
}

impl TsReader {
    /// Creates a reader publishing into `stream`
    pub fn new(stream: Arc<Stream>) -> Self {
        Self {
            stream,
            video_track: None,
            audio_track: None,
            sps: None,
            pps: None,
            vps: None,
            video_codec: None,
        }
    }

    /// Demuxes one TS segment and publishes its frames
    pub async fn feed(&mut self, data: &[u8]) -> Result<()> {
        let mut demuxer = TsDemuxer::new(data);
        while let Some(payload) = demuxer.next_payload().await? {
            match payload.codec {
                CodecId::H264 | CodecId::H265 => self.on_video(payload),
                CodecId::Aac => self.on_audio(payload),
            }
        }
        Ok(())
    }

    fn on_video(&mut self, payload: TsPayload) {
        let nalus = split_annexb(&payload.data);
        if nalus.is_empty() {
            log::warn!("video PES without NAL units on {}", self.stream.path);
            return;
        }

        self.video_codec = Some(payload.codec);
        let mut frame_nalus = Vec::new();
        let mut keyframe = false;

        for nalu in nalus {
            match payload.codec {
                CodecId::H264 => match h264::nalu_type(&nalu) {
                    Some(h264::NaluType::AccessUnitDelimiter) | Some(h264::NaluType::FillerData) => {}
                    Some(h264::NaluType::Sps) => self.sps = Some(nalu),
                    Some(h264::NaluType::Pps) => self.pps = Some(nalu),
                    _ => {
                        keyframe |= h264::is_keyframe(&nalu);
                        frame_nalus.push(nalu);
                    }
                },
                CodecId::H265 => match h265::nalu_type(&nalu) {
                    Some(h265::NaluType::AccessUnitDelimiter) => {}
                    Some(h265::NaluType::Vps) => self.vps = Some(nalu),
                    Some(h265::NaluType::Sps) => self.sps = Some(nalu),
                    Some(h265::NaluType::Pps) => self.pps = Some(nalu),
                    _ => {
                        keyframe |= h265::is_keyframe(&nalu);
                        frame_nalus.push(nalu);
                    }
                },
                CodecId::Aac => unreachable!("audio payload routed to on_video"),
            }
        }

        if frame_nalus.is_empty() {
            return;
        }

        let track = match self.ensure_video_track() {
            Some(track) => track,
            // Frames before a complete parameter set cannot start decode
            None => return,
        };

        let pts = payload.pts;
        let dts = payload.dts.unwrap_or(pts);
        track.push_video(VideoFrame {
            timestamp: pts_to_time(dts),
            pts,
            dts,
            keyframe,
            nalus: frame_nalus,
        });
    }

    fn ensure_video_track(&mut self) -> Option<Arc<Track>> {
        if let Some(track) = &self.video_track {
            return Some(track.clone());
        }
        let codec = self.video_codec?;
        let sps = self.sps.clone()?;
        let pps = self.pps.clone()?;
        let vps = match codec {
            CodecId::H265 => Some(self.vps.clone()?),
            _ => None,
        };

        // Dimensions are unknown without SPS parsing; zero means unadvertised
        let track = self.stream.set_video_track(
            "video",
            TrackParams::Video(VideoParams {
                codec,
                width: 0,
                height: 0,
                sps,
                pps,
                vps,
            }),
        );
        self.video_track = Some(track.clone());
        Some(track)
    }

    fn on_audio(&mut self, payload: TsPayload) {
        let frames = crate::codec::aac::split_adts(&payload.data);
        if frames.is_empty() {
            log::warn!("audio PES without ADTS frames on {}", self.stream.path);
            return;
        }

        let mut pts = payload.pts;
        for (header, raw) in frames {
            let track = match &self.audio_track {
                Some(track) => track.clone(),
                None => {
                    let asc = AudioSpecificConfig::from_adts(&header);
                    let track = self
                        .stream
                        .set_audio_track("audio", TrackParams::Audio(asc));
                    self.audio_track = Some(track.clone());
                    track
                }
            };

            track.push_audio(AudioFrame {
                timestamp: pts_to_time(pts),
                pts,
                data: raw,
            });

            let sample_rate = header.sample_rate().unwrap_or(44100) as u64;
            pts += AAC_FRAME_SAMPLES * super::types::PTS_HZ / sample_rate;
        }
    }
}
