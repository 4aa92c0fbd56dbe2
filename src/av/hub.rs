use super::{AudioFrame, Frame, FrameRing, TrackParams, VideoFrame};
use crate::{HlsError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// How a stream entered the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOrigin {
    /// Published by the host engine (ingest, test source, ...)
    Local,
    /// Published by an HLS puller
    Pulled,
}

/// One elementary track of a published stream
pub struct Track {
    /// Track name, used in segment filenames and manifest paths
    pub name: String,
    /// Codec configuration
    pub params: TrackParams,
    /// Frame ring the publisher writes into
    pub ring: FrameRing,
}

impl Track {
    fn new(name: impl Into<String>, params: TrackParams) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            params,
            ring: FrameRing::new(super::ring::DEFAULT_RING_CAPACITY),
        })
    }

    /// Pushes a video frame into the track ring
    pub fn push_video(&self, frame: VideoFrame) {
        self.ring.push(Frame::Video(frame));
    }

    /// Pushes an audio frame into the track ring
    pub fn push_audio(&self, frame: AudioFrame) {
        self.ring.push(Frame::Audio(frame));
    }
}

/// A published stream: up to one video and one audio track plus the
/// cancellation token every attached task watches for teardown
pub struct Stream {
    /// Stream path, e.g. `live/test`
    pub path: String,
    /// Who published the stream
    pub origin: StreamOrigin,
    video: OnceLock<Arc<Track>>,
    audio: OnceLock<Arc<Track>>,
    cancel: CancellationToken,
}

impl Stream {
    /// Registers the video track; the first registration wins
    pub fn set_video_track(&self, name: impl Into<String>, params: TrackParams) -> Arc<Track> {
        self.video
            .get_or_init(|| Track::new(name, params))
            .clone()
    }

    /// Registers the audio track; the first registration wins
    pub fn set_audio_track(&self, name: impl Into<String>, params: TrackParams) -> Arc<Track> {
        self.audio
            .get_or_init(|| Track::new(name, params))
            .clone()
    }

    /// The video track, if registered
    pub fn video(&self) -> Option<Arc<Track>> {
        self.video.get().cloned()
    }

    /// The audio track, if registered
    pub fn audio(&self) -> Option<Arc<Track>> {
        self.audio.get().cloned()
    }

    /// Token cancelled when the stream closes
    pub fn cancelled(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Last path component, used as the title prefix in relayed manifests
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Events emitted by the [`StreamHub`].
///
/// A single tagged sum replaces per-component duck-typed event handlers:
/// every consumer matches on the variants it cares about.
#[derive(Clone)]
pub enum StreamEvent {
    /// A stream was published and its tracks may now appear
    Publish(Arc<Stream>),
    /// The stream at this path closed
    Close(String),
    /// A subscriber wants this path to exist (on-demand pull/publish)
    Invite(String),
}

/// Process-scoped registry of published streams.
///
/// The hub is the seam between the gateway and the host engine: the engine
/// (or the HLS puller) publishes streams and frames here, the segmenter
/// subscribes here.
pub struct StreamHub {
    streams: RwLock<HashMap<String, Arc<Stream>>>,
    events: broadcast::Sender<StreamEvent>,
}

impl StreamHub {
    /// Creates an empty hub
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            streams: RwLock::new(HashMap::new()),
            events,
        })
    }

    /// Publishes a stream, failing when the path is already taken
    pub fn publish(&self, path: impl Into<String>, origin: StreamOrigin) -> Result<Arc<Stream>> {
        let path = path.into();
        let stream = Arc::new(Stream {
            path: path.clone(),
            origin,
            video: OnceLock::new(),
            audio: OnceLock::new(),
            cancel: CancellationToken::new(),
        });

        {
            let mut streams = self.streams.write();
            if streams.contains_key(&path) {
                return Err(HlsError::InvalidData(format!(
                    "stream {} already published",
                    path
                )));
            }
            streams.insert(path, stream.clone());
        }

        let _ = self.events.send(StreamEvent::Publish(stream.clone()));
        Ok(stream)
    }

    /// Looks up a published stream
    pub fn get(&self, path: &str) -> Option<Arc<Stream>> {
        self.streams.read().get(path).cloned()
    }

    /// Closes a stream: cancels its token, removes it and emits `Close`
    pub fn close(&self, path: &str) {
        if let Some(stream) = self.streams.write().remove(path) {
            stream.cancel.cancel();
            let _ = self.events.send(StreamEvent::Close(path.to_string()));
        }
    }

    /// Asks whoever is listening to bring this path online
    pub fn invite(&self, path: &str) {
        let _ = self.events.send(StreamEvent::Invite(path.to_string()));
    }

    /// Subscribes to hub events
    pub fn subscribe_events(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::CodecId;
    use crate::codec::aac::AudioSpecificConfig;
    use bytes::Bytes;

    fn video_params() -> TrackParams {
        TrackParams::Video(crate::av::VideoParams {
            codec: CodecId::H264,
            width: 1280,
            height: 720,
            sps: Bytes::from_static(&[0x67]),
            pps: Bytes::from_static(&[0x68]),
            vps: None,
        })
    }

    #[test]
    fn test_publish_and_lookup() {
        let hub = StreamHub::new();
        let stream = hub.publish("live/test", StreamOrigin::Local).unwrap();
        stream.set_video_track("video", video_params());
        stream.set_audio_track("audio", TrackParams::Audio(AudioSpecificConfig::default()));

        let found = hub.get("live/test").unwrap();
        assert!(found.video().is_some());
        assert!(found.audio().is_some());
        assert_eq!(found.name(), "test");

        assert!(hub.publish("live/test", StreamOrigin::Local).is_err());
    }

    #[test]
    fn test_close_cancels_token() {
        let hub = StreamHub::new();
        let stream = hub.publish("live/a", StreamOrigin::Local).unwrap();
        let token = stream.cancelled();
        assert!(!token.is_cancelled());
        hub.close("live/a");
        assert!(token.is_cancelled());
        assert!(hub.get("live/a").is_none());
    }

    #[tokio::test]
    async fn test_publish_event_delivery() {
        let hub = StreamHub::new();
        let mut events = hub.subscribe_events();
        hub.publish("live/ev", StreamOrigin::Pulled).unwrap();
        match events.recv().await.unwrap() {
            StreamEvent::Publish(s) => {
                assert_eq!(s.path, "live/ev");
                assert_eq!(s.origin, StreamOrigin::Pulled);
            }
            _ => panic!("expected publish event"),
        }
    }
}
