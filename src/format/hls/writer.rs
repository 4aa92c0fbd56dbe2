use super::playlist::{Playlist, PlaylistInf, SegmentWindow};
use super::segment::MemoryTs;
use super::store::{M3u8Store, SegmentData, SegmentStore, StreamSegments, TrackM3u8};
use crate::av::{Frame, RingReader, Stream, StreamHub, TrackParams};
use crate::config::HlsConfig;
use crate::error::Result;
use crate::format::ts::TsMuxer;
use crate::utils::BytesPool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Frame ring poll interval
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long an on-demand writer survives without a manifest read
const IDLE_STOP: Duration = Duration::from_secs(15);
/// How long to wait for the stream (and its tracks) to appear
const TRACK_WAIT: Duration = Duration::from_secs(15);

/// Per-subscribed-stream segmenter.
///
/// Consumes frames from each track ring, drives the PES/TS muxer, cuts a
/// new segment on keyframes once the fragment duration has elapsed, rotates
/// the manifest window and evicts aged segments from the store.
pub struct HlsWriter {
    stream_path: String,
    config: HlsConfig,
    hub: Arc<StreamHub>,
    segments: Arc<SegmentStore>,
    manifests: Arc<M3u8Store>,
    pool: BytesPool,
    cancel: CancellationToken,
    idle_stop: Duration,
}

/// Everything one track needs between cuts
struct TrackContext {
    track_name: String,
    params: TrackParams,
    reader: RingReader,
    muxer: TsMuxer,
    mem: MemoryTs,
    write_time: Duration,
    started: bool,
    segment_count: u64,
    window: SegmentWindow,
    live: Arc<TrackM3u8>,
    m3u8_name: String,
    published: bool,
    record: Option<RecordState>,
}

/// On-disk recording state: an ever-growing event manifest plus the TS files
struct RecordState {
    dir: PathBuf,
    manifest_path: PathBuf,
    header_written: bool,
}

impl HlsWriter {
    /// Creates a writer for one stream path
    pub fn new(
        stream_path: impl Into<String>,
        config: HlsConfig,
        hub: Arc<StreamHub>,
        segments: Arc<SegmentStore>,
        manifests: Arc<M3u8Store>,
    ) -> Arc<Self> {
        Arc::new(Self {
            stream_path: stream_path.into(),
            config,
            hub,
            segments,
            manifests,
            pool: BytesPool::new(),
            cancel: CancellationToken::new(),
            idle_stop: IDLE_STOP,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_idle_stop(self: Arc<Self>, idle_stop: Duration) -> Arc<Self> {
        let mut writer = Arc::into_inner(self).expect("writer not yet shared");
        writer.idle_stop = idle_stop;
        Arc::new(writer)
    }

    /// The stream path this writer serves
    pub fn stream_path(&self) -> &str {
        &self.stream_path
    }

    /// Stops the writer; buffers recycle during teardown
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Runs the segmentation loop until the stream closes, the writer is
    /// stopped, or (in on-demand mode) nobody reads the manifest for 15 s
    pub async fn run(self: Arc<Self>) {
        let Some(stream) = self.wait_for_stream().await else {
            log::warn!("hls writer: no publisher appeared for {}", self.stream_path);
            return;
        };
        let stream_cancel = stream.cancelled();

        let mut contexts = match self.open_tracks(&stream).await {
            Some(contexts) if !contexts.is_empty() => contexts,
            _ => {
                log::warn!("hls writer: no usable tracks on {}", self.stream_path);
                return;
            }
        };

        log::info!(
            "hls writer started: {} ({} tracks)",
            self.stream_path,
            contexts.len()
        );

        let seg_handle = self.segments.stream(&self.stream_path);
        let mut master_published = false;

        'run: loop {
            if self.cancel.is_cancelled() || stream_cancel.is_cancelled() {
                break;
            }

            for ctx in contexts.iter_mut() {
                while let Some(frame) = ctx.reader.try_read() {
                    if let Err(e) = self
                        .handle_frame(ctx, &frame, &seg_handle, &stream, &mut master_published)
                        .await
                    {
                        log::warn!("hls writer {}: {}", self.stream_path, e);
                        break 'run;
                    }
                }
            }

            if !self.config.preload
                && contexts
                    .iter()
                    .all(|ctx| ctx.live.idle_millis() > self.idle_stop.as_millis() as i64)
            {
                log::info!("hls writer idle, stopping: {}", self.stream_path);
                break;
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }

        // Teardown: drop manifests first so no new segment lookups resolve,
        // then the segments themselves (storage recycles on last reader)
        for ctx in &contexts {
            self.manifests.remove(&ctx.m3u8_name);
        }
        self.manifests.remove(&self.stream_path);
        self.segments.remove_stream(&self.stream_path);
        log::info!("hls writer exit: {}", self.stream_path);
    }

    /// Polls the hub until the stream shows up
    async fn wait_for_stream(&self) -> Option<Arc<Stream>> {
        let deadline = Instant::now() + TRACK_WAIT;
        loop {
            if let Some(stream) = self.hub.get(&self.stream_path) {
                return Some(stream);
            }
            if self.cancel.is_cancelled() || Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Waits for the tracks to register and positions their readers.
    ///
    /// Video readers start at the IDR ring position so every video segment
    /// opens on a keyframe; when video exists, the audio reader holds until
    /// the IDR is known so both windows open together.
    async fn open_tracks(&self, stream: &Arc<Stream>) -> Option<Vec<TrackContext>> {
        let stream_cancel = stream.cancelled();

        // Tracks register shortly after publish; wait for the first, then
        // briefly for a companion
        let deadline = Instant::now() + TRACK_WAIT;
        while stream.video().is_none() && stream.audio().is_none() {
            if self.cancel.is_cancelled()
                || stream_cancel.is_cancelled()
                || Instant::now() >= deadline
            {
                return None;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        let grace = Instant::now() + Duration::from_millis(500);
        while (stream.video().is_none() || stream.audio().is_none()) && Instant::now() < grace {
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let video = stream.video();
        let audio = stream.audio();

        // Video segments must begin at a keyframe
        if let Some(track) = &video {
            while track.ring.idr_position().is_none() {
                if self.cancel.is_cancelled() || stream_cancel.is_cancelled() {
                    return None;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        let mut contexts = Vec::new();
        if let Some(track) = video {
            contexts.push(self.open_track(&track.name, track.params.clone(), track.ring.reader_from_idr()));
        }
        if let Some(track) = audio {
            contexts.push(self.open_track(&track.name, track.params.clone(), track.ring.reader()));
        }
        Some(contexts)
    }

    fn open_track(&self, name: &str, params: TrackParams, reader: RingReader) -> TrackContext {
        let record = self.config.path.as_ref().map(|root| {
            let dir = root.join(&self.stream_path);
            let manifest_path = dir.join(format!("{}.m3u8", chrono::Utc::now().timestamp()));
            RecordState {
                dir,
                manifest_path,
                header_written: false,
            }
        });

        TrackContext {
            track_name: name.to_string(),
            params,
            reader,
            muxer: TsMuxer::new(),
            mem: MemoryTs::new(&self.pool),
            write_time: Duration::ZERO,
            started: false,
            segment_count: 0,
            window: SegmentWindow::new(self.config.window),
            live: TrackM3u8::new(),
            m3u8_name: format!("{}/{}", self.stream_path, name),
            published: false,
            record,
        }
    }

    async fn handle_frame(
        &self,
        ctx: &mut TrackContext,
        frame: &Frame,
        seg_handle: &Arc<StreamSegments>,
        stream: &Arc<Stream>,
        master_published: &mut bool,
    ) -> Result<()> {
        let fragment = self.config.fragment_duration();
        match frame {
            Frame::Video(f) => {
                let TrackParams::Video(params) = ctx.params.clone() else {
                    return Ok(());
                };
                if ctx.started
                    && f.keyframe
                    && f.timestamp.saturating_sub(ctx.write_time) >= fragment
                {
                    self.cut(ctx, f.timestamp, seg_handle, stream, master_published)
                        .await;
                }
                if !ctx.started {
                    ctx.write_time = f.timestamp;
                    ctx.started = true;
                }
                ctx.mem.write_video(&mut ctx.muxer, f, &params)
            }
            Frame::Audio(f) => {
                let TrackParams::Audio(asc) = ctx.params.clone() else {
                    return Ok(());
                };
                if ctx.started && f.timestamp.saturating_sub(ctx.write_time) >= fragment {
                    self.cut(ctx, f.timestamp, seg_handle, stream, master_published)
                        .await;
                }
                if !ctx.started {
                    ctx.write_time = f.timestamp;
                    ctx.started = true;
                }
                ctx.mem.write_audio(&mut ctx.muxer, f, &asc)
            }
        }
    }

    /// Seals the current buffer into the store, rotates the manifest window
    /// and evicts what fell out, in that order, under the manifest lock
    async fn cut(
        &self,
        ctx: &mut TrackContext,
        now: Duration,
        seg_handle: &Arc<StreamSegments>,
        stream: &Arc<Stream>,
        master_published: &mut bool,
    ) {
        if ctx.mem.is_empty() {
            ctx.write_time = now;
            return;
        }

        let duration = now.saturating_sub(ctx.write_time).as_secs_f64();
        let filename = format!(
            "{}{}_{}.ts",
            ctx.track_name,
            chrono::Utc::now().timestamp(),
            ctx.segment_count
        );
        let sealed = Arc::new(std::mem::replace(&mut ctx.mem, MemoryTs::new(&self.pool)));

        seg_handle.insert(filename.clone(), SegmentData::Mem(sealed.clone()));

        let inf = PlaylistInf {
            duration,
            title: filename.clone(),
            file_path: format!("{}/{}", self.stream_path, filename),
        };

        let live = ctx.live.clone();
        let window = &mut ctx.window;
        let rebuild = ctx.segment_count >= self.config.window as u64;
        let initial_target = (self.config.fragment * 1.5).ceil() as u32;
        let segment_count = ctx.segment_count;
        live.update(|buf| {
            let evicted = window.push(inf.clone());
            if rebuild {
                let oldest = segment_count + 1 - window.len() as u64;
                window.render(oldest, buf);
            } else {
                if buf.is_empty() {
                    Playlist {
                        version: 3,
                        sequence: 0,
                        target_duration: initial_target,
                    }
                    .write_header(buf);
                }
                Playlist::write_inf(buf, &inf);
            }
            // Unmapping inside the same lock scope keeps every filename in a
            // served manifest resolvable
            if let Some(old) = evicted {
                seg_handle.remove(&old.title);
            }
        });

        if !ctx.published {
            self.manifests.insert_live(&ctx.m3u8_name, ctx.live.clone());
            ctx.published = true;
        }
        if !*master_published {
            self.publish_master(stream);
            *master_published = true;
        }

        self.record_segment(ctx, &sealed, &inf).await;

        log::debug!(
            "cut segment {} ({:.3}s) for {}",
            filename,
            duration,
            self.stream_path
        );

        ctx.segment_count += 1;
        ctx.write_time = now;
    }

    fn publish_master(&self, stream: &Arc<Stream>) {
        let video = stream.video();
        let audio = stream.audio();
        let video_ref = video.as_ref().and_then(|t| match &t.params {
            TrackParams::Video(p) => Some((p, t.name.as_str())),
            _ => None,
        });
        let audio_name = audio.as_ref().map(|t| t.name.as_str());
        let master =
            super::playlist::master_manifest(stream.name(), video_ref, audio_name);
        self.manifests.insert_static(&self.stream_path, master);
    }

    /// Best-effort persistence: the TS file plus an ever-growing recording
    /// manifest under the configured path
    async fn record_segment(&self, ctx: &mut TrackContext, sealed: &MemoryTs, inf: &PlaylistInf) {
        let Some(record) = ctx.record.as_mut() else {
            return;
        };

        if let Err(e) = tokio::fs::create_dir_all(&record.dir).await {
            log::warn!("recording dir {}: {}", record.dir.display(), e);
            return;
        }

        if let Err(e) = tokio::fs::write(record.dir.join(&inf.title), sealed.assemble()).await {
            log::warn!("recording segment {}: {}", inf.title, e);
            return;
        }

        let mut entry = Vec::new();
        if !record.header_written {
            Playlist {
                version: 3,
                sequence: 0,
                target_duration: (self.config.fragment * 1.5).ceil() as u32,
            }
            .write_header(&mut entry);
            record.header_written = true;
        }
        Playlist::write_inf(&mut entry, inf);

        let result = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&record.manifest_path)
            .await;
        match result {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                if let Err(e) = file.write_all(&entry).await {
                    log::warn!(
                        "recording manifest {}: {}",
                        record.manifest_path.display(),
                        e
                    );
                }
            }
            Err(e) => log::warn!(
                "recording manifest {}: {}",
                record.manifest_path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::{AudioFrame, CodecId, StreamOrigin, VideoFrame, VideoParams};
    use crate::codec::aac::AudioSpecificConfig;
    use crate::format::hls::store::M3u8Entry;
    use bytes::Bytes;

    fn video_params() -> TrackParams {
        TrackParams::Video(VideoParams {
            codec: CodecId::H264,
            width: 1280,
            height: 720,
            sps: Bytes::from_static(&[0x67, 0x42]),
            pps: Bytes::from_static(&[0x68, 0xce]),
            vps: None,
        })
    }

    fn services() -> (Arc<StreamHub>, Arc<SegmentStore>, Arc<M3u8Store>) {
        (
            StreamHub::new(),
            Arc::new(SegmentStore::new()),
            Arc::new(M3u8Store::new()),
        )
    }

    fn live_manifest(manifests: &M3u8Store, path: &str) -> String {
        match manifests.get(path) {
            Some(M3u8Entry::Live(live)) => String::from_utf8(live.read().to_vec()).unwrap(),
            _ => panic!("live manifest at {} expected", path),
        }
    }

    #[tokio::test]
    async fn test_live_segmentation_window() {
        let (hub, segments, manifests) = services();
        let stream = hub.publish("live/test", StreamOrigin::Local).unwrap();
        let track = stream.set_video_track("video", video_params());

        let config = HlsConfig {
            fragment: 2.0,
            window: 3,
            ..HlsConfig::default()
        };
        let writer = HlsWriter::new(
            "live/test",
            config,
            hub.clone(),
            segments.clone(),
            manifests.clone(),
        );
        let handle = tokio::spawn(writer.clone().run());

        // First keyframe, then give the writer time to latch onto the IDR
        track.push_video(VideoFrame::from_millis(
            0,
            vec![Bytes::from(vec![0x65; 200])],
            true,
        ));
        tokio::time::sleep(Duration::from_millis(800)).await;

        // 30 s of 25 fps video: frames 1..=750, cuts at 2,4,...,30 s
        for i in 1..=750u64 {
            let ms = i * 40;
            let keyframe = ms % 2000 == 0;
            track.push_video(VideoFrame::from_millis(
                ms,
                vec![Bytes::from(vec![if keyframe { 0x65 } else { 0x41 }; 200])],
                keyframe,
            ));
            if i % 25 == 24 {
                tokio::time::sleep(Duration::from_millis(12)).await;
            }
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        // 15 cuts; the window lists the last three with sequence 12 (0-based)
        let manifest = live_manifest(&manifests, "live/test/video");
        assert!(manifest.contains("#EXT-X-MEDIA-SEQUENCE:12"), "{}", manifest);
        assert!(manifest.contains("#EXT-X-TARGETDURATION:2"), "{}", manifest);
        assert_eq!(manifest.matches("#EXTINF").count(), 3, "{}", manifest);
        assert!(manifest.contains("_12.ts"));
        assert!(manifest.contains("_14.ts"));
        assert!(!manifest.contains("_11.ts"));

        // Exactly the windowed segments remain in the store, and every
        // listed filename resolves to a PAT-led buffer
        let seg_handle = segments.get_stream("live/test").unwrap();
        assert_eq!(seg_handle.len(), 3);
        for line in manifest.lines().filter(|l| l.ends_with(".ts")) {
            let data = seg_handle.get(line).expect("listed segment resolvable").assemble();
            assert_eq!(&data[..188], &crate::format::ts::pat_packet());
            assert_eq!(data[188], 0x47);
        }

        // Master manifest published under the stream path
        match manifests.get("live/test") {
            Some(M3u8Entry::Static(master)) => {
                assert!(master.contains("test/video.m3u8"));
                assert!(master.contains("RESOLUTION=1280x720"));
            }
            _ => panic!("master manifest registered"),
        }

        writer.stop();
        handle.await.unwrap();
        // Teardown unregistered everything
        assert!(manifests.get("live/test/video").is_none());
        assert!(segments.get_stream("live/test").is_none());
    }

    #[tokio::test]
    async fn test_segments_begin_with_keyframe_pes() {
        let (hub, segments, manifests) = services();
        let stream = hub.publish("live/key", StreamOrigin::Local).unwrap();
        let track = stream.set_video_track("video", video_params());

        let config = HlsConfig {
            fragment: 2.0,
            window: 3,
            ..HlsConfig::default()
        };
        let writer = HlsWriter::new(
            "live/key",
            config,
            hub.clone(),
            segments.clone(),
            manifests.clone(),
        );
        let handle = tokio::spawn(writer.clone().run());

        track.push_video(VideoFrame::from_millis(
            0,
            vec![Bytes::from(vec![0x65; 200])],
            true,
        ));
        tokio::time::sleep(Duration::from_millis(800)).await;
        // Frames 1..=150: six seconds, cuts at 2, 4 and 6 s
        for i in 1..=150u64 {
            let ms = i * 40;
            let keyframe = ms % 2000 == 0;
            track.push_video(VideoFrame::from_millis(
                ms,
                vec![Bytes::from(vec![if keyframe { 0x65 } else { 0x41 }; 200])],
                keyframe,
            ));
            if i % 25 == 24 {
                tokio::time::sleep(Duration::from_millis(12)).await;
            }
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        let seg_handle = segments.get_stream("live/key").unwrap();
        let manifest = live_manifest(&manifests, "live/key/video");
        let first_file = manifest
            .lines()
            .find(|l| l.ends_with(".ts"))
            .expect("a segment line");

        let data = seg_handle
            .get(first_file)
            .expect("segment resolvable")
            .assemble();
        // PAT, PMT, then the first body packet opens a keyframe PES: PUSI
        // set and the random-access indicator in its adaptation field
        let body = &data[2 * 188..];
        assert_eq!(body[0], 0x47);
        assert_ne!(body[1] & 0x40, 0);
        assert_ne!(body[5] & 0x40, 0);

        writer.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_audio_only_segmentation() {
        let (hub, segments, manifests) = services();
        let stream = hub.publish("live/aud", StreamOrigin::Local).unwrap();
        let track =
            stream.set_audio_track("audio", TrackParams::Audio(AudioSpecificConfig::default()));

        let config = HlsConfig {
            fragment: 1.0,
            window: 3,
            ..HlsConfig::default()
        };
        let writer = HlsWriter::new(
            "live/aud",
            config,
            hub.clone(),
            segments.clone(),
            manifests.clone(),
        );

        // ~3.5 s of audio frames every ~23 ms; no IDR gating for audio-only
        for i in 0..150u64 {
            track.push_audio(AudioFrame::from_millis(i * 23, Bytes::from(vec![0x11; 64])));
        }
        let handle = tokio::spawn(writer.clone().run());
        tokio::time::sleep(Duration::from_millis(1000)).await;

        let manifest = live_manifest(&manifests, "live/aud/audio");
        assert!(manifest.matches("#EXTINF").count() >= 2, "{}", manifest);

        // Audio-only master still points a variant at the track playlist
        match manifests.get("live/aud") {
            Some(M3u8Entry::Static(master)) => {
                assert!(master.contains("aud/audio.m3u8"));
            }
            _ => panic!("master manifest registered"),
        }

        writer.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_stop_without_readers() {
        let (hub, segments, manifests) = services();
        let stream = hub.publish("live/idle", StreamOrigin::Local).unwrap();
        let track = stream.set_audio_track(
            "audio",
            TrackParams::Audio(AudioSpecificConfig::default()),
        );
        track.push_audio(AudioFrame::from_millis(0, Bytes::from(vec![0x11; 32])));

        let config = HlsConfig {
            preload: false,
            ..HlsConfig::default()
        };
        let writer = HlsWriter::new(
            "live/idle",
            config,
            hub.clone(),
            segments.clone(),
            manifests.clone(),
        )
        .with_idle_stop(Duration::from_millis(200));
        let handle = tokio::spawn(writer.clone().run());

        // With nothing reading the manifest the writer winds itself down
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("writer stopped on idle")
            .unwrap();
        assert!(manifests.get("live/idle/audio").is_none());
    }
}
