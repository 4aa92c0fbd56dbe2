use super::playlist::{Playlist, PlaylistInf};
use super::store::{M3u8Store, SegmentData, SegmentStore};
use crate::av::{Stream, StreamHub, StreamOrigin};
use crate::config::HlsConfig;
use crate::error::{HlsError, Result};
use crate::format::ts::TsReader;
use crate::utils::BytesPool;
use bytes::{BufMut, Bytes};
use m3u8_rs::{AlternativeMediaType, MasterPlaylist, MediaPlaylist, VariantStream};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Only this many of the freshest segments are fetched per poll
const MAX_QUEUED_SEGMENTS: usize = 3;
/// Consecutive manifest failures tolerated before the puller aborts
const MAX_MANIFEST_FAILURES: u32 = 10;
/// Relayed segments retained before ring eviction
const RELAY_RING_SIZE: usize = 6;

/// Which rendition a poll loop serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rendition {
    Video,
    Audio,
}

/// Per-rendition bookkeeping, exposed through the admin list API
#[derive(Default)]
pub struct M3u8Info {
    m3u8_count: AtomicUsize,
    ts_count: AtomicUsize,
    last_sequence: AtomicI64,
    last_m3u8: Mutex<String>,
}

impl M3u8Info {
    fn snapshot(&self) -> RenditionInfo {
        RenditionInfo {
            m3u8_count: self.m3u8_count.load(Ordering::Relaxed),
            ts_count: self.ts_count.load(Ordering::Relaxed),
            last_sequence: self.last_sequence.load(Ordering::Relaxed),
            last_m3u8: self.last_m3u8.lock().clone(),
        }
    }
}

/// Serialized form of one rendition's counters
#[derive(Debug, Clone, Serialize)]
pub struct RenditionInfo {
    /// Manifests fetched so far
    pub m3u8_count: usize,
    /// Segments fetched so far
    pub ts_count: usize,
    /// Media sequence of the last accepted manifest (-1 before the first)
    pub last_sequence: i64,
    /// Body of the last fetched manifest
    pub last_m3u8: String,
}

/// Serialized form of one active puller
#[derive(Debug, Clone, Serialize)]
pub struct PullerInfo {
    /// Stream path the puller publishes under
    pub stream_path: String,
    /// Remote playlist URL
    pub url: String,
    /// Whether segments are currently saved to disk
    pub saving: bool,
    /// Video rendition counters
    pub video: RenditionInfo,
    /// Audio rendition counters
    pub audio: RenditionInfo,
}

/// State machine for one remote HLS URL.
///
/// Polls the manifest, downloads fresh segments in parallel, and depending
/// on the relay mode demuxes them into the local publisher, mirrors them
/// into the segment store, or both.
pub struct HlsPuller {
    stream_path: String,
    remote_url: Url,
    config: HlsConfig,
    client: reqwest::Client,
    cancel: CancellationToken,
    video: M3u8Info,
    audio: M3u8Info,
    audio_started: AtomicBool,
    ts_head: reqwest::header::HeaderMap,
    save: Mutex<Option<CancellationToken>>,
}

impl HlsPuller {
    /// Creates a puller for `url`, honoring the configured proxy
    pub fn new(
        stream_path: impl Into<String>,
        url: &str,
        config: HlsConfig,
    ) -> Result<Self> {
        let remote_url =
            Url::parse(url).map_err(|e| HlsError::Http(format!("bad pull url {}: {}", url, e)))?;

        let mut builder = reqwest::Client::builder();
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy)
                    .map_err(|e| HlsError::Http(format!("bad proxy {}: {}", proxy, e)))?,
            );
        }
        let client = builder
            .build()
            .map_err(|e| HlsError::Http(format!("building http client: {}", e)))?;

        Ok(Self {
            stream_path: stream_path.into(),
            remote_url,
            config,
            client,
            cancel: CancellationToken::new(),
            video: M3u8Info::default(),
            audio: M3u8Info::default(),
            audio_started: AtomicBool::new(false),
            ts_head: reqwest::header::HeaderMap::new(),
            save: Mutex::new(None),
        })
    }

    /// Stream path this puller publishes under
    pub fn stream_path(&self) -> &str {
        &self.stream_path
    }

    /// Extra request headers sent with every fetch (cookies and the like)
    pub fn with_headers(mut self, headers: reqwest::header::HeaderMap) -> Self {
        self.ts_head = headers;
        self
    }

    /// Stops the puller; in-flight requests abort via their tokens
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Begins saving downloaded segments to disk; cancel the returned token
    /// to stop
    pub fn begin_save(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.save.lock() = Some(token.clone());
        token
    }

    fn save_active(&self) -> bool {
        self.save
            .lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Snapshot for the admin list API
    pub fn info(&self) -> PullerInfo {
        PullerInfo {
            stream_path: self.stream_path.clone(),
            url: self.remote_url.to_string(),
            saving: self.save_active(),
            video: self.video.snapshot(),
            audio: self.audio.snapshot(),
        }
    }

    /// Publishes the stream and runs the poll loop until stopped or too
    /// many consecutive manifest failures accumulate
    pub async fn run(
        self: Arc<Self>,
        hub: Arc<StreamHub>,
        segments: Arc<SegmentStore>,
        manifests: Arc<M3u8Store>,
    ) {
        let stream = match hub.publish(&self.stream_path, StreamOrigin::Pulled) {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("hls pull {}: {}", self.stream_path, e);
                return;
            }
        };

        let result = self
            .clone()
            .pull(
                Rendition::Video,
                self.remote_url.clone(),
                stream.clone(),
                segments.clone(),
                manifests.clone(),
            )
            .await;

        match result {
            Ok(()) | Err(HlsError::StreamClosed) => {
                log::info!("hls pull exit: {}", self.stream_path)
            }
            Err(e) => log::error!("hls pull exit: {}: {}", self.stream_path, e),
        }

        if self.config.relay_mode.relays() {
            manifests.remove(&self.stream_path);
            segments.remove_stream(&self.stream_path);
        }
        hub.close(&self.stream_path);
    }

    fn rendition_info(&self, rendition: Rendition) -> &M3u8Info {
        match rendition {
            Rendition::Video => &self.video,
            Rendition::Audio => &self.audio,
        }
    }

    async fn pull(
        self: Arc<Self>,
        rendition: Rendition,
        start_url: Url,
        stream: Arc<Stream>,
        segments: Arc<SegmentStore>,
        manifests: Arc<M3u8Store>,
    ) -> Result<()> {
        let stream_cancel = stream.cancelled();
        let pool = BytesPool::new();
        let mut req_url = start_url;
        let mut sequence: i64 = -1;
        let mut last_ts: HashSet<String> = HashSet::new();
        let mut err_count = 0u32;
        let mut relay_seq = 0u64;
        let mut relay_ring: VecDeque<String> = VecDeque::with_capacity(RELAY_RING_SIZE);
        let mut ts_reader = self
            .config
            .relay_mode
            .transmuxes()
            .then(|| TsReader::new(stream.clone()));
        // Only the primary rendition mirrors the manifest and segments
        let relaying = self.config.relay_mode.relays() && rendition == Rendition::Video;
        let seg_handle = relaying.then(|| segments.stream(&self.stream_path));

        loop {
            if self.cancel.is_cancelled() || stream_cancel.is_cancelled() {
                return Err(HlsError::StreamClosed);
            }

            let body = self.fetch_bytes(&req_url).await?;
            let playlist = match m3u8_rs::parse_playlist_res(&body) {
                Ok(playlist) => playlist,
                Err(e) => {
                    err_count += 1;
                    log::error!(
                        "hls pull {}: manifest parse failed ({} consecutive): {:?}",
                        self.stream_path,
                        err_count,
                        e
                    );
                    if err_count > MAX_MANIFEST_FAILURES {
                        return Err(HlsError::ManifestParse(format!(
                            "{} consecutive manifest failures",
                            err_count
                        )));
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            err_count = 0;

            let info = self.rendition_info(rendition);
            *info.last_m3u8.lock() = String::from_utf8_lossy(&body).into_owned();

            match playlist {
                m3u8_rs::Playlist::MasterPlaylist(master) => {
                    if rendition == Rendition::Video
                        && !self.audio_started.swap(true, Ordering::SeqCst)
                    {
                        if let Some(audio_uri) = select_audio_uri(&master) {
                            match resolve_uri(&req_url, &audio_uri) {
                                Ok(audio_url) => {
                                    log::info!(
                                        "hls pull {}: starting alternate audio {}",
                                        self.stream_path,
                                        audio_url
                                    );
                                    spawn_audio_pull(
                                        self.clone(),
                                        audio_url,
                                        stream.clone(),
                                        segments.clone(),
                                        manifests.clone(),
                                    );
                                }
                                Err(e) => log::warn!(
                                    "hls pull {}: bad audio rendition uri: {}",
                                    self.stream_path,
                                    e
                                ),
                            }
                        }
                    }

                    match select_max_variant(&master) {
                        Some(variant) => {
                            req_url = resolve_uri(&req_url, &variant.uri)?;
                            log::info!(
                                "hls pull {}: selected variant {:?} @ {} -> {}",
                                self.stream_path,
                                variant.resolution,
                                variant.bandwidth,
                                req_url
                            );
                        }
                        None => {
                            return Err(HlsError::ManifestParse(
                                "master playlist without usable variants".into(),
                            ))
                        }
                    }
                }

                m3u8_rs::Playlist::MediaPlaylist(pl) => {
                    if (pl.media_sequence as i64) <= sequence {
                        log::debug!(
                            "hls pull {}: sequence {} not newer than {}",
                            self.stream_path,
                            pl.media_sequence,
                            sequence
                        );
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                    sequence = pl.media_sequence as i64;
                    info.m3u8_count.fetch_add(1, Ordering::Relaxed);
                    info.last_sequence.store(sequence, Ordering::Relaxed);

                    let (this_ts, fresh) = diff_segments(&last_ts, &pl);
                    last_ts = this_ts;
                    log::debug!(
                        "hls pull {}: sequence {} with {} fresh segments",
                        self.stream_path,
                        sequence,
                        fresh.len()
                    );

                    // Segment downloads run concurrently; results are
                    // consumed in submission order
                    let downloads = fresh.iter().map(|(uri, _)| {
                        let url = resolve_uri(&req_url, uri);
                        let puller = self.clone();
                        async move {
                            match url {
                                Ok(url) => {
                                    let bytes = puller.fetch_bytes(&url).await?;
                                    Ok((url, bytes))
                                }
                                Err(e) => Err(e),
                            }
                        }
                    });
                    let results = futures::future::join_all(downloads).await;

                    let mut relay_buf = Vec::new();
                    if relaying {
                        Playlist {
                            version: 3,
                            sequence: pl.media_sequence,
                            target_duration: pl.target_duration as u32,
                        }
                        .write_header(&mut relay_buf);
                    }

                    for ((_, duration), result) in fresh.iter().zip(results) {
                        if self.cancel.is_cancelled() || stream_cancel.is_cancelled() {
                            return Err(HlsError::StreamClosed);
                        }
                        let (ts_url, bytes) = match result {
                            Ok(ok) => ok,
                            Err(e) => {
                                log::error!(
                                    "hls pull {}: segment download failed: {}",
                                    self.stream_path,
                                    e
                                );
                                continue;
                            }
                        };
                        info.ts_count.fetch_add(1, Ordering::Relaxed);

                        if self.save_active() {
                            self.save_segment(&ts_url, &bytes).await;
                        }

                        if let Some(reader) = ts_reader.as_mut() {
                            // Demux corruption is reported per segment and skipped
                            if let Err(e) = reader.feed(&bytes).await {
                                log::warn!(
                                    "hls pull {}: demuxing {} failed: {}",
                                    self.stream_path,
                                    ts_url,
                                    e
                                );
                            }
                        }

                        if let Some(seg_handle) = &seg_handle {
                            let mut buf = pool.get(bytes.len());
                            buf.put_slice(&bytes);

                            let filename = format!(
                                "{}_{}.ts",
                                chrono::Utc::now().timestamp(),
                                relay_seq
                            );
                            relay_seq += 1;

                            let inf = PlaylistInf {
                                duration: *duration as f64,
                                title: format!("{}/{}", stream.name(), filename),
                                file_path: format!("{}/{}", self.stream_path, filename),
                            };
                            Playlist::write_inf(&mut relay_buf, &inf);

                            seg_handle.insert(filename.clone(), SegmentData::Raw(Arc::new(buf)));
                            if relay_ring.len() >= RELAY_RING_SIZE {
                                if let Some(old) = relay_ring.pop_front() {
                                    if seg_handle.remove(&old).is_none() {
                                        log::warn!(
                                            "hls pull {}: evicted segment {} already gone",
                                            self.stream_path,
                                            old
                                        );
                                    }
                                }
                            }
                            relay_ring.push_back(filename);
                        }
                    }

                    if relaying {
                        match String::from_utf8(relay_buf) {
                            Ok(m3u8) => manifests.insert_static(&self.stream_path, m3u8),
                            Err(e) => log::warn!(
                                "hls pull {}: relay manifest not utf-8: {}",
                                self.stream_path,
                                e
                            ),
                        }
                    }
                }
            }
        }
    }

    /// GETs `url` with the configured headers; aborts mid-flight when the
    /// puller is stopped
    async fn fetch_bytes(&self, url: &Url) -> Result<Bytes> {
        let request = async {
            let response = self
                .client
                .get(url.clone())
                .headers(self.ts_head.clone())
                .send()
                .await
                .map_err(|e| HlsError::Http(format!("GET {}: {}", url, e)))?
                .error_for_status()
                .map_err(|e| HlsError::Http(format!("GET {}: {}", url, e)))?;

            response
                .bytes()
                .await
                .map_err(|e| HlsError::Http(format!("reading {}: {}", url, e)))
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(HlsError::StreamClosed),
            result = request => result,
        }
    }

    /// Best-effort copy of a downloaded segment to the configured path
    async fn save_segment(&self, ts_url: &Url, bytes: &Bytes) {
        let Some(root) = &self.config.path else {
            log::warn!("hls save requested but no path configured");
            return;
        };
        let basename = ts_url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .unwrap_or("segment.ts");
        let dir = root.join(&self.stream_path);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            log::error!("hls save mkdir {}: {}", dir.display(), e);
            return;
        }
        if let Err(e) = tokio::fs::write(dir.join(basename), bytes).await {
            log::error!("hls save {}: {}", basename, e);
        }
    }
}

/// Runs the alternate-audio poll loop as its own task
fn spawn_audio_pull(
    puller: Arc<HlsPuller>,
    url: Url,
    stream: Arc<Stream>,
    segments: Arc<SegmentStore>,
    manifests: Arc<M3u8Store>,
) {
    tokio::spawn(async move {
        let path = puller.stream_path().to_string();
        if let Err(e) = puller
            .pull(Rendition::Audio, url, stream, segments, manifests)
            .await
        {
            match e {
                HlsError::StreamClosed => log::info!("hls audio pull exit: {}", path),
                e => log::error!("hls audio pull exit: {}: {}", path, e),
            }
        }
    });
}

/// Process-scoped registry of active pullers
#[derive(Default)]
pub struct PullerRegistry {
    pullers: RwLock<HashMap<String, Arc<HlsPuller>>>,
}

impl PullerRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a puller; fails when the path is already being pulled
    pub fn insert(&self, puller: Arc<HlsPuller>) -> Result<()> {
        let mut pullers = self.pullers.write();
        if pullers.contains_key(puller.stream_path()) {
            return Err(HlsError::InvalidData(format!(
                "already pulling {}",
                puller.stream_path()
            )));
        }
        pullers.insert(puller.stream_path().to_string(), puller);
        Ok(())
    }

    /// Looks up the puller for a stream path
    pub fn get(&self, stream_path: &str) -> Option<Arc<HlsPuller>> {
        self.pullers.read().get(stream_path).cloned()
    }

    /// Removes a puller after it exits
    pub fn remove(&self, stream_path: &str) -> Option<Arc<HlsPuller>> {
        self.pullers.write().remove(stream_path)
    }

    /// Snapshots all active pullers for the list API
    pub fn list(&self) -> Vec<PullerInfo> {
        self.pullers.read().values().map(|p| p.info()).collect()
    }
}

/// Splits a media playlist into the URI set of this poll and the segments
/// to download.
///
/// A segment is fresh when its URI was not in the previous poll's set, or
/// when a discontinuity tag preceded it (the discontinuity resets dedup for
/// the rest of the poll). Only the newest [`MAX_QUEUED_SEGMENTS`] survive.
fn diff_segments(
    last_ts: &HashSet<String>,
    playlist: &MediaPlaylist,
) -> (HashSet<String>, Vec<(String, f32)>) {
    let mut this_ts = HashSet::new();
    let mut fresh = Vec::new();
    let mut discontinuity = false;

    for segment in &playlist.segments {
        if segment.discontinuity {
            discontinuity = true;
        }
        this_ts.insert(segment.uri.clone());
        if last_ts.contains(&segment.uri) && !discontinuity {
            continue;
        }
        fresh.push((segment.uri.clone(), segment.duration));
    }

    if fresh.len() > MAX_QUEUED_SEGMENTS {
        fresh.drain(..fresh.len() - MAX_QUEUED_SEGMENTS);
    }

    (this_ts, fresh)
}

/// Picks the variant with the greatest resolution, falling back to
/// bandwidth when resolutions are absent or equal
fn select_max_variant(master: &MasterPlaylist) -> Option<&VariantStream> {
    let mut best: Option<&VariantStream> = None;
    for variant in &master.variants {
        if variant.is_i_frame || variant.uri.is_empty() {
            continue;
        }
        best = match best {
            None => Some(variant),
            Some(current) => {
                if variant_outranks(variant, current) {
                    Some(variant)
                } else {
                    Some(current)
                }
            }
        };
    }
    best
}

fn variant_outranks(a: &VariantStream, b: &VariantStream) -> bool {
    match (a.resolution, b.resolution) {
        (Some(ra), Some(rb)) if ra != rb => ra.width > rb.width || ra.height > rb.height,
        _ => a.bandwidth > b.bandwidth,
    }
}

/// First audio rendition with a URI, preferring the default one
fn select_audio_uri(master: &MasterPlaylist) -> Option<String> {
    let audio = master
        .alternatives
        .iter()
        .filter(|alt| alt.media_type == AlternativeMediaType::Audio && alt.uri.is_some());

    let mut first = None;
    for alternative in audio {
        if alternative.default {
            return alternative.uri.clone();
        }
        if first.is_none() {
            first = alternative.uri.clone();
        }
    }
    first
}

fn resolve_uri(base: &Url, value: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(value) {
        return Ok(url);
    }
    base.join(value)
        .map_err(|e| HlsError::Http(format!("resolving {}: {}", value, e)))
}
