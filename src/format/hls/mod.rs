//! # HLS Gateway
//!
//! The gateway proper: segmentation of published streams into rolling HLS
//! presentations, pulling of remote HLS streams into the local publisher,
//! the in-memory segment/manifest stores, and the HTTP surface.
//!
//! [`HlsPlugin`] ties the pieces together: it owns the process-scoped
//! stores, reacts to stream events, and hands out the axum routers.
//!
//! ```rust,no_run
//! use hlsgate::av::StreamHub;
//! use hlsgate::config::HlsConfig;
//! use hlsgate::format::hls::HlsPlugin;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let hub = StreamHub::new();
//! let plugin = HlsPlugin::new(HlsConfig::default(), hub.clone())?;
//! plugin.clone().start();
//!
//! let app = axum::Router::new()
//!     .nest("/hls", plugin.clone().router())
//!     .nest("/api/hls", plugin.api_router());
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

/// HTTP playback and admin surface
pub mod http;

/// Manifest rendering and the sliding segment window
pub mod playlist;

/// Remote HLS puller
pub mod puller;

/// In-memory TS segment buffers
pub mod segment;

/// Process-scoped segment and manifest stores
pub mod store;

/// Per-stream segmenter
pub mod writer;

pub use playlist::{Playlist, PlaylistInf, SegmentWindow};
pub use puller::{HlsPuller, PullerInfo, PullerRegistry};
pub use segment::MemoryTs;
pub use store::{M3u8Entry, M3u8Store, SegmentData, SegmentStore, TrackM3u8};
pub use writer::HlsWriter;

use crate::av::{StreamEvent, StreamHub, StreamOrigin};
use crate::config::{HlsConfig, RelayMode};
use crate::error::Result;
use crate::format::ts::types::{pat_packet, pmt_packet, TrackSet};
use bytes::Bytes;
use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

lazy_static! {
    /// The built-in placeholder segment: a syntactically valid transport
    /// stream carrying only its tables
    static ref BUILTIN_DEFAULT_TS: Bytes = {
        let mut buf = Vec::with_capacity(2 * 188);
        buf.extend_from_slice(&pat_packet());
        buf.extend_from_slice(&pmt_packet(TrackSet::default()));
        Bytes::from(buf)
    };
}

/// The HLS gateway plugin.
///
/// One instance per process. Owns the segment store, the manifest store and
/// the puller registry as explicit services with plugin-scoped lifetime;
/// spawns writers in reaction to publish events (or on demand) and pullers
/// in reaction to the admin API and configuration.
pub struct HlsPlugin {
    config: HlsConfig,
    hub: Arc<StreamHub>,
    segments: Arc<SegmentStore>,
    manifests: Arc<M3u8Store>,
    pullers: Arc<PullerRegistry>,
    writing: Arc<RwLock<HashMap<String, Arc<HlsWriter>>>>,
    filter: Option<Regex>,
    default_ts: Bytes,
    default_seq: AtomicU64,
    cancel: CancellationToken,
}

impl HlsPlugin {
    /// Creates the plugin; fails on an invalid filter regex or an unreadable
    /// `default_ts` file
    pub fn new(config: HlsConfig, hub: Arc<StreamHub>) -> Result<Arc<Self>> {
        let filter = config.compile_filter()?;
        let default_ts = match &config.default_ts {
            Some(path) => Bytes::from(std::fs::read(path)?),
            None => BUILTIN_DEFAULT_TS.clone(),
        };

        Ok(Arc::new(Self {
            config,
            hub,
            segments: Arc::new(SegmentStore::new()),
            manifests: Arc::new(M3u8Store::new()),
            pullers: Arc::new(PullerRegistry::new()),
            writing: Arc::new(RwLock::new(HashMap::new())),
            filter,
            default_ts,
            default_seq: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }))
    }

    /// Spawns the background tasks: the placeholder sequence ticker, the
    /// stream event loop, and the configured startup pulls
    pub fn start(self: Arc<Self>) {
        // The placeholder manifest advances its discontinuity sequence once
        // per placeholder duration
        let ticker = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ticker.config.default_ts_interval());
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.cancel.cancelled() => return,
                    _ = interval.tick() => {
                        ticker.default_seq.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        });

        // Subscribe before returning so no publish event can slip past
        let mut receiver = self.hub.subscribe_events();
        let events = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = events.cancel.cancelled() => return,
                    event = receiver.recv() => match event {
                        Ok(event) => events.on_event(event),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("hls plugin missed {} stream events", n);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        });

        for (stream_path, url) in &self.config.pull_on_start {
            if let Err(e) = self.pull(stream_path, url, false) {
                log::error!("pull on start {} from {}: {}", stream_path, url, e);
            }
        }
    }

    /// Stops background tasks, writers and pullers
    pub fn shutdown(&self) {
        self.cancel.cancel();
        for writer in self.writing.read().values() {
            writer.stop();
        }
        for info in self.pullers.list() {
            if let Some(puller) = self.pullers.get(&info.stream_path) {
                puller.stop();
            }
        }
    }

    /// One handler for the whole event sum
    fn on_event(&self, event: StreamEvent) {
        match event {
            StreamEvent::Publish(stream) => {
                if !self.config.preload {
                    return;
                }
                if let Some(filter) = &self.filter {
                    if !filter.is_match(&stream.path) {
                        return;
                    }
                }
                // A pulled stream in relay mode already mirrors segments;
                // re-segmenting it would duplicate the work
                if stream.origin == StreamOrigin::Pulled
                    && self.config.relay_mode != RelayMode::Transmux
                {
                    return;
                }
                self.start_writer(&stream.path);
            }
            StreamEvent::Close(path) => {
                // The writer observes the stream token; dropping our handle
                // here just keeps the registry tidy
                if let Some(writer) = self.writing.read().get(&path) {
                    writer.stop();
                }
            }
            StreamEvent::Invite(path) => {
                if let Some(url) = self.config.pull_on_sub.get(&path) {
                    if self.pullers.get(&path).is_none() {
                        if let Err(e) = self.pull(&path, url, false) {
                            log::error!("pull on subscribe {}: {}", path, e);
                        }
                    }
                }
            }
        }
    }

    /// Starts a writer for `stream_path` unless one is already running;
    /// returns whether a new one was spawned
    pub fn start_writer(&self, stream_path: &str) -> bool {
        let writer = {
            let mut writing = self.writing.write();
            if writing.contains_key(stream_path) {
                return false;
            }
            let writer = HlsWriter::new(
                stream_path,
                self.config.clone(),
                self.hub.clone(),
                self.segments.clone(),
                self.manifests.clone(),
            );
            writing.insert(stream_path.to_string(), writer.clone());
            writer
        };

        let writing = self.writing.clone();
        let path = stream_path.to_string();
        tokio::spawn(async move {
            writer.run().await;
            writing.write().remove(&path);
        });
        true
    }

    /// On-demand entry point used by the HTTP surface when a manifest is
    /// missing: start segmenting, or invite the publisher
    pub fn start_on_demand(&self, stream_path: &str) {
        if !self.config.preload {
            self.start_writer(stream_path);
        } else {
            self.hub.invite(stream_path);
        }
    }

    /// Starts pulling `url` and publishing it under `stream_path`
    pub fn pull(&self, stream_path: &str, url: &str, save: bool) -> Result<()> {
        let puller = Arc::new(HlsPuller::new(stream_path, url, self.config.clone())?);
        self.pullers.insert(puller.clone())?;

        if save {
            // Held until the puller exits; the admin save endpoint offers
            // the connection-scoped variant
            let _ = puller.begin_save();
        }

        let hub = self.hub.clone();
        let segments = self.segments.clone();
        let manifests = self.manifests.clone();
        let pullers = self.pullers.clone();
        let path = stream_path.to_string();
        tokio::spawn(async move {
            puller.run(hub, segments, manifests).await;
            pullers.remove(&path);
        });
        Ok(())
    }

    /// The playback router, for nesting under the host's media prefix
    pub fn router(self: Arc<Self>) -> axum::Router {
        http::router(self)
    }

    /// The admin router, for nesting under `/api/hls`
    pub fn api_router(self: Arc<Self>) -> axum::Router {
        http::api_router(self)
    }

    /// The gateway configuration
    pub fn config(&self) -> &HlsConfig {
        &self.config
    }

    /// The stream hub this plugin is attached to
    pub fn hub(&self) -> &Arc<StreamHub> {
        &self.hub
    }

    /// The process-scoped segment store
    pub fn segments(&self) -> &Arc<SegmentStore> {
        &self.segments
    }

    /// The process-scoped manifest store
    pub fn manifests(&self) -> &Arc<M3u8Store> {
        &self.manifests
    }

    /// The registry of active pullers
    pub fn pullers(&self) -> &Arc<PullerRegistry> {
        &self.pullers
    }

    /// The placeholder segment served for missing filenames
    pub fn default_ts(&self) -> Bytes {
        self.default_ts.clone()
    }

    /// Current discontinuity sequence of the placeholder manifest
    pub fn default_seq(&self) -> u64 {
        self.default_seq.load(Ordering::Relaxed)
    }
}
