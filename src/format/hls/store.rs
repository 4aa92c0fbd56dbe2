use super::segment::MemoryTs;
use crate::utils::PooledBuf;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// One stored segment: either muxed locally or relayed verbatim.
///
/// Cloning is cheap (Arc). Eviction removes the store's clone; pooled
/// storage returns to its pool once the last in-flight HTTP response drops
/// its own clone.
#[derive(Clone)]
pub enum SegmentData {
    /// A locally muxed segment; PAT/PMT are rendered on serve
    Mem(Arc<MemoryTs>),
    /// Relayed bytes stored as downloaded (tables already included)
    Raw(Arc<PooledBuf>),
}

impl SegmentData {
    /// Materializes the bytes to serve
    pub fn assemble(&self) -> Bytes {
        match self {
            SegmentData::Mem(ts) => ts.assemble(),
            SegmentData::Raw(buf) => Bytes::copy_from_slice(buf),
        }
    }
}

/// The segments of one stream, keyed by filename
#[derive(Default)]
pub struct StreamSegments {
    segments: RwLock<HashMap<String, SegmentData>>,
}

impl StreamSegments {
    /// Stores a segment under its filename, replacing any previous holder
    pub fn insert(&self, name: impl Into<String>, data: SegmentData) {
        self.segments.write().insert(name.into(), data);
    }

    /// Fetches a segment by filename
    pub fn get(&self, name: &str) -> Option<SegmentData> {
        self.segments.read().get(name).cloned()
    }

    /// Removes and returns a segment
    pub fn remove(&self, name: &str) -> Option<SegmentData> {
        self.segments.write().remove(name)
    }

    /// Number of stored segments
    pub fn len(&self) -> usize {
        self.segments.read().len()
    }

    /// True when the stream holds no segments
    pub fn is_empty(&self) -> bool {
        self.segments.read().is_empty()
    }
}

/// Process-scoped two-level segment map: `streamPath → filename → segment`.
///
/// The outer level hands out per-stream handles so a stream teardown drops
/// everything at once.
#[derive(Default)]
pub struct SegmentStore {
    streams: RwLock<HashMap<String, Arc<StreamSegments>>>,
}

impl SegmentStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// The per-stream handle, created on first use
    pub fn stream(&self, path: &str) -> Arc<StreamSegments> {
        if let Some(existing) = self.streams.read().get(path) {
            return existing.clone();
        }
        self.streams
            .write()
            .entry(path.to_string())
            .or_default()
            .clone()
    }

    /// The per-stream handle, when the stream exists
    pub fn get_stream(&self, path: &str) -> Option<Arc<StreamSegments>> {
        self.streams.read().get(path).cloned()
    }

    /// Looks up one segment by stream path and filename
    pub fn lookup(&self, path: &str, name: &str) -> Option<SegmentData> {
        self.get_stream(path)?.get(name)
    }

    /// Drops a whole stream and all its segments
    pub fn remove_stream(&self, path: &str) -> Option<Arc<StreamSegments>> {
        self.streams.write().remove(path)
    }
}

/// The live, lock-guarded manifest of one track, shared between its writer
/// and the HTTP surface.
pub struct TrackM3u8 {
    m3u8: RwLock<Vec<u8>>,
    last_read: AtomicI64,
}

impl TrackM3u8 {
    /// Creates an empty manifest marked as just read
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            m3u8: RwLock::new(Vec::new()),
            last_read: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
        })
    }

    /// Copies the manifest bytes out under the read lock and records the
    /// access for idle tracking
    pub fn read(&self) -> Bytes {
        self.last_read
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
        let guard = self.m3u8.read();
        Bytes::copy_from_slice(&guard)
    }

    /// Runs `f` with the manifest buffer under the write lock.
    ///
    /// Segment-store eviction belongs inside `f`: readers must never see a
    /// manifest naming a filename that is already gone.
    pub fn update<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        let mut guard = self.m3u8.write();
        f(&mut guard)
    }

    /// Milliseconds since the last HTTP read
    pub fn idle_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis() - self.last_read.load(Ordering::Relaxed)
    }
}

/// A manifest as resolvable by the HTTP surface
#[derive(Clone)]
pub enum M3u8Entry {
    /// A live track manifest, rewritten on every cut
    Live(Arc<TrackM3u8>),
    /// A fixed string: master manifests and relayed playlists
    Static(String),
}

/// Process-scoped map of manifest path → manifest
#[derive(Default)]
pub struct M3u8Store {
    entries: RwLock<HashMap<String, M3u8Entry>>,
}

impl M3u8Store {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a live track manifest
    pub fn insert_live(&self, path: impl Into<String>, m3u8: Arc<TrackM3u8>) {
        self.entries.write().insert(path.into(), M3u8Entry::Live(m3u8));
    }

    /// Publishes a fixed manifest string
    pub fn insert_static(&self, path: impl Into<String>, m3u8: impl Into<String>) {
        self.entries
            .write()
            .insert(path.into(), M3u8Entry::Static(m3u8.into()));
    }

    /// Resolves a manifest path
    pub fn get(&self, path: &str) -> Option<M3u8Entry> {
        self.entries.read().get(path).cloned()
    }

    /// Removes a manifest
    pub fn remove(&self, path: &str) {
        self.entries.write().remove(path);
    }
}
