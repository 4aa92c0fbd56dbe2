use super::Frame;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

/// Default frame capacity of a track ring; at 30 fps this retains a few
/// seconds of video, enough for a subscriber to latch onto the last IDR.
pub const DEFAULT_RING_CAPACITY: usize = 256;

struct RingState {
    frames: VecDeque<Arc<Frame>>,
    /// Absolute index of `frames[0]`
    head: u64,
    /// Absolute index of the most recent keyframe still retained
    idr: Option<u64>,
}

/// A bounded broadcast ring of frames.
///
/// One writer pushes, any number of [`RingReader`]s poll independently.
/// Readers that fall behind the retention window are snapped forward to the
/// oldest retained frame. The ring remembers where the most recent keyframe
/// sits so video subscribers can start decoding at an IDR.
#[derive(Clone)]
pub struct FrameRing {
    state: Arc<RwLock<RingState>>,
    capacity: usize,
}

impl FrameRing {
    /// Creates a ring retaining at most `capacity` frames
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(RingState {
                frames: VecDeque::with_capacity(capacity),
                head: 0,
                idr: None,
            })),
            capacity: capacity.max(1),
        }
    }

    /// Appends a frame, evicting the oldest when full
    pub fn push(&self, frame: Frame) {
        let mut state = self.state.write();
        let index = state.head + state.frames.len() as u64;
        if frame.is_keyframe() {
            state.idr = Some(index);
        }
        state.frames.push_back(Arc::new(frame));
        if state.frames.len() > self.capacity {
            state.frames.pop_front();
            state.head += 1;
            if state.idr.is_some_and(|idr| idr < state.head) {
                state.idr = None;
            }
        }
    }

    /// Absolute index of the most recent retained keyframe
    pub fn idr_position(&self) -> Option<u64> {
        self.state.read().idr
    }

    /// Absolute index the next pushed frame will receive
    pub fn next_index(&self) -> u64 {
        let state = self.state.read();
        state.head + state.frames.len() as u64
    }

    /// A reader positioned at the oldest retained frame
    pub fn reader(&self) -> RingReader {
        RingReader {
            state: self.state.clone(),
            cursor: self.state.read().head,
        }
    }

    /// A reader positioned at the most recent keyframe, or at the write
    /// position when no keyframe is retained
    pub fn reader_from_idr(&self) -> RingReader {
        let state = self.state.read();
        let cursor = state
            .idr
            .unwrap_or(state.head + state.frames.len() as u64);
        RingReader {
            state: self.state.clone(),
            cursor,
        }
    }
}

/// A non-blocking cursor over a [`FrameRing`]
pub struct RingReader {
    state: Arc<RwLock<RingState>>,
    cursor: u64,
}

impl RingReader {
    /// Returns the next frame, or `None` when the reader has caught up.
    ///
    /// A reader that has been lapped by the writer resumes at the oldest
    /// retained frame.
    pub fn try_read(&mut self) -> Option<Arc<Frame>> {
        let state = self.state.read();
        if self.cursor < state.head {
            self.cursor = state.head;
        }
        let offset = (self.cursor - state.head) as usize;
        let frame = state.frames.get(offset)?.clone();
        self.cursor += 1;
        Some(frame)
    }
}
