//! Pooled byte buffers with power-of-two size classes.
//!
//! Segment buffers churn at a steady rate (one allocation per cut, one
//! release per eviction), so the segmenter and the puller each own a
//! [`BytesPool`] and recycle storage instead of round-tripping through the
//! allocator. A [`PooledBuf`] returns its storage to the originating pool
//! when dropped.

use bytes::BytesMut;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Smallest size class handed out by the pool (4 KiB)
const MIN_CLASS_SHIFT: u32 = 12;
/// Largest size class retained by the pool (4 MiB)
const MAX_CLASS_SHIFT: u32 = 22;
const CLASS_COUNT: usize = (MAX_CLASS_SHIFT - MIN_CLASS_SHIFT + 1) as usize;
/// Retained free buffers per size class
const CLASS_DEPTH: usize = 16;

struct PoolInner {
    classes: [Mutex<Vec<BytesMut>>; CLASS_COUNT],
}

/// A pool of reusable byte buffers keyed by power-of-two capacity classes.
///
/// Requests are rounded up to the next size class; requests larger than the
/// largest class are served with a one-shot allocation that is not retained
/// on drop.
#[derive(Clone)]
pub struct BytesPool {
    inner: Arc<PoolInner>,
}

impl BytesPool {
    /// Creates an empty pool
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolInner {
                classes: std::array::from_fn(|_| Mutex::new(Vec::new())),
            }),
        }
    }

    /// Returns a cleared buffer with capacity for at least `size` bytes
    pub fn get(&self, size: usize) -> PooledBuf {
        match class_index(size) {
            Some(class) => {
                let buf = self.inner.classes[class].lock().pop().unwrap_or_else(|| {
                    BytesMut::with_capacity(1usize << (MIN_CLASS_SHIFT + class as u32))
                });
                PooledBuf {
                    buf,
                    pool: Some(self.clone()),
                }
            }
            None => PooledBuf {
                buf: BytesMut::with_capacity(size),
                pool: None,
            },
        }
    }

    fn recycle(&self, mut buf: BytesMut) {
        let Some(class) = class_index(buf.capacity()) else {
            return;
        };
        // A grown buffer is filed under the class its capacity still fits
        let class = if buf.capacity() < (1usize << (MIN_CLASS_SHIFT + class as u32)) {
            match class.checked_sub(1) {
                Some(c) => c,
                None => return,
            }
        } else {
            class
        };
        buf.clear();
        let mut free = self.inner.classes[class].lock();
        if free.len() < CLASS_DEPTH {
            free.push(buf);
        }
    }
}

impl Default for BytesPool {
    fn default() -> Self {
        Self::new()
    }
}

fn class_index(size: usize) -> Option<usize> {
    let size = size.max(1);
    let shift = usize::BITS - (size - 1).leading_zeros();
    let shift = shift.max(MIN_CLASS_SHIFT);
    if shift > MAX_CLASS_SHIFT {
        None
    } else {
        Some((shift - MIN_CLASS_SHIFT) as usize)
    }
}

/// A byte buffer borrowed from a [`BytesPool`].
///
/// Dereferences to [`BytesMut`]; dropping the value returns the storage to
/// the pool's matching size class.
pub struct PooledBuf {
    buf: BytesMut,
    pool: Option<BytesPool>,
}

impl Deref for PooledBuf {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.recycle(std::mem::take(&mut self.buf));
        }
    }
}

impl std::fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuf")
            .field("len", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .finish()
    }
}
