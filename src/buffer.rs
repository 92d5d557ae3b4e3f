//! Image buffers and the pools they are loaned from.
//!
//! A buffer has exactly one owner at a time. It is loaned from a
//! [`BufferPool`] by the source, moved through the pipeline queue and the
//! filter chain, handed to the sink and finally returned to the pool with
//! [`BufferPool::release`]. Nothing is returned implicitly on drop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::format::PixelFormat;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Per-buffer metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferMeta {
    /// Format of the payload.
    pub format: PixelFormat,
    /// Capture timestamp relative to stream start.
    pub captured_at: Duration,
    /// Monotonic sequence number within a stream.
    pub sequence: u64,
    /// Frame was received incomplete.
    pub damaged: bool,
}

impl BufferMeta {
    /// Metadata for a freshly captured, intact frame.
    pub fn new(format: PixelFormat) -> Self {
        Self {
            format,
            captured_at: Duration::ZERO,
            sequence: 0,
            damaged: false,
        }
    }

    /// Set the sequence number.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Set the capture timestamp.
    pub fn with_timestamp(mut self, captured_at: Duration) -> Self {
        self.captured_at = captured_at;
        self
    }
}

/// Pool slot a buffer was loaned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId {
    pool: u64,
    index: usize,
}

impl SlotId {
    /// Index of the slot inside its pool.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// An image payload plus its metadata.
#[derive(Debug)]
pub struct ImageBuffer {
    data: Vec<u8>,
    meta: BufferMeta,
    slot: Option<SlotId>,
}

impl ImageBuffer {
    /// Create a standalone buffer that does not belong to any pool.
    pub fn new(data: Vec<u8>, meta: BufferMeta) -> Self {
        Self {
            data,
            meta,
            slot: None,
        }
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable payload bytes.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Replace the payload, e.g. after a size-changing conversion.
    pub fn replace_data(&mut self, data: Vec<u8>) -> Vec<u8> {
        std::mem::replace(&mut self.data, data)
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Buffer metadata.
    pub fn meta(&self) -> &BufferMeta {
        &self.meta
    }

    /// Mutable buffer metadata.
    pub fn meta_mut(&mut self) -> &mut BufferMeta {
        &mut self.meta
    }

    /// Current payload format.
    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    /// Whether the frame arrived incomplete.
    pub fn is_damaged(&self) -> bool {
        self.meta.damaged
    }

    /// Pool slot this buffer was loaned from.
    pub fn slot(&self) -> Option<SlotId> {
        self.slot
    }
}

#[derive(Debug)]
struct PoolInner {
    free: Vec<(usize, Vec<u8>)>,
    capacity: usize,
}

/// Fixed set of reusable frame allocations.
///
/// Cloning yields another handle to the same pool. A sink hands its pool to
/// the source so captured frames land directly in sink-owned memory.
///
/// # Example
///
/// ```rust
/// use camcore::buffer::{BufferMeta, BufferPool};
/// use camcore::format::{Fourcc, Framerate, PixelFormat};
///
/// let pool = BufferPool::new(2, 16);
/// let format = PixelFormat::new(Fourcc::MONO8, 4, 4, Framerate::FPS_30);
///
/// let a = pool.acquire(BufferMeta::new(format)).unwrap();
/// let _b = pool.acquire(BufferMeta::new(format)).unwrap();
/// assert!(pool.acquire(BufferMeta::new(format)).is_none());
///
/// pool.release(a).unwrap();
/// assert_eq!(pool.available(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct BufferPool {
    id: u64,
    slot_size: usize,
    inner: Arc<Mutex<PoolInner>>,
}

impl BufferPool {
    /// Create a pool of `capacity` slots of `slot_size` bytes each.
    pub fn new(capacity: usize, slot_size: usize) -> Self {
        let free = (0..capacity)
            .rev()
            .map(|index| (index, vec![0u8; slot_size]))
            .collect();
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            slot_size,
            inner: Arc::new(Mutex::new(PoolInner { free, capacity })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loan a free slot. Returns `None` when every slot is in use.
    pub fn acquire(&self, meta: BufferMeta) -> Option<ImageBuffer> {
        let (index, data) = self.lock().free.pop()?;
        Some(ImageBuffer {
            data,
            meta,
            slot: Some(SlotId {
                pool: self.id,
                index,
            }),
        })
    }

    /// Return a loaned buffer.
    ///
    /// Buffers that belong to another pool, or to none, are handed back in
    /// the error.
    pub fn release(&self, buffer: ImageBuffer) -> Result<(), ImageBuffer> {
        match buffer.slot {
            Some(slot) if slot.pool == self.id => {
                let mut inner = self.lock();
                if inner.free.iter().any(|(index, _)| *index == slot.index) {
                    return Err(buffer);
                }
                let mut data = buffer.data;
                data.resize(self.slot_size, 0);
                inner.free.push((slot.index, data));
                Ok(())
            }
            _ => Err(buffer),
        }
    }

    /// Whether `buffer` was loaned from this pool.
    pub fn owns(&self, buffer: &ImageBuffer) -> bool {
        buffer.slot.is_some_and(|slot| slot.pool == self.id)
    }

    /// Number of free slots.
    pub fn available(&self) -> usize {
        self.lock().free.len()
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Size of each slot in bytes.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Fourcc, Framerate};

    fn meta() -> BufferMeta {
        BufferMeta::new(PixelFormat::new(Fourcc::MONO8, 8, 2, Framerate::FPS_30))
    }

    #[test]
    fn test_pool_acquire_release() {
        let pool = BufferPool::new(3, 16);
        assert_eq!(pool.available(), 3);

        let buf = pool.acquire(meta().with_sequence(7)).unwrap();
        assert_eq!(buf.len(), 16);
        assert_eq!(buf.meta().sequence, 7);
        assert_eq!(buf.slot().map(|s| s.index()), Some(0));
        assert_eq!(pool.available(), 2);

        pool.release(buf).unwrap();
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn test_pool_rejects_foreign_buffers() {
        let pool = BufferPool::new(1, 4);
        let other = BufferPool::new(1, 4);

        let standalone = ImageBuffer::new(vec![1, 2, 3], meta());
        assert!(pool.release(standalone).is_err());

        let foreign = other.acquire(meta()).unwrap();
        assert!(!pool.owns(&foreign));
        let foreign = pool.release(foreign).unwrap_err();
        other.release(foreign).unwrap();
    }

    #[test]
    fn test_release_restores_slot_size() {
        let pool = BufferPool::new(1, 8);
        let mut buf = pool.acquire(meta()).unwrap();
        buf.replace_data(vec![0; 24]);
        pool.release(buf).unwrap();
        assert_eq!(pool.acquire(meta()).unwrap().len(), 8);
    }

    #[test]
    fn test_clones_share_slots() {
        let pool = BufferPool::new(2, 4);
        let handle = pool.clone();
        let buf = handle.acquire(meta()).unwrap();
        assert_eq!(pool.available(), 1);
        assert!(pool.owns(&buf));
        pool.release(buf).unwrap();
        assert_eq!(handle.available(), 2);
    }
}
