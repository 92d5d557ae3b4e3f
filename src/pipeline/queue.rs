//! Buffer queue between producers and the pipeline worker.
//!
//! The queue also holds the pipeline state: both live under one mutex and
//! share one condition variable, so a state change and the wake-up that
//! announces it can never be observed out of order.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::PipelineState;
use crate::buffer::ImageBuffer;
use crate::observability;

/// Outcome of [`BufferQueue::pop_wait`].
#[derive(Debug)]
pub enum Popped {
    /// The oldest queued buffer.
    Buffer(ImageBuffer),
    /// Nothing arrived within the wake interval; re-check and wait again.
    Timeout,
    /// The pipeline left `Playing`; the worker must exit.
    Closed,
}

/// Statistics about queue operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Current number of buffers in the queue.
    pub current_buffers: usize,
    /// Total buffers accepted.
    pub total_pushed: u64,
    /// Total buffers handed to the worker.
    pub total_popped: u64,
    /// Total buffers refused because the pipeline was not running.
    pub total_rejected: u64,
}

struct QueueState {
    status: PipelineState,
    buffers: VecDeque<ImageBuffer>,
    total_pushed: u64,
    total_popped: u64,
    total_rejected: u64,
}

struct QueueInner {
    state: Mutex<QueueState>,
    not_empty: Condvar,
}

/// Unbounded FIFO of captured buffers plus the pipeline state.
///
/// In practice the queue is bounded by the number of buffers the source's
/// pool can loan out. Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct BufferQueue {
    inner: Arc<QueueInner>,
}

impl BufferQueue {
    /// Create an empty queue in state `Undefined`.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    status: PipelineState::Undefined,
                    buffers: VecDeque::new(),
                    total_pushed: 0,
                    total_popped: 0,
                    total_rejected: 0,
                }),
                not_empty: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current pipeline state.
    pub fn status(&self) -> PipelineState {
        self.lock().status
    }

    /// Change the pipeline state and wake every waiter.
    ///
    /// Returns the previous state.
    pub fn set_status(&self, status: PipelineState) -> PipelineState {
        let mut state = self.lock();
        let previous = std::mem::replace(&mut state.status, status);
        self.inner.not_empty.notify_all();
        previous
    }

    /// Enqueue a buffer.
    ///
    /// Accepted only while `Playing` or `Paused`; otherwise the buffer is
    /// handed back so the caller can return it to its pool.
    pub fn push(&self, buffer: ImageBuffer) -> Result<(), ImageBuffer> {
        let mut state = self.lock();
        if !state.status.is_active() {
            state.total_rejected += 1;
            return Err(buffer);
        }
        state.buffers.push_back(buffer);
        state.total_pushed += 1;
        observability::record_queue_depth(state.buffers.len());
        self.inner.not_empty.notify_one();
        Ok(())
    }

    /// Wait up to `interval` for the oldest buffer.
    ///
    /// Returns [`Popped::Closed`] as soon as the state is not `Playing`,
    /// even when buffers are still queued.
    pub fn pop_wait(&self, interval: Duration) -> Popped {
        let mut state = self.lock();
        loop {
            if state.status != PipelineState::Playing {
                return Popped::Closed;
            }
            if let Some(buffer) = state.buffers.pop_front() {
                state.total_popped += 1;
                observability::record_queue_depth(state.buffers.len());
                return Popped::Buffer(buffer);
            }
            let (guard, result) = self
                .inner
                .not_empty
                .wait_timeout(state, interval)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
            if result.timed_out() && state.buffers.is_empty() {
                return if state.status == PipelineState::Playing {
                    Popped::Timeout
                } else {
                    Popped::Closed
                };
            }
        }
    }

    /// Remove every queued buffer, oldest first.
    pub fn drain(&self) -> Vec<ImageBuffer> {
        let mut state = self.lock();
        let drained: Vec<ImageBuffer> = state.buffers.drain(..).collect();
        observability::record_queue_depth(0);
        drained
    }

    /// Number of queued buffers.
    pub fn len(&self) -> usize {
        self.lock().buffers.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get statistics about the queue.
    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            current_buffers: state.buffers.len(),
            total_pushed: state.total_pushed,
            total_popped: state.total_popped,
            total_rejected: state.total_rejected,
        }
    }
}

impl Default for BufferQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferMeta;
    use crate::format::{Fourcc, Framerate, PixelFormat};
    use std::thread;
    use std::time::Instant;

    fn create_test_buffer(seq: u64) -> ImageBuffer {
        let format = PixelFormat::new(Fourcc::MONO8, 2, 2, Framerate::FPS_30);
        ImageBuffer::new(vec![0; 4], BufferMeta::new(format).with_sequence(seq))
    }

    fn expect_buffer(popped: Popped) -> ImageBuffer {
        match popped {
            Popped::Buffer(b) => b,
            other => panic!("expected buffer, got {:?}", other),
        }
    }

    #[test]
    fn test_push_rejected_unless_running() {
        let queue = BufferQueue::new();
        assert!(queue.push(create_test_buffer(0)).is_err());

        queue.set_status(PipelineState::Stopped);
        let returned = queue.push(create_test_buffer(1)).unwrap_err();
        assert_eq!(returned.meta().sequence, 1);

        queue.set_status(PipelineState::Paused);
        queue.push(create_test_buffer(2)).unwrap();
        assert_eq!(queue.stats().total_rejected, 2);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_fifo_order() {
        let queue = BufferQueue::new();
        queue.set_status(PipelineState::Playing);
        for seq in 0..5 {
            queue.push(create_test_buffer(seq)).unwrap();
        }
        for seq in 0..5 {
            let buf = expect_buffer(queue.pop_wait(Duration::from_millis(10)));
            assert_eq!(buf.meta().sequence, seq);
        }
        assert!(matches!(
            queue.pop_wait(Duration::from_millis(10)),
            Popped::Timeout
        ));
    }

    #[test]
    fn test_closed_when_not_playing() {
        let queue = BufferQueue::new();
        queue.set_status(PipelineState::Paused);
        queue.push(create_test_buffer(0)).unwrap();
        assert!(matches!(
            queue.pop_wait(Duration::from_millis(10)),
            Popped::Closed
        ));
        assert_eq!(queue.drain().len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_state_change_wakes_waiter() {
        let queue = BufferQueue::new();
        queue.set_status(PipelineState::Playing);
        let waiter = queue.clone();

        let handle = thread::spawn(move || {
            let start = Instant::now();
            let popped = waiter.pop_wait(Duration::from_secs(10));
            (popped, start.elapsed())
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.set_status(PipelineState::Stopped), PipelineState::Playing);

        let (popped, elapsed) = handle.join().unwrap();
        assert!(matches!(popped, Popped::Closed));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_queue_multithreaded() {
        let queue = BufferQueue::new();
        queue.set_status(PipelineState::Playing);
        let producer_queue = queue.clone();

        let producer = thread::spawn(move || {
            for i in 0..50 {
                producer_queue.push(create_test_buffer(i)).unwrap();
            }
        });

        let mut received = Vec::new();
        while received.len() < 50 {
            if let Popped::Buffer(buf) = queue.pop_wait(Duration::from_millis(100)) {
                received.push(buf.meta().sequence);
            }
        }
        producer.join().unwrap();
        assert_eq!(received, (0..50).collect::<Vec<_>>());
    }
}
