//! Pipeline lifecycle and buffer dispatch.
//!
//! - [`PipelineManager`]: state machine owning source, sink and filter chain
//! - [`PipelineHandle`]: cloneable producer entry point
//! - [`BufferQueue`]: FIFO shared with the worker thread
//! - [`PipelineState`]: lifecycle state
//!
//! # Example
//!
//! ```rust,ignore
//! use camcore::pipeline::{PipelineManager, PipelineState};
//! use camcore::stage::builtin_registry;
//!
//! let mut pipeline = PipelineManager::new(builtin_registry());
//! pipeline.set_source(Box::new(camera))?;
//! pipeline.set_sink(Box::new(display))?;
//! pipeline.set_video_format(format)?;
//! pipeline.set_status(PipelineState::Playing)?;
//! ```

mod manager;
mod queue;
mod state;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use manager::{PipelineConfig, PipelineHandle, PipelineManager};
pub use queue::{BufferQueue, Popped, QueueStats};
pub use state::PipelineState;

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
