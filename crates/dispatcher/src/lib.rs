//! Dispatcher - batch intake and probe execution
//!
//! A batch is checked and recorded as running under a fresh receipt, then
//! executed on a detached task by a bounded worker pool. The finished
//! record replaces the running one in the job store.

mod dispatcher;
mod progress;

pub use dispatcher::Dispatcher;
pub use progress::ProgressTracker;
