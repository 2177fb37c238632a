//! Workflow Execution Module
//!
//! The engine that drives a run, plus the pieces it is built from.
//!
//! # Architecture
//!
//! - [`engine`]: NORMAL → ERROR → EXIT state machine
//! - [`retry`]: per-attempt timeout and bounded retries
//! - [`parallel`]: cooperative, thread and process fan-out
//! - [`step`]: single-attempt body invocation
//! - [`cancel`]: shared cancellation handle

pub mod cancel;
pub mod engine;
pub mod parallel;
pub mod retry;
pub mod step;

pub use cancel::CancelHandle;
pub use engine::Engine;
pub use parallel::{MemberExecutor, ParallelExecutor};
pub use retry::{run_with_policy, PolicyOutcome, RetryPolicy};
