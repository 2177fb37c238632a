//! Workflow Definition Module
//!
//! Data structures for defining workflows and the state they carry through
//! a run.
//!
//! # Structure
//!
//! - [`model`]: the owned [`Workflow`] and its builder/control API
//! - [`step`]: step bodies and descriptors
//! - [`registry`]: per-scope step lists and registration rules
//! - [`context`]: key/value store shared by every step
//! - [`state`]: lifecycle status and run outcome

pub mod context;
pub mod model;
pub mod registry;
pub mod state;
pub mod step;

pub use context::{is_truthy, Context, NORMAL_ERROR_KEY};
pub use model::Workflow;
pub use registry::Registry;
pub use state::{CleanupFailure, RunOutcome, WorkflowStatus};
pub use step::{
    ExecutionMode, NamedBody, ProcessCommand, Scope, StepBody, StepDescriptor, StepKind,
    StepPolicy,
};
