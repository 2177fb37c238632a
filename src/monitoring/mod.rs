//! Run Monitoring Module
//!
//! Execution timeline recorded while a workflow runs.
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: Step start/end timing for reports and Gantt charts

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
