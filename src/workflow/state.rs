//! Workflow Run State
//!
//! Lifecycle status of a workflow and the outcome handed back by `run`.
//! A workflow moves PENDING → RUNNING → one terminal status, once.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorInfo, WorkflowError};
use crate::monitoring::ExecutionTimeline;

use super::context::{Context, NORMAL_ERROR_KEY};
use super::step::Scope;

/// Lifecycle status of a workflow.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Cancelled,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Cancelled | WorkflowStatus::Completed | WorkflowStatus::Failed
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Cancelled => "cancelled",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A failure swallowed while running the ERROR or EXIT scope.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CleanupFailure {
    pub scope: Scope,
    pub step: String,
    pub error: ErrorInfo,
}

/// Result of a single workflow run.
#[derive(Serialize, Debug, Clone)]
pub struct RunOutcome {
    pub status: WorkflowStatus,
    pub context: Context,
    pub timeline: ExecutionTimeline,
    pub cleanup_failures: Vec<CleanupFailure>,
}

impl RunOutcome {
    /// Name of the NORMAL step whose failure triggered the ERROR scope.
    pub fn failed_step(&self) -> Option<&str> {
        self.context
            .get(NORMAL_ERROR_KEY)
            .and_then(|marker| marker.get("step"))
            .and_then(Value::as_str)
    }

    /// Error recorded for the failing NORMAL step.
    pub fn failure(&self) -> Option<ErrorInfo> {
        self.context
            .get(NORMAL_ERROR_KEY)
            .and_then(|marker| marker.get("error"))
            .and_then(|error| serde_json::from_value(error.clone()).ok())
    }

    /// Converts FAILED and CANCELLED into errors, for callers that prefer `?`.
    pub fn into_result(self) -> Result<Context, WorkflowError> {
        match self.status {
            WorkflowStatus::Completed => Ok(self.context),
            WorkflowStatus::Cancelled => Err(WorkflowError::Cancelled),
            WorkflowStatus::Failed => {
                let step = self.failed_step().unwrap_or_default().to_string();
                let error = self.failure().unwrap_or_else(|| ErrorInfo {
                    kind: crate::error::ErrorKind::Execution,
                    message: "unknown failure".to_string(),
                });
                Err(WorkflowError::StepFailed { step, error })
            }
            status => Err(WorkflowError::NotFinished(status)),
        }
    }
}
