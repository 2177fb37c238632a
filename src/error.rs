//! Error Types
//!
//! Failure taxonomy for step execution, registration and whole runs.
//!
//! - [`StepError`]: outcome of an exhausted (or cancelled) step attempt
//! - [`StepValidationError`]: raised synchronously by registration calls
//! - [`WorkflowError`]: run-level misuse and the fail-loudly adapter
//! - [`ErrorInfo`]: serializable projection written into the context

use std::error::Error;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::workflow::step::Scope;
use crate::workflow::state::WorkflowStatus;

/// Error type returned by step bodies.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// A member of a parallel group that failed after its own retries.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberFailure {
    pub member: String,
    pub error: StepError,
}

/// Why a step did not produce a value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    /// An attempt exceeded its per-attempt deadline.
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The body returned an error, panicked, or its process exited non-zero.
    #[error("{0}")]
    Execution(String),

    /// One or more parallel members failed; every member was joined first.
    #[error("{} parallel member(s) failed: {}", .0.len(), summarize(.0))]
    Parallel(Vec<MemberFailure>),

    /// The run was cancelled while this step was pending or in flight.
    #[error("step cancelled")]
    Cancelled,
}

impl StepError {
    /// Builds an execution error from anything a body can fail with.
    pub fn execution(err: impl fmt::Display) -> Self {
        StepError::Execution(err.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StepError::Timeout(_) => ErrorKind::Timeout,
            StepError::Execution(_) => ErrorKind::Execution,
            StepError::Parallel(_) => ErrorKind::Parallel,
            StepError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepError::Cancelled)
    }

    pub fn info(&self) -> ErrorInfo {
        ErrorInfo {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

fn summarize(failures: &[MemberFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.member, f.error))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Coarse classification stored alongside error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Timeout,
    Execution,
    Parallel,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Execution => "execution",
            ErrorKind::Parallel => "parallel",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Serializable description of a step failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<&StepError> for ErrorInfo {
    fn from(err: &StepError) -> Self {
        err.info()
    }
}

/// Registration-time errors. Nothing is registered when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepValidationError {
    #[error("step in {0} scope has an empty name")]
    EmptyName(Scope),

    #[error("duplicate step name '{name}' in {scope} scope")]
    DuplicateName { scope: Scope, name: String },

    #[error("'{0}' is a reserved context key and cannot name a step")]
    ReservedName(String),

    #[error("parallel step '{0}' has no members")]
    EmptyParallelGroup(String),

    #[error("parallel step '{step}' has duplicate member '{member}'")]
    DuplicateMember { step: String, member: String },

    #[error("conditional step '{0}' has an empty branch")]
    EmptyBranch(String),

    #[error("conditional step '{step}' repeats '{name}' within one branch")]
    DuplicateBranch { step: String, name: String },

    #[error("parallel step '{step}' runs in process mode but member '{member}' is not a command")]
    ProcessModeRequiresCommand { step: String, member: String },

    #[error("invalid execution mode '{0}' (expected cooperative, thread or process)")]
    InvalidExecutionMode(String),

    #[error("no previous step in {0} scope to branch on")]
    NoPreviousStep(Scope),

    #[error("workflow is {0}; steps can only be added before run")]
    RegistrationClosed(WorkflowStatus),
}

/// Run-level errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    #[error("workflow already ran (status: {0})")]
    AlreadyRun(WorkflowStatus),

    #[error("workflow failed at step '{step}': {error}")]
    StepFailed { step: String, error: ErrorInfo },

    #[error("workflow was cancelled")]
    Cancelled,

    #[error("workflow has not finished (status: {0})")]
    NotFinished(WorkflowStatus),

    #[error(transparent)]
    Validation(#[from] StepValidationError),
}
