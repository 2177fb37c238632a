//! Workflow Model
//!
//! The owned [`Workflow`] value: registry, context, status and cancellation
//! flag, with an explicit lifecycle of build → run once → terminal.
//!
//! # Example
//!
//! ```rust,no_run
//! use serde_json::{json, Value};
//! use stepflow::error::BoxError;
//! use stepflow::workflow::{Context, StepBody, StepDescriptor, Workflow};
//!
//! fn fetch_user(_ctx: Context) -> Result<Value, BoxError> {
//!     Ok(json!({"id": 7}))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut workflow = Workflow::new(Context::new());
//!     workflow.add_step(StepDescriptor::simple(StepBody::blocking(fetch_user)).retries(2))?;
//!
//!     let outcome = workflow.run().await?;
//!     println!("{}: {:?}", outcome.status, workflow.step_value("fetch_user"));
//!     Ok(())
//! }
//! ```

use log::info;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::error::{BoxError, StepValidationError, WorkflowError};
use crate::execution::{CancelHandle, Engine};

use super::context::Context;
use super::registry::Registry;
use super::state::{RunOutcome, WorkflowStatus};
use super::step::{ExecutionMode, NamedBody, Scope, StepBody, StepDescriptor};

/// A registered set of steps plus the context they run against.
///
/// Steps may only be added while the workflow is PENDING. `run` may be
/// called once; the cancel handle may be used from any task at any time.
pub struct Workflow {
    registry: Registry,
    context: Context,
    status: WorkflowStatus,
    cancel: CancelHandle,
    engine: Engine,
}

impl Workflow {
    /// Creates a workflow with the default engine configuration.
    pub fn new(context: Context) -> Self {
        Self::with_config(context, EngineConfig::default())
    }

    pub fn with_config(context: Context, config: EngineConfig) -> Self {
        Self {
            registry: Registry::new(),
            context,
            status: WorkflowStatus::Pending,
            cancel: CancelHandle::new(),
            engine: Engine::new(config),
        }
    }

    fn register(&mut self, step: StepDescriptor) -> Result<(), StepValidationError> {
        if self.status != WorkflowStatus::Pending {
            return Err(StepValidationError::RegistrationClosed(self.status));
        }
        self.registry.register(step)
    }

    /// Registers a step in the scope set on the descriptor (NORMAL by default).
    pub fn add_step(&mut self, step: StepDescriptor) -> Result<(), StepValidationError> {
        self.register(step)
    }

    /// Registers a step that runs once when a NORMAL step fails.
    pub fn add_error_step(&mut self, step: StepDescriptor) -> Result<(), StepValidationError> {
        self.register(step.scope(Scope::Error))
    }

    /// Registers a step that always runs at the end of a run.
    pub fn add_exit_step(&mut self, step: StepDescriptor) -> Result<(), StepValidationError> {
        self.register(step.scope(Scope::Exit))
    }

    /// Registers a NORMAL conditional step.
    ///
    /// Each branch is one [`NamedBody`] or a `Vec` of them run in order.
    pub fn add_cond_step(
        &mut self,
        name: impl Into<String>,
        condition: StepBody,
        on_true: impl Into<Vec<NamedBody>>,
        on_false: impl Into<Vec<NamedBody>>,
    ) -> Result<(), StepValidationError> {
        self.register(StepDescriptor::conditional(name, condition, on_true, on_false))
    }

    /// Registers a NORMAL conditional step that branches on the result of the
    /// previously registered NORMAL step.
    ///
    /// The condition reads the first context entry the previous step wrote:
    /// its own name, a branch step, a member, or its fallback.
    pub fn add_cond_step_on_previous(
        &mut self,
        name: impl Into<String>,
        on_true: impl Into<Vec<NamedBody>>,
        on_false: impl Into<Vec<NamedBody>>,
    ) -> Result<(), StepValidationError> {
        let previous = self
            .registry
            .last(Scope::Normal)
            .ok_or(StepValidationError::NoPreviousStep(Scope::Normal))?;

        let mut keys = vec![previous.name().to_string()];
        keys.extend(previous.result_keys().into_iter().map(str::to_string));

        let condition = StepBody::blocking(move |ctx: Context| -> Result<Value, BoxError> {
            Ok(keys
                .iter()
                .find_map(|key| ctx.get(key).cloned())
                .unwrap_or(Value::Null))
        });
        self.add_cond_step(name, condition, on_true, on_false)
    }

    /// Registers a NORMAL parallel step.
    pub fn add_parallel_steps(
        &mut self,
        name: impl Into<String>,
        members: Vec<NamedBody>,
        mode: ExecutionMode,
    ) -> Result<(), StepValidationError> {
        self.register(StepDescriptor::parallel(name, members).mode(mode))
    }

    /// Requests cancellation. Idempotent; observed by the NORMAL scope only.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Handle for cancelling the run from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Context entry written by a registered step, branch, member or fallback.
    pub fn step_value(&self, name: &str) -> Option<&Value> {
        if self.registry.writes_key(name) {
            self.context.get(name)
        } else {
            None
        }
    }

    /// Runs the workflow once.
    ///
    /// Every terminal status is reported as `Ok`; use
    /// [`RunOutcome::into_result`] to turn FAILED or CANCELLED into an error.
    pub async fn run(&mut self) -> Result<RunOutcome, WorkflowError> {
        self.run_with(std::iter::empty::<(String, Value)>()).await
    }

    /// Runs the workflow once after merging `overrides` into the context.
    pub async fn run_with<K, V, I>(&mut self, overrides: I) -> Result<RunOutcome, WorkflowError>
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        if self.status != WorkflowStatus::Pending {
            return Err(WorkflowError::AlreadyRun(self.status));
        }
        self.status = WorkflowStatus::Running;
        self.context.merge(overrides);

        info!("Running workflow ({} steps registered)", self.registry.len());
        let context = std::mem::take(&mut self.context);
        let outcome = self
            .engine
            .run(&self.registry, context, &self.cancel.token())
            .await;

        self.status = outcome.status;
        self.context = outcome.context.clone();
        Ok(outcome)
    }
}

impl Default for Workflow {
    fn default() -> Self {
        Self::new(Context::new())
    }
}
