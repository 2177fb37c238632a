//! Stepflow - In-Process Step Orchestration Engine
//!
//! Runs an ordered set of named steps grouped into three scopes: the normal
//! flow, error handling, and guaranteed cleanup. Steps get per-step retry
//! and timeout policy, conditional branching, parallel fan-out, a shared
//! context, and cooperative cancellation.
//!
//! # Architecture
//!
//! The library is organized into five modules:
//!
//! - [`workflow`]: Step descriptors, registry, context and the `Workflow` API
//! - [`execution`]: Engine state machine, retry wrapper and parallel executors
//! - [`monitoring`]: Execution timeline
//! - [`config`]: Engine configuration (pool sizes, default timeout)
//! - [`error`]: Error taxonomy
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use serde_json::{json, Value};
//! use stepflow::error::BoxError;
//! use stepflow::workflow::{Context, ExecutionMode, NamedBody, StepBody, StepDescriptor, Workflow};
//!
//! fn connect(_ctx: Context) -> Result<Value, BoxError> {
//!     Ok(json!("conn-1"))
//! }
//!
//! fn disconnect(_ctx: Context) -> Result<Value, BoxError> {
//!     Ok(Value::Null)
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     stepflow::init_logging(false);
//!
//!     let mut workflow = Workflow::new(Context::new());
//!     workflow.add_step(
//!         StepDescriptor::simple(StepBody::blocking(connect))
//!             .timeout(Duration::from_secs(5))
//!             .retries(2),
//!     )?;
//!     workflow.add_parallel_steps(
//!         "fetch",
//!         vec![
//!             NamedBody::new("users", StepBody::blocking(|_ctx: Context| Ok(json!([1, 2])))),
//!             NamedBody::new("orders", StepBody::blocking(|_ctx: Context| Ok(json!([])))),
//!         ],
//!         ExecutionMode::Thread,
//!     )?;
//!     workflow.add_exit_step(StepDescriptor::simple(StepBody::blocking(disconnect)))?;
//!
//!     let context = workflow.run().await?.into_result()?;
//!     println!("users: {:?}", context.get("users"));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use config::{load_config, EngineConfig};
pub use error::{BoxError, StepError, StepValidationError, WorkflowError};
pub use execution::{CancelHandle, Engine};
pub use workflow::{
    Context, ExecutionMode, NamedBody, RunOutcome, StepBody, StepDescriptor, Workflow,
    WorkflowStatus,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const APP_NAME: &str = "Stepflow";

/// Configures `env_logger` with a compact format.
///
/// Warnings and errors carry a level prefix; everything else is printed
/// bare. `RUST_LOG` overrides the default level. Calling this more than
/// once is harmless.
pub fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .try_init();
}
