//! Step Data Model
//!
//! Step bodies and the descriptors that register them into a workflow.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use serde_json::json;
//! use stepflow::workflow::{Context, StepBody, StepDescriptor};
//!
//! let fetch = StepDescriptor::simple(StepBody::blocking(|_ctx: Context| Ok(json!({"id": 7}))))
//!     .named("fetch_user")
//!     .timeout(Duration::from_secs(2))
//!     .retries(3);
//!
//! assert_eq!(fetch.name(), "fetch_user");
//! ```

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BoxError, StepValidationError};
use crate::workflow::context::Context;

/// Phase a step belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Main flow, run in registration order
    Normal,
    /// Runs once when a NORMAL step fails without recovery
    Error,
    /// Always runs, for cleanup
    Exit,
}

impl Scope {
    pub const ALL: [Scope; 3] = [Scope::Normal, Scope::Error, Scope::Exit];
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scope::Normal => "normal",
            Scope::Error => "error",
            Scope::Exit => "exit",
        };
        f.write_str(s)
    }
}

/// How the members of a parallel step are scheduled.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Members are polled together on the engine's own task
    #[default]
    Cooperative,
    /// Each member is spawned onto the runtime's worker threads
    Thread,
    /// Each member runs as an isolated child process
    Process,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionMode::Cooperative => "cooperative",
            ExecutionMode::Thread => "thread",
            ExecutionMode::Process => "process",
        };
        f.write_str(s)
    }
}

impl FromStr for ExecutionMode {
    type Err = StepValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cooperative" => Ok(ExecutionMode::Cooperative),
            "thread" => Ok(ExecutionMode::Thread),
            "process" => Ok(ExecutionMode::Process),
            other => Err(StepValidationError::InvalidExecutionMode(other.to_string())),
        }
    }
}

/// Future returned by async step bodies.
pub type StepFuture = BoxFuture<'static, Result<Value, BoxError>>;

type AsyncFn = dyn Fn(Context) -> StepFuture + Send + Sync;
type BlockingFn = dyn Fn(Context) -> Result<Value, BoxError> + Send + Sync;

/// An external program used as a step body.
///
/// The context snapshot is written to the child's stdin as JSON. Stdout is
/// parsed as JSON when possible, otherwise kept as trimmed text.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

#[derive(Clone)]
pub(crate) enum BodyKind {
    Async(Arc<AsyncFn>),
    Blocking(Arc<BlockingFn>),
    Command(ProcessCommand),
}

/// The unit of work behind a step, branch, or parallel member.
///
/// Every body receives an owned snapshot of the context and returns the
/// value the engine records for it.
#[derive(Clone)]
pub struct StepBody {
    pub(crate) kind: BodyKind,
    origin: String,
}

impl StepBody {
    /// Wraps an async closure or function.
    pub fn from_async<F, Fut, V>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, BoxError>> + Send + 'static,
        V: Into<Value>,
    {
        let origin = std::any::type_name::<F>().to_string();
        let call = move |ctx: Context| -> StepFuture {
            let fut = f(ctx);
            async move {
                let result: Result<Value, BoxError> =
                    match AssertUnwindSafe(fut).catch_unwind().await {
                        Ok(Ok(value)) => Ok(value.into()),
                        Ok(Err(err)) => Err(err),
                        Err(_) => Err("step body panicked".into()),
                    };
                result
            }
            .boxed()
        };

        Self {
            kind: BodyKind::Async(Arc::new(call)),
            origin,
        }
    }

    /// Wraps a synchronous closure or function. It runs on the blocking pool.
    pub fn blocking<F, V>(f: F) -> Self
    where
        F: Fn(Context) -> Result<V, BoxError> + Send + Sync + 'static,
        V: Into<Value>,
    {
        let origin = std::any::type_name::<F>().to_string();
        let call = move |ctx: Context| -> Result<Value, BoxError> {
            f(ctx).map(|value| value.into())
        };

        Self {
            kind: BodyKind::Blocking(Arc::new(call)),
            origin,
        }
    }

    /// Runs an external program.
    pub fn command(command: ProcessCommand) -> Self {
        let origin = command.program.clone();
        Self {
            kind: BodyKind::Command(command),
            origin,
        }
    }

    /// Name derived from the body's identity: the last path segment of the
    /// function type, or the program name for commands.
    ///
    /// Closures all derive `{{closure}}`.
    pub fn derived_name(&self) -> String {
        let base = self.origin.split('<').next().unwrap_or(&self.origin);
        base.rsplit("::").next().unwrap_or(base).to_string()
    }

    pub fn is_command(&self) -> bool {
        matches!(self.kind, BodyKind::Command(_))
    }
}

impl fmt::Debug for StepBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            BodyKind::Async(_) => "async",
            BodyKind::Blocking(_) => "blocking",
            BodyKind::Command(_) => "command",
        };
        f.debug_struct("StepBody")
            .field("kind", &kind)
            .field("origin", &self.origin)
            .finish()
    }
}

/// A body paired with the context key its result is written under.
#[derive(Debug, Clone)]
pub struct NamedBody {
    pub name: String,
    pub body: StepBody,
}

impl NamedBody {
    pub fn new(name: impl Into<String>, body: StepBody) -> Self {
        Self {
            name: name.into().trim().to_string(),
            body,
        }
    }

    /// Uses the body's derived name.
    pub fn derived(body: StepBody) -> Self {
        let name = body.derived_name();
        Self { name, body }
    }
}

impl From<NamedBody> for Vec<NamedBody> {
    fn from(body: NamedBody) -> Self {
        vec![body]
    }
}

/// Retry, timeout and failure handling attached to a descriptor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepPolicy {
    /// Per-attempt deadline; `None` means unbounded
    pub timeout: Option<Duration>,
    /// Extra attempts after the first failure
    pub retries: u32,
    /// Record an error marker and keep going instead of escalating
    pub continue_on_error: bool,
}

/// What a descriptor runs.
#[derive(Debug, Clone)]
pub enum StepKind {
    Simple(StepBody),
    /// Each branch runs its steps in order.
    Conditional {
        condition: StepBody,
        on_true: Vec<NamedBody>,
        on_false: Vec<NamedBody>,
    },
    Parallel {
        members: Vec<NamedBody>,
        mode: ExecutionMode,
    },
}

impl StepKind {
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::Simple(_) => "simple",
            StepKind::Conditional { .. } => "conditional",
            StepKind::Parallel { .. } => "parallel",
        }
    }
}

/// The registered definition of a step.
#[derive(Debug, Clone)]
pub struct StepDescriptor {
    name: String,
    pub scope: Scope,
    pub policy: StepPolicy,
    /// Runs when the step exhausts its attempts; success recovers the step
    pub fallback: Option<NamedBody>,
    pub kind: StepKind,
}

impl StepDescriptor {
    /// A plain step named after its body unless renamed with [`named`](Self::named).
    pub fn simple(body: StepBody) -> Self {
        Self {
            name: body.derived_name(),
            scope: Scope::Normal,
            policy: StepPolicy::default(),
            fallback: None,
            kind: StepKind::Simple(body),
        }
    }

    /// Runs `condition`, then every step of exactly one branch.
    ///
    /// A branch is a single [`NamedBody`] or a `Vec` of them.
    pub fn conditional(
        name: impl Into<String>,
        condition: StepBody,
        on_true: impl Into<Vec<NamedBody>>,
        on_false: impl Into<Vec<NamedBody>>,
    ) -> Self {
        Self {
            name: name.into().trim().to_string(),
            scope: Scope::Normal,
            policy: StepPolicy::default(),
            fallback: None,
            kind: StepKind::Conditional {
                condition,
                on_true: on_true.into(),
                on_false: on_false.into(),
            },
        }
    }

    /// Fans out to `members`; defaults to cooperative scheduling.
    pub fn parallel(name: impl Into<String>, members: Vec<NamedBody>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            scope: Scope::Normal,
            policy: StepPolicy::default(),
            fallback: None,
            kind: StepKind::Parallel {
                members,
                mode: ExecutionMode::default(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into().trim().to_string();
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.policy.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.policy.retries = retries;
        self
    }

    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.policy.continue_on_error = continue_on_error;
        self
    }

    pub fn fallback(mut self, fallback: NamedBody) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Sets the execution mode of a parallel step. No effect on other kinds.
    pub fn mode(mut self, execution_mode: ExecutionMode) -> Self {
        if let StepKind::Parallel { mode, .. } = &mut self.kind {
            *mode = execution_mode;
        }
        self
    }

    /// Context keys this step can write on success or recovery.
    pub fn result_keys(&self) -> Vec<&str> {
        let mut keys = match &self.kind {
            StepKind::Simple(_) => vec![self.name.as_str()],
            StepKind::Conditional {
                on_true, on_false, ..
            } => {
                let mut keys: Vec<&str> = Vec::new();
                for named in on_true.iter().chain(on_false) {
                    if !keys.contains(&named.name.as_str()) {
                        keys.push(named.name.as_str());
                    }
                }
                keys
            }
            StepKind::Parallel { members, .. } => {
                members.iter().map(|m| m.name.as_str()).collect()
            }
        };
        if let Some(fallback) = &self.fallback {
            keys.push(fallback.name.as_str());
        }
        keys
    }
}
