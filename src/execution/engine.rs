//! Workflow Execution Engine
//!
//! Drives one run of a registered workflow:
//! - NORMAL steps in registration order, each under its retry/timeout policy
//! - the ERROR scope, once, when a NORMAL step fails without recovery
//! - the EXIT scope, always, whatever happened before
//!
//! Cancellation is observed before and during every NORMAL attempt. A run
//! whose token is set when the NORMAL pass ends is CANCELLED and skips the
//! ERROR scope, even if a step failed on the way out. ERROR and EXIT steps
//! never see the token, and their failures are logged, recorded and
//! swallowed.

use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::StepError;
use crate::monitoring::{EventType, ExecutionTimeline};
use crate::workflow::context::{is_truthy, Context, NORMAL_ERROR_KEY};
use crate::workflow::registry::Registry;
use crate::workflow::state::{CleanupFailure, RunOutcome, WorkflowStatus};
use crate::workflow::step::{Scope, StepDescriptor, StepKind};

use super::parallel::{GroupInput, ParallelExecutor};
use super::retry::{run_with_policy, PolicyOutcome, RetryPolicy};
use super::step::invoke;

/// Context entries produced by one step, in write order.
type Entries = Vec<(String, Value)>;

/// How a NORMAL-scope pass ended.
enum NormalOutcome {
    Finished,
    Failed { step: String, err: StepError },
    Cancelled,
}

/// Workflow execution engine.
///
/// Owns the parallel executors and the engine configuration. One engine can
/// drive any number of runs, one at a time.
///
/// # Example
///
/// ```rust,no_run
/// use stepflow::config::EngineConfig;
/// use stepflow::execution::Engine;
/// use stepflow::workflow::{Context, Registry};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn demo(registry: Registry) {
/// let engine = Engine::new(EngineConfig::default());
/// let outcome = engine.run(&registry, Context::new(), &CancellationToken::new()).await;
/// println!("{}", outcome.status);
/// # }
/// ```
pub struct Engine {
    config: EngineConfig,
    parallel: ParallelExecutor,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let parallel = ParallelExecutor::new(&config);
        Self { config, parallel }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Executes every scope of `registry` against `context`.
    ///
    /// Always returns an outcome; step failures are reported through the
    /// status and the `normal_error` context entry.
    pub async fn run(
        &self,
        registry: &Registry,
        mut context: Context,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let start_time = Instant::now();
        let mut timeline = ExecutionTimeline::new();
        let mut cleanup_failures = Vec::new();

        info!(
            "Starting execution ({} normal, {} error, {} exit steps)",
            registry.steps(Scope::Normal).len(),
            registry.steps(Scope::Error).len(),
            registry.steps(Scope::Exit).len()
        );

        let normal = self
            .run_normal(registry, &mut context, cancel, &mut timeline)
            .await;

        let cancelled = cancel.is_cancelled();
        if cancelled {
            if let NormalOutcome::Failed { step, err } = &normal {
                warn!("Step '{}' failed after cancellation: {}", step, err);
            }
        }

        let status = match normal {
            _ if cancelled => WorkflowStatus::Cancelled,
            NormalOutcome::Finished => WorkflowStatus::Completed,
            NormalOutcome::Cancelled => WorkflowStatus::Cancelled,
            NormalOutcome::Failed { step, err } => {
                error!("Step '{}' failed: {}", step, err);
                context.set(NORMAL_ERROR_KEY, json!({ "step": step, "error": err.info() }));
                self.run_cleanup(
                    Scope::Error,
                    registry,
                    &mut context,
                    &mut timeline,
                    &mut cleanup_failures,
                )
                .await;
                WorkflowStatus::Failed
            }
        };

        self.run_cleanup(
            Scope::Exit,
            registry,
            &mut context,
            &mut timeline,
            &mut cleanup_failures,
        )
        .await;

        let elapsed = start_time.elapsed();
        match status {
            WorkflowStatus::Completed => {
                info!("Workflow completed in {:.2}s", elapsed.as_secs_f64())
            }
            WorkflowStatus::Cancelled => {
                warn!("Workflow cancelled after {:.2}s", elapsed.as_secs_f64())
            }
            _ => error!("Workflow failed after {:.2}s", elapsed.as_secs_f64()),
        }
        if !cleanup_failures.is_empty() {
            warn!("{} cleanup step(s) failed", cleanup_failures.len());
        }
        debug!("{}", timeline.gantt_chart());

        RunOutcome {
            status,
            context,
            timeline,
            cleanup_failures,
        }
    }

    async fn run_normal(
        &self,
        registry: &Registry,
        context: &mut Context,
        cancel: &CancellationToken,
        timeline: &mut ExecutionTimeline,
    ) -> NormalOutcome {
        let steps = registry.steps(Scope::Normal);

        for (index, step) in steps.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Cancellation requested before step '{}'", step.name());
                skip_remaining(&steps[index..], timeline);
                return NormalOutcome::Cancelled;
            }

            match self.run_step(step, context, Some(cancel), timeline).await {
                Ok(()) => {}
                Err(StepError::Cancelled) => {
                    warn!("Step '{}' interrupted by cancellation", step.name());
                    skip_remaining(&steps[index + 1..], timeline);
                    return NormalOutcome::Cancelled;
                }
                Err(err) if step.policy.continue_on_error => {
                    warn!("Step '{}' failed: {} - continuing", step.name(), err);
                    context.set(step.name(), error_marker(&err));
                }
                Err(err) => {
                    return NormalOutcome::Failed {
                        step: step.name().to_string(),
                        err,
                    };
                }
            }
        }

        NormalOutcome::Finished
    }

    /// Runs every step of a cleanup scope. Failures never stop the pass.
    async fn run_cleanup(
        &self,
        scope: Scope,
        registry: &Registry,
        context: &mut Context,
        timeline: &mut ExecutionTimeline,
        failures: &mut Vec<CleanupFailure>,
    ) {
        let steps = registry.steps(scope);
        if steps.is_empty() {
            return;
        }
        info!("Running {} {} step(s)", steps.len(), scope);

        for step in steps {
            if let Err(err) = self.run_step(step, context, None, timeline).await {
                warn!("{} step '{}' failed: {} - continuing", scope, step.name(), err);
                if step.policy.continue_on_error {
                    context.set(step.name(), error_marker(&err));
                }
                failures.push(CleanupFailure {
                    scope,
                    step: step.name().to_string(),
                    error: err.info(),
                });
            }
        }
    }

    /// Runs one step (plus its fallback) and writes its entries on success.
    async fn run_step(
        &self,
        step: &StepDescriptor,
        context: &mut Context,
        cancel: Option<&CancellationToken>,
        timeline: &mut ExecutionTimeline,
    ) -> Result<(), StepError> {
        info!("Starting {} step '{}' ({})", step.scope, step.name(), step.kind.label());
        timeline.add_event(step.name(), step.scope, EventType::Started);

        let outcome = self.execute(step, context, cancel).await;
        let err = match outcome.result {
            Ok(entries) => {
                timeline.add_event_with_attempts(
                    step.name(),
                    step.scope,
                    EventType::Completed,
                    outcome.attempts,
                );
                info!("Step '{}' completed", step.name());
                context.merge(entries);
                return Ok(());
            }
            Err(err) => err,
        };

        let fallback = match &step.fallback {
            Some(fallback) if !err.is_cancelled() => fallback,
            _ => {
                timeline.add_event_with_attempts(
                    step.name(),
                    step.scope,
                    EventType::Failed,
                    outcome.attempts,
                );
                return Err(err);
            }
        };

        warn!(
            "Step '{}' failed after {} attempt(s): {} - running fallback '{}'",
            step.name(),
            outcome.attempts,
            err,
            fallback.name
        );
        let policy = RetryPolicy::new(self.timeout_for(step), 0);
        let recovered = run_with_policy(&fallback.name, policy, cancel, || {
            invoke(fallback.body.clone(), context.clone())
        })
        .await;

        match recovered.result {
            Ok(value) => {
                timeline.add_event_with_attempts(
                    step.name(),
                    step.scope,
                    EventType::Recovered,
                    outcome.attempts,
                );
                info!("Step '{}' recovered by '{}'", step.name(), fallback.name);
                context.set(fallback.name.clone(), value);
                Ok(())
            }
            Err(fallback_err) => {
                timeline.add_event_with_attempts(
                    step.name(),
                    step.scope,
                    EventType::Failed,
                    outcome.attempts,
                );
                Err(fallback_err)
            }
        }
    }

    /// Runs the step's kind under its policy against a context snapshot.
    async fn execute(
        &self,
        step: &StepDescriptor,
        context: &Context,
        cancel: Option<&CancellationToken>,
    ) -> PolicyOutcome<Entries> {
        let policy = RetryPolicy::new(self.timeout_for(step), step.policy.retries);

        match &step.kind {
            StepKind::Simple(body) => run_with_policy(step.name(), policy, cancel, || {
                invoke(body.clone(), context.clone())
            })
            .await
            .map(|value| vec![(step.name().to_string(), value)]),

            StepKind::Conditional {
                condition,
                on_true,
                on_false,
            } => {
                run_with_policy(step.name(), policy, cancel, || {
                    let condition = condition.clone();
                    let (on_true, on_false) = (on_true.clone(), on_false.clone());
                    let mut snapshot = context.clone();
                    async move {
                        let verdict = invoke(condition, snapshot.clone()).await?;
                        let branch = if is_truthy(&verdict) { on_true } else { on_false };
                        debug!(
                            "Condition evaluated to {}; running {} branch step(s)",
                            verdict,
                            branch.len()
                        );

                        // Later branch steps see earlier results; nothing reaches
                        // the shared context unless the whole branch succeeds.
                        let mut entries = Entries::with_capacity(branch.len());
                        for named in branch {
                            let value = invoke(named.body, snapshot.clone()).await?;
                            snapshot.set(named.name.clone(), value.clone());
                            entries.push((named.name, value));
                        }
                        Ok::<_, StepError>(entries)
                    }
                })
                .await
            }

            StepKind::Parallel { members, mode } => {
                let input = GroupInput {
                    snapshot: context.clone(),
                    policy,
                    cancel: cancel.cloned(),
                };
                self.parallel.run_group(step.name(), members, *mode, input).await
            }
        }
    }

    fn timeout_for(&self, step: &StepDescriptor) -> Option<Duration> {
        step.policy.timeout.or(self.config.default_timeout)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Context value recorded for a step that failed with `continue_on_error`.
fn error_marker(err: &StepError) -> Value {
    json!({ "error": err.info() })
}

fn skip_remaining(steps: &[StepDescriptor], timeline: &mut ExecutionTimeline) {
    for step in steps {
        timeline.add_event(step.name(), step.scope, EventType::Skipped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BoxError, ErrorKind};
    use crate::workflow::step::{NamedBody, StepBody};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ok(value: Value) -> StepBody {
        StepBody::from_async(move |_ctx: Context| {
            let value = value.clone();
            async move { Ok::<_, BoxError>(value) }
        })
    }

    fn fail(message: &'static str) -> StepBody {
        StepBody::blocking(move |_ctx: Context| -> Result<Value, BoxError> { Err(message.into()) })
    }

    fn counted(counter: &Arc<AtomicUsize>) -> StepBody {
        let counter = Arc::clone(counter);
        StepBody::blocking(move |_ctx: Context| -> Result<Value, BoxError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        })
    }

    fn step(name: &str, body: StepBody) -> StepDescriptor {
        StepDescriptor::simple(body).named(name)
    }

    async fn run(registry: &Registry) -> RunOutcome {
        Engine::default()
            .run(registry, Context::new(), &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_steps_see_earlier_results() {
        let mut registry = Registry::new();
        registry.register(step("a", ok(json!(20)))).unwrap();
        registry
            .register(step(
                "b",
                StepBody::blocking(|ctx: Context| -> Result<Value, BoxError> {
                    let a = ctx.require("a")?.as_i64().unwrap_or_default();
                    Ok(json!(a + 1))
                }),
            ))
            .unwrap();

        let outcome = run(&registry).await;
        assert_eq!(outcome.status, WorkflowStatus::Completed);
        assert_eq!(outcome.context.get("b"), Some(&json!(21)));
        assert_eq!(outcome.timeline.started_in(Scope::Normal), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_continue_on_error_records_marker() {
        let error_runs = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        registry
            .register(step("flaky", fail("sample_error")).continue_on_error(true))
            .unwrap();
        registry.register(step("after", ok(json!("ran")))).unwrap();
        registry
            .register(step("on_error", counted(&error_runs)).scope(Scope::Error))
            .unwrap();

        let outcome = run(&registry).await;
        assert_eq!(outcome.status, WorkflowStatus::Completed);
        assert_eq!(
            outcome.context.get("flaky"),
            Some(&json!({"error": {"kind": "execution", "message": "sample_error"}}))
        );
        assert_eq!(outcome.context.get("after"), Some(&json!("ran")));
        assert!(!outcome.context.contains(NORMAL_ERROR_KEY));
        assert_eq!(error_runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_recovers_step() {
        let error_runs = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        registry
            .register(
                step("fetch", fail("offline"))
                    .retries(1)
                    .fallback(NamedBody::new("fetch_cached", ok(json!("cached")))),
            )
            .unwrap();
        registry.register(step("next", ok(json!(1)))).unwrap();
        registry
            .register(step("on_error", counted(&error_runs)).scope(Scope::Error))
            .unwrap();

        let outcome = run(&registry).await;
        assert_eq!(outcome.status, WorkflowStatus::Completed);
        assert_eq!(outcome.context.get("fetch_cached"), Some(&json!("cached")));
        assert!(!outcome.context.contains("fetch"));
        assert_eq!(outcome.context.get("next"), Some(&json!(1)));
        assert_eq!(error_runs.load(Ordering::SeqCst), 0);

        let recovered = outcome
            .timeline
            .get_events()
            .iter()
            .find(|e| e.event_type == EventType::Recovered)
            .unwrap();
        assert_eq!(recovered.step, "fetch");
        assert_eq!(recovered.attempts, 2);
    }

    #[tokio::test]
    async fn test_failed_fallback_escalates_under_step_name() {
        let mut registry = Registry::new();
        registry
            .register(
                step("fetch", fail("offline"))
                    .fallback(NamedBody::new("fetch_cached", fail("cache empty"))),
            )
            .unwrap();

        let outcome = run(&registry).await;
        assert_eq!(outcome.status, WorkflowStatus::Failed);
        assert_eq!(outcome.failed_step(), Some("fetch"));
        assert_eq!(outcome.failure().unwrap().message, "cache empty");
    }

    #[tokio::test]
    async fn test_default_timeout_applies_to_unbounded_steps() {
        let mut registry = Registry::new();
        registry
            .register(step(
                "slow",
                StepBody::from_async(|_ctx: Context| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Ok::<_, BoxError>(Value::Null)
                }),
            ))
            .unwrap();

        let engine =
            Engine::new(EngineConfig::default().with_default_timeout(Duration::from_millis(10)));
        let outcome = engine
            .run(&registry, Context::new(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, WorkflowStatus::Failed);
        assert_eq!(outcome.failure().unwrap().kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_cleanup_failures_are_swallowed() {
        let exit_runs = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        registry.register(step("work", ok(json!(1)))).unwrap();
        registry
            .register(step("close_db", fail("already closed")).scope(Scope::Exit))
            .unwrap();
        registry
            .register(step("remove_tmp", counted(&exit_runs)).scope(Scope::Exit))
            .unwrap();

        let outcome = run(&registry).await;
        assert_eq!(outcome.status, WorkflowStatus::Completed);
        assert_eq!(exit_runs.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.cleanup_failures.len(), 1);
        assert_eq!(outcome.cleanup_failures[0].scope, Scope::Exit);
        assert_eq!(outcome.cleanup_failures[0].step, "close_db");
        assert_eq!(outcome.cleanup_failures[0].error.message, "already closed");
    }

    #[tokio::test]
    async fn test_error_scope_failure_does_not_stop_error_pass() {
        let error_runs = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        registry.register(step("work", fail("boom"))).unwrap();
        registry
            .register(step("notify", fail("smtp down")).scope(Scope::Error))
            .unwrap();
        registry
            .register(step("rollback", counted(&error_runs)).scope(Scope::Error))
            .unwrap();

        let outcome = run(&registry).await;
        assert_eq!(outcome.status, WorkflowStatus::Failed);
        assert_eq!(error_runs.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.cleanup_failures[0].scope, Scope::Error);
        assert_eq!(outcome.timeline.started_in(Scope::Error), vec!["notify", "rollback"]);
    }

    #[tokio::test]
    async fn test_conditional_retried_as_a_unit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let condition = {
            let calls = Arc::clone(&calls);
            StepBody::blocking(move |_ctx: Context| -> Result<Value, BoxError> {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!(0))
            })
        };
        let mut registry = Registry::new();
        registry
            .register(
                StepDescriptor::conditional(
                    "gate",
                    condition,
                    NamedBody::new("yes", ok(json!("y"))),
                    NamedBody::new("no", fail("branch broke")),
                )
                .retries(1),
            )
            .unwrap();

        let outcome = run(&registry).await;
        assert_eq!(outcome.status, WorkflowStatus::Failed);
        assert_eq!(outcome.failed_step(), Some("gate"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!outcome.context.contains("yes"));
        assert!(!outcome.context.contains("no"));
    }

    #[tokio::test]
    async fn test_conditional_branch_runs_in_order() {
        let mut registry = Registry::new();
        registry
            .register(StepDescriptor::conditional(
                "gate",
                ok(json!(true)),
                vec![
                    NamedBody::new("load", ok(json!(4))),
                    NamedBody::new(
                        "double",
                        StepBody::blocking(|ctx: Context| -> Result<Value, BoxError> {
                            let load = ctx.require("load")?.as_i64().unwrap_or_default();
                            Ok(json!(load * 2))
                        }),
                    ),
                ],
                vec![NamedBody::new("skip", ok(json!("skipped")))],
            ))
            .unwrap();

        let outcome = run(&registry).await;
        assert_eq!(outcome.status, WorkflowStatus::Completed);
        assert_eq!(outcome.context.get("load"), Some(&json!(4)));
        assert_eq!(outcome.context.get("double"), Some(&json!(8)));
        assert!(!outcome.context.contains("skip"));
    }

    #[tokio::test]
    async fn test_conditional_branch_failure_writes_nothing() {
        let mut registry = Registry::new();
        registry
            .register(StepDescriptor::conditional(
                "gate",
                ok(json!("")),
                NamedBody::new("yes", ok(json!("y"))),
                vec![
                    NamedBody::new("prepare", ok(json!("ready"))),
                    NamedBody::new("apply", fail("apply broke")),
                    NamedBody::new("report", ok(json!("done"))),
                ],
            ))
            .unwrap();

        let outcome = run(&registry).await;
        assert_eq!(outcome.status, WorkflowStatus::Failed);
        assert_eq!(outcome.failed_step(), Some("gate"));
        assert_eq!(outcome.failure().unwrap().message, "apply broke");
        assert!(!outcome.context.contains("prepare"));
        assert!(!outcome.context.contains("report"));
    }

    #[tokio::test]
    async fn test_parallel_failure_writes_no_member_results() {
        let mut registry = Registry::new();
        registry
            .register(StepDescriptor::parallel(
                "fan",
                vec![
                    NamedBody::new("a", ok(json!(1))),
                    NamedBody::new("b", fail("bad member")),
                ],
            ))
            .unwrap();

        let outcome = run(&registry).await;
        assert_eq!(outcome.status, WorkflowStatus::Failed);
        assert_eq!(outcome.failed_step(), Some("fan"));
        assert_eq!(outcome.failure().unwrap().kind, ErrorKind::Parallel);
        assert!(!outcome.context.contains("a"));
    }

    #[tokio::test]
    async fn test_cancel_from_inside_a_step_skips_the_rest() {
        let cancel = CancellationToken::new();
        let exit_runs = Arc::new(AtomicUsize::new(0));
        let error_runs = Arc::new(AtomicUsize::new(0));

        let trigger = {
            let cancel = cancel.clone();
            StepBody::blocking(move |_ctx: Context| -> Result<Value, BoxError> {
                cancel.cancel();
                Ok(json!("first"))
            })
        };

        let mut registry = Registry::new();
        registry.register(step("first", trigger)).unwrap();
        registry.register(step("second", ok(json!(2)))).unwrap();
        registry.register(step("third", ok(json!(3)))).unwrap();
        registry
            .register(step("on_error", counted(&error_runs)).scope(Scope::Error))
            .unwrap();
        registry
            .register(step("on_exit", counted(&exit_runs)).scope(Scope::Exit))
            .unwrap();

        let outcome = Engine::default().run(&registry, Context::new(), &cancel).await;

        assert_eq!(outcome.status, WorkflowStatus::Cancelled);
        assert_eq!(outcome.context.get("first"), Some(&json!("first")));
        assert!(!outcome.context.contains("second"));
        assert_eq!(error_runs.load(Ordering::SeqCst), 0);
        assert_eq!(exit_runs.load(Ordering::SeqCst), 1);

        let skipped: Vec<&str> = outcome
            .timeline
            .get_events()
            .iter()
            .filter(|e| e.event_type == EventType::Skipped)
            .map(|e| e.step.as_str())
            .collect();
        assert_eq!(skipped, vec!["second", "third"]);
    }

    #[tokio::test]
    async fn test_cleanup_ignores_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut registry = Registry::new();
        registry
            .register(
                step(
                    "flush",
                    StepBody::from_async(|_ctx: Context| async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, BoxError>(json!("flushed"))
                    }),
                )
                .scope(Scope::Exit),
            )
            .unwrap();

        let outcome = Engine::default().run(&registry, Context::new(), &cancel).await;
        assert_eq!(outcome.status, WorkflowStatus::Cancelled);
        assert_eq!(outcome.context.get("flush"), Some(&json!("flushed")));
        assert!(outcome.cleanup_failures.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_then_fail_skips_error_scope() {
        let cancel = CancellationToken::new();
        let error_runs = Arc::new(AtomicUsize::new(0));
        let exit_runs = Arc::new(AtomicUsize::new(0));

        let trigger = {
            let cancel = cancel.clone();
            StepBody::blocking(move |_ctx: Context| -> Result<Value, BoxError> {
                cancel.cancel();
                Err("interrupted mid-write".into())
            })
        };

        let mut registry = Registry::new();
        registry.register(step("write", trigger)).unwrap();
        registry
            .register(step("on_error", counted(&error_runs)).scope(Scope::Error))
            .unwrap();
        registry
            .register(step("on_exit", counted(&exit_runs)).scope(Scope::Exit))
            .unwrap();

        let outcome = Engine::default().run(&registry, Context::new(), &cancel).await;
        assert_eq!(outcome.status, WorkflowStatus::Cancelled);
        assert_eq!(error_runs.load(Ordering::SeqCst), 0);
        assert_eq!(exit_runs.load(Ordering::SeqCst), 1);
        assert!(!outcome.context.contains(NORMAL_ERROR_KEY));
    }

    #[tokio::test]
    async fn test_cancel_during_last_step_keeps_its_result() {
        let cancel = CancellationToken::new();
        let trigger = {
            let cancel = cancel.clone();
            StepBody::blocking(move |_ctx: Context| -> Result<Value, BoxError> {
                cancel.cancel();
                Ok(json!("saved"))
            })
        };

        let mut registry = Registry::new();
        registry.register(step("first", ok(json!(1)))).unwrap();
        registry.register(step("last", trigger)).unwrap();

        let outcome = Engine::default().run(&registry, Context::new(), &cancel).await;
        assert_eq!(outcome.status, WorkflowStatus::Cancelled);
        assert_eq!(outcome.context.get("last"), Some(&json!("saved")));
    }
}
