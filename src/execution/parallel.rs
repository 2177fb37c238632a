//! Parallel Fan-Out
//!
//! Runs the members of a parallel step under one of three interchangeable
//! executors, selected by [`ExecutionMode`]:
//!
//! - [`CooperativeExecutor`]: members polled together on the engine's task
//! - [`ThreadPoolExecutor`]: members spawned onto runtime worker threads
//! - [`ProcessPoolExecutor`]: members run as child processes
//!
//! All three take the same input (members plus a context snapshot) and
//! return one outcome per member, in member order. Every member is joined
//! before the group resolves; a failing member never short-circuits the rest.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{MemberFailure, StepError};
use crate::workflow::context::Context;
use crate::workflow::step::{ExecutionMode, NamedBody};

use super::retry::{run_with_policy, PolicyOutcome, RetryPolicy};
use super::step::invoke;

/// Everything a member needs to run, shared by all executors.
#[derive(Clone)]
pub struct GroupInput {
    pub snapshot: Context,
    pub policy: RetryPolicy,
    pub cancel: Option<CancellationToken>,
}

/// Runs one member under the group's retry policy.
async fn run_member(member: NamedBody, input: GroupInput) -> PolicyOutcome<Value> {
    let GroupInput {
        snapshot,
        policy,
        cancel,
    } = input;

    run_with_policy(&member.name, policy, cancel.as_ref(), || {
        invoke(member.body.clone(), snapshot.clone())
    })
    .await
}

/// A strategy for scheduling the members of a parallel step.
#[async_trait]
pub trait MemberExecutor: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    /// Runs every member and returns their outcomes in member order.
    async fn execute(&self, members: Vec<NamedBody>, input: GroupInput) -> Vec<PolicyOutcome<Value>>;
}

/// Polls all members concurrently within the caller's task.
#[derive(Debug, Default)]
pub struct CooperativeExecutor;

#[async_trait]
impl MemberExecutor for CooperativeExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Cooperative
    }

    async fn execute(&self, members: Vec<NamedBody>, input: GroupInput) -> Vec<PolicyOutcome<Value>> {
        join_all(
            members
                .into_iter()
                .map(|member| run_member(member, input.clone())),
        )
        .await
    }
}

/// Spawns each member as a runtime task, at most `size` at a time.
#[derive(Debug)]
pub struct ThreadPoolExecutor {
    permits: Arc<Semaphore>,
}

impl ThreadPoolExecutor {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }
}

#[async_trait]
impl MemberExecutor for ThreadPoolExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Thread
    }

    async fn execute(&self, members: Vec<NamedBody>, input: GroupInput) -> Vec<PolicyOutcome<Value>> {
        let handles: Vec<_> = members
            .into_iter()
            .map(|member| {
                let permits = Arc::clone(&self.permits);
                let input = input.clone();
                tokio::spawn(async move {
                    let _permit = match permits.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return PolicyOutcome {
                                result: Err(StepError::Execution("Thread pool closed".to_string())),
                                attempts: 0,
                            }
                        }
                    };
                    run_member(member, input).await
                })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => PolicyOutcome {
                    result: Err(StepError::Execution(format!("Member task failed: {}", e))),
                    attempts: 1,
                },
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}

/// Runs each member as a child process, at most `size` at a time.
///
/// Members must be command bodies; the context crosses the process boundary
/// as a JSON snapshot and only the printed result comes back.
#[derive(Debug)]
pub struct ProcessPoolExecutor {
    permits: Arc<Semaphore>,
}

impl ProcessPoolExecutor {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }
}

#[async_trait]
impl MemberExecutor for ProcessPoolExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Process
    }

    async fn execute(&self, members: Vec<NamedBody>, input: GroupInput) -> Vec<PolicyOutcome<Value>> {
        join_all(members.into_iter().map(|member| {
            let input = input.clone();
            async move {
                if !member.body.is_command() {
                    return PolicyOutcome {
                        result: Err(StepError::Execution(format!(
                            "Member '{}' is not a command and cannot run in process mode",
                            member.name
                        ))),
                        attempts: 0,
                    };
                }
                let _permit = match self.permits.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return PolicyOutcome {
                            result: Err(StepError::Execution("Process pool closed".to_string())),
                            attempts: 0,
                        }
                    }
                };
                run_member(member, input).await
            }
        }))
        .await
    }
}

/// Holds one executor per mode and merges member outcomes for the engine.
pub struct ParallelExecutor {
    cooperative: CooperativeExecutor,
    thread: ThreadPoolExecutor,
    process: ProcessPoolExecutor,
}

impl ParallelExecutor {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            cooperative: CooperativeExecutor,
            thread: ThreadPoolExecutor::new(config.thread_pool_size),
            process: ProcessPoolExecutor::new(config.process_pool_size),
        }
    }

    pub fn executor(&self, mode: ExecutionMode) -> &dyn MemberExecutor {
        match mode {
            ExecutionMode::Cooperative => &self.cooperative,
            ExecutionMode::Thread => &self.thread,
            ExecutionMode::Process => &self.process,
        }
    }

    /// Runs a parallel step and returns `(member name, value)` pairs in
    /// member order, or the combined failure once every member has joined.
    pub async fn run_group(
        &self,
        step: &str,
        members: &[NamedBody],
        mode: ExecutionMode,
        input: GroupInput,
    ) -> PolicyOutcome<Vec<(String, Value)>> {
        info!("Parallel step '{}': {} members ({} mode)", step, members.len(), mode);

        let cancel = input.cancel.clone();
        let outcomes = self.executor(mode).execute(members.to_vec(), input).await;
        let attempts = outcomes.iter().map(|o| o.attempts).max().unwrap_or(0);

        if cancel.is_some_and(|token| token.is_cancelled())
            && outcomes.iter().any(|o| matches!(o.result, Err(StepError::Cancelled)))
        {
            debug!("Parallel step '{}' observed cancellation", step);
            return PolicyOutcome {
                result: Err(StepError::Cancelled),
                attempts,
            };
        }

        let mut values = Vec::with_capacity(members.len());
        let mut failures = Vec::new();
        for (member, outcome) in members.iter().zip(outcomes) {
            match outcome.result {
                Ok(value) => values.push((member.name.clone(), value)),
                Err(error) => {
                    warn!("Parallel step '{}': member '{}' failed: {}", step, member.name, error);
                    failures.push(MemberFailure {
                        member: member.name.clone(),
                        error,
                    });
                }
            }
        }

        let result = if failures.is_empty() {
            Ok(values)
        } else {
            Err(StepError::Parallel(failures))
        };
        PolicyOutcome { result, attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::workflow::step::{ProcessCommand, StepBody};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn input(snapshot: Context) -> GroupInput {
        GroupInput {
            snapshot,
            policy: RetryPolicy::default(),
            cancel: None,
        }
    }

    fn sleeper(name: &str, millis: u64) -> NamedBody {
        let value = name.to_string();
        NamedBody::new(
            name,
            StepBody::from_async(move |_ctx: Context| {
                let value = value.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    Ok::<_, BoxError>(json!(value))
                }
            }),
        )
    }

    fn failing(name: &str) -> NamedBody {
        NamedBody::new(
            name,
            StepBody::blocking(|_ctx: Context| -> Result<Value, BoxError> { Err("member broke".into()) }),
        )
    }

    #[tokio::test]
    async fn test_cooperative_runs_members_concurrently() {
        let executor = ParallelExecutor::new(&EngineConfig::default());
        let members = vec![sleeper("a", 100), sleeper("b", 100), sleeper("c", 100)];

        let started = Instant::now();
        let outcome = executor
            .run_group("fan", &members, ExecutionMode::Cooperative, input(Context::new()))
            .await;

        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(
            outcome.result.unwrap(),
            vec![
                ("a".to_string(), json!("a")),
                ("b".to_string(), json!("b")),
                ("c".to_string(), json!("c")),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_thread_mode_joins_all_members_before_failing() {
        let finished = Arc::new(AtomicUsize::new(0));
        let slow = {
            let finished = Arc::clone(&finished);
            NamedBody::new(
                "slow",
                StepBody::blocking(move |_ctx: Context| -> Result<Value, BoxError> {
                    std::thread::sleep(Duration::from_millis(50));
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("slow"))
                }),
            )
        };

        let executor = ParallelExecutor::new(&EngineConfig::default());
        let members = vec![failing("broken"), slow, sleeper("quick", 5)];
        let outcome = executor
            .run_group("fan", &members, ExecutionMode::Thread, input(Context::new()))
            .await;

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        match outcome.result.unwrap_err() {
            StepError::Parallel(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].member, "broken");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_thread_pool_size_limits_concurrency() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let members: Vec<NamedBody> = (0..4)
            .map(|i| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                NamedBody::new(
                    format!("m{}", i),
                    StepBody::from_async(move |_ctx: Context| {
                        let running = Arc::clone(&running);
                        let peak = Arc::clone(&peak);
                        async move {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            running.fetch_sub(1, Ordering::SeqCst);
                            Ok::<_, BoxError>(Value::Null)
                        }
                    }),
                )
            })
            .collect();

        let executor = ParallelExecutor::new(&EngineConfig::default().with_thread_pool_size(1));
        let outcome = executor
            .run_group("fan", &members, ExecutionMode::Thread, input(Context::new()))
            .await;

        assert!(outcome.result.is_ok());
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_member_retries_use_group_policy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let flaky = {
            let calls = Arc::clone(&calls);
            NamedBody::new(
                "flaky",
                StepBody::blocking(move |_ctx: Context| -> Result<Value, BoxError> {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("not yet".into())
                    } else {
                        Ok(json!("ok"))
                    }
                }),
            )
        };

        let mut group_input = input(Context::new());
        group_input.policy = RetryPolicy::new(None, 2);

        let executor = ParallelExecutor::new(&EngineConfig::default());
        let outcome = executor
            .run_group("fan", &[flaky], ExecutionMode::Cooperative, group_input)
            .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result.unwrap(), vec![("flaky".to_string(), json!("ok"))]);
    }

    #[tokio::test]
    async fn test_cancelled_group() {
        let token = CancellationToken::new();
        token.cancel();

        let mut group_input = input(Context::new());
        group_input.cancel = Some(token);

        let executor = ParallelExecutor::new(&EngineConfig::default());
        let outcome = executor
            .run_group("fan", &[sleeper("a", 10)], ExecutionMode::Cooperative, group_input)
            .await;

        assert_eq!(outcome.result.unwrap_err(), StepError::Cancelled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_mode_passes_snapshot() {
        let members = vec![
            NamedBody::new("echo_ctx", StepBody::command(ProcessCommand::new("cat"))),
            NamedBody::new(
                "mutate",
                StepBody::command(ProcessCommand::new("sh").args(["-c", "cat >/dev/null; echo 5"])),
            ),
        ];

        let mut snapshot = Context::new();
        snapshot.set("seed", 1);

        let executor = ParallelExecutor::new(&EngineConfig::default());
        let outcome = executor
            .run_group("procs", &members, ExecutionMode::Process, input(snapshot))
            .await;

        let values = outcome.result.unwrap();
        assert_eq!(values[0], ("echo_ctx".to_string(), json!({"seed": 1})));
        assert_eq!(values[1], ("mutate".to_string(), json!(5)));
    }

    #[tokio::test]
    async fn test_process_mode_rejects_closures_at_runtime() {
        let executor = ParallelExecutor::new(&EngineConfig::default());
        let outcome = executor
            .run_group("procs", &[sleeper("a", 1)], ExecutionMode::Process, input(Context::new()))
            .await;

        assert!(matches!(outcome.result, Err(StepError::Parallel(_))));
    }

    #[test]
    fn test_executor_selection() {
        let executor = ParallelExecutor::new(&EngineConfig::default());
        for mode in [ExecutionMode::Cooperative, ExecutionMode::Thread, ExecutionMode::Process] {
            assert_eq!(executor.executor(mode).mode(), mode);
        }
    }
}
