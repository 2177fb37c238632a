//! Step Body Invocation
//!
//! Runs a single attempt of a step body:
//! - async bodies are awaited in place
//! - blocking bodies are moved onto the blocking thread pool
//! - command bodies run as a child process fed the context as JSON
//!
//! Retries, timeouts and cancellation are layered on top by
//! [`retry`](super::retry).

use std::process::Stdio;

use log::{debug, error};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::StepError;
use crate::workflow::context::Context;
use crate::workflow::step::{BodyKind, ProcessCommand, StepBody};

/// Executes one attempt of `body` against a context snapshot.
///
/// The returned future owns its inputs so it can be spawned.
pub(crate) async fn invoke(body: StepBody, ctx: Context) -> Result<Value, StepError> {
    match body.kind {
        BodyKind::Async(call) => call(ctx).await.map_err(StepError::execution),
        BodyKind::Blocking(call) => {
            match tokio::task::spawn_blocking(move || call(ctx)).await {
                Ok(result) => result.map_err(StepError::execution),
                Err(e) if e.is_panic() => Err(StepError::Execution("step body panicked".to_string())),
                Err(e) => Err(StepError::execution(e)),
            }
        }
        BodyKind::Command(command) => execute_command(&command, &ctx).await,
    }
}

/// Runs an external program with the context snapshot on stdin.
///
/// The child is killed if the attempt is abandoned (timeout or cancellation).
async fn execute_command(command: &ProcessCommand, ctx: &Context) -> Result<Value, StepError> {
    let program = &command.program;
    let payload = serde_json::to_vec(ctx)
        .map_err(|e| StepError::Execution(format!("Failed to serialize context: {}", e)))?;

    let mut cmd = Command::new(program);
    cmd.args(&command.args)
        .envs(command.env.iter().cloned())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &command.current_dir {
        cmd.current_dir(dir);
        debug!("Executing '{}' in directory: {}", program, dir.display());
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| StepError::Execution(format!("Failed to spawn '{}': {}", program, e)))?;

    let stdin = child.stdin.take();
    let feed = async move {
        if let Some(mut stdin) = stdin {
            // The child may exit without reading its input
            if let Err(e) = stdin.write_all(&payload).await {
                debug!("Could not write context to '{}': {}", program, e);
            }
        }
    };
    let (_, output) = tokio::join!(feed, child.wait_with_output());
    let output = output
        .map_err(|e| StepError::Execution(format!("Failed to wait for '{}': {}", program, e)))?;

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!("Command '{}' completed successfully", program);
        Ok(parse_output(&stdout))
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("Command '{}' failed with exit code: {:?}", program, output.status.code());
        if !stderr.trim().is_empty() {
            error!("stderr:\n{}", stderr);
        }

        Err(StepError::Execution(format!(
            "'{}' exited with code {:?}: {}",
            program,
            output.status.code(),
            stderr.trim()
        )))
    }
}

/// Parses command stdout: JSON when valid, else trimmed text, `null` when empty.
fn parse_output(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}
