//! Built-in tasks.
//!
//! Both the API (for eager validation) and the worker (for execution) build
//! the same registry from [`default_registry`], so a task name accepted at
//! submission is always resolvable by the worker.

use std::time::Duration;

use serde_json::{json, Number, Value};
use tracing::debug;

use taskq_queue::{RegistryError, TaskArgs, TaskError, TaskRegistry, TaskRegistryBuilder, TaskResult, TaskSignature};

/// Longest sleep the `sleep` task accepts.
pub const MAX_SLEEP_SECS: f64 = 300.0;

/// Registry with every built-in task.
pub fn default_registry() -> Result<TaskRegistry, RegistryError> {
    Ok(register_builtin(TaskRegistry::builder())?.build())
}

/// Add the built-in tasks to an existing builder.
pub fn register_builtin(builder: TaskRegistryBuilder) -> Result<TaskRegistryBuilder, RegistryError> {
    builder
        .register_fn("add", TaskSignature::new().required("a").required("b"), |args| async move { add(&args) })?
        .register_fn("echo", TaskSignature::new().required("value"), |args| async move {
            args.get::<Value>("value")
        })?
        .register_fn(
            "concat",
            TaskSignature::new()
                .required("parts")
                .with_default("separator", json!("")),
            |args| async move { concat(&args) },
        )?
        .register_fn("sleep", TaskSignature::new().required("seconds"), |args| async move {
            sleep(args).await
        })?
        .register_fn(
            "fail",
            TaskSignature::new().with_default("message", json!("task failed")),
            fail,
        )
}

/// Sum two numbers, staying integral when both inputs are.
fn add(args: &TaskArgs) -> TaskResult<Value> {
    let a: Number = args.get("a")?;
    let b: Number = args.get("b")?;

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Ok(json!(sum));
        }
    }

    let (x, y) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
    Number::from_f64(x + y)
        .map(Value::Number)
        .ok_or_else(|| TaskError::failed("sum is not a finite number"))
}

fn concat(args: &TaskArgs) -> TaskResult<Value> {
    let parts: Vec<Value> = args.get("parts")?;
    let separator: String = args.get("separator")?;

    let joined = parts
        .iter()
        .map(|part| match part {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(&separator);
    Ok(Value::String(joined))
}

async fn sleep(args: TaskArgs) -> TaskResult<Value> {
    let seconds: f64 = args.get("seconds")?;
    if !(0.0..=MAX_SLEEP_SECS).contains(&seconds) {
        return Err(TaskError::invalid_argument(
            "seconds",
            format!("must be between 0 and {}", MAX_SLEEP_SECS),
        ));
    }

    debug!("Sleeping for {}s", seconds);
    tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
    Ok(json!(seconds))
}

async fn fail(args: TaskArgs) -> TaskResult<Value> {
    let message: String = args.get("message")?;
    Err(TaskError::failed(message))
}
