//! Task registry: stable task names mapped to handlers.
//!
//! The registry is built once at process start and is immutable afterwards.
//! Each handler declares a [`TaskSignature`]; submissions are bound against it
//! before anything runs, producing the named-argument bag the handler receives.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{RegistryError, TaskError, TaskResult};

/// One declared parameter of a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Declared parameter shape of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskSignature {
    params: Vec<ParamSpec>,
    accepts_extra_kwargs: bool,
}

impl TaskSignature {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required parameter.
    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            required: true,
            default: None,
        });
        self
    }

    /// Add an optional parameter that is left out of the bag when unbound.
    pub fn optional(mut self, name: impl Into<String>) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            required: false,
            default: None,
        });
        self
    }

    /// Add an optional parameter filled with `default` when unbound.
    pub fn with_default(mut self, name: impl Into<String>, default: Value) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            required: false,
            default: Some(default),
        });
        self
    }

    /// Accept keyword arguments that match no declared parameter.
    pub fn extra_kwargs(mut self) -> Self {
        self.accepts_extra_kwargs = true;
        self
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn accepts_extra_kwargs(&self) -> bool {
        self.accepts_extra_kwargs
    }

    /// Bind positional and keyword arguments to the declared parameters.
    ///
    /// Positional values fill parameters in declaration order; keywords must
    /// name a parameter not already bound. Returns a reason on mismatch.
    pub fn bind(&self, args: &[Value], kwargs: &Map<String, Value>) -> Result<TaskArgs, String> {
        if args.len() > self.params.len() {
            return Err(format!(
                "takes {} positional argument(s) but {} were given",
                self.params.len(),
                args.len()
            ));
        }

        let mut bound = Map::new();
        for (param, value) in self.params.iter().zip(args) {
            bound.insert(param.name.clone(), value.clone());
        }

        for (key, value) in kwargs {
            if bound.contains_key(key) {
                return Err(format!("got multiple values for argument '{}'", key));
            }
            if !self.accepts_extra_kwargs && !self.params.iter().any(|p| &p.name == key) {
                return Err(format!("got an unexpected keyword argument '{}'", key));
            }
            bound.insert(key.clone(), value.clone());
        }

        let missing: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required && !bound.contains_key(&p.name))
            .map(|p| p.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing required argument(s): {}", missing.join(", ")));
        }

        for param in &self.params {
            if let Some(default) = &param.default {
                bound
                    .entry(param.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }

        Ok(TaskArgs(bound))
    }
}

/// Named-argument bag handed to a task handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskArgs(Map<String, Value>);

impl TaskArgs {
    pub fn new(values: Map<String, Value>) -> Self {
        Self(values)
    }

    /// Deserialize a bound argument.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> TaskResult<T> {
        let value = self
            .0
            .get(name)
            .ok_or_else(|| TaskError::invalid_argument(name, "not provided"))?;
        serde_json::from_value(value.clone())
            .map_err(|e| TaskError::invalid_argument(name, e.to_string()))
    }

    /// Deserialize an argument that may be absent or null.
    pub fn get_opt<T: DeserializeOwned>(&self, name: &str) -> TaskResult<Option<T>> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| TaskError::invalid_argument(name, e.to_string())),
        }
    }

    pub fn raw(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }
}

/// An executable task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Declared parameter shape, checked before `call`.
    fn signature(&self) -> &TaskSignature;

    /// Run the task with already-bound arguments.
    async fn call(&self, args: TaskArgs) -> TaskResult<Value>;
}

/// Adapts an async closure into a [`TaskHandler`].
pub struct FnTask<F> {
    signature: TaskSignature,
    func: F,
}

impl<F, Fut> FnTask<F>
where
    F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult<Value>> + Send + 'static,
{
    pub fn new(signature: TaskSignature, func: F) -> Self {
        Self { signature, func }
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnTask<F>
where
    F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult<Value>> + Send + 'static,
{
    fn signature(&self) -> &TaskSignature {
        &self.signature
    }

    async fn call(&self, args: TaskArgs) -> TaskResult<Value> {
        (self.func)(args).await
    }
}

/// Public description of a registered task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDescriptor {
    pub name: String,
    pub params: Vec<ParamSpec>,
    pub accepts_extra_kwargs: bool,
}

/// Immutable mapping from task name to handler.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn builder() -> TaskRegistryBuilder {
        TaskRegistryBuilder::default()
    }

    /// Look up a handler without running it.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn TaskHandler>, RegistryError> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTask(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Resolve `name` and bind the arguments against its signature.
    pub fn validate(
        &self,
        name: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Result<TaskArgs, RegistryError> {
        let handler = self.resolve(name)?;
        handler
            .signature()
            .bind(args, kwargs)
            .map_err(|reason| RegistryError::invalid_arguments(name, reason))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Descriptors of every task, sorted by name.
    pub fn describe(&self) -> Vec<TaskDescriptor> {
        self.names()
            .into_iter()
            .filter_map(|name| {
                self.handlers.get(name).map(|handler| {
                    let signature = handler.signature();
                    TaskDescriptor {
                        name: name.to_string(),
                        params: signature.params().to_vec(),
                        accepts_extra_kwargs: signature.accepts_extra_kwargs(),
                    }
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}

/// Collects handlers at startup. Registering a name twice is an error.
#[derive(Default)]
pub struct TaskRegistryBuilder {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistryBuilder {
    pub fn register<H>(mut self, name: impl Into<String>, handler: H) -> Result<Self, RegistryError>
    where
        H: TaskHandler + 'static,
    {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(RegistryError::DuplicateTask(name));
        }
        self.handlers.insert(name, Arc::new(handler));
        Ok(self)
    }

    /// Register an async closure.
    pub fn register_fn<F, Fut>(
        self,
        name: impl Into<String>,
        signature: TaskSignature,
        func: F,
    ) -> Result<Self, RegistryError>
    where
        F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult<Value>> + Send + 'static,
    {
        self.register(name, FnTask::new(signature, func))
    }

    pub fn build(self) -> TaskRegistry {
        TaskRegistry {
            handlers: self.handlers,
        }
    }
}
