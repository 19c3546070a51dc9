//! Tool-call sub-node: dispatching a batch of tool calls concurrently or in
//! sequence, with partial-failure handling that pauses the run instead of
//! discarding work that already succeeded.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Tool node input: Vec<ToolCall>                           │
//! │                                                            │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐         │
//! │  │ call "a"   │  │ call "b"   │  │ call "c"   │         │
//! │  └─────┬──────┘  └─────┬──────┘  └─────┬──────┘         │
//! │        │  ToolRegistry looks up + runs each              │
//! │        ▼                ▼                ▼               │
//! │     Success          Success      Error (rerun?)         │
//! └────────┬────────────────┬────────────────┬───────────────┘
//!          │                │                │
//!          ▼                ▼                ▼
//!   any ordinary error? ── yes ──▶ GraphError::NodeExecution (whole node fails)
//!          │ no
//!          ▼
//!   any rerun-signaled error? ── yes ──▶ InterruptAndRerunExtra { completed: {a, b}, pending: [c] }
//!          │ no
//!          ▼
//!   Vec<ToolCallResult>
//! ```
//!
//! A batch failure is only resumable if *every* failing call raised the
//! distinguished [`ToolError::InterruptAndRerun`] signal; any ordinary error
//! anywhere in the batch — even alongside successes — fails the whole node
//! with a plain [`GraphError::NodeExecution`], since there's nothing useful
//! to resume from. A batch where every failure is the rerun signal raises
//! [`GraphError::InterruptAndRerun`] instead, so the caller can resume with
//! only the rerun-requesting calls re-dispatched rather than re-running
//! calls that already produced output — or, via
//! [`ToolRegistry::execute_tool_calls_resuming`], hand back a prior
//! attempt's completed results and let the already-done calls short-circuit
//! automatically.
//!
//! A registry can carry an [`ArgRewriter`] (applied to every call's
//! arguments before validation), an unknown-tool substitute executor (stands
//! in for a missing tool name instead of failing the call), and any number
//! of [`Middleware`] layers wrapping the eventual invocation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use compose_checkpoint::InterruptAndRerunExtra;

use crate::error::GraphError;

/// Tool execution result.
pub type ToolResult = Result<Value, ToolError>;

/// Future type for async tool execution.
pub type ToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;

/// Tool executor function type.
pub type ToolExecutor = Arc<dyn Fn(Value, Option<ToolRuntime>) -> ToolFuture + Send + Sync>;

/// Rewrites a call's arguments before validation and execution, given the
/// tool name being invoked.
pub type ArgRewriter = Arc<dyn Fn(&str, Value) -> Value + Send + Sync>;

/// The continuation a [`Middleware`] invokes to proceed to the next layer
/// (an inner middleware, or finally the tool's own executor).
pub type NextFn = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

/// A layer wrapping every tool invocation — logging, rate limiting, auth
/// checks, and the like. Registered middlewares nest in registration order:
/// the first registered is outermost and runs first on the way in, last on
/// the way out.
pub type Middleware = Arc<dyn Fn(Value, NextFn) -> ToolFuture + Send + Sync>;

/// Errors raised while resolving or executing an individual tool.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum ToolError {
    /// Tool not found in registry.
    #[error("tool '{0}' not found. Available tools: {1}")]
    ToolNotFound(String, String),

    /// Arguments failed schema or shape validation.
    #[error("invalid arguments for tool '{tool}': {error}")]
    InvalidArguments { tool: String, error: String },

    /// Executor function returned an error.
    #[error("tool '{tool}' execution failed: {error}")]
    ExecutionFailed { tool: String, error: String },

    /// Validation error.
    #[error("validation error for tool '{tool}': {error}")]
    ValidationError { tool: String, error: String },

    /// The distinguished signal an executor returns to ask for this call to
    /// be paused and re-dispatched later rather than treated as a hard
    /// failure — e.g. a rate limit or a transient upstream outage. Only this
    /// variant can trigger [`GraphError::InterruptAndRerun`]; every other
    /// variant fails the whole node.
    #[error("tool '{tool}' requested rerun: {reason}")]
    InterruptAndRerun { tool: String, reason: String },
}

/// Per-call context made available to a tool's executor: the current node
/// input, the call id (for correlating output back to the request), and
/// caller-supplied configuration.
#[derive(Clone)]
pub struct ToolRuntime {
    /// Value the tool node received as input (usually graph state).
    pub state: Value,
    /// Id of the tool call this execution is servicing.
    pub tool_call_id: Option<String>,
    /// Caller-supplied configuration, keyed by name.
    pub config: HashMap<String, Value>,
}

impl ToolRuntime {
    /// Create a new tool runtime context.
    pub fn new(state: Value) -> Self {
        Self {
            state,
            tool_call_id: None,
            config: HashMap::new(),
        }
    }

    /// Attach the id of the call being serviced.
    pub fn with_tool_call_id(mut self, id: impl Into<String>) -> Self {
        self.tool_call_id = Some(id.into());
        self
    }

    /// Add a configuration value.
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Look up a configuration value.
    pub fn get_config(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }
}

impl std::fmt::Debug for ToolRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRuntime")
            .field("state", &self.state)
            .field("tool_call_id", &self.tool_call_id)
            .field("config", &self.config)
            .finish()
    }
}

/// A callable tool: name, description, input schema, and executor.
pub struct Tool {
    /// Tool name, as referenced by [`ToolCall::name`].
    pub name: String,
    /// Human-readable description (surfaced to an LLM's tool-selection prompt).
    pub description: String,
    /// JSON Schema for `args`.
    pub input_schema: Value,
    /// Executor function.
    pub executor: ToolExecutor,
}

impl Tool {
    /// Create a new tool.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        executor: ToolExecutor,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            executor,
        }
    }

    /// Execute with the given arguments and runtime context.
    pub async fn execute(&self, args: Value, runtime: Option<ToolRuntime>) -> ToolResult {
        (self.executor)(args, runtime).await
    }

    /// Validate `args` against this tool's schema.
    ///
    /// Without the `json-validation` feature this only checks that `args` is
    /// a JSON object; with it, full JSON Schema validation runs via
    /// `jsonschema`.
    pub fn validate_args(&self, args: &Value) -> Result<(), ToolError> {
        if !args.is_object() {
            return Err(ToolError::ValidationError {
                tool: self.name.clone(),
                error: "arguments must be an object".to_string(),
            });
        }

        #[cfg(feature = "json-validation")]
        {
            use jsonschema::JSONSchema;

            let compiled_schema = JSONSchema::compile(&self.input_schema).map_err(|e| ToolError::ValidationError {
                tool: self.name.clone(),
                error: format!("invalid JSON Schema: {e}"),
            })?;

            if let Err(errors) = compiled_schema.validate(args) {
                let messages: Vec<String> = errors.map(|e| format!("{}: {}", e.instance_path, e)).collect();
                return Err(ToolError::ValidationError {
                    tool: self.name.clone(),
                    error: messages.join("; "),
                });
            }
        }

        #[cfg(not(feature = "json-validation"))]
        {
            tracing::debug!(tool = %self.name, "schema validation skipped (enable 'json-validation' feature)");
        }

        Ok(())
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish_non_exhaustive()
    }
}

/// A request to invoke a tool, as produced by an upstream node (typically an
/// LLM's function-call output).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Id used to correlate this call with its [`ToolCallResult`].
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments, as a JSON object.
    pub args: Value,
}

/// The result of dispatching one [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Id of the originating call.
    pub id: String,
    /// Name of the tool that ran.
    pub name: String,
    /// Success or failure output.
    pub output: ToolOutput,
}

/// Outcome of one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolOutput {
    /// The tool executed successfully.
    Success {
        /// Tool-produced content.
        content: Value,
    },
    /// The tool failed.
    Error {
        /// Error message.
        error: String,
        /// Whether this failure was the distinguished
        /// [`ToolError::InterruptAndRerun`] signal rather than an ordinary
        /// execution error.
        rerun: bool,
    },
}

impl ToolOutput {
    fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    fn is_rerun(&self) -> bool {
        matches!(self, Self::Error { rerun: true, .. })
    }
}

/// How a batch of tool calls is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Run all calls concurrently via `join_all`.
    Parallel,
    /// Run calls one at a time, in the order given.
    Sequential,
}

/// Registry of tools available to a tool node.
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
    unknown_tool_handler: Option<ToolExecutor>,
    arg_rewriter: Option<ArgRewriter>,
    middlewares: Vec<Middleware>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            unknown_tool_handler: None,
            arg_rewriter: None,
            middlewares: Vec::new(),
        }
    }

    /// Register a tool, replacing any previous tool of the same name.
    pub fn register(&mut self, tool: Tool) {
        self.tools.insert(tool.name.clone(), tool);
    }

    /// Install a fallback executor used in place of a "tool not found" error
    /// when a call names a tool this registry doesn't have.
    pub fn with_unknown_tool_handler(&mut self, handler: ToolExecutor) -> &mut Self {
        self.unknown_tool_handler = Some(handler);
        self
    }

    /// Install a rewriter applied to every call's arguments before
    /// validation and execution.
    pub fn with_arg_rewriter(&mut self, rewriter: ArgRewriter) -> &mut Self {
        self.arg_rewriter = Some(rewriter);
        self
    }

    /// Append a middleware layer wrapping every tool invocation.
    pub fn with_middleware(&mut self, middleware: Middleware) -> &mut Self {
        self.middlewares.push(middleware);
        self
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    /// Whether a tool is registered under `name`.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Names of every registered tool.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    fn build_chain(&self, executor: ToolExecutor, runtime: Option<ToolRuntime>) -> NextFn {
        let mut next: NextFn = Arc::new(move |args: Value| {
            let executor = executor.clone();
            let runtime = runtime.clone();
            executor(args, runtime)
        });
        for middleware in self.middlewares.iter().rev() {
            let middleware = middleware.clone();
            let inner = next.clone();
            next = Arc::new(move |args: Value| middleware(args, inner.clone()));
        }
        next
    }

    /// Execute a single tool call, never erroring: lookup/validation/execution
    /// failures are captured in the returned [`ToolCallResult`].
    ///
    /// Arguments pass through a registered [`ArgRewriter`] before validation.
    /// An unknown tool name falls through to the registered
    /// [`ToolRegistry::with_unknown_tool_handler`] substitute, if any, before
    /// being reported as an error. The executor that finally runs — the
    /// tool's own, or the unknown-tool substitute — is wrapped by every
    /// registered middleware.
    pub async fn execute_tool_call(&self, tool_call: &ToolCall, runtime: Option<ToolRuntime>) -> ToolCallResult {
        let args = match &self.arg_rewriter {
            Some(rewriter) => rewriter(&tool_call.name, tool_call.args.clone()),
            None => tool_call.args.clone(),
        };

        let executor = match self.get(&tool_call.name) {
            Some(tool) => {
                if let Err(e) = tool.validate_args(&args) {
                    return ToolCallResult {
                        id: tool_call.id.clone(),
                        name: tool_call.name.clone(),
                        output: ToolOutput::Error { error: e.to_string(), rerun: false },
                    };
                }
                tool.executor.clone()
            }
            None => match &self.unknown_tool_handler {
                Some(handler) => handler.clone(),
                None => {
                    return ToolCallResult {
                        id: tool_call.id.clone(),
                        name: tool_call.name.clone(),
                        output: ToolOutput::Error {
                            error: format!(
                                "tool '{}' not found. Available tools: {}",
                                tool_call.name,
                                self.tool_names().join(", ")
                            ),
                            rerun: false,
                        },
                    };
                }
            },
        };

        let chain = self.build_chain(executor, runtime);
        match chain(args).await {
            Ok(content) => ToolCallResult {
                id: tool_call.id.clone(),
                name: tool_call.name.clone(),
                output: ToolOutput::Success { content },
            },
            Err(e) => {
                let rerun = matches!(e, ToolError::InterruptAndRerun { .. });
                ToolCallResult {
                    id: tool_call.id.clone(),
                    name: tool_call.name.clone(),
                    output: ToolOutput::Error { error: e.to_string(), rerun },
                }
            }
        }
    }

    /// Dispatch a batch of tool calls from node `node`.
    ///
    /// - Every call succeeding returns `Ok(results)`.
    /// - Any call failing with an ordinary error fails the whole node with a
    ///   plain [`GraphError::NodeExecution`] — there's nothing useful to
    ///   resume from, even if other calls in the batch succeeded.
    /// - Only once every failure in the batch is the distinguished
    ///   [`ToolError::InterruptAndRerun`] signal does this raise
    ///   [`GraphError::InterruptAndRerun`], carrying an
    ///   [`InterruptAndRerunExtra`] with the successful outputs preserved and
    ///   the rerun-requesting call ids marked pending, so a caller can resume
    ///   the node re-dispatching only those.
    pub async fn execute_tool_calls(
        &self,
        node: &str,
        tool_calls: &[ToolCall],
        runtime: Option<ToolRuntime>,
        mode: DispatchMode,
    ) -> Result<Vec<ToolCallResult>, GraphError> {
        if tool_calls.is_empty() {
            return Ok(Vec::new());
        }

        let results = match mode {
            DispatchMode::Parallel => {
                use futures::future::join_all;
                let futures = tool_calls.iter().map(|tc| self.execute_tool_call(tc, runtime.clone()));
                join_all(futures).await
            }
            DispatchMode::Sequential => {
                let mut results = Vec::with_capacity(tool_calls.len());
                for tc in tool_calls {
                    results.push(self.execute_tool_call(tc, runtime.clone()).await);
                }
                results
            }
        };

        let failed_count = results.iter().filter(|r| r.output.is_error()).count();

        if failed_count == 0 {
            return Ok(results);
        }

        let non_rerun_error = results.iter().find_map(|r| match &r.output {
            ToolOutput::Error { error, rerun: false } => Some(error.clone()),
            _ => None,
        });
        if let Some(error) = non_rerun_error {
            return Err(GraphError::node_execution(node, error));
        }

        let completed: HashMap<String, Value> = results
            .iter()
            .filter_map(|r| match &r.output {
                ToolOutput::Success { content } => Some((r.id.clone(), content.clone())),
                ToolOutput::Error { .. } => None,
            })
            .collect();
        let pending: Vec<String> = results
            .iter()
            .filter(|r| r.output.is_rerun())
            .map(|r| r.id.clone())
            .collect();

        let extra = InterruptAndRerunExtra {
            node: node.to_string(),
            completed,
            pending: pending.clone(),
            reason: format!("{} of {} tool calls failed", failed_count, results.len()),
        };

        Err(GraphError::InterruptAndRerun {
            node: node.to_string(),
            reason: format!("partial tool batch failure, pending: {pending:?}"),
            extra: serde_json::to_value(&extra)?,
        })
    }

    /// Dispatch a batch of tool calls while short-circuiting any already
    /// completed in a prior attempt — the `completed` map of an
    /// [`InterruptAndRerunExtra`] recovered from a checkpoint. Calls whose id
    /// appears in `completed` are reported as successes without re-running;
    /// only the rest go through [`ToolRegistry::execute_tool_calls`]. Results
    /// come back in the same order as `tool_calls`.
    pub async fn execute_tool_calls_resuming(
        &self,
        node: &str,
        tool_calls: &[ToolCall],
        completed: &HashMap<String, Value>,
        runtime: Option<ToolRuntime>,
        mode: DispatchMode,
    ) -> Result<Vec<ToolCallResult>, GraphError> {
        let pending_calls: Vec<ToolCall> = tool_calls.iter().filter(|c| !completed.contains_key(&c.id)).cloned().collect();

        let mut by_id: HashMap<String, ToolCallResult> = tool_calls
            .iter()
            .filter_map(|c| {
                completed.get(&c.id).map(|content| {
                    (
                        c.id.clone(),
                        ToolCallResult {
                            id: c.id.clone(),
                            name: c.name.clone(),
                            output: ToolOutput::Success { content: content.clone() },
                        },
                    )
                })
            })
            .collect();

        if !pending_calls.is_empty() {
            let pending_results = self.execute_tool_calls(node, &pending_calls, runtime, mode).await?;
            for result in pending_results {
                by_id.insert(result.id.clone(), result);
            }
        }

        Ok(tool_calls
            .iter()
            .map(|c| by_id.remove(&c.id).expect("every call produced a short-circuited or dispatched result"))
            .collect())
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
