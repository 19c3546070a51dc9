//! # compose-core
//!
//! A typed, composable graph orchestration engine: describe a computation as
//! nodes connected by control and data edges, compile it once, and run it
//! under either of two scheduling disciplines.
//!
//! ## Layout
//!
//! - [`error`] — the [`GraphError`] taxonomy and its [`Result`] alias.
//! - [`types`] — [`TypeDescriptor`], the reflected-type substitute the
//!   compiler uses to reason about edge assignability.
//! - [`stream`] — [`StreamHandle`], the fan-out/fan-in streaming primitive
//!   every node's streaming shape is built on.
//! - [`mapping`] — the field-mapping sub-language ([`FieldPath`],
//!   [`FieldMapping`], [`MappingSet`]) attached to data edges.
//! - [`runnable`] — the [`Runnable`] adapter normalizing a node's native
//!   execution shape into invoke/stream/collect/transform.
//! - [`graph`] — [`Graph`] (the builder) and [`CompiledGraph`] (the frozen
//!   result of [`Graph::compile`]).
//! - [`scheduler`] — [`Scheduler`], which drives a [`CompiledGraph`] under
//!   either [`RunMode`], pausing at configured `interrupt_before`/
//!   `interrupt_after` points and resuming from a [`RunSnapshot`].
//! - [`tool`] — the tool-call sub-node: a [`ToolRegistry`] dispatching
//!   batches of tool calls in parallel or sequentially, with partial-failure
//!   interrupt-and-rerun semantics.
//! - [`retry`] — a retry policy nodes can attach around flaky calls.
//! - [`visualization`] — DOT/Mermaid/ASCII rendering of a [`Graph`].
//!
//! ## Quick start
//!
//! ```rust
//! use compose_core::graph::{CompileOptions, Graph, Node, END, START};
//! use compose_core::runnable::runnable_fn;
//! use compose_core::scheduler::Scheduler;
//! use compose_core::types::TypeDescriptor;
//! use serde_json::json;
//!
//! # async fn run() -> compose_core::error::Result<()> {
//! let mut graph = Graph::new(TypeDescriptor::Any, TypeDescriptor::Any);
//! graph.add_node(Node::new("double", runnable_fn(|v| Ok(json!(v.as_i64().unwrap_or(0) * 2)))));
//! graph.add_edge(START, "double", true, true, None);
//! graph.add_edge("double", END, true, true, None);
//!
//! let compiled = graph.compile(CompileOptions::default())?;
//! let scheduler = Scheduler::new(compiled);
//! let output = scheduler.invoke(json!(21)).await?;
//! assert_eq!(output, json!(42));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod graph;
pub mod mapping;
pub mod retry;
pub mod runnable;
pub mod scheduler;
pub mod stream;
pub mod tool;
pub mod types;
pub mod visualization;

pub use error::{GraphError, Result};
pub use graph::{Branch, CompileOptions, CompiledGraph, Edge, Graph, MergeConfig, Node, RunMode, END, START};
pub use mapping::{FieldMapping, FieldPath, MappingSet, PATH_SEPARATOR};
pub use retry::{RetryPolicy, RetryState};
pub use runnable::{runnable_async, runnable_fn, ConcatenationRegistry, Runnable};
pub use scheduler::{RunSnapshot, Scheduler};
pub use stream::StreamHandle;
pub use tool::{DispatchMode, Tool, ToolCall, ToolCallResult, ToolError, ToolOutput, ToolRegistry, ToolRuntime};
pub use types::{Assignability, EdgeCoercion, ScalarKind, TypeDescriptor};
pub use visualization::{visualize, VisualizationFormat, VisualizationOptions};
