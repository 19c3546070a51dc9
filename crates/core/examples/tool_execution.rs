//! Dispatching a batch of tool calls through a [`ToolRegistry`], including
//! the partial-failure case that raises an interrupt-and-rerun instead of
//! failing the whole batch.
//!
//! Run with: cargo run --example tool_execution

use compose_core::tool::{DispatchMode, Tool, ToolCall, ToolRegistry, ToolRuntime};
use compose_core::GraphError;
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Tool Execution Example ===\n");

    let mut registry = ToolRegistry::new();
    registry.register(Tool::new(
        "add",
        "Add two numbers",
        json!({
            "type": "object",
            "properties": { "a": {"type": "number"}, "b": {"type": "number"} },
            "required": ["a", "b"],
        }),
        Arc::new(|args, _runtime: Option<ToolRuntime>| {
            Box::pin(async move {
                let a = args["a"].as_f64().unwrap_or(0.0);
                let b = args["b"].as_f64().unwrap_or(0.0);
                Ok(json!(a + b))
            })
        }),
    ));
    registry.register(Tool::new(
        "flaky",
        "A tool that always fails, to demonstrate partial-batch rerun",
        json!({"type": "object"}),
        Arc::new(|_args, _runtime: Option<ToolRuntime>| {
            Box::pin(async move {
                Err(compose_core::tool::ToolError::ExecutionFailed {
                    tool: "flaky".to_string(),
                    error: "boom".to_string(),
                })
            })
        }),
    ));

    let calls = vec![
        ToolCall { id: "call-1".to_string(), name: "add".to_string(), args: json!({"a": 2, "b": 3}) },
        ToolCall { id: "call-2".to_string(), name: "flaky".to_string(), args: json!({}) },
    ];

    match registry.execute_tool_calls("tools", &calls, None, DispatchMode::Parallel).await {
        Ok(results) => println!("all calls succeeded: {results:?}"),
        Err(GraphError::InterruptAndRerun { node, reason, extra }) => {
            println!("node '{node}' needs a rerun: {reason}");
            println!("completed outputs carried forward: {extra}");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
