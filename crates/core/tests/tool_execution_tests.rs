//! Tool registry and execution edge cases: registration, validation,
//! runtime-context propagation, and the dispatch contract around partial and
//! total batch failure.

use compose_core::tool::{DispatchMode, Tool, ToolCall, ToolError, ToolOutput, ToolRegistry, ToolRuntime};
use compose_core::GraphError;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Registering a tool with a name already in the registry overwrites the
/// previous entry rather than erroring or keeping both.
#[tokio::test]
async fn registry_duplicate_tool_names_last_write_wins() {
    let mut registry = ToolRegistry::new();

    registry.register(Tool::new(
        "calculator",
        "First calculator",
        json!({"type": "object"}),
        Arc::new(|args, _runtime| Box::pin(async move { Ok(json!({"version": 1, "result": args["x"].as_i64().unwrap() * 2})) })),
    ));
    assert!(registry.has_tool("calculator"));
    assert_eq!(registry.tool_names().len(), 1);

    registry.register(Tool::new(
        "calculator",
        "Second calculator (improved)",
        json!({"type": "object"}),
        Arc::new(|args, _runtime| Box::pin(async move { Ok(json!({"version": 2, "result": args["x"].as_i64().unwrap() * 3})) })),
    ));
    assert_eq!(registry.tool_names().len(), 1);

    let tool_call = ToolCall { id: "call_1".to_string(), name: "calculator".to_string(), args: json!({"x": 10}) };
    let result = registry.execute_tool_call(&tool_call, None).await;
    match result.output {
        ToolOutput::Success { content } => {
            assert_eq!(content["version"], 2);
            assert_eq!(content["result"], 30);
        }
        ToolOutput::Error { error, .. } => panic!("expected success, got error: {error}"),
    }
    assert_eq!(registry.get("calculator").unwrap().description, "Second calculator (improved)");
}

/// Looking up a tool that was never registered returns `None`/`false`
/// without panicking, and doesn't disturb tools that do exist.
#[tokio::test]
async fn registry_get_nonexistent_tool_is_none() {
    let mut registry = ToolRegistry::new();
    registry.register(Tool::new(
        "existing_tool",
        "A tool that exists",
        json!({}),
        Arc::new(|args, _runtime| Box::pin(async move { Ok(args) })),
    ));

    assert!(registry.get("nonexistent").is_none());
    assert!(!registry.has_tool("nonexistent"));
    assert!(registry.get("existing_tool").is_some());

    let names = registry.tool_names();
    assert_eq!(names, vec!["existing_tool".to_string()]);
}

/// An empty batch dispatches to an empty result list without touching the
/// registry at all.
#[tokio::test]
async fn execute_tool_calls_empty_list_returns_empty_ok() {
    let registry = ToolRegistry::new();
    let results = registry.execute_tool_calls("node", &[], None, DispatchMode::Parallel).await.unwrap();
    assert!(results.is_empty());
}

/// When every call in a batch fails, dispatch surfaces a single
/// [`GraphError::NodeExecution`] rather than partial results — there is
/// nothing to resume since nothing succeeded.
#[tokio::test]
async fn execute_tool_calls_all_failing_is_a_hard_error() {
    let mut registry = ToolRegistry::new();
    registry.register(Tool::new(
        "fail_1",
        "Always fails",
        json!({}),
        Arc::new(|_args, _rt| Box::pin(async move { Err(ToolError::ExecutionFailed { tool: "fail_1".to_string(), error: "simulated failure 1".to_string() }) })),
    ));
    registry.register(Tool::new(
        "fail_2",
        "Also always fails",
        json!({}),
        Arc::new(|_args, _rt| Box::pin(async move { Err(ToolError::ExecutionFailed { tool: "fail_2".to_string(), error: "simulated failure 2".to_string() }) })),
    ));

    let tool_calls = vec![
        ToolCall { id: "call_1".to_string(), name: "fail_1".to_string(), args: json!({}) },
        ToolCall { id: "call_2".to_string(), name: "fail_2".to_string(), args: json!({}) },
    ];

    let err = registry
        .execute_tool_calls("node", &tool_calls, None, DispatchMode::Parallel)
        .await
        .expect_err("all calls failing should be a hard error");
    match err {
        GraphError::NodeExecution { trail, error } => {
            assert_eq!(trail, vec!["node".to_string()]);
            assert!(error.contains("simulated failure"));
        }
        other => panic!("expected NodeExecution, got {other:?}"),
    }
}

/// A batch where some calls succeed and the rest fail with the distinguished
/// [`ToolError::InterruptAndRerun`] signal raises
/// [`GraphError::InterruptAndRerun`] carrying the completed outputs and the
/// pending (rerun-requesting) call ids, instead of returning a flat
/// success/error list.
#[tokio::test]
async fn execute_tool_calls_partial_failure_interrupts_with_completed_state() {
    let mut registry = ToolRegistry::new();
    registry.register(Tool::new(
        "success",
        "Always succeeds",
        json!({}),
        Arc::new(|args, _rt| Box::pin(async move { Ok(json!({"status": "ok", "input": args})) })),
    ));
    registry.register(Tool::new(
        "rate_limited",
        "Always asks to be retried",
        json!({}),
        Arc::new(|_args, _rt| Box::pin(async move { Err(ToolError::InterruptAndRerun { tool: "rate_limited".to_string(), reason: "rate limited".to_string() }) })),
    ));

    let tool_calls = vec![
        ToolCall { id: "call_success_1".to_string(), name: "success".to_string(), args: json!({"data": "test1"}) },
        ToolCall { id: "call_failure".to_string(), name: "rate_limited".to_string(), args: json!({}) },
        ToolCall { id: "call_success_2".to_string(), name: "success".to_string(), args: json!({"data": "test2"}) },
    ];

    let err = registry
        .execute_tool_calls("node", &tool_calls, None, DispatchMode::Parallel)
        .await
        .expect_err("mixed success/rerun should interrupt");
    match err {
        GraphError::InterruptAndRerun { node, extra, .. } => {
            assert_eq!(node, "node");
            assert_eq!(extra["completed"]["call_success_1"]["status"], "ok");
            assert_eq!(extra["completed"]["call_success_2"]["status"], "ok");
            assert!(extra["completed"].get("call_failure").is_none());
            assert_eq!(extra["pending"], json!(["call_failure"]));
        }
        other => panic!("expected InterruptAndRerun, got {other:?}"),
    }
}

/// A batch where some calls succeed and one fails with an *ordinary* error
/// (not the rerun signal) fails the whole node — there's nothing resumable
/// about an ordinary failure, even alongside successes.
#[tokio::test]
async fn execute_tool_calls_partial_failure_with_ordinary_error_is_a_hard_error() {
    let mut registry = ToolRegistry::new();
    registry.register(Tool::new(
        "success",
        "Always succeeds",
        json!({}),
        Arc::new(|args, _rt| Box::pin(async move { Ok(json!({"status": "ok", "input": args})) })),
    ));
    registry.register(Tool::new(
        "failure",
        "Always fails",
        json!({}),
        Arc::new(|_args, _rt| Box::pin(async move { Err(ToolError::ExecutionFailed { tool: "failure".to_string(), error: "this tool always fails".to_string() }) })),
    ));

    let tool_calls = vec![
        ToolCall { id: "call_success".to_string(), name: "success".to_string(), args: json!({"data": "test1"}) },
        ToolCall { id: "call_failure".to_string(), name: "failure".to_string(), args: json!({}) },
    ];

    let err = registry
        .execute_tool_calls("node", &tool_calls, None, DispatchMode::Parallel)
        .await
        .expect_err("an ordinary partial failure should be a hard error");
    assert!(matches!(err, GraphError::NodeExecution { .. }), "expected NodeExecution, got {err:?}");
}

/// Tool calls run concurrently under [`DispatchMode::Parallel`]: total time
/// tracks the slowest call, not the sum of all calls.
#[tokio::test]
async fn execute_tool_calls_parallel_mode_runs_concurrently() {
    let mut registry = ToolRegistry::new();
    registry.register(Tool::new(
        "fast",
        "Completes instantly",
        json!({}),
        Arc::new(|_args, _rt| Box::pin(async move { Ok(json!({"speed": "fast"})) })),
    ));
    registry.register(Tool::new(
        "slow",
        "Takes 100ms",
        json!({}),
        Arc::new(|_args, _rt| Box::pin(async move {
            sleep(Duration::from_millis(100)).await;
            Ok(json!({"speed": "slow"}))
        })),
    ));

    let tool_calls = vec![
        ToolCall { id: "call_fast".to_string(), name: "fast".to_string(), args: json!({}) },
        ToolCall { id: "call_slow".to_string(), name: "slow".to_string(), args: json!({}) },
    ];

    let start = std::time::Instant::now();
    let results = registry.execute_tool_calls("node", &tool_calls, None, DispatchMode::Parallel).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(results.len(), 2);
    assert!(elapsed.as_millis() < 200, "parallel dispatch took {}ms, expected ~100ms", elapsed.as_millis());
}

/// [`DispatchMode::Sequential`] runs calls one at a time; total time is at
/// least the sum of each call's duration.
#[tokio::test]
async fn execute_tool_calls_sequential_mode_runs_in_order() {
    let mut registry = ToolRegistry::new();
    registry.register(Tool::new(
        "echo",
        "Returns input after an optional delay",
        json!({}),
        Arc::new(|args, _rt| Box::pin(async move {
            let delay_ms = args["delay_ms"].as_u64().unwrap_or(0);
            if delay_ms > 0 {
                sleep(Duration::from_millis(delay_ms)).await;
            }
            Ok(json!({"echo": args["value"]}))
        })),
    ));

    let tool_calls = vec![
        ToolCall { id: "call_1".to_string(), name: "echo".to_string(), args: json!({"value": "first", "delay_ms": 20}) },
        ToolCall { id: "call_2".to_string(), name: "echo".to_string(), args: json!({"value": "second", "delay_ms": 20}) },
    ];

    let start = std::time::Instant::now();
    let results = registry.execute_tool_calls("node", &tool_calls, None, DispatchMode::Sequential).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(results[0].id, "call_1");
    assert_eq!(results[1].id, "call_2");
    match &results[0].output {
        ToolOutput::Success { content } => assert_eq!(content["echo"], "first"),
        ToolOutput::Error { error, .. } => panic!("unexpected error: {error}"),
    }
    assert!(elapsed.as_millis() >= 40, "sequential dispatch should take at least 40ms, took {}ms", elapsed.as_millis());
}

/// Schema validation against an invalid JSON Schema document fails closed
/// with a descriptive [`ToolError::ValidationError`].
#[cfg(feature = "json-validation")]
#[tokio::test]
async fn tool_schema_validation_rejects_invalid_schema() {
    let tool = Tool::new(
        "bad_schema",
        "Tool with invalid schema",
        json!({"type": "invalid_type", "properties": "not_an_object"}),
        Arc::new(|args, _rt| Box::pin(async move { Ok(args) })),
    );

    let result = tool.validate_args(&json!({"key": "value"}));
    match result {
        Err(ToolError::ValidationError { tool: name, error }) => {
            assert_eq!(name, "bad_schema");
            assert!(error.to_lowercase().contains("schema"));
        }
        _ => panic!("expected ValidationError for an invalid schema"),
    }
}

/// Missing a required field fails schema validation before the executor
/// ever runs.
#[cfg(feature = "json-validation")]
#[tokio::test]
async fn tool_call_missing_required_parameter_fails_validation() {
    let mut registry = ToolRegistry::new();
    registry.register(Tool::new(
        "required_params",
        "Tool with required parameters",
        json!({"type": "object", "required": ["name", "age"], "properties": {"name": {"type": "string"}, "age": {"type": "integer"}}}),
        Arc::new(|args, _rt| Box::pin(async move { Ok(args) })),
    ));

    let tool_call = ToolCall { id: "call_1".to_string(), name: "required_params".to_string(), args: json!({"name": "Alice"}) };
    let result = registry.execute_tool_call(&tool_call, None).await;
    match result.output {
        ToolOutput::Error { error, .. } => assert!(error.contains("age") || error.contains("required")),
        ToolOutput::Success { .. } => panic!("should fail validation with a missing required parameter"),
    }
}

/// A wrong-typed argument fails schema validation with a message mentioning
/// the type mismatch.
#[cfg(feature = "json-validation")]
#[tokio::test]
async fn tool_call_wrong_argument_type_fails_validation() {
    let mut registry = ToolRegistry::new();
    registry.register(Tool::new(
        "typed_params",
        "Tool with type requirements",
        json!({"type": "object", "required": ["count"], "properties": {"count": {"type": "integer"}}}),
        Arc::new(|args, _rt| Box::pin(async move { Ok(args) })),
    ));

    let tool_call = ToolCall { id: "call_1".to_string(), name: "typed_params".to_string(), args: json!({"count": "not a number"}) };
    let result = registry.execute_tool_call(&tool_call, None).await;
    match result.output {
        ToolOutput::Error { error, .. } => {
            let lower = error.to_lowercase();
            assert!(lower.contains("type") || lower.contains("integer"));
        }
        ToolOutput::Success { .. } => panic!("should fail validation with a wrong-typed argument"),
    }
}

/// Large arguments (well past typical request sizes) are handled without
/// truncation or panic.
#[tokio::test]
async fn tool_call_handles_large_input() {
    let mut registry = ToolRegistry::new();
    registry.register(Tool::new(
        "process_data",
        "Processes data of any size",
        json!({}),
        Arc::new(|args, _rt| Box::pin(async move { Ok(json!({"processed_bytes": args.to_string().len()})) })),
    ));

    let large_string = "x".repeat(1_500_000);
    let tool_call = ToolCall {
        id: "call_large".to_string(),
        name: "process_data".to_string(),
        args: json!({"large_field": large_string, "metadata": "some metadata"}),
    };

    let result = registry.execute_tool_call(&tool_call, None).await;
    match result.output {
        ToolOutput::Success { content } => {
            assert!(content["processed_bytes"].as_u64().unwrap() > 1_000_000);
        }
        ToolOutput::Error { error, .. } => panic!("unexpected error on large input: {error}"),
    }
}

/// Dispatching a call naming a tool the registry never registered fails that
/// one call with a message listing the tools that are actually available,
/// without needing a separate lookup step.
#[tokio::test]
async fn tool_call_nonexistent_tool_reports_available_tools() {
    let mut registry = ToolRegistry::new();
    registry.register(Tool::new(
        "existing",
        "An existing tool",
        json!({}),
        Arc::new(|args, _rt| Box::pin(async move { Ok(json!({"status": "ok", "input": args})) })),
    ));

    let tool_call = ToolCall { id: "call_2".to_string(), name: "nonexistent".to_string(), args: json!({}) };
    let result = registry.execute_tool_call(&tool_call, None).await;
    match result.output {
        ToolOutput::Error { error, .. } => {
            assert!(error.contains("not found"));
            assert!(error.contains("existing"));
        }
        ToolOutput::Success { .. } => panic!("expected error for a nonexistent tool"),
    }
}

/// A [`ToolRuntime`] built with state, a call id, and config entries is
/// visible inside the executor exactly as constructed.
#[tokio::test]
async fn tool_execution_sees_runtime_context() {
    let mut registry = ToolRegistry::new();
    registry.register(Tool::new(
        "context_aware",
        "Tool that reads its runtime context",
        json!({}),
        Arc::new(|_args, runtime| Box::pin(async move {
            let rt = runtime.expect("runtime should be present");
            Ok(json!({
                "state": rt.state,
                "tool_call_id": rt.tool_call_id,
                "api_key": rt.get_config("api_key").cloned(),
            }))
        })),
    ));

    let runtime = ToolRuntime::new(json!({"user_id": 123, "session": "abc"}))
        .with_tool_call_id("test_call_id")
        .with_config("api_key", json!("secret"));

    let tool_call = ToolCall { id: "call_ctx".to_string(), name: "context_aware".to_string(), args: json!({}) };
    let result = registry.execute_tool_call(&tool_call, Some(runtime)).await;

    match result.output {
        ToolOutput::Success { content } => {
            assert_eq!(content["state"]["user_id"], 123);
            assert_eq!(content["tool_call_id"], "test_call_id");
            assert_eq!(content["api_key"], "secret");
        }
        ToolOutput::Error { error, .. } => panic!("expected success, got error: {error}"),
    }
}
