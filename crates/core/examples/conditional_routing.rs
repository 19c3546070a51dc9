//! Branching: a router node picks between two downstream paths based on its
//! own output, and the unchosen path is skipped rather than run.
//!
//! Run with: cargo run --example conditional_routing

use compose_core::graph::{CompileOptions, Graph, Node, END, START};
use compose_core::runnable::runnable_fn;
use compose_core::scheduler::Scheduler;
use compose_core::types::TypeDescriptor;
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Conditional Routing Example ===\n");

    let mut graph = Graph::new(TypeDescriptor::Any, TypeDescriptor::Any);
    graph.add_node(Node::new("classify", runnable_fn(Ok)));
    graph.add_node(Node::new(
        "handle_even",
        runnable_fn(|v| Ok(json!({"path": "even", "value": v}))),
    ));
    graph.add_node(Node::new(
        "handle_odd",
        runnable_fn(|v| Ok(json!({"path": "odd", "value": v}))),
    ));

    graph.add_edge(START, "classify", true, true, None);
    graph.add_edge("classify", "handle_even", true, true, None);
    graph.add_edge("classify", "handle_odd", true, true, None);
    graph.add_edge("handle_even", END, true, true, None);
    graph.add_edge("handle_odd", END, true, true, None);

    graph.add_branch(
        "classify",
        vec!["handle_even".to_string(), "handle_odd".to_string()],
        Arc::new(|output| {
            let n = output.as_i64().unwrap_or(0);
            if n % 2 == 0 {
                vec!["handle_even".to_string()]
            } else {
                vec!["handle_odd".to_string()]
            }
        }),
    );

    let compiled = graph.compile(CompileOptions::acyclic())?;
    let scheduler = Scheduler::new(compiled);

    let output = scheduler.invoke(json!(7)).await?;
    println!("invoke(7) -> {output}");
    assert_eq!(output["path"], json!("odd"));

    Ok(())
}
