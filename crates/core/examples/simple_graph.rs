//! A minimal linear graph: start -> double -> add_one -> end.
//!
//! Run with: cargo run --example simple_graph

use compose_core::graph::{CompileOptions, Graph, Node, END, START};
use compose_core::runnable::runnable_fn;
use compose_core::scheduler::Scheduler;
use compose_core::types::TypeDescriptor;
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Simple Graph Example ===\n");

    let mut graph = Graph::new(TypeDescriptor::Any, TypeDescriptor::Any);
    graph.add_node(Node::new(
        "double",
        runnable_fn(|v| Ok(json!(v.as_i64().unwrap_or(0) * 2))),
    ));
    graph.add_node(Node::new(
        "add_one",
        runnable_fn(|v| Ok(json!(v.as_i64().unwrap_or(0) + 1))),
    ));
    graph.add_edge(START, "double", true, true, None);
    graph.add_edge("double", "add_one", true, true, None);
    graph.add_edge("add_one", END, true, true, None);

    let compiled = graph.compile(CompileOptions::default())?;
    let scheduler = Scheduler::new(compiled);

    let output = scheduler.invoke(json!(20)).await?;
    println!("invoke(20) -> {output}");
    assert_eq!(output, json!(41));

    Ok(())
}
