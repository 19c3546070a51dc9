//! Graph visualization: render a [`CompiledGraph`] as DOT, Mermaid, or plain
//! ASCII.
//!
//! Useful for debugging edge routing and branch wiring, or for dropping a
//! diagram into documentation. All three renderers walk the same frozen
//! [`CompiledGraph`] the scheduler runs, so what you see matches what
//! actually executes — including edges the type-inference fixpoint added
//! coercions for.

use std::collections::HashSet;

use crate::graph::{CompiledGraph, END, START};

/// Output format for [`visualize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizationFormat {
    /// DOT format for Graphviz.
    Dot,
    /// Mermaid diagram format.
    Mermaid,
    /// Plain ASCII art for terminal output.
    Ascii,
}

/// Rendering options.
#[derive(Debug, Clone)]
pub struct VisualizationOptions {
    /// Output format.
    pub format: VisualizationFormat,
    /// Graph title/label, if any.
    pub title: Option<String>,
}

impl VisualizationOptions {
    /// DOT format, no title.
    pub fn dot() -> Self {
        Self { format: VisualizationFormat::Dot, title: None }
    }

    /// Mermaid format, no title.
    pub fn mermaid() -> Self {
        Self { format: VisualizationFormat::Mermaid, title: None }
    }

    /// ASCII format, no title.
    pub fn ascii() -> Self {
        Self { format: VisualizationFormat::Ascii, title: None }
    }

    /// Attach a title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Render `graph` per `options`.
pub fn visualize(graph: &CompiledGraph, options: &VisualizationOptions) -> String {
    match options.format {
        VisualizationFormat::Dot => visualize_dot(graph, options),
        VisualizationFormat::Mermaid => visualize_mermaid(graph, options),
        VisualizationFormat::Ascii => visualize_ascii(graph),
    }
}

fn branch_sources(graph: &CompiledGraph) -> HashSet<&str> {
    graph.branches.keys().map(String::as_str).collect()
}

fn visualize_dot(graph: &CompiledGraph, options: &VisualizationOptions) -> String {
    let mut out = String::new();
    out.push_str("digraph G {\n");
    out.push_str("    rankdir=TB;\n");
    out.push_str("    node [shape=box, style=rounded];\n");
    if let Some(title) = &options.title {
        out.push_str("    labelloc=\"t\";\n");
        out.push_str(&format!("    label=\"{}\";\n", escape_dot(title)));
    }
    out.push_str(&format!("    \"{START}\" [shape=circle, style=filled, fillcolor=green];\n"));
    out.push_str(&format!("    \"{END}\" [shape=circle, style=filled, fillcolor=red];\n"));

    let mut ids: Vec<&str> = graph.nodes.keys().map(String::as_str).collect();
    ids.sort();
    for id in ids {
        out.push_str(&format!("    \"{}\" [label=\"{}\"];\n", escape_dot(id), escape_dot(id)));
    }

    for edge in &graph.edges {
        let style = if edge.carries_data && !edge.carries_control { " [style=dotted]" } else { "" };
        out.push_str(&format!("    \"{}\" -> \"{}\"{};\n", escape_dot(&edge.from), escape_dot(&edge.to), style));
    }

    for (source, branches) in &graph.branches {
        for branch in branches {
            for candidate in &branch.candidates {
                out.push_str(&format!(
                    "    \"{}\" -> \"{}\" [label=\"branch\", style=dashed];\n",
                    escape_dot(source),
                    escape_dot(candidate)
                ));
            }
        }
    }

    out.push_str("}\n");
    out
}

fn visualize_mermaid(graph: &CompiledGraph, options: &VisualizationOptions) -> String {
    let mut out = String::new();
    out.push_str("graph TD\n");
    if let Some(title) = &options.title {
        out.push_str(&format!("    title[\"{}\"]\n", escape_mermaid(title)));
    }
    out.push_str(&format!("    {0}((START))\n    style {0} fill:#90EE90,stroke:#228B22\n", sanitize_id(START)));
    out.push_str(&format!("    {0}((END))\n    style {0} fill:#FFB6C1,stroke:#DC143C\n", sanitize_id(END)));

    let routers = branch_sources(graph);
    let mut ids: Vec<&str> = graph.nodes.keys().map(String::as_str).collect();
    ids.sort();
    for id in ids {
        let (open, close) = if routers.contains(id) { ("{", "}") } else { ("[", "]") };
        out.push_str(&format!("    {}{}\"{}\"{}\n", sanitize_id(id), open, escape_mermaid(id), close));
    }

    for edge in &graph.edges {
        out.push_str(&format!("    {} --> {}\n", sanitize_id(&edge.from), sanitize_id(&edge.to)));
    }
    for (source, branches) in &graph.branches {
        for branch in branches {
            for candidate in &branch.candidates {
                out.push_str(&format!("    {} -.branch.-> {}\n", sanitize_id(source), sanitize_id(candidate)));
            }
        }
    }

    out
}

fn visualize_ascii(graph: &CompiledGraph) -> String {
    let mut out = String::new();
    out.push_str("Graph Structure:\n================\n\n");
    out.push_str(&format!("{START} ->\n"));
    let mut ids: Vec<&str> = graph.nodes.keys().map(String::as_str).collect();
    ids.sort();
    for id in ids {
        out.push_str(&format!("\n[{id}]\n"));
        for edge in &graph.edges {
            if edge.from == id {
                out.push_str(&format!("  -> {}\n", edge.to));
            }
        }
        if let Some(branches) = graph.branches.get(id) {
            out.push_str("  -> (branch)\n");
            for branch in branches {
                for candidate in &branch.candidates {
                    out.push_str(&format!("     -> {candidate}\n"));
                }
            }
        }
    }
    out.push_str(&format!("\n{END}\n"));
    out
}

fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn escape_mermaid(s: &str) -> String {
    s.replace('"', "&quot;").replace('<', "&lt;").replace('>', "&gt;")
}

fn sanitize_id(s: &str) -> String {
    s.replace('-', "_").replace('.', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CompileOptions, Graph, Node};
    use crate::runnable::runnable_fn;
    use crate::types::TypeDescriptor;
    use std::sync::Arc;

    fn linear_graph() -> CompiledGraph {
        let mut graph = Graph::new(TypeDescriptor::Any, TypeDescriptor::Any);
        graph.add_node(Node::new("process", runnable_fn(Ok)));
        graph.add_edge(START, "process", true, true, None);
        graph.add_edge("process", END, true, true, None);
        graph.compile(CompileOptions::default()).unwrap()
    }

    #[test]
    fn dot_contains_nodes_and_boundaries() {
        let dot = visualize(&linear_graph(), &VisualizationOptions::dot());
        assert!(dot.contains("digraph G"));
        assert!(dot.contains("\"start\""));
        assert!(dot.contains("\"process\""));
        assert!(dot.contains("\"end\""));
    }

    #[test]
    fn mermaid_contains_nodes_and_boundaries() {
        let mermaid = visualize(&linear_graph(), &VisualizationOptions::mermaid());
        assert!(mermaid.contains("graph TD"));
        assert!(mermaid.contains("((START))"));
        assert!(mermaid.contains("process"));
        assert!(mermaid.contains("((END))"));
    }

    #[test]
    fn ascii_contains_structure_markers() {
        let ascii = visualize(&linear_graph(), &VisualizationOptions::ascii());
        assert!(ascii.contains("Graph Structure"));
        assert!(ascii.contains("process"));
    }

    #[test]
    fn mermaid_with_title_includes_it() {
        let mermaid = visualize(&linear_graph(), &VisualizationOptions::mermaid().with_title("My Graph"));
        assert!(mermaid.contains("My Graph"));
    }

    #[test]
    fn branch_sources_render_as_diamonds_and_dashed_edges() {
        let mut graph = Graph::new(TypeDescriptor::Any, TypeDescriptor::Any);
        graph.add_node(Node::new("router", runnable_fn(Ok)));
        graph.add_node(Node::new("a", runnable_fn(Ok)));
        graph.add_edge(START, "router", true, true, None);
        graph.add_edge("router", "a", true, true, None);
        graph.add_edge("a", END, true, true, None);
        graph.add_branch("router", vec!["a".to_string()], Arc::new(|_| vec!["a".to_string()]));
        let compiled = graph.compile(CompileOptions::default()).unwrap();

        let mermaid = visualize(&compiled, &VisualizationOptions::mermaid());
        assert!(mermaid.contains("router{"));
        assert!(mermaid.contains("-.branch.->"));
    }
}
