//! Graph data model and compiler.
//!
//! A graph is built up by adding [`Node`]s, [`Edge`]s, and [`Branch`]es, then
//! frozen by [`Graph::compile`] into a [`CompiledGraph`] the scheduler can
//! run. Two reserved node ids, [`START`] and [`END`], denote the graph's
//! input and output boundaries; they are never added as user nodes.
//!
//! # Graph shape
//!
//! ```text
//!        start
//!          │
//!          ▼
//!       ┌─────┐   data edge, field-mapped
//!       │  A  │──────────────┐
//!       └─────┘              ▼
//!          │ control      ┌─────┐
//!          └─────────────▶│  C  │────▶ end
//!       ┌─────┐           └─────┘
//!       │  B  │──────────────┘
//!       └─────┘   data edge, whole output
//! ```
//!
//! Building never aborts on the first mistake: each mutator records the
//! first error it hits on the graph itself and becomes a no-op afterward, so
//! callers can finish describing a graph before inspecting what went wrong.
//! [`Graph::compile`] surfaces that recorded error, or runs the type-inference
//! fixpoint (§4.5) and hands back a [`CompiledGraph`].
//!
//! # Examples
//!
//! ```rust
//! use compose_core::graph::{Graph, Node, END, START};
//! use compose_core::runnable::runnable_fn;
//! use compose_core::types::TypeDescriptor;
//! use serde_json::json;
//!
//! let mut graph = Graph::new(TypeDescriptor::Any, TypeDescriptor::Any);
//! graph.add_node(Node::new("double", runnable_fn(|v| Ok(json!(v.as_i64().unwrap_or(0) * 2)))));
//! graph.add_edge(START, "double", false, true, None);
//! graph.add_edge("double", END, false, true, None);
//! let compiled = graph.compile(Default::default()).unwrap();
//! assert!(compiled.nodes.contains_key("double"));
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use crate::error::{GraphError, Result};
use crate::mapping::MappingSet;
use crate::retry::RetryPolicy;
use crate::runnable::Runnable;
use crate::types::{Assignability, EdgeCoercion, TypeDescriptor};

/// Reserved node id denoting the graph's input boundary.
pub const START: &str = "start";
/// Reserved node id denoting the graph's output boundary.
pub const END: &str = "end";

/// Default additive constant in the cyclic-mode max-steps formula
/// (`node_count + DEFAULT_MAX_STEPS_SLACK`).
pub const DEFAULT_MAX_STEPS_SLACK: u64 = 25;

/// A predicate attached to a [`Branch`]: given the source node's output,
/// returns the subset of declared candidate node ids execution should
/// continue to. Candidates not returned are marked skipped.
pub type BranchFn = Arc<dyn Fn(&Value) -> Vec<String> + Send + Sync>;

/// One node in the graph: an execution shape ([`Runnable`]) plus its
/// declared (or, for ordinary nodes, inferred) input/output types.
///
/// `start` and `end` are not represented as `Node`s — they're virtual
/// boundaries the graph tracks separately — so every `Node` here is a
/// user-added processing step.
pub struct Node {
    /// Unique id within the graph. Never `"start"` or `"end"`.
    pub id: String,
    /// The node's execution logic.
    pub runnable: Runnable,
    /// Declared input type, or `None` if it should be inferred from a
    /// neighbour (a "passthrough" node).
    pub input_type: Option<TypeDescriptor>,
    /// Declared output type, or `None` if it should be inferred.
    pub output_type: Option<TypeDescriptor>,
    /// If set, extract this single field from an incoming mapping before
    /// invoking the node, instead of passing the whole value.
    pub input_key: Option<String>,
    /// If set, wrap the node's output under this key before it's posted to
    /// successors.
    pub output_key: Option<String>,
    /// If set, the scheduler's dispatch unit retries this node's execution
    /// per this policy before surfacing a [`GraphError::NodeExecution`].
    pub retry_policy: Option<RetryPolicy>,
}

impl Node {
    /// Build a node with no declared types (a passthrough candidate).
    pub fn new(id: impl Into<String>, runnable: Runnable) -> Self {
        Self {
            id: id.into(),
            runnable,
            input_type: None,
            output_type: None,
            input_key: None,
            output_key: None,
            retry_policy: None,
        }
    }

    /// Declare this node's input type explicitly, opting it out of inference.
    pub fn with_input_type(mut self, ty: TypeDescriptor) -> Self {
        self.input_type = Some(ty);
        self
    }

    /// Declare this node's output type explicitly, opting it out of inference.
    pub fn with_output_type(mut self, ty: TypeDescriptor) -> Self {
        self.output_type = Some(ty);
        self
    }

    /// Extract a single field from the incoming mapping before invoking.
    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = Some(key.into());
        self
    }

    /// Wrap this node's output under `key` before posting it to successors.
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Attach a retry policy the scheduler's dispatch unit consults before
    /// surfacing this node's execution failures.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("input_type", &self.input_type)
            .field("output_type", &self.output_type)
            .field("input_key", &self.input_key)
            .field("output_key", &self.output_key)
            .field("has_retry_policy", &self.retry_policy.is_some())
            .finish_non_exhaustive()
    }
}

/// A directed edge between two nodes (or a boundary, `start`/`end`).
///
/// An edge carries control, data, or both — never neither. A data edge may
/// additionally carry [field mappings](crate::mapping); when it doesn't, the
/// source's whole output becomes the destination's input.
#[derive(Debug, Clone)]
pub struct Edge {
    /// Source node id, or [`START`].
    pub from: String,
    /// Destination node id, or [`END`].
    pub to: String,
    /// Whether this edge establishes execution ordering.
    pub carries_control: bool,
    /// Whether this edge carries a value.
    pub carries_data: bool,
    /// Field-level mappings, if this is not a whole-output data edge.
    pub mappings: Option<MappingSet>,
}

/// A predicate-driven fan-out attached to a single source node.
///
/// The predicate runs against the source's output and returns the subset of
/// `candidates` execution should continue to; the rest are marked skipped so
/// the scheduler's skip propagation (§4.6) can route around them.
pub struct Branch {
    /// Node whose output this branch inspects.
    pub source: String,
    /// Declared candidate destination node ids.
    pub candidates: Vec<String>,
    /// Chooses the subset of `candidates` to continue to.
    pub predicate: BranchFn,
}

impl std::fmt::Debug for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch")
            .field("source", &self.source)
            .field("candidates", &self.candidates)
            .finish_non_exhaustive()
    }
}

/// Which scheduling discipline a compiled graph runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// A node runs once at least one predecessor has delivered since it last
    /// ran. Loops are permitted; bounded by a max-steps budget.
    AnyPredecessor,
    /// A node runs only once every control predecessor is ready-or-skipped
    /// and every data predecessor has arrived-or-been-excluded. Requires the
    /// node graph to be a DAG.
    AllPredecessor,
}

impl Default for RunMode {
    fn default() -> Self {
        Self::AnyPredecessor
    }
}

/// Per-destination configuration for combining values that arrive from more
/// than one predecessor in the same triggering round.
///
/// Without an entry here, concurrent values for a destination whose input
/// type is a mapping are shallow-merged key-by-key (colliding keys are a
/// runtime [`GraphError::MergeTypeMismatch`] unless a merger is registered);
/// any other type with more than one contributor is also a merge-type error
/// unless configured here.
#[derive(Clone)]
pub struct MergeConfig {
    /// Combines already-ordered (by declared edge order) contributor values
    /// into the single value the destination node receives.
    pub merge: Arc<dyn Fn(Vec<Value>) -> Result<Value> + Send + Sync>,
}

impl std::fmt::Debug for MergeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeConfig").finish_non_exhaustive()
    }
}

/// Options governing [`Graph::compile`].
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Cyclic (any-predecessor) vs acyclic (all-predecessor) scheduling.
    pub run_mode: RunMode,
    /// Step budget for cyclic mode. Rejected (must be `None`) in acyclic
    /// mode, where the DAG structure itself bounds execution.
    pub max_steps: Option<u64>,
    /// Node ids to pause before dispatching.
    pub interrupt_before: Vec<String>,
    /// Node ids to pause after completing.
    pub interrupt_after: Vec<String>,
    /// Per-destination fan-in merge configuration.
    pub merge_configs: HashMap<String, MergeConfig>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            run_mode: RunMode::default(),
            max_steps: None,
            interrupt_before: Vec::new(),
            interrupt_after: Vec::new(),
            merge_configs: HashMap::new(),
        }
    }
}

impl CompileOptions {
    /// Use acyclic (all-predecessor / DAG) scheduling.
    pub fn acyclic() -> Self {
        Self {
            run_mode: RunMode::AllPredecessor,
            ..Self::default()
        }
    }

    /// Override the cyclic-mode step budget. No-op flag for acyclic mode —
    /// [`Graph::compile`] rejects a `Some` value when `run_mode` is
    /// [`RunMode::AllPredecessor`].
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// Pause before dispatching `node`.
    pub fn with_interrupt_before(mut self, node: impl Into<String>) -> Self {
        self.interrupt_before.push(node.into());
        self
    }

    /// Pause after `node` completes.
    pub fn with_interrupt_after(mut self, node: impl Into<String>) -> Self {
        self.interrupt_after.push(node.into());
        self
    }

    /// Register a fan-in merge function for values arriving at `destination`.
    pub fn with_merge_config(mut self, destination: impl Into<String>, merge: MergeConfig) -> Self {
        self.merge_configs.insert(destination.into(), merge);
        self
    }
}

/// A frozen, immutable graph ready to be driven by the scheduler.
///
/// Produced by [`Graph::compile`]. Every edge's type coercion has been
/// resolved (statically or deferred to a runtime checker recorded in
/// `edge_coercions`), and in [`RunMode::AllPredecessor`] the node graph has
/// been verified acyclic.
pub struct CompiledGraph {
    /// All user nodes, keyed by id.
    pub nodes: HashMap<String, Node>,
    /// Every edge in declared order (declaration order is the deterministic
    /// fan-in merge order per §4.6).
    pub edges: Vec<Edge>,
    /// All branches, keyed by source node id.
    pub branches: HashMap<String, Vec<Branch>>,
    /// Per-edge inferred type coercion record.
    pub edge_coercions: Vec<EdgeCoercion>,
    /// Selected scheduling discipline.
    pub run_mode: RunMode,
    /// Effective step budget (cyclic mode only).
    pub max_steps: u64,
    /// Options this graph was compiled with.
    pub options: CompileOptions,
    /// Declared input type (`start`'s output type).
    pub input_type: TypeDescriptor,
    /// Declared output type (`end`'s input type).
    pub output_type: TypeDescriptor,
}

impl CompiledGraph {
    /// Control-edge successors of `node` (including [`END`]).
    pub fn control_successors(&self, node: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.carries_control && e.from == node)
            .map(|e| e.to.as_str())
            .collect()
    }

    /// Control-edge predecessors of `node` (including [`START`]).
    pub fn control_predecessors(&self, node: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.carries_control && e.to == node)
            .map(|e| e.from.as_str())
            .collect()
    }

    /// Data-edge predecessors of `node`, in declared order.
    pub fn data_predecessors(&self, node: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.carries_data && e.to == node).collect()
    }
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges.len())
            .field("run_mode", &self.run_mode)
            .field("max_steps", &self.max_steps)
            .finish_non_exhaustive()
    }
}

/// One (from, to) edge pending type-inference resolution.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct PendingEdge(usize);

/// A graph under construction: nodes, edges, branches, and the error
/// accumulated so far, if any.
///
/// Mutators ([`Graph::add_node`], [`Graph::add_edge`], [`Graph::add_branch`])
/// never return a `Result`: the first error is recorded and subsequent calls
/// become no-ops, matching the pattern of accumulating build state rather
/// than aborting mid-description. [`Graph::compile`] surfaces it.
pub struct Graph {
    nodes: HashMap<String, Node>,
    edges: Vec<Edge>,
    branches: HashMap<String, Vec<Branch>>,
    input_type: TypeDescriptor,
    output_type: TypeDescriptor,
    build_error: Option<GraphError>,
    compiled: bool,
}

impl Graph {
    /// Start building a graph whose `start` output type is `input_type` and
    /// whose `end` input type is `output_type`.
    pub fn new(input_type: TypeDescriptor, output_type: TypeDescriptor) -> Self {
        Self {
            nodes: HashMap::new(),
            edges: Vec::new(),
            branches: HashMap::new(),
            input_type,
            output_type,
            build_error: None,
            compiled: false,
        }
    }

    fn fail(&mut self, err: GraphError) {
        if self.build_error.is_none() {
            self.build_error = Some(err);
        }
    }

    fn guard(&mut self) -> bool {
        if self.compiled {
            self.fail(GraphError::Build("graph already compiled".to_string()));
            return false;
        }
        self.build_error.is_none()
    }

    /// Add a user node. A no-op (recording an error) if `node.id` is
    /// `"start"`/`"end"`, already present, or the graph already failed or
    /// compiled.
    pub fn add_node(&mut self, node: Node) -> &mut Self {
        if !self.guard() {
            return self;
        }
        if node.id == START || node.id == END {
            self.fail(GraphError::Build(format!("'{}' is a reserved node id", node.id)));
            return self;
        }
        if self.nodes.contains_key(&node.id) {
            self.fail(GraphError::Build(format!("duplicate node '{}'", node.id)));
            return self;
        }
        self.nodes.insert(node.id.clone(), node);
        self
    }

    /// Add an edge. A no-op (recording an error) if either endpoint is
    /// unknown, `from == "end"`, `to == "start"`, both flags are false, or a
    /// duplicate edge with the same flag combination already exists.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>, carries_control: bool, carries_data: bool, mappings: Option<MappingSet>) -> &mut Self {
        if !self.guard() {
            return self;
        }
        let from = from.into();
        let to = to.into();

        if from == END {
            self.fail(GraphError::Build("'end' cannot be an edge source".to_string()));
            return self;
        }
        if to == START {
            self.fail(GraphError::Build("'start' cannot be an edge destination".to_string()));
            return self;
        }
        if from != START && !self.nodes.contains_key(&from) {
            self.fail(GraphError::Build(format!("unknown edge source '{from}'")));
            return self;
        }
        if to != END && !self.nodes.contains_key(&to) {
            self.fail(GraphError::Build(format!("unknown edge destination '{to}'")));
            return self;
        }
        if !carries_control && !carries_data {
            self.fail(GraphError::Build(format!("edge {from}->{to} carries neither control nor data")));
            return self;
        }
        let duplicate = self.edges.iter().any(|e| {
            e.from == from && e.to == to && e.carries_control == carries_control && e.carries_data == carries_data
        });
        if duplicate {
            self.fail(GraphError::Build(format!("duplicate edge {from}->{to}")));
            return self;
        }

        self.edges.push(Edge {
            from,
            to,
            carries_control,
            carries_data,
            mappings,
        });
        self
    }

    /// Attach a branch to `source`, fanning out to a subset of `candidates`
    /// chosen by `predicate` at runtime.
    pub fn add_branch(&mut self, source: impl Into<String>, candidates: Vec<String>, predicate: BranchFn) -> &mut Self {
        if !self.guard() {
            return self;
        }
        let source = source.into();
        if source != START && !self.nodes.contains_key(&source) {
            self.fail(GraphError::Build(format!("unknown branch source '{source}'")));
            return self;
        }
        for candidate in &candidates {
            if candidate != END && !self.nodes.contains_key(candidate) {
                self.fail(GraphError::Build(format!("unknown branch candidate '{candidate}'")));
                return self;
            }
        }
        self.branches.entry(source.clone()).or_default().push(Branch {
            source,
            candidates,
            predicate,
        });
        self
    }

    /// The build error recorded so far, if any, without compiling.
    pub fn build_error(&self) -> Option<&GraphError> {
        self.build_error.as_ref()
    }

    fn validate_mapping_target_uniqueness(&mut self) -> Result<()> {
        let mut by_destination: HashMap<&str, Vec<&Edge>> = HashMap::new();
        for edge in &self.edges {
            if edge.carries_data {
                by_destination.entry(edge.to.as_str()).or_default().push(edge);
            }
        }
        for (to, incoming) in by_destination {
            let has_whole = incoming.iter().any(|e| e.mappings.is_none());
            let has_mapped = incoming.iter().any(|e| e.mappings.is_some());
            if has_whole && has_mapped {
                return Err(GraphError::Build(format!(
                    "node '{to}' cannot mix a whole-output incoming edge with field-mapped incoming edges"
                )));
            }
            let mut seen_targets: HashSet<String> = HashSet::new();
            for edge in incoming.iter().filter_map(|e| e.mappings.as_ref()) {
                for target in edge.target_paths() {
                    if !seen_targets.insert(target.clone()) {
                        return Err(GraphError::Build(format!(
                            "node '{to}' has two field mappings targeting the same path '{target}'"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Run the type-inference fixpoint (§4.5) over every edge and return the
    /// resolved output type of `from` / input type of `to` for each.
    fn infer_types(&mut self) -> Result<Vec<EdgeCoercion>> {
        let mut resolved_output: HashMap<String, TypeDescriptor> = HashMap::new();
        let mut resolved_input: HashMap<String, TypeDescriptor> = HashMap::new();
        resolved_output.insert(START.to_string(), self.input_type.clone());
        resolved_input.insert(END.to_string(), self.output_type.clone());
        for node in self.nodes.values() {
            if let Some(ty) = &node.input_type {
                resolved_input.insert(node.id.clone(), ty.clone());
            }
            if let Some(ty) = &node.output_type {
                resolved_output.insert(node.id.clone(), ty.clone());
            }
        }

        let mut pending: HashSet<usize> = (0..self.edges.len()).filter(|i| self.edges[*i].carries_data).collect();
        let mut coercions: Vec<Option<EdgeCoercion>> = vec![None; self.edges.len()];

        loop {
            let mut progressed = false;
            let mut resolved_this_round = Vec::new();

            for &idx in pending.iter() {
                let edge = &self.edges[idx];
                let from_ty = resolved_output.get(&edge.from).cloned();
                let to_ty = resolved_input.get(&edge.to).cloned();

                match (from_ty, to_ty, &edge.mappings) {
                    (Some(from_ty), None, None) => {
                        resolved_input.insert(edge.to.clone(), from_ty);
                        progressed = true;
                    }
                    (None, Some(to_ty), None) => {
                        resolved_output.insert(edge.from.clone(), to_ty);
                        progressed = true;
                    }
                    (Some(from_ty), Some(to_ty), None) => {
                        let assignability = from_ty.assignable_to(&to_ty);
                        if assignability == Assignability::MustNot {
                            return Err(GraphError::Compile(format!(
                                "edge {}->{}: {:?} is not assignable to {:?}",
                                edge.from, edge.to, from_ty, to_ty
                            )));
                        }
                        coercions[idx] = Some(EdgeCoercion::compute(edge.from.clone(), edge.to.clone(), from_ty, to_ty));
                        resolved_this_round.push(idx);
                        progressed = true;
                    }
                    (Some(from_ty), Some(to_ty), Some(mappings)) => {
                        let failures = mappings.validate_against_types(&from_ty, &to_ty);
                        if !failures.is_empty() {
                            return Err(GraphError::Compile(format!(
                                "edge {}->{}: {}",
                                edge.from,
                                edge.to,
                                failures.join("; ")
                            )));
                        }
                        coercions[idx] = Some(EdgeCoercion::compute(edge.from.clone(), edge.to.clone(), from_ty, to_ty));
                        resolved_this_round.push(idx);
                        progressed = true;
                    }
                    _ => {}
                }
            }

            for idx in &resolved_this_round {
                pending.remove(idx);
            }
            if !progressed {
                break;
            }
        }

        if let Some(&idx) = pending.iter().next() {
            let edge = &self.edges[idx];
            return Err(GraphError::Compile(format!(
                "could not resolve types for edge {}->{}",
                edge.from, edge.to
            )));
        }

        Ok(coercions.into_iter().flatten().collect())
    }

    fn verify_acyclic(&self) -> Result<()> {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut nodes: BTreeSet<&str> = BTreeSet::new();
        nodes.insert(START);
        nodes.insert(END);
        for id in self.nodes.keys() {
            nodes.insert(id.as_str());
        }
        for edge in &self.edges {
            adjacency.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
            nodes.insert(edge.from.as_str());
            nodes.insert(edge.to.as_str());
        }
        for branches in self.branches.values() {
            for branch in branches {
                for candidate in &branch.candidates {
                    adjacency.entry(branch.source.as_str()).or_default().push(candidate.as_str());
                }
            }
        }

        let mut in_degree: HashMap<&str, usize> = nodes.iter().map(|n| (*n, 0)).collect();
        for successors in adjacency.values() {
            for s in successors {
                *in_degree.get_mut(s).unwrap() += 1;
            }
        }

        let mut queue: Vec<&str> = in_degree.iter().filter(|(_, d)| **d == 0).map(|(n, _)| *n).collect();
        queue.sort();
        let mut visited = 0usize;
        let mut queue_idx = 0;
        let mut degree = in_degree.clone();
        while queue_idx < queue.len() {
            let node = queue[queue_idx];
            queue_idx += 1;
            visited += 1;
            if let Some(successors) = adjacency.get(node) {
                let mut next_ready: Vec<&str> = Vec::new();
                for s in successors {
                    let d = degree.get_mut(s).unwrap();
                    *d -= 1;
                    if *d == 0 {
                        next_ready.push(s);
                    }
                }
                next_ready.sort();
                queue.extend(next_ready);
            }
        }

        if visited == nodes.len() {
            return Ok(());
        }

        let remaining: BTreeSet<&str> = nodes.iter().copied().filter(|n| !queue.contains(n)).collect();
        let cycle = find_cycle(&adjacency, &remaining);
        Err(GraphError::Compile(format!("DAG is invalid, has loop [{}]", cycle.join("->"))))
    }

    /// Freeze the graph: resolve types, validate structure, and (in
    /// [`RunMode::AllPredecessor`]) verify acyclicity.
    pub fn compile(mut self, options: CompileOptions) -> Result<CompiledGraph> {
        if let Some(err) = self.build_error.take() {
            return Err(err);
        }
        if self.compiled {
            return Err(GraphError::Build("graph already compiled".to_string()));
        }

        if options.run_mode == RunMode::AllPredecessor && options.max_steps.is_some() {
            return Err(GraphError::Compile("max-steps cannot be overridden in acyclic (DAG) mode".to_string()));
        }

        self.validate_mapping_target_uniqueness()?;
        let edge_coercions = self.infer_types()?;

        if options.run_mode == RunMode::AllPredecessor {
            self.verify_acyclic()?;
        }

        let max_steps = options
            .max_steps
            .unwrap_or(self.nodes.len() as u64 + DEFAULT_MAX_STEPS_SLACK);

        self.compiled = true;
        Ok(CompiledGraph {
            nodes: self.nodes,
            edges: self.edges,
            branches: self.branches,
            edge_coercions,
            run_mode: options.run_mode,
            max_steps,
            options,
            input_type: self.input_type,
            output_type: self.output_type,
        })
    }
}

fn find_cycle<'a>(adjacency: &HashMap<&'a str, Vec<&'a str>>, remaining: &BTreeSet<&'a str>) -> Vec<String> {
    let start = *remaining.iter().next().unwrap_or(&"?");
    let mut path: Vec<&str> = vec![start];
    let mut visited: HashSet<&str> = HashSet::new();
    visited.insert(start);
    let mut current = start;
    loop {
        let next = adjacency
            .get(current)
            .and_then(|succs| succs.iter().find(|s| remaining.contains(*s)))
            .copied();
        match next {
            Some(n) if n == start => {
                path.push(n);
                break;
            }
            Some(n) if visited.contains(n) => {
                // landed on a different node in the cycle than `start`; trim
                // the path down to the repeated node.
                let pos = path.iter().position(|p| *p == n).unwrap_or(0);
                path = path[pos..].to_vec();
                path.push(n);
                break;
            }
            Some(n) => {
                path.push(n);
                visited.insert(n);
                current = n;
            }
            None => break,
        }
    }
    path.into_iter().map(str::to_string).collect()
}
