//! Scheduler: drives a [`CompiledGraph`](crate::graph::CompiledGraph) to
//! completion under either run-mode discipline (§4.6).
//!
//! The scheduler owns no public "step" API — a caller only ever sees
//! [`Scheduler::invoke`]/[`stream`](Scheduler::stream)/[`collect`](Scheduler::collect)/
//! [`transform`](Scheduler::transform), exactly the four shapes every other
//! [`Runnable`] exposes. Internally there's exactly one real entry point,
//! [`Scheduler::run`], which executes the whole graph to a single output
//! value; the other three shapes are synthesized for free by handing `run`
//! to [`Runnable::from_invoke`] and calling the adapter's own stream/collect/
//! transform, the same way an ordinary node with only an `invoke` shape gets
//! the other three.
//!
//! # Per-node channel state
//!
//! Every node has a "channel": the bookkeeping the scheduler needs to decide
//! when that node may run and what value it runs with.
//!
//! - **Cyclic (any-predecessor).** Just the most recent value delivered by
//!   each predecessor. A node is dispatched once any predecessor has
//!   delivered something new since the node last ran.
//! - **Acyclic (all-predecessor).** The same incoming values, plus a
//!   three-state flag per control predecessor (waiting / ready / skipped)
//!   and a has-arrived flag per data predecessor. A node dispatches only once
//!   every control predecessor has resolved to ready-or-skipped and every
//!   data predecessor has arrived or been excluded by a skip. If every
//!   control predecessor resolves to skipped, the node itself becomes
//!   skipped and that status propagates to its own successors.
//!
//! Both disciplines share fan-in: when more than one predecessor contributes
//! to the same node in the same triggering round, contributions are combined
//! in declared edge order, using the destination's [`MergeConfig`] if one was
//! registered at compile time, or a default shallow object-merge otherwise.
//!
//! # Interrupt and resume
//!
//! A graph compiled with `interrupt_before`/`interrupt_after` node ids pauses
//! the round that first reaches one of them, returning
//! [`GraphError::Interrupted`] carrying a [`RunSnapshot`] of the exact channel
//! state at that point. [`Scheduler::resume`] takes that snapshot back and
//! continues the run; an interrupt point already honored this run is not
//! re-triggered on resume, so a caller can step through several interrupt
//! points one resume at a time.
//!
//! # Retries
//!
//! A node built with [`Node::with_retry_policy`](crate::graph::Node::with_retry_policy)
//! has its dispatch unit retry a failing invocation per that
//! [`RetryPolicy`](crate::retry::RetryPolicy) (sleeping the policy's computed
//! backoff between attempts) before the failure is surfaced as a
//! [`GraphError::NodeExecution`]. A node with no attached policy fails on the
//! first error, same as before retries existed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GraphError, Result};
use crate::graph::{CompiledGraph, MergeConfig, RunMode, END, START};
use crate::retry::{RetryPolicy, RetryState};
use crate::runnable::Runnable;
use crate::stream::StreamHandle;

/// The three states §4.6 assigns a control predecessor in acyclic mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PredecessorState {
    Waiting,
    Ready,
    Skipped,
}

/// A point-in-time capture of an interrupted run, round-trippable through a
/// [`compose_checkpoint::CheckpointStore`] and replayable with
/// [`Scheduler::resume`].
///
/// Carries exactly the per-node channel state described at the top of this
/// module: in cyclic mode, each node's last-delivered value plus the dirty
/// set and step counter; in acyclic mode, the three-state predecessor
/// bookkeeping (executed / skipped / branch-rejected). `passed_interrupts`
/// records which `interrupt_before`/`interrupt_after` points this run has
/// already honored, so resuming doesn't immediately re-trigger the same one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunSnapshot {
    /// Snapshot of a [`RunMode::AnyPredecessor`] run.
    Cyclic {
        /// Last-known output per node id (plus `"start"`).
        outputs: HashMap<String, Value>,
        /// Node ids due to run on the next step.
        dirty: Vec<String>,
        /// Steps taken so far, counted against `max_steps`.
        step: u64,
        /// Interrupt points already honored this run.
        passed_interrupts: Vec<String>,
    },
    /// Snapshot of a [`RunMode::AllPredecessor`] run.
    Acyclic {
        /// Last-known output per node id (plus `"start"`).
        outputs: HashMap<String, Value>,
        /// Node ids that have completed (or are virtual boundaries reached).
        executed: Vec<String>,
        /// Node ids cascade-skipped by branch rejection.
        skipped: Vec<String>,
        /// `(source, candidate)` pairs a branch rejected.
        rejected: Vec<(String, String)>,
        /// Interrupt points already honored this run.
        passed_interrupts: Vec<String>,
    },
}

/// Drives one [`CompiledGraph`] to completion. Cheap to clone (wraps an
/// `Arc`); one instance can service many concurrent runs.
#[derive(Clone)]
pub struct Scheduler {
    graph: Arc<CompiledGraph>,
}

impl Scheduler {
    /// Wrap a compiled graph for execution.
    pub fn new(graph: CompiledGraph) -> Self {
        Self { graph: Arc::new(graph) }
    }

    /// The compiled graph this scheduler drives.
    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    /// Run the graph once from `input` to a single output value.
    pub async fn invoke(&self, input: Value) -> Result<Value> {
        self.as_runnable().invoke(input).await
    }

    /// Run the graph, exposing its output as a single-chunk stream.
    pub async fn stream(&self, input: Value) -> Result<StreamHandle<Value>> {
        self.as_runnable().stream(input).await
    }

    /// Drain an input stream to a value (concatenated per the default JSON
    /// concatenator) and run the graph once on it.
    pub async fn collect(&self, input: StreamHandle<Value>) -> Result<Value> {
        self.as_runnable().collect(input).await
    }

    /// Drain an input stream, run the graph once, and re-wrap the output as a
    /// single-chunk stream.
    pub async fn transform(&self, input: StreamHandle<Value>) -> Result<StreamHandle<Value>> {
        self.as_runnable().transform(input).await
    }

    /// Wrap this scheduler in the [`Runnable`] adapter so a compiled graph
    /// can sit as a node inside another graph, exactly like any other
    /// component.
    pub fn as_runnable(&self) -> Runnable {
        let scheduler = self.clone();
        Runnable::from_invoke(Arc::new(move |input| {
            let scheduler = scheduler.clone();
            Box::pin(async move { scheduler.run(input).await })
        }))
    }

    /// The one real execution path: run every node to completion and return
    /// whatever reached `end`.
    async fn run(&self, input: Value) -> Result<Value> {
        match self.graph.run_mode {
            RunMode::AnyPredecessor => {
                let mut outputs = HashMap::new();
                outputs.insert(START.to_string(), input);
                let dirty = successors_of(&self.graph, START);
                self.run_cyclic(outputs, dirty, 0, HashSet::new()).await
            }
            RunMode::AllPredecessor => {
                let mut outputs = HashMap::new();
                outputs.insert(START.to_string(), input);
                let mut executed = HashSet::new();
                executed.insert(START.to_string());
                self.run_acyclic(outputs, executed, HashSet::new(), HashSet::new(), HashSet::new())
                    .await
            }
        }
    }

    /// Resume a run previously paused by [`GraphError::Interrupted`], picking
    /// up exactly where its [`RunSnapshot`] left off.
    ///
    /// Fails with [`GraphError::Build`] if the snapshot's variant doesn't
    /// match this graph's compiled [`RunMode`] (e.g. resuming a cyclic
    /// snapshot against a graph compiled acyclic).
    pub async fn resume(&self, snapshot: RunSnapshot) -> Result<Value> {
        match (snapshot, self.graph.run_mode) {
            (RunSnapshot::Cyclic { outputs, dirty, step, passed_interrupts }, RunMode::AnyPredecessor) => {
                self.run_cyclic(
                    outputs,
                    dirty.into_iter().collect(),
                    step,
                    passed_interrupts.into_iter().collect(),
                )
                .await
            }
            (RunSnapshot::Acyclic { outputs, executed, skipped, rejected, passed_interrupts }, RunMode::AllPredecessor) => {
                self.run_acyclic(
                    outputs,
                    executed.into_iter().collect(),
                    skipped.into_iter().collect(),
                    rejected.into_iter().collect(),
                    passed_interrupts.into_iter().collect(),
                )
                .await
            }
            _ => Err(GraphError::Build(
                "snapshot run-mode does not match this graph's compiled run mode".to_string(),
            )),
        }
    }

    async fn run_cyclic(
        &self,
        mut outputs: HashMap<String, Value>,
        mut dirty: HashSet<String>,
        mut step: u64,
        mut passed: HashSet<String>,
    ) -> Result<Value> {
        let graph = &self.graph;
        let mut final_value: Option<Value> = None;

        loop {
            let mut runnable_ids: Vec<String> = dirty.iter().filter(|id| id.as_str() != END).cloned().collect();
            runnable_ids.sort();
            let end_dirty = dirty.contains(END);

            if end_dirty {
                if let Some(value) = gather_input(graph, END, &outputs)? {
                    final_value = Some(value);
                }
            }

            if runnable_ids.is_empty() {
                break;
            }

            if let Some(node_id) = runnable_ids.iter().find(|id| graph.options.interrupt_before.contains(id) && !passed.contains(id.as_str())) {
                passed.insert(node_id.clone());
                tracing::debug!(node = %node_id, step, "run paused: interrupt_before");
                return Err(GraphError::interrupted_with_snapshot(
                    node_id.clone(),
                    format!("paused before dispatching '{node_id}'"),
                    serde_json::to_value(RunSnapshot::Cyclic {
                        outputs,
                        dirty: dirty.into_iter().collect(),
                        step,
                        passed_interrupts: passed.into_iter().collect(),
                    })?,
                ));
            }

            step += 1;
            if step > graph.max_steps {
                tracing::error!(step, max_steps = graph.max_steps, "scheduler exceeded max steps");
                return Err(GraphError::MaxStepsExceeded { max_steps: graph.max_steps });
            }
            tracing::debug!(step, nodes = ?runnable_ids, "dispatching cyclic super-step");

            let mut handles = Vec::with_capacity(runnable_ids.len());
            for node_id in &runnable_ids {
                let node_input = gather_input(graph, node_id, &outputs)?.unwrap_or(Value::Null);
                let node = graph.nodes.get(node_id).expect("dirty node exists");
                let runnable = node.runnable.clone();
                let input_key = node.input_key.clone();
                let retry_policy = node.retry_policy.clone();
                let node_id = node_id.clone();
                let payload = apply_input_key(node_input, input_key.as_deref());
                handles.push(async move {
                    let result = invoke_with_retry(&runnable, payload, retry_policy.as_ref())
                        .await
                        .map_err(|e| e.with_trail(node_id.clone()));
                    (node_id, result)
                });
            }
            let round_results = futures::future::join_all(handles).await;

            let mut next_dirty: HashSet<String> = HashSet::new();
            for (node_id, result) in round_results {
                let raw_output = result?;
                let node = graph.nodes.get(&node_id).expect("node exists");
                let output = apply_output_key(raw_output, node.output_key.as_deref());
                outputs.insert(node_id.clone(), output.clone());

                let chosen = evaluate_branches(graph, &node_id, &output);
                for successor in successors_of(graph, &node_id) {
                    if let Some(chosen) = &chosen {
                        if !chosen.contains(successor.as_str()) && is_branch_candidate(graph, &node_id, &successor) {
                            continue;
                        }
                    }
                    next_dirty.insert(successor);
                }
            }
            dirty = next_dirty;

            if let Some(node_id) = runnable_ids.iter().find(|id| graph.options.interrupt_after.contains(id) && !passed.contains(id.as_str())) {
                passed.insert(node_id.clone());
                tracing::debug!(node = %node_id, step, "run paused: interrupt_after");
                return Err(GraphError::interrupted_with_snapshot(
                    node_id.clone(),
                    format!("paused after completing '{node_id}'"),
                    serde_json::to_value(RunSnapshot::Cyclic {
                        outputs,
                        dirty: dirty.into_iter().collect(),
                        step,
                        passed_interrupts: passed.into_iter().collect(),
                    })?,
                ));
            }
        }

        final_value.ok_or_else(|| GraphError::Compile("graph never delivered a value to 'end'".to_string()))
    }

    async fn run_acyclic(
        &self,
        mut outputs: HashMap<String, Value>,
        mut executed: HashSet<String>,
        mut skipped: HashSet<String>,
        mut rejected: HashSet<(String, String)>,
        mut passed: HashSet<String>,
    ) -> Result<Value> {
        let graph = &self.graph;
        let mut end_value: Option<Value> = None;
        let all_targets: Vec<String> = graph
            .nodes
            .keys()
            .cloned()
            .chain(std::iter::once(END.to_string()))
            .collect();

        loop {
            let mut progressed = false;

            // Nodes whose predecessors are all resolved dispatch together,
            // mirroring the eager-but-still-one-superstep-at-a-time
            // dispatch a real scheduler would parallelize via spawned units.
            let mut ready_this_round: Vec<String> = Vec::new();
            for target in &all_targets {
                if executed.contains(target) || skipped.contains(target) {
                    continue;
                }
                match predecessor_readiness(graph, target, &executed, &skipped, &rejected) {
                    Readiness::Waiting => {}
                    Readiness::Skipped => {
                        skipped.insert(target.clone());
                        progressed = true;
                    }
                    Readiness::Ready => ready_this_round.push(target.clone()),
                }
            }

            if ready_this_round.is_empty() {
                if progressed {
                    continue;
                }
                break;
            }
            ready_this_round.sort();

            if let Some(node_id) = ready_this_round
                .iter()
                .find(|id| id.as_str() != END && graph.options.interrupt_before.contains(id) && !passed.contains(id.as_str()))
            {
                passed.insert(node_id.clone());
                tracing::debug!(node = %node_id, "run paused: interrupt_before");
                return Err(GraphError::interrupted_with_snapshot(
                    node_id.clone(),
                    format!("paused before dispatching '{node_id}'"),
                    serde_json::to_value(RunSnapshot::Acyclic {
                        outputs,
                        executed: executed.into_iter().collect(),
                        skipped: skipped.into_iter().collect(),
                        rejected: rejected.into_iter().collect(),
                        passed_interrupts: passed.into_iter().collect(),
                    })?,
                ));
            }

            tracing::debug!(nodes = ?ready_this_round, "dispatching acyclic super-step");
            let mut handles = Vec::with_capacity(ready_this_round.len());
            for node_id in &ready_this_round {
                if node_id == END {
                    continue;
                }
                let node = graph.nodes.get(node_id).expect("ready node exists");
                let node_input = gather_input(graph, node_id, &outputs)?.unwrap_or(Value::Null);
                let node_input = apply_input_key(node_input, node.input_key.as_deref());
                let runnable = node.runnable.clone();
                let retry_policy = node.retry_policy.clone();
                let node_id = node_id.clone();
                handles.push(async move {
                    let result = invoke_with_retry(&runnable, node_input, retry_policy.as_ref())
                        .await
                        .map_err(|e| e.with_trail(node_id.clone()));
                    (node_id, result)
                });
            }
            let round_results = futures::future::join_all(handles).await;

            for (node_id, result) in round_results {
                let raw_output = result?;
                let node = graph.nodes.get(&node_id).expect("node exists");
                let output = apply_output_key(raw_output, node.output_key.as_deref());
                outputs.insert(node_id.clone(), output.clone());
                executed.insert(node_id.clone());
                progressed = true;

                if let Some(branches) = graph.branches.get(&node_id) {
                    for branch in branches {
                        let chosen = (branch.predicate)(&output);
                        for candidate in &branch.candidates {
                            if !chosen.contains(candidate) {
                                rejected.insert((node_id.clone(), candidate.clone()));
                            }
                        }
                    }
                }
            }

            if ready_this_round.contains(&END.to_string()) {
                end_value = gather_input(graph, END, &outputs)?;
                executed.insert(END.to_string());
                progressed = true;
            }

            if let Some(node_id) = ready_this_round
                .iter()
                .find(|id| id.as_str() != END && graph.options.interrupt_after.contains(id) && !passed.contains(id.as_str()))
            {
                passed.insert(node_id.clone());
                tracing::debug!(node = %node_id, "run paused: interrupt_after");
                return Err(GraphError::interrupted_with_snapshot(
                    node_id.clone(),
                    format!("paused after completing '{node_id}'"),
                    serde_json::to_value(RunSnapshot::Acyclic {
                        outputs,
                        executed: executed.into_iter().collect(),
                        skipped: skipped.into_iter().collect(),
                        rejected: rejected.into_iter().collect(),
                        passed_interrupts: passed.into_iter().collect(),
                    })?,
                ));
            }
        }

        if skipped.contains(END) {
            return Err(GraphError::Compile(
                "every path to 'end' was skipped by a branch; graph produced no output".to_string(),
            ));
        }
        end_value.ok_or_else(|| GraphError::Compile("graph never delivered a value to 'end'".to_string()))
    }
}

enum Readiness {
    Waiting,
    Ready,
    Skipped,
}

/// Resolve whether `node` may run, is skipped, or must keep waiting, per the
/// all-predecessor discipline: every control predecessor must be
/// ready-or-skipped (a branch-rejected predecessor counts as skipped from
/// this node's point of view even though the predecessor itself executed),
/// and at least one must be genuinely ready for the node to actually run
/// rather than cascade-skip. Data predecessors must have arrived or been
/// excluded the same way.
fn predecessor_readiness(
    graph: &CompiledGraph,
    node: &str,
    executed: &HashSet<String>,
    skipped: &HashSet<String>,
    rejected: &HashSet<(String, String)>,
) -> Readiness {
    let control_preds = graph.control_predecessors(node);
    let mut any_ready = false;
    for pred in &control_preds {
        let state = predecessor_state(pred, node, executed, skipped, rejected);
        match state {
            PredecessorState::Waiting => return Readiness::Waiting,
            PredecessorState::Ready => any_ready = true,
            PredecessorState::Skipped => {}
        }
    }

    let data_preds = graph.data_predecessors(node);
    for edge in &data_preds {
        let state = predecessor_state(&edge.from, node, executed, skipped, rejected);
        if matches!(state, PredecessorState::Waiting) {
            return Readiness::Waiting;
        }
    }

    if control_preds.is_empty() || any_ready {
        Readiness::Ready
    } else {
        Readiness::Skipped
    }
}

fn predecessor_state(
    pred: &str,
    node: &str,
    executed: &HashSet<String>,
    skipped: &HashSet<String>,
    rejected: &HashSet<(String, String)>,
) -> PredecessorState {
    if skipped.contains(pred) {
        return PredecessorState::Skipped;
    }
    if executed.contains(pred) {
        if rejected.contains(&(pred.to_string(), node.to_string())) {
            PredecessorState::Skipped
        } else {
            PredecessorState::Ready
        }
    } else {
        PredecessorState::Waiting
    }
}

/// Every control- or data-edge successor of `node`, deduplicated.
fn successors_of(graph: &CompiledGraph, node: &str) -> HashSet<String> {
    graph
        .edges
        .iter()
        .filter(|e| e.from == node)
        .map(|e| e.to.clone())
        .collect()
}

fn is_branch_candidate(graph: &CompiledGraph, source: &str, candidate: &str) -> bool {
    graph
        .branches
        .get(source)
        .map(|branches| branches.iter().any(|b| b.candidates.iter().any(|c| c == candidate)))
        .unwrap_or(false)
}

fn evaluate_branches(graph: &CompiledGraph, node: &str, output: &Value) -> Option<HashSet<String>> {
    let branches = graph.branches.get(node)?;
    let mut chosen = HashSet::new();
    for branch in branches {
        for id in (branch.predicate)(output) {
            chosen.insert(id);
        }
    }
    Some(chosen)
}

/// Gather a node's input from its data predecessors' last-known outputs,
/// applying field mappings and fan-in merge per declared edge order. Returns
/// `None` if no data predecessor has produced a value yet (the node is
/// control-triggered only).
fn gather_input(graph: &CompiledGraph, node: &str, outputs: &HashMap<String, Value>) -> Result<Option<Value>> {
    let preds = graph.data_predecessors(node);
    let mut contributions = Vec::with_capacity(preds.len());
    for edge in &preds {
        if let Some(value) = outputs.get(&edge.from) {
            let mapped = match &edge.mappings {
                Some(mappings) => mappings.apply(value)?,
                None => value.clone(),
            };
            contributions.push(mapped);
        }
    }

    match contributions.len() {
        0 => Ok(None),
        1 => Ok(contributions.into_iter().next()),
        _ => {
            if let Some(cfg) = graph.options.merge_configs.get(node) {
                Ok(Some(merge_with(cfg, contributions)?))
            } else {
                Ok(Some(default_merge(node, contributions)?))
            }
        }
    }
}

fn merge_with(cfg: &MergeConfig, contributions: Vec<Value>) -> Result<Value> {
    (cfg.merge)(contributions)
}

/// Default fan-in merge when no [`MergeConfig`] is registered: shallow-merge
/// JSON objects key by key, in declared edge order (later contributions
/// overwrite earlier ones on key collision). Any non-object contributor
/// can't be reconciled this way and is a [`GraphError::MergeTypeMismatch`].
fn default_merge(node: &str, contributions: Vec<Value>) -> Result<Value> {
    let mut merged = serde_json::Map::new();
    for value in contributions {
        match value {
            Value::Object(map) => merged.extend(map),
            other => {
                return Err(GraphError::MergeTypeMismatch {
                    node: node.to_string(),
                    error: format!(
                        "no merge config registered for '{node}' and fan-in value {other:?} isn't an object; register a MergeConfig for this destination"
                    ),
                });
            }
        }
    }
    Ok(Value::Object(merged))
}

fn apply_input_key(value: Value, key: Option<&str>) -> Value {
    match key {
        Some(key) => value.get(key).cloned().unwrap_or(Value::Null),
        None => value,
    }
}

fn apply_output_key(value: Value, key: Option<&str>) -> Value {
    match key {
        Some(key) => {
            let mut map = serde_json::Map::new();
            map.insert(key.to_string(), value);
            Value::Object(map)
        }
        None => value,
    }
}

/// Dispatch unit: invoke `runnable` with `payload`, retrying per `policy` if
/// one is attached to the node. Without a policy this is a single call.
async fn invoke_with_retry(runnable: &Runnable, payload: Value, policy: Option<&RetryPolicy>) -> Result<Value> {
    let Some(policy) = policy else {
        return runnable.invoke(payload).await;
    };

    let mut state = RetryState::new();
    loop {
        tracing::debug!(attempt = state.attempts + 1, max_attempts = policy.max_attempts, "invoking node");
        match runnable.invoke(payload.clone()).await {
            Ok(value) => {
                if state.attempts > 0 {
                    tracing::info!(attempts = state.attempts + 1, "node succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if policy.should_retry(state.attempts) => {
                let delay = policy.calculate_delay(state.attempts);
                tracing::warn!(attempt = state.attempts + 1, delay_ms = delay.as_millis(), error = %e, "node failed, retrying after delay");
                state.record_attempt(Some(e.to_string()));
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if state.attempts > 0 {
                    tracing::error!(attempts = state.attempts + 1, error = %e, "node failed after all retry attempts");
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CompileOptions, Graph, Node};
    use crate::mapping::{FieldMapping, MappingSet};
    use crate::runnable::runnable_fn;
    use crate::types::{ScalarKind, TypeDescriptor};
    use serde_json::json;

    fn node(id: &str, f: impl Fn(Value) -> Result<Value> + Send + Sync + 'static) -> Node {
        Node::new(id, runnable_fn(f))
    }

    #[tokio::test]
    async fn linear_three_node_chain_runs_in_order() {
        let mut graph = Graph::new(TypeDescriptor::Scalar(ScalarKind::Number), TypeDescriptor::Scalar(ScalarKind::Number));
        graph.add_node(node("add_one", |v| Ok(json!(v.as_i64().unwrap() + 1))));
        graph.add_node(node("double", |v| Ok(json!(v.as_i64().unwrap() * 2))));
        graph.add_node(node("negate", |v| Ok(json!(-v.as_i64().unwrap()))));
        graph.add_edge(START, "add_one", true, true, None);
        graph.add_edge("add_one", "double", true, true, None);
        graph.add_edge("double", "negate", true, true, None);
        graph.add_edge("negate", END, true, true, None);

        let compiled = graph.compile(CompileOptions::default()).unwrap();
        let scheduler = Scheduler::new(compiled);
        let result = scheduler.invoke(json!(3)).await.unwrap();
        assert_eq!(result, json!(-8));
    }

    #[tokio::test]
    async fn fan_in_without_merge_config_shallow_merges_objects() {
        let mut graph = Graph::new(TypeDescriptor::Any, TypeDescriptor::Any);
        graph.add_node(node("a", |_| Ok(json!({"x": 1}))));
        graph.add_node(node("b", |_| Ok(json!({"y": 2}))));
        graph.add_node(Node::new("combine", runnable_fn(|v| Ok(v))).with_input_type(TypeDescriptor::Any));
        graph.add_edge(START, "a", true, true, None);
        graph.add_edge(START, "b", true, true, None);
        graph.add_edge("a", "combine", true, true, None);
        graph.add_edge("b", "combine", true, true, None);
        graph.add_edge("combine", END, true, true, None);

        let compiled = graph.compile(CompileOptions::default()).unwrap();
        let scheduler = Scheduler::new(compiled);
        let result = scheduler.invoke(json!(null)).await.unwrap();
        assert_eq!(result, json!({"x": 1, "y": 2}));
    }

    #[tokio::test]
    async fn fan_in_with_merge_config_uses_registered_merger() {
        let mut graph = Graph::new(TypeDescriptor::Any, TypeDescriptor::Any);
        graph.add_node(node("a", |_| Ok(json!(1))));
        graph.add_node(node("b", |_| Ok(json!(2))));
        graph.add_node(Node::new("sum", runnable_fn(|v| Ok(v))).with_input_type(TypeDescriptor::Any));
        graph.add_edge(START, "a", true, true, None);
        graph.add_edge(START, "b", true, true, None);
        graph.add_edge("a", "sum", true, true, None);
        graph.add_edge("b", "sum", true, true, None);
        graph.add_edge("sum", END, true, true, None);

        let merge_config = MergeConfig {
            merge: Arc::new(|values| {
                let total: i64 = values.iter().filter_map(|v| v.as_i64()).sum();
                Ok(json!(total))
            }),
        };
        let options = CompileOptions::default().with_merge_config("sum", merge_config);
        let compiled = graph.compile(options).unwrap();
        let scheduler = Scheduler::new(compiled);
        let result = scheduler.invoke(json!(null)).await.unwrap();
        assert_eq!(result, json!(3));
    }

    #[tokio::test]
    async fn branch_skip_propagates_to_unchosen_path_in_acyclic_mode() {
        let mut graph = Graph::new(TypeDescriptor::Any, TypeDescriptor::Any);
        graph.add_node(node("router", |v| Ok(v)));
        graph.add_node(node("path_a", |_| Ok(json!("a"))));
        graph.add_node(node("path_b", |_| Ok(json!("b"))));
        graph.add_edge(START, "router", true, true, None);
        graph.add_edge("router", "path_a", true, true, None);
        graph.add_edge("router", "path_b", true, true, None);
        graph.add_edge("path_a", END, true, true, None);
        graph.add_edge("path_b", END, true, true, None);
        graph.add_branch(
            "router",
            vec!["path_a".to_string(), "path_b".to_string()],
            Arc::new(|v| {
                if v.as_str() == Some("go-a") {
                    vec!["path_a".to_string()]
                } else {
                    vec!["path_b".to_string()]
                }
            }),
        );

        let compiled = graph.compile(CompileOptions::acyclic()).unwrap();
        let scheduler = Scheduler::new(compiled);
        let result = scheduler.invoke(json!("go-a")).await.unwrap();
        assert_eq!(result, json!("a"));
    }

    #[tokio::test]
    async fn cyclic_loop_exceeding_max_steps_errors() {
        let mut graph = Graph::new(TypeDescriptor::Any, TypeDescriptor::Any);
        graph.add_node(Node::new("loop", runnable_fn(|v| Ok(json!(v.as_i64().unwrap_or(0) + 1)))).with_input_type(TypeDescriptor::Any).with_output_type(TypeDescriptor::Any));
        graph.add_edge(START, "loop", true, true, None);
        graph.add_edge("loop", "loop", true, true, None);

        let compiled = graph.compile(CompileOptions::default().with_max_steps(5)).unwrap();
        let scheduler = Scheduler::new(compiled);
        let err = scheduler.invoke(json!(0)).await.unwrap_err();
        assert!(matches!(err, GraphError::MaxStepsExceeded { max_steps: 5 }));
    }

    #[tokio::test]
    async fn field_mapping_assembles_nested_struct_on_the_edge() {
        let mut graph = Graph::new(TypeDescriptor::Any, TypeDescriptor::Any);
        graph.add_node(node("draft", |_| Ok(json!({"output": "hello"}))));
        graph.add_node(Node::new("review", runnable_fn(|v| Ok(v))).with_input_type(TypeDescriptor::Any));
        graph.add_edge(START, "draft", true, true, None);
        let mut mapping = MappingSet::new();
        mapping
            .add(FieldMapping::from_segments(vec!["output".into()], vec!["review".into(), "draft".into()]).unwrap())
            .unwrap();
        graph.add_edge("draft", "review", true, true, Some(mapping));
        graph.add_edge("review", END, true, true, None);

        let compiled = graph.compile(CompileOptions::default()).unwrap();
        let scheduler = Scheduler::new(compiled);
        let result = scheduler.invoke(json!(null)).await.unwrap();
        assert_eq!(result, json!({"review": {"draft": "hello"}}));
    }

    #[tokio::test]
    async fn stream_shape_synthesizes_from_invoke() {
        let mut graph = Graph::new(TypeDescriptor::Any, TypeDescriptor::Any);
        graph.add_node(node("echo", Ok));
        graph.add_edge(START, "echo", true, true, None);
        graph.add_edge("echo", END, true, true, None);

        let compiled = graph.compile(CompileOptions::default()).unwrap();
        let scheduler = Scheduler::new(compiled);
        let stream = scheduler.stream(json!("hi")).await.unwrap();
        let chunks = stream.collect().await;
        assert_eq!(chunks, vec![json!("hi")]);
    }

    #[tokio::test]
    async fn acyclic_interrupt_before_pauses_and_resume_completes() {
        let mut graph = Graph::new(TypeDescriptor::Any, TypeDescriptor::Any);
        graph.add_node(node("step_one", |v| Ok(json!(v.as_i64().unwrap_or(0) + 1))));
        graph.add_node(node("step_two", |v| Ok(json!(v.as_i64().unwrap_or(0) * 10))));
        graph.add_edge(START, "step_one", true, true, None);
        graph.add_edge("step_one", "step_two", true, true, None);
        graph.add_edge("step_two", END, true, true, None);

        let options = CompileOptions::acyclic().with_interrupt_before("step_two");
        let compiled = graph.compile(options).unwrap();
        let scheduler = Scheduler::new(compiled);

        let err = scheduler.invoke(json!(4)).await.unwrap_err();
        let (node_id, snapshot) = match err {
            GraphError::Interrupted { node, snapshot, .. } => (node, snapshot),
            other => panic!("expected Interrupted, got {other:?}"),
        };
        assert_eq!(node_id, "step_two");

        let snapshot: RunSnapshot = serde_json::from_value(snapshot).unwrap();
        let result = scheduler.resume(snapshot).await.unwrap();
        assert_eq!(result, json!(50));
    }

    #[tokio::test]
    async fn cyclic_interrupt_after_pauses_and_resume_completes() {
        let mut graph = Graph::new(TypeDescriptor::Any, TypeDescriptor::Any);
        graph.add_node(
            Node::new("inc", runnable_fn(|v| Ok(json!(v.as_i64().unwrap_or(0) + 1))))
                .with_input_type(TypeDescriptor::Any)
                .with_output_type(TypeDescriptor::Any),
        );
        graph.add_edge(START, "inc", true, true, None);
        graph.add_edge("inc", END, true, true, None);

        let options = CompileOptions::default().with_interrupt_after("inc");
        let compiled = graph.compile(options).unwrap();
        let scheduler = Scheduler::new(compiled);

        let err = scheduler.invoke(json!(1)).await.unwrap_err();
        let snapshot = match err {
            GraphError::Interrupted { node, snapshot, .. } => {
                assert_eq!(node, "inc");
                snapshot
            }
            other => panic!("expected Interrupted, got {other:?}"),
        };

        let snapshot: RunSnapshot = serde_json::from_value(snapshot).unwrap();
        let result = scheduler.resume(snapshot).await.unwrap();
        assert_eq!(result, json!(2));
    }

    #[tokio::test]
    async fn resuming_does_not_retrigger_the_same_interrupt_point() {
        let mut graph = Graph::new(TypeDescriptor::Any, TypeDescriptor::Any);
        graph.add_node(node("a", |v| Ok(json!(v.as_i64().unwrap_or(0) + 1))));
        graph.add_node(node("b", |v| Ok(json!(v.as_i64().unwrap_or(0) + 1))));
        graph.add_edge(START, "a", true, true, None);
        graph.add_edge("a", "b", true, true, None);
        graph.add_edge("b", END, true, true, None);

        let options = CompileOptions::acyclic().with_interrupt_before("a");
        let compiled = graph.compile(options).unwrap();
        let scheduler = Scheduler::new(compiled);

        let err = scheduler.invoke(json!(0)).await.unwrap_err();
        let snapshot = match err {
            GraphError::Interrupted { snapshot, .. } => snapshot,
            other => panic!("expected Interrupted, got {other:?}"),
        };
        let snapshot: RunSnapshot = serde_json::from_value(snapshot).unwrap();

        // Resuming re-enters the same round; since "a" was already passed,
        // it runs instead of interrupting a second time.
        let result = scheduler.resume(snapshot).await.unwrap();
        assert_eq!(result, json!(2));
    }

    #[tokio::test]
    async fn resume_rejects_a_snapshot_from_the_wrong_run_mode() {
        let mut graph = Graph::new(TypeDescriptor::Any, TypeDescriptor::Any);
        graph.add_edge(START, END, true, true, None);
        let compiled = graph.compile(CompileOptions::acyclic()).unwrap();
        let scheduler = Scheduler::new(compiled);

        let mismatched = RunSnapshot::Cyclic {
            outputs: HashMap::new(),
            dirty: Vec::new(),
            step: 0,
            passed_interrupts: Vec::new(),
        };
        let err = scheduler.resume(mismatched).await.unwrap_err();
        assert!(matches!(err, GraphError::Build(_)));
    }

    #[tokio::test]
    async fn node_with_retry_policy_recovers_from_transient_failures() {
        use crate::retry::RetryPolicy;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        let flaky = Node::new(
            "flaky",
            runnable_fn(move |v| {
                let n = attempts_clone.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(GraphError::node_execution("flaky", "transient failure"))
                } else {
                    Ok(v)
                }
            }),
        )
        .with_retry_policy(RetryPolicy::new(3).with_initial_interval(0.0).with_jitter(false));

        let mut graph = Graph::new(TypeDescriptor::Any, TypeDescriptor::Any);
        graph.add_node(flaky);
        graph.add_edge(START, "flaky", true, true, None);
        graph.add_edge("flaky", END, true, true, None);

        let compiled = graph.compile(CompileOptions::default()).unwrap();
        let scheduler = Scheduler::new(compiled);
        let result = scheduler.invoke(json!(42)).await.unwrap();
        assert_eq!(result, json!(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn node_without_retry_policy_fails_on_first_error() {
        let flaky = node("flaky", |_| Err(GraphError::node_execution("flaky", "boom")));
        let mut graph = Graph::new(TypeDescriptor::Any, TypeDescriptor::Any);
        graph.add_node(flaky);
        graph.add_edge(START, "flaky", true, true, None);
        graph.add_edge("flaky", END, true, true, None);

        let compiled = graph.compile(CompileOptions::default()).unwrap();
        let scheduler = Scheduler::new(compiled);
        let err = scheduler.invoke(json!(1)).await.unwrap_err();
        assert!(matches!(err, GraphError::NodeExecution { .. }));
    }
}
