//! Error types for graph construction, compilation, and execution.
//!
//! # Error Hierarchy
//!
//! ```text
//! GraphError
//! ├── Build                 - invalid node/edge/branch added before compile
//! ├── Compile               - compile-time structural or type-inference failure
//! ├── NodeExecution         - a node's Runnable returned an error, with its node trail
//! ├── MaxStepsExceeded       - scheduler step budget exhausted (likely a cycle bug)
//! ├── Cancelled             - run cancelled by the caller
//! ├── StreamRead            - a stream handle failed mid-read
//! ├── MergeTypeMismatch     - fan-in merge saw incompatible branch value shapes
//! ├── Interrupted           - a configured node paused the run, carrying a resumable snapshot
//! ├── InterruptAndRerun     - a tool node paused with partial results to resume later
//! ├── Checkpoint            - checkpoint store failure
//! ├── Serialization         - JSON (de)serialization failure
//! ├── Io                    - filesystem/network I/O failure
//! └── Custom                - escape hatch for caller-defined errors
//! ```
//!
//! # Examples
//!
//! ```rust
//! use compose_core::error::GraphError;
//!
//! fn handle(err: GraphError) -> String {
//!     match err {
//!         GraphError::Interrupted { node, reason, .. } => format!("paused at {node}: {reason}"),
//!         GraphError::NodeExecution { trail, error } => format!("failed at {trail:?}: {error}"),
//!         _ => format!("{err}"),
//!     }
//! }
//! ```

use thiserror::Error;

/// Convenience result type using [`GraphError`].
pub type Result<T> = std::result::Result<T, GraphError>;

/// All errors that can occur while building, compiling, or running a graph.
#[derive(Error, Debug)]
pub enum GraphError {
    /// The graph was built incorrectly: a duplicate node id, an edge or branch
    /// referencing a node that was never added, a missing entry point.
    ///
    /// **Recovery**: fix the `add_node`/`add_edge`/`add_branch` call sequence
    /// before calling `compile()`.
    #[error("graph build error: {0}")]
    Build(String),

    /// Compilation failed: the type-inference fixpoint could not resolve every
    /// edge, or the acyclic-mode DAG check (Kahn's algorithm) found a cycle.
    ///
    /// **Recovery**: check field-mapping declarations against the referenced
    /// node's actual type descriptor, or switch the graph to cyclic mode.
    #[error("graph compile error: {0}")]
    Compile(String),

    /// A node's [`Runnable`](crate::runnable::Runnable) returned an error
    /// during execution.
    ///
    /// `trail` is the path of node ids the scheduler walked to reach the
    /// failing node in this super-step (innermost last), so a failure inside
    /// a fan-in branch can be traced back to how it was reached.
    #[error("node execution failed at {trail:?}: {error}")]
    NodeExecution {
        /// Node ids walked to reach the failure, deepest last.
        trail: Vec<String>,
        /// Underlying error message.
        error: String,
    },

    /// The scheduler exceeded its configured step budget without reaching a
    /// fixpoint. Almost always indicates an unintended cycle, or a cyclic
    /// graph whose convergence condition never triggers.
    #[error("scheduler exceeded max steps ({max_steps}) without converging")]
    MaxStepsExceeded {
        /// The configured step budget that was hit.
        max_steps: u64,
    },

    /// The run was cancelled by the caller (e.g. dropped the invoking future
    /// or called an explicit cancellation handle).
    #[error("run cancelled")]
    Cancelled,

    /// Reading from a stream handle failed mid-stream.
    #[error("stream read failed on channel '{channel}': {error}")]
    StreamRead {
        /// Channel name the stream was attached to.
        channel: String,
        /// Underlying error message.
        error: String,
    },

    /// A stream was drained to a single value but produced no chunks at all,
    /// and no registered concatenator opted to treat that as an empty-but-valid
    /// result.
    #[error("empty stream: nothing to concatenate")]
    EmptyStream,

    /// A stream's chunk type has no registered concatenation function, so
    /// draining it to a single value isn't possible.
    #[error("no concatenation registered for stream tag '{tag}'")]
    UnregisteredConcatenation {
        /// The tag that had no registered concatenator.
        tag: String,
    },

    /// A fan-in merge received values whose shapes could not be reconciled
    /// under the target node's type descriptor.
    #[error("merge type mismatch at node '{node}': {error}")]
    MergeTypeMismatch {
        /// Node performing the fan-in merge.
        node: String,
        /// Description of the mismatch.
        error: String,
    },

    /// A node paused the run requesting external input. Not fatal: callers
    /// typically match on this, collect input, and resume from a checkpoint.
    #[error("run interrupted at node '{node}': {reason}")]
    Interrupted {
        /// Node that raised the interrupt.
        node: String,
        /// Human-readable reason.
        reason: String,
        /// Scheduler state at the point of interruption, serialized so it can
        /// ride inside a checkpoint and be handed back to `Scheduler::resume`.
        snapshot: serde_json::Value,
    },

    /// A tool node interrupted a partially-completed batch of tool calls.
    /// The payload is opaque to the scheduler and round-trips through
    /// [`compose_checkpoint::InterruptAndRerunExtra`].
    #[error("node '{node}' interrupted for rerun: {reason}")]
    InterruptAndRerun {
        /// Node that raised the interrupt.
        node: String,
        /// Human-readable reason.
        reason: String,
        /// Rerun state, serialized so it can ride inside a checkpoint.
        extra: serde_json::Value,
    },

    /// Checkpoint store failure.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] compose_checkpoint::CheckpointError),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Caller-defined error not covered by another variant.
    #[error("{0}")]
    Custom(String),
}

impl GraphError {
    /// Build a [`GraphError::NodeExecution`] for a single node (trail of length 1).
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            trail: vec![node.into()],
            error: error.into(),
        }
    }

    /// Prepend `node` to an existing [`GraphError::NodeExecution`] trail as the
    /// error propagates up through the scheduler; leaves other variants
    /// unchanged.
    pub fn with_trail(self, node: impl Into<String>) -> Self {
        match self {
            Self::NodeExecution { mut trail, error } => {
                trail.insert(0, node.into());
                Self::NodeExecution { trail, error }
            }
            other => other,
        }
    }

    /// Build a [`GraphError::Interrupted`] with no resumable state attached.
    pub fn interrupted(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Interrupted {
            node: node.into(),
            reason: reason.into(),
            snapshot: serde_json::Value::Null,
        }
    }

    /// Build a [`GraphError::Interrupted`] carrying a scheduler snapshot a
    /// caller can persist and later pass to `Scheduler::resume`.
    pub fn interrupted_with_snapshot(
        node: impl Into<String>,
        reason: impl Into<String>,
        snapshot: serde_json::Value,
    ) -> Self {
        Self::Interrupted {
            node: node.into(),
            reason: reason.into(),
            snapshot,
        }
    }

    /// Whether this error represents a normal pause rather than a failure.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted { .. } | Self::InterruptAndRerun { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_execution_trail_starts_with_one_node() {
        let err = GraphError::node_execution("fetch", "timed out");
        match err {
            GraphError::NodeExecution { trail, .. } => assert_eq!(trail, vec!["fetch".to_string()]),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn with_trail_prepends_ancestor_nodes() {
        let err = GraphError::node_execution("leaf", "boom").with_trail("branch").with_trail("root");
        match err {
            GraphError::NodeExecution { trail, .. } => {
                assert_eq!(trail, vec!["root".to_string(), "branch".to_string(), "leaf".to_string()])
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn with_trail_is_noop_on_other_variants() {
        let err = GraphError::Cancelled.with_trail("anything");
        assert!(matches!(err, GraphError::Cancelled));
    }

    #[test]
    fn is_interrupt_distinguishes_pauses_from_failures() {
        assert!(GraphError::interrupted("n", "why").is_interrupt());
        assert!(!GraphError::node_execution("n", "boom").is_interrupt());
    }

    #[test]
    fn interrupted_with_snapshot_carries_the_given_payload() {
        let snapshot = serde_json::json!({"outputs": {"a": 1}});
        let err = GraphError::interrupted_with_snapshot("a", "waiting on input", snapshot.clone());
        match err {
            GraphError::Interrupted { node, snapshot: got, .. } => {
                assert_eq!(node, "a");
                assert_eq!(got, snapshot);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
