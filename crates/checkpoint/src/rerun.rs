//! Extra state a tool node attaches when it interrupts a run partway through a
//! batch of tool calls, and the name-keyed registry that lets it come back out
//! of a checkpoint as the right concrete type.
//!
//! Checkpoint bytes are opaque to this crate (see [`crate::store`]), but the
//! *contents* of those bytes are produced by `compose-core`, which may need to
//! embed more than one kind of "resume me" payload: a plain resume value
//! (whatever the interrupted node was waiting on) or an
//! [`InterruptAndRerunExtra`] (a partially completed tool dispatch). Both are
//! serialized as tagged JSON; [`RerunRegistry`] is where the tag resolves back
//! to a deserializer.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{CheckpointError, Result};

/// State needed to resume a tool node after a partial batch failure.
///
/// When [`ToolRegistry::execute_tool_calls`](https://docs.rs/compose-core)
/// (in `compose-core`) dispatches N tool calls and M < N fail, the node
/// interrupts the run rather than discarding the N - M successes. This value
/// carries enough to resume: which calls already produced output, and which
/// are still pending re-dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterruptAndRerunExtra {
    /// Name of the node that raised the interrupt.
    pub node: String,
    /// Tool call id -> output, for calls that already succeeded.
    pub completed: HashMap<String, serde_json::Value>,
    /// Tool call ids that still need to run when the node resumes.
    pub pending: Vec<String>,
    /// Human-readable reason surfaced alongside the interrupt.
    pub reason: String,
}

impl InterruptAndRerunExtra {
    /// The registry tag used to identify this payload inside a checkpoint.
    pub const TYPE_NAME: &'static str = "compose.InterruptAndRerunExtra";
}

type Deserializer = Arc<dyn Fn(serde_json::Value) -> Result<Box<dyn Any + Send + Sync>> + Send + Sync>;

/// Name-keyed registry of deserializers for polymorphic checkpoint payloads.
///
/// A checkpoint stores a payload as `{"type": "<name>", "data": <value>}`.
/// `compose-core` registers every concrete extra-payload type it knows about
/// (at minimum [`InterruptAndRerunExtra`]) once, at startup; [`resolve`]
/// then turns the tag back into the right `Box<dyn Any>` without the caller
/// needing a giant match on type name.
///
/// [`resolve`]: RerunRegistry::resolve
#[derive(Default)]
pub struct RerunRegistry {
    deserializers: HashMap<String, Deserializer>,
}

impl RerunRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `name`. A later `resolve(name, ...)` deserializes
    /// into `T` and hands back a `Box<dyn Any>` downcastable to `T`.
    pub fn register<T>(&mut self, name: impl Into<String>)
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let f: Deserializer = Arc::new(|value| {
            let typed: T = serde_json::from_value(value)?;
            Ok(Box::new(typed))
        });
        self.deserializers.insert(name.into(), f);
    }

    /// Deserialize `value` using the type registered under `name`.
    ///
    /// Returns [`CheckpointError::Storage`] if no type was registered under
    /// that name — this indicates a checkpoint was produced by a build that
    /// knew about a payload type this one doesn't.
    pub fn resolve(&self, name: &str, value: serde_json::Value) -> Result<Box<dyn Any + Send + Sync>> {
        let f = self
            .deserializers
            .get(name)
            .ok_or_else(|| CheckpointError::Storage(format!("unregistered rerun payload type: {name}")))?;
        f(value)
    }

    /// Whether a type is currently registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.deserializers.contains_key(name)
    }
}

fn global() -> &'static Mutex<RerunRegistry> {
    static GLOBAL: OnceLock<Mutex<RerunRegistry>> = OnceLock::new();
    GLOBAL.get_or_init(|| {
        let mut registry = RerunRegistry::new();
        registry.register::<InterruptAndRerunExtra>(InterruptAndRerunExtra::TYPE_NAME);
        Mutex::new(registry)
    })
}

/// Register a type on the process-wide registry, seeded with
/// [`InterruptAndRerunExtra`] under its own [`InterruptAndRerunExtra::TYPE_NAME`].
pub fn register_global<T>(name: impl Into<String>)
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    global().lock().unwrap().register::<T>(name);
}

/// Resolve `name` against the process-wide registry.
pub fn resolve_global(name: &str, value: serde_json::Value) -> Result<Box<dyn Any + Send + Sync>> {
    global().lock().unwrap().resolve(name, value)
}
