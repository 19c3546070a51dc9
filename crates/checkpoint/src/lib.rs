//! Abstract checkpoint storage for compose-core graph runs.
//!
//! ```text
//! ┌──────────────┐   save(id, bytes)   ┌──────────────────┐
//! │ compose-core │ ──────────────────▶ │  CheckpointStore  │
//! │  scheduler   │ ◀────────────────── │  (this crate)     │
//! └──────────────┘   load(id) -> bytes └──────────────────┘
//! ```
//!
//! This crate knows nothing about graphs, channels, or nodes. It stores and
//! retrieves opaque bytes under a string id; `compose-core` is responsible for
//! turning its own per-node channel state and per-edge stream-conversion pairs
//! into those bytes and back. That split mirrors the teacher's separation
//! between the execution engine and its checkpoint backend: the engine
//! shouldn't care whether checkpoints end up in memory, on disk, or in Redis.
//!
//! ## Quick start
//!
//! ```
//! use compose_checkpoint::{CheckpointStore, InMemoryCheckpointStore};
//!
//! # async fn run() -> Result<(), compose_checkpoint::CheckpointError> {
//! let store = InMemoryCheckpointStore::new();
//! store.save("run-42", b"...serialized state...".to_vec()).await?;
//! let bytes = store.load("run-42").await?;
//! assert_eq!(bytes, b"...serialized state...");
//! # Ok(())
//! # }
//! ```
//!
//! ## Polymorphic rerun payloads
//!
//! A tool node that fails partway through a batch of tool calls can ask the
//! scheduler to interrupt the run and later resume it with only the failed
//! calls re-dispatched. The extra state it needs to reconstruct that resume
//! (`InterruptAndRerunExtra`) travels inside the same checkpoint bytes as
//! everything else, tagged with a type name so the consumer that eventually
//! deserializes it can tell "this is a rerun payload" from "this is a plain
//! resume value" without guessing. See [`rerun`] for the registry.

pub mod error;
pub mod rerun;
pub mod store;

pub use error::{CheckpointError, Result};
pub use rerun::{InterruptAndRerunExtra, RerunRegistry};
pub use store::{CheckpointStore, InMemoryCheckpointStore};
