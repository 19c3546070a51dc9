//! Stream handle: the runtime value stream that flows along a streaming edge.
//!
//! A node that implements the streaming-output or stream-to-stream execution
//! shape (see [`crate::runnable`]) doesn't hand back a value, it hands back a
//! `StreamHandle<T>` — a cursor over a sequence of `T`s produced concurrently
//! with the rest of the graph. The scheduler (see [`crate::scheduler`]) needs
//! to split a single upstream stream across several downstream edges, merge
//! several upstream streams into one node's input, tag merged items by the
//! edge they came from, and erase concrete item types to `serde_json::Value`
//! once a stream crosses a type-inferred edge boundary. Those five operations
//! — copy, merge, merge with names, with key, to any — are what this module
//! provides; `close` just drops the handle, same as any other channel.
//!
//! ```text
//!        copy(2)                         merge
//!   ┌───────────────┐              ┌───────────────┐
//!   │               ├──▶ handle A  │  handle A  ──┐ │
//!   │ StreamHandle<T>│              │               ├─▶ StreamHandle<T>
//!   │               ├──▶ handle B  │  handle B  ──┘ │
//!   └───────────────┘              └───────────────┘
//! ```

use std::fmt;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Default bounded capacity for the channels backing a [`StreamHandle`].
///
/// Chosen to give a node a small amount of slack before it starts exerting
/// backpressure on its producer; callers that need a different buffer depth
/// should build the handle from their own channel via [`StreamHandle::new`].
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// A cursor over a sequence of values produced by a node's streaming
/// execution shape.
///
/// Backed by a bounded `tokio::sync::mpsc` channel. Reading is exclusive —
/// [`StreamHandle`] is not `Clone` — which is exactly why [`copy`] exists: to
/// go from one reader to several without violating single-consumer channel
/// semantics.
///
/// [`copy`]: StreamHandle::copy
pub struct StreamHandle<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> fmt::Debug for StreamHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> StreamHandle<T> {
    /// Wrap an existing receiver.
    pub fn new(rx: mpsc::Receiver<T>) -> Self {
        Self { rx }
    }

    /// Create a connected producer/consumer pair with the default channel
    /// capacity.
    pub fn channel() -> (mpsc::Sender<T>, Self) {
        Self::channel_with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a connected producer/consumer pair with an explicit capacity.
    pub fn channel_with_capacity(capacity: usize) -> (mpsc::Sender<T>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }

    /// Read the next item, or `None` once the producer side has closed.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Drain the remaining items into a `Vec`, for the synchronous-invoke
    /// execution shape collecting a streaming node's output before returning.
    pub async fn collect(mut self) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(item) = self.rx.recv().await {
            out.push(item);
        }
        out
    }

    /// Close the handle. Equivalent to dropping it; provided so call sites
    /// that want to make the intent explicit (matching the spec's named
    /// `close` operation) can do so without a bare `drop(handle)`.
    pub fn close(self) {
        drop(self);
    }

    /// Convert into a `futures`-compatible `Stream`.
    pub fn into_stream(self) -> ReceiverStream<T> {
        ReceiverStream::new(self.rx)
    }
}

impl<T: Clone + Send + 'static> StreamHandle<T> {
    /// Split this stream into `n` independent handles, each receiving a clone
    /// of every item.
    ///
    /// Used when a data edge with field mappings fans out from one producing
    /// node to several independent consumers: each consumer gets its own
    /// cursor rather than racing to drain a shared channel. Spawns a
    /// background task that reads `self` to completion and broadcasts to all
    /// `n` outputs; if one output lags it applies backpressure to the whole
    /// fan-out, matching bounded-channel semantics elsewhere in the engine.
    pub fn copy(mut self, n: usize) -> Vec<StreamHandle<T>> {
        if n == 0 {
            return Vec::new();
        }
        let mut senders = Vec::with_capacity(n);
        let mut handles = Vec::with_capacity(n);
        for _ in 0..n {
            let (tx, handle) = StreamHandle::channel();
            senders.push(tx);
            handles.push(handle);
        }
        tokio::spawn(async move {
            while let Some(item) = self.rx.recv().await {
                for tx in &senders {
                    // A consumer that dropped its handle just stops receiving;
                    // the others keep going.
                    let _ = tx.send(item.clone()).await;
                }
            }
        });
        handles
    }
}

impl<T: Send + 'static> StreamHandle<T> {
    /// Merge several upstream handles into one, interleaving items in
    /// whatever order they arrive.
    ///
    /// This is the fan-in half of the scheduler's any-predecessor (cyclic)
    /// and all-predecessor (acyclic) merge logic: several producers feed one
    /// consumer's input channel.
    pub fn merge(streams: Vec<StreamHandle<T>>) -> StreamHandle<T> {
        let (tx, handle) = StreamHandle::channel();
        for mut s in streams {
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(item) = s.rx.recv().await {
                    if tx.send(item).await.is_err() {
                        break;
                    }
                }
            });
        }
        handle
    }

    /// Merge several named upstream handles into one stream of
    /// `(source_name, item)` pairs.
    ///
    /// Used at a fan-in node that needs to know which predecessor each item
    /// came from — e.g. a branch-aware merge that applies a different field
    /// mapping per source edge.
    pub fn merge_with_names(
        named: Vec<(String, StreamHandle<T>)>,
    ) -> StreamHandle<(String, T)> {
        let (tx, handle) = StreamHandle::channel();
        for (name, mut s) in named {
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(item) = s.rx.recv().await {
                    if tx.send((name.clone(), item)).await.is_err() {
                        break;
                    }
                }
            });
        }
        handle
    }

    /// Tag every item in this stream with a constant key, producing a
    /// `(key, item)` stream compatible with [`merge_with_names`]'s output
    /// shape — useful when a single-producer edge needs to line up with a
    /// multi-producer merge downstream.
    ///
    /// [`merge_with_names`]: StreamHandle::merge_with_names
    pub fn with_key(mut self, key: impl Into<String>) -> StreamHandle<(String, T)> {
        let key = key.into();
        let (tx, handle) = StreamHandle::channel();
        tokio::spawn(async move {
            while let Some(item) = self.rx.recv().await {
                if tx.send((key.clone(), item)).await.is_err() {
                    break;
                }
            }
        });
        handle
    }
}

impl<T> StreamHandle<T>
where
    T: serde::Serialize + Send + 'static,
{
    /// Erase this stream's item type to `serde_json::Value`.
    ///
    /// Called when a stream crosses a type-inferred data edge into a node
    /// whose declared input type differs from the producer's output type:
    /// the scheduler converts to the dynamic substrate and lets the field
    /// mapper (see [`crate::mapping`]) reconcile shapes from there.
    pub fn to_any(mut self) -> StreamHandle<serde_json::Value> {
        let (tx, handle) = StreamHandle::channel();
        tokio::spawn(async move {
            while let Some(item) = self.rx.recv().await {
                let value = match serde_json::to_value(&item) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if tx.send(value).await.is_err() {
                    break;
                }
            }
        });
        handle
    }
}
