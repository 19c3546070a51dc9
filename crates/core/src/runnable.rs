//! Runnable adapter: normalizes a node's native execution shape into all four
//! calling conventions the scheduler might need.
//!
//! A node author only ever implements *one* of four shapes:
//!
//! | Shape       | Input              | Output             |
//! |-------------|--------------------|---------------------|
//! | `Invoke`    | `Value`            | `Value`             |
//! | `Stream`    | `Value`            | `StreamHandle<Value>` |
//! | `Collect`   | `StreamHandle<Value>` | `Value`          |
//! | `Transform` | `StreamHandle<Value>` | `StreamHandle<Value>` |
//!
//! but the scheduler may need to call *any* of the four conventions on it,
//! depending on whether the upstream edge delivers a plain value or a stream
//! and whether the downstream edge wants one back. [`Runnable`] is the
//! adapter: whichever shape a node was built from, all four of
//! [`Runnable::invoke`], [`Runnable::stream`], [`Runnable::collect`], and
//! [`Runnable::transform`] work, synthesizing the missing direction by
//! draining/wrapping a [`StreamHandle`].
//!
//! Draining a stream down to one value needs to know how to combine chunks —
//! string chunks concatenate, most other shapes just collect into a JSON
//! array — which is what the [`ConcatenationRegistry`] is for.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{GraphError, Result};
use crate::stream::StreamHandle;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A node's invoke-shape function: `Value -> Value`.
pub type InvokeFn = Arc<dyn Fn(Value) -> BoxFuture<Result<Value>> + Send + Sync>;
/// A node's stream-shape function: `Value -> StreamHandle<Value>`.
pub type StreamFn = Arc<dyn Fn(Value) -> BoxFuture<Result<StreamHandle<Value>>> + Send + Sync>;
/// A node's collect-shape function: `StreamHandle<Value> -> Value`.
pub type CollectFn = Arc<dyn Fn(StreamHandle<Value>) -> BoxFuture<Result<Value>> + Send + Sync>;
/// A node's transform-shape function: `StreamHandle<Value> -> StreamHandle<Value>`.
pub type TransformFn = Arc<dyn Fn(StreamHandle<Value>) -> BoxFuture<Result<StreamHandle<Value>>> + Send + Sync>;

/// A lifecycle callback invoked before dispatch or after completion. Hook
/// points only: delivering these to an external telemetry sink is the
/// caller's business, not this crate's.
pub type LifecycleHook = Arc<dyn Fn(&Value) + Send + Sync>;

/// Combine a drained stream's chunks into one value. Registered per type tag
/// (see [`ConcatenationRegistry`]); only ever called with two or more chunks,
/// since the zero- and one-chunk cases are handled before a tag is consulted.
pub type ConcatenateFn = Arc<dyn Fn(Vec<Value>) -> Value + Send + Sync>;

#[derive(Clone)]
enum Body {
    Invoke(InvokeFn),
    Stream(StreamFn),
    Collect(CollectFn),
    Transform(TransformFn),
}

/// Registry mapping a type tag to the function that concatenates a drained
/// stream's chunks into a single value.
///
/// Seeded with a `"string"` entry that joins string chunks (the common case
/// of an LLM token stream being collected into one completion), and a
/// `"json-merge"` entry that shallow-merges object chunks. A tag with no
/// registered concatenator is a hard error — except the two trivial cases a
/// tag can't change the answer to: zero chunks ([`GraphError::EmptyStream`])
/// and exactly one chunk (returned verbatim, no concatenation needed).
pub struct ConcatenationRegistry {
    by_tag: std::collections::HashMap<String, ConcatenateFn>,
}

impl ConcatenationRegistry {
    /// An empty registry — every tag falls back to array-collection.
    pub fn new() -> Self {
        Self {
            by_tag: std::collections::HashMap::new(),
        }
    }

    /// The default registry: `"string"` and `"json-merge"` built in.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("string", |chunks| {
            let joined: String = chunks
                .into_iter()
                .map(|c| c.as_str().map(str::to_string).unwrap_or_else(|| c.to_string()))
                .collect();
            Value::String(joined)
        });
        registry.register("json-merge", |chunks| {
            let mut merged = serde_json::Map::new();
            for chunk in chunks {
                if let Value::Object(map) = chunk {
                    merged.extend(map);
                }
            }
            Value::Object(merged)
        });
        registry
    }

    /// Register a concatenation function under `tag`.
    pub fn register(&mut self, tag: impl Into<String>, f: impl Fn(Vec<Value>) -> Value + Send + Sync + 'static) {
        self.by_tag.insert(tag.into(), Arc::new(f));
    }

    /// Concatenate `chunks`, using the function registered under `tag` if
    /// present.
    ///
    /// Two cases never consult the registry at all: zero chunks is
    /// [`GraphError::EmptyStream`], and exactly one chunk is returned
    /// verbatim. Anything else with no registered (or no) tag is
    /// [`GraphError::UnregisteredConcatenation`] rather than a silent
    /// array-collect.
    pub fn concatenate(&self, tag: Option<&str>, mut chunks: Vec<Value>) -> Result<Value> {
        if chunks.is_empty() {
            return Err(GraphError::EmptyStream);
        }
        if chunks.len() == 1 {
            return Ok(chunks.pop().unwrap());
        }
        match tag.and_then(|t| self.by_tag.get(t)) {
            Some(f) => Ok(f(chunks)),
            None => Err(GraphError::UnregisteredConcatenation {
                tag: tag.unwrap_or_default().to_string(),
            }),
        }
    }
}

impl Default for ConcatenationRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// A node's execution logic, adapted to serve any of the four calling
/// conventions regardless of which one it was built from.
///
/// Cheap to clone: every field is `Arc`-backed, so the scheduler can hand a
/// clone to a spawned task without forcing nodes to be declared `Sync`
/// beyond what `Arc<dyn Fn>` already requires.
#[derive(Clone)]
pub struct Runnable {
    body: Body,
    pre: Vec<LifecycleHook>,
    post: Vec<LifecycleHook>,
    concat_tag: Option<String>,
    concat_registry: Arc<ConcatenationRegistry>,
}

impl Runnable {
    fn new(body: Body) -> Self {
        Self {
            body,
            pre: Vec::new(),
            post: Vec::new(),
            concat_tag: None,
            concat_registry: Arc::new(ConcatenationRegistry::with_defaults()),
        }
    }

    /// Build from a `Value -> Value` function.
    pub fn from_invoke(f: InvokeFn) -> Self {
        Self::new(Body::Invoke(f))
    }

    /// Build from a `Value -> StreamHandle<Value>` function.
    pub fn from_stream(f: StreamFn) -> Self {
        Self::new(Body::Stream(f))
    }

    /// Build from a `StreamHandle<Value> -> Value` function.
    pub fn from_collect(f: CollectFn) -> Self {
        Self::new(Body::Collect(f))
    }

    /// Build from a `StreamHandle<Value> -> StreamHandle<Value>` function.
    pub fn from_transform(f: TransformFn) -> Self {
        Self::new(Body::Transform(f))
    }

    /// Attach a hook run before dispatch, given the input value (or, for
    /// stream-input shapes, a placeholder `Value::Null` since the stream
    /// hasn't been drained yet).
    pub fn with_pre_hook(mut self, hook: LifecycleHook) -> Self {
        self.pre.push(hook);
        self
    }

    /// Attach a hook run after completion, given the output value (or
    /// `Value::Null` for stream outputs, which aren't drained here).
    pub fn with_post_hook(mut self, hook: LifecycleHook) -> Self {
        self.post.push(hook);
        self
    }

    /// Tag used to pick a concatenation function when this node's stream
    /// output needs draining to a single value.
    pub fn with_concat_tag(mut self, tag: impl Into<String>) -> Self {
        self.concat_tag = Some(tag.into());
        self
    }

    /// Use a custom concatenation registry instead of the default one.
    pub fn with_concat_registry(mut self, registry: Arc<ConcatenationRegistry>) -> Self {
        self.concat_registry = registry;
        self
    }

    fn run_pre(&self, input: &Value) {
        for hook in &self.pre {
            hook(input);
        }
    }

    fn run_post(&self, output: &Value) {
        for hook in &self.post {
            hook(output);
        }
    }

    async fn drain(&self, handle: StreamHandle<Value>) -> Result<Value> {
        let chunks = handle.collect().await;
        self.concat_registry.concatenate(self.concat_tag.as_deref(), chunks)
    }

    fn single(value: Value) -> StreamHandle<Value> {
        let (tx, handle) = StreamHandle::channel_with_capacity(1);
        tokio::spawn(async move {
            let _ = tx.send(value).await;
        });
        handle
    }

    /// Invoke with a plain value, returning a plain value.
    pub async fn invoke(&self, input: Value) -> Result<Value> {
        self.run_pre(&input);
        let output = match &self.body {
            Body::Invoke(f) => f(input).await?,
            Body::Stream(f) => {
                let handle = f(input).await?;
                self.drain(handle).await?
            }
            Body::Collect(f) => f(Self::single(input)).await?,
            Body::Transform(f) => {
                let out = f(Self::single(input)).await?;
                self.drain(out).await?
            }
        };
        self.run_post(&output);
        Ok(output)
    }

    /// Invoke with a plain value, returning a stream.
    pub async fn stream(&self, input: Value) -> Result<StreamHandle<Value>> {
        self.run_pre(&input);
        let output = match &self.body {
            Body::Invoke(f) => Self::single(f(input).await?),
            Body::Stream(f) => f(input).await?,
            Body::Collect(f) => Self::single(f(Self::single(input)).await?),
            Body::Transform(f) => f(Self::single(input)).await?,
        };
        Ok(output)
    }

    /// Invoke with a stream, returning a plain value (draining the input
    /// stream first for value-input shapes).
    pub async fn collect(&self, input: StreamHandle<Value>) -> Result<Value> {
        let output = match &self.body {
            Body::Invoke(f) => {
                let drained = self.drain(input).await?;
                f(drained).await?
            }
            Body::Stream(f) => {
                let drained = self.drain(input).await?;
                let out = f(drained).await?;
                self.drain(out).await?
            }
            Body::Collect(f) => f(input).await?,
            Body::Transform(f) => {
                let out = f(input).await?;
                self.drain(out).await?
            }
        };
        self.run_post(&output);
        Ok(output)
    }

    /// Invoke with a stream, returning a stream.
    pub async fn transform(&self, input: StreamHandle<Value>) -> Result<StreamHandle<Value>> {
        let output = match &self.body {
            Body::Invoke(f) => {
                let drained = self.drain(input).await?;
                Self::single(f(drained).await?)
            }
            Body::Stream(f) => {
                let drained = self.drain(input).await?;
                f(drained).await?
            }
            Body::Collect(f) => Self::single(f(input).await?),
            Body::Transform(f) => f(input).await?,
        };
        Ok(output)
    }
}

impl std::fmt::Debug for Runnable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = match &self.body {
            Body::Invoke(_) => "invoke",
            Body::Stream(_) => "stream",
            Body::Collect(_) => "collect",
            Body::Transform(_) => "transform",
        };
        f.debug_struct("Runnable").field("shape", &shape).finish_non_exhaustive()
    }
}

/// Wrap a synchronous value-mapping closure as an [`Invoke`](Body::Invoke)-shaped [`Runnable`].
pub fn runnable_fn<F>(f: F) -> Runnable
where
    F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Runnable::from_invoke(Arc::new(move |input| {
        let f = f.clone();
        Box::pin(async move { f(input) })
    }))
}

/// Wrap an async value-mapping function (returning an error via
/// [`GraphError`]) as an [`Invoke`](Body::Invoke)-shaped [`Runnable`].
pub fn runnable_async<F, Fut>(f: F) -> Runnable
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, GraphError>> + Send + 'static,
{
    let f = Arc::new(f);
    Runnable::from_invoke(Arc::new(move |input| {
        let f = f.clone();
        Box::pin(f(input))
    }))
}
