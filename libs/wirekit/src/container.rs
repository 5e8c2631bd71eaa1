//! Lifecycle container: declarative registration, graph build, ordered
//! construction, and start/stop hook orchestration.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{ComposeError, ShutdownFailure};
use crate::graph::Graph;
use crate::key::{Dep, TypeKey};

type AnyArc = Arc<dyn Any + Send + Sync>;
type BoxedCtor = Box<dyn FnOnce(&mut BuildCtx<'_>) -> anyhow::Result<AnyArc> + Send>;
type HookFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type HookFn = Box<dyn FnOnce(CancellationToken) -> HookFuture + Send>;

/// Container phase. `Failed` is terminal: it is reached from a build error
/// or from an unwound startup failure, and `stop` treats it as already
/// released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Declared,
    Built,
    Started,
    Stopping,
    Stopped,
    Failed,
}

/// A pair of lifecycle callbacks owned by one component. The pair is the
/// unit of unwinding: a component whose `on_start` never ran (or failed)
/// never has its `on_stop` invoked.
pub struct Hook {
    pub(crate) component: String,
    pub(crate) start: Option<HookFn>,
    pub(crate) stop: Option<HookFn>,
}

impl Hook {
    pub fn new() -> Self {
        Self {
            component: String::new(),
            start: None,
            stop: None,
        }
    }

    pub fn on_start<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.start = Some(Box::new(move |cancel| Box::pin(f(cancel))));
        self
    }

    pub fn on_stop<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.stop = Some(Box::new(move |cancel| Box::pin(f(cancel))));
        self
    }
}

impl Default for Hook {
    fn default() -> Self {
        Self::new()
    }
}

/// Handed to constructors and contribution producers. Resolves declared
/// dependencies and accepts lifecycle hooks.
pub struct BuildCtx<'a> {
    built: &'a HashMap<TypeId, AnyArc>,
    resolved: &'a HashMap<&'static str, Arc<Vec<AnyArc>>>,
    deps: &'a [Dep],
    component: &'a str,
    hooks: &'a mut Vec<Hook>,
}

impl BuildCtx<'_> {
    /// Resolve the single provider of `T`. The dependency must have been
    /// declared; hidden dependencies are rejected so the graph stays honest.
    pub fn get<T: Send + Sync + 'static>(&self) -> anyhow::Result<Arc<T>> {
        let key = TypeKey::of::<T>();
        if !self.deps.iter().any(|d| matches!(d, Dep::Type(k) if *k == key)) {
            anyhow::bail!(
                "'{}' is not a declared dependency of '{}'",
                key.name(),
                self.component
            );
        }
        let value = self
            .built
            .get(&key.id())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("'{}' has not been constructed", key.name()))?;
        value
            .downcast::<T>()
            .map_err(|_| anyhow::anyhow!("type mismatch resolving '{}'", key.name()))
    }

    /// Resolve every contribution in the named collection, in contribution
    /// registration order.
    pub fn collect<T: Send + Sync + 'static>(&self, name: &str) -> anyhow::Result<Vec<Arc<T>>> {
        if !self
            .deps
            .iter()
            .any(|d| matches!(d, Dep::Collection(n) if *n == name))
        {
            anyhow::bail!(
                "collection '{name}' is not a declared dependency of '{}'",
                self.component
            );
        }
        let seq = self
            .resolved
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("collection '{name}' has not been resolved"))?;
        seq.iter()
            .map(|v| {
                v.clone()
                    .downcast::<T>()
                    .map_err(|_| anyhow::anyhow!("type mismatch in collection '{name}'"))
            })
            .collect()
    }

    /// Register lifecycle callbacks for the component under construction.
    /// Hooks run in construction order on start and reverse realized order
    /// on stop.
    pub fn append_hook(&mut self, hook: Hook) {
        let mut hook = hook;
        hook.component = self.component.to_string();
        self.hooks.push(hook);
    }
}

enum NodeKind {
    Provider {
        key: TypeKey,
        ctor: Option<BoxedCtor>,
    },
    Contribution {
        collection: &'static str,
        slot: usize,
        ctor: Option<BoxedCtor>,
    },
    Collection {
        name: &'static str,
    },
}

struct Node {
    label: String,
    deps: Vec<Dep>,
    kind: NodeKind,
}

struct CollectionMeta {
    node: usize,
    value_type: TypeKey,
    slots: usize,
}

/// Timeouts for the convenience `run` driver.
pub struct RunOptions {
    pub start_deadline: Duration,
    pub stop_deadline: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            start_deadline: Duration::from_secs(30),
            stop_deadline: Duration::from_secs(30),
        }
    }
}

/// The composition root. Providers, contributions and collections are
/// registered declaratively, then `build` validates the graph, `start`
/// constructs everything exactly once and runs start hooks in dependency
/// order, and `stop` unwinds in reverse realized order.
pub struct Container {
    nodes: Vec<Node>,
    providers: HashMap<TypeId, usize>,
    collections: HashMap<&'static str, CollectionMeta>,
    order: Vec<usize>,
    state: State,
    built: HashMap<TypeId, AnyArc>,
    resolved: HashMap<&'static str, Arc<Vec<AnyArc>>>,
    pending: HashMap<&'static str, Vec<Option<AnyArc>>>,
    hooks: Vec<Hook>,
    started: Vec<usize>,
    cancel: CancellationToken,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            providers: HashMap::new(),
            collections: HashMap::new(),
            order: Vec::new(),
            state: State::Declared,
            built: HashMap::new(),
            resolved: HashMap::new(),
            pending: HashMap::new(),
            hooks: Vec::new(),
            started: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Token cancelled when the process should begin shutdown. Callers may
    /// await it, or cancel it themselves to trigger shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn ensure_declared(&self, action: &'static str) -> Result<(), ComposeError> {
        if self.state != State::Declared {
            return Err(ComposeError::InvalidState {
                state: self.state,
                action,
            });
        }
        Ok(())
    }

    /// Register the single provider of `T`. The constructor runs exactly
    /// once, during `start`, after every declared dependency is available.
    pub fn provide<T, F>(&mut self, deps: &[Dep], ctor: F) -> Result<(), ComposeError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&mut BuildCtx<'_>) -> anyhow::Result<T> + Send + 'static,
    {
        self.ensure_declared("provide")?;
        let key = TypeKey::of::<T>();
        if self.providers.contains_key(&key.id()) {
            return Err(ComposeError::DuplicateProvider { key: key.name() });
        }
        let node = self.nodes.len();
        self.nodes.push(Node {
            label: key.name().to_string(),
            deps: deps.to_vec(),
            kind: NodeKind::Provider {
                key,
                ctor: Some(Box::new(move |cx| {
                    ctor(cx).map(|v| Arc::new(v) as AnyArc)
                })),
            },
        });
        self.providers.insert(key.id(), node);
        Ok(())
    }

    /// Register an already-constructed value as the provider of `T`.
    pub fn supply<T>(&mut self, value: T) -> Result<(), ComposeError>
    where
        T: Send + Sync + 'static,
    {
        self.provide::<T, _>(&[], move |_| Ok(value))
    }

    /// Declare a collection holding values of type `T`. Exactly one
    /// declaration per name is allowed.
    pub fn declare_collection<T>(&mut self, name: &'static str) -> Result<(), ComposeError>
    where
        T: Send + Sync + 'static,
    {
        self.ensure_declared("declare a collection")?;
        if self.collections.contains_key(name) {
            return Err(ComposeError::DuplicateCollection { name });
        }
        let node = self.nodes.len();
        self.nodes.push(Node {
            label: format!("collection '{name}'"),
            deps: Vec::new(),
            kind: NodeKind::Collection { name },
        });
        self.collections.insert(
            name,
            CollectionMeta {
                node,
                value_type: TypeKey::of::<T>(),
                slots: 0,
            },
        );
        Ok(())
    }

    /// Contribute one value to a declared collection. The producer runs
    /// exactly once; its value lands in the slot matching this call's
    /// registration order, regardless of when dependencies let it execute.
    pub fn contribute<T, F>(
        &mut self,
        name: &'static str,
        deps: &[Dep],
        producer: F,
    ) -> Result<(), ComposeError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&mut BuildCtx<'_>) -> anyhow::Result<T> + Send + 'static,
    {
        self.ensure_declared("contribute")?;
        let meta = self
            .collections
            .get_mut(name)
            .ok_or_else(|| ComposeError::MissingDependency {
                consumer: "contribution".to_string(),
                key: format!("collection '{name}'"),
            })?;
        let found = TypeKey::of::<T>();
        if meta.value_type != found {
            return Err(ComposeError::CollectionTypeMismatch {
                name,
                expected: meta.value_type.name(),
                found: found.name(),
            });
        }
        let slot = meta.slots;
        meta.slots += 1;
        self.nodes.push(Node {
            label: format!("{name}[{slot}]"),
            deps: deps.to_vec(),
            kind: NodeKind::Contribution {
                collection: name,
                slot,
                ctor: Some(Box::new(move |cx| {
                    producer(cx).map(|v| Arc::new(v) as AnyArc)
                })),
            },
        });
        Ok(())
    }

    /// Validate the dependency graph and freeze the construction order.
    pub fn build(&mut self) -> Result<(), ComposeError> {
        self.ensure_declared("build")?;
        match self.compute_order() {
            Ok(order) => {
                tracing::debug!(
                    components = order.len(),
                    "dependency order resolved (topo)"
                );
                self.order = order;
                self.state = State::Built;
                Ok(())
            }
            Err(e) => {
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    fn compute_order(&self) -> Result<Vec<usize>, ComposeError> {
        let labels: Vec<String> = self.nodes.iter().map(|n| n.label.clone()).collect();
        let mut graph = Graph::new(labels);

        for (i, node) in self.nodes.iter().enumerate() {
            for dep in &node.deps {
                let from = match dep {
                    Dep::Type(key) => self.providers.get(&key.id()).copied().ok_or_else(|| {
                        ComposeError::MissingDependency {
                            consumer: node.label.clone(),
                            key: format!("'{}'", key.name()),
                        }
                    })?,
                    Dep::Collection(name) => self
                        .collections
                        .get(name)
                        .map(|m| m.node)
                        .ok_or_else(|| ComposeError::MissingDependency {
                            consumer: node.label.clone(),
                            key: format!("collection '{name}'"),
                        })?,
                };
                graph.add_edge(from, i);
            }
            // Contributions feed their collection node, so the frozen
            // sequence is complete before any consumer runs.
            if let NodeKind::Contribution { collection, .. } = &node.kind {
                if let Some(meta) = self.collections.get(collection) {
                    graph.add_edge(i, meta.node);
                }
            }
        }

        if let Some(path) = graph.cycle_path() {
            return Err(ComposeError::CyclicDependency { path });
        }
        Ok(graph.topo_sorted())
    }

    fn construct(&mut self) -> Result<(), ComposeError> {
        for (name, meta) in &self.collections {
            self.pending.insert(*name, vec![None; meta.slots]);
        }

        let order = self.order.clone();
        for idx in order {
            enum Step {
                Build {
                    ctor: BoxedCtor,
                    target: Target,
                },
                Freeze(&'static str),
            }
            enum Target {
                Single(TypeId),
                Slot(&'static str, usize),
            }

            let label = self.nodes[idx].label.clone();
            let deps = self.nodes[idx].deps.clone();
            let step = match &mut self.nodes[idx].kind {
                NodeKind::Provider { key, ctor } => Step::Build {
                    ctor: ctor.take().ok_or_else(|| ComposeError::Construct {
                        component: label.clone(),
                        source: anyhow::anyhow!("constructor already consumed"),
                    })?,
                    target: Target::Single(key.id()),
                },
                NodeKind::Contribution {
                    collection,
                    slot,
                    ctor,
                } => Step::Build {
                    ctor: ctor.take().ok_or_else(|| ComposeError::Construct {
                        component: label.clone(),
                        source: anyhow::anyhow!("producer already consumed"),
                    })?,
                    target: Target::Slot(*collection, *slot),
                },
                NodeKind::Collection { name } => Step::Freeze(*name),
            };

            match step {
                Step::Build { ctor, target } => {
                    let value = {
                        let mut cx = BuildCtx {
                            built: &self.built,
                            resolved: &self.resolved,
                            deps: &deps,
                            component: &label,
                            hooks: &mut self.hooks,
                        };
                        ctor(&mut cx).map_err(|source| ComposeError::Construct {
                            component: label.clone(),
                            source,
                        })?
                    };
                    tracing::trace!(component = %label, "constructed");
                    match target {
                        Target::Single(id) => {
                            self.built.insert(id, value);
                        }
                        Target::Slot(name, slot) => {
                            if let Some(slots) = self.pending.get_mut(name) {
                                slots[slot] = Some(value);
                            }
                        }
                    }
                }
                Step::Freeze(name) => {
                    let slots = self.pending.remove(name).unwrap_or_default();
                    let values: Vec<AnyArc> = slots.into_iter().flatten().collect();
                    tracing::trace!(collection = name, len = values.len(), "collection resolved");
                    self.resolved.insert(name, Arc::new(values));
                }
            }
        }
        Ok(())
    }

    /// Construct all components, then run start hooks in construction order
    /// under `deadline`. On any hook failure the already-started components
    /// are stopped in reverse order before the error is returned, so callers
    /// never observe a half-started system.
    pub async fn start(&mut self, deadline: Duration) -> Result<(), ComposeError> {
        if self.state != State::Built {
            return Err(ComposeError::InvalidState {
                state: self.state,
                action: "start",
            });
        }
        if let Err(e) = self.construct() {
            self.state = State::Failed;
            return Err(e);
        }

        let t0 = Instant::now();
        for i in 0..self.hooks.len() {
            let component = self.hooks[i].component.clone();
            match self.hooks[i].start.take() {
                Some(f) => {
                    let remaining = deadline.saturating_sub(t0.elapsed());
                    tracing::debug!(component = %component, "start hook");
                    match tokio::time::timeout(remaining, f(self.cancel.clone())).await {
                        Ok(Ok(())) => self.started.push(i),
                        Ok(Err(source)) => {
                            tracing::error!(component = %component, error = %source, "start hook failed, unwinding");
                            self.unwind(deadline).await;
                            self.state = State::Failed;
                            return Err(ComposeError::StartupHook { component, source });
                        }
                        Err(_) => {
                            tracing::error!(component = %component, "start hook timed out, unwinding");
                            self.unwind(deadline).await;
                            self.state = State::Failed;
                            return Err(ComposeError::Timeout {
                                component,
                                phase: "start",
                                deadline,
                            });
                        }
                    }
                }
                // No start hook: the component is trivially realized, so its
                // stop hook (if any) participates in reverse-order shutdown.
                None => self.started.push(i),
            }
        }
        self.state = State::Started;
        Ok(())
    }

    async fn unwind(&mut self, deadline: Duration) {
        self.cancel.cancel();
        let t0 = Instant::now();
        let started = std::mem::take(&mut self.started);
        for &i in started.iter().rev() {
            let component = self.hooks[i].component.clone();
            if let Some(f) = self.hooks[i].stop.take() {
                let remaining = deadline.saturating_sub(t0.elapsed());
                match tokio::time::timeout(remaining, f(self.cancel.clone())).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(component = %component, error = %e, "stop hook failed during unwind")
                    }
                    Err(_) => {
                        tracing::warn!(component = %component, "stop hook timed out during unwind")
                    }
                }
            }
        }
    }

    /// Run stop hooks in reverse realized start order. Every started
    /// component gets a shutdown attempt; failures are collected and
    /// returned as one aggregate error. A container that never started
    /// returns `Ok` immediately.
    pub async fn stop(&mut self, deadline: Duration) -> Result<(), ComposeError> {
        match self.state {
            State::Started => {}
            State::Stopping => {
                return Err(ComposeError::InvalidState {
                    state: self.state,
                    action: "stop",
                })
            }
            _ => return Ok(()),
        }
        self.state = State::Stopping;
        self.cancel.cancel();

        let t0 = Instant::now();
        let mut failures = Vec::new();
        let started = std::mem::take(&mut self.started);
        for &i in started.iter().rev() {
            let component = self.hooks[i].component.clone();
            if let Some(f) = self.hooks[i].stop.take() {
                let remaining = deadline.saturating_sub(t0.elapsed());
                tracing::debug!(component = %component, "stop hook");
                match tokio::time::timeout(remaining, f(self.cancel.clone())).await {
                    Ok(Ok(())) => {}
                    Ok(Err(source)) => failures.push(ShutdownFailure { component, source }),
                    Err(_) => failures.push(ShutdownFailure {
                        component,
                        source: anyhow::anyhow!("stop hook exceeded the {deadline:?} deadline"),
                    }),
                }
            }
        }
        self.state = State::Stopped;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ComposeError::ShutdownAggregate { failures })
        }
    }

    /// Fetch a constructed component. `None` before `start` or for types
    /// never provided.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.built
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|v| v.downcast::<T>().ok())
    }

    /// Read a resolved collection. The cached sequence is returned as-is;
    /// producers are never re-invoked.
    pub fn resolve<T: Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> Result<Vec<Arc<T>>, ComposeError> {
        let seq = self
            .resolved
            .get(name)
            .ok_or_else(|| ComposeError::MissingDependency {
                consumer: "resolve".to_string(),
                key: format!("collection '{name}'"),
            })?;
        seq.iter()
            .map(|v| {
                v.clone().downcast::<T>().map_err(|_| {
                    ComposeError::MissingDependency {
                        consumer: "resolve".to_string(),
                        key: format!("collection '{name}' (type mismatch)"),
                    }
                })
            })
            .collect()
    }

    /// Full cycle: build (if still declared), start, wait for the shutdown
    /// token or the supplied future, stop.
    pub async fn run<F>(&mut self, opts: RunOptions, shutdown: F) -> Result<(), ComposeError>
    where
        F: Future<Output = ()>,
    {
        if self.state == State::Declared {
            self.build()?;
        }
        self.start(opts.start_deadline).await?;

        let cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("shutdown token cancelled");
            }
            _ = shutdown => {
                tracing::info!("shutdown trigger completed");
            }
        }
        self.stop(opts.stop_deadline).await
    }
}
