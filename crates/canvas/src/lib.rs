#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! The session orchestrator: owns the active system instance, the
//! generators registry, the metric tracer, and flow-analysis scopes for one
//! simulation session, and enforces consistency whenever any of them
//! changes (spec.md §4.E).
//!
//! The generator registry and every other mutable field are guarded by two
//! distinct locks that are never held at the same time by the same call —
//! each lock is always acquired, used, and released before the other is
//! touched, so no fixed acquisition order is required.

mod anchor;
mod executor;

pub use anchor::SimAnchor;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use context::param;
use context::Value;
use executor::{CanvasExecutor, CollectingTracer};
use generator::{Generator, GeneratorConfig};
use metricspec::{MetricSpecConfig, MetricSpecSummary};
use sim_core::{
    AllPathsTraceData, EvalError, EvaluatorFactory, FileInstance, FlowAnalysisResult, FlowStrategyError,
    FlowStrategyRegistry, GeneratorLoad, Loader, LoaderError, MethodCall, MethodDecl, PathExplorer, PathExplorerError,
    SystemInstance, TraceEvent,
};
use store::MetricStore;
use task::labels::ProcessLabels;
use task::TaskManager;
use tracer::MetricTracer;

/// Errors raised by a canvas operation.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The operation requires an active system, and none is active.
    #[error("no active system on canvas")]
    NoActiveSystem,

    /// The operation requires a loaded file, and none has been loaded.
    #[error("no file loaded on canvas")]
    NotLoaded,

    /// A generator or metric spec with this id already exists.
    #[error("already exists: {id}")]
    AlreadyExists {
        /// The id that collided.
        id: String,
    },

    /// A generator or metric spec with this id does not exist.
    #[error("not found: {id}")]
    NotFound {
        /// The id that was requested.
        id: String,
    },

    /// A supplied value failed validation or coercion.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// A human-readable description of the problem.
        message: String,
    },

    /// The canvas has been closed and no longer accepts operations.
    #[error("canvas is closed")]
    Closed,

    /// The loader failed to load or instantiate a system.
    #[error(transparent)]
    Load(#[from] LoaderError),

    /// A generator's own validation/registration failed.
    #[error(transparent)]
    Generator(#[from] generator::Error),

    /// A metric spec's own validation/registration failed.
    #[error(transparent)]
    MetricSpec(#[from] tracer::Error),

    /// The flow-analysis strategy failed to produce a result.
    #[error(transparent)]
    Flow(#[from] FlowStrategyError),

    /// The evaluator failed to run a trace to completion.
    #[error(transparent)]
    Eval(#[from] EvalError),

    /// The path-traversal engine failed.
    #[error(transparent)]
    PathExplorer(#[from] PathExplorerError),
}

/// The canvas's coarse lifecycle state, derived from its current fields
/// (spec.md §4.E state machine). Never stored directly except for the
/// terminal `Closed` bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CanvasState {
    /// No file loaded, no active system.
    Empty,
    /// A file has been loaded, but no system has been activated yet.
    Loaded,
    /// A system is active, with zero generators currently running.
    Active,
    /// A system is active and at least one generator is running.
    Running,
    /// The canvas has been closed; terminal.
    Closed,
}

/// A read-only snapshot of one generator, for the façade's `Generator` wire
/// shape.
#[derive(Clone, Debug)]
pub struct GeneratorSummary {
    /// The generator's identifier.
    pub id: String,
    /// The canvas this generator belongs to.
    pub canvas_id: String,
    /// The generator's human-readable name.
    pub name: String,
    /// Dotted path of the target component.
    pub component: String,
    /// The target method name.
    pub method: String,
    /// Requests per second.
    pub rate: f64,
    /// Optional cap on virtual simulated time, in seconds.
    pub duration: Option<f64>,
    /// Whether the generator's worker is currently running.
    pub enabled: bool,
    /// Wall-clock timestamp this generator was created at.
    pub created_at: f64,
    /// Wall-clock timestamp this generator was last updated at.
    pub updated_at: f64,
}

/// The outcome of a bulk generator operation (`StartAllGenerators`/
/// `StopAllGenerators`).
#[derive(Clone, Debug, Default)]
pub struct BulkOutcome {
    /// Total number of generators considered.
    pub total: usize,
    /// Number of generators this call transitioned.
    pub processed: usize,
    /// Number of generators already in the target state.
    pub already_in_state: usize,
    /// Number of generators this call failed to transition. Per-generator
    /// start/stop is currently infallible, so this is always `0`; the field
    /// is kept so the façade's return shape matches spec.md §4.E's contract
    /// and a future fallible transition doesn't change the shape again.
    pub failed: usize,
    /// Ids of the generators counted in `failed`.
    pub failed_ids: Vec<String>,
}

/// One edge of the `GetSystemDiagram` projection: a call from one component
/// into another, carrying the estimated arrival rate that drove it.
#[derive(Clone, Debug)]
pub struct DiagramEdge {
    /// The calling component's dotted path.
    pub from: String,
    /// The called component's dotted path.
    pub to: String,
    /// The method invoked on `to`.
    pub method: String,
    /// The estimated arrival rate for this edge, in events per second.
    pub rate: f64,
}

/// A read-only projection of the active system's component graph and
/// current flow rates, for the façade's `GetSystemDiagram` operation. The
/// visual layout itself is the out-of-scope renderer's responsibility.
#[derive(Clone, Debug)]
pub struct SystemDiagram {
    /// The name of the active system.
    pub system_name: String,
    /// Every component instance path reachable in the system.
    pub nodes: Vec<String>,
    /// Call-graph edges currently carrying estimated traffic.
    pub edges: Vec<DiagramEdge>,
}

#[derive(Clone)]
struct ActiveSystem {
    name: String,
    system: Arc<dyn SystemInstance>,
    tracer: Arc<MetricTracer>,
    anchor: Arc<SimAnchor>,
    executor: Arc<CanvasExecutor>,
}

struct Inner {
    file: Option<Arc<dyn FileInstance>>,
    systems: HashMap<String, Arc<dyn SystemInstance>>,
    active: Option<ActiveSystem>,
    flow_strategy: String,
    current_flow: FlowAnalysisResult,
    manual_overrides: HashMap<String, f64>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            file: None,
            systems: HashMap::new(),
            active: None,
            flow_strategy: "default".to_string(),
            current_flow: FlowAnalysisResult::default(),
            manual_overrides: HashMap::new(),
        }
    }
}

/// A stateful simulation session: the active system instance, the traffic
/// generators driving it, the metric tracer observing it, and the
/// flow-analysis scopes feeding downstream capacity models.
pub struct Canvas {
    id: String,
    loader: Arc<dyn Loader>,
    evaluator_factory: Arc<dyn EvaluatorFactory>,
    flow_registry: Arc<dyn FlowStrategyRegistry>,
    path_explorer: Arc<dyn PathExplorer>,
    store: Arc<dyn MetricStore>,
    task_manager: Mutex<TaskManager>,
    inner: Mutex<Inner>,
    generators: Mutex<HashMap<String, Arc<Generator>>>,
    closed: AtomicBool,
}

impl Canvas {
    /// Builds an empty canvas bound to the given external collaborators and
    /// a metric store shared across the canvas's lifetime.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        loader: Arc<dyn Loader>,
        evaluator_factory: Arc<dyn EvaluatorFactory>,
        flow_registry: Arc<dyn FlowStrategyRegistry>,
        path_explorer: Arc<dyn PathExplorer>,
        store: Arc<dyn MetricStore>,
    ) -> Self {
        let task_manager = TaskManager::with_process_labels(ProcessLabels::new(&id));
        Self {
            id,
            loader,
            evaluator_factory,
            flow_registry,
            path_explorer,
            store,
            task_manager: Mutex::new(task_manager),
            inner: Mutex::new(Inner::default()),
            generators: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// This canvas's identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The metric store backing every metric spec this canvas registers.
    /// Used by the façade to run `QueryMetrics`/`AggregateMetrics`/
    /// `StreamMetrics` without going through the canvas for read-only
    /// operations.
    pub fn store(&self) -> Arc<dyn MetricStore> {
        self.store.clone()
    }

    /// The canvas's coarse lifecycle state.
    pub fn state(&self) -> CanvasState {
        if self.closed.load(Ordering::Acquire) {
            return CanvasState::Closed;
        }
        let inner = self.lock_inner();
        match &inner.active {
            None if inner.file.is_some() => CanvasState::Loaded,
            None => CanvasState::Empty,
            Some(_) => {
                let running = self.lock_generators().values().any(|g| g.is_running());
                if running {
                    CanvasState::Running
                } else {
                    CanvasState::Active
                }
            }
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("canvas inner lock poisoned")
    }

    fn lock_generators(&self) -> MutexGuard<'_, HashMap<String, Arc<Generator>>> {
        self.generators.lock().expect("generators lock poisoned")
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn generator_loads(&self) -> Vec<GeneratorLoad> {
        self.lock_generators()
            .values()
            .map(|g| GeneratorLoad {
                component: g.component_path().to_string(),
                method: g.method_name().to_string(),
                rate: g.rate(),
            })
            .collect()
    }

    /// Re-runs the active flow strategy over the current generator set and
    /// layers any manual overrides on top. A no-op if no system is active.
    /// Never holds the generators lock and the inner lock at the same time:
    /// callers pass a load snapshot taken before or after, never during,
    /// that lock.
    fn recompute_flow(&self, inner: &mut Inner, loads: &[GeneratorLoad]) -> Result<(), Error> {
        let Some(active) = inner.active.clone() else {
            return Ok(());
        };
        let mut result = self.flow_registry.evaluate(&inner.flow_strategy, active.system.as_ref(), loads)?;
        for (key, rate) in &inner.manual_overrides {
            let _ = result.component_rates.insert(key.clone(), *rate);
        }
        active.system.apply_flow_rates(&result.component_rates);
        inner.current_flow = result;
        Ok(())
    }

    // --- file/system lifecycle -------------------------------------------------

    /// Loads and validates the file at `path`. Does not touch generators or
    /// the active system.
    pub fn load(&self, path: &str) -> Result<(), Error> {
        self.ensure_open()?;
        let file: Arc<dyn FileInstance> = Arc::from(self.loader.load_file(path)?);
        let mut inner = self.lock_inner();
        inner.file = Some(file);
        inner.systems.clear();
        Ok(())
    }

    /// Instantiates the named system declared in the loaded file, tearing
    /// down the previous metric tracer and generators (if any were
    /// running) and recomputing initial flow scopes.
    pub async fn use_system(&self, name: &str, now: f64) -> Result<(), Error> {
        self.ensure_open()?;
        self.teardown_active().await;

        let mut inner = self.lock_inner();
        let file = inner.file.clone().ok_or(Error::NotLoaded)?;
        let system = match inner.systems.get(name) {
            Some(system) => system.clone(),
            None => {
                let system: Arc<dyn SystemInstance> = Arc::from(file.new_system(name)?);
                let _ = inner.systems.insert(name.to_string(), system.clone());
                system
            }
        };

        let anchor = Arc::new(SimAnchor::new());
        let metric_tracer = Arc::new(MetricTracer::new(self.id.clone(), self.store.clone(), anchor.clone()));
        let executor = Arc::new(CanvasExecutor::new(
            file,
            system.clone(),
            self.evaluator_factory.clone(),
            metric_tracer.clone(),
        ));
        inner.active = Some(ActiveSystem {
            name: name.to_string(),
            system,
            tracer: metric_tracer,
            anchor,
            executor,
        });
        inner.current_flow = FlowAnalysisResult::default();
        self.recompute_flow(&mut inner, &[])
    }

    /// Stops every generator (waiting for confirmation) and clears the
    /// current tracer, if a system is active.
    async fn teardown_active(&self) {
        let generator_list: Vec<Arc<Generator>> = self.lock_generators().drain().map(|(_, g)| g).collect();
        for generator in &generator_list {
            generator.stop().await;
        }
        let active_tracer = self.lock_inner().active.as_ref().map(|active| active.tracer.clone());
        if let Some(tracer) = active_tracer {
            tracer.clear();
        }
    }

    /// Stops all generators, clears the metric tracer, drops the active
    /// system, discards loaded systems, and resets flow state and manual
    /// overrides. Always succeeds (spec.md §7, "Reset/Close always
    /// succeed").
    pub async fn reset(&self) {
        self.teardown_active().await;
        let mut inner = self.lock_inner();
        inner.file = None;
        inner.systems.clear();
        inner.active = None;
        inner.current_flow = FlowAnalysisResult::default();
        inner.manual_overrides.clear();
    }

    /// Clears the tracer and marks the canvas closed; idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.reset().await;
    }

    // --- parameters --------------------------------------------------------

    /// Parses a dotted parameter path, coerces `value` into the target
    /// component's declared parameter type, and applies it. Triggers an
    /// implicit flow recompute.
    pub fn set_parameter(&self, path: &str, value: Value) -> Result<(), Error> {
        self.ensure_open()?;
        let mut inner = self.lock_inner();
        let active = inner.active.as_ref().ok_or(Error::NoActiveSystem)?.clone();
        let target_type = active.system.param_type(path)?;
        let coerced = param::coerce(value, target_type).map_err(|err| Error::InvalidArgument {
            message: err.to_string(),
        })?;
        active.system.set_param(path, coerced)?;
        let loads = self.generator_loads();
        self.recompute_flow(&mut inner, &loads)
    }

    /// Reads back the current value of the parameter at `path`.
    pub fn get_parameter(&self, path: &str) -> Result<Value, Error> {
        self.ensure_open()?;
        let inner = self.lock_inner();
        let active = inner.active.as_ref().ok_or(Error::NoActiveSystem)?;
        Ok(active.system.get_param(path)?)
    }

    /// Validates and coerces every `(path, value)` pair before applying any
    /// of them; on any failure, none are applied. On success, returns the
    /// values each path held before the batch and recomputes flows once.
    pub fn batch_set_parameters(&self, values: HashMap<String, Value>) -> Result<HashMap<String, Value>, Error> {
        self.ensure_open()?;
        let mut inner = self.lock_inner();
        let active = inner.active.as_ref().ok_or(Error::NoActiveSystem)?.clone();

        let mut coerced = HashMap::with_capacity(values.len());
        let mut old_values = HashMap::with_capacity(values.len());
        for (path, value) in values {
            let target_type = active.system.param_type(&path)?;
            let value = param::coerce(value, target_type).map_err(|err| Error::InvalidArgument {
                message: err.to_string(),
            })?;
            let _ = old_values.insert(path.clone(), active.system.get_param(&path)?);
            let _ = coerced.insert(path, value);
        }
        for (path, value) in coerced {
            active.system.set_param(&path, value)?;
        }
        let loads = self.generator_loads();
        self.recompute_flow(&mut inner, &loads)?;
        Ok(old_values)
    }

    // --- flow integration ----------------------------------------------------

    /// Sets a manual per-`"component.method"` arrival-rate override, layered
    /// on top of the flow strategy's output, and recomputes flows.
    pub fn set_manual_rate_override(&self, key: String, rate: f64) -> Result<(), Error> {
        self.ensure_open()?;
        let mut inner = self.lock_inner();
        let _ = inner.manual_overrides.insert(key, rate);
        let loads = self.generator_loads();
        self.recompute_flow(&mut inner, &loads)
    }

    /// The canvas's current, applied flow-analysis result.
    pub fn current_flow(&self) -> FlowAnalysisResult {
        self.lock_inner().current_flow.clone()
    }

    // --- generators ----------------------------------------------------------

    /// Resolves the generator's target, registers it, and starts its
    /// worker if `config.enabled`. Requires an active system.
    pub fn add_generator(&self, config: GeneratorConfig, now: f64) -> Result<(), Error> {
        self.ensure_open()?;
        let id = config.id.clone();
        if self.lock_generators().contains_key(&id) {
            return Err(Error::AlreadyExists { id });
        }

        let active = {
            let inner = self.lock_inner();
            inner.active.as_ref().ok_or(Error::NoActiveSystem)?.clone()
        };
        let component = active.system.resolve(&config.component)?;
        let method = MethodDecl::new(config.method.clone());
        let enabled = config.enabled;
        let generator = Arc::new(Generator::new(
            self.id.clone(),
            config,
            component,
            method,
            active.executor.clone(),
            now,
        )?);

        if enabled {
            let mut task_manager = self.task_manager.lock().expect("task manager lock poisoned");
            generator.start(&mut task_manager);
            active.anchor.anchor(now);
        }

        let _ = self.lock_generators().insert(id, generator);

        let loads = self.generator_loads();
        let mut inner = self.lock_inner();
        self.recompute_flow(&mut inner, &loads)
    }

    /// Renames the generator and/or changes its rate/duration. Forbidden to
    /// change the target component or method. Restarts the worker only if
    /// it was running.
    pub async fn update_generator(
        &self,
        id: &str,
        name: Option<String>,
        rate: Option<f64>,
        duration: Option<Option<f64>>,
        now: f64,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        let generator = self
            .lock_generators()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound { id: id.to_string() })?;
        let was_running = generator.is_running();
        generator.update(name, rate, duration, now);
        if was_running {
            generator.stop().await;
            let mut task_manager = self.task_manager.lock().expect("task manager lock poisoned");
            generator.start(&mut task_manager);
        }
        let loads = self.generator_loads();
        let mut inner = self.lock_inner();
        self.recompute_flow(&mut inner, &loads)
    }

    /// Stops (if running) and removes a generator, recomputing flows once.
    pub async fn remove_generator(&self, id: &str) -> Result<(), Error> {
        self.ensure_open()?;
        let generator = self
            .lock_generators()
            .remove(id)
            .ok_or_else(|| Error::NotFound { id: id.to_string() })?;
        generator.stop().await;
        let loads = self.generator_loads();
        let mut inner = self.lock_inner();
        self.recompute_flow(&mut inner, &loads)
    }

    /// Starts a single generator; idempotent. Anchors the simulation-start
    /// wall-clock on first start.
    pub fn start_generator(&self, id: &str, now: f64) -> Result<(), Error> {
        self.ensure_open()?;
        let generator = self
            .lock_generators()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound { id: id.to_string() })?;
        {
            let mut task_manager = self.task_manager.lock().expect("task manager lock poisoned");
            generator.start(&mut task_manager);
        }
        if let Some(active) = &self.lock_inner().active {
            active.anchor.anchor(now);
        }
        let loads = self.generator_loads();
        let mut inner = self.lock_inner();
        self.recompute_flow(&mut inner, &loads)
    }

    /// Stops a single generator; idempotent.
    pub async fn stop_generator(&self, id: &str) -> Result<(), Error> {
        self.ensure_open()?;
        let generator = self
            .lock_generators()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound { id: id.to_string() })?;
        generator.stop().await;
        let loads = self.generator_loads();
        let mut inner = self.lock_inner();
        self.recompute_flow(&mut inner, &loads)
    }

    /// Starts every generator not already running, recomputing flows once.
    pub fn start_all_generators(&self, now: f64) -> BulkOutcome {
        let generators: Vec<Arc<Generator>> = self.lock_generators().values().cloned().collect();
        let mut outcome = BulkOutcome {
            total: generators.len(),
            ..BulkOutcome::default()
        };
        let mut started_any = false;
        {
            let mut task_manager = self.task_manager.lock().expect("task manager lock poisoned");
            for generator in &generators {
                if generator.is_running() {
                    outcome.already_in_state += 1;
                } else {
                    generator.start(&mut task_manager);
                    outcome.processed += 1;
                    started_any = true;
                }
            }
        }
        if started_any {
            if let Some(active) = &self.lock_inner().active {
                active.anchor.anchor(now);
            }
        }
        let loads = self.generator_loads();
        let mut inner = self.lock_inner();
        let _ = self.recompute_flow(&mut inner, &loads);
        outcome
    }

    /// Stops every running generator, recomputing flows once.
    pub async fn stop_all_generators(&self) -> BulkOutcome {
        let generators: Vec<Arc<Generator>> = self.lock_generators().values().cloned().collect();
        let mut outcome = BulkOutcome {
            total: generators.len(),
            ..BulkOutcome::default()
        };
        for generator in &generators {
            if generator.is_running() {
                generator.stop().await;
                outcome.processed += 1;
            } else {
                outcome.already_in_state += 1;
            }
        }
        let loads = self.generator_loads();
        let mut inner = self.lock_inner();
        let _ = self.recompute_flow(&mut inner, &loads);
        outcome
    }

    /// A read-only snapshot of every registered generator.
    pub fn list_generators(&self) -> Vec<GeneratorSummary> {
        self.lock_generators().values().map(|g| summarize_generator(&self.id, g)).collect()
    }

    /// A read-only snapshot of one registered generator, if it exists.
    pub fn get_generator(&self, id: &str) -> Option<GeneratorSummary> {
        self.lock_generators().get(id).map(|g| summarize_generator(&self.id, g))
    }

    // --- metric specs ----------------------------------------------------------

    /// Validates, registers, and starts a metric spec against the active
    /// system.
    pub fn add_metric_spec(&self, config: MetricSpecConfig, now: f64) -> Result<(), Error> {
        self.ensure_open()?;
        let inner = self.lock_inner();
        let active = inner.active.as_ref().ok_or(Error::NoActiveSystem)?;
        let component = active.system.resolve(&config.component)?;
        let mut task_manager = self.task_manager.lock().expect("task manager lock poisoned");
        active.tracer.add_metric_spec(config, component, &mut task_manager, now)?;
        Ok(())
    }

    /// Stops and removes a metric spec. Returns whether it existed.
    pub fn remove_metric_spec(&self, id: &str) -> Result<bool, Error> {
        self.ensure_open()?;
        let inner = self.lock_inner();
        let active = inner.active.as_ref().ok_or(Error::NoActiveSystem)?;
        Ok(active.tracer.remove_metric_spec(id))
    }

    /// Lists every registered metric spec's current configuration and state.
    pub fn list_metric_specs(&self) -> Vec<MetricSpecSummary> {
        match &self.lock_inner().active {
            Some(active) => active.tracer.list_metric_spec_summaries(),
            None => Vec::new(),
        }
    }

    /// A read-only snapshot of one registered metric spec, if it exists.
    pub fn get_metric_spec(&self, id: &str) -> Option<MetricSpecSummary> {
        self.lock_inner().active.as_ref().and_then(|active| active.tracer.get_metric_spec(id))
    }

    // --- tracing ---------------------------------------------------------------

    /// Invokes `method` on `component` once, at virtual time `0`, through a
    /// one-shot collecting tracer, and returns every trace event produced.
    pub fn execute_trace(&self, component: &str, method: &str) -> Result<Vec<TraceEvent>, Error> {
        self.ensure_open()?;
        let (file, system) = {
            let inner = self.lock_inner();
            let active = inner.active.as_ref().ok_or(Error::NoActiveSystem)?;
            let file = inner.file.clone().ok_or(Error::NotLoaded)?;
            (file, active.system.clone())
        };
        let component_instance = system.resolve(component)?;
        let call = MethodCall {
            component: component_instance,
            method: MethodDecl::new(method),
        };
        let collecting_tracer = Arc::new(CollectingTracer::new());
        let evaluator = self.evaluator_factory.new_evaluator(file, collecting_tracer.clone());
        let env = system.env();
        let _ = evaluator.eval(&call, &env, 0.0)?;
        drop(evaluator);
        Ok(Arc::try_unwrap(collecting_tracer)
            .expect("no other handle to the collecting tracer outlives execute_trace")
            .into_events())
    }

    /// Delegates to the path-traversal engine for breadth-first enumeration
    /// of possible execution paths from `(component, method)`, bounded by
    /// `max_depth`.
    pub fn trace_all_paths(&self, component: &str, method: &str, max_depth: usize) -> Result<AllPathsTraceData, Error> {
        self.ensure_open()?;
        let inner = self.lock_inner();
        let active = inner.active.as_ref().ok_or(Error::NoActiveSystem)?;
        Ok(self
            .path_explorer
            .trace_all_paths(active.system.as_ref(), component, method, max_depth)?)
    }

    // --- diagram -----------------------------------------------------------

    /// A read-only projection of the active system's component graph and
    /// current flow rates.
    pub fn system_diagram(&self) -> Result<SystemDiagram, Error> {
        self.ensure_open()?;
        let inner = self.lock_inner();
        let active = inner.active.as_ref().ok_or(Error::NoActiveSystem)?;
        let nodes = active.system.component_paths();
        let mut edges = Vec::new();
        for (key, rate) in &inner.current_flow.component_rates {
            let Some((component, method)) = key.rsplit_once('.') else {
                continue;
            };
            for (to, callee_method) in active.system.neighbors(component, method) {
                edges.push(DiagramEdge {
                    from: component.to_string(),
                    to,
                    method: callee_method,
                    rate: *rate,
                });
            }
        }
        Ok(SystemDiagram {
            system_name: active.name.clone(),
            nodes,
            edges,
        })
    }
}

fn summarize_generator(canvas_id: &str, generator: &Arc<Generator>) -> GeneratorSummary {
    GeneratorSummary {
        id: generator.id().to_string(),
        canvas_id: canvas_id.to_string(),
        name: generator.name(),
        component: generator.component_path().to_string(),
        method: generator.method_name().to_string(),
        rate: generator.rate(),
        duration: generator.duration(),
        enabled: generator.is_running(),
        created_at: generator.created_at(),
        updated_at: generator.updated_at(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use generator::GeneratorConfig;
    use metricspec::{MetricSpecConfig, MetricType};
    use std::sync::Arc as StdArc;
    use store::{AggregateFn, QueryOptions, RingBufferStore, StoreConfig};
    use testkit::{ComponentSpec, MethodSpec, ToyEvaluatorFactory, ToyFile, ToyFlowStrategyRegistry, ToyLoader, ToyPathExplorer, ToySystem};

    fn fixture_loader() -> ToyLoader {
        let handler = ComponentSpec::new("svc.handler")
            .with_method("Handle", MethodSpec::returning(0.01, vec![Value::Bool(true)]))
            .with_param("limit", Value::I64(3), param::ParamType::Int)
            .with_neighbor("Handle", "svc.backend", "Query");
        let backend = ComponentSpec::new("svc.backend").with_method("Query", MethodSpec::count(0.02));
        let system = ToySystem::new("primary", vec![handler, backend]);
        let file = ToyFile::new(vec![system]);
        ToyLoader::new().with_file("fixture.sdl", file)
    }

    fn build_canvas() -> Canvas {
        let store: Arc<dyn store::MetricStore> = StdArc::new(RingBufferStore::new(StoreConfig::default()));
        Canvas::new(
            "test-canvas".to_string(),
            Arc::new(fixture_loader()),
            Arc::new(ToyEvaluatorFactory),
            Arc::new(ToyFlowStrategyRegistry),
            Arc::new(ToyPathExplorer),
            store,
        )
    }

    fn generator_config(id: &str, rate: f64) -> GeneratorConfig {
        GeneratorConfig {
            id: id.to_string(),
            name: id.to_string(),
            component: "svc.handler".to_string(),
            method: "Handle".to_string(),
            rate,
            duration: None,
            enabled: true,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_canvas_reports_empty_state() {
        let canvas = build_canvas();
        assert_eq!(canvas.state(), CanvasState::Empty);
        assert!(matches!(canvas.add_generator(generator_config("g1", 1.0), 0.0), Err(Error::NoActiveSystem)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_and_activate_transitions_through_states() {
        let canvas = build_canvas();
        canvas.load("fixture.sdl").unwrap();
        assert_eq!(canvas.state(), CanvasState::Loaded);
        canvas.use_system("primary", 0.0).await.unwrap();
        assert_eq!(canvas.state(), CanvasState::Active);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn add_generator_starts_worker_and_reaches_running() {
        let canvas = build_canvas();
        canvas.load("fixture.sdl").unwrap();
        canvas.use_system("primary", 0.0).await.unwrap();
        canvas.add_generator(generator_config("g1", 1.0), 0.0).unwrap();
        assert_eq!(canvas.state(), CanvasState::Running);
        let summary = canvas.get_generator("g1").unwrap();
        assert!(summary.enabled);
        canvas.stop_generator("g1").await.unwrap();
        assert_eq!(canvas.state(), CanvasState::Active);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn add_generator_rejects_duplicate_id() {
        let canvas = build_canvas();
        canvas.load("fixture.sdl").unwrap();
        canvas.use_system("primary", 0.0).await.unwrap();
        canvas.add_generator(generator_config("g1", 1.0), 0.0).unwrap();
        let err = canvas.add_generator(generator_config("g1", 2.0), 0.0).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_generator_stops_and_unregisters() {
        let canvas = build_canvas();
        canvas.load("fixture.sdl").unwrap();
        canvas.use_system("primary", 0.0).await.unwrap();
        canvas.add_generator(generator_config("g1", 1.0), 0.0).unwrap();
        canvas.remove_generator("g1").await.unwrap();
        assert!(canvas.get_generator("g1").is_none());
        assert_eq!(canvas.state(), CanvasState::Active);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reset_clears_generators_and_active_system() {
        let canvas = build_canvas();
        canvas.load("fixture.sdl").unwrap();
        canvas.use_system("primary", 0.0).await.unwrap();
        canvas.add_generator(generator_config("g1", 1.0), 0.0).unwrap();
        canvas.reset().await;
        assert_eq!(canvas.state(), CanvasState::Empty);
        assert!(canvas.list_generators().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn use_system_again_clears_previous_generators_and_specs() {
        let canvas = build_canvas();
        canvas.load("fixture.sdl").unwrap();
        canvas.use_system("primary", 0.0).await.unwrap();
        canvas.add_generator(generator_config("g1", 1.0), 0.0).unwrap();
        canvas
            .add_metric_spec(
                MetricSpecConfig {
                    id: "m1".to_string(),
                    component: "svc.handler".to_string(),
                    methods: vec!["Handle".to_string()],
                    metric_type: MetricType::Count,
                    aggregation: AggregateFn::Count,
                    aggregation_window: 0.0,
                    result_matcher: None,
                },
                0.0,
            )
            .unwrap();
        canvas.use_system("primary", 1.0).await.unwrap();
        assert!(canvas.list_generators().is_empty());
        assert!(canvas.list_metric_specs().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn set_parameter_coerces_and_recomputes_flow() {
        let canvas = build_canvas();
        canvas.load("fixture.sdl").unwrap();
        canvas.use_system("primary", 0.0).await.unwrap();
        canvas.add_generator(generator_config("g1", 5.0), 0.0).unwrap();
        canvas.set_parameter("svc.handler.limit", Value::F64(9.0)).unwrap();
        assert_eq!(canvas.get_parameter("svc.handler.limit").unwrap(), Value::I64(9));
        let flow = canvas.current_flow();
        assert_eq!(flow.component_rates.get("svc.handler.Handle"), Some(&5.0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn batch_set_parameters_is_all_or_nothing() {
        let canvas = build_canvas();
        canvas.load("fixture.sdl").unwrap();
        canvas.use_system("primary", 0.0).await.unwrap();
        let mut values = HashMap::new();
        let _ = values.insert("svc.handler.limit".to_string(), Value::I64(7));
        let _ = values.insert("svc.handler.missing".to_string(), Value::I64(1));
        assert!(canvas.batch_set_parameters(values).is_err());
        assert_eq!(canvas.get_parameter("svc.handler.limit").unwrap(), Value::I64(3));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn manual_override_layers_on_top_of_flow_strategy() {
        let canvas = build_canvas();
        canvas.load("fixture.sdl").unwrap();
        canvas.use_system("primary", 0.0).await.unwrap();
        canvas.add_generator(generator_config("g1", 5.0), 0.0).unwrap();
        canvas.set_manual_rate_override("svc.handler.Handle".to_string(), 42.0).unwrap();
        let flow = canvas.current_flow();
        assert_eq!(flow.component_rates.get("svc.handler.Handle"), Some(&42.0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn execute_trace_runs_once_and_collects_events() {
        let canvas = build_canvas();
        canvas.load("fixture.sdl").unwrap();
        canvas.use_system("primary", 0.0).await.unwrap();
        let events = canvas.execute_trace("svc.handler", "Handle").unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn system_diagram_reflects_active_generators() {
        let canvas = build_canvas();
        canvas.load("fixture.sdl").unwrap();
        canvas.use_system("primary", 0.0).await.unwrap();
        canvas.add_generator(generator_config("g1", 5.0), 0.0).unwrap();
        let diagram = canvas.system_diagram().unwrap();
        assert_eq!(diagram.system_name, "primary");
        assert!(diagram.nodes.contains(&"svc.handler".to_string()));
        assert_eq!(diagram.edges.len(), 1);
        assert_eq!(diagram.edges[0].to, "svc.backend");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn metric_spec_observes_generator_traffic() {
        let canvas = build_canvas();
        canvas.load("fixture.sdl").unwrap();
        canvas.use_system("primary", 0.0).await.unwrap();
        canvas.add_generator(generator_config("g1", 200.0), 0.0).unwrap();
        canvas
            .add_metric_spec(
                MetricSpecConfig {
                    id: "m1".to_string(),
                    component: "svc.handler".to_string(),
                    methods: vec!["Handle".to_string()],
                    metric_type: MetricType::Count,
                    aggregation: AggregateFn::Count,
                    aggregation_window: 0.0,
                    result_matcher: None,
                },
                0.0,
            )
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        canvas.stop_generator("g1").await.unwrap();

        let result = canvas
            .store()
            .query(
                "m1",
                &QueryOptions {
                    start_time: 0.0,
                    end_time: f64::MAX,
                    ..QueryOptions::default()
                },
            )
            .unwrap();
        assert!(result.total_rows > 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn close_is_idempotent_and_terminal() {
        let canvas = build_canvas();
        canvas.load("fixture.sdl").unwrap();
        canvas.use_system("primary", 0.0).await.unwrap();
        canvas.close().await;
        canvas.close().await;
        assert_eq!(canvas.state(), CanvasState::Closed);
        assert!(matches!(canvas.load("fixture.sdl"), Err(Error::Closed)));
    }
}
