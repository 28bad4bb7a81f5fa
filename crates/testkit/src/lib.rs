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

//! A minimal, deterministic stand-in for the SDL loader, the `SimpleEval`
//! evaluator, the flow-analysis strategy registry, and the path-traversal
//! engine (spec.md §6's three external interfaces, kept out of scope by the
//! core). Used only by this workspace's own tests to exercise
//! Canvas/Generator/MetricTracer/MetricStore end to end without a real SDL
//! front end.
//!
//! A fixture system is a flat table of named components, each with a fixed
//! set of methods. Every method has a configured virtual duration and an
//! optional cycle of return values (the `n`th call to a method returns
//! `returns[n % returns.len()]`, which is how the matcher test in
//! `tests/end_to_end.rs` gets a deterministic 80/20 split of return values).

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use context::param::ParamType;
use context::Value;
use sim_core::{
    AllPathsTraceData, ComponentInstance, Env, EvalError, EvalOutcome, Evaluator, EvaluatorFactory, FileInstance,
    FlowAnalysisResult, FlowStrategyError, FlowStrategyRegistry, GeneratorLoad, Loader, LoaderError, MethodCall,
    PathExplorer, PathExplorerError, PathStep, SystemInstance, TraceEvent, TraceEventKind, TracePath, Tracer,
};

/// A method's configured behavior: how long it takes, and what it returns.
#[derive(Clone, Debug, Default)]
pub struct MethodSpec {
    /// Virtual duration of one call, in seconds.
    pub duration: f64,
    /// Return values, cycled across successive calls. Empty means every
    /// call returns nothing.
    pub returns: Vec<Value>,
}

impl MethodSpec {
    /// A method that returns nothing and takes `duration` seconds.
    pub fn count(duration: f64) -> Self {
        Self {
            duration,
            returns: Vec::new(),
        }
    }

    /// A method that takes `duration` seconds and cycles through `returns`
    /// across successive calls.
    pub fn returning(duration: f64, returns: Vec<Value>) -> Self {
        Self { duration, returns }
    }
}

/// A component fixture: its methods, its typed parameters, and the
/// call-graph edges its methods are declared to reach (for
/// `trace_all_paths`/`GetSystemDiagram`).
#[derive(Clone, Debug, Default)]
pub struct ComponentSpec {
    path: String,
    methods: HashMap<String, MethodSpec>,
    params: HashMap<String, (Value, ParamType)>,
    neighbors: HashMap<String, Vec<(String, String)>>,
}

impl ComponentSpec {
    /// Builds an empty component fixture at `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Registers a method on this component.
    pub fn with_method(mut self, name: impl Into<String>, spec: MethodSpec) -> Self {
        let _ = self.methods.insert(name.into(), spec);
        self
    }

    /// Registers a typed parameter on this component.
    pub fn with_param(mut self, name: impl Into<String>, value: Value, param_type: ParamType) -> Self {
        let _ = self.params.insert(name.into(), (value, param_type));
        self
    }

    /// Declares that `method` calls into `(to_component, to_method)`, one
    /// hop deep.
    pub fn with_neighbor(mut self, method: impl Into<String>, to_component: impl Into<String>, to_method: impl Into<String>) -> Self {
        self.neighbors
            .entry(method.into())
            .or_default()
            .push((to_component.into(), to_method.into()));
        self
    }
}

struct MethodState {
    duration: f64,
    returns: Vec<Value>,
    call_count: AtomicUsize,
}

/// The resolved, shared state behind one component instance. Wrapped in an
/// `Arc` and carried around inside [`sim_core::ComponentInstance`]; the
/// evaluator downcasts back to this type to run a method.
pub struct ComponentState {
    path: String,
    methods: HashMap<String, MethodState>,
    params: Mutex<HashMap<String, (Value, ParamType)>>,
    neighbors: HashMap<String, Vec<(String, String)>>,
}

fn split_param_path(path: &str) -> Result<(&str, &str), LoaderError> {
    path.rsplit_once('.').ok_or_else(|| LoaderError::UnknownComponent { path: path.to_string() })
}

struct SystemState {
    name: String,
    components: HashMap<String, Arc<ComponentState>>,
    applied_rates: Mutex<HashMap<String, f64>>,
}

/// A fixture system instance: a flat table of component fixtures.
#[derive(Clone)]
pub struct ToySystem(Arc<SystemState>);

impl ToySystem {
    /// Builds a system named `name` from its component fixtures.
    pub fn new(name: impl Into<String>, components: Vec<ComponentSpec>) -> Self {
        let mut table = HashMap::with_capacity(components.len());
        for spec in components {
            let methods = spec
                .methods
                .into_iter()
                .map(|(method_name, method_spec)| {
                    (
                        method_name,
                        MethodState {
                            duration: method_spec.duration,
                            returns: method_spec.returns,
                            call_count: AtomicUsize::new(0),
                        },
                    )
                })
                .collect();
            let state = Arc::new(ComponentState {
                path: spec.path.clone(),
                methods,
                params: Mutex::new(spec.params),
                neighbors: spec.neighbors,
            });
            let _ = table.insert(spec.path, state);
        }
        Self(Arc::new(SystemState {
            name: name.into(),
            components: table,
            applied_rates: Mutex::new(HashMap::new()),
        }))
    }

    /// The rate map most recently applied via [`SystemInstance::apply_flow_rates`],
    /// for assertions in tests that exercise flow recompute.
    pub fn applied_rates(&self) -> HashMap<String, f64> {
        self.0.applied_rates.lock().expect("applied_rates lock poisoned").clone()
    }

    /// Number of times `method` has been called on `component`, if both exist.
    pub fn call_count(&self, component: &str, method: &str) -> Option<usize> {
        let state = self.0.components.get(component)?;
        let method = state.methods.get(method)?;
        Some(method.call_count.load(Ordering::Relaxed))
    }
}

impl SystemInstance for ToySystem {
    fn name(&self) -> &str {
        &self.0.name
    }

    fn resolve(&self, path: &str) -> Result<ComponentInstance, LoaderError> {
        let state = self
            .0
            .components
            .get(path)
            .cloned()
            .ok_or_else(|| LoaderError::UnknownComponent { path: path.to_string() })?;
        Ok(ComponentInstance::new(path.to_string(), state as Arc<dyn Any + Send + Sync>))
    }

    fn env(&self) -> Env {
        Arc::new(()) as Env
    }

    fn component_paths(&self) -> Vec<String> {
        self.0.components.keys().cloned().collect()
    }

    fn neighbors(&self, component: &str, method: &str) -> Vec<(String, String)> {
        self.0
            .components
            .get(component)
            .and_then(|state| state.neighbors.get(method))
            .cloned()
            .unwrap_or_default()
    }

    fn apply_flow_rates(&self, rates: &HashMap<String, f64>) {
        *self.0.applied_rates.lock().expect("applied_rates lock poisoned") = rates.clone();
    }

    fn param_type(&self, path: &str) -> Result<ParamType, LoaderError> {
        let (component, field) = split_param_path(path)?;
        let state = self
            .0
            .components
            .get(component)
            .ok_or_else(|| LoaderError::UnknownComponent { path: component.to_string() })?;
        let params = state.params.lock().expect("params lock poisoned");
        params
            .get(field)
            .map(|(_, param_type)| *param_type)
            .ok_or_else(|| LoaderError::UnknownComponent { path: path.to_string() })
    }

    fn set_param(&self, path: &str, value: Value) -> Result<(), LoaderError> {
        let (component, field) = split_param_path(path)?;
        let state = self
            .0
            .components
            .get(component)
            .ok_or_else(|| LoaderError::UnknownComponent { path: component.to_string() })?;
        let mut params = state.params.lock().expect("params lock poisoned");
        let entry = params
            .get_mut(field)
            .ok_or_else(|| LoaderError::UnknownComponent { path: path.to_string() })?;
        entry.0 = value;
        Ok(())
    }

    fn get_param(&self, path: &str) -> Result<Value, LoaderError> {
        let (component, field) = split_param_path(path)?;
        let state = self
            .0
            .components
            .get(component)
            .ok_or_else(|| LoaderError::UnknownComponent { path: component.to_string() })?;
        let params = state.params.lock().expect("params lock poisoned");
        params
            .get(field)
            .map(|(value, _)| value.clone())
            .ok_or_else(|| LoaderError::UnknownComponent { path: path.to_string() })
    }
}

/// A fixture file: a table of named systems, as would be produced by
/// loading and parsing one SDL file.
#[derive(Clone)]
pub struct ToyFile(Arc<HashMap<String, ToySystem>>);

impl ToyFile {
    /// Builds a file fixture from its systems.
    pub fn new(systems: Vec<ToySystem>) -> Self {
        Self(Arc::new(systems.into_iter().map(|system| (system.name().to_string(), system)).collect()))
    }
}

impl FileInstance for ToyFile {
    fn new_system(&self, name: &str) -> Result<Box<dyn SystemInstance>, LoaderError> {
        self.0
            .get(name)
            .cloned()
            .map(|system| Box::new(system) as Box<dyn SystemInstance>)
            .ok_or_else(|| LoaderError::UnknownSystem { name: name.to_string() })
    }

    fn system_names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }
}

/// A fixture loader: a table of named files, keyed by the path they were
/// registered under.
#[derive(Default)]
pub struct ToyLoader(HashMap<String, ToyFile>);

impl ToyLoader {
    /// Builds an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `file` to be returned when `path` is loaded.
    pub fn with_file(mut self, path: impl Into<String>, file: ToyFile) -> Self {
        let _ = self.0.insert(path.into(), file);
        self
    }
}

impl Loader for ToyLoader {
    fn load_file(&self, path: &str) -> Result<Box<dyn FileInstance>, LoaderError> {
        self.0
            .get(path)
            .cloned()
            .map(|file| Box::new(file) as Box<dyn FileInstance>)
            .ok_or_else(|| LoaderError::Parse {
                path: path.to_string(),
                message: "no such fixture file registered on this ToyLoader".to_string(),
            })
    }
}

/// An evaluator bound to one tracer: resolves the call's target back to its
/// [`ComponentState`], drives `Enter`/`Exit` around it, and returns the
/// method's configured duration and next cycled return value.
pub struct ToyEvaluator {
    tracer: Arc<dyn Tracer>,
    next_event_id: AtomicI64,
}

impl Evaluator for ToyEvaluator {
    fn eval(&self, call: &MethodCall, _env: &Env, virtual_time: f64) -> Result<EvalOutcome, EvalError> {
        let state = call.component.downcast_ref::<ComponentState>().ok_or_else(|| EvalError::Failed {
            component: call.component.path().to_string(),
            method: call.method.name.clone(),
            message: "component instance was not resolved through a testkit ToySystem".to_string(),
        })?;
        let method = state.methods.get(&call.method.name).ok_or_else(|| EvalError::Failed {
            component: call.component.path().to_string(),
            method: call.method.name.clone(),
            message: "method not declared on this fixture component".to_string(),
        })?;

        let enter_id = self.next_event_id.fetch_add(1, Ordering::Relaxed);
        self.tracer.enter(TraceEvent {
            kind: TraceEventKind::Enter,
            event_id: enter_id,
            parent_id: None,
            timestamp: virtual_time,
            duration: 0.0,
            component: Some(call.component.clone()),
            method: Some(call.method.clone()),
            args: Vec::new(),
            return_value: None,
            error: None,
        });

        let call_index = method.call_count.fetch_add(1, Ordering::Relaxed);
        let return_value = if method.returns.is_empty() {
            None
        } else {
            Some(method.returns[call_index % method.returns.len()].clone())
        };

        let exit_id = self.next_event_id.fetch_add(1, Ordering::Relaxed);
        self.tracer.exit(TraceEvent {
            kind: TraceEventKind::Exit,
            event_id: exit_id,
            parent_id: Some(enter_id),
            timestamp: virtual_time + method.duration,
            duration: method.duration,
            component: Some(call.component.clone()),
            method: Some(call.method.clone()),
            args: Vec::new(),
            return_value: return_value.clone(),
            error: None,
        });

        Ok(EvalOutcome {
            return_value,
            duration: method.duration,
        })
    }
}

/// Constructs a fresh [`ToyEvaluator`] bound to whichever tracer the
/// generator/canvas passes in.
#[derive(Clone, Copy, Default)]
pub struct ToyEvaluatorFactory;

impl EvaluatorFactory for ToyEvaluatorFactory {
    fn new_evaluator(&self, _file: Arc<dyn FileInstance>, tracer: Arc<dyn Tracer>) -> Box<dyn Evaluator> {
        Box::new(ToyEvaluator {
            tracer,
            next_event_id: AtomicI64::new(0),
        })
    }
}

/// A flow strategy that ignores the strategy name and simply sums every
/// active generator's rate per `"component.method"` key — enough to
/// exercise Canvas's flow-recompute wiring without a real capacity model.
#[derive(Clone, Copy, Default)]
pub struct ToyFlowStrategyRegistry;

impl FlowStrategyRegistry for ToyFlowStrategyRegistry {
    fn evaluate(
        &self,
        _name: &str,
        _system: &dyn SystemInstance,
        generators: &[GeneratorLoad],
    ) -> Result<FlowAnalysisResult, FlowStrategyError> {
        let mut component_rates = HashMap::with_capacity(generators.len());
        for load in generators {
            let key = format!("{}.{}", load.component, load.method);
            *component_rates.entry(key).or_insert(0.0) += load.rate;
        }
        Ok(FlowAnalysisResult { component_rates })
    }
}

/// A breadth-first path explorer built directly on [`SystemInstance::neighbors`].
#[derive(Clone, Copy, Default)]
pub struct ToyPathExplorer;

impl PathExplorer for ToyPathExplorer {
    fn trace_all_paths(
        &self,
        system: &dyn SystemInstance,
        component: &str,
        method: &str,
        max_depth: usize,
    ) -> Result<AllPathsTraceData, PathExplorerError> {
        if system.resolve(component).is_err() {
            return Err(PathExplorerError::UnknownEntryPoint {
                component: component.to_string(),
                method: method.to_string(),
            });
        }

        let mut paths = Vec::new();
        let mut truncated = false;
        let mut queue: VecDeque<(TracePath, String, String, usize)> = VecDeque::new();
        queue.push_back((TracePath::default(), component.to_string(), method.to_string(), 0));

        while let Some((path_so_far, comp, meth, depth)) = queue.pop_front() {
            let mut path = path_so_far;
            path.steps.push(PathStep {
                component: comp.clone(),
                method: meth.clone(),
                depth,
            });

            let callees = system.neighbors(&comp, &meth);
            if callees.is_empty() {
                paths.push(path);
                continue;
            }
            if depth + 1 >= max_depth {
                truncated = true;
                paths.push(path);
                continue;
            }
            for (next_component, next_method) in callees {
                queue.push_back((path.clone(), next_component, next_method, depth + 1));
            }
        }

        Ok(AllPathsTraceData { paths, truncated })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn component_instance(path: &str, state: Arc<ComponentState>) -> ComponentInstance {
        ComponentInstance::new(path.to_string(), state as Arc<dyn Any + Send + Sync>)
    }

    #[test]
    fn resolve_and_downcast_round_trip() {
        let system = ToySystem::new(
            "s",
            vec![ComponentSpec::new("svc.handler").with_method("Handle", MethodSpec::count(0.01))],
        );
        let instance = system.resolve("svc.handler").unwrap();
        assert!(instance.downcast_ref::<ComponentState>().is_some());
        assert!(system.resolve("svc.missing").is_err());
    }

    #[test]
    fn param_round_trip_and_unknown_path_errors() {
        let system = ToySystem::new(
            "s",
            vec![ComponentSpec::new("svc.handler").with_param("limit", Value::I64(3), ParamType::Int)],
        );
        assert_eq!(system.param_type("svc.handler.limit").unwrap(), ParamType::Int);
        system.set_param("svc.handler.limit", Value::I64(9)).unwrap();
        assert_eq!(system.get_param("svc.handler.limit").unwrap(), Value::I64(9));
        assert!(system.get_param("svc.handler.missing").is_err());
    }

    #[test]
    fn evaluator_cycles_return_values_and_drives_tracer() {
        struct RecordingTracer(Mutex<Vec<TraceEvent>>);
        impl Tracer for RecordingTracer {
            fn enter(&self, event: TraceEvent) {
                self.0.lock().unwrap().push(event);
            }
            fn exit(&self, event: TraceEvent) {
                self.0.lock().unwrap().push(event);
            }
            fn push_parent_id(&self, _id: i64) {}
            fn pop_parent(&self) {}
        }

        let system = ToySystem::new(
            "s",
            vec![ComponentSpec::new("svc.handler")
                .with_method("Handle", MethodSpec::returning(0.01, vec![Value::Bool(true), Value::Bool(false)]))],
        );
        let component = system.resolve("svc.handler").unwrap();
        let tracer = Arc::new(RecordingTracer(Mutex::new(Vec::new())));
        let factory = ToyEvaluatorFactory;
        let evaluator = factory.new_evaluator(Box::new(ToyFile::new(vec![system.clone()])).into(), tracer.clone() as Arc<dyn Tracer>);

        let call = MethodCall {
            component: component.clone(),
            method: sim_core::MethodDecl::new("Handle"),
        };
        let env = system.env();
        let first = evaluator.eval(&call, &env, 0.0).unwrap();
        let second = evaluator.eval(&call, &env, 0.1).unwrap();
        let third = evaluator.eval(&call, &env, 0.2).unwrap();

        assert_eq!(first.return_value, Some(Value::Bool(true)));
        assert_eq!(second.return_value, Some(Value::Bool(false)));
        assert_eq!(third.return_value, Some(Value::Bool(true)));
        assert_eq!(tracer.0.lock().unwrap().len(), 6);
        let _ = component_instance("svc.handler", Arc::new(ComponentState {
            path: "svc.handler".to_string(),
            methods: HashMap::new(),
            params: Mutex::new(HashMap::new()),
            neighbors: HashMap::new(),
        }));
    }

    #[test]
    fn flow_strategy_sums_rates_per_target() {
        let registry = ToyFlowStrategyRegistry;
        let system = ToySystem::new("s", vec![ComponentSpec::new("svc.handler")]);
        let result = registry
            .evaluate(
                "default",
                &system,
                &[
                    GeneratorLoad {
                        component: "svc.handler".into(),
                        method: "Handle".into(),
                        rate: 10.0,
                    },
                    GeneratorLoad {
                        component: "svc.handler".into(),
                        method: "Handle".into(),
                        rate: 5.0,
                    },
                ],
            )
            .unwrap();
        assert_eq!(result.component_rates.get("svc.handler.Handle"), Some(&15.0));
    }

    #[test]
    fn path_explorer_enumerates_and_truncates() {
        let system = ToySystem::new(
            "s",
            vec![
                ComponentSpec::new("a").with_method("Start", MethodSpec::count(0.0)).with_neighbor("Start", "b", "Next"),
                ComponentSpec::new("b").with_method("Next", MethodSpec::count(0.0)),
            ],
        );
        let explorer = ToyPathExplorer;
        let result = explorer.trace_all_paths(&system, "a", "Start", 10).unwrap();
        assert_eq!(result.paths.len(), 1);
        assert_eq!(result.paths[0].steps.len(), 2);
        assert!(!result.truncated);

        let truncated = explorer.trace_all_paths(&system, "a", "Start", 1).unwrap();
        assert!(truncated.truncated);

        assert!(explorer.trace_all_paths(&system, "missing", "Start", 1).is_err());
    }
}
