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

//! The `CanvasService` façade (spec.md §4.F): a thin dispatcher owning a
//! registry of canvases, keyed by id, behind a single lock. Every operation
//! other than the registry CRUD obtains its target canvas under that lock
//! and then delegates — no canvas work runs while the registry is held —
//! and converts the canvas's native types into the wire shapes in
//! [`wire`] before returning.

mod error;
pub mod wire;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

pub use error::{Error, ErrorKind};

use canvas::Canvas;
use context::Value;
use generator::GeneratorConfig;
use metricspec::MetricSpecConfig;
use sim_core::{AllPathsTraceData, EvaluatorFactory, FlowStrategyRegistry, Loader, PathExplorer};
use store::{
    AggregateOptions, AggregateResult, MetricStore, MetricUpdateBatch, QueryOptions, RingBufferStore, StoreConfig,
};

/// Identifier of the canvas created automatically on service construction.
pub const DEFAULT_CANVAS_ID: &str = "default";

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Maps request objects to [`Canvas`] operations: validates canvas ids,
/// obtains the target canvas, and shapes the response.
pub struct CanvasService {
    loader: Arc<dyn Loader>,
    evaluator_factory: Arc<dyn EvaluatorFactory>,
    flow_registry: Arc<dyn FlowStrategyRegistry>,
    path_explorer: Arc<dyn PathExplorer>,
    store_config: StoreConfig,
    canvases: RwLock<HashMap<String, Arc<Canvas>>>,
}

impl CanvasService {
    /// Builds a service bound to the given external collaborators, with the
    /// default canvas `"default"` already created.
    pub fn new(
        loader: Arc<dyn Loader>,
        evaluator_factory: Arc<dyn EvaluatorFactory>,
        flow_registry: Arc<dyn FlowStrategyRegistry>,
        path_explorer: Arc<dyn PathExplorer>,
        store_config: StoreConfig,
    ) -> Self {
        let service = Self {
            loader,
            evaluator_factory,
            flow_registry,
            path_explorer,
            store_config,
            canvases: RwLock::new(HashMap::new()),
        };
        service
            .create_canvas(DEFAULT_CANVAS_ID.to_string())
            .expect("default canvas id is always valid and unique");
        service
    }

    fn canvases(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Canvas>>> {
        self.canvases.read().expect("canvas registry lock poisoned")
    }

    fn new_canvas(&self, id: String) -> Canvas {
        let store: Arc<dyn MetricStore> = Arc::new(RingBufferStore::new(self.store_config));
        Canvas::new(
            id,
            self.loader.clone(),
            self.evaluator_factory.clone(),
            self.flow_registry.clone(),
            self.path_explorer.clone(),
            store,
        )
    }

    // --- registry ------------------------------------------------------------

    /// Creates a new, empty canvas under `id`. Rejects an empty or
    /// already-registered id.
    pub fn create_canvas(&self, id: String) -> Result<(), Error> {
        if id.trim().is_empty() {
            return Err(Error::invalid_argument("canvas id must not be empty"));
        }
        let mut canvases = self.canvases.write().expect("canvas registry lock poisoned");
        if canvases.contains_key(&id) {
            return Err(Error::already_exists(format!("canvas already exists: {id}")));
        }
        let canvas = Arc::new(self.new_canvas(id.clone()));
        tracing::debug!(canvas_id = %id, "creating canvas");
        let _ = canvases.insert(id, canvas);
        Ok(())
    }

    /// Looks up a registered canvas by id.
    pub fn get_canvas(&self, id: &str) -> Result<Arc<Canvas>, Error> {
        self.canvases()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("canvas not found: {id}")))
    }

    /// Lists every registered canvas id.
    pub fn list_canvases(&self) -> Vec<String> {
        self.canvases().keys().cloned().collect()
    }

    /// Closes and removes a canvas from the registry. The registry lock is
    /// never held while the canvas closes.
    pub async fn delete_canvas(&self, id: &str) -> Result<(), Error> {
        let canvas = self
            .canvases
            .write()
            .expect("canvas registry lock poisoned")
            .remove(id)
            .ok_or_else(|| Error::not_found(format!("canvas not found: {id}")))?;
        tracing::debug!(canvas_id = %id, "deleting canvas");
        canvas.close().await;
        Ok(())
    }

    // --- file/system lifecycle ------------------------------------------------

    /// Loads and validates the file at `path` on the target canvas.
    pub fn load_file(&self, canvas_id: &str, path: &str) -> Result<(), Error> {
        Ok(self.get_canvas(canvas_id)?.load(path)?)
    }

    /// Instantiates the named system on the target canvas.
    pub async fn use_system(&self, canvas_id: &str, system_name: &str) -> Result<(), Error> {
        Ok(self.get_canvas(canvas_id)?.use_system(system_name, now()).await?)
    }

    /// Resets the target canvas to its empty state. Always succeeds once the
    /// canvas is found (spec.md §7, "Reset/Close always succeed").
    pub async fn reset_canvas(&self, canvas_id: &str) -> Result<(), Error> {
        self.get_canvas(canvas_id)?.reset().await;
        Ok(())
    }

    // --- parameters ------------------------------------------------------------

    /// Coerces and applies `value` to the parameter at `path` on the target
    /// canvas.
    pub fn set_parameter(&self, canvas_id: &str, path: &str, value: Value) -> Result<(), Error> {
        Ok(self.get_canvas(canvas_id)?.set_parameter(path, value)?)
    }

    /// Reads back the current value of the parameter at `path`.
    pub fn get_parameter(&self, canvas_id: &str, path: &str) -> Result<Value, Error> {
        Ok(self.get_canvas(canvas_id)?.get_parameter(path)?)
    }

    /// Validates and applies a batch of parameter assignments atomically,
    /// returning the values each path held before the batch.
    pub fn batch_set_parameters(
        &self,
        canvas_id: &str,
        values: HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, Error> {
        Ok(self.get_canvas(canvas_id)?.batch_set_parameters(values)?)
    }

    // --- generators --------------------------------------------------------

    /// Registers and (if enabled) starts a generator on the target canvas.
    pub fn add_generator(&self, canvas_id: &str, config: GeneratorConfig) -> Result<(), Error> {
        Ok(self.get_canvas(canvas_id)?.add_generator(config, now())?)
    }

    /// Renames and/or re-rates an existing generator.
    pub async fn update_generator(
        &self,
        canvas_id: &str,
        id: &str,
        name: Option<String>,
        rate: Option<f64>,
        duration: Option<Option<f64>>,
    ) -> Result<(), Error> {
        Ok(self
            .get_canvas(canvas_id)?
            .update_generator(id, name, rate, duration, now())
            .await?)
    }

    /// Stops (if running) and removes a generator.
    pub async fn remove_generator(&self, canvas_id: &str, id: &str) -> Result<(), Error> {
        Ok(self.get_canvas(canvas_id)?.remove_generator(id).await?)
    }

    /// Starts a single generator; idempotent.
    pub fn start_generator(&self, canvas_id: &str, id: &str) -> Result<(), Error> {
        Ok(self.get_canvas(canvas_id)?.start_generator(id, now())?)
    }

    /// Stops a single generator; idempotent.
    pub async fn stop_generator(&self, canvas_id: &str, id: &str) -> Result<(), Error> {
        Ok(self.get_canvas(canvas_id)?.stop_generator(id).await?)
    }

    /// Starts every generator not already running.
    pub fn start_all_generators(&self, canvas_id: &str) -> Result<canvas::BulkOutcome, Error> {
        Ok(self.get_canvas(canvas_id)?.start_all_generators(now()))
    }

    /// Stops every running generator.
    pub async fn stop_all_generators(&self, canvas_id: &str) -> Result<canvas::BulkOutcome, Error> {
        Ok(self.get_canvas(canvas_id)?.stop_all_generators().await)
    }

    /// Lists every generator on the target canvas, as the wire shape.
    pub fn list_generators(&self, canvas_id: &str) -> Result<Vec<wire::Generator>, Error> {
        Ok(self
            .get_canvas(canvas_id)?
            .list_generators()
            .into_iter()
            .map(wire::Generator::from)
            .collect())
    }

    /// Fetches one generator, as the wire shape.
    pub fn get_generator(&self, canvas_id: &str, id: &str) -> Result<wire::Generator, Error> {
        self.get_canvas(canvas_id)?
            .get_generator(id)
            .map(wire::Generator::from)
            .ok_or_else(|| Error::not_found(format!("generator not found: {id}")))
    }

    // --- metric specs ----------------------------------------------------------

    /// Registers and starts a metric spec on the target canvas.
    pub fn add_metric_spec(&self, canvas_id: &str, config: MetricSpecConfig) -> Result<(), Error> {
        Ok(self.get_canvas(canvas_id)?.add_metric_spec(config, now())?)
    }

    /// Stops and removes a metric spec. Errors if the spec id is unknown.
    pub fn remove_metric_spec(&self, canvas_id: &str, id: &str) -> Result<(), Error> {
        let canvas = self.get_canvas(canvas_id)?;
        if canvas.remove_metric_spec(id)? {
            Ok(())
        } else {
            Err(Error::not_found(format!("metric spec not found: {id}")))
        }
    }

    /// Lists every metric spec on the target canvas, as the wire shape.
    pub fn list_metric_specs(&self, canvas_id: &str) -> Result<Vec<wire::Metric>, Error> {
        let canvas = self.get_canvas(canvas_id)?;
        let store = canvas.store();
        Ok(canvas
            .list_metric_specs()
            .into_iter()
            .map(|summary| {
                let stats = store.stats(&summary.id);
                wire::Metric::from_summary(summary, stats)
            })
            .collect())
    }

    /// Fetches one metric spec, as the wire shape.
    pub fn get_metric_spec(&self, canvas_id: &str, id: &str) -> Result<wire::Metric, Error> {
        let canvas = self.get_canvas(canvas_id)?;
        let summary = canvas
            .get_metric_spec(id)
            .ok_or_else(|| Error::not_found(format!("metric spec not found: {id}")))?;
        let stats = canvas.store().stats(id);
        Ok(wire::Metric::from_summary(summary, stats))
    }

    // --- metric queries ----------------------------------------------------

    /// Runs a time-range query over one metric's stored points.
    pub fn query_metrics(
        &self,
        canvas_id: &str,
        metric_id: &str,
        opts: &QueryOptions,
    ) -> Result<Vec<wire::WirePoint>, Error> {
        let result = self.get_canvas(canvas_id)?.store().query(metric_id, opts)?;
        Ok(result.points.iter().map(wire::WirePoint::from).collect())
    }

    /// Buckets and aggregates one metric's stored points.
    pub fn aggregate_metrics(
        &self,
        canvas_id: &str,
        metric_id: &str,
        opts: &AggregateOptions,
    ) -> Result<AggregateResult, Error> {
        Ok(self.get_canvas(canvas_id)?.store().aggregate(metric_id, opts)?)
    }

    /// Subscribes to incremental updates for the given metric ids on the
    /// target canvas. The caller drops the receiver to unsubscribe.
    pub fn stream_metrics(
        &self,
        canvas_id: &str,
        metric_ids: &[String],
    ) -> Result<flume::Receiver<MetricUpdateBatch>, Error> {
        Ok(self.get_canvas(canvas_id)?.store().subscribe(metric_ids))
    }

    // --- tracing ---------------------------------------------------------------

    /// Invokes `method` on `component` once and returns every trace event
    /// produced, as the wire shape.
    pub fn execute_trace(
        &self,
        canvas_id: &str,
        component: &str,
        method: &str,
    ) -> Result<Vec<wire::WireTraceEvent>, Error> {
        Ok(self
            .get_canvas(canvas_id)?
            .execute_trace(component, method)?
            .into_iter()
            .map(wire::WireTraceEvent::from)
            .collect())
    }

    /// Delegates to the path-traversal engine for breadth-first enumeration
    /// of possible execution paths.
    pub fn trace_all_paths(
        &self,
        canvas_id: &str,
        component: &str,
        method: &str,
        max_depth: usize,
    ) -> Result<AllPathsTraceData, Error> {
        Ok(self.get_canvas(canvas_id)?.trace_all_paths(component, method, max_depth)?)
    }

    // --- diagram -----------------------------------------------------------

    /// A read-only projection of the active system's component graph and
    /// current flow rates, as the wire shape.
    pub fn get_system_diagram(&self, canvas_id: &str) -> Result<wire::Diagram, Error> {
        Ok(self.get_canvas(canvas_id)?.system_diagram()?.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use generator::GeneratorConfig;
    use testkit::{ComponentSpec, MethodSpec, ToyEvaluatorFactory, ToyFile, ToyFlowStrategyRegistry, ToyLoader, ToyPathExplorer, ToySystem};

    fn fixture_loader() -> ToyLoader {
        let handler = ComponentSpec::new("svc.handler").with_method("Handle", MethodSpec::count(0.01));
        let system = ToySystem::new("primary", vec![handler]);
        let file = ToyFile::new(vec![system]);
        ToyLoader::new().with_file("fixture.sdl", file)
    }

    fn build_service() -> CanvasService {
        CanvasService::new(
            Arc::new(fixture_loader()),
            Arc::new(ToyEvaluatorFactory),
            Arc::new(ToyFlowStrategyRegistry),
            Arc::new(ToyPathExplorer),
            StoreConfig::default(),
        )
    }

    #[test]
    fn default_canvas_exists_on_construction() {
        let service = build_service();
        assert_eq!(service.list_canvases(), vec![DEFAULT_CANVAS_ID.to_string()]);
        assert!(service.get_canvas(DEFAULT_CANVAS_ID).is_ok());
    }

    #[test]
    fn create_canvas_rejects_empty_and_duplicate_ids() {
        let service = build_service();
        assert!(matches!(service.create_canvas(String::new()), Err(Error { kind: ErrorKind::InvalidArgument, .. })));
        assert!(service.create_canvas("alpha".to_string()).is_ok());
        assert!(matches!(
            service.create_canvas("alpha".to_string()),
            Err(Error { kind: ErrorKind::AlreadyExists, .. })
        ));
    }

    #[test]
    fn operations_on_unknown_canvas_return_not_found() {
        let service = build_service();
        let err = service.load_file("missing", "fixture.sdl").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_canvas_closes_and_removes_it() {
        let service = build_service();
        service.create_canvas("alpha".to_string()).unwrap();
        service.load_file("alpha", "fixture.sdl").unwrap();
        service.use_system("alpha", "primary").await.unwrap();
        service.delete_canvas("alpha").await.unwrap();
        assert!(!service.list_canvases().contains(&"alpha".to_string()));
        assert_eq!(service.load_file("alpha", "fixture.sdl").unwrap_err().kind, ErrorKind::NotFound);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_round_trip_through_default_canvas() {
        let service = build_service();
        service.load_file(DEFAULT_CANVAS_ID, "fixture.sdl").unwrap();
        service.use_system(DEFAULT_CANVAS_ID, "primary").await.unwrap();
        service
            .add_generator(
                DEFAULT_CANVAS_ID,
                GeneratorConfig {
                    id: "g1".to_string(),
                    name: "g1".to_string(),
                    component: "svc.handler".to_string(),
                    method: "Handle".to_string(),
                    rate: 1.0,
                    duration: None,
                    enabled: true,
                },
            )
            .unwrap();
        let generators = service.list_generators(DEFAULT_CANVAS_ID).unwrap();
        assert_eq!(generators.len(), 1);
        assert_eq!(generators[0].id, "g1");

        let traces = service.execute_trace(DEFAULT_CANVAS_ID, "svc.handler", "Handle").unwrap();
        assert_eq!(traces.len(), 2);

        service.stop_generator(DEFAULT_CANVAS_ID, "g1").await.unwrap();
        service.reset_canvas(DEFAULT_CANVAS_ID).await.unwrap();
        assert!(service.list_generators(DEFAULT_CANVAS_ID).unwrap().is_empty());
    }
}
