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

//! The in-process bridge between the evaluator's `Enter`/`Exit` trace
//! events and the registered [`metricspec::MetricSpec`]s: a narrow
//! `sim_core::Tracer` implementation that fans every `Exit` event out to
//! all specs registered against it. Only `Exit` is functionally
//! significant; `enter`, `push_parent_id`, and `pop_parent` are no-ops that
//! exist to satisfy the evaluator's contract (spec.md §9, resolved open
//! question).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use metricspec::{MetricSpec, MetricSpecConfig};
use sim_core::{ComponentInstance, TimeAnchor, TraceEvent, Tracer};
use store::MetricStore;
use task::TaskManager;

/// Errors raised while managing a tracer's registered specs.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A spec with this id is already registered on the tracer.
    #[error("metric spec already registered: {id}")]
    AlreadyExists {
        /// The id that collided.
        id: String,
    },
    /// The spec's own configuration/registration failed.
    #[error("metric spec error: {0}")]
    Spec(#[from] metricspec::Error),
}

/// Fans `Exit` trace events out to every registered [`MetricSpec`].
///
/// Never blocks the evaluator: the `exit` path only takes a read lock over
/// the spec registry and calls each spec's non-blocking `try_dispatch`; a
/// spec whose own event channel is saturated drops the event at its own
/// boundary (spec.md §4.C).
pub struct MetricTracer {
    canvas_id: String,
    specs: RwLock<HashMap<String, MetricSpec>>,
    store: Arc<dyn MetricStore>,
    anchor: Arc<dyn TimeAnchor>,
}

impl MetricTracer {
    /// Builds a tracer bound to `store` (shared across every spec it will
    /// register) and `anchor` (used by specs to convert virtual
    /// timestamps to wall-clock ones).
    pub fn new(canvas_id: String, store: Arc<dyn MetricStore>, anchor: Arc<dyn TimeAnchor>) -> Self {
        Self {
            canvas_id,
            specs: RwLock::new(HashMap::new()),
            store,
            anchor,
        }
    }

    /// Lists the ids of every registered spec.
    pub fn list_metric_spec(&self) -> Vec<String> {
        self.specs.read().expect("specs lock poisoned").keys().cloned().collect()
    }

    /// A read-only snapshot of every registered spec, for the façade's
    /// `Metric` wire shape.
    pub fn list_metric_spec_summaries(&self) -> Vec<metricspec::MetricSpecSummary> {
        self.specs
            .read()
            .expect("specs lock poisoned")
            .values()
            .map(MetricSpec::summary)
            .collect()
    }

    /// A read-only snapshot of one registered spec, if it exists.
    pub fn get_metric_spec(&self, id: &str) -> Option<metricspec::MetricSpecSummary> {
        self.specs.read().expect("specs lock poisoned").get(id).map(MetricSpec::summary)
    }

    /// Validates and registers a spec, starting its background worker.
    /// Rejects a duplicate id.
    pub fn add_metric_spec(
        &self,
        config: MetricSpecConfig,
        component: ComponentInstance,
        task_manager: &mut TaskManager,
        now: f64,
    ) -> Result<(), Error> {
        let mut specs = self.specs.write().expect("specs lock poisoned");
        if specs.contains_key(&config.id) {
            return Err(Error::AlreadyExists { id: config.id });
        }
        let mut spec = MetricSpec::new(self.canvas_id.clone(), config, component, now)?;
        spec.start(task_manager, self.store.clone(), self.anchor.clone());
        let _ = specs.insert(spec.id().to_string(), spec);
        Ok(())
    }

    /// Stops and removes a spec. Returns whether a spec with this id existed.
    pub fn remove_metric_spec(&self, id: &str) -> bool {
        let removed = self.specs.write().expect("specs lock poisoned").remove(id);
        if let Some(spec) = &removed {
            spec.stop();
        }
        removed.is_some()
    }

    /// Stops every registered spec and discards the registry.
    pub fn clear(&self) {
        let mut specs = self.specs.write().expect("specs lock poisoned");
        for spec in specs.values() {
            spec.stop();
        }
        specs.clear();
    }
}

impl Tracer for MetricTracer {
    fn enter(&self, _event: TraceEvent) {
        // No-op at the core; see the module doc comment.
    }

    fn exit(&self, event: TraceEvent) {
        let specs = self.specs.read().expect("specs lock poisoned");
        for spec in specs.values() {
            spec.try_dispatch(&event);
        }
    }

    fn push_parent_id(&self, _id: i64) {
        // No-op at the core; see the module doc comment.
    }

    fn pop_parent(&self) {
        // No-op at the core; see the module doc comment.
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use sim_core::TraceEventKind;
    use std::any::Any;
    use store::{RingBufferStore, StoreConfig};

    struct FixedAnchor;
    impl TimeAnchor for FixedAnchor {
        fn to_real_time(&self, virtual_time: f64) -> f64 {
            virtual_time
        }
    }

    fn component(path: &str) -> ComponentInstance {
        ComponentInstance::new(path, Arc::new(()) as Arc<dyn Any + Send + Sync>)
    }

    fn tracer() -> MetricTracer {
        let store: Arc<dyn MetricStore> = Arc::new(RingBufferStore::new(StoreConfig::default()));
        MetricTracer::new("canvas".into(), store, Arc::new(FixedAnchor))
    }

    fn spec_config() -> MetricSpecConfig {
        MetricSpecConfig {
            id: "m1".into(),
            component: "svc.handler".into(),
            methods: vec!["Handle".into()],
            metric_type: metricspec::MetricType::Count,
            aggregation: store::AggregateFn::Count,
            aggregation_window: 0.0,
            result_matcher: None,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn add_then_remove_leaves_registry_empty() {
        let tracer = tracer();
        let mut task_manager = TaskManager::new();
        tracer
            .add_metric_spec(spec_config(), component("svc.handler"), &mut task_manager, 0.0)
            .unwrap();
        assert_eq!(tracer.list_metric_spec(), vec!["m1".to_string()]);
        assert!(tracer.remove_metric_spec("m1"));
        assert!(tracer.list_metric_spec().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn add_rejects_duplicate_id() {
        let tracer = tracer();
        let mut task_manager = TaskManager::new();
        tracer
            .add_metric_spec(spec_config(), component("svc.handler"), &mut task_manager, 0.0)
            .unwrap();
        let err = tracer
            .add_metric_spec(spec_config(), component("svc.handler"), &mut task_manager, 0.0)
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exit_never_blocks_even_with_no_matching_spec() {
        let tracer = tracer();
        let event = TraceEvent {
            kind: TraceEventKind::Exit,
            event_id: 1,
            parent_id: None,
            timestamp: 0.0,
            duration: 0.01,
            component: Some(component("other.handler")),
            method: Some(sim_core::MethodDecl::new("Handle")),
            args: vec![],
            return_value: None,
            error: None,
        };
        tracer.exit(event);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clear_stops_every_spec() {
        let tracer = tracer();
        let mut task_manager = TaskManager::new();
        tracer
            .add_metric_spec(spec_config(), component("svc.handler"), &mut task_manager, 0.0)
            .unwrap();
        tracer.clear();
        assert!(tracer.list_metric_spec().is_empty());
    }
}
