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

//! A metric spec is a user-registered request to observe method
//! invocations matching a filter, and record the resulting points into a
//! [`store::MetricStore`]. Each spec runs its own background worker: an
//! asynchronous pipeline that filters trace events, buffers them, optionally
//! pre-aggregates within a time window, and flushes batches to the store.

mod matcher;
mod worker;

pub use matcher::ResultMatcher;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sim_core::{ComponentInstance, TimeAnchor, TraceEvent, TraceEventKind};
use store::{AggregateFn, MetricStore};
use task::labels::TaskLabels;
use task::TaskManager;
use validator::Validate;

/// The duration a metric spec's flush ticker fires at, used to flush
/// partial batches even when the event rate is low.
pub const FLUSH_PERIOD: std::time::Duration = std::time::Duration::from_millis(100);

/// Number of buffered points that triggers an eager flush, independent of
/// the flush ticker.
pub const FLUSH_BATCH_SIZE: usize = 100;

/// Default aggregation window, in seconds, used when a spec's configured
/// window is absent from the wire payload (an explicit `0` is preserved —
/// see [`MetricSpecConfig::aggregation_window`]).
pub const DEFAULT_WINDOW_SECS: f64 = 10.0;

/// Minimum bounded capacity accepted for a spec's event channel.
pub const MIN_EVENT_CHANNEL_CAPACITY: usize = 1000;

/// What kind of value a metric spec records per matching event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Each matching event contributes the value `1`.
    Count,
    /// Each matching event contributes its call duration.
    Latency,
}

/// Errors raised while validating or registering a metric spec.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The spec's configuration failed validation.
    #[error("invalid metric spec configuration (id: {id}, reason: {message})")]
    InvalidConfig {
        /// The spec's configured id.
        id: String,
        /// A human-readable description of the validation failure.
        message: String,
    },

    /// The spec's target component did not resolve in the active system.
    #[error("unknown component: {component}")]
    UnknownComponent {
        /// The dotted path that failed to resolve.
        component: String,
    },
}

/// Wire/config shape for registering a metric spec, validated before a
/// [`MetricSpec`] is constructed from it.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct MetricSpecConfig {
    /// Unique identifier for this spec, within its tracer.
    #[validate(length(min = 1))]
    pub id: String,
    /// Dotted path of the target component.
    #[validate(length(min = 1))]
    pub component: String,
    /// Method names this spec observes; at least one is required.
    #[validate(length(min = 1))]
    pub methods: Vec<String>,
    /// Whether this spec records call counts or call latencies.
    pub metric_type: MetricType,
    /// The aggregation function applied to pre-aggregated windows.
    pub aggregation: AggregateFn,
    /// Aggregation window, in seconds. `0` means "store every matching
    /// event as its own point" (also the mode always used for `count`
    /// metrics); otherwise must be non-negative.
    #[serde(default = "default_window")]
    #[validate(range(min = 0.0))]
    pub aggregation_window: f64,
    /// Optional result-value matcher grammar: `"*"` (default, matches
    /// anything), `"!=x"` (inverse-exact), or an exact literal.
    #[serde(default)]
    pub result_matcher: Option<String>,
}

fn default_window() -> f64 {
    DEFAULT_WINDOW_SECS
}

impl MetricSpecConfig {
    /// Normalizes the configured window: values below zero are rejected by
    /// [`Validate`], so this only needs to resolve "use the default" vs.
    /// "store every point".
    fn window(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.aggregation_window.max(0.0))
    }
}

/// A running, per-spec background worker that matches trace events,
/// pre-aggregates them, and flushes batches to a [`MetricStore`].
///
/// At most one worker runs per spec at a time; [`MetricSpec::start`] and
/// [`MetricSpec::stop`] are both idempotent.
pub struct MetricSpec {
    id: String,
    canvas_id: String,
    component: ComponentInstance,
    methods: HashSet<String>,
    metric_type: MetricType,
    aggregation: AggregateFn,
    window: std::time::Duration,
    result_matcher: ResultMatcher,
    result_matcher_raw: Option<String>,
    event_sender: flume::Sender<TraceEvent>,
    event_receiver: Option<flume::Receiver<TraceEvent>>,
    dropped_at_channel: Arc<AtomicU64>,
    channel_full_logged: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<tokio::sync::Notify>,
    created_at: f64,
    updated_at: f64,
}

/// A read-only snapshot of a [`MetricSpec`]'s configuration and state, used
/// to build the façade's `Metric` wire shape without exposing the spec's
/// internal handles.
#[derive(Clone, Debug)]
pub struct MetricSpecSummary {
    /// The spec's identifier.
    pub id: String,
    /// The canvas this spec belongs to.
    pub canvas_id: String,
    /// Dotted path of the target component.
    pub component: String,
    /// Method names this spec observes.
    pub methods: Vec<String>,
    /// Whether this spec records call counts or call latencies.
    pub metric_type: MetricType,
    /// The aggregation function applied to pre-aggregated windows.
    pub aggregation: AggregateFn,
    /// Aggregation window, in seconds.
    pub aggregation_window: f64,
    /// The raw result-matcher grammar this spec was configured with, if any.
    pub result_matcher: Option<String>,
    /// Whether the spec's background worker is currently running.
    pub enabled: bool,
    /// Number of events dropped at this spec's channel boundary.
    pub dropped_at_channel: u64,
    /// Wall-clock timestamp this spec was created at.
    pub created_at: f64,
    /// Wall-clock timestamp this spec was last updated at.
    pub updated_at: f64,
}

impl MetricSpec {
    /// Validates `config` against `component` (already resolved by the
    /// caller) and builds a spec ready to [`MetricSpec::start`].
    pub fn new(
        canvas_id: String,
        config: MetricSpecConfig,
        component: ComponentInstance,
        now: f64,
    ) -> Result<Self, Error> {
        config.validate().map_err(|err| Error::InvalidConfig {
            id: config.id.clone(),
            message: err.to_string(),
        })?;
        let result_matcher_raw = config.result_matcher.clone();
        let result_matcher = config
            .result_matcher
            .as_deref()
            .map(ResultMatcher::parse)
            .unwrap_or(ResultMatcher::Any);
        let (event_sender, event_receiver) = flume::bounded(MIN_EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            id: config.id,
            canvas_id,
            component,
            methods: config.methods.into_iter().collect(),
            metric_type: config.metric_type,
            aggregation: config.aggregation,
            window: config.window(),
            result_matcher,
            result_matcher_raw,
            event_sender,
            event_receiver: Some(event_receiver),
            dropped_at_channel: Arc::new(AtomicU64::new(0)),
            channel_full_logged: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicBool::new(true)),
            stop_notify: Arc::new(tokio::sync::Notify::new()),
            created_at: now,
            updated_at: now,
        })
    }

    /// This spec's identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The canvas this spec belongs to.
    pub fn canvas_id(&self) -> &str {
        &self.canvas_id
    }

    /// A read-only snapshot of this spec's configuration and state.
    pub fn summary(&self) -> MetricSpecSummary {
        MetricSpecSummary {
            id: self.id.clone(),
            canvas_id: self.canvas_id.clone(),
            component: self.component.path().to_string(),
            methods: self.methods.iter().cloned().collect(),
            metric_type: self.metric_type,
            aggregation: self.aggregation,
            aggregation_window: self.window.as_secs_f64(),
            result_matcher: self.result_matcher_raw.clone(),
            enabled: self.is_running(),
            dropped_at_channel: self.dropped_at_channel(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Whether this spec's worker is currently running.
    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    /// Hands `event` to this spec for matching, per spec.md §4.B's matching
    /// rules. Never blocks: if the spec's event channel is saturated, the
    /// event is dropped and a throttled warning is logged on the first such
    /// drop since the channel last had room.
    pub fn try_dispatch(&self, event: &TraceEvent) {
        if event.kind != TraceEventKind::Exit {
            return;
        }
        let Some(component) = &event.component else {
            return;
        };
        if component != &self.component {
            return;
        }
        let Some(method) = event.method_name() else {
            return;
        };
        if !self.methods.contains(method) {
            return;
        }
        if !self.result_matcher.matches(event.return_value.as_ref()) {
            return;
        }
        match self.event_sender.try_send(event.clone()) {
            Ok(()) => {
                self.channel_full_logged.store(false, Ordering::Relaxed);
            }
            Err(_) => {
                let _ = self.dropped_at_channel.fetch_add(1, Ordering::Relaxed);
                if !self.channel_full_logged.swap(true, Ordering::Relaxed) {
                    tracing::warn!(spec_id = %self.id, "metric spec event channel full, dropping events");
                }
            }
        }
    }

    /// Number of events dropped at this spec's channel boundary because it
    /// was saturated, cumulative for the spec's lifetime.
    pub fn dropped_at_channel(&self) -> u64 {
        self.dropped_at_channel.load(Ordering::Relaxed)
    }

    /// Starts the background worker, if not already running. Idempotent.
    pub fn start(&mut self, task_manager: &mut TaskManager, store: Arc<dyn MetricStore>, anchor: Arc<dyn TimeAnchor>) {
        if !self.stopped.swap(false, Ordering::AcqRel) {
            return;
        }
        let Some(event_receiver) = self.event_receiver.take() else {
            // Already consumed by a previous start; nothing to relaunch.
            self.stopped.store(true, Ordering::Release);
            return;
        };
        let state = worker::WorkerState {
            spec_id: self.id.clone(),
            metric_type: self.metric_type,
            aggregation: self.aggregation,
            window: self.window,
            store,
            anchor,
            stopped: self.stopped.clone(),
            stop_notify: self.stop_notify.clone(),
        };
        let process_labels = task_manager.process_labels();
        let task_labels = TaskLabels::new("metricspec", &self.id, &self.canvas_id);
        let task_labels_clone = task_labels.clone();
        let join_handle = tokio::task::spawn(async move {
            worker::run(state, event_receiver).await;
            tracing::info!(
                task_id = %task_labels_clone.task_id,
                task_cat = %task_labels_clone.task_cat,
                task_source = %task_labels_clone.task_source,
                process_id = %process_labels.process_id,
                "metric spec worker has stopped"
            );
            TaskManager::no_task_cleaner(process_labels, task_labels_clone)
        });
        task_manager.register(join_handle, &task_labels);
    }

    /// Signals the worker to stop. Idempotent; safe to call on a spec that
    /// was never started.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.stop_notify.notify_waiters();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::any::Any;

    fn component(path: &str) -> ComponentInstance {
        ComponentInstance::new(path, Arc::new(()) as Arc<dyn Any + Send + Sync>)
    }

    fn config() -> MetricSpecConfig {
        MetricSpecConfig {
            id: "m1".into(),
            component: "svc.handler".into(),
            methods: vec!["Handle".into()],
            metric_type: MetricType::Count,
            aggregation: AggregateFn::Count,
            aggregation_window: 10.0,
            result_matcher: None,
        }
    }

    #[test]
    fn rejects_empty_id() {
        let mut cfg = config();
        cfg.id = String::new();
        let err = MetricSpec::new("canvas".into(), cfg, component("svc.handler"), 0.0).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn rejects_negative_window() {
        let mut cfg = config();
        cfg.aggregation_window = -1.0;
        let err = MetricSpec::new("canvas".into(), cfg, component("svc.handler"), 0.0).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn dispatch_drops_non_exit_events() {
        let spec = MetricSpec::new("canvas".into(), config(), component("svc.handler"), 0.0).unwrap();
        let event = TraceEvent {
            kind: TraceEventKind::Enter,
            event_id: 1,
            parent_id: None,
            timestamp: 0.0,
            duration: 0.0,
            component: Some(component("svc.handler")),
            method: Some(sim_core::MethodDecl::new("Handle")),
            args: vec![],
            return_value: None,
            error: None,
        };
        spec.try_dispatch(&event);
        assert_eq!(spec.dropped_at_channel(), 0);
    }
}
