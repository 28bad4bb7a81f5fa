//! The per-spec background worker: matches already filtered at the
//! dispatch boundary (see [`crate::MetricSpec::try_dispatch`]), this module
//! only turns accepted events into stored points.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sim_core::{TimeAnchor, TraceEvent};
use store::{AggregateFn, MetricPoint, MetricStore};

use crate::{MetricType, FLUSH_BATCH_SIZE, FLUSH_PERIOD};

pub(crate) struct WorkerState {
    pub(crate) spec_id: String,
    pub(crate) metric_type: MetricType,
    pub(crate) aggregation: AggregateFn,
    pub(crate) window: Duration,
    pub(crate) store: Arc<dyn MetricStore>,
    pub(crate) anchor: Arc<dyn TimeAnchor>,
    pub(crate) stopped: Arc<AtomicBool>,
    pub(crate) stop_notify: Arc<tokio::sync::Notify>,
}

/// Tracks in-flight window buckets and the points ready for the next flush.
struct Batch {
    points: Vec<MetricPoint>,
    windows: HashMap<u64, Vec<f64>>,
    latest_real_time: f64,
}

impl Batch {
    fn new() -> Self {
        Self {
            points: Vec::with_capacity(FLUSH_BATCH_SIZE),
            windows: HashMap::new(),
            latest_real_time: 0.0,
        }
    }

    fn record(&mut self, state: &WorkerState, event: &TraceEvent, window_secs: f64, pre_aggregate: bool) {
        let value = match state.metric_type {
            MetricType::Count => 1.0,
            MetricType::Latency => event.duration,
        };
        let real_time = state.anchor.to_real_time(event.timestamp);
        self.latest_real_time = self.latest_real_time.max(real_time);

        if pre_aggregate {
            let bucket = (real_time / window_secs).floor() as u64;
            self.windows.entry(bucket).or_default().push(value);
        } else {
            self.points.push(MetricPoint::new(real_time, value));
        }
    }

    /// Moves elapsed window buckets into `points`. With `final_flush`, every
    /// remaining bucket is drained regardless of elapsed time.
    fn settle_windows(&mut self, state: &WorkerState, window_secs: f64, final_flush: bool) {
        let latest_real_time = self.latest_real_time;
        let elapsed = |bucket: &u64| ((*bucket as f64) + 1.0) * window_secs <= latest_real_time;
        let ready: Vec<u64> = self
            .windows
            .keys()
            .copied()
            .filter(|bucket| final_flush || elapsed(bucket))
            .collect();
        for bucket in ready {
            if let Some(values) = self.windows.remove(&bucket) {
                let aggregated = store::aggregate_values(state.aggregation, values, window_secs);
                self.points.push(MetricPoint::new(bucket as f64 * window_secs, aggregated));
            }
        }
    }

    fn flush(&mut self, state: &WorkerState) {
        if self.points.is_empty() {
            return;
        }
        let points = std::mem::take(&mut self.points);
        if let Err(error) = state.store.write_batch(&state.spec_id, points) {
            tracing::warn!(spec_id = %state.spec_id, %error, "failed to flush metric points to store");
        }
    }
}

pub(crate) async fn run(state: WorkerState, event_receiver: flume::Receiver<TraceEvent>) {
    let window_secs = state.window.as_secs_f64();
    let pre_aggregate = window_secs > 0.0 && !matches!(state.aggregation, AggregateFn::Count);
    let mut batch = Batch::new();

    let mut ticker = tokio::time::interval(FLUSH_PERIOD);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    'outer: loop {
        tokio::select! {
            _ = state.stop_notify.notified() => break 'outer,
            _ = ticker.tick() => {
                batch.settle_windows(&state, window_secs, false);
                batch.flush(&state);
            }
            event = event_receiver.recv_async() => {
                match event {
                    Ok(event) => {
                        batch.record(&state, &event, window_secs, pre_aggregate);
                        if batch.points.len() >= FLUSH_BATCH_SIZE {
                            batch.flush(&state);
                        }
                    }
                    Err(_) => break 'outer,
                }
            }
        }
        if state.stopped.load(Ordering::Acquire) {
            break;
        }
    }

    while let Ok(event) = event_receiver.try_recv() {
        batch.record(&state, &event, window_secs, pre_aggregate);
    }
    batch.settle_windows(&state, window_secs, true);
    batch.flush(&state);
}
