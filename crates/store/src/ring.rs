//! Ring-buffer-backed [`MetricStore`] implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::{
    AggregateFn, AggregateOptions, AggregateResult, Bucket, MetricPoint, MetricStats, MetricStore,
    MetricUpdateBatch, QueryOptions, QueryResult, StoreError,
};

/// Configuration for a [`RingBufferStore`].
#[derive(Clone, Copy, Debug)]
pub struct StoreConfig {
    /// Number of points retained per metric before the oldest is overwritten.
    pub capacity: usize,
    /// Maximum retention duration. The ring-buffer implementation trims by
    /// capacity only, not by time, so this is carried for implementations
    /// or future store backends that do trim by age.
    pub retention: Duration,
    /// Bounded channel capacity for each subscriber's update queue.
    pub subscriber_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            retention: Duration::from_secs(300),
            subscriber_capacity: 64,
        }
    }
}

struct RingBuffer {
    points: Vec<Option<MetricPoint>>,
    capacity: usize,
    write_pos: usize,
    read_start: usize,
    count: usize,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            points: vec![None; capacity],
            capacity,
            write_pos: 0,
            read_start: 0,
            count: 0,
        }
    }

    fn push(&mut self, point: MetricPoint) {
        self.points[self.write_pos] = Some(point);
        self.write_pos = (self.write_pos + 1) % self.capacity;
        if self.count < self.capacity {
            self.count += 1;
        } else {
            self.read_start = (self.read_start + 1) % self.capacity;
        }
    }

    fn snapshot(&self) -> Vec<MetricPoint> {
        let mut out = Vec::with_capacity(self.count);
        let mut idx = self.read_start;
        for _ in 0..self.count {
            if let Some(point) = &self.points[idx] {
                out.push(point.clone());
            }
            idx = (idx + 1) % self.capacity;
        }
        out
    }
}

struct Subscriber {
    sender: flume::Sender<MetricUpdateBatch>,
    dropped: AtomicU64,
    gap_logged: AtomicBool,
}

/// A [`MetricStore`] backed by one fixed-capacity ring per metric, each
/// under its own `RwLock`; writes overwrite the oldest point once the ring
/// is full, and subscribers are delivered updates over a bounded channel
/// that drops the newest update (marking a gap) rather than blocking the
/// writer.
pub struct RingBufferStore {
    config: StoreConfig,
    metrics: RwLock<HashMap<String, Arc<RwLock<RingBuffer>>>>,
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    closed: AtomicBool,
}

impl RingBufferStore {
    /// Builds a new, empty store.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            metrics: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ring_for(&self, metric: &str) -> Arc<RwLock<RingBuffer>> {
        if let Some(ring) = self.metrics.read().unwrap().get(metric) {
            return ring.clone();
        }
        let mut metrics = self.metrics.write().unwrap();
        metrics
            .entry(metric.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(RingBuffer::new(self.config.capacity))))
            .clone()
    }

    fn publish(&self, metric: &str, points: &[MetricPoint]) {
        if points.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(subs) = subscribers.get_mut(metric) {
            subs.retain(|sub| {
                let batch = MetricUpdateBatch {
                    metric_id: metric.to_string(),
                    points: points.to_vec(),
                    dropped_before: sub.dropped.load(Ordering::Relaxed),
                };
                match sub.sender.try_send(batch) {
                    Ok(()) => true,
                    Err(flume::TrySendError::Full(_)) => {
                        let _ = sub.dropped.fetch_add(points.len() as u64, Ordering::Relaxed);
                        if !sub.gap_logged.swap(true, Ordering::Relaxed) {
                            tracing::warn!(metric_id = %metric, "subscriber update queue full, marking gap");
                        }
                        true
                    }
                    Err(flume::TrySendError::Disconnected(_)) => false,
                }
            });
        }
    }
}

impl MetricStore for RingBufferStore {
    fn write_point(&self, metric: &str, point: MetricPoint) -> Result<(), StoreError> {
        self.write_batch(metric, vec![point])
    }

    fn write_batch(&self, metric: &str, points: Vec<MetricPoint>) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let ring = self.ring_for(metric);
        {
            let mut ring = ring.write().unwrap();
            for point in &points {
                ring.push(point.clone());
            }
        }
        self.publish(metric, &points);
        Ok(())
    }

    fn query(&self, metric: &str, opts: &QueryOptions) -> Result<QueryResult, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let ring = match self.metrics.read().unwrap().get(metric) {
            Some(ring) => ring.clone(),
            None => return Ok(QueryResult::default()),
        };
        let mut matching: Vec<MetricPoint> = ring
            .read()
            .unwrap()
            .snapshot()
            .into_iter()
            .filter(|p| p.timestamp >= opts.start_time && p.timestamp <= opts.end_time)
            .filter(|p| opts.tag_filters.iter().all(|(k, v)| p.tags.get(k) == Some(v)))
            .collect();
        matching.sort_by(|a, b| b.timestamp.partial_cmp(&a.timestamp).unwrap_or(std::cmp::Ordering::Equal));
        let total_rows = matching.len();
        let page: Vec<MetricPoint> = matching
            .into_iter()
            .skip(opts.offset)
            .take(if opts.limit == 0 { total_rows } else { opts.limit })
            .collect();
        let has_more = opts.offset + page.len() < total_rows;
        Ok(QueryResult {
            points: page,
            total_rows,
            has_more,
        })
    }

    fn aggregate(&self, metric: &str, opts: &AggregateOptions) -> Result<AggregateResult, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        if opts.window <= 0.0 {
            return Err(StoreError::InvalidWindow);
        }
        let ring = match self.metrics.read().unwrap().get(metric) {
            Some(ring) => ring.clone(),
            None => return Ok(AggregateResult::default()),
        };
        let matching: Vec<MetricPoint> = ring
            .read()
            .unwrap()
            .snapshot()
            .into_iter()
            .filter(|p| p.timestamp >= opts.start_time && p.timestamp <= opts.end_time)
            .filter(|p| opts.tag_filters.iter().all(|(k, v)| p.tags.get(k) == Some(v)))
            .collect();

        let mut by_bucket: HashMap<u64, Vec<f64>> = HashMap::new();
        for point in &matching {
            let bucket_index = (point.timestamp / opts.window).floor() as u64;
            by_bucket.entry(bucket_index).or_default().push(point.value);
        }

        let mut buckets: Vec<Bucket> = by_bucket
            .into_iter()
            .map(|(bucket_index, values)| {
                let mut computed = HashMap::with_capacity(opts.functions.len());
                for function in &opts.functions {
                    let _ = computed.insert(*function, crate::aggregate_values(*function, values.clone(), opts.window));
                }
                Bucket {
                    start: bucket_index as f64 * opts.window,
                    values: computed,
                }
            })
            .collect();
        buckets.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));
        Ok(AggregateResult { buckets })
    }

    fn subscribe(&self, metric_ids: &[String]) -> flume::Receiver<MetricUpdateBatch> {
        let (sender, receiver) = flume::bounded(self.config.subscriber_capacity);
        let mut subscribers = self.subscribers.lock().unwrap();
        for metric_id in metric_ids {
            subscribers.entry(metric_id.clone()).or_default().push(Subscriber {
                sender: sender.clone(),
                dropped: AtomicU64::new(0),
                gap_logged: AtomicBool::new(false),
            });
        }
        receiver
    }

    fn stats(&self, metric: &str) -> Option<MetricStats> {
        let ring = self.metrics.read().unwrap().get(metric)?.clone();
        let snapshot = ring.read().unwrap().snapshot();
        Some(MetricStats {
            num_data_points: snapshot.len(),
            oldest_timestamp: snapshot.first().map(|p| p.timestamp),
            newest_timestamp: snapshot.last().map(|p| p.timestamp),
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.subscribers.lock().unwrap().clear();
    }
}
