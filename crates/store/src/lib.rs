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

//! An abstract metric store contract and a ring-buffer implementation of it:
//! thread-safe point storage, time-range queries, windowed aggregation, and
//! real-time subscription of incremental updates.

mod ring;

pub use ring::{RingBufferStore, StoreConfig};

use std::collections::HashMap;

/// One stored data point.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricPoint {
    /// Seconds since the Unix epoch (real or virtual time; see the crate's
    /// wall-clock anchoring note in `canvas`).
    pub timestamp: f64,
    /// The point's value.
    pub value: f64,
    /// Optional key-value tags attached to this point.
    pub tags: HashMap<String, String>,
}

impl MetricPoint {
    /// Builds an untagged point.
    pub fn new(timestamp: f64, value: f64) -> Self {
        Self {
            timestamp,
            value,
            tags: HashMap::new(),
        }
    }
}

/// Filters and pagination for [`MetricStore::query`]/[`MetricStore::query_multiple`].
#[derive(Clone, Debug, Default)]
pub struct QueryOptions {
    /// Inclusive lower timestamp bound.
    pub start_time: f64,
    /// Inclusive upper timestamp bound.
    pub end_time: f64,
    /// Tag equalities that every returned point must satisfy.
    pub tag_filters: HashMap<String, String>,
    /// Maximum number of points to return; `0` means unbounded.
    pub limit: usize,
    /// Number of matching points to skip before collecting `limit`.
    pub offset: usize,
}

/// The result of one [`MetricStore::query`] call.
#[derive(Clone, Debug, Default)]
pub struct QueryResult {
    /// Points in `[start_time, end_time]` matching the tag filters, sorted
    /// by timestamp descending, after pagination.
    pub points: Vec<MetricPoint>,
    /// Total number of points matching the filters, before pagination.
    pub total_rows: usize,
    /// Whether more points remain beyond this page.
    pub has_more: bool,
}

/// An aggregation function computable over a window of points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum AggregateFn {
    /// Number of points in the bucket.
    Count,
    /// Sum of values in the bucket.
    Sum,
    /// Arithmetic mean of values in the bucket.
    Avg,
    /// Minimum value in the bucket.
    Min,
    /// Maximum value in the bucket.
    Max,
    /// `count / window-in-seconds`.
    Rate,
    /// 50th percentile.
    P50,
    /// 90th percentile.
    P90,
    /// 95th percentile.
    P95,
    /// 99th percentile.
    P99,
}

/// Parameters for [`MetricStore::aggregate`].
#[derive(Clone, Debug)]
pub struct AggregateOptions {
    /// Inclusive lower timestamp bound.
    pub start_time: f64,
    /// Inclusive upper timestamp bound.
    pub end_time: f64,
    /// Bucket width, in seconds. Must be strictly positive.
    pub window: f64,
    /// Functions to compute per bucket.
    pub functions: Vec<AggregateFn>,
    /// Tag equalities that every considered point must satisfy.
    pub tag_filters: HashMap<String, String>,
}

/// One window-aligned bucket of an aggregation result.
#[derive(Clone, Debug, Default)]
pub struct Bucket {
    /// The bucket's start time, an integer multiple of the aggregation window.
    pub start: f64,
    /// The computed value of each requested function, keyed by function.
    pub values: HashMap<AggregateFn, f64>,
}

/// The result of one [`MetricStore::aggregate`] call.
#[derive(Clone, Debug, Default)]
pub struct AggregateResult {
    /// Buckets in ascending order of `start`.
    pub buckets: Vec<Bucket>,
}

/// Summary statistics for one metric, used by the façade's `Metric` wire
/// shape (`oldestTimestamp`/`newestTimestamp`/`numDataPoints`).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MetricStats {
    /// Number of points currently retained for this metric.
    pub num_data_points: usize,
    /// Timestamp of the oldest retained point, if any.
    pub oldest_timestamp: Option<f64>,
    /// Timestamp of the newest retained point, if any.
    pub newest_timestamp: Option<f64>,
}

/// A batch of points delivered to a subscriber of [`MetricStore::subscribe`].
#[derive(Clone, Debug, Default)]
pub struct MetricUpdateBatch {
    /// The metric these points belong to.
    pub metric_id: String,
    /// Newly written points, in write order.
    pub points: Vec<MetricPoint>,
    /// Cumulative count of points dropped for this subscriber before this
    /// batch, because its update queue was full. Monotonic for the lifetime
    /// of the subscription.
    pub dropped_before: u64,
}

/// Errors raised by a [`MetricStore`] operation.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    /// The store has been closed; no further writes are accepted.
    #[error("store is closed")]
    Closed,
    /// An aggregation was requested with a non-positive window.
    #[error("aggregation window must be strictly positive")]
    InvalidWindow,
}

/// Thread-safe storage and query engine for metric points.
///
/// Implementations must guarantee that a write never blocks longer than
/// O(1) on any reader, and that [`MetricStore::close`] is idempotent and
/// puts the store into a terminal state where subsequent writes fail fast
/// with [`StoreError::Closed`].
pub trait MetricStore: Send + Sync {
    /// Appends one point to `metric`.
    fn write_point(&self, metric: &str, point: MetricPoint) -> Result<(), StoreError>;

    /// Appends many points to `metric`, atomically with respect to readers
    /// of that metric.
    fn write_batch(&self, metric: &str, points: Vec<MetricPoint>) -> Result<(), StoreError>;

    /// Returns points for `metric` matching `opts`.
    fn query(&self, metric: &str, opts: &QueryOptions) -> Result<QueryResult, StoreError>;

    /// Runs [`MetricStore::query`] over several metrics at once.
    fn query_multiple(
        &self,
        metrics: &[String],
        opts: &QueryOptions,
    ) -> Result<HashMap<String, QueryResult>, StoreError> {
        let mut out = HashMap::with_capacity(metrics.len());
        for metric in metrics {
            let _ = out.insert(metric.clone(), self.query(metric, opts)?);
        }
        Ok(out)
    }

    /// Buckets `metric`'s points within `opts` and computes every requested
    /// aggregation function per bucket.
    fn aggregate(&self, metric: &str, opts: &AggregateOptions) -> Result<AggregateResult, StoreError>;

    /// Subscribes to incremental updates for the given metric IDs.
    ///
    /// The returned channel emits a [`MetricUpdateBatch`] per metric as new
    /// points are written; dropping the receiver unsubscribes within one
    /// polling period.
    fn subscribe(&self, metric_ids: &[String]) -> flume::Receiver<MetricUpdateBatch>;

    /// Returns summary statistics for `metric`, if anything has been
    /// written to it.
    fn stats(&self, metric: &str) -> Option<MetricStats>;

    /// Releases resources and puts the store into a terminal state.
    /// Idempotent.
    fn close(&self);
}

/// Computes one aggregation function over a bucket of values, sorting them
/// ascending first. Shared by the ring-buffer implementation's own
/// `aggregate` and by metric-spec pre-aggregation, so the two layers never
/// disagree on percentile semantics.
pub fn aggregate_values(function: AggregateFn, mut values: Vec<f64>, window: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    match function {
        AggregateFn::Count => values.len() as f64,
        AggregateFn::Sum => values.iter().sum(),
        AggregateFn::Avg => values.iter().sum::<f64>() / values.len() as f64,
        AggregateFn::Min => values[0],
        AggregateFn::Max => values[values.len() - 1],
        AggregateFn::Rate => values.len() as f64 / window,
        AggregateFn::P50 => percentile(&values, 0.50),
        AggregateFn::P90 => percentile(&values, 0.90),
        AggregateFn::P95 => percentile(&values, 0.95),
        AggregateFn::P99 => percentile(&values, 0.99),
    }
}

/// Picks index `⌊(n-1)·p⌋` from an ascending-sorted slice.
pub fn percentile(sorted_ascending: &[f64], p: f64) -> f64 {
    let n = sorted_ascending.len();
    let index = (((n - 1) as f64) * p).floor() as usize;
    sorted_ascending[index.min(n.saturating_sub(1))]
}
