//! Wire payload shapes (spec.md §6) and the explicit mappings from the
//! core's native types into them. The façade never leaks a native type
//! across its boundary; every response is built through one of these.

use canvas::{DiagramEdge, GeneratorSummary, SystemDiagram};
use metricspec::MetricSpecSummary;
use sim_core::TraceEvent;
use store::{MetricPoint, MetricStats};

/// `Generator` wire shape.
#[derive(Clone, Debug)]
pub struct Generator {
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

impl From<GeneratorSummary> for Generator {
    fn from(g: GeneratorSummary) -> Self {
        Self {
            id: g.id,
            canvas_id: g.canvas_id,
            name: g.name,
            component: g.component,
            method: g.method,
            rate: g.rate,
            duration: g.duration,
            enabled: g.enabled,
            created_at: g.created_at,
            updated_at: g.updated_at,
        }
    }
}

/// `Metric` wire shape. `name` is synthesized from the spec's id (specs
/// carry no separate display name); `match_result`/`match_result_type` are
/// derived from the raw matcher grammar the spec was registered with.
#[derive(Clone, Debug)]
pub struct Metric {
    /// The spec's identifier.
    pub id: String,
    /// The canvas this spec belongs to.
    pub canvas_id: String,
    /// Display name; equal to `id`.
    pub name: String,
    /// Dotted path of the target component.
    pub component: String,
    /// Method names this spec observes.
    pub methods: Vec<String>,
    /// Whether the spec's background worker is currently running.
    pub enabled: bool,
    /// `"count"` or `"latency"`.
    pub metric_type: &'static str,
    /// The aggregation function name.
    pub aggregation: store::AggregateFn,
    /// Aggregation window, in seconds.
    pub aggregation_window: f64,
    /// The raw result-matcher grammar, defaulting to `"*"`.
    pub match_result: String,
    /// `"any"`, `"equals"`, or `"not_equals"`, parsed from `match_result`.
    pub match_result_type: &'static str,
    /// Timestamp of the oldest retained point for this metric, if any.
    pub oldest_timestamp: Option<f64>,
    /// Timestamp of the newest retained point for this metric, if any.
    pub newest_timestamp: Option<f64>,
    /// Number of points currently retained for this metric.
    pub num_data_points: usize,
    /// Wall-clock timestamp this spec was created at.
    pub created_at: f64,
    /// Wall-clock timestamp this spec was last updated at.
    pub updated_at: f64,
}

impl Metric {
    pub(crate) fn from_summary(summary: MetricSpecSummary, stats: Option<MetricStats>) -> Self {
        let match_result = summary.result_matcher.clone().unwrap_or_else(|| "*".to_string());
        let match_result_type = if match_result == "*" {
            "any"
        } else if match_result.starts_with("!=") {
            "not_equals"
        } else {
            "equals"
        };
        let stats = stats.unwrap_or_default();
        Self {
            id: summary.id.clone(),
            canvas_id: summary.canvas_id,
            name: summary.id,
            component: summary.component,
            methods: summary.methods,
            enabled: summary.enabled,
            metric_type: match summary.metric_type {
                metricspec::MetricType::Count => "count",
                metricspec::MetricType::Latency => "latency",
            },
            aggregation: summary.aggregation,
            aggregation_window: summary.aggregation_window,
            match_result,
            match_result_type,
            oldest_timestamp: stats.oldest_timestamp,
            newest_timestamp: stats.newest_timestamp,
            num_data_points: stats.num_data_points,
            created_at: summary.created_at,
            updated_at: summary.updated_at,
        }
    }
}

/// `MetricPoint` wire shape: deliberately drops the tag map, which is an
/// internal query-filtering detail, not user-facing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WirePoint {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    /// The point's value.
    pub value: f64,
}

impl From<&MetricPoint> for WirePoint {
    fn from(point: &MetricPoint) -> Self {
        Self {
            timestamp: point.timestamp,
            value: point.value,
        }
    }
}

/// `TraceEvent` wire shape.
#[derive(Clone, Debug)]
pub struct WireTraceEvent {
    /// `"enter"` or `"exit"`.
    pub kind: &'static str,
    /// The event's identifier.
    pub id: i64,
    /// The identifier of the enclosing call, if any.
    pub parent_id: Option<i64>,
    /// Virtual simulation time, in seconds.
    pub timestamp: f64,
    /// Virtual duration of the call, in seconds.
    pub duration: f64,
    /// Dotted path of the component the call targeted, if resolved.
    pub component: Option<String>,
    /// The method name invoked, if resolved.
    pub method: Option<String>,
    /// String renderings of the call's arguments.
    pub args: Vec<String>,
    /// The method's return value, rendered as a string, if any.
    pub return_value: Option<String>,
    /// The error message, if the call completed with an error.
    pub error_message: Option<String>,
}

impl From<TraceEvent> for WireTraceEvent {
    fn from(event: TraceEvent) -> Self {
        Self {
            kind: match event.kind {
                sim_core::TraceEventKind::Enter => "enter",
                sim_core::TraceEventKind::Exit => "exit",
            },
            id: event.event_id,
            parent_id: event.parent_id,
            timestamp: event.timestamp,
            duration: event.duration,
            component: event.component.as_ref().map(|c| c.path().to_string()),
            method: event.method.as_ref().map(|m| m.name.clone()),
            args: event.args,
            return_value: event
                .return_value
                .map(|value| String::try_from(value).unwrap_or_default()),
            error_message: event.error,
        }
    }
}

/// `{systemName, nodes[], edges[]}` projection for `GetSystemDiagram`.
#[derive(Clone, Debug)]
pub struct Diagram {
    /// The name of the active system.
    pub system_name: String,
    /// Every component instance path reachable in the system.
    pub nodes: Vec<String>,
    /// Call-graph edges currently carrying estimated traffic.
    pub edges: Vec<Edge>,
}

/// One edge of a [`Diagram`].
#[derive(Clone, Debug)]
pub struct Edge {
    /// The calling component's dotted path.
    pub from: String,
    /// The called component's dotted path.
    pub to: String,
    /// The method invoked on `to`.
    pub method: String,
    /// The estimated arrival rate for this edge, in events per second.
    pub rate: f64,
}

impl From<SystemDiagram> for Diagram {
    fn from(diagram: SystemDiagram) -> Self {
        Self {
            system_name: diagram.system_name,
            nodes: diagram.nodes,
            edges: diagram.edges.into_iter().map(Edge::from).collect(),
        }
    }
}

impl From<DiagramEdge> for Edge {
    fn from(edge: DiagramEdge) -> Self {
        Self {
            from: edge.from,
            to: edge.to,
            method: edge.method,
            rate: edge.rate,
        }
    }
}
