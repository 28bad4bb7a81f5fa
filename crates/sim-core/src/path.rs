//! The path-traversal engine contract: breadth-first enumeration of the
//! possible execution paths starting at a method, bounded by depth.

use crate::loader::SystemInstance;

/// Errors raised while exploring execution paths.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum PathExplorerError {
    /// The starting component or method does not exist in the system.
    #[error("unknown entry point (component: {component}, method: {method})")]
    UnknownEntryPoint {
        /// The dotted path of the requested entry component.
        component: String,
        /// The requested entry method name.
        method: String,
    },

    /// The explorer failed to complete the traversal.
    #[error("path exploration failed: {message}")]
    Failed {
        /// A human-readable description of the failure.
        message: String,
    },
}

/// One edge of a discovered execution path: a call from one component's
/// method into another.
#[derive(Clone, Debug)]
pub struct PathStep {
    /// The dotted path of the component making the call.
    pub component: String,
    /// The method invoked on that component.
    pub method: String,
    /// Depth of this step from the entry point, `0`-based.
    pub depth: usize,
}

/// One complete path discovered from the entry point down to `max_depth`.
#[derive(Clone, Debug, Default)]
pub struct TracePath {
    /// The ordered sequence of calls making up this path.
    pub steps: Vec<PathStep>,
}

/// The result of one `TraceAllPaths` run: every path discovered from the
/// entry point, breadth-first, bounded by `max_depth`.
#[derive(Clone, Debug, Default)]
pub struct AllPathsTraceData {
    /// Every discovered path, in breadth-first discovery order.
    pub paths: Vec<TracePath>,
    /// Whether traversal stopped because it hit `max_depth` on at least one
    /// branch rather than exhausting the call graph naturally.
    pub truncated: bool,
}

/// Enumerates possible execution paths through a system's call graph.
pub trait PathExplorer: Send + Sync {
    /// Breadth-first enumeration of paths starting at `(component, method)`,
    /// not descending past `max_depth` calls.
    fn trace_all_paths(
        &self,
        system: &dyn SystemInstance,
        component: &str,
        method: &str,
        max_depth: usize,
    ) -> Result<AllPathsTraceData, PathExplorerError>;
}
