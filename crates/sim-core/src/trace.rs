//! The trace event shape fed by the evaluator into the [`crate::Tracer`]
//! contract on every method call.

use context::Value;

use crate::component::{ComponentInstance, MethodDecl};

/// Whether a trace event marks the start or the end of a method invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceEventKind {
    /// The evaluator is about to invoke a method.
    Enter,
    /// The evaluator has returned from a method invocation.
    Exit,
}

/// One trace event, as produced by the evaluator on each `Enter`/`Exit`.
///
/// Only `Exit` events carry a meaningful `duration`; `Enter` events report
/// `duration = 0.0` and exist only so a future tracer implementation could
/// build a per-call stack.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceEvent {
    /// Whether this is the start or the end of the invocation.
    pub kind: TraceEventKind,
    /// A monotonically increasing identifier, unique within one evaluator run.
    pub event_id: i64,
    /// The identifier of the enclosing call, if any.
    pub parent_id: Option<i64>,
    /// Virtual simulation time at which the event occurred, in seconds.
    pub timestamp: f64,
    /// Virtual duration of the call, in seconds; `0.0` for `Enter`.
    pub duration: f64,
    /// The component instance the method was invoked on, if resolved.
    pub component: Option<ComponentInstance>,
    /// The method declaration invoked, if resolved.
    pub method: Option<MethodDecl>,
    /// String renderings of the call's arguments.
    pub args: Vec<String>,
    /// The method's return value, for `Exit` events that completed normally.
    pub return_value: Option<Value>,
    /// The error message, for `Exit` events that completed with an error.
    pub error: Option<String>,
}

impl TraceEvent {
    /// The component path this event was raised against, if any.
    pub fn component_path(&self) -> Option<&str> {
        self.component.as_ref().map(ComponentInstance::path)
    }

    /// The method name this event was raised against, if any.
    pub fn method_name(&self) -> Option<&str> {
        self.method.as_ref().map(|m| m.name.as_str())
    }
}
