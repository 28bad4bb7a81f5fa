//! The narrow tracer interface the evaluator drives on every method call.

use crate::trace::TraceEvent;

/// The tracer contract the evaluator is plugged into.
///
/// Only [`Tracer::exit`] is functionally significant at the core: it is the
/// sole path by which trace events reach registered metric specs. `enter`,
/// `push_parent_id`, and `pop_parent` exist only to satisfy the evaluator's
/// contract and to leave room for a future per-call stack; implementations
/// are free to make them no-ops.
///
/// A tracer implementation must never block the caller: the evaluator calls
/// these methods inline on its own execution path.
pub trait Tracer: Send + Sync {
    /// Called when the evaluator is about to invoke a method.
    fn enter(&self, event: TraceEvent);

    /// Called when the evaluator has returned from a method invocation.
    fn exit(&self, event: TraceEvent);

    /// Pushes a parent call identifier onto the evaluator's call stack.
    fn push_parent_id(&self, id: i64);

    /// Pops the most recently pushed parent call identifier.
    fn pop_parent(&self);
}
