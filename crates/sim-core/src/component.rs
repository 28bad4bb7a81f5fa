//! Opaque handles onto the loader's component graph.
//!
//! The core never inspects a component instance or its environment — it
//! only resolves them once (by dotted path) and carries the resulting
//! handle around for identity comparison and for handing back to the
//! evaluator.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A resolved reference to a component instance within the active system.
///
/// Cloning is cheap (an `Arc` clone); equality is by identity, not by the
/// path it was resolved from, since a component may be reachable under more
/// than one path alias (spec.md §9, "graph of component instances").
#[derive(Clone)]
pub struct ComponentInstance {
    path: Arc<str>,
    inner: Arc<dyn Any + Send + Sync>,
}

impl ComponentInstance {
    /// Wraps an opaque component instance resolved at the given path.
    pub fn new(path: impl Into<Arc<str>>, inner: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            path: path.into(),
            inner,
        }
    }

    /// The dotted path this instance was resolved from.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Downcasts the opaque handle to the loader's concrete component type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl PartialEq for ComponentInstance {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ComponentInstance {}

impl fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInstance").field("path", &self.path).finish()
    }
}

/// A method declaration resolved on a component instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDecl {
    /// The method's name, as declared on the component.
    pub name: String,
}

impl MethodDecl {
    /// Builds a method declaration from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// An opaque component environment, created fresh per generator execution.
///
/// `Env` is produced by [`crate::SystemInstance::env`] and consumed only by
/// the evaluator; the core treats it as a capability token, never its
/// contents.
pub type Env = Arc<dyn Any + Send + Sync>;
