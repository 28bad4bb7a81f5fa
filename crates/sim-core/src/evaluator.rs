//! The evaluator contract: invokes a resolved method against a component
//! environment, driving the tracer along the way.

use std::sync::Arc;

use context::Value;

use crate::component::{ComponentInstance, Env, MethodDecl};
use crate::loader::FileInstance;
use crate::tracer::Tracer;

/// A method-call expression to evaluate: a resolved component and method.
#[derive(Clone, Debug)]
pub struct MethodCall {
    /// The component instance the call targets.
    pub component: ComponentInstance,
    /// The method declaration to invoke.
    pub method: MethodDecl,
}

/// The result of one successful evaluation.
#[derive(Clone, Debug)]
pub struct EvalOutcome {
    /// The method's return value, if it produced one.
    pub return_value: Option<Value>,
    /// The virtual duration the call took, in seconds.
    pub duration: f64,
}

/// Errors raised while evaluating a method call.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum EvalError {
    /// The evaluator failed to run the call to completion.
    #[error("evaluation failed (component: {component}, method: {method}): {message}")]
    Failed {
        /// The component path the call targeted.
        component: String,
        /// The method name the call targeted.
        method: String,
        /// A human-readable description of the failure.
        message: String,
    },
}

/// One evaluator instance, bound to a loaded file and a tracer.
///
/// A fresh evaluator may be constructed per generator execution (the
/// contract does not require evaluators to be reusable across calls, only
/// that independent evaluators can be constructed concurrently).
pub trait Evaluator: Send + Sync {
    /// Evaluates `call` against `env`, starting at virtual time `virtual_time`.
    fn eval(&self, call: &MethodCall, env: &Env, virtual_time: f64) -> Result<EvalOutcome, EvalError>;
}

/// Constructs evaluators bound to a given file and tracer.
pub trait EvaluatorFactory: Send + Sync {
    /// Builds a new evaluator over `file`, driving `tracer` on every call.
    fn new_evaluator(&self, file: Arc<dyn FileInstance>, tracer: Arc<dyn Tracer>) -> Box<dyn Evaluator>;
}
