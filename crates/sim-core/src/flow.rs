//! The flow-analysis strategy contract: estimates per-(component, method)
//! arrival rates given the set of active generators.

use std::collections::HashMap;

use crate::loader::SystemInstance;

/// Errors raised while evaluating a flow-analysis strategy.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum FlowStrategyError {
    /// The named strategy is not registered.
    #[error("unknown flow strategy: {name}")]
    UnknownStrategy {
        /// The strategy name that was requested.
        name: String,
    },

    /// The strategy failed to produce a result for the given inputs.
    #[error("flow strategy {strategy} failed: {message}")]
    Failed {
        /// The strategy name that failed.
        strategy: String,
        /// A human-readable description of the failure.
        message: String,
    },
}

/// One generator's contribution to a flow-analysis run: the target it
/// drives and the rate it drives it at.
#[derive(Clone, Debug)]
pub struct GeneratorLoad {
    /// The dotted path of the targeted component.
    pub component: String,
    /// The targeted method name.
    pub method: String,
    /// The configured rate, in events per second.
    pub rate: f64,
}

/// The result of one flow-analysis run.
#[derive(Clone, Debug, Default)]
pub struct FlowAnalysisResult {
    /// Estimated arrival rate per `"componentPath.method"` key.
    pub component_rates: HashMap<String, f64>,
}

/// Evaluates named flow-analysis strategies over a system and its generators.
pub trait FlowStrategyRegistry: Send + Sync {
    /// Runs the named strategy against `system` under the given generator
    /// loads, producing an estimated per-method arrival-rate map.
    fn evaluate(
        &self,
        name: &str,
        system: &dyn SystemInstance,
        generators: &[GeneratorLoad],
    ) -> Result<FlowAnalysisResult, FlowStrategyError>;
}
