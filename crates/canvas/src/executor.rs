//! Bridges a generator's `Execute` contract to the active system's
//! evaluator: builds a fresh component environment per execution and drives
//! a fresh evaluator bound to the canvas's current metric tracer (spec.md
//! §4.D, "Execution function").

use std::sync::{Arc, Mutex};

use generator::Execute;
use sim_core::{EvalError, EvalOutcome, EvaluatorFactory, FileInstance, MethodCall, SystemInstance, TraceEvent, Tracer};
use tracer::MetricTracer;

pub(crate) struct CanvasExecutor {
    file: Arc<dyn FileInstance>,
    system: Arc<dyn SystemInstance>,
    evaluator_factory: Arc<dyn EvaluatorFactory>,
    tracer: Arc<MetricTracer>,
}

impl CanvasExecutor {
    pub(crate) fn new(
        file: Arc<dyn FileInstance>,
        system: Arc<dyn SystemInstance>,
        evaluator_factory: Arc<dyn EvaluatorFactory>,
        tracer: Arc<MetricTracer>,
    ) -> Self {
        Self {
            file,
            system,
            evaluator_factory,
            tracer,
        }
    }
}

impl Execute for CanvasExecutor {
    fn execute(&self, call: &MethodCall, virtual_time: f64) -> Result<EvalOutcome, EvalError> {
        let env = self.system.env();
        let evaluator = self
            .evaluator_factory
            .new_evaluator(self.file.clone(), self.tracer.clone() as Arc<dyn Tracer>);
        evaluator.eval(call, &env, virtual_time)
    }
}

/// A one-shot tracer that collects every `Enter`/`Exit` event it is handed,
/// used by `Canvas::execute_trace` to build a `TraceData` response instead
/// of dispatching to metric specs.
pub(crate) struct CollectingTracer {
    events: Mutex<Vec<TraceEvent>>,
}

impl CollectingTracer {
    pub(crate) fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn into_events(self) -> Vec<TraceEvent> {
        self.events.into_inner().expect("collecting tracer lock poisoned")
    }
}

impl Tracer for CollectingTracer {
    fn enter(&self, event: TraceEvent) {
        self.events.lock().expect("collecting tracer lock poisoned").push(event);
    }

    fn exit(&self, event: TraceEvent) {
        self.events.lock().expect("collecting tracer lock poisoned").push(event);
    }

    fn push_parent_id(&self, _id: i64) {}

    fn pop_parent(&self) {}
}
