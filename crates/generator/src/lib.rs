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

//! Virtual-time driven traffic generators: per-target schedulers that
//! invoke the simulator's evaluator at a configured rate, switching between
//! a simple per-tick strategy and a batched strategy depending on rate
//! magnitude, with graceful start/stop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sim_core::{ComponentInstance, EvalError, EvalOutcome, MethodCall, MethodDecl};
use task::labels::TaskLabels;
use task::TaskManager;
use validator::Validate;

/// Above this rate (requests per second), a generator switches from the
/// simple per-tick strategy to the batched strategy.
pub const SIMPLE_MODE_MAX_RATE: f64 = 100.0;

/// Tick period of the batched strategy.
pub const BATCH_TICK_PERIOD: Duration = Duration::from_millis(10);

/// Errors raised while validating or registering a generator.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The generator's configuration failed validation.
    #[error("invalid generator configuration (id: {id}, reason: {message})")]
    InvalidConfig {
        /// The generator's configured id.
        id: String,
        /// A human-readable description of the validation failure.
        message: String,
    },
}

/// Wire/config shape for registering a generator, validated before a
/// [`Generator`] is constructed from it.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct GeneratorConfig {
    /// Unique identifier for this generator, within its canvas.
    #[validate(length(min = 1))]
    pub id: String,
    /// Human-readable name.
    #[validate(length(min = 1))]
    pub name: String,
    /// Dotted path of the target component.
    #[validate(length(min = 1))]
    pub component: String,
    /// Name of the target method.
    #[validate(length(min = 1))]
    pub method: String,
    /// Requests per second; fractional rates are allowed.
    #[validate(range(min = 0.0001))]
    pub rate: f64,
    /// Optional cap on virtual simulated time, in seconds, after which the
    /// generator stops itself.
    #[serde(default)]
    pub duration: Option<f64>,
    /// Whether the generator starts enabled when added.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Executes one method call against the active system, driving the
/// canvas's metric tracer. Implemented by the canvas, which owns the
/// evaluator factory, the active system's environment, and the tracer;
/// generators hold only a handle to it.
pub trait Execute: Send + Sync {
    /// Evaluates `call` at virtual time `virtual_time`.
    fn execute(&self, call: &MethodCall, virtual_time: f64) -> Result<EvalOutcome, EvalError>;
}

/// Cumulative execution counters for one generator.
#[derive(Clone, Copy, Debug, Default)]
pub struct GeneratorStats {
    /// Number of method calls the generator has invoked.
    pub executions: u64,
    /// Number of those calls that returned an evaluator error.
    pub errors: u64,
}

struct Counters {
    executions: AtomicU64,
    errors: AtomicU64,
}

/// A traffic source that invokes a specific method at a configured rate.
///
/// Resolves its target once, at construction time, then runs a single
/// background worker per [`Generator::start`] call. `start`/`stop` are
/// idempotent with respect to the generator's running state.
pub struct Generator {
    id: String,
    canvas_id: String,
    name: Mutex<String>,
    component_path: String,
    component: ComponentInstance,
    method: MethodDecl,
    rate: Mutex<f64>,
    duration: Mutex<Option<Duration>>,
    executor: Arc<dyn Execute>,
    next_virtual_time: Arc<Mutex<f64>>,
    stopped: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    stop_notify: Arc<tokio::sync::Notify>,
    stop_confirmed: Arc<tokio::sync::Notify>,
    counters: Arc<Counters>,
    created_at: f64,
    updated_at: Mutex<f64>,
}

impl Generator {
    /// Validates `config` against `component`/`method` (already resolved by
    /// the caller) and builds a generator ready to [`Generator::start`].
    pub fn new(
        canvas_id: String,
        config: GeneratorConfig,
        component: ComponentInstance,
        method: MethodDecl,
        executor: Arc<dyn Execute>,
        now: f64,
    ) -> Result<Self, Error> {
        config.validate().map_err(|err| Error::InvalidConfig {
            id: config.id.clone(),
            message: err.to_string(),
        })?;
        Ok(Self {
            id: config.id,
            canvas_id,
            name: Mutex::new(config.name),
            component_path: config.component,
            component,
            method,
            rate: Mutex::new(config.rate),
            duration: Mutex::new(config.duration.map(Duration::from_secs_f64)),
            executor,
            next_virtual_time: Arc::new(Mutex::new(0.0)),
            stopped: Arc::new(AtomicBool::new(true)),
            running: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(tokio::sync::Notify::new()),
            stop_confirmed: Arc::new(tokio::sync::Notify::new()),
            counters: Arc::new(Counters {
                executions: AtomicU64::new(0),
                errors: AtomicU64::new(0),
            }),
            created_at: now,
            updated_at: Mutex::new(now),
        })
    }

    /// This generator's identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The canvas this generator belongs to.
    pub fn canvas_id(&self) -> &str {
        &self.canvas_id
    }

    /// The generator's human-readable name.
    pub fn name(&self) -> String {
        self.name.lock().expect("name lock poisoned").clone()
    }

    /// The dotted path of the generator's target component.
    pub fn component_path(&self) -> &str {
        &self.component_path
    }

    /// The name of the generator's target method.
    pub fn method_name(&self) -> &str {
        &self.method.name
    }

    /// The generator's configured rate, in events per second.
    pub fn rate(&self) -> f64 {
        *self.rate.lock().expect("rate lock poisoned")
    }

    /// The generator's configured duration cap, in seconds, if any.
    pub fn duration(&self) -> Option<f64> {
        self.duration.lock().expect("duration lock poisoned").map(|d| d.as_secs_f64())
    }

    /// Whether this generator's worker is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Cumulative execution counters.
    pub fn stats(&self) -> GeneratorStats {
        GeneratorStats {
            executions: self.counters.executions.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Wall-clock timestamp this generator was created at.
    pub fn created_at(&self) -> f64 {
        self.created_at
    }

    /// Wall-clock timestamp this generator was last updated at.
    pub fn updated_at(&self) -> f64 {
        *self.updated_at.lock().expect("updated_at lock poisoned")
    }

    /// Renames the generator and/or changes its rate/duration. Forbidden to
    /// change the target component or method (per spec, `UpdateGenerator`
    /// only mutates rate/name). Restarts the worker only if it was running.
    pub fn update(&self, name: Option<String>, rate: Option<f64>, duration: Option<Option<f64>>, now: f64) {
        if let Some(name) = name {
            *self.name.lock().expect("name lock poisoned") = name;
        }
        if let Some(rate) = rate {
            *self.rate.lock().expect("rate lock poisoned") = rate;
        }
        if let Some(duration) = duration {
            *self.duration.lock().expect("duration lock poisoned") = duration.map(Duration::from_secs_f64);
        }
        *self.updated_at.lock().expect("updated_at lock poisoned") = now;
    }

    /// Starts the background worker, if not already running. Idempotent.
    /// Resets the generator's virtual clock to zero, per spec.md §4.D
    /// ("after stop, its virtual clock is discarded").
    pub fn start(self: &Arc<Self>, task_manager: &mut TaskManager) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stopped.store(false, Ordering::Release);
        *self.next_virtual_time.lock().expect("virtual time lock poisoned") = 0.0;

        let this = self.clone();
        let process_labels = task_manager.process_labels();
        let task_labels = TaskLabels::new("generator", &this.id, &this.canvas_id);
        let task_labels_clone = task_labels.clone();
        let join_handle = tokio::task::spawn(async move {
            run(this.clone()).await;
            this.running.store(false, Ordering::Release);
            this.stop_confirmed.notify_waiters();
            tracing::info!(
                task_id = %task_labels_clone.task_id,
                task_cat = %task_labels_clone.task_cat,
                task_source = %task_labels_clone.task_source,
                process_id = %process_labels.process_id,
                "generator worker has stopped"
            );
            TaskManager::no_task_cleaner(process_labels, task_labels_clone)
        });
        task_manager.register(join_handle, &task_labels);
    }

    /// Signals the worker to stop and waits until it confirms. Idempotent;
    /// safe to call on a generator that was never started.
    pub async fn stop(&self) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        self.stopped.store(true, Ordering::Release);
        self.stop_notify.notify_waiters();
        while self.running.load(Ordering::Acquire) {
            self.stop_confirmed.notified().await;
        }
    }

    fn get_next_virtual_time(&self) -> f64 {
        let rate = self.rate();
        let mut guard = self.next_virtual_time.lock().expect("virtual time lock poisoned");
        let current = *guard;
        *guard += 1.0 / rate;
        current
    }

    fn call(&self) -> MethodCall {
        MethodCall {
            component: self.component.clone(),
            method: self.method.clone(),
        }
    }

    fn record_outcome(&self, result: Result<EvalOutcome, EvalError>) {
        match result {
            Ok(_) => {
                let _ = self.counters.executions.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                let _ = self.counters.executions.fetch_add(1, Ordering::Relaxed);
                let _ = self.counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(generator_id = %self.id, %error, "generator execution failed");
            }
        }
    }
}

async fn run(generator: Arc<Generator>) {
    if generator.rate() <= SIMPLE_MODE_MAX_RATE {
        run_simple(generator).await;
    } else {
        run_batched(generator).await;
    }
}

async fn run_simple(generator: Arc<Generator>) {
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / generator.rate()));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = generator.stop_notify.notified() => break,
            _ = ticker.tick() => {
                let virtual_time = generator.get_next_virtual_time();
                if let Some(cap) = generator.duration() {
                    if virtual_time >= cap {
                        break;
                    }
                }
                let call = generator.call();
                let outcome = generator.executor.execute(&call, virtual_time);
                generator.record_outcome(outcome);
            }
        }
        if generator.stopped.load(Ordering::Acquire) {
            break;
        }
    }
}

async fn run_batched(generator: Arc<Generator>) {
    let permits = 2 * num_cpus::get();
    let semaphore = Arc::new(tokio::sync::Semaphore::new(permits));
    let mut accumulator = 0.0_f64;
    let mut ticker = tokio::time::interval(BATCH_TICK_PERIOD);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    'outer: loop {
        tokio::select! {
            _ = generator.stop_notify.notified() => break 'outer,
            _ = ticker.tick() => {
                let rate = generator.rate();
                accumulator += rate * BATCH_TICK_PERIOD.as_secs_f64();
                let batch_size = accumulator.floor() as usize;
                accumulator -= batch_size as f64;

                let mut timestamps = Vec::with_capacity(batch_size);
                for _ in 0..batch_size {
                    timestamps.push(generator.get_next_virtual_time());
                }

                let cap = generator.duration();
                for virtual_time in timestamps {
                    if let Some(cap) = cap {
                        if virtual_time >= cap {
                            break 'outer;
                        }
                    }
                    let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
                    let generator = generator.clone();
                    let _ = tokio::task::spawn(async move {
                        let _permit = permit;
                        let call = generator.call();
                        let outcome = generator.executor.execute(&call, virtual_time);
                        generator.record_outcome(outcome);
                    });
                }
            }
        }
        if generator.stopped.load(Ordering::Acquire) {
            break;
        }
    }

    // Wait for every in-flight batched execution to finish before the
    // worker reports itself stopped.
    let _ = semaphore.acquire_many(permits as u32).await;
}

#[cfg(test)]
mod test {
    use super::*;
    use std::any::Any;
    use std::sync::atomic::AtomicUsize;

    fn component() -> ComponentInstance {
        ComponentInstance::new("svc.handler", Arc::new(()) as Arc<dyn Any + Send + Sync>)
    }

    struct CountingExecutor(Arc<AtomicUsize>);
    impl Execute for CountingExecutor {
        fn execute(&self, _call: &MethodCall, _virtual_time: f64) -> Result<EvalOutcome, EvalError> {
            let _ = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(EvalOutcome {
                return_value: None,
                duration: 0.0,
            })
        }
    }

    fn config(rate: f64) -> GeneratorConfig {
        GeneratorConfig {
            id: "g1".into(),
            name: "g1".into(),
            component: "svc.handler".into(),
            method: "Handle".into(),
            rate,
            duration: None,
            enabled: true,
        }
    }

    #[test]
    fn rejects_non_positive_rate() {
        let mut cfg = config(10.0);
        cfg.rate = 0.0;
        let executions = Arc::new(AtomicUsize::new(0));
        let err = Generator::new(
            "canvas".into(),
            cfg,
            component(),
            MethodDecl::new("Handle"),
            Arc::new(CountingExecutor(executions)),
            0.0,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn virtual_clock_advances_and_worker_stops_cleanly() {
        let executions = Arc::new(AtomicUsize::new(0));
        let generator = Arc::new(
            Generator::new(
                "canvas".into(),
                config(1000.0),
                component(),
                MethodDecl::new("Handle"),
                Arc::new(CountingExecutor(executions)),
                0.0,
            )
            .unwrap(),
        );
        let mut task_manager = TaskManager::new();
        generator.start(&mut task_manager);
        tokio::time::sleep(Duration::from_millis(50)).await;
        generator.stop().await;
        assert!(generator.stats().executions > 0);
        assert!(!generator.is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_and_stop_are_idempotent() {
        let executions = Arc::new(AtomicUsize::new(0));
        let generator = Arc::new(
            Generator::new(
                "canvas".into(),
                config(10.0),
                component(),
                MethodDecl::new("Handle"),
                Arc::new(CountingExecutor(executions)),
                0.0,
            )
            .unwrap(),
        );
        let mut task_manager = TaskManager::new();
        generator.start(&mut task_manager);
        generator.start(&mut task_manager);
        assert!(generator.is_running());
        generator.stop().await;
        generator.stop().await;
        assert!(!generator.is_running());
    }
}
