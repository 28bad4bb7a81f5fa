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

//! Session engine for an interactive system-design simulator.
//!
//! A **canvas** is an isolated simulation session: it owns at most one active
//! system instance, a set of traffic **generators** driving that system at
//! configured rates, a **metric tracer** fed by every method invocation the
//! evaluator makes, and the **metric specs** registered against that tracer,
//! each of which pre-aggregates matching events into a **metric store**
//! supporting range queries, windowed aggregation, and live subscriptions.
//!
//! This crate does not parse, load, or evaluate user-modeled systems: the SDL
//! loader, the `SimpleEval` evaluator, and the flow-analysis strategies are
//! external collaborators, consumed here only through the traits in
//! `sim_core`.

pub use canvas;
pub use context;
pub use generator;
pub use metricspec;
pub use service;
pub use sim_core;
pub use store;
pub use task;
pub use tracer;
