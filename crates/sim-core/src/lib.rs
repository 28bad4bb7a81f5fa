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

//! Traits and data types describing the external collaborators of the
//! session engine: the SDL loader, the `SimpleEval`-style evaluator, the
//! flow-analysis strategy registry, the path-traversal engine, and the
//! tracer contract the evaluator drives on every method call.
//!
//! This crate ships no implementation of any of these — only the contracts.
//! A real SDL front end, evaluator, flow-analysis package, and path
//! explorer are expected to implement them; `testkit` provides toy
//! implementations for this workspace's own tests.

mod anchor;
mod component;
mod evaluator;
mod flow;
mod loader;
mod path;
mod trace;
mod tracer;

pub use anchor::TimeAnchor;
pub use component::{ComponentInstance, Env, MethodDecl};
pub use evaluator::{EvalError, EvalOutcome, Evaluator, EvaluatorFactory, MethodCall};
pub use flow::{FlowAnalysisResult, FlowStrategyError, FlowStrategyRegistry, GeneratorLoad};
pub use loader::{FileInstance, Loader, LoaderError, SystemInstance};
pub use path::{AllPathsTraceData, PathExplorer, PathExplorerError, PathStep, TracePath};
pub use trace::{TraceEvent, TraceEventKind};
pub use tracer::Tracer;
