//! The service's error taxonomy (spec.md §7): every public operation returns
//! either the typed success response or exactly one typed error carrying a
//! `kind` and a human-readable `message`, so a transport can map it onto a
//! status code without inspecting internal error types.

use sim_core::{EvalError, FlowStrategyError, LoaderError, PathExplorerError};
use store::StoreError;

/// The coarse kind of a service error, independent of which collaborator
/// raised it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Canvas, component, method, metric, or generator absent.
    NotFound,
    /// Duplicate canvas, generator, or metric spec id.
    AlreadyExists,
    /// Empty required field, unknown metric type, malformed matcher,
    /// unsupported value coercion.
    InvalidArgument,
    /// Operation requires an active system, or the canvas is closed.
    FailedPrecondition,
    /// Evaluator, flow-strategy, or store backend error.
    Internal,
}

/// A boxed source error, type-erased so every collaborator's own error type
/// can be chained without `Error` needing a generic parameter per variant.
type Source = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A service-boundary error: every internal error collapses into one of
/// five kinds before crossing the façade, but the original collaborator
/// error is retained via `#[source]` rather than discarded — callers that
/// only care about the kind/message keep working, and `std::error::Error::
/// source()` still reaches the underlying `canvas`/`store`/... error for
/// anyone who wants it (e.g. `tracing::error!(error = %err, source = ?err.
/// source())`).
#[derive(thiserror::Error, Debug)]
#[error("{message}")]
pub struct Error {
    /// The error's coarse kind, for transport-level status mapping.
    pub kind: ErrorKind,
    /// A human-readable description.
    pub message: String,
    /// The originating collaborator error, if this `Error` was built from
    /// one (as opposed to raised directly at the façade boundary).
    #[source]
    source: Option<Source>,
}

impl Error {
    /// Builds an error of the given kind with no underlying source.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Builds an error of the given kind, chaining `source` as the
    /// originating collaborator error.
    fn with_source(kind: ErrorKind, message: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The originating collaborator error, if any.
    pub fn source_error(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|err| err as &(dyn std::error::Error + 'static))
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub(crate) fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }
}

impl From<canvas::Error> for Error {
    fn from(err: canvas::Error) -> Self {
        match err {
            canvas::Error::NoActiveSystem | canvas::Error::NotLoaded | canvas::Error::Closed => {
                let message = err.to_string();
                Error::with_source(ErrorKind::FailedPrecondition, message, err)
            }
            canvas::Error::AlreadyExists { ref id } => {
                let message = format!("already exists: {id}");
                Error::with_source(ErrorKind::AlreadyExists, message, err)
            }
            canvas::Error::NotFound { ref id } => {
                let message = format!("not found: {id}");
                Error::with_source(ErrorKind::NotFound, message, err)
            }
            canvas::Error::InvalidArgument { ref message } => {
                let message = message.clone();
                Error::with_source(ErrorKind::InvalidArgument, message, err)
            }
            canvas::Error::Load(inner) => load_error(inner),
            canvas::Error::Generator(generator::Error::InvalidConfig { ref message, .. }) => {
                let message = message.clone();
                Error::with_source(ErrorKind::InvalidArgument, message, err)
            }
            canvas::Error::MetricSpec(inner) => metric_spec_registry_error(inner),
            canvas::Error::Flow(inner) => flow_error(inner),
            canvas::Error::Eval(inner) => eval_error(inner),
            canvas::Error::PathExplorer(inner) => path_explorer_error(inner),
            // `canvas::Error` is `#[non_exhaustive]`; a variant added upstream
            // (including a future `Generator` payload other than
            // `InvalidConfig`) collapses to `Internal` rather than failing to
            // compile.
            _ => {
                let message = err.to_string();
                Error::with_source(ErrorKind::Internal, message, err)
            }
        }
    }
}

fn load_error(err: LoaderError) -> Error {
    let message = err.to_string();
    match err {
        LoaderError::Parse { .. } => Error::with_source(ErrorKind::InvalidArgument, message, err),
        LoaderError::UnknownSystem { .. } | LoaderError::UnknownComponent { .. } => {
            Error::with_source(ErrorKind::NotFound, message, err)
        }
        // `LoaderError` is `#[non_exhaustive]`.
        _ => Error::with_source(ErrorKind::Internal, message, err),
    }
}

fn metric_spec_registry_error(err: tracer::Error) -> Error {
    match err {
        tracer::Error::AlreadyExists { ref id } => {
            let message = format!("already exists: {id}");
            Error::with_source(ErrorKind::AlreadyExists, message, err)
        }
        tracer::Error::Spec(inner) => metric_spec_error(inner),
        // `tracer::Error` is `#[non_exhaustive]`.
        _ => {
            let message = err.to_string();
            Error::with_source(ErrorKind::Internal, message, err)
        }
    }
}

fn metric_spec_error(err: metricspec::Error) -> Error {
    let message = match &err {
        metricspec::Error::InvalidConfig { message, .. } => message.clone(),
        metricspec::Error::UnknownComponent { component } => format!("unknown component: {component}"),
        // `metricspec::Error` is `#[non_exhaustive]`.
        other => other.to_string(),
    };
    let kind = match &err {
        metricspec::Error::InvalidConfig { .. } => ErrorKind::InvalidArgument,
        metricspec::Error::UnknownComponent { .. } => ErrorKind::NotFound,
        _ => ErrorKind::Internal,
    };
    Error::with_source(kind, message, err)
}

fn flow_error(err: FlowStrategyError) -> Error {
    let message = err.to_string();
    match err {
        FlowStrategyError::UnknownStrategy { .. } => Error::with_source(ErrorKind::InvalidArgument, message, err),
        FlowStrategyError::Failed { .. } => Error::with_source(ErrorKind::Internal, message, err),
        // `FlowStrategyError` is `#[non_exhaustive]`.
        _ => Error::with_source(ErrorKind::Internal, message, err),
    }
}

fn eval_error(err: EvalError) -> Error {
    let message = err.to_string();
    Error::with_source(ErrorKind::Internal, message, err)
}

fn path_explorer_error(err: PathExplorerError) -> Error {
    let message = err.to_string();
    match err {
        PathExplorerError::UnknownEntryPoint { .. } => Error::with_source(ErrorKind::NotFound, message, err),
        PathExplorerError::Failed { .. } => Error::with_source(ErrorKind::Internal, message, err),
        // `PathExplorerError` is `#[non_exhaustive]`.
        _ => Error::with_source(ErrorKind::Internal, message, err),
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        match err {
            StoreError::Closed => Error::with_source(ErrorKind::FailedPrecondition, message, err),
            StoreError::InvalidWindow => Error::with_source(ErrorKind::InvalidArgument, message, err),
            // `StoreError` is `#[non_exhaustive]`.
            _ => Error::with_source(ErrorKind::Internal, message, err),
        }
    }
}
