//! The SDL loader contract: parses a file on disk into a [`FileInstance`]
//! from which concrete [`SystemInstance`]s can be instantiated.

use context::param::ParamType;
use context::Value;

use crate::component::{ComponentInstance, Env};

/// Errors raised while loading or instantiating a system definition.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum LoaderError {
    /// The file could not be read or failed to parse.
    #[error("failed to load {path}: {message}")]
    Parse {
        /// The path that was requested.
        path: String,
        /// A human-readable description of the parse failure.
        message: String,
    },

    /// The named system is not declared in the loaded file.
    #[error("system not found: {name}")]
    UnknownSystem {
        /// The system name that was requested.
        name: String,
    },

    /// A component path did not resolve to an instance in the system.
    #[error("component not found: {path}")]
    UnknownComponent {
        /// The dotted path that failed to resolve.
        path: String,
    },
}

/// A successfully loaded and validated system definition file.
pub trait FileInstance: Send + Sync {
    /// Instantiates the named system declared in this file.
    fn new_system(&self, name: &str) -> Result<Box<dyn SystemInstance>, LoaderError>;

    /// Lists the system names declared in this file.
    fn system_names(&self) -> Vec<String>;
}

/// A concrete instantiation of a user-modeled system: a graph of component
/// instances with resolved parameters.
pub trait SystemInstance: Send + Sync {
    /// The name this instance was created under.
    fn name(&self) -> &str;

    /// Resolves a dotted path (`inst.sub.field`) to a component instance.
    fn resolve(&self, path: &str) -> Result<ComponentInstance, LoaderError>;

    /// Produces a fresh component environment for one generator execution.
    fn env(&self) -> Env;

    /// All component instance paths reachable in this system, for the
    /// system-diagram projection.
    fn component_paths(&self) -> Vec<String>;

    /// The call-graph edges reachable from `(component, method)`, one hop
    /// deep: the components/methods this method's body may invoke. Used by
    /// the system-diagram projection and by [`crate::PathExplorer`]
    /// implementations built on top of this trait. Default: no known edges
    /// (a loader that cannot introspect its call graph need not implement
    /// this).
    fn neighbors(&self, component: &str, method: &str) -> Vec<(String, String)> {
        let _ = (component, method);
        Vec::new()
    }

    /// Applies a `"componentPath.method" -> rate` map to the system's
    /// component capacity models (spec.md glossary, "Flow scope / rate
    /// map"). Default: no-op, for loaders whose components have no
    /// rate-sensitive capacity model.
    fn apply_flow_rates(&self, rates: &std::collections::HashMap<String, f64>) {
        let _ = rates;
    }

    /// The declared type of the parameter at `path`, used to coerce a
    /// literal value before [`SystemInstance::set_param`] (spec.md §9,
    /// "Dynamic values at parameter boundaries").
    fn param_type(&self, path: &str) -> Result<ParamType, LoaderError>;

    /// Applies an already-coerced value to the parameter at `path`.
    fn set_param(&self, path: &str, value: Value) -> Result<(), LoaderError>;

    /// Reads back the current value of the parameter at `path`.
    fn get_param(&self, path: &str) -> Result<Value, LoaderError>;
}

/// Parses and validates system definition files from disk.
pub trait Loader: Send + Sync {
    /// Loads and validates the file at `path`.
    fn load_file(&self, path: &str) -> Result<Box<dyn FileInstance>, LoaderError>;
}
