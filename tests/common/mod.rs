use color_eyre::eyre::Result;
use context::Value;
use service::CanvasService;
use store::StoreConfig;
use testkit::{ComponentSpec, MethodSpec, ToyEvaluatorFactory, ToyFile, ToyFlowStrategyRegistry, ToyLoader, ToyPathExplorer, ToySystem};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initializes logs and traces once per test binary.
pub fn init() -> Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::ERROR).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}

/// Loader registered under `"fixture.sdl"`, with one `"primary"` system and
/// one `"secondary"` system, each exposing `svc.handler.Handle`.
///
/// `Handle` takes `0.01s` and cycles through five boolean return values, four
/// `true` and one `false` — a deterministic 80/20 split, used by the matcher
/// filtering scenario.
pub fn fixture_loader() -> ToyLoader {
    let returns = vec![Value::Bool(true), Value::Bool(true), Value::Bool(true), Value::Bool(true), Value::Bool(false)];
    let primary = ToySystem::new(
        "primary",
        vec![ComponentSpec::new("svc.handler").with_method("Handle", MethodSpec::returning(0.01, returns.clone()))],
    );
    let secondary = ToySystem::new(
        "secondary",
        vec![ComponentSpec::new("svc.handler").with_method("Handle", MethodSpec::returning(0.01, returns))],
    );
    let file = ToyFile::new(vec![primary, secondary]);
    ToyLoader::new().with_file("fixture.sdl", file)
}

/// A service wired to [`fixture_loader`] and a small-capacity ring buffer
/// store, suitable for integration tests that don't need the defaults'
/// 10,000-point retention.
pub fn build_service() -> CanvasService {
    CanvasService::new(
        std::sync::Arc::new(fixture_loader()),
        std::sync::Arc::new(ToyEvaluatorFactory),
        std::sync::Arc::new(ToyFlowStrategyRegistry),
        std::sync::Arc::new(ToyPathExplorer),
        StoreConfig {
            capacity: 5_000,
            ..StoreConfig::default()
        },
    )
}
