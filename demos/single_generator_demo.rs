//! Drives one component through a toy fixture system with a single
//! generator, then prints back what the metric store collected.
//!
//! Mirrors the teacher's own example binaries: a minimal engine is
//! assembled in-process (here, a [`CanvasService`] wired to `testkit`
//! fixtures instead of a real SDL file), run briefly, and its output
//! inspected.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::Result;
use context::Value;
use generator::GeneratorConfig;
use mimalloc_rust::GlobalMiMalloc;
use metricspec::{MetricSpecConfig, MetricType};
use service::{CanvasService, DEFAULT_CANVAS_ID};
use store::{AggregateFn, QueryOptions, StoreConfig};
use testkit::{ComponentSpec, MethodSpec, ToyEvaluatorFactory, ToyFile, ToyFlowStrategyRegistry, ToyLoader, ToyPathExplorer, ToySystem};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL_MIMALLOC: GlobalMiMalloc = GlobalMiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    init()?;

    let loader = ToyLoader::new().with_file(
        "fixture.sdl",
        ToyFile::new(vec![ToySystem::new(
            "checkout",
            vec![ComponentSpec::new("svc.checkout").with_method("Handle", MethodSpec::returning(0.008, vec![Value::Bool(true)]))],
        )]),
    );

    let service = CanvasService::new(
        Arc::new(loader),
        Arc::new(ToyEvaluatorFactory),
        Arc::new(ToyFlowStrategyRegistry),
        Arc::new(ToyPathExplorer),
        StoreConfig::default(),
    );

    service.load_file(DEFAULT_CANVAS_ID, "fixture.sdl")?;
    service.use_system(DEFAULT_CANVAS_ID, "checkout").await?;

    service.add_metric_spec(
        DEFAULT_CANVAS_ID,
        MetricSpecConfig {
            id: "latency".to_string(),
            component: "svc.checkout".to_string(),
            methods: vec!["Handle".to_string()],
            metric_type: MetricType::Latency,
            aggregation: AggregateFn::Avg,
            aggregation_window: 0.0,
            result_matcher: None,
        },
    )?;
    service.add_generator(
        DEFAULT_CANVAS_ID,
        GeneratorConfig {
            id: "g1".to_string(),
            name: "checkout traffic".to_string(),
            component: "svc.checkout".to_string(),
            method: "Handle".to_string(),
            rate: 20.0,
            duration: None,
            enabled: true,
        },
    )?;

    info!("generator running, collecting for 1s");
    tokio::time::sleep(Duration::from_secs(1)).await;
    service.stop_all_generators(DEFAULT_CANVAS_ID).await?;

    let points = service.query_metrics(
        DEFAULT_CANVAS_ID,
        "latency",
        &QueryOptions {
            start_time: 0.0,
            end_time: f64::MAX,
            ..QueryOptions::default()
        },
    )?;
    let avg = points.iter().map(|p| p.value).sum::<f64>() / points.len() as f64;
    info!(count = points.len(), avg_latency_s = avg, "collected latency points");

    Ok(())
}

/// Initializes error reporting and logging the way every `beaubourg` example does.
fn init() -> Result<()> {
    color_eyre::install()?;

    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    Ok(())
}
