//! Waste Classifier Service - Main Entry Point
//!
//! Fetches the model artifact, loads it, and serves predictions over HTTP.
//! Any failure before the listener is bound aborts startup.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use waste_classifier::{
    artifact,
    config::{AppConfig, LogFormat},
    gcp::GcpContext,
    metrics::{MetricsReporter, ServiceMetrics},
    models::{InferenceEngine, ModelLoader},
    preprocess::ImagePreprocessor,
    server::{self, AppState},
    store::{self, PredictionRecorder},
};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        format!("waste_classifier={}", config.logging.level).parse()?,
    );

    match config.logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!(error = %e, "Failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;
    init_logging(&config)?;

    info!("Starting Waste Classifier Service");
    info!(
        artifact = ?config.artifact.source,
        store = ?config.store.backend,
        "Configuration loaded successfully"
    );

    let http = reqwest::Client::builder()
        .user_agent(concat!("waste-classifier/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    // Credentials are only needed for the Google Cloud backends
    let gcp = if config.needs_gcp() {
        Some(Arc::new(GcpContext::from_config(&config.gcp, http.clone())?))
    } else {
        None
    };

    // Fetch and load the model
    let source = artifact::source_from_config(&config.artifact, http.clone(), gcp.clone())?;
    let model_path = artifact::fetch(source.as_ref(), &config.artifact.local_path).await?;

    let loader = ModelLoader::with_threads(config.model.onnx_threads)?;
    let model = loader.load_model(&model_path, &config.artifact.object)?;
    let engine = InferenceEngine::new(Arc::new(model))?;
    let preprocessor =
        ImagePreprocessor::new(config.model.input_size, config.model.resize_filter.into());
    info!(
        model = %engine.model_name(),
        input_shape = ?preprocessor.output_shape(),
        "Model ready"
    );

    let store = store::from_config(&config.store, http, gcp)?;
    info!(
        backend = store.backend(),
        collection = %config.store.collection,
        "Prediction store ready"
    );

    let metrics = Arc::new(ServiceMetrics::new());
    if config.metrics.report_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.metrics.report_interval_secs);
        tokio::spawn(reporter.start());
    }

    let state = Arc::new(AppState {
        preprocessor,
        engine,
        recorder: PredictionRecorder::new(store),
        metrics: metrics.clone(),
        legacy_status_codes: config.server.legacy_status_codes,
        default_history_limit: (config.history.default_limit > 0)
            .then_some(config.history.default_limit),
    });

    let app = server::router(state, config.server.body_limit_bytes);

    let address = config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("Listening on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Print final summary
    info!("Service shutting down...");
    metrics.print_summary();

    Ok(())
}
