use std::sync::Arc;

use tracing::{info, warn};

use linkrank_api::{router, telemetry, AnalyticsTarget, AppState, ServerConfig, StoreBackend};
use linkrank_core::EmbeddingBackend;
use linkrank_db::{AnalyticsDatabase, Database, PoolConfig, Stores};
use linkrank_inference::OllamaEmbedder;
use linkrank_jobs::{
    DurableOrchestrator, InlineOrchestrator, LinkSuggestionService, Orchestrator, Pipeline,
    PipelineConfig, WorkerBuilder, WorkerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _file_guard = telemetry::init_tracing();

    let config = ServerConfig::from_env()?;
    let stores = build_stores(&config).await?;

    let embedder = OllamaEmbedder::from_env()?;
    info!(
        model = EmbeddingBackend::model_name(&embedder),
        dimension = embedder.dimension(),
        base_url = embedder.base_url(),
        "Embedding backend initialized"
    );

    let pipeline_config = PipelineConfig::from_env();
    let retry = pipeline_config.retry;
    let pipeline = Arc::new(Pipeline::new(
        stores.clone(),
        Arc::new(embedder),
        pipeline_config,
    ));

    // The orchestrator is chosen once; requests never probe for it.
    let orchestrator: Arc<dyn Orchestrator> = if config.workflow_enabled {
        Arc::new(DurableOrchestrator::new(stores.runs.clone()).with_max_attempts(retry.max_attempts))
    } else {
        Arc::new(InlineOrchestrator)
    };
    info!(orchestrator = orchestrator.name(), "Orchestrator selected");

    let worker_config = WorkerConfig::from_env().with_task_queue(config.task_queue.clone());
    let worker_handle = if config.workflow_enabled && worker_config.enabled {
        info!("Starting pipeline worker...");
        let handle = WorkerBuilder::new(stores.runs.clone())
            .with_config(worker_config)
            .with_retry_policy(retry)
            .with_handlers(pipeline.handlers())
            .build()
            .await
            .start();
        Some(handle)
    } else {
        info!("Pipeline worker disabled");
        None
    };

    let service = LinkSuggestionService::new(pipeline, orchestrator)
        .with_task_queue(config.task_queue.clone());
    let app = router(AppState::new(service));

    let addr = config.bind_addr()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = worker_handle {
        if let Err(e) = handle.shutdown().await {
            warn!(error = %e, "Pipeline worker did not acknowledge shutdown");
        }
    }
    info!("Server stopped");
    Ok(())
}

async fn build_stores(config: &ServerConfig) -> anyhow::Result<Stores> {
    if config.store_backend == StoreBackend::Memory {
        warn!("Using in-memory stores; all state is lost on restart");
        return Ok(match config.analytics {
            AnalyticsTarget::Disabled => Stores::memory().without_analytics(),
            _ => Stores::memory(),
        });
    }

    info!("Connecting to database...");
    let db = Database::connect_with_config(&config.database_url, PoolConfig::from_env()).await?;
    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database connected");

    let analytics = match &config.analytics {
        AnalyticsTarget::Shared => Some(AnalyticsDatabase::new(db.pool.clone())),
        AnalyticsTarget::Url(url) => {
            info!("Connecting to analytics database...");
            let analytics = AnalyticsDatabase::connect_with_config(url, PoolConfig::from_env()).await?;
            analytics.migrate().await?;
            Some(analytics)
        }
        AnalyticsTarget::Disabled => {
            warn!("Analytics store disabled; suggestions will be empty");
            None
        }
    };

    Ok(Stores::postgres(&db, analytics.as_ref()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
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
