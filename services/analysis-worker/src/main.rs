use anyhow::Result;
use axum::serve;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use sheetscan_storage::{
    create_postgres_pool, create_redis_pool, migrations::run_postgres_migrations, BlobStore,
    CheckpointStore, GraphStore, KeywordStore, MemoryBlobStore, MemoryGraphStore, MemoryQueue,
    PgGraphStore, RedisBlobStore, RedisPool, RedisQueue, WorkQueue,
};
use sheetscan_utils::{init_logging, AppConfig, BlobBackend, GraphBackend};

mod backoff;
mod converter;
mod document;
mod error;
mod keyword_match;
mod lease;
mod metrics;
mod ocr_client;
mod page;
mod pipeline;
mod renderer;
mod resolution;
mod routes;
mod source;
mod worker;

use converter::LibreOfficeConverter;
use document::DocumentOpener;
use metrics::Metrics;
use ocr_client::VisionOcrClient;
use page::PageProcessor;
use pipeline::DocumentPipeline;
use renderer::PdftoppmRenderer;
use resolution::ResolutionService;
use routes::{create_app, AppState};
use source::HttpDocumentSource;
use worker::WorkerPool;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load().unwrap_or_else(|_| {
        eprintln!("Failed to load configuration, using defaults");
        AppConfig::default()
    });

    // Initialize logging
    init_logging(&config.logging)?;
    config.check()?;
    info!("Starting Sheetscan analysis worker");

    let metrics = Arc::new(Metrics::new(&config.monitoring.prometheus_namespace)?);
    if !config.monitoring.metrics_enabled {
        warn!("Metrics collection is disabled; /metrics will report an empty registry");
    }

    // Storage backends
    let needs_redis = config.queue.backend == BlobBackend::Redis
        || config.checkpoint.backend == BlobBackend::Redis;
    let redis = if needs_redis {
        Some(create_redis_pool(&config.database.redis_url).await?)
    } else {
        None
    };

    let blobs = blob_store(&config, redis.clone());
    let queue = work_queue(&config, redis);
    let graph = graph_store(&config).await?;
    info!(
        queue = ?config.queue.backend,
        checkpoints = ?config.checkpoint.backend,
        graph = ?config.graph.backend,
        "Storage backends ready"
    );

    let checkpoints = Arc::new(CheckpointStore::new(blobs.clone(), config.checkpoint.results_root.clone()));
    let keywords = Arc::new(KeywordStore::new(blobs, &config.checkpoint.results_root));

    // Document pipeline
    let conversion_timeout = Duration::from_secs(config.documents.conversion_timeout_seconds);
    let opener = Arc::new(DocumentOpener::new(
        Arc::new(HttpDocumentSource::new(
            &config.documents,
            Duration::from_secs(config.ocr.timeout_seconds),
        )?),
        Arc::new(LibreOfficeConverter::new(conversion_timeout)),
        &config.documents,
    ));
    let pages = Arc::new(PageProcessor::new(
        checkpoints.clone(),
        Arc::new(PdftoppmRenderer::new(config.documents.render_dpi, conversion_timeout)),
        Arc::new(VisionOcrClient::new(&config.ocr)?),
        metrics.clone(),
        Duration::from_secs(config.ocr.rate_limit_wait_seconds),
        Duration::from_secs(config.queue.visibility_seconds),
    ));
    let pipeline = Arc::new(DocumentPipeline::new(
        checkpoints,
        keywords.clone(),
        opener,
        pages,
        queue.clone(),
        metrics.clone(),
    ));
    let resolution = Arc::new(ResolutionService::new(graph, metrics.clone()));

    // Queue workers
    let (stop, shutdown) = watch::channel(false);
    let pool = Arc::new(WorkerPool::new(
        queue,
        pipeline.clone(),
        resolution,
        metrics.clone(),
        &config.queue,
    ));
    let workers = pool.spawn(shutdown);

    // Build application router
    let app = create_app(
        AppState {
            pipeline,
            keywords,
            metrics,
        },
        &config.server,
    );

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = TcpListener::bind(&addr).await?;
    info!("Analysis worker listening on {}", addr);

    serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(error = %error, "Could not listen for shutdown signal");
            }
            info!("Shutdown signal received");
        })
        .await?;

    // Workers finish the message in hand before exiting.
    let _ = stop.send(true);
    for handle in workers {
        if let Err(error) = handle.await {
            warn!(error = %error, "Worker task ended abnormally");
        }
    }

    info!("Analysis worker stopped");
    Ok(())
}

fn blob_store(config: &AppConfig, redis: Option<RedisPool>) -> Arc<dyn BlobStore> {
    match (config.checkpoint.backend, redis) {
        (BlobBackend::Redis, Some(connection)) => Arc::new(RedisBlobStore::new(connection, "sheetscan:blob")),
        _ => Arc::new(MemoryBlobStore::new()),
    }
}

fn work_queue(config: &AppConfig, redis: Option<RedisPool>) -> Arc<dyn WorkQueue> {
    match (config.queue.backend, redis) {
        (BlobBackend::Redis, Some(connection)) => Arc::new(RedisQueue::new(connection, &config.queue.queue_name)),
        _ => Arc::new(MemoryQueue::new()),
    }
}

async fn graph_store(config: &AppConfig) -> Result<Arc<dyn GraphStore>> {
    match config.graph.backend {
        GraphBackend::Memory => Ok(Arc::new(MemoryGraphStore::new())),
        GraphBackend::Postgres => {
            let pool = create_postgres_pool(
                &config.database.postgres_url,
                config.database.max_connections,
                Duration::from_secs(config.database.connection_timeout_seconds),
            )
            .await?;
            run_postgres_migrations(&pool).await?;
            Ok(Arc::new(PgGraphStore::new(pool)))
        }
    }
}
