use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use sheetscan_models::QueueEnvelope;
use sheetscan_storage::{QueueMessage, WorkQueue};
use sheetscan_utils::{QueueConfig, SheetscanError, SheetscanResult};

use crate::lease::Lease;
use crate::metrics::Metrics;
use crate::pipeline::DocumentPipeline;
use crate::resolution::ResolutionService;

/// What happens to a message once its handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Delete,
    /// Left alone so it reappears after its visibility timeout.
    Keep,
}

pub struct WorkerPool {
    queue: Arc<dyn WorkQueue>,
    pipeline: Arc<DocumentPipeline>,
    resolution: Arc<ResolutionService>,
    metrics: Arc<Metrics>,
    visibility: Duration,
    poll_interval: Duration,
    worker_count: usize,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        pipeline: Arc<DocumentPipeline>,
        resolution: Arc<ResolutionService>,
        metrics: Arc<Metrics>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            queue,
            pipeline,
            resolution,
            metrics,
            visibility: Duration::from_secs(config.visibility_seconds),
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            worker_count: config.worker_count,
        }
    }

    /// Starts `worker_count` consumers that stop once `shutdown` turns true.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(workers = self.worker_count, "Starting queue workers");
        (0..self.worker_count)
            .map(|worker| {
                let pool = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.run_worker(worker, shutdown).await })
            })
            .collect()
    }

    async fn run_worker(&self, worker: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(worker, "Worker started");
        while !*shutdown.borrow() {
            let idle = match self.poll_once().await {
                Ok(handled) => !handled,
                Err(error) => {
                    error!(worker, error = %error, "Queue receive failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
        debug!(worker, "Worker stopped");
    }

    /// Claims and handles at most one message. Returns whether there was one.
    pub async fn poll_once(&self) -> SheetscanResult<bool> {
        let Some(message) = self.queue.receive(self.visibility).await? else {
            return Ok(false);
        };

        let lease = Lease::start(message, self.visibility);
        let (message, disposition) = self.handle(lease).await;

        if disposition == Disposition::Delete {
            if let Err(error) = self.queue.delete(&message).await {
                warn!(message_id = %message.id, error = %error, "Could not delete handled message");
            }
        }
        Ok(true)
    }

    pub async fn handle(&self, mut lease: Lease) -> (QueueMessage, Disposition) {
        let message_id = lease.message().id.clone();
        let envelope = match QueueEnvelope::decode(&lease.message().body) {
            Ok(envelope) => envelope,
            Err(error) => {
                error!(message_id = %message_id, error = %error, "Dropping undecodable message");
                self.metrics.message_handled("unknown", "rejected");
                return (lease.into_message(), Disposition::Delete);
            }
        };

        let message_type = envelope.message_type();
        let disposition = match envelope {
            QueueEnvelope::KeywordAnalysis(job) => match self.pipeline.execute(&job, &mut lease).await {
                Ok(_) => Disposition::Delete,
                Err(error) if error.keeps_claim() => Disposition::Keep,
                // Already recorded on the document's failure marker.
                Err(_) => Disposition::Delete,
            },
            QueueEnvelope::MaterialIngest(record) => match self.resolution.ingest_material(&record).await {
                Ok(_) => Disposition::Delete,
                Err(error @ SheetscanError::Storage { .. }) => {
                    warn!(message_id = %message_id, error = %error, "Material ingest will be retried");
                    Disposition::Keep
                }
                Err(error) => {
                    error!(
                        message_id = %message_id,
                        material = %record.material_name,
                        error = %error,
                        "Material ingest rejected"
                    );
                    Disposition::Delete
                }
            },
        };

        let outcome = match disposition {
            Disposition::Delete => "deleted",
            Disposition::Keep => "kept",
        };
        self.metrics.message_handled(message_type, outcome);
        (lease.into_message(), disposition)
    }
}
