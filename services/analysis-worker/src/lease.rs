use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use sheetscan_storage::{QueueMessage, WorkQueue};

use crate::error::AnalysisError;

/// Extend once this share of the current lease has been used.
const EXTEND_AT: f64 = 0.9;

/// A claimed queue message and how long the claim is good for.
///
/// Extending hands back a new receipt, so the lease keeps the latest message
/// handle for the final delete.
#[derive(Debug)]
pub struct Lease {
    message: QueueMessage,
    visibility: Duration,
    claimed_at: Instant,
    expires_after: Duration,
}

impl Lease {
    pub fn start(message: QueueMessage, visibility: Duration) -> Self {
        Self {
            message,
            visibility,
            claimed_at: Instant::now(),
            expires_after: visibility,
        }
    }

    pub fn message(&self) -> &QueueMessage {
        &self.message
    }

    pub fn into_message(self) -> QueueMessage {
        self.message
    }

    pub fn elapsed(&self) -> Duration {
        self.claimed_at.elapsed()
    }

    /// Time since the claim at which the message becomes visible again.
    pub fn expires_after(&self) -> Duration {
        self.expires_after
    }

    pub fn should_extend(&self) -> bool {
        self.elapsed().as_secs_f64() > EXTEND_AT * self.expires_after.as_secs_f64()
    }

    /// Pushes the visibility out when the lease is nearly used up.
    ///
    /// A refused extension means the message may already be visible to other
    /// workers, so the run must stop without touching the document's state.
    pub async fn check_and_extend(&mut self, queue: &dyn WorkQueue) -> Result<bool, AnalysisError> {
        if !self.should_extend() {
            return Ok(false);
        }

        let elapsed = self.elapsed();
        let extension = elapsed + self.visibility;
        match queue.extend(&self.message, extension).await {
            Ok(message) => {
                self.message = message;
                self.expires_after = elapsed + extension;
                info!(
                    message_id = %self.message.id,
                    elapsed_secs = elapsed.as_secs(),
                    expires_after_secs = self.expires_after.as_secs(),
                    "Extended message visibility"
                );
                Ok(true)
            }
            Err(error) => {
                warn!(message_id = %self.message.id, error = %error, "Could not extend message visibility");
                Err(AnalysisError::MaxProcessingTimeExceeded { elapsed })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetscan_storage::MemoryQueue;

    #[tokio::test(start_paused = true)]
    async fn test_extends_only_near_expiry() {
        let queue = MemoryQueue::new();
        queue.enqueue("doc").await.unwrap();
        let visibility = Duration::from_secs(100);
        let message = queue.receive(visibility).await.unwrap().unwrap();
        let first_receipt = message.receipt.clone();
        let mut lease = Lease::start(message, visibility);

        tokio::time::advance(Duration::from_secs(80)).await;
        assert!(!lease.check_and_extend(&queue).await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(lease.check_and_extend(&queue).await.unwrap());
        assert_ne!(lease.message().receipt, first_receipt);
        // 91s in, extended by 91 + 100 from now.
        assert_eq!(lease.expires_after(), Duration::from_secs(91 + 191));

        // Still hidden well past the original visibility.
        tokio::time::advance(Duration::from_secs(150)).await;
        assert!(queue.receive(visibility).await.unwrap().is_none());

        queue.delete(lease.message()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_extension_stops_the_run() {
        let queue = MemoryQueue::new();
        queue.enqueue("doc").await.unwrap();
        let visibility = Duration::from_secs(10);
        let message = queue.receive(visibility).await.unwrap().unwrap();
        let mut lease = Lease::start(message, visibility);

        // Another worker claims the message after it reappears.
        tokio::time::advance(Duration::from_secs(11)).await;
        let _stolen = queue.receive(visibility).await.unwrap().unwrap();

        let error = lease.check_and_extend(&queue).await.unwrap_err();
        assert!(error.keeps_claim());
    }
}
