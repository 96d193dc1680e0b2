use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::error::AnalysisError;

/// Share of the time budget that waiting may consume before giving up.
const BUDGET_SHARE: f64 = 0.8;

/// Exponential backoff with jitter for rate-limited calls.
///
/// The budget is measured from the creation of the backoff, so one is made
/// per call being retried.
#[derive(Debug, Clone)]
pub struct Backoff {
    wait: Duration,
    max_duration: Duration,
    started: Instant,
    retries: u32,
}

impl Backoff {
    pub fn new(initial_wait: Duration, max_duration: Duration) -> Self {
        Self {
            wait: initial_wait,
            max_duration,
            started: Instant::now(),
            retries: 0,
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn current_wait(&self) -> Duration {
        self.wait
    }

    /// Returns the delay to sleep before the next attempt and grows the wait.
    ///
    /// `jitter` is in `[0, 1)`.
    pub fn next_delay(&mut self, jitter: f64) -> Result<Duration, AnalysisError> {
        let elapsed = self.started.elapsed();
        if (elapsed + self.wait).as_secs_f64() >= BUDGET_SHARE * self.max_duration.as_secs_f64() {
            return Err(AnalysisError::MaxProcessingTimeExceeded { elapsed });
        }

        let delay = self.wait;
        let doubled = delay.as_secs_f64() * 2.0;
        let next = doubled * BUDGET_SHARE + jitter.clamp(0.0, 1.0) * doubled * (1.0 - BUDGET_SHARE);
        self.wait = Duration::from_secs_f64(next);
        self.retries += 1;
        Ok(delay)
    }

    pub async fn wait(&mut self) -> Result<(), AnalysisError> {
        let delay = self.next_delay(rand::random::<f64>())?;
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

/// Runs `call` until it stops answering `RateLimited` or the budget runs out.
pub async fn retry_rate_limited<T, F, Fut>(
    initial_wait: Duration,
    max_duration: Duration,
    mut call: F,
) -> Result<(T, u32), AnalysisError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AnalysisError>>,
{
    let mut backoff = Backoff::new(initial_wait, max_duration);
    loop {
        match call().await {
            Ok(value) => return Ok((value, backoff.retries())),
            Err(AnalysisError::RateLimited { service }) => {
                warn!(
                    service = %service,
                    retries = backoff.retries(),
                    wait_ms = backoff.current_wait().as_millis() as u64,
                    "Rate limited, backing off"
                );
                backoff.wait().await?;
            }
            Err(other) => return Err(other),
        }
    }
}
