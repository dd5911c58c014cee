//! Exponential backoff with jitter for connect and reconnect paths.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use agentfabric_core::{FabricError, Result};

/// Cap applied to the computed delay regardless of attempt count.
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Exponential backoff state: `base * 2^attempt` plus up to 25% jitter.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self { base, attempt: 0 }
    }

    /// Delay before the next attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.base.saturating_mul(1u32 << self.attempt.min(16));
        let capped = exp.min(MAX_DELAY);
        self.attempt = self.attempt.saturating_add(1);

        let jitter_budget = capped.as_millis() as u64 / 4;
        let jitter = if jitter_budget > 0 {
            rand::rng().random_range(0..=jitter_budget)
        } else {
            0
        };
        capped + Duration::from_millis(jitter)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Run `op` until it succeeds or `max_retries` additional attempts have
/// failed, sleeping the backoff delay between attempts.
pub async fn retry<T, F, Fut>(
    max_retries: u32,
    base: Duration,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = Backoff::new(base);
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if backoff.attempt() >= max_retries => {
                return Err(FabricError::connect(format!(
                    "{operation} failed after {} attempts: {err}",
                    backoff.attempt() + 1
                )));
            }
            Err(err) => {
                let delay = backoff.next_delay();
                warn!(%err, attempt = backoff.attempt(), ?delay, "{operation} failed, retrying");
                tokio::time::sleep(delay).await;
                debug!(attempt = backoff.attempt(), "retrying {operation}");
            }
        }
    }
}
