//! Retry with exponential backoff and jitter. Used for the anchoring
//! hand-off, which may face a briefly unavailable ledger or store.

use std::time::Duration;

use rand::{thread_rng, Rng};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64, // 0.0 - 1.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(1500),
            jitter: 0.25,
        }
    }
}

fn backoff_delay(cfg: &RetryConfig, attempt: usize) -> Duration {
    let exp = cfg.base_delay.mul_f64(2f64.powi(attempt as i32));
    let mut delay = std::cmp::min(exp, cfg.max_delay);
    if cfg.jitter > 0.0 {
        let jitter_ms = (delay.as_millis() as f64 * cfg.jitter) as u64;
        let offset: i64 = thread_rng().gen_range(-(jitter_ms as i64)..(jitter_ms as i64 + 1));
        let base_ms = delay.as_millis() as i64 + offset;
        delay = Duration::from_millis(base_ms.max(0) as u64);
    }
    delay
}

/// Runs `op` until it succeeds or `max_retries` retries are spent, sleeping
/// a jittered exponential backoff between attempts. The attempt index is
/// passed to `op` starting at 0.
pub async fn retry_async<F, Fut, T, E>(cfg: &RetryConfig, mut op: F) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= cfg.max_retries => return Err(e),
            Err(_) => {
                let delay = backoff_delay(cfg, attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after failure");
                tokio::time::sleep(delay).await;
            }
        }
        attempt += 1;
    }
}
