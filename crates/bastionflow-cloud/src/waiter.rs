//! Bounded readiness polling
//!
//! Providers use this to wait for a resource to reach a state (available,
//! running, terminated, deleted) before the next step runs.

use crate::error::{ProviderError, ProviderResult};
use crate::provider::WaitConfig;
use std::future::Future;
use tokio::time::sleep;

/// Poll `probe` until it reports `true`
///
/// Sleeps between attempts according to `config`. Probe errors end the wait
/// immediately. Running out of attempts yields `ProviderError::Timeout`.
pub async fn wait_until<F, Fut>(what: &str, config: &WaitConfig, mut probe: F) -> ProviderResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<bool>>,
{
    for attempt in 0..config.max_attempts {
        if probe().await? {
            tracing::debug!("{} ready after {} poll(s)", what, attempt + 1);
            return Ok(());
        }

        if attempt + 1 < config.max_attempts {
            sleep(config.delay_for_attempt(attempt)).await;
        }
    }

    Err(ProviderError::Timeout(format!(
        "{} ({} attempts)",
        what, config.max_attempts
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn quick(max_attempts: u32) -> WaitConfig {
        WaitConfig::fixed(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_ready_on_third_poll() {
        let counter = AtomicU32::new(0);
        let polls = &counter;
        let result = wait_until("vpc-1", &quick(5), move || async move {
            Ok(polls.fetch_add(1, Ordering::SeqCst) + 1 >= 3)
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_times_out() {
        let counter = AtomicU32::new(0);
        let polls = &counter;
        let result = wait_until("i-1 running", &quick(4), move || async move {
            polls.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        })
        .await;

        assert_eq!(
            result,
            Err(ProviderError::Timeout("i-1 running (4 attempts)".to_string()))
        );
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_probe_error_stops_polling() {
        let counter = AtomicU32::new(0);
        let polls = &counter;
        let result = wait_until("db", &quick(10), move || async move {
            polls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::api("Throttling", "slow down"))
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Api { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
