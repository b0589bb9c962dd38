use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Enforces a minimum interval between consecutive tool invocations so a
/// burst of tool calls cannot hammer the upstream scraper or LLM APIs.
///
/// `wait` is serialized through a mutex, so concurrent callers queue up and
/// each still observes the full interval.
pub struct RateGate {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last_call: Mutex::new(None) }
    }

    /// Sleeps until at least `min_interval` has passed since the previous
    /// call, then records the new call time. The first call never waits.
    pub async fn wait(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let pause = self.min_interval - elapsed;
                debug!(
                    event_name = "rate.pause",
                    pause_ms = pause.as_millis() as u64,
                    "pacing tool call"
                );
                sleep(pause).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}
