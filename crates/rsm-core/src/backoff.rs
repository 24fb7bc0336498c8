use std::time::Duration;

/// Deterministic exponential backoff: `delay(retry) = base * pow.powi(retry)`.
///
/// Pure function of `retry`; no jitter applied (none is required by the
/// contract, though an implementation is free to add it).
#[derive(Debug, Clone, Copy)]
pub(crate) struct Backoff {
    base: Duration,
    pow: f64,
}

impl Backoff {
    pub(crate) fn new(base: Duration, pow: f64) -> Self {
        Self { base, pow }
    }

    pub(crate) fn delay(&self, retry: u32) -> Duration {
        let factor = self.pow.powi(retry as i32);
        Duration::from_secs_f64(self.base.as_secs_f64() * factor)
    }

    /// Suspend the caller for `delay(retry)`.
    pub(crate) async fn wait(&self, retry: u32) {
        if retry == 0 {
            return;
        }
        tokio::time::sleep(self.delay(retry)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially() {
        let backoff = Backoff::new(Duration::from_millis(100), 2.0);
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_sleeps_for_the_computed_delay() {
        let backoff = Backoff::new(Duration::from_millis(50), 2.0);
        let start = tokio::time::Instant::now();
        backoff.wait(2).await;
        assert_eq!(tokio::time::Instant::now() - start, Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_is_instant_for_the_first_attempt() {
        let backoff = Backoff::new(Duration::from_millis(50), 2.0);
        let start = tokio::time::Instant::now();
        backoff.wait(0).await;
        assert_eq!(tokio::time::Instant::now() - start, Duration::ZERO);
    }
}
