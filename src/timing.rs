//! Operation timing helper.
//!
//! Every instrument operation in a measurement is timed so that the
//! per-operation durations can be reported alongside the measured values.

use std::future::Future;
use std::time::Instant;

/// Await `fut` and return its output together with the elapsed wall-clock
/// time in seconds.
pub async fn timed<F, T>(fut: F) -> (T, f64)
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let value = fut.await;
    (value, start.elapsed().as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn reports_elapsed_time() {
        let ((), secs) = timed(tokio::time::sleep(Duration::from_millis(20))).await;
        assert!(secs >= 0.02);
        assert!(secs < 1.0);
    }

    #[tokio::test]
    async fn passes_output_through() {
        let (value, secs) = timed(async { 42 }).await;
        assert_eq!(value, 42);
        assert!(secs >= 0.0);
    }
}
