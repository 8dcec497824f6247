//! Utility functions and helpers
//!
//! This module provides timing and retry helpers used throughout the
//! codebase.

pub mod timer;

pub use timer::Timer;

use std::time::{Duration, Instant};
use uuid::Uuid;
use log::info;

/// Generate a UUID v4
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Generate a timestamp in milliseconds since UNIX epoch
pub fn current_timestamp_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis() as i64
}

/// Measure execution time of a closure
pub fn measure_time<F, T>(name: &str, f: F) -> T
where
    F: FnOnce() -> T,
{
    let start = Instant::now();
    let result = f();
    let elapsed = start.elapsed();
    info!("{} took {}ms", name, elapsed.as_millis());
    result
}

/// Retry a fallible operation with exponential backoff
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation: F,
    max_retries: usize,
    initial_backoff: Duration,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut retries = 0;
    let mut backoff = initial_backoff;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if retries >= max_retries {
                    return Err(err);
                }

                tokio::time::sleep(backoff).await;
                retries += 1;
                backoff *= 2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_generate_uuid_is_unique() {
        assert_ne!(generate_uuid(), generate_uuid());
    }

    #[test]
    fn test_current_timestamp_millis() {
        let a = current_timestamp_millis();
        let b = current_timestamp_millis();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn test_measure_time_returns_result() {
        let value = measure_time("test", || 41 + 1);
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<u32, &str> = retry_with_backoff(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("not yet")
                    } else {
                        Ok(7)
                    }
                }
            },
            5,
            Duration::from_millis(1),
        )
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let result: Result<u32, &str> = retry_with_backoff(
            || async { Err("always fails") },
            2,
            Duration::from_millis(1),
        )
        .await;

        assert_eq!(result, Err("always fails"));
    }
}
