//! Fixed-attempt retry for downstream notifications.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Run `op` up to `attempts` times, sleeping `delay` between failures.
/// Returns the last error once attempts are exhausted.
pub async fn retry<T, E, F, Fut>(
    attempts: u32,
    delay: Duration,
    what: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts => {
                tracing::debug!(attempt, attempts, "{what} failed, retrying: {e}");
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn stops_after_the_first_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<u32, String> = retry(5, Duration::ZERO, "op", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(format!("fail {n}"))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_with_the_last_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), String> = retry(3, Duration::ZERO, "op", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("fail {n}"))
        })
        .await;
        assert_eq!(result, Err("fail 3".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
