//! Async test helpers

use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// Default timeout duration for tests (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Short timeout for tests that expect nothing to arrive (100ms)
pub const SHORT_TEST_TIMEOUT: Duration = Duration::from_millis(100);

/// Receive from an unbounded channel, giving up after `duration`
pub async fn recv_timeout<T>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    duration: Duration,
) -> Result<T, RecvTimeoutError> {
    timeout(duration, rx.recv())
        .await
        .map_err(|_| RecvTimeoutError::Timeout)?
        .ok_or(RecvTimeoutError::Closed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvTimeoutError {
    #[error("receive operation timed out")]
    Timeout,
    #[error("channel closed")]
    Closed,
}

/// Drain whatever is queued without waiting
pub fn try_drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut results = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        results.push(msg);
    }
    results
}

/// Await `future`, panicking if it takes longer than `duration`
pub async fn assert_completes_within<F, T>(duration: Duration, future: F) -> T
where
    F: Future<Output = T>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => panic!("Future did not complete within {:?}", duration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recv_timeout_success() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(42).unwrap();

        assert_eq!(recv_timeout(&mut rx, SHORT_TEST_TIMEOUT).await, Ok(42));
    }

    #[tokio::test]
    async fn test_recv_timeout_timeout() {
        let (_tx, mut rx) = mpsc::unbounded_channel::<i32>();

        assert_eq!(
            recv_timeout(&mut rx, Duration::from_millis(10)).await,
            Err(RecvTimeoutError::Timeout)
        );
    }

    #[tokio::test]
    async fn test_recv_timeout_closed() {
        let (tx, mut rx) = mpsc::unbounded_channel::<i32>();
        drop(tx);

        assert_eq!(
            recv_timeout(&mut rx, SHORT_TEST_TIMEOUT).await,
            Err(RecvTimeoutError::Closed)
        );
    }

    #[test]
    fn test_recv_timeout_error_display() {
        assert_eq!(RecvTimeoutError::Timeout.to_string(), "receive operation timed out");
        assert_eq!(RecvTimeoutError::Closed.to_string(), "channel closed");
    }

    #[test]
    fn test_try_drain() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(1).unwrap();
        tx.send(2).unwrap();

        assert_eq!(try_drain(&mut rx), vec![1, 2]);
        assert!(try_drain(&mut rx).is_empty());
    }
}
