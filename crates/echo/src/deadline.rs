//! Per-operation deadlines.

use crate::EchoError;
use std::future::Future;
use std::io;
use std::time::Duration;

/// Run one I/O operation, failing with [`EchoError::DeadlineExceeded`] if it
/// does not finish within `timeout`.
///
/// Each call gets a fresh deadline; callers wrap every read or write rather
/// than a whole exchange.
pub(crate) async fn with_deadline<T, F>(
    operation: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T, EchoError>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(EchoError::from),
        Err(_) => Err(EchoError::DeadlineExceeded { operation, timeout }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let result: Result<(), _> = with_deadline(
            "read",
            Duration::from_millis(10),
            std::future::pending::<io::Result<()>>(),
        )
        .await;
        assert!(matches!(
            result,
            Err(EchoError::DeadlineExceeded {
                operation: "read",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_io_error_passes_through() {
        let result: Result<(), _> = with_deadline("write", Duration::from_secs(1), async {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        })
        .await;
        assert!(matches!(result, Err(EchoError::Io(_))));
    }
}
