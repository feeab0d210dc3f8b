use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use anyhow::anyhow;
use tokio::time;

use crate::error::OperationTimeoutError;

/// Bound an operation by an optional deadline, naming the operation in the
/// timeout error so callers and logs can tell enumeration from invocation.
pub(crate) async fn run_with_timeout<T, E, F>(
    fut: F,
    timeout: Option<Duration>,
    operation: &str,
) -> Result<T>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    match timeout {
        Some(duration) => match time::timeout(duration, fut).await {
            Ok(result) => result.map_err(|err| anyhow!(err)),
            Err(_) => Err(OperationTimeoutError {
                operation: operation.to_string(),
                timeout_ms: duration.as_millis() as u64,
            }
            .into()),
        },
        None => fut.await.map_err(|err| anyhow!(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn names_the_operation_on_timeout() {
        let fut = async {
            time::sleep(Duration::from_secs(60)).await;
            Ok::<_, std::io::Error>(())
        };
        let err = run_with_timeout(fut, Some(Duration::from_millis(50)), "tools/call")
            .await
            .expect_err("should time out");
        let timeout = err
            .downcast_ref::<OperationTimeoutError>()
            .expect("typed timeout");
        assert_eq!(timeout.operation, "tools/call");
        assert_eq!(timeout.timeout_ms, 50);
        assert!(err.to_string().contains("tools/call request timed out"));
    }

    #[tokio::test]
    async fn passes_success_through() {
        let value = run_with_timeout(
            async { Ok::<_, std::io::Error>(7) },
            Some(Duration::from_secs(1)),
            "tools/list",
        )
        .await
        .expect("success");
        assert_eq!(value, 7);
    }
}
