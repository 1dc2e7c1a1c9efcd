//! Usage: Run blocking work (filesystem, child processes) off the async runtime with a stable label.

use crate::shared::error::{AppError, AppResult};

pub async fn run<T, E>(
    label: &'static str,
    f: impl FnOnce() -> Result<T, E> + Send + 'static,
) -> AppResult<T>
where
    T: Send + 'static,
    E: Into<AppError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(Into::into),
        Err(join_err) => {
            // Panic payloads may echo file contents or tokens; keep them out of the error text.
            if join_err.is_panic() {
                tracing::error!(label, "blocking task panicked");
                return Err(AppError::new(
                    "TASK_JOIN",
                    format!("{label}: task panicked"),
                ));
            }

            tracing::warn!(label, "blocking task cancelled");
            Err(AppError::new(
                "TASK_JOIN",
                format!("{label}: task cancelled"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_returns_closure_value() {
        let value = run("test_ok", || Ok::<_, AppError>(41 + 1))
            .await
            .expect("value");
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn run_maps_closure_error() {
        let err = run("test_err", || {
            Err::<(), _>("IO_ERROR: disk unplugged".to_string())
        })
        .await
        .expect_err("should fail");
        assert_eq!(err.code(), "IO_ERROR");
    }
}
