/// Core error type for the relay bot.
///
/// Adapter crates map their specific errors into this type so the dispatch
/// boundary can treat every collaborator failure the same way (log, tell the
/// user something actionable, never crash the process).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// The platform answered and refused this one request (recipient blocked
    /// the bot, message already gone). Says nothing about platform health.
    #[error("rejected by platform: {0}")]
    Rejected(String),

    /// A collaborator call exceeded its deadline. Kept apart from `Transport` for
    /// logging only; control flow treats both as retryable failures.
    #[error("timed out after {0:?}: {1}")]
    Timeout(std::time::Duration, String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(..))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Error::Rejected(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Run `fut` with a deadline, mapping expiry into [`Error::Timeout`].
pub async fn with_timeout<T, F>(limit: std::time::Duration, what: &str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::Timeout(limit, what.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn with_timeout_maps_elapsed_deadline() {
        let err = with_timeout(Duration::from_millis(10), "send", async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, Error>(())
        })
        .await
        .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("send"));
    }

    #[tokio::test]
    async fn with_timeout_passes_inner_errors_through() {
        let err = with_timeout(Duration::from_secs(1), "send", async {
            Err::<(), _>(Error::Transport("boom".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
