use std::time::Duration;
use thiserror::Error;

/// Failure of an external collaborator (generation service, search service).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("{collaborator} timed out after {}ms", after.as_millis())]
    Timeout {
        collaborator: &'static str,
        after: Duration,
    },
    #[error("{0} is unavailable")]
    Unavailable(String),
    #[error("malformed response: {0}")]
    Protocol(String),
    #[error("request failed: {0}")]
    Request(String),
}

impl CollaboratorError {
    pub fn timeout(collaborator: &'static str, after: Duration) -> Self {
        Self::Timeout {
            collaborator,
            after,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            return Self::Protocol(error.to_string());
        }
        if let Some(status) = error.status()
            && (status.as_u16() == 401 || status.as_u16() == 403)
        {
            return Self::Unavailable(format!("credentials rejected ({})", status));
        }
        Self::Request(error.to_string())
    }
}

/// Runs `future` under `limit`, mapping expiry to [`CollaboratorError::Timeout`].
pub async fn with_timeout<T, F>(
    collaborator: &'static str,
    limit: Duration,
    future: F,
) -> Result<T, CollaboratorError>
where
    F: std::future::Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::timeout(collaborator, limit)),
    }
}
