use std::fmt;

use crate::types::RecordId;

/// Failure reported by the backend or the transport in front of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RemoteError {}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// Required input is missing; the write is withheld without a toast.
    #[error("{0} is required")]
    Validation(&'static str),
    #[error("no backing record for {0}")]
    MissingRecord(String),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl SyncError {
    /// Whether the user should be told about this failure.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    pub fn missing_record(id: &RecordId) -> Self {
        Self::MissingRecord(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::new("HTTP_ERROR", "backend returned HTTP 500");
        assert_eq!(err.to_string(), "HTTP_ERROR: backend returned HTTP 500");
    }

    #[test]
    fn test_only_remote_failures_are_user_visible() {
        assert!(!SyncError::Validation("title").is_user_visible());
        assert!(!SyncError::MissingRecord("7".to_string()).is_user_visible());
        assert!(SyncError::from(RemoteError::new("NOT_FOUND", "gone")).is_user_visible());
    }
}
