use thiserror::Error;

/// Why a catalog operation did not reach (or did not survive) the server.
///
/// `NetworkFailure` and `RemoteRejected` are reconciled identically; they only
/// differ in the diagnostic text shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("{operation}: request did not complete: {message}")]
    NetworkFailure {
        operation: &'static str,
        message: String,
    },
    #[error("{operation}: server rejected the request with status {status}: {error}")]
    RemoteRejected {
        operation: &'static str,
        status: u16,
        error: String,
        details: Option<String>,
    },
    #[error("request skipped: {0}")]
    ValidationSkipped(String),
    #[error("the catalog view was torn down before the request resolved")]
    ViewClosed,
}

impl SyncError {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::ValidationSkipped(reason.into())
    }

    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Self::NetworkFailure { operation, .. } | Self::RemoteRejected { operation, .. } => {
                Some(operation)
            }
            Self::ValidationSkipped(_) | Self::ViewClosed => None,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::NetworkFailure { operation, .. } => {
                format!("Failed to {operation}: the server could not be reached.")
            }
            Self::RemoteRejected {
                operation,
                status,
                error,
                details,
            } => match details {
                Some(details) => format!("Failed to {operation} ({status}): {error} ({details})"),
                None => format!("Failed to {operation} ({status}): {error}"),
            },
            Self::ValidationSkipped(reason) => reason.clone(),
            Self::ViewClosed => "The launcher view is no longer open.".to_string(),
        }
    }
}
