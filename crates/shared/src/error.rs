use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed set of error kinds callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Remote,
    Validation,
    Timeout,
    Cancelled,
}

/// Error body returned by the catalog backend on a non-2xx response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    #[error("network request failed: {0}")]
    Network(String),
    #[error("remote error {status}: {message}")]
    Remote {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("invalid response: {0}")]
    Validation(String),
    #[error("sync timed out after {polls} status checks")]
    Timeout { polls: u32 },
    #[error("operation cancelled")]
    Cancelled,
}

impl ClientError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn remote(status: u16, body: ApiErrorBody) -> Self {
        Self::Remote {
            status,
            code: body.code,
            message: body
                .message
                .unwrap_or_else(|| "API request failed".to_string()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Remote { .. } => ErrorKind::Remote,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Only transport failures are worth retrying; the backend already
    /// answered for every other kind.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
