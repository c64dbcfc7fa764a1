use std::fmt;

use thiserror::Error;

/// Error type for every bus operation.
///
/// The variants follow the failure classes the runtime cares about:
/// infrastructure failures (`Connection`, transient `Transport`) are retried
/// by the `Publisher`, everything else is surfaced immediately.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    /// The transport could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The transport rejected or failed an operation.
    #[error("transport error: {message}")]
    Transport { message: String, transient: bool },
    /// Envelope could not be written or read.
    #[error("serialization failed: {0}")]
    Serialization(String),
    /// The bus was wired incorrectly (duplicate names, missing handlers).
    #[error("configuration error: {0}")]
    Configuration(String),
    /// User handler code failed.
    #[error("handler failed: {0}")]
    Handler(String),
    /// The operation observed cancellation before completing.
    #[error("operation cancelled")]
    Cancelled,
}

impl BusError {
    /// A transport failure that is worth retrying (dropped socket, timeout).
    pub fn transient(message: impl Into<String>) -> Self {
        BusError::Transport {
            message: message.into(),
            transient: true,
        }
    }

    /// A transport failure that will not go away on retry.
    pub fn permanent(message: impl Into<String>) -> Self {
        BusError::Transport {
            message: message.into(),
            transient: false,
        }
    }

    /// Wrap any displayable error raised by handler code.
    pub fn handler(err: impl fmt::Display) -> Self {
        BusError::Handler(err.to_string())
    }

    /// Whether the `Publisher` retry policy may retry this error.
    pub fn is_transient(&self) -> bool {
        match self {
            BusError::Connection(_) => true,
            BusError::Transport { transient, .. } => *transient,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Serialization(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for BusError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                BusError::transient(err.to_string())
            }
            sqlx::Error::Database(db) => {
                // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including their extended
                // codes, clear once the writer finishes.
                let busy = db
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .is_some_and(|code| matches!(code & 0xff, 5 | 6));
                BusError::Transport {
                    message: err.to_string(),
                    transient: busy,
                }
            }
            _ => BusError::permanent(err.to_string()),
        }
    }
}
