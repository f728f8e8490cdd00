//! Error taxonomy shared by the connection lifecycle and the event router.
//!
//! Every per-event failure degrades to a single `error` frame for the caller.
//! Only heartbeat timeout terminates a connection.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad or missing credential at connect time. The socket is refused
    /// before anything is registered.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Authenticated, but not entitled to the ride/booking/message.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Persistence or identity lookup failed.
    #[error("Dependency failure: {0}")]
    TransientDependencyFailure(String),

    /// Malformed event payload.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
}

impl CoreError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Message shown to the caller in the `error` frame.
    /// Dependency failures are not leaked to clients.
    pub fn client_message(&self) -> String {
        match self {
            Self::TransientDependencyFailure(_) => {
                "Internal error, please try again".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::TransientDependencyFailure(format!("database: {}", err))
    }
}

impl From<tokio::task::JoinError> for CoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TransientDependencyFailure(format!("task join: {}", err))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
