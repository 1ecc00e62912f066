//! Errors and their operational classification.

use std::time::Duration;

use thiserror::Error;

use super::ids::MessageId;
use super::state::MessageStatus;
use crate::ports::task_store::StoreError;

/// Operational class of an error.
///
/// - Transient: broker side, a new send may succeed.
/// - Permanent: retrying the same input cannot succeed.
/// - Infrastructure: the task store is failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Error returned by dispatcher operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("task store failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("publish timed out after {0:?}")]
    PublishTimeout(Duration),

    #[error("no task for message_id={0}")]
    NotFound(MessageId),

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: MessageStatus,
        to: MessageStatus,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("dispatcher is closed")]
    Closed,
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Connection(_)
            | DispatchError::Publish(_)
            | DispatchError::PublishTimeout(_) => ErrorKind::Transient,
            DispatchError::Persistence(_) => ErrorKind::Infrastructure,
            DispatchError::Serialization(_)
            | DispatchError::NotFound(_)
            | DispatchError::InvalidTransition { .. }
            | DispatchError::Config(_)
            | DispatchError::Closed => ErrorKind::Permanent,
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        assert_eq!(
            DispatchError::Connection("refused".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            DispatchError::PublishTimeout(Duration::from_secs(5)).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            DispatchError::Persistence(StoreError::Backend("disk full".into())).kind(),
            ErrorKind::Infrastructure
        );
        assert_eq!(
            DispatchError::Serialization("bad".into()).kind(),
            ErrorKind::Permanent
        );
    }

    #[test]
    fn messages_carry_context() {
        let err = DispatchError::InvalidTransition {
            from: MessageStatus::Failed,
            to: MessageStatus::Acknowledged,
        };
        assert_eq!(
            err.to_string(),
            "invalid status transition failed -> acknowledged"
        );
    }
}
