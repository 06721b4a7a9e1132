//! Error types for transports, channels and configuration.

use crate::message::{MessageId, QueueName};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a queue transport.
///
/// Channels propagate these unchanged, with one exception: the reply loop of
/// [`RequestResponseChannel`](crate::RequestResponseChannel) swallows
/// [`TransportError::CorrelationNotFound`] and polls again.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Queue already exists: {queue_name}")]
    QueueAlreadyExists { queue_name: String },

    #[error("No message with correlation id '{correlation_id}' in queue {queue_name}")]
    CorrelationNotFound {
        queue_name: String,
        correlation_id: MessageId,
    },

    #[error("Transaction not found or already completed: {transaction_id}")]
    TransactionNotFound { transaction_id: String },

    #[error("Transaction usage does not match mode of queue {queue_name}: {message}")]
    TransactionalMismatch { queue_name: String, message: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Permission denied for operation: {operation}")]
    PermissionDenied { operation: String },

    #[error("Stored message is corrupted: {message}")]
    Corrupted { message: String },

    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport internal error: {message}")]
    Internal { message: String },
}

impl TransportError {
    /// The "nothing with that correlation id yet" condition.
    pub fn is_correlation_not_found(&self) -> bool {
        matches!(self, Self::CorrelationNotFound { .. })
    }

    /// Check if error is transient and the operation could succeed later
    pub fn is_transient(&self) -> bool {
        match self {
            Self::CorrelationNotFound { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::Io { .. } => true,
            Self::QueueNotFound { .. } => false,
            Self::QueueAlreadyExists { .. } => false,
            Self::TransactionNotFound { .. } => false,
            Self::TransactionalMismatch { .. } => false,
            Self::PermissionDenied { .. } => false,
            Self::Corrupted { .. } => false,
            Self::Serialization(_) => false,
            Self::Internal { .. } => false,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn queue_not_found(queue: &QueueName) -> Self {
        Self::QueueNotFound {
            queue_name: queue.to_string(),
        }
    }
}

/// Errors returned by the messaging channels and the transaction scope.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Invalid argument '{argument}': {message}")]
    InvalidArgument { argument: String, message: String },

    #[error("Queue {queue_name} is transactional; begin a transaction first")]
    TransactionRequired { queue_name: String },

    #[error("A transaction is already open on this scope")]
    TransactionAlreadyOpen,

    #[error("No transaction is open; call begin before committing")]
    TransactionNotOpen,

    #[error("Queue {queue_name} exists with transactional={actual}, requested transactional={requested}")]
    QueueModeMismatch {
        queue_name: String,
        requested: bool,
        actual: bool,
    },

    #[error("No reply correlated to {request_id} arrived within {waited:?}")]
    ReceiveTimedOut {
        request_id: MessageId,
        waited: Duration,
    },

    #[error("Waiting for the reply to {request_id} was cancelled")]
    ReceiveCancelled { request_id: MessageId },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl ChannelError {
    /// Errors the caller can fix by changing how the API is used.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. }
                | Self::TransactionRequired { .. }
                | Self::TransactionAlreadyOpen
                | Self::TransactionNotOpen
                | Self::Validation(_)
        )
    }

    pub(crate) fn invalid_argument(argument: &str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            argument: argument.to_string(),
            message: message.into(),
        }
    }
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration loading failed: {0}")]
    Loading(#[from] config::ConfigError),

    #[error("Transport could not be initialised: {0}")]
    Transport(#[from] TransportError),
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
