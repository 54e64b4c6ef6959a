//! Structured error types for the poll lifecycle engine.
//!
//! One `thiserror` enum per layer kept to a small, closed set of variants so
//! callers can match on *kind* instead of parsing strings.
//! `is_retryable()` / `retry_delay()` / `user_message()` drive the retry
//! and notification policy used throughout the service.

use std::time::Duration;
use thiserror::Error;

/// Primary error type for poll lifecycle operations.
#[derive(Error, Debug)]
pub enum PollyError {
    // ---------------------------------------------------------------
    // Validation
    // ---------------------------------------------------------------
    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("time ordering invalid: close_time must be after open_time")]
    TimeOrder,

    #[error("open_time is in the past (must be at least 1 minute from now)")]
    PastOpen,

    // ---------------------------------------------------------------
    // Not found
    // ---------------------------------------------------------------
    #[error("poll {0} not found")]
    PollNotFound(i64),

    #[error("chat message not found")]
    MessageNotFound,

    // ---------------------------------------------------------------
    // Chat-platform adapter
    // ---------------------------------------------------------------
    #[error("bot lacks permission: {action}")]
    Permission { action: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimit { retry_after: Duration },

    #[error("transport error: {message}")]
    Transport { message: String },

    // ---------------------------------------------------------------
    // Data integrity / concurrency
    // ---------------------------------------------------------------
    #[error("data integrity error: {message}")]
    DataIntegrity { message: String },

    #[error("concurrent write conflict")]
    ConcurrentWrite,

    #[error("max_choices reached")]
    MaxChoicesReached,

    // ---------------------------------------------------------------
    // Wrapped lower-level errors
    // ---------------------------------------------------------------
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("template error: {0}")]
    Template(#[from] tera::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected: {message}")]
    Unexpected { message: String },
}

impl PollyError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn permission(action: impl Into<String>) -> Self {
        Self::Permission { action: action.into() }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected { message: message.into() }
    }

    /// Whether the operation that produced this error is safe to retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimit { .. } => true,
            Self::Transport { .. } => true,
            Self::ConcurrentWrite => true,
            Self::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)
            ),
            Self::Cache(_) => true,

            Self::Validation { .. }
            | Self::TimeOrder
            | Self::PastOpen
            | Self::PollNotFound(_)
            | Self::MessageNotFound
            | Self::Permission { .. }
            | Self::DataIntegrity { .. }
            | Self::MaxChoicesReached
            | Self::Migrate(_)
            | Self::Serialization(_)
            | Self::Template(_)
            | Self::Io(_)
            | Self::Unexpected { .. } => false,
        }
    }

    /// Suggested delay before retrying, if any.
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after } => Some(*retry_after),
            Self::Transport { .. } => Some(Duration::from_millis(500)),
            Self::ConcurrentWrite => Some(Duration::from_millis(50)),
            Self::Cache(_) => Some(Duration::from_secs(1)),
            _ => None,
        }
    }

    /// Category used by the error notifier (C13) for threshold escalation.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation { .. } | Self::TimeOrder | Self::PastOpen => "validation",
            Self::PollNotFound(_) | Self::MessageNotFound => "not_found",
            Self::Permission { .. } => "permission",
            Self::RateLimit { .. } => "rate_limit",
            Self::Transport { .. } => "transport",
            Self::DataIntegrity { .. } => "data_integrity",
            Self::ConcurrentWrite | Self::MaxChoicesReached => "vote_engine",
            Self::Database(_) | Self::Migrate(_) => "database",
            Self::Cache(_) => "cache",
            Self::Serialization(_) | Self::Template(_) | Self::Io(_) => "internal",
            Self::Unexpected { .. } => "unexpected",
        }
    }

    /// Human-readable message suitable for surfacing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::TimeOrder => "Close time must be after open time.".to_string(),
            Self::PastOpen => "Open time must be at least a minute from now.".to_string(),
            Self::Permission { action } => {
                format!("The bot lacks permission to {action}.")
            }
            Self::MaxChoicesReached => {
                "You've already selected the maximum number of options.".to_string()
            }
            Self::PollNotFound(_) => "That poll no longer exists.".to_string(),
            _ => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PollyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(PollyError::RateLimit { retry_after: Duration::from_secs(1) }.is_retryable());
        assert!(PollyError::ConcurrentWrite.is_retryable());
        assert!(!PollyError::PastOpen.is_retryable());
        assert!(!PollyError::MaxChoicesReached.is_retryable());
    }

    #[test]
    fn categories_are_stable() {
        assert_eq!(PollyError::PastOpen.category(), "validation");
        assert_eq!(PollyError::MaxChoicesReached.category(), "vote_engine");
    }

    #[test]
    fn user_messages_are_friendly() {
        assert!(PollyError::TimeOrder.user_message().contains("Close time"));
        assert!(PollyError::MaxChoicesReached
            .user_message()
            .contains("maximum"));
    }
}
