use crate::error::*;
use std::time::Duration;

pub trait ErrorExt {
    fn is_retryable(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
    fn error_code(&self) -> String;
}

impl ErrorExt for CoreError {
    fn is_retryable(&self) -> bool {
        match self {
            CoreError::RedditApi(e) => e.is_retryable(),
            CoreError::Database(e) => e.is_retryable(),
            CoreError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            CoreError::RateLimited { .. } => true,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::RedditApi(e) => e.retry_after(),
            CoreError::Database(e) => e.retry_after(),
            CoreError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    fn error_code(&self) -> String {
        match self {
            CoreError::RedditApi(e) => e.error_code(),
            CoreError::Database(e) => e.error_code(),
            CoreError::Config(e) => e.error_code(),
            CoreError::Io(_) => "IO".to_string(),
            CoreError::Serialization(_) => "SERIALIZATION".to_string(),
            CoreError::Network(_) => "NETWORK".to_string(),
            CoreError::IncompleteCommentTree { .. } => "INCOMPLETE_COMMENT_TREE".to_string(),
            CoreError::InvalidInput { .. } => "INVALID_INPUT".to_string(),
            CoreError::Internal { .. } => "INTERNAL".to_string(),
            CoreError::RateLimited { .. } => "RATE_LIMITED".to_string(),
        }
    }
}

impl ErrorExt for RedditApiError {
    fn is_retryable(&self) -> bool {
        match self {
            RedditApiError::RateLimitExceeded { .. } => true,
            RedditApiError::RequestTimeout => true,
            RedditApiError::ServerError { status_code } => *status_code >= 500,
            // Truncated or malformed listings show up under load.
            RedditApiError::InvalidResponse { .. } => true,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            RedditApiError::RateLimitExceeded { retry_after } => {
                Some(Duration::from_secs(*retry_after))
            }
            _ => None,
        }
    }

    fn error_code(&self) -> String {
        match self {
            RedditApiError::AuthenticationFailed { .. } => "REDDIT_AUTH_FAILED".to_string(),
            RedditApiError::RateLimitExceeded { .. } => "REDDIT_RATE_LIMIT".to_string(),
            RedditApiError::Forbidden { .. } => "REDDIT_FORBIDDEN".to_string(),
            RedditApiError::SubredditNotFound { .. } => "REDDIT_SUBREDDIT_NOT_FOUND".to_string(),
            RedditApiError::InvalidToken => "REDDIT_INVALID_TOKEN".to_string(),
            RedditApiError::RequestTimeout => "REDDIT_TIMEOUT".to_string(),
            RedditApiError::InvalidResponse { .. } => "REDDIT_INVALID_RESPONSE".to_string(),
            RedditApiError::Rejected { .. } => "REDDIT_REJECTED".to_string(),
            RedditApiError::ServerError { .. } => "REDDIT_SERVER_ERROR".to_string(),
        }
    }
}

impl ErrorExt for DatabaseError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            DatabaseError::DatabaseLocked | DatabaseError::ConnectionFailed { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            DatabaseError::DatabaseLocked => Some(Duration::from_millis(100)),
            _ if self.is_retryable() => Some(Duration::from_secs(1)),
            _ => None,
        }
    }

    fn error_code(&self) -> String {
        match self {
            DatabaseError::ConnectionFailed { .. } => "DB_CONNECTION_FAILED".to_string(),
            DatabaseError::MigrationFailed { .. } => "DB_MIGRATION_FAILED".to_string(),
            DatabaseError::InvalidValue { .. } => "DB_INVALID_VALUE".to_string(),
            DatabaseError::DatabaseLocked => "DB_LOCKED".to_string(),
            DatabaseError::Sql(_) => "DB_SQL_ERROR".to_string(),
        }
    }
}

impl ErrorExt for ConfigError {
    fn is_retryable(&self) -> bool {
        false // Config errors need an operator to fix the file
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn error_code(&self) -> String {
        match self {
            ConfigError::FileNotFound { .. } => "CONFIG_FILE_NOT_FOUND".to_string(),
            ConfigError::MissingField { .. } => "CONFIG_MISSING_FIELD".to_string(),
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE".to_string(),
            ConfigError::MissingEnvironmentVariable { .. } => "CONFIG_MISSING_ENV_VAR".to_string(),
            ConfigError::Parse(_) => "CONFIG_PARSE_ERROR".to_string(),
        }
    }
}
