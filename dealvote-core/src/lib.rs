pub mod classifier;
pub mod config;
pub mod error;
pub mod error_utils;
pub mod extractor;
pub mod forest;
pub mod forum;
pub mod retry;
pub mod types;

pub use classifier::SentimentClassifier;
pub use config::{BotConfig, BotSettings, LinkParsing, RedditCredentials, TriggerLists};
pub use error::*;
pub use error_utils::*;
pub use extractor::UrlExtractor;
pub use forest::CommentForest;
pub use forum::Forum;
pub use retry::{
    calculate_delay, get_retry_strategy, RetryConfig, RetryExecutor, RetryExhausted, RetryStrategy,
};
pub use types::*;
