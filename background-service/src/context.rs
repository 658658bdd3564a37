use database::Database;
use dealvote_core::{
    BotConfig, BotSettings, Forum, RetryExecutor, SentimentClassifier, UrlExtractor,
};
use std::sync::Arc;

/// Everything a scan needs, passed explicitly to each stage.
pub struct BotContext {
    pub forum: Arc<dyn Forum>,
    pub ledger: Arc<Database>,
    pub settings: BotSettings,
    /// Username the bot posts under. Never recorded as a voter.
    pub identity: String,
    pub comment_classifier: SentimentClassifier,
    pub title_classifier: SentimentClassifier,
    pub extractor: UrlExtractor,
    pub expansion: RetryExecutor,
}

impl BotContext {
    pub fn new(
        forum: Arc<dyn Forum>,
        ledger: Arc<Database>,
        config: &BotConfig,
        identity: String,
    ) -> Self {
        Self {
            forum,
            ledger,
            settings: config.bot.clone(),
            identity,
            comment_classifier: SentimentClassifier::new(&config.comment_voting),
            title_classifier: SentimentClassifier::new(&config.title_voting),
            extractor: UrlExtractor::new(config.link_parsing.url_filters.clone()),
            expansion: RetryExecutor::new(config.bot.expansion_retry()),
        }
    }
}
