use crate::error::CoreError;
use crate::types::{ForestThing, Placeholder, Post};
use async_trait::async_trait;

/// Everything the bot needs from the discussion site.
///
/// Implemented over HTTP by `reddit-client`; tests substitute an in-memory
/// double.
#[async_trait]
pub trait Forum: Send + Sync {
    /// Username of the authenticated account.
    async fn own_username(&self) -> Result<String, CoreError>;

    /// Up to `limit` newest submissions in `section`, newest first.
    async fn newest_posts(&self, section: &str, limit: u32) -> Result<Vec<Post>, CoreError>;

    /// The loaded part of a post's comment tree, flattened in listing order.
    async fn comment_things(&self, post_id: &str) -> Result<Vec<ForestThing>, CoreError>;

    /// Loads the nodes a placeholder stands for. The result may contain
    /// further placeholders.
    async fn expand_placeholder(
        &self,
        post_id: &str,
        placeholder: &Placeholder,
    ) -> Result<Vec<ForestThing>, CoreError>;

    /// Posts a top-level comment and returns its id.
    async fn reply_to_post(&self, post_id: &str, body: &str) -> Result<String, CoreError>;

    async fn edit_comment(&self, comment_id: &str, body: &str) -> Result<(), CoreError>;

    /// Marks a comment as a moderator comment and pins it to the top.
    async fn distinguish_sticky(&self, comment_id: &str) -> Result<(), CoreError>;
}
