use std::collections::HashSet;

/// Posts and comments already handled in this process. Cleared only by a
/// restart.
#[derive(Debug, Default)]
pub struct VisitedSet {
    posts: HashSet<String>,
    comments: HashSet<String>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the post visited. Returns `true` on the first visit.
    pub fn visit_post(&mut self, post_id: &str) -> bool {
        self.posts.insert(post_id.to_string())
    }

    pub fn mark_comment(&mut self, comment_id: &str) {
        self.comments.insert(comment_id.to_string());
    }

    pub fn is_comment_visited(&self, comment_id: &str) -> bool {
        self.comments.contains(comment_id)
    }

    pub fn post_count(&self) -> usize {
        self.posts.len()
    }

    pub fn comment_count(&self) -> usize {
        self.comments.len()
    }
}
