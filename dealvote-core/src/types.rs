use serde::{Deserialize, Serialize};
use std::fmt;

/// Fullname prefix Reddit uses for submissions.
pub const POST_KIND_PREFIX: &str = "t3_";
/// Fullname prefix Reddit uses for comments.
pub const COMMENT_KIND_PREFIX: &str = "t1_";

/// A submission in the monitored subreddit, as seen at scan time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: String,
    /// `None` when the account was deleted.
    pub author: Option<String>,
    pub permalink: String,
    pub title: String,
    pub body: String,
    pub created_utc: i64,
}

impl Post {
    pub fn fullname(&self) -> String {
        format!("{POST_KIND_PREFIX}{}", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: String,
    /// Fullname of the parent: `t3_…` for top-level comments, `t1_…` for replies.
    pub parent_id: String,
    pub author: Option<String>,
    pub body: String,
    pub created_utc: i64,
}

impl Comment {
    pub fn fullname(&self) -> String {
        format!("{COMMENT_KIND_PREFIX}{}", self.id)
    }
}

/// A "load more comments" stub standing in for unloaded children.
///
/// An empty `children` list is Reddit's "continue this thread" link, which
/// can only be expanded by fetching the parent's subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub id: String,
    pub parent_id: String,
    pub children: Vec<String>,
}

impl Placeholder {
    pub fn is_continue_thread(&self) -> bool {
        self.children.is_empty()
    }
}

/// One flattened node of a comment listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForestThing {
    Comment(Comment),
    Placeholder(Placeholder),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteCategory {
    Positive,
    Neutral,
    Negative,
}

impl VoteCategory {
    pub const ALL: [VoteCategory; 3] = [
        VoteCategory::Positive,
        VoteCategory::Neutral,
        VoteCategory::Negative,
    ];

    /// Integer code stored in the ledger. `0` is reserved for "no vote" and
    /// is never written.
    pub fn code(self) -> i64 {
        match self {
            VoteCategory::Positive => 1,
            VoteCategory::Neutral => 2,
            VoteCategory::Negative => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(VoteCategory::Positive),
            2 => Some(VoteCategory::Neutral),
            3 => Some(VoteCategory::Negative),
            _ => None,
        }
    }
}

impl fmt::Display for VoteCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteCategory::Positive => write!(f, "positive"),
            VoteCategory::Neutral => write!(f, "neutral"),
            VoteCategory::Negative => write!(f, "negative"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoteTally {
    pub positive: u32,
    pub neutral: u32,
    pub negative: u32,
}

impl VoteTally {
    pub fn get(&self, category: VoteCategory) -> u32 {
        match category {
            VoteCategory::Positive => self.positive,
            VoteCategory::Neutral => self.neutral,
            VoteCategory::Negative => self.negative,
        }
    }

    pub fn set(&mut self, category: VoteCategory, count: u32) {
        match category {
            VoteCategory::Positive => self.positive = count,
            VoteCategory::Neutral => self.neutral = count,
            VoteCategory::Negative => self.negative = count,
        }
    }

    pub fn total(&self) -> u32 {
        self.positive + self.neutral + self.negative
    }
}

/// Case-insensitive username comparison; Reddit usernames are not
/// case-sensitive.
pub fn same_user(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
