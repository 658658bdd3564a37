use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use background_service::{BackgroundService, BotContext};
use database::Database;
use dealvote_core::{
    BotConfig, Comment, CoreError, ForestThing, Forum, Placeholder, Post, RedditApiError,
    VoteCategory, VoteTally,
};

const BOT: &str = "DealVoteBot";
/// Source timestamp for seeded comments, well before any render time.
const SEEDED_AT: i64 = 1_700_000_100;

const CONFIG: &str = r#"
    [reddit]
    client_id = "id"
    client_secret = "secret"
    username = "DealVoteBot"
    password = "pw"
    user_agent = "dealvote-tests"

    [bot]
    subreddit = "GameDeals"
    summary_link = "https://example.com/wiki"
    post_delay_secs = 0
    cycle_delay_secs = 0
    expansion_max_attempts = 2

    [comment_voting]
    positive = ["[positive]"]
    neutral = ["[neutral]"]
    negative = ["[negative]"]

    [title_voting]
    positive = ["great price"]

    [link_parsing]
    url_filters = ["steampowered.com"]
"#;

#[derive(Default)]
struct MockState {
    posts: Vec<Post>,
    comments: HashMap<String, Vec<ForestThing>>,
    expansions: HashMap<String, Vec<ForestThing>>,
    expansion_failures: u32,
    list_fails: bool,
    replies: Vec<(String, String)>,
    edits: Vec<(String, String)>,
    distinguished: Vec<String>,
}

/// In-memory forum. Replies become top-level comments by the bot.
#[derive(Default)]
struct MockForum {
    state: Mutex<MockState>,
}

impl MockForum {
    fn with_post(post: Post, things: Vec<ForestThing>) -> Self {
        let forum = Self::default();
        {
            let mut state = forum.state.lock().unwrap();
            state.comments.insert(post.id.clone(), things);
            state.posts.push(post);
        }
        forum
    }

    fn add_expansion(&self, placeholder_id: &str, things: Vec<ForestThing>) {
        self.state
            .lock()
            .unwrap()
            .expansions
            .insert(placeholder_id.to_string(), things);
    }

    fn add_comment(&self, post_id: &str, thing: ForestThing) {
        self.state
            .lock()
            .unwrap()
            .comments
            .entry(post_id.to_string())
            .or_default()
            .push(thing);
    }
}

#[async_trait]
impl Forum for MockForum {
    async fn own_username(&self) -> Result<String, CoreError> {
        Ok(BOT.to_string())
    }

    async fn newest_posts(&self, _section: &str, limit: u32) -> Result<Vec<Post>, CoreError> {
        let state = self.state.lock().unwrap();
        if state.list_fails {
            return Err(CoreError::RedditApi(RedditApiError::ServerError {
                status_code: 503,
            }));
        }
        Ok(state.posts.iter().take(limit as usize).cloned().collect())
    }

    async fn comment_things(&self, post_id: &str) -> Result<Vec<ForestThing>, CoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.comments.get(post_id).cloned().unwrap_or_default())
    }

    async fn expand_placeholder(
        &self,
        _post_id: &str,
        placeholder: &Placeholder,
    ) -> Result<Vec<ForestThing>, CoreError> {
        let mut state = self.state.lock().unwrap();
        if state.expansion_failures > 0 {
            state.expansion_failures -= 1;
            return Err(CoreError::RedditApi(RedditApiError::RateLimitExceeded {
                retry_after: 0,
            }));
        }
        Ok(state
            .expansions
            .get(&placeholder.id)
            .cloned()
            .unwrap_or_default())
    }

    async fn reply_to_post(&self, post_id: &str, body: &str) -> Result<String, CoreError> {
        let mut state = self.state.lock().unwrap();
        let comment_id = format!("bot{}", state.replies.len() + 1);
        state.replies.push((post_id.to_string(), body.to_string()));
        state
            .comments
            .entry(post_id.to_string())
            .or_default()
            .push(comment(&comment_id, &format!("t3_{post_id}"), Some(BOT), body, 0));
        Ok(comment_id)
    }

    async fn edit_comment(&self, comment_id: &str, body: &str) -> Result<(), CoreError> {
        self.state
            .lock()
            .unwrap()
            .edits
            .push((comment_id.to_string(), body.to_string()));
        Ok(())
    }

    async fn distinguish_sticky(&self, comment_id: &str) -> Result<(), CoreError> {
        self.state
            .lock()
            .unwrap()
            .distinguished
            .push(comment_id.to_string());
        Ok(())
    }
}

fn comment(id: &str, parent: &str, author: Option<&str>, body: &str, at: i64) -> ForestThing {
    ForestThing::Comment(Comment {
        id: id.to_string(),
        parent_id: parent.to_string(),
        author: author.map(str::to_string),
        body: body.to_string(),
        created_utc: at,
    })
}

fn more(id: &str, parent: &str, children: &[&str]) -> ForestThing {
    ForestThing::Placeholder(Placeholder {
        id: id.to_string(),
        parent_id: parent.to_string(),
        children: children.iter().map(|c| c.to_string()).collect(),
    })
}

fn deal_post(author: Option<&str>) -> Post {
    Post {
        id: "p1".to_string(),
        author: author.map(str::to_string),
        permalink: "https://redd.it/p1".to_string(),
        title: "[Steam] Some Game, great price".to_string(),
        body: "Get it at https://store.steampowered.com/app/1 now.".to_string(),
        created_utc: 1_700_000_000,
    }
}

/// a (alice, positive) with replies a1 (bob, negative) and one by the bot;
/// a deleted author; carol with no trigger; a placeholder hiding dave
/// (neutral).
fn seeded_comments() -> Vec<ForestThing> {
    vec![
        comment("a", "t3_p1", Some("alice"), "[Positive] smooth purchase", SEEDED_AT),
        comment("a1", "t1_a", Some("bob"), "[negative] key never arrived", SEEDED_AT),
        comment("s", "t1_a", Some("dealvotebot"), "[positive] from myself", SEEDED_AT),
        comment("x", "t3_p1", None, "[negative]", SEEDED_AT),
        comment("c", "t3_p1", Some("carol"), "thanks OP", SEEDED_AT),
        more("m1", "t1_a", &["d"]),
    ]
}

async fn setup_ledger() -> Arc<Database> {
    let db_path =
        std::env::temp_dir().join(format!("test_dealvote_engine_{}.db", uuid::Uuid::new_v4()));
    let mut db = Database::new(format!("sqlite://{}", db_path.display()));
    db.connect().await.expect("connect test ledger");
    db.run_migrations().await.expect("migrate test ledger");
    Arc::new(db)
}

/// A fresh process on an existing ledger.
fn service_on(forum: Arc<MockForum>, ledger: Arc<Database>) -> BackgroundService {
    let config = BotConfig::from_toml_str(CONFIG, |_| None).expect("valid test config");
    BackgroundService::new(BotContext::new(forum, ledger, &config, BOT.to_string()))
}

async fn service_for(forum: Arc<MockForum>) -> (BackgroundService, Arc<Database>) {
    let ledger = setup_ledger().await;
    (service_on(forum, ledger.clone()), ledger)
}

fn seeded_forum(author: Option<&str>) -> Arc<MockForum> {
    let forum = MockForum::with_post(deal_post(author), seeded_comments());
    forum.add_expansion(
        "m1",
        vec![comment("d", "t1_a", Some("dave"), "[neutral] meh", SEEDED_AT)],
    );
    Arc::new(forum)
}

#[tokio::test]
async fn test_cycle_collects_votes_and_posts_summary() {
    let forum = seeded_forum(Some("op"));
    let (mut service, ledger) = service_for(forum.clone()).await;

    let report = service.scan_cycle().await;
    assert_eq!(report.posts_scanned, 1);
    assert_eq!(report.summaries_written, 1);
    assert_eq!(report.failures, 0);
    assert!(!service.is_first_run());

    assert_eq!(
        ledger.tally("p1").await.unwrap(),
        VoteTally {
            positive: 2,
            neutral: 1,
            negative: 1,
        }
    );

    let op_vote = ledger.get_vote("p1", "op").await.unwrap().unwrap();
    assert_eq!(op_vote.comment_id, None);
    assert_eq!(op_vote.category, VoteCategory::Positive);
    assert!(ledger.get_vote("p1", BOT).await.unwrap().is_none());
    assert!(ledger.get_vote("p1", "dealvotebot").await.unwrap().is_none());

    let post = ledger.get_post("p1").await.unwrap().unwrap();
    assert_eq!(post.deal_url, "https://store.steampowered.com/app/1");
    assert!(post.summary_rendered_at.is_some());

    let state = forum.state.lock().unwrap();
    assert_eq!(state.replies.len(), 1);
    assert!(state.replies[0].1.contains("\n2|1|1\n"));
    assert_eq!(state.distinguished, vec!["bot1"]);
    assert!(state.edits.is_empty());
}

#[tokio::test]
async fn test_second_cycle_is_idempotent() {
    let forum = seeded_forum(Some("op"));
    let (mut service, ledger) = service_for(forum.clone()).await;

    service.scan_cycle().await;
    let visited_comments = service.visited().comment_count();
    let report = service.scan_cycle().await;

    assert_eq!(report.votes_recorded, 0);
    assert_eq!(report.summaries_written, 0);
    assert_eq!(service.visited().comment_count(), visited_comments);
    assert_eq!(ledger.tally("p1").await.unwrap().total(), 4);

    let state = forum.state.lock().unwrap();
    assert_eq!(state.replies.len(), 1);
    assert!(state.edits.is_empty());
}

#[tokio::test]
async fn test_new_vote_edits_existing_summary() {
    let forum = seeded_forum(Some("op"));
    let (mut service, ledger) = service_for(forum.clone()).await;
    service.scan_cycle().await;

    // alice changes her mind in a later reply.
    let later = chrono::Utc::now().timestamp() + 3600;
    forum.add_comment(
        "p1",
        comment("a2", "t1_a1", Some("alice"), "[NEGATIVE] refund denied", later),
    );
    let report = service.scan_cycle().await;

    assert_eq!(report.votes_recorded, 1);
    assert_eq!(report.summaries_written, 1);
    assert_eq!(
        ledger.tally("p1").await.unwrap(),
        VoteTally {
            positive: 1,
            neutral: 1,
            negative: 2,
        }
    );

    let state = forum.state.lock().unwrap();
    assert_eq!(state.replies.len(), 1);
    assert_eq!(state.edits.len(), 1);
    assert_eq!(state.edits[0].0, "bot1");
    assert!(state.edits[0].1.contains("\n1|1|2\n"));
}

#[tokio::test]
async fn test_incomplete_tree_is_not_traversed() {
    let forum = seeded_forum(Some("op"));
    forum.state.lock().unwrap().expansion_failures = u32::MAX;
    let (mut service, ledger) = service_for(forum.clone()).await;

    let report = service.scan_cycle().await;
    assert_eq!(report.incomplete_trees, 1);

    // Only the title vote made it; loaded comments were not walked.
    assert_eq!(
        ledger.tally("p1").await.unwrap(),
        VoteTally {
            positive: 1,
            neutral: 0,
            negative: 0,
        }
    );
    assert_eq!(service.visited().comment_count(), 0);
    assert_eq!(report.summaries_written, 1);
}

#[tokio::test]
async fn test_transient_expansion_failure_is_retried() {
    let forum = seeded_forum(Some("op"));
    forum.state.lock().unwrap().expansion_failures = 1;
    let (mut service, ledger) = service_for(forum).await;

    let report = service.scan_cycle().await;
    assert_eq!(report.incomplete_trees, 0);
    let dave = ledger.get_vote("p1", "dave").await.unwrap().unwrap();
    assert_eq!(dave.category, VoteCategory::Neutral);
}

#[tokio::test]
async fn test_deleted_author_post_still_counts_comments() {
    let forum = seeded_forum(None);
    let (mut service, ledger) = service_for(forum).await;

    service.scan_cycle().await;

    assert!(ledger.get_post("p1").await.unwrap().is_none());
    assert_eq!(ledger.tally("p1").await.unwrap().total(), 3);
}

#[tokio::test]
async fn test_listing_failure_keeps_first_run() {
    let forum = seeded_forum(Some("op"));
    forum.state.lock().unwrap().list_fails = true;
    let (mut service, _ledger) = service_for(forum.clone()).await;

    let report = service.scan_cycle().await;
    assert_eq!(report.failures, 1);
    assert_eq!(report.posts_scanned, 0);
    assert!(service.is_first_run());

    forum.state.lock().unwrap().list_fails = false;
    let report = service.scan_cycle().await;
    assert_eq!(report.summaries_written, 1);
}

#[tokio::test]
async fn test_run_once_stops_after_one_cycle() {
    let forum = seeded_forum(Some("op"));
    let (mut service, ledger) = service_for(forum).await;

    service.run(true).await;

    assert!(!service.is_first_run());
    assert_eq!(ledger.tally("p1").await.unwrap().total(), 4);
}

#[tokio::test]
async fn test_own_post_gets_no_row_or_title_vote() {
    let forum = seeded_forum(Some("DEALVOTEBOT"));
    let (mut service, ledger) = service_for(forum).await;

    service.scan_cycle().await;

    assert!(ledger.get_post("p1").await.unwrap().is_none());
    assert!(ledger.get_vote("p1", "DEALVOTEBOT").await.unwrap().is_none());
    assert!(ledger.get_vote("p1", "dealvotebot").await.unwrap().is_none());
    // alice, bob and dave only.
    assert_eq!(ledger.tally("p1").await.unwrap().total(), 3);
}

#[tokio::test]
async fn test_restart_edits_existing_summary() {
    let forum = seeded_forum(Some("op"));
    let (mut first, ledger) = service_for(forum.clone()).await;
    first.scan_cycle().await;

    let mut restarted = service_on(forum.clone(), ledger.clone());
    assert!(restarted.is_first_run());
    let report = restarted.scan_cycle().await;

    assert_eq!(report.summaries_written, 1);
    assert_eq!(ledger.tally("p1").await.unwrap().total(), 4);

    let state = forum.state.lock().unwrap();
    assert_eq!(state.replies.len(), 1);
    assert_eq!(state.distinguished, vec!["bot1"]);
    assert_eq!(state.edits.len(), 1);
    assert_eq!(state.edits[0].0, "bot1");
    assert!(state.edits[0].1.contains("\n2|1|1\n"));
}

#[tokio::test]
async fn test_restart_keeps_authors_later_comment_vote() {
    let forum = seeded_forum(Some("op"));
    forum.add_comment(
        "p1",
        comment("o", "t3_p1", Some("op"), "[Negative] price went up", SEEDED_AT + 50),
    );
    let (mut first, ledger) = service_for(forum.clone()).await;
    first.scan_cycle().await;

    let before = ledger.get_vote("p1", "op").await.unwrap().unwrap();
    assert_eq!(before.category, VoteCategory::Negative);
    assert_eq!(before.cast_at, SEEDED_AT + 50);

    // The title still classifies positive, and the tree cannot be loaded.
    forum.state.lock().unwrap().expansion_failures = u32::MAX;
    let mut restarted = service_on(forum.clone(), ledger.clone());
    let report = restarted.scan_cycle().await;
    assert_eq!(report.incomplete_trees, 1);
    assert_eq!(report.summaries_written, 1);

    let after = ledger.get_vote("p1", "op").await.unwrap().unwrap();
    assert_eq!(after, before);
    let expected = VoteTally {
        positive: 1,
        neutral: 1,
        negative: 2,
    };
    assert_eq!(ledger.tally("p1").await.unwrap(), expected);
    {
        let state = forum.state.lock().unwrap();
        let published = &state.edits.last().unwrap().1;
        assert!(published.contains("\n1|1|2\n"));
    }

    forum.state.lock().unwrap().expansion_failures = 0;
    let report = restarted.scan_cycle().await;
    assert_eq!(report.incomplete_trees, 0);
    assert_eq!(report.summaries_written, 0);
    assert_eq!(ledger.tally("p1").await.unwrap(), expected);
}

#[tokio::test]
async fn test_summary_behind_load_more_is_edited() {
    let forum = MockForum::with_post(
        deal_post(Some("op")),
        vec![
            comment("a", "t3_p1", Some("alice"), "[positive]", SEEDED_AT),
            more("m9", "t3_p1", &["old"]),
        ],
    );
    forum.add_expansion(
        "m9",
        vec![comment("old", "t3_p1", Some(BOT), "stale summary", SEEDED_AT)],
    );
    let forum = Arc::new(forum);
    let (mut service, _ledger) = service_for(forum.clone()).await;

    let report = service.scan_cycle().await;
    assert_eq!(report.summaries_written, 1);

    let state = forum.state.lock().unwrap();
    assert!(state.replies.is_empty());
    assert!(state.distinguished.is_empty());
    assert_eq!(state.edits.len(), 1);
    assert_eq!(state.edits[0].0, "old");
}
