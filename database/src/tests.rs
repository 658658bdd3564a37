use crate::{Database, PostRecord, VoteRecord};
use dealvote_core::{CoreError, DatabaseError, VoteCategory, VoteTally};
use std::env;

async fn setup_test_db() -> Database {
    let db_path = env::temp_dir().join(format!("test_dealvote_{}.db", uuid::Uuid::new_v4()));
    let db_url = format!("sqlite://{}", db_path.display());

    let mut db = Database::new(db_url);
    db.connect()
        .await
        .expect("Failed to connect to test database");
    db.run_migrations().await.expect("Failed to run migrations");

    db
}

fn post(id: &str) -> PostRecord {
    PostRecord {
        id: id.to_string(),
        author: "op".to_string(),
        shortlink: format!("https://redd.it/{id}"),
        title: "[Steam] Some Game (50% off)".to_string(),
        deal_url: "https://store.steampowered.com/app/1".to_string(),
        created_at: 1_700_000_000,
        summary_rendered_at: None,
    }
}

fn vote(post_id: &str, user: &str, category: VoteCategory, cast_at: i64) -> VoteRecord {
    VoteRecord {
        post_id: post_id.to_string(),
        comment_id: Some(format!("c_{user}")),
        user: user.to_string(),
        category,
        cast_at,
    }
}

#[tokio::test]
async fn test_unconnected_database_errors() {
    let db = Database::new("sqlite::memory:".to_string());
    let err = db.tally("p1").await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Database(DatabaseError::ConnectionFailed { .. })
    ));
}

#[tokio::test]
async fn test_ensure_post_is_create_if_absent() {
    let db = setup_test_db().await;

    assert!(db.ensure_post(&post("p1")).await.unwrap());

    let mut changed = post("p1");
    changed.title = "edited title".to_string();
    assert!(!db.ensure_post(&changed).await.unwrap());

    let stored = db.get_post("p1").await.unwrap().unwrap();
    assert_eq!(stored, post("p1"));
    assert!(db.get_post("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_one_vote_per_user_last_write_wins() {
    let db = setup_test_db().await;

    db.record_vote(&vote("p1", "alice", VoteCategory::Positive, 100))
        .await
        .unwrap();
    db.record_vote(&vote("p1", "alice", VoteCategory::Negative, 50))
        .await
        .unwrap();

    let stored = db.get_vote("p1", "alice").await.unwrap().unwrap();
    assert_eq!(stored.category, VoteCategory::Negative);
    // No timestamp comparison: the older observation still overwrote.
    assert_eq!(stored.cast_at, 50);

    assert_eq!(
        db.count_by_category("p1", VoteCategory::Positive).await.unwrap(),
        0
    );
    assert_eq!(
        db.count_by_category("p1", VoteCategory::Negative).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_comment_vote_replaces_title_vote() {
    let db = setup_test_db().await;

    let mut title_vote = vote("p1", "op", VoteCategory::Positive, 10);
    title_vote.comment_id = None;
    db.record_vote(&title_vote).await.unwrap();
    db.record_vote(&vote("p1", "op", VoteCategory::Neutral, 20))
        .await
        .unwrap();

    let stored = db.get_vote("p1", "op").await.unwrap().unwrap();
    assert_eq!(stored.comment_id.as_deref(), Some("c_op"));
    assert_eq!(stored.category, VoteCategory::Neutral);
}

#[tokio::test]
async fn test_title_vote_never_displaces_existing_vote() {
    let db = setup_test_db().await;

    let mut title_vote = vote("p1", "op", VoteCategory::Positive, 10);
    title_vote.comment_id = None;
    assert!(db.record_vote_if_absent(&title_vote).await.unwrap());

    db.record_vote(&vote("p1", "op", VoteCategory::Negative, 20))
        .await
        .unwrap();
    assert!(!db.record_vote_if_absent(&title_vote).await.unwrap());

    let stored = db.get_vote("p1", "op").await.unwrap().unwrap();
    assert_eq!(stored.category, VoteCategory::Negative);
    assert_eq!(stored.cast_at, 20);
    assert_eq!(stored.comment_id.as_deref(), Some("c_op"));
}

#[tokio::test]
async fn test_tally_and_last_vote_time() {
    let db = setup_test_db().await;

    assert_eq!(db.tally("p1").await.unwrap(), VoteTally::default());
    assert_eq!(db.last_vote_time("p1").await.unwrap(), None);

    db.record_vote(&vote("p1", "a", VoteCategory::Positive, 10))
        .await
        .unwrap();
    db.record_vote(&vote("p1", "b", VoteCategory::Positive, 30))
        .await
        .unwrap();
    db.record_vote(&vote("p1", "c", VoteCategory::Negative, 20))
        .await
        .unwrap();
    db.record_vote(&vote("p2", "a", VoteCategory::Neutral, 99))
        .await
        .unwrap();

    assert_eq!(
        db.tally("p1").await.unwrap(),
        VoteTally {
            positive: 2,
            neutral: 0,
            negative: 1,
        }
    );
    assert_eq!(db.last_vote_time("p1").await.unwrap(), Some(30));
}

#[tokio::test]
async fn test_summary_rendered_at_roundtrip() {
    let db = setup_test_db().await;
    db.ensure_post(&post("p1")).await.unwrap();

    assert_eq!(db.summary_rendered_at("p1").await.unwrap(), None);
    assert!(db.mark_summary_rendered("p1", 500).await.unwrap());
    assert_eq!(db.summary_rendered_at("p1").await.unwrap(), Some(500));

    // Posts without a row have nothing to mark.
    assert!(!db.mark_summary_rendered("ghost", 500).await.unwrap());
    assert_eq!(db.summary_rendered_at("ghost").await.unwrap(), None);
}

#[tokio::test]
async fn test_compact_keeps_data() {
    let db = setup_test_db().await;
    db.ensure_post(&post("p1")).await.unwrap();
    db.record_vote(&vote("p1", "a", VoteCategory::Neutral, 1))
        .await
        .unwrap();

    db.compact().await.unwrap();

    assert_eq!(
        db.count_by_category("p1", VoteCategory::Neutral).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let db = setup_test_db().await;
    db.run_migrations().await.unwrap();
}
