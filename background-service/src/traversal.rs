//! Collects votes from a post's title and its complete comment tree.

use crate::context::BotContext;
use crate::dedup::VisitedSet;
use database::{PostRecord, VoteRecord};
use dealvote_core::{same_user, CommentForest, CoreError, Forum, Post, RetryExecutor};
use tracing::{debug, warn};

/// What one traversal pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraversalReport {
    pub first_visit: bool,
    pub comments_visited: usize,
    pub votes_recorded: usize,
    pub storage_failures: usize,
}

/// Expands placeholders until the forest is complete.
///
/// Each expansion goes through `executor`. When one cannot be completed the
/// placeholder is put back and the forest is reported incomplete; callers
/// must not traverse it.
pub async fn expand_all_placeholders(
    forum: &dyn Forum,
    executor: &RetryExecutor,
    post_id: &str,
    forest: &mut CommentForest,
) -> Result<(), CoreError> {
    while let Some(placeholder) = forest.next_placeholder() {
        let result = executor
            .execute("expand_placeholder", || {
                forum.expand_placeholder(post_id, &placeholder)
            })
            .await;

        match result {
            Ok(things) => {
                debug!(
                    post_id,
                    placeholder = %placeholder.id,
                    loaded = things.len(),
                    "Expanded placeholder"
                );
                forest.graft(things);
            }
            Err(exhausted) => {
                warn!(
                    post_id,
                    placeholder = %placeholder.id,
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "Giving up on comment tree"
                );
                forest.requeue(placeholder);
                return Err(CoreError::IncompleteCommentTree {
                    post_id: post_id.to_string(),
                    attempts: exhausted.attempts,
                });
            }
        }
    }
    Ok(())
}

/// Fetches a post's comment tree with every placeholder expanded.
pub async fn load_comment_forest(
    ctx: &BotContext,
    post_id: &str,
) -> Result<CommentForest, CoreError> {
    let forum = ctx.forum.as_ref();
    let things = ctx
        .expansion
        .execute("comment_things", || forum.comment_things(post_id))
        .await?;

    let mut forest = CommentForest::new(post_id, things);
    expand_all_placeholders(forum, &ctx.expansion, post_id, &mut forest).await?;
    debug!(post_id, comments = forest.len(), "Comment tree loaded");
    Ok(forest)
}

async fn record_post(ctx: &BotContext, post: &Post, author: &str) -> Result<(), CoreError> {
    let created = ctx
        .ledger
        .ensure_post(&PostRecord {
            id: post.id.clone(),
            author: author.to_string(),
            shortlink: post.permalink.clone(),
            title: post.title.clone(),
            deal_url: ctx.extractor.extract(&post.body),
            created_at: post.created_utc,
            summary_rendered_at: None,
        })
        .await?;
    if created {
        debug!(post_id = %post.id, "New post recorded");
    }

    if let Some(category) = ctx.title_classifier.classify(&post.title) {
        let written = ctx
            .ledger
            .record_vote_if_absent(&VoteRecord {
                post_id: post.id.clone(),
                comment_id: None,
                user: author.to_string(),
                category,
                cast_at: post.created_utc,
            })
            .await?;
        if written {
            debug!(post_id = %post.id, %category, "Title vote recorded");
        }
    }
    Ok(())
}

/// Records the title vote on first sighting, then the vote of every comment
/// not yet visited. Fails only when the comment tree could not be loaded
/// completely.
pub async fn collect_post_votes(
    ctx: &BotContext,
    visited: &mut VisitedSet,
    post: &Post,
) -> Result<TraversalReport, CoreError> {
    let mut report = TraversalReport::default();

    if visited.visit_post(&post.id) {
        report.first_visit = true;
        match post.author.as_deref() {
            Some(author) if !same_user(author, &ctx.identity) => {
                if let Err(e) = record_post(ctx, post, author).await {
                    warn!(post_id = %post.id, error = %e, "Failed to record post");
                    report.storage_failures += 1;
                }
            }
            _ => debug!(post_id = %post.id, "Skipping post row for deleted or own post"),
        }
    }

    let forest = load_comment_forest(ctx, &post.id).await?;

    for comment in forest.depth_first() {
        if visited.is_comment_visited(&comment.id) {
            continue;
        }
        let Some(author) = comment.author.as_deref() else {
            continue;
        };
        if same_user(author, &ctx.identity) {
            continue;
        }

        if let Some(category) = ctx.comment_classifier.classify(&comment.body) {
            let vote = VoteRecord {
                post_id: post.id.clone(),
                comment_id: Some(comment.id.clone()),
                user: author.to_string(),
                category,
                cast_at: comment.created_utc,
            };
            if let Err(e) = ctx.ledger.record_vote(&vote).await {
                // Left unvisited so the next cycle tries again.
                warn!(
                    post_id = %post.id,
                    comment_id = %comment.id,
                    error = %e,
                    "Failed to record comment vote"
                );
                report.storage_failures += 1;
                continue;
            }
            report.votes_recorded += 1;
        }

        visited.mark_comment(&comment.id);
        report.comments_visited += 1;
    }

    debug!(
        post_id = %post.id,
        comments = report.comments_visited,
        votes = report.votes_recorded,
        "Traversed post"
    );
    Ok(report)
}
