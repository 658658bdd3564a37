use crate::context::BotContext;
use crate::traversal::expand_all_placeholders;
use chrono::{DateTime, Utc};
use dealvote_core::{same_user, CommentForest, CoreError, Post, VoteTally};
use tracing::{debug, info};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    /// Nothing changed since the last render.
    Fresh,
    Edited { comment_id: String },
    Posted { comment_id: String },
}

/// Markdown body of the summary reply.
pub fn render_summary(tally: &VoteTally, summary_link: &str, updated_at: DateTime<Utc>) -> String {
    format!(
        "#### *What do others think of this deal/vendor?*\n\n\
         Positive|Neutral|Negative\n\
         :--:|:--:|:--:\n\
         {}|{}|{}\n\n\
         ^(Tell us your experience! Include [Positive], [Neutral] or [Negative] in your comment!)\n\n \
         [^*What* ^*is* ^*this?*]({}) ^| ^(*Last updated at: {} UTC*)",
        tally.positive,
        tally.neutral,
        tally.negative,
        summary_link,
        updated_at.format(TIMESTAMP_FORMAT),
    )
}

/// The first cycle after startup rewrites every summary. Later cycles only
/// rewrite when a vote newer than the last render exists.
pub fn summary_is_stale(first_run: bool, last_vote: Option<i64>, rendered_at: Option<i64>) -> bool {
    if first_run {
        return true;
    }
    match (last_vote, rendered_at) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(vote), Some(rendered)) => vote > rendered,
    }
}

fn own_root_comment(forest: &CommentForest, identity: &str) -> Option<String> {
    forest
        .roots()
        .find(|c| c.author.as_deref().is_some_and(|a| same_user(a, identity)))
        .map(|c| c.id.clone())
}

/// Brings the post's summary reply up to date, editing the bot's existing
/// top-level comment or posting, distinguishing and stickying a new one.
pub async fn reconcile_summary(
    ctx: &BotContext,
    post: &Post,
    first_run: bool,
) -> Result<SummaryOutcome, CoreError> {
    let last_vote = ctx.ledger.last_vote_time(&post.id).await?;
    let rendered_at = ctx.ledger.summary_rendered_at(&post.id).await?;
    if !summary_is_stale(first_run, last_vote, rendered_at) {
        return Ok(SummaryOutcome::Fresh);
    }

    let tally = ctx.ledger.tally(&post.id).await?;
    let now = Utc::now();
    let body = render_summary(&tally, &ctx.settings.summary_link, now);

    let things = ctx.forum.comment_things(&post.id).await?;
    let mut forest = CommentForest::new(&post.id, things);
    let mut existing = own_root_comment(&forest, &ctx.identity);
    if existing.is_none() && forest.has_pending_roots() {
        // An unpinned summary can sit behind a top-level "load more".
        debug!(
            post_id = %post.id,
            pending = forest.pending_placeholders(),
            "Summary not on first page, loading full thread"
        );
        expand_all_placeholders(ctx.forum.as_ref(), &ctx.expansion, &post.id, &mut forest).await?;
        existing = own_root_comment(&forest, &ctx.identity);
    }

    let outcome = match existing {
        Some(comment_id) => {
            ctx.forum.edit_comment(&comment_id, &body).await?;
            SummaryOutcome::Edited { comment_id }
        }
        None => {
            let comment_id = ctx.forum.reply_to_post(&post.id, &body).await?;
            ctx.forum.distinguish_sticky(&comment_id).await?;
            SummaryOutcome::Posted { comment_id }
        }
    };

    if !ctx
        .ledger
        .mark_summary_rendered(&post.id, now.timestamp())
        .await?
    {
        debug!(post_id = %post.id, "No post row to stamp with render time");
    }

    info!(
        post_id = %post.id,
        positive = tally.positive,
        neutral = tally.neutral,
        negative = tally.negative,
        total = tally.total(),
        outcome = ?outcome,
        "Summary updated"
    );
    Ok(outcome)
}
