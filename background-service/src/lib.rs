pub mod context;
pub mod dedup;
pub mod summary;
pub mod traversal;

pub use context::BotContext;
pub use dedup::VisitedSet;
pub use summary::{reconcile_summary, render_summary, summary_is_stale, SummaryOutcome};
pub use traversal::{collect_post_votes, expand_all_placeholders, TraversalReport};

use dealvote_core::CoreError;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Totals for one scan cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub posts_scanned: usize,
    pub votes_recorded: usize,
    pub summaries_written: usize,
    pub incomplete_trees: usize,
    pub failures: usize,
}

/// The sequential poll loop. Dedup state survives across cycles.
pub struct BackgroundService {
    ctx: BotContext,
    visited: VisitedSet,
    first_run: bool,
}

impl BackgroundService {
    pub fn new(ctx: BotContext) -> Self {
        Self {
            ctx,
            visited: VisitedSet::new(),
            first_run: true,
        }
    }

    pub fn context(&self) -> &BotContext {
        &self.ctx
    }

    pub fn visited(&self) -> &VisitedSet {
        &self.visited
    }

    pub fn is_first_run(&self) -> bool {
        self.first_run
    }

    /// Runs cycles until `run_duration` elapses, or a single cycle when
    /// `once` is set. Cycle errors are logged inside `scan_cycle`.
    pub async fn run(&mut self, once: bool) {
        let started = Instant::now();
        let run_duration = self.ctx.settings.run_duration();
        info!(
            subreddit = %self.ctx.settings.subreddit,
            identity = %self.ctx.identity,
            scan_limit = self.ctx.settings.scan_limit,
            "Starting poll loop"
        );

        loop {
            let report = self.scan_cycle().await;
            info!(
                posts = report.posts_scanned,
                votes = report.votes_recorded,
                summaries = report.summaries_written,
                incomplete = report.incomplete_trees,
                failures = report.failures,
                known_posts = self.visited.post_count(),
                known_comments = self.visited.comment_count(),
                "Cycle finished"
            );

            if once {
                break;
            }
            if run_duration.is_some_and(|limit| started.elapsed() >= limit) {
                info!("Run duration reached, stopping");
                break;
            }
            sleep(self.ctx.settings.cycle_delay()).await;
        }
    }

    pub async fn scan_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        let settings = &self.ctx.settings;

        let posts = match self
            .ctx
            .forum
            .newest_posts(&settings.subreddit, settings.scan_limit)
            .await
        {
            Ok(posts) => posts,
            Err(e) => {
                error!(subreddit = %settings.subreddit, error = %e, "Failed to list posts");
                report.failures += 1;
                return report;
            }
        };
        debug!(count = posts.len(), "Fetched newest posts");

        for (index, post) in posts.iter().enumerate() {
            if index > 0 {
                sleep(self.ctx.settings.post_delay()).await;
            }
            report.posts_scanned += 1;

            match collect_post_votes(&self.ctx, &mut self.visited, post).await {
                Ok(traversal) => {
                    report.votes_recorded += traversal.votes_recorded;
                    report.failures += traversal.storage_failures;
                }
                Err(CoreError::IncompleteCommentTree { .. }) => report.incomplete_trees += 1,
                Err(e) => {
                    warn!(post_id = %post.id, error = %e, "Comment traversal failed");
                    report.failures += 1;
                }
            }

            match reconcile_summary(&self.ctx, post, self.first_run).await {
                Ok(SummaryOutcome::Fresh) => {}
                Ok(_) => report.summaries_written += 1,
                Err(e) => {
                    warn!(post_id = %post.id, error = %e, "Summary update failed");
                    report.failures += 1;
                }
            }
        }

        if let Err(e) = self.ctx.ledger.compact().await {
            warn!(error = %e, "Ledger compaction failed");
            report.failures += 1;
        }
        self.first_run = false;

        report
    }
}
