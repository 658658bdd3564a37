//! SQLite ledger of seen posts and the votes cast on them.

use dealvote_core::{CoreError, DatabaseError, VoteCategory, VoteTally};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

#[cfg(test)]
mod tests;

/// A post row. `summary_rendered_at` is ignored by [`Database::ensure_post`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRecord {
    pub id: String,
    pub author: String,
    pub shortlink: String,
    pub title: String,
    pub deal_url: String,
    pub created_at: i64,
    pub summary_rendered_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRecord {
    pub post_id: String,
    /// `None` for a vote cast through the post title.
    pub comment_id: Option<String>,
    pub user: String,
    pub category: VoteCategory,
    pub cast_at: i64,
}

pub struct Database {
    connection_string: String,
    pool: Option<SqlitePool>,
}

fn db_error(error: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db) = &error {
        // SQLITE_BUSY / SQLITE_LOCKED
        if matches!(db.code().as_deref(), Some("5") | Some("6")) {
            return CoreError::Database(DatabaseError::DatabaseLocked);
        }
    }
    CoreError::Database(DatabaseError::Sql(error))
}

impl Database {
    pub fn new(connection_string: String) -> Self {
        Self {
            connection_string,
            pool: None,
        }
    }

    pub async fn connect(&mut self) -> Result<(), CoreError> {
        let options = SqliteConnectOptions::from_str(&self.connection_string)
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        // Every write is a single autocommitted statement on one connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        info!("Connected to ledger at {}", self.connection_string);
        self.pool = Some(pool);
        Ok(())
    }

    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        sqlx::migrate!("./migrations")
            .run(self.pool()?)
            .await
            .map_err(|e| DatabaseError::MigrationFailed {
                migration: e.to_string(),
            })?;
        debug!("Ledger migrations applied");
        Ok(())
    }

    fn pool(&self) -> Result<&SqlitePool, CoreError> {
        self.pool.as_ref().ok_or_else(|| {
            CoreError::Database(DatabaseError::ConnectionFailed {
                reason: "database not connected".to_string(),
            })
        })
    }

    /// Inserts the post unless a row with its id exists. Returns whether a
    /// row was created.
    pub async fn ensure_post(&self, post: &PostRecord) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO posts (id, user, shortlink, title, deal_url, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&post.id)
        .bind(&post.author)
        .bind(&post.shortlink)
        .bind(&post.title)
        .bind(&post.deal_url)
        .bind(post.created_at)
        .execute(self.pool()?)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<PostRecord>, CoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, user, shortlink, title, deal_url, created_at, summary_rendered_at
            FROM posts
            WHERE id = ?
            "#,
        )
        .bind(post_id)
        .fetch_optional(self.pool()?)
        .await
        .map_err(db_error)?;

        row.map(|row| {
            Ok::<_, sqlx::Error>(PostRecord {
                id: row.try_get("id")?,
                author: row.try_get("user")?,
                shortlink: row.try_get("shortlink")?,
                title: row.try_get("title")?,
                deal_url: row.try_get("deal_url")?,
                created_at: row.try_get("created_at")?,
                summary_rendered_at: row.try_get("summary_rendered_at")?,
            })
        })
        .transpose()
        .map_err(db_error)
    }

    /// Inserts the vote or overwrites the user's existing vote on the post.
    /// The last observation wins; timestamps are not compared.
    pub async fn record_vote(&self, vote: &VoteRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO votes (post_id, comment_id, user, vote, cast_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(post_id, user) DO UPDATE SET
                comment_id = excluded.comment_id,
                vote = excluded.vote,
                cast_at = excluded.cast_at
            "#,
        )
        .bind(&vote.post_id)
        .bind(&vote.comment_id)
        .bind(&vote.user)
        .bind(vote.category.code())
        .bind(vote.cast_at)
        .execute(self.pool()?)
        .await
        .map_err(db_error)?;

        debug!(
            post_id = %vote.post_id,
            user = %vote.user,
            category = %vote.category,
            "Recorded vote"
        );
        Ok(())
    }

    /// Inserts `vote` only when the user has no vote on the post yet.
    /// Returns whether a row was written. Used for title votes, which must
    /// never displace a vote the author cast later in a comment.
    pub async fn record_vote_if_absent(&self, vote: &VoteRecord) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO votes (post_id, comment_id, user, vote, cast_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(post_id, user) DO NOTHING
            "#,
        )
        .bind(&vote.post_id)
        .bind(&vote.comment_id)
        .bind(&vote.user)
        .bind(vote.category.code())
        .bind(vote.cast_at)
        .execute(self.pool()?)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn get_vote(
        &self,
        post_id: &str,
        user: &str,
    ) -> Result<Option<VoteRecord>, CoreError> {
        let row = sqlx::query_as::<_, (String, Option<String>, String, i64, i64)>(
            r#"
            SELECT post_id, comment_id, user, vote, cast_at
            FROM votes
            WHERE post_id = ? AND user = ?
            "#,
        )
        .bind(post_id)
        .bind(user)
        .fetch_optional(self.pool()?)
        .await
        .map_err(db_error)?;

        row.map(|(post_id, comment_id, user, code, cast_at)| {
            Ok(VoteRecord {
                post_id,
                comment_id,
                user,
                category: category_from_code(code)?,
                cast_at,
            })
        })
        .transpose()
    }

    pub async fn count_by_category(
        &self,
        post_id: &str,
        category: VoteCategory,
    ) -> Result<u32, CoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM votes WHERE post_id = ? AND vote = ?")
                .bind(post_id)
                .bind(category.code())
                .fetch_one(self.pool()?)
                .await
                .map_err(db_error)?;
        Ok(count as u32)
    }

    pub async fn tally(&self, post_id: &str) -> Result<VoteTally, CoreError> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            "SELECT vote, COUNT(*) FROM votes WHERE post_id = ? GROUP BY vote",
        )
        .bind(post_id)
        .fetch_all(self.pool()?)
        .await
        .map_err(db_error)?;

        let mut tally = VoteTally::default();
        for (code, count) in rows {
            tally.set(category_from_code(code)?, count as u32);
        }
        Ok(tally)
    }

    /// Latest `cast_at` among the post's votes.
    pub async fn last_vote_time(&self, post_id: &str) -> Result<Option<i64>, CoreError> {
        sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(cast_at) FROM votes WHERE post_id = ?")
            .bind(post_id)
            .fetch_one(self.pool()?)
            .await
            .map_err(db_error)
    }

    /// `None` both when the post has no row and when no summary was written.
    pub async fn summary_rendered_at(&self, post_id: &str) -> Result<Option<i64>, CoreError> {
        let rendered = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT summary_rendered_at FROM posts WHERE id = ?",
        )
        .bind(post_id)
        .fetch_optional(self.pool()?)
        .await
        .map_err(db_error)?;
        Ok(rendered.flatten())
    }

    /// Returns whether a post row was updated.
    pub async fn mark_summary_rendered(&self, post_id: &str, at: i64) -> Result<bool, CoreError> {
        let result = sqlx::query("UPDATE posts SET summary_rendered_at = ? WHERE id = ?")
            .bind(at)
            .bind(post_id)
            .execute(self.pool()?)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    /// Reclaims free pages. Run between cycles, never inside a transaction.
    pub async fn compact(&self) -> Result<(), CoreError> {
        sqlx::query("VACUUM")
            .execute(self.pool()?)
            .await
            .map_err(db_error)?;
        debug!("Ledger compacted");
        Ok(())
    }

    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}

fn category_from_code(code: i64) -> Result<VoteCategory, CoreError> {
    VoteCategory::from_code(code).ok_or_else(|| {
        CoreError::Database(DatabaseError::InvalidValue {
            column: "votes.vote".to_string(),
            value: code,
        })
    })
}
