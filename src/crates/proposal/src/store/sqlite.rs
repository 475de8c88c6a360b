//! SQLite persistence via `sqlx`.
//!
//! Timestamps are stored as RFC 3339 strings and section content as a JSON
//! document, one row per version record.

use super::{check_rating, check_transition, outcome_status, ProviderStore, VersionStore};
use crate::error::{ProposalError, Result};
use crate::model::{
    ContentSnapshot, SubjectId, VersionId, VersionOutcome, VersionRecord, VersionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use llm::UsageCounters;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Row shape of `proposal_versions`.
#[derive(Debug, FromRow)]
struct VersionRow {
    id: String,
    subject_id: i64,
    version_number: i64,
    requirements: String,
    content: String,
    provider_id: String,
    model_id: String,
    status: String,
    parent_version_id: Option<String>,
    generation_secs: f64,
    tokens_used: i64,
    quality_score: Option<f64>,
    user_rating: Option<i64>,
    feedback: Option<String>,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| ProposalError::storage(format!("bad id '{}': {}", value, e)))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ProposalError::storage(format!("bad timestamp '{}': {}", value, e)))
}

impl TryFrom<VersionRow> for VersionRecord {
    type Error = ProposalError;

    fn try_from(row: VersionRow) -> Result<Self> {
        let content: ContentSnapshot = serde_json::from_str(&row.content)?;
        let status = VersionStatus::from_str(&row.status).map_err(ProposalError::Storage)?;
        Ok(VersionRecord {
            id: parse_uuid(&row.id)?,
            subject_id: row.subject_id,
            version_number: row.version_number,
            requirements: row.requirements,
            content,
            provider_id: row.provider_id,
            model_id: row.model_id,
            status,
            parent_version_id: row.parent_version_id.as_deref().map(parse_uuid).transpose()?,
            generation_secs: row.generation_secs,
            tokens_used: row.tokens_used.max(0) as u64,
            quality_score: row.quality_score,
            user_rating: row.user_rating.map(|r| r.clamp(0, u8::MAX as i64) as u8),
            feedback: row.feedback,
            error_message: row.error_message,
            created_at: parse_time(&row.created_at)?,
            updated_at: parse_time(&row.updated_at)?,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

/// Version and usage store on a SQLite pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `database_url` and run
    /// migrations.
    ///
    /// # Arguments
    /// * `database_url` - SQLite connection string (e.g. "sqlite:bidwright.db" or "sqlite::memory:")
    ///
    /// # Returns
    /// A migrated store or a storage error
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // An in-memory database lives as long as its single connection.
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.run_migrations().await?;
        info!(database = database_url, "version store ready");
        Ok(store)
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn fetch(&self, id: VersionId) -> Result<VersionRecord> {
        self.get(id)
            .await?
            .ok_or_else(|| ProposalError::not_found(format!("version {}", id)))
    }

    /// Move `id` from `expected` to `next`, writing only the status-owned
    /// columns. Loses with [`ProposalError::ConcurrentUpdate`] when the stored
    /// status is no longer `expected`.
    async fn swap_status(
        &self,
        record: &VersionRecord,
        expected: VersionStatus,
        next: VersionStatus,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE proposal_versions SET status = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(record.id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ProposalError::ConcurrentUpdate {
                version_id: record.id,
            });
        }
        Ok(())
    }

    /// Set one annotation column. Other columns are left untouched so
    /// concurrent annotations of the same record never overwrite each other.
    async fn annotate(&self, id: VersionId, annotation: Annotation) -> Result<VersionRecord> {
        let now = Utc::now().to_rfc3339();
        let query = match annotation {
            Annotation::Rating(rating) => {
                sqlx::query("UPDATE proposal_versions SET user_rating = ?, updated_at = ? WHERE id = ?")
                    .bind(i64::from(rating))
            }
            Annotation::Feedback(feedback) => {
                sqlx::query("UPDATE proposal_versions SET feedback = ?, updated_at = ? WHERE id = ?")
                    .bind(feedback)
            }
        };
        let result = query
            .bind(now)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ProposalError::not_found(format!("version {}", id)));
        }
        self.fetch(id).await
    }
}

enum Annotation {
    Rating(u8),
    Feedback(String),
}

#[async_trait]
impl VersionStore for SqliteStore {
    async fn max_version_number(&self, subject_id: SubjectId) -> Result<i64> {
        let max = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(version_number), 0) FROM version_allocations WHERE subject_id = ?",
        )
        .bind(subject_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(max)
    }

    async fn reserve_version_number(&self, subject_id: SubjectId, version_number: i64) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO version_allocations (subject_id, version_number, allocated_at)
             VALUES (?, ?, ?)",
        )
        .bind(subject_id)
        .bind(version_number)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(subject_id, version_number, "version number reserved");
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(ProposalError::VersionConflict {
                subject_id,
                version_number,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, record: &VersionRecord) -> Result<()> {
        if let Some(parent) = record.parent_version_id {
            if self.get(parent).await?.is_none() {
                return Err(ProposalError::not_found(format!("parent version {}", parent)));
            }
        }

        let content = serde_json::to_string(&record.content)?;
        sqlx::query(
            "INSERT INTO proposal_versions
             (id, subject_id, version_number, requirements, content, provider_id, model_id,
              status, parent_version_id, generation_secs, tokens_used, quality_score,
              user_rating, feedback, error_message, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.subject_id)
        .bind(record.version_number)
        .bind(&record.requirements)
        .bind(&content)
        .bind(&record.provider_id)
        .bind(&record.model_id)
        .bind(record.status.as_str())
        .bind(record.parent_version_id.map(|p| p.to_string()))
        .bind(record.generation_secs)
        .bind(record.tokens_used as i64)
        .bind(record.quality_score)
        .bind(record.user_rating.map(i64::from))
        .bind(&record.feedback)
        .bind(&record.error_message)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: VersionId) -> Result<Option<VersionRecord>> {
        let row = sqlx::query_as::<_, VersionRow>("SELECT * FROM proposal_versions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(VersionRecord::try_from).transpose()
    }

    async fn list_for_subject(&self, subject_id: SubjectId) -> Result<Vec<VersionRecord>> {
        let rows = sqlx::query_as::<_, VersionRow>(
            "SELECT * FROM proposal_versions WHERE subject_id = ?
             ORDER BY version_number ASC, rowid ASC",
        )
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(VersionRecord::try_from).collect()
    }

    async fn finish(&self, id: VersionId, outcome: VersionOutcome) -> Result<VersionRecord> {
        let mut record = self.fetch(id).await?;
        let expected = record.status;
        check_transition(&record, outcome_status(&outcome))?;
        record.apply(outcome);
        record.updated_at = Utc::now();

        let content = serde_json::to_string(&record.content)?;
        let result = sqlx::query(
            "UPDATE proposal_versions
             SET content = ?, status = ?, generation_secs = ?, tokens_used = ?,
                 error_message = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(&content)
        .bind(record.status.as_str())
        .bind(record.generation_secs)
        .bind(record.tokens_used as i64)
        .bind(&record.error_message)
        .bind(record.updated_at.to_rfc3339())
        .bind(id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ProposalError::ConcurrentUpdate { version_id: id });
        }
        self.fetch(id).await
    }

    async fn set_status(&self, id: VersionId, status: VersionStatus) -> Result<VersionRecord> {
        let record = self.fetch(id).await?;
        check_transition(&record, status)?;
        self.swap_status(&record, record.status, status).await?;
        self.fetch(id).await
    }

    async fn set_rating(&self, id: VersionId, rating: u8) -> Result<VersionRecord> {
        check_rating(rating)?;
        self.annotate(id, Annotation::Rating(rating)).await
    }

    async fn set_feedback(&self, id: VersionId, feedback: &str) -> Result<VersionRecord> {
        self.annotate(id, Annotation::Feedback(feedback.to_string()))
            .await
    }
}

#[async_trait]
impl ProviderStore for SqliteStore {
    async fn record_usage(&self, provider_id: &str, success: bool, tokens: u64) -> Result<()> {
        sqlx::query(
            "INSERT INTO provider_usage
             (provider_id, total_calls, successful_calls, tokens_consumed, updated_at)
             VALUES (?, 1, ?, ?, ?)
             ON CONFLICT(provider_id) DO UPDATE SET
                 total_calls = total_calls + 1,
                 successful_calls = successful_calls + excluded.successful_calls,
                 tokens_consumed = tokens_consumed + excluded.tokens_consumed,
                 updated_at = excluded.updated_at",
        )
        .bind(provider_id)
        .bind(if success { 1_i64 } else { 0 })
        .bind(tokens as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn counters(&self, provider_id: &str) -> Result<UsageCounters> {
        let row = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT total_calls, successful_calls, tokens_consumed
             FROM provider_usage WHERE provider_id = ?",
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|(total, successful, tokens)| UsageCounters {
                total_calls: total.max(0) as u64,
                successful_calls: successful.max(0) as u64,
                tokens_consumed: tokens.max(0) as u64,
            })
            .unwrap_or_default())
    }
}
