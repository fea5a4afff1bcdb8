//! libSQL backend — async `ProcessingLedger` implementation.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! RFC 3339 UTC; window filters go through `julianday()` so naive rows from
//! older ledgers compare by time, not by text.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::mailbox::Message;
use crate::pipeline::types::Score;
use crate::store::migrations;
use crate::store::traits::{LedgerEntry, LedgerStats, ProcessingLedger};

/// `processing_state` key for the last completed run.
const LAST_PROCESSED_KEY: &str = "last_processed";

/// Threshold for the report's high-importance and spam counts.
const STATS_HIGH_SCORE: f64 = 7.0;

const DEFAULT_POLICY_VERSION: &str = "v1.0";

/// libSQL ledger.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlLedger {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    policy_version: String,
}

impl LibSqlLedger {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let ledger = Self::from_database(db).await?;
        info!(path = %path.display(), "Ledger opened");
        Ok(ledger)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            policy_version: DEFAULT_POLICY_VERSION.to_string(),
        })
    }

    /// Tag stored with every saved entry.
    pub fn with_policy_version(mut self, version: impl Into<String>) -> Self {
        self.policy_version = version.into();
        self
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// `save` with an explicit processing time.
    pub async fn save_at(
        &self,
        message: &Message,
        score: &Score,
        labels_applied: &[String],
        processed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO email_scores (email_id, sender, subject, date_processed,
                    importance_score, spam_score, category, reasoning, confidence,
                    model_version, labels_applied)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT (email_id) DO UPDATE SET
                    sender = ?2, subject = ?3, date_processed = ?4,
                    importance_score = ?5, spam_score = ?6, category = ?7,
                    reasoning = ?8, confidence = ?9, model_version = ?10,
                    labels_applied = ?11",
                params![
                    message.id.as_str(),
                    message.sender.as_str(),
                    message.subject.as_str(),
                    format_timestamp(processed_at),
                    score.importance_score,
                    score.spam_score,
                    score.category.as_str(),
                    score.reasoning.as_str(),
                    score.confidence,
                    self.policy_version.as_str(),
                    labels_applied.join(","),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save: {e}")))?;

        debug!(id = %message.id, labels = labels_applied.len(), "Ledger entry saved");
        Ok(())
    }

    /// `stats` relative to an explicit "now".
    pub async fn stats_at(
        &self,
        days_back: u32,
        now: DateTime<Utc>,
    ) -> Result<LedgerStats, DatabaseError> {
        let since = window_start(now, days_back);
        let mut rows = self
            .conn()
            .query(
                "SELECT category,
                        COUNT(*),
                        AVG(confidence),
                        COUNT(CASE WHEN importance_score >= ?2 THEN 1 END),
                        COUNT(CASE WHEN spam_score >= ?2 THEN 1 END)
                 FROM email_scores
                 WHERE julianday(date_processed) >= julianday(?1)
                 GROUP BY category",
                params![format_timestamp(since), STATS_HIGH_SCORE],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("stats: {e}")))?;

        let mut stats = LedgerStats::default();
        let mut weighted_confidence = 0.0;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("stats: {e}")))?
        {
            let category: String = row
                .get::<Option<String>>(0)
                .ok()
                .flatten()
                .unwrap_or_default();
            let count = row_count(&row, 1)?;
            let avg_confidence: f64 = row.get::<Option<f64>>(2).ok().flatten().unwrap_or(0.0);

            stats.total += count;
            weighted_confidence += avg_confidence * count as f64;
            stats.high_importance_count += row_count(&row, 3)?;
            stats.spam_count += row_count(&row, 4)?;
            *stats.categories.entry(category).or_insert(0) += count;
        }

        if stats.total > 0 {
            stats.avg_confidence = weighted_confidence / stats.total as f64;
        }
        Ok(stats)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Start of a `days_back` window ending at `now`. Windows reaching past the
/// epoch (or past what `DateTime` can represent) cover the whole ledger.
fn window_start(now: DateTime<Utc>, days_back: u32) -> DateTime<Utc> {
    now.checked_sub_signed(TimeDelta::days(i64::from(days_back)))
        .map_or(DateTime::<Utc>::UNIX_EPOCH, |since| since.max(DateTime::<Utc>::UNIX_EPOCH))
}

/// Canonical write format: RFC 3339, UTC, microseconds, `Z` suffix.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    // Try RFC 3339 first (our canonical write format)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    // Naive timestamps (space or `T` separated), with or without fractional seconds
    for format in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ] {
        if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, format) {
            return ndt.and_utc();
        }
    }
    DateTime::<Utc>::MIN_UTC
}

fn row_count(row: &libsql::Row, idx: i32) -> Result<u64, DatabaseError> {
    let count: i64 = row
        .get(idx)
        .map_err(|e| DatabaseError::Query(format!("stats: column {idx}: {e}")))?;
    Ok(u64::try_from(count).unwrap_or(0))
}

fn split_labels(raw: Option<String>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Map a libsql Row to a LedgerEntry.
///
/// Column order: 0:email_id, 1:sender, 2:subject, 3:date_processed,
/// 4:importance_score, 5:spam_score, 6:category, 7:reasoning, 8:confidence,
/// 9:model_version, 10:labels_applied
fn row_to_entry(row: &libsql::Row) -> Result<LedgerEntry, libsql::Error> {
    let text = |idx: i32| -> Result<String, libsql::Error> {
        Ok(row.get::<Option<String>>(idx)?.unwrap_or_default())
    };
    let real = |idx: i32| -> Result<f64, libsql::Error> {
        Ok(row.get::<Option<f64>>(idx)?.unwrap_or(0.0))
    };

    Ok(LedgerEntry {
        email_id: text(0)?,
        sender: text(1)?,
        subject: text(2)?,
        processed_at: parse_datetime(&text(3)?),
        importance_score: real(4)?,
        spam_score: real(5)?,
        category: text(6)?,
        reasoning: text(7)?,
        confidence: real(8)?,
        policy_version: text(9)?,
        labels_applied: split_labels(row.get::<Option<String>>(10)?),
    })
}

#[async_trait]
impl ProcessingLedger for LibSqlLedger {
    async fn is_processed(&self, email_id: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM email_scores WHERE email_id = ?1",
                params![email_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("is_processed: {e}")))?;

        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(DatabaseError::Query(format!("is_processed: {e}"))),
        }
    }

    async fn save(
        &self,
        message: &Message,
        score: &Score,
        labels_applied: &[String],
    ) -> Result<(), DatabaseError> {
        self.save_at(message, score, labels_applied, Utc::now()).await
    }

    async fn get_entry(&self, email_id: &str) -> Result<Option<LedgerEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT email_id, sender, subject, date_processed, importance_score,
                        spam_score, category, reasoning, confidence, model_version,
                        labels_applied
                 FROM email_scores WHERE email_id = ?1",
                params![email_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_entry: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_entry(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_entry: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_entry: {e}"))),
        }
    }

    async fn stats(&self, days_back: u32) -> Result<LedgerStats, DatabaseError> {
        self.stats_at(days_back, Utc::now()).await
    }

    async fn last_processed_time(&self) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT value FROM processing_state WHERE key = ?1",
                params![LAST_PROCESSED_KEY],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("last_processed_time: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let value: Option<String> = row.get(0).ok().flatten();
                Ok(value.map(|v| parse_datetime(&v)))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("last_processed_time: {e}"))),
        }
    }

    async fn set_last_processed_time(&self, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO processing_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT (key) DO UPDATE SET value = ?2",
                params![LAST_PROCESSED_KEY, format_timestamp(at)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_last_processed_time: {e}")))?;
        Ok(())
    }
}
