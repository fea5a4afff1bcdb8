//! `ProcessingLedger` trait — the scorer's persistent record.
//!
//! One entry per message id, replaced on rescoring, plus a single audit slot
//! holding the time of the last completed run.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::mailbox::Message;
use crate::pipeline::types::Score;

/// A persisted scoring result.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub email_id: String,
    pub sender: String,
    pub subject: String,
    pub processed_at: DateTime<Utc>,
    pub importance_score: f64,
    pub spam_score: f64,
    pub category: String,
    pub reasoning: String,
    pub confidence: f64,
    pub policy_version: String,
    /// Labels the mailbox confirmed, in application order.
    pub labels_applied: Vec<String>,
}

/// Aggregates over a processing window. All zero when the window is empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerStats {
    pub total: u64,
    /// Mean confidence over every entry in the window.
    pub avg_confidence: f64,
    /// Entries with `importance_score >= 7`.
    pub high_importance_count: u64,
    /// Entries with `spam_score >= 7`.
    pub spam_count: u64,
    pub categories: BTreeMap<String, u64>,
}

/// Backend-agnostic ledger.
#[async_trait]
pub trait ProcessingLedger: Send + Sync {
    /// Whether an entry exists for this message id.
    async fn is_processed(&self, email_id: &str) -> Result<bool, DatabaseError>;

    /// Insert or replace the entry for `message.id`.
    async fn save(
        &self,
        message: &Message,
        score: &Score,
        labels_applied: &[String],
    ) -> Result<(), DatabaseError>;

    /// Fetch one entry.
    async fn get_entry(&self, email_id: &str) -> Result<Option<LedgerEntry>, DatabaseError>;

    /// Aggregates over entries processed in the last `days_back` days.
    async fn stats(&self, days_back: u32) -> Result<LedgerStats, DatabaseError>;

    async fn last_processed_time(&self) -> Result<Option<DateTime<Utc>>, DatabaseError>;

    async fn set_last_processed_time(&self, at: DateTime<Utc>) -> Result<(), DatabaseError>;
}
