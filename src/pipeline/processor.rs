//! Scoring processor — drives one pass over recent mail.
//!
//! Flow per message:
//! 1. Sender rules (fast, no LLM) → may skip
//! 2. Ledger check → skip messages already scored (unless processing all)
//! 3. `ScoringPolicy::classify` → score (never fails)
//! 4. `LabelDecisionEngine::decide` → ordered labels
//! 5. Apply each label independently; record only the ones that stuck
//! 6. Ledger upsert
//!
//! Mailbox listing and ledger failures abort the run. Model and label
//! failures never do.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ScorerConfig;
use crate::error::PipelineError;
use crate::mailbox::{Mailbox, Message};
use crate::pipeline::labels::LabelDecisionEngine;
use crate::pipeline::policy::ScoringPolicy;
use crate::pipeline::rules::RulesEngine;
use crate::pipeline::types::ScoreOutcome;
use crate::store::ProcessingLedger;

/// Granularity of interruptible sleeps.
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub fetched: usize,
    pub processed: usize,
    /// Processed with the fallback score.
    pub degraded: usize,
    pub skipped_processed: usize,
    pub skipped_sender: usize,
    /// Individual label applications the mailbox rejected.
    pub labels_failed: usize,
    /// Stopped early by the shutdown flag.
    pub interrupted: bool,
}

/// Result of scoring and labelling one message.
#[derive(Debug, Clone)]
pub struct ScoredMessage {
    pub id: String,
    pub outcome: ScoreOutcome,
    /// Labels the engine chose, in order.
    pub decided: Vec<String>,
    /// Labels the mailbox confirmed.
    pub applied: Vec<String>,
}

/// Scoring processor — owns the pipeline stages and their collaborators.
pub struct ScoringProcessor {
    mailbox: Arc<dyn Mailbox>,
    policy: ScoringPolicy,
    engine: LabelDecisionEngine,
    rules: RulesEngine,
    ledger: Arc<dyn ProcessingLedger>,
    max_results: usize,
    processing_delay: Duration,
    skip_processed: bool,
}

impl ScoringProcessor {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        policy: ScoringPolicy,
        engine: LabelDecisionEngine,
        rules: RulesEngine,
        ledger: Arc<dyn ProcessingLedger>,
        config: &ScorerConfig,
    ) -> Self {
        Self {
            mailbox,
            policy,
            engine,
            rules,
            ledger,
            max_results: config.max_results,
            processing_delay: config.processing_delay(),
            skip_processed: config.skip_processed,
        }
    }

    /// Rescore messages that already have a ledger entry.
    pub fn with_skip_processed(mut self, skip: bool) -> Self {
        self.skip_processed = skip;
        self
    }

    /// Process messages from the last `hours_back` hours.
    ///
    /// Checks `shutdown` between messages; an interrupted run does not
    /// update the last-processed time.
    pub async fn run_once(
        &self,
        hours_back: u32,
        shutdown: &AtomicBool,
    ) -> Result<RunSummary, PipelineError> {
        info!(hours_back, mailbox = self.mailbox.name(), "Starting scoring run");

        let messages = self
            .mailbox
            .list_recent_messages(hours_back, self.max_results)
            .await?;

        let mut summary = RunSummary {
            fetched: messages.len(),
            ..RunSummary::default()
        };

        for message in &messages {
            if shutdown.load(Ordering::Relaxed) {
                info!("Shutdown requested, stopping run early");
                summary.interrupted = true;
                break;
            }

            if let Some(rule) = self.rules.evaluate(message) {
                debug!(id = %message.id, rule = %rule.pattern, "Skipping sender");
                summary.skipped_sender += 1;
                continue;
            }

            if self.skip_processed && self.ledger.is_processed(&message.id).await? {
                info!(
                    id = %message.id,
                    subject = %preview(&message.subject, 50),
                    "Skipping already processed message"
                );
                summary.skipped_processed += 1;
                continue;
            }

            let scored = self.process_message(message).await?;
            summary.processed += 1;
            if scored.outcome.is_degraded() {
                summary.degraded += 1;
            }
            summary.labels_failed += scored.decided.len() - scored.applied.len();

            tokio::time::sleep(self.processing_delay).await;
        }

        if !summary.interrupted {
            self.ledger.set_last_processed_time(Utc::now()).await?;
        }

        info!(
            fetched = summary.fetched,
            processed = summary.processed,
            degraded = summary.degraded,
            skipped_processed = summary.skipped_processed,
            skipped_sender = summary.skipped_sender,
            labels_failed = summary.labels_failed,
            "Scoring run complete"
        );
        Ok(summary)
    }

    /// Score, label and record a single message.
    pub async fn process_message(&self, message: &Message) -> Result<ScoredMessage, PipelineError> {
        let outcome = self.policy.classify(message).await;
        let score = outcome.score();
        let decided = self.engine.decide(&score.category, score);
        let applied = self.apply_labels(&message.id, &decided).await;

        self.ledger.save(message, score, &applied).await?;

        info!(
            id = %message.id,
            subject = %preview(&message.subject, 50),
            outcome = outcome.label(),
            importance = score.importance_score,
            spam = score.spam_score,
            category = %score.category,
            confidence = score.confidence,
            labels = ?applied,
            "Scored message"
        );

        Ok(ScoredMessage {
            id: message.id.clone(),
            outcome,
            decided,
            applied,
        })
    }

    /// Attempt every label; return the ones the mailbox accepted, in order.
    async fn apply_labels(&self, message_id: &str, labels: &[String]) -> Vec<String> {
        let mut applied = Vec::with_capacity(labels.len());
        for label in labels {
            match self.mailbox.apply_label(message_id, label).await {
                Ok(()) => applied.push(label.clone()),
                Err(e) => {
                    warn!(id = %message_id, label = %label, error = %e, "Failed to apply label");
                }
            }
        }
        applied
    }

    /// Run until `shutdown` is set: a pass, then `interval`; `retry_delay`
    /// after a failed pass.
    pub async fn run_continuous(
        &self,
        hours_back: u32,
        interval: Duration,
        retry_delay: Duration,
        shutdown: &AtomicBool,
    ) {
        info!(
            "Continuous scoring started — checking every {}s",
            interval.as_secs()
        );

        while !shutdown.load(Ordering::Relaxed) {
            let pause = match self.run_once(hours_back, shutdown).await {
                Ok(_) => interval,
                Err(e) => {
                    error!(error = %e, "Scoring run failed, retrying in {}s", retry_delay.as_secs());
                    retry_delay
                }
            };
            sleep_unless_shutdown(pause, shutdown).await;
        }

        info!("Continuous scoring stopped");
    }
}

/// Spawn continuous scoring as a background task.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop after
/// the current message.
pub fn spawn_continuous(
    processor: Arc<ScoringProcessor>,
    config: &ScorerConfig,
    hours_back: u32,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    let interval = config.continuous_interval();
    let retry_delay = config.retry_delay();

    let handle = tokio::spawn(async move {
        processor
            .run_continuous(hours_back, interval, retry_delay, &shutdown)
            .await;
    });

    (handle, shutdown_flag)
}

/// Sleep for `duration`, waking early once `shutdown` is set.
async fn sleep_unless_shutdown(duration: Duration, shutdown: &AtomicBool) {
    let deadline = tokio::time::Instant::now() + duration;
    while !shutdown.load(Ordering::Relaxed) {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return;
        }
        tokio::time::sleep((deadline - now).min(SHUTDOWN_POLL)).await;
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
