//! Configuration types.
//!
//! Everything the scoring core reads is carried in [`ScorerConfig`] and handed
//! to constructors explicitly. Values come from (lowest to highest priority)
//! built-in defaults, an optional JSON file named by `MAIL_SCORER_CONFIG`, and
//! individual `MAIL_SCORER_*` environment variables.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Decision thresholds for label selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Importance at or above this is high.
    pub importance_high: f64,
    /// Importance at or above this (and below high) is medium.
    pub importance_medium: f64,
    /// Spam score at or above this gets the spam label.
    pub spam: f64,
    /// Confidence strictly below this gets the review label.
    pub confidence: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            importance_high: 8.0,
            importance_medium: 5.0,
            spam: 7.0,
            confidence: 0.6,
        }
    }
}

/// Mailbox label names applied by the scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelNames {
    pub high_importance: String,
    pub medium_importance: String,
    pub low_importance: String,
    pub orders_shipping: String,
    pub likely_spam: String,
    pub needs_review: String,
}

impl Default for LabelNames {
    fn default() -> Self {
        Self {
            high_importance: "EmailScorer/High-Importance".to_string(),
            medium_importance: "EmailScorer/Medium-Importance".to_string(),
            low_importance: "EmailScorer/Low-Importance".to_string(),
            orders_shipping: "EmailScorer/Orders-Shipping".to_string(),
            likely_spam: "EmailScorer/Likely-Spam".to_string(),
            needs_review: "EmailScorer/Needs-Review".to_string(),
        }
    }
}

/// Scorer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub thresholds: Thresholds,
    pub labels: LabelNames,
    /// Hard cut on the body preview embedded in the prompt, in characters.
    pub body_preview_chars: usize,
    /// Sampling temperature for classification calls.
    pub temperature: f32,
    /// Output token limit for classification calls.
    pub max_tokens: u32,
    /// Default fetch window when the caller does not pass one.
    pub hours_back: u32,
    /// Maximum messages fetched per run.
    pub max_results: usize,
    /// Pause between messages, for external rate limits.
    pub processing_delay_ms: u64,
    /// Sleep between runs in continuous mode.
    pub continuous_interval_secs: u64,
    /// Sleep after a failed run in continuous mode.
    pub retry_delay_secs: u64,
    /// Skip messages that already have a ledger entry.
    pub skip_processed: bool,
    /// Window for the performance report.
    pub report_days_back: u32,
    /// Tag stored with every ledger entry.
    pub policy_version: String,
    /// Sender patterns never scored (`user@host`, `@host`, `host`).
    pub skip_senders: Vec<String>,
    /// Ledger database file.
    pub db_path: PathBuf,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            labels: LabelNames::default(),
            body_preview_chars: 1500,
            temperature: 0.1,
            max_tokens: 200,
            hours_back: 1,
            max_results: 100,
            processing_delay_ms: 100,
            continuous_interval_secs: 900, // 15 minutes
            retry_delay_secs: 60,
            skip_processed: true,
            report_days_back: 7,
            policy_version: "v1.0".to_string(),
            skip_senders: Vec::new(),
            db_path: PathBuf::from("./data/email_scores.db"),
        }
    }
}

impl ScorerConfig {
    /// Load from the optional JSON file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("MAIL_SCORER_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))
    }

    fn apply_overrides<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let t = &mut self.thresholds;
        override_parsed(lookup, "MAIL_SCORER_IMPORTANCE_HIGH", &mut t.importance_high)?;
        override_parsed(lookup, "MAIL_SCORER_IMPORTANCE_MEDIUM", &mut t.importance_medium)?;
        override_parsed(lookup, "MAIL_SCORER_SPAM_THRESHOLD", &mut t.spam)?;
        override_parsed(lookup, "MAIL_SCORER_CONFIDENCE_THRESHOLD", &mut t.confidence)?;

        let l = &mut self.labels;
        override_string(lookup, "MAIL_SCORER_LABEL_HIGH", &mut l.high_importance);
        override_string(lookup, "MAIL_SCORER_LABEL_MEDIUM", &mut l.medium_importance);
        override_string(lookup, "MAIL_SCORER_LABEL_LOW", &mut l.low_importance);
        override_string(lookup, "MAIL_SCORER_LABEL_ORDERS", &mut l.orders_shipping);
        override_string(lookup, "MAIL_SCORER_LABEL_SPAM", &mut l.likely_spam);
        override_string(lookup, "MAIL_SCORER_LABEL_REVIEW", &mut l.needs_review);

        override_parsed(lookup, "MAIL_SCORER_BODY_PREVIEW_CHARS", &mut self.body_preview_chars)?;
        override_parsed(lookup, "MAIL_SCORER_TEMPERATURE", &mut self.temperature)?;
        override_parsed(lookup, "MAIL_SCORER_MAX_TOKENS", &mut self.max_tokens)?;
        override_parsed(lookup, "MAIL_SCORER_HOURS_BACK", &mut self.hours_back)?;
        override_parsed(lookup, "MAIL_SCORER_MAX_RESULTS", &mut self.max_results)?;
        override_parsed(lookup, "MAIL_SCORER_PROCESSING_DELAY_MS", &mut self.processing_delay_ms)?;
        override_parsed(lookup, "MAIL_SCORER_INTERVAL_SECS", &mut self.continuous_interval_secs)?;
        override_parsed(lookup, "MAIL_SCORER_RETRY_DELAY_SECS", &mut self.retry_delay_secs)?;
        override_parsed(lookup, "MAIL_SCORER_SKIP_PROCESSED", &mut self.skip_processed)?;
        override_parsed(lookup, "MAIL_SCORER_REPORT_DAYS", &mut self.report_days_back)?;
        override_string(lookup, "MAIL_SCORER_POLICY_VERSION", &mut self.policy_version);

        if let Some(raw) = lookup("MAIL_SCORER_SKIP_SENDERS") {
            self.skip_senders = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(path) = lookup("MAIL_SCORER_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        if t.importance_medium > t.importance_high {
            return Err(ConfigError::InvalidValue {
                key: "thresholds.importance_medium".into(),
                message: format!(
                    "medium threshold {} is above high threshold {}",
                    t.importance_medium, t.importance_high
                ),
            });
        }
        if self.body_preview_chars == 0 {
            return Err(ConfigError::InvalidValue {
                key: "body_preview_chars".into(),
                message: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }

    pub fn continuous_interval(&self) -> Duration {
        Duration::from_secs(self.continuous_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        })?;
    }
    Ok(())
}

fn override_string<F>(lookup: &F, key: &str, slot: &mut String)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        let raw = raw.trim();
        if !raw.is_empty() {
            *slot = raw.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ScorerConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.thresholds, Thresholds::default());
        assert_eq!(config.thresholds.importance_high, 8.0);
        assert_eq!(config.thresholds.confidence, 0.6);
        assert_eq!(config.body_preview_chars, 1500);
        assert_eq!(config.labels.needs_review, "EmailScorer/Needs-Review");
        assert!(config.skip_processed);
        assert_eq!(config.continuous_interval(), Duration::from_secs(900));
        assert_eq!(config.processing_delay(), Duration::from_millis(100));
    }

    #[test]
    fn env_overrides_thresholds_and_labels() {
        let config = ScorerConfig::from_lookup(lookup_from(&[
            ("MAIL_SCORER_IMPORTANCE_HIGH", "9"),
            ("MAIL_SCORER_SPAM_THRESHOLD", " 6.5 "),
            ("MAIL_SCORER_LABEL_REVIEW", "Scorer/Check"),
            ("MAIL_SCORER_SKIP_PROCESSED", "false"),
        ]))
        .unwrap();
        assert_eq!(config.thresholds.importance_high, 9.0);
        assert_eq!(config.thresholds.spam, 6.5);
        assert_eq!(config.labels.needs_review, "Scorer/Check");
        assert!(!config.skip_processed);
    }

    #[test]
    fn skip_senders_split_on_commas() {
        let config = ScorerConfig::from_lookup(lookup_from(&[(
            "MAIL_SCORER_SKIP_SENDERS",
            "noreply@example.com, @social.example,, ",
        )]))
        .unwrap();
        assert_eq!(
            config.skip_senders,
            vec!["noreply@example.com".to_string(), "@social.example".to_string()]
        );
    }

    #[test]
    fn invalid_number_is_reported_with_key() {
        let err = ScorerConfig::from_lookup(lookup_from(&[(
            "MAIL_SCORER_CONFIDENCE_THRESHOLD",
            "high",
        )]))
        .unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => {
                assert_eq!(key, "MAIL_SCORER_CONFIDENCE_THRESHOLD")
            }
            other => panic!("Expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn medium_above_high_is_rejected() {
        let result = ScorerConfig::from_lookup(lookup_from(&[(
            "MAIL_SCORER_IMPORTANCE_MEDIUM",
            "9.5",
        )]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn json_file_then_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scorer.json");
        std::fs::write(
            &path,
            r#"{"thresholds": {"spam": 8.0}, "max_results": 25, "policy_version": "v2"}"#,
        )
        .unwrap();

        let path_str = path.to_string_lossy().to_string();
        let config = ScorerConfig::from_lookup(lookup_from(&[
            ("MAIL_SCORER_CONFIG", path_str.as_str()),
            ("MAIL_SCORER_MAX_RESULTS", "10"),
        ]))
        .unwrap();

        assert_eq!(config.thresholds.spam, 8.0);
        // Untouched keys inside a partially specified table keep defaults
        assert_eq!(config.thresholds.importance_high, 8.0);
        assert_eq!(config.policy_version, "v2");
        assert_eq!(config.max_results, 10);
    }

    #[test]
    fn malformed_json_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let path_str = path.to_string_lossy().to_string();
        let result = ScorerConfig::from_lookup(lookup_from(&[(
            "MAIL_SCORER_CONFIG",
            path_str.as_str(),
        )]));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
