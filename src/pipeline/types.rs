//! Shared types for the scoring pipeline.

use serde::{Deserialize, Serialize};

/// Category tokens the model is asked to choose from.
///
/// The vocabulary is open: anything the model returns is kept verbatim.
pub mod category {
    pub const WORK: &str = "work";
    pub const PERSONAL: &str = "personal";
    pub const ORDERS: &str = "orders";
    pub const NEWSLETTER: &str = "newsletter";
    pub const PROMOTION: &str = "promotion";
    pub const SPAM: &str = "spam";
    pub const NOTIFICATION: &str = "notification";
    pub const TRAVEL: &str = "travel";
    pub const FINANCE: &str = "finance";
    pub const CALENDAR: &str = "calendar";
    pub const SOFTWARE_LICENSE: &str = "software_license";
    pub const UNKNOWN: &str = "unknown";

    /// The tokens listed in the classification prompt.
    pub const PROMPT_VOCABULARY: &[&str] = &[
        WORK,
        PERSONAL,
        ORDERS,
        NEWSLETTER,
        PROMOTION,
        SPAM,
        NOTIFICATION,
        TRAVEL,
        FINANCE,
        CALENDAR,
        SOFTWARE_LICENSE,
    ];
}

/// Confidence carried by the fallback score. Sits below every review threshold.
pub const FALLBACK_CONFIDENCE: f64 = 0.1;

/// Classification of one message.
///
/// Scores are not range-checked; consumers compare against thresholds only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Importance, nominally 0-10.
    pub importance_score: f64,
    /// Spam likelihood, nominally 0-10.
    pub spam_score: f64,
    /// Category token (see [`category`]).
    pub category: String,
    /// Model's explanation. May be empty.
    pub reasoning: String,
    /// Model's confidence, nominally 0.0-1.0.
    pub confidence: f64,
}

impl Score {
    /// The conservative score used when classification fails.
    pub fn fallback(cause: impl std::fmt::Display) -> Self {
        Self {
            importance_score: 5.0,
            spam_score: 0.0,
            category: category::UNKNOWN.to_string(),
            reasoning: format!("Error during scoring: {cause}"),
            confidence: FALLBACK_CONFIDENCE,
        }
    }
}

/// Result of scoring one message. Both arms carry a usable score.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    /// The model answered and the answer parsed.
    Parsed(Score),
    /// The call or the parse failed; `score` is the fallback.
    Degraded { score: Score, cause: String },
}

impl ScoreOutcome {
    pub fn degraded(cause: impl Into<String>) -> Self {
        let cause = cause.into();
        Self::Degraded {
            score: Score::fallback(&cause),
            cause,
        }
    }

    pub fn score(&self) -> &Score {
        match self {
            Self::Parsed(score) => score,
            Self::Degraded { score, .. } => score,
        }
    }

    pub fn into_score(self) -> Score {
        match self {
            Self::Parsed(score) => score,
            Self::Degraded { score, .. } => score,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Parsed(_) => "parsed",
            Self::Degraded { .. } => "degraded",
        }
    }
}
