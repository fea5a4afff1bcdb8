//! Pre-LLM sender rules.
//!
//! Runs before scoring to drop senders the user never wants classified.
//! Skipped messages cost no model call and leave no ledger entry.
//!
//! Pattern forms (case-insensitive):
//! - `user@example.com` → exact address
//! - `@example.com` or `example.com` → any address at that domain

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::mailbox::Message;

static ANGLE_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^<>\s]+@[^<>\s]+)>").expect("static regex"));

/// A single skip rule with a compiled regex.
#[derive(Debug, Clone)]
pub struct SkipRule {
    /// Pattern as configured.
    pub pattern: String,
    /// Compiled regex, matched against the bare sender address.
    pub regex: Regex,
}

/// Sender skip rules.
#[derive(Debug, Clone, Default)]
pub struct RulesEngine {
    skip_rules: Vec<SkipRule>,
}

impl RulesEngine {
    /// Create an empty rules engine.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build rules from configured sender patterns. Blank entries are ignored.
    pub fn from_skip_senders(patterns: &[String]) -> Result<Self, regex::Error> {
        let mut engine = Self::empty();
        for pattern in patterns {
            let pattern = pattern.trim();
            if !pattern.is_empty() {
                engine.add_skip_sender(pattern)?;
            }
        }
        Ok(engine)
    }

    /// Add a sender pattern (`user@host`, `@host`, or `host`).
    pub fn add_skip_sender(&mut self, pattern: &str) -> Result<(), regex::Error> {
        let source = if let Some(domain) = pattern.strip_prefix('@') {
            format!(r"(?i)@{}$", regex::escape(domain))
        } else if pattern.contains('@') {
            format!(r"(?i)^{}$", regex::escape(pattern))
        } else {
            format!(r"(?i)@{}$", regex::escape(pattern))
        };
        self.skip_rules.push(SkipRule {
            pattern: pattern.to_string(),
            regex: Regex::new(&source)?,
        });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.skip_rules.is_empty()
    }

    /// The first rule matching the message's sender, if any.
    pub fn evaluate(&self, message: &Message) -> Option<&SkipRule> {
        let address = sender_address(&message.sender);
        let rule = self.skip_rules.iter().find(|r| r.regex.is_match(address))?;
        debug!(
            id = %message.id,
            sender = %message.sender,
            rule = %rule.pattern,
            "Sender matched skip rule"
        );
        Some(rule)
    }
}

/// The bare address from `Name <user@host>`, or the trimmed input.
pub fn sender_address(sender: &str) -> &str {
    ANGLE_ADDRESS
        .captures(sender)
        .and_then(|c| c.get(1))
        .map_or_else(|| sender.trim(), |m| m.as_str())
}
