//! Mailbox capability — listing recent messages and applying labels.
//!
//! The scoring pipeline only sees the [`Mailbox`] trait. Transport details
//! (authentication, IMAP, label id resolution) stay in the adapters.

pub mod imap;

pub use imap::{GmailImapMailbox, ImapConfig};

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::MailboxError;

/// A fetched message. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Stable mailbox identifier; the ledger key.
    pub id: String,
    /// `From` header as displayed, e.g. `Alice <alice@example.com>`.
    pub sender: String,
    pub subject: String,
    /// `Date` header, as text.
    pub date: String,
    /// Cleaned plain-text body.
    pub body: String,
    /// Labels currently on the message.
    pub labels: Vec<String>,
    pub thread_id: String,
}

/// Trait for mailbox adapters — pure I/O, no scoring logic.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Adapter name (e.g. "gmail-imap").
    fn name(&self) -> &str;

    /// Messages received within the last `hours_back` hours, newest first.
    async fn list_recent_messages(
        &self,
        hours_back: u32,
        max_results: usize,
    ) -> Result<Vec<Message>, MailboxError>;

    /// Add one label to one message. Label names are resolved by the adapter.
    async fn apply_label(&self, message_id: &str, label: &str) -> Result<(), MailboxError>;
}

static QUOTE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"On .* wrote:").expect("static regex"));

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize a message body for the prompt: collapse whitespace and drop the
/// `On ... wrote:` quote header.
pub fn clean_body(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    QUOTE_HEADER.replace_all(&collapsed, "").trim().to_string()
}
