//! Gmail mailbox over raw IMAP + TLS.
//!
//! Uses Gmail's IMAP extensions (`X-GM-MSGID`, `X-GM-THRID`, `X-GM-LABELS`)
//! so message ids and labels line up with what the web UI shows. One session
//! is kept open across calls and reopened after an I/O failure. All socket
//! work happens inside `spawn_blocking`.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, TimeDelta};
use mail_parser::MessageParser;
use regex::Regex;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::error::MailboxError;
use crate::mailbox::{Mailbox, Message, clean_body, strip_html};

// ── Configuration ───────────────────────────────────────────────────

/// IMAP connection settings.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Folder searched for recent mail.
    pub mailbox: String,
    pub timeout: Duration,
}

impl ImapConfig {
    /// Build config from environment variables.
    /// Returns `None` if `MAIL_SCORER_IMAP_HOST` is not set.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("MAIL_SCORER_IMAP_HOST").ok()?;

        let port: u16 = std::env::var("MAIL_SCORER_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let timeout_secs: u64 = std::env::var("MAIL_SCORER_IMAP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Some(Self {
            host,
            port,
            username: std::env::var("MAIL_SCORER_IMAP_USERNAME").unwrap_or_default(),
            password: SecretString::from(
                std::env::var("MAIL_SCORER_IMAP_PASSWORD").unwrap_or_default(),
            ),
            mailbox: std::env::var("MAIL_SCORER_IMAP_MAILBOX").unwrap_or_else(|_| "INBOX".into()),
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// Gmail adapter for the [`Mailbox`] trait.
pub struct GmailImapMailbox {
    config: ImapConfig,
    session: Arc<Mutex<Option<ImapSession>>>,
    /// Message id → UID, from the most recent listing.
    uid_index: Mutex<HashMap<String, u32>>,
}

impl GmailImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        Self {
            config,
            session: Arc::new(Mutex::new(None)),
            uid_index: Mutex::new(HashMap::new()),
        }
    }

    /// Run `op` against the shared session, opening it first if needed.
    async fn with_session<T, F>(&self, op: F) -> Result<T, MailboxError>
    where
        F: FnOnce(&mut ImapSession) -> Result<T, MailboxError> + Send + 'static,
        T: Send + 'static,
    {
        let config = self.config.clone();
        let slot = Arc::clone(&self.session);

        tokio::task::spawn_blocking(move || {
            let mut guard = slot.lock().map_err(lock_poisoned)?;
            if guard.is_none() {
                *guard = Some(ImapSession::open(&config)?);
            }
            let Some(session) = guard.as_mut() else {
                return Err(MailboxError::Command("IMAP session unavailable".into()));
            };
            let result = op(session);
            if matches!(result, Err(MailboxError::Io(_))) {
                // Connection state is unknown; reconnect next time
                *guard = None;
            }
            result
        })
        .await
        .map_err(|e| MailboxError::Command(format!("IMAP task failed: {e}")))?
    }

    /// Log out and drop the open session, if any.
    pub async fn close(&self) {
        let slot = Arc::clone(&self.session);
        let _ = tokio::task::spawn_blocking(move || {
            if let Ok(mut guard) = slot.lock()
                && let Some(mut session) = guard.take()
            {
                let _ = session.command("LOGOUT");
            }
        })
        .await;
    }
}

#[async_trait]
impl Mailbox for GmailImapMailbox {
    fn name(&self) -> &str {
        "gmail-imap"
    }

    async fn list_recent_messages(
        &self,
        hours_back: u32,
        max_results: usize,
    ) -> Result<Vec<Message>, MailboxError> {
        let since = search_start(Local::now(), hours_back);
        let fetched = self
            .with_session(move |session| session.fetch_since(since, max_results))
            .await?;

        let mut index = self.uid_index.lock().map_err(lock_poisoned)?;
        index.clear();
        let mut messages = Vec::with_capacity(fetched.len());
        for (uid, message) in fetched {
            index.insert(message.id.clone(), uid);
            messages.push(message);
        }

        info!(count = messages.len(), %since, "Fetched recent messages");
        Ok(messages)
    }

    async fn apply_label(&self, message_id: &str, label: &str) -> Result<(), MailboxError> {
        let uid = self
            .uid_index
            .lock()
            .map_err(lock_poisoned)?
            .get(message_id)
            .copied()
            .ok_or_else(|| MailboxError::UnknownMessage(message_id.to_string()))?;

        let command = format!("UID STORE {uid} +X-GM-LABELS ({})", quote(label));
        self.with_session(move |session| session.command(&command).map(|_| ()))
            .await
            .map_err(|e| MailboxError::LabelFailed {
                id: message_id.to_string(),
                label: label.to_string(),
                reason: e.to_string(),
            })?;

        debug!(id = %message_id, uid, label, "Label applied");
        Ok(())
    }
}

fn lock_poisoned<T>(_: PoisonError<T>) -> MailboxError {
    MailboxError::Command("IMAP state lock poisoned".into())
}

// ── Session ─────────────────────────────────────────────────────────

type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// One untagged server response with any literals it carried.
#[derive(Debug, Default)]
struct Untagged {
    text: String,
    literals: Vec<Vec<u8>>,
}

/// Blocking IMAP session, logged in with the folder selected.
struct ImapSession {
    stream: BufReader<TlsStream>,
    next_tag: u32,
}

impl ImapSession {
    fn open(config: &ImapConfig) -> Result<Self, MailboxError> {
        let connect_failed = |reason: String| MailboxError::ConnectFailed {
            host: config.host.clone(),
            reason,
        };

        let tcp = TcpStream::connect((config.host.as_str(), config.port))
            .map_err(|e| connect_failed(e.to_string()))?;
        tcp.set_read_timeout(Some(config.timeout))?;
        tcp.set_write_timeout(Some(config.timeout))?;

        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config =
            ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()
                .map_err(|e| connect_failed(e.to_string()))?
                .with_root_certificates(root_store)
                .with_no_client_auth();
        let server_name = rustls_pki_types::ServerName::try_from(config.host.clone())
            .map_err(|e| connect_failed(e.to_string()))?;
        let conn = ClientConnection::new(Arc::new(tls_config), server_name)
            .map_err(|e| connect_failed(e.to_string()))?;

        let mut session = Self {
            stream: BufReader::new(StreamOwned::new(conn, tcp)),
            next_tag: 1,
        };

        let greeting = session.read_response()?;
        if !greeting.text.starts_with("* OK") {
            return Err(connect_failed(format!("unexpected greeting: {}", greeting.text)));
        }

        let login = format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        );
        session
            .command(&login)
            .map_err(|e| match e {
                MailboxError::Command(_) => MailboxError::AuthFailed {
                    username: config.username.clone(),
                },
                other => other,
            })?;

        session.command(&format!("SELECT {}", quote(&config.mailbox)))?;
        debug!(host = %config.host, mailbox = %config.mailbox, "IMAP session opened");
        Ok(session)
    }

    /// Send a tagged command; return its untagged responses once tagged OK.
    fn command(&mut self, command: &str) -> Result<Vec<Untagged>, MailboxError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {command}\r\n").as_bytes())?;
        stream.flush()?;

        let mut responses = Vec::new();
        loop {
            let response = self.read_response()?;
            if let Some(status) = response
                .text
                .strip_prefix(tag.as_str())
                .and_then(|rest| rest.strip_prefix(' '))
            {
                if status.starts_with("OK") {
                    return Ok(responses);
                }
                return Err(MailboxError::Command(format!(
                    "{}: {status}",
                    command_verb(command)
                )));
            }
            responses.push(response);
        }
    }

    /// Read one logical response line, pulling in `{N}` literals as they appear.
    fn read_response(&mut self) -> Result<Untagged, MailboxError> {
        let mut response = Untagged::default();
        loop {
            let line = self.read_line()?;
            let line = line.trim_end_matches(['\r', '\n']);
            response.text.push_str(line);

            let Some(len) = literal_len(line) else {
                return Ok(response);
            };
            let mut literal = vec![0u8; len];
            self.stream.read_exact(&mut literal)?;
            response.literals.push(literal);
        }
    }

    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(MailboxError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "IMAP connection closed",
            )));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Messages received on or after `since`, newest first, paired with their UIDs.
    fn fetch_since(
        &mut self,
        since: NaiveDate,
        max_results: usize,
    ) -> Result<Vec<(u32, Message)>, MailboxError> {
        let responses = self.command(&search_since(since))?;
        let uids = newest(parse_search(&responses), max_results);
        debug!(count = uids.len(), "IMAP search complete");

        let mut fetched = Vec::with_capacity(uids.len());
        for uid in uids {
            let responses = match self.command(&format!(
                "UID FETCH {uid} (X-GM-MSGID X-GM-THRID X-GM-LABELS BODY.PEEK[])"
            )) {
                Ok(responses) => responses,
                Err(MailboxError::Command(reason)) => {
                    warn!(uid, %reason, "Fetch failed, skipping message");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let Some(fetch) = responses
                .iter()
                .find(|r| r.text.contains(" FETCH ") && !r.literals.is_empty())
            else {
                warn!(uid, "No message body in FETCH response");
                continue;
            };

            let attrs = parse_fetch_attrs(&fetch.text);
            match message_from_rfc822(uid, &attrs, &fetch.literals[0]) {
                Some(message) => fetched.push((uid, message)),
                None => warn!(uid, "Unparseable message, skipping"),
            }
        }
        Ok(fetched)
    }
}

// ── Protocol helpers ────────────────────────────────────────────────

static MSGID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"X-GM-MSGID (\d+)").expect("static regex"));
static THRID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"X-GM-THRID (\d+)").expect("static regex"));
static LABELS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"X-GM-LABELS \(([^)]*)\)").expect("static regex"));

/// Gmail attributes from a FETCH response line.
#[derive(Debug, Default, PartialEq)]
struct FetchAttrs {
    msgid: Option<u64>,
    thrid: Option<u64>,
    labels: Vec<String>,
}

/// Byte count of a trailing `{N}` literal marker.
fn literal_len(line: &str) -> Option<usize> {
    let inner = line.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].parse().ok()
}

/// IMAP quoted string.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// First words of a command, safe to log (never includes LOGIN's password).
fn command_verb(command: &str) -> String {
    command.split_whitespace().take(2).collect::<Vec<_>>().join(" ")
}

/// Local day `hours_back` hours before `now`, no earlier than 1970-01-01.
fn search_start(now: DateTime<Local>, hours_back: u32) -> NaiveDate {
    let floor = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN);
    now.checked_sub_signed(TimeDelta::hours(i64::from(hours_back)))
        .map_or(floor, |since| since.date_naive().max(floor))
}

fn search_since(date: NaiveDate) -> String {
    format!("UID SEARCH SINCE {}", date.format("%d-%b-%Y"))
}

fn parse_search(responses: &[Untagged]) -> Vec<u32> {
    responses
        .iter()
        .filter_map(|r| r.text.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()))
        .collect()
}

/// The `max` highest UIDs, highest first. UIDs grow with arrival order.
fn newest(mut uids: Vec<u32>, max: usize) -> Vec<u32> {
    uids.sort_unstable();
    uids.dedup();
    uids.into_iter().rev().take(max).collect()
}

fn parse_fetch_attrs(text: &str) -> FetchAttrs {
    let number = |re: &Regex| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    };
    FetchAttrs {
        msgid: number(&MSGID),
        thrid: number(&THRID),
        labels: LABELS
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| parse_label_list(m.as_str()))
            .unwrap_or_default(),
    }
}

/// Split a label list body into quoted strings and atoms.
fn parse_label_list(list: &str) -> Vec<String> {
    let mut labels = Vec::new();
    let mut chars = list.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            let mut label = String::new();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            label.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => label.push(c),
                }
            }
            labels.push(label);
        } else {
            let mut label = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                label.push(c);
                chars.next();
            }
            labels.push(label);
        }
    }
    labels
}

/// Build a [`Message`] from a raw RFC 822 literal.
fn message_from_rfc822(uid: u32, attrs: &FetchAttrs, raw: &[u8]) -> Option<Message> {
    let parsed = MessageParser::default().parse(raw)?;

    let id = attrs
        .msgid
        .map(|m| format!("{m:x}"))
        .unwrap_or_else(|| format!("uid-{uid}"));
    let thread_id = attrs.thrid.map(|t| format!("{t:x}")).unwrap_or_default();

    Some(Message {
        id,
        sender: format_sender(&parsed),
        subject: parsed.subject().unwrap_or("(no subject)").to_string(),
        date: format_date(&parsed),
        body: clean_body(&extract_text(&parsed)),
        labels: attrs.labels.clone(),
        thread_id,
    })
}

/// `Name <address>` when a display name exists, else the bare address.
fn format_sender(parsed: &mail_parser::Message) -> String {
    let Some(addr) = parsed.from().and_then(|a| a.first()) else {
        return "unknown".into();
    };
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) => format!("{name} <{address}>"),
        (None, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => "unknown".into(),
    }
}

/// Date header normalized to UTC, RFC 2822 form.
fn format_date(parsed: &mail_parser::Message) -> String {
    parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .map(|utc| utc.to_rfc2822())
        .unwrap_or_default()
}

/// Readable text: the plain part, else the HTML part with tags stripped.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &[u8] = b"From: Alice Example <alice@example.com>\r\n\
To: me@example.com\r\n\
Subject: Quarterly numbers\r\n\
Date: Mon, 19 Oct 2026 11:15:00 +0200\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Hi,\r\n\
\r\n\
Numbers   attached.\r\n";

    const HTML_ONLY: &[u8] = b"From: shop@store.example\r\n\
Subject: Your order has shipped\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<html><body><p>Order <b>#123</b> shipped.</p></body></html>\r\n";

    #[test]
    fn literal_len_detects_trailing_marker() {
        assert_eq!(literal_len("* 3 FETCH (UID 7 BODY[] {342}"), Some(342));
        assert_eq!(literal_len("* 3 FETCH (UID 7)"), None);
        assert_eq!(literal_len("{abc}"), None);
    }

    #[test]
    fn quote_escapes_specials() {
        assert_eq!(quote("EmailScorer/High"), "\"EmailScorer/High\"");
        assert_eq!(quote(r#"a"b\c"#), r#""a\"b\\c""#);
    }

    #[test]
    fn command_verb_hides_password() {
        assert_eq!(command_verb("LOGIN \"me\" \"secret\""), "LOGIN \"me\"");
        assert_eq!(command_verb("UID STORE 5 +X-GM-LABELS (\"x\")"), "UID STORE");
    }

    #[test]
    fn search_since_uses_imap_date() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 5).unwrap();
        assert_eq!(search_since(date), "UID SEARCH SINCE 05-Oct-2026");
    }

    #[test]
    fn search_start_steps_back_whole_hours() {
        let now = Local::now();
        assert_eq!(search_start(now, 0), now.date_naive());
        assert_eq!(
            search_start(now, 48),
            (now - TimeDelta::hours(48)).date_naive()
        );
    }

    #[test]
    fn search_start_clamps_huge_windows() {
        let floor = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        assert_eq!(search_start(Local::now(), u32::MAX), floor);
        assert_eq!(
            search_since(search_start(Local::now(), u32::MAX)),
            "UID SEARCH SINCE 01-Jan-1970"
        );
    }

    #[test]
    fn parse_search_collects_uids() {
        let responses = vec![
            Untagged {
                text: "* SEARCH 4 9 12".into(),
                literals: vec![],
            },
            Untagged {
                text: "* 20 EXISTS".into(),
                literals: vec![],
            },
        ];
        assert_eq!(parse_search(&responses), vec![4, 9, 12]);
    }

    #[test]
    fn parse_search_empty_result() {
        let responses = vec![Untagged {
            text: "* SEARCH".into(),
            literals: vec![],
        }];
        assert!(parse_search(&responses).is_empty());
    }

    #[test]
    fn newest_keeps_highest_uids_first() {
        assert_eq!(newest(vec![3, 10, 7, 1, 10], 3), vec![10, 7, 3]);
        assert_eq!(newest(vec![2, 1], 5), vec![2, 1]);
        assert!(newest(vec![1, 2], 0).is_empty());
    }

    #[test]
    fn fetch_attrs_from_gmail_response() {
        let text = r#"* 12 FETCH (X-GM-THRID 1781234567890123456 X-GM-MSGID 1781234567890123457 X-GM-LABELS ("\\Important" "EmailScorer/Low-Importance" Work) UID 345 BODY[] {2048}"#;
        let attrs = parse_fetch_attrs(text);
        assert_eq!(attrs.msgid, Some(1781234567890123457));
        assert_eq!(attrs.thrid, Some(1781234567890123456));
        assert_eq!(
            attrs.labels,
            vec!["\\Important", "EmailScorer/Low-Importance", "Work"]
        );
    }

    #[test]
    fn fetch_attrs_missing_extensions() {
        let attrs = parse_fetch_attrs("* 1 FETCH (UID 9 BODY[] {10}");
        assert_eq!(attrs, FetchAttrs::default());
    }

    #[test]
    fn empty_label_list() {
        assert!(parse_label_list("").is_empty());
    }

    #[test]
    fn message_from_plain_rfc822() {
        let attrs = FetchAttrs {
            msgid: Some(255),
            thrid: Some(16),
            labels: vec!["\\Inbox".into()],
        };
        let message = message_from_rfc822(42, &attrs, PLAIN).unwrap();
        assert_eq!(message.id, "ff");
        assert_eq!(message.thread_id, "10");
        assert_eq!(message.sender, "Alice Example <alice@example.com>");
        assert_eq!(message.subject, "Quarterly numbers");
        assert_eq!(message.date, "Mon, 19 Oct 2026 09:15:00 +0000");
        assert_eq!(message.body, "Hi, Numbers attached.");
        assert_eq!(message.labels, vec!["\\Inbox".to_string()]);
    }

    #[test]
    fn message_from_html_only_rfc822_falls_back_to_uid() {
        let message = message_from_rfc822(7, &FetchAttrs::default(), HTML_ONLY).unwrap();
        assert_eq!(message.id, "uid-7");
        assert!(message.thread_id.is_empty());
        assert_eq!(message.sender, "shop@store.example");
        assert!(message.body.contains("Order #123 shipped."));
        assert!(!message.body.contains('<'));
        assert!(message.date.is_empty());
    }

    #[test]
    fn config_from_env_returns_none_when_no_host() {
        if std::env::var("MAIL_SCORER_IMAP_HOST").is_err() {
            assert!(ImapConfig::from_env().is_none());
        }
    }
}
