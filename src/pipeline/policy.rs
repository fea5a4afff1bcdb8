//! Scoring policy — prompt construction around the response interpreter.
//!
//! `classify` always yields a usable score. A failed model call or an
//! unparseable answer becomes [`ScoreOutcome::Degraded`] carrying the
//! fallback score, so one bad response never aborts a run.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ScorerConfig;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::mailbox::Message;
use crate::pipeline::interpreter::interpret;
use crate::pipeline::types::{ScoreOutcome, category};

/// Characters of raw model output included in debug logs.
const RAW_PREVIEW_CHARS: usize = 200;

const SYSTEM_PROMPT: &str =
    "You are a precise email classifier. Respond with JSON only, no thinking or explanation.";

/// Classifies one message at a time with the configured model.
pub struct ScoringPolicy {
    llm: Arc<dyn LlmProvider>,
    body_preview_chars: usize,
    temperature: f32,
    max_tokens: u32,
}

impl ScoringPolicy {
    pub fn new(llm: Arc<dyn LlmProvider>, config: &ScorerConfig) -> Self {
        Self {
            llm,
            body_preview_chars: config.body_preview_chars,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Score a message. Never fails.
    pub async fn classify(&self, message: &Message) -> ScoreOutcome {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(build_user_prompt(message, self.body_preview_chars)),
        ])
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens);

        let response = match self.llm.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(id = %message.id, error = %e, "Completion failed, using fallback score");
                return ScoreOutcome::degraded(e.to_string());
            }
        };

        let raw = response.content;
        let preview: String = raw.chars().take(RAW_PREVIEW_CHARS).collect();
        debug!(id = %message.id, raw_len = raw.len(), raw_preview = %preview, "Model response");

        match interpret(&raw) {
            Ok(score) => ScoreOutcome::Parsed(score),
            Err(e) => {
                warn!(
                    id = %message.id,
                    error = %e,
                    raw_preview = %preview,
                    "Unparseable model response, using fallback score"
                );
                ScoreOutcome::degraded(e.to_string())
            }
        }
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// Build the classification prompt. The body is cut at `preview_chars`
/// characters, mid-word if need be.
fn build_user_prompt(message: &Message, preview_chars: usize) -> String {
    let body_preview: String = message.body.chars().take(preview_chars).collect();
    let categories = category::PROMPT_VOCABULARY.join("|");

    format!(
        "Classify this email and provide scores. Be consistent and practical.\n\n\
         SENDER: {sender}\n\
         SUBJECT: {subject}\n\
         DATE: {date}\n\
         CONTENT: {body_preview}\n\n\
         Provide scores as JSON:\n\
         {{\n    \
         \"importance_score\": 0-10,\n    \
         \"spam_score\": 0-10,\n    \
         \"category\": \"{categories}\",\n    \
         \"reasoning\": \"brief explanation\",\n    \
         \"confidence\": 0.0-1.0\n\
         }}\n\n\
         Scoring Guidelines:\n\
         - Work emails from colleagues/clients = 7-9 importance\n\
         - Orders/shipping/deliveries = 6-7 importance (Amazon, retailers, UPS/FedEx/USPS, tracking)\n\
         - Travel emails (flights, hotels, itineraries) = 7-9 importance\n\
         - Finance emails (banking, payments, invoices) = 7-9 importance\n\
         - Calendar/Events (meetings, invites, RSVPs) = 6-8 importance\n\
         - Software License emails (activation keys, digital licenses) = 7-9 importance\n\
         - Personal emails from friends/family = 6-8 importance\n\
         - Automated notifications = 3-5 importance\n\
         - Newsletters/promotions = 1-3 importance\n\
         - Suspicious/unknown senders = higher spam score\n\
         - Professional tone + known sender = higher confidence\n\n\
         Category descriptions:\n\
         - Orders: Amazon, retailers, shipping companies, order confirmations, delivery updates, tracking info\n\
         - Travel: Flight confirmations, hotel bookings, rental cars, travel itineraries, boarding passes, trip updates\n\
         - Finance: Bank statements, payment confirmations, invoices, bills, receipts, tax documents, financial alerts\n\
         - Calendar: Meeting invites, event reminders, RSVPs, appointment confirmations, schedule updates\n\
         - Software License: Software activation keys, digital license certificates, product keys, registration confirmations, license renewal notices\n\n\
         JSON:",
        sender = message.sender,
        subject = message.subject,
        date = message.date,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::error::LlmError;
    use crate::llm::provider::{CompletionResponse, FinishReason};
    use crate::pipeline::types::FALLBACK_CONFIDENCE;

    /// Mock LLM that returns a fixed response and records the last request.
    struct MockScoringLlm {
        response: Result<String, String>,
        last_request: Mutex<Option<CompletionRequest>>,
    }

    impl MockScoringLlm {
        fn replying(content: &str) -> Self {
            Self {
                response: Ok(content.to_string()),
                last_request: Mutex::new(None),
            }
        }

        fn failing(reason: &str) -> Self {
            Self {
                response: Err(reason.to_string()),
                last_request: Mutex::new(None),
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for MockScoringLlm {
        fn model_name(&self) -> &str {
            "mock-scorer"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            *self.last_request.lock().unwrap() = Some(request);
            match &self.response {
                Ok(content) => Ok(CompletionResponse {
                    content: content.clone(),
                    input_tokens: 100,
                    output_tokens: 40,
                    finish_reason: FinishReason::Stop,
                    response_id: None,
                }),
                Err(reason) => Err(LlmError::RequestFailed {
                    provider: "mock".into(),
                    reason: reason.clone(),
                }),
            }
        }
    }

    fn message(body: &str) -> Message {
        Message {
            id: "msg-1".into(),
            sender: "Alice <alice@company.com>".into(),
            subject: "Budget review".into(),
            date: "Mon, 19 Oct 2026 09:15:00 +0000".into(),
            body: body.into(),
            labels: vec![],
            thread_id: "t-1".into(),
        }
    }

    #[tokio::test]
    async fn parsed_response_is_returned() {
        let llm = Arc::new(MockScoringLlm::replying(
            r#"<think>colleague, deadline</think>{"importance_score": 8.5, "spam_score": 0, "category": "work", "reasoning": "deadline", "confidence": 0.9}"#,
        ));
        let policy = ScoringPolicy::new(llm, &ScorerConfig::default());

        let outcome = policy.classify(&message("Please review by Friday")).await;
        assert!(!outcome.is_degraded());
        let score = outcome.score();
        assert_eq!(score.importance_score, 8.5);
        assert_eq!(score.category, "work");
        assert_eq!(score.confidence, 0.9);
    }

    #[tokio::test]
    async fn completion_failure_degrades_to_fallback() {
        let llm = Arc::new(MockScoringLlm::failing("connection refused"));
        let policy = ScoringPolicy::new(llm, &ScorerConfig::default());

        let outcome = policy.classify(&message("hi")).await;
        assert!(outcome.is_degraded());
        let score = outcome.score();
        assert_eq!(score.importance_score, 5.0);
        assert_eq!(score.category, "unknown");
        assert_eq!(score.confidence, FALLBACK_CONFIDENCE);
        assert!(score.reasoning.contains("connection refused"));
    }

    #[tokio::test]
    async fn empty_response_degrades_with_cause() {
        let llm = Arc::new(MockScoringLlm::replying("   \n"));
        let policy = ScoringPolicy::new(llm, &ScorerConfig::default());

        let outcome = policy.classify(&message("hi")).await;
        match outcome {
            ScoreOutcome::Degraded { score, cause } => {
                assert_eq!(cause, "empty response");
                assert_eq!(score.reasoning, "Error during scoring: empty response");
            }
            other => panic!("Expected Degraded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_uses_configured_sampling() {
        let llm = Arc::new(MockScoringLlm::replying(r#"{"category": "personal"}"#));
        let config = ScorerConfig {
            temperature: 0.2,
            max_tokens: 64,
            ..ScorerConfig::default()
        };
        let policy = ScoringPolicy::new(llm.clone(), &config);
        policy.classify(&message("hello")).await;

        let request = llm.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, Some(64));
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].content, SYSTEM_PROMPT);
    }

    #[test]
    fn prompt_embeds_headers() {
        let prompt = build_user_prompt(&message("Please review"), 1500);
        assert!(prompt.contains("SENDER: Alice <alice@company.com>\n"));
        assert!(prompt.contains("SUBJECT: Budget review\n"));
        assert!(prompt.contains("DATE: Mon, 19 Oct 2026 09:15:00 +0000\n"));
        assert!(prompt.contains("CONTENT: Please review\n"));
        assert!(prompt.contains("\"category\": \"work|personal|orders|"));
        assert!(prompt.ends_with("JSON:"));
    }

    #[test]
    fn prompt_body_is_hard_cut() {
        let prompt = build_user_prompt(&message("abcdefghij"), 4);
        assert!(prompt.contains("CONTENT: abcd\n"));
        assert!(!prompt.contains("abcde"));
    }

    #[test]
    fn prompt_cut_counts_characters_not_bytes() {
        let prompt = build_user_prompt(&message("ééééé"), 3);
        assert!(prompt.contains("CONTENT: ééé\n"));
    }
}
