//! Intent classification and booking-field extraction
//!
//! The NLU collaborator returns a free-form intent label plus an optional
//! structured booking extraction; the label is folded into the closed
//! [`Intent`] set here so nothing downstream ever branches on a raw string.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::llm::{ChatClient, ChatMessage};
use super::prompts;
use super::{AgentError, AgentResult};
use crate::core::session::{BookingFields, ConversationTurn};

/// Closed set of caller intents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Booking,
    Inquiry,
    Search,
    Greeting,
    Goodbye,
    Unknown,
}

impl Intent {
    /// Map a collaborator label onto the closed set; anything unrecognized
    /// becomes `Unknown` and is never propagated raw.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "BOOKING" => Intent::Booking,
            "INQUIRY" => Intent::Inquiry,
            "SEARCH" => Intent::Search,
            "GREETING" => Intent::Greeting,
            "GOODBYE" => Intent::Goodbye,
            _ => Intent::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Booking => "BOOKING",
            Intent::Inquiry => "INQUIRY",
            Intent::Search => "SEARCH",
            Intent::Greeting => "GREETING",
            Intent::Goodbye => "GOODBYE",
            Intent::Unknown => "UNKNOWN",
        }
    }
}

/// NLU collaborator contract
#[async_trait]
pub trait NluClient: Send + Sync {
    /// Classify one utterance with bounded recent history; returns the
    /// intent and, for booking turns, whatever fields were extracted.
    async fn classify_and_extract(
        &self,
        utterance: &str,
        history: &[ConversationTurn],
    ) -> AgentResult<(Intent, Option<BookingFields>)>;

    /// Extract booking fields from a conversation context. Used when the
    /// sticky-intent override forces a booking turn that the classifier
    /// did not extract fields for.
    async fn extract_booking(&self, context: &str) -> AgentResult<BookingFields>;
}

/// Chat-completions-backed NLU
pub struct LlmNlu {
    chat: Arc<ChatClient>,
}

impl LlmNlu {
    pub fn new(chat: Arc<ChatClient>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl NluClient for LlmNlu {
    async fn classify_and_extract(
        &self,
        utterance: &str,
        history: &[ConversationTurn],
    ) -> AgentResult<(Intent, Option<BookingFields>)> {
        let messages = vec![
            ChatMessage::system(prompts::INTENT_SYSTEM),
            ChatMessage::user(prompts::intent_user(utterance, history)),
        ];
        let data = self.chat.complete_json(messages, 200).await?;

        let intent = data
            .get("intent")
            .and_then(|v| v.as_str())
            .map(Intent::parse)
            .unwrap_or(Intent::Unknown);

        let booking = match data.get("booking") {
            Some(value) if !value.is_null() => {
                serde_json::from_value::<BookingFields>(value.clone()).ok()
            }
            _ => None,
        };

        debug!("Classified intent {intent:?} (booking fields: {})", booking.is_some());
        Ok((intent, booking))
    }

    async fn extract_booking(&self, context: &str) -> AgentResult<BookingFields> {
        let messages = vec![
            ChatMessage::system(prompts::BOOKING_EXTRACTION_SYSTEM),
            ChatMessage::user(prompts::booking_extraction_user(context)),
        ];
        let data = self.chat.complete_json(messages, 200).await?;
        serde_json::from_value::<BookingFields>(data)
            .map_err(|e| AgentError::Malformed(format!("Bad extraction payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_parse_known_labels() {
        assert_eq!(Intent::parse("BOOKING"), Intent::Booking);
        assert_eq!(Intent::parse("inquiry"), Intent::Inquiry);
        assert_eq!(Intent::parse(" Search "), Intent::Search);
        assert_eq!(Intent::parse("GREETING"), Intent::Greeting);
        assert_eq!(Intent::parse("goodbye"), Intent::Goodbye);
    }

    #[test]
    fn test_unrecognized_labels_map_to_unknown() {
        assert_eq!(Intent::parse("CHITCHAT"), Intent::Unknown);
        assert_eq!(Intent::parse(""), Intent::Unknown);
        assert_eq!(Intent::parse("BOOKING PLEASE"), Intent::Unknown);
    }

    #[test]
    fn test_booking_fields_deserialization_tolerates_nulls() {
        let value = serde_json::json!({
            "action": "schedule",
            "service_name": "Consultation",
            "preferred_date": null,
            "customer_name": "Ada"
        });
        let fields: BookingFields = serde_json::from_value(value).unwrap();
        assert_eq!(fields.action.as_deref(), Some("schedule"));
        assert_eq!(fields.service_name.as_deref(), Some("Consultation"));
        assert!(fields.preferred_date.is_none());
        assert!(fields.preferred_time.is_none());
    }
}
