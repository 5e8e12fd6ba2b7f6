//! Response synthesis collaborator
//!
//! Turns the assembled per-utterance context into a live token stream of
//! reply text. No total length is known in advance; the stream simply ends.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::intent::Intent;
use super::llm::{ChatClient, ChatMessage};
use super::prompts;
use super::AgentResult;
use crate::core::session::{ConversationTurn, TurnRole};

/// Everything response synthesis needs for one reply
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub business_name: String,
    pub location: String,
    pub hours: String,
    pub policies: String,
    pub intent: Intent,
    pub utterance: String,
    pub additional_context: String,
    pub context_section: String,
    /// Bounded window of history, oldest first, current utterance last.
    pub history: Vec<ConversationTurn>,
}

/// Response-synthesis collaborator contract
#[async_trait]
pub trait ResponseSynthesizer: Send + Sync {
    /// Start a reply; tokens arrive on the returned channel.
    async fn synthesize(&self, request: SynthesisRequest) -> AgentResult<mpsc::Receiver<String>>;
}

/// Chat-completions-backed response synthesis
pub struct LlmSynthesizer {
    chat: Arc<ChatClient>,
}

impl LlmSynthesizer {
    pub fn new(chat: Arc<ChatClient>) -> Self {
        Self { chat }
    }

    fn build_messages(request: &SynthesisRequest) -> Vec<ChatMessage> {
        let system = prompts::synthesizer_system(
            &request.business_name,
            &request.location,
            &request.hours,
            &request.policies,
            &request.context_section,
        );
        let user = prompts::synthesizer_user(
            request.intent.as_str(),
            &request.utterance,
            &request.additional_context,
        );

        let mut messages = vec![ChatMessage::system(system)];
        // History for context; the current utterance is excluded because it
        // is already carried by the final user message.
        let history = if request.history.is_empty() {
            &request.history[..]
        } else {
            &request.history[..request.history.len() - 1]
        };
        for turn in history {
            messages.push(match turn.role {
                TurnRole::Caller => ChatMessage::user(turn.text.clone()),
                TurnRole::Agent => ChatMessage::assistant(turn.text.clone()),
            });
        }
        messages.push(ChatMessage::user(user));
        messages
    }
}

#[async_trait]
impl ResponseSynthesizer for LlmSynthesizer {
    async fn synthesize(&self, request: SynthesisRequest) -> AgentResult<mpsc::Receiver<String>> {
        let messages = Self::build_messages(&request);
        self.chat.stream(messages, 0.7, 300).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_history(history: Vec<ConversationTurn>) -> SynthesisRequest {
        SynthesisRequest {
            business_name: "Test Clinic".to_string(),
            location: String::new(),
            hours: String::new(),
            policies: String::new(),
            intent: Intent::Inquiry,
            utterance: "What are your hours?".to_string(),
            additional_context: String::new(),
            context_section: String::new(),
            history,
        }
    }

    #[test]
    fn test_messages_start_with_system_and_end_with_user() {
        let history = vec![
            ConversationTurn::new(TurnRole::Agent, "Hi, thanks for calling."),
            ConversationTurn::new(TurnRole::Caller, "What are your hours?"),
        ];
        let messages = LlmSynthesizer::build_messages(&request_with_history(history));

        assert_eq!(messages.first().unwrap().role, "system");
        assert_eq!(messages.last().unwrap().role, "user");
        // Agent greeting mapped to assistant; current utterance excluded
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, "assistant");
    }

    #[test]
    fn test_empty_fields_get_placeholders() {
        let messages = LlmSynthesizer::build_messages(&request_with_history(Vec::new()));
        let system = &messages[0].content;
        assert!(system.contains("Location: Not specified"));
        assert!(system.contains("Hours: Not specified"));
        assert!(system.contains("Policies: None specified"));
    }
}
