//! Conversational decision logic
//!
//! Everything between a finalized caller utterance and the reply text
//! streamed into speech synthesis: intent classification, knowledge
//! retrieval, the booking sub-flow, web search, and response synthesis.
//! The collaborators are external services behind narrow traits; their
//! failures degrade gracefully at the orchestration boundary.

pub mod booking;
pub mod intent;
pub mod llm;
pub mod orchestrator;
pub mod prompts;
pub mod retrieval;
pub mod search;
pub mod synthesizer;

use std::sync::Arc;

use crate::core::storage::{Storage, StorageError};
use crate::core::tts::TtsError;

pub use booking::{BookingOutcome, handle_booking};
pub use intent::{Intent, LlmNlu, NluClient};
pub use llm::{ChatClient, ChatMessage};
pub use orchestrator::{is_simple_exchange, pick_filler_phrase, process_utterance};
pub use retrieval::{HttpRetriever, KnowledgeRetriever, NullRetriever};
pub use search::{SerperSearch, WebSearch};
pub use synthesizer::{LlmSynthesizer, ResponseSynthesizer, SynthesisRequest};

/// Errors from collaborator calls and the orchestration loop
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Collaborator request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Malformed collaborator response: {0}")]
    Malformed(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Speech synthesis failed: {0}")]
    Tts(#[from] TtsError),
}

pub type AgentResult<T> = Result<T, AgentError>;

/// The set of collaborators one call session works with
#[derive(Clone)]
pub struct AgentStack {
    pub nlu: Arc<dyn NluClient>,
    pub retriever: Arc<dyn KnowledgeRetriever>,
    pub search: Arc<dyn WebSearch>,
    pub responder: Arc<dyn ResponseSynthesizer>,
    pub storage: Arc<dyn Storage>,
}
