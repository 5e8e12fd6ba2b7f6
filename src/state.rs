//! Shared application state
//!
//! Built once at startup and shared across calls via `Arc`. The collaborator
//! stack is cheap to clone (trait objects behind `Arc`); the per-call
//! provider connections are constructed fresh for every call.

use std::sync::Arc;

use tracing::info;

use crate::config::ServerConfig;
use crate::core::agents::{
    AgentStack, ChatClient, HttpRetriever, LlmNlu, LlmSynthesizer, NullRetriever, SerperSearch,
};
use crate::core::storage::{HttpStorage, MemoryStorage, Storage};
use crate::core::stt::{DeepgramRecognizer, SttResult};
use crate::core::tts::{
    DeepgramSpeaker, ElevenLabsSpeaker, FailoverSpeaker, SpeechSynthesizer, TtsResult,
};

/// Application state shared across connections
pub struct AppState {
    pub config: ServerConfig,
    pub agents: AgentStack,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let chat = Arc::new(ChatClient::new(
            config.openai_base_url.clone(),
            config.openai_api_key.clone(),
            config.openai_model.clone(),
        ));

        let retriever: Arc<dyn crate::core::agents::KnowledgeRetriever> =
            match &config.retrieval_url {
                Some(url) => Arc::new(HttpRetriever::new(url.clone())),
                None => {
                    info!("No RETRIEVAL_URL configured; knowledge retrieval disabled");
                    Arc::new(NullRetriever)
                }
            };

        let storage: Arc<dyn Storage> = match &config.storage_url {
            Some(url) => Arc::new(HttpStorage::new(url.clone())),
            None => {
                info!("No STORAGE_URL configured; using in-memory storage");
                Arc::new(MemoryStorage::new())
            }
        };

        let agents = AgentStack {
            nlu: Arc::new(LlmNlu::new(chat.clone())),
            retriever,
            search: Arc::new(SerperSearch::new(config.serper_api_key.clone())),
            responder: Arc::new(LlmSynthesizer::new(chat)),
            storage,
        };

        Self { config, agents }
    }

    /// Fresh recognizer for one call.
    pub fn recognizer(&self) -> SttResult<DeepgramRecognizer> {
        DeepgramRecognizer::new(self.config.stt_config())
    }

    /// Fresh failover speaker pair for one call, ordered by the configured
    /// primary provider.
    pub fn speaker(&self) -> TtsResult<FailoverSpeaker> {
        let deepgram: Box<dyn SpeechSynthesizer> =
            Box::new(DeepgramSpeaker::new(self.config.deepgram_tts_config())?);

        let elevenlabs: Option<Box<dyn SpeechSynthesizer>> =
            match self.config.elevenlabs_tts_config() {
                Some(tts_config) => Some(Box::new(ElevenLabsSpeaker::new(tts_config)?)),
                None => None,
            };

        Ok(match (self.config.tts_provider.as_str(), elevenlabs) {
            ("elevenlabs", Some(elevenlabs)) => FailoverSpeaker::new(elevenlabs, deepgram),
            (_, Some(elevenlabs)) => FailoverSpeaker::new(deepgram, elevenlabs),
            // Without an ElevenLabs key the second slot is a fresh Deepgram
            // connection, which still covers transient connect failures.
            (_, None) => FailoverSpeaker::new(
                deepgram,
                Box::new(DeepgramSpeaker::new(self.config.deepgram_tts_config())?),
            ),
        })
    }
}
