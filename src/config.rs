//! Server configuration
//!
//! Configuration comes from environment variables, with a `.env` file
//! loaded first when present. Provider keys for speech recognition and the
//! language-model collaborator are required; everything else has a sensible
//! default or degrades (no retrieval service, no web search, in-memory
//! storage for local development).

use std::env;

use crate::core::audio::DEFAULT_ECHO_SUPPRESSION_MS;
use crate::core::stt::SttConfig;
use crate::core::tts::TtsConfig;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // Speech recognition
    pub deepgram_api_key: String,

    // Speech synthesis
    /// Primary TTS provider name: "deepgram" or "elevenlabs"
    pub tts_provider: String,
    pub deepgram_tts_model: String,
    pub elevenlabs_api_key: Option<String>,
    pub elevenlabs_voice_id: Option<String>,
    pub elevenlabs_model_id: String,

    // Language-model collaborator
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,

    // Other collaborators
    pub retrieval_url: Option<String>,
    pub serper_api_key: Option<String>,
    pub storage_url: Option<String>,

    // Call behavior
    pub echo_suppression_ms: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables, reading `.env` first
    /// if one exists.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let _ = dotenvy::dotenv();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse::<u16>()
            .map_err(|e| format!("Invalid port number: {e}"))?;

        let deepgram_api_key = env::var("DEEPGRAM_API_KEY")
            .map_err(|_| "DEEPGRAM_API_KEY is required for speech recognition")?;

        let tts_provider = env::var("TTS_PROVIDER")
            .unwrap_or_else(|_| "deepgram".to_string())
            .to_lowercase();
        let deepgram_tts_model =
            env::var("DEEPGRAM_TTS_MODEL").unwrap_or_else(|_| "aura-asteria-en".to_string());
        let elevenlabs_api_key = env::var("ELEVENLABS_API_KEY").ok();
        let elevenlabs_voice_id = env::var("ELEVENLABS_VOICE_ID").ok();
        let elevenlabs_model_id =
            env::var("ELEVENLABS_MODEL_ID").unwrap_or_else(|_| "eleven_turbo_v2_5".to_string());

        let openai_api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| "OPENAI_API_KEY is required for conversation agents")?;
        let openai_base_url =
            env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let openai_model = env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let retrieval_url = env::var("RETRIEVAL_URL").ok();
        let serper_api_key = env::var("SERPER_API_KEY").ok();
        let storage_url = env::var("STORAGE_URL").ok();

        let echo_suppression_ms = env::var("ECHO_SUPPRESSION_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_ECHO_SUPPRESSION_MS);

        let config = Self {
            host,
            port,
            deepgram_api_key,
            tts_provider,
            deepgram_tts_model,
            elevenlabs_api_key,
            elevenlabs_voice_id,
            elevenlabs_model_id,
            openai_api_key,
            openai_base_url,
            openai_model,
            retrieval_url,
            serper_api_key,
            storage_url,
            echo_suppression_ms,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.tts_provider != "deepgram" && self.tts_provider != "elevenlabs" {
            return Err(format!(
                "TTS_PROVIDER must be 'deepgram' or 'elevenlabs', got '{}'",
                self.tts_provider
            ));
        }
        if self.tts_provider == "elevenlabs" && self.elevenlabs_api_key.is_none() {
            return Err(
                "TTS_PROVIDER=elevenlabs requires ELEVENLABS_API_KEY to be set".to_string(),
            );
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Recognition settings derived from this configuration.
    pub fn stt_config(&self) -> SttConfig {
        SttConfig {
            api_key: self.deepgram_api_key.clone(),
            ..Default::default()
        }
    }

    /// Deepgram synthesis settings (companded 8kHz for call legs).
    pub fn deepgram_tts_config(&self) -> TtsConfig {
        TtsConfig {
            api_key: self.deepgram_api_key.clone(),
            voice_id: Some(self.deepgram_tts_model.clone()),
            ..Default::default()
        }
    }

    /// ElevenLabs synthesis settings, when a key is configured.
    pub fn elevenlabs_tts_config(&self) -> Option<TtsConfig> {
        let api_key = self.elevenlabs_api_key.clone()?;
        Some(TtsConfig {
            api_key,
            voice_id: self.elevenlabs_voice_id.clone(),
            model: self.elevenlabs_model_id.clone(),
            ..Default::default()
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            deepgram_api_key: "dg_test".to_string(),
            tts_provider: "deepgram".to_string(),
            deepgram_tts_model: "aura-asteria-en".to_string(),
            elevenlabs_api_key: None,
            elevenlabs_voice_id: None,
            elevenlabs_model_id: "eleven_turbo_v2_5".to_string(),
            openai_api_key: "sk_test".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            retrieval_url: None,
            serper_api_key: None,
            storage_url: None,
            echo_suppression_ms: DEFAULT_ECHO_SUPPRESSION_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_formatting() {
        let config = ServerConfig::for_tests();
        assert_eq!(config.address(), "127.0.0.1:3001");
    }

    #[test]
    fn test_validate_rejects_unknown_tts_provider() {
        let config = ServerConfig {
            tts_provider: "acme".to_string(),
            ..ServerConfig::for_tests()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_elevenlabs_key_when_primary() {
        let config = ServerConfig {
            tts_provider: "elevenlabs".to_string(),
            ..ServerConfig::for_tests()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            tts_provider: "elevenlabs".to_string(),
            elevenlabs_api_key: Some("el_test".to_string()),
            ..ServerConfig::for_tests()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_derived_provider_configs() {
        let config = ServerConfig::for_tests();
        assert_eq!(config.stt_config().api_key, "dg_test");

        let dg = config.deepgram_tts_config();
        assert_eq!(dg.voice_id.as_deref(), Some("aura-asteria-en"));
        assert_eq!(dg.audio_format, "mulaw");
        assert_eq!(dg.sample_rate, 8000);

        assert!(config.elevenlabs_tts_config().is_none());
    }
}
