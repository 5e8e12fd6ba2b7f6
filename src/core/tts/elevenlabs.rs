//! ElevenLabs streaming TTS over the stream-input WebSocket API
//!
//! Text chunks go up as JSON, audio comes back base64-encoded inside JSON
//! frames. ElevenLabs closes the stream after each completed generation
//! (`isFinal`), so the client cycles the connection in the background and
//! foreground sends wait for the fresh socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use super::base::{
    AudioQueue, AudioStream, ConnectionState, SpeechSynthesizer, TtsConfig, TtsError, TtsResult,
};

pub const ELEVENLABS_STREAM_URL: &str = "wss://api.elevenlabs.io/v1/text-to-speech";

const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";

/// Voice settings sent with the stream-input handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.75,
        }
    }
}

/// Frame received on the stream-input socket
#[derive(Debug, Deserialize)]
struct StreamInputResponse {
    audio: Option<String>,
    #[serde(rename = "isFinal")]
    is_final: Option<bool>,
    error: Option<serde_json::Value>,
    message: Option<String>,
}

struct SpeakerShared {
    config: TtsConfig,
    voice_settings: VoiceSettings,
    queue: AudioStream,
    state: RwLock<ConnectionState>,
    running: AtomicBool,
    ws_sender: RwLock<Option<mpsc::UnboundedSender<Message>>>,
    reconnect: Mutex<Option<tokio::task::JoinHandle<bool>>>,
}

/// ElevenLabs TTS provider
pub struct ElevenLabsSpeaker {
    shared: Arc<SpeakerShared>,
}

impl ElevenLabsSpeaker {
    pub fn new(config: TtsConfig) -> TtsResult<Self> {
        if config.api_key.is_empty() {
            return Err(TtsError::InvalidConfiguration(
                "API key is required for ElevenLabs".to_string(),
            ));
        }
        Ok(Self {
            shared: Arc::new(SpeakerShared {
                config,
                voice_settings: VoiceSettings::default(),
                queue: Arc::new(AudioQueue::new()),
                state: RwLock::new(ConnectionState::Disconnected),
                running: AtomicBool::new(false),
                ws_sender: RwLock::new(None),
                reconnect: Mutex::new(None),
            }),
        })
    }

    fn build_websocket_url(config: &TtsConfig) -> TtsResult<Url> {
        let voice_id = config.voice_id.as_deref().unwrap_or(DEFAULT_VOICE_ID);
        let mut url = Url::parse(&format!(
            "{ELEVENLABS_STREAM_URL}/{voice_id}/stream-input"
        ))
        .map_err(|e| TtsError::InvalidConfiguration(format!("Invalid base URL: {e}")))?;
        {
            let mut query_pairs = url.query_pairs_mut();
            if !config.model.is_empty() {
                query_pairs.append_pair("model_id", &config.model);
            }
            // The leg plays companded 8kHz audio
            query_pairs.append_pair("output_format", "ulaw_8000");
        }
        Ok(url)
    }

    /// Stream-input handshake message carrying the API key and settings.
    fn init_message(shared: &SpeakerShared) -> String {
        json!({
            "text": " ",
            "voice_settings": shared.voice_settings,
            "xi_api_key": shared.config.api_key,
        })
        .to_string()
    }

    async fn open_stream(shared: Arc<SpeakerShared>) -> TtsResult<()> {
        *shared.state.write().await = ConnectionState::Connecting;

        let url = Self::build_websocket_url(&shared.config)?;
        let (ws_stream, _) = connect_async(url.as_str()).await.map_err(|e| {
            TtsError::ConnectionFailed(format!("WebSocket connection failed: {e}"))
        })?;

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        ws_sink
            .send(Message::Text(Self::init_message(&shared).into()))
            .await
            .map_err(|e| TtsError::ConnectionFailed(format!("Handshake send failed: {e}")))?;

        let (ws_tx, mut ws_rx) = mpsc::unbounded_channel::<Message>();
        *shared.ws_sender.write().await = Some(ws_tx);
        *shared.state.write().await = ConnectionState::Connected;

        let handler_shared = shared.clone();
        tokio::spawn(async move {
            let mut lost = false;

            loop {
                tokio::select! {
                    outgoing = ws_rx.recv() => {
                        match outgoing {
                            Some(msg) => {
                                if let Err(e) = ws_sink.send(msg).await {
                                    error!("ElevenLabs send failed: {e}");
                                    lost = true;
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    incoming = ws_stream.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                if Self::handle_stream_frame(&handler_shared, &text) {
                                    // Generation finished; the provider will
                                    // close this stream, cycle it now.
                                    lost = true;
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                debug!("ElevenLabs stream closed: {frame:?}");
                                lost = true;
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("ElevenLabs stream error: {e}");
                                lost = true;
                                break;
                            }
                            None => {
                                lost = true;
                                break;
                            }
                        }
                    }
                }
            }

            *handler_shared.state.write().await = ConnectionState::Disconnected;
            if lost && handler_shared.running.load(Ordering::SeqCst) {
                Self::start_reconnect(handler_shared);
            }
        });

        Ok(())
    }

    /// Returns true when the frame marks the end of the current generation.
    fn handle_stream_frame(shared: &SpeakerShared, text: &str) -> bool {
        let frame: StreamInputResponse = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(e) => {
                warn!("Unparseable ElevenLabs frame: {e}");
                return false;
            }
        };

        if frame.error.is_some() || frame.message.is_some() {
            error!("ElevenLabs error frame: {text}");
        }
        if let Some(audio_b64) = frame.audio {
            match BASE64.decode(audio_b64.as_bytes()) {
                Ok(audio) => shared.queue.push(Bytes::from(audio)),
                Err(e) => warn!("Invalid base64 audio from ElevenLabs: {e}"),
            }
        }
        frame.is_final.unwrap_or(false)
    }

    fn start_reconnect(shared: Arc<SpeakerShared>) {
        tokio::spawn(async move {
            let mut slot = shared.reconnect.lock().await;
            if slot.as_ref().is_some_and(|h| !h.is_finished()) {
                return;
            }
            debug!("Cycling ElevenLabs stream in background");
            let inner = shared.clone();
            *slot = Some(tokio::spawn(async move {
                match Self::open_stream(inner.clone()).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!("ElevenLabs reconnect failed: {e}");
                        inner.running.store(false, Ordering::SeqCst);
                        inner.queue.close();
                        false
                    }
                }
            }));
        });
    }

    async fn ensure_connected(&self) {
        let handle = self.shared.reconnect.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn send_json(&self, payload: serde_json::Value) -> TtsResult<()> {
        let sender = self.shared.ws_sender.read().await;
        if let Some(sender) = sender.as_ref() {
            if sender.send(Message::Text(payload.to_string().into())).is_err() {
                warn!("ElevenLabs channel closed mid-send");
                Self::start_reconnect(self.shared.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSpeaker {
    async fn connect(&mut self) -> TtsResult<()> {
        self.shared.running.store(true, Ordering::SeqCst);
        match Self::open_stream(self.shared.clone()).await {
            Ok(()) => {
                info!("ElevenLabs TTS connected");
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn send_text(&self, text: &str) -> TtsResult<()> {
        if !self.shared.running.load(Ordering::SeqCst) {
            debug!("ElevenLabs TTS stopped; dropping text");
            return Ok(());
        }
        self.ensure_connected().await;
        self.send_json(json!({
            "text": text,
            "try_trigger_generation": true,
        }))
        .await
    }

    async fn flush(&self) -> TtsResult<()> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.ensure_connected().await;
        // An empty text chunk is the stream-input flush signal
        self.send_json(json!({ "text": "" })).await
    }

    async fn interrupt(&self) -> TtsResult<()> {
        self.shared.queue.clear();
        // No upstream clear command: cycle the stream to abandon in-flight
        // synthesis. Dropping the sender ends the handler task cleanly.
        *self.shared.ws_sender.write().await = None;
        if self.shared.running.load(Ordering::SeqCst) {
            Self::start_reconnect(self.shared.clone());
        }
        Ok(())
    }

    fn audio(&self) -> AudioStream {
        self.shared.queue.clone()
    }

    async fn close(&self) -> TtsResult<()> {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            self.shared.queue.close();
            return Ok(());
        }
        if let Some(handle) = self.shared.reconnect.lock().await.take() {
            handle.abort();
        }
        *self.shared.ws_sender.write().await = None;
        *self.shared.state.write().await = ConnectionState::Closed;
        self.shared.queue.close();
        info!("ElevenLabs TTS closed");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        if let Ok(state) = self.shared.state.try_read() {
            *state == ConnectionState::Connected
        } else {
            false
        }
    }

    fn name(&self) -> &'static str {
        "elevenlabs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> TtsConfig {
        TtsConfig {
            api_key: "test_key".to_string(),
            voice_id: Some("test_voice".to_string()),
            model: "eleven_turbo_v2_5".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_requires_api_key() {
        let result = ElevenLabsSpeaker::new(TtsConfig::default());
        assert!(matches!(result, Err(TtsError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_websocket_url_building() {
        let url = ElevenLabsSpeaker::build_websocket_url(&test_config()).unwrap();
        assert_eq!(url.host_str(), Some("api.elevenlabs.io"));
        assert!(url.path().ends_with("/test_voice/stream-input"));

        let query: std::collections::HashMap<String, String> =
            url.query_pairs().into_owned().collect();
        assert_eq!(
            query.get("model_id"),
            Some(&"eleven_turbo_v2_5".to_string())
        );
        assert_eq!(query.get("output_format"), Some(&"ulaw_8000".to_string()));
    }

    #[test]
    fn test_init_message_carries_key_and_settings() {
        let speaker = ElevenLabsSpeaker::new(test_config()).unwrap();
        let init: serde_json::Value =
            serde_json::from_str(&ElevenLabsSpeaker::init_message(&speaker.shared)).unwrap();
        assert_eq!(init["text"], " ");
        assert_eq!(init["xi_api_key"], "test_key");
        assert_eq!(init["voice_settings"]["stability"], 0.5);
        assert_eq!(init["voice_settings"]["similarity_boost"], 0.75);
    }

    #[test]
    fn test_audio_frame_decoded_onto_queue() {
        let speaker = ElevenLabsSpeaker::new(test_config()).unwrap();
        let payload = json!({ "audio": BASE64.encode(b"pcm-bytes") }).to_string();
        let is_final = ElevenLabsSpeaker::handle_stream_frame(&speaker.shared, &payload);
        assert!(!is_final);
        assert_eq!(speaker.audio().len(), 1);
    }

    #[test]
    fn test_is_final_frame_signals_stream_end() {
        let speaker = ElevenLabsSpeaker::new(test_config()).unwrap();
        let payload = json!({ "isFinal": true }).to_string();
        assert!(ElevenLabsSpeaker::handle_stream_frame(
            &speaker.shared,
            &payload
        ));
    }

    #[tokio::test]
    async fn test_interrupt_discards_buffered_audio() {
        let speaker = ElevenLabsSpeaker::new(test_config()).unwrap();
        speaker.audio().push(Bytes::from_static(b"buffered"));
        speaker.interrupt().await.unwrap();
        assert!(speaker.audio().is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_ends_audio() {
        let speaker = ElevenLabsSpeaker::new(test_config()).unwrap();
        let audio = speaker.audio();
        speaker.close().await.unwrap();
        speaker.close().await.unwrap();
        assert_eq!(audio.pop().await, None);
    }
}
