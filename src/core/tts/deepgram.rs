//! Deepgram streaming TTS over the `/v1/speak` WebSocket API
//!
//! Text goes up as tagged JSON control messages, audio comes back as raw
//! binary frames in the encoding requested at connect time (companded 8kHz
//! for call legs). An unexpected mid-call disconnect triggers a transparent
//! background reconnect; sends issued while the reconnect is in flight wait
//! for it to finish.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        handshake::client::generate_key,
        http::Request,
        http::header::{AUTHORIZATION, USER_AGENT},
        protocol::Message,
    },
};
use tracing::{debug, error, info, warn};
use url::Url;

use super::base::{
    AudioQueue, AudioStream, ConnectionState, SpeechSynthesizer, TtsConfig, TtsError, TtsResult,
};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(8);

pub const DEEPGRAM_SPEAK_URL: &str = "wss://api.deepgram.com/v1/speak";

/// Deepgram speak-stream control messages
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SpeakMessage {
    /// Queue text for synthesis
    Speak { text: String },
    /// Drop everything queued upstream
    Clear,
    /// Synthesize everything queued so far
    Flush,
    /// Courtesy termination
    Close,
}

struct SpeakerShared {
    config: TtsConfig,
    queue: AudioStream,
    state: RwLock<ConnectionState>,
    /// Cleared by close() or by a failed reconnect; gates reconnection.
    running: AtomicBool,
    ws_sender: RwLock<Option<mpsc::UnboundedSender<Message>>>,
    /// Single-slot reconnect-in-progress task awaited by foreground sends.
    reconnect: Mutex<Option<tokio::task::JoinHandle<bool>>>,
}

/// Deepgram TTS provider
pub struct DeepgramSpeaker {
    shared: Arc<SpeakerShared>,
}

impl DeepgramSpeaker {
    pub fn new(config: TtsConfig) -> TtsResult<Self> {
        if config.api_key.is_empty() {
            return Err(TtsError::InvalidConfiguration(
                "API key is required for Deepgram".to_string(),
            ));
        }
        Ok(Self {
            shared: Arc::new(SpeakerShared {
                config,
                queue: Arc::new(AudioQueue::new()),
                state: RwLock::new(ConnectionState::Disconnected),
                running: AtomicBool::new(false),
                ws_sender: RwLock::new(None),
                reconnect: Mutex::new(None),
            }),
        })
    }

    fn build_websocket_url(config: &TtsConfig) -> TtsResult<Url> {
        let mut url = Url::parse(DEEPGRAM_SPEAK_URL)
            .map_err(|e| TtsError::InvalidConfiguration(format!("Invalid base URL: {e}")))?;
        {
            let mut query_pairs = url.query_pairs_mut();
            query_pairs.append_pair("encoding", &config.audio_format);
            query_pairs.append_pair("sample_rate", &config.sample_rate.to_string());
            if let Some(voice) = &config.voice_id {
                query_pairs.append_pair("model", voice);
            }
        }
        Ok(url)
    }

    /// Open the socket and start its handler and keep-alive tasks.
    async fn open_stream(shared: Arc<SpeakerShared>) -> TtsResult<()> {
        *shared.state.write().await = ConnectionState::Connecting;

        let url = Self::build_websocket_url(&shared.config)?;
        let host = url.host_str().unwrap_or("api.deepgram.com").to_string();

        let request = Request::builder()
            .method("GET")
            .uri(url.as_str())
            .header("Host", host)
            .header("Upgrade", "websocket")
            .header("Connection", "upgrade")
            .header("Sec-WebSocket-Key", generate_key())
            .header("Sec-WebSocket-Version", "13")
            .header(AUTHORIZATION, format!("Token {}", shared.config.api_key))
            .header(USER_AGENT, "frontdesk-tts/1.0")
            .body(())
            .map_err(|e| TtsError::ConnectionFailed(format!("Failed to create request: {e}")))?;

        let (ws_stream, _) = connect_async(request).await.map_err(|e| {
            TtsError::ConnectionFailed(format!("WebSocket connection failed: {e}"))
        })?;

        let (ws_tx, mut ws_rx) = mpsc::unbounded_channel::<Message>();
        *shared.ws_sender.write().await = Some(ws_tx.clone());
        *shared.state.write().await = ConnectionState::Connected;

        let handler_shared = shared.clone();
        tokio::spawn(async move {
            let (mut ws_sink, mut ws_stream) = ws_stream.split();
            let mut lost = false;

            loop {
                tokio::select! {
                    outgoing = ws_rx.recv() => {
                        match outgoing {
                            Some(msg) => {
                                if let Err(e) = ws_sink.send(msg).await {
                                    error!("Deepgram speak send failed: {e}");
                                    lost = true;
                                    break;
                                }
                            }
                            // All senders dropped: clean local shutdown.
                            None => break,
                        }
                    }
                    incoming = ws_stream.next() => {
                        match incoming {
                            Some(Ok(Message::Binary(data))) => {
                                handler_shared.queue.push(data);
                            }
                            Some(Ok(Message::Text(text))) => {
                                if text.contains("\"error\"") {
                                    error!("Deepgram speak error: {text}");
                                } else {
                                    debug!("Deepgram speak control message: {text}");
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                warn!("Deepgram speak stream closed: {frame:?}");
                                lost = true;
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("Deepgram speak stream error: {e}");
                                lost = true;
                                break;
                            }
                            None => {
                                warn!("Deepgram speak stream ended");
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

        let keepalive_shared = shared.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !keepalive_shared.running.load(Ordering::SeqCst) {
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).is_err() {
                    // Connection task gone; its replacement starts a fresh
                    // keep-alive of its own.
                    break;
                }
            }
        });

        Ok(())
    }

    /// Kick off a background reconnect unless one is already in flight.
    fn start_reconnect(shared: Arc<SpeakerShared>) {
        tokio::spawn(async move {
            let mut slot = shared.reconnect.lock().await;
            if slot.as_ref().is_some_and(|h| !h.is_finished()) {
                return;
            }
            info!("Deepgram speak stream lost, reconnecting in background");
            let inner = shared.clone();
            *slot = Some(tokio::spawn(async move {
                match Self::open_stream(inner.clone()).await {
                    Ok(()) => {
                        info!("Deepgram TTS reconnected");
                        true
                    }
                    Err(e) => {
                        error!("Deepgram TTS reconnect failed: {e}");
                        inner.running.store(false, Ordering::SeqCst);
                        inner.queue.close();
                        false
                    }
                }
            }));
        });
    }

    /// Wait out any in-flight reconnect before forwarding.
    async fn ensure_connected(&self) {
        let handle = self.shared.reconnect.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn send_message(&self, message: SpeakMessage) -> TtsResult<()> {
        let json = serde_json::to_string(&message)
            .map_err(|e| TtsError::InternalError(format!("Failed to serialize message: {e}")))?;
        let sender = self.shared.ws_sender.read().await;
        if let Some(sender) = sender.as_ref() {
            if sender.send(Message::Text(json.into())).is_err() {
                warn!("Deepgram speak channel closed mid-send");
                Self::start_reconnect(self.shared.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SpeechSynthesizer for DeepgramSpeaker {
    async fn connect(&mut self) -> TtsResult<()> {
        self.shared.running.store(true, Ordering::SeqCst);
        match Self::open_stream(self.shared.clone()).await {
            Ok(()) => {
                info!("Deepgram TTS connected");
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
            debug!("Deepgram TTS stopped; dropping text");
            return Ok(());
        }
        self.ensure_connected().await;
        self.send_message(SpeakMessage::Speak {
            text: text.to_string(),
        })
        .await
    }

    async fn flush(&self) -> TtsResult<()> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.ensure_connected().await;
        self.send_message(SpeakMessage::Flush).await
    }

    async fn interrupt(&self) -> TtsResult<()> {
        self.shared.queue.clear();
        // Best effort: also drop whatever the provider has queued upstream.
        self.send_message(SpeakMessage::Clear).await
    }

    fn audio(&self) -> AudioStream {
        self.shared.queue.clone()
    }

    async fn close(&self) -> TtsResult<()> {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            // Already closed or never connected; still make sure the audio
            // sequence terminates for any draining consumer.
            self.shared.queue.close();
            return Ok(());
        }

        if let Some(handle) = self.shared.reconnect.lock().await.take() {
            handle.abort();
        }
        let _ = self.send_message(SpeakMessage::Close).await;
        *self.shared.ws_sender.write().await = None;
        *self.shared.state.write().await = ConnectionState::Closed;
        self.shared.queue.close();
        info!("Deepgram TTS closed");
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
        "deepgram"
    }
}
