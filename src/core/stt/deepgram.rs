use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{RwLock, broadcast, mpsc};
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
    SpeechRecognizer, SpeechSignal, SttConfig, SttError, SttResult, UtteranceAssembler,
};

/// Interval between keep-alive messages to prevent idle upstream disconnects
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(8);

pub const DEEPGRAM_LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";

/// Connection lifecycle for one streaming recognition socket
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderState {
    Disconnected,
    Connecting,
    Connected,
    Draining,
    Closed,
}

/// Deepgram streaming transcription response
#[derive(Debug, Deserialize)]
struct ListenResponse {
    #[serde(rename = "type")]
    response_type: String,
    channel: Option<ListenChannel>,
    is_final: Option<bool>,
    speech_final: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ListenChannel {
    alternatives: Vec<ListenAlternative>,
}

#[derive(Debug, Deserialize)]
struct ListenAlternative {
    transcript: String,
}

/// Deepgram streaming recognition client
///
/// Owns one `/v1/listen` WebSocket for the lifetime of a call. Interim
/// results are coalesced into utterances and emitted on the transcript
/// channel at each utterance boundary; speech onsets raise the shared
/// [`SpeechSignal`]. Mid-call socket loss is fatal: the reader task exits
/// and the transcript channel closes, which ends the call's consumer.
pub struct DeepgramRecognizer {
    config: SttConfig,
    state: Arc<RwLock<ProviderState>>,
    ws_sender: Option<mpsc::UnboundedSender<Message>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    transcript_rx: Option<mpsc::UnboundedReceiver<String>>,
    signal: Arc<SpeechSignal>,
    task_handles: Vec<tokio::task::JoinHandle<()>>,
}

impl DeepgramRecognizer {
    pub fn new(config: SttConfig) -> SttResult<Self> {
        if config.api_key.is_empty() {
            return Err(SttError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }
        Ok(Self {
            config,
            state: Arc::new(RwLock::new(ProviderState::Disconnected)),
            ws_sender: None,
            shutdown_tx: None,
            transcript_rx: None,
            signal: Arc::new(SpeechSignal::new()),
            task_handles: Vec::new(),
        })
    }

    /// Build the listen URL with query parameters
    fn build_websocket_url(config: &SttConfig, sample_rate: u32) -> SttResult<Url> {
        let mut url = Url::parse(DEEPGRAM_LISTEN_URL)
            .map_err(|e| SttError::ConfigurationError(format!("Invalid WebSocket URL: {e}")))?;
        {
            let mut query_pairs = url.query_pairs_mut();
            query_pairs.append_pair("encoding", "linear16");
            query_pairs.append_pair("sample_rate", &sample_rate.to_string());
            query_pairs.append_pair("channels", "1");
            query_pairs.append_pair("model", &config.model);
            query_pairs.append_pair("language", &config.language);
            query_pairs.append_pair("punctuate", "true");
            query_pairs.append_pair("interim_results", "true");
            query_pairs.append_pair("endpointing", &config.endpointing_ms.to_string());
            query_pairs.append_pair("vad_events", "true");
        }
        Ok(url)
    }

    /// Handle one text frame from the listen stream
    fn process_listen_message(
        text: &str,
        assembler: &mut UtteranceAssembler,
        signal: &SpeechSignal,
        transcripts: &mpsc::UnboundedSender<String>,
    ) {
        let response: ListenResponse = match serde_json::from_str(text) {
            Ok(r) => r,
            Err(e) => {
                warn!("Unparseable listen message: {e}");
                return;
            }
        };

        match response.response_type.as_str() {
            "SpeechStarted" => {
                debug!("Speech onset detected");
                signal.raise();
            }
            "Results" => {
                let transcript = response
                    .channel
                    .as_ref()
                    .and_then(|c| c.alternatives.first())
                    .map(|a| a.transcript.as_str())
                    .unwrap_or("");

                if response.is_final.unwrap_or(false) {
                    assembler.push(transcript);
                }
                if response.speech_final.unwrap_or(false) {
                    if let Some(utterance) = assembler.flush() {
                        debug!("Finalized utterance: {utterance}");
                        let _ = transcripts.send(utterance);
                    }
                }
            }
            "UtteranceEnd" => {
                if let Some(utterance) = assembler.flush() {
                    debug!("Utterance ended: {utterance}");
                    let _ = transcripts.send(utterance);
                }
            }
            "Error" => {
                error!("Deepgram listen error: {text}");
            }
            "Metadata" => {}
            other => {
                debug!("Unhandled listen message type: {other}");
            }
        }
    }
}

#[async_trait::async_trait]
impl SpeechRecognizer for DeepgramRecognizer {
    async fn connect(&mut self, sample_rate: u32) -> SttResult<()> {
        *self.state.write().await = ProviderState::Connecting;

        let url = Self::build_websocket_url(&self.config, sample_rate)?;
        let host = url.host_str().unwrap_or("api.deepgram.com").to_string();
        info!("Connecting Deepgram listen stream: {url}");

        let request = Request::builder()
            .method("GET")
            .uri(url.as_str())
            .header("Host", host)
            .header("Upgrade", "websocket")
            .header("Connection", "upgrade")
            .header("Sec-WebSocket-Key", generate_key())
            .header("Sec-WebSocket-Version", "13")
            .header(AUTHORIZATION, format!("Token {}", self.config.api_key))
            .header(USER_AGENT, "frontdesk-stt/1.0")
            .body(())
            .map_err(|e| SttError::ConnectionFailed(format!("Failed to create request: {e}")))?;

        let (ws_stream, _) = connect_async(request).await.map_err(|e| {
            SttError::ConnectionFailed(format!("WebSocket connection failed: {e}"))
        })?;

        let (ws_tx, mut ws_rx) = mpsc::unbounded_channel::<Message>();
        let (transcript_tx, transcript_rx) = mpsc::unbounded_channel::<String>();
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

        self.ws_sender = Some(ws_tx.clone());
        self.transcript_rx = Some(transcript_rx);
        self.shutdown_tx = Some(shutdown_tx);

        let state = self.state.clone();
        let signal = self.signal.clone();

        let connection_handle = tokio::spawn(async move {
            let (mut ws_sink, mut ws_stream) = ws_stream.split();
            let mut assembler = UtteranceAssembler::new();

            loop {
                tokio::select! {
                    Some(message) = ws_rx.recv() => {
                        if let Err(e) = ws_sink.send(message).await {
                            error!("Failed to send on listen stream: {e}");
                            break;
                        }
                    }
                    message = ws_stream.next() => {
                        match message {
                            Some(Ok(Message::Text(text))) => {
                                Self::process_listen_message(
                                    &text,
                                    &mut assembler,
                                    &signal,
                                    &transcript_tx,
                                );
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!("Listen stream closed by server: {frame:?}");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("Listen stream error: {e}");
                                break;
                            }
                            None => {
                                info!("Listen stream ended");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Listen stream shutdown requested");
                        break;
                    }
                }
            }

            // Dropping transcript_tx here closes the per-call transcript
            // stream, which is how downstream learns the stream is gone.
            *state.write().await = ProviderState::Disconnected;
        });

        let keepalive_state = self.state.clone();
        let keepalive_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if *keepalive_state.read().await != ProviderState::Connected {
                    break;
                }
                let msg = Message::Text(r#"{"type":"KeepAlive"}"#.into());
                if ws_tx.send(msg).is_err() {
                    warn!("Listen keep-alive failed; connection task gone");
                    break;
                }
            }
        });

        self.task_handles.push(connection_handle);
        self.task_handles.push(keepalive_handle);

        *self.state.write().await = ProviderState::Connected;
        info!("Deepgram listen stream connected");
        Ok(())
    }

    async fn send_audio(&self, pcm: Bytes) -> SttResult<()> {
        if let Some(sender) = &self.ws_sender {
            if *self.state.read().await == ProviderState::Connected {
                // Fire-and-forget: a closed channel means the connection is
                // already gone and the frame is silently dropped.
                let _ = sender.send(Message::Binary(pcm));
            }
        }
        Ok(())
    }

    fn take_transcripts(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.transcript_rx.take()
    }

    fn speech_signal(&self) -> Arc<SpeechSignal> {
        self.signal.clone()
    }

    async fn close(&mut self) -> SttResult<()> {
        {
            let mut state = self.state.write().await;
            if *state == ProviderState::Closed {
                return Ok(());
            }
            *state = ProviderState::Draining;
        }

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        for handle in self.task_handles.drain(..) {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        self.ws_sender = None;

        *self.state.write().await = ProviderState::Closed;
        info!("Deepgram listen stream closed");
        Ok(())
    }
}

impl Drop for DeepgramRecognizer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SttConfig {
        SttConfig {
            api_key: "test_key".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_requires_api_key() {
        let result = DeepgramRecognizer::new(SttConfig::default());
        assert!(matches!(result, Err(SttError::AuthenticationFailed(_))));
    }

    #[test]
    fn test_websocket_url_building() {
        let url = DeepgramRecognizer::build_websocket_url(&test_config(), 16000).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some("api.deepgram.com"));
        assert_eq!(url.path(), "/v1/listen");

        let query: std::collections::HashMap<String, String> =
            url.query_pairs().into_owned().collect();
        assert_eq!(query.get("encoding"), Some(&"linear16".to_string()));
        assert_eq!(query.get("sample_rate"), Some(&"16000".to_string()));
        assert_eq!(query.get("channels"), Some(&"1".to_string()));
        assert_eq!(query.get("model"), Some(&"nova-2".to_string()));
        assert_eq!(query.get("interim_results"), Some(&"true".to_string()));
        assert_eq!(query.get("endpointing"), Some(&"200".to_string()));
        assert_eq!(query.get("vad_events"), Some(&"true".to_string()));
    }

    #[tokio::test]
    async fn test_speech_started_raises_signal() {
        let mut assembler = UtteranceAssembler::new();
        let signal = SpeechSignal::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        DeepgramRecognizer::process_listen_message(
            r#"{"type":"SpeechStarted"}"#,
            &mut assembler,
            &signal,
            &tx,
        );

        assert!(signal.is_raised());
        assert!(rx.try_recv().is_err(), "no transcript for speech onset");
    }

    #[tokio::test]
    async fn test_interim_results_coalesce_until_speech_final() {
        let mut assembler = UtteranceAssembler::new();
        let signal = SpeechSignal::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let segments = [
            // Non-final hypothesis: buffered nowhere
            r#"{"type":"Results","is_final":false,"speech_final":false,"channel":{"alternatives":[{"transcript":"i'd like"}]}}"#,
            // Finalized segment, utterance still open
            r#"{"type":"Results","is_final":true,"speech_final":false,"channel":{"alternatives":[{"transcript":"I'd like to book"}]}}"#,
            // Endpoint reached
            r#"{"type":"Results","is_final":true,"speech_final":true,"channel":{"alternatives":[{"transcript":"a consultation"}]}}"#,
        ];
        for seg in segments {
            DeepgramRecognizer::process_listen_message(seg, &mut assembler, &signal, &tx);
        }

        assert_eq!(rx.try_recv().unwrap(), "I'd like to book a consultation");
        assert!(rx.try_recv().is_err(), "exactly one transcript per boundary");
    }

    #[tokio::test]
    async fn test_empty_boundary_emits_nothing() {
        let mut assembler = UtteranceAssembler::new();
        let signal = SpeechSignal::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        DeepgramRecognizer::process_listen_message(
            r#"{"type":"Results","is_final":true,"speech_final":true,"channel":{"alternatives":[{"transcript":"  "}]}}"#,
            &mut assembler,
            &signal,
            &tx,
        );
        DeepgramRecognizer::process_listen_message(
            r#"{"type":"UtteranceEnd"}"#,
            &mut assembler,
            &signal,
            &tx,
        );

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_utterance_end_flushes_pending_segments() {
        let mut assembler = UtteranceAssembler::new();
        let signal = SpeechSignal::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        DeepgramRecognizer::process_listen_message(
            r#"{"type":"Results","is_final":true,"speech_final":false,"channel":{"alternatives":[{"transcript":"hello there"}]}}"#,
            &mut assembler,
            &signal,
            &tx,
        );
        DeepgramRecognizer::process_listen_message(
            r#"{"type":"UtteranceEnd"}"#,
            &mut assembler,
            &signal,
            &tx,
        );

        assert_eq!(rx.try_recv().unwrap(), "hello there");
    }

    #[tokio::test]
    async fn test_send_audio_silently_dropped_when_not_connected() {
        let recognizer = DeepgramRecognizer::new(test_config()).unwrap();
        // Never connected: no error, frame dropped
        recognizer
            .send_audio(Bytes::from_static(&[0u8; 320]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent_without_connection() {
        let mut recognizer = DeepgramRecognizer::new(test_config()).unwrap();
        recognizer.close().await.unwrap();
        recognizer.close().await.unwrap();
    }
}
