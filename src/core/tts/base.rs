//! Base abstractions for streaming text-to-speech providers
//!
//! Providers accept incremental reply text and emit incremental audio in
//! their native encoding. The per-call audio sequence is exposed through a
//! shared [`AudioQueue`] so barge-in can discard everything buffered without
//! tearing down the consumer.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

/// TTS-specific error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum TtsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Provider not ready: {0}")]
    ProviderNotReady(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type for TTS operations
pub type TtsResult<T> = Result<T, TtsError>;

/// Connection state for TTS providers
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Not connected to the provider
    Disconnected,
    /// Currently connecting to the provider
    Connecting,
    /// Connected and ready to accept text
    Connected,
    /// Shutting down, letting queued audio drain
    Draining,
    /// Closed for the remainder of the call
    Closed,
}

/// Configuration for TTS providers
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct TtsConfig {
    /// API key for the TTS provider
    pub api_key: String,
    /// Voice ID or model name to synthesize with
    pub voice_id: Option<String>,
    /// Provider model
    pub model: String,
    /// Audio encoding requested from the provider
    pub audio_format: String,
    /// Sample rate requested from the provider
    pub sample_rate: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            voice_id: None,
            model: String::new(),
            // Call legs play companded telephony audio
            audio_format: "mulaw".to_string(),
            sample_rate: 8000,
        }
    }
}

/// Buffered per-call audio sequence.
///
/// Producers push provider-native chunks; the single outbound forwarder
/// pops them. `clear()` discards everything queued (barge-in); after
/// `close()` the queue drains and then yields `None`.
#[derive(Default)]
pub struct AudioQueue {
    chunks: parking_lot::Mutex<VecDeque<Bytes>>,
    notify: Notify,
    closed: AtomicBool,
}

impl AudioQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, chunk: Bytes) {
        self.chunks.lock().push_back(chunk);
        self.notify.notify_waiters();
    }

    /// Discard all buffered audio immediately.
    pub fn clear(&self) {
        self.chunks.lock().clear();
    }

    /// Mark the sequence finished; pending chunks still drain.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Pop the next chunk, waiting if the queue is empty. Returns `None`
    /// only once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Bytes> {
        loop {
            let notified = self.notify.notified();
            if let Some(chunk) = self.chunks.lock().pop_front() {
                return Some(chunk);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }
}

/// Shared handle to a provider's audio sequence
pub type AudioStream = Arc<AudioQueue>;

/// Base trait for streaming text-to-speech providers
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Connect to the provider. A failure here is reported to the caller;
    /// the failover wrapper decides whether another provider is tried.
    async fn connect(&mut self) -> TtsResult<()>;

    /// Forward an incremental chunk of reply text for synthesis.
    ///
    /// If a stream-loss reconnect is in flight, the send waits for it to
    /// complete before forwarding; text is never silently dropped while the
    /// provider is running.
    async fn send_text(&self, text: &str) -> TtsResult<()>;

    /// Signal a synthesis boundary: emit audio for everything sent so far
    /// without waiting for more text.
    async fn flush(&self) -> TtsResult<()>;

    /// Discard all buffered audio and cancel in-flight synthesis.
    async fn interrupt(&self) -> TtsResult<()>;

    /// The per-call audio sequence. Ends only when the provider is closed
    /// and the queue has drained.
    fn audio(&self) -> AudioStream;

    /// Close the connection, sending a provider-specific termination
    /// courtesy message where supported. Idempotent and shared-safe so the
    /// call teardown path can close a speaker other tasks still reference.
    async fn close(&self) -> TtsResult<()>;

    /// Whether the provider currently accepts text.
    fn is_ready(&self) -> bool;

    /// Provider name for logs.
    fn name(&self) -> &'static str;
}
