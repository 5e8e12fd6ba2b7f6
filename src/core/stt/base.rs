use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::{Notify, mpsc};

/// Configuration for streaming recognition providers
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct SttConfig {
    /// API key for the recognition provider
    pub api_key: String,
    /// Language code for transcription (e.g., "en-US")
    pub language: String,
    /// Recognition model
    pub model: String,
    /// Silence endpointing threshold in milliseconds
    pub endpointing_ms: u32,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            language: "en-US".to_string(),
            model: "nova-2".to_string(),
            endpointing_ms: 200,
        }
    }
}

/// Error types for recognition operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum SttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
}

/// Result type for recognition operations
pub type SttResult<T> = Result<T, SttError>;

/// Speech-onset signal observed by the barge-in monitor.
///
/// Raised by the recognizer on any detected speech energy, independent of
/// whether a transcript is ultimately produced; cleared by the consumer.
#[derive(Default)]
pub struct SpeechSignal {
    raised: AtomicBool,
    notify: Notify,
}

impl SpeechSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal, waking any waiter.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Wait until the signal is raised.
    pub async fn wait(&self) {
        loop {
            // Register interest before checking the flag so a raise() between
            // the check and the await is not lost.
            let notified = self.notify.notified();
            if self.raised.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    pub fn clear(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

/// Base trait for streaming speech recognition providers
///
/// One instance serves exactly one call. The finalized-transcript stream is
/// restartable within the call (the receiver can be taken once) but never
/// across calls; a fresh recognizer is built per call.
#[async_trait::async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Open the streaming recognition connection.
    ///
    /// A handshake failure is fatal to the call leg and is not retried here.
    async fn connect(&mut self, sample_rate: u32) -> SttResult<()>;

    /// Send one PCM frame. Fire-and-forget while connected; frames sent
    /// after `close()` are silently dropped.
    async fn send_audio(&self, pcm: Bytes) -> SttResult<()>;

    /// Take the finalized-transcript receiver. Yields one string per
    /// utterance boundary; the channel closes when the upstream connection
    /// is lost or the recognizer is closed.
    fn take_transcripts(&mut self) -> Option<mpsc::UnboundedReceiver<String>>;

    /// Shared speech-activity signal for barge-in detection.
    fn speech_signal(&self) -> Arc<SpeechSignal>;

    /// Close the connection. Idempotent; safe after a prior failure.
    async fn close(&mut self) -> SttResult<()>;
}

/// Buffers interim utterance fragments and flushes them at a boundary.
///
/// Fragments are concatenated with a single space and trimmed; a flush with
/// nothing buffered yields `None` so no empty transcript is ever emitted.
#[derive(Default)]
pub struct UtteranceAssembler {
    fragments: Vec<String>,
}

impl UtteranceAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &str) {
        let trimmed = fragment.trim();
        if !trimmed.is_empty() {
            self.fragments.push(trimmed.to_string());
        }
    }

    pub fn flush(&mut self) -> Option<String> {
        if self.fragments.is_empty() {
            return None;
        }
        let utterance = self.fragments.join(" ");
        self.fragments.clear();
        Some(utterance)
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}
