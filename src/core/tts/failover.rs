//! Primary/secondary TTS failover
//!
//! Wraps an ordered pair of synthesizers behind the same interface. The
//! connect attempt walks the pair once; whichever provider connects becomes
//! active for the remainder of the call. There is no per-utterance
//! re-selection: mid-call recovery is each provider's own reconnection.

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::base::{AudioStream, SpeechSynthesizer, TtsError, TtsResult};

enum Active {
    None,
    Primary,
    Secondary,
}

/// Failover decorator over an ordered (primary, secondary) provider pair.
pub struct FailoverSpeaker {
    primary: Box<dyn SpeechSynthesizer>,
    secondary: Box<dyn SpeechSynthesizer>,
    active: Active,
}

impl FailoverSpeaker {
    pub fn new(primary: Box<dyn SpeechSynthesizer>, secondary: Box<dyn SpeechSynthesizer>) -> Self {
        Self {
            primary,
            secondary,
            active: Active::None,
        }
    }

    fn active(&self) -> Option<&dyn SpeechSynthesizer> {
        match self.active {
            Active::None => None,
            Active::Primary => Some(self.primary.as_ref()),
            Active::Secondary => Some(self.secondary.as_ref()),
        }
    }

    /// Name of the provider currently selected, for logs and tests.
    pub fn active_name(&self) -> Option<&'static str> {
        self.active().map(|p| p.name())
    }
}

#[async_trait]
impl SpeechSynthesizer for FailoverSpeaker {
    async fn connect(&mut self) -> TtsResult<()> {
        match self.primary.connect().await {
            Ok(()) => {
                info!("TTS connected via primary provider {}", self.primary.name());
                self.active = Active::Primary;
                return Ok(());
            }
            Err(e) => {
                warn!(
                    "Primary TTS ({}) failed, falling back to {}: {e}",
                    self.primary.name(),
                    self.secondary.name()
                );
            }
        }
        match self.secondary.connect().await {
            Ok(()) => {
                info!(
                    "TTS connected via secondary provider {}",
                    self.secondary.name()
                );
                self.active = Active::Secondary;
                Ok(())
            }
            Err(e) => {
                error!("Secondary TTS ({}) also failed: {e}", self.secondary.name());
                Err(TtsError::ConnectionFailed(
                    "All TTS providers failed to connect".to_string(),
                ))
            }
        }
    }

    async fn send_text(&self, text: &str) -> TtsResult<()> {
        match self.active() {
            Some(provider) => provider.send_text(text).await,
            None => Err(TtsError::ProviderNotReady(
                "No active TTS provider".to_string(),
            )),
        }
    }

    async fn flush(&self) -> TtsResult<()> {
        match self.active() {
            Some(provider) => provider.flush().await,
            None => Err(TtsError::ProviderNotReady(
                "No active TTS provider".to_string(),
            )),
        }
    }

    async fn interrupt(&self) -> TtsResult<()> {
        match self.active() {
            Some(provider) => provider.interrupt().await,
            None => Ok(()),
        }
    }

    fn audio(&self) -> AudioStream {
        match self.active() {
            Some(provider) => provider.audio(),
            // Nothing connected yet: the primary's (empty) sequence keeps the
            // forwarder well-defined.
            None => self.primary.audio(),
        }
    }

    async fn close(&self) -> TtsResult<()> {
        match self.active() {
            Some(provider) => provider.close().await,
            None => Ok(()),
        }
    }

    fn is_ready(&self) -> bool {
        self.active().map(|p| p.is_ready()).unwrap_or(false)
    }

    fn name(&self) -> &'static str {
        "failover"
    }
}
