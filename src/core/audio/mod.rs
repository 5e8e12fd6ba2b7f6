//! Audio transport adaptation
//!
//! Converts between a call leg's native audio (8kHz mu-law telephony frames
//! or browser PCM at an announced rate) and the fixed-rate linear PCM the
//! speech recognizer consumes, and gates inbound audio through an
//! echo-suppression window so leaked agent audio cannot re-trigger
//! recognition.

pub mod codec;
pub mod resample;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use resample::LinearResampler;

/// Default echo-suppression window after an outbound audio send.
pub const DEFAULT_ECHO_SUPPRESSION_MS: u64 = 500;

/// Native encoding of a call leg's inbound audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundCodec {
    /// Companded 8kHz telephony audio.
    Mulaw8k,
    /// Raw little-endian 16-bit PCM at the given sample rate.
    Pcm { sample_rate: u32 },
}

impl InboundCodec {
    fn sample_rate(&self) -> u32 {
        match self {
            InboundCodec::Mulaw8k => 8000,
            InboundCodec::Pcm { sample_rate } => *sample_rate,
        }
    }
}

/// Echo-suppression window shared between the outbound forwarder (which
/// marks sends) and the inbound reader (which checks the gate).
///
/// The window restarts on every outbound send; it is not cumulative.
pub struct EchoGate {
    window: Duration,
    last_outbound: Mutex<Option<Instant>>,
}

impl EchoGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_outbound: Mutex::new(None),
        }
    }

    /// Record an outbound audio send, restarting the suppression window.
    pub fn mark_outbound(&self) {
        *self.last_outbound.lock() = Some(Instant::now());
    }

    /// Whether inbound audio may currently be forwarded to recognition.
    pub fn should_forward(&self) -> bool {
        match *self.last_outbound.lock() {
            Some(at) => at.elapsed() >= self.window,
            None => true,
        }
    }

    #[cfg(test)]
    fn mark_outbound_at(&self, at: Instant) {
        *self.last_outbound.lock() = Some(at);
    }
}

/// Per-call audio adapter between the leg's wire format and recognizer PCM.
pub struct TransportAdapter {
    codec: InboundCodec,
    resampler: LinearResampler,
    echo: Arc<EchoGate>,
}

impl TransportAdapter {
    pub fn new(codec: InboundCodec, target_rate: u32, echo: Arc<EchoGate>) -> Self {
        Self {
            codec,
            resampler: LinearResampler::new(codec.sample_rate(), target_rate),
            echo,
        }
    }

    /// Convert one inbound frame to recognizer PCM.
    ///
    /// Decoding and resampling always run so the resampler state stays
    /// continuous; the echo gate only decides whether the result is
    /// forwarded. Returns `None` when the frame is suppressed or empty.
    pub fn inbound(&mut self, frame: &[u8]) -> Option<Bytes> {
        let samples = match self.codec {
            InboundCodec::Mulaw8k => {
                let pcm = codec::mulaw_to_pcm16(frame);
                codec::pcm16_bytes_to_samples(&pcm)
            }
            InboundCodec::Pcm { .. } => codec::pcm16_bytes_to_samples(frame),
        };
        let resampled = self.resampler.process(&samples);

        if !self.echo.should_forward() || resampled.is_empty() {
            return None;
        }
        Some(Bytes::from(codec::samples_to_pcm16_bytes(&resampled)))
    }

    /// Handle to the echo gate, for the outbound forwarder.
    pub fn echo_gate(&self) -> Arc<EchoGate> {
        self.echo.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(codec: InboundCodec, window_ms: u64) -> TransportAdapter {
        let echo = Arc::new(EchoGate::new(Duration::from_millis(window_ms)));
        TransportAdapter::new(codec, 16000, echo)
    }

    #[test]
    fn test_inbound_mulaw_is_decoded_and_upsampled() {
        let mut a = adapter(InboundCodec::Mulaw8k, 500);
        // 20ms of mu-law silence at 8kHz
        let out = a.inbound(&vec![0xFFu8; 160]).expect("forwarded");
        // 8k -> 16k doubles the sample count, i16 doubles the byte count
        let expected = 160 * 2 * 2;
        assert!((out.len() as i64 - expected as i64).abs() <= 4);
    }

    #[test]
    fn test_inbound_suppressed_within_echo_window() {
        let mut a = adapter(InboundCodec::Pcm { sample_rate: 16000 }, 500);
        a.echo_gate().mark_outbound();
        assert!(a.inbound(&vec![0u8; 640]).is_none());
    }

    #[test]
    fn test_inbound_forwarded_outside_echo_window() {
        let mut a = adapter(InboundCodec::Pcm { sample_rate: 16000 }, 500);
        a.echo_gate()
            .mark_outbound_at(Instant::now() - Duration::from_millis(600));
        assert!(a.inbound(&vec![0u8; 640]).is_some());
    }

    #[test]
    fn test_echo_window_resets_on_every_send() {
        let gate = EchoGate::new(Duration::from_millis(500));
        gate.mark_outbound_at(Instant::now() - Duration::from_millis(600));
        assert!(gate.should_forward());
        gate.mark_outbound();
        assert!(!gate.should_forward());
    }

    #[test]
    fn test_suppressed_frames_still_advance_resampler_state() {
        // The gate must not desynchronize resampling: a suppressed frame is
        // decoded and resampled, only the forwarding is skipped.
        let mut a = adapter(InboundCodec::Pcm { sample_rate: 48000 }, 500);
        let mut total = 0usize;
        for i in 0..10 {
            if i == 0 {
                a.echo_gate()
                    .mark_outbound_at(Instant::now() - Duration::from_millis(600));
            }
            if let Some(out) = a.inbound(&vec![0u8; 960]) {
                total += out.len() / 2;
            }
        }
        // 10 chunks of 480 samples at 48k -> 160 each at 16k, all forwarded
        assert!((total as i64 - 1600).abs() <= 2);
    }
}
