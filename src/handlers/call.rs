//! Per-call duplex session wiring
//!
//! One [`CallHandler`] runs a WebSocket call leg end to end. Four
//! long-lived units run per call: the inbound-audio loop (this task), the
//! transcript consumer, the outbound-audio forwarder and the barge-in
//! monitor. Only the transcript consumer starts response work, and it
//! awaits each response before taking the next transcript, so at most one
//! response task exists per call at any time.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::agents::orchestrator::{FALLBACK_REPLY, pick_filler_phrase, process_utterance};
use crate::core::agents::AgentStack;
use crate::core::audio::{EchoGate, InboundCodec, TransportAdapter};
use crate::core::session::{CallPhase, CallSession, SpeakingGuard, TurnRole};
use crate::core::stt::SpeechRecognizer;
use crate::core::tts::{FailoverSpeaker, SpeechSynthesizer};

use super::messages::{InboundLegMessage, MediaPayload, OutboundLegMessage};

/// Fixed rate the recognizer is fed at, whatever the leg's native rate.
pub const RECOGNIZER_SAMPLE_RATE: u32 = 16000;

const OUTBOUND_CHANNEL_SIZE: usize = 256;

/// WebSocket policy close codes for fatal setup failures
const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Everything one call needs, built per connection by the leg endpoints.
pub struct CallHandler {
    session: Arc<CallSession>,
    agents: AgentStack,
    recognizer: Box<dyn SpeechRecognizer>,
    speaker: FailoverSpeaker,
    echo_window: Duration,
}

impl CallHandler {
    pub fn new(
        session: Arc<CallSession>,
        agents: AgentStack,
        recognizer: Box<dyn SpeechRecognizer>,
        speaker: FailoverSpeaker,
        echo_window: Duration,
    ) -> Self {
        Self {
            session,
            agents,
            recognizer,
            speaker,
            echo_window,
        }
    }

    /// Run the call to completion. Owns the socket; every exit path closes
    /// both provider connections.
    pub async fn run(mut self, mut socket: WebSocket, codec: InboundCodec) {
        let session = self.session.clone();
        session.set_phase(CallPhase::Connecting);

        // Connect failures on either provider are fatal to the call leg.
        if let Err(e) = self.recognizer.connect(RECOGNIZER_SAMPLE_RATE).await {
            error!("Failed to connect speech recognition: {e}");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_INTERNAL_ERROR,
                    reason: "speech recognition unavailable".into(),
                })))
                .await;
            return;
        }
        if let Err(e) = self.speaker.connect().await {
            error!("Failed to connect speech synthesis: {e}");
            let _ = self.recognizer.close().await;
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_INTERNAL_ERROR,
                    reason: "speech synthesis unavailable".into(),
                })))
                .await;
            return;
        }

        let speaker = Arc::new(self.speaker);
        let speech_signal = self.recognizer.speech_signal();
        let transcripts = self
            .recognizer
            .take_transcripts()
            .expect("transcript receiver available after connect");
        let mut recognizer = self.recognizer;

        let (mut ws_sink, mut ws_source) = socket.split();
        let (leg_tx, mut leg_rx) = mpsc::channel::<OutboundLegMessage>(OUTBOUND_CHANNEL_SIZE);
        let stream_sid: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        // Outgoing leg messages are serialized by one task so the sink is
        // never contended.
        let sender_task = tokio::spawn(async move {
            while let Some(message) = leg_rx.recv().await {
                match serde_json::to_string(&message) {
                    Ok(json) => {
                        if ws_sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => error!("Failed to serialize leg message: {e}"),
                }
            }
        });

        let echo = Arc::new(EchoGate::new(self.echo_window));
        let mut adapter = TransportAdapter::new(codec, RECOGNIZER_SAMPLE_RATE, echo.clone());

        // Greeting goes out before any transcripts arrive.
        session.set_phase(CallPhase::Greeting);
        let greeting = format!(
            "Hi, thanks for calling {}. How can I help you?",
            session.business.name
        );
        if let Err(e) = speak_and_flush(speaker.as_ref(), &greeting).await {
            warn!("Failed to speak greeting: {e}");
        }
        session.append_turn(TurnRole::Agent, greeting);
        session.set_phase(CallPhase::Listening);

        let mut consumer_task = tokio::spawn(transcript_consumer(
            session.clone(),
            self.agents.clone(),
            speaker.clone(),
            transcripts,
        ));
        let forwarder_task = tokio::spawn(audio_forwarder(
            speaker.audio(),
            leg_tx.clone(),
            stream_sid.clone(),
            echo.clone(),
        ));
        let monitor_task = tokio::spawn(bargein_monitor(
            session.clone(),
            speaker.clone(),
            leg_tx.clone(),
            stream_sid.clone(),
            speech_signal,
        ));

        // Inbound loop: leg frames into the recognizer until the leg stops
        // or the transcript stream dies (fatal ASR loss).
        loop {
            tokio::select! {
                incoming = ws_source.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<InboundLegMessage>(&text) {
                                Ok(InboundLegMessage::Start { start }) => {
                                    info!("Call leg stream started: {}", start.stream_sid);
                                    *stream_sid.lock() = Some(start.stream_sid);
                                }
                                Ok(InboundLegMessage::Media { media }) => {
                                    match BASE64.decode(media.payload.as_bytes()) {
                                        Ok(frame) => {
                                            if let Some(pcm) = adapter.inbound(&frame) {
                                                let _ = recognizer.send_audio(pcm).await;
                                            }
                                        }
                                        Err(e) => warn!("Undecodable media payload: {e}"),
                                    }
                                }
                                Ok(InboundLegMessage::Config { sample_rate }) => {
                                    info!("Call leg announced sample rate {sample_rate}");
                                    adapter = TransportAdapter::new(
                                        InboundCodec::Pcm { sample_rate },
                                        RECOGNIZER_SAMPLE_RATE,
                                        echo.clone(),
                                    );
                                }
                                Ok(InboundLegMessage::Stop) => {
                                    info!("Call leg sent stop");
                                    break;
                                }
                                Err(e) => debug!("Ignoring unknown leg message: {e}"),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Call leg disconnected");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Call leg socket error: {e}");
                            break;
                        }
                    }
                }
                _ = &mut consumer_task => {
                    // The transcript channel only closes when the
                    // recognition stream is lost; that is unrecoverable.
                    warn!("Transcript stream ended; closing call");
                    break;
                }
            }
        }

        session.set_phase(CallPhase::Closing);
        let _ = recognizer.close().await;
        let _ = speaker.close().await;
        consumer_task.abort();
        forwarder_task.abort();
        monitor_task.abort();
        sender_task.abort();
        session.set_phase(CallPhase::Closed);
        info!("Call closed after {} turns", session.history_len());
    }
}

async fn speak_and_flush(
    speaker: &dyn SpeechSynthesizer,
    text: &str,
) -> crate::core::tts::TtsResult<()> {
    speaker.send_text(text).await?;
    speaker.flush().await
}

/// Unit (b): drives the orchestration loop, one utterance at a time.
async fn transcript_consumer(
    session: Arc<CallSession>,
    agents: AgentStack,
    speaker: Arc<FailoverSpeaker>,
    mut transcripts: mpsc::UnboundedReceiver<String>,
) {
    while let Some(utterance) = transcripts.recv().await {
        if session.is_speaking() {
            // A transcript that raced an active response is dropped rather
            // than spawning a second concurrent response.
            debug!("Dropping transcript while speaking: {utterance}");
            continue;
        }

        info!("Caller said: {utterance}");
        session.set_phase(CallPhase::Processing);
        let cancel = session.begin_response();
        let guard = SpeakingGuard::begin(session.clone());

        if let Some(filler) = pick_filler_phrase(&utterance) {
            if let Err(e) = speak_and_flush(speaker.as_ref(), filler).await {
                warn!("Failed to speak filler: {e}");
            }
        }

        let result = process_utterance(
            &session,
            &agents,
            speaker.as_ref(),
            &utterance,
            &cancel,
        )
        .await;

        if let Err(e) = result {
            error!("Utterance processing failed: {e}");
            let _ = speak_and_flush(speaker.as_ref(), FALLBACK_REPLY).await;
        }

        drop(guard);
    }
}

/// Unit (c): drains synthesized audio to the leg and stamps the echo gate.
async fn audio_forwarder(
    audio: crate::core::tts::AudioStream,
    leg_tx: mpsc::Sender<OutboundLegMessage>,
    stream_sid: Arc<Mutex<Option<String>>>,
    echo: Arc<EchoGate>,
) {
    while let Some(chunk) = audio.pop().await {
        echo.mark_outbound();
        let message = OutboundLegMessage::Media {
            stream_sid: stream_sid.lock().clone(),
            media: MediaPayload {
                payload: BASE64.encode(&chunk),
            },
        };
        if leg_tx.send(message).await.is_err() {
            break;
        }
    }
}

/// Unit (d): watches the speech-activity signal for the life of the call.
///
/// Speech while the agent is Speaking cancels the response task, discards
/// synthesis, and tells the leg to drop its playback buffer. Speech while
/// Listening is the caller talking normally and does nothing.
async fn bargein_monitor(
    session: Arc<CallSession>,
    speaker: Arc<FailoverSpeaker>,
    leg_tx: mpsc::Sender<OutboundLegMessage>,
    stream_sid: Arc<Mutex<Option<String>>>,
    signal: Arc<crate::core::stt::SpeechSignal>,
) {
    loop {
        signal.wait().await;
        if session.is_speaking() {
            info!("Barge-in: caller spoke while agent was speaking");
            session.cancel_response();
            if let Err(e) = speaker.interrupt().await {
                warn!("Failed to interrupt synthesis: {e}");
            }
            let clear = OutboundLegMessage::Clear {
                stream_sid: stream_sid.lock().clone(),
            };
            let _ = leg_tx.send(clear).await;
            session.set_phase(CallPhase::Listening);
        }
        signal.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    use crate::core::session::BusinessContext;
    use crate::core::stt::SpeechSignal;
    use crate::core::tts::{AudioQueue, AudioStream, TtsResult};

    struct TestSpeaker {
        queue: AudioStream,
        interrupted: Arc<AtomicBool>,
    }

    impl TestSpeaker {
        fn new() -> (Self, Arc<AtomicBool>) {
            let interrupted = Arc::new(AtomicBool::new(false));
            (
                Self {
                    queue: Arc::new(AudioQueue::new()),
                    interrupted: interrupted.clone(),
                },
                interrupted,
            )
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for TestSpeaker {
        async fn connect(&mut self) -> TtsResult<()> {
            Ok(())
        }

        async fn send_text(&self, _text: &str) -> TtsResult<()> {
            Ok(())
        }

        async fn flush(&self) -> TtsResult<()> {
            Ok(())
        }

        async fn interrupt(&self) -> TtsResult<()> {
            self.queue.clear();
            self.interrupted.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn audio(&self) -> AudioStream {
            self.queue.clone()
        }

        async fn close(&self) -> TtsResult<()> {
            Ok(())
        }

        fn is_ready(&self) -> bool {
            true
        }

        fn name(&self) -> &'static str {
            "test"
        }
    }

    fn test_session() -> Arc<CallSession> {
        Arc::new(CallSession::new(BusinessContext {
            business_id: Uuid::new_v4(),
            name: "Test Clinic".to_string(),
            location: String::new(),
            hours: String::new(),
            policies: String::new(),
        }))
    }

    async fn monitor_fixture() -> (
        Arc<CallSession>,
        Arc<SpeechSignal>,
        Arc<AtomicBool>,
        mpsc::Receiver<OutboundLegMessage>,
    ) {
        let session = test_session();
        let (primary, interrupted) = TestSpeaker::new();
        let (secondary, _) = TestSpeaker::new();
        let mut failover = FailoverSpeaker::new(Box::new(primary), Box::new(secondary));
        failover.connect().await.unwrap();
        let speaker = Arc::new(failover);

        let (leg_tx, leg_rx) = mpsc::channel(8);
        let stream_sid = Arc::new(Mutex::new(Some("MZ1".to_string())));
        let signal = Arc::new(SpeechSignal::new());

        tokio::spawn(bargein_monitor(
            session.clone(),
            speaker,
            leg_tx,
            stream_sid,
            signal.clone(),
        ));

        (session, signal, interrupted, leg_rx)
    }

    #[tokio::test]
    async fn test_speech_while_listening_is_a_noop() {
        let (session, signal, interrupted, mut leg_rx) = monitor_fixture().await;
        session.set_phase(CallPhase::Listening);

        signal.raise();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!interrupted.load(Ordering::SeqCst));
        assert!(leg_rx.try_recv().is_err(), "no clear message sent");
        assert!(!signal.is_raised(), "signal cleared by the monitor");
        assert_eq!(session.phase(), CallPhase::Listening);
    }

    #[tokio::test]
    async fn test_speech_while_speaking_triggers_bargein() {
        let (session, signal, interrupted, mut leg_rx) = monitor_fixture().await;

        let token = session.begin_response();
        session.set_speaking(true);
        session.set_phase(CallPhase::Speaking);

        signal.raise();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(interrupted.load(Ordering::SeqCst), "synthesis interrupted");
        assert!(token.is_cancelled(), "response task cancelled");
        assert_eq!(session.phase(), CallPhase::Listening);
        assert!(!signal.is_raised());

        match leg_rx.try_recv() {
            Ok(OutboundLegMessage::Clear { stream_sid }) => {
                assert_eq!(stream_sid.as_deref(), Some("MZ1"));
            }
            other => panic!("expected clear message, got {other:?}"),
        }
    }
}
