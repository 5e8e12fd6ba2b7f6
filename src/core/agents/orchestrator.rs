//! Per-utterance orchestration loop
//!
//! For each finalized utterance: classify (skipping retrieval for simple
//! exchanges), apply the sticky booking override, dispatch the intent,
//! then stream the synthesized reply into TTS in latency-bounded chunks.
//! The whole loop is cooperatively cancellable; barge-in cancels it at any
//! suspension point and the partial reply already spoken stays in history.

use std::future::Future;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::booking;
use super::intent::Intent;
use super::retrieval::join_passages;
use super::search::NO_RESULTS;
use super::synthesizer::SynthesisRequest;
use super::{AgentResult, AgentStack};
use crate::core::session::{CallSession, HISTORY_WINDOW, TurnRole};
use crate::core::tts::SpeechSynthesizer;

/// Smaller first chunk so audio starts sooner; larger afterwards.
pub const FIRST_CHUNK_SIZE: usize = 50;
pub const SUBSEQUENT_CHUNK_SIZE: usize = 80;

/// Turns of history handed to classification.
const RECENT_CONTEXT_TURNS: usize = 4;

/// Safe reply when the NLU collaborator fails on an utterance.
pub const FALLBACK_REPLY: &str = "Sorry, I had trouble with that. Could you say that again?";

/// Spoken once if the first reply token has not arrived by this deadline,
/// measured from the start of utterance processing.
const DELAY_FILLER_AFTER: Duration = Duration::from_secs(4);
const DELAY_FILLER_TEXT: &str = "Still looking, one moment...";

static SIMPLE_EXCHANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(hi|hello|hey|good\s*(morning|afternoon|evening)|bye|goodbye|see\s*you|thanks|thank\s*you)\s*[.!?]*\s*$",
    )
    .expect("valid regex")
});

static BOOKING_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(book|booking|appointment|schedule|reserve|cancel)\b").expect("valid regex")
});

static QUESTION_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(what|when|where|how|can|do you|is there|are there|tell me|info)\b")
        .expect("valid regex")
});

/// Fast local check for greetings, farewells and acknowledgements; these
/// skip knowledge retrieval entirely to save latency.
pub fn is_simple_exchange(utterance: &str) -> bool {
    SIMPLE_EXCHANGE_RE.is_match(utterance)
}

/// Short phrase spoken while downstream work runs; none for simple
/// exchanges, which answer fast anyway.
pub fn pick_filler_phrase(utterance: &str) -> Option<&'static str> {
    if is_simple_exchange(utterance) {
        return None;
    }
    if BOOKING_KEYWORD_RE.is_match(utterance) {
        return Some("Let me check that for you.");
    }
    if QUESTION_KEYWORD_RE.is_match(utterance) {
        return Some("Let me look into that.");
    }
    Some("One moment.")
}

/// Accumulates reply tokens and decides when a chunk goes to synthesis:
/// on a size threshold (smaller for the very first chunk) or trailing
/// sentence punctuation.
pub struct ReplyChunker {
    buffer: String,
    first: bool,
}

impl ReplyChunker {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            first: true,
        }
    }

    pub fn push(&mut self, token: &str) -> Option<String> {
        self.buffer.push_str(token);
        if self.buffer.is_empty() {
            return None;
        }
        let threshold = if self.first {
            FIRST_CHUNK_SIZE
        } else {
            SUBSEQUENT_CHUNK_SIZE
        };
        let at_punctuation = self
            .buffer
            .trim_end()
            .ends_with(&['.', '!', '?', ','][..]);
        if self.buffer.len() >= threshold || at_punctuation {
            self.first = false;
            return Some(std::mem::take(&mut self.buffer));
        }
        None
    }

    /// Whatever remains at stream end.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

impl Default for ReplyChunker {
    fn default() -> Self {
        Self::new()
    }
}

/// Await a collaborator call unless the response is cancelled first.
async fn cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = fut => Some(result),
    }
}

/// Process one finalized utterance end to end.
///
/// Appends the caller turn, runs classification (and retrieval when the
/// utterance is not a simple exchange), dispatches the effective intent,
/// streams the reply into `tts`, and appends the agent turn exactly once
/// after streaming completes or is cancelled.
pub async fn process_utterance(
    session: &CallSession,
    agents: &AgentStack,
    tts: &dyn SpeechSynthesizer,
    utterance: &str,
    cancel: &CancellationToken,
) -> AgentResult<()> {
    let started = tokio::time::Instant::now();
    session.append_turn(TurnRole::Caller, utterance);

    let simple = is_simple_exchange(utterance);
    let recent = session.recent_history(RECENT_CONTEXT_TURNS);

    let (nlu_result, kb_result) = if simple {
        match cancellable(cancel, agents.nlu.classify_and_extract(utterance, &recent)).await {
            Some(result) => (result, None),
            None => return Ok(()),
        }
    } else {
        let both = cancellable(cancel, async {
            tokio::join!(
                agents.nlu.classify_and_extract(utterance, &recent),
                agents
                    .retriever
                    .retrieve(session.business.business_id, utterance),
            )
        })
        .await;
        match both {
            Some((nlu, kb)) => (nlu, Some(kb)),
            None => return Ok(()),
        }
    };

    let (classified, booking_fields) = match nlu_result {
        Ok(result) => result,
        Err(e) => {
            warn!("NLU collaborator failed: {e}");
            return speak_fallback(session, tts).await;
        }
    };

    let mut context_section = String::new();
    if let Some(kb) = kb_result {
        match kb {
            Ok(passages) => {
                if let Some(joined) = join_passages(&passages) {
                    context_section = format!("Relevant knowledge base info:\n{joined}");
                }
            }
            Err(e) => debug!("Knowledge retrieval failed, continuing without context: {e}"),
        }
    }

    // Sticky intent: a pending, uncompleted draft keeps the conversation in
    // booking mode unless the caller is explicitly ending the call.
    let mut intent = classified;
    if session.draft_pending() && intent != Intent::Goodbye {
        intent = Intent::Booking;
    }

    let mut additional_context = String::new();
    match intent {
        Intent::Greeting | Intent::Inquiry | Intent::Unknown => {}
        Intent::Goodbye => {
            additional_context = "The caller is ending the call. Say goodbye warmly.".to_string();
        }
        Intent::Booking => {
            let outcome = cancellable(
                cancel,
                booking::handle_booking(
                    agents.storage.as_ref(),
                    agents.nlu.as_ref(),
                    session,
                    utterance,
                    booking_fields,
                ),
            )
            .await;
            match outcome {
                None => return Ok(()),
                Some(Ok(outcome)) => {
                    if outcome.confirmed {
                        session.set_booking_completed();
                        session.clear_draft();
                    }
                    additional_context = format!("Booking system response: {}", outcome.reply);
                }
                Some(Err(e)) => {
                    warn!("Booking flow failed: {e}");
                    additional_context = "Booking system response: The booking system is \
                        unavailable right now. Apologize and offer to try again shortly."
                        .to_string();
                }
            }
        }
        Intent::Search => match cancellable(cancel, agents.search.search(utterance)).await {
            None => return Ok(()),
            Some(Ok(summary)) => {
                context_section.push_str(&format!("\n\nWeb search:\n{summary}"));
            }
            Some(Err(e)) => {
                warn!("Web search failed: {e}");
                context_section.push_str(&format!("\n\nWeb search:\n{NO_RESULTS}"));
            }
        },
    }

    if session.booking_completed() {
        additional_context.push_str(
            "\nNote: A booking was already confirmed earlier in this call. \
             Do not re-offer booking unless the caller explicitly asks.",
        );
    }

    let request = SynthesisRequest {
        business_name: session.business.name.clone(),
        location: session.business.location.clone(),
        hours: session.business.hours.clone(),
        policies: session.business.policies.clone(),
        intent,
        utterance: utterance.to_string(),
        additional_context,
        context_section,
        history: session.recent_history(HISTORY_WINDOW),
    };

    let tokens = match cancellable(cancel, agents.responder.synthesize(request)).await {
        None => return Ok(()),
        Some(Ok(rx)) => rx,
        Some(Err(e)) => {
            warn!("Response synthesis failed: {e}");
            return speak_fallback(session, tts).await;
        }
    };

    stream_reply(session, tts, tokens, cancel, started).await
}

/// Stream reply tokens into synthesis, chunked for latency; append the
/// assembled agent turn exactly once at the end. If the first token is
/// slow to arrive, a one-shot delay filler keeps the caller from hearing
/// dead air.
async fn stream_reply(
    session: &CallSession,
    tts: &dyn SpeechSynthesizer,
    mut tokens: mpsc::Receiver<String>,
    cancel: &CancellationToken,
    started: tokio::time::Instant,
) -> AgentResult<()> {
    let mut chunker = ReplyChunker::new();
    let mut full_reply = String::new();
    let mut cancelled = false;
    let delay_filler = tokio::time::sleep_until(started + DELAY_FILLER_AFTER);
    tokio::pin!(delay_filler);
    let mut filler_armed = true;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            token = tokens.recv() => match token {
                Some(token) => {
                    filler_armed = false;
                    full_reply.push_str(&token);
                    if let Some(chunk) = chunker.push(&token) {
                        tts.send_text(&chunk).await?;
                    }
                }
                None => break,
            },
            _ = &mut delay_filler, if filler_armed => {
                filler_armed = false;
                tts.send_text(DELAY_FILLER_TEXT).await?;
                tts.flush().await?;
            }
        }
    }

    if cancelled {
        // Barge-in is expected control flow: buffered chunker text is
        // released without forwarding, and the partial reply the caller
        // already heard is what goes into history below.
        debug!("Response cancelled after {} chars", full_reply.len());
    } else {
        if let Some(rest) = chunker.finish() {
            tts.send_text(&rest).await?;
        }
        tts.flush().await?;
    }

    if !full_reply.is_empty() {
        session.append_turn(TurnRole::Agent, full_reply);
    }
    Ok(())
}

/// Speak the safe fallback and record it as the agent turn.
async fn speak_fallback(session: &CallSession, tts: &dyn SpeechSynthesizer) -> AgentResult<()> {
    tts.send_text(FALLBACK_REPLY).await?;
    tts.flush().await?;
    session.append_turn(TurnRole::Agent, FALLBACK_REPLY);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_exchange_matches_greetings_and_farewells() {
        for utterance in [
            "hi",
            "Hello!",
            "hey",
            "good morning",
            "Good Afternoon!",
            "bye",
            "goodbye",
            "see you",
            "thanks",
            "thank you",
        ] {
            assert!(is_simple_exchange(utterance), "{utterance} should be simple");
        }
    }

    #[test]
    fn test_simple_exchange_rejects_substantive_queries() {
        for utterance in [
            "I want to book a consultation",
            "What are your hours?",
            "Can you help me find a pharmacy?",
            "hello I need an appointment",
            "hi there can you help me",
        ] {
            assert!(
                !is_simple_exchange(utterance),
                "{utterance} should not be simple"
            );
        }
    }

    #[test]
    fn test_filler_phrase_selection() {
        assert_eq!(
            pick_filler_phrase("I want to book an appointment"),
            Some("Let me check that for you.")
        );
        assert_eq!(
            pick_filler_phrase("I need to cancel my booking"),
            Some("Let me check that for you.")
        );
        assert_eq!(
            pick_filler_phrase("What are your hours?"),
            Some("Let me look into that.")
        );
        assert_eq!(
            pick_filler_phrase("How much does a cleaning cost?"),
            Some("Let me look into that.")
        );
        assert_eq!(
            pick_filler_phrase("something random blah"),
            Some("One moment.")
        );
        assert_eq!(pick_filler_phrase("hi"), None);
        assert_eq!(pick_filler_phrase("thanks"), None);
    }

    #[test]
    fn test_chunker_first_chunk_flushes_at_smaller_threshold() {
        let mut chunker = ReplyChunker::new();
        // 10 tokens of 6 chars reach 60 > 50 on the 9th push
        let mut flushed = None;
        for i in 0..10 {
            if let Some(chunk) = chunker.push("sixchr") {
                flushed = Some((i, chunk));
                break;
            }
        }
        let (i, chunk) = flushed.expect("first chunk should flush");
        assert_eq!(i, 8);
        assert_eq!(chunk.len(), 54);
    }

    #[test]
    fn test_chunker_later_chunks_use_larger_threshold() {
        let mut chunker = ReplyChunker::new();
        // Flush the first chunk with punctuation
        assert!(chunker.push("Hello there.").is_some());

        let mut pushed = 0;
        let chunk = loop {
            pushed += 1;
            if let Some(chunk) = chunker.push("sixchr") {
                break chunk;
            }
            assert!(pushed < 20, "second chunk never flushed");
        };
        assert!(chunk.len() >= SUBSEQUENT_CHUNK_SIZE);
    }

    #[test]
    fn test_chunker_flushes_on_sentence_punctuation() {
        let mut chunker = ReplyChunker::new();
        assert!(chunker.push("Hi").is_none());
        let chunk = chunker.push(" there!").expect("punctuation flush");
        assert_eq!(chunk, "Hi there!");
    }

    #[test]
    fn test_chunker_punctuation_with_trailing_whitespace() {
        let mut chunker = ReplyChunker::new();
        let chunk = chunker.push("Sure thing. ").expect("punctuation flush");
        assert_eq!(chunk, "Sure thing. ");
    }

    #[test]
    fn test_chunker_finish_returns_remainder_once() {
        let mut chunker = ReplyChunker::new();
        assert!(chunker.push("tail text").is_none());
        assert_eq!(chunker.finish().as_deref(), Some("tail text"));
        assert_eq!(chunker.finish(), None);
    }
}
