//! Per-call mutable state
//!
//! One [`CallSession`] exists per active call. Its mutable fields are only
//! touched by the transcript consumer and the barge-in monitor of that call,
//! so all locks here are short uncontended critical sections. The speaking
//! flag is the single within-call mutual-exclusion signal; [`SpeakingGuard`]
//! clears it on every exit path, including panics and cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Only this many most-recent turns are forwarded to downstream
/// collaborators; older turns stay in history but are never sent.
pub const HISTORY_WINDOW: usize = 12;

/// Identity and profile of the business answering this call
#[derive(Debug, Clone)]
pub struct BusinessContext {
    pub business_id: Uuid,
    pub name: String,
    pub location: String,
    pub hours: String,
    pub policies: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    Caller,
    Agent,
}

/// One conversation turn; immutable once appended
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Booking fields extracted from an utterance by the NLU collaborator.
/// Every field is nullable; absent fields never overwrite known values.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct BookingFields {
    pub action: Option<String>,
    pub service_name: Option<String>,
    pub preferred_date: Option<String>,
    pub preferred_time: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
}

/// Partially-accumulated appointment details, carried across turns until
/// the booking is confirmed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingDraft {
    pub service_name: Option<String>,
    pub preferred_date: Option<String>,
    pub preferred_time: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
}

impl BookingDraft {
    /// Fold a new extraction into the draft. A field is only overwritten
    /// when the extraction supplies a non-empty value.
    pub fn merge(&mut self, fields: &BookingFields) {
        fn keep(slot: &mut Option<String>, value: &Option<String>) {
            if let Some(v) = value {
                let trimmed = v.trim();
                if !trimmed.is_empty() {
                    *slot = Some(trimmed.to_string());
                }
            }
        }
        keep(&mut self.service_name, &fields.service_name);
        keep(&mut self.preferred_date, &fields.preferred_date);
        keep(&mut self.preferred_time, &fields.preferred_time);
        keep(&mut self.customer_name, &fields.customer_name);
        keep(&mut self.customer_phone, &fields.customer_phone);
    }

    pub fn is_empty(&self) -> bool {
        self.service_name.is_none()
            && self.preferred_date.is_none()
            && self.preferred_time.is_none()
            && self.customer_name.is_none()
            && self.customer_phone.is_none()
    }

    /// Names of required fields still missing, in the fixed order the agent
    /// asks for them: date, time, name.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.preferred_date.is_none() {
            missing.push("preferred date");
        }
        if self.preferred_time.is_none() {
            missing.push("preferred time");
        }
        if self.customer_name.is_none() {
            missing.push("your name");
        }
        missing
    }
}

/// Call lifecycle state machine
///
/// Connecting -> Greeting -> (Listening <-> Processing <-> Speaking)
/// -> Closing -> Closed. Speaking returns to Listening on synthesis
/// completion or on barge-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Connecting,
    Greeting,
    Listening,
    Processing,
    Speaking,
    Closing,
    Closed,
}

/// Shared state for a single call
pub struct CallSession {
    pub business: BusinessContext,
    history: Mutex<Vec<ConversationTurn>>,
    draft: Mutex<BookingDraft>,
    booking_completed: AtomicBool,
    speaking: AtomicBool,
    phase: Mutex<CallPhase>,
    response_cancel: Mutex<Option<CancellationToken>>,
}

impl CallSession {
    pub fn new(business: BusinessContext) -> Self {
        Self {
            business,
            history: Mutex::new(Vec::new()),
            draft: Mutex::new(BookingDraft::default()),
            booking_completed: AtomicBool::new(false),
            speaking: AtomicBool::new(false),
            phase: Mutex::new(CallPhase::Connecting),
            response_cancel: Mutex::new(None),
        }
    }

    pub fn append_turn(&self, role: TurnRole, text: impl Into<String>) {
        self.history.lock().push(ConversationTurn::new(role, text));
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    /// The most recent `n` turns, oldest first.
    pub fn recent_history(&self, n: usize) -> Vec<ConversationTurn> {
        let history = self.history.lock();
        let start = history.len().saturating_sub(n);
        history[start..].to_vec()
    }

    pub fn full_history(&self) -> Vec<ConversationTurn> {
        self.history.lock().clone()
    }

    pub fn draft(&self) -> BookingDraft {
        self.draft.lock().clone()
    }

    pub fn merge_draft(&self, fields: &BookingFields) {
        self.draft.lock().merge(fields);
    }

    /// Clear the draft in one step (confirmed booking).
    pub fn clear_draft(&self) {
        *self.draft.lock() = BookingDraft::default();
    }

    /// Whether the sticky-intent override applies: a draft is pending and
    /// the booking has not completed yet.
    pub fn draft_pending(&self) -> bool {
        !self.draft.lock().is_empty() && !self.booking_completed()
    }

    pub fn booking_completed(&self) -> bool {
        self.booking_completed.load(Ordering::SeqCst)
    }

    pub fn set_booking_completed(&self) {
        self.booking_completed.store(true, Ordering::SeqCst);
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    pub fn set_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::SeqCst);
    }

    pub fn phase(&self) -> CallPhase {
        *self.phase.lock()
    }

    pub fn set_phase(&self, phase: CallPhase) {
        *self.phase.lock() = phase;
    }

    /// Create and register the cancellation token for a new response task.
    /// At most one response is active per call; the previous token is
    /// replaced (the transcript consumer awaits each response before
    /// starting the next).
    pub fn begin_response(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.response_cancel.lock() = Some(token.clone());
        token
    }

    /// Cancel the in-flight response, if any.
    pub fn cancel_response(&self) {
        if let Some(token) = self.response_cancel.lock().take() {
            token.cancel();
        }
    }
}

/// Marks the session speaking for the duration of a response and guarantees
/// the flag is cleared and the phase returns to Listening on every exit
/// path, so barge-in detection can never be wedged by a failed response.
pub struct SpeakingGuard {
    session: Arc<CallSession>,
}

impl SpeakingGuard {
    pub fn begin(session: Arc<CallSession>) -> Self {
        session.set_speaking(true);
        session.set_phase(CallPhase::Speaking);
        Self { session }
    }
}

impl Drop for SpeakingGuard {
    fn drop(&mut self) {
        self.session.set_speaking(false);
        if self.session.phase() == CallPhase::Speaking {
            self.session.set_phase(CallPhase::Listening);
        }
    }
}
