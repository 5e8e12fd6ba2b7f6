//! Prompt templates for the chat-completions collaborators

use crate::core::session::{ConversationTurn, TurnRole};

pub const INTENT_SYSTEM: &str = "\
You classify a caller utterance from a phone call to a small business and, \
when the caller is working on a booking, extract booking details.\n\
Respond with a JSON object:\n\
{\"intent\": one of BOOKING, INQUIRY, SEARCH, GREETING, GOODBYE, UNKNOWN,\n \
\"booking\": null, or when intent is BOOKING an object with nullable string \
fields: action (one of info, schedule, cancel), service_name, \
preferred_date (YYYY-MM-DD), preferred_time (HH:MM, 24h), customer_name, \
customer_phone}\n\
Only mark fields the caller actually stated; never invent values.";

pub fn intent_user(utterance: &str, history: &[ConversationTurn]) -> String {
    let history_text = render_history(history);
    format!("Conversation so far:\n{history_text}\n\nCaller utterance: {utterance}")
}

pub const BOOKING_EXTRACTION_SYSTEM: &str = "\
You extract booking details from a phone conversation with a small \
business. Respond with a JSON object with nullable string fields: action \
(one of info, schedule, cancel), service_name, preferred_date (YYYY-MM-DD), \
preferred_time (HH:MM, 24h), customer_name, customer_phone. Only include \
values the caller actually stated.";

pub fn booking_extraction_user(context: &str) -> String {
    format!("Conversation:\n{context}")
}

pub fn synthesizer_system(
    business_name: &str,
    location: &str,
    hours: &str,
    policies: &str,
    context_section: &str,
) -> String {
    let location = if location.is_empty() {
        "Not specified"
    } else {
        location
    };
    let hours = if hours.is_empty() { "Not specified" } else { hours };
    let policies = if policies.is_empty() {
        "None specified"
    } else {
        policies
    };
    format!(
        "You are the phone receptionist for {business_name}.\n\
Location: {location}\nHours: {hours}\nPolicies: {policies}\n\
{context_section}\n\
You are speaking aloud on a live call: answer in short, natural spoken \
sentences, never use lists or markup, and never read out raw errors."
    )
}

pub fn synthesizer_user(intent: &str, utterance: &str, additional_context: &str) -> String {
    format!(
        "Detected intent: {intent}\nCaller said: {utterance}\n{additional_context}\n\
Reply to the caller."
    )
}

pub fn render_history(history: &[ConversationTurn]) -> String {
    history
        .iter()
        .map(|turn| {
            let label = match turn.role {
                TurnRole::Caller => "Caller",
                TurnRole::Agent => "Agent",
            };
            format!("{label}: {}", turn.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
