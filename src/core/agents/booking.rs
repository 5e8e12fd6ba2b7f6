//! Booking sub-flow
//!
//! Merges extracted fields into the session's draft (never erasing known
//! values), asks for whatever is still missing in a fixed order, and
//! commits the booking once the service, date, time and name are all known.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::info;

use super::intent::NluClient;
use super::prompts::render_history;
use super::AgentResult;
use crate::core::session::{BookingFields, CallSession};
use crate::core::storage::{NewBooking, ServiceRecord, Storage};

/// Turns the sub-flow's result into data instead of prose sniffing: the
/// orchestrator reads `confirmed` to clear the draft and set the
/// completed flag.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingOutcome {
    pub reply: String,
    pub confirmed: bool,
}

impl BookingOutcome {
    fn pending(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            confirmed: false,
        }
    }
}

/// How much conversation the fallback extraction sees
const EXTRACTION_CONTEXT_TURNS: usize = 6;

/// Run one booking turn against the session draft.
pub async fn handle_booking(
    storage: &dyn Storage,
    nlu: &dyn NluClient,
    session: &CallSession,
    utterance: &str,
    pre_extracted: Option<BookingFields>,
) -> AgentResult<BookingOutcome> {
    // A sticky-intent turn arrives without fields; extract from the recent
    // conversation so follow-ups like a bare name still land in the draft.
    let info = match pre_extracted {
        Some(info) => info,
        None => {
            let mut context = render_history(&session.recent_history(EXTRACTION_CONTEXT_TURNS));
            context.push_str(&format!("\nCaller: {utterance}"));
            nlu.extract_booking(&context).await?
        }
    };

    let mut action = info.action.clone().unwrap_or_else(|| "info".to_string());
    session.merge_draft(&info);
    let draft = session.draft();

    // Any accumulated detail means the caller is scheduling, whatever this
    // turn's action label said.
    if !draft.is_empty() {
        action = "schedule".to_string();
    }

    match action.as_str() {
        "schedule" => {
            let Some(service_name) = draft.service_name.clone() else {
                return Ok(BookingOutcome::pending(
                    "Which service would you like to book?",
                ));
            };

            let services = storage
                .services_for_business(session.business.business_id)
                .await?;
            let Some(matched) = match_service(&services, &service_name) else {
                let names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
                return Ok(BookingOutcome::pending(format!(
                    "I couldn't find that service. Available: {}",
                    names.join(", ")
                )));
            };

            let missing = draft.missing_fields();
            if !missing.is_empty() {
                return Ok(BookingOutcome::pending(format!(
                    "To complete the booking, I need: {}.",
                    missing.join(", ")
                )));
            }

            let date = draft.preferred_date.as_deref().unwrap_or_default();
            let time = draft.preferred_time.as_deref().unwrap_or_default();
            let Some(start) = parse_start_time(date, time) else {
                return Ok(BookingOutcome::pending(
                    "I didn't catch a valid date and time. Could you repeat them?",
                ));
            };
            let end = start + Duration::minutes(matched.duration_minutes as i64);

            let record = storage
                .create_booking(NewBooking {
                    business_id: session.business.business_id,
                    service_id: matched.id,
                    customer_name: draft.customer_name.clone().unwrap_or_default(),
                    customer_phone: draft.customer_phone.clone().unwrap_or_default(),
                    start_time: start,
                    end_time: end,
                    status: "confirmed".to_string(),
                })
                .await?;
            info!("Booking {} committed for {}", record.id, matched.name);

            Ok(BookingOutcome {
                reply: format!(
                    "Your {} appointment is confirmed for {date} at {time}.",
                    matched.name
                ),
                confirmed: true,
            })
        }
        "cancel" => Ok(BookingOutcome::pending(
            "To cancel, I'll need your name and the appointment date. Could you provide those?",
        )),
        "info" => {
            let services = storage
                .services_for_business(session.business.business_id)
                .await?;
            if services.is_empty() {
                return Ok(BookingOutcome::pending(
                    "This business hasn't set up any bookable services yet.",
                ));
            }
            let listing: Vec<String> = services
                .iter()
                .map(|s| format!("{} ({} min)", s.name, s.duration_minutes))
                .collect();
            Ok(BookingOutcome::pending(format!(
                "Available services: {}. Which would you like to book?",
                listing.join(", ")
            )))
        }
        _ => Ok(BookingOutcome::pending(
            "I can help with booking. What would you like to do?",
        )),
    }
}

fn match_service<'a>(services: &'a [ServiceRecord], name: &str) -> Option<&'a ServiceRecord> {
    services
        .iter()
        .find(|s| s.name.eq_ignore_ascii_case(name.trim()))
}

fn parse_start_time(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(time, "%H:%M").ok()?;
    Some(Utc.from_utc_datetime(&date.and_time(time)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::core::agents::intent::Intent;
    use crate::core::session::{BusinessContext, ConversationTurn};
    use crate::core::storage::MemoryStorage;

    struct NoExtractionNlu;

    #[async_trait]
    impl NluClient for NoExtractionNlu {
        async fn classify_and_extract(
            &self,
            _utterance: &str,
            _history: &[ConversationTurn],
        ) -> AgentResult<(Intent, Option<BookingFields>)> {
            Ok((Intent::Unknown, None))
        }

        async fn extract_booking(&self, _context: &str) -> AgentResult<BookingFields> {
            Ok(BookingFields::default())
        }
    }

    fn session_with_services() -> (CallSession, MemoryStorage, Uuid) {
        let business_id = Uuid::new_v4();
        let session = CallSession::new(BusinessContext {
            business_id,
            name: "Test Clinic".to_string(),
            location: String::new(),
            hours: String::new(),
            policies: String::new(),
        });
        let storage = MemoryStorage::new();
        storage.add_service(
            business_id,
            ServiceRecord {
                id: Uuid::new_v4(),
                name: "Consultation".to_string(),
                duration_minutes: 30,
            },
        );
        (session, storage, business_id)
    }

    #[test]
    fn test_parse_start_time() {
        let start = parse_start_time("2026-03-01", "14:00").unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 1, 14, 0, 0).unwrap());
        assert!(parse_start_time("March 1st", "2pm").is_none());
    }

    #[tokio::test]
    async fn test_new_booking_request_reports_missing_fields_in_order() {
        let (session, storage, _) = session_with_services();
        let outcome = handle_booking(
            &storage,
            &NoExtractionNlu,
            &session,
            "I'd like to book a consultation",
            Some(BookingFields {
                action: Some("schedule".to_string()),
                service_name: Some("Consultation".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        assert!(!outcome.confirmed);
        assert_eq!(
            outcome.reply,
            "To complete the booking, I need: preferred date, preferred time, your name."
        );
        assert_eq!(
            session.draft().service_name.as_deref(),
            Some("Consultation")
        );
    }

    #[tokio::test]
    async fn test_complete_draft_commits_booking_with_service_duration() {
        let (session, storage, _) = session_with_services();
        session.merge_draft(&BookingFields {
            service_name: Some("Consultation".to_string()),
            preferred_date: Some("2026-03-01".to_string()),
            preferred_time: Some("14:00".to_string()),
            customer_name: Some("Ada Lovelace".to_string()),
            ..Default::default()
        });

        let outcome = handle_booking(
            &storage,
            &NoExtractionNlu,
            &session,
            "yes",
            Some(BookingFields::default()),
        )
        .await
        .unwrap();

        assert!(outcome.confirmed);
        assert!(outcome.reply.contains("confirmed for 2026-03-01 at 14:00"));

        let bookings = storage.bookings();
        assert_eq!(bookings.len(), 1);
        let booking = &bookings[0].booking;
        assert_eq!(
            booking.start_time,
            Utc.with_ymd_and_hms(2026, 3, 1, 14, 0, 0).unwrap()
        );
        assert_eq!(
            booking.end_time,
            Utc.with_ymd_and_hms(2026, 3, 1, 14, 30, 0).unwrap()
        );
        assert_eq!(booking.customer_name, "Ada Lovelace");
        assert_eq!(booking.status, "confirmed");
    }

    #[tokio::test]
    async fn test_unknown_service_lists_alternatives() {
        let (session, storage, _) = session_with_services();
        let outcome = handle_booking(
            &storage,
            &NoExtractionNlu,
            &session,
            "book me a massage",
            Some(BookingFields {
                action: Some("schedule".to_string()),
                service_name: Some("Massage".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        assert!(!outcome.confirmed);
        assert!(outcome.reply.contains("couldn't find that service"));
        assert!(outcome.reply.contains("Consultation"));
    }

    #[tokio::test]
    async fn test_service_match_is_case_insensitive() {
        let (session, storage, _) = session_with_services();
        let outcome = handle_booking(
            &storage,
            &NoExtractionNlu,
            &session,
            "book a consultation",
            Some(BookingFields {
                service_name: Some("consultation".to_string()),
                preferred_date: Some("2026-03-01".to_string()),
                preferred_time: Some("09:00".to_string()),
                customer_name: Some("Grace".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert!(outcome.confirmed);
    }

    #[tokio::test]
    async fn test_info_action_lists_services() {
        let (session, storage, _) = session_with_services();
        let outcome = handle_booking(
            &storage,
            &NoExtractionNlu,
            &session,
            "what can I book?",
            Some(BookingFields {
                action: Some("info".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(
            outcome.reply,
            "Available services: Consultation (30 min). Which would you like to book?"
        );
    }

    #[tokio::test]
    async fn test_no_services_configured() {
        let session = CallSession::new(BusinessContext {
            business_id: Uuid::new_v4(),
            name: "Empty Biz".to_string(),
            location: String::new(),
            hours: String::new(),
            policies: String::new(),
        });
        let storage = MemoryStorage::new();
        let outcome = handle_booking(
            &storage,
            &NoExtractionNlu,
            &session,
            "book something",
            Some(BookingFields {
                action: Some("info".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert!(outcome.reply.contains("hasn't set up any bookable services"));
    }

    #[tokio::test]
    async fn test_invalid_date_asks_again_without_committing() {
        let (session, storage, _) = session_with_services();
        session.merge_draft(&BookingFields {
            service_name: Some("Consultation".to_string()),
            preferred_date: Some("next tuesday".to_string()),
            preferred_time: Some("14:00".to_string()),
            customer_name: Some("Ada".to_string()),
            ..Default::default()
        });
        let outcome = handle_booking(
            &storage,
            &NoExtractionNlu,
            &session,
            "yes",
            Some(BookingFields::default()),
        )
        .await
        .unwrap();
        assert!(!outcome.confirmed);
        assert!(storage.bookings().is_empty());
    }
}
