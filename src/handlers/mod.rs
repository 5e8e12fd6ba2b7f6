//! HTTP and WebSocket handlers
//!
//! The two voice endpoints (telephony and browser legs) resolve the
//! business before upgrading, then hand the socket to a [`call::CallHandler`].

pub mod api;
pub mod browser;
pub mod call;
pub mod messages;
pub mod telephony;

use std::sync::Arc;
use std::time::Duration;

use crate::core::session::{BusinessContext, CallSession};
use crate::core::storage::Business;
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

use self::call::CallHandler;

/// Look up the business a dialed number belongs to; unknown numbers are
/// rejected before the WebSocket upgrade.
pub(crate) async fn resolve_business(state: &AppState, phone: &str) -> AppResult<Business> {
    state
        .agents
        .storage
        .business_by_phone(phone)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("No business registered for {phone}")))
}

/// Build the per-call handler: fresh session and provider connections.
pub(crate) fn build_handler(state: &Arc<AppState>, business: Business) -> AppResult<CallHandler> {
    let context = BusinessContext {
        business_id: business.id,
        name: business.name,
        location: business.location.unwrap_or_default(),
        hours: business.hours.unwrap_or_default(),
        policies: business.policies.unwrap_or_default(),
    };

    let recognizer = state
        .recognizer()
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    let speaker = state
        .speaker()
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;

    Ok(CallHandler::new(
        Arc::new(CallSession::new(context)),
        state.agents.clone(),
        Box::new(recognizer),
        speaker,
        Duration::from_millis(state.config.echo_suppression_ms),
    ))
}
