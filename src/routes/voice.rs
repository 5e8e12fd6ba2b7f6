use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::{browser, telephony};
use crate::state::AppState;
use std::sync::Arc;

/// Create the voice WebSocket router
///
/// Both endpoints resolve the business from the dialed number before the
/// upgrade, so unknown numbers get a plain 404 instead of an accepted
/// socket that immediately closes.
pub fn create_voice_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/voice/ws/{business_phone}", get(telephony::telephony_ws_handler))
        .route(
            "/voice/browser-ws/{business_phone}",
            get(browser::browser_ws_handler),
        )
        .layer(TraceLayer::new_for_http())
}
