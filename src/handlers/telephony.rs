//! Telephony media-stream leg
//!
//! The telephony provider opens a WebSocket per call and streams base64
//! mu-law 8kHz frames inside `media` events. The `clear` control message is
//! supported, so barge-in can also flush audio the leg already buffered.

use std::sync::Arc;

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use tracing::info;

use crate::core::audio::InboundCodec;
use crate::errors::AppResult;
use crate::state::AppState;

use super::{build_handler, resolve_business};

pub async fn telephony_ws_handler(
    ws: WebSocketUpgrade,
    Path(business_phone): Path<String>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    let business = resolve_business(&state, &business_phone).await?;
    info!("Telephony call for {} ({business_phone})", business.name);
    let handler = build_handler(&state, business)?;

    Ok(ws.on_upgrade(move |socket| handler.run(socket, InboundCodec::Mulaw8k)))
}
