//! Browser microphone leg
//!
//! Browsers stream raw little-endian PCM at whatever rate their capture
//! stack produces; the leg announces it in a `config` event (default
//! 48kHz) and the transport adapter resamples down to the recognizer rate.

use std::sync::Arc;

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use tracing::info;

use crate::core::audio::InboundCodec;
use crate::errors::AppResult;
use crate::state::AppState;

use super::{build_handler, resolve_business};

/// Assumed capture rate until the leg's `config` event arrives.
const DEFAULT_BROWSER_SAMPLE_RATE: u32 = 48000;

pub async fn browser_ws_handler(
    ws: WebSocketUpgrade,
    Path(business_phone): Path<String>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    let business = resolve_business(&state, &business_phone).await?;
    info!("Browser call for {} ({business_phone})", business.name);
    let handler = build_handler(&state, business)?;

    Ok(ws.on_upgrade(move |socket| {
        handler.run(
            socket,
            InboundCodec::Pcm {
                sample_rate: DEFAULT_BROWSER_SAMPLE_RATE,
            },
        )
    }))
}
