//! Call-leg wire protocol
//!
//! Both leg types speak JSON events over the WebSocket: telephony media
//! streams send `start`/`media`/`stop` with base64 mu-law payloads, browser
//! legs announce their capture rate with `config` and send base64 PCM.
//! Outbound, the gateway sends `media` frames for playback and `clear` to
//! drop whatever the leg has already buffered.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamStart {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaPayload {
    /// Base64-encoded audio in the leg's native encoding
    pub payload: String,
}

/// Events received from the call leg
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundLegMessage {
    Start { start: StreamStart },
    Media { media: MediaPayload },
    Config {
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
    },
    Stop,
}

/// Events sent to the call leg
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundLegMessage {
    Media {
        #[serde(rename = "streamSid", skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
        media: MediaPayload,
    },
    /// Discard audio the leg has buffered but not yet played (barge-in)
    Clear {
        #[serde(rename = "streamSid", skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_telephony_events() {
        let start: InboundLegMessage = serde_json::from_str(
            r#"{"event":"start","start":{"streamSid":"MZ123","accountSid":"AC1"}}"#,
        )
        .unwrap();
        assert!(matches!(
            start,
            InboundLegMessage::Start { start } if start.stream_sid == "MZ123"
        ));

        let media: InboundLegMessage =
            serde_json::from_str(r#"{"event":"media","media":{"payload":"AAAA"}}"#).unwrap();
        assert!(matches!(
            media,
            InboundLegMessage::Media { media } if media.payload == "AAAA"
        ));

        let stop: InboundLegMessage = serde_json::from_str(r#"{"event":"stop"}"#).unwrap();
        assert!(matches!(stop, InboundLegMessage::Stop));
    }

    #[test]
    fn test_parse_browser_config_event() {
        let config: InboundLegMessage =
            serde_json::from_str(r#"{"event":"config","sampleRate":44100}"#).unwrap();
        assert!(matches!(
            config,
            InboundLegMessage::Config { sample_rate: 44100 }
        ));
    }

    #[test]
    fn test_outbound_media_includes_stream_sid_when_present() {
        let msg = OutboundLegMessage::Media {
            stream_sid: Some("MZ123".to_string()),
            media: MediaPayload {
                payload: "AAAA".to_string(),
            },
        };
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"event":"media","streamSid":"MZ123","media":{"payload":"AAAA"}}"#
        );
    }

    #[test]
    fn test_outbound_clear_omits_missing_stream_sid() {
        let msg = OutboundLegMessage::Clear { stream_sid: None };
        assert_eq!(serde_json::to_string(&msg).unwrap(), r#"{"event":"clear"}"#);
    }
}
