//! Streaming speech synthesis with provider failover
//!
//! Incremental reply text in, incremental audio out. Two concrete providers
//! (Deepgram, ElevenLabs) sit behind [`FailoverSpeaker`], which selects one
//! at call start and keeps it for the whole call; each provider handles its
//! own mid-call stream-loss reconnection.

pub mod base;
pub mod deepgram;
pub mod elevenlabs;
pub mod failover;

pub use base::{
    AudioQueue, AudioStream, ConnectionState, SpeechSynthesizer, TtsConfig, TtsError, TtsResult,
};
pub use deepgram::DeepgramSpeaker;
pub use elevenlabs::ElevenLabsSpeaker;
pub use failover::FailoverSpeaker;
