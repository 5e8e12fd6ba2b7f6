//! Streaming speech recognition
//!
//! One recognizer instance per call: a continuous PCM feed in, finalized
//! utterance transcripts out, plus a speech-activity signal for barge-in.

pub mod base;
pub mod deepgram;

pub use base::{
    SpeechRecognizer, SpeechSignal, SttConfig, SttError, SttResult, UtteranceAssembler,
};
pub use deepgram::DeepgramRecognizer;
