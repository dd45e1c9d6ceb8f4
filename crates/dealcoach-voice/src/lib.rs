//! # DealCoach Voice: half-duplex turn coordination
//!
//! Runs a spoken roleplay between a sales rep and a generated prospect. The
//! rep holds the floor until they go quiet; the prospect's reply is generated,
//! spoken, and followed by a short cooldown before the rep may talk again.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────── LiveSession task ─────────────────────────────┐
//! │                                                                            │
//! │  SpeechCaptureChannel ──recognitions──▶ TurnCoordinator ──Generate──▶ Responder
//! │   (mic → VAD → segmenter → STT,            (sans-IO)      ◀──reply───      │
//! │    or a CaptureFeed)                           │                           │
//! │          ▲ suspend / resume                    │ Speak                      │
//! │          └─────────────────────────────────────┤                           │
//! │                                                ▼                           │
//! │                                      SpeechOutputChannel (TTS → rodio)     │
//! └────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Device backends (cpal, webrtc-vad, rodio) are only compiled with the
//! `device` feature.

pub mod capture;
pub mod coordinator;
pub mod error;
pub mod live;
pub mod responder;
pub mod segmenter;
pub mod stt;
pub mod transcript;
pub mod voice_output;
pub mod volume;

#[cfg(feature = "device")]
pub mod audio;
#[cfg(feature = "device")]
pub mod microphone;
#[cfg(feature = "device")]
pub mod vad;

pub use capture::{feed_capture, CaptureBackend, CaptureFeed, FeedCapture, Recognition, SpeechCaptureChannel};
pub use coordinator::{CoordinatorConfig, Directive, LiveEvent, Phase, TurnCoordinator, TurnOwner};
pub use error::{VoiceError, VoiceResult};
pub use live::{LiveConfig, LiveHandle, LiveSession};
pub use responder::{HistoryEntry, Responder, ResponderError, Role};
pub use segmenter::{AudioSegment, SegmentEvent, SegmenterConfig, SpeechSegmenter};
pub use stt::{create_stt, OpenRouterStt, SttBackend};
pub use transcript::{ActiveTurn, Speaker, Transcript, TranscriptBuilder, TranscriptTurn};
pub use voice_output::{OpenRouterTts, SpeechOutputChannel, SpeechSink, TtsBackend};
pub use volume::{is_voiced, AudioVolumeMonitor, VOICED_THRESHOLD};

#[cfg(feature = "device")]
pub use audio::{AudioCapture, AudioChunk, AudioConfig};
#[cfg(feature = "device")]
pub use microphone::{MicrophoneBackend, MicrophoneConfig};
#[cfg(feature = "device")]
pub use vad::{VadConfig, VadDetector};
#[cfg(feature = "device")]
pub use voice_output::DeviceSpeaker;
