//! Error types for session control

use dealcoach_voice::{ResponderError, VoiceError};
use thiserror::Error;

pub type CoachResult<T> = Result<T, CoachError>;

#[derive(Error, Debug)]
pub enum CoachError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// No API key for the Responder / Analyzer
    #[error("API key not found: {0}")]
    MissingCredentials(String),

    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error(transparent)]
    Responder(#[from] ResponderError),

    /// The session ended before anything was said
    #[error("The simulation ended without any recorded conversation")]
    EmptyTranscript,

    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("Session archive error: {0}")]
    Archive(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation not allowed in the controller's current state
    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for CoachError {
    fn from(err: config::ConfigError) -> Self {
        CoachError::Config(err.to_string())
    }
}

impl From<sled::Error> for CoachError {
    fn from(err: sled::Error) -> Self {
        CoachError::Archive(err.to_string())
    }
}

impl CoachError {
    /// Text for the error banner shown after a session is aborted.
    pub fn user_message(&self) -> String {
        match self {
            CoachError::MissingCredentials(_) => {
                "API key not found. Please configure a valid API key.".to_string()
            }
            CoachError::Responder(e) if e.needs_reconfiguration() => format!(
                "The AI service rejected the request ({}). Please check your API key, billing or configured model.",
                e
            ),
            CoachError::Responder(e) => format!("The AI prospect stopped responding: {}", e),
            CoachError::Voice(VoiceError::CaptureUnavailable(reason)) => format!(
                "Speech capture is unavailable ({}). Please ensure your microphone is enabled.",
                reason
            ),
            CoachError::EmptyTranscript => {
                "The simulation ended without any recorded conversation. Please ensure your microphone is enabled."
                    .to_string()
            }
            CoachError::AnalysisFailed(reason) => format!("AI Analysis failed: {}", reason),
            other => other.to_string(),
        }
    }
}
