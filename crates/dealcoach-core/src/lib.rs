//! # DealCoach Core
//!
//! Session control for the sales roleplay coach: configuration, scenarios and
//! persona prompts, the OpenRouter-backed Responder and Analyzer, the Sled
//! session archive, transcript export and the [`SessionController`] that ties
//! a live voice session to all of it.

pub mod analysis;
pub mod archive;
pub mod config;
pub mod controller;
pub mod error;
pub mod export;
pub mod openrouter;
pub mod scenario;

pub use analysis::{
    parse_analysis, rubric, score_band, AnalysisResult, Analyzer, Feedback, FeedbackPoint,
    ScoreLine, Scores, ANALYSIS_STEPS,
};
pub use archive::{SessionArchive, SessionRecord, HISTORY_KEY};
pub use config::CoachConfig;
pub use controller::{
    CoachState, CoachUpdate, Countdown, CountdownTick, MediaProvider, SessionController,
};
pub use error::{CoachError, CoachResult};
pub use export::TranscriptDocument;
pub use openrouter::{OpenRouterAnalyzer, OpenRouterClient, OpenRouterResponder};
pub use scenario::{
    kickoff_prompt, wrap_up_prompt, Difficulty, ProspectPersona, RepProfile, Scenario,
    SessionLength, PRODUCTS, PROSPECT_ROLES,
};
