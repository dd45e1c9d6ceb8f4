//! **Responder**: the contract the live session needs from the generative model.
//!
//! Stateless per call: the caller always supplies the full role-tagged history
//! plus the session's fixed system instruction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Role of a history entry as seen by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The sales rep (and scripted system cues injected on their side).
    User,
    /// The simulated prospect.
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// One entry of the history submitted to the Responder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
}

impl HistoryEntry {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Categorized Responder failure. None of these are retried by the coordinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponderError {
    #[error("Responder unavailable: {0}")]
    Unavailable(String),

    /// Quota exhausted, billing not enabled, or the credential is not allowed to call the model.
    #[error("Responder quota or billing problem: {0}")]
    QuotaOrBilling(String),

    /// Model or endpoint does not exist for this credential.
    #[error("Responder model not found: {0}")]
    NotFound(String),
}

impl ResponderError {
    /// True when the user has to change credentials or model configuration to continue.
    pub fn needs_reconfiguration(&self) -> bool {
        matches!(
            self,
            ResponderError::QuotaOrBilling(_) | ResponderError::NotFound(_)
        )
    }
}

/// Produces the counterpart's next reply.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Generate the reply to `history` under `system_instruction`.
    async fn generate(
        &self,
        history: &[HistoryEntry],
        system_instruction: &str,
    ) -> Result<String, ResponderError>;

    /// Cheap reachability / credential check run before a session connects.
    async fn preflight(&self) -> Result<(), ResponderError> {
        Ok(())
    }
}
