//! OpenRouter (OpenAI-compatible) chat client plus the Responder and Analyzer built on it.
//!
//! API key: `api_key` in config or `OPENROUTER_API_KEY` in `.env`.

use crate::analysis::{build_prompt, parse_analysis, AnalysisResult, Analyzer};
use crate::config::CoachConfig;
use crate::error::{CoachError, CoachResult};
use crate::scenario::SessionLength;
use async_trait::async_trait;
use dealcoach_voice::{HistoryEntry, Responder, ResponderError, Role, Transcript};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{info, warn};

const MISSING_KEY: &str = "API Key not found. Please select a valid API key.";

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

/// Map a failed HTTP call onto the Responder error categories.
pub fn categorize(status: u16, body: &str) -> ResponderError {
    let lower = body.to_lowercase();
    let detail = format!("HTTP {}: {}", status, body.trim());
    if matches!(status, 401 | 402 | 403 | 429)
        || lower.contains("billing")
        || lower.contains("quota")
        || lower.contains("permission")
        || lower.contains("insufficient credits")
    {
        ResponderError::QuotaOrBilling(detail)
    } else if status == 404 || lower.contains("not found") {
        ResponderError::NotFound(detail)
    } else {
        ResponderError::Unavailable(detail)
    }
}

/// Role-tagged history as chat messages, system instruction first.
pub fn chat_messages(history: &[HistoryEntry], system_instruction: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::new("system", system_instruction));
    messages.extend(history.iter().map(|entry| {
        let role = match entry.role {
            Role::User => "user",
            Role::Model => "assistant",
        };
        ChatMessage::new(role, entry.text.clone())
    }));
    messages
}

pub struct OpenRouterClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl ChatRequest {
    /// Replies carry no token cap; JSON analysis requests are capped at 2048.
    fn new(
        model: &str,
        messages: Vec<ChatMessage>,
        temperature: Option<f32>,
        json: bool,
    ) -> Self {
        Self {
            model: model.to_string(),
            messages,
            temperature,
            max_tokens: json.then_some(2048),
            response_format: json.then_some(ResponseFormat { kind: "json_object" }),
        }
    }
}

impl OpenRouterClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            client,
        }
    }

    pub fn from_config(config: &CoachConfig) -> Self {
        Self::new(&config.api_base_url, config.api_key())
    }

    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// One chat completion. `json` asks the model for a JSON object.
    pub async fn complete(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        temperature: Option<f32>,
        json: bool,
    ) -> Result<String, ResponderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ResponderError::QuotaOrBilling(MISSING_KEY.to_string()))?;

        let body = ChatRequest::new(model, messages, temperature, json);

        let res = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", api_key))
            .header("X-Title", "DealCoach")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ResponderError::Unavailable(format!("request failed: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(categorize(status, &body));
        }

        let parsed: ChatResponse = res
            .json()
            .await
            .map_err(|e| ResponderError::Unavailable(format!("response parse failed: {}", e)))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .unwrap_or_default())
    }
}

/// Prospect replies through a model fallback list.
///
/// A billing or not-found error moves to the next model and the switch sticks
/// for the rest of the process; any other error is returned as is.
pub struct OpenRouterResponder {
    client: OpenRouterClient,
    models: Vec<String>,
    temperature: f32,
    active: AtomicUsize,
}

impl OpenRouterResponder {
    pub fn new(client: OpenRouterClient, models: Vec<String>, temperature: f32) -> Self {
        Self {
            client,
            models,
            temperature,
            active: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &CoachConfig) -> Self {
        Self::new(
            OpenRouterClient::from_config(config),
            config.responder_models.clone(),
            config.temperature,
        )
    }

    pub fn active_model(&self) -> Option<&str> {
        self.models
            .get(self.active.load(Ordering::Relaxed))
            .map(String::as_str)
    }
}

#[async_trait]
impl Responder for OpenRouterResponder {
    async fn generate(
        &self,
        history: &[HistoryEntry],
        system_instruction: &str,
    ) -> Result<String, ResponderError> {
        let messages = chat_messages(history, system_instruction);
        let start = self.active.load(Ordering::Relaxed);
        let mut last_err = ResponderError::NotFound("no responder model configured".to_string());

        for (index, model) in self.models.iter().enumerate().skip(start) {
            match self
                .client
                .complete(model, messages.clone(), Some(self.temperature), false)
                .await
            {
                Ok(reply) => {
                    if index != start {
                        info!("🔁 Responder switched to fallback model {}", model);
                        self.active.store(index, Ordering::Relaxed);
                    }
                    return Ok(reply);
                }
                Err(e) if e.needs_reconfiguration() => {
                    warn!("Responder model {} rejected: {}", model, e);
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    async fn preflight(&self) -> Result<(), ResponderError> {
        if !self.client.has_key() {
            return Err(ResponderError::QuotaOrBilling(MISSING_KEY.to_string()));
        }
        if self.models.is_empty() {
            return Err(ResponderError::NotFound(
                "no responder model configured".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct OpenRouterAnalyzer {
    client: OpenRouterClient,
    model: String,
    seller_company: String,
}

impl OpenRouterAnalyzer {
    pub fn new(client: OpenRouterClient, model: &str, seller_company: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
            seller_company: seller_company.to_string(),
        }
    }

    pub fn from_config(config: &CoachConfig) -> CoachResult<Self> {
        let client = OpenRouterClient::from_config(config);
        if !client.has_key() {
            return Err(CoachError::MissingCredentials(
                "set api_key or OPENROUTER_API_KEY".to_string(),
            ));
        }
        Ok(Self::new(client, &config.analysis_model, &config.seller_company))
    }
}

#[async_trait]
impl Analyzer for OpenRouterAnalyzer {
    async fn analyze(&self, transcript: &Transcript, length: SessionLength) -> CoachResult<AnalysisResult> {
        if transcript.spoken_len() == 0 {
            return Err(CoachError::EmptyTranscript);
        }
        let prompt = build_prompt(transcript, length, &self.seller_company);
        info!(turns = transcript.len(), length = %length, "📊 Requesting session analysis");

        let raw = self
            .client
            .complete(&self.model, vec![ChatMessage::new("user", prompt)], Some(0.2), true)
            .await
            .map_err(|e| {
                if e.needs_reconfiguration() {
                    CoachError::Responder(e)
                } else {
                    CoachError::AnalysisFailed(e.to_string())
                }
            })?;
        parse_analysis(&raw)
    }
}
