//! Post-session analysis: the Analyzer contract, rubric tiers, prompt and result parsing.

use crate::error::{CoachError, CoachResult};
use crate::scenario::SessionLength;
use async_trait::async_trait;
use dealcoach_voice::Transcript;
use serde::{Deserialize, Deserializer, Serialize};

/// Progress captions shown while the Analyzer runs
pub const ANALYSIS_STEPS: &[&str] = &[
    "Scanning transcripts...",
    "Evaluating objections...",
    "Identifying win-loss patterns...",
    "Scoring product knowledge...",
    "Generating feedback roadmap...",
];

/// Scores a finished roleplay. Only ever given the spoken turns.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, transcript: &Transcript, length: SessionLength) -> CoachResult<AnalysisResult>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreLine {
    pub label: String,
    #[serde(deserialize_with = "clamped_score")]
    pub score: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    #[serde(deserialize_with = "clamped_score")]
    pub overall: u8,
    #[serde(default)]
    pub breakdown: Vec<ScoreLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackPoint {
    pub point: String,
    /// Direct quote from the rep backing the point
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    #[serde(default)]
    pub strengths: Vec<FeedbackPoint>,
    #[serde(default)]
    pub improvements: Vec<FeedbackPoint>,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub scores: Scores,
    pub feedback: Feedback,
}

fn clamped_score<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    if raw.is_nan() {
        return Ok(0);
    }
    Ok(raw.round().clamp(0.0, 100.0) as u8)
}

/// Competency band for an overall score.
pub fn score_band(score: u8) -> &'static str {
    match score {
        0..=39 => "Needs Improvement",
        40..=69 => "Developing",
        _ => "Proficient",
    }
}

/// Criteria scored for a session length.
pub fn rubric(length: SessionLength) -> &'static [&'static str] {
    match length {
        SessionLength::Five => &[
            "Time Management",
            "Efficiency",
            "Core Qualification",
            "Conciseness",
        ],
        SessionLength::Ten => &[
            "Listening",
            "Discovery Skills",
            "Pain Point Identification",
            "Qualification",
            "Objection Handling",
            "Empathy",
            "Product Knowledge",
        ],
        SessionLength::Fifteen => &[
            "Strategic Thinking",
            "Business Acumen",
            "Relationship Building",
            "Full Discovery",
            "Value Messaging",
            "Competitor Differentiation",
            "ROI Expectation Management",
            "Active Listening",
            "Objection Depth",
            "Relationship Development",
        ],
        SessionLength::Unlimited => &[
            "Opening & Rapport",
            "Discovery Skills",
            "Active Listening",
            "Pain Point Identification",
            "Qualification",
            "Value Messaging",
            "Objection Handling",
            "Product Knowledge",
            "Business Acumen",
            "Closing & Next Steps",
        ],
    }
}

/// `USER: ...` / `MODEL: ...` lines, one per turn.
pub fn conversation_text(transcript: &Transcript) -> String {
    transcript
        .turns()
        .iter()
        .map(|t| format!("{}: {}", t.speaker.role().as_str().to_uppercase(), t.text))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_prompt(transcript: &Transcript, length: SessionLength, seller_company: &str) -> String {
    let criteria = rubric(length);
    format!(
        r#"You are an expert sales performance coach for {seller}.
Your goal is to provide a high-level executive review of a Sales Representative's performance during a simulation.

TRANSCRIPT DATA:
{conversation}

CRITICAL ROLE IDENTIFICATION:
1. The Sales Representative is labeled as "USER". They are the one being coached.
2. The Customer/Prospect is labeled as "MODEL". This is the AI.

EVALUATION TASK:
Analyze ONLY the performance of the Sales Representative (USER).
Ignore the MODEL's performance, but use the MODEL's responses to judge how well the USER handled the conversation.

Provide exactly {count} quantitative scores (0-100) for: {criteria}.
Provide an overall score.

In the feedback, provide 3 strengths and 3 growth areas.
Use DIRECT QUOTES from the USER messages as evidence for your feedback.

If the transcript is too short or contains no USER responses, respond with 0 scores and explain why in the summary.

Respond with JSON only, in this shape:
{{"scores": {{"overall": 0, "breakdown": [{{"label": "...", "score": 0}}]}}, "feedback": {{"strengths": [{{"point": "...", "quote": "..."}}], "improvements": [{{"point": "...", "quote": "..."}}], "summary": "..."}}}}"#,
        seller = seller_company,
        conversation = conversation_text(transcript),
        count = criteria.len(),
        criteria = criteria.join(", "),
    )
}

/// Parse an Analyzer reply, tolerating code fences and prose around the JSON.
pub fn parse_analysis(raw: &str) -> CoachResult<AnalysisResult> {
    let body = strip_code_fence(raw.trim());
    let json = match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if end > start => &body[start..=end],
        _ => {
            return Err(CoachError::AnalysisFailed(
                "AI failed to generate a response.".to_string(),
            ))
        }
    };
    serde_json::from_str(json)
        .map_err(|e| CoachError::AnalysisFailed(format!("unreadable analysis: {}", e)))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag line (```json).
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
