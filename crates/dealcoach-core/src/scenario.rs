//! Roleplay scenarios and the prompts that set up the prospect persona.

use crate::error::{CoachError, CoachResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Product lines offered on the setup screen
pub const PRODUCTS: &[&str] = &[
    "Enterprise SaaS Solution",
    "Tax Software (CCH Axcess)",
    "Legal Research Platform (VitalLaw)",
    "Compliance Management System",
    "Healthcare Revenue Cycle Solution",
];

pub const PROSPECT_ROLES: &[&str] = &[
    "CFO of Fortune 500 company",
    "General Counsel at major firm",
    "Tax Director at global corp",
    "Chief Compliance Officer",
    "Hospital Administrator",
    "CTO of fintech company",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
    Impossible,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
            Difficulty::Impossible => "Impossible",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Some(Difficulty::Easy),
            "medium" => Some(Difficulty::Medium),
            "hard" => Some(Difficulty::Hard),
            "impossible" => Some(Difficulty::Impossible),
            _ => None,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session duration tier. Also selects the analysis rubric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SessionLength {
    #[serde(rename = "5 MIN")]
    Five,
    #[default]
    #[serde(rename = "10 MIN")]
    Ten,
    #[serde(rename = "15 MIN")]
    Fifteen,
    /// No countdown
    #[serde(rename = "NONE")]
    Unlimited,
}

impl SessionLength {
    pub fn tag(&self) -> &'static str {
        match self {
            SessionLength::Five => "5 MIN",
            SessionLength::Ten => "10 MIN",
            SessionLength::Fifteen => "15 MIN",
            SessionLength::Unlimited => "NONE",
        }
    }

    /// Accepts `"5 MIN"`, `"5"`, `"5min"` and `"none"` style input.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let normalized: String = tag
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.trim_end_matches("MIN") {
            "5" => Some(SessionLength::Five),
            "10" => Some(SessionLength::Ten),
            "15" => Some(SessionLength::Fifteen),
            "NONE" | "0" | "UNLIMITED" => Some(SessionLength::Unlimited),
            _ => None,
        }
    }

    /// Countdown length; `None` for unlimited sessions.
    pub fn countdown(&self) -> Option<Duration> {
        match self {
            SessionLength::Five => Some(Duration::from_secs(5 * 60)),
            SessionLength::Ten => Some(Duration::from_secs(10 * 60)),
            SessionLength::Fifteen => Some(Duration::from_secs(15 * 60)),
            SessionLength::Unlimited => None,
        }
    }
}

impl fmt::Display for SessionLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepProfile {
    pub first_name: String,
    pub last_name: String,
}

impl RepProfile {
    pub fn new(first_name: &str, last_name: &str) -> Self {
        Self {
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

/// Who the generated prospect is and who the rep sells for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProspectPersona {
    pub name: String,
    pub company: String,
    pub seller_company: String,
}

impl Default for ProspectPersona {
    fn default() -> Self {
        Self {
            name: "Sarah Chen".to_string(),
            company: "Acme Global Enterprises".to_string(),
            seller_company: "Wolters Kluwer".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub product: String,
    pub product_description: String,
    pub prospect_role: String,
    pub difficulty: Difficulty,
    pub length: SessionLength,
    /// Free-form call context ("renewal after a failed rollout", ...)
    pub context: String,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            product: PRODUCTS[0].to_string(),
            product_description: String::new(),
            prospect_role: PROSPECT_ROLES[0].to_string(),
            difficulty: Difficulty::default(),
            length: SessionLength::default(),
            context: String::new(),
        }
    }
}

impl Scenario {
    /// Parse a scenario file. Missing fields take the setup-screen defaults.
    pub fn from_toml_str(raw: &str) -> CoachResult<Self> {
        toml::from_str(raw).map_err(|e| CoachError::Config(format!("invalid scenario: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> CoachResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Fixed instruction sent with every Responder call for this session.
    pub fn system_instruction(&self, rep: &RepProfile, persona: &ProspectPersona) -> String {
        let first = &rep.first_name;
        let call_context = if self.context.trim().is_empty() {
            "General discovery call"
        } else {
            self.context.trim()
        };
        let product_context = if self.product_description.trim().is_empty() {
            self.product.clone()
        } else {
            format!("{} ({})", self.product, self.product_description.trim())
        };

        format!(
            r#"YOU ARE {persona_upper}, {role} at {company}.
USER IS {rep_name}, a Sales Representative from {seller} selling {product}.

ROLEPLAY RULES:
1. NEVER BREAK CHARACTER. You do not know you are an AI.
2. BE REALISTIC. You have a budget but you are cautious.
3. PRODUCT CONTEXT: You are interested in {product_context}.
4. CALL CONTEXT: {call_context}.
5. DIFFICULTY: {difficulty}. If "Hard" or "Impossible", be skeptical about ROI.

STRICT RESPONSE RULES (CRITICAL):
- Keep ALL your responses under 3 sentences maximum (40 words max).
- Be concise and direct like a busy C-level executive.
- Ask ONLY ONE question per turn.
- If you ask a question, STOP and wait for the answer.
- Personalize your greeting by addressing the rep as {first}.
- Never interrupt the user and never continue speaking after asking a question.
- If you don't hear a response after 5 seconds, prompt briefly: "I'm listening."

GREETING REQUIREMENT:
You MUST start by greeting {first} by name.
Example: "Hi {first}, thanks for jumping on. I'm {persona}. I've been hearing a lot about {seller}'s {product} and I'm curious to see if it actually solves our workflow issues.""#,
            persona_upper = persona.name.to_uppercase(),
            persona = persona.name,
            role = self.prospect_role,
            company = persona.company,
            rep_name = rep.full_name(),
            seller = persona.seller_company,
            product = self.product,
            product_context = product_context,
            call_context = call_context,
            difficulty = self.difficulty,
            first = first,
        )
    }
}

/// Scripted USER-role prompt that makes the prospect open the call.
pub fn kickoff_prompt(rep: &RepProfile, persona: &ProspectPersona) -> String {
    format!(
        "[SYSTEM: Start simulation. {}, please introduce yourself and greet {}.]",
        persona.name, rep.first_name
    )
}

/// Scripted cue sent once when the countdown reaches the warning threshold.
pub fn wrap_up_prompt(persona: &ProspectPersona, remaining: Duration) -> String {
    let first_name = persona.name.split_whitespace().next().unwrap_or("");
    format!(
        "[SYSTEM: {} seconds remaining in the meeting. {}, please start to wrap up the conversation naturally.]",
        remaining.as_secs(),
        first_name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rep() -> RepProfile {
        RepProfile::new("Dana", "Reyes")
    }

    #[test]
    fn length_tags() {
        assert_eq!(SessionLength::from_tag("5 MIN"), Some(SessionLength::Five));
        assert_eq!(SessionLength::from_tag("15min"), Some(SessionLength::Fifteen));
        assert_eq!(SessionLength::from_tag("10"), Some(SessionLength::Ten));
        assert_eq!(SessionLength::from_tag("none"), Some(SessionLength::Unlimited));
        assert_eq!(SessionLength::from_tag("7 MIN"), None);
        assert_eq!(SessionLength::Five.countdown(), Some(Duration::from_secs(300)));
        assert_eq!(SessionLength::Unlimited.countdown(), None);
    }

    #[test]
    fn instruction_names_persona_rep_and_scenario() {
        let scenario = Scenario {
            product: "Tax Software (CCH Axcess)".into(),
            difficulty: Difficulty::Hard,
            ..Scenario::default()
        };
        let text = scenario.system_instruction(&rep(), &ProspectPersona::default());
        assert!(text.starts_with("YOU ARE SARAH CHEN, CFO of Fortune 500 company at Acme Global Enterprises."));
        assert!(text.contains("USER IS Dana Reyes, a Sales Representative from Wolters Kluwer"));
        assert!(text.contains("CALL CONTEXT: General discovery call."));
        assert!(text.contains("DIFFICULTY: Hard."));
        assert!(text.contains("Hi Dana, thanks for jumping on."));
    }

    #[test]
    fn scripted_prompts() {
        let persona = ProspectPersona::default();
        assert_eq!(
            kickoff_prompt(&rep(), &persona),
            "[SYSTEM: Start simulation. Sarah Chen, please introduce yourself and greet Dana.]"
        );
        assert_eq!(
            wrap_up_prompt(&persona, Duration::from_secs(30)),
            "[SYSTEM: 30 seconds remaining in the meeting. Sarah, please start to wrap up the conversation naturally.]"
        );
    }

    #[test]
    fn scenario_from_toml_fills_defaults() {
        let scenario = Scenario::from_toml_str(
            r#"
product = "Compliance Management System"
difficulty = "Impossible"
length = "5 MIN"
"#,
        )
        .unwrap();
        assert_eq!(scenario.product, "Compliance Management System");
        assert_eq!(scenario.difficulty, Difficulty::Impossible);
        assert_eq!(scenario.length, SessionLength::Five);
        assert_eq!(scenario.prospect_role, PROSPECT_ROLES[0]);

        assert!(Scenario::from_toml_str("length = \"3 MIN\"").is_err());
    }
}
