//! Coach configuration: defaults, then an optional TOML file, then `DEALCOACH__*` env.

use crate::error::CoachResult;
use crate::scenario::{ProspectPersona, RepProfile};
use dealcoach_voice::{CoordinatorConfig, LiveConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/dealcoach";
pub const DEFAULT_API_BASE: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachConfig {
    /// Silence that ends the rep's turn
    pub silence_timeout_ms: u64,
    /// Input ignored this long after the prospect stops speaking
    pub cooldown_ms: u64,
    /// Wrap-up cue is sent this long before a timed session ends
    pub wrap_up_warning_secs: u64,
    pub capture_restart_backoff_ms: u64,

    /// Root for the session archive and exported transcripts
    pub storage_path: String,

    /// OpenAI-compatible chat completions base URL
    pub api_base_url: String,
    /// Falls back to `OPENROUTER_API_KEY`
    #[serde(default)]
    pub api_key: Option<String>,
    /// Tried in order; the next one is used on billing or not-found errors
    pub responder_models: Vec<String>,
    pub analysis_model: String,
    pub temperature: f32,

    pub rep_first_name: String,
    pub rep_last_name: String,
    /// Company the rep sells for
    pub seller_company: String,
    pub persona_name: String,
    pub persona_company: String,
}

impl CoachConfig {
    /// Load from `DEALCOACH_CONFIG` (default `config/dealcoach`) and environment.
    pub fn load() -> CoachResult<Self> {
        let path = std::env::var("DEALCOACH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// Load with an explicit file (extension optional; a missing file is fine).
    pub fn load_from(path: &str) -> CoachResult<Self> {
        let built = config::Config::builder()
            .set_default("silence_timeout_ms", 2000_i64)?
            .set_default("cooldown_ms", 3000_i64)?
            .set_default("wrap_up_warning_secs", 30_i64)?
            .set_default("capture_restart_backoff_ms", 250_i64)?
            .set_default("storage_path", "./data")?
            .set_default("api_base_url", DEFAULT_API_BASE)?
            .set_default(
                "responder_models",
                vec!["google/gemini-2.5-flash", "meta-llama/llama-3.3-70b-instruct"],
            )?
            .set_default("analysis_model", "google/gemini-2.5-pro")?
            .set_default("temperature", 0.7)?
            .set_default("rep_first_name", "Alex")?
            .set_default("rep_last_name", "Morgan")?
            .set_default("seller_company", "Wolters Kluwer")?
            .set_default("persona_name", "Sarah Chen")?
            .set_default("persona_company", "Acme Global Enterprises")?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("DEALCOACH")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("responder_models")
                    .try_parsing(true),
            )
            .build()?;

        Ok(built.try_deserialize()?)
    }

    /// Configured key, else `OPENROUTER_API_KEY`. Blank keys count as missing.
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }

    pub fn live_config(&self) -> LiveConfig {
        LiveConfig {
            coordinator: CoordinatorConfig {
                silence_timeout: Duration::from_millis(self.silence_timeout_ms),
                cooldown: Duration::from_millis(self.cooldown_ms),
            },
            capture_restart_backoff: Duration::from_millis(self.capture_restart_backoff_ms),
        }
    }

    pub fn wrap_up_warning(&self) -> Duration {
        Duration::from_secs(self.wrap_up_warning_secs)
    }

    pub fn rep(&self) -> RepProfile {
        RepProfile::new(&self.rep_first_name, &self.rep_last_name)
    }

    pub fn persona(&self) -> ProspectPersona {
        ProspectPersona {
            name: self.persona_name.clone(),
            company: self.persona_company.clone(),
            seller_company: self.seller_company.clone(),
        }
    }

    pub fn archive_path(&self) -> PathBuf {
        PathBuf::from(&self.storage_path).join("dealcoach_archive")
    }

    pub fn exports_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage_path).join("exports")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_file() {
        let config = CoachConfig::load_from("does/not/exist").unwrap();
        assert_eq!(config.silence_timeout_ms, 2000);
        assert_eq!(config.cooldown_ms, 3000);
        assert_eq!(config.wrap_up_warning_secs, 30);
        assert_eq!(config.responder_models.len(), 2);
        assert!((config.temperature - 0.7).abs() < 1e-6);
        assert_eq!(config.persona().name, "Sarah Chen");

        let live = config.live_config();
        assert_eq!(live.coordinator.silence_timeout, Duration::from_secs(2));
        assert_eq!(live.capture_restart_backoff, Duration::from_millis(250));
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dealcoach.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
cooldown_ms = 0
storage_path = "/tmp/coach"
responder_models = ["openai/gpt-4o-mini"]
rep_first_name = "Dana"
api_key = "  sk-test  "
"#
        )
        .unwrap();

        let config = CoachConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.cooldown_ms, 0);
        assert_eq!(config.responder_models, vec!["openai/gpt-4o-mini"]);
        assert_eq!(config.rep().first_name, "Dana");
        assert_eq!(config.api_key().as_deref(), Some("sk-test"));
        assert_eq!(config.archive_path(), PathBuf::from("/tmp/coach/dealcoach_archive"));
        assert_eq!(config.silence_timeout_ms, 2000);
    }
}
