//! **Speech-to-Text (STT)**: turn a closed [`AudioSegment`] into a final recognition.
//!
//! The microphone backend hands every segment to an `SttBackend`. The
//! production backend talks to an OpenAI-compatible `/audio/transcriptions`
//! endpoint configured from `STT_API_URL`, `STT_API_KEY` and `STT_MODEL`.

use crate::error::{VoiceError, VoiceResult};
use crate::segmenter::AudioSegment;
use std::time::Duration;

/// Converts PCM to text. Returns an empty string when nothing intelligible was said.
pub trait SttBackend: Send + Sync {
    fn transcribe(&self, segment: &AudioSegment) -> VoiceResult<String>;
}

/// Encode f32 PCM (mono) to 16-bit WAV bytes for upload.
pub fn pcm_f32_to_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut buf = Vec::with_capacity(44 + data_len as usize);

    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    buf.extend_from_slice(&2u16.to_le_bytes()); // block align
    buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &s in samples {
        let i = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        buf.extend_from_slice(&i.to_le_bytes());
    }
    buf
}

/// OpenAI-compatible transcription API (OpenAI Whisper, OpenRouter, local gateways).
#[derive(Debug, Clone)]
pub struct OpenRouterStt {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1)
    pub base_url: String,
    pub api_key: String,
    /// whisper-1, gpt-4o-transcribe, ...
    pub model: String,
    client: reqwest::blocking::Client,
}

impl OpenRouterStt {
    /// Build from environment: STT_API_URL, STT_API_KEY (or OPENROUTER_API_KEY), STT_MODEL.
    pub fn from_env() -> VoiceResult<Self> {
        let base_url = std::env::var("STT_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("STT_API_KEY")
            .or_else(|_| std::env::var("OPENROUTER_API_KEY"))
            .map_err(|_| {
                VoiceError::Config("STT requires STT_API_KEY or OPENROUTER_API_KEY".to_string())
            })?;
        let model = std::env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        Self::new(base_url, api_key, model)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'))
    }
}

impl SttBackend for OpenRouterStt {
    fn transcribe(&self, segment: &AudioSegment) -> VoiceResult<String> {
        if segment.samples.is_empty() {
            return Ok(String::new());
        }
        let wav = pcm_f32_to_wav(&segment.samples, segment.sample_rate);
        let part = reqwest::blocking::multipart::Part::bytes(wav)
            .file_name("segment.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        let form = reqwest::blocking::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let res = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Stt(format!("STT API error {}: {}", status, body)));
        }
        let json: serde_json::Value = res.json().map_err(|e| VoiceError::Stt(e.to_string()))?;
        Ok(transcription_text(&json))
    }
}

fn transcription_text(json: &serde_json::Value) -> String {
    json.get("text")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .trim()
        .to_string()
}

/// STT backend for the microphone. Missing credentials mean capture is unavailable.
pub fn create_stt() -> VoiceResult<Box<dyn SttBackend>> {
    OpenRouterStt::from_env()
        .map(|stt| Box::new(stt) as Box<dyn SttBackend>)
        .map_err(|e| VoiceError::CaptureUnavailable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_is_well_formed() {
        let wav = pcm_f32_to_wav(&[0.0, 1.0, -1.0, 2.0], 16000);
        assert_eq!(wav.len(), 44 + 8);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes([wav[4], wav[5], wav[6], wav[7]]), 44);
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]), 16000);
        assert_eq!(u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]), 8);
        // Out-of-range samples are clamped.
        assert_eq!(i16::from_le_bytes([wav[46], wav[47]]), 32767);
        assert_eq!(i16::from_le_bytes([wav[50], wav[51]]), 32767);
        assert_eq!(i16::from_le_bytes([wav[48], wav[49]]), -32767);
    }

    #[test]
    fn transcription_text_is_trimmed() {
        let json = serde_json::json!({ "text": "  what's the price?\n" });
        assert_eq!(transcription_text(&json), "what's the price?");
        assert_eq!(transcription_text(&serde_json::json!({})), "");
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        let stt = OpenRouterStt::new("https://api.example.com/v1/", "k", "whisper-1").unwrap();
        assert_eq!(stt.endpoint(), "https://api.example.com/v1/audio/transcriptions");
    }
}
