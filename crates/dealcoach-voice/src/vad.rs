//! Voice Activity Detection using WebRTC VAD.
//!
//! Classifies each 30ms chunk of microphone PCM as speech or silence for the
//! [`SpeechSegmenter`](crate::segmenter::SpeechSegmenter).

use crate::error::{VoiceError, VoiceResult};
use tracing::info;
use webrtc_vad::{SampleRate, Vad, VadMode};

/// Configuration for VAD detection
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Sample rate (8000, 16000, 32000 or 48000 Hz)
    pub sample_rate: u32,

    /// Aggressiveness (0-3, where 3 filters the most non-speech)
    pub mode: u8,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            mode: 2,
        }
    }
}

/// Voice Activity Detector using WebRTC VAD
pub struct VadDetector {
    vad: Vad,
    config: VadConfig,
    chunk_size: usize,
}

impl VadDetector {
    pub fn new(config: VadConfig) -> VoiceResult<Self> {
        let vad = build_vad(&config)?;
        // WebRTC VAD accepts 10, 20 or 30ms frames; 30ms at 16kHz is 480 samples.
        let chunk_size = (config.sample_rate as usize * 30) / 1000;
        info!(
            "🎙️ VAD ready ({}Hz, mode {}, {} samples per chunk)",
            config.sample_rate, config.mode, chunk_size
        );
        Ok(Self {
            vad,
            config,
            chunk_size,
        })
    }

    /// Classify exactly `chunk_size` samples.
    pub fn is_speech(&mut self, audio: &[f32]) -> VoiceResult<bool> {
        if audio.len() != self.chunk_size {
            return Err(VoiceError::VadProcessing(format!(
                "Expected {} samples, got {}",
                self.chunk_size,
                audio.len()
            )));
        }
        let audio_i16: Vec<i16> = audio
            .iter()
            .map(|&sample| (sample.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect();
        self.vad
            .is_voice_segment(&audio_i16)
            .map_err(|e| VoiceError::VadProcessing(format!("{:?}", e)))
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Forget adaptation state (after capture was suspended).
    pub fn reset(&mut self) -> VoiceResult<()> {
        self.vad = build_vad(&self.config)?;
        Ok(())
    }
}

fn build_vad(config: &VadConfig) -> VoiceResult<Vad> {
    let sample_rate = match config.sample_rate {
        8000 => SampleRate::Rate8kHz,
        16000 => SampleRate::Rate16kHz,
        32000 => SampleRate::Rate32kHz,
        48000 => SampleRate::Rate48kHz,
        other => {
            return Err(VoiceError::VadInit(format!(
                "WebRTC VAD only supports 8000, 16000, 32000 or 48000 Hz, got {}",
                other
            )))
        }
    };
    let mode = match config.mode {
        0 => VadMode::Quality,
        1 => VadMode::LowBitrate,
        2 => VadMode::Aggressive,
        3 => VadMode::VeryAggressive,
        other => {
            return Err(VoiceError::VadInit(format!(
                "VAD mode must be 0-3, got {}",
                other
            )))
        }
    };
    let mut vad = Vad::new();
    vad.set_mode(mode);
    vad.set_sample_rate(sample_rate);
    Ok(vad)
}
