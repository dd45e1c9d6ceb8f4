//! Microphone capture using CPAL.

use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use std::sync::mpsc;
use tracing::{info, warn};

/// Audio configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Sample rate in Hz (default: 16000)
    pub sample_rate: u32,

    /// Number of channels (default: 1 for mono)
    pub channels: u16,

    /// Samples per chunk (default: 480 for 30ms at 16kHz)
    pub chunk_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            chunk_size: 480,
        }
    }
}

/// Fixed-size chunk of PCM (f32, -1.0..1.0)
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
}

/// Default input device opened at the configured rate
pub struct AudioCapture {
    config: AudioConfig,
    device: Device,
    stream_config: StreamConfig,
}

impl AudioCapture {
    /// No input device is reported as capture being unavailable.
    pub fn new(config: AudioConfig) -> VoiceResult<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| VoiceError::CaptureUnavailable("No input device available".to_string()))?;

        info!(
            "🎤 Using input device: {} ({}Hz, {} ch)",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            config.sample_rate,
            config.channels
        );
        // Fails early when the device refuses input (permissions, busy).
        let _ = device.default_input_config()?;

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            config,
            device,
            stream_config,
        })
    }

    /// Start the stream; chunks of exactly `chunk_size` samples go to `chunk_tx`.
    /// The stream stops when the returned value is dropped.
    pub fn start(self, chunk_tx: mpsc::Sender<AudioChunk>) -> VoiceResult<Stream> {
        let chunk_size = self.config.chunk_size;
        let mut pending = Vec::with_capacity(chunk_size);

        let stream = self.device.build_input_stream(
            &self.stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    pending.push(sample);
                    if pending.len() == chunk_size {
                        let samples = std::mem::replace(&mut pending, Vec::with_capacity(chunk_size));
                        // Receiver gone means capture is shutting down.
                        let _ = chunk_tx.send(AudioChunk { samples });
                    }
                }
            },
            move |err| {
                warn!("Audio stream error: {}", err);
            },
            None,
        )?;
        stream.play()?;
        info!("✅ Audio capture started");
        Ok(stream)
    }

    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let devices = cpal::default_host().input_devices()?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_config_defaults() {
        let config = AudioConfig::default();
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.chunk_size, 480);
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn lists_input_devices() {
        let devices = AudioCapture::list_input_devices().unwrap();
        println!("Available input devices: {:?}", devices);
    }
}
