//! Gap segmentation of microphone PCM.
//!
//! Consumes per-chunk VAD decisions and cuts the audio into speech segments:
//! a segment closes once `silence_gap` of non-speech follows speech. Segments
//! with less than `min_speech` of voiced audio are dropped as noise. Timing is
//! measured in samples, so the segmenter is deterministic under test.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for segmentation
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Sample rate of the incoming PCM (default: 16000 Hz)
    pub sample_rate: u32,

    /// Silence after speech that closes a segment (default: 800ms)
    pub silence_gap: Duration,

    /// Minimum voiced audio for a segment to be kept (default: 200ms)
    pub min_speech: Duration,

    /// Segments are force-closed at this length (default: 30s)
    pub max_segment: Duration,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            silence_gap: Duration::from_millis(800),
            min_speech: Duration::from_millis(200),
            max_segment: Duration::from_secs(30),
        }
    }
}

/// A closed speech segment, ready for transcription
#[derive(Debug, Clone)]
pub struct AudioSegment {
    /// PCM samples (f32, -1.0..1.0), trailing silence included
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Voiced duration
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

/// Output of [`SpeechSegmenter::process`]
#[derive(Debug, Clone)]
pub enum SegmentEvent {
    SpeechStarted,
    Segment(AudioSegment),
    /// Speech too short to transcribe
    Discarded { speech: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentState {
    Idle,
    Speaking,
    Trailing,
}

pub struct SpeechSegmenter {
    config: SegmenterConfig,
    state: SegmentState,
    buffer: Vec<f32>,
    speech_samples: usize,
    silence_samples: usize,
}

impl SpeechSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            state: SegmentState::Idle,
            buffer: Vec::new(),
            speech_samples: 0,
            silence_samples: 0,
        }
    }

    /// Feed one VAD-classified chunk.
    pub fn process(&mut self, is_speech: bool, chunk: &[f32]) -> Option<SegmentEvent> {
        match (self.state, is_speech) {
            (SegmentState::Idle, false) => None,

            (SegmentState::Idle, true) => {
                debug!("Speech started");
                self.state = SegmentState::Speaking;
                self.buffer.clear();
                self.buffer.extend_from_slice(chunk);
                self.speech_samples = chunk.len();
                self.silence_samples = 0;
                Some(SegmentEvent::SpeechStarted)
            }

            (_, true) => {
                self.state = SegmentState::Speaking;
                self.buffer.extend_from_slice(chunk);
                self.speech_samples += chunk.len();
                self.silence_samples = 0;
                if self.buffer.len() >= self.samples_for(self.config.max_segment) {
                    info!("⏱️ Max segment length reached, closing segment");
                    return Some(self.commit());
                }
                None
            }

            (_, false) => {
                self.state = SegmentState::Trailing;
                self.buffer.extend_from_slice(chunk);
                self.silence_samples += chunk.len();
                if self.silence_samples >= self.samples_for(self.config.silence_gap) {
                    return Some(self.commit());
                }
                None
            }
        }
    }

    /// Close any open segment (capture is shutting down).
    pub fn flush(&mut self) -> Option<SegmentEvent> {
        if self.state == SegmentState::Idle {
            return None;
        }
        Some(self.commit())
    }

    pub fn is_speaking(&self) -> bool {
        self.state != SegmentState::Idle
    }

    fn commit(&mut self) -> SegmentEvent {
        let speech = self.duration_of(self.speech_samples);
        let samples = std::mem::take(&mut self.buffer);
        self.state = SegmentState::Idle;
        self.speech_samples = 0;
        self.silence_samples = 0;

        if speech < self.config.min_speech {
            debug!("Discarding {:?} of speech (below minimum)", speech);
            return SegmentEvent::Discarded { speech };
        }
        SegmentEvent::Segment(AudioSegment {
            samples,
            sample_rate: self.config.sample_rate,
            duration: speech,
            timestamp: Utc::now(),
        })
    }

    fn samples_for(&self, d: Duration) -> usize {
        (d.as_nanos() * self.config.sample_rate as u128 / 1_000_000_000) as usize
    }

    fn duration_of(&self, samples: usize) -> Duration {
        Duration::from_nanos(samples as u64 * 1_000_000_000 / self.config.sample_rate as u64)
    }
}
