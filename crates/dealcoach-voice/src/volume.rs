//! Input level metering for the "is the mic hearing me" indicator.

use tokio::sync::watch;

/// Level above which the user is considered to be talking
pub const VOICED_THRESHOLD: f32 = 0.05;

/// Smoothed RMS level of the microphone, published on a watch channel.
pub struct AudioVolumeMonitor {
    level: f32,
    attack: f32,
    release: f32,
    gain: f32,
    tx: watch::Sender<f32>,
}

impl AudioVolumeMonitor {
    pub fn new() -> (Self, watch::Receiver<f32>) {
        let (tx, rx) = watch::channel(0.0);
        (
            Self {
                level: 0.0,
                attack: 0.6,
                release: 0.1,
                // Speech RMS rarely exceeds ~0.25 of full scale.
                gain: 4.0,
                tx,
            },
            rx,
        )
    }

    /// Feed one chunk of PCM samples; returns the published level.
    pub fn process(&mut self, samples: &[f32]) -> f32 {
        let target = (rms(samples) * self.gain).clamp(0.0, 1.0);
        let k = if target > self.level {
            self.attack
        } else {
            self.release
        };
        self.level += (target - self.level) * k;
        self.tx.send_replace(self.level);
        self.level
    }

    /// Drop the level to zero (capture suspended or stopped).
    pub fn reset(&mut self) {
        self.level = 0.0;
        self.tx.send_replace(0.0);
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn subscribe(&self) -> watch::Receiver<f32> {
        self.tx.subscribe()
    }
}

pub fn is_voiced(level: f32, threshold: f32) -> bool {
    level > threshold
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}
