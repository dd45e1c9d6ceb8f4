//! Capture and speech backends for the terminal.
//!
//! Typed lines stand in for recognized speech and replies are printed at a
//! speaking pace. With the `device` feature the microphone and speaker can be
//! used instead.

use dealcoach_core::MediaProvider;
use dealcoach_voice::{feed_capture, CaptureBackend, CaptureFeed, SpeechSink, VoiceResult};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Roughly 160 words per minute
const PER_WORD: Duration = Duration::from_millis(375);
const MIN_UTTERANCE: Duration = Duration::from_millis(800);

pub struct ConsoleMedia {
    /// Feed of the most recently opened typed capture
    feed: Arc<Mutex<Option<CaptureFeed>>>,
    #[cfg_attr(not(feature = "device"), allow(dead_code))]
    use_microphone: bool,
    #[cfg_attr(not(feature = "device"), allow(dead_code))]
    use_speaker: bool,
}

impl ConsoleMedia {
    pub fn new(use_microphone: bool, use_speaker: bool) -> Self {
        Self {
            feed: Arc::new(Mutex::new(None)),
            use_microphone,
            use_speaker,
        }
    }

    /// Shared slot the stdin loop pushes typed lines into
    pub fn feed_slot(&self) -> Arc<Mutex<Option<CaptureFeed>>> {
        self.feed.clone()
    }

    fn typed_capture(&mut self) -> Box<dyn CaptureBackend> {
        let (backend, feed) = feed_capture();
        if let Ok(mut slot) = self.feed.lock() {
            *slot = Some(feed);
        }
        Box::new(backend)
    }
}

impl MediaProvider for ConsoleMedia {
    fn capture(&mut self) -> VoiceResult<Box<dyn CaptureBackend>> {
        #[cfg(feature = "device")]
        if self.use_microphone {
            // The STT client is a blocking reqwest client and must be built off the async workers.
            let mic = tokio::task::block_in_place(dealcoach_voice::MicrophoneBackend::from_env)?;
            return Ok(Box::new(mic));
        }
        Ok(self.typed_capture())
    }

    fn speech(&mut self) -> VoiceResult<Box<dyn SpeechSink>> {
        #[cfg(feature = "device")]
        if self.use_speaker {
            let tts = tokio::task::block_in_place(dealcoach_voice::OpenRouterTts::from_env)?;
            return Ok(Box::new(dealcoach_voice::DeviceSpeaker::new(Box::new(tts))?));
        }
        Ok(Box::new(PrintedSpeech::default()))
    }
}

/// Prints each reply and holds the floor for as long as it would take to say it.
#[derive(Default)]
pub struct PrintedSpeech {
    playing: Option<JoinHandle<()>>,
}

impl SpeechSink for PrintedSpeech {
    fn begin(&mut self, text: &str) -> VoiceResult<oneshot::Receiver<()>> {
        println!("\n  PROSPECT: {}\n", text);
        let words = text.split_whitespace().count() as u32;
        let pace = (PER_WORD * words).max(MIN_UTTERANCE);
        let (done, rx) = oneshot::channel();
        self.playing = Some(tokio::spawn(async move {
            tokio::time::sleep(pace).await;
            let _ = done.send(());
        }));
        Ok(rx)
    }

    fn cancel(&mut self) {
        if let Some(task) = self.playing.take() {
            task.abort();
        }
    }
}
