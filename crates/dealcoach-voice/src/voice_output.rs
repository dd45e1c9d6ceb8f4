//! **SpeechOutputChannel**: speaks the counterpart's replies, one utterance at a time.
//!
//! A new `speak` supersedes whatever is playing. Every utterance id handed to
//! `speak` comes back out of `next_ended` exactly once, whether it played to
//! the end, was superseded, was stopped, or never started.

use crate::error::{VoiceError, VoiceResult};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Something that can voice text. The returned receiver resolves (or errors)
/// once the audio is finished or cancelled.
pub trait SpeechSink: Send {
    fn begin(&mut self, text: &str) -> VoiceResult<oneshot::Receiver<()>>;

    /// Stop the current utterance immediately. Must be idempotent.
    fn cancel(&mut self);
}

pub struct SpeechOutputChannel {
    sink: Box<dyn SpeechSink>,
    current: Option<(u64, oneshot::Receiver<()>)>,
    ended: VecDeque<u64>,
}

impl SpeechOutputChannel {
    pub fn new(sink: Box<dyn SpeechSink>) -> Self {
        Self {
            sink,
            current: None,
            ended: VecDeque::new(),
        }
    }

    /// Speak `text` as `utterance`, cancelling any utterance in progress.
    pub fn speak(&mut self, utterance: u64, text: &str) {
        self.stop();
        match self.sink.begin(text) {
            Ok(done) => {
                debug!(utterance, "🔊 Speaking");
                self.current = Some((utterance, done));
            }
            Err(e) => {
                warn!(utterance, "Speech output failed to start: {}", e);
                self.ended.push_back(utterance);
            }
        }
    }

    /// Cancel the current utterance (it still reports as ended).
    pub fn stop(&mut self) {
        if let Some((utterance, _)) = self.current.take() {
            self.sink.cancel();
            self.ended.push_back(utterance);
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.current.is_some()
    }

    /// Id of the next utterance to end. Pending while nothing is queued or playing.
    ///
    /// Cancel safe.
    pub async fn next_ended(&mut self) -> u64 {
        if let Some(utterance) = self.ended.pop_front() {
            return utterance;
        }
        match self.current.as_mut() {
            Some((utterance, done)) => {
                let utterance = *utterance;
                let _ = done.await;
                self.current = None;
                utterance
            }
            None => std::future::pending().await,
        }
    }
}

impl Drop for SpeechOutputChannel {
    fn drop(&mut self) {
        if self.current.is_some() {
            self.sink.cancel();
        }
    }
}

/// Text to audio bytes (WAV/MP3). An empty vec means "nothing to play".
pub trait TtsBackend: Send + Sync {
    fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>>;
}

/// OpenAI-compatible `/audio/speech` API.
/// Uses `TTS_API_URL`, `TTS_API_KEY` (or `OPENROUTER_API_KEY`), `TTS_MODEL` and `TTS_VOICE`.
#[derive(Debug, Clone)]
pub struct OpenRouterTts {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1)
    pub base_url: String,
    pub api_key: String,
    /// tts-1 (fast) or tts-1-hd
    pub model: String,
    /// alloy, echo, fable, onyx, nova, shimmer, ...
    pub voice: String,
    client: reqwest::blocking::Client,
}

impl OpenRouterTts {
    pub fn from_env() -> VoiceResult<Self> {
        let base_url = std::env::var("TTS_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("TTS_API_KEY")
            .or_else(|_| std::env::var("OPENROUTER_API_KEY"))
            .map_err(|_| {
                VoiceError::Config("TTS requires TTS_API_KEY or OPENROUTER_API_KEY".to_string())
            })?;
        let model = std::env::var("TTS_MODEL").unwrap_or_else(|_| "tts-1".to_string());
        let voice = std::env::var("TTS_VOICE").unwrap_or_else(|_| "nova".to_string());
        Self::new(base_url, api_key, model, voice)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            voice: voice.into(),
            client,
        })
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
        })
    }
}

impl TtsBackend for OpenRouterTts {
    fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/audio/speech", self.base_url.trim_end_matches('/'));
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(text))
            .send()
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Tts(format!("TTS API error {}: {}", status, body)));
        }
        let bytes = res.bytes().map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

// -----------------------------------------------------------------------------
// Speaker playback (optional feature). Needs an output device.
// -----------------------------------------------------------------------------
#[cfg(feature = "device")]
mod device {
    use super::*;
    use rodio::{OutputStream, Sink, Source};
    use std::io::Cursor;
    use std::sync::mpsc as std_mpsc;
    use std::sync::Arc;
    use std::thread;
    use tracing::info;

    enum PlaybackCommand {
        Speak {
            text: String,
            done: oneshot::Sender<()>,
        },
        Synthesized {
            id: u64,
            audio: VoiceResult<Vec<u8>>,
        },
        Cancel,
        Shutdown,
    }

    /// Plays synthesized replies on the default output device.
    ///
    /// The rodio stream is `!Send`, so it lives on a dedicated playback thread
    /// for the lifetime of this value. Synthesis runs on its own thread per
    /// utterance, so the playback thread always answers `Cancel` and `Shutdown`
    /// promptly.
    pub struct DeviceSpeaker {
        cmd_tx: std_mpsc::Sender<PlaybackCommand>,
        thread: Option<thread::JoinHandle<()>>,
    }

    impl DeviceSpeaker {
        pub fn new(tts: Box<dyn TtsBackend>) -> VoiceResult<Self> {
            let (cmd_tx, cmd_rx) = std_mpsc::channel();
            let (ready_tx, ready_rx) = std_mpsc::channel();
            let tts: Arc<dyn TtsBackend> = Arc::from(tts);
            let results = cmd_tx.clone();

            let thread = thread::Builder::new()
                .name("dealcoach-playback".to_string())
                .spawn(move || playback_thread(tts, cmd_rx, results, ready_tx))?;

            match ready_rx.recv() {
                Ok(Ok(())) => Ok(Self {
                    cmd_tx,
                    thread: Some(thread),
                }),
                Ok(Err(e)) => {
                    let _ = thread.join();
                    Err(e)
                }
                Err(_) => Err(VoiceError::Playback("playback thread exited".to_string())),
            }
        }
    }

    impl SpeechSink for DeviceSpeaker {
        fn begin(&mut self, text: &str) -> VoiceResult<oneshot::Receiver<()>> {
            let (done, rx) = oneshot::channel();
            self.cmd_tx
                .send(PlaybackCommand::Speak {
                    text: text.to_string(),
                    done,
                })
                .map_err(|_| VoiceError::Playback("playback thread exited".to_string()))?;
            Ok(rx)
        }

        fn cancel(&mut self) {
            let _ = self.cmd_tx.send(PlaybackCommand::Cancel);
        }
    }

    impl Drop for DeviceSpeaker {
        fn drop(&mut self) {
            let _ = self.cmd_tx.send(PlaybackCommand::Shutdown);
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }

    fn playback_thread(
        tts: Arc<dyn TtsBackend>,
        cmd_rx: std_mpsc::Receiver<PlaybackCommand>,
        results: std_mpsc::Sender<PlaybackCommand>,
        ready_tx: std_mpsc::Sender<VoiceResult<()>>,
    ) {
        let (_stream, handle) = match OutputStream::try_default() {
            Ok(pair) => pair,
            Err(e) => {
                let _ = ready_tx.send(Err(VoiceError::Playback(e.to_string())));
                return;
            }
        };
        let _ = ready_tx.send(Ok(()));
        info!("🔊 Playback ready");

        let mut next_id = 0u64;
        // Waiting for audio from the synthesis thread
        let mut pending: Option<(u64, oneshot::Sender<()>)> = None;
        let mut playing: Option<(Sink, oneshot::Sender<()>)> = None;
        loop {
            match cmd_rx.recv_timeout(Duration::from_millis(30)) {
                Ok(PlaybackCommand::Speak { text, done }) => {
                    finish(&mut pending, &mut playing);
                    next_id += 1;
                    let id = next_id;
                    let tts = tts.clone();
                    let results = results.clone();
                    let spawned = thread::Builder::new()
                        .name("dealcoach-tts".to_string())
                        .spawn(move || {
                            let audio = tts.synthesize(&text);
                            // Playback already shut down.
                            let _ = results.send(PlaybackCommand::Synthesized { id, audio });
                        });
                    match spawned {
                        Ok(_) => pending = Some((id, done)),
                        // Dropping `done` ends the utterance.
                        Err(e) => warn!("Synthesis thread failed to start: {}", e),
                    }
                }
                Ok(PlaybackCommand::Synthesized { id, audio }) => {
                    let done = match pending.take() {
                        Some((current, done)) if current == id => done,
                        other => {
                            debug!(id, "Dropping audio for a cancelled utterance");
                            pending = other;
                            continue;
                        }
                    };
                    match audio.and_then(|bytes| play(&handle, bytes)) {
                        Ok(sink) => playing = Some((sink, done)),
                        Err(e) => warn!("Playback failed: {}", e),
                    }
                }
                Ok(PlaybackCommand::Cancel) => finish(&mut pending, &mut playing),
                Ok(PlaybackCommand::Shutdown) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                    if let Some((sink, _)) = playing.take() {
                        sink.stop();
                    }
                    info!("🔊 Playback released");
                    return;
                }
                Err(std_mpsc::RecvTimeoutError::Timeout) => {
                    if playing.as_ref().is_some_and(|(sink, _)| sink.empty()) {
                        if let Some((_, done)) = playing.take() {
                            let _ = done.send(());
                        }
                    }
                }
            }
        }
    }

    /// End whatever is waiting for synthesis or playing.
    fn finish(
        pending: &mut Option<(u64, oneshot::Sender<()>)>,
        playing: &mut Option<(Sink, oneshot::Sender<()>)>,
    ) {
        if let Some((_, done)) = pending.take() {
            let _ = done.send(());
        }
        if let Some((sink, done)) = playing.take() {
            sink.stop();
            let _ = done.send(());
        }
    }

    fn play(handle: &rodio::OutputStreamHandle, bytes: Vec<u8>) -> VoiceResult<Sink> {
        let sink = Sink::try_new(handle).map_err(|e| VoiceError::Playback(e.to_string()))?;
        if !bytes.is_empty() {
            let source = rodio::Decoder::new(Cursor::new(bytes))
                .map_err(|e| VoiceError::Playback(format!("Decode failed: {}", e)))?;
            sink.append(source.convert_samples::<f32>());
        }
        Ok(sink)
    }
}

#[cfg(feature = "device")]
pub use device::DeviceSpeaker;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Sink whose utterances end only when the test says so.
    #[derive(Default, Clone)]
    struct ManualSink {
        pending: Arc<Mutex<Vec<oneshot::Sender<()>>>>,
        cancels: Arc<Mutex<usize>>,
        fail: bool,
    }

    impl SpeechSink for ManualSink {
        fn begin(&mut self, _text: &str) -> VoiceResult<oneshot::Receiver<()>> {
            if self.fail {
                return Err(VoiceError::Tts("no voice".into()));
            }
            let (tx, rx) = oneshot::channel();
            self.pending.lock().unwrap().push(tx);
            Ok(rx)
        }

        fn cancel(&mut self) {
            *self.cancels.lock().unwrap() += 1;
            self.pending.lock().unwrap().clear();
        }
    }

    #[tokio::test]
    async fn finished_utterance_ends_once() {
        let sink = ManualSink::default();
        let mut out = SpeechOutputChannel::new(Box::new(sink.clone()));
        out.speak(1, "Hello there.");
        assert!(out.is_speaking());

        let tx = sink.pending.lock().unwrap().pop().unwrap();
        tx.send(()).unwrap();
        assert_eq!(out.next_ended().await, 1);
        assert!(!out.is_speaking());

        let mut again = tokio_test::task::spawn(out.next_ended());
        tokio_test::assert_pending!(again.poll());
    }

    #[tokio::test]
    async fn superseded_utterance_reports_ended() {
        let sink = ManualSink::default();
        let mut out = SpeechOutputChannel::new(Box::new(sink.clone()));
        out.speak(1, "first");
        out.speak(2, "second");
        assert_eq!(*sink.cancels.lock().unwrap(), 1);
        assert_eq!(out.next_ended().await, 1);

        out.stop();
        assert_eq!(out.next_ended().await, 2);
    }

    #[tokio::test]
    async fn failed_start_still_ends() {
        let sink = ManualSink {
            fail: true,
            ..Default::default()
        };
        let mut out = SpeechOutputChannel::new(Box::new(sink));
        out.speak(7, "unheard");
        assert!(!out.is_speaking());
        assert_eq!(out.next_ended().await, 7);
    }

    #[test]
    fn tts_request_uses_configured_voice() {
        let tts = OpenRouterTts::new("https://api.example.com/v1", "k", "tts-1", "onyx").unwrap();
        let body = tts.request_body("Hi");
        assert_eq!(body["voice"], "onyx");
        assert_eq!(body["input"], "Hi");
    }
}
