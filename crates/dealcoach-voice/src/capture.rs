//! **SpeechCaptureChannel**: the lazy stream of recognition events.
//!
//! Wraps a [`CaptureBackend`] and turns "the recognizer stopped on its own"
//! into a transparent restart. Only `start()` failures are surfaced; every
//! later reopen failure is retried after `restart_backoff`.

use crate::error::{VoiceError, VoiceResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// One recognition result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recognition {
    pub text: String,
    /// `false` for an interim hypothesis that later results replace
    pub is_final: bool,
}

impl Recognition {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// A speech recognizer. A returned receiver that yields `None` means the
/// recognizer terminated spontaneously.
pub trait CaptureBackend: Send {
    /// Begin recognizing. Errors here mean capture is unavailable.
    fn open(&mut self) -> VoiceResult<mpsc::UnboundedReceiver<Recognition>>;

    /// Stop recognizing and release the device. Must be idempotent.
    fn close(&mut self);

    /// Input level in `0.0..=1.0`, when the backend measures one
    fn volume(&self) -> Option<watch::Receiver<f32>> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureState {
    Stopped,
    Active,
    Suspended,
}

/// Recognition stream with auto-restart
pub struct SpeechCaptureChannel {
    backend: Box<dyn CaptureBackend>,
    state: CaptureState,
    rx: Option<mpsc::UnboundedReceiver<Recognition>>,
    restart_backoff: Duration,
    restarts: u64,
    /// The recognizer ended on its own and has not been reopened yet
    recovering: bool,
}

impl SpeechCaptureChannel {
    pub fn new(backend: Box<dyn CaptureBackend>, restart_backoff: Duration) -> Self {
        Self {
            backend,
            state: CaptureState::Stopped,
            rx: None,
            restart_backoff,
            restarts: 0,
            recovering: false,
        }
    }

    /// Open the backend. Failure is fatal to the session.
    pub fn start(&mut self) -> VoiceResult<()> {
        let rx = self.backend.open().map_err(|e| match e {
            VoiceError::CaptureUnavailable(msg) => VoiceError::CaptureUnavailable(msg),
            other => VoiceError::CaptureUnavailable(other.to_string()),
        })?;
        info!("🎤 Speech capture started");
        self.rx = Some(rx);
        self.state = CaptureState::Active;
        Ok(())
    }

    /// Stop listening while the counterpart holds the floor.
    pub fn suspend(&mut self) {
        if self.state == CaptureState::Active {
            debug!("Speech capture suspended");
            self.backend.close();
            self.rx = None;
            self.state = CaptureState::Suspended;
        }
    }

    /// Listen again after a suspend. A failed reopen is retried by `next_event`.
    pub fn resume(&mut self) {
        if self.state != CaptureState::Suspended {
            return;
        }
        self.state = CaptureState::Active;
        match self.backend.open() {
            Ok(rx) => {
                debug!("Speech capture resumed");
                self.rx = Some(rx);
            }
            Err(e) => warn!("Speech capture resume failed, will retry: {}", e),
        }
    }

    /// Idempotent.
    pub fn stop(&mut self) {
        if self.state != CaptureState::Stopped {
            info!("🎤 Speech capture stopped");
            self.backend.close();
        }
        self.rx = None;
        self.recovering = false;
        self.state = CaptureState::Stopped;
    }

    pub fn is_active(&self) -> bool {
        self.state == CaptureState::Active
    }

    /// Spontaneous terminations recovered so far
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    pub fn volume(&self) -> Option<watch::Receiver<f32>> {
        self.backend.volume()
    }

    /// Next recognition. Pending forever while stopped or suspended.
    ///
    /// Cancel safe: dropping the future loses no recognition.
    pub async fn next_event(&mut self) -> Recognition {
        loop {
            if self.state != CaptureState::Active {
                return std::future::pending().await;
            }

            if let Some(rx) = self.rx.as_mut() {
                match rx.recv().await {
                    Some(recognition) => return recognition,
                    None => {
                        info!("Speech capture ended on its own, restarting");
                        self.recovering = true;
                        self.rx = None;
                        self.backend.close();
                    }
                }
            }

            tokio::time::sleep(self.restart_backoff).await;
            match self.backend.open() {
                Ok(rx) => {
                    if std::mem::take(&mut self.recovering) {
                        self.restarts += 1;
                    }
                    self.rx = Some(rx);
                }
                Err(e) => warn!("Speech capture restart failed, retrying: {}", e),
            }
        }
    }
}

impl Drop for SpeechCaptureChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Default)]
struct FeedShared {
    sender: Mutex<Option<mpsc::UnboundedSender<Recognition>>>,
    opens: AtomicUsize,
    failing_opens: AtomicUsize,
    unavailable: Mutex<Option<String>>,
}

/// Backend driven by hand through a [`CaptureFeed`]: typed console input,
/// replayed transcripts, tests.
pub struct FeedCapture {
    shared: Arc<FeedShared>,
}

/// Producer side of a [`FeedCapture`]
#[derive(Clone)]
pub struct CaptureFeed {
    shared: Arc<FeedShared>,
}

/// Create a connected backend / feed pair.
pub fn feed_capture() -> (FeedCapture, CaptureFeed) {
    let shared = Arc::new(FeedShared::default());
    (
        FeedCapture {
            shared: shared.clone(),
        },
        CaptureFeed { shared },
    )
}

impl CaptureBackend for FeedCapture {
    fn open(&mut self) -> VoiceResult<mpsc::UnboundedReceiver<Recognition>> {
        if let Some(reason) = lock(&self.shared.unavailable).clone() {
            return Err(VoiceError::CaptureUnavailable(reason));
        }
        let failing = self.shared.failing_opens.load(Ordering::SeqCst);
        if failing > 0 {
            self.shared.failing_opens.store(failing - 1, Ordering::SeqCst);
            return Err(VoiceError::AudioDevice("recognizer busy".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.shared.sender) = Some(tx);
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }

    fn close(&mut self) {
        lock(&self.shared.sender).take();
    }
}

impl CaptureFeed {
    /// Deliver a recognition. Returns `false` when capture is not listening,
    /// in which case the input is lost (as speech would be).
    pub fn push(&self, recognition: Recognition) -> bool {
        match lock(&self.shared.sender).as_ref() {
            Some(tx) => tx.send(recognition).is_ok(),
            None => false,
        }
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.shared.sender)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Simulate the recognizer terminating on its own.
    pub fn end_stream(&self) {
        lock(&self.shared.sender).take();
    }

    /// Number of successful opens (start, resumes and restarts)
    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Make the next `count` opens fail with a transient error.
    pub fn fail_next_opens(&self, count: usize) {
        self.shared.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Make every open fail as if the microphone were denied.
    pub fn set_unavailable(&self, reason: impl Into<String>) {
        *lock(&self.shared.unavailable) = Some(reason.into());
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
