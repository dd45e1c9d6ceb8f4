//! **Microphone backend**: cpal capture → WebRTC VAD → gap segmentation → STT.
//!
//! Each `open()` starts a dedicated capture thread (the cpal stream is `!Send`)
//! and an STT worker. `close()` only signals the capture thread, so suspending
//! never blocks the session task; dropping the backend waits until the device
//! is free. Segments still in transcription are dropped.

use crate::audio::{AudioCapture, AudioChunk, AudioConfig};
use crate::capture::{CaptureBackend, Recognition};
use crate::error::{VoiceError, VoiceResult};
use crate::segmenter::{AudioSegment, SegmentEvent, SegmenterConfig, SpeechSegmenter};
use crate::stt::{create_stt, SttBackend};
use crate::vad::{VadConfig, VadDetector};
use crate::volume::AudioVolumeMonitor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct MicrophoneConfig {
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub segmenter: SegmenterConfig,
}

struct CaptureWorker {
    stop: Arc<AtomicBool>,
    thread: thread::JoinHandle<()>,
}

pub struct MicrophoneBackend {
    config: MicrophoneConfig,
    stt: Arc<dyn SttBackend>,
    volume: Arc<Mutex<AudioVolumeMonitor>>,
    volume_rx: watch::Receiver<f32>,
    worker: Option<CaptureWorker>,
    /// Stopped workers whose threads may still hold the device
    retiring: Vec<CaptureWorker>,
    /// A stream has opened on this device at least once
    verified: bool,
}

impl MicrophoneBackend {
    pub fn new(config: MicrophoneConfig, stt: Box<dyn SttBackend>) -> Self {
        let (monitor, volume_rx) = AudioVolumeMonitor::new();
        Self {
            config,
            stt: Arc::from(stt),
            volume: Arc::new(Mutex::new(monitor)),
            volume_rx,
            worker: None,
            retiring: Vec::new(),
            verified: false,
        }
    }

    /// Default device and STT from environment. Missing STT credentials mean
    /// capture is unavailable.
    pub fn from_env() -> VoiceResult<Self> {
        Ok(Self::new(MicrophoneConfig::default(), create_stt()?))
    }
}

impl CaptureBackend for MicrophoneBackend {
    /// The first open waits until the stream is running so a missing or
    /// denied microphone is reported. Later opens return at once; the new
    /// capture thread joins the retired ones before touching the device, and
    /// a setup failure ends the recognition stream instead.
    fn open(&mut self) -> VoiceResult<mpsc::UnboundedReceiver<Recognition>> {
        self.close();
        let previous: Vec<thread::JoinHandle<()>> =
            self.retiring.drain(..).map(|worker| worker.thread).collect();

        let (recognition_tx, recognition_rx) = mpsc::unbounded_channel();
        let (segment_tx, segment_rx) = std_mpsc::channel::<AudioSegment>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<VoiceResult<()>>();
        let stop = Arc::new(AtomicBool::new(false));

        let stt = self.stt.clone();
        thread::Builder::new()
            .name("dealcoach-stt".to_string())
            .spawn(move || stt_worker(stt, segment_rx, recognition_tx))?;

        let config = self.config.clone();
        let volume = self.volume.clone();
        let thread_stop = stop.clone();
        let thread = thread::Builder::new()
            .name("dealcoach-capture".to_string())
            .spawn(move || {
                capture_thread(config, previous, volume, thread_stop, segment_tx, ready_tx)
            })?;

        if self.verified {
            self.worker = Some(CaptureWorker { stop, thread });
            return Ok(recognition_rx);
        }

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.verified = true;
                self.worker = Some(CaptureWorker { stop, thread });
                Ok(recognition_rx)
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(VoiceError::AudioStream("capture thread exited".to_string()))
            }
        }
    }

    /// Signals the capture thread and returns without waiting for it.
    fn close(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::SeqCst);
            self.retiring.push(worker);
            debug!("Microphone releasing");
        }
        if let Ok(mut monitor) = self.volume.lock() {
            monitor.reset();
        }
    }

    fn volume(&self) -> Option<watch::Receiver<f32>> {
        Some(self.volume_rx.clone())
    }
}

impl Drop for MicrophoneBackend {
    /// Blocks until every capture thread has let go of the device.
    fn drop(&mut self) {
        self.close();
        for worker in self.retiring.drain(..) {
            let _ = worker.thread.join();
        }
        debug!("Microphone released");
    }
}

fn capture_thread(
    config: MicrophoneConfig,
    previous: Vec<thread::JoinHandle<()>>,
    volume: Arc<Mutex<AudioVolumeMonitor>>,
    stop: Arc<AtomicBool>,
    segment_tx: std_mpsc::Sender<AudioSegment>,
    ready_tx: std_mpsc::Sender<VoiceResult<()>>,
) {
    for handle in previous {
        let _ = handle.join();
    }
    if stop.load(Ordering::SeqCst) {
        return;
    }

    let (chunk_tx, chunk_rx) = std_mpsc::channel::<AudioChunk>();
    let setup = VadDetector::new(config.vad.clone()).and_then(|vad| {
        let capture = AudioCapture::new(config.audio.clone())?;
        let stream = capture.start(chunk_tx)?;
        Ok((vad, stream))
    });
    let (mut vad, _stream) = match setup {
        Ok(parts) => {
            let _ = ready_tx.send(Ok(()));
            parts
        }
        Err(e) => {
            warn!("Microphone setup failed: {}", e);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let mut segmenter = SpeechSegmenter::new(config.segmenter);
    info!("🎤 Microphone listening");

    while !stop.load(Ordering::SeqCst) {
        let chunk = match chunk_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(chunk) => chunk,
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        };
        if let Ok(mut monitor) = volume.lock() {
            monitor.process(&chunk.samples);
        }
        let is_speech = match vad.is_speech(&chunk.samples) {
            Ok(v) => v,
            Err(e) => {
                debug!("VAD skipped chunk: {}", e);
                continue;
            }
        };
        if let Some(SegmentEvent::Segment(segment)) = segmenter.process(is_speech, &chunk.samples) {
            if segment_tx.send(segment).is_err() {
                break;
            }
        }
    }
    // Stream and segment sender drop here; the STT worker drains and exits.
}

fn stt_worker(
    stt: Arc<dyn SttBackend>,
    segment_rx: std_mpsc::Receiver<AudioSegment>,
    recognition_tx: mpsc::UnboundedSender<Recognition>,
) {
    while let Ok(segment) = segment_rx.recv() {
        if recognition_tx.is_closed() {
            break;
        }
        match stt.transcribe(&segment) {
            Ok(text) if !text.is_empty() => {
                debug!(duration = ?segment.duration, "Transcribed segment");
                if recognition_tx.send(Recognition::final_text(text)).is_err() {
                    break;
                }
            }
            Ok(_) => debug!("Segment transcribed to nothing"),
            Err(e) => warn!("STT failed for segment: {}", e),
        }
    }
}
