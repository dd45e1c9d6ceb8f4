//! **LiveSession**: drives a [`TurnCoordinator`] against real channels.
//!
//! One tokio task owns the coordinator, the capture and output channels and
//! the in-flight Responder call. It wakes on (in priority order) a command,
//! the coordinator's next deadline, the Responder reply, the end of an
//! utterance, or a recognition, feeds the wake-up to the coordinator and
//! carries out the returned directives.

use crate::capture::{CaptureBackend, Recognition, SpeechCaptureChannel};
use crate::coordinator::{CoordinatorConfig, Directive, LiveEvent, TurnCoordinator};
use crate::error::{VoiceError, VoiceResult};
use crate::responder::{HistoryEntry, Responder, ResponderError};
use crate::transcript::Transcript;
use crate::voice_output::{SpeechOutputChannel, SpeechSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Live session policy
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub coordinator: CoordinatorConfig,

    /// Wait before reopening a recognizer that stopped on its own (default: 250ms)
    pub capture_restart_backoff: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            capture_restart_backoff: Duration::from_millis(250),
        }
    }
}

#[derive(Debug)]
enum Command {
    InjectPrompt(String),
    Disconnect { flush: bool },
}

pub struct LiveSession;

impl LiveSession {
    /// Start capture and spawn the session task. Must be called inside a tokio runtime.
    ///
    /// Fails with [`VoiceError::CaptureUnavailable`] when the recognizer cannot
    /// be opened; nothing is spawned in that case.
    pub async fn connect(
        config: LiveConfig,
        system_instruction: impl Into<String>,
        capture: Box<dyn CaptureBackend>,
        speech: Box<dyn SpeechSink>,
        responder: Arc<dyn Responder>,
    ) -> VoiceResult<(LiveHandle, mpsc::UnboundedReceiver<LiveEvent>)> {
        let mut capture = SpeechCaptureChannel::new(capture, config.capture_restart_backoff);
        // A device recognizer blocks until its stream is running.
        let capture = tokio::task::spawn_blocking(move || capture.start().map(|()| capture))
            .await
            .map_err(|e| VoiceError::CaptureUnavailable(e.to_string()))??;
        let volume = capture.volume();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let actor = LiveActor {
            coordinator: TurnCoordinator::new(config.coordinator, system_instruction),
            capture,
            output: SpeechOutputChannel::new(speech),
            responder,
            generation: None,
            events: event_tx,
            commands: cmd_rx,
        };
        info!("🔌 Live session connecting");
        let task = tokio::spawn(actor.run());

        Ok((
            LiveHandle {
                cmd_tx,
                task: Some(task),
                transcript: None,
                volume,
            },
            event_rx,
        ))
    }
}

/// Control side of a running session. Dropping it disconnects without flush.
pub struct LiveHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<Transcript>>,
    transcript: Option<Transcript>,
    volume: Option<watch::Receiver<f32>>,
}

impl LiveHandle {
    /// Inject a scripted USER-role prompt (kickoff, wrap-up cue).
    pub fn inject_prompt(&self, text: impl Into<String>) -> VoiceResult<()> {
        self.cmd_tx
            .send(Command::InjectPrompt(text.into()))
            .map_err(|_| VoiceError::SessionClosed)
    }

    /// End the session and return the frozen transcript. With `flush` the
    /// in-progress turn is kept. Waits until capture and playback are released.
    /// Idempotent: later calls return the same transcript.
    pub async fn disconnect(&mut self, flush: bool) -> Transcript {
        if let Some(transcript) = &self.transcript {
            return transcript.clone();
        }
        // The task may already have ended on its own (Responder failure).
        let _ = self.cmd_tx.send(Command::Disconnect { flush });
        let transcript = match self.task.take() {
            Some(task) => task.await.unwrap_or_else(|e| {
                error!("Live session task failed: {}", e);
                Transcript::default()
            }),
            None => Transcript::default(),
        };
        self.transcript = Some(transcript.clone());
        transcript
    }

    /// Smoothed microphone level, when the capture backend meters one
    pub fn volume(&self) -> Option<watch::Receiver<f32>> {
        self.volume.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for LiveHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.cmd_tx.send(Command::Disconnect { flush: false });
        }
    }
}

struct LiveActor {
    coordinator: TurnCoordinator,
    capture: SpeechCaptureChannel,
    output: SpeechOutputChannel,
    responder: Arc<dyn Responder>,
    generation: Option<JoinHandle<Result<String, ResponderError>>>,
    events: mpsc::UnboundedSender<LiveEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
}

enum Wake {
    Command(Option<Command>),
    Deadline,
    Reply(Result<String, ResponderError>),
    SpeechEnded(u64),
    Heard(Recognition),
}

impl LiveActor {
    async fn run(mut self) -> Transcript {
        let directives = self.coordinator.open();
        self.apply(directives);

        while !self.coordinator.is_closed() {
            let deadline = self.coordinator.next_deadline();
            let wake = tokio::select! {
                biased;
                cmd = self.commands.recv() => Wake::Command(cmd),
                _ = sleep_until(deadline) => Wake::Deadline,
                reply = join_generation(&mut self.generation) => Wake::Reply(reply),
                utterance = self.output.next_ended() => Wake::SpeechEnded(utterance),
                heard = self.capture.next_event() => Wake::Heard(heard),
            };

            let now = Instant::now();
            let directives = match wake {
                Wake::Command(Some(Command::InjectPrompt(text))) => {
                    self.coordinator.inject_prompt(&text, now)
                }
                Wake::Command(Some(Command::Disconnect { flush })) => {
                    self.coordinator.disconnect(flush)
                }
                // Every handle is gone.
                Wake::Command(None) => self.coordinator.disconnect(false),
                Wake::Deadline => self.coordinator.on_deadline(now),
                Wake::Reply(reply) => {
                    self.generation = None;
                    self.coordinator.on_reply(reply, now)
                }
                Wake::SpeechEnded(utterance) => self.coordinator.on_speech_ended(utterance, now),
                Wake::Heard(recognition) => {
                    self.coordinator
                        .on_recognition(&recognition.text, recognition.is_final, now)
                }
            };
            self.apply(directives);
        }

        let transcript = self.coordinator.transcript().clone();
        let LiveActor {
            capture,
            output,
            generation,
            ..
        } = self;
        if let Some(task) = generation {
            task.abort();
        }
        // Device backends join their threads on drop. Release them before the
        // handle sees the transcript, off the runtime threads.
        if let Err(e) = tokio::task::spawn_blocking(move || drop((capture, output))).await {
            warn!("Releasing capture and playback failed: {}", e);
        }
        info!(turns = transcript.len(), "🔌 Live session closed");
        transcript
    }

    fn apply(&mut self, directives: Vec<Directive>) {
        for directive in directives {
            match directive {
                Directive::ResumeCapture => self.capture.resume(),
                Directive::SuspendCapture => self.capture.suspend(),
                Directive::StopCapture => self.capture.stop(),
                Directive::Generate { history } => self.generate(history),
                Directive::CancelGeneration => {
                    if let Some(task) = self.generation.take() {
                        debug!("Cancelling in-flight Responder call");
                        task.abort();
                    }
                }
                Directive::Speak { utterance, text } => self.output.speak(utterance, &text),
                Directive::CancelSpeech => self.output.stop(),
                Directive::Emit(event) => {
                    // Nobody listening is fine; the session keeps running.
                    let _ = self.events.send(event);
                }
            }
        }
    }

    fn generate(&mut self, history: Vec<HistoryEntry>) {
        if let Some(stale) = self.generation.take() {
            stale.abort();
        }
        let responder = self.responder.clone();
        let instruction = self.coordinator.system_instruction().to_string();
        debug!(entries = history.len(), "Requesting counterpart reply");
        self.generation = Some(tokio::spawn(async move {
            responder.generate(&history, &instruction).await
        }));
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn join_generation(
    generation: &mut Option<JoinHandle<Result<String, ResponderError>>>,
) -> Result<String, ResponderError> {
    match generation.as_mut() {
        Some(task) => match task.await {
            Ok(reply) => reply,
            Err(e) => Err(ResponderError::Unavailable(e.to_string())),
        },
        None => std::future::pending().await,
    }
}
