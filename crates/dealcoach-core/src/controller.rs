//! **SessionController**: the coach flow around one live roleplay.
//!
//! `Setup → Connecting → Live → Analyzing → Report`, with `Setup ↔ History`
//! on the side. Every fatal path lands back in `Setup` with a banner.

use crate::analysis::Analyzer;
use crate::archive::{SessionArchive, SessionRecord};
use crate::config::CoachConfig;
use crate::error::{CoachError, CoachResult};
use crate::export::TranscriptDocument;
use crate::scenario::{kickoff_prompt, wrap_up_prompt, ProspectPersona, RepProfile, Scenario};
use chrono::Utc;
use dealcoach_voice::{
    CaptureBackend, LiveEvent, LiveHandle, LiveSession, Responder, SpeechSink, Transcript,
    VoiceError, VoiceResult,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{info, warn};

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoachState {
    Setup,
    Connecting,
    Live,
    Analyzing,
    Report,
    History,
}

impl CoachState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoachState::Setup => "in setup",
            CoachState::Connecting => "connecting",
            CoachState::Live => "live",
            CoachState::Analyzing => "analyzing",
            CoachState::Report => "viewing a report",
            CoachState::History => "browsing history",
        }
    }
}

impl fmt::Display for CoachState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opens fresh capture and speech backends for each session.
pub trait MediaProvider: Send {
    fn capture(&mut self) -> VoiceResult<Box<dyn CaptureBackend>>;
    fn speech(&mut self) -> VoiceResult<Box<dyn SpeechSink>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownTick {
    /// Once per second while time remains
    Running(Duration),
    /// Warning threshold reached
    Warn(Duration),
    Expired,
}

/// Session countdown. Warns at most once and expires exactly once.
#[derive(Debug, Clone)]
pub struct Countdown {
    deadline: Instant,
    warn_at: Option<Instant>,
    next_tick: Instant,
    warned: bool,
    expired: bool,
}

impl Countdown {
    /// No warning when the session is not longer than `warning`.
    pub fn new(total: Duration, warning: Duration, now: Instant) -> Self {
        let deadline = now + total;
        Self {
            deadline,
            warn_at: (total > warning).then(|| deadline - warning),
            next_tick: now + TICK,
            warned: false,
            expired: false,
        }
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    pub fn next_wake(&self) -> Option<Instant> {
        if self.expired {
            return None;
        }
        let mut wake = self.deadline.min(self.next_tick);
        if let Some(warn_at) = self.warn_at.filter(|_| !self.warned) {
            wake = wake.min(warn_at);
        }
        Some(wake)
    }

    pub fn poll(&mut self, now: Instant) -> Option<CountdownTick> {
        if self.expired {
            return None;
        }
        if now >= self.deadline {
            self.expired = true;
            return Some(CountdownTick::Expired);
        }
        if let Some(warn_at) = self.warn_at {
            if !self.warned && now >= warn_at {
                self.warned = true;
                return Some(CountdownTick::Warn(self.remaining(now)));
            }
        }
        if now >= self.next_tick {
            while self.next_tick <= now {
                self.next_tick += TICK;
            }
            return Some(CountdownTick::Running(self.remaining(now)));
        }
        None
    }
}

/// What [`SessionController::next_update`] woke up for.
#[derive(Debug, Clone, PartialEq)]
pub enum CoachUpdate {
    Live(LiveEvent),
    /// Remaining time, once per second
    Countdown(Duration),
    /// The wrap-up cue was sent with this much time left
    WrapUpSent(Duration),
    /// The session left `Live` (time ran out, or it failed)
    StateChanged(CoachState),
}

struct ActiveSession {
    handle: LiveHandle,
    events: mpsc::UnboundedReceiver<LiveEvent>,
    countdown: Option<Countdown>,
}

enum Step {
    Event(Option<LiveEvent>),
    Timer,
}

pub struct SessionController {
    config: CoachConfig,
    rep: RepProfile,
    persona: ProspectPersona,
    responder: Arc<dyn Responder>,
    analyzer: Arc<dyn Analyzer>,
    media: Box<dyn MediaProvider>,
    archive: SessionArchive,
    state: CoachState,
    banner: Option<String>,
    scenario: Option<Scenario>,
    live: Option<ActiveSession>,
    report: Option<SessionRecord>,
}

impl SessionController {
    pub fn new(
        config: CoachConfig,
        responder: Arc<dyn Responder>,
        analyzer: Arc<dyn Analyzer>,
        media: Box<dyn MediaProvider>,
        archive: SessionArchive,
    ) -> Self {
        Self {
            rep: config.rep(),
            persona: config.persona(),
            config,
            responder,
            analyzer,
            media,
            archive,
            state: CoachState::Setup,
            banner: None,
            scenario: None,
            live: None,
            report: None,
        }
    }

    pub fn state(&self) -> CoachState {
        self.state
    }

    /// Error or warning shown above the setup screen
    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn dismiss_banner(&mut self) {
        self.banner = None;
    }

    pub fn scenario(&self) -> Option<&Scenario> {
        self.scenario.as_ref()
    }

    pub fn rep(&self) -> &RepProfile {
        &self.rep
    }

    pub fn report(&self) -> Option<&SessionRecord> {
        self.report.as_ref()
    }

    /// Newest first
    pub fn history(&self) -> &[SessionRecord] {
        self.archive.records()
    }

    /// Time left in a timed live session
    pub fn remaining(&self) -> Option<Duration> {
        let live = self.live.as_ref()?;
        live.countdown.as_ref().map(|c| c.remaining(Instant::now()))
    }

    pub fn volume(&self) -> Option<watch::Receiver<f32>> {
        self.live.as_ref().and_then(|live| live.handle.volume())
    }

    fn expect_state(&self, expected: &[CoachState], action: &'static str) -> CoachResult<()> {
        if expected.contains(&self.state) {
            Ok(())
        } else {
            Err(CoachError::InvalidTransition {
                action,
                state: self.state.as_str(),
            })
        }
    }

    fn set_state(&mut self, state: CoachState) {
        if self.state != state {
            info!("🧭 Coach {} → {}", self.state, state);
            self.state = state;
        }
    }

    /// Back to Setup with a banner; hands the error back to the caller.
    fn fail(&mut self, err: CoachError) -> CoachError {
        warn!("Session aborted: {}", err);
        self.banner = Some(err.user_message());
        self.set_state(CoachState::Setup);
        err
    }

    async fn release_live(&mut self, flush: bool) -> Option<Transcript> {
        let mut live = self.live.take()?;
        Some(live.handle.disconnect(flush).await)
    }

    /// Connect a new roleplay. On success the session is Live and the
    /// prospect has been asked to open the call.
    pub async fn start(&mut self, scenario: Scenario) -> CoachResult<()> {
        self.expect_state(&[CoachState::Setup], "start a session")?;
        self.release_live(false).await;

        self.banner = None;
        self.report = None;
        self.scenario = Some(scenario.clone());
        self.set_state(CoachState::Connecting);

        if let Err(e) = self.responder.preflight().await {
            return Err(self.fail(e.into()));
        }

        let capture = match self.media.capture() {
            Ok(capture) => capture,
            Err(e) => return Err(self.fail(e.into())),
        };
        let speech = match self.media.speech() {
            Ok(speech) => speech,
            Err(e) => return Err(self.fail(e.into())),
        };

        let instruction = scenario.system_instruction(&self.rep, &self.persona);
        let (handle, events) = match LiveSession::connect(
            self.config.live_config(),
            instruction,
            capture,
            speech,
            self.responder.clone(),
        )
        .await
        {
            Ok(session) => session,
            Err(e) => return Err(self.fail(e.into())),
        };

        if let Err(e) = handle.inject_prompt(kickoff_prompt(&self.rep, &self.persona)) {
            let mut handle = handle;
            handle.disconnect(false).await;
            return Err(self.fail(e.into()));
        }

        let countdown = scenario
            .length
            .countdown()
            .map(|total| Countdown::new(total, self.config.wrap_up_warning(), Instant::now()));
        self.live = Some(ActiveSession {
            handle,
            events,
            countdown,
        });
        info!(
            product = %scenario.product,
            length = %scenario.length,
            "🎙️ Roleplay live with {}",
            self.persona.name
        );
        self.set_state(CoachState::Live);
        Ok(())
    }

    /// Next live event or countdown step. `None` once the controller is not Live.
    pub async fn next_update(&mut self) -> Option<CoachUpdate> {
        loop {
            if self.state != CoachState::Live {
                return None;
            }
            let live = self.live.as_mut()?;
            let wake = live.countdown.as_ref().and_then(Countdown::next_wake);
            let step = tokio::select! {
                biased;
                event = live.events.recv() => Step::Event(event),
                _ = sleep_until(wake) => Step::Timer,
            };

            match step {
                Step::Event(Some(LiveEvent::Failed(err))) => {
                    self.release_live(false).await;
                    self.fail(err.into());
                    return Some(CoachUpdate::StateChanged(self.state));
                }
                Step::Event(Some(event)) => return Some(CoachUpdate::Live(event)),
                Step::Event(None) => {
                    self.release_live(false).await;
                    self.fail(VoiceError::SessionClosed.into());
                    return Some(CoachUpdate::StateChanged(self.state));
                }
                Step::Timer => {
                    let tick = live.countdown.as_mut().and_then(|c| c.poll(Instant::now()));
                    match tick {
                        Some(CountdownTick::Running(remaining)) => {
                            return Some(CoachUpdate::Countdown(remaining))
                        }
                        Some(CountdownTick::Warn(remaining)) => {
                            let cue = wrap_up_prompt(&self.persona, remaining);
                            info!("⏳ {}s left, asking the prospect to wrap up", remaining.as_secs());
                            if live.handle.inject_prompt(cue).is_err() {
                                warn!("Wrap-up cue dropped: session already closed");
                            }
                            return Some(CoachUpdate::WrapUpSent(remaining));
                        }
                        Some(CountdownTick::Expired) => {
                            info!("⏰ Time is up");
                            // Failures already set the banner and state.
                            let _ = self.end_session().await;
                            return Some(CoachUpdate::StateChanged(self.state));
                        }
                        None => {}
                    }
                }
            }
        }
    }

    /// Hang up, analyze the spoken conversation and archive the result.
    pub async fn end_session(&mut self) -> CoachResult<()> {
        self.expect_state(&[CoachState::Live], "end the session")?;
        let transcript = self.release_live(true).await.unwrap_or_default();

        let spoken = transcript.spoken_only();
        if spoken.is_empty() {
            return Err(self.fail(CoachError::EmptyTranscript));
        }
        let scenario = self.scenario.clone().unwrap_or_default();

        self.set_state(CoachState::Analyzing);
        let analysis = match self.analyzer.analyze(&spoken, scenario.length).await {
            Ok(analysis) => analysis,
            Err(e) => return Err(self.fail(e)),
        };

        let now = Utc::now();
        let record = SessionRecord::new(
            self.archive.next_id(now),
            now,
            &self.rep,
            &scenario,
            spoken,
            analysis,
        );
        info!(id = record.id, score = record.score, "🏁 Session scored");
        if let Err(e) = self.archive.append(record.clone()) {
            warn!("Session could not be archived: {}", e);
            self.banner = Some(format!("This session could not be saved: {}", e));
        }
        self.report = Some(record);
        self.set_state(CoachState::Report);
        Ok(())
    }

    /// Back to Setup from a report or the history list. The archive is kept.
    pub fn restart(&mut self) -> CoachResult<()> {
        self.expect_state(&[CoachState::Report, CoachState::History], "restart")?;
        self.report = None;
        self.scenario = None;
        self.set_state(CoachState::Setup);
        Ok(())
    }

    pub fn open_history(&mut self) -> CoachResult<()> {
        self.expect_state(&[CoachState::Setup], "open history")?;
        self.set_state(CoachState::History);
        Ok(())
    }

    /// Show a stored session as the current report.
    pub fn select_history(&mut self, id: u64) -> CoachResult<()> {
        self.expect_state(&[CoachState::History], "open a past session")?;
        let record = self
            .archive
            .get(id)
            .cloned()
            .ok_or_else(|| CoachError::Archive(format!("no session with id {}", id)))?;
        self.scenario = Some(record.scenario());
        self.report = Some(record);
        self.set_state(CoachState::Report);
        Ok(())
    }

    pub fn export_document(&self) -> CoachResult<TranscriptDocument> {
        self.expect_state(&[CoachState::Report], "export a transcript")?;
        self.report
            .as_ref()
            .map(TranscriptDocument::from_record)
            .ok_or(CoachError::InvalidTransition {
                action: "export a transcript",
                state: "without a report",
            })
    }

    /// Disconnect any live session (used when the front end exits).
    pub async fn shutdown(&mut self) {
        if self.release_live(false).await.is_some() {
            self.set_state(CoachState::Setup);
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
