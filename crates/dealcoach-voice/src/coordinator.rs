//! Turn coordination for a half-duplex spoken conversation.
//!
//! The [`TurnCoordinator`] owns the phase, the transcript, the active turn and
//! every deadline of a live session. It performs no I/O: each entry point takes
//! the current instant and returns the [`Directive`]s the driver has to carry
//! out (start/stop capture, call the Responder, speak, emit events).
//!
//! ```text
//!  Idle ──open──▶ Listening ──silence──▶ Generating ──reply──▶ Speaking
//!                     ▲                                            │
//!                     └────────── cooldown ◀──── speech ended ─────┘
//! ```

use crate::responder::{HistoryEntry, ResponderError};
use crate::transcript::{Speaker, Transcript, TranscriptBuilder, TranscriptTurn};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Timing policy for the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Silence after the last recognition before the user's turn is finalized (default: 2s)
    pub silence_timeout: Duration,

    /// Window after the counterpart stops speaking during which input is ignored (default: 3s)
    pub cooldown: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            silence_timeout: Duration::from_millis(2000),
            cooldown: Duration::from_millis(3000),
        }
    }
}

/// Coordinator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Listening,
    Generating,
    Speaking,
    Cooldown,
}

/// Who holds the floor. Derived from [`Phase`], never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOwner {
    None,
    User,
    Counterpart,
}

impl From<Phase> for TurnOwner {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Listening => TurnOwner::User,
            Phase::Generating | Phase::Speaking => TurnOwner::Counterpart,
            Phase::Idle | Phase::Cooldown => TurnOwner::None,
        }
    }
}

/// Observable session events
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// Capture is live and the user holds the floor
    Opened,
    /// Visible text of the in-progress turn changed
    Partial { speaker: Speaker, text: String },
    /// A turn was appended to the transcript
    TurnFinalized(TranscriptTurn),
    PhaseChanged(Phase),
    /// The session ended on a Responder failure
    Failed(ResponderError),
    /// The session is over; no further events follow
    Closed,
}

/// Side effect requested by the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    ResumeCapture,
    SuspendCapture,
    StopCapture,
    /// Ask the Responder for the next reply to the full history
    Generate { history: Vec<HistoryEntry> },
    CancelGeneration,
    Speak { utterance: u64, text: String },
    CancelSpeech,
    Emit(LiveEvent),
}

/// Sans-IO turn-taking state machine
#[derive(Debug)]
pub struct TurnCoordinator {
    config: CoordinatorConfig,
    system_instruction: String,
    phase: Phase,
    builder: TranscriptBuilder,

    silence_deadline: Option<Instant>,
    cooldown_deadline: Option<Instant>,

    /// Scripted prompt waiting for the user to regain the floor (latest wins)
    queued_prompt: Option<String>,

    next_utterance: u64,
    current_utterance: Option<u64>,
    closed: bool,
}

impl TurnCoordinator {
    pub fn new(config: CoordinatorConfig, system_instruction: impl Into<String>) -> Self {
        Self {
            config,
            system_instruction: system_instruction.into(),
            phase: Phase::Idle,
            builder: TranscriptBuilder::new(),
            silence_deadline: None,
            cooldown_deadline: None,
            queued_prompt: None,
            next_utterance: 1,
            current_utterance: None,
            closed: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn turn_owner(&self) -> TurnOwner {
        TurnOwner::from(self.phase)
    }

    pub fn transcript(&self) -> &Transcript {
        self.builder.transcript()
    }

    /// Visible text of the in-progress turn, if any
    pub fn active_text(&self) -> Option<String> {
        self.builder.active().map(|a| a.text())
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Earliest armed deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.silence_deadline, self.cooldown_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Number of armed deadlines
    pub fn pending_timers(&self) -> usize {
        self.silence_deadline.is_some() as usize + self.cooldown_deadline.is_some() as usize
    }

    /// Idle -> Listening
    pub fn open(&mut self) -> Vec<Directive> {
        if self.closed || self.phase != Phase::Idle {
            return Vec::new();
        }
        info!("🎙️ Session opened, user has the floor");
        let mut out = vec![Directive::ResumeCapture, Directive::Emit(LiveEvent::Opened)];
        self.set_phase(Phase::Listening, &mut out);
        out
    }

    /// A partial (`is_final == false`) or final recognition from capture.
    pub fn on_recognition(&mut self, text: &str, is_final: bool, now: Instant) -> Vec<Directive> {
        let mut out = self.on_deadline(now);
        if self.closed || self.phase != Phase::Listening {
            debug!(phase = ?self.phase, "Dropping recognition while user does not hold the floor");
            return out;
        }
        if text.trim().is_empty() {
            return out;
        }

        let (flushed, visible) = self.builder.update_active(Speaker::User, text, is_final);
        if let Some(turn) = flushed {
            out.push(Directive::Emit(LiveEvent::TurnFinalized(turn)));
        }
        out.push(Directive::Emit(LiveEvent::Partial {
            speaker: Speaker::User,
            text: visible,
        }));
        self.silence_deadline = Some(now + self.config.silence_timeout);
        out
    }

    /// Fire every deadline at or before `now`.
    pub fn on_deadline(&mut self, now: Instant) -> Vec<Directive> {
        let mut out = Vec::new();
        if self.closed {
            return out;
        }

        if self.silence_deadline.is_some_and(|d| d <= now) {
            self.silence_deadline = None;
            if self.phase == Phase::Listening {
                if let Some(turn) = self.builder.finalize_active() {
                    debug!(text = %turn.text, "Silence timeout, user turn finalized");
                    out.push(Directive::Emit(LiveEvent::TurnFinalized(turn)));
                    self.begin_generation(&mut out);
                }
            }
        }

        if self.cooldown_deadline.is_some_and(|d| d <= now) {
            self.cooldown_deadline = None;
            if self.phase == Phase::Cooldown {
                self.return_floor(&mut out);
            }
        }

        out
    }

    /// Inject a scripted USER-role prompt (kickoff, wrap-up cue).
    pub fn inject_prompt(&mut self, text: &str, now: Instant) -> Vec<Directive> {
        let mut out = self.on_deadline(now);
        if self.closed || self.phase == Phase::Idle {
            debug!("Ignoring scripted prompt on an idle session");
            return out;
        }

        if self.phase == Phase::Listening {
            self.fire_prompt(text, &mut out);
        } else {
            debug!(phase = ?self.phase, "Queueing scripted prompt until the user regains the floor");
            self.queued_prompt = Some(text.to_string());
        }
        out
    }

    /// Outcome of the in-flight Responder call.
    pub fn on_reply(&mut self, result: Result<String, ResponderError>, now: Instant) -> Vec<Directive> {
        let mut out = self.on_deadline(now);
        if self.closed || self.phase != Phase::Generating {
            debug!(phase = ?self.phase, "Discarding reply outside of Generating");
            return out;
        }

        let err = match result {
            Ok(text) if !text.trim().is_empty() => {
                let (flushed, turn) = self.builder.append(Speaker::Counterpart, &text, false);
                if let Some(flushed) = flushed {
                    out.push(Directive::Emit(LiveEvent::TurnFinalized(flushed)));
                }
                let text = turn.text.clone();
                out.push(Directive::Emit(LiveEvent::TurnFinalized(turn)));

                let utterance = self.next_utterance;
                self.next_utterance += 1;
                self.current_utterance = Some(utterance);
                self.set_phase(Phase::Speaking, &mut out);
                out.push(Directive::Speak { utterance, text });
                return out;
            }
            Ok(_) => ResponderError::Unavailable("empty reply".to_string()),
            Err(e) => e,
        };

        warn!(error = %err, "Responder failed, closing session");
        self.close(false, &mut out);
        // Failed precedes Closed.
        let closed = out.pop();
        out.push(Directive::Emit(LiveEvent::Failed(err)));
        out.extend(closed);
        out
    }

    /// Playback of `utterance` finished, was cancelled, or failed to start.
    pub fn on_speech_ended(&mut self, utterance: u64, now: Instant) -> Vec<Directive> {
        let mut out = self.on_deadline(now);
        if self.closed || self.phase != Phase::Speaking || self.current_utterance != Some(utterance) {
            debug!(utterance, "Ignoring stale speech-ended");
            return out;
        }
        self.current_utterance = None;

        if self.config.cooldown.is_zero() {
            self.return_floor(&mut out);
        } else {
            self.cooldown_deadline = Some(now + self.config.cooldown);
            self.set_phase(Phase::Cooldown, &mut out);
        }
        out
    }

    /// Tear everything down. With `flush` the in-progress turn is kept.
    /// Idempotent: a closed coordinator returns no directives.
    pub fn disconnect(&mut self, flush: bool) -> Vec<Directive> {
        let mut out = Vec::new();
        if !self.closed {
            info!(flush, "Session disconnecting");
            self.close(flush, &mut out);
        }
        out
    }

    fn begin_generation(&mut self, out: &mut Vec<Directive>) {
        self.silence_deadline = None;
        out.push(Directive::SuspendCapture);
        self.set_phase(Phase::Generating, out);
        out.push(Directive::Generate {
            history: self.builder.transcript().history(),
        });
    }

    fn fire_prompt(&mut self, text: &str, out: &mut Vec<Directive>) {
        let (flushed, turn) = self.builder.append(Speaker::User, text, true);
        if let Some(flushed) = flushed {
            out.push(Directive::Emit(LiveEvent::TurnFinalized(flushed)));
        }
        out.push(Directive::Emit(LiveEvent::TurnFinalized(turn)));
        self.begin_generation(out);
    }

    /// Cooldown is over: fire a queued prompt, otherwise hand the floor back.
    fn return_floor(&mut self, out: &mut Vec<Directive>) {
        self.cooldown_deadline = None;
        match self.queued_prompt.take() {
            Some(prompt) => self.fire_prompt(&prompt, out),
            None => {
                out.push(Directive::ResumeCapture);
                self.set_phase(Phase::Listening, out);
            }
        }
    }

    fn close(&mut self, flush: bool, out: &mut Vec<Directive>) {
        self.silence_deadline = None;
        self.cooldown_deadline = None;
        self.queued_prompt = None;
        self.current_utterance = None;

        out.push(Directive::CancelGeneration);
        out.push(Directive::CancelSpeech);
        out.push(Directive::StopCapture);

        if flush {
            if let Some(turn) = self.builder.finalize_active() {
                out.push(Directive::Emit(LiveEvent::TurnFinalized(turn)));
            }
        } else {
            self.builder.discard_active();
        }

        self.set_phase(Phase::Idle, out);
        self.closed = true;
        out.push(Directive::Emit(LiveEvent::Closed));
    }

    fn set_phase(&mut self, phase: Phase, out: &mut Vec<Directive>) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "Phase transition");
            self.phase = phase;
            out.push(Directive::Emit(LiveEvent::PhaseChanged(phase)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> TurnCoordinator {
        TurnCoordinator::new(CoordinatorConfig::default(), "You are Sarah Chen.")
    }

    fn has(out: &[Directive], pred: impl Fn(&Directive) -> bool) -> bool {
        out.iter().any(pred)
    }

    fn generate_count(out: &[Directive]) -> usize {
        out.iter()
            .filter(|d| matches!(d, Directive::Generate { .. }))
            .count()
    }

    /// Drive a coordinator to Speaking with one user turn and one reply.
    fn speaking(c: &mut TurnCoordinator, t0: Instant) -> u64 {
        c.open();
        c.on_recognition("hello", true, t0);
        c.on_deadline(t0 + Duration::from_secs(2));
        let out = c.on_reply(Ok("Hi, who is this?".into()), t0 + Duration::from_secs(3));
        out.iter()
            .find_map(|d| match d {
                Directive::Speak { utterance, .. } => Some(*utterance),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn open_resumes_capture_and_gives_user_the_floor() {
        let mut c = coordinator();
        let out = c.open();
        assert!(has(&out, |d| *d == Directive::ResumeCapture));
        assert!(has(&out, |d| *d == Directive::Emit(LiveEvent::Opened)));
        assert_eq!(c.phase(), Phase::Listening);
        assert_eq!(c.turn_owner(), TurnOwner::User);
        assert!(c.open().is_empty());
    }

    #[test]
    fn interim_stream_then_silence_finalizes_one_turn() {
        let mut c = coordinator();
        let t0 = Instant::now();
        c.open();
        c.on_recognition("we", false, t0);
        c.on_recognition("we reduce", false, t0 + Duration::from_millis(300));
        c.on_recognition("we reduce churn", false, t0 + Duration::from_millis(600));

        // Not yet: deadline moved with the last recognition.
        assert!(c.on_deadline(t0 + Duration::from_millis(2000)).is_empty());
        assert!(c.transcript().is_empty());

        let out = c.on_deadline(t0 + Duration::from_millis(2600));
        assert_eq!(c.transcript().len(), 1);
        assert_eq!(c.transcript().turns()[0].text, "we reduce churn");
        assert_eq!(c.transcript().turns()[0].speaker, Speaker::User);
        assert_eq!(generate_count(&out), 1);
        assert!(has(&out, |d| *d == Directive::SuspendCapture));
        assert_eq!(c.phase(), Phase::Generating);
        assert_eq!(c.pending_timers(), 0);
    }

    #[test]
    fn silence_without_active_turn_keeps_listening() {
        let mut c = coordinator();
        let t0 = Instant::now();
        c.open();
        c.on_recognition("   ", false, t0);
        assert!(c.on_deadline(t0 + Duration::from_secs(5)).is_empty());
        assert_eq!(c.phase(), Phase::Listening);
    }

    #[test]
    fn input_is_dropped_unless_user_holds_the_floor() {
        let mut c = coordinator();
        let t0 = Instant::now();
        speaking(&mut c, t0);
        let before = c.transcript().clone();

        let out = c.on_recognition("barge in", false, t0 + Duration::from_secs(4));
        assert!(out.is_empty());
        assert_eq!(c.transcript(), &before);
        assert!(c.active_text().is_none());
    }

    #[test]
    fn responder_receives_full_role_tagged_history() {
        let mut c = coordinator();
        let t0 = Instant::now();
        c.open();
        c.inject_prompt("[SYSTEM: open the call]", t0);
        let out = c.on_reply(Ok("Sarah speaking.".into()), t0);
        let id = out
            .iter()
            .find_map(|d| match d {
                Directive::Speak { utterance, .. } => Some(*utterance),
                _ => None,
            })
            .unwrap();
        c.on_speech_ended(id, t0);
        c.on_deadline(t0 + Duration::from_secs(3));
        c.on_recognition("Hi Sarah", true, t0 + Duration::from_secs(4));
        let out = c.on_deadline(t0 + Duration::from_secs(6));

        let history = out
            .iter()
            .find_map(|d| match d {
                Directive::Generate { history } => Some(history.clone()),
                _ => None,
            })
            .unwrap();
        let roles: Vec<_> = history.iter().map(|h| h.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
        assert_eq!(history[2].text, "Hi Sarah");
    }

    #[test]
    fn failed_reply_is_fatal_and_appends_nothing() {
        let mut c = coordinator();
        let t0 = Instant::now();
        c.open();
        c.on_recognition("hello", true, t0);
        c.on_deadline(t0 + Duration::from_secs(2));
        assert_eq!(c.phase(), Phase::Generating);

        let err = ResponderError::QuotaOrBilling("402".into());
        let out = c.on_reply(Err(err.clone()), t0 + Duration::from_secs(3));

        assert_eq!(c.transcript().len(), 1);
        assert!(c
            .transcript()
            .turns()
            .iter()
            .all(|t| t.speaker == Speaker::User));
        assert!(has(&out, |d| *d == Directive::StopCapture));
        assert_eq!(
            out.iter().rev().take(2).collect::<Vec<_>>(),
            vec![
                &Directive::Emit(LiveEvent::Closed),
                &Directive::Emit(LiveEvent::Failed(err))
            ]
        );
        assert_eq!(c.phase(), Phase::Idle);
        assert!(c.is_closed());
        assert_eq!(c.pending_timers(), 0);
    }

    #[test]
    fn empty_reply_is_treated_as_failure() {
        let mut c = coordinator();
        let t0 = Instant::now();
        c.open();
        c.inject_prompt("[SYSTEM: start]", t0);
        let out = c.on_reply(Ok("  ".into()), t0);
        assert!(has(&out, |d| matches!(d, Directive::Emit(LiveEvent::Failed(_)))));
        assert!(c.is_closed());
        assert_eq!(c.transcript().spoken_len(), 0);
    }

    #[test]
    fn cooldown_discards_input_until_expiry() {
        let mut c = coordinator();
        let t0 = Instant::now();
        let id = speaking(&mut c, t0);
        let ended_at = t0 + Duration::from_secs(5);
        c.on_speech_ended(id, ended_at);
        assert_eq!(c.phase(), Phase::Cooldown);
        assert_eq!(c.next_deadline(), Some(ended_at + Duration::from_secs(3)));

        c.on_recognition("too soon", false, ended_at + Duration::from_millis(2999));
        assert!(c.active_text().is_none());

        let out = c.on_recognition("now it counts", false, ended_at + Duration::from_secs(3));
        assert!(has(&out, |d| *d == Directive::ResumeCapture));
        assert_eq!(c.phase(), Phase::Listening);
        assert_eq!(c.active_text().as_deref(), Some("now it counts"));
    }

    #[test]
    fn zero_cooldown_returns_floor_immediately() {
        let mut c = TurnCoordinator::new(
            CoordinatorConfig {
                cooldown: Duration::ZERO,
                ..Default::default()
            },
            "",
        );
        let t0 = Instant::now();
        let id = speaking(&mut c, t0);
        let out = c.on_speech_ended(id, t0 + Duration::from_secs(4));
        assert!(has(&out, |d| *d == Directive::ResumeCapture));
        assert_eq!(c.phase(), Phase::Listening);
        assert_eq!(c.pending_timers(), 0);
    }

    #[test]
    fn stale_speech_ended_is_ignored() {
        let mut c = coordinator();
        let t0 = Instant::now();
        let id = speaking(&mut c, t0);
        assert!(c.on_speech_ended(id + 1, t0).is_empty());
        assert_eq!(c.phase(), Phase::Speaking);
    }

    #[test]
    fn prompt_during_counterpart_turn_is_queued_until_cooldown_ends() {
        let mut c = coordinator();
        let t0 = Instant::now();
        let id = speaking(&mut c, t0);

        let out = c.inject_prompt("[SYSTEM: first]", t0 + Duration::from_secs(4));
        assert_eq!(generate_count(&out), 0);
        c.inject_prompt("[SYSTEM: wrap up]", t0 + Duration::from_secs(4));
        c.on_speech_ended(id, t0 + Duration::from_secs(5));

        let out = c.on_deadline(t0 + Duration::from_secs(8));
        assert_eq!(generate_count(&out), 1);
        assert_eq!(c.phase(), Phase::Generating);
        let last = c.transcript().last().unwrap();
        assert!(last.scripted);
        assert_eq!(last.text, "[SYSTEM: wrap up]");
    }

    #[test]
    fn prompt_while_listening_flushes_pending_user_turn_first() {
        let mut c = coordinator();
        let t0 = Instant::now();
        c.open();
        c.on_recognition("let me ask", false, t0);
        let out = c.inject_prompt("[SYSTEM: 30 seconds left]", t0 + Duration::from_millis(500));
        assert_eq!(generate_count(&out), 1);
        let turns = c.transcript().turns();
        assert_eq!(turns[0].text, "let me ask");
        assert!(!turns[0].scripted);
        assert!(turns[1].scripted);
        assert_eq!(c.pending_timers(), 0);
    }

    #[test]
    fn prompt_on_idle_coordinator_is_ignored() {
        let mut c = coordinator();
        assert!(c.inject_prompt("[SYSTEM: start]", Instant::now()).is_empty());
        assert!(c.transcript().is_empty());
    }

    #[test]
    fn disconnect_from_every_phase_clears_timers_and_is_idempotent() {
        let t0 = Instant::now();
        let setups: Vec<Box<dyn Fn(&mut TurnCoordinator)>> = vec![
            Box::new(|_| {}),
            Box::new(|c| {
                c.open();
                c.on_recognition("hi", false, t0);
            }),
            Box::new(|c| {
                c.open();
                c.on_recognition("hi", false, t0);
                c.on_deadline(t0 + Duration::from_secs(2));
            }),
            Box::new(|c| {
                speaking(c, t0);
            }),
            Box::new(|c| {
                let id = speaking(c, t0);
                c.on_speech_ended(id, t0 + Duration::from_secs(4));
            }),
        ];

        for setup in setups {
            let mut c = coordinator();
            setup(&mut c);
            let first = c.disconnect(false);
            if !first.is_empty() {
                assert!(has(&first, |d| *d == Directive::StopCapture));
                assert!(has(&first, |d| *d == Directive::CancelSpeech));
                assert!(has(&first, |d| *d == Directive::CancelGeneration));
            }
            assert_eq!(c.pending_timers(), 0);
            assert_eq!(c.next_deadline(), None);
            assert_eq!(c.phase(), Phase::Idle);
            assert!(c.disconnect(true).is_empty());
            assert!(c.on_recognition("late", true, t0).is_empty());
            assert!(c.on_deadline(t0 + Duration::from_secs(60)).is_empty());
        }
    }

    #[test]
    fn disconnect_flush_keeps_active_turn() {
        let mut c = coordinator();
        let t0 = Instant::now();
        c.open();
        c.on_recognition("one last thing", false, t0);
        c.disconnect(true);
        assert_eq!(c.transcript().len(), 1);
        assert_eq!(c.transcript().turns()[0].text, "one last thing");

        let mut c = coordinator();
        c.open();
        c.on_recognition("never mind", false, t0);
        c.disconnect(false);
        assert!(c.transcript().is_empty());
    }

    #[test]
    fn reply_after_close_is_ignored() {
        let mut c = coordinator();
        let t0 = Instant::now();
        c.open();
        c.inject_prompt("[SYSTEM: start]", t0);
        c.disconnect(false);
        assert!(c.on_reply(Ok("late reply".into()), t0).is_empty());
        assert_eq!(c.transcript().spoken_len(), 0);
    }
}
