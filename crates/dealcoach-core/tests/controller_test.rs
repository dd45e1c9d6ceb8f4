//! Integration tests for the coach flow: typed capture, a scripted prospect and
//! a canned analyzer, all on the paused tokio clock.

use async_trait::async_trait;
use dealcoach_core::{
    AnalysisResult, Analyzer, CoachConfig, CoachError, CoachResult, CoachState, CoachUpdate,
    Feedback, FeedbackPoint, MediaProvider, Scenario, ScoreLine, Scores, SessionArchive,
    SessionController, SessionLength,
};
use dealcoach_voice::{
    feed_capture, CaptureBackend, CaptureFeed, HistoryEntry, LiveEvent, Phase, Recognition,
    Responder, ResponderError, Role, Speaker, SpeechSink, Transcript, VoiceError, VoiceResult,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};

#[derive(Default)]
struct ScriptedResponder {
    replies: Mutex<VecDeque<Result<String, ResponderError>>>,
    calls: Mutex<Vec<Vec<HistoryEntry>>>,
    preflight: Mutex<Option<ResponderError>>,
}

impl ScriptedResponder {
    fn with(replies: Vec<Result<String, ResponderError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        })
    }

    fn calls(&self) -> Vec<Vec<HistoryEntry>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    async fn generate(
        &self,
        history: &[HistoryEntry],
        _system_instruction: &str,
    ) -> Result<String, ResponderError> {
        self.calls.lock().unwrap().push(history.to_vec());
        sleep(Duration::from_millis(500)).await;
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("Go on.".to_string()))
    }

    async fn preflight(&self) -> Result<(), ResponderError> {
        match self.preflight.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
struct CannedAnalyzer {
    fail: bool,
    calls: Mutex<Vec<(Transcript, SessionLength)>>,
}

#[async_trait]
impl Analyzer for CannedAnalyzer {
    async fn analyze(&self, transcript: &Transcript, length: SessionLength) -> CoachResult<AnalysisResult> {
        self.calls.lock().unwrap().push((transcript.clone(), length));
        if self.fail {
            return Err(CoachError::AnalysisFailed("model returned nothing".into()));
        }
        Ok(AnalysisResult {
            scores: Scores {
                overall: 77,
                breakdown: vec![ScoreLine {
                    label: "Listening".into(),
                    score: 80,
                }],
            },
            feedback: Feedback {
                strengths: vec![FeedbackPoint {
                    point: "Quantified impact".into(),
                    quote: Some("We cut close time in half.".into()),
                }],
                improvements: Vec::new(),
                summary: "Good discovery.".into(),
            },
        })
    }
}

/// Speech "plays" for one second.
struct TimedSink;

impl SpeechSink for TimedSink {
    fn begin(&mut self, _text: &str) -> VoiceResult<oneshot::Receiver<()>> {
        let (done, rx) = oneshot::channel();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            let _ = done.send(());
        });
        Ok(rx)
    }

    fn cancel(&mut self) {}
}

#[derive(Clone, Default)]
struct TestMedia {
    feeds: Arc<Mutex<Vec<CaptureFeed>>>,
    unavailable: Option<String>,
}

impl TestMedia {
    fn feed(&self) -> CaptureFeed {
        self.feeds.lock().unwrap().last().cloned().expect("no capture opened")
    }
}

impl MediaProvider for TestMedia {
    fn capture(&mut self) -> VoiceResult<Box<dyn CaptureBackend>> {
        let (backend, feed) = feed_capture();
        if let Some(reason) = &self.unavailable {
            feed.set_unavailable(reason.clone());
        }
        self.feeds.lock().unwrap().push(feed);
        Ok(Box::new(backend))
    }

    fn speech(&mut self) -> VoiceResult<Box<dyn SpeechSink>> {
        Ok(Box::new(TimedSink))
    }
}

struct Harness {
    controller: SessionController,
    responder: Arc<ScriptedResponder>,
    analyzer: Arc<CannedAnalyzer>,
    media: TestMedia,
    _dir: tempfile::TempDir,
}

fn harness(responder: Arc<ScriptedResponder>, analyzer: CannedAnalyzer, media: TestMedia) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = CoachConfig::load_from("does/not/exist").unwrap();
    config.rep_first_name = "Dana".into();
    config.rep_last_name = "Reyes".into();
    let archive = SessionArchive::open(dir.path().join("archive")).unwrap();
    let analyzer = Arc::new(analyzer);
    let controller = SessionController::new(
        config,
        responder.clone(),
        analyzer.clone(),
        Box::new(media.clone()),
        archive,
    );
    Harness {
        controller,
        responder,
        analyzer,
        media,
        _dir: dir,
    }
}

fn scenario(length: SessionLength) -> Scenario {
    Scenario {
        length,
        ..Scenario::default()
    }
}

async fn pump_until(
    controller: &mut SessionController,
    pred: impl Fn(&CoachUpdate) -> bool,
) -> CoachUpdate {
    timeout(Duration::from_secs(900), async {
        loop {
            match controller.next_update().await {
                Some(update) if pred(&update) => return update,
                Some(_) => {}
                None => panic!("controller left Live in state {:?}", controller.state()),
            }
        }
    })
    .await
    .expect("timed out waiting for controller update")
}

fn counterpart_turn(update: &CoachUpdate) -> bool {
    matches!(update, CoachUpdate::Live(LiveEvent::TurnFinalized(t)) if t.speaker == Speaker::Counterpart)
}

fn listening(update: &CoachUpdate) -> bool {
    *update == CoachUpdate::Live(LiveEvent::PhaseChanged(Phase::Listening))
}

/// Greeting, one rep turn, one reply, then end.
async fn run_session(h: &mut Harness) {
    h.controller.start(scenario(SessionLength::Unlimited)).await.unwrap();
    pump_until(&mut h.controller, counterpart_turn).await;
    pump_until(&mut h.controller, listening).await;

    assert!(h.media.feed().push(Recognition::final_text("We cut close time in half.")));
    pump_until(&mut h.controller, counterpart_turn).await;
    h.controller.end_session().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn full_session_is_analyzed_and_archived() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let responder = ScriptedResponder::with(vec![
        Ok("Hi Dana, thanks for jumping on. I'm Sarah Chen.".into()),
        Ok("Half? How did you measure that?".into()),
    ]);
    let mut h = harness(responder, CannedAnalyzer::default(), TestMedia::default());

    run_session(&mut h).await;
    assert_eq!(h.controller.state(), CoachState::Report);
    assert_eq!(h.controller.banner(), None);

    // The prospect opened the call in reply to the kickoff prompt.
    let calls = h.responder.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].len(), 1);
    assert_eq!(calls[0][0].role, Role::User);
    assert_eq!(
        calls[0][0].text,
        "[SYSTEM: Start simulation. Sarah Chen, please introduce yourself and greet Dana.]"
    );

    // The analyzer only sees what was actually said.
    let analyzed = h.analyzer.calls.lock().unwrap().clone();
    assert_eq!(analyzed.len(), 1);
    let (transcript, length) = &analyzed[0];
    assert_eq!(*length, SessionLength::Unlimited);
    let speakers: Vec<_> = transcript.turns().iter().map(|t| t.speaker).collect();
    assert_eq!(speakers, vec![Speaker::Counterpart, Speaker::User, Speaker::Counterpart]);
    assert!(transcript.turns().iter().all(|t| !t.scripted));

    let report = h.controller.report().unwrap();
    assert_eq!(report.score, 77);
    assert_eq!(report.rep.first_name, "Dana");
    assert_eq!(h.controller.history().len(), 1);
    assert_eq!(h.controller.history()[0].id, report.id);
}

#[tokio::test(start_paused = true)]
async fn ending_before_anyone_spoke_skips_analysis() {
    let mut h = harness(ScriptedResponder::with(vec![]), CannedAnalyzer::default(), TestMedia::default());

    h.controller.start(scenario(SessionLength::Ten)).await.unwrap();
    let err = h.controller.end_session().await.unwrap_err();

    assert!(matches!(err, CoachError::EmptyTranscript));
    assert_eq!(h.controller.state(), CoachState::Setup);
    assert!(h.controller.banner().unwrap().contains("microphone"));
    assert!(h.analyzer.calls.lock().unwrap().is_empty());
    assert!(h.controller.history().is_empty());
    assert!(!h.media.feed().is_listening());

    // Repeated end is rejected.
    assert!(matches!(
        h.controller.end_session().await,
        Err(CoachError::InvalidTransition { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn countdown_sends_one_wrap_up_and_ends_once() {
    let mut h = harness(ScriptedResponder::with(vec![]), CannedAnalyzer::default(), TestMedia::default());
    h.controller.start(scenario(SessionLength::Five)).await.unwrap();

    let mut wrap_ups = Vec::new();
    let mut state_changes = Vec::new();
    timeout(Duration::from_secs(900), async {
        while let Some(update) = h.controller.next_update().await {
            match update {
                CoachUpdate::WrapUpSent(remaining) => wrap_ups.push(remaining),
                CoachUpdate::StateChanged(state) => state_changes.push(state),
                _ => {}
            }
        }
    })
    .await
    .expect("session never ended");

    assert_eq!(wrap_ups, vec![Duration::from_secs(30)]);
    assert_eq!(state_changes, vec![CoachState::Report]);
    assert_eq!(h.controller.state(), CoachState::Report);

    let calls = h.responder.calls();
    assert_eq!(calls.len(), 2);
    let cue = calls[1].last().unwrap();
    assert_eq!(cue.role, Role::User);
    assert!(cue.text.starts_with("[SYSTEM: 30 seconds remaining in the meeting. Sarah,"));

    let analyzed = h.analyzer.calls.lock().unwrap().clone();
    assert_eq!(analyzed.len(), 1);
    assert_eq!(analyzed[0].1, SessionLength::Five);
    assert_eq!(analyzed[0].0.spoken_len(), 2);
    assert!(h.controller.next_update().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn responder_failure_returns_to_setup_with_banner() {
    let responder = ScriptedResponder::with(vec![Err(ResponderError::QuotaOrBilling(
        "HTTP 402: insufficient credits".into(),
    ))]);
    let mut h = harness(responder, CannedAnalyzer::default(), TestMedia::default());
    h.controller.start(scenario(SessionLength::Ten)).await.unwrap();

    let update = pump_until(&mut h.controller, |u| matches!(u, CoachUpdate::StateChanged(_))).await;
    assert_eq!(update, CoachUpdate::StateChanged(CoachState::Setup));
    assert!(h.controller.banner().unwrap().contains("API key"));
    assert!(h.analyzer.calls.lock().unwrap().is_empty());
    assert!(!h.media.feed().is_listening());

    h.controller.dismiss_banner();
    assert_eq!(h.controller.banner(), None);
}

#[tokio::test(start_paused = true)]
async fn failed_preflight_never_opens_capture() {
    let responder = ScriptedResponder::with(vec![]);
    *responder.preflight.lock().unwrap() = Some(ResponderError::QuotaOrBilling(
        "API Key not found. Please select a valid API key.".into(),
    ));
    let mut h = harness(responder, CannedAnalyzer::default(), TestMedia::default());

    let err = h.controller.start(scenario(SessionLength::Ten)).await.unwrap_err();
    assert!(matches!(err, CoachError::Responder(ResponderError::QuotaOrBilling(_))));
    assert_eq!(h.controller.state(), CoachState::Setup);
    assert!(h.controller.banner().unwrap().contains("API key"));
    assert!(h.media.feeds.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unavailable_microphone_returns_to_setup() {
    let media = TestMedia {
        unavailable: Some("permission denied".into()),
        ..TestMedia::default()
    };
    let mut h = harness(ScriptedResponder::with(vec![]), CannedAnalyzer::default(), media);

    let err = h.controller.start(scenario(SessionLength::Ten)).await.unwrap_err();
    assert!(matches!(err, CoachError::Voice(VoiceError::CaptureUnavailable(_))));
    assert_eq!(h.controller.state(), CoachState::Setup);
    assert!(h.controller.banner().unwrap().contains("microphone"));
    assert!(h.responder.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn analysis_failure_leaves_archive_untouched() {
    let analyzer = CannedAnalyzer {
        fail: true,
        ..CannedAnalyzer::default()
    };
    let mut h = harness(ScriptedResponder::with(vec![]), analyzer, TestMedia::default());
    h.controller.start(scenario(SessionLength::Fifteen)).await.unwrap();
    pump_until(&mut h.controller, counterpart_turn).await;

    let err = h.controller.end_session().await.unwrap_err();
    assert!(matches!(err, CoachError::AnalysisFailed(_)));
    assert_eq!(h.controller.state(), CoachState::Setup);
    assert_eq!(
        h.controller.banner(),
        Some("AI Analysis failed: model returned nothing")
    );
    assert!(h.controller.history().is_empty());
    assert!(h.controller.report().is_none());
}

#[tokio::test(start_paused = true)]
async fn history_browsing_and_export() {
    let mut h = harness(ScriptedResponder::with(vec![]), CannedAnalyzer::default(), TestMedia::default());
    run_session(&mut h).await;

    assert!(matches!(
        h.controller.start(scenario(SessionLength::Five)).await,
        Err(CoachError::InvalidTransition { .. })
    ));
    assert!(h.controller.open_history().is_err());

    h.controller.restart().unwrap();
    assert_eq!(h.controller.state(), CoachState::Setup);
    assert!(h.controller.export_document().is_err());

    h.controller.open_history().unwrap();
    assert_eq!(h.controller.state(), CoachState::History);
    let id = h.controller.history()[0].id;
    assert!(matches!(
        h.controller.select_history(id + 1),
        Err(CoachError::Archive(_))
    ));

    h.controller.select_history(id).unwrap();
    assert_eq!(h.controller.state(), CoachState::Report);
    let doc = h.controller.export_document().unwrap();
    assert_eq!(doc.overall, 77);
    assert_eq!(doc.transcript.spoken_len(), 3);
    assert!(doc.render_markdown().contains("SALES REP (Dana)"));

    h.controller.restart().unwrap();
    assert_eq!(h.controller.history().len(), 1);
}
