//! Transcript model: finalized turns plus the single in-progress (interim) turn.

use crate::responder::{HistoryEntry, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The sales rep at the microphone.
    User,
    /// The simulated prospect.
    Counterpart,
}

impl Speaker {
    pub fn role(&self) -> Role {
        match self {
            Speaker::User => Role::User,
            Speaker::Counterpart => Role::Model,
        }
    }
}

/// A finalized, immutable transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptTurn {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// System-originated cue (kickoff, wrap-up) injected on the user side.
    /// Sent to the Responder but not part of the spoken conversation.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub scripted: bool,
}

impl TranscriptTurn {
    fn new(speaker: Speaker, text: String, scripted: bool) -> Self {
        Self {
            speaker,
            text,
            timestamp: Utc::now(),
            scripted,
        }
    }
}

/// Append-only ordered sequence of finalized turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    turns: Vec<TranscriptTurn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every finalized turn, scripted cues included, in finalization order.
    pub fn turns(&self) -> &[TranscriptTurn] {
        &self.turns
    }

    /// Turns that were actually spoken (scripted cues excluded).
    pub fn spoken(&self) -> impl Iterator<Item = &TranscriptTurn> {
        self.turns.iter().filter(|t| !t.scripted)
    }

    pub fn spoken_len(&self) -> usize {
        self.spoken().count()
    }

    /// Copy holding only the spoken turns (what gets analyzed and archived).
    pub fn spoken_only(&self) -> Transcript {
        Transcript {
            turns: self.spoken().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&TranscriptTurn> {
        self.turns.last()
    }

    /// Role-tagged history for the Responder.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.turns
            .iter()
            .map(|t| HistoryEntry::new(t.speaker.role(), t.text.clone()))
            .collect()
    }

    fn push(&mut self, turn: TranscriptTurn) {
        self.turns.push(turn);
    }
}

impl From<Vec<TranscriptTurn>> for Transcript {
    fn from(turns: Vec<TranscriptTurn>) -> Self {
        Self { turns }
    }
}

/// The in-progress turn. Final recognition segments accumulate in `committed`;
/// the latest interim hypothesis replaces `interim`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTurn {
    pub speaker: Speaker,
    committed: String,
    interim: String,
}

impl ActiveTurn {
    fn new(speaker: Speaker) -> Self {
        Self {
            speaker,
            committed: String::new(),
            interim: String::new(),
        }
    }

    fn update(&mut self, text: &str, is_final: bool) {
        if is_final {
            self.committed = join_words(&self.committed, text);
            self.interim.clear();
        } else {
            self.interim = text.trim().to_string();
        }
    }

    /// Visible text: committed segments followed by the current hypothesis.
    pub fn text(&self) -> String {
        join_words(&self.committed, &self.interim)
    }

    pub fn is_blank(&self) -> bool {
        self.committed.trim().is_empty() && self.interim.trim().is_empty()
    }
}

fn join_words(a: &str, b: &str) -> String {
    match (a.trim(), b.trim()) {
        ("", b) => b.to_string(),
        (a, "") => a.to_string(),
        (a, b) => format!("{} {}", a, b),
    }
}

/// Owns the transcript and the active turn; keeps chronological order when
/// the speaker switches before the previous turn was finalized.
#[derive(Debug, Default)]
pub struct TranscriptBuilder {
    transcript: Transcript,
    active: Option<ActiveTurn>,
}

impl TranscriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn active(&self) -> Option<&ActiveTurn> {
        self.active.as_ref()
    }

    /// Apply a partial or final recognition for `speaker`.
    ///
    /// Returns the turn flushed because the speaker switched (if any) and the
    /// visible text of the active turn.
    pub fn update_active(
        &mut self,
        speaker: Speaker,
        text: &str,
        is_final: bool,
    ) -> (Option<TranscriptTurn>, String) {
        let flushed = match self.active.as_ref() {
            Some(active) if active.speaker != speaker => self.finalize_active(),
            _ => None,
        };
        let active = self.active.get_or_insert_with(|| ActiveTurn::new(speaker));
        active.update(text, is_final);
        (flushed, active.text())
    }

    /// Promote the active turn to the transcript. Blank turns are dropped.
    pub fn finalize_active(&mut self) -> Option<TranscriptTurn> {
        let active = self.active.take()?;
        if active.is_blank() {
            return None;
        }
        let turn = TranscriptTurn::new(active.speaker, active.text(), false);
        self.transcript.push(turn.clone());
        Some(turn)
    }

    /// Drop the active turn without recording it.
    pub fn discard_active(&mut self) -> Option<ActiveTurn> {
        self.active.take()
    }

    /// Append a complete turn. A pending active turn is flushed first so the
    /// transcript stays in chronological order.
    pub fn append(
        &mut self,
        speaker: Speaker,
        text: &str,
        scripted: bool,
    ) -> (Option<TranscriptTurn>, TranscriptTurn) {
        let flushed = self.finalize_active();
        let turn = TranscriptTurn::new(speaker, text.trim().to_string(), scripted);
        self.transcript.push(turn.clone());
        (flushed, turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interim_updates_replace_hypothesis() {
        let mut b = TranscriptBuilder::new();
        b.update_active(Speaker::User, "we", false);
        b.update_active(Speaker::User, "we cut", false);
        let (_, visible) = b.update_active(Speaker::User, "we cut onboarding time", false);
        assert_eq!(visible, "we cut onboarding time");
        assert!(b.transcript().is_empty());

        let turn = b.finalize_active().unwrap();
        assert_eq!(turn.text, "we cut onboarding time");
        assert_eq!(b.transcript().len(), 1);
        assert!(b.active().is_none());
    }

    #[test]
    fn final_segments_accumulate_before_next_hypothesis() {
        let mut b = TranscriptBuilder::new();
        b.update_active(Speaker::User, "Thanks for the time.", true);
        let (_, visible) = b.update_active(Speaker::User, "What does your", false);
        assert_eq!(visible, "Thanks for the time. What does your");
        b.update_active(Speaker::User, "What does your close process look like?", true);
        let turn = b.finalize_active().unwrap();
        assert_eq!(
            turn.text,
            "Thanks for the time. What does your close process look like?"
        );
    }

    #[test]
    fn speaker_switch_flushes_pending_turn_first() {
        let mut b = TranscriptBuilder::new();
        b.update_active(Speaker::User, "hello", false);
        let (flushed, _) = b.update_active(Speaker::Counterpart, "hi", false);
        assert_eq!(flushed.unwrap().text, "hello");
        b.finalize_active();

        let order: Vec<_> = b
            .transcript()
            .turns()
            .iter()
            .map(|t| (t.speaker, t.text.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![(Speaker::User, "hello"), (Speaker::Counterpart, "hi")]
        );
    }

    #[test]
    fn append_flushes_active_turn() {
        let mut b = TranscriptBuilder::new();
        b.update_active(Speaker::User, "so the budget", false);
        let (flushed, turn) = b.append(Speaker::Counterpart, "Go on.", false);
        assert_eq!(flushed.unwrap().speaker, Speaker::User);
        assert_eq!(turn.speaker, Speaker::Counterpart);
        assert_eq!(b.transcript().len(), 2);
    }

    #[test]
    fn blank_active_turn_is_never_recorded() {
        let mut b = TranscriptBuilder::new();
        b.update_active(Speaker::User, "   ", false);
        assert!(b.finalize_active().is_none());
        assert!(b.transcript().is_empty());
    }

    #[test]
    fn scripted_turns_reach_history_but_not_spoken() {
        let mut b = TranscriptBuilder::new();
        b.append(Speaker::User, "[SYSTEM: start]", true);
        b.append(Speaker::Counterpart, "Hi, I'm Sarah.", false);
        let t = b.transcript();
        assert_eq!(t.len(), 2);
        assert_eq!(t.spoken_len(), 1);
        assert_eq!(t.history().len(), 2);
        assert_eq!(t.history()[0].role, Role::User);
        assert_eq!(t.spoken_only().turns()[0].text, "Hi, I'm Sarah.");
    }
}
