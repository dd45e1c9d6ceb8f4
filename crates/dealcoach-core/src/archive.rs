//! Session history on Sled: the whole list lives under one key, newest first.

use crate::analysis::AnalysisResult;
use crate::error::CoachResult;
use crate::scenario::{Difficulty, RepProfile, Scenario, SessionLength};
use chrono::{DateTime, Utc};
use dealcoach_voice::Transcript;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;
use tracing::{info, warn};

pub const HISTORY_KEY: &str = "dealcoach/session_history";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Creation time in milliseconds, bumped to stay unique
    pub id: u64,
    pub created_at: DateTime<Utc>,
    /// Display date ("Oct 19, 2026")
    pub date: String,
    pub rep: RepProfile,
    pub prospect_role: String,
    pub product: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub length: SessionLength,
    pub score: u8,
    pub transcript: Transcript,
    pub analysis: AnalysisResult,
}

impl SessionRecord {
    pub fn new(
        id: u64,
        created_at: DateTime<Utc>,
        rep: &RepProfile,
        scenario: &Scenario,
        transcript: Transcript,
        analysis: AnalysisResult,
    ) -> Self {
        Self {
            id,
            created_at,
            date: created_at.format("%b %-d, %Y").to_string(),
            rep: rep.clone(),
            prospect_role: scenario.prospect_role.clone(),
            product: scenario.product.clone(),
            difficulty: scenario.difficulty,
            length: scenario.length,
            score: analysis.scores.overall,
            transcript,
            analysis,
        }
    }

    /// The scenario this record was played under (description and context are not kept).
    pub fn scenario(&self) -> Scenario {
        Scenario {
            product: self.product.clone(),
            prospect_role: self.prospect_role.clone(),
            difficulty: self.difficulty,
            length: self.length,
            ..Scenario::default()
        }
    }
}

pub struct SessionArchive {
    db: Db,
    /// Loaded once at open; every append rewrites the stored list from it.
    records: Vec<SessionRecord>,
}

impl SessionArchive {
    /// Opens or creates the archive. Unreadable history is logged and treated as empty.
    pub fn open<P: AsRef<Path>>(path: P) -> CoachResult<Self> {
        let db = sled::open(path)?;
        let records = match db.get(HISTORY_KEY.as_bytes())? {
            Some(raw) => match serde_json::from_slice::<Vec<SessionRecord>>(&raw) {
                Ok(records) => records,
                Err(e) => {
                    warn!("Session history unreadable, starting empty: {}", e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        info!(records = records.len(), "🗄️ Session archive opened");
        Ok(Self { db, records })
    }

    /// Newest first
    pub fn records(&self) -> &[SessionRecord] {
        &self.records
    }

    pub fn get(&self, id: u64) -> Option<&SessionRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Id for a record created at `created_at`, unique within this archive.
    pub fn next_id(&self, created_at: DateTime<Utc>) -> u64 {
        let millis = u64::try_from(created_at.timestamp_millis()).unwrap_or(0);
        let taken = self.records.iter().map(|r| r.id).max();
        match taken {
            Some(max) if millis <= max => max + 1,
            _ => millis,
        }
    }

    /// Prepend and persist. The in-memory list is left unchanged if the write fails.
    pub fn append(&mut self, record: SessionRecord) -> CoachResult<()> {
        let mut updated = Vec::with_capacity(self.records.len() + 1);
        updated.push(record);
        updated.extend(self.records.iter().cloned());

        let raw = serde_json::to_vec(&updated)?;
        self.db.insert(HISTORY_KEY.as_bytes(), raw)?;
        self.db.flush()?;

        self.records = updated;
        Ok(())
    }
}
