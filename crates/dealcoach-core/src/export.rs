//! Printable transcript document (Markdown or self-contained HTML).

use crate::analysis::score_band;
use crate::archive::SessionRecord;
use crate::error::CoachResult;
use crate::scenario::{Difficulty, RepProfile, SessionLength};
use dealcoach_voice::{Speaker, Transcript, TranscriptTurn};
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptDocument {
    pub rep: RepProfile,
    pub date: String,
    pub length: SessionLength,
    pub overall: u8,
    pub prospect_role: String,
    pub product: String,
    pub difficulty: Difficulty,
    pub transcript: Transcript,
}

impl TranscriptDocument {
    pub fn from_record(record: &SessionRecord) -> Self {
        Self {
            rep: record.rep.clone(),
            date: record.date.clone(),
            length: record.length,
            overall: record.score,
            prospect_role: record.prospect_role.clone(),
            product: record.product.clone(),
            difficulty: record.difficulty,
            transcript: record.transcript.spoken_only(),
        }
    }

    fn speaker_label(&self, turn: &TranscriptTurn) -> String {
        match turn.speaker {
            Speaker::User => format!("SALES REP ({})", self.rep.first_name),
            Speaker::Counterpart => "PROSPECT".to_string(),
        }
    }

    fn metadata(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Sales Rep", self.rep.full_name()),
            ("Date", self.date.clone()),
            ("Duration", self.length.tag().to_string()),
            (
                "Overall Score",
                format!("{}/100 ({})", self.overall, score_band(self.overall)),
            ),
            ("Prospect Profile", self.prospect_role.clone()),
            ("Target Product", self.product.clone()),
            ("Difficulty", self.difficulty.to_string()),
        ]
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::from("# AI Coach Session Transcript\n\n");
        for (label, value) in self.metadata() {
            let _ = writeln!(out, "- **{}:** {}", label, value);
        }
        out.push_str("\n---\n\n");
        for turn in self.transcript.turns() {
            let _ = writeln!(
                out,
                "**{}** _{}_\n\n{}\n",
                self.speaker_label(turn),
                turn.timestamp.format("%H:%M:%S"),
                turn.text
            );
        }
        out
    }

    pub fn render_html(&self) -> String {
        let mut meta = String::new();
        for (label, value) in self.metadata() {
            let _ = write!(
                meta,
                r#"<div class="meta-item"><span class="meta-label">{}</span><span class="meta-value">{}</span></div>"#,
                label,
                escape_html(&value)
            );
        }

        let mut turns = String::new();
        for turn in self.transcript.turns() {
            let class = match turn.speaker {
                Speaker::User => "rep",
                Speaker::Counterpart => "prospect",
            };
            let _ = write!(
                turns,
                r#"<div class="turn {}"><div class="speaker">{} <span class="time">{}</span></div><div class="text">{}</div></div>"#,
                class,
                escape_html(&self.speaker_label(turn)),
                turn.timestamp.format("%H:%M:%S"),
                escape_html(&turn.text)
            );
        }

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>AI Coach Transcript - {title}</title>
<style>
body {{ font-family: -apple-system, 'Inter', sans-serif; color: #1e293b; margin: 0; padding: 40px; line-height: 1.5; }}
h1 {{ font-size: 28px; font-weight: 900; color: #0f172a; }}
.metadata {{ display: grid; grid-template-columns: 1fr 1fr; gap: 20px; background: #f8fafc; padding: 24px; border-radius: 16px; margin-bottom: 40px; }}
.meta-item {{ display: flex; flex-direction: column; }}
.meta-label {{ font-size: 9px; font-weight: 900; color: #94a3b8; text-transform: uppercase; letter-spacing: 0.1em; }}
.meta-value {{ font-size: 14px; font-weight: 700; color: #334155; }}
.turn {{ margin-bottom: 16px; padding-left: 12px; border-left: 3px solid #e2e8f0; }}
.turn.rep {{ border-left-color: #00bfa5; }}
.speaker {{ font-size: 10px; font-weight: 900; letter-spacing: 0.1em; color: #64748b; }}
.time {{ font-weight: 500; color: #94a3b8; }}
@media print {{ body {{ padding: 0; }} }}
</style>
</head>
<body>
<h1>AI Coach Session Transcript</h1>
<div class="metadata">{meta}</div>
<div class="transcript">{turns}</div>
</body>
</html>
"#,
            title = escape_html(&self.rep.full_name()),
            meta = meta,
            turns = turns,
        )
    }

    /// Write HTML for `.html` / `.htm` paths, Markdown otherwise.
    pub fn write_to(&self, path: impl AsRef<Path>) -> CoachResult<()> {
        let path = path.as_ref();
        let is_html = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"));
        let body = if is_html {
            self.render_html()
        } else {
            self.render_markdown()
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, body)?;
        info!("📄 Transcript exported to {}", path.display());
        Ok(())
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
