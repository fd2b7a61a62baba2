//! Human-readable session summary derived from the transcript
//!
//! Pure: the same turns always produce the same summary.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::extract::parse_severity;
use crate::realtime::{Role, TranscriptEvent};

const MAX_ITEMS: usize = 3;
const MAX_SENTENCE_CHARS: usize = 220;

pub const KEY_STATEMENTS: &str = "Key patient statements";
pub const SEVERITY_SIGNALS: &str = "Severity signals";
pub const NOTABLE_MENTIONS: &str = "Notable mentions";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulletGroup {
    pub label: String,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub overview: String,
    pub bullets: Vec<BulletGroup>,
    pub plain_text: String,
}

impl SessionSummary {
    pub fn group(&self, label: &str) -> Option<&BulletGroup> {
        self.bullets.iter().find(|g| g.label == label)
    }
}

fn notable_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(since|because|trigger|worse|better|improved|flare|started|yesterday|today|week|month|year)\b")
            .unwrap()
    })
}

/// Split after `.`, `!` or `?` when followed by whitespace. Punctuation stays
/// with its sentence; the whitespace is dropped.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let end = i + c.len_utf8();
        let mut resume = end;
        while let Some(&(j, next)) = chars.peek() {
            if !next.is_whitespace() {
                break;
            }
            resume = j + next.len_utf8();
            chars.next();
        }
        if resume > end {
            out.push(&text[start..end]);
            start = resume;
        }
    }
    out.push(&text[start..]);
    out
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_SENTENCE_CHARS).collect()
}

fn format_average(value: f64) -> String {
    format!("{}", (value * 100.0).round() / 100.0)
}

pub fn build_summary(turns: &[TranscriptEvent]) -> SessionSummary {
    let patient: Vec<&str> = turns
        .iter()
        .filter(|t| t.role == Role::Patient)
        .map(|t| t.text.as_str())
        .collect();
    let assistant_count = turns.iter().filter(|t| t.role == Role::Assistant).count();

    let severities: Vec<u8> = patient.iter().filter_map(|t| parse_severity(t)).collect();
    let severity_stats = severities.iter().max().map(|peak| {
        let avg = severities.iter().map(|&s| s as f64).sum::<f64>() / severities.len() as f64;
        (*peak, format_average(avg))
    });

    // Walk newest first, keep chronological order in the output
    let mut seen = HashSet::new();
    let mut key_statements = Vec::new();
    for text in patient.iter().rev() {
        if key_statements.len() >= MAX_ITEMS {
            break;
        }
        let first = truncate(sentences(text)[0]);
        if first.chars().count() > 3 && seen.insert(first.to_lowercase()) {
            key_statements.insert(0, first);
        }
    }

    let notable = notable_pattern();
    let mut mentions = Vec::new();
    for text in patient.iter().rev() {
        if mentions.len() >= MAX_ITEMS {
            break;
        }
        if notable.is_match(text) {
            let sentence = sentences(text)
                .into_iter()
                .find(|s| notable.is_match(s))
                .unwrap_or(text);
            mentions.insert(0, truncate(sentence));
        }
    }

    let mut overview = format!(
        "Turn count: {} (Patient {} / Assistant {})",
        turns.len(),
        patient.len(),
        assistant_count
    );
    if let Some((peak, avg)) = &severity_stats {
        overview.push_str(&format!(" · Peak severity {}/10 · Avg severity {}/10", peak, avg));
    }

    let mut bullets = Vec::new();
    if !key_statements.is_empty() {
        bullets.push(BulletGroup {
            label: KEY_STATEMENTS.to_string(),
            items: key_statements,
        });
    }
    if let Some((peak, avg)) = severity_stats {
        bullets.push(BulletGroup {
            label: SEVERITY_SIGNALS.to_string(),
            items: vec![format!("Peak {}/10", peak), format!("Average {}/10", avg)],
        });
    }
    if !mentions.is_empty() {
        bullets.push(BulletGroup {
            label: NOTABLE_MENTIONS.to_string(),
            items: mentions,
        });
    }

    let mut lines = vec!["Session Summary".to_string(), overview.clone()];
    for group in &bullets {
        lines.push(format!("\n{}:\n- {}", group.label, group.items.join("\n- ")));
    }

    SessionSummary {
        overview,
        bullets,
        plain_text: lines.join("\n"),
    }
}
