//! Append-only session transcript.
//!
//! Entries are timestamped, position-indexed, and never modified after
//! append; timestamps are monotonically non-decreasing even when the
//! wall clock is not. Digests reference only entries appended before
//! their own append.

pub mod markdown;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker name used for digests and procedural notes authored by the
/// engine on the Secretary's behalf.
pub const SECRETARY_SPEAKER: &str = "Secretary";
/// Speaker name for purely procedural entries.
pub const PROCEDURAL_SPEAKER: &str = "[PROCEDURAL]";
/// Speaker name for engine-internal events.
pub const SYSTEM_SPEAKER: &str = "[SYSTEM]";

/// Kind of transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// An Archon's debate speech.
    Speech,
    /// A speech rejected for protocol violations; excluded from
    /// consensus accounting.
    ViolationSpeech,
    /// A speech delivered during the red-team round.
    RedTeamSpeech,
    /// Motion introduction.
    Motion,
    /// Procedural note (seconding, digests, corrections, roll call).
    Procedural,
    /// Engine-internal event.
    System,
    /// A vote that diverged from the voter's declared stance.
    StanceVoteDivergence,
    /// Debate digest.
    Digest,
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Speech => write!(f, "speech"),
            Self::ViolationSpeech => write!(f, "violation_speech"),
            Self::RedTeamSpeech => write!(f, "red_team_speech"),
            Self::Motion => write!(f, "motion"),
            Self::Procedural => write!(f, "procedural"),
            Self::System => write!(f, "system"),
            Self::StanceVoteDivergence => write!(f, "stance_vote_divergence"),
            Self::Digest => write!(f, "digest"),
        }
    }
}

/// Structured metadata attached to an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Declared stance for speeches (`FOR`/`AGAINST`/`NEUTRAL`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    /// Whether the stance was explicitly declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stance_explicit: Option<bool>,
    /// Debate round the entry belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    /// Whether the speech was delivered under red-team orders.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_red_team: bool,
    /// Whether the speaker was under a consensus-break forced stance.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub forced_stance: bool,
    /// Motion the entry concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion_id: Option<String>,
    /// Vote the entry concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_id: Option<String>,
}

/// One transcript entry. Append-only; never mutated once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Zero-based position in the transcript.
    pub position: usize,
    pub timestamp: DateTime<Utc>,
    pub entry_type: EntryType,
    pub speaker_id: String,
    pub speaker_name: String,
    pub content: String,
    #[serde(default)]
    pub metadata: EntryMetadata,
}

/// The transcript store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. The stored timestamp is clamped so positions and
    /// timestamps stay jointly monotonic.
    pub fn append(
        &mut self,
        entry_type: EntryType,
        speaker_id: &str,
        speaker_name: &str,
        content: &str,
        metadata: EntryMetadata,
    ) -> &TranscriptEntry {
        let mut timestamp = Utc::now();
        if let Some(last) = self.entries.last() {
            if timestamp < last.timestamp {
                timestamp = last.timestamp;
            }
        }
        let entry = TranscriptEntry {
            position: self.entries.len(),
            timestamp,
            entry_type,
            speaker_id: speaker_id.to_string(),
            speaker_name: speaker_name.to_string(),
            content: content.to_string(),
            metadata,
        };
        self.entries.push(entry);
        self.entries.last().expect("just pushed")
    }

    /// Append a procedural note from the Secretary.
    pub fn procedural(&mut self, content: &str) -> &TranscriptEntry {
        self.append(
            EntryType::Procedural,
            "secretary",
            SECRETARY_SPEAKER,
            content,
            EntryMetadata::default(),
        )
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries appended at or after `position`.
    pub fn since(&self, position: usize) -> &[TranscriptEntry] {
        &self.entries[position.min(self.entries.len())..]
    }

    /// The last `count` entries, oldest first.
    pub fn tail(&self, count: usize) -> &[TranscriptEntry] {
        let start = self.entries.len().saturating_sub(count);
        &self.entries[start..]
    }
}

/// Normalize a speaker name for non-Archon detection: lowercase, outer
/// brackets stripped.
pub fn normalize_speaker(name: &str) -> String {
    name.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase()
}

/// Whether a transcript speaker is procedural machinery rather than a
/// deliberating Archon. Downstream extractors must skip these.
pub fn is_non_archon_speaker(name: &str) -> bool {
    matches!(
        normalize_speaker(name).as_str(),
        "secretary" | "system" | "procedural" | "execution planner"
    )
}

/// Procedural-note markers that must never leak into Archon-speech
/// extraction.
pub const PROCEDURAL_MARKERS: [&str; 4] = [
    "STANCE_MISSING:",
    "RED_TEAM_STANCE_MISSING:",
    "UNEXPLAINED stance",
    "## Debate Digest",
];

/// Whether entry content is a procedural note by pattern.
pub fn is_procedural_content(content: &str) -> bool {
    PROCEDURAL_MARKERS
        .iter()
        .any(|marker| content.contains(marker))
}
