//! Debate digests and the structural risk detector.
//!
//! Digests compact the floor's state for prompts and the record:
//! position summary, strongest arguments each way, notable concerns,
//! and a Structural Risk Analysis produced by deterministic pattern
//! matching against a fixed taxonomy. Risk items are capped per digest
//! so repeated rounds cannot accumulate without bound.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::transcript::{EntryType, TranscriptEntry};

use super::stance::DebateStance;

/// The fixed structural-risk taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StructuralRiskKind {
    /// A body or office becomes the sole interpreter of the rules.
    InterpretiveAuthority,
    /// Advisory influence hardening into de facto control.
    SoftPowerCreep,
    /// Scope defined only by what it excludes.
    NegativeDefinition,
    /// Arrangements that resist amendment or repeal.
    PermanenceBias,
}

impl StructuralRiskKind {
    pub fn all() -> [StructuralRiskKind; 4] {
        [
            Self::InterpretiveAuthority,
            Self::SoftPowerCreep,
            Self::NegativeDefinition,
            Self::PermanenceBias,
        ]
    }

    fn pattern(self) -> &'static str {
        match self {
            Self::InterpretiveAuthority => {
                r"(?i)\b(sole (interpreter|arbiter|authority)|final say|sole discretion|interpretation (rests|lies) with)\b"
            }
            Self::SoftPowerCreep => {
                r"(?i)\b(de facto|informal (influence|authority|control)|in practice (controls?|decides?)|advisory in name)\b"
            }
            Self::NegativeDefinition => {
                r"(?i)\b(defined (only )?by what it is not|not (limited|restricted) to|no (limit|restriction)s? (shall|will) apply)\b"
            }
            Self::PermanenceBias => {
                r"(?i)\b(in perpetuity|irrevocabl[ey]|permanent(ly)?|never (be )?(amended|repealed)|binding forever)\b"
            }
        }
    }
}

impl std::fmt::Display for StructuralRiskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::InterpretiveAuthority => "INTERPRETIVE_AUTHORITY",
            Self::SoftPowerCreep => "SOFT_POWER_CREEP",
            Self::NegativeDefinition => "NEGATIVE_DEFINITION",
            Self::PermanenceBias => "PERMANENCE_BIAS",
        };
        write!(f, "{text}")
    }
}

/// One detected risk with its evidence excerpt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralRisk {
    pub kind: StructuralRiskKind,
    pub speaker: String,
    /// The matched excerpt, so the digest is auditable.
    pub evidence: String,
}

/// Deterministically scan speech entries for structural risks, in
/// taxonomy order then entry order, capped at `cap` items.
pub fn detect_structural_risks(entries: &[TranscriptEntry], cap: usize) -> Vec<StructuralRisk> {
    let mut risks = Vec::new();
    for kind in StructuralRiskKind::all() {
        let regex = Regex::new(kind.pattern()).expect("static taxonomy regex");
        for entry in entries {
            if risks.len() >= cap {
                return risks;
            }
            if !matches!(
                entry.entry_type,
                EntryType::Speech | EntryType::RedTeamSpeech
            ) {
                continue;
            }
            if let Some(found) = regex.find(&entry.content) {
                risks.push(StructuralRisk {
                    kind,
                    speaker: entry.speaker_name.clone(),
                    evidence: found.as_str().to_string(),
                });
            }
        }
    }
    risks
}

/// Counts of declared stances in a digest window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StanceCounts {
    pub for_count: u32,
    pub against_count: u32,
    pub neutral_count: u32,
}

impl StanceCounts {
    pub fn record(&mut self, stance: DebateStance) {
        match stance {
            DebateStance::For => self.for_count += 1,
            DebateStance::Against => self.against_count += 1,
            DebateStance::Neutral => self.neutral_count += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.for_count + self.against_count + self.neutral_count
    }

    /// The stance held by the largest bloc, when one exists.
    pub fn prevailing(&self) -> Option<DebateStance> {
        let max = self
            .for_count
            .max(self.against_count)
            .max(self.neutral_count);
        if max == 0 {
            return None;
        }
        let mut leaders = Vec::new();
        if self.for_count == max {
            leaders.push(DebateStance::For);
        }
        if self.against_count == max {
            leaders.push(DebateStance::Against);
        }
        if self.neutral_count == max {
            leaders.push(DebateStance::Neutral);
        }
        if leaders.len() == 1 {
            Some(leaders[0])
        } else {
            None
        }
    }

    /// Largest single-stance fraction of the whole.
    pub fn dominance(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let max = self
            .for_count
            .max(self.against_count)
            .max(self.neutral_count);
        f64::from(max) / f64::from(total)
    }
}

/// A compacted view of a stretch of debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateDigest {
    pub round: u32,
    pub counts: StanceCounts,
    pub top_for: Vec<String>,
    pub top_against: Vec<String>,
    pub concerns: Vec<String>,
    pub risks: Vec<StructuralRisk>,
}

/// Arguments surfaced per side.
const TOP_ARGUMENTS: usize = 3;
/// Excerpt cap per surfaced argument.
const ARGUMENT_CHARS: usize = 200;

fn excerpt(entry: &TranscriptEntry) -> String {
    let body: String = entry
        .content
        .lines()
        .filter(|line| !line.trim_start().starts_with("STANCE:"))
        .collect::<Vec<_>>()
        .join(" ");
    let trimmed = body.trim();
    let cut: String = trimmed.chars().take(ARGUMENT_CHARS).collect();
    format!("{} — {}", entry.speaker_name, cut)
}

/// Build a digest from the entries appended since the previous digest.
pub fn build_digest(window: &[TranscriptEntry], round: u32, risk_cap: usize) -> DebateDigest {
    let mut counts = StanceCounts::default();
    let mut top_for = Vec::new();
    let mut top_against = Vec::new();
    let mut concerns = Vec::new();

    for entry in window {
        if !matches!(
            entry.entry_type,
            EntryType::Speech | EntryType::RedTeamSpeech
        ) {
            continue;
        }
        let stance = entry
            .metadata
            .position
            .as_deref()
            .and_then(DebateStance::parse_token);
        if let Some(stance) = stance {
            counts.record(stance);
            match stance {
                DebateStance::For if top_for.len() < TOP_ARGUMENTS => {
                    top_for.push(excerpt(entry));
                }
                DebateStance::Against if top_against.len() < TOP_ARGUMENTS => {
                    top_against.push(excerpt(entry));
                }
                DebateStance::Neutral if concerns.len() < TOP_ARGUMENTS => {
                    concerns.push(excerpt(entry));
                }
                _ => {}
            }
        }
    }

    DebateDigest {
        round,
        counts,
        top_for,
        top_against,
        concerns,
        risks: detect_structural_risks(window, risk_cap),
    }
}

impl DebateDigest {
    /// Render as the `## Debate Digest` block recorded in the
    /// transcript and fed back into prompts.
    pub fn render(&self) -> String {
        let mut text = format!(
            "## Debate Digest (round {})\n\nPosition Summary: {} FOR | {} AGAINST | {} NEUTRAL\n",
            self.round, self.counts.for_count, self.counts.against_count, self.counts.neutral_count,
        );
        if !self.top_for.is_empty() {
            text.push_str("\nTop arguments FOR:\n");
            for argument in &self.top_for {
                text.push_str(&format!("- {argument}\n"));
            }
        }
        if !self.top_against.is_empty() {
            text.push_str("\nTop arguments AGAINST:\n");
            for argument in &self.top_against {
                text.push_str(&format!("- {argument}\n"));
            }
        }
        if !self.concerns.is_empty() {
            text.push_str("\nNotable concerns:\n");
            for concern in &self.concerns {
                text.push_str(&format!("- {concern}\n"));
            }
        }
        text.push_str("\nStructural Risk Analysis:\n");
        if self.risks.is_empty() {
            text.push_str("- none detected\n");
        } else {
            for risk in &self.risks {
                text.push_str(&format!(
                    "- {}: \"{}\" ({})\n",
                    risk.kind, risk.evidence, risk.speaker
                ));
            }
        }
        text
    }
}
