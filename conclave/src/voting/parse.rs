//! Optimistic ballot parsing.
//!
//! First-line JSON is the protocol; synonym fallbacks keep the floor
//! moving when a model rambles. Anything unrecognizable is an ABSTAIN —
//! the validation pipeline gets the raw text either way and can still
//! override.

use regex::Regex;
use serde::Deserialize;

use super::VoteChoice;

/// How the optimistic choice was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseSource {
    /// The protocol's single JSON line.
    FirstLineJson,
    /// A recognized synonym in the prose.
    Synonym,
    /// Nothing recognizable; defaulted.
    Defaulted,
}

/// Result of the optimistic parse.
#[derive(Debug, Clone)]
pub struct OptimisticParse {
    pub choice: VoteChoice,
    pub source: ParseSource,
    /// Prose after the ballot line, for the vote record.
    pub reasoning: String,
}

#[derive(Deserialize)]
struct BallotLine {
    choice: String,
}

fn strip_markdown(line: &str) -> String {
    line.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .replace(['`', '*'], "")
        .trim()
        .to_string()
}

fn choice_from_word(word: &str) -> Option<VoteChoice> {
    match word.to_ascii_uppercase().as_str() {
        "AYE" | "FOR" | "YES" | "YEA" | "IN FAVOR" | "IN FAVOUR" => Some(VoteChoice::Aye),
        "NAY" | "AGAINST" | "NO" | "OPPOSED" => Some(VoteChoice::Nay),
        "ABSTAIN" | "ABSTENTION" | "PRESENT" => Some(VoteChoice::Abstain),
        _ => None,
    }
}

fn synonym_regex() -> Regex {
    Regex::new(
        r"(?i)\b(?:my vote is|i vote|i cast|vote|voting)\s*[:\-]?\s*(aye|nay|abstain|abstention|for|against|yes|no|yea|opposed|in favou?r)\b",
    )
    .expect("static regex")
}

/// Parse a raw ballot optimistically. Never fails; the worst case is a
/// defaulted ABSTAIN.
pub fn parse_optimistic(raw: &str) -> OptimisticParse {
    // Markdown-stripped, blank-free view; fence lines vanish so the
    // protocol's JSON ends up on the first effective line.
    let cleaned: Vec<String> = raw
        .lines()
        .map(strip_markdown)
        .filter(|line| !line.is_empty())
        .collect();
    let first_line = cleaned.first().cloned().unwrap_or_default();
    let rest = cleaned
        .iter()
        .skip(1)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    // Preferred: the protocol's JSON line.
    if let Ok(ballot) = serde_json::from_str::<BallotLine>(&first_line) {
        if let Some(choice) = choice_from_word(ballot.choice.trim()) {
            return OptimisticParse {
                choice,
                source: ParseSource::FirstLineJson,
                reasoning: rest,
            };
        }
    }

    // A bare token on the first line counts as explicit enough.
    if let Some(choice) = choice_from_word(&first_line) {
        return OptimisticParse {
            choice,
            source: ParseSource::Synonym,
            reasoning: rest,
        };
    }

    // Synonyms anywhere in the prose, markdown stripped.
    let flattened = strip_markdown(&raw.replace('\n', " "));
    if let Some(captures) = synonym_regex().captures(&flattened) {
        if let Some(choice) = choice_from_word(&captures[1]) {
            return OptimisticParse {
                choice,
                source: ParseSource::Synonym,
                reasoning: raw.trim().to_string(),
            };
        }
    }

    OptimisticParse {
        choice: VoteChoice::Abstain,
        source: ParseSource::Defaulted,
        reasoning: raw.trim().to_string(),
    }
}
