//! Stance extraction and protocol-violation screening.
//!
//! Debate replies must open with `STANCE: FOR|AGAINST|NEUTRAL` on its
//! own line. Hidden-reasoning markers are rejected outright; a missing
//! stance is tolerated as implicit `NEUTRAL`.

use serde::{Deserialize, Serialize};

/// A declared debate position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DebateStance {
    For,
    Against,
    Neutral,
}

impl DebateStance {
    pub fn token(self) -> &'static str {
        match self {
            Self::For => "FOR",
            Self::Against => "AGAINST",
            Self::Neutral => "NEUTRAL",
        }
    }

    /// The stance a steelman of the opposite side takes.
    pub fn opposite(self) -> Self {
        match self {
            Self::For => Self::Against,
            Self::Against => Self::For,
            Self::Neutral => Self::Neutral,
        }
    }

    pub fn parse_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "FOR" => Some(Self::For),
            "AGAINST" => Some(Self::Against),
            "NEUTRAL" => Some(Self::Neutral),
            _ => None,
        }
    }
}

impl std::fmt::Display for DebateStance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// Tokens that betray leaked hidden reasoning. Their presence anywhere
/// in a reply is a protocol violation.
pub const HIDDEN_REASONING_MARKERS: [&str; 3] = ["Thought:", "Analysis:", "DELIBERATION RECORD"];

/// How a speech was classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// A well-formed speech with its stance.
    Valid {
        stance: DebateStance,
        /// False when the stance line was absent and `NEUTRAL` was
        /// assumed.
        explicit: bool,
    },
    /// A protocol violation; excluded from consensus accounting.
    Violation { reason: String },
}

impl SpeechOutcome {
    pub fn is_violation(&self) -> bool {
        matches!(self, Self::Violation { .. })
    }
}

/// Extract the stance declared on the first non-empty line, if any.
pub fn parse_stance(content: &str) -> Option<DebateStance> {
    let first_line = content.lines().find(|line| !line.trim().is_empty())?;
    let rest = first_line.trim().strip_prefix("STANCE:")?;
    DebateStance::parse_token(rest)
}

/// Classify a debate reply.
///
/// `forced` carries the stance a consensus-break order demanded, if
/// any; refusing the order is itself a violation.
pub fn classify_speech(content: &str, forced: Option<DebateStance>) -> SpeechOutcome {
    if content.trim().is_empty() {
        return SpeechOutcome::Violation {
            reason: "empty reply".to_string(),
        };
    }
    for marker in HIDDEN_REASONING_MARKERS {
        if content.contains(marker) {
            return SpeechOutcome::Violation {
                reason: format!("hidden reasoning marker `{marker}`"),
            };
        }
    }

    match parse_stance(content) {
        Some(stance) => {
            if let Some(forced_stance) = forced {
                if stance != forced_stance {
                    return SpeechOutcome::Violation {
                        reason: format!(
                            "refused forced stance {forced_stance}, declared {stance}"
                        ),
                    };
                }
            }
            SpeechOutcome::Valid {
                stance,
                explicit: true,
            }
        }
        None => SpeechOutcome::Valid {
            stance: DebateStance::Neutral,
            explicit: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stance_first_line() {
        assert_eq!(
            parse_stance("STANCE: FOR\nThe motion is sound."),
            Some(DebateStance::For)
        );
        assert_eq!(
            parse_stance("\n  STANCE: AGAINST\nIt overreaches."),
            Some(DebateStance::Against)
        );
        assert_eq!(parse_stance("STANCE: neutral\nUndecided."), Some(DebateStance::Neutral));
    }

    #[test]
    fn test_stance_must_lead() {
        assert_eq!(parse_stance("I think...\nSTANCE: FOR"), None);
        assert_eq!(parse_stance("My STANCE: FOR"), None);
    }

    #[test]
    fn test_missing_stance_is_implicit_neutral() {
        let outcome = classify_speech("The motion deserves more scrutiny.", None);
        assert_eq!(
            outcome,
            SpeechOutcome::Valid {
                stance: DebateStance::Neutral,
                explicit: false
            }
        );
    }

    #[test]
    fn test_hidden_reasoning_rejected() {
        let outcome = classify_speech("STANCE: FOR\nThought: let me work this out...", None);
        assert!(outcome.is_violation());

        let outcome = classify_speech("DELIBERATION RECORD\nSTANCE: FOR", None);
        assert!(outcome.is_violation());
    }

    #[test]
    fn test_empty_reply_rejected() {
        assert!(classify_speech("   \n  ", None).is_violation());
    }

    #[test]
    fn test_forced_stance_refusal() {
        let outcome = classify_speech("STANCE: FOR\nI will not argue against.", Some(DebateStance::Against));
        assert!(outcome.is_violation());

        let outcome = classify_speech(
            "STANCE: AGAINST\nSteelmanning the opposition as ordered.",
            Some(DebateStance::Against),
        );
        assert_eq!(
            outcome,
            SpeechOutcome::Valid {
                stance: DebateStance::Against,
                explicit: true
            }
        );
    }

    #[test]
    fn test_opposite() {
        assert_eq!(DebateStance::For.opposite(), DebateStance::Against);
        assert_eq!(DebateStance::Against.opposite(), DebateStance::For);
        assert_eq!(DebateStance::Neutral.opposite(), DebateStance::Neutral);
    }

    #[test]
    fn test_wire_format() {
        assert_eq!(serde_json::to_string(&DebateStance::For).unwrap(), "\"FOR\"");
    }
}
