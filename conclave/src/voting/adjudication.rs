//! Witness adjudication — turning three deliberator opinions into one
//! final vote.
//!
//! The decision table:
//!
//! | Phase-1 failures | Policy |
//! |---|---|
//! | 0–1 of 3 | Witness adjudication over the remaining results; majority still possible. |
//! | 2 of 3   | Witness decides alone; `RETORT` flagged. |
//! | 3 of 3   | Fall back to the optimistic vote; `validation_failed` recorded. |
//!
//! If the adjudication LLM itself fails, the majority of phase-1 results
//! stands; a full three-way disagreement with no adjudicator yields
//! `ABSTAIN` with a `RETORT` ruling and a non-consensus witnessed event.

use serde::{Deserialize, Serialize};

use crate::invoker::InvokerError;
use crate::voting::VoteChoice;

/// Which of the three validation tiers produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliberatorKind {
    /// Reads the raw vote content as prose.
    TextAnalysis,
    /// Validates vote structure against the motion context.
    JsonValidation,
    /// Independent intent confirmation by the witness.
    WitnessConfirm,
}

impl DeliberatorKind {
    /// The three tiers in canonical order.
    pub fn all() -> [DeliberatorKind; 3] {
        [Self::TextAnalysis, Self::JsonValidation, Self::WitnessConfirm]
    }
}

impl std::fmt::Display for DeliberatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TextAnalysis => write!(f, "text_analysis"),
            Self::JsonValidation => write!(f, "json_validation"),
            Self::WitnessConfirm => write!(f, "witness_confirm"),
        }
    }
}

/// One tier's opinion on one vote. A failed task is absorbed into a
/// result with `parse_success = false` rather than an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliberatorResult {
    pub kind: DeliberatorKind,
    pub vote_choice: Option<VoteChoice>,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ambiguity_flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structural_valid: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contradictions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion_alignment: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_clear: Option<bool>,
    pub parse_success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliberatorResult {
    /// Successful prose-analysis result.
    pub fn text_analysis(choice: VoteChoice, confidence: f64, summary: &str) -> Self {
        Self {
            kind: DeliberatorKind::TextAnalysis,
            vote_choice: Some(choice),
            confidence: confidence.clamp(0.0, 1.0),
            reasoning_summary: Some(summary.to_string()),
            ambiguity_flags: Vec::new(),
            structural_valid: None,
            contradictions: Vec::new(),
            motion_alignment: None,
            intent_clear: None,
            parse_success: true,
            error: None,
        }
    }

    /// Successful structural-validation result.
    pub fn json_validation(choice: VoteChoice, structural_valid: bool) -> Self {
        Self {
            kind: DeliberatorKind::JsonValidation,
            vote_choice: Some(choice),
            confidence: if structural_valid { 1.0 } else { 0.5 },
            reasoning_summary: None,
            ambiguity_flags: Vec::new(),
            structural_valid: Some(structural_valid),
            contradictions: Vec::new(),
            motion_alignment: Some(true),
            intent_clear: None,
            parse_success: true,
            error: None,
        }
    }

    /// Successful witness intent confirmation.
    pub fn witness_confirm(choice: VoteChoice, intent_clear: bool) -> Self {
        Self {
            kind: DeliberatorKind::WitnessConfirm,
            vote_choice: Some(choice),
            confidence: if intent_clear { 1.0 } else { 0.4 },
            reasoning_summary: None,
            ambiguity_flags: Vec::new(),
            structural_valid: None,
            contradictions: Vec::new(),
            motion_alignment: None,
            intent_clear: Some(intent_clear),
            parse_success: true,
            error: None,
        }
    }

    /// Fallback result for a timed-out or failed task.
    pub fn failed(kind: DeliberatorKind, error: &str) -> Self {
        Self {
            kind,
            vote_choice: None,
            confidence: 0.0,
            reasoning_summary: None,
            ambiguity_flags: Vec::new(),
            structural_valid: None,
            contradictions: Vec::new(),
            motion_alignment: None,
            intent_clear: None,
            parse_success: false,
            error: Some(error.to_string()),
        }
    }

    /// Whether this result carries a usable choice.
    pub fn is_usable(&self) -> bool {
        self.parse_success && self.vote_choice.is_some()
    }

    /// Lenient extraction of a deliberator verdict from raw model output.
    /// Accepts the JSON object anywhere in the reply; everything outside
    /// the outermost braces is ignored.
    pub fn from_model_output(kind: DeliberatorKind, raw: &str) -> Self {
        let Some(start) = raw.find('{') else {
            return Self::failed(kind, "no JSON object in reply");
        };
        let Some(end) = raw.rfind('}') else {
            return Self::failed(kind, "unterminated JSON object in reply");
        };
        #[derive(Deserialize)]
        struct Wire {
            vote_choice: Option<VoteChoice>,
            #[serde(default)]
            confidence: Option<f64>,
            #[serde(default)]
            reasoning_summary: Option<String>,
            #[serde(default)]
            ambiguity_flags: Vec<String>,
            #[serde(default)]
            structural_valid: Option<bool>,
            #[serde(default)]
            contradictions: Vec<String>,
            #[serde(default)]
            motion_alignment: Option<bool>,
            #[serde(default)]
            intent_clear: Option<bool>,
        }
        match serde_json::from_str::<Wire>(&raw[start..=end]) {
            Ok(wire) => Self {
                kind,
                vote_choice: wire.vote_choice,
                confidence: wire.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
                reasoning_summary: wire.reasoning_summary,
                ambiguity_flags: wire.ambiguity_flags,
                structural_valid: wire.structural_valid,
                contradictions: wire.contradictions,
                motion_alignment: wire.motion_alignment,
                intent_clear: wire.intent_clear,
                parse_success: wire.vote_choice.is_some(),
                error: if wire.vote_choice.is_some() {
                    None
                } else {
                    Some("reply carried no vote_choice".to_string())
                },
            },
            Err(e) => Self::failed(kind, &format!("malformed deliberator JSON: {e}")),
        }
    }
}

/// Raw outcome of the witness adjudication LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WitnessAdjudication {
    pub final_vote: Option<VoteChoice>,
    pub retort: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retort_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witness_statement: Option<String>,
}

impl WitnessAdjudication {
    /// Lenient extraction from raw model output, same contract as
    /// [`DeliberatorResult::from_model_output`].
    pub fn from_model_output(raw: &str) -> Option<Self> {
        let start = raw.find('{')?;
        let end = raw.rfind('}')?;
        serde_json::from_str(&raw[start..=end]).ok()
    }
}

/// Final ruling on one vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WitnessRuling {
    /// Unanimous or majority agreement.
    Confirmed,
    /// Disagreement survived adjudication; a formal witness statement
    /// accompanies the ruling.
    Retort,
    /// All three phase-1 tasks failed; the optimistic vote stands.
    ValidationFailed,
}

impl std::fmt::Display for WitnessRuling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Confirmed => write!(f, "CONFIRMED"),
            Self::Retort => write!(f, "RETORT"),
            Self::ValidationFailed => write!(f, "VALIDATION_FAILED"),
        }
    }
}

/// The adjudicated outcome attached to a completed validation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjudicationResult {
    pub vote_id: String,
    pub final_vote: VoteChoice,
    pub ruling: WitnessRuling,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witness_statement: Option<String>,
    /// True when no consensus could be reached at all.
    pub non_consensus: bool,
    /// What each tier said, in canonical tier order.
    pub deliberator_choices: Vec<Option<VoteChoice>>,
    pub reason: String,
}

/// Pluggable rule for collapsing phase-1 choices into one. The default
/// is simple majority; weighted and unanimity variants can be swapped in
/// without touching the validator.
pub trait ConsensusStrategy: Send + Sync {
    /// Resolve the usable phase-1 choices into a consensus choice, or
    /// `None` when the strategy cannot decide.
    fn resolve(&self, choices: &[VoteChoice]) -> Option<VoteChoice>;

    /// Strategy name for audit records.
    fn name(&self) -> &'static str;
}

/// Majority rule: any choice held by more than half the usable results
/// wins; a single usable result stands alone.
pub struct MajorityStrategy;

impl ConsensusStrategy for MajorityStrategy {
    fn resolve(&self, choices: &[VoteChoice]) -> Option<VoteChoice> {
        if choices.is_empty() {
            return None;
        }
        let mut counts = [(VoteChoice::Aye, 0u32), (VoteChoice::Nay, 0u32), (VoteChoice::Abstain, 0u32)];
        for choice in choices {
            for slot in counts.iter_mut() {
                if slot.0 == *choice {
                    slot.1 += 1;
                }
            }
        }
        let (winner, count) = counts
            .iter()
            .max_by_key(|(_, count)| *count)
            .copied()
            .expect("counts is non-empty");
        if u32::try_from(choices.len()).unwrap_or(u32::MAX) == count || count * 2 > choices.len() as u32 {
            Some(winner)
        } else {
            None
        }
    }

    fn name(&self) -> &'static str {
        "majority"
    }
}

/// Applies the decision table to one vote's deliberations.
pub struct Adjudicator {
    strategy: std::sync::Arc<dyn ConsensusStrategy>,
}

impl Adjudicator {
    pub fn new(strategy: std::sync::Arc<dyn ConsensusStrategy>) -> Self {
        Self { strategy }
    }

    /// Produce the final ruling for one vote.
    ///
    /// `witness_call` is the outcome of the phase-2 adjudication LLM call;
    /// `Err` means the call itself failed and the local rules decide.
    pub fn adjudicate(
        &self,
        vote_id: &str,
        optimistic: VoteChoice,
        results: &[DeliberatorResult],
        witness_call: Result<WitnessAdjudication, InvokerError>,
    ) -> AdjudicationResult {
        let deliberator_choices: Vec<Option<VoteChoice>> =
            results.iter().map(|r| r.vote_choice).collect();
        let usable: Vec<VoteChoice> = results
            .iter()
            .filter(|r| r.is_usable())
            .filter_map(|r| r.vote_choice)
            .collect();

        // All three tiers failed: the optimistic vote stands untouched.
        if usable.is_empty() {
            return AdjudicationResult {
                vote_id: vote_id.to_string(),
                final_vote: optimistic,
                ruling: WitnessRuling::ValidationFailed,
                witness_statement: None,
                non_consensus: true,
                deliberator_choices,
                reason: "all phase-1 tasks failed; optimistic vote retained".to_string(),
            };
        }

        let degraded = usable.len() == 1;

        match witness_call {
            Ok(adj) if adj.final_vote.is_some() => {
                let final_vote = adj.final_vote.expect("checked above");
                let retort = adj.retort || degraded;
                AdjudicationResult {
                    vote_id: vote_id.to_string(),
                    final_vote,
                    ruling: if retort {
                        WitnessRuling::Retort
                    } else {
                        WitnessRuling::Confirmed
                    },
                    witness_statement: adj.witness_statement,
                    non_consensus: false,
                    deliberator_choices,
                    reason: adj
                        .retort_reason
                        .unwrap_or_else(|| "witness adjudication".to_string()),
                }
            }
            // Adjudication unavailable or inconclusive: fall back to the
            // phase-1 consensus rule.
            _ => match self.strategy.resolve(&usable) {
                Some(final_vote) => AdjudicationResult {
                    vote_id: vote_id.to_string(),
                    final_vote,
                    ruling: if degraded {
                        WitnessRuling::Retort
                    } else {
                        WitnessRuling::Confirmed
                    },
                    witness_statement: None,
                    non_consensus: false,
                    deliberator_choices,
                    reason: format!("{} of phase-1 results", self.strategy.name()),
                },
                None => AdjudicationResult {
                    vote_id: vote_id.to_string(),
                    final_vote: VoteChoice::Abstain,
                    ruling: WitnessRuling::Retort,
                    witness_statement: Some(format!(
                        "Witness statement: deliberators returned {} with no \
                         consensus and no adjudicator available; the vote is \
                         recorded as ABSTAIN.",
                        usable
                            .iter()
                            .map(|c| c.token())
                            .collect::<Vec<_>>()
                            .join("/")
                    )),
                    non_consensus: true,
                    deliberator_choices,
                    reason: "three-way disagreement; tie-break unavailable".to_string(),
                },
            },
        }
    }
}
