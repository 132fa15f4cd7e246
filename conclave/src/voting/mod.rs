//! Vote domain — choices, vote records, and the validation payload.
//!
//! Submodules cover the optimistic parse, roster-order collection, the
//! three-tier asynchronous validator, witness adjudication, and the
//! reconciliation gate.

pub mod adjudication;
pub mod collector;
pub mod parse;
pub mod reconcile;
pub mod validator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A ballot choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteChoice {
    Aye,
    Nay,
    Abstain,
}

impl VoteChoice {
    /// Wire token as it appears in the vote protocol line.
    pub fn token(self) -> &'static str {
        match self {
            Self::Aye => "AYE",
            Self::Nay => "NAY",
            Self::Abstain => "ABSTAIN",
        }
    }
}

impl std::fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// One Archon's vote on one motion.
///
/// `choice` starts as the optimistic parse and is overwritten during
/// reconciliation when the validated choice differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    /// Unique vote id.
    pub vote_id: String,
    /// Session this vote was cast in.
    pub session_id: String,
    /// Motion voted on.
    pub motion_id: String,
    /// Voting Archon.
    pub archon_id: String,
    /// Raw model output, unmodified.
    pub raw_content: String,
    /// First-pass parsed choice.
    pub optimistic_choice: VoteChoice,
    /// Consensus choice from the validation pipeline, once known.
    pub validated_choice: Option<VoteChoice>,
    /// The choice that counts. Equals `optimistic_choice` until an
    /// override is applied.
    pub choice: VoteChoice,
    /// Whether reconciliation overwrote `choice`.
    pub override_applied: bool,
    /// Witness ruling, once validation completes.
    pub witness_ruling: Option<String>,
    /// Voter reasoning extracted from the raw content, plus any
    /// validation annotations.
    pub reasoning: String,
    /// When the vote was cast.
    pub cast_at: DateTime<Utc>,
}

impl Vote {
    /// Create a freshly-cast vote from an optimistic parse.
    pub fn cast(
        session_id: &str,
        motion_id: &str,
        archon_id: &str,
        raw_content: &str,
        optimistic_choice: VoteChoice,
        reasoning: &str,
    ) -> Self {
        Self {
            vote_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            motion_id: motion_id.to_string(),
            archon_id: archon_id.to_string(),
            raw_content: raw_content.to_string(),
            optimistic_choice,
            validated_choice: None,
            choice: optimistic_choice,
            override_applied: false,
            witness_ruling: None,
            reasoning: reasoning.to_string(),
            cast_at: Utc::now(),
        }
    }

    /// Payload handed to the validation pipeline.
    pub fn payload(&self, motion_title: &str, motion_text: &str) -> VotePayload {
        VotePayload {
            vote_id: self.vote_id.clone(),
            session_id: self.session_id.clone(),
            motion_id: self.motion_id.clone(),
            archon_id: self.archon_id.clone(),
            raw_content: self.raw_content.clone(),
            optimistic_choice: self.optimistic_choice,
            motion_title: motion_title.to_string(),
            motion_text: motion_text.to_string(),
        }
    }
}

/// Everything a validator task needs to evaluate one vote. Serializable
/// because pending validations are checkpointed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotePayload {
    pub vote_id: String,
    pub session_id: String,
    pub motion_id: String,
    pub archon_id: String,
    pub raw_content: String,
    pub optimistic_choice: VoteChoice,
    pub motion_title: String,
    pub motion_text: String,
}

/// Aggregate tally for a motion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub ayes: u32,
    pub nays: u32,
    pub abstentions: u32,
}

impl Tally {
    /// Count one choice.
    pub fn record(&mut self, choice: VoteChoice) {
        match choice {
            VoteChoice::Aye => self.ayes += 1,
            VoteChoice::Nay => self.nays += 1,
            VoteChoice::Abstain => self.abstentions += 1,
        }
    }

    /// Total ballots counted.
    pub fn total(&self) -> u32 {
        self.ayes + self.nays + self.abstentions
    }

    /// Voting ballots — the threshold denominator. Abstentions excluded.
    pub fn voting(&self) -> u32 {
        self.ayes + self.nays
    }

    /// Whether the ayes meet `threshold` of the voting ballots. Zero
    /// voting ballots never passes.
    pub fn passes(&self, threshold: f64) -> bool {
        if self.voting() == 0 {
            return false;
        }
        f64::from(self.ayes) / f64::from(self.voting()) >= threshold
    }
}

impl std::fmt::Display for Tally {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} AYE / {} NAY / {} ABSTAIN",
            self.ayes, self.nays, self.abstentions
        )
    }
}
