//! Session state machine — phases, transitions, and the session entity.
//!
//! Phases advance strictly one-way except for the `voting →
//! new_business` loop that carries the agenda. Adjournment is gated by
//! reconciliation: a session is `adjourned` only once every validation
//! has resolved and overrides are applied.

pub mod checkpoint;
pub mod engine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::motion::Motion;
use crate::transcript::Transcript;

/// Phase of a Conclave session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    CallToOrder,
    RollCall,
    NewBusiness,
    Debate,
    Voting,
    Adjourning,
    Adjourned,
    /// Terminal failure: reconciliation could not be completed soundly.
    ReconciliationFailed,
}

impl SessionPhase {
    /// Valid transitions from this phase.
    pub fn valid_transitions(self) -> &'static [SessionPhase] {
        match self {
            Self::CallToOrder => &[Self::RollCall],
            Self::RollCall => &[Self::NewBusiness],
            Self::NewBusiness => &[Self::Debate, Self::Adjourning],
            Self::Debate => &[Self::Voting],
            Self::Voting => &[Self::NewBusiness],
            Self::Adjourning => &[Self::Adjourned, Self::ReconciliationFailed],
            Self::Adjourned | Self::ReconciliationFailed => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Adjourned | Self::ReconciliationFailed)
    }

    /// External cancellation is allowed only before any business has
    /// been transacted.
    pub fn allows_cancellation(self) -> bool {
        matches!(self, Self::CallToOrder | Self::RollCall)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CallToOrder => write!(f, "call_to_order"),
            Self::RollCall => write!(f, "roll_call"),
            Self::NewBusiness => write!(f, "new_business"),
            Self::Debate => write!(f, "debate"),
            Self::Voting => write!(f, "voting"),
            Self::Adjourning => write!(f, "adjourning"),
            Self::Adjourned => write!(f, "adjourned"),
            Self::ReconciliationFailed => write!(f, "reconciliation_failed"),
        }
    }
}

/// A phase transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: SessionPhase,
    pub to: SessionPhase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Error for invalid phase transitions or phase-gated operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseError {
    pub from: SessionPhase,
    pub to: SessionPhase,
    pub reason: String,
}

impl std::fmt::Display for PhaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} → {}: {}",
            self.from, self.to, self.reason
        )
    }
}

impl std::error::Error for PhaseError {}

/// A Conclave session: the owning aggregate for its motions and its
/// transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConclaveSession {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub phase: SessionPhase,
    pub motions: Vec<Motion>,
    pub present_archons: Vec<String>,
    pub transcript: Transcript,
    pub transitions: Vec<PhaseTransition>,
    /// Checkpoint sequence numbers taken so far.
    pub checkpoints: Vec<u32>,
}

impl ConclaveSession {
    pub fn new() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            ended_at: None,
            phase: SessionPhase::CallToOrder,
            motions: Vec::new(),
            present_archons: Vec::new(),
            transcript: Transcript::new(),
            transitions: Vec::new(),
            checkpoints: Vec::new(),
        }
    }

    /// Transition to a new phase with a reason.
    pub fn transition(&mut self, to: SessionPhase, reason: &str) -> Result<(), PhaseError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(PhaseError {
                from: self.phase,
                to,
                reason: format!(
                    "not a valid transition (allowed: {:?})",
                    self.phase.valid_transitions()
                ),
            });
        }
        self.transitions.push(PhaseTransition {
            from: self.phase,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = to;
        if to.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn motion(&self, motion_id: &str) -> Option<&Motion> {
        self.motions.iter().find(|m| m.motion_id == motion_id)
    }

    pub fn motion_mut(&mut self, motion_id: &str) -> Option<&mut Motion> {
        self.motions.iter_mut().find(|m| m.motion_id == motion_id)
    }

    pub fn is_complete(&self) -> bool {
        self.phase.is_terminal()
    }
}

impl Default for ConclaveSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_starts_at_call_to_order() {
        let session = ConclaveSession::new();
        assert_eq!(session.phase, SessionPhase::CallToOrder);
        assert!(!session.is_complete());
        assert!(session.ended_at.is_none());
    }

    #[test]
    fn test_full_lifecycle_transitions() {
        let mut session = ConclaveSession::new();
        session.transition(SessionPhase::RollCall, "opened").unwrap();
        session.transition(SessionPhase::NewBusiness, "roll complete").unwrap();
        session.transition(SessionPhase::Debate, "motion seconded").unwrap();
        session.transition(SessionPhase::Voting, "debate complete").unwrap();
        session.transition(SessionPhase::NewBusiness, "votes cast").unwrap();
        session.transition(SessionPhase::Adjourning, "agenda exhausted").unwrap();
        session.transition(SessionPhase::Adjourned, "reconciled").unwrap();
        assert!(session.is_complete());
        assert!(session.ended_at.is_some());
        assert_eq!(session.transitions.len(), 7);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut session = ConclaveSession::new();
        let err = session
            .transition(SessionPhase::Voting, "skip ahead")
            .unwrap_err();
        assert_eq!(err.from, SessionPhase::CallToOrder);
        assert_eq!(err.to, SessionPhase::Voting);
    }

    #[test]
    fn test_terminal_phases_stuck() {
        let mut session = ConclaveSession::new();
        session.transition(SessionPhase::RollCall, "").unwrap();
        session.transition(SessionPhase::NewBusiness, "").unwrap();
        session.transition(SessionPhase::Adjourning, "").unwrap();
        session
            .transition(SessionPhase::ReconciliationFailed, "tally violation")
            .unwrap();
        assert!(session.is_complete());
        assert!(session
            .transition(SessionPhase::NewBusiness, "reopen")
            .is_err());
    }

    #[test]
    fn test_adjourning_can_retry_is_not_a_transition() {
        // Staying in Adjourning after a drain timeout is a no-op, not a
        // transition; only success or hard failure leaves the phase.
        assert_eq!(
            SessionPhase::Adjourning.valid_transitions(),
            &[SessionPhase::Adjourned, SessionPhase::ReconciliationFailed]
        );
    }

    #[test]
    fn test_cancellation_window() {
        assert!(SessionPhase::CallToOrder.allows_cancellation());
        assert!(SessionPhase::RollCall.allows_cancellation());
        assert!(!SessionPhase::NewBusiness.allows_cancellation());
        assert!(!SessionPhase::Adjourning.allows_cancellation());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(SessionPhase::CallToOrder.to_string(), "call_to_order");
        assert_eq!(
            SessionPhase::ReconciliationFailed.to_string(),
            "reconciliation_failed"
        );
    }

    #[test]
    fn test_session_serde_roundtrip() {
        let mut session = ConclaveSession::new();
        session.transition(SessionPhase::RollCall, "opened").unwrap();
        session.transcript.procedural("Roll call.");
        let json = serde_json::to_string(&session).unwrap();
        let parsed: ConclaveSession = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.phase, SessionPhase::RollCall);
        assert_eq!(parsed.transcript.len(), 1);
    }
}
