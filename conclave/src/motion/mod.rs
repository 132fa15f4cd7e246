//! Motion domain — seeds, motions, admission records.
//!
//! Motion Seeds are unbounded, non-binding intake; Motions are the
//! scarce, admission-gated, budget-bounded artifacts the Conclave
//! actually debates. The only path from one to the other is promotion
//! by a King.

pub mod admission;
pub mod agenda;
pub mod promotion;
pub mod seeds;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::voting::{Tally, Vote};

/// Lifecycle status of a Motion Seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedStatus {
    Recorded,
    Clustered,
    Promoted,
    Archived,
}

impl std::fmt::Display for SeedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recorded => write!(f, "recorded"),
            Self::Clustered => write!(f, "clustered"),
            Self::Promoted => write!(f, "promoted"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

/// A non-binding proposal. Intake is unbounded and gate-free; the text
/// and provenance freeze permanently at promotion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionSeed {
    pub seed_id: String,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
    pub seed_text: String,
    pub status: SeedStatus,
    /// Where the seed came from (direct submission, consolidator,
    /// legacy shim).
    pub provenance: String,
}

impl MotionSeed {
    /// Whether the immutability lock is engaged.
    pub fn is_frozen(&self) -> bool {
        self.status == SeedStatus::Promoted
    }
}

/// Category of a Motion; selects its pass threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionType {
    Policy,
    Constitutional,
    Procedural,
}

impl std::fmt::Display for MotionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Policy => write!(f, "policy"),
            Self::Constitutional => write!(f, "constitutional"),
            Self::Procedural => write!(f, "procedural"),
        }
    }
}

/// Lifecycle status of a Motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionStatus {
    Proposed,
    Seconded,
    Debating,
    Voting,
    Passed,
    Failed,
    DiedNoSecond,
}

impl std::fmt::Display for MotionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proposed => write!(f, "proposed"),
            Self::Seconded => write!(f, "seconded"),
            Self::Debating => write!(f, "debating"),
            Self::Voting => write!(f, "voting"),
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::DiedNoSecond => write!(f, "died_no_second"),
        }
    }
}

/// A realm the motion touches. Exactly one reference must be primary for
/// the motion to clear admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmRef {
    pub name: String,
    pub primary: bool,
}

impl RealmRef {
    pub fn primary(name: &str) -> Self {
        Self {
            name: name.to_string(),
            primary: true,
        }
    }

    pub fn secondary(name: &str) -> Self {
        Self {
            name: name.to_string(),
            primary: false,
        }
    }
}

/// Admission verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionStatus {
    Admitted,
    Rejected,
    Deferred,
}

/// Machine-readable rejection reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    MissingRequiredFields,
    NoPrimaryRealm,
    MultiPrimaryRealm,
    InvalidRealm,
    AmbiguousScope,
    ImplementationDetail,
    MissingRequiredCosponsor,
    ExcessiveRealmSpan,
    PromotionBudgetExceeded,
    SeedEscalationBlocked,
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::MissingRequiredFields => "MISSING_REQUIRED_FIELDS",
            Self::NoPrimaryRealm => "NO_PRIMARY_REALM",
            Self::MultiPrimaryRealm => "MULTI_PRIMARY_REALM",
            Self::InvalidRealm => "INVALID_REALM",
            Self::AmbiguousScope => "AMBIGUOUS_SCOPE",
            Self::ImplementationDetail => "IMPLEMENTATION_DETAIL",
            Self::MissingRequiredCosponsor => "MISSING_REQUIRED_COSPONSOR",
            Self::ExcessiveRealmSpan => "EXCESSIVE_REALM_SPAN",
            Self::PromotionBudgetExceeded => "PROMOTION_BUDGET_EXCEEDED",
            Self::SeedEscalationBlocked => "SEED_ESCALATION_BLOCKED",
        };
        write!(f, "{text}")
    }
}

/// The Admission Gate's record for one Motion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionRecord {
    pub status: AdmissionStatus,
    pub reason_codes: Vec<ReasonCode>,
    pub escalation_required: bool,
    pub reviewed_at: DateTime<Utc>,
}

impl AdmissionRecord {
    pub fn admitted(escalation_required: bool) -> Self {
        Self {
            status: AdmissionStatus::Admitted,
            reason_codes: Vec::new(),
            escalation_required,
            reviewed_at: Utc::now(),
        }
    }

    pub fn rejected(reason_codes: Vec<ReasonCode>, escalation_required: bool) -> Self {
        Self {
            status: AdmissionStatus::Rejected,
            reason_codes,
            escalation_required,
            reviewed_at: Utc::now(),
        }
    }

    pub fn is_admitted(&self) -> bool {
        self.status == AdmissionStatus::Admitted
    }
}

/// Final vote outcome captured on the motion and carried into mandates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoteResult {
    pub tally: Tally,
    pub threshold: f64,
    pub passed: bool,
}

/// An agenda-eligible deliberation artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Motion {
    pub motion_id: String,
    pub title: String,
    pub motion_type: MotionType,
    /// Realms touched; exactly one primary after admission.
    pub realms: Vec<RealmRef>,
    pub primary_sponsor: String,
    pub co_sponsors: Vec<String>,
    /// Whether explicit escalation approval accompanies a wide realm
    /// span.
    pub escalation_approved: bool,
    pub text: String,
    pub success_criteria: String,
    /// Seeds this motion was promoted from.
    pub source_seed_refs: Vec<String>,
    pub admission_record: Option<AdmissionRecord>,
    pub status: MotionStatus,
    pub proposed_at: DateTime<Utc>,
    pub seconded_by: Option<String>,
    pub seconded_at: Option<DateTime<Utc>>,
    pub votes: Vec<Vote>,
    pub result: Option<VoteResult>,
    pub passed_at: Option<DateTime<Utc>>,
}

impl Motion {
    /// The single primary realm, when exactly one is declared.
    pub fn primary_realm(&self) -> Option<&str> {
        let mut primaries = self.realms.iter().filter(|r| r.primary);
        match (primaries.next(), primaries.next()) {
            (Some(realm), None) => Some(realm.name.as_str()),
            _ => None,
        }
    }

    /// Number of distinct realms referenced.
    pub fn realm_span(&self) -> usize {
        let mut names: Vec<&str> = self.realms.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names.len()
    }

    /// Whether the motion may be placed on an agenda.
    pub fn is_agenda_eligible(&self) -> bool {
        self.admission_record
            .as_ref()
            .is_some_and(AdmissionRecord::is_admitted)
    }

    /// Whether the motion reached a terminal status.
    pub fn is_decided(&self) -> bool {
        matches!(
            self.status,
            MotionStatus::Passed | MotionStatus::Failed | MotionStatus::DiedNoSecond
        )
    }
}

#[cfg(test)]
pub(crate) fn test_motion(motion_id: &str, realms: Vec<RealmRef>) -> Motion {
    Motion {
        motion_id: motion_id.to_string(),
        title: "Standardize realm tariffs".to_string(),
        motion_type: MotionType::Policy,
        realms,
        primary_sponsor: "archon-00".to_string(),
        co_sponsors: Vec::new(),
        escalation_approved: false,
        text: "Resolved, that tariffs between realms shall follow a single published schedule."
            .to_string(),
        success_criteria: "A ratified schedule referenced by all realm treasuries.".to_string(),
        source_seed_refs: vec!["seed-1".to_string()],
        admission_record: None,
        status: MotionStatus::Proposed,
        proposed_at: Utc::now(),
        seconded_by: None,
        seconded_at: None,
        votes: Vec::new(),
        result: None,
        passed_at: None,
    }
}
