//! The Conclave engine — the session's operations, wired end-to-end.
//!
//! One engine drives one session: open it, introduce and second
//! motions, run debates, collect votes, adjourn. Validation runs in the
//! background throughout; adjournment blocks on the reconciliation
//! gate and nothing else.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::archon::{ArchonProfile, ArchonProfileRepository, ProfileError};
use crate::audit::{topics, AuditMessage, AuditPublisher};
use crate::config::{ConclaveConfig, ConfigError};
use crate::debate::{DebateOrchestrator, DebateRecord};
use crate::motion::{Motion, MotionStatus, VoteResult};
use crate::transcript::{EntryMetadata, EntryType};
use crate::voting::collector::VoteCollector;
use crate::voting::reconcile::{ReconcileError, ReconciliationGate, ReconciliationSummary};
use crate::voting::validator::AsyncValidator;
use crate::voting::Tally;

use super::checkpoint::{
    load_checkpoint, save_checkpoint, CheckpointError, PendingValidation, SessionCheckpoint,
};
use super::{ConclaveSession, PhaseError, SessionPhase};

/// Engine-level error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Profiles(#[from] ProfileError),

    #[error(transparent)]
    Phase(#[from] PhaseError),

    #[error("unknown motion `{0}`")]
    MotionNotFound(String),

    #[error("motion `{0}` is not admitted; it cannot be introduced")]
    NotAdmitted(String),

    #[error("motion `{motion_id}` is {status}, expected {expected}")]
    WrongMotionStatus {
        motion_id: String,
        status: MotionStatus,
        expected: MotionStatus,
    },

    #[error("seconding window expired for motion `{0}`; it died for lack of a second")]
    SecondingWindowExpired(String),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// The engine.
pub struct ConclaveEngine {
    config: ConclaveConfig,
    roster: Vec<ArchonProfile>,
    audit: Arc<dyn AuditPublisher>,
    validator: AsyncValidator,
    orchestrator: DebateOrchestrator,
    collector: VoteCollector,
    gate: ReconciliationGate,
    session: ConclaveSession,
    debates: HashMap<String, DebateRecord>,
    checkpoint_seq: u32,
}

impl ConclaveEngine {
    /// Build an engine over the given ports. Fails fast on a bad
    /// configuration or a roster whose size is not divisible by 3.
    pub fn new(
        config: ConclaveConfig,
        profiles: Arc<dyn ArchonProfileRepository>,
        invoker: Arc<dyn crate::invoker::AgentInvoker>,
        audit: Arc<dyn AuditPublisher>,
    ) -> Result<Self, EngineError> {
        Self::with_session(config, profiles, invoker, audit, ConclaveSession::new())
    }

    fn with_session(
        config: ConclaveConfig,
        profiles: Arc<dyn ArchonProfileRepository>,
        invoker: Arc<dyn crate::invoker::AgentInvoker>,
        audit: Arc<dyn AuditPublisher>,
        session: ConclaveSession,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let roster = profiles.get_all();
        if roster.is_empty() {
            return Err(ProfileError::EmptyRoster.into());
        }
        if roster.len() % 3 != 0 {
            return Err(ProfileError::RosterNotDivisible(roster.len()).into());
        }
        if roster.len() != config.archon_count as usize {
            warn!(
                configured = config.archon_count,
                actual = roster.len(),
                "configured archon_count differs from the live roster; the roster governs"
            );
        }

        let validator = AsyncValidator::new(invoker.clone(), audit.clone(), &config);
        let orchestrator = DebateOrchestrator::new(invoker.clone(), config.clone());
        let collector = VoteCollector::new(invoker, audit.clone(), config.clone());
        let gate = ReconciliationGate::new(validator.clone(), audit.clone(), config.clone());

        Ok(Self {
            config,
            roster,
            audit,
            validator,
            orchestrator,
            collector,
            gate,
            session,
            debates: HashMap::new(),
            checkpoint_seq: 0,
        })
    }

    /// Resume from a checkpoint: the session state is restored and every
    /// pending validation is re-submitted. Replaying an already-applied
    /// event stream is a no-op beyond that.
    pub fn resume_from_checkpoint(
        config: ConclaveConfig,
        profiles: Arc<dyn ArchonProfileRepository>,
        invoker: Arc<dyn crate::invoker::AgentInvoker>,
        audit: Arc<dyn AuditPublisher>,
        path: &Path,
    ) -> Result<Self, EngineError> {
        let checkpoint = load_checkpoint(path)?;
        let engine = Self::with_session(config, profiles, invoker, audit, checkpoint.session)?;
        for pending in checkpoint.pending_validations {
            engine.validator.submit(pending.vote_payload);
        }
        Ok(engine)
    }

    /// Call the session to order: roll call, then new business.
    pub fn open(&mut self) -> Result<(), EngineError> {
        self.session.transition(SessionPhase::RollCall, "called to order")?;
        self.session.present_archons = self.roster.iter().map(|p| p.id.clone()).collect();
        let names: Vec<&str> = self.roster.iter().map(|p| p.name.as_str()).collect();
        self.session.transcript.procedural(&format!(
            "Roll call: {} Archons present ({})",
            names.len(),
            names.join(", ")
        ));
        self.session
            .transition(SessionPhase::NewBusiness, "roll call acknowledged")?;
        self.session.transcript.procedural("The floor is open for new business.");
        info!(session_id = %self.session.session_id, archons = names.len(), "session opened");
        Ok(())
    }

    /// Introduce an admitted motion to the floor.
    pub fn introduce_motion(&mut self, mut motion: Motion) -> Result<String, EngineError> {
        self.require_phase(SessionPhase::NewBusiness)?;
        if !motion.is_agenda_eligible() {
            return Err(EngineError::NotAdmitted(motion.motion_id));
        }
        motion.status = MotionStatus::Proposed;
        motion.proposed_at = Utc::now();
        let motion_id = motion.motion_id.clone();
        self.session.transcript.append(
            EntryType::Motion,
            &motion.primary_sponsor,
            &motion.primary_sponsor,
            &format!(
                "Motion introduced: \"{}\" ({})\n{}",
                motion.title, motion.motion_type, motion.text
            ),
            EntryMetadata {
                motion_id: Some(motion_id.clone()),
                ..Default::default()
            },
        );
        self.session.motions.push(motion);
        Ok(motion_id)
    }

    /// Second a proposed motion within the seconding window, moving the
    /// session into debate.
    pub fn second_motion(&mut self, motion_id: &str, seconder_id: &str) -> Result<(), EngineError> {
        self.require_phase(SessionPhase::NewBusiness)?;
        let window = self.config.seconding_window();
        let motion = self
            .session
            .motion_mut(motion_id)
            .ok_or_else(|| EngineError::MotionNotFound(motion_id.to_string()))?;
        if motion.status != MotionStatus::Proposed {
            return Err(EngineError::WrongMotionStatus {
                motion_id: motion_id.to_string(),
                status: motion.status,
                expected: MotionStatus::Proposed,
            });
        }
        let elapsed = Utc::now().signed_duration_since(motion.proposed_at);
        if elapsed.to_std().unwrap_or_default() > window {
            motion.status = MotionStatus::DiedNoSecond;
            let title = motion.title.clone();
            self.session.transcript.procedural(&format!(
                "Motion \"{title}\" died for lack of a second within the seconding window"
            ));
            return Err(EngineError::SecondingWindowExpired(motion_id.to_string()));
        }
        motion.status = MotionStatus::Seconded;
        motion.seconded_by = Some(seconder_id.to_string());
        motion.seconded_at = Some(Utc::now());
        let title = motion.title.clone();
        self.session
            .transcript
            .procedural(&format!("Motion \"{title}\" seconded by {seconder_id}"));
        self.session
            .transition(SessionPhase::Debate, "motion seconded")?;
        Ok(())
    }

    /// Run the full debate for a seconded motion.
    pub async fn run_debate(&mut self, motion_id: &str) -> Result<&DebateRecord, EngineError> {
        self.require_phase(SessionPhase::Debate)?;
        let motion = self
            .session
            .motion_mut(motion_id)
            .ok_or_else(|| EngineError::MotionNotFound(motion_id.to_string()))?;
        if motion.status != MotionStatus::Seconded {
            return Err(EngineError::WrongMotionStatus {
                motion_id: motion_id.to_string(),
                status: motion.status,
                expected: MotionStatus::Seconded,
            });
        }
        motion.status = MotionStatus::Debating;
        let motion_snapshot = motion.clone();

        let record = self
            .orchestrator
            .run(
                &self.session.session_id.clone(),
                &self.roster,
                &motion_snapshot,
                &mut self.session.transcript,
            )
            .await;
        self.debates.insert(motion_id.to_string(), record);
        self.session
            .transition(SessionPhase::Voting, "debate rounds complete")?;
        Ok(&self.debates[motion_id])
    }

    /// Collect every Archon's ballot, compute the optimistic tally, and
    /// hand validation to the background pipeline.
    pub async fn collect_votes(&mut self, motion_id: &str) -> Result<Tally, EngineError> {
        self.require_phase(SessionPhase::Voting)?;
        let session_id = self.session.session_id.clone();
        let debate = self
            .debates
            .get(motion_id)
            .cloned()
            .unwrap_or_else(|| DebateRecord {
                motion_id: motion_id.to_string(),
                rounds_completed: 0,
                final_stances: HashMap::new(),
                stance_explicit: HashMap::new(),
                consensus_breaks: 0,
                red_team: Vec::new(),
                violations: 0,
                last_digest: None,
            });

        let motion_idx = self
            .session
            .motions
            .iter()
            .position(|m| m.motion_id == motion_id)
            .ok_or_else(|| EngineError::MotionNotFound(motion_id.to_string()))?;
        {
            let motion = &mut self.session.motions[motion_idx];
            if motion.status != MotionStatus::Debating {
                return Err(EngineError::WrongMotionStatus {
                    motion_id: motion_id.to_string(),
                    status: motion.status,
                    expected: MotionStatus::Debating,
                });
            }
            motion.status = MotionStatus::Voting;
        }

        let tally = self
            .collector
            .collect(
                &session_id,
                &self.roster,
                &mut self.session.motions[motion_idx],
                &debate,
                &mut self.session.transcript,
                &self.validator,
            )
            .await;

        // Provisional result from the optimistic tally; reconciliation
        // may still flip it.
        let motion = &mut self.session.motions[motion_idx];
        let threshold = self.config.motion_threshold(motion.motion_type);
        let passed = tally.passes(threshold);
        motion.result = Some(VoteResult {
            tally,
            threshold,
            passed,
        });
        motion.status = if passed {
            MotionStatus::Passed
        } else {
            MotionStatus::Failed
        };
        motion.passed_at = passed.then(Utc::now);
        let title = motion.title.clone();
        self.session.transcript.procedural(&format!(
            "Optimistic tally on \"{title}\": {tally} (threshold {threshold:.3}, provisionally {})",
            if passed { "PASSES" } else { "FAILS" }
        ));
        self.session
            .transition(SessionPhase::NewBusiness, "all votes cast")?;
        Ok(tally)
    }

    /// Adjourn: drain the reconciliation gate, apply overrides, and
    /// close the session. On a drain timeout the session stays in
    /// `adjourning` and may retry; on a tally invariant violation the
    /// session fails terminally. No ledger write happens on either
    /// failure path.
    pub async fn adjourn(&mut self) -> Result<ReconciliationSummary, EngineError> {
        if self.session.phase == SessionPhase::NewBusiness {
            self.session
                .transition(SessionPhase::Adjourning, "agenda exhausted")?;
            self.session.transcript.procedural(
                "Adjournment moved; awaiting vote validation before the session closes.",
            );
        } else if self.session.phase != SessionPhase::Adjourning {
            return Err(PhaseError {
                from: self.session.phase,
                to: SessionPhase::Adjourning,
                reason: "adjournment requires new_business or a prior timed-out drain".to_string(),
            }
            .into());
        }

        if let Err(e) = self.gate.drain(self.config.reconciliation_timeout()).await {
            self.session.transcript.procedural(&format!(
                "RECONCILIATION TIMEOUT: adjournment blocked ({e}); the session remains open"
            ));
            return Err(e.into());
        }

        let session_id = self.session.session_id.clone();
        let summary = match self
            .gate
            .apply_overrides(
                &session_id,
                &mut self.session.motions,
                &mut self.session.transcript,
            )
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                self.session.transcript.procedural(&format!(
                    "RECONCILIATION ABORTED: {e}; the session is closed without a ledger write"
                ));
                self.session
                    .transition(SessionPhase::ReconciliationFailed, "tally invariant violated")?;
                return Err(e.into());
            }
        };

        self.session
            .transition(SessionPhase::Adjourned, "reconciliation complete")?;
        self.session
            .transcript
            .procedural("The Conclave stands adjourned.");
        let message = AuditMessage::new(
            topics::SESSIONS_TRANSCRIPTS,
            &session_id,
            serde_json::json!({
                "entries": self.session.transcript.len(),
                "motions": self.session.motions.len(),
                "overrides_applied": summary.overrides_applied,
            }),
        );
        if let Err(e) = self.audit.publish(message).await {
            info!(error = %e, "transcript publish rejected");
        }
        info!(session_id = %session_id, "session adjourned");
        Ok(summary)
    }

    /// Snapshot the session and its pending validations to disk.
    pub async fn checkpoint(&mut self, path: &Path) -> Result<SessionCheckpoint, EngineError> {
        self.checkpoint_seq += 1;
        self.session.checkpoints.push(self.checkpoint_seq);
        let pending_validations: Vec<PendingValidation> = self
            .validator
            .pending_payloads()
            .into_iter()
            .map(|payload| PendingValidation {
                vote_id: payload.vote_id.clone(),
                archon_id: payload.archon_id.clone(),
                optimistic_choice: payload.optimistic_choice,
                vote_payload: payload,
            })
            .collect();
        let checkpoint =
            SessionCheckpoint::new(self.checkpoint_seq, &self.session, pending_validations);
        save_checkpoint(path, &checkpoint)?;
        let message = AuditMessage::new(
            topics::SESSIONS_CHECKPOINTS,
            &self.session.session_id,
            serde_json::json!({
                "sequence": checkpoint.sequence,
                "pending_validations": checkpoint.pending_validations.len(),
            }),
        );
        if let Err(e) = self.audit.publish(message).await {
            info!(error = %e, "checkpoint publish rejected");
        }
        Ok(checkpoint)
    }

    fn require_phase(&self, expected: SessionPhase) -> Result<(), EngineError> {
        if self.session.phase != expected {
            return Err(PhaseError {
                from: self.session.phase,
                to: expected,
                reason: format!("operation requires phase {expected}"),
            }
            .into());
        }
        Ok(())
    }

    pub fn session(&self) -> &ConclaveSession {
        &self.session
    }

    pub fn validator(&self) -> &AsyncValidator {
        &self.validator
    }

    pub fn config(&self) -> &ConclaveConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archon::{test_roster, InMemoryProfileRepository};
    use crate::audit::BusAuditPublisher;
    use crate::invoker::ScriptedInvoker;
    use crate::motion::{test_motion, AdmissionRecord, RealmRef};
    use crate::voting::VoteChoice;
    use std::time::Duration;

    fn quick_config(roster_size: u32) -> ConclaveConfig {
        ConclaveConfig {
            archon_count: roster_size,
            debate_rounds: 1,
            red_team: crate::config::RedTeamConfig {
                enabled: false,
                ..Default::default()
            },
            consensus_break: crate::config::ConsensusBreakConfig {
                enabled: false,
                ..Default::default()
            },
            reconciliation_timeout_seconds: 10,
            ..Default::default()
        }
    }

    fn build_engine(roster_size: usize) -> (ConclaveEngine, Arc<ScriptedInvoker>, Arc<BusAuditPublisher>) {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.set_default_reply("STANCE: FOR\nThe motion serves the realm.");
        let audit = Arc::new(BusAuditPublisher::new());
        let profiles = Arc::new(InMemoryProfileRepository::new(test_roster(roster_size)).unwrap());
        let engine = ConclaveEngine::new(
            quick_config(roster_size as u32),
            profiles,
            invoker.clone(),
            audit.clone(),
        )
        .unwrap();
        (engine, invoker, audit)
    }

    fn admitted_motion(motion_id: &str) -> Motion {
        let mut motion = test_motion(motion_id, vec![RealmRef::primary("trade")]);
        motion.admission_record = Some(AdmissionRecord::admitted(false));
        motion
    }

    #[tokio::test]
    async fn test_open_records_roll_call() {
        let (mut engine, _invoker, _audit) = build_engine(6);
        engine.open().unwrap();
        assert_eq!(engine.session().phase, SessionPhase::NewBusiness);
        assert_eq!(engine.session().present_archons.len(), 6);
        assert!(engine
            .session()
            .transcript
            .entries()
            .iter()
            .any(|e| e.content.contains("Roll call: 6 Archons present")));
    }

    #[tokio::test]
    async fn test_unadmitted_motion_blocked_at_introduction() {
        let (mut engine, _invoker, _audit) = build_engine(6);
        engine.open().unwrap();
        let motion = test_motion("m-raw", vec![RealmRef::primary("trade")]);
        let err = engine.introduce_motion(motion).unwrap_err();
        assert!(matches!(err, EngineError::NotAdmitted(_)));
    }

    #[tokio::test]
    async fn test_full_motion_lifecycle() {
        let (mut engine, invoker, _audit) = build_engine(6);
        invoker.script_reply("archon-00", "STANCE: FOR\nOpening speech.");
        engine.open().unwrap();

        let motion_id = engine.introduce_motion(admitted_motion("m-1")).unwrap();
        engine.second_motion(&motion_id, "archon-01").unwrap();
        assert_eq!(engine.session().phase, SessionPhase::Debate);

        // Debate replies, then ballots.
        invoker.set_default_reply("STANCE: FOR\nSupport.");
        let record = engine.run_debate(&motion_id).await.unwrap();
        assert_eq!(record.rounds_completed, 1);
        assert_eq!(engine.session().phase, SessionPhase::Voting);

        invoker.set_default_reply("{\"choice\":\"AYE\"}\nSo moved.");
        let tally = engine.collect_votes(&motion_id).await.unwrap();
        assert_eq!(tally.ayes, 6);
        assert_eq!(engine.session().phase, SessionPhase::NewBusiness);

        let summary = engine.adjourn().await.unwrap();
        assert_eq!(summary.overrides_applied, 0);
        assert_eq!(engine.session().phase, SessionPhase::Adjourned);
        let motion = engine.session().motion(&motion_id).unwrap();
        assert_eq!(motion.status, MotionStatus::Passed);
    }

    #[tokio::test]
    async fn test_seconding_window_expiry() {
        let (mut engine, _invoker, _audit) = build_engine(6);
        engine.open().unwrap();
        let motion_id = engine.introduce_motion(admitted_motion("m-1")).unwrap();

        // Shrink the window after the fact by backdating the proposal.
        engine
            .session
            .motion_mut(&motion_id)
            .unwrap()
            .proposed_at = Utc::now() - chrono::Duration::seconds(600);

        let err = engine.second_motion(&motion_id, "archon-01").unwrap_err();
        assert!(matches!(err, EngineError::SecondingWindowExpired(_)));
        let motion = engine.session().motion(&motion_id).unwrap();
        assert_eq!(motion.status, MotionStatus::DiedNoSecond);
        // Control stays with new business.
        assert_eq!(engine.session().phase, SessionPhase::NewBusiness);
        assert!(engine
            .session()
            .transcript
            .entries()
            .iter()
            .any(|e| e.content.contains("died for lack of a second")));
    }

    #[tokio::test]
    async fn test_adjourn_timeout_keeps_session_open() {
        let (mut engine, invoker, _audit) = build_engine(6);
        engine.open().unwrap();
        let motion_id = engine.introduce_motion(admitted_motion("m-1")).unwrap();
        engine.second_motion(&motion_id, "archon-01").unwrap();
        engine.run_debate(&motion_id).await.unwrap();

        invoker.set_default_reply("{\"choice\":\"AYE\"}");
        invoker.set_validation_delay(Duration::from_secs(60));
        engine.collect_votes(&motion_id).await.unwrap();

        let mut config_override = engine.config.clone();
        config_override.reconciliation_timeout_seconds = 1;
        engine.config = config_override;

        let err = engine.adjourn().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Reconcile(ReconcileError::Incomplete { .. })
        ));
        assert_eq!(engine.session().phase, SessionPhase::Adjourning);
        assert!(engine
            .session()
            .transcript
            .entries()
            .iter()
            .any(|e| e.content.contains("RECONCILIATION TIMEOUT")));
    }

    #[tokio::test]
    async fn test_checkpoint_and_resume_resubmits_pending() {
        let (mut engine, invoker, _audit) = build_engine(3);
        engine.open().unwrap();
        let motion_id = engine.introduce_motion(admitted_motion("m-1")).unwrap();
        engine.second_motion(&motion_id, "archon-01").unwrap();
        engine.run_debate(&motion_id).await.unwrap();

        invoker.set_default_reply("{\"choice\":\"AYE\"}");
        invoker.set_validation_delay(Duration::from_secs(60));
        engine.collect_votes(&motion_id).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let checkpoint = engine.checkpoint(&path).await.unwrap();
        assert_eq!(checkpoint.pending_validations.len(), 3);

        // A fresh engine resumes and re-submits the pending work against
        // a fast invoker.
        let resumed_invoker = Arc::new(ScriptedInvoker::new());
        resumed_invoker.set_default_reply("{\"choice\":\"AYE\"}");
        let profiles = Arc::new(InMemoryProfileRepository::new(test_roster(3)).unwrap());
        let audit = Arc::new(BusAuditPublisher::new());
        let mut resumed = ConclaveEngine::resume_from_checkpoint(
            quick_config(3),
            profiles,
            resumed_invoker,
            audit,
            &path,
        )
        .unwrap();

        assert_eq!(resumed.session().phase, SessionPhase::NewBusiness);
        assert_eq!(resumed.session().transcript.len(), engine.session().transcript.len());

        let summary = resumed.adjourn().await.unwrap();
        assert_eq!(summary.jobs_reviewed, 3);
        assert_eq!(resumed.session().phase, SessionPhase::Adjourned);
    }

    #[tokio::test]
    async fn test_override_flow_through_engine() {
        let (mut engine, invoker, audit) = build_engine(6);
        engine.open().unwrap();
        let motion_id = engine.introduce_motion(admitted_motion("m-1")).unwrap();
        engine.second_motion(&motion_id, "archon-01").unwrap();
        engine.run_debate(&motion_id).await.unwrap();

        invoker.set_default_reply("{\"choice\":\"AYE\"}");
        invoker.script_reply("archon-02", "I am persuaded, let it be so.");
        invoker.set_validation_choice("archon-02", VoteChoice::Aye);
        let tally = engine.collect_votes(&motion_id).await.unwrap();
        assert_eq!(tally.abstentions, 1);

        let summary = engine.adjourn().await.unwrap();
        assert_eq!(summary.overrides_applied, 1);
        let motion = engine.session().motion(&motion_id).unwrap();
        assert_eq!(motion.result.unwrap().tally.ayes, 6);
        assert!(!audit
            .history_for(crate::audit::topics::VOTES_OVERRIDES)
            .is_empty());
    }
}
