//! Reconciliation gate — the hard gate between voting and adjournment.
//!
//! `drain` bulk-waits every pending validation under one timeout
//! budget; overrides are applied keyed by vote id (set, never
//! incremented, so a replay is a no-op); tallies are recomputed under
//! the sum invariant. No mandate is written unless this gate passes.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::{topics, AuditMessage, AuditPublisher};
use crate::config::ConclaveConfig;
use crate::motion::{Motion, MotionStatus, VoteResult};
use crate::transcript::Transcript;

use super::validator::{AsyncValidator, ValidationJob};
use super::Tally;

/// Reconciliation failures. Both variants are hard gates: the session
/// cannot adjourn and the ledger is not written.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The drain budget expired with validations still pending.
    #[error("reconciliation incomplete after {timeout:?}; {} votes unresolved: {pending_vote_ids:?}", pending_vote_ids.len())]
    Incomplete {
        timeout: Duration,
        pending_vote_ids: Vec<String>,
    },

    /// A recomputed tally failed `ayes + nays + abstentions == |votes|`.
    #[error("tally invariant violation on motion {motion_id}: {ayes} + {nays} + {abstentions} != {vote_count}")]
    TallyInvariantViolation {
        motion_id: String,
        ayes: u32,
        nays: u32,
        abstentions: u32,
        vote_count: usize,
    },
}

/// What reconciliation did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub jobs_reviewed: usize,
    pub overrides_applied: usize,
    pub motions_recomputed: Vec<String>,
    pub results_changed: Vec<String>,
}

/// The gate. Borrows the validator's completed jobs and rewrites motion
/// state under the session's thread of control.
pub struct ReconciliationGate {
    validator: AsyncValidator,
    audit: std::sync::Arc<dyn AuditPublisher>,
    config: ConclaveConfig,
}

impl ReconciliationGate {
    pub fn new(
        validator: AsyncValidator,
        audit: std::sync::Arc<dyn AuditPublisher>,
        config: ConclaveConfig,
    ) -> Self {
        Self {
            validator,
            audit,
            config,
        }
    }

    /// Await every pending validation under a single timeout budget.
    pub async fn drain(&self, timeout: Duration) -> Result<(), ReconcileError> {
        self.validator
            .wait_all(timeout)
            .await
            .map_err(|pending_vote_ids| {
                warn!(
                    pending = pending_vote_ids.len(),
                    "reconciliation drain timed out"
                );
                ReconcileError::Incomplete {
                    timeout,
                    pending_vote_ids,
                }
            })
    }

    /// Apply validated outcomes to the session's motions and recompute
    /// affected tallies. Idempotent: overrides are keyed by vote id and
    /// assign, never accumulate.
    pub async fn apply_overrides(
        &self,
        session_id: &str,
        motions: &mut [Motion],
        transcript: &mut Transcript,
    ) -> Result<ReconciliationSummary, ReconcileError> {
        let jobs = self.validator.completed_jobs();
        let mut summary = ReconciliationSummary {
            jobs_reviewed: jobs.len(),
            ..Default::default()
        };
        let mut affected: BTreeSet<String> = BTreeSet::new();

        for job in &jobs {
            let Some(motion) = motions
                .iter_mut()
                .find(|m| m.motion_id == job.payload.motion_id)
            else {
                warn!(vote_id = %job.vote_id, "validated vote references unknown motion");
                continue;
            };
            let Some(vote) = motion.votes.iter_mut().find(|v| v.vote_id == job.vote_id) else {
                warn!(vote_id = %job.vote_id, "validated vote not found on motion");
                continue;
            };

            vote.validated_choice = Some(job.adjudication.final_vote);
            vote.witness_ruling = Some(job.adjudication.ruling.to_string());

            if !job.override_required() {
                continue;
            }
            if !vote.override_applied {
                transcript.procedural(&format!(
                    "Vote correction for {archon} on \"{title}\": optimistic {original} \
                     overridden to validated {validated} (witness ruling {ruling}; {reason})",
                    archon = vote.archon_id,
                    title = motion.title,
                    original = job.optimistic_choice,
                    validated = job.adjudication.final_vote,
                    ruling = job.adjudication.ruling,
                    reason = job.adjudication.reason,
                ));
                vote.reasoning
                    .push_str(&format!(" [Validated: {}]", job.adjudication.final_vote));
                summary.overrides_applied += 1;
                self.publish_override(session_id, job).await;
            }
            vote.choice = job.adjudication.final_vote;
            vote.override_applied = true;
            affected.insert(motion.motion_id.clone());
        }

        for motion_id in affected {
            let motion = motions
                .iter_mut()
                .find(|m| m.motion_id == motion_id)
                .expect("affected id came from this slice");
            self.recompute(motion, transcript)?;
            summary.motions_recomputed.push(motion_id.clone());
            if motion
                .result
                .as_ref()
                .is_some_and(|r| r.passed != matches!(motion.status, MotionStatus::Passed))
            {
                summary.results_changed.push(motion_id);
            }
        }

        // Result flips finalize here, after recompute.
        for motion_id in &summary.results_changed {
            if let Some(motion) = motions.iter_mut().find(|m| &m.motion_id == motion_id) {
                let passed = motion.result.as_ref().is_some_and(|r| r.passed);
                motion.status = if passed {
                    MotionStatus::Passed
                } else {
                    MotionStatus::Failed
                };
                motion.passed_at = passed.then(Utc::now);
                transcript.procedural(&format!(
                    "Result changed after validation: \"{}\" is now {}",
                    motion.title, motion.status
                ));
            }
        }

        let batch = AuditMessage::new(
            topics::VOTES_OVERRIDES,
            session_id,
            serde_json::json!({
                "batch_summary": true,
                "jobs_reviewed": summary.jobs_reviewed,
                "overrides_applied": summary.overrides_applied,
                "results_changed": summary.results_changed,
            }),
        );
        if let Err(e) = self.audit.publish(batch).await {
            info!(error = %e, "override batch publish rejected");
        }

        info!(
            session_id,
            overrides = summary.overrides_applied,
            recomputed = summary.motions_recomputed.len(),
            "reconciliation applied"
        );
        Ok(summary)
    }

    async fn publish_override(&self, session_id: &str, job: &ValidationJob) {
        let message = AuditMessage::new(
            topics::VOTES_OVERRIDES,
            session_id,
            serde_json::json!({
                "original": job.optimistic_choice,
                "validated": job.adjudication.final_vote,
                "ruling": job.adjudication.ruling,
            }),
        )
        .motion(&job.payload.motion_id)
        .vote(&job.vote_id);
        if let Err(e) = self.audit.publish(message).await {
            info!(error = %e, "override publish rejected");
        }
    }

    /// Recompute one motion's tally from final votes, enforcing the sum
    /// invariant and the per-type threshold.
    fn recompute(
        &self,
        motion: &mut Motion,
        transcript: &mut Transcript,
    ) -> Result<(), ReconcileError> {
        let mut tally = Tally::default();
        for vote in &motion.votes {
            tally.record(vote.choice);
        }
        if tally.total() as usize != motion.votes.len() {
            return Err(ReconcileError::TallyInvariantViolation {
                motion_id: motion.motion_id.clone(),
                ayes: tally.ayes,
                nays: tally.nays,
                abstentions: tally.abstentions,
                vote_count: motion.votes.len(),
            });
        }
        let threshold = self.config.motion_threshold(motion.motion_type);
        let passed = tally.passes(threshold);
        motion.result = Some(VoteResult {
            tally,
            threshold,
            passed,
        });
        transcript.procedural(&format!(
            "Recomputed tally for \"{}\": {tally} (threshold {threshold:.3}, {})",
            motion.title,
            if passed { "PASSES" } else { "FAILS" },
        ));
        Ok(())
    }
}
