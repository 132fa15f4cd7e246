//! Three-tier asynchronous vote validator.
//!
//! Submitting a vote is non-blocking: a task runs the three phase-1
//! deliberations concurrently, then the phase-2 witness adjudication.
//! One semaphore of capacity `voting_concurrency` gates every LLM call
//! across every job. Individual task failures never raise; they become
//! fallback results, and the adjudicator's decision table absorbs them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::audit::{topics, AuditMessage, AuditPublisher};
use crate::config::ConclaveConfig;
use crate::invoker::{AgentInvoker, InvokerError};

use super::adjudication::{
    AdjudicationResult, Adjudicator, ConsensusStrategy, DeliberatorKind, DeliberatorResult,
    MajorityStrategy, WitnessAdjudication,
};
use super::{VoteChoice, VotePayload};

/// One-shot completion flag: set once, awaited by the drain.
#[derive(Default)]
pub struct CompletionFlag {
    done: AtomicBool,
    notify: Notify,
}

impl CompletionFlag {
    pub fn set(&self) {
        self.done.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Wait until set. Registration happens before the flag check, so a
    /// racing `set` cannot be missed.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// A completed validation job.
#[derive(Debug, Clone)]
pub struct ValidationJob {
    pub vote_id: String,
    pub payload: VotePayload,
    pub optimistic_choice: VoteChoice,
    pub deliberations: Vec<DeliberatorResult>,
    pub adjudication: AdjudicationResult,
    pub completed_at: DateTime<Utc>,
}

impl ValidationJob {
    /// Whether reconciliation must overwrite the optimistic choice.
    pub fn override_required(&self) -> bool {
        self.adjudication.final_vote != self.optimistic_choice
    }
}

/// Snapshot of validator load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorStatus {
    pub pending: usize,
    pub completed: usize,
    /// Set once a semaphore wait exceeded the saturation threshold.
    pub degraded: bool,
}

struct PendingEntry {
    flag: Arc<CompletionFlag>,
    payload: VotePayload,
}

#[derive(Default)]
struct ValidatorState {
    pending: HashMap<String, PendingEntry>,
    completed: HashMap<String, ValidationJob>,
}

struct ValidatorInner {
    invoker: Arc<dyn AgentInvoker>,
    audit: Arc<dyn AuditPublisher>,
    adjudicator: Adjudicator,
    semaphore: Arc<Semaphore>,
    state: Mutex<ValidatorState>,
    task_timeout: Duration,
    saturation_warn: Duration,
    degraded: AtomicBool,
    secretary_text_id: String,
    secretary_json_id: String,
    witness_id: String,
}

/// The validator. Cheap to clone; all clones share one semaphore and
/// one job map.
#[derive(Clone)]
pub struct AsyncValidator {
    inner: Arc<ValidatorInner>,
}

impl AsyncValidator {
    pub fn new(
        invoker: Arc<dyn AgentInvoker>,
        audit: Arc<dyn AuditPublisher>,
        config: &ConclaveConfig,
    ) -> Self {
        Self::with_strategy(invoker, audit, config, Arc::new(MajorityStrategy))
    }

    /// Swap in a different consensus strategy (weighted, unanimity).
    pub fn with_strategy(
        invoker: Arc<dyn AgentInvoker>,
        audit: Arc<dyn AuditPublisher>,
        config: &ConclaveConfig,
        strategy: Arc<dyn ConsensusStrategy>,
    ) -> Self {
        Self {
            inner: Arc::new(ValidatorInner {
                invoker,
                audit,
                adjudicator: Adjudicator::new(strategy),
                semaphore: Arc::new(Semaphore::new(config.voting_concurrency)),
                state: Mutex::new(ValidatorState::default()),
                task_timeout: config.task_timeout(),
                saturation_warn: config.saturation_warn(),
                degraded: AtomicBool::new(false),
                secretary_text_id: config.roles.secretary_text.clone(),
                secretary_json_id: config.roles.secretary_json.clone(),
                witness_id: config.roles.witness.clone(),
            }),
        }
    }

    /// Submit one vote for validation. Returns immediately; the caller
    /// moves on to the next Archon without awaiting anything.
    pub fn submit(&self, payload: VotePayload) {
        let flag = Arc::new(CompletionFlag::default());
        {
            let mut state = self.inner.state.lock().expect("validator state poisoned");
            if state.pending.contains_key(&payload.vote_id)
                || state.completed.contains_key(&payload.vote_id)
            {
                debug!(vote_id = %payload.vote_id, "duplicate submission ignored");
                return;
            }
            state.pending.insert(
                payload.vote_id.clone(),
                PendingEntry {
                    flag: flag.clone(),
                    payload: payload.clone(),
                },
            );
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            run_job(inner, payload, flag).await;
        });
    }

    /// Current load snapshot.
    pub fn status(&self) -> ValidatorStatus {
        let state = self.inner.state.lock().expect("validator state poisoned");
        ValidatorStatus {
            pending: state.pending.len(),
            completed: state.completed.len(),
            degraded: self.inner.degraded.load(Ordering::Relaxed),
        }
    }

    /// Vote ids still validating.
    pub fn pending_vote_ids(&self) -> Vec<String> {
        let state = self.inner.state.lock().expect("validator state poisoned");
        let mut ids: Vec<String> = state.pending.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Payloads of still-pending jobs, for checkpointing.
    pub fn pending_payloads(&self) -> Vec<VotePayload> {
        let state = self.inner.state.lock().expect("validator state poisoned");
        let mut payloads: Vec<VotePayload> =
            state.pending.values().map(|e| e.payload.clone()).collect();
        payloads.sort_by(|a, b| a.vote_id.cmp(&b.vote_id));
        payloads
    }

    /// Completed jobs, cloned out.
    pub fn completed_jobs(&self) -> Vec<ValidationJob> {
        let state = self.inner.state.lock().expect("validator state poisoned");
        let mut jobs: Vec<ValidationJob> = state.completed.values().cloned().collect();
        jobs.sort_by(|a, b| a.vote_id.cmp(&b.vote_id));
        jobs
    }

    /// Bulk wait on every pending job's completion flag under a single
    /// timeout budget. `Err` carries the votes still unresolved.
    pub async fn wait_all(&self, timeout: Duration) -> Result<(), Vec<String>> {
        let flags: Vec<(String, Arc<CompletionFlag>)> = {
            let state = self.inner.state.lock().expect("validator state poisoned");
            state
                .pending
                .iter()
                .map(|(id, entry)| (id.clone(), entry.flag.clone()))
                .collect()
        };
        if flags.is_empty() {
            return Ok(());
        }
        let all_done = futures::future::join_all(flags.iter().map(|(_, flag)| flag.wait()));
        match tokio::time::timeout(timeout, all_done).await {
            Ok(_) => Ok(()),
            Err(_) => Err(self.pending_vote_ids()),
        }
    }
}

/// Acquire the shared semaphore, flagging degraded mode on a long wait.
async fn acquire_gate(inner: &ValidatorInner) -> Option<tokio::sync::OwnedSemaphorePermit> {
    let started = Instant::now();
    let permit = inner.semaphore.clone().acquire_owned().await.ok()?;
    let waited = started.elapsed();
    if waited > inner.saturation_warn && !inner.degraded.swap(true, Ordering::Relaxed) {
        warn!(
            waited_ms = waited.as_millis() as u64,
            "validator limiter saturated; continuing in degraded mode"
        );
    }
    Some(permit)
}

async fn phase1_task(
    inner: &ValidatorInner,
    kind: DeliberatorKind,
    payload: &VotePayload,
) -> DeliberatorResult {
    let validator_id = match kind {
        DeliberatorKind::TextAnalysis => &inner.secretary_text_id,
        DeliberatorKind::JsonValidation => &inner.secretary_json_id,
        DeliberatorKind::WitnessConfirm => &inner.witness_id,
    };
    let Some(_permit) = acquire_gate(inner).await else {
        return DeliberatorResult::failed(kind, "limiter closed");
    };
    let call = inner
        .invoker
        .execute_validation_task(kind, validator_id, payload);
    match tokio::time::timeout(inner.task_timeout, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => DeliberatorResult::failed(kind, &e.to_string()),
        Err(_) => DeliberatorResult::failed(
            kind,
            &format!("timed out after {:?}", inner.task_timeout),
        ),
    }
}

async fn phase2_adjudication(
    inner: &ValidatorInner,
    payload: &VotePayload,
    deliberations: &[DeliberatorResult],
) -> Result<WitnessAdjudication, InvokerError> {
    let Some(_permit) = acquire_gate(inner).await else {
        return Err(InvokerError::Transport("limiter closed".to_string()));
    };
    let call = inner
        .invoker
        .execute_witness_adjudication(&inner.witness_id, payload, deliberations);
    match tokio::time::timeout(inner.task_timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(InvokerError::Timeout(inner.task_timeout)),
    }
}

async fn run_job(inner: Arc<ValidatorInner>, payload: VotePayload, flag: Arc<CompletionFlag>) {
    let vote_id = payload.vote_id.clone();
    publish(
        &inner,
        AuditMessage::new(
            topics::VOTES_VALIDATION_STARTED,
            &payload.session_id,
            serde_json::json!({ "optimistic_choice": payload.optimistic_choice }),
        )
        .motion(&payload.motion_id)
        .vote(&vote_id),
    )
    .await;

    // Phase 1: all three tiers concurrently, failures absorbed.
    let (text, json, witness) = tokio::join!(
        phase1_task(&inner, DeliberatorKind::TextAnalysis, &payload),
        phase1_task(&inner, DeliberatorKind::JsonValidation, &payload),
        phase1_task(&inner, DeliberatorKind::WitnessConfirm, &payload),
    );
    let deliberations = vec![text, json, witness];

    publish(
        &inner,
        AuditMessage::new(
            topics::VOTES_DELIBERATION_RESULTS,
            &payload.session_id,
            serde_json::json!({
                "choices": deliberations.iter().map(|d| d.vote_choice).collect::<Vec<_>>(),
                "failures": deliberations.iter().filter(|d| !d.parse_success).count(),
            }),
        )
        .motion(&payload.motion_id)
        .vote(&vote_id),
    )
    .await;

    // Phase 2: the witness reviews, unless there is nothing to review.
    let any_usable = deliberations.iter().any(DeliberatorResult::is_usable);
    let witness_call = if any_usable {
        phase2_adjudication(&inner, &payload, &deliberations).await
    } else {
        Err(InvokerError::Transport(
            "all phase-1 tasks failed; adjudication skipped".to_string(),
        ))
    };

    let adjudication = inner.adjudicator.adjudicate(
        &vote_id,
        payload.optimistic_choice,
        &deliberations,
        witness_call,
    );

    if let Some(statement) = &adjudication.witness_statement {
        publish(
            &inner,
            AuditMessage::new(
                topics::WITNESS_STATEMENTS,
                &payload.session_id,
                serde_json::json!({ "statement": statement, "ruling": adjudication.ruling }),
            )
            .motion(&payload.motion_id)
            .vote(&vote_id),
        )
        .await;
    }
    if adjudication.non_consensus {
        publish(
            &inner,
            AuditMessage::new(
                topics::CONSENSUS_FAILURES,
                &payload.session_id,
                serde_json::json!({ "reason": adjudication.reason }),
            )
            .motion(&payload.motion_id)
            .vote(&vote_id),
        )
        .await;
    }

    let job = ValidationJob {
        vote_id: vote_id.clone(),
        optimistic_choice: payload.optimistic_choice,
        payload,
        deliberations,
        adjudication,
        completed_at: Utc::now(),
    };

    let validated_message = AuditMessage::new(
        topics::VOTES_VALIDATED,
        &job.payload.session_id,
        serde_json::json!({
            "final_vote": job.adjudication.final_vote,
            "ruling": job.adjudication.ruling,
            "override_required": job.override_required(),
        }),
    )
    .motion(&job.payload.motion_id)
    .vote(&vote_id);

    {
        let mut state = inner.state.lock().expect("validator state poisoned");
        state.pending.remove(&vote_id);
        state.completed.insert(vote_id.clone(), job);
    }
    flag.set();
    publish(&inner, validated_message).await;
    debug!(vote_id, "validation job completed");
}

async fn publish(inner: &ValidatorInner, message: AuditMessage) {
    if let Err(e) = inner.audit.publish(message).await {
        // Audit is off the critical path; a failed publish is a log line.
        info!(error = %e, "audit publish rejected");
    }
}
