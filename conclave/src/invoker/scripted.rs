//! Scripted invoker — deterministic canned replies for tests.
//!
//! Replies are keyed by Archon id and consumed in order; validation
//! behavior is programmable per voter. The invoker also tracks its
//! concurrency high-water mark so tests can assert the bounded-
//! concurrency invariant from the outside.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::voting::adjudication::{
    ConsensusStrategy, DeliberatorKind, DeliberatorResult, MajorityStrategy, WitnessAdjudication,
};
use crate::voting::{VoteChoice, VotePayload};

use super::{AgentInvoker, InvokerError, InvokerResponse};

#[derive(Default)]
struct ScriptState {
    replies: HashMap<String, VecDeque<String>>,
    default_reply: Option<String>,
    validation_choices: HashMap<String, VoteChoice>,
    tier_choices: HashMap<(String, DeliberatorKind), VoteChoice>,
    failing_tiers: HashSet<(String, DeliberatorKind)>,
    failing_adjudications: HashSet<String>,
    adjudications: HashMap<String, WitnessAdjudication>,
    invoke_delay: Duration,
    validation_delay: Duration,
}

/// Deterministic invoker for unit and end-to-end tests.
pub struct ScriptedInvoker {
    state: Mutex<ScriptState>,
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
    total_calls: AtomicUsize,
}

struct FlightGuard<'a> {
    invoker: &'a ScriptedInvoker,
}

impl<'a> FlightGuard<'a> {
    fn enter(invoker: &'a ScriptedInvoker) -> Self {
        let now = invoker.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        invoker.high_water.fetch_max(now, Ordering::SeqCst);
        invoker.total_calls.fetch_add(1, Ordering::SeqCst);
        Self { invoker }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.invoker.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for ScriptedInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ScriptState::default()),
            in_flight: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
            total_calls: AtomicUsize::new(0),
        }
    }

    /// Queue the next reply for `archon_id`; consumed in FIFO order.
    pub fn script_reply(&self, archon_id: &str, reply: &str) {
        self.state
            .lock()
            .expect("script state poisoned")
            .replies
            .entry(archon_id.to_string())
            .or_default()
            .push_back(reply.to_string());
    }

    /// Reply used when no scripted reply is queued. Without one, an
    /// unscripted invocation fails with a transport error.
    pub fn set_default_reply(&self, reply: &str) {
        self.state.lock().expect("script state poisoned").default_reply = Some(reply.to_string());
    }

    /// All three deliberators report this choice for votes cast by
    /// `voter_archon_id`. Without a script, deliberators echo the
    /// optimistic choice.
    pub fn set_validation_choice(&self, voter_archon_id: &str, choice: VoteChoice) {
        self.state
            .lock()
            .expect("script state poisoned")
            .validation_choices
            .insert(voter_archon_id.to_string(), choice);
    }

    /// A single tier reports this choice for votes cast by
    /// `voter_archon_id`, overriding [`Self::set_validation_choice`].
    pub fn set_deliberator_choice(
        &self,
        voter_archon_id: &str,
        kind: DeliberatorKind,
        choice: VoteChoice,
    ) {
        self.state
            .lock()
            .expect("script state poisoned")
            .tier_choices
            .insert((voter_archon_id.to_string(), kind), choice);
    }

    /// The given tier fails for votes cast by `voter_archon_id`.
    pub fn fail_deliberator(&self, voter_archon_id: &str, kind: DeliberatorKind) {
        self.state
            .lock()
            .expect("script state poisoned")
            .failing_tiers
            .insert((voter_archon_id.to_string(), kind));
    }

    /// All three tiers fail for votes cast by `voter_archon_id`.
    pub fn fail_all_deliberators(&self, voter_archon_id: &str) {
        for kind in DeliberatorKind::all() {
            self.fail_deliberator(voter_archon_id, kind);
        }
    }

    /// The phase-2 adjudication call fails for votes cast by
    /// `voter_archon_id`.
    pub fn fail_adjudication(&self, voter_archon_id: &str) {
        self.state
            .lock()
            .expect("script state poisoned")
            .failing_adjudications
            .insert(voter_archon_id.to_string());
    }

    /// Fixed adjudication outcome for votes cast by `voter_archon_id`.
    pub fn set_adjudication(&self, voter_archon_id: &str, adjudication: WitnessAdjudication) {
        self.state
            .lock()
            .expect("script state poisoned")
            .adjudications
            .insert(voter_archon_id.to_string(), adjudication);
    }

    /// Simulated latency for free-form invocations.
    pub fn set_invoke_delay(&self, delay: Duration) {
        self.state.lock().expect("script state poisoned").invoke_delay = delay;
    }

    /// Simulated latency for every validation and adjudication call.
    pub fn set_validation_delay(&self, delay: Duration) {
        self.state.lock().expect("script state poisoned").validation_delay = delay;
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_concurrent(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    /// Total calls served (all three entry points).
    pub fn calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self, archon_id: &str) -> Option<String> {
        let mut state = self.state.lock().expect("script state poisoned");
        if let Some(queue) = state.replies.get_mut(archon_id) {
            if let Some(reply) = queue.pop_front() {
                return Some(reply);
            }
        }
        state.default_reply.clone()
    }

    fn validation_behavior(
        &self,
        voter: &str,
        kind: DeliberatorKind,
        fallback: VoteChoice,
    ) -> (Result<VoteChoice, ()>, Duration) {
        let state = self.state.lock().expect("script state poisoned");
        let delay = state.validation_delay;
        if state.failing_tiers.contains(&(voter.to_string(), kind)) {
            return (Err(()), delay);
        }
        let choice = state
            .tier_choices
            .get(&(voter.to_string(), kind))
            .or_else(|| state.validation_choices.get(voter))
            .copied()
            .unwrap_or(fallback);
        (Ok(choice), delay)
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        archon_id: &str,
        _prompt: &str,
        timeout: Duration,
    ) -> Result<InvokerResponse, InvokerError> {
        let _guard = FlightGuard::enter(self);
        let delay = self.state.lock().expect("script state poisoned").invoke_delay;
        if !delay.is_zero() {
            if delay >= timeout {
                tokio::time::sleep(timeout).await;
                return Err(InvokerError::Timeout(timeout));
            }
            tokio::time::sleep(delay).await;
        }
        match self.next_reply(archon_id) {
            Some(reply) => Ok(InvokerResponse::new(&reply, delay.as_millis() as u64)),
            None => Err(InvokerError::Transport(format!(
                "no scripted reply for {archon_id}"
            ))),
        }
    }

    async fn execute_validation_task(
        &self,
        kind: DeliberatorKind,
        _validator_archon_id: &str,
        payload: &VotePayload,
    ) -> Result<DeliberatorResult, InvokerError> {
        let _guard = FlightGuard::enter(self);
        let (behavior, delay) =
            self.validation_behavior(&payload.archon_id, kind, payload.optimistic_choice);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match behavior {
            Ok(choice) => Ok(match kind {
                DeliberatorKind::TextAnalysis => {
                    DeliberatorResult::text_analysis(choice, 0.9, "scripted prose read")
                }
                DeliberatorKind::JsonValidation => DeliberatorResult::json_validation(choice, true),
                DeliberatorKind::WitnessConfirm => DeliberatorResult::witness_confirm(choice, true),
            }),
            Err(()) => Err(InvokerError::Transport(format!(
                "scripted {kind} failure for {}",
                payload.archon_id
            ))),
        }
    }

    async fn execute_witness_adjudication(
        &self,
        _witness_archon_id: &str,
        payload: &VotePayload,
        deliberations: &[DeliberatorResult],
    ) -> Result<WitnessAdjudication, InvokerError> {
        let _guard = FlightGuard::enter(self);
        let (scripted, failing, delay) = {
            let state = self.state.lock().expect("script state poisoned");
            (
                state.adjudications.get(&payload.archon_id).cloned(),
                state.failing_adjudications.contains(&payload.archon_id),
                state.validation_delay,
            )
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(InvokerError::Transport(format!(
                "scripted adjudication failure for {}",
                payload.archon_id
            )));
        }
        if let Some(adjudication) = scripted {
            return Ok(adjudication);
        }
        // Behave like a faithful witness: side with the phase-1 majority,
        // decline to rule when there is none.
        let usable: Vec<VoteChoice> = deliberations
            .iter()
            .filter(|r| r.is_usable())
            .filter_map(|r| r.vote_choice)
            .collect();
        Ok(WitnessAdjudication {
            final_vote: MajorityStrategy.resolve(&usable),
            retort: false,
            retort_reason: None,
            witness_statement: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_for(voter: &str) -> VotePayload {
        VotePayload {
            vote_id: "v-1".to_string(),
            session_id: "s-1".to_string(),
            motion_id: "m-1".to_string(),
            archon_id: voter.to_string(),
            raw_content: "{\"choice\":\"AYE\"}".to_string(),
            optimistic_choice: VoteChoice::Aye,
            motion_title: "t".to_string(),
            motion_text: "x".to_string(),
        }
    }

    #[tokio::test]
    async fn test_scripted_replies_fifo() {
        let invoker = ScriptedInvoker::new();
        invoker.script_reply("archon-00", "first");
        invoker.script_reply("archon-00", "second");

        let r1 = invoker
            .invoke("archon-00", "p", Duration::from_secs(1))
            .await
            .unwrap();
        let r2 = invoker
            .invoke("archon-00", "p", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(r1.raw_content, "first");
        assert_eq!(r2.raw_content, "second");
    }

    #[tokio::test]
    async fn test_default_reply_and_unscripted_failure() {
        let invoker = ScriptedInvoker::new();
        let err = invoker
            .invoke("archon-00", "p", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, InvokerError::Transport(_)));

        invoker.set_default_reply("STANCE: NEUTRAL\nPresent.");
        let r = invoker
            .invoke("archon-00", "p", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(r.raw_content.contains("NEUTRAL"));
    }

    #[tokio::test]
    async fn test_validation_echoes_optimistic_by_default() {
        let invoker = ScriptedInvoker::new();
        let result = invoker
            .execute_validation_task(DeliberatorKind::TextAnalysis, "w", &payload_for("a"))
            .await
            .unwrap();
        assert_eq!(result.vote_choice, Some(VoteChoice::Aye));
    }

    #[tokio::test]
    async fn test_scripted_validation_choice() {
        let invoker = ScriptedInvoker::new();
        invoker.set_validation_choice("a", VoteChoice::Nay);
        let result = invoker
            .execute_validation_task(DeliberatorKind::JsonValidation, "w", &payload_for("a"))
            .await
            .unwrap();
        assert_eq!(result.vote_choice, Some(VoteChoice::Nay));
    }

    #[tokio::test]
    async fn test_failing_tier() {
        let invoker = ScriptedInvoker::new();
        invoker.fail_deliberator("a", DeliberatorKind::WitnessConfirm);
        let err = invoker
            .execute_validation_task(DeliberatorKind::WitnessConfirm, "w", &payload_for("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, InvokerError::Transport(_)));
    }

    #[tokio::test]
    async fn test_adjudication_majority_default() {
        let invoker = ScriptedInvoker::new();
        let deliberations = vec![
            DeliberatorResult::text_analysis(VoteChoice::Nay, 0.9, ""),
            DeliberatorResult::json_validation(VoteChoice::Nay, true),
            DeliberatorResult::witness_confirm(VoteChoice::Aye, true),
        ];
        let adj = invoker
            .execute_witness_adjudication("w", &payload_for("a"), &deliberations)
            .await
            .unwrap();
        assert_eq!(adj.final_vote, Some(VoteChoice::Nay));
    }

    #[tokio::test]
    async fn test_concurrency_accounting() {
        let invoker = std::sync::Arc::new(ScriptedInvoker::new());
        invoker.set_default_reply("ok");
        invoker.set_invoke_delay(Duration::from_millis(20));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let invoker = invoker.clone();
            handles.push(tokio::spawn(async move {
                invoker.invoke("a", "p", Duration::from_secs(1)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(invoker.max_concurrent() >= 2);
        assert_eq!(invoker.calls(), 4);
    }
}
