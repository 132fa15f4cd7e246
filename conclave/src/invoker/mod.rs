//! Agent invocation port — the engine's only doorway to LLM providers.
//!
//! The core is provider-agnostic: per-Archon model binding lives in
//! profile records and is honored by implementations, never by callers.
//! [`HttpAgentInvoker`] speaks an OpenAI-compatible API; tests use the
//! deterministic [`ScriptedInvoker`].

pub mod http;
pub mod scripted;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::voting::adjudication::{DeliberatorKind, DeliberatorResult, WitnessAdjudication};
use crate::voting::VotePayload;

pub use http::HttpAgentInvoker;
pub use scripted::ScriptedInvoker;

/// Error from an invocation attempt. Callers treat every variant as
/// transient: retried per [`RetryPolicy`], then absorbed into fallback
/// results rather than propagated.
#[derive(Debug, Clone, Error)]
pub enum InvokerError {
    #[error("invocation timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("provider returned status {status}: {detail}")]
    Provider { status: u16, detail: String },

    #[error("provider reply was empty")]
    EmptyReply,

    #[error("provider reply was malformed: {0}")]
    Malformed(String),

    #[error("no profile for archon `{0}`")]
    UnknownArchon(String),
}

/// A successful invocation.
#[derive(Debug, Clone)]
pub struct InvokerResponse {
    /// The model's reply, unmodified.
    pub raw_content: String,
    /// Wall-clock latency of the call.
    pub latency_ms: u64,
    /// Implementation-defined extras (model name, token counts).
    pub metadata: HashMap<String, String>,
}

impl InvokerResponse {
    pub fn new(raw_content: &str, latency_ms: u64) -> Self {
        Self {
            raw_content: raw_content.to_string(),
            latency_ms,
            metadata: HashMap::new(),
        }
    }
}

/// Retry policy for transient invocation failures: exponential backoff
/// with a hard attempt cap.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first (default 3).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt` (1-indexed; attempt 1 has no
    /// delay).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(2).min(16);
        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(exp));
        delay.min(self.max_delay)
    }
}

/// Port: LLM invocation on behalf of one Archon.
///
/// Implementations resolve `archon_id` to a model through the profile
/// repository and enforce the per-call `timeout` themselves.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Free-form invocation (debate speeches, vote casting).
    async fn invoke(
        &self,
        archon_id: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<InvokerResponse, InvokerError>;

    /// Phase-1 validation task: one tier's read of one vote.
    async fn execute_validation_task(
        &self,
        kind: DeliberatorKind,
        validator_archon_id: &str,
        payload: &VotePayload,
    ) -> Result<DeliberatorResult, InvokerError>;

    /// Phase-2 witness adjudication over the phase-1 results.
    async fn execute_witness_adjudication(
        &self,
        witness_archon_id: &str,
        payload: &VotePayload,
        deliberations: &[DeliberatorResult],
    ) -> Result<WitnessAdjudication, InvokerError>;
}

/// Invoke with retry: exponential backoff between attempts, last error
/// returned when the cap is reached.
pub async fn invoke_with_retry(
    invoker: &dyn AgentInvoker,
    policy: &RetryPolicy,
    archon_id: &str,
    prompt: &str,
    timeout: Duration,
) -> Result<InvokerResponse, InvokerError> {
    let mut last_err = InvokerError::EmptyReply;
    for attempt in 1..=policy.max_attempts.max(1) {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match invoker.invoke(archon_id, prompt, timeout).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                warn!(archon_id, attempt, error = %e, "invocation attempt failed");
                last_err = e;
            }
        }
    }
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyInvoker {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl AgentInvoker for FlakyInvoker {
        async fn invoke(
            &self,
            _archon_id: &str,
            _prompt: &str,
            _timeout: Duration,
        ) -> Result<InvokerResponse, InvokerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.succeed_on {
                Ok(InvokerResponse::new("STANCE: FOR\nAye.", 5))
            } else {
                Err(InvokerError::Transport("connection reset".to_string()))
            }
        }

        async fn execute_validation_task(
            &self,
            kind: DeliberatorKind,
            _validator_archon_id: &str,
            _payload: &VotePayload,
        ) -> Result<DeliberatorResult, InvokerError> {
            Ok(DeliberatorResult::failed(kind, "not used"))
        }

        async fn execute_witness_adjudication(
            &self,
            _witness_archon_id: &str,
            _payload: &VotePayload,
            _deliberations: &[DeliberatorResult],
        ) -> Result<WitnessAdjudication, InvokerError> {
            Err(InvokerError::Transport("not used".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_eventually_succeeds() {
        let invoker = Arc::new(FlakyInvoker {
            calls: AtomicU32::new(0),
            succeed_on: 3,
        });
        let policy = RetryPolicy::default();
        let response = invoke_with_retry(
            invoker.as_ref(),
            &policy,
            "archon-00",
            "speak",
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(response.raw_content.starts_with("STANCE: FOR"));
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_cap_returns_last_error() {
        let invoker = FlakyInvoker {
            calls: AtomicU32::new(0),
            succeed_on: 10,
        };
        let policy = RetryPolicy::default();
        let err = invoke_with_retry(
            &invoker,
            &policy,
            "archon-00",
            "speak",
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, InvokerError::Transport(_)));
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_shape() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(250));
        assert_eq!(policy.delay_before(3), Duration::from_millis(500));
        assert_eq!(policy.delay_before(4), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let policy = RetryPolicy {
            max_attempts: 20,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        };
        assert_eq!(policy.delay_before(12), Duration::from_secs(2));
    }
}
