//! Audit publishing — observability off the critical path.
//!
//! The engine narrates its work on stable topics; a failing or absent
//! audit backend never slows deliberation. [`GuardedPublisher`] wraps
//! any backend in a circuit breaker, and [`BusAuditPublisher`] gives
//! in-process subscribers a broadcast feed plus a bounded replay
//! history.

pub mod breaker;

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub use breaker::{BreakerState, CircuitBreaker};

/// Published topics. Partitioning keys on `session_id` or `vote_id`.
pub mod topics {
    pub const VOTES_CAST: &str = "votes.cast";
    pub const VOTES_VALIDATION_STARTED: &str = "votes.validation-started";
    pub const VOTES_DELIBERATION_RESULTS: &str = "votes.deliberation-results";
    pub const VOTES_VALIDATED: &str = "votes.validated";
    pub const VOTES_OVERRIDES: &str = "votes.overrides";
    pub const WITNESS_STATEMENTS: &str = "witness.statements";
    pub const CONSENSUS_FAILURES: &str = "consensus.failures";
    pub const SESSIONS_CHECKPOINTS: &str = "sessions.checkpoints";
    pub const SESSIONS_TRANSCRIPTS: &str = "sessions.transcripts";
}

/// Stable-schema audit message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditMessage {
    pub topic: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Topic-specific body.
    pub payload: serde_json::Value,
}

impl AuditMessage {
    pub fn new(topic: &str, session_id: &str, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.to_string(),
            session_id: session_id.to_string(),
            motion_id: None,
            vote_id: None,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn motion(mut self, motion_id: &str) -> Self {
        self.motion_id = Some(motion_id.to_string());
        self
    }

    pub fn vote(mut self, vote_id: &str) -> Self {
        self.vote_id = Some(vote_id.to_string());
        self
    }

    /// Partition key: the vote when present, the session otherwise.
    pub fn partition_key(&self) -> &str {
        self.vote_id.as_deref().unwrap_or(&self.session_id)
    }
}

/// Error from a publish attempt. Callers above [`GuardedPublisher`]
/// never see one.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("publish failed: {0}")]
    PublishFailed(String),
}

/// Port: audit sink.
#[async_trait]
pub trait AuditPublisher: Send + Sync {
    async fn publish(&self, message: AuditMessage) -> Result<(), AuditError>;
}

/// Discards everything. The default when no observer is wired up.
pub struct NullAuditPublisher;

#[async_trait]
impl AuditPublisher for NullAuditPublisher {
    async fn publish(&self, _message: AuditMessage) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Broadcast capacity for in-process subscribers.
const CHANNEL_CAPACITY: usize = 256;
/// Retained history for replay and test assertions.
const HISTORY_CAPACITY: usize = 4096;

/// In-process publisher: a tokio broadcast channel plus a bounded
/// message history (oldest evicted first).
pub struct BusAuditPublisher {
    sender: broadcast::Sender<AuditMessage>,
    history: Mutex<VecDeque<AuditMessage>>,
}

impl Default for BusAuditPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl BusAuditPublisher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Subscribe to the live feed.
    pub fn subscribe(&self) -> broadcast::Receiver<AuditMessage> {
        self.sender.subscribe()
    }

    /// Snapshot of retained messages, oldest first.
    pub fn history(&self) -> Vec<AuditMessage> {
        self.history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Retained messages for one topic.
    pub fn history_for(&self, topic: &str) -> Vec<AuditMessage> {
        self.history()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }
}

#[async_trait]
impl AuditPublisher for BusAuditPublisher {
    async fn publish(&self, message: AuditMessage) -> Result<(), AuditError> {
        {
            let mut history = self
                .history
                .lock()
                .map_err(|_| AuditError::PublishFailed("history lock poisoned".to_string()))?;
            if history.len() >= HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(message.clone());
        }
        // No receivers is fine; the history already has it.
        let _ = self.sender.send(message);
        Ok(())
    }
}

/// Circuit-breaker decorator. Publish never fails from the caller's
/// point of view: failures trip the breaker, shed messages are counted,
/// and the engine moves on.
pub struct GuardedPublisher {
    inner: Box<dyn AuditPublisher>,
    breaker: Mutex<CircuitBreaker>,
    shed: Mutex<u64>,
}

impl GuardedPublisher {
    pub fn new(inner: Box<dyn AuditPublisher>) -> Self {
        Self::with_breaker(inner, CircuitBreaker::default())
    }

    pub fn with_breaker(inner: Box<dyn AuditPublisher>, breaker: CircuitBreaker) -> Self {
        Self {
            inner,
            breaker: Mutex::new(breaker),
            shed: Mutex::new(0),
        }
    }

    /// Messages dropped while the breaker was open.
    pub fn shed_count(&self) -> u64 {
        self.shed.lock().map(|s| *s).unwrap_or(0)
    }

    /// Current breaker state.
    pub fn breaker_state(&self) -> BreakerState {
        self.breaker
            .lock()
            .map(|b| b.state())
            .unwrap_or(BreakerState::Open)
    }
}

#[async_trait]
impl AuditPublisher for GuardedPublisher {
    async fn publish(&self, message: AuditMessage) -> Result<(), AuditError> {
        let allowed = self.breaker.lock().map(|mut b| b.allow()).unwrap_or(false);
        if !allowed {
            if let Ok(mut shed) = self.shed.lock() {
                *shed += 1;
            }
            debug!(topic = %message.topic, "audit shed while breaker open");
            return Ok(());
        }
        match self.inner.publish(message).await {
            Ok(()) => {
                if let Ok(mut breaker) = self.breaker.lock() {
                    breaker.record_success();
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "audit publish failed");
                if let Ok(mut breaker) = self.breaker.lock() {
                    breaker.record_failure();
                }
                // Absorbed: audit is never on the critical path.
                Ok(())
            }
        }
    }
}
