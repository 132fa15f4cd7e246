//! Agenda queue — only admitted Motions may enter.
//!
//! Seeds can never be scheduled; the attempt itself is recorded as a
//! boundary breach so silence is impossible.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::{Motion, MotionSeed, ReasonCode};

/// Record of an attempt to cross the Seed/Motion boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryBreach {
    pub code: ReasonCode,
    pub detail: String,
    pub occurred_at: DateTime<Utc>,
}

/// Error from agenda placement.
#[derive(Debug, Error)]
pub enum AgendaError {
    #[error("motion `{0}` is not admitted and cannot be scheduled")]
    NotAdmitted(String),

    #[error("boundary breach: {}", .0.detail)]
    Breach(BoundaryBreach),
}

/// FIFO agenda of admitted Motions.
#[derive(Debug, Default)]
pub struct AgendaQueue {
    queue: VecDeque<Motion>,
    breaches: Vec<BoundaryBreach>,
}

impl AgendaQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule an admitted Motion.
    pub fn schedule(&mut self, motion: Motion) -> Result<(), AgendaError> {
        if !motion.is_agenda_eligible() {
            return Err(AgendaError::NotAdmitted(motion.motion_id));
        }
        self.queue.push_back(motion);
        Ok(())
    }

    /// Reject a Seed outright. Always fails, always leaves a breach
    /// record.
    pub fn schedule_seed(&mut self, seed: &MotionSeed) -> Result<(), AgendaError> {
        let breach = BoundaryBreach {
            code: ReasonCode::SeedEscalationBlocked,
            detail: format!(
                "seed `{}` (from {}) was offered directly to the agenda",
                seed.seed_id, seed.provenance
            ),
            occurred_at: Utc::now(),
        };
        warn!(seed_id = %seed.seed_id, "seed blocked at the agenda boundary");
        self.breaches.push(breach.clone());
        Err(AgendaError::Breach(breach))
    }

    /// Next motion up for deliberation.
    pub fn next_motion(&mut self) -> Option<Motion> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Breaches recorded so far.
    pub fn breaches(&self) -> &[BoundaryBreach] {
        &self.breaches
    }
}
