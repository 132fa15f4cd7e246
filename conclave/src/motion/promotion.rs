//! Promotion — the only path from Seed to Motion.
//!
//! A King spends one budget unit per promotion regardless of how many
//! seeds the motion references. The budget tracker port must make the
//! check-and-consume atomic under concurrency; two conforming
//! implementations ship here: a shared atomic counter and a file-backed
//! tracker (lock file + temp file + fsync + atomic rename) that
//! survives process restarts.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::archon::ArchonProfile;

use super::admission::AdmissionGate;
use super::seeds::SeedRegistry;
use super::{Motion, MotionStatus, MotionType, RealmRef};

/// Error from budget persistence. Exhaustion is not an error; it is a
/// [`BudgetDecision`].
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("budget io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("budget state corrupted: {0}")]
    Corrupt(String),

    #[error("could not acquire budget lock within {0:?}")]
    LockTimeout(Duration),
}

/// Outcome of an atomic check-and-consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDecision {
    /// One unit consumed; `remaining` units left in the cycle.
    Consumed { remaining: u32 },
    /// The cap was already reached; nothing consumed.
    Exhausted { cap: u32 },
}

impl BudgetDecision {
    pub fn is_consumed(&self) -> bool {
        matches!(self, Self::Consumed { .. })
    }
}

/// Port: per-`(cycle_id, king_id)` promotion budget. Implementations
/// must guarantee that with cap `N`, exactly `N` concurrent consume
/// attempts succeed.
pub trait PromotionBudgetTracker: Send + Sync {
    /// Atomically consume one unit if any remain.
    fn try_consume(&self, cycle_id: &str, king_id: &str) -> Result<BudgetDecision, BudgetError>;

    /// Units consumed so far in the cycle.
    fn consumed(&self, cycle_id: &str, king_id: &str) -> Result<u32, BudgetError>;
}

impl<T: PromotionBudgetTracker + ?Sized> PromotionBudgetTracker for std::sync::Arc<T> {
    fn try_consume(&self, cycle_id: &str, king_id: &str) -> Result<BudgetDecision, BudgetError> {
        (**self).try_consume(cycle_id, king_id)
    }

    fn consumed(&self, cycle_id: &str, king_id: &str) -> Result<u32, BudgetError> {
        (**self).consumed(cycle_id, king_id)
    }
}

/// Shared-counter tracker. The mutex scope is the whole check-and-
/// consume, which is what makes it atomic.
pub struct InMemoryBudgetTracker {
    cap: u32,
    counters: Mutex<HashMap<(String, String), u32>>,
}

impl InMemoryBudgetTracker {
    pub fn new(cap: u32) -> Self {
        Self {
            cap,
            counters: Mutex::new(HashMap::new()),
        }
    }
}

impl PromotionBudgetTracker for InMemoryBudgetTracker {
    fn try_consume(&self, cycle_id: &str, king_id: &str) -> Result<BudgetDecision, BudgetError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| BudgetError::Corrupt("counter lock poisoned".to_string()))?;
        let consumed = counters
            .entry((cycle_id.to_string(), king_id.to_string()))
            .or_insert(0);
        if *consumed >= self.cap {
            return Ok(BudgetDecision::Exhausted { cap: self.cap });
        }
        *consumed += 1;
        Ok(BudgetDecision::Consumed {
            remaining: self.cap - *consumed,
        })
    }

    fn consumed(&self, cycle_id: &str, king_id: &str) -> Result<u32, BudgetError> {
        let counters = self
            .counters
            .lock()
            .map_err(|_| BudgetError::Corrupt("counter lock poisoned".to_string()))?;
        Ok(counters
            .get(&(cycle_id.to_string(), king_id.to_string()))
            .copied()
            .unwrap_or(0))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BudgetFile {
    cycle_id: String,
    king_id: String,
    cap: u32,
    consumed: u32,
}

/// File-backed tracker. One JSON file per `(cycle_id, king_id)`; writes
/// go through a temp file, fsync, and atomic rename. Mutual exclusion
/// between processes uses an exclusively-created lock file.
pub struct FileBudgetTracker {
    dir: PathBuf,
    cap: u32,
    lock_timeout: Duration,
}

impl FileBudgetTracker {
    pub fn new(dir: &Path, cap: u32) -> Result<Self, BudgetError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            cap,
            lock_timeout: Duration::from_secs(5),
        })
    }

    fn slug(text: &str) -> String {
        text.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect()
    }

    fn state_path(&self, cycle_id: &str, king_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}__{}.json", Self::slug(cycle_id), Self::slug(king_id)))
    }

    fn acquire_lock(&self, state_path: &Path) -> Result<BudgetLock, BudgetError> {
        let lock_path = state_path.with_extension("lock");
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(_) => return Ok(BudgetLock { path: lock_path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        warn!(lock = %lock_path.display(), "budget lock contention timeout");
                        return Err(BudgetError::LockTimeout(self.lock_timeout));
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => return Err(BudgetError::Io(e)),
            }
        }
    }

    fn read_state(&self, state_path: &Path, cycle_id: &str, king_id: &str) -> Result<BudgetFile, BudgetError> {
        match std::fs::read_to_string(state_path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| BudgetError::Corrupt(format!("{}: {e}", state_path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BudgetFile {
                cycle_id: cycle_id.to_string(),
                king_id: king_id.to_string(),
                cap: self.cap,
                consumed: 0,
            }),
            Err(e) => Err(BudgetError::Io(e)),
        }
    }

    fn write_state(&self, state_path: &Path, state: &BudgetFile) -> Result<(), BudgetError> {
        let tmp_path = state_path.with_extension("tmp");
        let body = serde_json::to_string_pretty(state)
            .map_err(|e| BudgetError::Corrupt(e.to_string()))?;
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(body.as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, state_path)?;
        Ok(())
    }
}

struct BudgetLock {
    path: PathBuf,
}

impl Drop for BudgetLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl PromotionBudgetTracker for FileBudgetTracker {
    fn try_consume(&self, cycle_id: &str, king_id: &str) -> Result<BudgetDecision, BudgetError> {
        let state_path = self.state_path(cycle_id, king_id);
        let _lock = self.acquire_lock(&state_path)?;
        let mut state = self.read_state(&state_path, cycle_id, king_id)?;
        if state.consumed >= self.cap {
            return Ok(BudgetDecision::Exhausted { cap: self.cap });
        }
        state.consumed += 1;
        self.write_state(&state_path, &state)?;
        Ok(BudgetDecision::Consumed {
            remaining: self.cap - state.consumed,
        })
    }

    fn consumed(&self, cycle_id: &str, king_id: &str) -> Result<u32, BudgetError> {
        let state_path = self.state_path(cycle_id, king_id);
        let _lock = self.acquire_lock(&state_path)?;
        Ok(self.read_state(&state_path, cycle_id, king_id)?.consumed)
    }
}

/// Everything a King supplies when promoting seeds into a motion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionDraft {
    pub title: String,
    pub motion_type: MotionType,
    pub realms: Vec<RealmRef>,
    pub co_sponsors: Vec<String>,
    pub escalation_approved: bool,
    pub text: String,
    pub success_criteria: String,
}

/// Structured outcome of a promotion attempt. Gate failures are values,
/// never errors.
#[derive(Debug)]
pub enum PromotionOutcome {
    /// Budget consumed and the motion built; its admission record tells
    /// whether it may reach an agenda.
    Promoted(Box<Motion>),
    /// `PROMOTION_BUDGET_EXCEEDED`.
    BudgetExceeded {
        cycle_id: String,
        king_id: String,
        cap: u32,
    },
    /// The sponsor does not hold the King rank.
    NotAuthorized { archon_id: String, rank: String },
    /// A referenced seed does not exist.
    UnknownSeed(String),
}

/// Promotion service: budget consumption, seed freezing, motion
/// construction, and admission in one pass.
pub struct PromotionService<T: PromotionBudgetTracker> {
    budget: T,
    gate: AdmissionGate,
}

impl<T: PromotionBudgetTracker> PromotionService<T> {
    pub fn new(budget: T, gate: AdmissionGate) -> Self {
        Self { budget, gate }
    }

    pub fn budget(&self) -> &T {
        &self.budget
    }

    /// Promote seeds into a motion on behalf of a King.
    ///
    /// A single promotion referencing many seeds consumes exactly one
    /// budget unit. The seeds freeze only after the budget check
    /// succeeds.
    pub fn promote(
        &self,
        cycle_id: &str,
        king: &ArchonProfile,
        seed_refs: &[String],
        draft: MotionDraft,
        registry: &mut SeedRegistry,
    ) -> Result<PromotionOutcome, BudgetError> {
        if !king.rank.can_promote() {
            return Ok(PromotionOutcome::NotAuthorized {
                archon_id: king.id.clone(),
                rank: king.rank.to_string(),
            });
        }
        for seed_id in seed_refs {
            if registry.get(seed_id).is_err() {
                return Ok(PromotionOutcome::UnknownSeed(seed_id.clone()));
            }
        }

        match self.budget.try_consume(cycle_id, &king.id)? {
            BudgetDecision::Exhausted { cap } => {
                info!(cycle_id, king_id = %king.id, cap, "promotion budget exhausted");
                Ok(PromotionOutcome::BudgetExceeded {
                    cycle_id: cycle_id.to_string(),
                    king_id: king.id.clone(),
                    cap,
                })
            }
            BudgetDecision::Consumed { remaining } => {
                for seed_id in seed_refs {
                    registry
                        .mark_promoted(seed_id)
                        .map_err(|e| BudgetError::Corrupt(e.to_string()))?;
                }
                let mut motion = Motion {
                    motion_id: uuid::Uuid::new_v4().to_string(),
                    title: draft.title,
                    motion_type: draft.motion_type,
                    realms: draft.realms,
                    primary_sponsor: king.id.clone(),
                    co_sponsors: draft.co_sponsors,
                    escalation_approved: draft.escalation_approved,
                    text: draft.text,
                    success_criteria: draft.success_criteria,
                    source_seed_refs: seed_refs.to_vec(),
                    admission_record: None,
                    status: MotionStatus::Proposed,
                    proposed_at: Utc::now(),
                    seconded_by: None,
                    seconded_at: None,
                    votes: Vec::new(),
                    result: None,
                    passed_at: None,
                };
                motion.admission_record = Some(self.gate.evaluate(&motion));
                info!(
                    motion_id = %motion.motion_id,
                    king_id = %king.id,
                    remaining,
                    admitted = motion.is_agenda_eligible(),
                    "seed promotion completed"
                );
                Ok(PromotionOutcome::Promoted(Box::new(motion)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archon::{test_profile, Rank};
    use std::sync::Arc;

    fn draft() -> MotionDraft {
        MotionDraft {
            title: "Standardize realm tariffs".to_string(),
            motion_type: MotionType::Policy,
            realms: vec![RealmRef::primary("trade")],
            co_sponsors: Vec::new(),
            escalation_approved: false,
            text: "Resolved, that tariffs follow one schedule.".to_string(),
            success_criteria: "A ratified schedule.".to_string(),
        }
    }

    fn service(cap: u32) -> PromotionService<InMemoryBudgetTracker> {
        PromotionService::new(
            InMemoryBudgetTracker::new(cap),
            AdmissionGate::new(&["trade", "war", "law"], 4),
        )
    }

    fn seeded_registry() -> (SeedRegistry, String) {
        let mut registry = SeedRegistry::new();
        let seed_id = registry
            .submit("archon-05", "tariff schedule idea", "direct")
            .seed_id
            .clone();
        (registry, seed_id)
    }

    #[test]
    fn test_promotion_consumes_one_unit() {
        let service = service(3);
        let (mut registry, seed_id) = seeded_registry();
        let king = test_profile("king-0", Rank::King);

        let outcome = service
            .promote("cycle-1", &king, &[seed_id.clone()], draft(), &mut registry)
            .unwrap();
        assert!(matches!(outcome, PromotionOutcome::Promoted(_)));
        assert_eq!(service.budget().consumed("cycle-1", "king-0").unwrap(), 1);
        assert!(registry.get(&seed_id).unwrap().is_frozen());
    }

    #[test]
    fn test_multi_seed_promotion_still_one_unit() {
        let service = service(3);
        let mut registry = SeedRegistry::new();
        let a = registry.submit("x", "a", "direct").seed_id.clone();
        let b = registry.submit("y", "b", "direct").seed_id.clone();
        let king = test_profile("king-0", Rank::King);

        service
            .promote("cycle-1", &king, &[a, b], draft(), &mut registry)
            .unwrap();
        assert_eq!(service.budget().consumed("cycle-1", "king-0").unwrap(), 1);
    }

    #[test]
    fn test_budget_exhaustion_is_a_value() {
        let service = service(1);
        let king = test_profile("king-0", Rank::King);

        let (mut registry, seed_id) = seeded_registry();
        service
            .promote("cycle-1", &king, &[seed_id], draft(), &mut registry)
            .unwrap();

        let (mut registry, seed_id) = seeded_registry();
        let outcome = service
            .promote("cycle-1", &king, &[seed_id.clone()], draft(), &mut registry)
            .unwrap();
        assert!(matches!(outcome, PromotionOutcome::BudgetExceeded { cap: 1, .. }));
        // Exhaustion must not freeze the seed.
        assert!(!registry.get(&seed_id).unwrap().is_frozen());
    }

    #[test]
    fn test_budget_is_per_cycle() {
        let service = service(1);
        let king = test_profile("king-0", Rank::King);

        let (mut registry, seed_id) = seeded_registry();
        service
            .promote("cycle-1", &king, &[seed_id], draft(), &mut registry)
            .unwrap();

        let (mut registry, seed_id) = seeded_registry();
        let outcome = service
            .promote("cycle-2", &king, &[seed_id], draft(), &mut registry)
            .unwrap();
        assert!(matches!(outcome, PromotionOutcome::Promoted(_)));
    }

    #[test]
    fn test_non_king_not_authorized() {
        let service = service(3);
        let (mut registry, seed_id) = seeded_registry();
        let earl = test_profile("earl-0", Rank::Earl);

        let outcome = service
            .promote("cycle-1", &earl, &[seed_id], draft(), &mut registry)
            .unwrap();
        assert!(matches!(outcome, PromotionOutcome::NotAuthorized { .. }));
        assert_eq!(service.budget().consumed("cycle-1", "earl-0").unwrap(), 0);
    }

    #[test]
    fn test_unknown_seed_rejected_before_budget() {
        let service = service(3);
        let mut registry = SeedRegistry::new();
        let king = test_profile("king-0", Rank::King);

        let outcome = service
            .promote("cycle-1", &king, &["ghost".to_string()], draft(), &mut registry)
            .unwrap();
        assert!(matches!(outcome, PromotionOutcome::UnknownSeed(_)));
        assert_eq!(service.budget().consumed("cycle-1", "king-0").unwrap(), 0);
    }

    #[test]
    fn test_in_memory_tracker_exact_n_under_concurrency() {
        let tracker = Arc::new(InMemoryBudgetTracker::new(3));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let tracker = tracker.clone();
            handles.push(std::thread::spawn(move || {
                tracker.try_consume("cycle-1", "king-0").unwrap()
            }));
        }
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(BudgetDecision::is_consumed)
            .count();
        assert_eq!(successes, 3);
    }

    #[test]
    fn test_file_tracker_exact_n_under_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(FileBudgetTracker::new(dir.path(), 3).unwrap());
        let mut handles = Vec::new();
        for _ in 0..10 {
            let tracker = tracker.clone();
            handles.push(std::thread::spawn(move || {
                tracker.try_consume("cycle-1", "king-0").unwrap()
            }));
        }
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(BudgetDecision::is_consumed)
            .count();
        assert_eq!(successes, 3);
    }

    #[test]
    fn test_file_tracker_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let tracker = FileBudgetTracker::new(dir.path(), 2).unwrap();
            assert!(tracker.try_consume("cycle-1", "king-0").unwrap().is_consumed());
            assert!(tracker.try_consume("cycle-1", "king-0").unwrap().is_consumed());
        }
        // A fresh tracker over the same directory sees the consumed state.
        let tracker = FileBudgetTracker::new(dir.path(), 2).unwrap();
        assert!(matches!(
            tracker.try_consume("cycle-1", "king-0").unwrap(),
            BudgetDecision::Exhausted { cap: 2 }
        ));
        assert_eq!(tracker.consumed("cycle-1", "king-0").unwrap(), 2);
    }

    #[test]
    fn test_file_tracker_cycles_independent() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = FileBudgetTracker::new(dir.path(), 1).unwrap();
        assert!(tracker.try_consume("cycle-a", "king-0").unwrap().is_consumed());
        assert!(tracker.try_consume("cycle-b", "king-0").unwrap().is_consumed());
        assert!(!tracker.try_consume("cycle-a", "king-0").unwrap().is_consumed());
    }
}
