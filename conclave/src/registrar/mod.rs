//! Registrar — deterministic extraction of passed motions into the
//! mandate ledger.
//!
//! No LLM is involved here. The ledger directory is append-only: one
//! JSON file per mandate, a `ledger.json` index, and the
//! `ratified_mandates.json` handoff consumed by downstream pipelines.
//! All writes go through a temp file, fsync, and atomic rename.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::motion::{MotionStatus, MotionType, VoteResult};
use crate::session::{ConclaveSession, SessionPhase};

/// A ratified motion, immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mandate {
    pub mandate_id: String,
    pub motion_id: String,
    pub title: String,
    pub text: String,
    pub motion_type: MotionType,
    pub passed_at: DateTime<Utc>,
    pub vote_result: VoteResult,
    pub proposer: String,
    pub seconder: Option<String>,
    pub ledger_entry_id: u64,
}

/// One line of the ledger index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerIndexEntry {
    pub ledger_entry_id: u64,
    pub mandate_id: String,
    pub motion_id: String,
    pub title: String,
    pub passed_at: DateTime<Utc>,
}

/// Error from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("mandate `{0}` already exists; the ledger is append-only")]
    AlreadyRecorded(String),

    #[error("session `{0}` has not adjourned; no mandates may be written")]
    SessionNotAdjourned(String),
}

/// Port: append-only mandate store.
pub trait MotionLedger: Send + Sync {
    /// Append one mandate. Re-recording an existing id is a breach.
    fn record(&self, mandate: &Mandate) -> Result<(), LedgerError>;

    /// Current index, oldest first.
    fn index(&self) -> Result<Vec<LedgerIndexEntry>, LedgerError>;

    /// Write the handoff artifact for downstream pipelines.
    fn write_handoff(&self, mandates: &[Mandate]) -> Result<(), LedgerError>;
}

/// Filesystem ledger.
pub struct FileMotionLedger {
    dir: PathBuf,
}

impl FileMotionLedger {
    pub fn new(dir: &Path) -> Result<Self, LedgerError> {
        std::fs::create_dir_all(dir.join("mandates"))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("ledger.json")
    }

    fn mandate_path(&self, mandate_id: &str) -> PathBuf {
        self.dir.join("mandates").join(format!("{mandate_id}.json"))
    }

    fn write_atomic(&self, path: &Path, body: &str) -> Result<(), LedgerError> {
        let tmp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(body.as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn read_index(&self) -> Result<Vec<LedgerIndexEntry>, LedgerError> {
        match std::fs::read_to_string(self.index_path()) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(LedgerError::Io(e)),
        }
    }
}

impl MotionLedger for FileMotionLedger {
    fn record(&self, mandate: &Mandate) -> Result<(), LedgerError> {
        let path = self.mandate_path(&mandate.mandate_id);
        if path.exists() {
            return Err(LedgerError::AlreadyRecorded(mandate.mandate_id.clone()));
        }
        self.write_atomic(&path, &serde_json::to_string_pretty(mandate)?)?;

        let mut index = self.read_index()?;
        index.push(LedgerIndexEntry {
            ledger_entry_id: mandate.ledger_entry_id,
            mandate_id: mandate.mandate_id.clone(),
            motion_id: mandate.motion_id.clone(),
            title: mandate.title.clone(),
            passed_at: mandate.passed_at,
        });
        self.write_atomic(&self.index_path(), &serde_json::to_string_pretty(&index)?)?;
        Ok(())
    }

    fn index(&self) -> Result<Vec<LedgerIndexEntry>, LedgerError> {
        self.read_index()
    }

    fn write_handoff(&self, mandates: &[Mandate]) -> Result<(), LedgerError> {
        self.write_atomic(
            &self.dir.join("ratified_mandates.json"),
            &serde_json::to_string_pretty(mandates)?,
        )
    }
}

/// The Registrar: walk an adjourned session, mint mandates for passed
/// motions, and hand them to the ledger.
pub struct Registrar;

impl Registrar {
    /// Extract and record all ratified mandates from a concluded
    /// session. The session must be adjourned; a reconciliation-failed
    /// or still-open session writes nothing.
    pub fn ratify(
        session: &ConclaveSession,
        ledger: &dyn MotionLedger,
    ) -> Result<Vec<Mandate>, LedgerError> {
        if session.phase != SessionPhase::Adjourned {
            return Err(LedgerError::SessionNotAdjourned(session.session_id.clone()));
        }

        let next_entry_id = ledger.index()?.len() as u64;
        let mut mandates = Vec::new();
        for motion in session
            .motions
            .iter()
            .filter(|m| m.status == MotionStatus::Passed)
        {
            let Some(result) = motion.result else {
                continue;
            };
            let mandate = Mandate {
                mandate_id: uuid::Uuid::new_v4().to_string(),
                motion_id: motion.motion_id.clone(),
                title: motion.title.clone(),
                text: motion.text.clone(),
                motion_type: motion.motion_type,
                passed_at: motion.passed_at.unwrap_or(session.started_at),
                vote_result: result,
                proposer: motion.primary_sponsor.clone(),
                seconder: motion.seconded_by.clone(),
                ledger_entry_id: next_entry_id + mandates.len() as u64,
            };
            ledger.record(&mandate)?;
            mandates.push(mandate);
        }
        ledger.write_handoff(&mandates)?;
        info!(
            session_id = %session.session_id,
            mandates = mandates.len(),
            "mandates ratified"
        );
        Ok(mandates)
    }
}
