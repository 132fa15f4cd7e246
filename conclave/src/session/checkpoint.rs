//! Session checkpoints — crash-safe JSON snapshots with pending
//! validations, so a resumed session can re-submit exactly the work
//! that was in flight.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::voting::{VoteChoice, VotePayload};

use super::ConclaveSession;

/// A validation that had not completed at checkpoint time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingValidation {
    pub vote_id: String,
    pub archon_id: String,
    pub optimistic_choice: VoteChoice,
    pub vote_payload: VotePayload,
}

/// A complete session snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCheckpoint {
    /// Schema version for forward compatibility.
    pub version: u32,
    /// Monotonic checkpoint sequence within the session.
    pub sequence: u32,
    pub created_at: DateTime<Utc>,
    pub session: ConclaveSession,
    pub pending_validations: Vec<PendingValidation>,
}

impl SessionCheckpoint {
    /// Current schema version.
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(
        sequence: u32,
        session: &ConclaveSession,
        pending_validations: Vec<PendingValidation>,
    ) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            sequence,
            created_at: Utc::now(),
            session: session.clone(),
            pending_validations,
        }
    }
}

/// Error from checkpoint persistence.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("checkpoint version {found} is newer than supported {supported}")]
    VersionMismatch { found: u32, supported: u32 },
}

/// Write a checkpoint through a temp file, fsync, and atomic rename.
pub fn save_checkpoint(path: &Path, checkpoint: &SessionCheckpoint) -> Result<(), CheckpointError> {
    let body = serde_json::to_string_pretty(checkpoint)?;
    let tmp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&tmp_path)?;
    file.write_all(body.as_bytes())?;
    file.sync_all()?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load and version-check a checkpoint.
pub fn load_checkpoint(path: &Path) -> Result<SessionCheckpoint, CheckpointError> {
    let text = std::fs::read_to_string(path)?;
    let checkpoint: SessionCheckpoint = serde_json::from_str(&text)?;
    if checkpoint.version > SessionCheckpoint::CURRENT_VERSION {
        return Err(CheckpointError::VersionMismatch {
            found: checkpoint.version,
            supported: SessionCheckpoint::CURRENT_VERSION,
        });
    }
    Ok(checkpoint)
}
