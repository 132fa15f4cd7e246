//! Seed registry — unbounded, append-only intake of Motion Seeds.
//!
//! Clustering is advisory: it groups seeds for a King's review without
//! touching the originals. The legacy queued-motion shim lands here too,
//! and it can only ever create Seeds.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::{MotionSeed, SeedStatus};

/// Error from seed operations.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("unknown seed id `{0}`")]
    UnknownSeed(String),

    #[error("seed `{0}` is frozen after promotion")]
    FrozenSeed(String),
}

/// Advisory grouping of related seeds. Original seeds are untouched;
/// the cluster records membership only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedCluster {
    pub cluster_id: String,
    pub member_seed_ids: Vec<String>,
    pub summary: String,
}

/// Append-only registry of Motion Seeds.
#[derive(Debug, Default)]
pub struct SeedRegistry {
    seeds: Vec<MotionSeed>,
    by_id: BTreeMap<String, usize>,
    clusters: Vec<SeedCluster>,
}

impl SeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new seed. Intake is unbounded and never gated.
    pub fn submit(&mut self, submitted_by: &str, seed_text: &str, provenance: &str) -> &MotionSeed {
        let seed = MotionSeed {
            seed_id: uuid::Uuid::new_v4().to_string(),
            submitted_by: submitted_by.to_string(),
            submitted_at: Utc::now(),
            seed_text: seed_text.to_string(),
            status: SeedStatus::Recorded,
            provenance: provenance.to_string(),
        };
        info!(seed_id = %seed.seed_id, submitted_by, provenance, "seed recorded");
        self.by_id.insert(seed.seed_id.clone(), self.seeds.len());
        self.seeds.push(seed);
        self.seeds.last().expect("just pushed")
    }

    pub fn get(&self, seed_id: &str) -> Result<&MotionSeed, SeedError> {
        self.by_id
            .get(seed_id)
            .map(|idx| &self.seeds[*idx])
            .ok_or_else(|| SeedError::UnknownSeed(seed_id.to_string()))
    }

    pub fn all(&self) -> &[MotionSeed] {
        &self.seeds
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    /// Amend a seed's text before promotion. Frozen seeds reject any
    /// change.
    pub fn amend_text(&mut self, seed_id: &str, new_text: &str) -> Result<(), SeedError> {
        let idx = *self
            .by_id
            .get(seed_id)
            .ok_or_else(|| SeedError::UnknownSeed(seed_id.to_string()))?;
        let seed = &mut self.seeds[idx];
        if seed.is_frozen() {
            return Err(SeedError::FrozenSeed(seed_id.to_string()));
        }
        seed.seed_text = new_text.to_string();
        Ok(())
    }

    /// Group seeds into an advisory cluster. Member seeds keep their
    /// text, submitter, and provenance; only their status advances.
    pub fn cluster(&mut self, member_seed_ids: &[String], summary: &str) -> Result<&SeedCluster, SeedError> {
        let unique: BTreeSet<&String> = member_seed_ids.iter().collect();
        for seed_id in &unique {
            self.get(seed_id)?;
        }
        for seed_id in &unique {
            let idx = self.by_id[seed_id.as_str()];
            let seed = &mut self.seeds[idx];
            if seed.status == SeedStatus::Recorded {
                seed.status = SeedStatus::Clustered;
            }
        }
        self.clusters.push(SeedCluster {
            cluster_id: uuid::Uuid::new_v4().to_string(),
            member_seed_ids: member_seed_ids.to_vec(),
            summary: summary.to_string(),
        });
        Ok(self.clusters.last().expect("just pushed"))
    }

    pub fn clusters(&self) -> &[SeedCluster] {
        &self.clusters
    }

    /// Freeze a seed at promotion time. Idempotent for already-promoted
    /// seeds.
    pub(crate) fn mark_promoted(&mut self, seed_id: &str) -> Result<(), SeedError> {
        let idx = *self
            .by_id
            .get(seed_id)
            .ok_or_else(|| SeedError::UnknownSeed(seed_id.to_string()))?;
        self.seeds[idx].status = SeedStatus::Promoted;
        Ok(())
    }
}

/// Legacy shim: upstream recommenders used to hand over "queued motions".
/// Those inputs are demoted to Seeds here — never a Motion, never an
/// AdmissionRecord, never anything agenda-eligible.
pub fn ingest_queued_motion(
    registry: &mut SeedRegistry,
    submitted_by: &str,
    title: &str,
    body: &str,
) -> String {
    let seed_text = format!("{title}\n\n{body}");
    let seed = registry.submit(submitted_by, &seed_text, "legacy-queued-motion");
    seed.seed_id.clone()
}
