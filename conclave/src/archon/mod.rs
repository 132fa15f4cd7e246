//! Archon profiles — the single source of truth for per-agent LLM binding.
//!
//! Every Archon carries a fixed rank, branch, persona, and an `llm_config`
//! naming the provider and model that serve it. The engine core never
//! hard-codes model names, URLs, or the roster size; it sees Archons only
//! through the [`ArchonProfileRepository`] and [`ArchonCountProvider`] ports.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Governance branch an Archon sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    Legislative,
    Executive,
    Judicial,
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Legislative => write!(f, "legislative"),
            Self::Executive => write!(f, "executive"),
            Self::Judicial => write!(f, "judicial"),
        }
    }
}

/// Archon rank. Kings are the only rank authorized to promote Motion
/// Seeds; ranks also feed red-team diversity selection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Rank {
    King,
    Prince,
    Duke,
    Marquis,
    Earl,
    President,
    Knight,
}

impl Rank {
    /// All defined ranks, highest first.
    pub fn all() -> &'static [Rank] {
        &[
            Self::King,
            Self::Prince,
            Self::Duke,
            Self::Marquis,
            Self::Earl,
            Self::President,
            Self::Knight,
        ]
    }

    /// Whether this rank may promote a Motion Seed to a Motion.
    pub fn can_promote(self) -> bool {
        matches!(self, Self::King)
    }
}

impl std::fmt::Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::King => write!(f, "king"),
            Self::Prince => write!(f, "prince"),
            Self::Duke => write!(f, "duke"),
            Self::Marquis => write!(f, "marquis"),
            Self::Earl => write!(f, "earl"),
            Self::President => write!(f, "president"),
            Self::Knight => write!(f, "knight"),
        }
    }
}

/// Per-Archon LLM binding. Carried on the profile and consumed by
/// `AgentInvoker` implementations; the engine core treats it as opaque.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider discriminator (e.g. "openai-compatible").
    pub provider: String,
    /// Model name as the provider knows it.
    pub model: String,
    /// Endpoint base URL.
    pub base_url: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Optional context-window override for local runtimes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
}

/// A deliberative agent profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchonProfile {
    /// Stable identifier used throughout transcripts and votes.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Governance branch.
    pub branch: Branch,
    /// Rank.
    pub rank: Rank,
    /// Fixed persona core. The Participation Protocol header is prepended
    /// by the debate layer, never stored here.
    pub system_prompt: String,
    /// Persona backstory, appended to debate prompts verbatim.
    pub backstory: String,
    /// LLM binding.
    pub llm_config: LlmConfig,
}

/// Error from profile lookup or loading.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("unknown archon id `{0}`")]
    UnknownArchon(String),

    #[error("duplicate archon id `{0}`")]
    DuplicateArchon(String),

    #[error("roster is empty")]
    EmptyRoster,

    #[error("roster size {0} is not divisible by 3")]
    RosterNotDivisible(usize),

    #[error("failed to read profile file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse profile file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Port: profile lookup. Implementations own persistence; the engine only
/// reads.
pub trait ArchonProfileRepository: Send + Sync {
    /// All profiles in roster order.
    fn get_all(&self) -> Vec<ArchonProfile>;

    /// Roster size.
    fn count(&self) -> usize;

    /// Profile by id.
    fn get(&self, archon_id: &str) -> Result<ArchonProfile, ProfileError>;
}

/// Port: dynamic roster size. Thresholds (quorum, supermajority) must be
/// derived through this, never from a constant.
pub trait ArchonCountProvider: Send + Sync {
    /// Total Archons in the assembly.
    fn get_total_archons(&self) -> usize;
}

impl<T: ArchonProfileRepository> ArchonCountProvider for T {
    fn get_total_archons(&self) -> usize {
        self.count()
    }
}

/// In-memory repository, the default for tests and embedded deployments.
///
/// Roster order is insertion order; lookups are by id.
#[derive(Debug)]
pub struct InMemoryProfileRepository {
    roster: Vec<ArchonProfile>,
    by_id: BTreeMap<String, usize>,
}

impl InMemoryProfileRepository {
    /// Build from a roster, validating id uniqueness and the
    /// divisible-by-three startup invariant.
    pub fn new(roster: Vec<ArchonProfile>) -> Result<Self, ProfileError> {
        if roster.is_empty() {
            return Err(ProfileError::EmptyRoster);
        }
        if roster.len() % 3 != 0 {
            return Err(ProfileError::RosterNotDivisible(roster.len()));
        }
        let mut by_id = BTreeMap::new();
        for (idx, profile) in roster.iter().enumerate() {
            if by_id.insert(profile.id.clone(), idx).is_some() {
                return Err(ProfileError::DuplicateArchon(profile.id.clone()));
            }
        }
        Ok(Self { roster, by_id })
    }

    /// Load a roster from a TOML file of the form:
    ///
    /// ```toml
    /// [[archons]]
    /// id = "baal"
    /// name = "Baal"
    /// branch = "legislative"
    /// rank = "king"
    /// system_prompt = "..."
    /// backstory = "..."
    ///
    /// [archons.llm_config]
    /// provider = "openai-compatible"
    /// model = "..."
    /// base_url = "http://..."
    /// temperature = 0.7
    /// max_tokens = 2048
    /// ```
    pub fn from_toml_file(path: &Path) -> Result<Self, ProfileError> {
        let text = std::fs::read_to_string(path)?;
        let file: RosterFile = toml::from_str(&text)?;
        Self::new(file.archons)
    }
}

#[derive(Deserialize)]
struct RosterFile {
    archons: Vec<ArchonProfile>,
}

impl ArchonProfileRepository for InMemoryProfileRepository {
    fn get_all(&self) -> Vec<ArchonProfile> {
        self.roster.clone()
    }

    fn count(&self) -> usize {
        self.roster.len()
    }

    fn get(&self, archon_id: &str) -> Result<ArchonProfile, ProfileError> {
        self.by_id
            .get(archon_id)
            .map(|idx| self.roster[*idx].clone())
            .ok_or_else(|| ProfileError::UnknownArchon(archon_id.to_string()))
    }
}

#[cfg(test)]
pub(crate) fn test_profile(id: &str, rank: Rank) -> ArchonProfile {
    ArchonProfile {
        id: id.to_string(),
        name: id.to_string(),
        branch: Branch::Legislative,
        rank,
        system_prompt: format!("You are {id}, a member of the assembly."),
        backstory: String::new(),
        llm_config: LlmConfig {
            provider: "openai-compatible".to_string(),
            model: "test-model".to_string(),
            base_url: "http://localhost:0/v1".to_string(),
            temperature: 0.7,
            max_tokens: 1024,
            num_ctx: None,
        },
    }
}

#[cfg(test)]
pub(crate) fn test_roster(size: usize) -> Vec<ArchonProfile> {
    let ranks = Rank::all();
    (0..size)
        .map(|i| test_profile(&format!("archon-{i:02}"), ranks[i % ranks.len()]))
        .collect()
}
