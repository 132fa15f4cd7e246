//! Engine configuration — every knob the Conclave recognizes.
//!
//! All defaults match the documented protocol defaults. `ConclaveConfig`
//! is fully serializable so deployments can load it from TOML; the engine
//! itself never reads files or environment variables for configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::motion::MotionType;

/// Validation error raised at startup when the configuration is unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("archon_count {0} is not divisible by 3")]
    ArchonCountNotDivisible(u32),

    #[error("archon_count must be non-zero")]
    ArchonCountZero,

    #[error("voting_concurrency must be non-zero")]
    ZeroConcurrency,

    #[error("debate_rounds must be non-zero")]
    ZeroDebateRounds,

    #[error("threshold for {motion_type} is {value}, must be in (0.0, 1.0]")]
    ThresholdOutOfRange { motion_type: String, value: f64 },

    #[error("consensus_break_threshold {0} must be in (0.0, 1.0]")]
    ConsensusBreakThresholdOutOfRange(f64),

    #[error("role archon id `{0}` is empty")]
    EmptyRoleArchonId(&'static str),
}

/// Controls for the forced-dissent mechanism.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusBreakConfig {
    /// Whether the consensus-break monitor runs at all.
    pub enabled: bool,
    /// Fraction of one stance that triggers a break (default 0.85).
    pub threshold: f64,
    /// How many subsequent speakers are forced to steelman the opposite
    /// stance once triggered (default 3).
    pub forced_speakers: u32,
}

impl Default for ConsensusBreakConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.85,
            forced_speakers: 3,
        }
    }
}

/// Controls for the pre-vote red-team round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedTeamConfig {
    /// Whether a red-team round runs before voting.
    pub enabled: bool,
    /// How many Archons are drafted (default 5).
    pub count: u32,
    /// Minimum distinct ranks the drafted set must span. `None` means
    /// "as many as possible given the roster".
    pub min_unique_ranks: Option<u32>,
}

impl Default for RedTeamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            count: 5,
            min_unique_ranks: None,
        }
    }
}

/// Well-known role bindings. These name Archons with fixed duties; the
/// profile repository decides which model each id maps to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleArchonIds {
    /// Witness for phase-1 intent confirmation and phase-2 adjudication.
    pub witness: String,
    /// Deliberator reading raw votes as prose.
    pub secretary_text: String,
    /// Deliberator validating vote structure against the motion.
    pub secretary_json: String,
    /// Planner id excluded from Archon-speech extraction.
    pub execution_planner: String,
}

impl Default for RoleArchonIds {
    fn default() -> Self {
        Self {
            witness: "witness".to_string(),
            secretary_text: "secretary-text".to_string(),
            secretary_json: "secretary-json".to_string(),
            execution_planner: "execution-planner".to_string(),
        }
    }
}

/// Complete engine configuration.
///
/// Durations are carried as whole seconds so the struct stays trivially
/// serializable; accessors expose them as [`Duration`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConclaveConfig {
    /// Total Archon count. Must be divisible by 3 (validator triples).
    pub archon_count: u32,
    /// Max concurrent LLM calls across all validator tasks (default 8).
    pub voting_concurrency: usize,
    /// Per-motion speaking rounds.
    pub debate_rounds: u32,
    /// Transcript entries between debate digests (default 10).
    pub digest_interval: usize,
    /// Cap on structural risks surfaced per digest (default 3).
    pub max_structural_risks_per_digest: usize,
    /// Whether the adversarial-consideration block is appended to
    /// debate prompts.
    pub exploitation_prompt_enabled: bool,
    /// Forced-dissent controls.
    pub consensus_break: ConsensusBreakConfig,
    /// Red-team round controls.
    pub red_team: RedTeamConfig,
    /// Per-LLM-call hard timeout in seconds (default 60).
    pub task_timeout_seconds: u64,
    /// Reconciliation drain budget in seconds.
    pub reconciliation_timeout_seconds: u64,
    /// Pass thresholds keyed by motion type. Missing types fall back to
    /// `default_motion_threshold`.
    pub motion_thresholds: HashMap<MotionType, f64>,
    /// Threshold used for motion types absent from `motion_thresholds`.
    pub default_motion_threshold: f64,
    /// Per-cycle, per-King promotion budget.
    pub promotion_budget_per_king: u32,
    /// Realm count at which explicit escalation approval is required
    /// (default 4).
    pub cross_realm_escalation_threshold: usize,
    /// Max seconds between a motion's proposal and its seconding.
    pub seconding_window_seconds: u64,
    /// Semaphore wait beyond which the validator flags degraded mode,
    /// in seconds.
    pub saturation_warn_seconds: u64,
    /// Fixed role bindings.
    pub roles: RoleArchonIds,
}

impl Default for ConclaveConfig {
    fn default() -> Self {
        let mut motion_thresholds = HashMap::new();
        motion_thresholds.insert(MotionType::Constitutional, 2.0 / 3.0);
        Self {
            archon_count: 72,
            voting_concurrency: 8,
            debate_rounds: 2,
            digest_interval: 10,
            max_structural_risks_per_digest: 3,
            exploitation_prompt_enabled: true,
            consensus_break: ConsensusBreakConfig::default(),
            red_team: RedTeamConfig::default(),
            task_timeout_seconds: 60,
            reconciliation_timeout_seconds: 300,
            motion_thresholds,
            default_motion_threshold: 0.5,
            promotion_budget_per_king: 3,
            cross_realm_escalation_threshold: 4,
            seconding_window_seconds: 120,
            saturation_warn_seconds: 30,
            roles: RoleArchonIds::default(),
        }
    }
}

impl ConclaveConfig {
    /// Validate the configuration. Called once at engine construction;
    /// a failure here is fail-fast by design.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.archon_count == 0 {
            return Err(ConfigError::ArchonCountZero);
        }
        if self.archon_count % 3 != 0 {
            return Err(ConfigError::ArchonCountNotDivisible(self.archon_count));
        }
        if self.voting_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.debate_rounds == 0 {
            return Err(ConfigError::ZeroDebateRounds);
        }
        for (motion_type, value) in &self.motion_thresholds {
            if *value <= 0.0 || *value > 1.0 {
                return Err(ConfigError::ThresholdOutOfRange {
                    motion_type: motion_type.to_string(),
                    value: *value,
                });
            }
        }
        if self.default_motion_threshold <= 0.0 || self.default_motion_threshold > 1.0 {
            return Err(ConfigError::ThresholdOutOfRange {
                motion_type: "default".to_string(),
                value: self.default_motion_threshold,
            });
        }
        if self.consensus_break.threshold <= 0.0 || self.consensus_break.threshold > 1.0 {
            return Err(ConfigError::ConsensusBreakThresholdOutOfRange(
                self.consensus_break.threshold,
            ));
        }
        if self.roles.witness.is_empty() {
            return Err(ConfigError::EmptyRoleArchonId("witness"));
        }
        if self.roles.secretary_text.is_empty() {
            return Err(ConfigError::EmptyRoleArchonId("secretary_text"));
        }
        if self.roles.secretary_json.is_empty() {
            return Err(ConfigError::EmptyRoleArchonId("secretary_json"));
        }
        if self.roles.execution_planner.is_empty() {
            return Err(ConfigError::EmptyRoleArchonId("execution_planner"));
        }
        Ok(())
    }

    /// Pass threshold for a motion type.
    pub fn motion_threshold(&self, motion_type: MotionType) -> f64 {
        self.motion_thresholds
            .get(&motion_type)
            .copied()
            .unwrap_or(self.default_motion_threshold)
    }

    /// Per-LLM-call timeout.
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_seconds)
    }

    /// Reconciliation drain budget.
    pub fn reconciliation_timeout(&self) -> Duration {
        Duration::from_secs(self.reconciliation_timeout_seconds)
    }

    /// Seconding window.
    pub fn seconding_window(&self) -> Duration {
        Duration::from_secs(self.seconding_window_seconds)
    }

    /// Semaphore wait threshold for the degraded-mode warning.
    pub fn saturation_warn(&self) -> Duration {
        Duration::from_secs(self.saturation_warn_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        let config = ConclaveConfig::default();
        config.validate().unwrap();
        assert_eq!(config.archon_count, 72);
        assert_eq!(config.voting_concurrency, 8);
        assert_eq!(config.digest_interval, 10);
        assert_eq!(config.max_structural_risks_per_digest, 3);
    }

    #[test]
    fn test_count_not_divisible_by_three() {
        let config = ConclaveConfig {
            archon_count: 71,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ArchonCountNotDivisible(71)));
    }

    #[test]
    fn test_zero_count_rejected() {
        let config = ConclaveConfig {
            archon_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::ArchonCountZero
        ));
    }

    #[test]
    fn test_constitutional_threshold_default() {
        let config = ConclaveConfig::default();
        let threshold = config.motion_threshold(MotionType::Constitutional);
        assert!((threshold - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unlisted_type_uses_default_threshold() {
        let config = ConclaveConfig::default();
        assert_eq!(config.motion_threshold(MotionType::Policy), 0.5);
        assert_eq!(config.motion_threshold(MotionType::Procedural), 0.5);
    }

    #[test]
    fn test_bad_threshold_rejected() {
        let mut config = ConclaveConfig::default();
        config.motion_thresholds.insert(MotionType::Policy, 1.5);
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::ThresholdOutOfRange { .. }
        ));
    }

    #[test]
    fn test_empty_role_id_rejected() {
        let mut config = ConclaveConfig::default();
        config.roles.witness = String::new();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::EmptyRoleArchonId("witness")
        ));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = ConclaveConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: ConclaveConfig = toml::from_str(&text).unwrap();
        parsed.validate().unwrap();
        assert_eq!(parsed.archon_count, config.archon_count);
        assert_eq!(parsed.seconding_window_seconds, 120);
    }

    #[test]
    fn test_duration_accessors() {
        let config = ConclaveConfig::default();
        assert_eq!(config.task_timeout(), Duration::from_secs(60));
        assert_eq!(config.reconciliation_timeout(), Duration::from_secs(300));
    }
}
