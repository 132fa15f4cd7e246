//! Conclave — a staged deliberation-and-governance engine for
//! LLM-backed assemblies.
//!
//! Up to an assembly's worth of independent Archons move through a
//! phased session protocol: call to order, roll call, new business,
//! debate with adversarial hygiene (exploitation prompts, consensus
//! breaks, red-team rounds, structural-risk digests), voting with
//! optimistic parsing, three-tier asynchronous vote validation under a
//! bounded-concurrency limiter, a hard reconciliation gate, and a
//! deterministic registrar that extracts ratified mandates into an
//! append-only ledger.
//!
//! # Ports
//!
//! The engine core is provider-agnostic. Wire it up through:
//! - [`invoker::AgentInvoker`] — LLM transport, profile-driven
//! - [`archon::ArchonProfileRepository`] — per-Archon model binding
//! - [`audit::AuditPublisher`] — observability, circuit-broken and off
//!   the critical path
//! - [`motion::promotion::PromotionBudgetTracker`] — atomic per-cycle
//!   promotion budgets
//! - [`registrar::MotionLedger`] — append-only mandate store

pub mod archon;
pub mod audit;
pub mod config;
pub mod debate;
pub mod invoker;
pub mod motion;
pub mod registrar;
pub mod session;
pub mod transcript;
pub mod voting;

// Re-export the engine surface.
pub use config::{ConclaveConfig, ConfigError, ConsensusBreakConfig, RedTeamConfig, RoleArchonIds};
pub use session::engine::{ConclaveEngine, EngineError};
pub use session::{ConclaveSession, SessionPhase};

// Re-export key archon types.
pub use archon::{
    ArchonCountProvider, ArchonProfile, ArchonProfileRepository, Branch, InMemoryProfileRepository,
    LlmConfig, Rank,
};

// Re-export key invoker types.
pub use invoker::{
    AgentInvoker, HttpAgentInvoker, InvokerError, InvokerResponse, RetryPolicy, ScriptedInvoker,
};

// Re-export key motion types.
pub use motion::admission::AdmissionGate;
pub use motion::agenda::{AgendaQueue, BoundaryBreach};
pub use motion::promotion::{
    BudgetDecision, FileBudgetTracker, InMemoryBudgetTracker, MotionDraft, PromotionBudgetTracker,
    PromotionOutcome, PromotionService,
};
pub use motion::seeds::{ingest_queued_motion, SeedRegistry};
pub use motion::{
    AdmissionRecord, AdmissionStatus, Motion, MotionSeed, MotionStatus, MotionType, RealmRef,
    ReasonCode, SeedStatus,
};

// Re-export key voting types.
pub use voting::adjudication::{
    AdjudicationResult, ConsensusStrategy, DeliberatorKind, DeliberatorResult, MajorityStrategy,
    WitnessRuling,
};
pub use voting::reconcile::{ReconcileError, ReconciliationGate, ReconciliationSummary};
pub use voting::validator::{AsyncValidator, ValidationJob, ValidatorStatus};
pub use voting::{Tally, Vote, VoteChoice, VotePayload};

// Re-export transcript and debate types.
pub use debate::{DebateDigest, DebateRecord, DebateStance, StructuralRiskKind};
pub use transcript::{EntryType, Transcript, TranscriptEntry};

// Re-export registrar types.
pub use registrar::{FileMotionLedger, LedgerError, Mandate, MotionLedger, Registrar};

// Re-export audit types.
pub use audit::{
    topics, AuditMessage, AuditPublisher, BreakerState, BusAuditPublisher, CircuitBreaker,
    GuardedPublisher, NullAuditPublisher,
};
