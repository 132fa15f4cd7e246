//! Debate layer — protocol prompts, stance parsing, digests, and the
//! round orchestrator with its adversarial hygiene mechanisms.

pub mod digest;
pub mod orchestrator;
pub mod prompts;
pub mod stance;

pub use digest::{DebateDigest, StructuralRisk, StructuralRiskKind};
pub use orchestrator::{DebateOrchestrator, DebateRecord};
pub use stance::{DebateStance, SpeechOutcome};
