//! Debate orchestrator — rounds, digests, and adversarial hygiene.
//!
//! Each round visits every present Archon exactly once, in roster
//! order. Invocation failures and protocol violations are absorbed into
//! the transcript; nothing here raises. Silence is not allowed: every
//! non-progression leaves a transcribed trace.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::archon::{ArchonProfile, Rank};
use crate::config::ConclaveConfig;
use crate::invoker::{invoke_with_retry, AgentInvoker, RetryPolicy};
use crate::motion::Motion;
use crate::transcript::{EntryMetadata, EntryType, Transcript};

use super::digest::{build_digest, StanceCounts};
use super::prompts;
use super::stance::{classify_speech, DebateStance, SpeechOutcome};

/// Outcome of a motion's debate, fed into vote collection.
#[derive(Debug, Clone)]
pub struct DebateRecord {
    pub motion_id: String,
    pub rounds_completed: u32,
    /// Last declared stance per Archon (red-team theater excluded).
    pub final_stances: HashMap<String, DebateStance>,
    /// Whether each Archon's last stance was explicit.
    pub stance_explicit: HashMap<String, bool>,
    pub consensus_breaks: u32,
    pub red_team: Vec<String>,
    pub violations: u32,
    /// The most recent rendered digest, for vote-context prompts.
    pub last_digest: Option<String>,
}

/// Deterministic red-team selection with rank diversity: round-robin
/// across rank groups (highest rank first, roster order within a
/// group), which yields as many distinct ranks as the roster allows.
pub fn select_red_team(roster: &[ArchonProfile], count: usize) -> Vec<ArchonProfile> {
    let mut by_rank: BTreeMap<Rank, Vec<&ArchonProfile>> = BTreeMap::new();
    for profile in roster {
        by_rank.entry(profile.rank).or_default().push(profile);
    }
    let mut groups: Vec<Vec<&ArchonProfile>> = by_rank.into_values().collect();
    let mut selected = Vec::new();
    let mut depth = 0;
    while selected.len() < count {
        let mut took_any = false;
        for group in &mut groups {
            if selected.len() >= count {
                break;
            }
            if let Some(profile) = group.get(depth) {
                selected.push((*profile).clone());
                took_any = true;
            }
        }
        if !took_any {
            break;
        }
        depth += 1;
    }
    selected
}

/// The orchestrator. Holds the invoker and configuration; per-motion
/// state is threaded explicitly so there are no mutable globals.
pub struct DebateOrchestrator {
    invoker: Arc<dyn AgentInvoker>,
    config: ConclaveConfig,
    retry: RetryPolicy,
}

struct DebateState {
    forced_stance: Option<DebateStance>,
    forced_remaining: u32,
    last_digest_position: usize,
    last_digest: Option<String>,
    record: DebateRecord,
}

impl DebateOrchestrator {
    pub fn new(invoker: Arc<dyn AgentInvoker>, config: ConclaveConfig) -> Self {
        Self {
            invoker,
            config,
            retry: RetryPolicy::default(),
        }
    }

    /// Run the full debate for one motion: `debate_rounds` rounds plus
    /// the red-team round, digests interleaved.
    pub async fn run(
        &self,
        session_id: &str,
        roster: &[ArchonProfile],
        motion: &Motion,
        transcript: &mut Transcript,
    ) -> DebateRecord {
        let mut state = DebateState {
            forced_stance: None,
            forced_remaining: 0,
            last_digest_position: transcript.len(),
            last_digest: None,
            record: DebateRecord {
                motion_id: motion.motion_id.clone(),
                rounds_completed: 0,
                final_stances: HashMap::new(),
                stance_explicit: HashMap::new(),
                consensus_breaks: 0,
                red_team: Vec::new(),
                violations: 0,
                last_digest: None,
            },
        };

        for round in 1..=self.config.debate_rounds {
            let mut round_counts = StanceCounts::default();
            for profile in roster {
                self.speech_turn(profile, motion, round, transcript, &mut state, &mut round_counts)
                    .await;
                self.maybe_digest(round, motion, transcript, &mut state);
            }
            state.record.rounds_completed = round;
            self.maybe_trigger_consensus_break(round, &round_counts, transcript, &mut state);
            debug!(
                session_id,
                motion_id = %motion.motion_id,
                round,
                for_count = round_counts.for_count,
                against_count = round_counts.against_count,
                neutral_count = round_counts.neutral_count,
                "debate round complete"
            );
        }

        if self.config.red_team.enabled {
            self.red_team_round(roster, motion, transcript, &mut state).await;
        }

        // Close out with a final digest so the vote prompts see the
        // complete picture.
        self.flush_digest(self.config.debate_rounds, motion, transcript, &mut state);

        info!(
            session_id,
            motion_id = %motion.motion_id,
            rounds = state.record.rounds_completed,
            violations = state.record.violations,
            consensus_breaks = state.record.consensus_breaks,
            "debate concluded"
        );
        state.record.last_digest = state.last_digest.clone();
        state.record
    }

    async fn speech_turn(
        &self,
        profile: &ArchonProfile,
        motion: &Motion,
        round: u32,
        transcript: &mut Transcript,
        state: &mut DebateState,
        round_counts: &mut StanceCounts,
    ) {
        let forced = if state.forced_remaining > 0 {
            state.forced_stance
        } else {
            None
        };
        if state.forced_remaining > 0 {
            state.forced_remaining -= 1;
        }

        let prompt = prompts::debate_prompt(
            profile,
            motion,
            state.last_digest.as_deref(),
            transcript.tail(6),
            round,
            self.config.exploitation_prompt_enabled,
            forced,
        );

        let reply = invoke_with_retry(
            self.invoker.as_ref(),
            &self.retry,
            &profile.id,
            &prompt,
            self.config.task_timeout(),
        )
        .await;

        let content = match reply {
            Ok(response) => response.raw_content,
            Err(e) => {
                warn!(archon_id = %profile.id, error = %e, "speech invocation failed");
                transcript.append(
                    EntryType::ViolationSpeech,
                    &profile.id,
                    &profile.name,
                    &format!("[no reply after retries: {e}]"),
                    EntryMetadata {
                        round: Some(round),
                        motion_id: Some(motion.motion_id.clone()),
                        forced_stance: forced.is_some(),
                        ..Default::default()
                    },
                );
                state.record.violations += 1;
                return;
            }
        };

        match classify_speech(&content, forced) {
            SpeechOutcome::Violation { reason } => {
                transcript.append(
                    EntryType::ViolationSpeech,
                    &profile.id,
                    &profile.name,
                    &content,
                    EntryMetadata {
                        round: Some(round),
                        motion_id: Some(motion.motion_id.clone()),
                        forced_stance: forced.is_some(),
                        ..Default::default()
                    },
                );
                transcript.procedural(&format!(
                    "Speech by {} struck from consensus: {reason}",
                    profile.name
                ));
                state.record.violations += 1;
            }
            SpeechOutcome::Valid { stance, explicit } => {
                transcript.append(
                    EntryType::Speech,
                    &profile.id,
                    &profile.name,
                    &content,
                    EntryMetadata {
                        position: Some(stance.token().to_string()),
                        stance_explicit: Some(explicit),
                        round: Some(round),
                        forced_stance: forced.is_some(),
                        motion_id: Some(motion.motion_id.clone()),
                        ..Default::default()
                    },
                );
                if !explicit {
                    transcript.procedural(&format!(
                        "STANCE_MISSING: {} defaulted to NEUTRAL",
                        profile.id
                    ));
                }
                round_counts.record(stance);
                state
                    .record
                    .final_stances
                    .insert(profile.id.clone(), stance);
                state
                    .record
                    .stance_explicit
                    .insert(profile.id.clone(), explicit);
            }
        }
    }

    fn maybe_digest(
        &self,
        round: u32,
        motion: &Motion,
        transcript: &mut Transcript,
        state: &mut DebateState,
    ) {
        if transcript.len() - state.last_digest_position < self.config.digest_interval {
            return;
        }
        self.flush_digest(round, motion, transcript, state);
    }

    fn flush_digest(
        &self,
        round: u32,
        motion: &Motion,
        transcript: &mut Transcript,
        state: &mut DebateState,
    ) {
        let window = transcript.since(state.last_digest_position);
        if window.is_empty() {
            return;
        }
        let digest = build_digest(window, round, self.config.max_structural_risks_per_digest);
        let rendered = digest.render();
        transcript.append(
            EntryType::Digest,
            "secretary",
            crate::transcript::SECRETARY_SPEAKER,
            &rendered,
            EntryMetadata {
                round: Some(round),
                motion_id: Some(motion.motion_id.clone()),
                ..Default::default()
            },
        );
        state.last_digest_position = transcript.len();
        state.last_digest = Some(rendered);
    }

    fn maybe_trigger_consensus_break(
        &self,
        round: u32,
        round_counts: &StanceCounts,
        transcript: &mut Transcript,
        state: &mut DebateState,
    ) {
        if !self.config.consensus_break.enabled || round_counts.total() == 0 {
            return;
        }
        let Some(prevailing) = round_counts.prevailing() else {
            return;
        };
        if prevailing == DebateStance::Neutral {
            return;
        }
        if round_counts.dominance() <= self.config.consensus_break.threshold {
            return;
        }
        state.forced_stance = Some(prevailing.opposite());
        state.forced_remaining = self.config.consensus_break.forced_speakers;
        state.record.consensus_breaks += 1;
        transcript.procedural(&format!(
            "CONSENSUS BREAK TRIGGERED after round {round}: {prevailing} holds {:.0}% of the \
             floor; the next {} speakers must steelman {}",
            round_counts.dominance() * 100.0,
            self.config.consensus_break.forced_speakers,
            prevailing.opposite(),
        ));
        info!(round, %prevailing, "consensus break triggered");
    }

    async fn red_team_round(
        &self,
        roster: &[ArchonProfile],
        motion: &Motion,
        transcript: &mut Transcript,
        state: &mut DebateState,
    ) {
        let mut cumulative = StanceCounts::default();
        for stance in state.record.final_stances.values() {
            cumulative.record(*stance);
        }
        let Some(prevailing) = cumulative.prevailing() else {
            debug!("no prevailing stance; red-team round skipped");
            return;
        };
        if prevailing == DebateStance::Neutral {
            return;
        }

        let selected = select_red_team(roster, self.config.red_team.count as usize);
        if let Some(min_ranks) = self.config.red_team.min_unique_ranks {
            let distinct: std::collections::BTreeSet<Rank> =
                selected.iter().map(|p| p.rank).collect();
            if (distinct.len() as u32) < min_ranks {
                warn!(
                    distinct = distinct.len(),
                    required = min_ranks,
                    "roster cannot satisfy red-team rank diversity"
                );
            }
        }

        for profile in &selected {
            let prompt = prompts::red_team_prompt(motion, state.last_digest.as_deref(), prevailing);
            let reply = invoke_with_retry(
                self.invoker.as_ref(),
                &self.retry,
                &profile.id,
                &prompt,
                self.config.task_timeout(),
            )
            .await;

            let content = match reply {
                Ok(response) => response.raw_content,
                Err(e) => {
                    transcript.procedural(&format!(
                        "RED_TEAM_STANCE_MISSING: {} gave no reply ({e})",
                        profile.id
                    ));
                    continue;
                }
            };

            let metadata = EntryMetadata {
                is_red_team: true,
                round: Some(self.config.debate_rounds),
                motion_id: Some(motion.motion_id.clone()),
                ..Default::default()
            };
            match classify_speech(&content, None) {
                SpeechOutcome::Valid { stance, explicit } => {
                    transcript.append(
                        EntryType::RedTeamSpeech,
                        &profile.id,
                        &profile.name,
                        &content,
                        EntryMetadata {
                            position: Some(stance.token().to_string()),
                            stance_explicit: Some(explicit),
                            ..metadata
                        },
                    );
                    if !explicit {
                        transcript.procedural(&format!(
                            "RED_TEAM_STANCE_MISSING: {} defaulted to NEUTRAL",
                            profile.id
                        ));
                    }
                }
                SpeechOutcome::Violation { reason } => {
                    transcript.append(
                        EntryType::ViolationSpeech,
                        &profile.id,
                        &profile.name,
                        &content,
                        metadata,
                    );
                    transcript.procedural(&format!(
                        "Red-team speech by {} struck: {reason}",
                        profile.name
                    ));
                    state.record.violations += 1;
                }
            }
            state.record.red_team.push(profile.id.clone());
        }
    }
}
