//! Vote collection — roster order, optimistic tally, async validation
//! handoff.
//!
//! Collection is serialized: each Archon's ballot is parsed before the
//! next is invoked, and the validator is handed the vote without being
//! awaited. Divergence between a voter's declared stance and their
//! ballot is transcribed, acknowledged or not.

use std::sync::Arc;

use tracing::{info, warn};

use crate::archon::ArchonProfile;
use crate::audit::{topics, AuditMessage, AuditPublisher};
use crate::config::ConclaveConfig;
use crate::debate::prompts::vote_prompt;
use crate::debate::{DebateRecord, DebateStance};
use crate::invoker::{invoke_with_retry, AgentInvoker, RetryPolicy};
use crate::motion::Motion;
use crate::transcript::{EntryMetadata, EntryType, Transcript};

use super::parse::{parse_optimistic, ParseSource};
use super::validator::AsyncValidator;
use super::{Tally, Vote, VoteChoice};

/// Phrases that count as acknowledging a stance departure.
const ACKNOWLEDGEMENT_PHRASES: [&str; 6] = [
    "depart",
    "changed my",
    "despite my stance",
    "contrary to my stance",
    "reconsider",
    "acknowledge",
];

fn expected_choice(stance: DebateStance) -> Option<VoteChoice> {
    match stance {
        DebateStance::For => Some(VoteChoice::Aye),
        DebateStance::Against => Some(VoteChoice::Nay),
        DebateStance::Neutral => None,
    }
}

fn acknowledges_divergence(raw: &str) -> bool {
    let lowered = raw.to_ascii_lowercase();
    ACKNOWLEDGEMENT_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
}

/// Collects ballots for one motion.
pub struct VoteCollector {
    invoker: Arc<dyn AgentInvoker>,
    audit: Arc<dyn AuditPublisher>,
    config: ConclaveConfig,
    retry: RetryPolicy,
}

impl VoteCollector {
    pub fn new(
        invoker: Arc<dyn AgentInvoker>,
        audit: Arc<dyn AuditPublisher>,
        config: ConclaveConfig,
    ) -> Self {
        Self {
            invoker,
            audit,
            config,
            retry: RetryPolicy::default(),
        }
    }

    /// Collect one ballot per Archon in roster order, appending votes to
    /// the motion and submitting each to the validator. Returns the
    /// optimistic tally.
    pub async fn collect(
        &self,
        session_id: &str,
        roster: &[ArchonProfile],
        motion: &mut Motion,
        debate: &DebateRecord,
        transcript: &mut Transcript,
        validator: &AsyncValidator,
    ) -> Tally {
        let mut tally = Tally::default();

        for profile in roster {
            let own_stance = debate.final_stances.get(&profile.id).copied();
            let prompt = vote_prompt(motion, debate.last_digest.as_deref(), own_stance);

            let raw_content = match invoke_with_retry(
                self.invoker.as_ref(),
                &self.retry,
                &profile.id,
                &prompt,
                self.config.task_timeout(),
            )
            .await
            {
                Ok(response) => response.raw_content,
                Err(e) => {
                    warn!(archon_id = %profile.id, error = %e, "ballot invocation failed");
                    transcript.procedural(&format!(
                        "No ballot received from {} ({e}); recorded as ABSTAIN",
                        profile.id
                    ));
                    String::new()
                }
            };

            let parsed = parse_optimistic(&raw_content);
            if parsed.source == ParseSource::Defaulted && !raw_content.is_empty() {
                transcript.procedural(&format!(
                    "Ballot from {} was unrecognizable; recorded as ABSTAIN pending validation",
                    profile.id
                ));
            }

            let vote = Vote::cast(
                session_id,
                &motion.motion_id,
                &profile.id,
                &raw_content,
                parsed.choice,
                &parsed.reasoning,
            );
            tally.record(vote.choice);

            self.note_divergence(profile, own_stance, &vote, motion, transcript, debate);

            let message = AuditMessage::new(
                topics::VOTES_CAST,
                session_id,
                serde_json::json!({
                    "choice": vote.choice,
                    "archon_id": profile.id,
                }),
            )
            .motion(&motion.motion_id)
            .vote(&vote.vote_id);
            if let Err(e) = self.audit.publish(message).await {
                info!(error = %e, "votes.cast publish rejected");
            }

            validator.submit(vote.payload(&motion.title, &motion.text));
            motion.votes.push(vote);
        }

        info!(
            session_id,
            motion_id = %motion.motion_id,
            %tally,
            "optimistic tally recorded"
        );
        tally
    }

    fn note_divergence(
        &self,
        profile: &ArchonProfile,
        own_stance: Option<DebateStance>,
        vote: &Vote,
        motion: &Motion,
        transcript: &mut Transcript,
        debate: &DebateRecord,
    ) {
        let Some(stance) = own_stance else {
            return;
        };
        let Some(expected) = expected_choice(stance) else {
            return;
        };
        if vote.choice == expected {
            return;
        }
        let explicit = debate
            .stance_explicit
            .get(&profile.id)
            .copied()
            .unwrap_or(false);
        let acknowledged = acknowledges_divergence(&vote.raw_content);
        let content = if acknowledged {
            format!(
                "{} declared {stance} but voted {}; departure acknowledged in the ballot",
                profile.name, vote.choice
            )
        } else {
            format!(
                "UNEXPLAINED stance divergence: {} declared {stance} but voted {}",
                profile.name, vote.choice
            )
        };
        transcript.append(
            EntryType::StanceVoteDivergence,
            &profile.id,
            &profile.name,
            &content,
            EntryMetadata {
                position: Some(stance.token().to_string()),
                stance_explicit: Some(explicit),
                motion_id: Some(motion.motion_id.clone()),
                vote_id: Some(vote.vote_id.clone()),
                ..Default::default()
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archon::test_roster;
    use crate::audit::BusAuditPublisher;
    use crate::invoker::ScriptedInvoker;
    use crate::motion::{test_motion, RealmRef};
    use std::collections::HashMap;
    use std::time::Duration;

    fn debate_record(stances: &[(&str, DebateStance)]) -> DebateRecord {
        DebateRecord {
            motion_id: "m-1".to_string(),
            rounds_completed: 1,
            final_stances: stances
                .iter()
                .map(|(id, s)| (id.to_string(), *s))
                .collect(),
            stance_explicit: stances.iter().map(|(id, _)| (id.to_string(), true)).collect(),
            consensus_breaks: 0,
            red_team: Vec::new(),
            violations: 0,
            last_digest: None,
        }
    }

    fn setup(
        invoker: Arc<ScriptedInvoker>,
    ) -> (VoteCollector, AsyncValidator, Arc<BusAuditPublisher>) {
        let audit = Arc::new(BusAuditPublisher::new());
        let config = ConclaveConfig::default();
        let validator = AsyncValidator::new(invoker.clone(), audit.clone(), &config);
        (
            VoteCollector::new(invoker, audit.clone(), config),
            validator,
            audit,
        )
    }

    #[tokio::test]
    async fn test_roster_order_collection() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.set_default_reply("{\"choice\":\"AYE\"}\nThe need is clear.");
        let (collector, validator, audit) = setup(invoker);
        let roster = test_roster(6);
        let mut motion = test_motion("m-1", vec![RealmRef::primary("trade")]);
        let mut transcript = Transcript::new();
        let debate = debate_record(&[]);

        let tally = collector
            .collect("s-1", &roster, &mut motion, &debate, &mut transcript, &validator)
            .await;

        assert_eq!(tally.ayes, 6);
        assert_eq!(motion.votes.len(), 6);
        // Votes landed in roster order.
        let voters: Vec<&str> = motion.votes.iter().map(|v| v.archon_id.as_str()).collect();
        assert_eq!(voters[0], "archon-00");
        assert_eq!(voters[5], "archon-05");
        assert_eq!(audit.history_for(topics::VOTES_CAST).len(), 6);

        validator.wait_all(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_ballot_abstains() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.set_default_reply("{\"choice\":\"AYE\"}");
        invoker.script_reply("archon-01", "I cannot decide today.");
        let (collector, validator, _audit) = setup(invoker);
        let roster = test_roster(3);
        let mut motion = test_motion("m-1", vec![RealmRef::primary("trade")]);
        let mut transcript = Transcript::new();

        let tally = collector
            .collect(
                "s-1",
                &roster,
                &mut motion,
                &debate_record(&[]),
                &mut transcript,
                &validator,
            )
            .await;

        assert_eq!(tally.ayes, 2);
        assert_eq!(tally.abstentions, 1);
        assert!(transcript
            .entries()
            .iter()
            .any(|e| e.content.contains("unrecognizable")));
        validator.wait_all(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_unexplained_divergence_flagged() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.set_default_reply("{\"choice\":\"AYE\"}");
        invoker.script_reply("archon-00", "{\"choice\":\"NAY\"}\nNo comment.");
        let (collector, validator, _audit) = setup(invoker);
        let roster = test_roster(3);
        let mut motion = test_motion("m-1", vec![RealmRef::primary("trade")]);
        let mut transcript = Transcript::new();
        let debate = debate_record(&[("archon-00", DebateStance::For)]);

        collector
            .collect("s-1", &roster, &mut motion, &debate, &mut transcript, &validator)
            .await;

        let divergences: Vec<_> = transcript
            .entries()
            .iter()
            .filter(|e| e.entry_type == EntryType::StanceVoteDivergence)
            .collect();
        assert_eq!(divergences.len(), 1);
        assert!(divergences[0].content.contains("UNEXPLAINED stance"));
        validator.wait_all(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_acknowledged_divergence_not_flagged() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.set_default_reply("{\"choice\":\"AYE\"}");
        invoker.script_reply(
            "archon-00",
            "{\"choice\":\"NAY\"}\nI must depart from my earlier stance; the digest changed my view.",
        );
        let (collector, validator, _audit) = setup(invoker);
        let roster = test_roster(3);
        let mut motion = test_motion("m-1", vec![RealmRef::primary("trade")]);
        let mut transcript = Transcript::new();
        let debate = debate_record(&[("archon-00", DebateStance::For)]);

        collector
            .collect("s-1", &roster, &mut motion, &debate, &mut transcript, &validator)
            .await;

        let divergences: Vec<_> = transcript
            .entries()
            .iter()
            .filter(|e| e.entry_type == EntryType::StanceVoteDivergence)
            .collect();
        assert_eq!(divergences.len(), 1);
        assert!(divergences[0].content.contains("acknowledged"));
        assert!(!divergences[0].content.contains("UNEXPLAINED"));
        validator.wait_all(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_neutral_stance_never_diverges() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.set_default_reply("{\"choice\":\"AYE\"}");
        let (collector, validator, _audit) = setup(invoker);
        let roster = test_roster(3);
        let mut motion = test_motion("m-1", vec![RealmRef::primary("trade")]);
        let mut transcript = Transcript::new();
        let debate = debate_record(&[("archon-00", DebateStance::Neutral)]);

        collector
            .collect("s-1", &roster, &mut motion, &debate, &mut transcript, &validator)
            .await;

        assert!(transcript
            .entries()
            .iter()
            .all(|e| e.entry_type != EntryType::StanceVoteDivergence));
        validator.wait_all(Duration::from_secs(5)).await.unwrap();
    }
}
