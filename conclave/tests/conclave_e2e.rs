//! End-to-End Integration Tests for the Conclave Engine
//!
//! Exercises complete flows as they would run in production:
//! - Clean supermajority with no overrides, through to the ledger
//! - Optimistic miscounts corrected by the validation pipeline
//! - Witness RETORT from a three-way deliberator disagreement
//! - Reconciliation timeout blocking adjournment and the ledger
//! - Promotion budget scarcity under concurrency and across restarts
//! - Seed/Motion boundary tripwires

use std::sync::Arc;
use std::time::Duration;

use conclave::{
    ingest_queued_motion, topics, AdmissionGate, AdmissionRecord, AgendaQueue, AsyncValidator,
    BusAuditPublisher, ConclaveConfig, ConclaveEngine, ConsensusBreakConfig, DeliberatorKind,
    EngineError, FileBudgetTracker, FileMotionLedger, InMemoryProfileRepository, Motion,
    MotionDraft, MotionLedger, MotionStatus, MotionType, PromotionBudgetTracker, PromotionOutcome,
    PromotionService, Rank, RealmRef, ReasonCode, RedTeamConfig, Registrar, ScriptedInvoker,
    SeedRegistry, SessionPhase, VoteChoice, VotePayload, WitnessRuling,
};
use tempfile::tempdir;

fn assembly_config(roster_size: u32) -> ConclaveConfig {
    let mut config = ConclaveConfig {
        archon_count: roster_size,
        debate_rounds: 1,
        consensus_break: ConsensusBreakConfig {
            enabled: false,
            ..Default::default()
        },
        red_team: RedTeamConfig {
            enabled: false,
            ..Default::default()
        },
        reconciliation_timeout_seconds: 30,
        ..Default::default()
    };
    config
        .motion_thresholds
        .insert(MotionType::Policy, 2.0 / 3.0);
    config
}

fn roster(size: usize) -> Vec<conclave::ArchonProfile> {
    let ranks = [
        Rank::King,
        Rank::Prince,
        Rank::Duke,
        Rank::Marquis,
        Rank::Earl,
        Rank::President,
        Rank::Knight,
    ];
    (0..size)
        .map(|i| conclave::ArchonProfile {
            id: format!("archon-{i:02}"),
            name: format!("Archon {i:02}"),
            branch: conclave::Branch::Legislative,
            rank: ranks[i % ranks.len()],
            system_prompt: format!("You are archon-{i:02}, a member of the Conclave."),
            backstory: String::new(),
            llm_config: conclave::LlmConfig {
                provider: "openai-compatible".to_string(),
                model: "test-model".to_string(),
                base_url: "http://localhost:0/v1".to_string(),
                temperature: 0.7,
                max_tokens: 1024,
                num_ctx: None,
            },
        })
        .collect()
}

fn admitted_policy_motion(motion_id: &str) -> Motion {
    let mut motion = Motion {
        motion_id: motion_id.to_string(),
        title: "Standardize realm tariffs".to_string(),
        motion_type: MotionType::Policy,
        realms: vec![RealmRef::primary("trade")],
        primary_sponsor: "archon-00".to_string(),
        co_sponsors: Vec::new(),
        escalation_approved: false,
        text: "Resolved, that tariffs between realms shall follow a single published schedule."
            .to_string(),
        success_criteria: "A ratified schedule referenced by all realm treasuries.".to_string(),
        source_seed_refs: vec!["seed-1".to_string()],
        admission_record: None,
        status: MotionStatus::Proposed,
        proposed_at: chrono::Utc::now(),
        seconded_by: None,
        seconded_at: None,
        votes: Vec::new(),
        result: None,
        passed_at: None,
    };
    motion.admission_record = Some(AdmissionRecord::admitted(false));
    motion
}

fn build_engine(
    roster_size: usize,
) -> (ConclaveEngine, Arc<ScriptedInvoker>, Arc<BusAuditPublisher>) {
    let invoker = Arc::new(ScriptedInvoker::new());
    let audit = Arc::new(BusAuditPublisher::new());
    let profiles = Arc::new(InMemoryProfileRepository::new(roster(roster_size)).unwrap());
    let engine = ConclaveEngine::new(
        assembly_config(roster_size as u32),
        profiles,
        invoker.clone(),
        audit.clone(),
    )
    .unwrap();
    (engine, invoker, audit)
}

/// Queue one debate reply and one ballot per Archon. The scripted
/// invoker serves them FIFO, so the debate consumes the first and the
/// vote the second.
fn script_session(invoker: &ScriptedInvoker, ballots: &[(usize, &str)]) {
    for (index, ballot) in ballots {
        let archon_id = format!("archon-{index:02}");
        invoker.script_reply(&archon_id, "STANCE: FOR\nThe schedule serves every realm.");
        invoker.script_reply(&archon_id, ballot);
    }
}

async fn run_motion_to_adjournment(
    engine: &mut ConclaveEngine,
) -> Result<conclave::ReconciliationSummary, EngineError> {
    engine.open().unwrap();
    let motion_id = engine
        .introduce_motion(admitted_policy_motion("m-tariffs"))
        .unwrap();
    engine.second_motion(&motion_id, "archon-01").unwrap();
    engine.run_debate(&motion_id).await.unwrap();
    engine.collect_votes(&motion_id).await.unwrap();
    engine.adjourn().await
}

// Scenario: clean supermajority, no overrides, one mandate written.
#[tokio::test]
async fn test_clean_majority_no_overrides() {
    let size = 72;
    let (mut engine, invoker, audit) = build_engine(size);

    // 48 AYE, 24 NAY, every deliberator confirming.
    let ballots: Vec<(usize, &str)> = (0..size)
        .map(|i| {
            if i < 48 {
                (i, "{\"choice\":\"AYE\"}\nThe need is proven.")
            } else {
                (i, "{\"choice\":\"NAY\"}\nThe cost is unproven.")
            }
        })
        .collect();
    script_session(&invoker, &ballots);

    let summary = run_motion_to_adjournment(&mut engine).await.unwrap();
    assert_eq!(summary.overrides_applied, 0);
    assert_eq!(engine.session().phase, SessionPhase::Adjourned);

    let motion = engine.session().motion("m-tariffs").unwrap();
    assert_eq!(motion.status, MotionStatus::Passed);
    let result = motion.result.unwrap();
    assert_eq!(result.tally.ayes, 48);
    assert_eq!(result.tally.nays, 24);
    assert!(result.passed);

    // Exactly one votes.validated per Archon, none demanding overrides.
    let validated = audit.history_for(topics::VOTES_VALIDATED);
    assert_eq!(validated.len(), 72);
    assert!(validated
        .iter()
        .all(|m| m.payload["override_required"] == false));

    // One mandate lands in the ledger.
    let dir = tempdir().unwrap();
    let ledger = FileMotionLedger::new(dir.path()).unwrap();
    let mandates = Registrar::ratify(engine.session(), &ledger).unwrap();
    assert_eq!(mandates.len(), 1);
    assert_eq!(mandates[0].motion_id, "m-tariffs");
    assert!(dir.path().join("ratified_mandates.json").exists());
}

// Scenario: malformed ballots optimistically ABSTAIN, validators
// recover the real intent, and the motion flips to passed.
#[tokio::test]
async fn test_optimistic_miscounts_corrected() {
    let size = 72;
    let (mut engine, invoker, _audit) = build_engine(size);

    // 43 clean AYE, 24 clean NAY, 5 rambles the optimistic parser
    // cannot read. Validated: 48 AYE vs 24 NAY = exactly 2/3.
    let ballots: Vec<(usize, &str)> = (0..size)
        .map(|i| {
            if i < 43 {
                (i, "{\"choice\":\"AYE\"}")
            } else if i < 67 {
                (i, "{\"choice\":\"NAY\"}")
            } else {
                (i, "Let the record show that I am persuaded after all.")
            }
        })
        .collect();
    script_session(&invoker, &ballots);
    for i in 67..72 {
        invoker.set_validation_choice(&format!("archon-{i:02}"), VoteChoice::Aye);
    }

    let summary = run_motion_to_adjournment(&mut engine).await.unwrap();
    assert_eq!(summary.overrides_applied, 5);
    assert_eq!(summary.results_changed.len(), 1);

    let motion = engine.session().motion("m-tariffs").unwrap();
    let result = motion.result.unwrap();
    assert_eq!(result.tally.ayes, 48);
    assert_eq!(result.tally.nays, 24);
    assert_eq!(result.tally.abstentions, 0);
    // Tally invariant: every ballot accounted for.
    assert_eq!(result.tally.total() as usize, motion.votes.len());
    assert!(result.passed);
    assert_eq!(motion.status, MotionStatus::Passed);

    // Five correction entries in the transcript.
    let corrections = engine
        .session()
        .transcript
        .entries()
        .iter()
        .filter(|e| e.content.contains("Vote correction"))
        .count();
    assert_eq!(corrections, 5);
}

// Scenario: three-way deliberator disagreement with a dead adjudicator
// yields ABSTAIN under a RETORT ruling, and no override.
#[tokio::test]
async fn test_witness_retort_on_three_way_disagreement() {
    let invoker = Arc::new(ScriptedInvoker::new());
    let audit = Arc::new(BusAuditPublisher::new());
    let config = assembly_config(3);
    let validator = AsyncValidator::new(invoker.clone(), audit.clone(), &config);

    invoker.set_deliberator_choice("archon-00", DeliberatorKind::TextAnalysis, VoteChoice::Aye);
    invoker.set_deliberator_choice("archon-00", DeliberatorKind::JsonValidation, VoteChoice::Nay);
    invoker.set_deliberator_choice(
        "archon-00",
        DeliberatorKind::WitnessConfirm,
        VoteChoice::Abstain,
    );
    invoker.fail_adjudication("archon-00");

    validator.submit(VotePayload {
        vote_id: "v-contested".to_string(),
        session_id: "s-1".to_string(),
        motion_id: "m-1".to_string(),
        archon_id: "archon-00".to_string(),
        raw_content: "A ballot of many minds.".to_string(),
        optimistic_choice: VoteChoice::Abstain,
        motion_title: "Tariffs".to_string(),
        motion_text: "Resolved.".to_string(),
    });
    validator.wait_all(Duration::from_secs(10)).await.unwrap();

    let jobs = validator.completed_jobs();
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.adjudication.final_vote, VoteChoice::Abstain);
    assert_eq!(job.adjudication.ruling, WitnessRuling::Retort);
    assert!(job.adjudication.witness_statement.is_some());
    assert!(!job.override_required());

    // The non-consensus event and the witness statement both hit the
    // audit stream.
    assert_eq!(audit.history_for(topics::CONSENSUS_FAILURES).len(), 1);
    assert_eq!(audit.history_for(topics::WITNESS_STATEMENTS).len(), 1);
}

// Scenario: slow validations exhaust the drain budget; the session
// stays open and the ledger stays empty.
#[tokio::test]
async fn test_reconciliation_timeout_blocks_adjournment() {
    let size = 72;
    let invoker = Arc::new(ScriptedInvoker::new());
    let audit = Arc::new(BusAuditPublisher::new());
    let profiles = Arc::new(InMemoryProfileRepository::new(roster(size)).unwrap());
    let mut config = assembly_config(size as u32);
    config.voting_concurrency = 2;
    config.reconciliation_timeout_seconds = 1;
    let mut engine = ConclaveEngine::new(config, profiles, invoker.clone(), audit).unwrap();
    invoker.set_default_reply("STANCE: FOR\nProceed.");

    engine.open().unwrap();
    let motion_id = engine
        .introduce_motion(admitted_policy_motion("m-tariffs"))
        .unwrap();
    engine.second_motion(&motion_id, "archon-01").unwrap();
    engine.run_debate(&motion_id).await.unwrap();

    invoker.set_default_reply("{\"choice\":\"AYE\"}");
    invoker.set_validation_delay(Duration::from_secs(120));
    engine.collect_votes(&motion_id).await.unwrap();

    let result = engine.adjourn().await;
    match result {
        Err(EngineError::Reconcile(conclave::ReconcileError::Incomplete {
            pending_vote_ids,
            ..
        })) => {
            assert_eq!(pending_vote_ids.len(), 72);
        }
        other => panic!("expected incomplete reconciliation, got {other:?}"),
    }
    assert_eq!(engine.session().phase, SessionPhase::Adjourning);
    assert!(engine
        .session()
        .transcript
        .entries()
        .iter()
        .any(|e| e.content.contains("RECONCILIATION TIMEOUT")));

    // No mandate can be written from a session that never adjourned.
    let dir = tempdir().unwrap();
    let ledger = FileMotionLedger::new(dir.path()).unwrap();
    let err = Registrar::ratify(engine.session(), &ledger).unwrap_err();
    assert!(matches!(err, conclave::LedgerError::SessionNotAdjourned(_)));
    assert!(ledger.index().unwrap().is_empty());
}

// Scenario: promotion budget of 3 under 10 concurrent attempts, with
// scarcity surviving a process restart.
#[test]
fn test_promotion_budget_scarcity_under_concurrency() {
    let dir = tempdir().unwrap();
    let tracker = Arc::new(FileBudgetTracker::new(dir.path(), 3).unwrap());

    let king = conclave::ArchonProfile {
        id: "king-0".to_string(),
        name: "King 0".to_string(),
        branch: conclave::Branch::Legislative,
        rank: Rank::King,
        system_prompt: String::new(),
        backstory: String::new(),
        llm_config: conclave::LlmConfig {
            provider: "openai-compatible".to_string(),
            model: "test-model".to_string(),
            base_url: "http://localhost:0/v1".to_string(),
            temperature: 0.7,
            max_tokens: 1024,
            num_ctx: None,
        },
    };

    let mut handles = Vec::new();
    for attempt in 0..10 {
        let tracker = tracker.clone();
        let king = king.clone();
        handles.push(std::thread::spawn(move || {
            let service = PromotionService::new(
                tracker,
                AdmissionGate::new(&["trade", "war", "law"], 4),
            );
            let mut registry = SeedRegistry::new();
            let seed_id = registry
                .submit("archon-05", &format!("idea {attempt}"), "direct")
                .seed_id
                .clone();
            let draft = MotionDraft {
                title: format!("Motion {attempt}"),
                motion_type: MotionType::Policy,
                realms: vec![RealmRef::primary("trade")],
                co_sponsors: Vec::new(),
                escalation_approved: false,
                text: "Resolved, that the schedule be published.".to_string(),
                success_criteria: "A published schedule.".to_string(),
            };
            service
                .promote("cycle-1", &king, &[seed_id], draft, &mut registry)
                .unwrap()
        }));
    }

    let outcomes: Vec<PromotionOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let promoted = outcomes
        .iter()
        .filter(|o| matches!(o, PromotionOutcome::Promoted(_)))
        .count();
    let exceeded = outcomes
        .iter()
        .filter(|o| matches!(o, PromotionOutcome::BudgetExceeded { .. }))
        .count();
    assert_eq!(promoted, 3);
    assert_eq!(exceeded, 7);

    // A fresh tracker over the same directory — a restarted process —
    // still refuses the fourth promotion in the same cycle.
    let restarted = FileBudgetTracker::new(dir.path(), 3).unwrap();
    let decision = restarted.try_consume("cycle-1", "king-0").unwrap();
    assert!(!decision.is_consumed());

    // A different cycle is untouched.
    assert!(restarted.try_consume("cycle-2", "king-0").unwrap().is_consumed());
}

// Scenario: legacy queued-motion input creates exactly one Seed, and a
// Seed offered to the agenda trips the boundary.
#[test]
fn test_boundary_tripwires() {
    let mut registry = SeedRegistry::new();
    let seed_id = ingest_queued_motion(
        &mut registry,
        "consolidator",
        "Queued: tariff reform",
        "The recommender believes this should be on the agenda.",
    );

    // Exactly one Seed; nothing else came into being.
    assert_eq!(registry.len(), 1);
    let seed = registry.get(&seed_id).unwrap();
    assert_eq!(seed.provenance, "legacy-queued-motion");
    assert_eq!(seed.status, conclave::SeedStatus::Recorded);

    // Scheduling the Seed as if it were a Motion is a recorded breach.
    let mut agenda = AgendaQueue::new();
    let err = agenda.schedule_seed(seed).unwrap_err();
    match err {
        conclave::motion::agenda::AgendaError::Breach(breach) => {
            assert_eq!(breach.code, ReasonCode::SeedEscalationBlocked);
        }
        other => panic!("expected boundary breach, got {other:?}"),
    }
    assert_eq!(agenda.breaches().len(), 1);
    assert!(agenda.is_empty());
}
