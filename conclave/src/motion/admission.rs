//! Admission Gate — deterministic screening of Motions.
//!
//! The gate evaluates, it never edits: motion content passes through
//! byte-identical whether admitted or rejected. Cross-realm spans
//! escalate by size: one realm is free, two or three require declared
//! co-sponsors, four or more require explicit escalation approval.

use std::collections::BTreeSet;

use regex::Regex;
use tracing::debug;

use super::{AdmissionRecord, Motion, ReasonCode};

/// Phrases that make a motion's scope unenforceable.
const AMBIGUOUS_SCOPE_PATTERN: &str =
    r"(?i)\b(as needed|as appropriate|as necessary|where applicable|and so on|etc\.)";

/// Phrases that smuggle HOW into a WHAT document.
const IMPLEMENTATION_PATTERN: &str =
    r"(?i)\b(implemented (with|using|via)|by means of|using (a|the) (database|script|cron job|api endpoint)|written in \w+)\b";

/// The Admission Gate.
pub struct AdmissionGate {
    known_realms: BTreeSet<String>,
    escalation_threshold: usize,
    ambiguous_scope: Regex,
    implementation_detail: Regex,
}

impl AdmissionGate {
    /// Build a gate over the recognized realm set.
    pub fn new(known_realms: &[&str], escalation_threshold: usize) -> Self {
        Self {
            known_realms: known_realms.iter().map(|r| r.to_string()).collect(),
            escalation_threshold,
            ambiguous_scope: Regex::new(AMBIGUOUS_SCOPE_PATTERN).expect("static regex"),
            implementation_detail: Regex::new(IMPLEMENTATION_PATTERN).expect("static regex"),
        }
    }

    /// Evaluate a Motion. Returns the admission record; the motion
    /// itself is untouched.
    pub fn evaluate(&self, motion: &Motion) -> AdmissionRecord {
        let mut reason_codes = Vec::new();

        if motion.title.trim().is_empty()
            || motion.text.trim().is_empty()
            || motion.success_criteria.trim().is_empty()
            || motion.primary_sponsor.trim().is_empty()
        {
            reason_codes.push(ReasonCode::MissingRequiredFields);
        }

        let primary_count = motion.realms.iter().filter(|r| r.primary).count();
        match primary_count {
            0 => reason_codes.push(ReasonCode::NoPrimaryRealm),
            1 => {}
            _ => reason_codes.push(ReasonCode::MultiPrimaryRealm),
        }

        for realm in &motion.realms {
            if !self.known_realms.contains(&realm.name) {
                reason_codes.push(ReasonCode::InvalidRealm);
                break;
            }
        }

        let scope_text = format!("{}\n{}", motion.text, motion.success_criteria);
        if self.ambiguous_scope.is_match(&scope_text) {
            reason_codes.push(ReasonCode::AmbiguousScope);
        }
        if self.implementation_detail.is_match(&motion.text) {
            reason_codes.push(ReasonCode::ImplementationDetail);
        }

        let span = motion.realm_span();
        let escalation_required = span >= self.escalation_threshold;
        if span >= self.escalation_threshold {
            if !motion.escalation_approved {
                reason_codes.push(ReasonCode::ExcessiveRealmSpan);
            }
        } else if span >= 2 && motion.co_sponsors.is_empty() {
            reason_codes.push(ReasonCode::MissingRequiredCosponsor);
        }

        debug!(
            motion_id = %motion.motion_id,
            span,
            rejected = !reason_codes.is_empty(),
            ?reason_codes,
            "admission evaluated"
        );

        if reason_codes.is_empty() {
            AdmissionRecord::admitted(escalation_required)
        } else {
            AdmissionRecord::rejected(reason_codes, escalation_required)
        }
    }
}
