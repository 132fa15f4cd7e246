//! Prompt assembly for debate and voting turns.
//!
//! Every prompt opens with the fixed Participation Protocol header; the
//! Archon's persona rides separately as the system message. Protocol
//! versioning: bump `PROTOCOL_VERSION` whenever header content changes
//! so transcripts can be traced to the protocol that produced them.

use crate::archon::ArchonProfile;
use crate::motion::Motion;
use crate::transcript::TranscriptEntry;

use super::stance::DebateStance;

/// Protocol version. Bump on any header content change.
pub const PROTOCOL_VERSION: &str = "1.2.0";

/// The fixed Participation Protocol header. Enforces deterministic
/// output shapes; persona cores supply the content diversity.
pub const PARTICIPATION_PROTOCOL: &str = "\
## Participation Protocol

- Speak in your own voice as one member of the assembly. Do not reveal hidden \
reasoning; replies containing markers such as `Thought:`, `Analysis:`, or \
`DELIBERATION RECORD` are rejected as protocol violations.
- Debate replies MUST begin with `STANCE: FOR`, `STANCE: AGAINST`, or \
`STANCE: NEUTRAL` on its own line, followed by your argument.
- Vote replies MUST begin with a single JSON line: \
{\"choice\":\"AYE\"} or {\"choice\":\"NAY\"} or {\"choice\":\"ABSTAIN\"}, \
optionally followed by your reasoning.
- Stay on the motion under consideration. Off-topic replies are struck from \
the record.
";

/// Adversarial-consideration block appended when exploitation prompting
/// is enabled.
pub const EXPLOITATION_BLOCK: &str = "\
## Adversarial Consideration

Before declaring your stance, identify at least one plausible way this motion \
could be exploited, gamed, or abused if adopted as written. Name the exploit \
explicitly in your argument, then take your stance with that exploit in view.
";

/// Cap on how many recent entries ride along in a debate prompt.
const RECENT_ENTRY_COUNT: usize = 6;
/// Per-entry excerpt cap.
const RECENT_ENTRY_CHARS: usize = 400;

fn truncate(text: &str, cap: usize) -> &str {
    match text.char_indices().nth(cap) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn motion_context(motion: &Motion) -> String {
    format!(
        "## Motion Under Consideration\n\n**{title}** ({motion_type})\n\n{text}\n\n\
         Success criteria: {criteria}\n",
        title = motion.title,
        motion_type = motion.motion_type,
        text = motion.text,
        criteria = motion.success_criteria,
    )
}

fn recent_entries_block(recent: &[TranscriptEntry]) -> String {
    if recent.is_empty() {
        return String::new();
    }
    let mut block = String::from("## Recent Floor Activity\n\n");
    for entry in recent.iter().rev().take(RECENT_ENTRY_COUNT).rev() {
        block.push_str(&format!(
            "- {}: {}\n",
            entry.speaker_name,
            truncate(&entry.content, RECENT_ENTRY_CHARS).replace('\n', " "),
        ));
    }
    block
}

/// Assemble a debate-turn prompt.
pub fn debate_prompt(
    profile: &ArchonProfile,
    motion: &Motion,
    digest: Option<&str>,
    recent: &[TranscriptEntry],
    round: u32,
    exploitation: bool,
    forced: Option<DebateStance>,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(PARTICIPATION_PROTOCOL);
    prompt.push('\n');
    prompt.push_str(&motion_context(motion));
    if let Some(digest) = digest {
        prompt.push('\n');
        prompt.push_str(digest);
        prompt.push('\n');
    }
    prompt.push('\n');
    prompt.push_str(&recent_entries_block(recent));
    if exploitation {
        prompt.push('\n');
        prompt.push_str(EXPLOITATION_BLOCK);
    }
    if let Some(forced_stance) = forced {
        prompt.push_str(&format!(
            "\n## Consensus Break Order\n\nThe floor has converged prematurely. You are \
             ordered to steelman the {forced_stance} position: open with \
             `STANCE: {forced_stance}` and present the strongest honest case for it.\n",
        ));
    }
    if !profile.backstory.is_empty() {
        prompt.push_str(&format!("\n## Your Backstory\n\n{}\n", profile.backstory));
    }
    prompt.push_str(&format!(
        "\nRound {round}. Deliver your speech on the motion now.\n"
    ));
    prompt
}

/// Assemble a red-team-turn prompt: argue against the prevailing stance.
pub fn red_team_prompt(
    motion: &Motion,
    digest: Option<&str>,
    prevailing: DebateStance,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(PARTICIPATION_PROTOCOL);
    prompt.push('\n');
    prompt.push_str(&motion_context(motion));
    if let Some(digest) = digest {
        prompt.push('\n');
        prompt.push_str(digest);
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "\n## Red-Team Orders\n\nThe prevailing stance on the floor is {prevailing}. \
         You are drafted to the red team: open with `STANCE: {opposite}` and attack \
         the prevailing position at its strongest point before the vote is called.\n",
        opposite = prevailing.opposite(),
    ));
    prompt
}

/// Assemble a vote-casting prompt.
pub fn vote_prompt(
    motion: &Motion,
    final_digest: Option<&str>,
    own_last_stance: Option<DebateStance>,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(PARTICIPATION_PROTOCOL);
    prompt.push('\n');
    prompt.push_str(&motion_context(motion));
    if let Some(digest) = final_digest {
        prompt.push('\n');
        prompt.push_str(digest);
        prompt.push('\n');
    }
    if let Some(stance) = own_last_stance {
        prompt.push_str(&format!(
            "\nYour declared stance in debate was {stance}. If your vote departs from \
             it, acknowledge the departure in your reasoning.\n",
        ));
    }
    prompt.push_str(
        "\nThe question is called. Cast your vote now, beginning with the single \
         JSON line required by the protocol.\n",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archon::{test_profile, Rank};
    use crate::motion::{test_motion, RealmRef};

    fn motion() -> Motion {
        test_motion("m-1", vec![RealmRef::primary("trade")])
    }

    #[test]
    fn test_debate_prompt_has_protocol_and_motion() {
        let profile = test_profile("archon-00", Rank::Duke);
        let prompt = debate_prompt(&profile, &motion(), None, &[], 1, false, None);
        assert!(prompt.contains("## Participation Protocol"));
        assert!(prompt.contains("STANCE: FOR"));
        assert!(prompt.contains("Standardize realm tariffs"));
        assert!(!prompt.contains("Adversarial Consideration"));
    }

    #[test]
    fn test_exploitation_block_toggles() {
        let profile = test_profile("archon-00", Rank::Duke);
        let prompt = debate_prompt(&profile, &motion(), None, &[], 1, true, None);
        assert!(prompt.contains("## Adversarial Consideration"));
        assert!(prompt.contains("at least one plausible way"));
    }

    #[test]
    fn test_forced_stance_block() {
        let profile = test_profile("archon-00", Rank::Duke);
        let prompt = debate_prompt(
            &profile,
            &motion(),
            None,
            &[],
            2,
            false,
            Some(DebateStance::Against),
        );
        assert!(prompt.contains("## Consensus Break Order"));
        assert!(prompt.contains("STANCE: AGAINST"));
    }

    #[test]
    fn test_recent_entries_truncated() {
        let profile = test_profile("archon-00", Rank::Duke);
        let mut transcript = crate::transcript::Transcript::new();
        for i in 0..10 {
            transcript.procedural(&format!("note {i} {}", "x".repeat(600)));
        }
        let prompt = debate_prompt(
            &profile,
            &motion(),
            None,
            transcript.entries(),
            1,
            false,
            None,
        );
        // Only the most recent entries appear.
        assert!(!prompt.contains("note 0 "));
        assert!(prompt.contains("note 9 "));
        // And each is excerpted.
        assert!(!prompt.contains(&"x".repeat(500)));
    }

    #[test]
    fn test_red_team_prompt_inverts_prevailing() {
        let prompt = red_team_prompt(&motion(), None, DebateStance::For);
        assert!(prompt.contains("prevailing stance on the floor is FOR"));
        assert!(prompt.contains("STANCE: AGAINST"));
    }

    #[test]
    fn test_vote_prompt_mentions_stance() {
        let prompt = vote_prompt(&motion(), Some("## Debate Digest\n..."), Some(DebateStance::For));
        assert!(prompt.contains("{\"choice\":\"AYE\"}"));
        assert!(prompt.contains("declared stance in debate was FOR"));
        assert!(prompt.contains("## Debate Digest"));
    }
}
