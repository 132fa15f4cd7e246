//! Markdown persistence for transcripts.
//!
//! The persisted form is a sequence of blocks:
//!
//! ```text
//! **[HH:MM:SS] <Speaker>:**
//! <content>
//! ```
//!
//! Parsers must treat `Secretary`, `[PROCEDURAL]`, and `[SYSTEM]` as
//! non-Archon speakers and strip procedural markers when extracting
//! Archon speech.

use chrono::Timelike;
use regex::Regex;

use super::{is_non_archon_speaker, is_procedural_content, Transcript, TranscriptEntry};

/// Render one entry as a markdown block.
pub fn render_entry(entry: &TranscriptEntry) -> String {
    format!(
        "**[{:02}:{:02}:{:02}] {}:**\n{}\n",
        entry.timestamp.hour(),
        entry.timestamp.minute(),
        entry.timestamp.second(),
        entry.speaker_name,
        entry.content,
    )
}

/// Render the whole transcript.
pub fn render_transcript(transcript: &Transcript) -> String {
    transcript
        .entries()
        .iter()
        .map(render_entry)
        .collect::<Vec<_>>()
        .join("\n")
}

/// A block parsed back out of the markdown form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBlock {
    /// Wall-clock text exactly as persisted (`HH:MM:SS`).
    pub time_text: String,
    pub speaker: String,
    pub content: String,
}

fn header_regex() -> Regex {
    Regex::new(r"^\*\*\[(\d{2}:\d{2}:\d{2})\] (.+?):\*\*$").expect("static regex")
}

/// Parse a persisted transcript back into blocks. Content lines between
/// headers belong to the preceding header; leading/trailing blank lines
/// are trimmed.
pub fn parse_transcript(text: &str) -> Vec<ParsedBlock> {
    let header = header_regex();
    let mut blocks: Vec<ParsedBlock> = Vec::new();
    let mut current: Option<ParsedBlock> = None;
    let mut content_lines: Vec<&str> = Vec::new();

    let finish = |block: Option<ParsedBlock>, lines: &mut Vec<&str>, out: &mut Vec<ParsedBlock>| {
        if let Some(mut block) = block {
            block.content = lines.join("\n").trim().to_string();
            out.push(block);
        }
        lines.clear();
    };

    for line in text.lines() {
        if let Some(captures) = header.captures(line) {
            finish(current.take(), &mut content_lines, &mut blocks);
            current = Some(ParsedBlock {
                time_text: captures[1].to_string(),
                speaker: captures[2].to_string(),
                content: String::new(),
            });
        } else if current.is_some() {
            content_lines.push(line);
        }
    }
    finish(current, &mut content_lines, &mut blocks);
    blocks
}

/// Extract Archon speech from a persisted transcript: non-Archon
/// speakers and procedural notes are skipped, and procedural marker
/// lines are stripped out of what remains.
pub fn extract_archon_speech(text: &str) -> Vec<ParsedBlock> {
    parse_transcript(text)
        .into_iter()
        .filter(|block| !is_non_archon_speaker(&block.speaker))
        .filter(|block| !is_procedural_content(&block.content))
        .map(|mut block| {
            block.content = block
                .content
                .lines()
                .filter(|line| !is_procedural_content(line))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string();
            block
        })
        .filter(|block| !block.content.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{EntryMetadata, EntryType};

    fn sample_transcript() -> Transcript {
        let mut transcript = Transcript::new();
        transcript.append(
            EntryType::Speech,
            "archon-00",
            "Baal",
            "STANCE: FOR\nThe motion serves the realm.",
            EntryMetadata::default(),
        );
        transcript.procedural("STANCE_MISSING: archon-01 defaulted to NEUTRAL");
        transcript.append(
            EntryType::Speech,
            "archon-02",
            "Paimon",
            "STANCE: AGAINST\nThe motion overreaches.",
            EntryMetadata::default(),
        );
        transcript
    }

    #[test]
    fn test_render_shape() {
        let transcript = sample_transcript();
        let text = render_transcript(&transcript);
        assert!(text.contains("] Baal:**"));
        assert!(text.contains("] Secretary:**"));
        let header = header_regex();
        let headers = text.lines().filter(|l| header.is_match(l)).count();
        assert_eq!(headers, 3);
    }

    #[test]
    fn test_parse_roundtrip() {
        let transcript = sample_transcript();
        let text = render_transcript(&transcript);
        let blocks = parse_transcript(&text);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].speaker, "Baal");
        assert!(blocks[0].content.contains("serves the realm"));
        assert_eq!(blocks[1].speaker, "Secretary");
    }

    #[test]
    fn test_extract_skips_secretary() {
        let transcript = sample_transcript();
        let text = render_transcript(&transcript);
        let speeches = extract_archon_speech(&text);
        assert_eq!(speeches.len(), 2);
        assert!(speeches.iter().all(|b| b.speaker != "Secretary"));
    }

    #[test]
    fn test_extract_strips_marker_lines() {
        let text = "**[10:00:00] Paimon:**\nSTANCE: AGAINST\nUNEXPLAINED stance noted earlier\n";
        let speeches = extract_archon_speech(text);
        // The whole block matches a procedural pattern, so it is skipped.
        assert!(speeches.is_empty());

        let text = "**[10:00:01] Paimon:**\nSTANCE: AGAINST\nThe motion overreaches.\n";
        let speeches = extract_archon_speech(text);
        assert_eq!(speeches.len(), 1);
        assert!(speeches[0].content.contains("overreaches"));
    }

    #[test]
    fn test_extract_skips_digest_blocks() {
        let text = "**[10:00:00] Secretary:**\n## Debate Digest\nPosition Summary: 3 FOR | 1 AGAINST | 0 NEUTRAL\n\n**[10:00:05] Baal:**\nSTANCE: FOR\nProceed.\n";
        let speeches = extract_archon_speech(text);
        assert_eq!(speeches.len(), 1);
        assert_eq!(speeches[0].speaker, "Baal");
    }

    #[test]
    fn test_parse_tolerates_preamble() {
        let text = "# Session transcript\n\n**[09:00:00] Baal:**\nPresent.\n";
        let blocks = parse_transcript(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].time_text, "09:00:00");
    }
}
