//! Instruction templates sent to the generation service.

use std::fmt::Write;

use crate::types::Zone;

/// Instruction for the global quality pass that runs before any zone.
pub const BASE_UPGRADE_INSTRUCTION: &str = "\
QUALITY UPGRADE

Re-render this photograph at the quality of a high-end full-frame camera:
- Increase sharpness and fine detail
- Correct white balance and exposure
- Reduce noise and compression artifacts

RULES:
- Keep the composition, framing, and every object exactly as they are
- Do NOT add, remove, or move anything
- Do NOT change the image dimensions";

/// Characters of each zone instruction kept in the run summary.
pub const SUMMARY_INSTRUCTION_CHARS: usize = 100;

/// Build the instruction for one zone edit.
///
/// `position` is 1-based within `total`. From the second attempt on the
/// wording insists that the previous attempt did not take effect.
#[must_use]
pub fn zone_instruction(instruction: &str, position: usize, total: usize, attempt: u32) -> String {
    let mut out = format!(
        "ZONE EDIT {position} of {total}\n\n\
         Apply ONLY this change, inside the masked area:\n\n{}\n\n\
         RULES:\n\
         - Leave everything outside the masked area pixel-identical\n\
         - Keep the current lighting and quality\n\
         - Do NOT draw boxes, outlines, or markers",
        instruction.trim()
    );
    if attempt >= 2 {
        let _ = write!(
            out,
            "\n\nIMPORTANT (attempt {attempt}): the previous attempt did not apply this change. \
             Make the change clearly visible."
        );
    }
    out
}

/// Build the instruction for a refinement pass over the finished image.
///
/// `summary` is the run's consolidated zone summary (see [`summarize`]).
#[must_use]
pub fn refinement_instruction(summary: &str, user_instruction: &str) -> String {
    let mut out = format!(
        "REFINEMENT EDIT\n\nApply this feedback to the image:\n\n{}\n",
        user_instruction.trim()
    );
    if !summary.is_empty() {
        let _ = write!(out, "\nEdits already applied:\n{summary}\n");
    }
    out.push_str(
        "\nRULES:\n\
         - Make ONLY the requested change\n\
         - Keep the current quality\n\
         - Do NOT add new objects\n\
         - Do NOT draw boxes or markers",
    );
    out
}

/// One line per zone, in processing order:
/// `[Zone k] color: <first 100 chars of instruction>...`
#[must_use]
pub fn summarize(zones: &[Zone]) -> String {
    zones
        .iter()
        .enumerate()
        .map(|(i, zone)| {
            let head: String = zone
                .instruction
                .trim()
                .chars()
                .take(SUMMARY_INSTRUCTION_CHARS)
                .collect();
            format!("[Zone {}] {}: {head}...", i + 1, zone.color)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mask::Mask;
    use crate::types::{Dimensions, ZoneColor};

    fn zone(color: ZoneColor, instruction: &str) -> Zone {
        Zone {
            color,
            instruction: instruction.to_string(),
            mask: Arc::new(Mask::blank(Dimensions::new(1, 1))),
        }
    }

    #[test]
    fn first_attempt_has_no_emphasis() {
        let text = zone_instruction("remove the lamp", 1, 3, 1);
        assert!(text.contains("ZONE EDIT 1 of 3"));
        assert!(text.contains("remove the lamp"));
        assert!(!text.contains("IMPORTANT"));
    }

    #[test]
    fn retry_adds_emphasis() {
        let text = zone_instruction("close the blinds", 2, 3, 2);
        assert!(text.contains("IMPORTANT (attempt 2)"));
    }

    #[test]
    fn refinement_embeds_feedback_and_summary() {
        let text = refinement_instruction("[Zone 1] red: remove the lamp...", "  warmer light ");
        assert!(text.contains("\nwarmer light\n"));
        assert!(text.contains("[Zone 1] red"));
    }

    #[test]
    fn summary_truncates_long_instructions() {
        let long = "x".repeat(150);
        let summary = summarize(&[zone(ZoneColor::Red, "remove the lamp"), zone(ZoneColor::Blue, &long)]);
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines[0], "[Zone 1] red: remove the lamp...");
        assert_eq!(lines[1], format!("[Zone 2] blue: {}...", "x".repeat(100)));
    }

    #[test]
    fn summary_truncates_on_char_boundaries() {
        let summary = summarize(&[zone(ZoneColor::Green, &"é".repeat(120))]);
        assert!(summary.ends_with(&format!("{}...", "é".repeat(100))));
    }

    #[test]
    fn empty_summary() {
        assert_eq!(summarize(&[]), "");
    }
}
