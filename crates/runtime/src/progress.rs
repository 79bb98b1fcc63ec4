//! Progress events a run emits while it works.

use serde::{Deserialize, Serialize};

use crate::aggregate::Termination;

/// Longest tool summary carried by [`Progress::ToolCallFinished`], in chars.
pub const SUMMARY_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Progress {
    RoundStarted {
        round: u32,
        max_rounds: u32,
    },
    ToolCallStarted {
        id: String,
        name: String,
    },
    ToolCallFinished {
        id: String,
        name: String,
        is_error: bool,
        duration_ms: u64,
        summary: String,
    },
    FinalAnswer {
        text: String,
        termination: Termination,
    },
}

/// Cut `text` to [`SUMMARY_CHARS`] characters.
pub fn summarize(text: &str) -> String {
    match text.char_indices().nth(SUMMARY_CHARS) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_untouched() {
        assert_eq!(summarize("noon"), "noon");
        let exact = "x".repeat(SUMMARY_CHARS);
        assert_eq!(summarize(&exact), exact);
    }

    #[test]
    fn long_text_cut_on_char_boundary() {
        let long = "é".repeat(SUMMARY_CHARS + 10);
        let summary = summarize(&long);
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), SUMMARY_CHARS + 3);
    }

    #[test]
    fn serializes_with_type_tag() {
        let event = Progress::RoundStarted {
            round: 0,
            max_rounds: 5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "round_started");
        assert_eq!(json["max_rounds"], 5);
    }
}
