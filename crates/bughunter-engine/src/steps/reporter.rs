//! Final report: clean line numbers, strip hedging, backfill from candidates.

use bughunter_core::{RunState, StateUpdate};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Sentinel the reporter passes through untouched.
pub const ERROR_SENTINEL: &str = "ERROR";
pub const UNIDENTIFIED_LINE: &str = "Unable to identify";
pub const INCONCLUSIVE_EXPLANATION: &str = "Analysis inconclusive.";

/// Stand-in line when the raw field had no digits at all.
const PLACEHOLDER_LINE: &str = "1";
const MAX_FALLBACK_CANDIDATES: usize = 3;

fn digits_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("digit regex should compile"))
}

fn hedge_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:Note:|However,? without|Further verification|These potential|It is essential to verify|The exact allowed ranges|This would need to be verified).*$",
        )
        .expect("hedge regex should compile")
    })
}

/// Every run of digits, first-seen order, no repeats, comma-joined.
/// Text without digits becomes `"1"`.
pub fn clean_line_numbers(raw: &str) -> String {
    let mut seen = HashSet::new();
    let numbers: Vec<&str> = digits_re()
        .find_iter(raw)
        .map(|m| m.as_str())
        .filter(|n| seen.insert(*n))
        .collect();

    if numbers.is_empty() {
        PLACEHOLDER_LINE.to_string()
    } else {
        numbers.join(",")
    }
}

/// Cut each line at the first hedging phrase, drop what's left blank, and
/// join the rest into one single-spaced paragraph.
pub fn clean_explanation(text: &str) -> String {
    let kept: Vec<&str> = text
        .trim()
        .lines()
        .map(|line| {
            let line = line.trim();
            match hedge_re().find(line) {
                Some(m) => line[..m.start()].trim_end(),
                None => line,
            }
        })
        .filter(|line| !line.is_empty())
        .collect();

    kept.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn finalize(state: &RunState) -> StateUpdate {
    let mut bug_line = state.bug_line.trim().to_string();
    if !bug_line.is_empty() && bug_line != ERROR_SENTINEL {
        bug_line = clean_line_numbers(&bug_line);
    }
    let mut bug_explanation = clean_explanation(&state.bug_explanation);

    let candidates = &state.candidate_lines;
    if (bug_line.is_empty() || bug_line == PLACEHOLDER_LINE) && !candidates.is_empty() {
        let line_nos: Vec<String> = candidates
            .iter()
            .filter(|c| c.line_no != 0)
            .take(MAX_FALLBACK_CANDIDATES)
            .map(|c| c.line_no.to_string())
            .collect();
        if !line_nos.is_empty() {
            bug_line = line_nos.join(",");
        }
        if bug_explanation.is_empty() {
            bug_explanation = candidates
                .iter()
                .take(MAX_FALLBACK_CANDIDATES)
                .map(|c| c.reason.as_str())
                .filter(|reason| !reason.is_empty())
                .collect::<Vec<_>>()
                .join("; ");
        }
    }

    if bug_line.is_empty() {
        bug_line = UNIDENTIFIED_LINE.to_string();
    }
    if bug_explanation.is_empty() {
        bug_explanation = INCONCLUSIVE_EXPLANATION.to_string();
    }

    StateUpdate {
        bug_line: Some(bug_line),
        bug_explanation: Some(bug_explanation),
        ..Default::default()
    }
}
