//! Static candidate extraction.
//!
//! `HeuristicAnalyzer` collects the APIs a snippet calls (these seed the doc
//! queries) and flags a handful of patterns that are almost always wrong.
//! The verifier makes the real call.

use crate::llm::parse::physical_lines;
use anyhow::{Context, Result};
use bughunter_core::{
    AnalysisReport, BoxFuture, CandidateLine, CodeAnalyzer, RunState, StateUpdate,
};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::debug;

const NO_FINDINGS: &str = "No heuristic findings.";

/// Words that look like calls but aren't APIs.
const NON_API_WORDS: &[&str] = &[
    "if", "for", "while", "switch", "return", "sizeof", "catch", "throw", "new", "delete",
    "static_cast", "dynamic_cast", "reinterpret_cast", "const_cast", "decltype", "alignof",
    "typeid", "assert", "main", "elif", "print", "def", "fn",
];

/// Run the analyzer and turn its report into a state update.
pub async fn analyze(analyzer: &dyn CodeAnalyzer, state: &RunState) -> Result<StateUpdate> {
    let report = analyzer
        .analyze(&state.code, &state.context)
        .await
        .context("Code analysis failed")?;

    debug!(
        "Analysis: {} APIs, {} candidate lines",
        report.extracted_apis.len(),
        report.candidate_lines.len()
    );

    Ok(StateUpdate {
        extracted_apis: Some(report.extracted_apis),
        candidate_lines: Some(report.candidate_lines),
        static_analysis: Some(report.static_analysis),
        ..Default::default()
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicAnalyzer;

impl CodeAnalyzer for HeuristicAnalyzer {
    fn analyze<'a>(
        &'a self,
        code: &'a str,
        _context: &'a str,
    ) -> BoxFuture<'a, Result<AnalysisReport>> {
        Box::pin(async move { Ok(analyze_code(code)) })
    }
}

fn call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([A-Za-z_][A-Za-z0-9_]*(?:(?:::|\.|->)[A-Za-z_][A-Za-z0-9_]*)*)\s*\(")
            .expect("call regex should compile")
    })
}

fn condition_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:if|while)\s*\((.*)\)").expect("condition regex should compile")
    })
}

fn lone_assign_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[^=!<>+\-*/%&|^])=(?:[^=]|$)").expect("assign regex should compile")
    })
}

fn inclusive_bound_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bfor\s*\(.*<=\s*[\w.:>\-]*\b(?:size|length|count)\s*\(\s*\)")
            .expect("bound regex should compile")
    })
}

fn empty_body_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:if|while|for)\s*\(.*\)\s*;\s*$")
            .expect("empty body regex should compile")
    })
}

/// Called identifiers in order of first appearance, keywords removed.
pub fn extract_apis(code: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    call_re()
        .captures_iter(code)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .filter(|name| !NON_API_WORDS.contains(name))
        .filter(|name| seen.insert(*name))
        .map(str::to_string)
        .collect()
}

pub fn find_candidates(code: &str) -> Vec<CandidateLine> {
    let mut candidates = Vec::new();
    let mut previous: Option<&str> = None;

    for (idx, raw) in physical_lines(code).into_iter().enumerate() {
        let line_no = idx as u32 + 1;
        let line = raw.trim();

        if let Some(reason) = line_rule(line) {
            candidates.push(CandidateLine::new(line_no, line, reason));
        } else if line.ends_with(';') && previous == Some(line) {
            candidates.push(CandidateLine::new(
                line_no,
                line,
                "statement repeats the previous line",
            ));
        }

        if !line.is_empty() {
            previous = Some(line);
        }
    }

    candidates
}

fn line_rule(line: &str) -> Option<&'static str> {
    if empty_body_re().is_match(line) {
        return Some("condition is followed by an empty statement");
    }
    if let Some(cond) = condition_re().captures(line).and_then(|c| c.get(1)) {
        if lone_assign_re().is_match(cond.as_str()) {
            return Some("assignment inside a condition");
        }
    }
    if inclusive_bound_re().is_match(line) {
        return Some("loop bound uses <= against a size, likely off by one");
    }
    None
}

pub fn analyze_code(code: &str) -> AnalysisReport {
    let candidate_lines = find_candidates(code);
    let static_analysis = if candidate_lines.is_empty() {
        NO_FINDINGS.to_string()
    } else {
        candidate_lines
            .iter()
            .map(|c| format!("L{}: {}", c.line_no, c.reason))
            .collect::<Vec<_>>()
            .join("\n")
    };

    AnalysisReport {
        extracted_apis: extract_apis(code),
        candidate_lines,
        static_analysis,
    }
}
