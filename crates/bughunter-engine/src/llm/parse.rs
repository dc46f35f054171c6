use super::client::truncate_str;
use bughunter_core::Confidence;

const TRUNCATION_MARKER: &str = "\n... [truncated]";

const CONFIDENCE_LABEL: &str = "CONFIDENCE:";
const BUG_LINES_LABEL: &str = "BUG_LINES:";
const BUG_LINE_LABEL: &str = "BUG_LINE:";
const EXPLANATION_MARKER: &str = "EXPLANATION:";
const REFINED_QUERIES_MARKER: &str = "REFINED_QUERIES:";

/// Hard character cap with a trailing marker when anything was cut.
pub(crate) fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    let kept = truncate_str(text, max_chars);
    if kept.len() == text.len() {
        text.to_string()
    } else {
        format!("{}{}", kept, TRUNCATION_MARKER)
    }
}

/// Split on `\r\n`, `\n`, or a lone `\r`. A trailing terminator does not
/// start an extra empty line.
pub(crate) fn physical_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        match rest.find(['\r', '\n']) {
            Some(idx) => {
                lines.push(&rest[..idx]);
                let width = if rest[idx..].starts_with("\r\n") { 2 } else { 1 };
                rest = &rest[idx + width..];
            }
            None => {
                lines.push(rest);
                break;
            }
        }
    }
    lines
}

/// Prefix every physical line with its 1-based number (`N: line`).
pub(crate) fn number_lines(code: &str) -> String {
    physical_lines(code)
        .into_iter()
        .enumerate()
        .map(|(i, line)| format!("{}: {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fields pulled out of the verifier's labeled-line reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifierResponse {
    pub confidence: Confidence,
    /// Raw `BUG_LINES:` / `BUG_LINE:` value, left for the reporter to clean.
    pub bug_line: String,
    pub explanation: String,
    pub refined_queries: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineLabel {
    Confidence,
    BugLines,
}

/// Match a trimmed line against the single-line labels. `BUG_LINES:` and
/// `BUG_LINE:` feed the same field.
fn classify_line(line: &str) -> Option<(LineLabel, &str)> {
    if line.starts_with(CONFIDENCE_LABEL) {
        Some((LineLabel::Confidence, after_first_colon(line)))
    } else if line.starts_with(BUG_LINES_LABEL) || line.starts_with(BUG_LINE_LABEL) {
        Some((LineLabel::BugLines, after_first_colon(line)))
    } else {
        None
    }
}

fn after_first_colon(line: &str) -> &str {
    line.split_once(':').map(|(_, rest)| rest.trim()).unwrap_or("")
}

/// Parse the verifier reply.
///
/// Single-line labels are matched on trimmed lines, case-sensitively, and a
/// later occurrence overwrites an earlier one. The explanation runs from the
/// first `EXPLANATION:` to the first `REFINED_QUERIES:` after it. Missing
/// labels leave their field at its default.
pub fn parse_verifier_response(text: &str) -> VerifierResponse {
    let mut response = VerifierResponse::default();

    for line in text.lines() {
        match classify_line(line.trim()) {
            Some((LineLabel::Confidence, value)) => {
                response.confidence = Confidence::parse(value);
            }
            Some((LineLabel::BugLines, value)) => {
                response.bug_line = value.to_string();
            }
            None => {}
        }
    }

    if let Some((_, section)) = text.split_once(EXPLANATION_MARKER) {
        let section = match section.split_once(REFINED_QUERIES_MARKER) {
            Some((explanation, _)) => explanation,
            None => section,
        };
        response.explanation = section.trim().to_string();
    }

    if let Some((_, section)) = text.split_once(REFINED_QUERIES_MARKER) {
        let section = match section.split_once(REFINED_QUERIES_MARKER) {
            Some((queries, _)) => queries,
            None => section,
        };
        response.refined_queries = section
            .lines()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string)
            .collect();
    }

    response
}
