//! Per-row run state and the partial updates that steps return.
//!
//! A `RunState` is created once per input row and threaded by value through
//! every workflow step. Steps never mutate it directly: they return a
//! `StateUpdate` and the workflow merges it with [`RunState::apply`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Loop cap used when neither config nor CLI provides one.
pub const DEFAULT_MAX_ITERATIONS: u32 = 2;

/// Relevance assigned to search results that carry no score of their own.
pub const DEFAULT_DOC_SCORE: f64 = 0.5;

/// Verifier's self-reported certainty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    #[default]
    Low,
}

impl Confidence {
    /// Anything other than "high" (case-insensitive, surrounding whitespace
    /// ignored) is `Low`.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("high") {
            Confidence::High
        } else {
            Confidence::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Low => "low",
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A suspect source line proposed by static analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateLine {
    /// 1-based line number; 0 means "unknown" and is skipped by the reporter.
    #[serde(default)]
    pub line_no: u32,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub reason: String,
}

impl CandidateLine {
    pub fn new(line_no: u32, content: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            line_no,
            content: content.into(),
            reason: reason.into(),
        }
    }
}

/// A retrieved documentation snippet.
///
/// Search backends may attach arbitrary extra fields (source, page, ...);
/// those are carried through untouched in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocRecord {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default)]
    pub query: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DocRecord {
    /// Record for an unstructured result (plain text, scalar, ...).
    pub fn text_only(query: &str, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            score: Some(DEFAULT_DOC_SCORE),
            query: query.to_string(),
            extra: Map::new(),
        }
    }

    /// Record for a structured result. Fields of `entry` win over the
    /// originating query, so a backend that reports its own `query` keeps it.
    pub fn from_object(query: &str, entry: Map<String, Value>) -> Self {
        let mut record = Self {
            query: query.to_string(),
            ..Default::default()
        };
        for (key, value) in entry {
            match key.as_str() {
                "text" => record.text = value_to_text(&value),
                "score" => record.score = value_to_score(&value),
                "query" => record.query = value_to_text(&value),
                _ => {
                    record.extra.insert(key, value);
                }
            }
        }
        record
    }

    /// Score used for ranking; missing scores rank as 0.
    pub fn rank_score(&self) -> f64 {
        self.score.unwrap_or(0.0)
    }
}

/// Render a JSON value as plain text (strings without quotes).
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Numeric or numeric-string score. Non-finite values (`"NaN"`, `"inf"`)
/// count as missing.
fn value_to_score(value: &Value) -> Option<f64> {
    let score = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    score.filter(|s| s.is_finite())
}

/// One input row as read from the batch file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputRow {
    pub id: String,
    pub code: String,
    pub correct_code: String,
    pub context: String,
    pub explanation: String,
}

/// One output row: the only two fields extracted from a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub id: String,
    pub bug_line: String,
    pub bug_explanation: String,
}

/// Shared state for a single row's run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunState {
    // Input
    pub id: String,
    pub code: String,
    pub correct_code: String,
    pub context: String,
    pub explanation: String,

    // Intermediate
    pub extracted_apis: Vec<String>,
    pub candidate_lines: Vec<CandidateLine>,
    pub doc_results: Vec<DocRecord>,
    pub static_analysis: String,
    pub search_queries: Vec<String>,

    // Output
    pub bug_line: String,
    pub bug_explanation: String,

    // Control
    pub iteration: u32,
    pub max_iterations: u32,
    pub confidence: Confidence,
    pub error: Option<String>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            id: String::new(),
            code: String::new(),
            correct_code: String::new(),
            context: String::new(),
            explanation: String::new(),
            extracted_apis: Vec::new(),
            candidate_lines: Vec::new(),
            doc_results: Vec::new(),
            static_analysis: String::new(),
            search_queries: Vec::new(),
            bug_line: String::new(),
            bug_explanation: String::new(),
            iteration: 0,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            confidence: Confidence::Low,
            error: None,
        }
    }
}

impl RunState {
    pub fn from_row(row: InputRow, max_iterations: u32) -> Self {
        Self {
            id: row.id,
            code: row.code,
            correct_code: row.correct_code,
            context: row.context,
            explanation: row.explanation,
            max_iterations: max_iterations.max(1),
            ..Default::default()
        }
    }

    /// Merge a step's partial update. Fields set in `update` overwrite the
    /// current values; everything else is left as is.
    pub fn apply(mut self, update: StateUpdate) -> Self {
        let StateUpdate {
            extracted_apis,
            candidate_lines,
            doc_results,
            static_analysis,
            search_queries,
            bug_line,
            bug_explanation,
            iteration,
            confidence,
            error,
        } = update;

        if let Some(v) = extracted_apis {
            self.extracted_apis = v;
        }
        if let Some(v) = candidate_lines {
            self.candidate_lines = v;
        }
        if let Some(v) = doc_results {
            self.doc_results = v;
        }
        if let Some(v) = static_analysis {
            self.static_analysis = v;
        }
        if let Some(v) = search_queries {
            self.search_queries = v;
        }
        if let Some(v) = bug_line {
            self.bug_line = v;
        }
        if let Some(v) = bug_explanation {
            self.bug_explanation = v;
        }
        if let Some(v) = iteration {
            self.iteration = self.iteration.max(v);
        }
        if let Some(v) = confidence {
            self.confidence = v;
        }
        if let Some(v) = error {
            self.error = v;
        }
        self
    }

    pub fn report(&self) -> ReportRow {
        ReportRow {
            id: self.id.clone(),
            bug_line: self.bug_line.clone(),
            bug_explanation: self.bug_explanation.clone(),
        }
    }
}

/// Partial update returned by a workflow step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub extracted_apis: Option<Vec<String>>,
    pub candidate_lines: Option<Vec<CandidateLine>>,
    pub doc_results: Option<Vec<DocRecord>>,
    pub static_analysis: Option<String>,
    pub search_queries: Option<Vec<String>>,
    pub bug_line: Option<String>,
    pub bug_explanation: Option<String>,
    pub iteration: Option<u32>,
    pub confidence: Option<Confidence>,
    /// `Some(None)` clears a previous diagnostic.
    pub error: Option<Option<String>>,
}
