//! Verification: one bounded prompt per pass, parsed into bug fields.

use crate::llm::client::truncate_str;
use crate::llm::parse::{number_lines, truncate_with_marker};
use crate::llm::prompts::VERIFIER_SYSTEM;
use crate::llm::{invoke_with_retry, parse_verifier_response, RetryPolicy, Sleeper};
use anyhow::{Context, Result};
use bughunter_core::{Completion, Confidence, RunState, StateUpdate};
use std::sync::Arc;
use tracing::{debug, info};

const MAX_CODE_CHARS: usize = 4000;
const MAX_CONTEXT_CHARS: usize = 1000;
const MAX_CANDIDATES: usize = 5;
const MAX_DOCS: usize = 5;
const MAX_DOC_SNIPPET_CHARS: usize = 1200;
const MAX_DOC_CHARS: usize = 6000;
const MAX_STATIC_CHARS: usize = 500;
const NO_DOCS_MARKER: &str = "No docs found.";

pub struct Verifier {
    completion: Arc<dyn Completion>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
}

impl Verifier {
    pub fn new(
        completion: Arc<dyn Completion>,
        sleeper: Arc<dyn Sleeper>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            completion,
            sleeper,
            policy,
        }
    }

    pub async fn run(&self, state: &RunState) -> Result<StateUpdate> {
        let user_content = build_user_prompt(state);
        debug!("Verifier prompt: {} chars", user_content.chars().count());

        let text = invoke_with_retry(
            self.completion.as_ref(),
            self.sleeper.as_ref(),
            self.policy,
            VERIFIER_SYSTEM,
            &user_content,
        )
        .await
        .context("Verifier completion failed")?;

        let parsed = parse_verifier_response(&text);
        let iteration = state.iteration + 1;
        info!(
            "Verified (iter {}): confidence={}, lines={}",
            iteration, parsed.confidence, parsed.bug_line
        );

        let search_queries = (parsed.confidence == Confidence::Low
            && !parsed.refined_queries.is_empty())
        .then_some(parsed.refined_queries);

        Ok(StateUpdate {
            bug_line: Some(parsed.bug_line),
            bug_explanation: Some(parsed.explanation),
            confidence: Some(parsed.confidence),
            iteration: Some(iteration),
            search_queries,
            ..Default::default()
        })
    }
}

/// Assemble the user message. Every section has its own hard cap.
pub(crate) fn build_user_prompt(state: &RunState) -> String {
    let numbered_code = truncate_with_marker(&number_lines(&state.code), MAX_CODE_CHARS);
    let context = truncate_str(&state.context, MAX_CONTEXT_CHARS);
    let static_analysis = truncate_str(&state.static_analysis, MAX_STATIC_CHARS);

    let candidates = state
        .candidate_lines
        .iter()
        .take(MAX_CANDIDATES)
        .map(|c| format!("L{}: {} - {}", c.line_no, c.content, c.reason))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "BUGGY CODE (with line numbers):\n{}\n\n\
         CONTEXT: {}\n\n\
         CANDIDATES:\n{}\n\n\
         DOCS:\n{}\n\n\
         STATIC: {}",
        numbered_code,
        context,
        candidates,
        format_docs(state),
        static_analysis
    )
}

/// Top docs until the running snippet total would pass `MAX_DOC_CHARS`.
fn format_docs(state: &RunState) -> String {
    let mut snippets = Vec::new();
    let mut total_chars = 0usize;

    for doc in state.doc_results.iter().take(MAX_DOCS) {
        let snippet = truncate_str(&doc.text, MAX_DOC_SNIPPET_CHARS);
        let snippet_chars = snippet.chars().count();
        if total_chars + snippet_chars > MAX_DOC_CHARS {
            break;
        }
        let score = doc
            .score
            .map(|s| s.to_string())
            .unwrap_or_else(|| "?".to_string());
        snippets.push(format!("[{}] {}", score, snippet));
        total_chars += snippet_chars;
    }

    if snippets.is_empty() {
        NO_DOCS_MARKER.to_string()
    } else {
        snippets.join("\n---\n")
    }
}
