//! Documentation retrieval: one search per query, then dedup, rank, cap.

use bughunter_core::{value_to_text, DocRecord, DocSearch, RunState, StateUpdate};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Upper bound on records kept after ranking.
pub const MAX_DOC_RESULTS: usize = 20;
/// Records whose text shares this many leading characters are duplicates.
pub const DEDUP_PREFIX_CHARS: usize = 200;
/// At most this many extracted APIs are turned into queries.
const MAX_API_QUERIES: usize = 10;
const API_QUERY_SUFFIX: &str = "correct usage";

pub struct DocRetriever {
    search: Arc<dyn DocSearch>,
}

impl DocRetriever {
    pub fn new(search: Arc<dyn DocSearch>) -> Self {
        Self { search }
    }

    pub async fn run(&self, state: &RunState) -> StateUpdate {
        let queries = build_queries(state);
        if queries.is_empty() {
            return StateUpdate {
                doc_results: Some(Vec::new()),
                error: Some(None),
                ..Default::default()
            };
        }

        info!("Searching docs with {} queries", queries.len());

        let mut results = Vec::new();
        let mut failed = 0usize;
        for query in &queries {
            match self.search.search(query).await {
                Ok(value) => results.extend(normalize_results(query, value)),
                Err(err) => {
                    failed += 1;
                    warn!("Doc search failed for '{}': {:#}", query, err);
                }
            }
        }

        let ranked = dedup_and_rank(results);
        info!("Retrieved {} unique doc chunks", ranked.len());

        StateUpdate {
            doc_results: Some(ranked),
            error: Some(
                (failed > 0)
                    .then(|| format!("{} of {} doc searches failed", failed, queries.len())),
            ),
            ..Default::default()
        }
    }
}

/// Refined queries from the verifier win; otherwise derive them from the
/// extracted APIs.
fn build_queries(state: &RunState) -> Vec<String> {
    if !state.search_queries.is_empty() {
        return state.search_queries.clone();
    }
    state
        .extracted_apis
        .iter()
        .take(MAX_API_QUERIES)
        .map(|api| format!("{} {}", api, API_QUERY_SUFFIX))
        .collect()
}

/// Flatten whatever the backend returned into doc records.
pub fn normalize_results(query: &str, value: Value) -> Vec<DocRecord> {
    match value {
        Value::String(text) => vec![DocRecord::text_only(query, text)],
        Value::Array(entries) => entries
            .into_iter()
            .map(|entry| match entry {
                Value::Object(fields) => DocRecord::from_object(query, fields),
                other => DocRecord::text_only(query, value_to_text(&other)),
            })
            .collect(),
        other => vec![DocRecord::text_only(query, value_to_text(&other))],
    }
}

/// Drop records whose first `DEDUP_PREFIX_CHARS` characters repeat an
/// earlier record, stable-sort by descending score, keep the top
/// `MAX_DOC_RESULTS`.
pub fn dedup_and_rank(records: Vec<DocRecord>) -> Vec<DocRecord> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut unique: Vec<DocRecord> = records
        .into_iter()
        .filter(|record| seen.insert(text_prefix(&record.text).to_string()))
        .collect();

    unique.sort_by(|a, b| b.rank_score().total_cmp(&a.rank_score()));
    unique.truncate(MAX_DOC_RESULTS);
    unique
}

fn text_prefix(text: &str) -> &str {
    match text.char_indices().nth(DEDUP_PREFIX_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bughunter_core::BoxFuture;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Search backend answering from a fixed table; unknown queries fail.
    #[derive(Default)]
    struct TableSearch {
        answers: HashMap<String, Value>,
        seen: Mutex<Vec<String>>,
    }

    impl TableSearch {
        fn with(mut self, query: &str, answer: Value) -> Self {
            self.answers.insert(query.to_string(), answer);
            self
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl DocSearch for TableSearch {
        fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, anyhow::Result<Value>> {
            self.seen.lock().unwrap().push(query.to_string());
            let answer = self.answers.get(query).cloned();
            Box::pin(async move { answer.ok_or_else(|| anyhow::anyhow!("backend offline")) })
        }
    }

    fn doc(text: &str, score: Option<f64>) -> DocRecord {
        DocRecord {
            text: text.to_string(),
            score,
            query: "q".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn duplicate_prefixes_keep_first_occurrence() {
        let shared = "x".repeat(DEDUP_PREFIX_CHARS);
        let records = vec![
            doc(&format!("{}first", shared), Some(0.1)),
            doc(&format!("{}second", shared), Some(0.9)),
            doc("other", Some(0.5)),
        ];
        let ranked = dedup_and_rank(records);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].text, "other");
        assert!(ranked[1].text.ends_with("first"));
    }

    #[test]
    fn texts_differing_inside_prefix_are_distinct() {
        let records = vec![doc("abc", Some(0.5)), doc("abd", Some(0.5))];
        assert_eq!(dedup_and_rank(records).len(), 2);
    }

    #[test]
    fn ranking_is_descending_and_stable() {
        let records = vec![
            doc("a", Some(0.5)),
            doc("b", Some(0.9)),
            doc("c", Some(0.5)),
            doc("d", None),
            doc("e", Some(0.5)),
        ];
        let order: Vec<String> = dedup_and_rank(records)
            .into_iter()
            .map(|r| r.text)
            .collect();
        assert_eq!(order, vec!["b", "a", "c", "e", "d"]);
    }

    #[test]
    fn output_is_capped() {
        let records: Vec<DocRecord> = (0..57)
            .map(|i| doc(&format!("chunk {}", i), Some(i as f64)))
            .collect();
        let ranked = dedup_and_rank(records);
        assert_eq!(ranked.len(), MAX_DOC_RESULTS);
        assert_eq!(ranked[0].text, "chunk 56");
    }

    #[test]
    fn normalizes_every_result_shape() {
        let plain = normalize_results("q", json!("some text"));
        assert_eq!(plain, vec![DocRecord::text_only("q", "some text")]);

        let list = normalize_results("q", json!([{"text": "a", "score": 0.8, "page": 3}, 42]));
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].score, Some(0.8));
        assert_eq!(list[0].extra.get("page"), Some(&json!(3)));
        assert_eq!(list[1], DocRecord::text_only("q", "42"));

        let other = normalize_results("q", json!({"text": "not a list"}));
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].score, Some(0.5));
        assert_eq!(other[0].text, r#"{"text":"not a list"}"#);
    }

    #[tokio::test]
    async fn derives_queries_from_apis_and_survives_failures() {
        let search = Arc::new(
            TableSearch::default()
                .with("vForce correct usage", json!([{"text": "vForce(v)", "score": 0.7}]))
                .with("iClamp correct usage", json!("iClamp docs")),
        );
        let retriever = DocRetriever::new(search.clone());
        let state = RunState {
            extracted_apis: vec![
                "vForce".to_string(),
                "broken".to_string(),
                "iClamp".to_string(),
            ],
            ..Default::default()
        };

        let update = retriever.run(&state).await;

        assert_eq!(
            search.seen(),
            vec![
                "vForce correct usage",
                "broken correct usage",
                "iClamp correct usage"
            ]
        );
        let docs = update.doc_results.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "vForce(v)");
        assert_eq!(
            update.error,
            Some(Some("1 of 3 doc searches failed".to_string()))
        );
    }

    #[tokio::test]
    async fn refined_queries_replace_api_queries() {
        let search = Arc::new(TableSearch::default().with("pin order", json!("pins")));
        let retriever = DocRetriever::new(search.clone());
        let state = RunState {
            extracted_apis: vec!["vForce".to_string()],
            search_queries: vec!["pin order".to_string()],
            ..Default::default()
        };

        let update = retriever.run(&state).await;

        assert_eq!(search.seen(), vec!["pin order"]);
        assert_eq!(update.doc_results.unwrap().len(), 1);
        assert_eq!(update.error, Some(None));
    }

    #[tokio::test]
    async fn no_queries_means_no_backend_call() {
        let search = Arc::new(TableSearch::default());
        let retriever = DocRetriever::new(search.clone());

        let update = retriever.run(&RunState::default()).await;

        assert!(search.seen().is_empty());
        assert_eq!(update.doc_results, Some(Vec::new()));
    }

    #[test]
    fn nan_scores_do_not_break_ranking() {
        let records: Vec<DocRecord> = (0..60)
            .flat_map(|i| {
                let score = if i % 3 == 0 { json!("NaN") } else { json!(i as f64 / 60.0) };
                normalize_results("q", json!([{"text": format!("chunk {}", i), "score": score}]))
            })
            .collect();

        let ranked = dedup_and_rank(records);

        assert_eq!(ranked.len(), MAX_DOC_RESULTS);
        assert_eq!(ranked[0].text, "chunk 59");
        assert!(ranked.iter().all(|r| r.score.is_some()));
        assert!(ranked
            .windows(2)
            .all(|w| w[0].rank_score() >= w[1].rank_score()));
    }

    #[tokio::test]
    async fn clean_round_clears_earlier_failure() {
        let search = Arc::new(TableSearch::default().with("pin order", json!("pins")));
        let retriever = DocRetriever::new(search);
        let state = RunState {
            extracted_apis: vec!["broken".to_string()],
            ..Default::default()
        };

        let patch = retriever.run(&state).await;
        let state = state.apply(patch);
        assert_eq!(state.error.as_deref(), Some("1 of 1 doc searches failed"));

        let state = RunState {
            search_queries: vec!["pin order".to_string()],
            ..state
        };
        let patch = retriever.run(&state).await;
        let state = state.apply(patch);
        assert_eq!(state.error, None);
        assert_eq!(state.doc_results.len(), 1);
    }

    #[test]
    fn api_queries_are_limited_to_ten() {
        let state = RunState {
            extracted_apis: (0..15).map(|i| format!("api{}", i)).collect(),
            ..Default::default()
        };
        let queries = build_queries(&state);
        assert_eq!(queries.len(), 10);
        assert_eq!(queries[0], "api0 correct usage");
    }
}
