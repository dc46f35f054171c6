//! The control loop.
//!
//! ```text
//! Analyze -> Retrieve -> Verify --route--> Retrieve | Report -> Done
//! ```
//!
//! Every stage reads the whole `RunState` and hands back a `StateUpdate`,
//! which is merged before the next stage runs. `max_iterations` is the only
//! bound on the loop.

use crate::llm::{RetryPolicy, Sleeper, TokioSleeper};
use crate::steps::analyzer::analyze;
use crate::steps::{finalize, DocRetriever, Verifier};
use anyhow::Result;
use bughunter_core::{CodeAnalyzer, Completion, Confidence, DocSearch, RunState};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Analyze,
    Retrieve,
    Verify,
    Report,
    Done,
}

/// Where the loop goes after a verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Reporter,
    DocRetriever,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Reporter => "reporter",
            Route::DocRetriever => "doc_retriever",
        }
    }
}

/// Stop on high confidence or once the iteration cap is reached.
pub fn route(confidence: Confidence, iteration: u32, max_iterations: u32) -> Route {
    if confidence == Confidence::High || iteration >= max_iterations {
        Route::Reporter
    } else {
        Route::DocRetriever
    }
}

pub struct Workflow {
    analyzer: Arc<dyn CodeAnalyzer>,
    retriever: DocRetriever,
    completion: Arc<dyn Completion>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
}

impl Workflow {
    pub fn new(
        analyzer: Arc<dyn CodeAnalyzer>,
        search: Arc<dyn DocSearch>,
        completion: Arc<dyn Completion>,
    ) -> Self {
        Self {
            analyzer,
            retriever: DocRetriever::new(search),
            completion,
            sleeper: Arc::new(TokioSleeper),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Drive one row from analysis to the final report.
    pub async fn run(&self, mut state: RunState) -> Result<RunState> {
        let verifier = Verifier::new(self.completion.clone(), self.sleeper.clone(), self.policy);
        let mut stage = Stage::Analyze;

        loop {
            stage = match stage {
                Stage::Analyze => {
                    let update = analyze(self.analyzer.as_ref(), &state).await?;
                    state = state.apply(update);
                    Stage::Retrieve
                }
                Stage::Retrieve => {
                    let update = self.retriever.run(&state).await;
                    state = state.apply(update);
                    Stage::Verify
                }
                Stage::Verify => {
                    let update = verifier.run(&state).await?;
                    state = state.apply(update);

                    let next = route(state.confidence, state.iteration, state.max_iterations);
                    debug!(
                        "Route -> {} (iter {}/{}, confidence={})",
                        next.as_str(),
                        state.iteration,
                        state.max_iterations,
                        state.confidence
                    );
                    match next {
                        Route::Reporter => Stage::Report,
                        Route::DocRetriever => Stage::Retrieve,
                    }
                }
                Stage::Report => {
                    let update = finalize(&state);
                    state = state.apply(update);
                    Stage::Done
                }
                Stage::Done => return Ok(state),
            };
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::{EchoSearch, FixedAnalyzer, ScriptedCompletion};
    use super::*;
    use bughunter_core::{BoxFuture, CandidateLine, InputRow};
    use std::time::Duration;

    struct NoSleep;

    impl Sleeper for NoSleep {
        fn sleep(&self, _duration: Duration) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
    }

    const LOW_WITH_QUERY: &str =
        "CONFIDENCE: low\nBUG_LINES: 4\nEXPLANATION: Maybe line 4.\nREFINED_QUERIES:\npin order\n";

    fn state(max_iterations: u32) -> RunState {
        RunState::from_row(
            InputRow {
                id: "7".to_string(),
                code: "a();\nb();\nc();\nd();".to_string(),
                ..Default::default()
            },
            max_iterations,
        )
    }

    fn workflow(
        analyzer: FixedAnalyzer,
        search: Arc<EchoSearch>,
        completion: Arc<ScriptedCompletion>,
    ) -> Workflow {
        Workflow::new(Arc::new(analyzer), search, completion).with_sleeper(Arc::new(NoSleep))
    }

    #[test]
    fn router_decisions() {
        assert_eq!(route(Confidence::High, 0, 2), Route::Reporter);
        assert_eq!(route(Confidence::Low, 1, 2), Route::DocRetriever);
        assert_eq!(route(Confidence::Low, 2, 2), Route::Reporter);
        assert_eq!(route(Confidence::Low, 3, 2), Route::Reporter);
        assert_eq!(Route::DocRetriever.as_str(), "doc_retriever");
    }

    #[tokio::test]
    async fn low_confidence_loops_until_the_cap() {
        let search = Arc::new(EchoSearch::default());
        let completion = Arc::new(ScriptedCompletion::new(vec![
            Ok(LOW_WITH_QUERY),
            Ok(LOW_WITH_QUERY),
            Ok(LOW_WITH_QUERY),
        ]));
        let wf = workflow(
            FixedAnalyzer::new(&["vForce"], Vec::new()),
            search.clone(),
            completion.clone(),
        );

        let done = wf.run(state(2)).await.unwrap();

        assert_eq!(completion.calls(), 2);
        assert_eq!(done.iteration, 2);
        assert_eq!(search.queries(), vec!["vForce correct usage", "pin order"]);
        assert_eq!(done.bug_line, "4");
        assert_eq!(done.bug_explanation, "Maybe line 4.");
    }

    #[tokio::test]
    async fn high_confidence_reports_after_one_pass() {
        let search = Arc::new(EchoSearch::default());
        let completion = Arc::new(ScriptedCompletion::new(vec![Ok(
            "CONFIDENCE: high\nBUG_LINES: line 3, line 3\nEXPLANATION: Wrong pin. Note: verify.",
        )]));
        let wf = workflow(
            FixedAnalyzer::new(&["vForce", "iClamp"], Vec::new()),
            search.clone(),
            completion.clone(),
        );

        let done = wf.run(state(5)).await.unwrap();

        assert_eq!(completion.calls(), 1);
        assert_eq!(search.queries().len(), 2);
        assert_eq!(done.confidence, Confidence::High);
        assert_eq!(done.report().bug_line, "3");
        assert_eq!(done.report().bug_explanation, "Wrong pin.");
        assert!(completion.prompts.lock().unwrap()[0].contains("[0.8] docs for vForce"));
    }

    #[tokio::test]
    async fn unusable_reply_falls_back_to_candidates() {
        let search = Arc::new(EchoSearch::default());
        let completion = Arc::new(ScriptedCompletion::new(vec![Ok("no labels here")]));
        let wf = workflow(
            FixedAnalyzer::new(
                &[],
                vec![
                    CandidateLine::new(2, "b();", "bad pin"),
                    CandidateLine::new(4, "d();", "wrong order"),
                ],
            ),
            search.clone(),
            completion,
        );

        let done = wf.run(state(1)).await.unwrap();

        assert!(search.queries().is_empty());
        assert_eq!(done.bug_line, "2,4");
        assert_eq!(done.bug_explanation, "bad pin; wrong order");
    }

    #[tokio::test]
    async fn completion_failure_aborts_the_run() {
        let completion = Arc::new(ScriptedCompletion::new(vec![Err("API error 500: boom")]));
        let wf = workflow(
            FixedAnalyzer::new(&[], Vec::new()),
            Arc::new(EchoSearch::default()),
            completion,
        );

        let err = wf.run(state(2)).await.unwrap_err();
        let rendered = format!("{:#}", err);
        assert!(rendered.contains("Verifier completion failed"));
        assert!(rendered.contains("500"));
    }

    #[tokio::test]
    async fn rate_limits_are_retried_inside_the_loop() {
        let completion = Arc::new(ScriptedCompletion::new(vec![
            Err("API error 429: rate_limit_exceeded"),
            Ok("CONFIDENCE: high\nBUG_LINES: 1\nEXPLANATION: ok"),
        ]));
        let wf = workflow(
            FixedAnalyzer::new(&[], Vec::new()),
            Arc::new(EchoSearch::default()),
            completion.clone(),
        );

        let done = wf.run(state(2)).await.unwrap();
        assert_eq!(completion.calls(), 2);
        assert_eq!(done.iteration, 1);
    }
}
