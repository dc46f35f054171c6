//! Contracts for the collaborators the workflow drives.
//!
//! Each is object-safe so the engine can hold `Arc<dyn ...>` and tests can
//! swap in scripted fakes.

use crate::state::CandidateLine;
use anyhow::Result;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Text-generation service: one system message, one user message, text back.
pub trait Completion: Send + Sync {
    fn complete<'a>(&'a self, system: &'a str, user: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// Documentation search backend. Returns whatever shape the backend produced
/// (string, list of records, or any other JSON value); the retriever
/// normalizes it.
pub trait DocSearch: Send + Sync {
    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<Value>>;
}

/// Static candidate extractor run once at the start of every row.
pub trait CodeAnalyzer: Send + Sync {
    fn analyze<'a>(
        &'a self,
        code: &'a str,
        context: &'a str,
    ) -> BoxFuture<'a, Result<AnalysisReport>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisReport {
    pub extracted_apis: Vec<String>,
    pub candidate_lines: Vec<CandidateLine>,
    pub static_analysis: String,
}
