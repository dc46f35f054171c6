//! The four workflow steps. Each reads the run state and returns a
//! `StateUpdate`; none of them mutates the state itself.

pub mod analyzer;
pub mod reporter;
pub mod retriever;
pub mod verifier;

pub use analyzer::HeuristicAnalyzer;
pub use reporter::finalize;
pub use retriever::DocRetriever;
pub use verifier::Verifier;
