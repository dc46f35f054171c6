//! Verification-retrieval loop: analyze a snippet, pull documentation,
//! ask the model, and repeat until it is confident or out of iterations.

pub mod llm;
pub mod pipeline;
pub mod steps;
pub mod workflow;

pub use pipeline::Pipeline;
pub use workflow::{route, Route, Workflow};
