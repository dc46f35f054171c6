//! Core domain model and contracts for BugHunter.

pub mod error;
pub mod protocol;
pub mod state;

pub use error::BugHunterError;
pub use protocol::*;
pub use state::*;
