//! Runtime adapters for BugHunter (config, CSV I/O, MCP documentation search).

pub mod config;
pub mod csv_io;
pub mod mcp;

pub use config::Config;
pub use mcp::McpSearch;
