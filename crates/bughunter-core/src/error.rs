use thiserror::Error;

/// Errors callers need to tell apart. Everything else travels as
/// `anyhow::Error` with context attached.
#[derive(Debug, Error)]
pub enum BugHunterError {
    #[error("Input CSV is missing columns: {}", .missing.join(", "))]
    MissingColumns { missing: Vec<String> },

    #[error("GROQ_API_KEY is not set. Export it or add it to your .env file.")]
    MissingApiKey,

    /// The MCP server no longer recognizes our session id (HTTP 404).
    #[error("MCP session expired")]
    McpSessionExpired,
}
