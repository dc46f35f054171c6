//! Configuration management for bughunter
//!
//! Stores settings in ~/.config/bughunter/config.json. Every field has a
//! default, so a missing or partial file is fine. The API key and the
//! `GROQ_MODEL` / `MCP_SERVER_URL` overrides come from the environment,
//! optionally seeded from a `.env` file.

use bughunter_core::{BugHunterError, DEFAULT_MAX_ITERATIONS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
const DEFAULT_API_BASE_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const DEFAULT_MCP_SERVER_URL: &str = "http://localhost:8003/mcp";
const DEFAULT_SEARCH_TOOL: &str = "search_documents";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chat model id sent with every completion request
    pub model: String,
    /// OpenAI-compatible chat-completions endpoint
    pub api_base_url: String,
    /// MCP server exposing the documentation search tool
    pub mcp_server_url: String,
    /// Name of the search tool on the MCP server
    pub search_tool: String,
    pub max_iterations: u32,
    /// Rate-limit retries before the final unguarded attempt
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub request_timeout_secs: u64,
    pub temperature: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            mcp_server_url: DEFAULT_MCP_SERVER_URL.to_string(),
            search_tool: DEFAULT_SEARCH_TOOL.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_retries: 3,
            base_delay_secs: 10,
            request_timeout_secs: 120,
            temperature: 0.0,
        }
    }
}

impl Config {
    fn sanitize(&mut self) {
        if self.max_iterations == 0 {
            self.max_iterations = DEFAULT_MAX_ITERATIONS;
        }
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = Self::default().request_timeout_secs;
        }
        if self.model.trim().is_empty() {
            self.model = DEFAULT_MODEL.to_string();
        }
    }

    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("bughunter"))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from the default location, or return defaults
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load config from `path`. A file that fails to parse is moved aside
    /// to `config.json.corrupt` and defaults are used.
    pub fn load_from(path: &Path) -> Self {
        if let Ok(content) = fs::read_to_string(path) {
            match serde_json::from_str::<Config>(&content) {
                Ok(mut config) => {
                    config.sanitize();
                    return config;
                }
                Err(err) => {
                    preserve_corrupt_config(path, &content);
                    warn!(
                        "Config file {} was corrupted ({}). A backup was saved and defaults were loaded.",
                        path.display(),
                        err
                    );
                }
            }
        }
        Self::default()
    }

    /// Apply `GROQ_MODEL` and `MCP_SERVER_URL` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(model) = non_empty_env("GROQ_MODEL") {
            self.model = model;
        }
        if let Some(url) = non_empty_env("MCP_SERVER_URL") {
            self.mcp_server_url = url;
        }
        self
    }

    /// Get the API key from the environment.
    pub fn get_api_key(&self) -> Option<String> {
        non_empty_env("GROQ_API_KEY").or_else(|| non_empty_env("OPENAI_API_KEY"))
    }

    /// Like [`Config::get_api_key`], but a missing key is a fatal error.
    pub fn require_api_key(&self) -> Result<String, BugHunterError> {
        self.get_api_key().ok_or(BugHunterError::MissingApiKey)
    }
}

/// Load `KEY=value` pairs from a `.env` file into the process environment.
/// With no path, `.env` is looked up from the working directory upwards.
/// Variables that are already set keep their value. Returns the file that
/// was loaded.
pub fn load_env_file(path: Option<&Path>) -> Option<PathBuf> {
    match path {
        Some(path) => dotenvy::from_path(path).ok().map(|_| path.to_path_buf()),
        None => dotenvy::dotenv().ok(),
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}
