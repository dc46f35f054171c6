use bughunter_adapters::Config;
use bughunter_core::{BoxFuture, Completion};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Maximum length for error content in error messages
const MAX_ERROR_CONTENT_LEN: usize = 200;

/// Markers that classify a completion failure as rate-limit class.
const RATE_LIMIT_MARKERS: [&str; 3] = ["rate_limit", "413", "429"];

/// Sanitize API response content for error messages to prevent credential leakage.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
        "gsk_", // Groq key prefix
        "sk-",
    ];

    let truncated = truncate_str(content, MAX_ERROR_CONTENT_LEN);

    let lower = truncated.to_lowercase();
    for pattern in SECRET_PATTERNS {
        if lower.contains(pattern) {
            return "(response details redacted - may contain sensitive data)".to_string();
        }
    }

    truncated.to_string()
}

/// Truncate a string for display (Unicode-safe)
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  RETRY WRAPPER
// ═══════════════════════════════════════════════════════════════════════════

/// Backoff settings for rate-limited completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_secs(config.base_delay_secs),
        }
    }

    /// Delay before retrying after the `attempt`-th (0-based) failure.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Source of backoff delays. Production sleeps on the tokio timer.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Whether a completion failure should be retried. The whole error chain is
/// inspected, so context layers don't hide the status code.
pub fn is_rate_limited(err: &anyhow::Error) -> bool {
    let rendered = format!("{:#}", err);
    RATE_LIMIT_MARKERS.iter().any(|marker| rendered.contains(marker))
}

/// Invoke the completion service, backing off on rate limits.
///
/// Rate-limited attempts sleep `base_delay * 2^attempt` and retry; any other
/// failure is returned immediately. Once `max_retries` attempts have been
/// rate limited, one last call is made and its outcome returned unchanged.
pub async fn invoke_with_retry(
    completion: &dyn Completion,
    sleeper: &dyn Sleeper,
    policy: RetryPolicy,
    system: &str,
    user: &str,
) -> anyhow::Result<String> {
    for attempt in 0..policy.max_retries {
        match completion.complete(system, user).await {
            Ok(text) => return Ok(text),
            Err(err) if is_rate_limited(&err) => {
                let delay = policy.delay_for(attempt);
                info!(
                    "Rate limited (attempt {}/{}), retrying in {}s",
                    attempt + 1,
                    policy.max_retries,
                    delay.as_secs()
                );
                sleeper.sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
    completion.complete(system, user).await
}

// ═══════════════════════════════════════════════════════════════════════════
//  CHAT COMPLETIONS CLIENT
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    /// Content can be null in some API responses (e.g., when refusal or error occurs)
    #[serde(default)]
    content: Option<String>,
    /// Refusal reason - set when content is blocked by content moderation
    #[serde(default)]
    refusal: Option<String>,
}

/// API usage information from the LLM provider.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// OpenAI-compatible chat-completions client (Groq by default).
pub struct ChatClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl ChatClient {
    pub fn new(config: &Config, api_key: String) -> anyhow::Result<Self> {
        Ok(Self {
            http: create_http_client(config.request_timeout_secs)?,
            url: config.api_base_url.clone(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    async fn chat(&self, system: &str, user: &str) -> anyhow::Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            stream: false,
        };

        let response = self
            .http
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(map_timeout_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_timeout_error)?;

        if !status.is_success() {
            let error_msg = match status.as_u16() {
                401 => "Invalid API key (401). Check GROQ_API_KEY.".to_string(),
                _ => format!("API error {}: {}", status, sanitize_api_response(&text)),
            };
            return Err(anyhow::anyhow!("{}", error_msg));
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            anyhow::anyhow!(
                "Failed to parse chat response: {}\n{}",
                e,
                sanitize_api_response(&text)
            )
        })?;

        if let Some(usage) = &parsed.usage {
            debug!(
                "Completion usage: {} prompt + {} completion = {} tokens",
                usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            );
        }

        let choice = parsed.choices.into_iter().next();

        // Check for refusal (content moderation)
        if let Some(refusal) = choice.as_ref().and_then(|c| c.message.refusal.as_deref()) {
            return Err(anyhow::anyhow!(
                "Request was refused: {}",
                truncate_str(refusal, 200)
            ));
        }

        let content = choice
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.is_empty() {
            return Err(anyhow::anyhow!(
                "API returned empty response. The model may have failed to generate content."
            ));
        }

        Ok(content)
    }
}

impl Completion for ChatClient {
    fn complete<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(self.chat(system, user))
    }
}

/// Create a configured HTTP client for completion requests
pub(crate) fn create_http_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))
}

fn map_timeout_error(err: reqwest::Error) -> anyhow::Error {
    if err.is_timeout() {
        anyhow::anyhow!("Completion request timed out. Please try again.")
    } else if err.is_connect() {
        anyhow::anyhow!("Could not connect to the completion service. Check your network.")
    } else {
        err.into()
    }
}
