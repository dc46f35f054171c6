//! Documentation search over an MCP server (streamable HTTP, JSON-RPC 2.0).
//!
//! The session is opened lazily on the first query and reused until the
//! server answers 404 for it; then it is reopened once and the query retried.
//! Each query becomes one `tools/call` of the configured search tool.

use anyhow::{anyhow, Context, Result};
use bughunter_core::{BoxFuture, BugHunterError, DocSearch};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "Mcp-Session-Id";
const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Clone, Default)]
struct Session {
    id: Option<String>,
}

/// What one POST produced: the session header, if the server sent one, and
/// the decoded reply (`None` for accepted notifications).
#[derive(Debug, Clone, Default, PartialEq)]
struct RpcReply {
    session_id: Option<String>,
    payload: Option<Value>,
}

/// Carries one JSON-RPC message to the server. A request made under a
/// session the server no longer knows fails with
/// [`BugHunterError::McpSessionExpired`].
trait RpcTransport: Send + Sync {
    fn post<'a>(
        &'a self,
        body: &'a Value,
        session_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<RpcReply>>;
}

/// Streamable HTTP transport over reqwest.
struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    async fn send(&self, body: &Value, session_id: Option<&str>) -> Result<RpcReply> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .json(body);
        if let Some(id) = session_id {
            request = request.header(SESSION_HEADER, id);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Could not reach MCP server at {}", self.url))?;

        let status = response.status();
        let new_session = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let text = response.text().await?;

        if status == StatusCode::NOT_FOUND && session_id.is_some() {
            return Err(BugHunterError::McpSessionExpired.into());
        }
        if !status.is_success() {
            return Err(anyhow!(
                "MCP server error {}: {}",
                status,
                truncate_chars(&text, MAX_ERROR_BODY_CHARS)
            ));
        }

        let payload = if text.trim().is_empty() {
            None
        } else if is_event_stream {
            parse_sse_payload(&text)
        } else {
            Some(serde_json::from_str(&text).context("MCP server returned invalid JSON")?)
        };
        Ok(RpcReply {
            session_id: new_session,
            payload,
        })
    }
}

impl RpcTransport for HttpTransport {
    fn post<'a>(
        &'a self,
        body: &'a Value,
        session_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<RpcReply>> {
        Box::pin(self.send(body, session_id))
    }
}

pub struct McpSearch {
    transport: Box<dyn RpcTransport>,
    url: String,
    tool: String,
    session: Mutex<Option<Session>>,
    next_id: AtomicU64,
}

impl McpSearch {
    pub fn new(
        url: impl Into<String>,
        tool: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let url = url.into();
        if is_legacy_sse_url(&url) {
            warn!(
                "{} looks like a legacy SSE endpoint; this client speaks streamable HTTP (usually .../mcp)",
                url
            );
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;
        let transport = HttpTransport {
            client,
            url: url.clone(),
        };
        Ok(Self::with_transport(Box::new(transport), url, tool.into()))
    }

    fn with_transport(transport: Box<dyn RpcTransport>, url: String, tool: String) -> Self {
        Self {
            transport,
            url,
            tool,
            session: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    fn request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn ensure_session(&self) -> Result<Session> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }

        let init = json!({
            "jsonrpc": "2.0",
            "id": self.request_id(),
            "method": "initialize",
            "params": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "bughunter",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }
        });
        let reply = self.transport.post(&init, None).await?;
        if let Some(error) = reply.payload.as_ref().and_then(|r| r.get("error")) {
            return Err(anyhow!("MCP initialize failed: {}", rpc_error_message(error)));
        }

        let initialized = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        self.transport
            .post(&initialized, reply.session_id.as_deref())
            .await?;

        debug!("MCP session opened at {}", self.url);
        let session = Session {
            id: reply.session_id,
        };
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn reset_session(&self) {
        *self.session.lock().await = None;
    }

    async fn try_search(&self, query: &str) -> Result<Value> {
        let session = self.ensure_session().await?;
        let call = json!({
            "jsonrpc": "2.0",
            "id": self.request_id(),
            "method": "tools/call",
            "params": {
                "name": self.tool,
                "arguments": { "query": query },
            }
        });
        let reply = self.transport.post(&call, session.id.as_deref()).await?;
        let payload = reply
            .payload
            .ok_or_else(|| anyhow!("MCP server sent no reply to tools/call"))?;
        extract_tool_result(&payload)
    }

    /// Search once; if the server dropped our session, open a new one and
    /// try exactly once more.
    async fn call_search(&self, query: &str) -> Result<Value> {
        match self.try_search(query).await {
            Err(err) if is_session_expired(&err) => {
                warn!("MCP session at {} expired, reconnecting", self.url);
                self.reset_session().await;
                self.try_search(query).await
            }
            other => other,
        }
    }
}

impl DocSearch for McpSearch {
    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<Value>> {
        Box::pin(self.call_search(query))
    }
}

fn is_session_expired(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<BugHunterError>(),
        Some(BugHunterError::McpSessionExpired)
    )
}

fn is_legacy_sse_url(url: &str) -> bool {
    url.trim_end_matches('/').ends_with("/sse")
}

/// Pick the JSON-RPC reply out of an SSE body. Servers may interleave
/// notifications, so the last message carrying `result` or `error` wins.
fn parse_sse_payload(body: &str) -> Option<Value> {
    fn flush(data: &mut String, reply: &mut Option<Value>) {
        if data.is_empty() {
            return;
        }
        if let Ok(value) = serde_json::from_str::<Value>(data) {
            if value.get("result").is_some() || value.get("error").is_some() {
                *reply = Some(value);
            }
        }
        data.clear();
    }

    let mut reply = None;
    let mut data = String::new();
    for line in body.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
        } else if line.trim().is_empty() {
            flush(&mut data, &mut reply);
        }
    }
    flush(&mut data, &mut reply);
    reply
}

fn rpc_error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown error")
        .to_string()
}

/// Turn a `tools/call` reply into the raw search value.
///
/// Structured content is preferred; otherwise text items are decoded as
/// JSON when they parse, and several items become an array.
fn extract_tool_result(reply: &Value) -> Result<Value> {
    if let Some(error) = reply.get("error") {
        return Err(anyhow!("MCP error: {}", rpc_error_message(error)));
    }
    let result = reply.get("result").unwrap_or(reply);

    let texts: Vec<&str> = result
        .get("content")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if result.get("isError").and_then(|v| v.as_bool()) == Some(true) {
        return Err(anyhow!("Search tool failed: {}", texts.join("\n")));
    }

    if let Some(structured) = result.get("structuredContent") {
        // Tools returning lists get wrapped as {"result": [...]}.
        if let Some(inner) = structured
            .as_object()
            .filter(|obj| obj.len() == 1)
            .and_then(|obj| obj.get("result"))
        {
            return Ok(inner.clone());
        }
        return Ok(structured.clone());
    }

    let mut values: Vec<Value> = texts.into_iter().map(decode_text_item).collect();
    Ok(match values.len() {
        0 => Value::Array(Vec::new()),
        1 => values.remove(0),
        _ => Value::Array(values),
    })
}

fn decode_text_item(text: &str) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ (Value::Array(_) | Value::Object(_))) => value,
        _ => Value::String(text.to_string()),
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Transport replaying scripted outcomes and recording every
    /// (method, session id) it was asked to send.
    struct ScriptedTransport {
        outcomes: std::sync::Mutex<VecDeque<Result<RpcReply>>>,
        sent: SentLog,
    }

    impl RpcTransport for ScriptedTransport {
        fn post<'a>(
            &'a self,
            body: &'a Value,
            session_id: Option<&'a str>,
        ) -> BoxFuture<'a, Result<RpcReply>> {
            let method = body["method"].as_str().unwrap_or_default().to_string();
            self.sent
                .lock()
                .unwrap()
                .push((method, session_id.map(str::to_string)));
            let next = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("script exhausted")));
            Box::pin(async move { next })
        }
    }

    type SentLog = std::sync::Arc<std::sync::Mutex<Vec<(String, Option<String>)>>>;

    fn scripted(outcomes: Vec<Result<RpcReply>>) -> (McpSearch, SentLog) {
        let sent = SentLog::default();
        let transport = ScriptedTransport {
            outcomes: std::sync::Mutex::new(outcomes.into()),
            sent: sent.clone(),
        };
        let search = McpSearch::with_transport(
            Box::new(transport),
            "http://docs.test/mcp".to_string(),
            "search_documents".to_string(),
        );
        (search, sent)
    }

    fn opened(session: &str) -> Result<RpcReply> {
        Ok(RpcReply {
            session_id: Some(session.to_string()),
            payload: Some(json!({"jsonrpc": "2.0", "id": 1, "result": {}})),
        })
    }

    fn accepted() -> Result<RpcReply> {
        Ok(RpcReply::default())
    }

    fn hit(text: &str) -> Result<RpcReply> {
        Ok(RpcReply {
            session_id: None,
            payload: Some(json!({"result": {"content": [{"type": "text", "text": text}]}})),
        })
    }

    fn expired() -> Result<RpcReply> {
        Err(BugHunterError::McpSessionExpired.into())
    }

    fn sent_pairs(sent: &SentLog) -> Vec<(String, Option<String>)> {
        sent.lock().unwrap().clone()
    }

    fn pair(method: &str, session: Option<&str>) -> (String, Option<String>) {
        (method.to_string(), session.map(str::to_string))
    }

    #[tokio::test]
    async fn session_is_opened_once_and_reused() {
        let (search, sent) = scripted(vec![opened("s1"), accepted(), hit("a"), hit("b")]);

        assert_eq!(search.search("q1").await.unwrap(), json!("a"));
        assert_eq!(search.search("q2").await.unwrap(), json!("b"));

        assert_eq!(
            sent_pairs(&sent),
            vec![
                pair("initialize", None),
                pair("notifications/initialized", Some("s1")),
                pair("tools/call", Some("s1")),
                pair("tools/call", Some("s1")),
            ]
        );
    }

    #[tokio::test]
    async fn expired_session_is_reopened_and_query_retried() {
        let (search, sent) = scripted(vec![
            opened("s1"),
            accepted(),
            hit("before restart"),
            expired(),
            opened("s2"),
            accepted(),
            hit("after restart"),
            hit("still fine"),
        ]);

        assert_eq!(search.search("q1").await.unwrap(), json!("before restart"));
        assert_eq!(search.search("q2").await.unwrap(), json!("after restart"));
        assert_eq!(search.search("q3").await.unwrap(), json!("still fine"));

        let sent = sent_pairs(&sent);
        assert_eq!(
            sent[3..],
            [
                pair("tools/call", Some("s1")),
                pair("initialize", None),
                pair("notifications/initialized", Some("s2")),
                pair("tools/call", Some("s2")),
                pair("tools/call", Some("s2")),
            ]
        );
    }

    #[tokio::test]
    async fn second_expiry_in_a_row_is_reported() {
        let (search, _) = scripted(vec![
            opened("s1"),
            accepted(),
            expired(),
            opened("s2"),
            accepted(),
            expired(),
        ]);

        let err = search.search("q").await.unwrap_err();
        assert!(is_session_expired(&err));
    }

    #[tokio::test]
    async fn other_failures_are_not_retried() {
        let (search, sent) = scripted(vec![
            opened("s1"),
            accepted(),
            Err(anyhow!("MCP server error 500 Internal Server Error: boom")),
        ]);

        let err = search.search("q").await.unwrap_err();
        assert!(err.to_string().contains("500"));
        assert_eq!(sent_pairs(&sent).len(), 3);
    }

    #[test]
    fn legacy_sse_urls_are_recognized() {
        assert!(is_legacy_sse_url("http://localhost:8003/sse"));
        assert!(is_legacy_sse_url("http://localhost:8003/sse/"));
        assert!(!is_legacy_sse_url("http://localhost:8003/mcp"));
    }

    #[test]
    fn sse_body_yields_last_reply() {
        let body = "event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\
                    \n\
                    event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"content\":[]}}\n\
                    \n";
        let reply = parse_sse_payload(body).unwrap();
        assert_eq!(reply["id"], json!(2));
    }

    #[test]
    fn sse_body_without_reply_is_none() {
        assert!(parse_sse_payload("event: ping\n\n").is_none());
    }

    #[test]
    fn single_text_item_stays_a_string() {
        let reply = json!({"result": {"content": [{"type": "text", "text": "use setVoltage before connect"}]}});
        assert_eq!(
            extract_tool_result(&reply).unwrap(),
            json!("use setVoltage before connect")
        );
    }

    #[test]
    fn json_text_items_become_an_array_of_records() {
        let reply = json!({"result": {"content": [
            {"type": "text", "text": "{\"text\":\"a\",\"score\":0.9}"},
            {"type": "text", "text": "{\"text\":\"b\",\"score\":0.4}"}
        ]}});
        assert_eq!(
            extract_tool_result(&reply).unwrap(),
            json!([{"text": "a", "score": 0.9}, {"text": "b", "score": 0.4}])
        );
    }

    #[test]
    fn structured_result_wrapper_is_unwrapped() {
        let reply = json!({"result": {
            "content": [{"type": "text", "text": "ignored"}],
            "structuredContent": {"result": [{"text": "a"}]}
        }});
        assert_eq!(extract_tool_result(&reply).unwrap(), json!([{"text": "a"}]));
    }

    #[test]
    fn rpc_and_tool_errors_are_failures() {
        let rpc = json!({"error": {"code": -32602, "message": "Unknown tool"}});
        assert!(extract_tool_result(&rpc)
            .unwrap_err()
            .to_string()
            .contains("Unknown tool"));

        let tool = json!({"result": {"isError": true, "content": [{"type": "text", "text": "index offline"}]}});
        assert!(extract_tool_result(&tool)
            .unwrap_err()
            .to_string()
            .contains("index offline"));
    }

    #[test]
    fn empty_content_is_zero_results() {
        let reply = json!({"result": {"content": []}});
        assert_eq!(extract_tool_result(&reply).unwrap(), json!([]));
    }
}
