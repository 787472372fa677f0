use anyhow::{Result, bail};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::RemoteAgent;
use crate::consts::BATCH_USER_ID;
use crate::error::RemoteError;

/// Connection settings for a deployed Vertex AI agent engine.
#[derive(Debug, Clone)]
pub struct VertexConfig {
    pub project: String,
    pub location: String,
    /// Bare engine id, or a full `projects/.../reasoningEngines/...` name.
    pub engine_id: String,
    pub access_token: String,
}

impl VertexConfig {
    fn resource_name(&self) -> String {
        if self.engine_id.contains('/') {
            self.engine_id.trim_matches('/').to_string()
        } else {
            format!(
                "projects/{}/locations/{}/reasoningEngines/{}",
                self.project, self.location, self.engine_id
            )
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "https://{}-aiplatform.googleapis.com/v1/{}",
            self.location,
            self.resource_name()
        )
    }
}

/// Reply to a single chat message.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    pub session_id: String,
}

/// Calls a Vertex AI agent engine over REST.
///
/// Every [`RemoteAgent::invoke`] opens a fresh session, streams the query,
/// and keeps only the last event of the stream.
pub struct VertexAgent {
    client: reqwest::Client,
    endpoint: String,
    access_token: String,
    user_id: String,
}

impl VertexAgent {
    pub fn new(config: VertexConfig) -> Result<Self> {
        if config.access_token.is_empty() {
            bail!("no access token found. Set GOOGLE_ACCESS_TOKEN or pass --access-token.");
        }
        if !config.engine_id.contains('/') && config.project.is_empty() {
            bail!("no project configured. Set GOOGLE_CLOUD_PROJECT or pass --project.");
        }
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint(),
            access_token: config.access_token,
            user_id: BATCH_USER_ID.to_string(),
        })
    }

    /// Remote user id attached to sessions (default `batch_job`).
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    async fn post(&self, url: &str, body: &QueryRequest<'_>) -> Result<reqwest::Response, RemoteError> {
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(RemoteError::Status { status, body });
        }
        Ok(resp)
    }

    pub async fn create_session(&self) -> Result<String, RemoteError> {
        let body = QueryRequest {
            class_method: "create_session",
            input: QueryInput {
                user_id: &self.user_id,
                session_id: None,
                message: None,
            },
        };
        let url = format!("{}:query", self.endpoint);
        let value: Value = self.post(&url, &body).await?.json().await?;
        parse_session_id(&value)
    }

    /// Stream one message into an existing session. Only the final event
    /// of the stream is considered.
    pub async fn stream_query(&self, session_id: &str, message: &str) -> Result<String, RemoteError> {
        let body = QueryRequest {
            class_method: "stream_query",
            input: QueryInput {
                user_id: &self.user_id,
                session_id: Some(session_id),
                message: Some(message),
            },
        };
        let url = format!("{}:streamQuery?alt=sse", self.endpoint);
        let resp = self.post(&url, &body).await?;

        let mut events = LastEvent::default();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            events.push(&chunk?);
        }
        let last = events.finish().ok_or(RemoteError::Empty)?;
        extract_text(&last)
    }

    /// Single-message chat. Reuses `session_id` when given, otherwise opens
    /// a new session and returns its id with the reply.
    pub async fn chat(&self, message: &str, session_id: Option<String>) -> Result<ChatReply, RemoteError> {
        let session_id = match session_id {
            Some(id) => id,
            None => self.create_session().await?,
        };
        debug!(session_id = %session_id, "sending chat message");
        let text = self.stream_query(&session_id, message).await?;
        Ok(ChatReply { text, session_id })
    }
}

#[async_trait]
impl RemoteAgent for VertexAgent {
    async fn invoke(&self, message: &str) -> Result<String, RemoteError> {
        let session_id = self.create_session().await?;
        self.stream_query(&session_id, message).await
    }
}

/// Keeps the last well-formed JSON event of a newline-delimited stream.
/// Chunks may split lines anywhere; `data:` prefixes are tolerated.
#[derive(Default)]
struct LastEvent {
    buf: Vec<u8>,
    last: Option<Value>,
}

impl LastEvent {
    fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.accept(&line);
        }
    }

    fn finish(mut self) -> Option<Value> {
        let rest = std::mem::take(&mut self.buf);
        self.accept(&rest);
        self.last
    }

    fn accept(&mut self, line: &[u8]) {
        let Ok(text) = std::str::from_utf8(line) else {
            return;
        };
        let text = text.trim();
        let text = text.strip_prefix("data:").map(str::trim).unwrap_or(text);
        if text.is_empty() {
            return;
        }
        match serde_json::from_str(text) {
            Ok(value) => self.last = Some(value),
            Err(e) => debug!(error = %e, "skipping non-JSON stream line"),
        }
    }
}

/// Text of the first content part, or the in-band error the event carries.
fn extract_text(event: &Value) -> Result<String, RemoteError> {
    if let Some(text) = event.pointer("/content/parts/0/text").and_then(Value::as_str) {
        return Ok(text.to_string());
    }
    let error = match event.get("error") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "Unknown error".to_string(),
        Some(other) => other.to_string(),
    };
    Err(RemoteError::InBand(error))
}

fn parse_session_id(value: &Value) -> Result<String, RemoteError> {
    value
        .pointer("/output/id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RemoteError::Malformed(format!("create_session returned no id: {value}")))
}

// --- API types ---

#[derive(Serialize)]
struct QueryRequest<'a> {
    class_method: &'a str,
    input: QueryInput<'a>,
}

#[derive(Serialize)]
struct QueryInput<'a> {
    user_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}
