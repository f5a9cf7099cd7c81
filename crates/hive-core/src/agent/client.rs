//! Remote RPC client for the coding-agent server's `session`, `event`, and
//! `config` namespaces. One client is built per process and shared across
//! every runtime handle.

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};

use crate::errors::AgentRuntimeError;
use crate::agent::model::{CatalogModel, CatalogProvider, ModelCatalog};

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSession {
    pub id: String,
    pub directory: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryQuery {
    pub directory: String,
}

#[derive(Debug, Clone, Serialize)]
struct CreateSessionRequest {
    title: String,
    directory: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagePart {
    #[serde(rename = "type")]
    pub part_type: &'static str,
    pub text: String,
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            part_type: "text",
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptRequest {
    pub parts: Vec<MessagePart>,
    pub agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteMessage {
    pub role: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default, rename = "time")]
    pub time: Option<MessageTime>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageTime {
    #[serde(default)]
    pub completed: Option<DateTime<Utc>>,
}

/// Raw event read off `/event`, before Hive's status-mapping synthesis.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAgentEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub properties: serde_json::Value,
    #[serde(default, alias = "sessionId", alias = "sessionID")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProviderModelEntry {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProviderEntry {
    id: String,
    #[serde(default)]
    models: std::collections::HashMap<String, ProviderModelEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProvidersResponse {
    providers: Vec<ProviderEntry>,
    #[serde(default)]
    default: std::collections::HashMap<String, String>,
}

#[derive(Clone)]
pub struct AgentClient {
    http: HttpClient,
    base_url: String,
}

impl AgentClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: HttpClient::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builds with static config"),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    pub async fn providers(&self) -> Result<ModelCatalog, AgentRuntimeError> {
        let resp: ProvidersResponse = self
            .http
            .get(self.url("config/providers"))
            .send()
            .await
            .map_err(rpc_err)?
            .error_for_status()
            .map_err(rpc_err)?
            .json()
            .await
            .map_err(rpc_err)?;

        Ok(ModelCatalog {
            providers: resp
                .providers
                .into_iter()
                .map(|p| CatalogProvider {
                    id: p.id,
                    models: p
                        .models
                        .into_iter()
                        .map(|(key, entry)| CatalogModel { key, id: entry.id })
                        .collect(),
                })
                .collect(),
            defaults: resp.default,
        })
    }

    pub async fn create_session(&self, title: &str, directory: &str) -> Result<RemoteSession, AgentRuntimeError> {
        self.http
            .post(self.url("session"))
            .json(&CreateSessionRequest {
                title: title.to_string(),
                directory: directory.to_string(),
            })
            .send()
            .await
            .map_err(rpc_err)?
            .error_for_status()
            .map_err(rpc_err)?
            .json()
            .await
            .map_err(rpc_err)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<RemoteSession, AgentRuntimeError> {
        self.http
            .get(self.url(&format!("session/{session_id}")))
            .send()
            .await
            .map_err(rpc_err)?
            .error_for_status()
            .map_err(rpc_err)?
            .json()
            .await
            .map_err(rpc_err)
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), AgentRuntimeError> {
        let resp = self
            .http
            .delete(self.url(&format!("session/{session_id}")))
            .send()
            .await
            .map_err(rpc_err)?;
        if resp.status().is_success() || resp.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(AgentRuntimeError::Rpc(format!("delete session failed: {}", resp.status())))
        }
    }

    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<RemoteMessage>, AgentRuntimeError> {
        self.http
            .get(self.url(&format!("session/{session_id}/message")))
            .send()
            .await
            .map_err(rpc_err)?
            .error_for_status()
            .map_err(rpc_err)?
            .json()
            .await
            .map_err(rpc_err)
    }

    pub async fn send_prompt(&self, session_id: &str, request: &PromptRequest) -> Result<(), AgentRuntimeError> {
        let resp = self
            .http
            .post(self.url(&format!("session/{session_id}/message")))
            .json(request)
            .send()
            .await
            .map_err(rpc_err)?;
        if resp.status().is_success() {
            return Ok(());
        }
        Err(classify_message_error(resp).await)
    }

    pub async fn abort(&self, session_id: &str) -> Result<(), AgentRuntimeError> {
        self.http
            .post(self.url(&format!("session/{session_id}/abort")))
            .send()
            .await
            .map_err(rpc_err)?
            .error_for_status()
            .map_err(rpc_err)?;
        Ok(())
    }

    /// Open the shared event stream, filtered to nothing in particular —
    /// callers filter by session id themselves (§4.5.4).
    pub async fn subscribe_events(&self) -> Result<EventStream, AgentRuntimeError> {
        let resp = self
            .http
            .get(self.url("event"))
            .send()
            .await
            .map_err(rpc_err)?
            .error_for_status()
            .map_err(rpc_err)?;
        Ok(EventStream::new(resp.bytes_stream()))
    }
}

fn rpc_err(e: reqwest::Error) -> AgentRuntimeError {
    AgentRuntimeError::Rpc(e.to_string())
}

/// Error body shape for a failed `session/{id}/message` response. The
/// remote server names the failure in `name` (or `error`, depending on
/// which layer raised it); `MessageAbortedError` is the one case
/// `send_agent_message` treats as recoverable (§4.5.5).
#[derive(Debug, Clone, Default, Deserialize)]
struct RemoteErrorBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Classify a non-success `session/{id}/message` response: a
/// `MessageAbortedError` body becomes [`AgentRuntimeError::MessageAborted`]
/// so callers can distinguish it from every other RPC failure; anything
/// else stays a plain [`AgentRuntimeError::Rpc`] carrying the status and
/// body for diagnostics.
async fn classify_message_error(resp: reqwest::Response) -> AgentRuntimeError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    classify_message_body(status, body)
}

fn classify_message_body(status: reqwest::StatusCode, body: String) -> AgentRuntimeError {
    let parsed: RemoteErrorBody = serde_json::from_str(&body).unwrap_or_default();
    let kind = parsed.name.as_deref().or(parsed.error.as_deref()).unwrap_or("");

    if kind.contains("MessageAborted") || body.contains("MessageAbortedError") {
        let message = parsed.message.unwrap_or(body);
        return AgentRuntimeError::MessageAborted(message);
    }

    AgentRuntimeError::Rpc(format!("{status}: {body}"))
}

/// Decodes the server-sent-events body of `/event` into `RawAgentEvent`s,
/// one per `data:` line. Mirrors the buffer-and-split-on-blank-line shape
/// used for streaming chat completions, generalized from a single `data:`
/// JSON payload per event to this server's line-delimited framing.
pub struct EventStream {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: String,
}

impl EventStream {
    fn new(byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            buffer: String::new(),
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let newline = self.buffer.find('\n')?;
        let line: String = self.buffer.drain(..=newline).collect();
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl Stream for EventStream {
    type Item = Result<RawAgentEvent, AgentRuntimeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        loop {
            while let Some(line) = self.take_line() {
                let Some(payload) = line.strip_prefix("data:") else {
                    continue;
                };
                let payload = payload.trim();
                if payload.is_empty() {
                    continue;
                }
                return match serde_json::from_str::<RawAgentEvent>(payload) {
                    Ok(event) => Poll::Ready(Some(Ok(event))),
                    Err(e) => Poll::Ready(Some(Err(AgentRuntimeError::Serde(e)))),
                };
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => self.buffer.push_str(text),
                    Err(_) => continue,
                },
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(rpc_err(e)))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{StreamExt, stream};

    #[tokio::test]
    async fn event_stream_splits_on_data_lines() {
        let chunks = vec![
            Ok::<_, reqwest::Error>(Bytes::from_static(b"data: {\"type\":\"session.idle\",\"sessionId\":\"s1\"}\n")),
            Ok(Bytes::from_static(b"\ndata: {\"type\":\"session.error\"}\n")),
        ];
        let mut events = EventStream::new(stream::iter(chunks));
        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first.event_type, "session.idle");
        assert_eq!(first.session_id.as_deref(), Some("s1"));
        let second = events.next().await.unwrap().unwrap();
        assert_eq!(second.event_type, "session.error");
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn event_stream_skips_blank_and_comment_lines() {
        let chunks = vec![Ok::<_, reqwest::Error>(Bytes::from_static(
            b": keepalive\n\ndata: {\"type\":\"session.idle\"}\n",
        ))];
        let mut events = EventStream::new(stream::iter(chunks));
        let event = events.next().await.unwrap().unwrap();
        assert_eq!(event.event_type, "session.idle");
    }

    #[test]
    fn message_aborted_body_yields_message_aborted_variant() {
        let body = r#"{"name":"MessageAbortedError","message":"aborted by user"}"#.to_string();
        let err = classify_message_body(reqwest::StatusCode::CONFLICT, body);
        match err {
            AgentRuntimeError::MessageAborted(message) => assert_eq!(message, "aborted by user"),
            other => panic!("expected MessageAborted, got {other:?}"),
        }
    }

    #[test]
    fn message_aborted_error_name_embedded_in_plain_text_still_matches() {
        let body = "upstream raised MessageAbortedError: interrupted".to_string();
        let err = classify_message_body(reqwest::StatusCode::INTERNAL_SERVER_ERROR, body);
        assert!(matches!(err, AgentRuntimeError::MessageAborted(_)));
    }

    #[test]
    fn other_failure_bodies_stay_plain_rpc_errors() {
        let body = r#"{"name":"InternalServerError","message":"db unavailable"}"#.to_string();
        let err = classify_message_body(reqwest::StatusCode::INTERNAL_SERVER_ERROR, body);
        match err {
            AgentRuntimeError::Rpc(message) => {
                assert!(message.contains("500"));
                assert!(message.contains("db unavailable"));
            }
            other => panic!("expected Rpc, got {other:?}"),
        }
    }

    #[test]
    fn non_json_body_without_marker_stays_plain_rpc_error() {
        let body = "service unavailable".to_string();
        let err = classify_message_body(reqwest::StatusCode::BAD_GATEWAY, body);
        assert!(matches!(err, AgentRuntimeError::Rpc(_)));
    }
}
