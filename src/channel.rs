use crate::config::Settings;
use crate::queue::{self, OutboundMessage, QueuePaths};
use crate::shared::fs_atomic::atomic_write_file;
use crate::shared::ids::{MessageId, UserId};
use crate::shared::logging::append_system_log_line;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CHAT_TOKEN_ENV: &str = "FILECLERK_CHAT_TOKEN";

const OUTBOUND_CHUNK_CHARS: usize = 1500;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("chat channel is disabled in settings")]
    ChannelDisabled,
    #[error("missing required env var `{0}`")]
    MissingEnvVar(String),
    #[error("chat gateway request failed: {0}")]
    ApiRequest(String),
    #[error("chat gateway responded with error `{0}`")]
    ApiResponse(String),
    #[error("invalid inbound message `{message_id}`: {reason}")]
    InvalidInbound { message_id: String, reason: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSyncReport {
    pub inbound_enqueued: usize,
    pub outbound_sent: usize,
    pub outbound_failed: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct GatewayEnvelope<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    data: T,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct EmptyData {}

#[derive(Debug, Clone, Deserialize)]
struct MessagesData {
    #[serde(default)]
    messages: Vec<GatewayMessage>,
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GatewayMessage {
    id: String,
    #[serde(default)]
    sender: Option<String>,
    sender_id: String,
    #[serde(default)]
    text: Option<String>,
    timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
struct CursorState {
    cursor: String,
}

struct GatewayClient {
    api_base: String,
    token: String,
    agent: ureq::Agent,
}

impl GatewayClient {
    fn from_env(settings: &Settings) -> Result<Self, ChannelError> {
        let token = std::env::var(CHAT_TOKEN_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ChannelError::MissingEnvVar(CHAT_TOKEN_ENV.to_string()))?;
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(settings.channel.request_timeout_seconds))
            .build();
        Ok(Self {
            api_base: settings.channel.api_base.trim_end_matches('/').to_string(),
            token,
            agent,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    fn fetch_messages(&self, cursor: &str) -> Result<MessagesData, ChannelError> {
        let mut url = self.endpoint("messages.poll");
        if !cursor.trim().is_empty() {
            url = format!("{url}?cursor={}", urlencoding::encode(cursor));
        }
        let response = self
            .agent
            .get(&url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .call()
            .map_err(|e| ChannelError::ApiRequest(e.to_string()))?;
        let envelope: GatewayEnvelope<MessagesData> = response
            .into_json()
            .map_err(|e| ChannelError::ApiRequest(e.to_string()))?;
        if !envelope.ok {
            return Err(ChannelError::ApiResponse(
                envelope
                    .error
                    .unwrap_or_else(|| "messages.poll failed".to_string()),
            ));
        }
        Ok(envelope.data)
    }

    fn send_message(&self, recipient_id: &str, text: &str) -> Result<(), ChannelError> {
        let response = self
            .agent
            .post(&self.endpoint("messages.send"))
            .set("Authorization", &format!("Bearer {}", self.token))
            .send_json(json!({ "recipient": recipient_id, "text": text }))
            .map_err(|e| ChannelError::ApiRequest(e.to_string()))?;
        let envelope: GatewayEnvelope<EmptyData> = response
            .into_json()
            .map_err(|e| ChannelError::ApiRequest(e.to_string()))?;
        if !envelope.ok {
            return Err(ChannelError::ApiResponse(
                envelope
                    .error
                    .unwrap_or_else(|| "messages.send failed".to_string()),
            ));
        }
        Ok(())
    }
}

fn cursor_state_path(state_root: &Path) -> PathBuf {
    state_root.join("channels/chat/cursor.json")
}

fn load_cursor_state(state_root: &Path) -> Result<CursorState, ChannelError> {
    let path = cursor_state_path(state_root);
    if !path.exists() {
        return Ok(CursorState::default());
    }
    let raw = fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
    serde_json::from_str(&raw).map_err(|e| json_error(&path, e))
}

fn save_cursor_state(state_root: &Path, state: &CursorState) -> Result<(), ChannelError> {
    let path = cursor_state_path(state_root);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let body = serde_json::to_vec_pretty(state).map_err(|e| json_error(&path, e))?;
    atomic_write_file(&path, &body).map_err(|e| io_error(&path, e))
}

fn inbound_from_gateway(message: &GatewayMessage) -> Result<queue::InboundMessage, ChannelError> {
    let sender_id =
        UserId::parse(&message.sender_id).map_err(|reason| ChannelError::InvalidInbound {
            message_id: message.id.clone(),
            reason,
        })?;
    let message_id =
        MessageId::parse(&message.id).map_err(|reason| ChannelError::InvalidInbound {
            message_id: message.id.clone(),
            reason,
        })?;
    Ok(queue::InboundMessage {
        sender: message
            .sender
            .clone()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| message.sender_id.clone()),
        sender_id,
        message: message.text.clone().unwrap_or_default(),
        timestamp: message.timestamp,
        message_id,
    })
}

fn chunk_message(input: &str) -> Vec<String> {
    if input.is_empty() {
        return vec![String::new()];
    }

    let mut out = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for ch in input.chars() {
        if count >= OUTBOUND_CHUNK_CHARS {
            out.push(current);
            current = String::new();
            count = 0;
        }
        current.push(ch);
        count += 1;
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn sorted_outgoing_paths(paths: &QueuePaths) -> Result<Vec<PathBuf>, ChannelError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(&paths.outgoing).map_err(|e| io_error(&paths.outgoing, e))? {
        let entry = entry.map_err(|e| io_error(&paths.outgoing, e))?;
        let path = entry.path();
        if path.extension().and_then(|v| v.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn process_inbound(
    state_root: &Path,
    queue_paths: &QueuePaths,
    client: &GatewayClient,
) -> Result<usize, ChannelError> {
    let mut cursor_state = load_cursor_state(state_root)?;
    let mut enqueued = 0usize;

    loop {
        let data = client.fetch_messages(&cursor_state.cursor)?;
        for message in &data.messages {
            let inbound = match inbound_from_gateway(message) {
                Ok(inbound) => inbound,
                Err(err) => {
                    let _ = append_system_log_line(state_root, &format!("inbound dropped: {err}"));
                    continue;
                }
            };
            if queue::enqueue_inbound(queue_paths, &inbound).map_err(|e| {
                ChannelError::ApiResponse(format!("failed to enqueue inbound: {e}"))
            })? {
                enqueued += 1;
            }
        }
        if data.next_cursor.trim().is_empty() || data.next_cursor == cursor_state.cursor {
            break;
        }
        cursor_state.cursor = data.next_cursor;
    }

    save_cursor_state(state_root, &cursor_state)?;
    Ok(enqueued)
}

// Outbound is best-effort: a failed send leaves the file in place for the
// next sync and never aborts the batch.
fn process_outbound(
    state_root: &Path,
    queue_paths: &QueuePaths,
    client: &GatewayClient,
) -> Result<(usize, usize), ChannelError> {
    let mut sent = 0usize;
    let mut failed = 0usize;

    for path in sorted_outgoing_paths(queue_paths)? {
        let raw = fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
        let outbound: OutboundMessage =
            serde_json::from_str(&raw).map_err(|e| json_error(&path, e))?;

        let mut delivery_failed = false;
        for chunk in chunk_message(&outbound.message) {
            if let Err(err) = client.send_message(outbound.recipient_id.as_str(), &chunk) {
                let _ = append_system_log_line(
                    state_root,
                    &format!(
                        "outbound send failed for `{}`: {err}",
                        outbound.message_id.as_str()
                    ),
                );
                delivery_failed = true;
                break;
            }
        }
        if delivery_failed {
            failed += 1;
            continue;
        }

        fs::remove_file(&path).map_err(|e| io_error(&path, e))?;
        sent += 1;
    }

    Ok((sent, failed))
}

pub fn sync_once(state_root: &Path, settings: &Settings) -> Result<ChannelSyncReport, ChannelError> {
    if !settings.channel.enabled {
        return Err(ChannelError::ChannelDisabled);
    }

    let client = GatewayClient::from_env(settings)?;
    let queue_paths = QueuePaths::from_state_root(state_root);
    queue_paths
        .bootstrap()
        .map_err(|e| ChannelError::ApiResponse(format!("queue bootstrap failed: {e}")))?;

    let inbound_enqueued = process_inbound(state_root, &queue_paths, &client)?;
    let (outbound_sent, outbound_failed) = process_outbound(state_root, &queue_paths, &client)?;
    Ok(ChannelSyncReport {
        inbound_enqueued,
        outbound_sent,
        outbound_failed,
    })
}

fn io_error(path: &Path, source: std::io::Error) -> ChannelError {
    ChannelError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn json_error(path: &Path, source: serde_json::Error) -> ChannelError {
    ChannelError::Json {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn message_chunking_uses_expected_limit() {
        let input = "x".repeat(OUTBOUND_CHUNK_CHARS + 2);
        let chunks = chunk_message(&input);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), OUTBOUND_CHUNK_CHARS);
        assert_eq!(chunks[1].chars().count(), 2);
    }

    #[test]
    fn cursor_state_round_trip_is_stable() {
        let temp = tempdir().expect("tempdir");
        let state = CursorState {
            cursor: "c-1700".to_string(),
        };
        save_cursor_state(temp.path(), &state).expect("save");
        let loaded = load_cursor_state(temp.path()).expect("load");
        assert_eq!(loaded, state);
    }

    #[test]
    fn gateway_message_converts_with_sender_fallback() {
        let message = GatewayMessage {
            id: "chat-1".to_string(),
            sender: None,
            sender_id: "+14155550100".to_string(),
            text: Some("LIST /".to_string()),
            timestamp: 9,
        };
        let inbound = inbound_from_gateway(&message).expect("inbound");
        assert_eq!(inbound.sender, "+14155550100");
        assert_eq!(inbound.message, "LIST /");

        let bad = GatewayMessage {
            id: "chat 2".to_string(),
            sender: None,
            sender_id: "user one".to_string(),
            text: None,
            timestamp: 9,
        };
        assert!(inbound_from_gateway(&bad).is_err());
    }
}
