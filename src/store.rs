use crate::config::StoreSettings;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

pub const STORE_TOKEN_ENV: &str = "FILECLERK_STORE_TOKEN";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("missing required env var `{0}`")]
    MissingEnvVar(String),
    #[error("file store request failed: {0}")]
    Request(String),
    #[error("file store rejected the operation: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Folder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreEntry {
    pub id: String,
    pub name: String,
    pub kind: EntryKind,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Seam between the dispatcher and the remote file store. The dispatcher
/// only ever talks to this trait; the HTTP client below is the production
/// implementation.
pub trait FileStore {
    fn list(&self, path: &str) -> Result<Vec<StoreEntry>, StoreError>;
    fn delete(&self, path: &str) -> Result<(), StoreError>;
    fn move_entry(&self, source: &str, destination: &str) -> Result<(), StoreError>;
    fn read_content(&self, path: &str) -> Result<String, StoreError>;
}

#[derive(Debug, Clone, Deserialize)]
struct StoreEnvelope<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    data: T,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct EmptyData {}

#[derive(Debug, Clone, Deserialize)]
struct ListData {
    #[serde(default)]
    entries: Vec<StoreEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentData {
    content: String,
}

pub struct HttpFileStore {
    api_base: String,
    token: String,
    agent: ureq::Agent,
}

impl HttpFileStore {
    pub fn from_env(settings: &StoreSettings) -> Result<Self, StoreError> {
        let token = std::env::var(STORE_TOKEN_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| StoreError::MissingEnvVar(STORE_TOKEN_ENV.to_string()))?;
        Ok(Self::new(settings, token))
    }

    pub fn new(settings: &StoreSettings, token: String) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build();
        Self {
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            token,
            agent,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    fn get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, StoreError> {
        let mut url = self.endpoint(path);
        if !query.is_empty() {
            let encoded = query
                .iter()
                .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            url = format!("{url}?{encoded}");
        }
        let response = self
            .agent
            .get(&url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .call()
            .map_err(|e| StoreError::Request(e.to_string()))?;
        response
            .into_json::<T>()
            .map_err(|e| StoreError::Request(e.to_string()))
    }

    fn post<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, StoreError> {
        let response = self
            .agent
            .post(&self.endpoint(path))
            .set("Authorization", &format!("Bearer {}", self.token))
            .send_json(
                serde_json::to_value(body).map_err(|e| StoreError::Request(e.to_string()))?,
            )
            .map_err(|e| StoreError::Request(e.to_string()))?;
        response
            .into_json::<T>()
            .map_err(|e| StoreError::Request(e.to_string()))
    }
}

fn check_ok<T>(envelope: StoreEnvelope<T>, operation: &str) -> Result<T, StoreError> {
    if !envelope.ok {
        return Err(StoreError::Rejected(
            envelope
                .error
                .unwrap_or_else(|| format!("{operation} failed")),
        ));
    }
    Ok(envelope.data)
}

impl FileStore for HttpFileStore {
    fn list(&self, path: &str) -> Result<Vec<StoreEntry>, StoreError> {
        let envelope: StoreEnvelope<ListData> = self.get("files.list", &[("path", path)])?;
        Ok(check_ok(envelope, "files.list")?.entries)
    }

    fn delete(&self, path: &str) -> Result<(), StoreError> {
        let envelope: StoreEnvelope<EmptyData> =
            self.post("files.delete", &json!({ "path": path }))?;
        check_ok(envelope, "files.delete").map(|_| ())
    }

    fn move_entry(&self, source: &str, destination: &str) -> Result<(), StoreError> {
        let envelope: StoreEnvelope<EmptyData> = self.post(
            "files.move",
            &json!({ "source": source, "destination": destination }),
        )?;
        check_ok(envelope, "files.move").map(|_| ())
    }

    fn read_content(&self, path: &str) -> Result<String, StoreError> {
        let envelope: StoreEnvelope<ContentData> =
            self.get("files.content", &[("path", path)])?;
        Ok(check_ok(envelope, "files.content")?.content)
    }
}
