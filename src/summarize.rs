use crate::config::SummarizerSettings;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub const SUMMARIZER_KEY_ENV: &str = "FILECLERK_SUMMARIZER_KEY";

/// Submitted content is capped so oversized documents degrade to a partial
/// summary instead of a rejected request.
pub const MAX_SUMMARY_INPUT_CHARS: usize = 8_000;

#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("missing required env var `{0}`")]
    MissingEnvVar(String),
    #[error("summarization request failed: {0}")]
    Request(String),
    #[error("summarization rejected: {0}")]
    Rejected(String),
    #[error("content too short to summarize")]
    ContentTooShort,
}

pub trait Summarizer {
    fn summarize(&self, text: &str) -> Result<String, SummarizeError>;
}

#[derive(Debug, Clone, Deserialize)]
struct SummaryEnvelope {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    summary: String,
}

pub struct HttpSummarizer {
    api_base: String,
    api_key: String,
    model: String,
    agent: ureq::Agent,
}

impl HttpSummarizer {
    pub fn from_env(settings: &SummarizerSettings) -> Result<Self, SummarizeError> {
        let api_key = std::env::var(SUMMARIZER_KEY_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| SummarizeError::MissingEnvVar(SUMMARIZER_KEY_ENV.to_string()))?;
        Ok(Self::new(settings, api_key))
    }

    pub fn new(settings: &SummarizerSettings, api_key: String) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build();
        Self {
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: settings.model.clone(),
            agent,
        }
    }
}

impl Summarizer for HttpSummarizer {
    fn summarize(&self, text: &str) -> Result<String, SummarizeError> {
        let content = truncate_for_summary(text)?;
        let url = format!("{}/summaries", self.api_base);
        let response = self
            .agent
            .post(&url)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(json!({ "model": self.model, "content": content }))
            .map_err(|e| SummarizeError::Request(e.to_string()))?;
        let envelope: SummaryEnvelope = response
            .into_json()
            .map_err(|e| SummarizeError::Request(e.to_string()))?;
        if !envelope.ok {
            return Err(SummarizeError::Rejected(
                envelope
                    .error
                    .unwrap_or_else(|| "summaries request failed".to_string()),
            ));
        }
        Ok(envelope.summary)
    }
}

pub fn truncate_for_summary(text: &str) -> Result<String, SummarizeError> {
    let trimmed = text.trim();
    if trimmed.chars().count() < 10 {
        return Err(SummarizeError::ContentTooShort);
    }
    Ok(trimmed.chars().take(MAX_SUMMARY_INPUT_CHARS).collect())
}
