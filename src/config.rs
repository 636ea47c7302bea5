use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const STATE_DIR: &str = ".fileclerk";
pub const SETTINGS_FILE_NAME: &str = "config.yaml";

const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_SUMMARIZER_MODEL: &str = "standard";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid yaml in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("settings validation failed: {0}")]
    Settings(String),
    #[error("failed to resolve home directory for state root")]
    HomeDirectoryUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub store: StoreSettings,
    pub summarizer: SummarizerSettings,
    #[serde(default)]
    pub channel: ChannelSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    pub api_base: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarizerSettings {
    pub api_base: String,
    #[serde(default = "default_summarizer_model")]
    pub model: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_base: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: String::new(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECONDS
}

fn default_summarizer_model() -> String {
    DEFAULT_SUMMARIZER_MODEL.to_string()
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_api_base("store.api_base", &self.store.api_base)?;
        validate_api_base("summarizer.api_base", &self.summarizer.api_base)?;
        if self.store.request_timeout_seconds == 0 {
            return Err(ConfigError::Settings(
                "store.request_timeout_seconds must be greater than zero".to_string(),
            ));
        }
        if self.summarizer.request_timeout_seconds == 0 {
            return Err(ConfigError::Settings(
                "summarizer.request_timeout_seconds must be greater than zero".to_string(),
            ));
        }
        if self.summarizer.model.trim().is_empty() {
            return Err(ConfigError::Settings(
                "summarizer.model must be non-empty".to_string(),
            ));
        }
        if self.channel.enabled {
            validate_api_base("channel.api_base", &self.channel.api_base)?;
            if self.channel.request_timeout_seconds == 0 {
                return Err(ConfigError::Settings(
                    "channel.request_timeout_seconds must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn validate_api_base(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Settings(format!("{field} must be set")));
    }
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ConfigError::Settings(format!(
            "{field} must be an http(s) url, got `{value}`"
        )));
    }
    Ok(())
}

pub fn settings_path(state_root: &Path) -> PathBuf {
    state_root.join(SETTINGS_FILE_NAME)
}

pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let settings: Settings = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    settings.validate()?;
    Ok(settings)
}

pub fn default_state_root_path() -> Result<PathBuf, ConfigError> {
    let home = std::env::var_os("HOME").ok_or(ConfigError::HomeDirectoryUnavailable)?;
    Ok(PathBuf::from(home).join(STATE_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
store:
  api_base: https://store.example.com/api
summarizer:
  api_base: https://summaries.example.com/v1
channel:
  enabled: true
  api_base: https://chat.example.com/api
"#
    }

    #[test]
    fn settings_parse_with_defaults() {
        let settings: Settings = serde_yaml::from_str(sample_yaml()).expect("parse");
        settings.validate().expect("valid");
        assert_eq!(
            settings.store.request_timeout_seconds,
            DEFAULT_REQUEST_TIMEOUT_SECONDS
        );
        assert_eq!(settings.summarizer.model, DEFAULT_SUMMARIZER_MODEL);
        assert!(settings.channel.enabled);
    }

    #[test]
    fn channel_section_is_optional() {
        let yaml = r#"
store:
  api_base: https://store.example.com/api
summarizer:
  api_base: https://summaries.example.com/v1
"#;
        let settings: Settings = serde_yaml::from_str(yaml).expect("parse");
        settings.validate().expect("valid");
        assert!(!settings.channel.enabled);
    }

    #[test]
    fn validation_rejects_non_http_api_base() {
        let yaml = r#"
store:
  api_base: store.example.com
summarizer:
  api_base: https://summaries.example.com/v1
"#;
        let settings: Settings = serde_yaml::from_str(yaml).expect("parse");
        let err = settings.validate().expect_err("must fail");
        assert!(err.to_string().contains("store.api_base"));
    }

    #[test]
    fn enabled_channel_requires_api_base() {
        let yaml = r#"
store:
  api_base: https://store.example.com/api
summarizer:
  api_base: https://summaries.example.com/v1
channel:
  enabled: true
"#;
        let settings: Settings = serde_yaml::from_str(yaml).expect("parse");
        let err = settings.validate().expect_err("must fail");
        assert!(err.to_string().contains("channel.api_base"));
    }
}
