use crate::parser::CommandKind;
use crate::shared::fs_atomic::durable_append_line;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const DEFAULT_RECENT_RECORDS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid audit record for {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Denied,
    PendingConfirmation,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Denied => "denied",
            Outcome::PendingConfirmation => "pending_confirmation",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub timestamp: i64,
    pub recorded_at: String,
    pub user_id: String,
    pub command_kind: CommandKind,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub destination_path: Option<String>,
    pub outcome: Outcome,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub user_id: String,
    pub total_commands: u64,
    pub commands_by_kind: BTreeMap<String, u64>,
    pub outcomes_by_kind: BTreeMap<String, u64>,
    pub recent_records: Vec<AuditRecord>,
}

/// Append-only dispatch trail kept in two forms derived from the same
/// record: a JSONL file for the structured read path and a flat
/// tab-separated line log for operators. Appends are serialized under a
/// lock and synced before returning, so a record acknowledged to the
/// dispatcher survives a crash.
#[derive(Debug)]
pub struct AuditLog {
    state_root: PathBuf,
    append_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn records_path(&self) -> PathBuf {
        self.state_root.join("audit/records.jsonl")
    }

    pub fn table_path(&self) -> PathBuf {
        self.state_root.join("audit/records.log")
    }

    pub fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let json_path = self.records_path();
        let line = serde_json::to_string(record).map_err(|e| json_error(&json_path, e))?;

        let _guard = match self.append_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        durable_append_line(&json_path, &line).map_err(|e| io_error(&json_path, e))?;

        let table_path = self.table_path();
        durable_append_line(&table_path, &table_line(record))
            .map_err(|e| io_error(&table_path, e))?;
        Ok(())
    }

    /// Aggregates a user's history. Never mutates; a trailing partial line
    /// from an interrupted append is skipped rather than failing the read.
    pub fn stats_for(&self, user_id: &str, recent: usize) -> Result<UserStats, AuditError> {
        let mut stats = UserStats {
            user_id: user_id.to_string(),
            ..UserStats::default()
        };

        let path = self.records_path();
        if !path.exists() {
            return Ok(stats);
        }
        let raw = fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
        for line in raw.lines() {
            let Ok(record) = serde_json::from_str::<AuditRecord>(line) else {
                continue;
            };
            if record.user_id != user_id {
                continue;
            }
            stats.total_commands += 1;
            *stats
                .commands_by_kind
                .entry(record.command_kind.to_string())
                .or_default() += 1;
            *stats
                .outcomes_by_kind
                .entry(record.outcome.to_string())
                .or_default() += 1;
            stats.recent_records.push(record);
        }

        let keep_from = stats.recent_records.len().saturating_sub(recent);
        stats.recent_records.drain(..keep_from);
        Ok(stats)
    }
}

pub fn iso_timestamp(now: i64) -> String {
    chrono::DateTime::from_timestamp(now, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| now.to_string())
}

fn table_line(record: &AuditRecord) -> String {
    let kind = record.command_kind.to_string();
    let outcome = record.outcome.to_string();
    [
        record.recorded_at.as_str(),
        record.user_id.as_str(),
        kind.as_str(),
        record.path.as_deref().unwrap_or("-"),
        record.destination_path.as_deref().unwrap_or("-"),
        outcome.as_str(),
        record.detail.as_str(),
    ]
    .map(sanitize_field)
    .join("\t")
}

fn sanitize_field(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|ch| if ch == '\t' || ch == '\n' || ch == '\r' { ' ' } else { ch })
        .collect();
    if cleaned.trim().is_empty() {
        "-".to_string()
    } else {
        cleaned
    }
}

fn io_error(path: &Path, source: std::io::Error) -> AuditError {
    AuditError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn json_error(path: &Path, source: serde_json::Error) -> AuditError {
    AuditError::Json {
        path: path.display().to_string(),
        source,
    }
}
