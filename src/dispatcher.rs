use crate::audit::{self, AuditError, AuditLog, AuditRecord, Outcome, UserStats};
use crate::confirm::{ConfirmationStore, Resolution, CONFIRMATION_TTL_SECS};
use crate::parser::{self, Command, CommandKind};
use crate::ratelimit::{RateLimiter, RATE_WINDOW_CAPACITY};
use crate::shared::logging::append_system_log_line;
use crate::store::{EntryKind, FileStore};
use crate::summarize::Summarizer;
use std::path::PathBuf;

pub const LIST_MAX_ITEMS: usize = 10;
pub const SUMMARY_MAX_FILES: usize = 5;

const RAW_TEXT_DETAIL_CHARS: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to write audit record: {0}")]
    Audit(#[from] AuditError),
}

/// Sequences one inbound message through parse, rate check, confirmation
/// handshake, collaborator execution and audit. Every invocation writes
/// exactly one audit record, and the record is durable before the reply is
/// returned.
pub struct Dispatcher {
    rate_limiter: RateLimiter,
    confirmations: ConfirmationStore,
    audit: AuditLog,
    store: Box<dyn FileStore + Send + Sync>,
    summarizer: Box<dyn Summarizer + Send + Sync>,
    state_root: PathBuf,
}

impl Dispatcher {
    pub fn new(
        state_root: impl Into<PathBuf>,
        rate_limiter: RateLimiter,
        confirmations: ConfirmationStore,
        audit: AuditLog,
        store: Box<dyn FileStore + Send + Sync>,
        summarizer: Box<dyn Summarizer + Send + Sync>,
    ) -> Self {
        Self {
            rate_limiter,
            confirmations,
            audit,
            store,
            summarizer,
            state_root: state_root.into(),
        }
    }

    /// Single entry point for inbound chat messages. Errs only when the
    /// audit record cannot be written; in that case the reply is withheld
    /// so no action is acknowledged without its audit trail.
    pub fn handle_message(
        &self,
        user_id: &str,
        raw_text: &str,
        now: i64,
    ) -> Result<String, DispatchError> {
        let (record, reply) = self.evaluate(user_id, parser::parse(raw_text), now);
        if let Err(err) = self.audit.record(&record) {
            let _ = append_system_log_line(
                &self.state_root,
                &format!("audit write failed for user {user_id}: {err}"),
            );
            return Err(err.into());
        }
        Ok(reply)
    }

    pub fn user_stats(&self, user_id: &str) -> Result<UserStats, AuditError> {
        self.audit.stats_for(user_id, audit::DEFAULT_RECENT_RECORDS)
    }

    fn evaluate(&self, user_id: &str, command: Command, now: i64) -> (AuditRecord, String) {
        // Informational traffic is not billed against the rate window.
        match &command {
            Command::Help => {
                return (
                    record(user_id, &command, Outcome::Success, "help shown", now),
                    parser::help_message(),
                );
            }
            Command::Unrecognized { raw } => {
                let truncated = truncate_detail(raw);
                return (
                    record(
                        user_id,
                        &command,
                        Outcome::Success,
                        &format!("command not understood: {truncated}"),
                        now,
                    ),
                    format!(
                        "Command not understood: `{truncated}`. Send HELP to see available commands."
                    ),
                );
            }
            _ => {}
        }

        if !self.rate_limiter.admit(user_id, now) {
            let used = self.rate_limiter.used(user_id, now);
            return (
                record(
                    user_id,
                    &command,
                    Outcome::Denied,
                    &format!("rate limit exceeded ({used}/{RATE_WINDOW_CAPACITY} in window)"),
                    now,
                ),
                format!(
                    "Rate limit exceeded: {used} commands in the last hour (limit {RATE_WINDOW_CAPACITY}). Wait for the window to reset and try again."
                ),
            );
        }

        match command {
            Command::List { ref path } => self.run_list(user_id, &command, path, now),
            Command::Summary { ref path } => self.run_summary(user_id, &command, path, now),
            Command::Delete { .. } | Command::Move { .. } => {
                self.issue_confirmation(user_id, command, now)
            }
            Command::ConfirmReply { ref code } => self.run_confirmation(user_id, &command, code, now),
            Command::Help | Command::Unrecognized { .. } => unreachable_informational(user_id, now),
        }
    }

    fn run_list(
        &self,
        user_id: &str,
        command: &Command,
        path: &str,
        now: i64,
    ) -> (AuditRecord, String) {
        match self.store.list(path) {
            Ok(entries) => (
                record(
                    user_id,
                    command,
                    Outcome::Success,
                    &format!("{} entries", entries.len()),
                    now,
                ),
                format_listing(path, &entries),
            ),
            Err(err) => (
                record(user_id, command, Outcome::Failure, &err.to_string(), now),
                format!(
                    "Could not list {path}. The file store reported an error; try again later."
                ),
            ),
        }
    }

    fn run_summary(
        &self,
        user_id: &str,
        command: &Command,
        path: &str,
        now: i64,
    ) -> (AuditRecord, String) {
        // A readable path is summarized as a single file; anything else is
        // treated as a folder and its first few files are combined.
        let combined = match self.store.read_content(path) {
            Ok(content) => content,
            Err(_) => match self.collect_folder_text(path) {
                Ok(Some(combined)) => combined,
                Ok(None) => {
                    return (
                        record(
                            user_id,
                            command,
                            Outcome::Success,
                            "no readable text content",
                            now,
                        ),
                        format!(
                            "No readable text files found under {path}; nothing to summarize."
                        ),
                    );
                }
                Err(detail) => {
                    return (
                        record(user_id, command, Outcome::Failure, &detail, now),
                        format!(
                            "Could not read {path}. The file store reported an error; try again later."
                        ),
                    );
                }
            },
        };

        match self.summarizer.summarize(&combined) {
            Ok(summary) => (
                record(user_id, command, Outcome::Success, "summary generated", now),
                format!("Summary of {path}:\n{summary}"),
            ),
            Err(err) => (
                record(user_id, command, Outcome::Failure, &err.to_string(), now),
                format!(
                    "Could not summarize {path}. The summarization service reported an error; try again later."
                ),
            ),
        }
    }

    fn collect_folder_text(&self, path: &str) -> Result<Option<String>, String> {
        let entries = self.store.list(path).map_err(|err| err.to_string())?;
        let mut parts = Vec::new();
        for entry in entries
            .iter()
            .filter(|entry| entry.kind == EntryKind::File)
            .take(SUMMARY_MAX_FILES)
        {
            let child = join_path(path, &entry.name);
            if let Ok(content) = self.store.read_content(&child) {
                parts.push(format!("File: {}\n{}", entry.name, content));
            }
        }
        if parts.is_empty() {
            return Ok(None);
        }
        Ok(Some(parts.join("\n\n")))
    }

    fn issue_confirmation(
        &self,
        user_id: &str,
        command: Command,
        now: i64,
    ) -> (AuditRecord, String) {
        let description = describe_action(&command);
        match self.confirmations.issue(user_id, command.clone(), now) {
            Ok(code) => (
                record(
                    user_id,
                    &command,
                    Outcome::PendingConfirmation,
                    &format!("confirmation code {code} issued"),
                    now,
                ),
                format!(
                    "Confirmation required for {description}.\nReply with {code} within {} minutes to proceed. This action cannot be undone.",
                    CONFIRMATION_TTL_SECS / 60
                ),
            ),
            Err(err) => (
                record(user_id, &command, Outcome::Failure, &err.to_string(), now),
                "Could not start the confirmation handshake. Try again later.".to_string(),
            ),
        }
    }

    fn run_confirmation(
        &self,
        user_id: &str,
        reply_command: &Command,
        code: &str,
        now: i64,
    ) -> (AuditRecord, String) {
        match self.confirmations.resolve(user_id, code, now) {
            Resolution::NotFound => (
                record(
                    user_id,
                    reply_command,
                    Outcome::Denied,
                    "confirmation code not found",
                    now,
                ),
                "No pending action matches that code. It may have been replaced; send the original command again.".to_string(),
            ),
            Resolution::Expired => (
                record(
                    user_id,
                    reply_command,
                    Outcome::Denied,
                    "confirmation code expired",
                    now,
                ),
                "That confirmation code has expired. Send the original command again.".to_string(),
            ),
            Resolution::Confirmed(confirmed) => self.execute_destructive(user_id, confirmed, now),
        }
    }

    fn execute_destructive(
        &self,
        user_id: &str,
        command: Command,
        now: i64,
    ) -> (AuditRecord, String) {
        let result = match &command {
            Command::Delete { path } => self.store.delete(path),
            Command::Move {
                source,
                destination,
            } => self.store.move_entry(source, destination),
            // resolve() only hands back what issue() accepted.
            other => {
                return (
                    record(
                        user_id,
                        other,
                        Outcome::Failure,
                        "resolved ticket held a non-destructive command",
                        now,
                    ),
                    "The confirmed action could not be executed.".to_string(),
                );
            }
        };

        let description = describe_action(&command);
        match result {
            Ok(()) => (
                record(
                    user_id,
                    &command,
                    Outcome::Success,
                    &format!("{description} completed after confirmation"),
                    now,
                ),
                match &command {
                    Command::Delete { path } => format!("Deleted {path}."),
                    Command::Move {
                        source,
                        destination,
                    } => format!("Moved {source} to {destination}."),
                    _ => "Done.".to_string(),
                },
            ),
            Err(err) => (
                record(user_id, &command, Outcome::Failure, &err.to_string(), now),
                format!(
                    "The {description} could not be completed. The file store reported an error; full details were logged."
                ),
            ),
        }
    }
}

fn record(
    user_id: &str,
    command: &Command,
    outcome: Outcome,
    detail: &str,
    now: i64,
) -> AuditRecord {
    AuditRecord {
        timestamp: now,
        recorded_at: audit::iso_timestamp(now),
        user_id: user_id.to_string(),
        command_kind: command.kind(),
        path: command.target_path().map(str::to_string),
        destination_path: command.destination_path().map(str::to_string),
        outcome,
        detail: detail.to_string(),
    }
}

fn unreachable_informational(user_id: &str, now: i64) -> (AuditRecord, String) {
    // Help and Unrecognized return before the rate check; keep the arm
    // total anyway so the dispatch path can never panic.
    (
        record(
            user_id,
            &Command::Unrecognized { raw: String::new() },
            Outcome::Success,
            "informational command reached the routed branch",
            now,
        ),
        parser::help_message(),
    )
}

fn describe_action(command: &Command) -> String {
    match command {
        Command::Delete { path } => format!("deletion of {path}"),
        Command::Move {
            source,
            destination,
        } => format!("move of {source} to {destination}"),
        other => format!("{} command", other.kind()),
    }
}

fn format_listing(path: &str, entries: &[crate::store::StoreEntry]) -> String {
    if entries.is_empty() {
        return format!("{path} is empty.");
    }

    let mut lines = vec![format!("Contents of {path}:")];
    let folders = entries.iter().filter(|e| e.kind == EntryKind::Folder);
    let files = entries.iter().filter(|e| e.kind == EntryKind::File);
    let mut shown = 0usize;
    for entry in folders.chain(files) {
        if shown == LIST_MAX_ITEMS {
            break;
        }
        let marker = match entry.kind {
            EntryKind::Folder => "[dir] ",
            EntryKind::File => "",
        };
        lines.push(format!("  {marker}{}", entry.name));
        shown += 1;
    }
    if entries.len() > shown {
        lines.push(format!("  ... and {} more entries", entries.len() - shown));
    }
    lines.join("\n")
}

fn join_path(parent: &str, name: &str) -> String {
    parser::normalize_path(&format!("{}/{}", parent.trim_end_matches('/'), name))
}

fn truncate_detail(raw: &str) -> String {
    raw.chars().take(RAW_TEXT_DETAIL_CHARS).collect()
}
