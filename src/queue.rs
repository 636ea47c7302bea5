use crate::shared::ids::{MessageId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid queue payload in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub sender: String,
    pub sender_id: UserId,
    pub message: String,
    pub timestamp: i64,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub recipient_id: UserId,
    pub message: String,
    pub original_message: String,
    pub timestamp: i64,
    pub message_id: MessageId,
}

/// Queue directories under the state root. `processed` is the replay
/// ledger: completed message files stay there so a redelivered inbound
/// message (the transport is at-least-once) is recognized and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePaths {
    pub incoming: PathBuf,
    pub processing: PathBuf,
    pub outgoing: PathBuf,
    pub processed: PathBuf,
}

impl QueuePaths {
    pub fn from_state_root(state_root: &Path) -> Self {
        Self {
            incoming: state_root.join("queue/incoming"),
            processing: state_root.join("queue/processing"),
            outgoing: state_root.join("queue/outgoing"),
            processed: state_root.join("queue/processed"),
        }
    }

    pub fn bootstrap(&self) -> Result<(), QueueError> {
        for dir in [
            &self.incoming,
            &self.processing,
            &self.outgoing,
            &self.processed,
        ] {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ClaimedMessage {
    pub processing_path: PathBuf,
    pub payload: InboundMessage,
}

fn message_file_name(message_id: &MessageId) -> String {
    format!("{}.json", sanitize_filename_component(message_id.as_str()))
}

/// Writes the payload into `incoming` unless the message id is already
/// known to any queue stage. Returns false when the message was a
/// duplicate delivery.
pub fn enqueue_inbound(paths: &QueuePaths, payload: &InboundMessage) -> Result<bool, QueueError> {
    let file_name = message_file_name(&payload.message_id);
    for stage in [
        &paths.incoming,
        &paths.processing,
        &paths.processed,
    ] {
        if stage.join(&file_name).exists() {
            return Ok(false);
        }
    }
    let path = paths.incoming.join(&file_name);
    let body = serde_json::to_vec_pretty(payload).map_err(|e| parse_err(&path, e))?;
    fs::write(&path, body).map_err(|e| io_err(&path, e))?;
    Ok(true)
}

pub fn claim_oldest(paths: &QueuePaths) -> Result<Option<ClaimedMessage>, QueueError> {
    for incoming_path in sorted_incoming_paths(&paths.incoming)? {
        let Some(file_name) = incoming_path.file_name() else {
            continue;
        };
        let processing_path = paths.processing.join(file_name);

        match fs::rename(&incoming_path, &processing_path) {
            Ok(_) => {
                let raw = match fs::read_to_string(&processing_path) {
                    Ok(raw) => raw,
                    Err(err) => {
                        requeue_processing_file(paths, &processing_path)?;
                        return Err(io_err(&processing_path, err));
                    }
                };
                let payload: InboundMessage = match serde_json::from_str(&raw) {
                    Ok(payload) => payload,
                    Err(err) => {
                        requeue_processing_file(paths, &processing_path)?;
                        return Err(parse_err(&processing_path, err));
                    }
                };
                return Ok(Some(ClaimedMessage {
                    processing_path,
                    payload,
                }));
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&incoming_path, err)),
        }
    }

    Ok(None)
}

/// Writes the reply into `outgoing` and moves the inbound file into the
/// processed ledger.
pub fn complete_success(
    paths: &QueuePaths,
    claimed: &ClaimedMessage,
    outbound: &OutboundMessage,
) -> Result<PathBuf, QueueError> {
    let out_path = paths.outgoing.join(outgoing_filename(
        outbound.recipient_id.as_str(),
        outbound.message_id.as_str(),
        outbound.timestamp,
    ));
    let body = serde_json::to_string_pretty(outbound).map_err(|e| parse_err(&out_path, e))?;
    fs::write(&out_path, body).map_err(|e| io_err(&out_path, e))?;

    mark_processed(paths, claimed)?;
    Ok(out_path)
}

/// Moves the inbound file into the processed ledger without producing a
/// reply file.
pub fn mark_processed(paths: &QueuePaths, claimed: &ClaimedMessage) -> Result<(), QueueError> {
    let file_name = claimed.processing_path.file_name().ok_or_else(|| {
        io_err(
            &claimed.processing_path,
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "processing file missing name",
            ),
        )
    })?;
    let done_path = paths.processed.join(file_name);
    fs::rename(&claimed.processing_path, &done_path)
        .map_err(|e| io_err(&claimed.processing_path, e))
}

pub fn requeue_failure(
    paths: &QueuePaths,
    claimed: &ClaimedMessage,
) -> Result<PathBuf, QueueError> {
    requeue_processing_file(paths, &claimed.processing_path)
}

/// Moves files stranded in `processing` (a crash mid-dispatch) back to
/// `incoming`. Replay is safe: confirmation codes are single-use, so a
/// destructive command cannot execute twice.
pub fn recover_processing_entries(paths: &QueuePaths) -> Result<Vec<PathBuf>, QueueError> {
    let mut recovered = Vec::new();
    if !paths.processing.exists() {
        return Ok(recovered);
    }
    for entry in fs::read_dir(&paths.processing).map_err(|e| io_err(&paths.processing, e))? {
        let entry = entry.map_err(|e| io_err(&paths.processing, e))?;
        let path = entry.path();
        if path.is_file() {
            recovered.push(requeue_processing_file(paths, &path)?);
        }
    }
    Ok(recovered)
}

fn requeue_processing_file(
    paths: &QueuePaths,
    processing_path: &Path,
) -> Result<PathBuf, QueueError> {
    let file_name = processing_path.file_name().ok_or_else(|| {
        io_err(
            processing_path,
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "processing file missing name",
            ),
        )
    })?;
    let incoming = paths.incoming.join(file_name);
    fs::rename(processing_path, &incoming).map_err(|e| io_err(processing_path, e))?;
    Ok(incoming)
}

pub fn outgoing_filename(recipient_id: &str, message_id: &str, timestamp: i64) -> String {
    format!(
        "{}_{}_{}.json",
        sanitize_filename_component(recipient_id),
        sanitize_filename_component(message_id),
        timestamp
    )
}

pub fn is_valid_queue_json_filename(filename: &str) -> bool {
    let path = Path::new(filename);
    if path.extension().and_then(|v| v.to_str()) != Some("json") {
        return false;
    }
    if let Some(stem) = path.file_stem().and_then(|v| v.to_str()) {
        return !stem.trim().is_empty();
    }
    false
}

fn sanitize_filename_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn sorted_incoming_paths(incoming_dir: &Path) -> Result<Vec<PathBuf>, QueueError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(incoming_dir).map_err(|e| io_err(incoming_dir, e))? {
        let entry = entry.map_err(|e| io_err(incoming_dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if !is_valid_queue_json_filename(name) {
                continue;
            }
        }
        let metadata = entry.metadata().map_err(|e| io_err(&path, e))?;
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        entries.push((modified, path));
    }

    entries.sort_by(|(a_time, a_path), (b_time, b_path)| {
        a_time
            .cmp(b_time)
            .then_with(|| a_path.file_name().cmp(&b_path.file_name()))
    });

    Ok(entries.into_iter().map(|(_, path)| path).collect())
}

/// One message per user runs at a time; distinct users run in parallel.
pub fn derive_ordering_key(payload: &InboundMessage) -> String {
    payload.sender_id.as_str().to_string()
}

#[derive(Debug)]
pub struct Scheduled<T> {
    pub key: String,
    pub value: T,
}

#[derive(Debug)]
pub struct PerKeyScheduler<T> {
    pending: VecDeque<Scheduled<T>>,
    active_keys: HashSet<String>,
}

impl<T> Default for PerKeyScheduler<T> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            active_keys: HashSet::new(),
        }
    }
}

impl<T> PerKeyScheduler<T> {
    pub fn enqueue(&mut self, key: String, value: T) {
        self.pending.push_back(Scheduled { key, value });
    }

    pub fn dequeue_runnable(&mut self, max_items: usize) -> Vec<Scheduled<T>> {
        if max_items == 0 || self.pending.is_empty() {
            return Vec::new();
        }

        let mut selected = Vec::new();
        let mut selected_keys = HashSet::new();
        let mut remaining = VecDeque::new();

        while let Some(item) = self.pending.pop_front() {
            let key_busy =
                self.active_keys.contains(&item.key) || selected_keys.contains(&item.key);
            if !key_busy && selected.len() < max_items {
                selected_keys.insert(item.key.clone());
                self.active_keys.insert(item.key.clone());
                selected.push(item);
            } else {
                remaining.push_back(item);
            }
        }

        self.pending = remaining;
        selected
    }

    pub fn complete(&mut self, key: &str) {
        self.active_keys.remove(key);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn active_len(&self) -> usize {
        self.active_keys.len()
    }

    pub fn drain_pending(&mut self) -> Vec<Scheduled<T>> {
        self.pending.drain(..).collect()
    }
}

fn io_err(path: &Path, source: std::io::Error) -> QueueError {
    QueueError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn parse_err(path: &Path, source: serde_json::Error) -> QueueError {
    QueueError::Parse {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_inbound(message_id: &str) -> InboundMessage {
        InboundMessage {
            sender: "Alice".to_string(),
            sender_id: UserId::parse("+14155550100").expect("sender id"),
            message: "LIST /ProjectX".to_string(),
            timestamp: 1,
            message_id: MessageId::parse(message_id).expect("message id"),
        }
    }

    fn sample_outbound(message_id: &str) -> OutboundMessage {
        OutboundMessage {
            recipient_id: UserId::parse("+14155550100").expect("recipient id"),
            message: "Contents of /ProjectX:".to_string(),
            original_message: "LIST /ProjectX".to_string(),
            timestamp: 2,
            message_id: MessageId::parse(message_id).expect("message id"),
        }
    }

    #[test]
    fn enqueue_claims_and_completes_through_the_ledger() {
        let temp = tempdir().expect("tempdir");
        let paths = QueuePaths::from_state_root(temp.path());
        paths.bootstrap().expect("bootstrap");

        assert!(enqueue_inbound(&paths, &sample_inbound("m1")).expect("enqueue"));
        let claimed = claim_oldest(&paths).expect("claim").expect("message");
        assert_eq!(claimed.payload.message_id.as_str(), "m1");

        let out = complete_success(&paths, &claimed, &sample_outbound("m1")).expect("complete");
        assert!(out.exists());
        assert!(paths.processed.join("m1.json").exists());
        assert!(claim_oldest(&paths).expect("claim").is_none());
    }

    #[test]
    fn duplicate_delivery_is_dropped_at_every_stage() {
        let temp = tempdir().expect("tempdir");
        let paths = QueuePaths::from_state_root(temp.path());
        paths.bootstrap().expect("bootstrap");

        assert!(enqueue_inbound(&paths, &sample_inbound("m1")).expect("first"));
        assert!(!enqueue_inbound(&paths, &sample_inbound("m1")).expect("incoming dup"));

        let claimed = claim_oldest(&paths).expect("claim").expect("message");
        assert!(!enqueue_inbound(&paths, &sample_inbound("m1")).expect("processing dup"));

        complete_success(&paths, &claimed, &sample_outbound("m1")).expect("complete");
        assert!(!enqueue_inbound(&paths, &sample_inbound("m1")).expect("processed dup"));
    }

    #[test]
    fn claim_takes_the_oldest_file_first() {
        let temp = tempdir().expect("tempdir");
        let paths = QueuePaths::from_state_root(temp.path());
        paths.bootstrap().expect("bootstrap");

        enqueue_inbound(&paths, &sample_inbound("a")).expect("a");
        std::thread::sleep(std::time::Duration::from_millis(5));
        enqueue_inbound(&paths, &sample_inbound("b")).expect("b");

        let claimed = claim_oldest(&paths).expect("claim").expect("message");
        assert_eq!(claimed.payload.message_id.as_str(), "a");
    }

    #[test]
    fn requeue_and_recovery_return_work_to_incoming() {
        let temp = tempdir().expect("tempdir");
        let paths = QueuePaths::from_state_root(temp.path());
        paths.bootstrap().expect("bootstrap");

        enqueue_inbound(&paths, &sample_inbound("m1")).expect("enqueue");
        let claimed = claim_oldest(&paths).expect("claim").expect("message");
        let requeued = requeue_failure(&paths, &claimed).expect("requeue");
        assert!(requeued.exists());

        let claimed = claim_oldest(&paths).expect("claim").expect("message");
        fs::write(&claimed.processing_path, "{}").expect("strand file");
        drop(claimed);
        let recovered = recover_processing_entries(&paths).expect("recover");
        assert_eq!(recovered.len(), 1);
        assert!(recovered[0].starts_with(&paths.incoming));
    }

    #[test]
    fn scheduler_serializes_same_user_and_parallelizes_distinct_users() {
        let mut scheduler = PerKeyScheduler::default();
        scheduler.enqueue("u1".to_string(), "a1");
        scheduler.enqueue("u1".to_string(), "a2");
        scheduler.enqueue("u2".to_string(), "b1");

        let batch = scheduler.dequeue_runnable(3);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].value, "a1");
        assert_eq!(batch[1].value, "b1");

        assert!(scheduler.dequeue_runnable(3).is_empty());
        scheduler.complete("u1");
        let next = scheduler.dequeue_runnable(3);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].value, "a2");
    }

    #[test]
    fn outgoing_filename_sanitizes_components() {
        assert_eq!(
            outgoing_filename("+1415", "chat:1", 7),
            "_1415_chat_1_7.json"
        );
        assert!(is_valid_queue_json_filename("m1.json"));
        assert!(!is_valid_queue_json_filename("m1.txt"));
        assert!(!is_valid_queue_json_filename(".json"));
    }
}
