use crate::dispatcher::Dispatcher;
use crate::queue::{self, OutboundMessage, PerKeyScheduler, QueuePaths};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DISPATCH_MAX_CONCURRENCY: usize = 4;
pub const DISPATCH_MIN_POLL_MS: u64 = 100;
pub const DISPATCH_MAX_POLL_MS: u64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to create runtime path {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub root: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn required_directories(&self) -> Vec<PathBuf> {
        vec![
            self.root.join("audit"),
            self.root.join("channels"),
            self.root.join("daemon"),
            self.root.join("logs"),
            self.root.join("queue/incoming"),
            self.root.join("queue/processing"),
            self.root.join("queue/outgoing"),
            self.root.join("queue/processed"),
        ]
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join(crate::config::SETTINGS_FILE_NAME)
    }

    pub fn stop_signal_path(&self) -> PathBuf {
        self.root.join("daemon/stop")
    }
}

pub fn bootstrap_state_root(paths: &StatePaths) -> Result<(), RuntimeError> {
    for path in paths.required_directories() {
        fs::create_dir_all(&path).map_err(|source| RuntimeError::CreateDir {
            path: path.display().to_string(),
            source,
        })?;
    }
    Ok(())
}

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Started {
        worker_id: String,
        at: i64,
    },
    Heartbeat {
        worker_id: String,
        at: i64,
    },
    Error {
        worker_id: String,
        at: i64,
        message: String,
        fatal: bool,
    },
    Stopped {
        worker_id: String,
        at: i64,
    },
}

#[derive(Debug)]
struct TaskFailure {
    message: String,
    fatal: bool,
}

#[derive(Debug)]
struct TaskCompletion {
    key: String,
    failure: Option<TaskFailure>,
}

fn process_claimed(
    paths: &QueuePaths,
    dispatcher: &Dispatcher,
    claimed: queue::ClaimedMessage,
) -> Result<(), TaskFailure> {
    let payload = &claimed.payload;
    match dispatcher.handle_message(payload.sender_id.as_str(), &payload.message, now_secs()) {
        Ok(reply) => {
            let outbound = OutboundMessage {
                recipient_id: payload.sender_id.clone(),
                message: reply,
                original_message: payload.message.clone(),
                timestamp: now_secs(),
                message_id: payload.message_id.clone(),
            };
            queue::complete_success(paths, &claimed, &outbound).map_err(|err| TaskFailure {
                message: err.to_string(),
                fatal: false,
            })?;
            Ok(())
        }
        Err(err) => {
            // The audit trail could not be written. The command may already
            // have executed, so the message must never be replayed; park it
            // in the processed ledger and stop the worker.
            let _ = queue::mark_processed(paths, &claimed);
            Err(TaskFailure {
                message: err.to_string(),
                fatal: true,
            })
        }
    }
}

/// Processes everything currently queued and returns the number of
/// messages dispatched. Used by the CLI and by tests; the long-running
/// loop below shares the same claim/schedule/complete plumbing.
pub fn drain_queue_once(
    state_root: &Path,
    dispatcher: &Arc<Dispatcher>,
    max_concurrency: usize,
) -> Result<usize, String> {
    let queue_paths = QueuePaths::from_state_root(state_root);
    let mut scheduler = PerKeyScheduler::default();
    let (result_tx, result_rx) = mpsc::channel::<TaskCompletion>();
    let mut in_flight = 0usize;
    let mut processed = 0usize;

    while let Some(claimed) = queue::claim_oldest(&queue_paths).map_err(|e| e.to_string())? {
        let key = queue::derive_ordering_key(&claimed.payload);
        scheduler.enqueue(key, claimed);
    }

    loop {
        let available = max_concurrency.saturating_sub(in_flight);
        if available > 0 {
            for scheduled in scheduler.dequeue_runnable(available) {
                let tx = result_tx.clone();
                let paths = queue_paths.clone();
                let worker_dispatcher = Arc::clone(dispatcher);
                let _ = thread::spawn(move || {
                    let failure =
                        process_claimed(&paths, &worker_dispatcher, scheduled.value).err();
                    let _ = tx.send(TaskCompletion {
                        key: scheduled.key,
                        failure,
                    });
                });
                in_flight += 1;
            }
        }

        if in_flight == 0 {
            break;
        }

        let completion = match result_rx.recv_timeout(Duration::from_millis(DISPATCH_MIN_POLL_MS)) {
            Ok(done) => done,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err("dispatch completion channel disconnected".to_string())
            }
        };
        in_flight = in_flight.saturating_sub(1);
        scheduler.complete(&completion.key);
        match completion.failure {
            None => processed += 1,
            Some(failure) => return Err(failure.message),
        }
    }

    Ok(processed)
}

pub fn run_dispatch_loop(
    worker_id: String,
    state_root: PathBuf,
    dispatcher: Arc<Dispatcher>,
    stop: Arc<AtomicBool>,
    events: Sender<WorkerEvent>,
    max_concurrency: usize,
) {
    let queue_paths = QueuePaths::from_state_root(&state_root);
    match queue::recover_processing_entries(&queue_paths) {
        Ok(recovered) => {
            if !recovered.is_empty() {
                let _ = events.send(WorkerEvent::Heartbeat {
                    worker_id: worker_id.clone(),
                    at: now_secs(),
                });
            }
        }
        Err(error) => {
            let _ = events.send(WorkerEvent::Error {
                worker_id: worker_id.clone(),
                at: now_secs(),
                message: error.to_string(),
                fatal: false,
            });
        }
    }

    let _ = events.send(WorkerEvent::Started {
        worker_id: worker_id.clone(),
        at: now_secs(),
    });

    let (result_tx, result_rx) = mpsc::channel::<TaskCompletion>();
    let mut scheduler = PerKeyScheduler::default();
    let mut in_flight = 0usize;
    let mut backoff_ms = DISPATCH_MIN_POLL_MS;
    loop {
        let stopping = stop.load(Ordering::Relaxed);

        if !stopping {
            let mut claim_budget = max_concurrency.saturating_mul(4);
            while claim_budget > 0 {
                match queue::claim_oldest(&queue_paths) {
                    Ok(Some(claimed)) => {
                        let key = queue::derive_ordering_key(&claimed.payload);
                        scheduler.enqueue(key, claimed);
                    }
                    Ok(None) => break,
                    Err(err) => {
                        let _ = events.send(WorkerEvent::Error {
                            worker_id: worker_id.clone(),
                            at: now_secs(),
                            message: err.to_string(),
                            fatal: false,
                        });
                        break;
                    }
                }
                claim_budget -= 1;
            }
        }

        let available_slots = max_concurrency.saturating_sub(in_flight);
        if !stopping && available_slots > 0 {
            for scheduled in scheduler.dequeue_runnable(available_slots) {
                let tx = result_tx.clone();
                let paths = queue_paths.clone();
                let worker_dispatcher = Arc::clone(&dispatcher);
                let _ = thread::spawn(move || {
                    let failure =
                        process_claimed(&paths, &worker_dispatcher, scheduled.value).err();
                    let _ = tx.send(TaskCompletion {
                        key: scheduled.key,
                        failure,
                    });
                });
                in_flight += 1;
            }
        }

        while let Ok(done) = result_rx.try_recv() {
            handle_completion(&worker_id, &events, &stop, &mut scheduler, &mut in_flight, done);
        }

        if stopping {
            if in_flight == 0 {
                for pending in scheduler.drain_pending() {
                    let _ = queue::requeue_failure(&queue_paths, &pending.value);
                }
                break;
            }
            match result_rx.recv_timeout(Duration::from_millis(DISPATCH_MIN_POLL_MS)) {
                Ok(done) => handle_completion(
                    &worker_id,
                    &events,
                    &stop,
                    &mut scheduler,
                    &mut in_flight,
                    done,
                ),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    in_flight = 0;
                }
            }
            continue;
        }

        if scheduler.pending_len() == 0 && in_flight == 0 {
            let _ = events.send(WorkerEvent::Heartbeat {
                worker_id: worker_id.clone(),
                at: now_secs(),
            });
            if !sleep_with_stop(&stop, Duration::from_millis(backoff_ms)) {
                continue;
            }
            backoff_ms = (backoff_ms.saturating_mul(2)).min(DISPATCH_MAX_POLL_MS);
        } else {
            backoff_ms = DISPATCH_MIN_POLL_MS;
            thread::sleep(Duration::from_millis(DISPATCH_MIN_POLL_MS));
        }
    }

    let _ = events.send(WorkerEvent::Stopped {
        worker_id,
        at: now_secs(),
    });
}

fn handle_completion(
    worker_id: &str,
    events: &Sender<WorkerEvent>,
    stop: &Arc<AtomicBool>,
    scheduler: &mut PerKeyScheduler<queue::ClaimedMessage>,
    in_flight: &mut usize,
    done: TaskCompletion,
) {
    *in_flight = in_flight.saturating_sub(1);
    scheduler.complete(&done.key);
    match done.failure {
        Some(failure) => {
            if failure.fatal {
                stop.store(true, Ordering::Relaxed);
            }
            let _ = events.send(WorkerEvent::Error {
                worker_id: worker_id.to_string(),
                at: now_secs(),
                message: failure.message,
                fatal: failure.fatal,
            });
        }
        None => {
            let _ = events.send(WorkerEvent::Heartbeat {
                worker_id: worker_id.to_string(),
                at: now_secs(),
            });
        }
    }
}

fn sleep_with_stop(stop: &AtomicBool, total: Duration) -> bool {
    let mut remaining = total;
    while remaining > Duration::from_millis(0) {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(Duration::from_millis(200));
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    !stop.load(Ordering::Relaxed)
}
