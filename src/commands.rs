use crate::audit::AuditLog;
use crate::channel;
use crate::config::{self, Settings};
use crate::confirm::ConfirmationStore;
use crate::dispatcher::Dispatcher;
use crate::ratelimit::RateLimiter;
use crate::runtime::{self, StatePaths, DISPATCH_MAX_CONCURRENCY};
use crate::shared::ids::UserId;
use crate::shared::logging::append_system_log_line;
use crate::store::HttpFileStore;
use crate::summarize::HttpSummarizer;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

pub const STATE_ROOT_ENV: &str = "FILECLERK_STATE_ROOT";

pub fn cli_help_lines() -> Vec<String> {
    [
        "Usage: fileclerk <command> [args]",
        "",
        "Commands:",
        "  run                           serve: sync the chat gateway and dispatch until stopped",
        "  stop                          signal a running `fileclerk run` to shut down",
        "  handle <sender-id> <text...>  dispatch one message and print the reply",
        "  drain                         process every queued inbound message once",
        "  sync                          poll the chat gateway and push queued replies",
        "  stats <user-id>               print a user's audit statistics as json",
        "  help                          show this message",
    ]
    .iter()
    .map(|line| line.to_string())
    .collect()
}

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    let mut args = args.into_iter();
    let verb = args.next().unwrap_or_else(|| "help".to_string());
    let rest: Vec<String> = args.collect();

    match verb.as_str() {
        "help" | "--help" | "-h" => Ok(cli_help_lines().join("\n")),
        "run" => cmd_run(),
        "stop" => cmd_stop(),
        "handle" => cmd_handle(&rest),
        "drain" => cmd_drain(),
        "sync" => cmd_sync(),
        "stats" => cmd_stats(&rest),
        other => Err(format!("unknown command `{other}`; run `fileclerk help`")),
    }
}

// Foreground serve loop: a dispatch worker thread owns the queue while
// this thread syncs the chat gateway. Confirmation tickets and rate
// windows live in memory, so the handshake only works while one process
// owns the queue; a stop file written by `fileclerk stop` ends the loop.
fn cmd_run() -> Result<String, String> {
    let state_root = resolve_state_root()?;
    let settings = load_settings(&state_root)?;
    let dispatcher = build_dispatcher(&state_root, &settings)?;
    let stop_path = StatePaths::new(&state_root).stop_signal_path();

    let stop = Arc::new(AtomicBool::new(false));
    let (events_tx, events_rx) = mpsc::channel();
    let worker = {
        let root = state_root.clone();
        let stop = Arc::clone(&stop);
        let dispatcher = Arc::clone(&dispatcher);
        std::thread::spawn(move || {
            runtime::run_dispatch_loop(
                "dispatch-1".to_string(),
                root,
                dispatcher,
                stop,
                events_tx,
                DISPATCH_MAX_CONCURRENCY,
            )
        })
    };

    let mut fatal: Option<String> = None;
    while !stop.load(Ordering::Relaxed) {
        if stop_path.exists() {
            let _ = std::fs::remove_file(&stop_path);
            stop.store(true, Ordering::Relaxed);
            break;
        }

        if settings.channel.enabled {
            if let Err(err) = channel::sync_once(&state_root, &settings) {
                let _ = append_system_log_line(&state_root, &format!("channel sync failed: {err}"));
            }
        }

        while let Ok(event) = events_rx.try_recv() {
            if let runtime::WorkerEvent::Error {
                message,
                fatal: is_fatal,
                ..
            } = &event
            {
                let _ = append_system_log_line(&state_root, &format!("worker error: {message}"));
                if *is_fatal {
                    fatal = Some(message.clone());
                }
            }
        }
        if fatal.is_some() {
            break;
        }

        std::thread::sleep(Duration::from_millis(runtime::DISPATCH_MAX_POLL_MS));
    }

    stop.store(true, Ordering::Relaxed);
    let _ = worker.join();

    // The worker may have stopped itself on a fatal error after the last
    // drain above; pick up anything still in the channel.
    while let Ok(event) = events_rx.try_recv() {
        if let runtime::WorkerEvent::Error {
            message,
            fatal: is_fatal,
            ..
        } = &event
        {
            let _ = append_system_log_line(&state_root, &format!("worker error: {message}"));
            if *is_fatal {
                fatal = Some(message.clone());
            }
        }
    }

    match fatal {
        Some(message) => Err(format!("dispatch worker failed: {message}")),
        None => Ok("stopped".to_string()),
    }
}

fn cmd_stop() -> Result<String, String> {
    let state_root = resolve_state_root()?;
    let stop_path = StatePaths::new(&state_root).stop_signal_path();
    std::fs::write(&stop_path, b"stop").map_err(|e| e.to_string())?;
    Ok("stop signal written".to_string())
}

fn cmd_handle(args: &[String]) -> Result<String, String> {
    let [sender, text @ ..] = args else {
        return Err("usage: fileclerk handle <sender-id> <text...>".to_string());
    };
    if text.is_empty() {
        return Err("usage: fileclerk handle <sender-id> <text...>".to_string());
    }
    let sender = UserId::parse(sender)?;

    let state_root = resolve_state_root()?;
    let settings = load_settings(&state_root)?;
    let dispatcher = build_dispatcher(&state_root, &settings)?;
    dispatcher
        .handle_message(sender.as_str(), &text.join(" "), runtime::now_secs())
        .map_err(|e| e.to_string())
}

fn cmd_drain() -> Result<String, String> {
    let state_root = resolve_state_root()?;
    let settings = load_settings(&state_root)?;
    let dispatcher = build_dispatcher(&state_root, &settings)?;
    let processed = runtime::drain_queue_once(&state_root, &dispatcher, DISPATCH_MAX_CONCURRENCY)?;
    Ok(format!("processed {processed} queued messages"))
}

fn cmd_sync() -> Result<String, String> {
    let state_root = resolve_state_root()?;
    let settings = load_settings(&state_root)?;
    let report = channel::sync_once(&state_root, &settings).map_err(|e| e.to_string())?;
    Ok(format!(
        "enqueued {} inbound, sent {} replies ({} failed)",
        report.inbound_enqueued, report.outbound_sent, report.outbound_failed
    ))
}

fn cmd_stats(args: &[String]) -> Result<String, String> {
    let [user] = args else {
        return Err("usage: fileclerk stats <user-id>".to_string());
    };
    let user = UserId::parse(user)?;

    let state_root = resolve_state_root()?;
    let audit = AuditLog::new(&state_root);
    let stats = audit
        .stats_for(user.as_str(), crate::audit::DEFAULT_RECENT_RECORDS)
        .map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(&stats).map_err(|e| e.to_string())
}

fn resolve_state_root() -> Result<PathBuf, String> {
    let root = match std::env::var_os(STATE_ROOT_ENV) {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => config::default_state_root_path().map_err(|e| e.to_string())?,
    };
    runtime::bootstrap_state_root(&StatePaths::new(&root)).map_err(|e| e.to_string())?;
    Ok(root)
}

fn load_settings(state_root: &Path) -> Result<Settings, String> {
    config::load_settings(&config::settings_path(state_root)).map_err(|e| e.to_string())
}

fn build_dispatcher(state_root: &Path, settings: &Settings) -> Result<Arc<Dispatcher>, String> {
    let store = HttpFileStore::from_env(&settings.store).map_err(|e| e.to_string())?;
    let summarizer = HttpSummarizer::from_env(&settings.summarizer).map_err(|e| e.to_string())?;
    Ok(Arc::new(Dispatcher::new(
        state_root,
        RateLimiter::new(),
        ConfirmationStore::new(),
        AuditLog::new(state_root),
        Box::new(store),
        Box::new(summarizer),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_verbs_point_at_help() {
        let err = run_cli(vec!["frobnicate".to_string()]).expect_err("must fail");
        assert!(err.contains("unknown command"));
    }

    #[test]
    fn handle_requires_sender_and_text() {
        assert!(run_cli(vec!["handle".to_string()]).is_err());
        assert!(run_cli(vec!["handle".to_string(), "+1415".to_string()]).is_err());
    }

    #[test]
    fn help_lists_every_verb() {
        let help = run_cli(vec!["help".to_string()]).expect("help");
        for verb in ["run", "stop", "handle", "drain", "sync", "stats"] {
            assert!(help.contains(verb), "help missing `{verb}`");
        }
    }
}
