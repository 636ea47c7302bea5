use fileclerk::audit::{iso_timestamp, AuditLog, AuditRecord, Outcome};
use fileclerk::parser::CommandKind;
use std::fs;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn record_for(user: &str, ts: i64) -> AuditRecord {
    AuditRecord {
        timestamp: ts,
        recorded_at: iso_timestamp(ts),
        user_id: user.to_string(),
        command_kind: CommandKind::List,
        path: Some("/ProjectX".to_string()),
        destination_path: None,
        outcome: Outcome::Success,
        detail: "3 entries".to_string(),
    }
}

#[test]
fn concurrent_writers_never_interleave_records() {
    let temp = tempdir().expect("tempdir");
    let log = Arc::new(AuditLog::new(temp.path()));

    let mut handles = Vec::new();
    for writer in 0..8 {
        let log = Arc::clone(&log);
        handles.push(thread::spawn(move || {
            for i in 0..5 {
                let user = format!("+1555000{writer:02}");
                log.record(&record_for(&user, i)).expect("record");
            }
        }));
    }
    for handle in handles {
        handle.join().expect("writer join");
    }

    let jsonl = fs::read_to_string(log.records_path()).expect("jsonl");
    let lines: Vec<&str> = jsonl.lines().collect();
    assert_eq!(lines.len(), 40);
    for line in &lines {
        let parsed: AuditRecord = serde_json::from_str(line).expect("intact record");
        assert_eq!(parsed.command_kind, CommandKind::List);
    }

    let table = fs::read_to_string(log.table_path()).expect("table");
    assert_eq!(table.lines().count(), 40);
    for line in table.lines() {
        assert_eq!(line.split('\t').count(), 7, "malformed table line: {line}");
    }
}

#[test]
fn both_representations_stay_mutually_consistent() {
    let temp = tempdir().expect("tempdir");
    let log = AuditLog::new(temp.path());
    for ts in 0..4 {
        log.record(&record_for("+14155550100", ts)).expect("record");
    }

    let jsonl_count = fs::read_to_string(log.records_path())
        .expect("jsonl")
        .lines()
        .count();
    let table_count = fs::read_to_string(log.table_path())
        .expect("table")
        .lines()
        .count();
    assert_eq!(jsonl_count, table_count);
}

#[test]
fn per_user_history_preserves_append_order() {
    let temp = tempdir().expect("tempdir");
    let log = AuditLog::new(temp.path());
    for ts in 0..6 {
        log.record(&record_for("+14155550100", ts)).expect("record");
    }

    let stats = log.stats_for("+14155550100", 3).expect("stats");
    let recents: Vec<i64> = stats.recent_records.iter().map(|r| r.timestamp).collect();
    assert_eq!(recents, vec![3, 4, 5]);
}
