use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn atomic_write_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("path has no parent"))?;
    let tmp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name().and_then(|v| v.to_str()).unwrap_or("state"),
        std::process::id(),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    );
    let tmp_path = parent.join(tmp_name);

    {
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;
    sync_parent_dir(parent)?;
    Ok(())
}

/// Appends one line and syncs before returning; the caller may treat the
/// line as durable once this returns Ok.
pub fn durable_append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(format!("{line}\n").as_bytes())?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_parent_dir(parent: &Path) -> std::io::Result<()> {
    fs::File::open(parent)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_parent: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_replaces_previous_content() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("state.json");
        atomic_write_file(&target, b"first").expect("write first");
        atomic_write_file(&target, b"second").expect("write second");
        assert_eq!(fs::read_to_string(&target).expect("read"), "second");
    }

    #[test]
    fn durable_append_creates_parents_and_appends() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("logs/audit.log");
        durable_append_line(&target, "one").expect("append one");
        durable_append_line(&target, "two").expect("append two");
        assert_eq!(fs::read_to_string(&target).expect("read"), "one\ntwo\n");
    }
}
