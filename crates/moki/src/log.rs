//! Logging for moki.
use anyhow::Context;
use moki_core::AppDir;
use std::io::LineWriter;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::fmt::time::OffsetTime;

const MAX_LOG_SIZE: u64 = 100 * 1024;

/// Initializes file logging at `<data_dir>/moki.log`.
///
/// A log larger than 100KB is moved to `moki.log.old` first. Only the moki
/// crates log at debug level.
pub fn setup_logging() -> anyhow::Result<()> {
    let data_dir = AppDir::Data.ensure().context("Failed to get data directory")?;
    let log_path = data_dir.join("moki.log");
    rotate_log(&log_path, &data_dir.join("moki.log.old"))?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open {}", log_path.display()))?;

    // Ensure the logs are flushed after every line
    let writer = Mutex::new(LineWriter::new(log_file));

    tracing_subscriber::fmt()
        .with_env_filter("moki=debug,moki_core=debug,rustyline=info")
        .with_writer(writer)
        .with_ansi(false)
        .with_timer(OffsetTime::local_rfc_3339()?)
        .init();
    Ok(())
}

fn rotate_log(log_path: &Path, backup_path: &Path) -> std::io::Result<()> {
    if !log_path.exists() || std::fs::metadata(log_path)?.len() <= MAX_LOG_SIZE {
        return Ok(());
    }
    if backup_path.exists() {
        std::fs::remove_file(backup_path)?;
    }
    std::fs::rename(log_path, backup_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_rotate_log_moves_large_file() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("moki.log");
        let old = dir.path().join("moki.log.old");
        std::fs::write(&old, "stale").unwrap();
        std::fs::write(&log, vec![b'x'; (MAX_LOG_SIZE + 1) as usize]).unwrap();

        rotate_log(&log, &old).unwrap();

        assert!(!log.exists());
        assert_eq!(std::fs::metadata(&old).unwrap().len(), MAX_LOG_SIZE + 1);
    }

    #[test]
    fn test_rotate_log_keeps_small_file() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("moki.log");
        let old = dir.path().join("moki.log.old");
        std::fs::write(&log, "small").unwrap();

        rotate_log(&log, &old).unwrap();

        assert!(log.exists());
        assert!(!old.exists());
    }
}
