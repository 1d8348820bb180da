//! Append-only session history log.
//!
//! A missing file reads as empty history and is created lazily by the first
//! append. Any other I/O failure propagates: history is the audit trail,
//! losing writes silently is not an option.

use crate::error::GameError;
use shared::HistoryRecord;
use std::fs;
use std::path::{Path, PathBuf};

pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<Vec<HistoryRecord>, GameError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(GameError::Storage(err)),
        }
    }

    /// Appends one record and returns the full log, written back whole.
    pub fn append(&self, record: HistoryRecord) -> Result<Vec<HistoryRecord>, GameError> {
        let mut records = self.load()?;
        records.push(record);
        fs::write(&self.path, serde_json::to_vec_pretty(&records)?)?;
        Ok(records)
    }

    pub fn reset(&self) -> Result<(), GameError> {
        fs::write(&self.path, b"[]")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::GameMode;

    fn record(players: &[&str]) -> HistoryRecord {
        HistoryRecord {
            start_time_ms: 1000,
            duration_secs: 42,
            mode: GameMode::ClassicSolo,
            players: players.iter().map(|s| s.to_string()).collect(),
            quitter: None,
            winner: None,
        }
    }

    #[test]
    fn test_missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::open(dir.path().join("history.json"));
        assert!(log.load().unwrap().is_empty());
    }

    #[test]
    fn test_append_creates_file_and_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::open(dir.path().join("history.json"));

        let after_first = log.append(record(&["ana"])).unwrap();
        assert_eq!(after_first.len(), 1);

        let after_second = log.append(record(&["bo", "cy"])).unwrap();
        assert_eq!(after_second.len(), 2);
        assert_eq!(after_second[1].players, vec!["bo", "cy"]);

        assert_eq!(log.load().unwrap().len(), 2);
    }

    #[test]
    fn test_reset_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::open(dir.path().join("history.json"));

        log.append(record(&["ana"])).unwrap();
        log.reset().unwrap();
        assert!(log.load().unwrap().is_empty());
    }
}
