//! Chat log kept for `/save`.

use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

/// Every line displayed during this session.
#[derive(Debug, Default)]
pub struct Transcript {
    lines: Vec<String>,
}

impl Transcript {
    /// Record a displayed line.
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Write `chat_log_YYYYMMDD_HHMMSS.txt` into `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_in(&self, dir: &Path, now: DateTime<Local>) -> anyhow::Result<PathBuf> {
        let path = dir.join(format!("chat_log_{}.txt", now.format("%Y%m%d_%H%M%S")));
        let mut contents = format!("Parley Chat Log - {}\n", now.format("%Y-%m-%d %H:%M:%S"));
        for line in &self.lines {
            contents.push_str(line);
            contents.push('\n');
        }
        fs::write(&path, contents)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_save_writes_header_and_lines() {
        let dir = tempfile::tempdir().unwrap();
        let now = Local.with_ymd_and_hms(2026, 1, 10, 9, 5, 3).unwrap();

        let mut transcript = Transcript::default();
        transcript.push("[2026-01-10 09:00:00] Bob: hi");
        transcript.push("[2026-01-10 09:00:01] Me: hello");

        let path = transcript.save_in(dir.path(), now).unwrap();
        assert_eq!(path.file_name().unwrap(), "chat_log_20260110_090503.txt");

        let saved = std::fs::read_to_string(path).unwrap();
        let lines: Vec<_> = saved.lines().collect();
        assert_eq!(lines[0], "Parley Chat Log - 2026-01-10 09:05:03");
        assert_eq!(lines[1], "[2026-01-10 09:00:00] Bob: hi");
        assert_eq!(lines.len(), 3);
    }
}
