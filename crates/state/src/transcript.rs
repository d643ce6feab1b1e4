//! Session transcript persistence — append-only JSONL, one file per session.
//!
//! This is the crash-safe record of the raw exchange, separate from the
//! CSV/JSON export surface: it is written as the turn happens, not at
//! session end.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single transcript line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    /// `"user"` or `"assistant"`.
    pub role: String,
    pub content: String,
    pub turn_id: u32,
    pub timestamp: DateTime<Utc>,
}

/// Appends turn records to `sessions/{id}/transcript.jsonl`.
#[derive(Debug, Clone)]
pub struct TranscriptWriter {
    path: PathBuf,
}

impl TranscriptWriter {
    pub fn new(export_dir: impl AsRef<Path>, session_id: Uuid) -> Self {
        let path = export_dir
            .as_ref()
            .join(session_id.to_string())
            .join("transcript.jsonl");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically append one record, creating the file and parents on first use.
    pub fn append(&self, role: &str, content: &str, turn_id: u32) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let record = TurnRecord {
            role: role.to_string(),
            content: content.to_string(),
            turn_id,
            timestamp: Utc::now(),
        };
        let line = serde_json::to_string(&record).context("serialize TurnRecord")?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open transcript {}", self.path.display()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Load all records; missing file reads as an empty transcript.
    pub fn load(&self) -> Result<Vec<TurnRecord>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let file = fs::File::open(&self.path)
            .with_context(|| format!("open transcript {}", self.path.display()))?;
        let reader = BufReader::new(file);
        Ok(reader
            .lines()
            .filter_map(|line| {
                let line = line.ok()?;
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    return None;
                }
                serde_json::from_str(trimmed).ok()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TranscriptWriter::new(dir.path(), Uuid::new_v4());

        writer.append("user", "I'm designing a museum", 0).unwrap();
        writer.append("assistant", "What should visitors feel first?", 0).unwrap();

        let records = writer.load().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].role, "user");
        assert_eq!(records[1].turn_id, 0);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TranscriptWriter::new(dir.path(), Uuid::new_v4());
        assert!(writer.load().unwrap().is_empty());
    }
}
