//! Append-only JSONL journal of received transfers

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::checksum::Integrity;
use crate::logger::TransferObserver;
use crate::metadata::Metadata;
use crate::session::TransferOutcome;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Saved,
    Skipped,
    Failed,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct JournalEntry {
    pub timestamp: String,
    pub seq: u64,
    pub status: TransferStatus,
    pub path: Option<PathBuf>,
    pub bytes: u64,
    /// "verified", "mismatch" or "unchecked"
    pub integrity: Option<String>,
    pub error: Option<String>,
    pub metadata: Metadata,
}

impl JournalEntry {
    pub fn new(seq: u64, metadata: &Metadata, outcome: &TransferOutcome) -> Self {
        let (status, path, bytes, integrity, error) = match outcome {
            TransferOutcome::Saved {
                path,
                bytes,
                integrity,
                ..
            } => {
                let label = match integrity {
                    Integrity::Verified => "verified",
                    Integrity::Mismatch { .. } => "mismatch",
                    Integrity::Unchecked => "unchecked",
                };
                (
                    TransferStatus::Saved,
                    Some(path.clone()),
                    *bytes,
                    Some(label.to_string()),
                    None,
                )
            }
            TransferOutcome::Skipped { path } => {
                (TransferStatus::Skipped, Some(path.clone()), 0, None, None)
            }
            TransferOutcome::Failed(e) => {
                (TransferStatus::Failed, None, 0, None, Some(e.to_string()))
            }
        };
        Self {
            timestamp: Utc::now().to_rfc3339(),
            seq,
            status,
            path,
            bytes,
            integrity,
            error,
            metadata: metadata.clone(),
        }
    }
}

pub struct TransferJournal {
    log_file_path: PathBuf,
}

impl TransferJournal {
    pub fn new(path: &Path) -> Self {
        TransferJournal {
            log_file_path: path.to_path_buf(),
        }
    }

    pub fn add_entry(&self, entry: &JournalEntry) -> Result<()> {
        if let Some(parent) = self.log_file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .context("Failed to open transfer journal")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_log(&self) -> Result<Vec<JournalEntry>> {
        if !self.log_file_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.log_file_path)
            .context("Failed to open transfer journal for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = serde_json::from_str(&line)?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

impl TransferObserver for TransferJournal {
    fn transfer(&self, seq: u64, metadata: &Metadata, outcome: &TransferOutcome) {
        if let Err(e) = self.add_entry(&JournalEntry::new(seq, metadata, outcome)) {
            tracing::warn!(
                path = %self.log_file_path.display(),
                error = %e,
                "journal write failed"
            );
        }
    }
}
