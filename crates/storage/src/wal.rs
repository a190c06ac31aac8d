// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Write-ahead log for the legacy lock store

use crate::state::StoreOp;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur in WAL operations
#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt entry at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}

/// Append-only log of store operations, one JSON object per line
pub struct Wal {
    path: PathBuf,
    file: File,
    sequence: u64,
}

impl Wal {
    /// Open or create a WAL at the given path
    pub fn open(path: &Path) -> Result<Self, WalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let sequence = Self::replay(path)?.last().map(|(seq, _)| *seq).unwrap_or(0);
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            sequence,
        })
    }

    /// Append an operation; it is synced to disk before returning
    pub fn append(&mut self, op: &StoreOp) -> Result<u64, WalError> {
        let entry = WalEntry {
            seq: self.sequence + 1,
            op: op.clone(),
        };
        let line = serde_json::to_string(&entry)?;
        writeln!(self.file, "{}", line)?;
        self.file.sync_all()?;
        self.sequence = entry.seq;
        Ok(self.sequence)
    }

    /// Sequence number of the last appended entry
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replay all operations from the log
    ///
    /// A final line that does not parse is a write cut short by a crash and is
    /// skipped. A bad line followed by good ones is corruption.
    pub fn replay(path: &Path) -> Result<Vec<(u64, StoreOp)>, WalError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ops = Vec::new();
        let mut torn: Option<(usize, String)> = None;

        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Some((line, reason)) = torn.take() {
                return Err(WalError::Corrupt { line, reason });
            }
            match serde_json::from_str::<WalEntry>(&line) {
                Ok(entry) => ops.push((entry.seq, entry.op)),
                Err(e) => torn = Some((index + 1, e.to_string())),
            }
        }

        if let Some((line, reason)) = torn {
            tracing::warn!(path = %path.display(), line, reason, "skipping torn wal tail");
        }
        Ok(ops)
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct WalEntry {
    seq: u64,
    op: StoreOp,
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
