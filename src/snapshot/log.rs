//! Append-only, hash-chained snapshot log.
//!
//! One JSON object per line (`snapshots.jsonl` in the storage area):
//!
//! | Field | Description |
//! |-------|-------------|
//! | `prev_entry_sha256` | SHA-256 of the raw bytes of the previous line |
//! | `chain_recovery` | Present when the previous line was unreadable |
//! | `snapshot` | The [`StructureSnapshot`] itself |
//!
//! The first line links to 64 zeros. A link that does not match the line
//! before it means the log was edited after the fact.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use super::StructureSnapshot;
use crate::error::Result;

pub const SNAPSHOT_LOG_FILENAME: &str = "snapshots.jsonl";

/// Link value for the first line of the log.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Bytes read per backwards step when looking for the end of the log.
const TAIL_CHUNK: u64 = 8 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotLogRecord {
    pub prev_entry_sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_recovery: Option<String>,
    pub snapshot: StructureSnapshot,
}

/// Handle on a snapshot log file.
///
/// Appends are not locked here; callers that share the file across
/// processes hold a [`crate::concurrency::StorageLock`] around `append`.
#[derive(Debug, Clone)]
pub struct SnapshotLog {
    path: PathBuf,
}

impl SnapshotLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Log inside a storage directory.
    pub fn in_dir(storage_dir: &Path) -> Self {
        Self::new(storage_dir.join(SNAPSHOT_LOG_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `snapshot`, chaining it to the current last line.
    pub fn append(&self, snapshot: &StructureSnapshot) -> Result<()> {
        let mut chain_recovery = None;
        let prev_hash = match self.last_line()? {
            Some(last) => {
                if serde_json::from_str::<SnapshotLogRecord>(&last).is_err() {
                    warn!(
                        "Snapshot log {} ends with an unreadable line; starting a new chain segment",
                        self.path.display()
                    );
                    chain_recovery = Some(format!(
                        "Previous entry corrupted ({} bytes), new chain segment",
                        last.len()
                    ));
                }
                line_hash(&last)
            }
            None => GENESIS_HASH.to_string(),
        };

        let record = SnapshotLogRecord {
            prev_entry_sha256: prev_hash,
            chain_recovery,
            snapshot: snapshot.clone(),
        };
        let json = serde_json::to_string(&record)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }

    fn last_line(&self) -> Result<Option<String>> {
        Ok(self.tail_lines(1)?.pop())
    }

    /// The last `n` non-empty lines, oldest first.
    ///
    /// Reads backwards from the end of the file, so the cost depends on the
    /// size of those lines rather than the length of the log.
    fn tail_lines(&self, n: usize) -> Result<Vec<String>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut pos = file.metadata()?.len();
        let mut buf: Vec<u8> = Vec::new();
        while pos > 0 {
            let step = TAIL_CHUNK.min(pos);
            pos -= step;
            file.seek(SeekFrom::Start(pos))?;
            let mut chunk = vec![0u8; step as usize];
            file.read_exact(&mut chunk)?;
            chunk.extend_from_slice(&buf);
            buf = chunk;
            if complete_lines(&buf).count() >= n {
                break;
            }
        }

        // Unless the read reached the start, the first segment is partial.
        let mut lines: Vec<String> = if pos == 0 {
            split_lines(&buf).collect()
        } else {
            complete_lines(&buf).collect()
        };
        if lines.len() > n {
            lines.drain(..lines.len() - n);
        }
        Ok(lines)
    }

    /// The most recent `n` snapshots, oldest first. Unreadable lines among
    /// the last `n` are skipped.
    pub fn recent_snapshots(&self, n: usize) -> Result<Vec<StructureSnapshot>> {
        Ok(self
            .tail_lines(n)?
            .iter()
            .filter_map(|l| serde_json::from_str::<SnapshotLogRecord>(l).ok())
            .map(|r| r.snapshot)
            .collect())
    }

    /// Every readable record, oldest first. Unreadable lines are skipped.
    pub fn read(&self) -> Result<Vec<SnapshotLogRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(content
            .lines()
            .filter(|l| !l.is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }

    /// Snapshots recorded in the log, oldest first.
    pub fn snapshots(&self) -> Result<Vec<StructureSnapshot>> {
        Ok(self.read()?.into_iter().map(|r| r.snapshot).collect())
    }

    /// Line indices whose chain link is broken or which cannot be parsed.
    /// Empty means the chain is intact.
    pub fn verify_chain(&self) -> Result<Vec<usize>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        let lines: Vec<&str> = content.lines().filter(|l| !l.is_empty()).collect();

        let mut broken = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            let Ok(record) = serde_json::from_str::<SnapshotLogRecord>(line) else {
                broken.push(i);
                continue;
            };
            let expected = match i {
                0 => GENESIS_HASH.to_string(),
                _ => line_hash(lines[i - 1]),
            };
            if record.prev_entry_sha256 != expected {
                broken.push(i);
            }
        }
        Ok(broken)
    }
}

fn split_lines(buf: &[u8]) -> impl Iterator<Item = String> + '_ {
    buf.split(|&b| b == b'\n')
        .filter(|l| !l.is_empty())
        .map(|l| String::from_utf8_lossy(l).into_owned())
}

/// Lines after the first newline in `buf`.
fn complete_lines(buf: &[u8]) -> impl Iterator<Item = String> + '_ {
    let start = buf
        .iter()
        .position(|&b| b == b'\n')
        .map_or(buf.len(), |i| i + 1);
    split_lines(&buf[start..])
}

fn line_hash(line: &str) -> String {
    hex::encode(Sha256::digest(line.as_bytes()))
}
