//! # Position Ledger
//!
//! In-memory map from node number to that node's most recent [`PositionRecord`], with
//! load/persist against a single JSON file.
//!
//! ```text
//! {
//!   "123456789": {
//!     "name": "Unknown",
//!     "latitude": 37.7749,
//!     "longitude": -122.4194,
//!     "altitude": 15.0,
//!     "timestamp": "2026-10-16T09:30:00.000000-07:00",
//!     "last_updated": 1700000000
//!   }
//! }
//! ```
//!
//! Every persist rewrites the whole file through a temp file and rename, holding an
//! exclusive lock on a sidecar `.lock` file so two logger processes pointed at the same
//! output never interleave writes. This is fine for tens of nodes and not meant for more.

use crate::events::NodeId;
use chrono::{DateTime, Local, SecondsFormat};
use fs2::FileExt;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or persisting the ledger file.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to read position ledger {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file exists but is not a valid ledger. Loading refuses to continue so the
    /// next persist does not silently replace the operator's data with an empty map.
    #[error("position ledger {path} is malformed: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize position ledger: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to lock position ledger {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write position ledger {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Last known position of one node, in the on-disk shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
    /// Local capture time (ISO-8601), set by this process, not the sender.
    pub timestamp: String,
    /// Receive time supplied with the packet, passed through as-is.
    #[serde(default)]
    pub last_updated: u64,
}

impl PositionRecord {
    pub fn new(
        name: impl Into<String>,
        latitude: f64,
        longitude: f64,
        altitude: f64,
        captured_at: DateTime<Local>,
        last_updated: u64,
    ) -> Self {
        Self {
            name: name.into(),
            latitude,
            longitude,
            altitude,
            timestamp: captured_at.to_rfc3339_opts(SecondsFormat::Micros, false),
            last_updated,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PositionLedger {
    path: PathBuf,
    records: BTreeMap<NodeId, PositionRecord>,
}

impl PositionLedger {
    /// Empty ledger bound to `path`; nothing is read or written.
    pub fn empty<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            records: BTreeMap::new(),
        }
    }

    /// Load the ledger stored at `path`.
    ///
    /// A missing, zero-length or whitespace-only file yields an empty ledger. Anything
    /// else that fails to parse is [`LedgerError::Corrupt`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let content = match fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No position ledger at {}, starting empty", path.display());
                return Ok(Self::empty(path));
            }
            Err(source) => {
                return Err(LedgerError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        // Valid JSON never starts with NUL; strip what an interrupted write may leave behind.
        let start = content
            .iter()
            .position(|&b| b != 0)
            .unwrap_or(content.len());
        let cleaned = &content[start..];
        if cleaned.iter().all(u8::is_ascii_whitespace) {
            debug!("Position ledger {} is empty", path.display());
            return Ok(Self::empty(path));
        }

        let records: BTreeMap<NodeId, PositionRecord> =
            serde_json::from_slice(cleaned).map_err(|source| LedgerError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    /// Insert or fully replace the record for `node`, returning the one it replaced.
    pub fn upsert(&mut self, node: NodeId, record: PositionRecord) -> Option<PositionRecord> {
        self.records.insert(node, record)
    }

    /// Write the whole ledger to its file and return the number of records written.
    pub fn persist(&self) -> Result<usize, LedgerError> {
        let content = serde_json::to_string_pretty(&self.records)?;
        let write_err = |source| LedgerError::Write {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(write_err)?;

        let base = self
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("mesh_positions.json");

        let lock_path = dir.join(format!(".{}.lock", base));
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| LedgerError::Lock {
                path: lock_path.clone(),
                source,
            })?;
        FileExt::lock_exclusive(&lock_file).map_err(|source| LedgerError::Lock {
            path: lock_path.clone(),
            source,
        })?;

        let result = write_atomic(&dir, base, &self.path, content.as_bytes()).map_err(write_err);
        let _ = FileExt::unlock(&lock_file);
        result?;

        info!(
            "Saved {} node positions to {}",
            self.records.len(),
            self.path.display()
        );
        Ok(self.records.len())
    }

    pub fn get(&self, node: NodeId) -> Option<&PositionRecord> {
        self.records.get(&node)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in ascending node order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &PositionRecord)> {
        self.records.iter()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_atomic(dir: &Path, base: &str, dest: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut counter = 0u32;
    let tmp_path = loop {
        let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(mut tmp) => {
                let written = tmp
                    .write_all(bytes)
                    .and_then(|_| tmp.write_all(b"\n"))
                    .and_then(|_| tmp.flush())
                    .and_then(|_| tmp.sync_all());
                if let Err(e) = written {
                    let _ = fs::remove_file(&candidate);
                    return Err(e);
                }
                break candidate;
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                counter = counter.saturating_add(1);
                continue;
            }
            Err(e) => return Err(e),
        }
    };

    if let Err(e) = fs::rename(&tmp_path, dest) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    if let Ok(dir_file) = File::open(dir) {
        let _ = dir_file.sync_all();
    }
    Ok(())
}
