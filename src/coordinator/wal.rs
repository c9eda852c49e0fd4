//! Durable decision log
//!
//! Append-only JSON-lines file, the coordinator's source of truth for
//! transfer outcomes. A `Begin` record goes in before the prepare phase;
//! the `Decision` record is appended and synced before the client sees a
//! terminal result. Replay rebuilds the idempotency registry; a `Begin`
//! without a matching `Decision` means the process died mid-2PC, and that
//! txid is recovered as aborted.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core_types::{Amount, TxId};

/// One log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogRecord {
    /// Prepare phase is about to start; participants are resolved.
    Begin {
        txid: TxId,
        src_bank: String,
        src_user: String,
        dst_bank: String,
        dst_user: String,
        amount: Amount,
        ts_ms: i64,
    },
    /// Terminal outcome. `reason` is set iff aborted.
    Decision {
        txid: TxId,
        committed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        ts_ms: i64,
    },
}

impl LogRecord {
    pub fn txid(&self) -> TxId {
        match self {
            LogRecord::Begin { txid, .. } | LogRecord::Decision { txid, .. } => *txid,
        }
    }
}

/// Append-only writer with a single-writer discipline (the mutex); every
/// append is flushed and synced before returning, because a decision must
/// be durable before the client learns it.
pub struct DecisionLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl DecisionLog {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &LogRecord) -> io::Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut writer = self.writer.lock().unwrap();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Replay all records, calling the callback for each. A missing file is
    /// a fresh start. Unparseable lines (torn tail write) are skipped with
    /// a warning; everything before them already reached the callback.
    pub fn replay<F>(path: &Path, mut callback: F) -> io::Result<u64>
    where
        F: FnMut(LogRecord),
    {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let reader = BufReader::new(file);
        let mut count = 0u64;

        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<LogRecord>(&line) {
                Ok(record) => {
                    callback(record);
                    count += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Skipping unparseable decision-log line");
                }
            }
        }

        Ok(count)
    }
}
