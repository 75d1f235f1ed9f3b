//! JSONL export of finalized traces.
//!
//! Two layouts are supported:
//! - **Single file**: every trace is appended to one file (e.g. `run/traces.jsonl`)
//! - **Daily**: traces go to dated files in a directory (e.g. `traces/2026-10-19.jsonl`)

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::Trace;

/// Error type for trace export.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Where exported traces land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "path", rename_all = "snake_case")]
pub enum ExportTarget {
    /// Append to a single file.
    SingleFile(PathBuf),
    /// One file per UTC day inside a directory.
    Daily(PathBuf),
}

impl Default for ExportTarget {
    fn default() -> Self {
        ExportTarget::Daily(PathBuf::from(".lookout/traces"))
    }
}

/// Appends finalized traces as JSON lines.
///
/// Thread-safe via internal mutex.
pub struct TraceWriter {
    target: ExportTarget,
    current: Mutex<Option<OpenFile>>,
}

struct OpenFile {
    /// Day stamp for daily files, empty for single-file mode.
    day: String,
    writer: BufWriter<File>,
}

impl std::fmt::Debug for TraceWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceWriter")
            .field("target", &self.target)
            .finish()
    }
}

impl TraceWriter {
    /// Create the writer, creating directories as needed.
    pub fn new(target: ExportTarget) -> Result<Self, WriteError> {
        match &target {
            ExportTarget::SingleFile(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
            }
            ExportTarget::Daily(dir) => fs::create_dir_all(dir)?,
        }

        Ok(Self {
            target,
            current: Mutex::new(None),
        })
    }

    pub fn target(&self) -> &ExportTarget {
        &self.target
    }

    /// Append one trace.
    pub fn write(&self, trace: &Trace) -> Result<(), WriteError> {
        let line = serde_json::to_string(trace)?;
        let mut guard = self.current.lock().unwrap_or_else(PoisonError::into_inner);

        let day = match &self.target {
            ExportTarget::SingleFile(_) => String::new(),
            ExportTarget::Daily(_) => Utc::now().format("%Y-%m-%d").to_string(),
        };

        let stale = guard.as_ref().is_none_or(|open| open.day != day);
        if stale {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path_for_day(&day))?;
            *guard = Some(OpenFile {
                day,
                writer: BufWriter::new(file),
            });
        }

        if let Some(open) = guard.as_mut() {
            writeln!(open.writer, "{}", line)?;
            open.writer.flush()?;
        }

        Ok(())
    }

    /// Path of the file the next write goes to.
    pub fn current_file_path(&self) -> PathBuf {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        self.path_for_day(&day)
    }

    fn path_for_day(&self, day: &str) -> PathBuf {
        match &self.target {
            ExportTarget::SingleFile(path) => path.clone(),
            ExportTarget::Daily(dir) => dir.join(format!("{}.jsonl", day)),
        }
    }

    /// List export files, oldest first.
    pub fn list_files(&self) -> Result<Vec<PathBuf>, WriteError> {
        match &self.target {
            ExportTarget::SingleFile(path) => Ok(if path.exists() {
                vec![path.clone()]
            } else {
                Vec::new()
            }),
            ExportTarget::Daily(dir) => {
                let mut files: Vec<PathBuf> = fs::read_dir(dir)?
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
                    .collect();
                files.sort();
                Ok(files)
            }
        }
    }

    /// Read every trace stored in an export file.
    pub fn read_traces(path: &Path) -> Result<Vec<Trace>, WriteError> {
        let content = fs::read_to_string(path)?;
        let traces: Result<Vec<Trace>, _> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect();
        Ok(traces?)
    }
}
