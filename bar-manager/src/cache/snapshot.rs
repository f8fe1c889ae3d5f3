//! On-disk snapshots of the rolling cache
//!
//! One file per `(timeframe, window)` plus a `current` pointer per
//! timeframe. Files are bincode encoded and zstd compressed. Every write
//! lands in a temp file first and is renamed into place, so readers only
//! ever see complete files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, warn};

use super::BarTable;
use bar_common::error::{ErrorCategory, ErrorClassification};
use bar_common::{Bar, Timeframe};

pub const SNAPSHOT_VERSION: u32 = 1;

const ZSTD_LEVEL: i32 = 3;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),

    #[error("Snapshot holds {found} bars, expected {expected}")]
    TimeframeMismatch { found: Timeframe, expected: Timeframe },
}

impl ErrorClassification for SnapshotError {
    fn category(&self) -> ErrorCategory {
        match self {
            SnapshotError::Io(_) => ErrorCategory::Transient,
            _ => ErrorCategory::Permanent,
        }
    }
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Table contents as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SnapshotPayload {
    /// Rows grouped under their symbol
    Keyed(BTreeMap<String, Vec<Bar>>),
    /// Rows without grouping; the key is rebuilt from each row
    Flat(Vec<Bar>),
}

impl SnapshotPayload {
    pub fn into_table(self) -> BarTable {
        match self {
            SnapshotPayload::Keyed(groups) => {
                BarTable::from_rows(groups.into_iter().flat_map(|(symbol, rows)| {
                    rows.into_iter().map(move |mut bar| {
                        if bar.symbol != symbol {
                            bar.symbol = symbol.clone();
                        }
                        bar
                    })
                }))
            }
            SnapshotPayload::Flat(rows) => BarTable::from_rows(rows),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub version: u32,
    pub timeframe: Timeframe,
    pub window: usize,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub saved_at: DateTime<Utc>,
    pub payload: SnapshotPayload,
}

/// Reads and writes snapshot files under one directory
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    dir: PathBuf,
}

impl SnapshotManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn windowed_path(&self, timeframe: Timeframe, window: usize) -> PathBuf {
        self.dir.join(format!("{}_bars_{}.snap", timeframe, window))
    }

    pub fn current_path(&self, timeframe: Timeframe) -> PathBuf {
        self.dir.join(format!("{}_bars_current.snap", timeframe))
    }

    fn pointer_tmp_path(&self, timeframe: Timeframe) -> PathBuf {
        self.dir.join(format!(".{}_bars_current.tmp", timeframe))
    }

    /// Write `table` to the windowed file and repoint `current` at it.
    ///
    /// Empty tables are not written.
    pub fn save(&self, timeframe: Timeframe, window: usize, table: &BarTable) -> SnapshotResult<Option<PathBuf>> {
        if table.is_empty() {
            return Ok(None);
        }
        fs::create_dir_all(&self.dir)?;

        let file = SnapshotFile {
            version: SNAPSHOT_VERSION,
            timeframe,
            window,
            saved_at: Utc::now(),
            payload: SnapshotPayload::Keyed(table.to_keyed()),
        };
        let path = self.windowed_path(timeframe, window);
        self.write_atomic(&path, &encode(&file)?)?;
        self.repoint_current(timeframe, &path)?;

        debug!(
            timeframe = %timeframe,
            rows = table.len(),
            path = %path.display(),
            "Saved cache snapshot"
        );
        Ok(Some(path))
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> SnapshotResult<()> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = self.dir.join(format!(".{}.tmp", file_name));

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Point `current` at `target`: a relative symlink swapped in by rename,
    /// or a full copy where symlinks are unavailable.
    fn repoint_current(&self, timeframe: Timeframe, target: &Path) -> SnapshotResult<()> {
        let current = self.current_path(timeframe);
        let tmp = self.pointer_tmp_path(timeframe);

        match fs::remove_file(&tmp) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = link(target, &tmp) {
            debug!("Symlink unavailable ({}), copying snapshot instead", e);
            fs::copy(target, &tmp)?;
        }
        fs::rename(&tmp, &current)?;
        Ok(())
    }

    /// Decode a snapshot file
    pub fn load(&self, path: &Path) -> SnapshotResult<SnapshotFile> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        decode(&data)
    }

    /// The file priming should read: `current` when it resolves, otherwise
    /// the most recently modified windowed file of the timeframe.
    pub fn locate(&self, timeframe: Timeframe) -> Option<PathBuf> {
        let current = self.current_path(timeframe);
        if current.exists() {
            return Some(current);
        }

        let prefix = format!("{}_bars_", timeframe);
        let current_name = format!("{}_bars_current.snap", timeframe);
        let entries = fs::read_dir(&self.dir).ok()?;

        entries
            .filter_map(Result::ok)
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.starts_with(&prefix) && name.ends_with(".snap") && name != current_name
            })
            .filter_map(|entry| {
                let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
                Some((modified, entry.path()))
            })
            .max_by_key(|(modified, _)| *modified)
            .map(|(_, path)| path)
    }

    /// Modification time of the file `locate` picks, following symlinks
    pub fn located_mtime(&self, timeframe: Timeframe) -> Option<(PathBuf, SystemTime)> {
        let path = self.locate(timeframe)?;
        let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
        Some((path, modified))
    }

    /// Load and validate the newest snapshot of `timeframe`.
    ///
    /// `Ok(None)` when no snapshot exists.
    pub fn read_table(&self, timeframe: Timeframe) -> SnapshotResult<Option<BarTable>> {
        let Some(path) = self.locate(timeframe) else {
            return Ok(None);
        };

        let file = self.load(&path)?;
        if file.timeframe != timeframe {
            return Err(SnapshotError::TimeframeMismatch {
                found: file.timeframe,
                expected: timeframe,
            });
        }
        Ok(Some(file.payload.into_table()))
    }

    /// Newest snapshot of `timeframe`, clipped to `window`
    pub fn prime(&self, timeframe: Timeframe, window: usize) -> SnapshotResult<Option<BarTable>> {
        let table = self.read_table(timeframe)?.map(|mut table| {
            table.clip(window);
            table
        });
        if table.is_none() {
            warn!(timeframe = %timeframe, dir = %self.dir.display(), "No snapshot found");
        }
        Ok(table)
    }
}

fn encode(file: &SnapshotFile) -> SnapshotResult<Vec<u8>> {
    let data = bincode::serialize(file).map_err(|e| SnapshotError::Serialization(e.to_string()))?;
    zstd::encode_all(data.as_slice(), ZSTD_LEVEL).map_err(|e| SnapshotError::Compression(e.to_string()))
}

fn decode(data: &[u8]) -> SnapshotResult<SnapshotFile> {
    let raw = zstd::decode_all(data).map_err(|e| SnapshotError::Compression(e.to_string()))?;
    let file: SnapshotFile =
        bincode::deserialize(&raw).map_err(|e| SnapshotError::Serialization(e.to_string()))?;

    if file.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(file.version));
    }
    Ok(file)
}

#[cfg(unix)]
fn link(target: &Path, link: &Path) -> io::Result<()> {
    // Relative target so the directory can be moved as a whole
    let relative = target.file_name().map(Path::new).unwrap_or(target);
    std::os::unix::fs::symlink(relative, link)
}

#[cfg(not(unix))]
fn link(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks unavailable"))
}
