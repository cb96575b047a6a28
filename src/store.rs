//! Per-category output buffers.
//!
//! A [`CategoryStore`] is created when a pipeline starts and is shared behind
//! an `Arc`. Any number of readers may take snapshots; only the holder of the
//! [`StoreWriter`] lease appends. Buffers are append-only between resets.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use thiserror::Error;

use crate::taxonomy::CategoryKind;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("category store already has an active writer")]
    WriterBusy,
    #[error("category file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

pub fn header_line(kind: CategoryKind) -> String {
    format!("=== {} Logs ===", kind.name())
}

pub fn file_name(kind: CategoryKind) -> String {
    format!("{}_logs.txt", kind.key())
}

/// Outcome of reloading one category file from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadStatus {
    Loaded { lines: usize },
    NotFound,
}

#[derive(Debug)]
pub struct CategoryStore {
    buffers: RwLock<BTreeMap<CategoryKind, Vec<String>>>,
    dir: Option<PathBuf>,
    writer_active: AtomicBool,
}

impl CategoryStore {
    fn with_optional_dir(dir: Option<PathBuf>) -> Self {
        let buffers = CategoryKind::ALL.iter().map(|k| (*k, Vec::new())).collect();
        Self { buffers: RwLock::new(buffers), dir, writer_active: AtomicBool::new(false) }
    }

    pub fn in_memory() -> Self {
        Self::with_optional_dir(None)
    }

    /// Store backed by `<dir>/<category>_logs.txt` files.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self::with_optional_dir(Some(dir.into()))
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn file_path(&self, kind: CategoryKind) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(file_name(kind)))
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, BTreeMap<CategoryKind, Vec<String>>> {
        self.buffers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, BTreeMap<CategoryKind, Vec<String>>> {
        self.buffers.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn lines(&self, kind: CategoryKind) -> Vec<String> {
        self.read_guard().get(&kind).cloned().unwrap_or_default()
    }

    pub fn len(&self, kind: CategoryKind) -> usize {
        self.read_guard().get(&kind).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.read_guard().values().all(Vec::is_empty)
    }

    pub fn counts(&self) -> BTreeMap<CategoryKind, usize> {
        self.read_guard().iter().map(|(k, v)| (*k, v.len())).collect()
    }

    pub fn snapshot(&self) -> BTreeMap<CategoryKind, Vec<String>> {
        self.read_guard().clone()
    }

    pub fn is_writer_active(&self) -> bool {
        self.writer_active.load(Ordering::SeqCst)
    }

    /// Take the single-writer lease.
    pub fn acquire_writer(self: &Arc<Self>) -> Result<StoreWriter, StoreError> {
        if self
            .writer_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StoreError::WriterBusy);
        }
        Ok(StoreWriter { store: Arc::clone(self), files: BTreeMap::new() })
    }

    /// Reload category files written by an earlier run. The header line is
    /// skipped; missing files are reported, not treated as errors.
    pub fn load_existing(
        self: &Arc<Self>,
    ) -> Result<BTreeMap<CategoryKind, LoadStatus>, StoreError> {
        let mut out = BTreeMap::new();
        let Some(dir) = self.dir.clone() else {
            return Ok(out);
        };
        let _lease = self.acquire_writer()?;
        for kind in CategoryKind::ALL {
            let path = dir.join(file_name(kind));
            let file = match File::open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    out.insert(kind, LoadStatus::NotFound);
                    continue;
                }
                Err(source) => {
                    return Err(StoreError::Io { path: path.display().to_string(), source })
                }
            };
            let mut lines = Vec::new();
            let mut reader = BufReader::new(file);
            let mut buf = Vec::new();
            let mut first = true;
            loop {
                buf.clear();
                let n = reader.read_until(b'\n', &mut buf).map_err(|source| StoreError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                if n == 0 {
                    break;
                }
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                if first {
                    first = false;
                    if line == header_line(kind) {
                        continue;
                    }
                }
                if !line.is_empty() {
                    lines.push(line.to_string());
                }
            }
            out.insert(kind, LoadStatus::Loaded { lines: lines.len() });
            self.write_guard().insert(kind, lines);
        }
        Ok(out)
    }
}

/// Exclusive append handle. Dropping it releases the lease.
#[derive(Debug)]
pub struct StoreWriter {
    store: Arc<CategoryStore>,
    files: BTreeMap<CategoryKind, File>,
}

impl StoreWriter {
    pub fn store(&self) -> &Arc<CategoryStore> {
        &self.store
    }

    /// Clear every buffer and start each backing file with its header.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        self.files.clear();
        {
            let mut guard = self.store.write_guard();
            for v in guard.values_mut() {
                v.clear();
            }
        }
        let Some(dir) = self.store.dir.clone() else {
            return Ok(());
        };
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        for kind in CategoryKind::ALL {
            let path = dir.join(file_name(kind));
            let mut f = File::create(&path).map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })?;
            writeln!(f, "{}", header_line(kind)).map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })?;
            self.files.insert(kind, f);
        }
        Ok(())
    }

    fn open_for_append(&mut self, kind: CategoryKind) -> Result<&mut File, StoreError> {
        let vacant = match self.files.entry(kind) {
            Entry::Occupied(e) => return Ok(e.into_mut()),
            Entry::Vacant(v) => v,
        };
        let Some(dir) = self.store.dir.as_deref() else {
            return Err(StoreError::Io {
                path: String::new(),
                source: io::Error::new(io::ErrorKind::Unsupported, "store has no directory"),
            });
        };
        let path = dir.join(file_name(kind));
        let to_err = |source| StoreError::Io { path: path.display().to_string(), source };
        fs::create_dir_all(dir).map_err(to_err)?;
        let fresh = !path.exists();
        let mut f = OpenOptions::new().create(true).append(true).open(&path).map_err(to_err)?;
        if fresh {
            writeln!(f, "{}", header_line(kind)).map_err(to_err)?;
        }
        Ok(vacant.insert(f))
    }

    /// Append one line to the category buffer and its backing file. A file
    /// failure is logged and does not undo the in-memory append.
    pub fn append(&mut self, kind: CategoryKind, line: &str) {
        self.store
            .write_guard()
            .entry(kind)
            .or_default()
            .push(line.to_string());
        if self.store.dir.is_none() {
            return;
        }
        let written = self
            .open_for_append(kind)
            .and_then(|f| {
                writeln!(f, "{line}").map_err(|source| StoreError::Io {
                    path: file_name(kind),
                    source,
                })
            });
        if let Err(e) = written {
            tracing::warn!(category = %kind, error = %e, "failed to persist categorized line");
        }
    }

    pub fn flush(&mut self) {
        for (kind, f) in self.files.iter_mut() {
            if let Err(e) = f.flush() {
                tracing::warn!(category = %kind, error = %e, "failed to flush category file");
            }
        }
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        self.flush();
        self.store.writer_active.store(false, Ordering::SeqCst);
    }
}
