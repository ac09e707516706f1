//! Result persistence behind a narrow table-like interface.
//!
//! A store holds at most one row per host key. Writes lazily create the
//! table; reads against a missing table return no rows. Both backends guard
//! their state with a single mutex, so concurrent upserts are serialized.

use crate::error::StoreError;
use crate::types::{HostStatus, ScanRecord};
use time::{format_description::well_known, OffsetDateTime};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub trait ResultStore: Send + Sync {
    /// Insert or replace the row for `host_key`, creating the table if needed.
    fn upsert(&self, host_key: &str, status: HostStatus) -> Result<(), StoreError>;
    /// Keys with `status`, sorted. Empty when the table does not exist.
    fn select_by_status(&self, status: HostStatus) -> Result<Vec<String>, StoreError>;
    fn table_exists(&self) -> Result<bool, StoreError>;
    fn create_table(&self) -> Result<(), StoreError>;
    fn drop_table(&self) -> Result<(), StoreError>;

    /// Upsert several rows. Backends that pay per write should apply them in one go.
    fn upsert_many(&self, rows: &[(String, HostStatus)]) -> Result<(), StoreError> {
        for (host_key, status) in rows {
            self.upsert(host_key, *status)?;
        }
        Ok(())
    }
}

type Table = BTreeMap<String, ScanRecord>;

fn record(host_key: &str, status: HostStatus) -> ScanRecord {
    ScanRecord {
        host_key: host_key.to_string(),
        status,
        checked_at: now_rfc3339(),
    }
}

fn keys_with(table: &Table, status: HostStatus) -> Vec<String> {
    table
        .values()
        .filter(|r| r.status == status)
        .map(|r| r.host_key.clone())
        .collect()
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

/// Process-local store; the table exists from first write until dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: Mutex<Option<Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Table>>, StoreError> {
        self.table.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl ResultStore for MemoryStore {
    fn upsert(&self, host_key: &str, status: HostStatus) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        guard
            .get_or_insert_with(Table::new)
            .insert(host_key.to_string(), record(host_key, status));
        Ok(())
    }

    fn upsert_many(&self, rows: &[(String, HostStatus)]) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let table = guard.get_or_insert_with(Table::new);
        for (host_key, status) in rows {
            table.insert(host_key.clone(), record(host_key, *status));
        }
        Ok(())
    }

    fn select_by_status(&self, status: HostStatus) -> Result<Vec<String>, StoreError> {
        Ok(self.lock()?.as_ref().map(|t| keys_with(t, status)).unwrap_or_default())
    }

    fn table_exists(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.is_some())
    }

    fn create_table(&self) -> Result<(), StoreError> {
        self.lock()?.get_or_insert_with(Table::new);
        Ok(())
    }

    fn drop_table(&self) -> Result<(), StoreError> {
        *self.lock()? = None;
        Ok(())
    }
}

/// Durable store: one pretty-printed JSON array of rows, rewritten on every change.
///
/// The file's existence is the table's existence. Writes go to a sibling
/// temp file that is renamed over the original.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    cache: Mutex<Option<Table>>,
}

impl JsonFileStore {
    /// Open (without creating) a store at `path`. A present file is loaded eagerly.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let table = load_table(&path)?;
        if let Some(t) = &table {
            debug!(path = %path.display(), rows = t.len(), "loaded result store");
        }
        Ok(Self {
            path,
            cache: Mutex::new(table),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Table>>, StoreError> {
        self.cache.lock().map_err(|_| StoreError::Poisoned)
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn persist(&self, table: &Table) -> Result<(), StoreError> {
        let rows: Vec<&ScanRecord> = table.values().collect();
        let json = serde_json::to_vec_pretty(&rows).map_err(|source| StoreError::Corrupt {
            path: self.path.display().to_string(),
            source,
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).map_err(|e| self.io_err(e))?;
        file.write_all(&json).map_err(|e| self.io_err(e))?;
        file.sync_all().map_err(|e| self.io_err(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        Ok(())
    }
}

fn load_table(path: &Path) -> Result<Option<Table>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };
    let rows: Vec<ScanRecord> = serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
        path: path.display().to_string(),
        source,
    })?;
    Ok(Some(rows.into_iter().map(|r| (r.host_key.clone(), r)).collect()))
}

impl ResultStore for JsonFileStore {
    fn upsert(&self, host_key: &str, status: HostStatus) -> Result<(), StoreError> {
        self.upsert_many(&[(host_key.to_string(), status)])
    }

    /// All rows land in a single rewrite of the file.
    fn upsert_many(&self, rows: &[(String, HostStatus)]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut guard = self.lock()?;
        let created = guard.is_none();
        let table = guard.get_or_insert_with(Table::new);
        let previous: Vec<(&String, Option<ScanRecord>)> = rows
            .iter()
            .map(|(host_key, status)| (host_key, table.insert(host_key.clone(), record(host_key, *status))))
            .collect();
        if let Err(e) = self.persist(table) {
            // Keep memory consistent with disk.
            for (host_key, prev) in previous.into_iter().rev() {
                match prev {
                    Some(p) => table.insert(host_key.clone(), p),
                    None => table.remove(host_key.as_str()),
                };
            }
            if created {
                *guard = None;
            }
            return Err(e);
        }
        if created {
            info!(path = %self.path.display(), "created missing results table");
        }
        debug!(path = %self.path.display(), rows = rows.len(), "results persisted");
        Ok(())
    }

    fn select_by_status(&self, status: HostStatus) -> Result<Vec<String>, StoreError> {
        Ok(self.lock()?.as_ref().map(|t| keys_with(t, status)).unwrap_or_default())
    }

    fn table_exists(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.is_some())
    }

    fn create_table(&self) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if guard.is_none() {
            let table = Table::new();
            self.persist(&table)?;
            *guard = Some(table);
            info!(path = %self.path.display(), "created results table");
        }
        Ok(())
    }

    fn drop_table(&self) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "results table does not exist");
            }
            Err(e) => return Err(self.io_err(e)),
        }
        *guard = None;
        Ok(())
    }
}
