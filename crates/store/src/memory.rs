//! In-process [`Table`] with optional JSON snapshot persistence.
//!
//! Rows live in a `BTreeMap` behind a `tokio::sync::RwLock`. When opened on
//! a snapshot file, every mutation is staged, written to disk (temp file +
//! rename), and only then made visible, so a failed write leaves both the
//! file and the in-memory table at their previous state.

use crate::{Record, Table};
use async_trait::async_trait;
use phoenix_core::error::{PhoenixError, PhoenixResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// First identifier handed out by [`Table::next_id`].
const FIRST_ID: u64 = 1;

pub struct MemoryTable<T: Record> {
    state: RwLock<TableState<T>>,
    snapshot: Option<PathBuf>,
}

#[derive(Clone)]
struct TableState<T: Record> {
    rows: BTreeMap<T::Key, T>,
    next_id: u64,
}

impl<T: Record> Default for TableState<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: FIRST_ID,
        }
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a, T> {
    next_id: u64,
    rows: Vec<&'a T>,
}

#[derive(Deserialize)]
struct Snapshot<T> {
    next_id: u64,
    rows: Vec<T>,
}

impl<T: Record> Default for MemoryTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> MemoryTable<T> {
    /// Volatile table; contents are lost on drop.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(TableState::default()),
            snapshot: None,
        }
    }

    /// Opens `<dir>/<table>.json`, loading it if present.
    pub async fn open(dir: impl AsRef<Path>) -> PhoenixResult<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            PhoenixError::Store(format!("Failed to create {}: {e}", dir.display()))
        })?;
        let path = dir.join(format!("{}.json", T::TABLE));

        let state = match tokio::fs::read(&path).await {
            Ok(raw) => {
                let snapshot: Snapshot<T> = serde_json::from_slice(&raw).map_err(|e| {
                    PhoenixError::Store(format!("Corrupt snapshot {}: {e}", path.display()))
                })?;
                TableState {
                    rows: snapshot.rows.into_iter().map(|r| (r.key(), r)).collect(),
                    next_id: snapshot.next_id.max(FIRST_ID),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TableState::default(),
            Err(e) => {
                return Err(PhoenixError::Store(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        tracing::debug!(
            table = T::TABLE,
            rows = state.rows.len(),
            path = %path.display(),
            "opened table"
        );

        Ok(Self {
            state: RwLock::new(state),
            snapshot: Some(path),
        })
    }

    /// Persists `staged` (if this table is file-backed) and then installs it.
    async fn commit(
        &self,
        state: &mut TableState<T>,
        staged: TableState<T>,
    ) -> PhoenixResult<()> {
        if let Some(path) = &self.snapshot {
            write_snapshot(path, &staged).await?;
        }
        *state = staged;
        Ok(())
    }
}

async fn write_snapshot<T: Record>(path: &Path, state: &TableState<T>) -> PhoenixResult<()> {
    let body = serde_json::to_vec_pretty(&SnapshotRef {
        next_id: state.next_id,
        rows: state.rows.values().collect(),
    })
    .map_err(|e| PhoenixError::Store(format!("Failed to encode {}: {e}", T::TABLE)))?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body)
        .await
        .map_err(|e| PhoenixError::Store(format!("Failed to write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| PhoenixError::Store(format!("Failed to replace {}: {e}", path.display())))
}

#[async_trait]
impl<T: Record> Table<T> for MemoryTable<T> {
    async fn next_id(&self) -> PhoenixResult<u64> {
        let mut state = self.state.write().await;
        let id = state.next_id;
        let mut staged = state.clone();
        staged.next_id = id + 1;
        self.commit(&mut state, staged).await?;
        Ok(id)
    }

    async fn get(&self, key: &T::Key) -> PhoenixResult<Option<T>> {
        Ok(self.state.read().await.rows.get(key).cloned())
    }

    async fn insert(&self, row: T) -> PhoenixResult<()> {
        let mut state = self.state.write().await;
        let key = row.key();
        if state.rows.contains_key(&key) {
            return Err(PhoenixError::Conflict(format!(
                "{} row {key:?} already exists",
                T::TABLE
            )));
        }
        let mut staged = state.clone();
        staged.rows.insert(key, row);
        self.commit(&mut state, staged).await
    }

    async fn compare_and_swap(&self, current: &T, next: T) -> PhoenixResult<bool> {
        let key = current.key();
        if next.key() != key {
            return Err(PhoenixError::Internal(format!(
                "compare_and_swap cannot move {} row {key:?}",
                T::TABLE
            )));
        }
        let mut state = self.state.write().await;
        match state.rows.get(&key) {
            Some(stored) if stored == current => {}
            _ => return Ok(false),
        }
        let mut staged = state.clone();
        staged.rows.insert(key, next);
        self.commit(&mut state, staged).await?;
        Ok(true)
    }

    async fn delete(&self, key: &T::Key) -> PhoenixResult<Option<T>> {
        let mut state = self.state.write().await;
        if !state.rows.contains_key(key) {
            return Ok(None);
        }
        let mut staged = state.clone();
        let removed = staged.rows.remove(key);
        self.commit(&mut state, staged).await?;
        Ok(removed)
    }

    async fn scan(&self) -> PhoenixResult<Vec<T>> {
        Ok(self.state.read().await.rows.values().cloned().collect())
    }
}
