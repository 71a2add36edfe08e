//! File-backed persistence for workflow instances.
//!
//! One store file lives under a hidden directory in the project working
//! directory. Instances are partitioned by workflow name and keyed by id in
//! lexicographic order, which makes prefix lookups deterministic. Every
//! operation is a short-lived transaction: take the advisory file lock, load
//! the file, mutate, write to a temp file and rename. The store assumes a
//! single writer process; a held lock is fatal, not retried.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::ops::Bound;
use std::path::{Path, PathBuf};

use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::instance::WorkflowInstance;

/// Hidden directory holding the store, relative to the invocation root.
pub const DEFAULT_STORE_DIR: &str = ".stagehand";

const STORE_FILE: &str = "instances.db";
const LOCK_FILE: &str = "instances.lock";

/// Bumped whenever the persisted encoding changes shape. Checkpointed resume
/// depends on exact structural compatibility across invocations, so an
/// unknown version is an error rather than a best-effort decode.
const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("workflow instance '{id}' not found under workflow '{workflow}'")]
    NotFound { workflow: String, id: String },
    #[error("{requested} instance(s) requested but only {available} matched")]
    InsufficientResults { requested: usize, available: usize },
    #[error("unsupported store schema version {found}, expected {expected}")]
    SchemaVersion { expected: u32, found: u32 },
    #[error("store is locked by another process")]
    Locked,
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreContents {
    schema_version: u32,
    partitions: BTreeMap<String, BTreeMap<String, WorkflowInstance>>,
}

impl Default for StoreContents {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            partitions: BTreeMap::new(),
        }
    }
}

/// Durable CRUD over workflow instances, partitioned by workflow name.
pub struct WorkflowStore {
    root: PathBuf,
}

impl WorkflowStore {
    /// Opens (creating if needed) the store directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Opens the store at its default location under `base`.
    pub fn open_default(base: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open(base.as_ref().join(DEFAULT_STORE_DIR))
    }

    /// Upserts an instance by exact id within its workflow-name partition.
    pub fn put(&self, instance: &WorkflowInstance) -> Result<(), StoreError> {
        self.transaction(|contents| {
            contents
                .partitions
                .entry(instance.workflow_name.clone())
                .or_default()
                .insert(instance.id.clone(), instance.clone());
            debug!(workflow = %instance.workflow_name, instance = %instance.id, "instance stored");
            Ok(())
        })
    }

    /// Exact-id lookup. A missing partition or id is `Ok(None)`, not an error.
    pub fn get(
        &self,
        workflow_name: &str,
        id: &str,
    ) -> Result<Option<WorkflowInstance>, StoreError> {
        let contents = self.snapshot()?;
        Ok(contents
            .partitions
            .get(workflow_name)
            .and_then(|partition| partition.get(id))
            .cloned())
    }

    /// Returns the first instance, in key order, whose id starts with
    /// `prefix`. Ambiguous prefixes resolve to the lexicographically first
    /// match.
    pub fn get_by_prefix(
        &self,
        workflow_name: &str,
        prefix: &str,
    ) -> Result<Option<WorkflowInstance>, StoreError> {
        let contents = self.snapshot()?;
        let Some(partition) = contents.partitions.get(workflow_name) else {
            return Ok(None);
        };
        Ok(partition
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .next()
            .filter(|(id, _)| id.starts_with(prefix))
            .map(|(_, instance)| instance.clone()))
    }

    /// Returns up to `limit` instances from one partition in key order
    /// (0 means unlimited), optionally restricted to active instances.
    /// Requesting more instances than match is surfaced, not truncated.
    pub fn list(
        &self,
        workflow_name: &str,
        limit: usize,
        active_only: bool,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        let contents = self.snapshot()?;
        let matching: Vec<WorkflowInstance> = contents
            .partitions
            .get(workflow_name)
            .map(|partition| {
                partition
                    .values()
                    .filter(|instance| !active_only || instance.is_active)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        limited(matching, limit)
    }

    /// Same as [`list`](Self::list), across every workflow-name partition.
    pub fn list_all(&self, active_only: bool) -> Result<Vec<WorkflowInstance>, StoreError> {
        let contents = self.snapshot()?;
        Ok(contents
            .partitions
            .values()
            .flat_map(|partition| partition.values())
            .filter(|instance| !active_only || instance.is_active)
            .cloned()
            .collect())
    }

    /// Removes an instance by exact id. Missing partitions and ids are errors.
    pub fn delete(&self, workflow_name: &str, id: &str) -> Result<(), StoreError> {
        self.transaction(|contents| {
            let partition = contents
                .partitions
                .get_mut(workflow_name)
                .ok_or_else(|| StoreError::NotFound {
                    workflow: workflow_name.to_string(),
                    id: id.to_string(),
                })?;
            partition.remove(id).ok_or_else(|| StoreError::NotFound {
                workflow: workflow_name.to_string(),
                id: id.to_string(),
            })?;
            Ok(())
        })
    }

    /// Erases every partition.
    pub fn drop_all(&self) -> Result<(), StoreError> {
        let lock_file = File::create(self.lock_path())?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock.try_write().map_err(|_| StoreError::Locked)?;
        let path = self.store_path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn store_path(&self) -> PathBuf {
        self.root.join(STORE_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// Consistent read snapshot under the shared lock.
    fn snapshot(&self) -> Result<StoreContents, StoreError> {
        let lock_file = File::create(self.lock_path())?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock.try_read().map_err(|_| StoreError::Locked)?;
        self.load()
    }

    /// One mutating transaction: lock, load, mutate, commit atomically.
    fn transaction(
        &self,
        mutate: impl FnOnce(&mut StoreContents) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let lock_file = File::create(self.lock_path())?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock.try_write().map_err(|_| StoreError::Locked)?;

        let mut contents = self.load()?;
        mutate(&mut contents)?;
        self.commit(&contents)
    }

    fn load(&self) -> Result<StoreContents, StoreError> {
        let path = self.store_path();
        if !path.exists() {
            return Ok(StoreContents::default());
        }
        let raw = fs::read(&path)?;
        let contents: StoreContents = serde_json::from_slice(&raw)?;
        if contents.schema_version != SCHEMA_VERSION {
            return Err(StoreError::SchemaVersion {
                expected: SCHEMA_VERSION,
                found: contents.schema_version,
            });
        }
        Ok(contents)
    }

    fn commit(&self, contents: &StoreContents) -> Result<(), StoreError> {
        let temp_path = self.root.join(format!("{STORE_FILE}.tmp"));
        fs::write(&temp_path, serde_json::to_vec_pretty(contents)?)?;
        fs::rename(&temp_path, self.store_path())?;
        Ok(())
    }
}

fn limited(
    matching: Vec<WorkflowInstance>,
    limit: usize,
) -> Result<Vec<WorkflowInstance>, StoreError> {
    if limit == 0 {
        return Ok(matching);
    }
    if matching.len() < limit {
        return Err(StoreError::InsufficientResults {
            requested: limit,
            available: matching.len(),
        });
    }
    let mut matching = matching;
    matching.truncate(limit);
    Ok(matching)
}
