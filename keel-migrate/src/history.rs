//! Persisted revision marker.
//!
//! The marker is a single-column table holding one row per applied head.
//! Multiple rows only appear while branches are unmerged.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use keel_schema::{Column, SqlType, Table, TableKey};
use tracing::debug;

use crate::error::{MigrateResult, MigrationError};
use crate::graph::RevisionSet;

/// Column holding the revision id in the marker table.
pub const VERSION_COLUMN: &str = "version_num";

/// Width of [`VERSION_COLUMN`].
pub const VERSION_COLUMN_LENGTH: usize = 32;

/// Storage for the current revision marker.
pub trait VersionStore {
    /// Read the applied head revision ids. Empty means nothing is applied.
    fn read_current(&mut self) -> MigrateResult<RevisionSet>;

    /// Replace the applied head revision ids.
    fn write_current(&mut self, heads: &RevisionSet) -> MigrateResult<()>;

    /// Acquire an exclusive lock for the duration of a run.
    ///
    /// Stores without a locking protocol return `None`.
    fn acquire_lock(&mut self) -> MigrateResult<Option<MigrationLock>> {
        Ok(None)
    }
}

/// Migration lock to prevent concurrent runs. Released on drop.
pub struct MigrationLock {
    name: String,
    release_fn: Option<Box<dyn FnOnce() + Send>>,
}

impl MigrationLock {
    /// Create a new migration lock.
    pub fn new(name: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name: name.into(),
            release_fn: Some(Box::new(release)),
        }
    }

    /// Get the lock name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for MigrationLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationLock").field("name", &self.name).finish()
    }
}

impl Drop for MigrationLock {
    fn drop(&mut self) {
        if let Some(release) = self.release_fn.take() {
            debug!("Releasing migration lock '{}'", self.name);
            release();
        }
    }
}

/// Marker store kept in memory. Useful for offline runs and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryVersionStore {
    current: RevisionSet,
    writes: usize,
    locked: Arc<AtomicBool>,
}

impl InMemoryVersionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the given heads.
    pub fn with_current<I, S>(heads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            current: heads.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Number of marker writes so far.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Check if a lock is currently held.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

impl VersionStore for InMemoryVersionStore {
    fn read_current(&mut self) -> MigrateResult<RevisionSet> {
        Ok(self.current.clone())
    }

    fn write_current(&mut self, heads: &RevisionSet) -> MigrateResult<()> {
        // same limits as the marker table's column
        if let Some(id) = heads
            .iter()
            .find(|id| id.is_empty() || id.len() > VERSION_COLUMN_LENGTH)
        {
            return Err(MigrationError::version_store(format!(
                "revision id '{}' does not fit {} VARCHAR({})",
                id, VERSION_COLUMN, VERSION_COLUMN_LENGTH
            )));
        }
        self.current = heads.clone();
        self.writes += 1;
        Ok(())
    }

    fn acquire_lock(&mut self) -> MigrateResult<Option<MigrationLock>> {
        if self.locked.swap(true, Ordering::SeqCst) {
            return Err(MigrationError::lock_failed("in-memory marker is already locked"));
        }
        let flag = Arc::clone(&self.locked);
        Ok(Some(MigrationLock::new("in-memory", move || {
            flag.store(false, Ordering::SeqCst);
        })))
    }
}

/// The marker table as a snapshot table, so the differ and renderer can use it.
pub fn version_table(key: &TableKey) -> Table {
    let column = Column::new(VERSION_COLUMN, SqlType::string(Some(VERSION_COLUMN_LENGTH as i64)));
    let mut table = Table::new(key.name.clone()).with_column(column.not_null());
    table.schema = key.schema.clone();
    table.primary_key = Some(
        keel_schema::PrimaryKeyConstraint::new([VERSION_COLUMN]).named(format!("{}_pkc", key.name)),
    );
    table
}

/// `CREATE TABLE` statement for the marker table.
pub fn version_table_ddl(key: &TableKey) -> String {
    format!(
        "CREATE TABLE {key} (\n    {col} VARCHAR({len}) NOT NULL,\n    CONSTRAINT {name}_pkc PRIMARY KEY ({col})\n)",
        key = key,
        col = VERSION_COLUMN,
        len = VERSION_COLUMN_LENGTH,
        name = key.name,
    )
}
