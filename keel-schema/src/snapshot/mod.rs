//! Backend-agnostic schema snapshots.
//!
//! A [`SchemaSnapshot`] is what a reflection provider produces for a live
//! database and what declared metadata produces for the target schema. The
//! differ in `keel-migrate` compares two of them.

mod column;
mod constraint;
mod table;
mod types;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::{SchemaError, SchemaResult};

pub use column::{Autoincrement, Column};
pub use constraint::{
    CheckConstraint, Constraint, ConstraintKind, ForeignKeyConstraint, Index,
    PrimaryKeyConstraint, UniqueConstraint,
};
pub use table::{Table, TableKey};
pub use types::{ServerDefault, SqlType, TypeAffinity, TypeArg};

/// A set of tables keyed by `(schema, name)`.
///
/// Insertion order is kept so that dependency sorting can break ties by
/// declaration order; equality ignores it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Table>", into = "Vec<Table>")]
pub struct SchemaSnapshot {
    tables: IndexMap<TableKey, Table>,
}

impl SchemaSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot, failing on duplicate table keys.
    pub fn try_from_tables(tables: impl IntoIterator<Item = Table>) -> SchemaResult<Self> {
        let mut snapshot = Self::new();
        for table in tables {
            let key = table.key();
            if snapshot.tables.contains_key(&key) {
                return Err(SchemaError::duplicate("table", key.to_string()));
            }
            snapshot.tables.insert(key, table);
        }
        Ok(snapshot)
    }

    /// Insert a table, returning the one it replaced.
    pub fn insert(&mut self, table: Table) -> Option<Table> {
        self.tables.insert(table.key(), table)
    }

    /// Builder form of [`SchemaSnapshot::insert`].
    pub fn with_table(mut self, table: Table) -> Self {
        self.insert(table);
        self
    }

    /// Remove a table.
    pub fn remove(&mut self, key: &TableKey) -> Option<Table> {
        self.tables.shift_remove(key)
    }

    /// Get a table by key.
    pub fn get(&self, key: &TableKey) -> Option<&Table> {
        self.tables.get(key)
    }

    /// Get a mutable table by key.
    pub fn get_mut(&mut self, key: &TableKey) -> Option<&mut Table> {
        self.tables.get_mut(key)
    }

    /// Get a table in the default schema by name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(&TableKey::new(name))
    }

    /// Check if a table exists.
    pub fn contains(&self, key: &TableKey) -> bool {
        self.tables.contains_key(key)
    }

    /// Iterate tables in declaration order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Iterate table keys in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &TableKey> {
        self.tables.keys()
    }

    /// Number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Check if the snapshot has no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Distinct schemas present, `None` for the default schema.
    pub fn schemas(&self) -> Vec<Option<SmolStr>> {
        let mut schemas: Vec<_> = self.tables.keys().map(|k| k.schema.clone()).collect();
        schemas.sort();
        schemas.dedup();
        schemas
    }

    /// Tables in foreign-key dependency order.
    pub fn sorted_tables(&self) -> Vec<&Table> {
        sort_tables_by_dependency(self.tables.values())
    }

    /// Check structural consistency. See [`Validator`](crate::Validator).
    pub fn validate(&self) -> SchemaResult<()> {
        crate::validator::validate_snapshot(self)
    }
}

impl TryFrom<Vec<Table>> for SchemaSnapshot {
    type Error = SchemaError;

    fn try_from(tables: Vec<Table>) -> SchemaResult<Self> {
        Self::try_from_tables(tables)
    }
}

impl From<SchemaSnapshot> for Vec<Table> {
    fn from(snapshot: SchemaSnapshot) -> Self {
        snapshot.tables.into_values().collect()
    }
}

impl FromIterator<Table> for SchemaSnapshot {
    fn from_iter<I: IntoIterator<Item = Table>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for table in iter {
            snapshot.insert(table);
        }
        snapshot
    }
}

/// Sort tables so that every table comes after the tables it references.
///
/// Only references within the given set count. Ties are broken by input
/// order. Tables caught in a reference cycle are appended in input order.
pub fn sort_tables_by_dependency<'a>(tables: impl IntoIterator<Item = &'a Table>) -> Vec<&'a Table> {
    let tables: Vec<&Table> = tables.into_iter().collect();
    let index: HashMap<TableKey, usize> = tables
        .iter()
        .enumerate()
        .map(|(i, t)| (t.key(), i))
        .collect();

    let mut in_degree = vec![0usize; tables.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tables.len()];
    for (i, table) in tables.iter().enumerate() {
        for referred in table.referenced_tables() {
            if let Some(&dep) = index.get(&referred)
                && !dependents[dep].contains(&i)
            {
                dependents[dep].push(i);
                in_degree[i] += 1;
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(tables.len());
    let mut placed = vec![false; tables.len()];
    while let Some(Reverse(i)) = ready.pop() {
        order.push(tables[i]);
        placed[i] = true;
        for &d in &dependents[i] {
            in_degree[d] -= 1;
            if in_degree[d] == 0 {
                ready.push(Reverse(d));
            }
        }
    }

    if order.len() < tables.len() {
        tracing::warn!(
            "cannot fully order {} table(s) with mutually dependent foreign keys",
            tables.len() - order.len()
        );
        order.extend(
            tables
                .iter()
                .zip(placed)
                .filter(|(_, p)| !p)
                .map(|(t, _)| *t),
        );
    }

    order
}
