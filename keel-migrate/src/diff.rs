//! Structural diffing of a reflected snapshot against a target snapshot.
//!
//! The differ emits an ordered [`Operation`] sequence that, applied to the
//! reflected schema, makes it match the target. Table removals come first,
//! then table additions (dependency-sorted), then per-table changes for tables
//! present on both sides in key order. A final ordering pass moves operations
//! so that nothing runs before the table or column it depends on exists, and
//! no table or column is dropped while something still refers to it.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use keel_schema::{
    Column, Constraint, ForeignKeyConstraint, Index, SchemaSnapshot, Table, TableKey,
    UniqueConstraint, sort_tables_by_dependency,
};

use crate::compare::{
    DefaultComparator, DefaultComparison, TypeComparator, compare_server_defaults, compare_types,
};
use crate::dialect::{self, DialectCapabilities};
use crate::error::{BoxError, MigrateResult, MigrationError};
use crate::operation::{Change, ColumnChanges, ExistingColumn, Operation};

/// Kind of schema object offered to an [`ObjectFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// A table.
    Table,
    /// A column.
    Column,
    /// An index.
    Index,
    /// A primary key constraint.
    PrimaryKey,
    /// A foreign key constraint.
    ForeignKey,
    /// A unique constraint.
    UniqueConstraint,
    /// A check constraint.
    CheckConstraint,
}

impl ObjectKind {
    /// Stable name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Column => "column",
            Self::Index => "index",
            Self::PrimaryKey => "primary_key",
            Self::ForeignKey => "foreign_key_constraint",
            Self::UniqueConstraint => "unique_constraint",
            Self::CheckConstraint => "check_constraint",
        }
    }

    fn of(constraint: &Constraint) -> Self {
        match constraint {
            Constraint::PrimaryKey(_) => Self::PrimaryKey,
            Constraint::ForeignKey(_) => Self::ForeignKey,
            Constraint::Unique(_) => Self::UniqueConstraint,
            Constraint::Check(_) => Self::CheckConstraint,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A borrowed schema object.
#[derive(Debug, Clone, Copy)]
pub enum SchemaObject<'a> {
    /// A table.
    Table(&'a Table),
    /// A column.
    Column(&'a Column),
    /// An index.
    Index(&'a Index),
    /// A constraint.
    Constraint(&'a Constraint),
}

/// Everything a filter gets to decide on one object.
#[derive(Debug, Clone, Copy)]
pub struct FilterCandidate<'a> {
    /// The object itself.
    pub object: SchemaObject<'a>,
    /// Object name, if it has one.
    pub name: Option<&'a str>,
    /// Object kind.
    pub kind: ObjectKind,
    /// Whether the object comes from the reflected snapshot.
    pub reflected: bool,
    /// The matching object on the other side, if both sides have it.
    pub counterpart: Option<SchemaObject<'a>>,
    /// The owning table (the table itself for table candidates).
    pub table: &'a TableKey,
}

/// A predicate that may veto any object from comparison.
///
/// Returning `Ok(false)` excludes the object. An error aborts the diff and is
/// surfaced unchanged as [`MigrationError::DiffFilter`].
pub trait ObjectFilter: Send + Sync {
    /// Decide whether the candidate takes part in the diff.
    fn include(&self, candidate: &FilterCandidate<'_>) -> Result<bool, BoxError>;
}

impl<F> ObjectFilter for F
where
    F: Fn(&FilterCandidate<'_>) -> Result<bool, BoxError> + Send + Sync,
{
    fn include(&self, candidate: &FilterCandidate<'_>) -> Result<bool, BoxError> {
        self(candidate)
    }
}

/// Filter that vetoes tables by name.
#[derive(Debug, Clone, Default)]
pub struct ExcludeTables {
    names: BTreeSet<String>,
}

impl ExcludeTables {
    /// Exclude the given table names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl ObjectFilter for ExcludeTables {
    fn include(&self, candidate: &FilterCandidate<'_>) -> Result<bool, BoxError> {
        Ok(candidate.kind != ObjectKind::Table || !self.names.contains(candidate.table.name()))
    }
}

/// Filter that keeps a table only when `f(name, schema)` returns true.
pub struct IncludeSymbol<F>(pub F);

impl<F> ObjectFilter for IncludeSymbol<F>
where
    F: Fn(&str, Option<&str>) -> bool + Send + Sync,
{
    fn include(&self, candidate: &FilterCandidate<'_>) -> Result<bool, BoxError> {
        Ok(candidate.kind != ObjectKind::Table
            || (self.0)(candidate.table.name(), candidate.table.schema()))
    }
}

/// Differ configuration.
#[derive(Clone)]
pub struct DiffOptions {
    filters: Vec<Arc<dyn ObjectFilter>>,
    include_schemas: bool,
    compare_type: bool,
    compare_server_default: bool,
    compare_comments: bool,
    type_comparator: Option<TypeComparator>,
    default_comparator: Option<DefaultComparator>,
    dialect: Arc<DialectCapabilities>,
    version_table: Option<TableKey>,
}

impl fmt::Debug for DiffOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffOptions")
            .field("filters", &self.filters.len())
            .field("include_schemas", &self.include_schemas)
            .field("compare_type", &self.compare_type)
            .field("compare_server_default", &self.compare_server_default)
            .field("compare_comments", &self.compare_comments)
            .field("type_comparator", &self.type_comparator.is_some())
            .field("default_comparator", &self.default_comparator.is_some())
            .field("dialect", &self.dialect.name)
            .field("version_table", &self.version_table)
            .finish()
    }
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            include_schemas: false,
            compare_type: true,
            compare_server_default: true,
            compare_comments: true,
            type_comparator: None,
            default_comparator: None,
            dialect: dialect::dialect_or_default("default"),
            version_table: Some(TableKey::new("keel_version")),
        }
    }
}

impl DiffOptions {
    /// Create options with every comparison enabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object filter. Filters run in insertion order; the first veto wins.
    pub fn filter(mut self, filter: impl ObjectFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Compare tables in every schema, not only the default one.
    pub fn include_schemas(mut self, include: bool) -> Self {
        self.include_schemas = include;
        self
    }

    /// Enable or disable type comparison.
    pub fn compare_type(mut self, enabled: bool) -> Self {
        self.compare_type = enabled;
        self
    }

    /// Enable or disable server default comparison.
    pub fn compare_server_default(mut self, enabled: bool) -> Self {
        self.compare_server_default = enabled;
        self
    }

    /// Enable or disable comment comparison.
    pub fn compare_comments(mut self, enabled: bool) -> Self {
        self.compare_comments = enabled;
        self
    }

    /// Install a user type comparator, consulted before the dialect's.
    pub fn type_comparator(mut self, hook: TypeComparator) -> Self {
        self.type_comparator = Some(hook);
        self
    }

    /// Install a user default comparator, consulted before the dialect's.
    pub fn default_comparator(mut self, hook: DefaultComparator) -> Self {
        self.default_comparator = Some(hook);
        self
    }

    /// Use a dialect's comparison hooks and default schema.
    pub fn dialect(mut self, dialect: Arc<DialectCapabilities>) -> Self {
        self.dialect = dialect;
        self
    }

    /// Set the revision marker table, which is never diffed.
    pub fn version_table(mut self, table: Option<TableKey>) -> Self {
        self.version_table = table;
        self
    }

    fn normalize_schema(&self, schema: Option<SmolStr>) -> Option<SmolStr> {
        match (schema, &self.dialect.default_schema) {
            (Some(s), Some(default)) if s == *default => None,
            (schema, _) => schema,
        }
    }
}

/// Ordered result of a diff.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDiff {
    /// Operations in execution order.
    pub operations: Vec<Operation>,
}

impl SchemaDiff {
    /// Check if there are any differences.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Take the operations.
    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }

    /// Get a human-readable summary of the diff.
    pub fn summary(&self) -> String {
        if self.operations.is_empty() {
            return "No changes detected".to_string();
        }
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for op in &self.operations {
            *counts.entry(op.name()).or_default() += 1;
        }
        counts
            .into_iter()
            .map(|(name, n)| format!("{} {}", n, name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Schema differ for comparing a reflected snapshot with a target snapshot.
#[derive(Debug, Clone, Default)]
pub struct SchemaDiffer {
    options: DiffOptions,
}

impl SchemaDiffer {
    /// Create a differ.
    pub fn new(options: DiffOptions) -> Self {
        Self { options }
    }

    /// Get the options.
    pub fn options(&self) -> &DiffOptions {
        &self.options
    }

    /// Compute the operations that turn `reflected` into `target`.
    ///
    /// A filter error aborts the whole diff; no partial result is returned.
    pub fn diff(&self, reflected: &SchemaSnapshot, target: &SchemaSnapshot) -> MigrateResult<SchemaDiff> {
        let reflected = self.scope(reflected);
        let target = self.scope(target);
        let mut run = DiffRun {
            options: &self.options,
            ops: Vec::new(),
            vetoed: BTreeSet::new(),
        };

        let mut removed = Vec::new();
        let mut added = Vec::new();
        let mut existing = Vec::new();
        for (key, table) in &reflected {
            if target.contains_key(key) {
                continue;
            }
            if run.include_table(key, table, true, None)? {
                removed.push(table);
            } else {
                run.vetoed.insert(key.clone());
            }
        }
        for (key, table) in &target {
            match reflected.get(key) {
                None => {
                    if run.include_table(key, table, false, None)? {
                        added.push(table);
                    } else {
                        run.vetoed.insert(key.clone());
                    }
                }
                Some(conn) => {
                    if run.include_table(key, table, false, Some(conn))? {
                        existing.push((key, conn, table));
                    } else {
                        run.vetoed.insert(key.clone());
                    }
                }
            }
        }

        removed.sort_by_key(|t| t.key());
        for table in sort_tables_by_dependency(removed).into_iter().rev() {
            run.remove_table(table)?;
        }
        let added = sort_tables_by_dependency(added);
        let mut pending: BTreeSet<TableKey> = added.iter().map(|t| t.key()).collect();
        let mut deferred = Vec::new();
        for table in added {
            pending.remove(&table.key());
            run.add_table(table, &pending, &mut deferred)?;
        }
        run.ops.extend(deferred);
        existing.sort_by(|a, b| a.0.cmp(b.0));
        for (key, conn, table) in existing {
            run.compare_table(key, conn, table)?;
        }

        let operations = order_operations(run.ops);
        debug!("Diff produced {} operations", operations.len());
        Ok(SchemaDiff { operations })
    }

    fn scope(&self, snapshot: &SchemaSnapshot) -> IndexMap<TableKey, Table> {
        let version_table = self.options.version_table.clone().map(|mut key| {
            key.schema = self.options.normalize_schema(key.schema.take());
            key
        });
        let mut scoped = IndexMap::new();
        for table in snapshot.tables() {
            let mut table = table.clone();
            table.schema = self.options.normalize_schema(table.schema.take());
            for fk in &mut table.foreign_keys {
                fk.referred_table.schema = self.options.normalize_schema(fk.referred_table.schema.take());
            }
            if table.schema.is_some() && !self.options.include_schemas {
                continue;
            }
            let key = table.key();
            if version_table.as_ref() == Some(&key) {
                continue;
            }
            scoped.insert(key, table);
        }
        scoped
    }
}

struct DiffRun<'o> {
    options: &'o DiffOptions,
    ops: Vec<Operation>,
    vetoed: BTreeSet<TableKey>,
}

impl DiffRun<'_> {
    fn include(&self, candidate: FilterCandidate<'_>) -> MigrateResult<bool> {
        for filter in &self.options.filters {
            if !filter.include(&candidate).map_err(MigrationError::filter)? {
                debug!(
                    "Filtered out {} '{}' on '{}'",
                    candidate.kind,
                    candidate.name.unwrap_or("<unnamed>"),
                    candidate.table
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn include_table(
        &self,
        key: &TableKey,
        table: &Table,
        reflected: bool,
        counterpart: Option<&Table>,
    ) -> MigrateResult<bool> {
        self.include(FilterCandidate {
            object: SchemaObject::Table(table),
            name: Some(table.name()),
            kind: ObjectKind::Table,
            reflected,
            counterpart: counterpart.map(SchemaObject::Table),
            table: key,
        })
    }

    fn include_column(
        &self,
        key: &TableKey,
        column: &Column,
        reflected: bool,
        counterpart: Option<&Column>,
    ) -> MigrateResult<bool> {
        self.include(FilterCandidate {
            object: SchemaObject::Column(column),
            name: Some(column.name()),
            kind: ObjectKind::Column,
            reflected,
            counterpart: counterpart.map(SchemaObject::Column),
            table: key,
        })
    }

    fn include_constraint(
        &self,
        key: &TableKey,
        constraint: &Constraint,
        reflected: bool,
        counterpart: Option<&Constraint>,
    ) -> MigrateResult<bool> {
        if let Some(referred) = constraint.referred_table()
            && self.vetoed.contains(referred)
        {
            return Ok(false);
        }
        self.include(FilterCandidate {
            object: SchemaObject::Constraint(constraint),
            name: constraint.name(),
            kind: ObjectKind::of(constraint),
            reflected,
            counterpart: counterpart.map(SchemaObject::Constraint),
            table: key,
        })
    }

    fn include_index(
        &self,
        key: &TableKey,
        index: &Index,
        reflected: bool,
        counterpart: Option<&Index>,
    ) -> MigrateResult<bool> {
        self.include(FilterCandidate {
            object: SchemaObject::Index(index),
            name: Some(index.name.as_str()),
            kind: ObjectKind::Index,
            reflected,
            counterpart: counterpart.map(SchemaObject::Index),
            table: key,
        })
    }

    /// The table as carried by an add/remove table operation: indexes are
    /// emitted separately and foreign keys to vetoed tables are dropped.
    fn table_for_op(&self, table: &Table) -> Table {
        let mut table = table.clone();
        table.indexes.clear();
        table
            .foreign_keys
            .retain(|fk| !self.vetoed.contains(&fk.referred_table));
        table
    }

    fn remove_table(&mut self, table: &Table) -> MigrateResult<()> {
        let key = table.key();
        info!("Detected removed table '{}'", key);
        for index in &table.indexes {
            if self.include_index(&key, index, true, None)? {
                self.ops.push(Operation::RemoveIndex {
                    table: key.clone(),
                    index: index.clone(),
                });
            }
        }
        let table = self.table_for_op(table);
        self.ops.push(Operation::RemoveTable { table });
        Ok(())
    }

    /// Foreign keys to tables in `pending` (added but not created yet) are
    /// split off into `deferred` as separate constraint additions.
    fn add_table(
        &mut self,
        table: &Table,
        pending: &BTreeSet<TableKey>,
        deferred: &mut Vec<Operation>,
    ) -> MigrateResult<()> {
        let key = table.key();
        info!("Detected added table '{}'", key);
        let mut created = self.table_for_op(table);
        let (late, inline): (Vec<_>, Vec<_>) = created
            .foreign_keys
            .drain(..)
            .partition(|fk| pending.contains(&fk.referred_table));
        created.foreign_keys = inline;
        self.ops.push(Operation::AddTable { table: created });
        for fk in late {
            info!(
                "Deferred foreign key {:?} on '{}' until '{}' is created",
                fk.columns, key, fk.referred_table
            );
            deferred.push(Operation::AddConstraint {
                table: key.clone(),
                constraint: fk.into(),
            });
        }
        for index in &table.indexes {
            if self.include_index(&key, index, false, None)? {
                info!("Detected added index '{}' on '{}'", index.name, key);
                self.ops.push(Operation::AddIndex {
                    table: key.clone(),
                    index: index.clone(),
                });
            }
        }
        Ok(())
    }

    fn compare_table(&mut self, key: &TableKey, conn: &Table, meta: &Table) -> MigrateResult<()> {
        let mut removals = Vec::new();
        let mut additions = Vec::new();
        self.compare_primary_key(key, conn, meta, &mut removals, &mut additions)?;
        self.compare_foreign_keys(key, conn, meta, &mut removals, &mut additions)?;
        self.compare_uniques_and_indexes(key, conn, meta, &mut removals, &mut additions)?;
        self.compare_checks(key, conn, meta, &mut removals, &mut additions)?;

        let mut column_removals = Vec::new();
        let mut modifications = Vec::new();
        let mut column_additions = Vec::new();

        let mut dropped: Vec<&Column> = conn
            .columns
            .values()
            .filter(|c| !meta.columns.contains_key(&c.name))
            .collect();
        dropped.sort_by(|a, b| a.name.cmp(&b.name));
        for column in dropped {
            if self.include_column(key, column, true, None)? {
                info!("Detected removed column '{}.{}'", key, column.name);
                column_removals.push(Operation::RemoveColumn {
                    table: key.clone(),
                    column: column.clone(),
                });
            }
        }

        for column in meta.columns.values() {
            match conn.columns.get(&column.name) {
                None => {
                    if self.include_column(key, column, false, None)? {
                        info!("Detected added column '{}.{}'", key, column.name);
                        column_additions.push(Operation::AddColumn {
                            table: key.clone(),
                            column: column.clone(),
                        });
                    }
                }
                Some(conn_col) => {
                    if self.include_column(key, column, false, Some(conn_col))?
                        && let Some(op) = self.compare_column(key, conn, meta, conn_col, column)
                    {
                        modifications.push(op);
                    }
                }
            }
        }

        self.ops.extend(removals);
        self.ops.extend(column_removals);
        self.ops.extend(modifications);
        self.ops.extend(column_additions);
        self.ops.extend(additions);
        Ok(())
    }

    fn compare_column(
        &self,
        key: &TableKey,
        conn_table: &Table,
        meta_table: &Table,
        conn: &Column,
        meta: &Column,
    ) -> Option<Operation> {
        let options = self.options;
        let mut changes = ColumnChanges::default();

        if options.compare_type {
            if conn.sql_type.is_null() {
                info!("Couldn't determine database type for column '{}.{}'", key, conn.name);
            } else if meta.sql_type.is_null() {
                info!("Column '{}.{}' has no type within the model; can't compare", key, meta.name);
            } else {
                let hooks = options
                    .type_comparator
                    .iter()
                    .chain(options.dialect.compare_type.iter());
                if compare_types(hooks, conn, meta) {
                    info!(
                        "Detected type change from {} to {} on '{}.{}'",
                        conn.sql_type, meta.sql_type, key, meta.name
                    );
                    changes.type_ = Some(Change::new(conn.sql_type.clone(), meta.sql_type.clone()));
                }
            }
        }

        let conn_nullable = conn.nullable && !conn_table.is_primary_key_column(&conn.name);
        let meta_nullable = meta.nullable && !meta_table.is_primary_key_column(&meta.name);
        if conn_nullable != meta_nullable {
            info!(
                "Detected {} on column '{}.{}'",
                if meta_nullable { "NULL" } else { "NOT NULL" },
                key,
                meta.name
            );
            changes.nullable = Some(Change::new(conn_nullable, meta_nullable));
        }

        if options.compare_server_default {
            let reflected_default = options.dialect.reflected_default(key, conn);
            let generated = meta.server_default.is_none()
                && meta_table
                    .autoincrement_column()
                    .is_some_and(|c| c.name == meta.name);
            if !generated && (reflected_default.is_some() || meta.server_default.is_some()) {
                let ctx = DefaultComparison {
                    table: meta_table,
                    reflected: conn,
                    target: meta,
                    reflected_default: reflected_default.as_ref(),
                    target_default: meta.server_default.as_ref(),
                };
                let hooks = options
                    .default_comparator
                    .iter()
                    .chain(options.dialect.compare_server_default.iter());
                if compare_server_defaults(hooks, &ctx) {
                    info!("Detected server default on column '{}.{}'", key, meta.name);
                    changes.server_default = Some(Change::new(
                        conn.server_default.clone(),
                        meta.server_default.clone(),
                    ));
                }
            }
        }

        if options.compare_comments && conn.comment != meta.comment {
            info!("Detected column comment '{}.{}'", key, meta.name);
            changes.comment = Some(Change::new(conn.comment.clone(), meta.comment.clone()));
        }

        if changes.is_empty() {
            return None;
        }
        let mut existing = ExistingColumn::of(conn);
        existing.nullable = conn_nullable;
        Some(Operation::ModifyColumn {
            table: key.clone(),
            column: meta.name.clone(),
            existing,
            changes,
        })
    }

    fn push_remove(
        &self,
        key: &TableKey,
        constraint: Constraint,
        counterpart: Option<&Constraint>,
        removals: &mut Vec<Operation>,
    ) -> MigrateResult<()> {
        if self.include_constraint(key, &constraint, true, counterpart)? {
            removals.push(Operation::RemoveConstraint {
                table: key.clone(),
                constraint,
            });
        }
        Ok(())
    }

    fn push_add(
        &self,
        key: &TableKey,
        constraint: Constraint,
        counterpart: Option<&Constraint>,
        additions: &mut Vec<Operation>,
    ) -> MigrateResult<()> {
        if self.include_constraint(key, &constraint, false, counterpart)? {
            additions.push(Operation::AddConstraint {
                table: key.clone(),
                constraint,
            });
        }
        Ok(())
    }

    fn compare_primary_key(
        &self,
        key: &TableKey,
        conn: &Table,
        meta: &Table,
        removals: &mut Vec<Operation>,
        additions: &mut Vec<Operation>,
    ) -> MigrateResult<()> {
        match (&conn.primary_key, &meta.primary_key) {
            (Some(c), Some(m)) if c.columns != m.columns => {
                info!(
                    "Detected changed primary key on '{}': {:?} to {:?}",
                    key, c.columns, m.columns
                );
                let (c, m): (Constraint, Constraint) = (c.clone().into(), m.clone().into());
                self.push_remove(key, c.clone(), Some(&m), removals)?;
                self.push_add(key, m, Some(&c), additions)?;
            }
            (Some(c), None) => {
                info!("Detected removed primary key on '{}'", key);
                self.push_remove(key, c.clone().into(), None, removals)?;
            }
            (None, Some(m)) => {
                info!("Detected added primary key on '{}'", key);
                self.push_add(key, m.clone().into(), None, additions)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn compare_foreign_keys(
        &self,
        key: &TableKey,
        conn: &Table,
        meta: &Table,
        removals: &mut Vec<Operation>,
        additions: &mut Vec<Operation>,
    ) -> MigrateResult<()> {
        let signatures = |fks: &[ForeignKeyConstraint]| -> Vec<_> {
            fks.iter().map(ForeignKeyConstraint::signature).collect()
        };
        let conn_sigs = signatures(&conn.foreign_keys);
        let meta_sigs = signatures(&meta.foreign_keys);

        // a changed foreign key keeps its name, so that is how the two sides pair up
        let same_name = |fks: &[ForeignKeyConstraint], fk: &ForeignKeyConstraint| -> Option<Constraint> {
            fk.name.as_ref().and_then(|name| {
                fks.iter()
                    .find(|other| other.name.as_ref() == Some(name))
                    .map(|other| other.clone().into())
            })
        };

        for (fk, sig) in conn.foreign_keys.iter().zip(&conn_sigs) {
            if !meta_sigs.contains(sig) {
                info!("Detected removed foreign key {:?} on table '{}'", fk.columns, key);
                let counterpart = same_name(&meta.foreign_keys, fk);
                self.push_remove(key, fk.clone().into(), counterpart.as_ref(), removals)?;
            }
        }
        for (fk, sig) in meta.foreign_keys.iter().zip(&meta_sigs) {
            if !conn_sigs.contains(sig) {
                info!(
                    "Detected added foreign key ({:?})({:?}) on table '{}'",
                    fk.columns, fk.target_fullnames(), key
                );
                let counterpart = same_name(&conn.foreign_keys, fk);
                self.push_add(key, fk.clone().into(), counterpart.as_ref(), additions)?;
            }
        }
        Ok(())
    }

    fn compare_uniques_and_indexes(
        &self,
        key: &TableKey,
        conn: &Table,
        meta: &Table,
        removals: &mut Vec<Operation>,
        additions: &mut Vec<Operation>,
    ) -> MigrateResult<()> {
        let conn_uq = &conn.unique_constraints;
        let meta_uq = &meta.unique_constraints;
        let mut conn_uq_matched = vec![false; conn_uq.len()];
        let mut meta_uq_matched = vec![false; meta_uq.len()];

        for (mi, m) in meta_uq.iter().enumerate() {
            let found = conn_uq
                .iter()
                .enumerate()
                .position(|(ci, c)| !conn_uq_matched[ci] && unique_matches(m, c));
            if let Some(ci) = found {
                conn_uq_matched[ci] = true;
                meta_uq_matched[mi] = true;
                let c = &conn_uq[ci];
                if c.columns != m.columns {
                    info!(
                        "Detected changed unique constraint {:?} on '{}': columns {:?} to {:?}",
                        m.name, key, c.columns, m.columns
                    );
                    let (c, m): (Constraint, Constraint) = (c.clone().into(), m.clone().into());
                    self.push_remove(key, c.clone(), Some(&m), removals)?;
                    self.push_add(key, m, Some(&c), additions)?;
                }
            }
        }

        // Backends may report a unique constraint as a unique index, or the
        // other way round. Equal column sets count as the same object.
        let mut conn_ix_claimed = vec![false; conn.indexes.len()];
        for (ci, index) in conn.indexes.iter().enumerate().filter(|(_, i)| i.unique) {
            let set = index.column_set();
            if let Some(mi) = meta_uq.iter().position(|u| u.column_set() == set) {
                conn_ix_claimed[ci] = true;
                meta_uq_matched[mi] = true;
            }
        }
        let mut meta_ix_claimed = vec![false; meta.indexes.len()];
        for (mi, index) in meta.indexes.iter().enumerate().filter(|(_, i)| i.unique) {
            let set = index.column_set();
            if let Some(ci) = conn_uq.iter().position(|u| u.column_set() == set) {
                meta_ix_claimed[mi] = true;
                conn_uq_matched[ci] = true;
            }
        }

        for (c, _) in conn_uq.iter().zip(&conn_uq_matched).filter(|(_, m)| !**m) {
            if c.name.is_none() {
                debug!("Skipping unnamed reflected unique constraint {:?} on '{}'", c.columns, key);
                continue;
            }
            info!("Detected removed unique constraint {:?} on '{}'", c.name, key);
            self.push_remove(key, c.clone().into(), None, removals)?;
        }
        for (m, _) in meta_uq.iter().zip(&meta_uq_matched).filter(|(_, m)| !**m) {
            info!("Detected added unique constraint {:?} on {:?}", m.name, m.columns);
            self.push_add(key, m.clone().into(), None, additions)?;
        }

        for (ci, index) in conn.indexes.iter().enumerate() {
            match meta.get_index(&index.name) {
                Some(m) => {
                    if m.unique != index.unique || m.columns != index.columns {
                        info!(
                            "Detected changed index '{}' on '{}': unique={} to unique={}, columns {:?} to {:?}",
                            index.name, key, index.unique, m.unique, index.columns, m.columns
                        );
                        if self.include_index(key, index, true, Some(m))? {
                            removals.push(Operation::RemoveIndex {
                                table: key.clone(),
                                index: index.clone(),
                            });
                        }
                        if self.include_index(key, m, false, Some(index))? {
                            additions.push(Operation::AddIndex {
                                table: key.clone(),
                                index: m.clone(),
                            });
                        }
                    }
                }
                None if conn_ix_claimed[ci] => {}
                None => {
                    if self.include_index(key, index, true, None)? {
                        info!("Detected removed index '{}' on '{}'", index.name, key);
                        removals.push(Operation::RemoveIndex {
                            table: key.clone(),
                            index: index.clone(),
                        });
                    }
                }
            }
        }
        for (mi, index) in meta.indexes.iter().enumerate() {
            if meta_ix_claimed[mi] || conn.get_index(&index.name).is_some() {
                continue;
            }
            if self.include_index(key, index, false, None)? {
                info!("Detected added index '{}' on {:?}", index.name, index.columns);
                additions.push(Operation::AddIndex {
                    table: key.clone(),
                    index: index.clone(),
                });
            }
        }
        Ok(())
    }

    fn compare_checks(
        &self,
        key: &TableKey,
        conn: &Table,
        meta: &Table,
        removals: &mut Vec<Operation>,
        additions: &mut Vec<Operation>,
    ) -> MigrateResult<()> {
        let named = |t: &Table, name: &SmolStr| {
            t.check_constraints
                .iter()
                .any(|c| c.name.as_ref() == Some(name))
        };
        for check in &conn.check_constraints {
            // unnamed reflected checks cannot be matched reliably
            if let Some(name) = &check.name
                && !named(meta, name)
            {
                info!("Detected removed check constraint '{}' on '{}'", name, key);
                self.push_remove(key, check.clone().into(), None, removals)?;
            }
        }
        for check in &meta.check_constraints {
            match &check.name {
                Some(name) if !named(conn, name) => {
                    info!("Detected added check constraint '{}' on '{}'", name, key);
                    self.push_add(key, check.clone().into(), None, additions)?;
                }
                Some(_) => {}
                None => debug!("Skipping unnamed check constraint on '{}'", key),
            }
        }
        Ok(())
    }
}

/// Unique constraints match by name when both are named, else by column set.
fn unique_matches(a: &UniqueConstraint, b: &UniqueConstraint) -> bool {
    match (&a.name, &b.name) {
        (Some(x), Some(y)) => x == y,
        _ => a.column_set() == b.column_set(),
    }
}

fn fk_targets_column(op: &Operation, table: &TableKey, column: &str) -> bool {
    let targets = |fk: &ForeignKeyConstraint| {
        fk.referred_table == *table && fk.referred_columns.iter().any(|c| c == column)
    };
    match op {
        Operation::AddConstraint {
            constraint: Constraint::ForeignKey(fk),
            ..
        }
        | Operation::RemoveConstraint {
            constraint: Constraint::ForeignKey(fk),
            ..
        } => targets(fk),
        Operation::AddTable { table: t } | Operation::RemoveTable { table: t } => {
            t.foreign_keys.iter().any(targets)
        }
        _ => false,
    }
}

/// Whether `first` has to run before `then`.
fn must_precede(first: &Operation, then: &Operation) -> bool {
    match first {
        Operation::AddTable { table } => {
            let key = table.key();
            (then.is_add() && then.referenced_tables().contains(&key))
                || (!matches!(then, Operation::AddTable { .. }) && then.table_key() == key)
        }
        Operation::AddColumn { table, column } => {
            then.is_add()
                && ((then.table_key() == *table && then.used_columns().contains(&column.name))
                    || fk_targets_column(then, table, &column.name))
        }
        _ if !first.is_add() => match then {
            Operation::RemoveTable { table } => {
                let key = table.key();
                first.table_key() == key || first.referenced_tables().contains(&key)
            }
            Operation::RemoveColumn { table, column } => {
                (first.table_key() == *table && first.used_columns().contains(&column.name))
                    || fk_targets_column(first, table, &column.name)
            }
            _ => false,
        },
        _ => false,
    }
}

/// Stable topological ordering: operations keep their emitted order unless a
/// dependency forces one later. Cycles are broken at the earliest operation.
fn order_operations(ops: Vec<Operation>) -> Vec<Operation> {
    let n = ops.len();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];
    for i in 0..n {
        for j in 0..n {
            if i != j && must_precede(&ops[i], &ops[j]) {
                successors[i].push(j);
                in_degree[j] += 1;
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
        .filter(|&i| in_degree[i] == 0)
        .map(Reverse)
        .collect();
    let mut placed = vec![false; n];
    let mut order = Vec::with_capacity(n);
    while order.len() < n {
        let next = match ready.pop() {
            Some(Reverse(i)) => i,
            None => match (0..n).find(|&i| !placed[i]) {
                Some(i) => {
                    warn!("Operation dependency cycle at '{}' on '{}'", ops[i].name(), ops[i].table_key());
                    i
                }
                None => break,
            },
        };
        if placed[next] {
            continue;
        }
        placed[next] = true;
        order.push(next);
        for &j in &successors[next] {
            if !placed[j] {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    ready.push(Reverse(j));
                }
            }
        }
    }

    let mut slots: Vec<Option<Operation>> = ops.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::Comparison;
    use keel_schema::{CheckConstraint, ServerDefault, SqlType, TypeAffinity};
    use pretty_assertions::assert_eq;

    fn user() -> Table {
        Table::new("user")
            .with_column(Column::new("id", SqlType::integer()).not_null())
            .with_column(Column::new("name", SqlType::string(Some(50))))
            .with_primary_key(["id"])
    }

    fn order() -> Table {
        Table::new("order")
            .with_column(Column::new("order_id", SqlType::integer()).not_null())
            .with_primary_key(["order_id"])
    }

    fn diff(reflected: &SchemaSnapshot, target: &SchemaSnapshot) -> Vec<Operation> {
        SchemaDiffer::default()
            .diff(reflected, target)
            .unwrap()
            .into_operations()
    }

    fn names(ops: &[Operation]) -> Vec<String> {
        ops.iter()
            .map(|op| format!("{}:{}", op.name(), op.table_key()))
            .collect()
    }

    fn position(ops: &[Operation], pred: impl Fn(&Operation) -> bool) -> usize {
        ops.iter().position(pred).unwrap()
    }

    #[test]
    fn test_identical_snapshots_produce_nothing() {
        let snapshot = SchemaSnapshot::new()
            .with_table(user().with_index(Index::new("ix_name", ["name"])))
            .with_table(order());
        let result = SchemaDiffer::default().diff(&snapshot, &snapshot).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.summary(), "No changes detected");
    }

    #[test]
    fn test_added_tables_follow_referenced_tables() {
        let item = Table::new("item")
            .with_column(Column::new("id", SqlType::integer()).not_null())
            .with_column(Column::new("order_id", SqlType::integer()))
            .with_primary_key(["id"])
            .with_foreign_key(ForeignKeyConstraint::new(["order_id"], TableKey::new("order"), ["order_id"]))
            .with_index(Index::new("ix_item_order", ["order_id"]));
        // item is declared before the table it references
        let target = SchemaSnapshot::new().with_table(item).with_table(order());
        let ops = diff(&SchemaSnapshot::new(), &target);
        assert_eq!(
            names(&ops),
            vec!["add_table:order", "add_table:item", "add_index:item"]
        );
        match &ops[1] {
            Operation::AddTable { table } => assert!(table.indexes.is_empty()),
            _ => panic!("Expected AddTable"),
        }
    }

    #[test]
    fn test_removed_tables_drop_referencing_first() {
        let item = Table::new("item")
            .with_column(Column::new("id", SqlType::integer()))
            .with_column(Column::new("order_id", SqlType::integer()))
            .with_foreign_key(ForeignKeyConstraint::new(["order_id"], TableKey::new("order"), ["order_id"]))
            .with_index(Index::new("ix_item_order", ["order_id"]));
        let reflected = SchemaSnapshot::new().with_table(order()).with_table(item);
        let ops = diff(&reflected, &SchemaSnapshot::new());
        assert_eq!(
            names(&ops),
            vec!["remove_index:item", "remove_table:item", "remove_table:order"]
        );
    }

    #[test]
    fn test_column_changes_in_order() {
        let reflected = SchemaSnapshot::new().with_table(
            user().with_column(Column::new("pw", SqlType::string(Some(50)))),
        );
        let target = SchemaSnapshot::new().with_table(
            Table::new("user")
                .with_column(Column::new("id", SqlType::integer()).not_null())
                .with_column(Column::new("name", SqlType::string(Some(50))).not_null())
                .with_column(Column::new("a1", SqlType::text()).default_literal("x"))
                .with_primary_key(["id"]),
        );
        let ops = diff(&reflected, &target);
        assert_eq!(
            names(&ops),
            vec!["remove_column:user", "modify_column:user", "add_column:user"]
        );
        match &ops[1] {
            Operation::ModifyColumn { column, changes, existing, .. } => {
                assert_eq!(column, "name");
                assert_eq!(changes.nullable, Some(Change::new(true, false)));
                assert!(changes.type_.is_none());
                assert!(changes.server_default.is_none());
                assert_eq!(existing.sql_type, SqlType::string(Some(50)));
            }
            _ => panic!("Expected ModifyColumn"),
        }
    }

    #[test]
    fn test_null_type_never_differs() {
        let reflected = SchemaSnapshot::new().with_table(
            Table::new("t").with_column(Column::new("c", SqlType::null())),
        );
        let target = SchemaSnapshot::new().with_table(
            Table::new("t").with_column(Column::new("c", SqlType::integer())),
        );
        assert!(diff(&reflected, &target).is_empty());
        assert!(diff(&target, &reflected).is_empty());
    }

    #[test]
    fn test_type_change_and_user_comparator() {
        let reflected = SchemaSnapshot::new().with_table(
            Table::new("t").with_column(Column::new("c", SqlType::integer())),
        );
        let target = SchemaSnapshot::new().with_table(
            Table::new("t").with_column(Column::new("c", SqlType::string(Some(10)))),
        );
        let ops = diff(&reflected, &target);
        assert_eq!(names(&ops), vec!["modify_column:t"]);

        let same: TypeComparator = Arc::new(|_: &Column, _: &Column| Comparison::Same);
        let differ = SchemaDiffer::new(DiffOptions::new().type_comparator(same));
        assert!(differ.diff(&reflected, &target).unwrap().is_empty());

        let differ = SchemaDiffer::new(DiffOptions::new().compare_type(false));
        assert!(differ.diff(&reflected, &target).unwrap().is_empty());
    }

    #[test]
    fn test_autoincrement_default_ignored() {
        let reflected = SchemaSnapshot::new().with_table(
            Table::new("t")
                .with_column(
                    Column::new("id", SqlType::integer())
                        .not_null()
                        .default_expression("nextval('t_id_seq'::regclass)"),
                )
                .with_primary_key(["id"]),
        );
        let target = SchemaSnapshot::new().with_table(
            Table::new("t")
                .with_column(Column::new("id", SqlType::integer()).not_null())
                .with_primary_key(["id"]),
        );
        assert!(diff(&reflected, &target).is_empty());
    }

    #[test]
    fn test_server_default_change() {
        let reflected = SchemaSnapshot::new().with_table(
            Table::new("t").with_column(Column::new("c", SqlType::string(None)).default_literal("a")),
        );
        let target = SchemaSnapshot::new().with_table(
            Table::new("t").with_column(Column::new("c", SqlType::string(None)).default_literal("b")),
        );
        let ops = diff(&reflected, &target);
        match &ops[..] {
            [Operation::ModifyColumn { changes, .. }] => {
                assert_eq!(
                    changes.server_default,
                    Some(Change::new(
                        Some(ServerDefault::literal("a")),
                        Some(ServerDefault::literal("b"))
                    ))
                );
            }
            other => panic!("Expected one ModifyColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_primary_key_change_is_remove_and_add() {
        let base = Table::new("t")
            .with_column(Column::new("a", SqlType::integer()).not_null())
            .with_column(Column::new("b", SqlType::integer()).not_null());
        let reflected = SchemaSnapshot::new().with_table(base.clone().with_primary_key(["a"]));
        let target = SchemaSnapshot::new().with_table(base.with_primary_key(["a", "b"]));
        let ops = diff(&reflected, &target);
        assert_eq!(names(&ops), vec!["remove_constraint:t", "add_constraint:t"]);
    }

    #[test]
    fn test_foreign_keys_match_ignoring_names() {
        let item = |fk: ForeignKeyConstraint| {
            Table::new("item")
                .with_column(Column::new("order_id", SqlType::integer()))
                .with_foreign_key(fk)
        };
        let fk = ForeignKeyConstraint::new(["order_id"], TableKey::new("order"), ["order_id"]);
        let reflected = SchemaSnapshot::new()
            .with_table(order())
            .with_table(item(fk.clone().named("item_order_id_fkey")));
        let target = SchemaSnapshot::new().with_table(order()).with_table(item(fk));
        assert!(diff(&reflected, &target).is_empty());
    }

    #[test]
    fn test_unique_constraint_matches_unique_index() {
        let base = Table::new("t").with_column(Column::new("code", SqlType::string(Some(10))));
        let reflected = SchemaSnapshot::new()
            .with_table(base.clone().with_index(Index::new("t_code_key", ["code"]).unique()));
        let target = SchemaSnapshot::new()
            .with_table(base.with_unique(UniqueConstraint::new(["code"]).named("uq_code")));
        assert!(diff(&reflected, &target).is_empty());
        assert!(diff(&target, &reflected).is_empty());
    }

    #[test]
    fn test_unique_added_and_removed() {
        let base = Table::new("t")
            .with_column(Column::new("a", SqlType::integer()))
            .with_column(Column::new("b", SqlType::integer()));
        let reflected = SchemaSnapshot::new()
            .with_table(base.clone().with_unique(UniqueConstraint::new(["a"]).named("uq_a")));
        let target = SchemaSnapshot::new()
            .with_table(base.with_unique(UniqueConstraint::new(["b"]).named("uq_b")));
        let ops = diff(&reflected, &target);
        assert_eq!(names(&ops), vec!["remove_constraint:t", "add_constraint:t"]);
    }

    #[test]
    fn test_check_constraints_by_name() {
        let base = Table::new("t").with_column(Column::new("x", SqlType::integer()));
        let reflected = SchemaSnapshot::new().with_table(
            base.clone()
                .with_check(CheckConstraint::new("x > 0"))
                .with_check(CheckConstraint::new("x < 10").named("ck_old")),
        );
        let target = SchemaSnapshot::new().with_table(
            base.with_check(CheckConstraint::new("x>0 AND x<100").named("ck_new"))
                .with_check(CheckConstraint::new("x <> 5")),
        );
        let ops = diff(&reflected, &target);
        let touched: Vec<Option<&str>> = ops
            .iter()
            .map(|op| match op {
                Operation::AddConstraint { constraint, .. }
                | Operation::RemoveConstraint { constraint, .. } => constraint.name(),
                _ => None,
            })
            .collect();
        assert_eq!(touched, vec![Some("ck_old"), Some("ck_new")]);
        assert_eq!(ops[0].name(), "remove_constraint");
    }

    #[test]
    fn test_index_change_is_remove_and_add() {
        let base = Table::new("t")
            .with_column(Column::new("a", SqlType::integer()))
            .with_column(Column::new("b", SqlType::integer()));
        let reflected = SchemaSnapshot::new().with_table(base.clone().with_index(Index::new("ix", ["a"])));
        let target = SchemaSnapshot::new().with_table(base.with_index(Index::new("ix", ["a"]).unique()));
        let ops = diff(&reflected, &target);
        assert_eq!(names(&ops), vec!["remove_index:t", "add_index:t"]);
    }

    #[test]
    fn test_new_column_precedes_its_index() {
        let reflected = SchemaSnapshot::new().with_table(user());
        let target = SchemaSnapshot::new().with_table(
            user()
                .with_column(Column::new("email", SqlType::string(Some(100))))
                .with_index(Index::new("ix_email", ["email"])),
        );
        let ops = diff(&reflected, &target);
        assert_eq!(names(&ops), vec!["add_column:user", "add_index:user"]);
    }

    #[test]
    fn test_foreign_key_to_new_table_follows_it() {
        let reflected = SchemaSnapshot::new().with_table(user());
        let target = SchemaSnapshot::new()
            .with_table(
                user()
                    .with_column(Column::new("order_id", SqlType::integer()))
                    .with_foreign_key(ForeignKeyConstraint::new(
                        ["order_id"],
                        TableKey::new("order"),
                        ["order_id"],
                    )),
            )
            .with_table(order());
        let ops = diff(&reflected, &target);
        let table = position(&ops, |op| matches!(op, Operation::AddTable { .. }));
        let column = position(&ops, |op| matches!(op, Operation::AddColumn { .. }));
        let fk = position(&ops, |op| matches!(op, Operation::AddConstraint { .. }));
        assert!(table < fk);
        assert!(column < fk);
    }

    #[test]
    fn test_removed_table_follows_fk_removal() {
        let with_fk = user()
            .with_column(Column::new("order_id", SqlType::integer()))
            .with_foreign_key(ForeignKeyConstraint::new(["order_id"], TableKey::new("order"), ["order_id"]));
        let reflected = SchemaSnapshot::new().with_table(order()).with_table(with_fk);
        let target = SchemaSnapshot::new().with_table(user());
        let ops = diff(&reflected, &target);
        let fk = position(&ops, |op| matches!(op, Operation::RemoveConstraint { .. }));
        let table = position(&ops, |op| matches!(op, Operation::RemoveTable { .. }));
        assert!(fk < table);
    }

    #[test]
    fn test_filter_veto() {
        let reflected = SchemaSnapshot::new().with_table(
            Table::new("legacy").with_column(Column::new("x", SqlType::integer())),
        );
        let target = SchemaSnapshot::new().with_table(user());
        let differ = SchemaDiffer::new(DiffOptions::new().filter(ExcludeTables::new(["legacy"])));
        let ops = differ.diff(&reflected, &target).unwrap().into_operations();
        assert_eq!(names(&ops), vec!["add_table:user"]);

        let differ = SchemaDiffer::new(
            DiffOptions::new().filter(IncludeSymbol(|name: &str, _: Option<&str>| name != "user")),
        );
        let ops = differ.diff(&reflected, &target).unwrap().into_operations();
        assert_eq!(names(&ops), vec!["remove_table:legacy"]);
    }

    #[test]
    fn test_column_filter() {
        let reflected = SchemaSnapshot::new().with_table(user());
        let target = SchemaSnapshot::new()
            .with_table(user().with_column(Column::new("secret", SqlType::text())));
        let skip_secret = |c: &FilterCandidate<'_>| -> Result<bool, BoxError> {
            Ok(!(c.kind == ObjectKind::Column && c.name == Some("secret")))
        };
        let differ = SchemaDiffer::new(DiffOptions::new().filter(skip_secret));
        assert!(differ.diff(&reflected, &target).unwrap().is_empty());
    }

    #[test]
    fn test_filter_error_aborts() {
        let failing = |_: &FilterCandidate<'_>| -> Result<bool, BoxError> { Err("boom".into()) };
        let differ = SchemaDiffer::new(DiffOptions::new().filter(failing));
        let err = differ
            .diff(&SchemaSnapshot::new(), &SchemaSnapshot::new().with_table(user()))
            .unwrap_err();
        assert!(matches!(err, MigrationError::DiffFilter(_)));
        assert_eq!(std::error::Error::source(&err).unwrap().to_string(), "boom");
    }

    #[test]
    fn test_version_table_and_schemas_excluded() {
        let reflected = SchemaSnapshot::new()
            .with_table(Table::new("keel_version").with_column(Column::new("version_num", SqlType::string(Some(32)))))
            .with_table(Table::new("audit").in_schema("other").with_column(Column::new("x", SqlType::integer())));
        assert!(diff(&reflected, &SchemaSnapshot::new()).is_empty());

        let differ = SchemaDiffer::new(DiffOptions::new().include_schemas(true));
        let ops = differ
            .diff(&reflected, &SchemaSnapshot::new())
            .unwrap()
            .into_operations();
        assert_eq!(names(&ops), vec!["remove_table:other.audit"]);
    }

    #[test]
    fn test_default_schema_normalized() {
        let reflected = SchemaSnapshot::new().with_table(user().in_schema("public"));
        let target = SchemaSnapshot::new().with_table(user());
        let differ = SchemaDiffer::new(DiffOptions::new().dialect(dialect::dialect_or_default("postgresql")));
        assert!(differ.diff(&reflected, &target).unwrap().is_empty());
    }

    #[test]
    fn test_mysql_boolean_equivalence() {
        let reflected = SchemaSnapshot::new().with_table(Table::new("t").with_column(Column::new(
            "flag",
            SqlType::dialect("mysql", "TINYINT", TypeAffinity::Integer).with_kwarg("display_width", 1i64),
        )));
        let target = SchemaSnapshot::new()
            .with_table(Table::new("t").with_column(Column::new("flag", SqlType::boolean())));
        let differ = SchemaDiffer::new(DiffOptions::new().dialect(dialect::dialect_or_default("mysql")));
        assert!(differ.diff(&reflected, &target).unwrap().is_empty());
        assert!(!diff(&reflected, &target).is_empty());
    }

    #[test]
    fn test_summary() {
        let result = SchemaDiffer::default()
            .diff(&SchemaSnapshot::new(), &SchemaSnapshot::new().with_table(user()).with_table(order()))
            .unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.summary(), "2 add_table");
    }

    fn item() -> Table {
        Table::new("item")
            .with_column(Column::new("id", SqlType::integer()).not_null())
            .with_column(Column::new("order_id", SqlType::integer()))
            .with_primary_key(["id"])
            .with_index(Index::new("ix_item_order", ["order_id"]))
    }

    fn skip_kinds(kinds: &'static [ObjectKind]) -> DiffOptions {
        DiffOptions::new().filter(move |c: &FilterCandidate<'_>| -> Result<bool, BoxError> {
            Ok(!kinds.contains(&c.kind))
        })
    }

    #[test]
    fn test_index_filter_on_removed_table() {
        let skip_index = |c: &FilterCandidate<'_>| -> Result<bool, BoxError> {
            Ok(!(c.kind == ObjectKind::Index && c.name == Some("ix_item_order")))
        };
        let reflected = SchemaSnapshot::new().with_table(item());
        let differ = SchemaDiffer::new(DiffOptions::new().filter(skip_index));
        let ops = differ
            .diff(&reflected, &SchemaSnapshot::new())
            .unwrap()
            .into_operations();
        assert_eq!(names(&ops), vec!["remove_table:item"]);
    }

    #[test]
    fn test_index_filter_vetoes_add_and_remove() {
        let base = Table::new("t")
            .with_column(Column::new("a", SqlType::integer()))
            .with_column(Column::new("b", SqlType::integer()));
        let reflected = SchemaSnapshot::new().with_table(base.clone().with_index(Index::new("ix_a", ["a"])));
        let target = SchemaSnapshot::new()
            .with_table(base.with_index(Index::new("ix_b", ["b"])))
            .with_table(item());
        assert_eq!(
            names(&diff(&reflected, &target)),
            vec!["add_table:item", "add_index:item", "remove_index:t", "add_index:t"]
        );

        let differ = SchemaDiffer::new(skip_kinds(&[ObjectKind::Index]));
        let ops = differ.diff(&reflected, &target).unwrap().into_operations();
        assert_eq!(names(&ops), vec!["add_table:item"]);
        let ops = differ.diff(&target, &reflected).unwrap().into_operations();
        assert_eq!(names(&ops), vec!["remove_table:item"]);
    }

    #[test]
    fn test_constraint_filter_vetoes_add_and_remove() {
        let base = Table::new("t")
            .with_column(Column::new("a", SqlType::integer()))
            .with_column(Column::new("b", SqlType::integer()))
            .with_column(Column::new("order_id", SqlType::integer()));
        let reflected = SchemaSnapshot::new().with_table(order()).with_table(
            base.clone()
                .with_unique(UniqueConstraint::new(["a"]).named("uq_a"))
                .with_foreign_key(ForeignKeyConstraint::new(["order_id"], TableKey::new("order"), ["order_id"]))
                .with_check(CheckConstraint::new("a > 0").named("ck_old")),
        );
        let target = SchemaSnapshot::new().with_table(order()).with_table(
            base.with_unique(UniqueConstraint::new(["b"]).named("uq_b"))
                .with_foreign_key(ForeignKeyConstraint::new(["b"], TableKey::new("order"), ["order_id"]))
                .with_check(CheckConstraint::new("b > 0").named("ck_new")),
        );
        assert_eq!(diff(&reflected, &target).len(), 6);

        let differ = SchemaDiffer::new(skip_kinds(&[
            ObjectKind::UniqueConstraint,
            ObjectKind::ForeignKey,
            ObjectKind::CheckConstraint,
        ]));
        assert!(differ.diff(&reflected, &target).unwrap().is_empty());
        assert!(differ.diff(&target, &reflected).unwrap().is_empty());

        let differ = SchemaDiffer::new(skip_kinds(&[ObjectKind::ForeignKey]));
        let ops = differ.diff(&reflected, &target).unwrap().into_operations();
        let kinds: Vec<ObjectKind> = ops
            .iter()
            .filter_map(|op| match op {
                Operation::AddConstraint { constraint, .. }
                | Operation::RemoveConstraint { constraint, .. } => Some(ObjectKind::of(constraint)),
                _ => None,
            })
            .collect();
        assert_eq!(kinds.len(), 4);
        assert!(!kinds.contains(&ObjectKind::ForeignKey));
    }

    #[test]
    fn test_filter_sees_counterparts() {
        let seen: Arc<parking_lot::Mutex<Vec<(ObjectKind, bool, bool)>>> = Arc::default();
        let record = {
            let seen = Arc::clone(&seen);
            move |c: &FilterCandidate<'_>| -> Result<bool, BoxError> {
                let paired = match (c.object, c.counterpart) {
                    (SchemaObject::Index(ix), Some(SchemaObject::Index(other))) => {
                        ix.name == other.name && ix.columns != other.columns
                    }
                    (SchemaObject::Constraint(con), Some(SchemaObject::Constraint(other))) => {
                        ObjectKind::of(con) == ObjectKind::of(other) && con.columns() != other.columns()
                    }
                    _ => false,
                };
                if !matches!(c.kind, ObjectKind::Table | ObjectKind::Column) {
                    seen.lock().push((c.kind, c.reflected, paired));
                }
                Ok(true)
            }
        };

        let base = item().with_column(Column::new("code", SqlType::integer()).not_null());
        let reflected = SchemaSnapshot::new().with_table(base.clone());
        let mut changed = base.with_primary_key(["id", "code"]);
        changed.indexes = vec![Index::new("ix_item_order", ["id"])];
        let target = SchemaSnapshot::new().with_table(changed);

        let differ = SchemaDiffer::new(DiffOptions::new().filter(record));
        let ops = differ.diff(&reflected, &target).unwrap().into_operations();
        assert_eq!(ops.len(), 4);
        assert_eq!(
            *seen.lock(),
            vec![
                (ObjectKind::PrimaryKey, true, true),
                (ObjectKind::PrimaryKey, false, true),
                (ObjectKind::Index, true, true),
                (ObjectKind::Index, false, true),
            ]
        );
    }

    #[test]
    fn test_mutually_referencing_tables_defer_one_foreign_key() {
        let table = |name: &str, other: &str| {
            Table::new(name)
                .with_column(Column::new("id", SqlType::integer()).not_null())
                .with_column(Column::new(format!("{}_id", other), SqlType::integer()))
                .with_primary_key(["id"])
                .with_foreign_key(ForeignKeyConstraint::new(
                    [format!("{}_id", other)],
                    TableKey::new(other),
                    ["id"],
                ))
        };
        let target = SchemaSnapshot::new()
            .with_table(table("a", "b"))
            .with_table(table("b", "a"));
        let ops = diff(&SchemaSnapshot::new(), &target);
        assert_eq!(
            names(&ops),
            vec!["add_table:a", "add_table:b", "add_constraint:a"]
        );
        match (&ops[0], &ops[1]) {
            (Operation::AddTable { table: a }, Operation::AddTable { table: b }) => {
                assert!(a.foreign_keys.is_empty());
                assert_eq!(b.foreign_keys.len(), 1);
            }
            other => panic!("Expected two AddTable, got {:?}", other),
        }

        let mut db = SchemaSnapshot::new();
        for op in &ops {
            op.apply(&mut db).unwrap();
        }
        assert_eq!(db, target);
        for op in ops.iter().rev() {
            op.inverse().apply(&mut db).unwrap();
        }
        assert!(db.is_empty());
    }
}
