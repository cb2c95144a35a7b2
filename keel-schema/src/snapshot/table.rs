//! Table definitions.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use super::{
    Autoincrement, CheckConstraint, Column, Constraint, ForeignKeyConstraint, Index,
    PrimaryKeyConstraint, TypeAffinity, UniqueConstraint,
};

/// Identity of a table: `(schema, name)`. A `None` schema is the default schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableKey {
    /// Schema name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<SmolStr>,
    /// Table name.
    pub name: SmolStr,
}

impl TableKey {
    /// A table in the default schema.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    /// A table in an explicit schema.
    pub fn with_schema(schema: impl Into<SmolStr>, name: impl Into<SmolStr>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Get the table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the schema name.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A table: ordered columns plus constraints, indexes and dialect options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Schema name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<SmolStr>,
    /// Table name.
    pub name: SmolStr,
    /// Columns in declaration order, keyed by storage name.
    #[serde(default)]
    pub columns: IndexMap<SmolStr, Column>,
    /// Primary key, at most one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<PrimaryKeyConstraint>,
    /// Foreign keys.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKeyConstraint>,
    /// Unique constraints.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unique_constraints: Vec<UniqueConstraint>,
    /// Check constraints.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub check_constraints: Vec<CheckConstraint>,
    /// Indexes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<Index>,
    /// Dialect-specific options, e.g. `mysql_engine`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kwargs: BTreeMap<SmolStr, String>,
    /// Table comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Table {
    /// Create an empty table in the default schema.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            columns: IndexMap::new(),
            primary_key: None,
            foreign_keys: Vec::new(),
            unique_constraints: Vec::new(),
            check_constraints: Vec::new(),
            indexes: Vec::new(),
            kwargs: BTreeMap::new(),
            comment: None,
        }
    }

    /// Get the table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The identity key of this table.
    pub fn key(&self) -> TableKey {
        TableKey {
            schema: self.schema.clone(),
            name: self.name.clone(),
        }
    }

    /// Set the schema.
    pub fn in_schema(mut self, schema: impl Into<SmolStr>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Add a column, replacing any column with the same storage name.
    pub fn add_column(&mut self, column: Column) {
        self.columns.insert(column.name.clone(), column);
    }

    /// Builder form of [`Table::add_column`].
    pub fn with_column(mut self, column: Column) -> Self {
        self.add_column(column);
        self
    }

    /// Set the primary key columns.
    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        self.primary_key = Some(PrimaryKeyConstraint::new(columns));
        self
    }

    /// Add a foreign key.
    pub fn with_foreign_key(mut self, fk: ForeignKeyConstraint) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Add a unique constraint.
    pub fn with_unique(mut self, uq: UniqueConstraint) -> Self {
        self.unique_constraints.push(uq);
        self
    }

    /// Add a check constraint.
    pub fn with_check(mut self, ck: CheckConstraint) -> Self {
        self.check_constraints.push(ck);
        self
    }

    /// Add an index.
    pub fn with_index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// Add a dialect option.
    pub fn with_option(mut self, key: impl Into<SmolStr>, value: impl Into<String>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Get a column by storage name.
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Get an index by name.
    pub fn get_index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Check if a column is part of the primary key.
    pub fn is_primary_key_column(&self, name: &str) -> bool {
        self.primary_key
            .as_ref()
            .is_some_and(|pk| pk.columns.iter().any(|c| c == name))
    }

    /// The column the backend generates values for, if any.
    ///
    /// This is a single-column integer primary key whose autoincrement is not
    /// disabled. In `Auto` mode a column that is also a foreign key does not count.
    pub fn autoincrement_column(&self) -> Option<&Column> {
        let pk = self.primary_key.as_ref()?;
        let [col_name] = pk.columns.as_slice() else {
            return None;
        };
        let column = self.columns.get(col_name)?;
        if column.sql_type.affinity != TypeAffinity::Integer {
            return None;
        }
        match column.autoincrement {
            Autoincrement::Disabled => None,
            Autoincrement::Enabled => Some(column),
            Autoincrement::Auto => {
                let is_fk = self
                    .foreign_keys
                    .iter()
                    .any(|fk| fk.columns.iter().any(|c| c == col_name));
                (!is_fk).then_some(column)
            }
        }
    }

    /// Tables referenced by this table's foreign keys, excluding itself.
    pub fn referenced_tables(&self) -> Vec<TableKey> {
        let own = self.key();
        let mut refs: Vec<TableKey> = self
            .foreign_keys
            .iter()
            .map(|fk| fk.referred_table.clone())
            .filter(|k| *k != own)
            .collect();
        refs.dedup();
        refs
    }

    /// All constraints, primary key first, then foreign keys, uniques and checks.
    pub fn constraints(&self) -> Vec<Constraint> {
        let mut all = Vec::new();
        if let Some(pk) = &self.primary_key {
            all.push(Constraint::PrimaryKey(pk.clone()));
        }
        all.extend(self.foreign_keys.iter().cloned().map(Constraint::ForeignKey));
        all.extend(self.unique_constraints.iter().cloned().map(Constraint::Unique));
        all.extend(self.check_constraints.iter().cloned().map(Constraint::Check));
        all
    }
}
