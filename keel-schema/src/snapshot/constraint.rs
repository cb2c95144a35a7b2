//! Constraint and index definitions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use super::TableKey;

/// The kind of a constraint, as named in `drop_constraint(type_=...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// Primary key.
    PrimaryKey,
    /// Foreign key.
    ForeignKey,
    /// Unique constraint.
    Unique,
    /// Check constraint.
    Check,
}

impl ConstraintKind {
    /// The rendered `type_` value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrimaryKey => "primary",
            Self::ForeignKey => "foreignkey",
            Self::Unique => "unique",
            Self::Check => "check",
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A primary key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKeyConstraint {
    /// Constraint name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<SmolStr>,
    /// Ordered key columns.
    pub columns: Vec<SmolStr>,
}

impl PrimaryKeyConstraint {
    /// Create an unnamed primary key.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        Self {
            name: None,
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Set the constraint name.
    pub fn named(mut self, name: impl Into<SmolStr>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyConstraint {
    /// Constraint name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<SmolStr>,
    /// Ordered local columns.
    pub columns: Vec<SmolStr>,
    /// Referenced table.
    pub referred_table: TableKey,
    /// Ordered referenced columns.
    pub referred_columns: Vec<SmolStr>,
    /// `ON UPDATE` action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onupdate: Option<String>,
    /// `ON DELETE` action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ondelete: Option<String>,
    /// `INITIALLY` clause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initially: Option<String>,
    /// `DEFERRABLE` flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deferrable: Option<bool>,
    /// Emit as a separate ALTER after table creation.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub use_alter: bool,
}

impl ForeignKeyConstraint {
    /// Create an unnamed foreign key.
    pub fn new<I, S, J, T>(columns: I, referred_table: TableKey, referred_columns: J) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
        J: IntoIterator<Item = T>,
        T: Into<SmolStr>,
    {
        Self {
            name: None,
            columns: columns.into_iter().map(Into::into).collect(),
            referred_table,
            referred_columns: referred_columns.into_iter().map(Into::into).collect(),
            onupdate: None,
            ondelete: None,
            initially: None,
            deferrable: None,
            use_alter: false,
        }
    }

    /// Set the constraint name.
    pub fn named(mut self, name: impl Into<SmolStr>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the `ON DELETE` action.
    pub fn on_delete(mut self, action: impl Into<String>) -> Self {
        self.ondelete = Some(action.into());
        self
    }

    /// Set the `ON UPDATE` action.
    pub fn on_update(mut self, action: impl Into<String>) -> Self {
        self.onupdate = Some(action.into());
        self
    }

    /// Identity used to match foreign keys across snapshots; names are ignored.
    pub fn signature(&self) -> (Vec<SmolStr>, TableKey, Vec<SmolStr>) {
        (
            self.columns.clone(),
            self.referred_table.clone(),
            self.referred_columns.clone(),
        )
    }

    /// Referenced columns as `table.column` strings (schema-qualified if needed).
    pub fn target_fullnames(&self) -> Vec<String> {
        self.referred_columns
            .iter()
            .map(|c| format!("{}.{}", self.referred_table, c))
            .collect()
    }
}

/// A unique constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueConstraint {
    /// Constraint name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<SmolStr>,
    /// Ordered columns.
    pub columns: Vec<SmolStr>,
    /// `DEFERRABLE` flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deferrable: Option<bool>,
    /// `INITIALLY` clause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initially: Option<String>,
}

impl UniqueConstraint {
    /// Create an unnamed unique constraint.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        Self {
            name: None,
            columns: columns.into_iter().map(Into::into).collect(),
            deferrable: None,
            initially: None,
        }
    }

    /// Set the constraint name.
    pub fn named(mut self, name: impl Into<SmolStr>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sorted column set, used for unique/index deduplication.
    pub fn column_set(&self) -> Vec<SmolStr> {
        let mut cols = self.columns.clone();
        cols.sort();
        cols
    }
}

/// A check constraint. The expression is opaque SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConstraint {
    /// Constraint name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<SmolStr>,
    /// SQL expression.
    pub sqltext: String,
}

impl CheckConstraint {
    /// Create an unnamed check constraint.
    pub fn new(sqltext: impl Into<String>) -> Self {
        Self {
            name: None,
            sqltext: sqltext.into(),
        }
    }

    /// Set the constraint name.
    pub fn named(mut self, name: impl Into<SmolStr>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Any table-level constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    /// Primary key.
    PrimaryKey(PrimaryKeyConstraint),
    /// Foreign key.
    ForeignKey(ForeignKeyConstraint),
    /// Unique constraint.
    Unique(UniqueConstraint),
    /// Check constraint.
    Check(CheckConstraint),
}

impl Constraint {
    /// Get the constraint name.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::PrimaryKey(c) => c.name.as_deref(),
            Self::ForeignKey(c) => c.name.as_deref(),
            Self::Unique(c) => c.name.as_deref(),
            Self::Check(c) => c.name.as_deref(),
        }
    }

    /// Get the constraint kind.
    pub fn kind(&self) -> ConstraintKind {
        match self {
            Self::PrimaryKey(_) => ConstraintKind::PrimaryKey,
            Self::ForeignKey(_) => ConstraintKind::ForeignKey,
            Self::Unique(_) => ConstraintKind::Unique,
            Self::Check(_) => ConstraintKind::Check,
        }
    }

    /// Local columns covered by the constraint. Check constraints report none.
    pub fn columns(&self) -> &[SmolStr] {
        match self {
            Self::PrimaryKey(c) => &c.columns,
            Self::ForeignKey(c) => &c.columns,
            Self::Unique(c) => &c.columns,
            Self::Check(_) => &[],
        }
    }

    /// The table this constraint references, for foreign keys.
    pub fn referred_table(&self) -> Option<&TableKey> {
        match self {
            Self::ForeignKey(fk) => Some(&fk.referred_table),
            _ => None,
        }
    }
}

impl From<PrimaryKeyConstraint> for Constraint {
    fn from(c: PrimaryKeyConstraint) -> Self {
        Self::PrimaryKey(c)
    }
}

impl From<ForeignKeyConstraint> for Constraint {
    fn from(c: ForeignKeyConstraint) -> Self {
        Self::ForeignKey(c)
    }
}

impl From<UniqueConstraint> for Constraint {
    fn from(c: UniqueConstraint) -> Self {
        Self::Unique(c)
    }
}

impl From<CheckConstraint> for Constraint {
    fn from(c: CheckConstraint) -> Self {
        Self::Check(c)
    }
}

/// A table index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name; indexes are matched by name.
    pub name: SmolStr,
    /// Ordered columns or expressions.
    pub columns: Vec<SmolStr>,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
    /// Dialect-specific options, e.g. `postgresql_using`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kwargs: BTreeMap<SmolStr, String>,
}

impl Index {
    /// Create a non-unique index.
    pub fn new<I, S>(name: impl Into<SmolStr>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
            kwargs: BTreeMap::new(),
        }
    }

    /// Mark the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Add a dialect option.
    pub fn with_option(mut self, key: impl Into<SmolStr>, value: impl Into<String>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Sorted column set, used for unique/index deduplication.
    pub fn column_set(&self) -> Vec<SmolStr> {
        let mut cols = self.columns.clone();
        cols.sort();
        cols
    }
}
