//! Typed schema change operations and their structural inverses.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use keel_schema::{
    Column, Constraint, Index, SchemaSnapshot, ServerDefault, SqlType, Table, TableKey,
};

use crate::error::{MigrateResult, MigrationError};

/// Old and new value of a changed facet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change<T> {
    /// Value before the change.
    pub old: T,
    /// Value after the change.
    pub new: T,
}

impl<T: Clone> Change<T> {
    /// Create a change.
    pub fn new(old: T, new: T) -> Self {
        Self { old, new }
    }

    /// The same change in the opposite direction.
    pub fn swapped(&self) -> Self {
        Self {
            old: self.new.clone(),
            new: self.old.clone(),
        }
    }
}

/// The facets of a column that an [`Operation::ModifyColumn`] changes.
///
/// Only changed facets are present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnChanges {
    /// Type change.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<Change<SqlType>>,
    /// Nullability change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<Change<bool>>,
    /// Server default change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_default: Option<Change<Option<ServerDefault>>>,
    /// Comment change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<Change<Option<String>>>,
}

impl ColumnChanges {
    /// Check if no facet changes.
    pub fn is_empty(&self) -> bool {
        self.type_.is_none()
            && self.nullable.is_none()
            && self.server_default.is_none()
            && self.comment.is_none()
    }

    /// Every facet swapped.
    pub fn swapped(&self) -> Self {
        Self {
            type_: self.type_.as_ref().map(Change::swapped),
            nullable: self.nullable.as_ref().map(Change::swapped),
            server_default: self.server_default.as_ref().map(Change::swapped),
            comment: self.comment.as_ref().map(Change::swapped),
        }
    }
}

/// Column facets as they are before an [`Operation::ModifyColumn`] runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingColumn {
    /// Type.
    #[serde(rename = "type")]
    pub sql_type: SqlType,
    /// Nullability.
    pub nullable: bool,
    /// Server default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_default: Option<ServerDefault>,
    /// Comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ExistingColumn {
    /// Capture the facets of a column.
    pub fn of(column: &Column) -> Self {
        Self {
            sql_type: column.sql_type.clone(),
            nullable: column.nullable,
            server_default: column.server_default.clone(),
            comment: column.comment.clone(),
        }
    }

    /// The facets after applying `changes`.
    pub fn after(&self, changes: &ColumnChanges) -> Self {
        Self {
            sql_type: changes
                .type_
                .as_ref()
                .map_or_else(|| self.sql_type.clone(), |c| c.new.clone()),
            nullable: changes.nullable.as_ref().map_or(self.nullable, |c| c.new),
            server_default: changes
                .server_default
                .as_ref()
                .map_or_else(|| self.server_default.clone(), |c| c.new.clone()),
            comment: changes
                .comment
                .as_ref()
                .map_or_else(|| self.comment.clone(), |c| c.new.clone()),
        }
    }
}

/// A single structural schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Create a table with its columns and constraints.
    AddTable {
        /// The full table definition.
        table: Table,
    },
    /// Drop a table. Carries the full definition so it can be recreated.
    RemoveTable {
        /// The full table definition.
        table: Table,
    },
    /// Add a column.
    AddColumn {
        /// Owning table.
        table: TableKey,
        /// Column definition.
        column: Column,
    },
    /// Drop a column. Carries the definition so it can be re-added.
    RemoveColumn {
        /// Owning table.
        table: TableKey,
        /// Column definition.
        column: Column,
    },
    /// Alter facets of an existing column.
    ModifyColumn {
        /// Owning table.
        table: TableKey,
        /// Column storage name.
        column: SmolStr,
        /// Facets before the change.
        existing: ExistingColumn,
        /// Changed facets only.
        changes: ColumnChanges,
    },
    /// Add a constraint to an existing table.
    AddConstraint {
        /// Owning table.
        table: TableKey,
        /// Constraint definition.
        constraint: Constraint,
    },
    /// Drop a constraint.
    RemoveConstraint {
        /// Owning table.
        table: TableKey,
        /// Constraint definition.
        constraint: Constraint,
    },
    /// Create an index.
    AddIndex {
        /// Owning table.
        table: TableKey,
        /// Index definition.
        index: Index,
    },
    /// Drop an index.
    RemoveIndex {
        /// Owning table.
        table: TableKey,
        /// Index definition.
        index: Index,
    },
}

impl Operation {
    /// Operation name as used in logs and rendered calls.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddTable { .. } => "add_table",
            Self::RemoveTable { .. } => "remove_table",
            Self::AddColumn { .. } => "add_column",
            Self::RemoveColumn { .. } => "remove_column",
            Self::ModifyColumn { .. } => "modify_column",
            Self::AddConstraint { .. } => "add_constraint",
            Self::RemoveConstraint { .. } => "remove_constraint",
            Self::AddIndex { .. } => "add_index",
            Self::RemoveIndex { .. } => "remove_index",
        }
    }

    /// The table this operation acts on.
    pub fn table_key(&self) -> TableKey {
        match self {
            Self::AddTable { table } | Self::RemoveTable { table } => table.key(),
            Self::AddColumn { table, .. }
            | Self::RemoveColumn { table, .. }
            | Self::ModifyColumn { table, .. }
            | Self::AddConstraint { table, .. }
            | Self::RemoveConstraint { table, .. }
            | Self::AddIndex { table, .. }
            | Self::RemoveIndex { table, .. } => table.clone(),
        }
    }

    /// Other tables this operation depends on through foreign keys.
    pub fn referenced_tables(&self) -> Vec<TableKey> {
        match self {
            Self::AddTable { table } | Self::RemoveTable { table } => table.referenced_tables(),
            Self::AddConstraint { table, constraint }
            | Self::RemoveConstraint { table, constraint } => constraint
                .referred_table()
                .filter(|t| *t != table)
                .cloned()
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Column names of the acted-on table this operation needs to exist.
    pub fn used_columns(&self) -> Vec<SmolStr> {
        match self {
            Self::AddConstraint { constraint, .. } | Self::RemoveConstraint { constraint, .. } => {
                constraint.columns().to_vec()
            }
            Self::AddIndex { index, .. } | Self::RemoveIndex { index, .. } => index.columns.clone(),
            _ => Vec::new(),
        }
    }

    /// Check if this operation creates something.
    pub fn is_add(&self) -> bool {
        matches!(
            self,
            Self::AddTable { .. }
                | Self::AddColumn { .. }
                | Self::AddConstraint { .. }
                | Self::AddIndex { .. }
        )
    }

    /// The operation that undoes this one.
    pub fn inverse(&self) -> Self {
        match self.clone() {
            Self::AddTable { table } => Self::RemoveTable { table },
            Self::RemoveTable { table } => Self::AddTable { table },
            Self::AddColumn { table, column } => Self::RemoveColumn { table, column },
            Self::RemoveColumn { table, column } => Self::AddColumn { table, column },
            Self::ModifyColumn {
                table,
                column,
                existing,
                changes,
            } => Self::ModifyColumn {
                table,
                column,
                existing: existing.after(&changes),
                changes: changes.swapped(),
            },
            Self::AddConstraint { table, constraint } => {
                Self::RemoveConstraint { table, constraint }
            }
            Self::RemoveConstraint { table, constraint } => {
                Self::AddConstraint { table, constraint }
            }
            Self::AddIndex { table, index } => Self::RemoveIndex { table, index },
            Self::RemoveIndex { table, index } => Self::AddIndex { table, index },
        }
    }

    /// Apply this operation to an in-memory snapshot.
    pub fn apply(&self, snapshot: &mut SchemaSnapshot) -> MigrateResult<()> {
        match self {
            Self::AddTable { table } => {
                snapshot.insert(table.clone());
            }
            Self::RemoveTable { table } => {
                snapshot.remove(&table.key());
            }
            Self::AddColumn { table, column } => {
                table_mut(snapshot, table)?.add_column(column.clone());
            }
            Self::RemoveColumn { table, column } => {
                table_mut(snapshot, table)?.columns.shift_remove(&column.name);
            }
            Self::ModifyColumn {
                table,
                column,
                changes,
                ..
            } => {
                let target = table_mut(snapshot, table)?
                    .columns
                    .get_mut(column)
                    .ok_or_else(|| {
                        MigrationError::other(format!("column '{}.{}' does not exist", table, column))
                    })?;
                if let Some(c) = &changes.type_ {
                    target.sql_type = c.new.clone();
                }
                if let Some(c) = &changes.nullable {
                    target.nullable = c.new;
                }
                if let Some(c) = &changes.server_default {
                    target.server_default = c.new.clone();
                }
                if let Some(c) = &changes.comment {
                    target.comment = c.new.clone();
                }
            }
            Self::AddConstraint { table, constraint } => {
                let t = table_mut(snapshot, table)?;
                match constraint.clone() {
                    Constraint::PrimaryKey(pk) => t.primary_key = Some(pk),
                    Constraint::ForeignKey(fk) => t.foreign_keys.push(fk),
                    Constraint::Unique(uq) => t.unique_constraints.push(uq),
                    Constraint::Check(ck) => t.check_constraints.push(ck),
                }
            }
            Self::RemoveConstraint { table, constraint } => {
                let t = table_mut(snapshot, table)?;
                match constraint {
                    Constraint::PrimaryKey(_) => t.primary_key = None,
                    Constraint::ForeignKey(fk) => {
                        let sig = fk.signature();
                        t.foreign_keys.retain(|f| f.signature() != sig);
                    }
                    Constraint::Unique(uq) => t.unique_constraints.retain(|u| match &uq.name {
                        Some(name) => u.name.as_ref() != Some(name),
                        None => u.column_set() != uq.column_set(),
                    }),
                    Constraint::Check(ck) => t.check_constraints.retain(|c| match &ck.name {
                        Some(name) => c.name.as_ref() != Some(name),
                        None => c.sqltext != ck.sqltext,
                    }),
                }
            }
            Self::AddIndex { table, index } => {
                table_mut(snapshot, table)?.indexes.push(index.clone());
            }
            Self::RemoveIndex { table, index } => {
                table_mut(snapshot, table)?
                    .indexes
                    .retain(|i| i.name != index.name);
            }
        }
        Ok(())
    }
}

fn table_mut<'a>(snapshot: &'a mut SchemaSnapshot, key: &TableKey) -> MigrateResult<&'a mut Table> {
    snapshot
        .get_mut(key)
        .ok_or_else(|| MigrationError::other(format!("table '{}' does not exist", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_schema::{ForeignKeyConstraint, UniqueConstraint};
    use pretty_assertions::assert_eq;

    fn user() -> Table {
        Table::new("user")
            .with_column(Column::new("id", SqlType::integer()).not_null())
            .with_column(Column::new("name", SqlType::string(Some(50))))
            .with_primary_key(["id"])
    }

    fn modify_name() -> Operation {
        Operation::ModifyColumn {
            table: TableKey::new("user"),
            column: "name".into(),
            existing: ExistingColumn::of(&Column::new("name", SqlType::string(Some(50)))),
            changes: ColumnChanges {
                nullable: Some(Change::new(true, false)),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_inverse_swaps_add_remove() {
        let op = Operation::AddTable { table: user() };
        assert_eq!(op.inverse(), Operation::RemoveTable { table: user() });
        assert_eq!(op.inverse().inverse(), op);

        let op = Operation::AddIndex {
            table: TableKey::new("user"),
            index: Index::new("ix_name", ["name"]),
        };
        assert_eq!(op.inverse().name(), "remove_index");
    }

    #[test]
    fn test_modify_inverse_swaps_facets() {
        let op = modify_name();
        let inv = op.inverse();
        match &inv {
            Operation::ModifyColumn {
                existing, changes, ..
            } => {
                assert_eq!(changes.nullable, Some(Change::new(false, true)));
                assert!(!existing.nullable);
                assert_eq!(existing.sql_type, SqlType::string(Some(50)));
                assert!(changes.type_.is_none());
            }
            _ => panic!("Expected ModifyColumn"),
        }
        assert_eq!(inv.inverse(), op);
    }

    #[test]
    fn test_apply_and_inverse_restore() {
        let original = SchemaSnapshot::new().with_table(user());
        let ops = vec![
            modify_name(),
            Operation::AddColumn {
                table: TableKey::new("user"),
                column: Column::new("a1", SqlType::text()).default_literal("x"),
            },
            Operation::AddConstraint {
                table: TableKey::new("user"),
                constraint: UniqueConstraint::new(["name"]).named("uq_name").into(),
            },
            Operation::AddTable {
                table: Table::new("item")
                    .with_column(Column::new("id", SqlType::integer()))
                    .with_column(Column::new("user_id", SqlType::integer()))
                    .with_foreign_key(ForeignKeyConstraint::new(
                        ["user_id"],
                        TableKey::new("user"),
                        ["id"],
                    )),
            },
        ];

        let mut snapshot = original.clone();
        for op in &ops {
            op.apply(&mut snapshot).unwrap();
        }
        assert_eq!(snapshot.len(), 2);
        assert!(!snapshot.table("user").unwrap().get_column("name").unwrap().nullable);

        for op in ops.iter().rev() {
            op.inverse().apply(&mut snapshot).unwrap();
        }
        assert_eq!(snapshot, original);
    }

    #[test]
    fn test_apply_missing_table() {
        let mut snapshot = SchemaSnapshot::new();
        let op = Operation::AddColumn {
            table: TableKey::new("ghost"),
            column: Column::new("x", SqlType::integer()),
        };
        assert!(op.apply(&mut snapshot).is_err());
    }

    #[test]
    fn test_referenced_tables() {
        let op = Operation::AddConstraint {
            table: TableKey::new("item"),
            constraint: ForeignKeyConstraint::new(["user_id"], TableKey::new("user"), ["id"]).into(),
        };
        assert_eq!(op.referenced_tables(), vec![TableKey::new("user")]);
        assert_eq!(op.used_columns(), vec![SmolStr::new("user_id")]);
    }

    #[test]
    fn test_operation_serde_tag() {
        let op = Operation::RemoveColumn {
            table: TableKey::new("user"),
            column: Column::new("pw", SqlType::string(Some(50))),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "remove_column");
        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }
}
