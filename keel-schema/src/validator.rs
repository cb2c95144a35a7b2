//! Snapshot validation.
//!
//! Checks structural consistency of a snapshot before it is diffed:
//! - Constraints and indexes reference existing columns
//! - Foreign keys have matching column counts
//! - Index names are unique within a table
//! - Tables have at least one column

use std::collections::HashSet;

use crate::error::{SchemaError, SchemaResult};
use crate::snapshot::{SchemaSnapshot, Table};

/// Snapshot validator.
#[derive(Debug)]
pub struct Validator {
    /// Collected validation errors.
    errors: Vec<SchemaError>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    /// Create a new validator.
    pub fn new() -> Self {
        Self { errors: vec![] }
    }

    /// Validate a snapshot, returning all problems found at once.
    pub fn validate(&mut self, snapshot: &SchemaSnapshot) -> SchemaResult<()> {
        self.errors.clear();

        for table in snapshot.tables() {
            self.validate_table(table);
        }

        if self.errors.is_empty() {
            Ok(())
        } else {
            let errors = std::mem::take(&mut self.errors);
            Err(SchemaError::ValidationFailed {
                count: errors.len(),
                errors,
            })
        }
    }

    fn validate_table(&mut self, table: &Table) {
        let name = table.key().to_string();

        if table.columns.is_empty() {
            self.errors
                .push(SchemaError::invalid_table(&name, "table has no columns"));
            return;
        }

        if let Some(pk) = &table.primary_key {
            self.check_columns(table, &pk.columns, "primary key");
        }

        for fk in &table.foreign_keys {
            self.check_columns(table, &fk.columns, "foreign key");
            if fk.columns.len() != fk.referred_columns.len() {
                self.errors.push(SchemaError::invalid_constraint(
                    &name,
                    format!(
                        "foreign key to `{}` has {} local and {} referenced column(s)",
                        fk.referred_table,
                        fk.columns.len(),
                        fk.referred_columns.len()
                    ),
                ));
            }
        }

        for uq in &table.unique_constraints {
            self.check_columns(table, &uq.columns, "unique constraint");
        }

        let mut index_names = HashSet::new();
        for index in &table.indexes {
            if !index_names.insert(index.name.as_str()) {
                self.errors
                    .push(SchemaError::duplicate("index", index.name.as_str()));
            }
            if index.columns.is_empty() {
                self.errors.push(SchemaError::invalid_constraint(
                    &name,
                    format!("index `{}` has no columns", index.name),
                ));
            }
        }
    }

    fn check_columns(&mut self, table: &Table, columns: &[smol_str::SmolStr], context: &str) {
        for column in columns {
            if table.get_column(column).is_none() {
                self.errors.push(SchemaError::unknown_column(
                    table.key().to_string(),
                    column.as_str(),
                    context,
                ));
            }
        }
    }
}

/// Validate a snapshot.
pub fn validate_snapshot(snapshot: &SchemaSnapshot) -> SchemaResult<()> {
    Validator::new().validate(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{
        Column, ForeignKeyConstraint, Index, SqlType, TableKey, UniqueConstraint,
    };

    fn valid_table() -> Table {
        Table::new("user")
            .with_column(Column::new("id", SqlType::integer()))
            .with_column(Column::new("email", SqlType::string(Some(255))))
            .with_primary_key(["id"])
    }

    #[test]
    fn test_valid_snapshot() {
        let snapshot = SchemaSnapshot::new().with_table(valid_table());
        assert!(validate_snapshot(&snapshot).is_ok());
    }

    #[test]
    fn test_unknown_column_in_unique() {
        let snapshot = SchemaSnapshot::new()
            .with_table(valid_table().with_unique(UniqueConstraint::new(["emial"])));
        let err = validate_snapshot(&snapshot).unwrap_err();
        match err {
            SchemaError::ValidationFailed { count, errors } => {
                assert_eq!(count, 1);
                assert!(matches!(errors[0], SchemaError::UnknownColumn { .. }));
            }
            _ => panic!("Expected ValidationFailed"),
        }
    }

    #[test]
    fn test_fk_column_count_mismatch() {
        let snapshot = SchemaSnapshot::new().with_table(valid_table().with_foreign_key(
            ForeignKeyConstraint::new(["id"], TableKey::new("org"), ["id", "tenant"]),
        ));
        assert!(validate_snapshot(&snapshot).is_err());
    }

    #[test]
    fn test_duplicate_index_and_empty_table() {
        let snapshot = SchemaSnapshot::new()
            .with_table(
                valid_table()
                    .with_index(Index::new("ix_email", ["email"]))
                    .with_index(Index::new("ix_email", ["email"])),
            )
            .with_table(Table::new("empty"));
        match validate_snapshot(&snapshot).unwrap_err() {
            SchemaError::ValidationFailed { count, .. } => assert_eq!(count, 2),
            _ => panic!("Expected ValidationFailed"),
        }
    }
}
