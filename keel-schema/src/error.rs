//! Error types for schema snapshots and configuration.

// These warnings are false positives - the fields are used by derive macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur while building, validating or configuring schemas.
#[derive(Error, Debug, Diagnostic)]
pub enum SchemaError {
    /// Error reading a file.
    #[error("failed to read file: {path}")]
    #[diagnostic(code(keel::schema::io_error))]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Duplicate definition.
    #[error("duplicate {kind} `{name}`")]
    #[diagnostic(code(keel::schema::duplicate))]
    Duplicate { kind: String, name: String },

    /// A constraint or index names a column the table does not have.
    #[error("unknown column `{column}` in {context} on table `{table}`")]
    #[diagnostic(
        code(keel::schema::unknown_column),
        help("constraints and indexes must reference columns by storage name")
    )]
    UnknownColumn {
        table: String,
        column: String,
        context: String,
    },

    /// Invalid constraint definition.
    #[error("invalid constraint on table `{table}`: {message}")]
    #[diagnostic(code(keel::schema::invalid_constraint))]
    InvalidConstraint { table: String, message: String },

    /// Invalid table definition.
    #[error("invalid table `{name}`: {message}")]
    #[diagnostic(code(keel::schema::invalid_table))]
    InvalidTable { name: String, message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    #[diagnostic(code(keel::schema::config_error))]
    ConfigError { message: String },

    /// TOML parsing error.
    #[error("failed to parse TOML")]
    #[diagnostic(code(keel::schema::toml_error))]
    TomlError {
        #[source]
        source: toml::de::Error,
    },

    /// Validation error with multiple issues.
    #[error("schema validation failed with {count} error(s)")]
    #[diagnostic(code(keel::schema::validation_failed))]
    ValidationFailed {
        count: usize,
        #[related]
        errors: Vec<SchemaError>,
    },
}

impl SchemaError {
    /// Create a duplicate definition error.
    pub fn duplicate(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Duplicate {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an unknown column error.
    pub fn unknown_column(
        table: impl Into<String>,
        column: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self::UnknownColumn {
            table: table.into(),
            column: column.into(),
            context: context.into(),
        }
    }

    /// Create an invalid constraint error.
    pub fn invalid_constraint(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConstraint {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an invalid table error.
    pub fn invalid_table(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTable {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }
}
