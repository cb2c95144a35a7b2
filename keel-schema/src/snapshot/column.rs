//! Column definitions.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use super::{ServerDefault, SqlType};

/// Autoincrement setting of a column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Autoincrement {
    /// Let the backend decide (integer single-column primary keys autoincrement).
    #[default]
    Auto,
    /// Explicitly enabled.
    Enabled,
    /// Explicitly disabled.
    Disabled,
}

/// A table column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Storage name; the identity of the column within its table.
    pub name: SmolStr,
    /// Model-side alias, preserved but never compared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<SmolStr>,
    /// Column type.
    #[serde(rename = "type")]
    pub sql_type: SqlType,
    /// Whether NULL is allowed.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Server-side default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_default: Option<ServerDefault>,
    /// Autoincrement setting.
    #[serde(default)]
    pub autoincrement: Autoincrement,
    /// Column comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    /// Create a nullable column with no default.
    pub fn new(name: impl Into<SmolStr>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            key: None,
            sql_type,
            nullable: true,
            server_default: None,
            autoincrement: Autoincrement::Auto,
            comment: None,
        }
    }

    /// Get the column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The model-side key, falling back to the storage name.
    pub fn key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.name)
    }

    /// Mark the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set nullability.
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set a literal server default.
    pub fn default_literal(mut self, value: impl Into<String>) -> Self {
        self.server_default = Some(ServerDefault::literal(value));
        self
    }

    /// Set an expression server default.
    pub fn default_expression(mut self, sql: impl Into<String>) -> Self {
        self.server_default = Some(ServerDefault::expression(sql));
        self
    }

    /// Set the server default.
    pub fn with_server_default(mut self, default: Option<ServerDefault>) -> Self {
        self.server_default = default;
        self
    }

    /// Set the model-side key.
    pub fn with_key(mut self, key: impl Into<SmolStr>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the autoincrement flag.
    pub fn with_autoincrement(mut self, autoincrement: Autoincrement) -> Self {
        self.autoincrement = autoincrement;
        self
    }

    /// Set the comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}
