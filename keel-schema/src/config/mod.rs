//! Configuration file parsing for `keel.toml`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use crate::error::{SchemaError, SchemaResult};

/// Main configuration structure for `keel.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KeelConfig {
    /// Migration script and runner settings.
    #[serde(default)]
    pub migrations: MigrationsConfig,

    /// Autogenerate (diff) settings.
    #[serde(default)]
    pub autogenerate: AutogenerateConfig,

    /// Debug/logging settings.
    #[serde(default)]
    pub debug: DebugConfig,

    /// Environment-specific overrides.
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentOverride>,
}

impl KeelConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> SchemaResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SchemaError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> SchemaResult<Self> {
        // First, expand environment variables
        let expanded = expand_env_vars(content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| SchemaError::TomlError { source: e })?;
        config.migrations.validate()?;
        Ok(config)
    }

    /// Apply environment-specific overrides.
    pub fn with_environment(mut self, env: &str) -> Self {
        if let Some(overrides) = self.environments.remove(env) {
            if let Some(migrations) = overrides.migrations {
                if let Some(location) = migrations.script_location {
                    self.migrations.script_location = location;
                }
                if let Some(dialect) = migrations.dialect {
                    self.migrations.dialect = dialect;
                }
                if let Some(transactional) = migrations.transactional_ddl {
                    self.migrations.transactional_ddl = Some(transactional);
                }
            }
            if let Some(debug) = overrides.debug {
                if let Some(log_operations) = debug.log_operations {
                    self.debug.log_operations = log_operations;
                }
            }
        }
        self
    }
}

/// Migration script and runner configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationsConfig {
    /// Directory holding revision scripts.
    #[serde(default = "default_script_location")]
    pub script_location: String,

    /// Name of the revision marker table.
    #[serde(default = "default_version_table")]
    pub version_table: String,

    /// Schema of the revision marker table.
    pub version_table_schema: Option<String>,

    /// Revision directory name template; supports `{rev}` and `{slug}`.
    #[serde(default = "default_file_template")]
    pub file_template: String,

    /// Run each revision inside a transaction. Defaults to the dialect's capability.
    pub transactional_ddl: Option<bool>,

    /// Dialect name used for comparison and rendering rules.
    #[serde(default = "default_dialect")]
    pub dialect: String,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            script_location: default_script_location(),
            version_table: default_version_table(),
            version_table_schema: None,
            file_template: default_file_template(),
            transactional_ddl: None,
            dialect: default_dialect(),
        }
    }
}

impl MigrationsConfig {
    fn validate(&self) -> SchemaResult<()> {
        if !self.file_template.contains("{rev}") {
            return Err(SchemaError::config(format!(
                "file_template `{}` must contain `{{rev}}`",
                self.file_template
            )));
        }
        if self.version_table.trim().is_empty() {
            return Err(SchemaError::config("version_table must not be empty"));
        }
        Ok(())
    }
}

fn default_script_location() -> String { "./migrations".to_string() }
fn default_version_table() -> String { "keel_version".to_string() }
fn default_file_template() -> String { "{rev}_{slug}".to_string() }
fn default_dialect() -> String { "default".to_string() }

/// Autogenerate configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AutogenerateConfig {
    /// Compare column types.
    #[serde(default = "default_true")]
    pub compare_type: bool,

    /// Compare server defaults.
    #[serde(default = "default_true")]
    pub compare_server_default: bool,

    /// Compare column comments.
    #[serde(default = "default_true")]
    pub compare_comments: bool,

    /// Consider tables outside the default schema.
    #[serde(default)]
    pub include_schemas: bool,

    /// Prefix for rendered operation calls.
    #[serde(default = "default_op_prefix")]
    pub op_prefix: String,

    /// Prefix for rendered column and type constructors.
    #[serde(default = "default_type_prefix")]
    pub type_prefix: String,

    /// Table names never considered by autogenerate.
    #[serde(default)]
    pub exclude_tables: Vec<String>,
}

impl Default for AutogenerateConfig {
    fn default() -> Self {
        Self {
            compare_type: true,
            compare_server_default: true,
            compare_comments: true,
            include_schemas: false,
            op_prefix: default_op_prefix(),
            type_prefix: default_type_prefix(),
            exclude_tables: vec![],
        }
    }
}

fn default_true() -> bool { true }
fn default_op_prefix() -> String { "op.".to_string() }
fn default_type_prefix() -> String { "sa.".to_string() }

/// Debug/logging configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DebugConfig {
    /// Log every operation as it is executed.
    #[serde(default)]
    pub log_operations: bool,
}

/// Environment-specific configuration overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentOverride {
    /// Migration overrides.
    pub migrations: Option<MigrationsOverride>,

    /// Debug overrides.
    pub debug: Option<DebugOverride>,
}

/// Migration configuration overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationsOverride {
    /// Override script_location.
    pub script_location: Option<String>,

    /// Override dialect.
    pub dialect: Option<String>,

    /// Override transactional_ddl.
    pub transactional_ddl: Option<bool>,
}

/// Debug configuration overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DebugOverride {
    /// Override log_operations.
    pub log_operations: Option<bool>,
}

static ENV_VAR: LazyLock<Option<regex_lite::Regex>> =
    LazyLock::new(|| regex_lite::Regex::new(r"\$\{([^}]+)\}").ok());

/// Expand environment variables in the format `${VAR_NAME}`.
fn expand_env_vars(content: &str) -> String {
    let Some(re) = ENV_VAR.as_ref() else {
        return content.to_string();
    };
    let mut result = content.to_string();

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        let full_match = &cap[0];

        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(full_match, &value);
        }
    }

    result
}
