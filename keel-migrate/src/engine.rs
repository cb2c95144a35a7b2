//! Migration engine: configuration, script directory and differ in one place.

use std::path::PathBuf;
use std::sync::Arc;

use keel_schema::{KeelConfig, SchemaSnapshot, TableKey};
use tracing::info;

use crate::diff::{DiffOptions, ExcludeTables, SchemaDiff, SchemaDiffer};
use crate::dialect::{self, DialectCapabilities};
use crate::error::MigrateResult;
use crate::executor::{MigrationExecutor, OfflineExecutor};
use crate::graph::{BASE, RevisionGraph};
use crate::history::{InMemoryVersionStore, VersionStore};
use crate::render::RenderContext;
use crate::runner::{MigrationRunner, RunnerConfig};
use crate::script::{DEFAULT_FILE_TEMPLATE, ScriptDirectory, ScriptFile};

/// Configuration for the migration engine.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Path to the script directory.
    pub script_location: PathBuf,
    /// Revision directory name template.
    pub file_template: String,
    /// Revision marker table.
    pub version_table: TableKey,
    /// Dialect name.
    pub dialect: String,
    /// Transactional DDL override; `None` uses the dialect's capability.
    pub transactional_ddl: Option<bool>,
    /// Compare column types.
    pub compare_type: bool,
    /// Compare server defaults.
    pub compare_server_default: bool,
    /// Compare column comments.
    pub compare_comments: bool,
    /// Consider tables outside the default schema.
    pub include_schemas: bool,
    /// Table names autogenerate never considers.
    pub exclude_tables: Vec<String>,
    /// Prefix for rendered operation calls.
    pub op_prefix: String,
    /// Prefix for rendered types.
    pub type_prefix: String,
    /// Log each executed operation.
    pub log_operations: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            script_location: PathBuf::from("./migrations"),
            file_template: DEFAULT_FILE_TEMPLATE.to_string(),
            version_table: TableKey::new("keel_version"),
            dialect: "default".to_string(),
            transactional_ddl: None,
            compare_type: true,
            compare_server_default: true,
            compare_comments: true,
            include_schemas: false,
            exclude_tables: Vec::new(),
            op_prefix: "op.".to_string(),
            type_prefix: "sa.".to_string(),
            log_operations: false,
        }
    }
}

impl MigrationConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the script directory.
    pub fn script_location(mut self, dir: impl Into<PathBuf>) -> Self {
        self.script_location = dir.into();
        self
    }

    /// Set the revision directory name template.
    pub fn file_template(mut self, template: impl Into<String>) -> Self {
        self.file_template = template.into();
        self
    }

    /// Set the marker table.
    pub fn version_table(mut self, table: TableKey) -> Self {
        self.version_table = table;
        self
    }

    /// Set the dialect.
    pub fn dialect(mut self, name: impl Into<String>) -> Self {
        self.dialect = name.into();
        self
    }

    /// Force transactional DDL on or off.
    pub fn transactional_ddl(mut self, transactional: bool) -> Self {
        self.transactional_ddl = Some(transactional);
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

    /// Consider tables in every schema.
    pub fn include_schemas(mut self, include: bool) -> Self {
        self.include_schemas = include;
        self
    }

    /// Exclude a table from autogenerate.
    pub fn exclude_table(mut self, name: impl Into<String>) -> Self {
        self.exclude_tables.push(name.into());
        self
    }

    /// Log each executed operation.
    pub fn log_operations(mut self, log: bool) -> Self {
        self.log_operations = log;
        self
    }

    /// Resolved dialect capabilities.
    pub fn dialect_capabilities(&self) -> Arc<DialectCapabilities> {
        dialect::dialect_or_default(&self.dialect)
    }

    /// Differ options derived from this configuration.
    pub fn diff_options(&self) -> DiffOptions {
        let mut options = DiffOptions::new()
            .dialect(self.dialect_capabilities())
            .compare_type(self.compare_type)
            .compare_server_default(self.compare_server_default)
            .compare_comments(self.compare_comments)
            .include_schemas(self.include_schemas)
            .version_table(Some(self.version_table.clone()));
        if !self.exclude_tables.is_empty() {
            options = options.filter(ExcludeTables::new(self.exclude_tables.iter().cloned()));
        }
        options
    }

    /// Render context derived from this configuration.
    pub fn render_context(&self) -> RenderContext {
        RenderContext::new()
            .op_prefix(&self.op_prefix)
            .type_prefix(&self.type_prefix)
            .with_dialect(self.dialect_capabilities())
    }

    /// Runner settings derived from this configuration.
    pub fn runner_config(&self) -> RunnerConfig {
        let transactional = self
            .transactional_ddl
            .unwrap_or_else(|| self.dialect_capabilities().transactional_ddl);
        RunnerConfig::new()
            .transactional_ddl(transactional)
            .log_operations(self.log_operations)
    }
}

impl From<&KeelConfig> for MigrationConfig {
    fn from(config: &KeelConfig) -> Self {
        let migrations = &config.migrations;
        let autogenerate = &config.autogenerate;
        let version_table = match &migrations.version_table_schema {
            Some(schema) => TableKey::with_schema(schema.as_str(), migrations.version_table.as_str()),
            None => TableKey::new(migrations.version_table.as_str()),
        };
        Self {
            script_location: PathBuf::from(&migrations.script_location),
            file_template: migrations.file_template.clone(),
            version_table,
            dialect: migrations.dialect.clone(),
            transactional_ddl: migrations.transactional_ddl,
            compare_type: autogenerate.compare_type,
            compare_server_default: autogenerate.compare_server_default,
            compare_comments: autogenerate.compare_comments,
            include_schemas: autogenerate.include_schemas,
            exclude_tables: autogenerate.exclude_tables.clone(),
            op_prefix: autogenerate.op_prefix.clone(),
            type_prefix: autogenerate.type_prefix.clone(),
            log_operations: config.debug.log_operations,
        }
    }
}

/// The main migration engine.
pub struct MigrationEngine {
    config: MigrationConfig,
    scripts: ScriptDirectory,
    differ: SchemaDiffer,
}

impl MigrationEngine {
    /// Create a new migration engine.
    pub fn new(config: MigrationConfig) -> Self {
        let scripts = ScriptDirectory::new(&config.script_location)
            .with_file_template(&config.file_template);
        let differ = SchemaDiffer::new(config.diff_options());
        Self {
            config,
            scripts,
            differ,
        }
    }

    /// Extend the configured differ options, e.g. with object filters or
    /// comparators. `configure` starts from [`MigrationConfig::diff_options`],
    /// so excluded tables and the version table stay out of the diff.
    pub fn with_diff_options(mut self, configure: impl FnOnce(DiffOptions) -> DiffOptions) -> Self {
        self.differ = SchemaDiffer::new(configure(self.config.diff_options()));
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Get the script directory.
    pub fn scripts(&self) -> &ScriptDirectory {
        &self.scripts
    }

    /// Initialize the script directory.
    pub async fn initialize(&self) -> MigrateResult<()> {
        self.scripts.ensure_dir().await
    }

    /// Load the revision graph from the script directory.
    pub async fn graph(&self) -> MigrateResult<RevisionGraph> {
        self.scripts.load_graph().await
    }

    /// Compare a reflected snapshot against the target snapshot.
    pub fn diff(&self, reflected: &SchemaSnapshot, target: &SchemaSnapshot) -> MigrateResult<SchemaDiff> {
        self.differ.diff(reflected, target)
    }

    /// Diff the snapshots and write a new revision on top of the current heads.
    pub async fn autogenerate_revision(
        &self,
        message: &str,
        reflected: &SchemaSnapshot,
        target: &SchemaSnapshot,
    ) -> MigrateResult<ScriptFile> {
        let diff = self.diff(reflected, target)?;
        info!("Autogenerate: {}", diff.summary());
        let mut ctx = self.config.render_context();
        self.scripts
            .generate_revision(message, diff.into_operations(), &mut ctx)
            .await
    }

    /// Build a configured runner over the current graph.
    pub async fn runner<E, S>(&self, executor: E, store: S) -> MigrateResult<MigrationRunner<E, S>>
    where
        E: MigrationExecutor,
        S: VersionStore,
    {
        let graph = self.graph().await?;
        Ok(MigrationRunner::new(executor, store).with_graph(graph, self.config.runner_config()))
    }

    /// Render the upgrade from `from` (or base) to `target` as text, without a database.
    pub async fn offline_upgrade(&self, from: Option<&str>, target: &str) -> MigrateResult<String> {
        let graph = self.graph().await?;
        let start = graph.resolve(from.unwrap_or(BASE))?;
        let executor = OfflineExecutor::new(self.config.render_context());
        let store = InMemoryVersionStore::with_current(start);
        let mut runner =
            MigrationRunner::new(executor, store).with_graph(graph, self.config.runner_config());
        runner.upgrade(target)?;
        let (executor, _) = runner.into_parts();
        Ok(executor.into_output())
    }
}
