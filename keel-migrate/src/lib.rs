//! # keel-migrate
//!
//! Revision-based schema migration engine.
//!
//! This crate provides:
//! - A revision graph with branches, merges, heads and revision specs
//! - Structural diffing between a reflected and a target schema snapshot
//! - Reversible schema operations and their rendering as migration calls
//! - A runner that applies or reverts revisions and tracks the marker
//! - Revision script storage on the filesystem
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐     ┌────────────────┐     ┌──────────────┐
//! │ Reflected snap │────▶│ SchemaDiffer   │────▶│ Operations   │
//! │ Target snap    │     └────────────────┘     └──────────────┘
//! └────────────────┘                                   │
//!                                                      ▼
//!                      ┌────────────────┐     ┌──────────────┐
//!                      │ RevisionGraph  │◀────│ ScriptDir    │
//!                      └────────────────┘     └──────────────┘
//!                              │
//!                              ▼
//!                      ┌────────────────┐     ┌──────────────┐
//!                      │ MigrationRunner│────▶│ Executor     │
//!                      └────────────────┘     │ VersionStore │
//!                                             └──────────────┘
//! ```
//!
//! The engine does no I/O against a database itself. Reflection, statement
//! execution and marker storage are collaborators supplied by the caller
//! through [`MigrationExecutor`] and [`VersionStore`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use keel_migrate::{InMemoryVersionStore, MigrationConfig, MigrationEngine, OfflineExecutor};
//!
//! async fn autogenerate(reflected: &SchemaSnapshot, target: &SchemaSnapshot) -> MigrateResult<()> {
//!     let engine = MigrationEngine::new(MigrationConfig::new().script_location("./migrations"));
//!     engine.initialize().await?;
//!
//!     let script = engine.autogenerate_revision("add account", reflected, target).await?;
//!     println!("{}", script.script.upgrade);
//!
//!     let mut runner = engine.runner(my_executor, my_store).await?;
//!     let result = runner.upgrade("head")?;
//!     println!("{}", result.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Revision Files
//!
//! ```text
//! migrations/
//! ├── 1975ea83b712_add_account/
//! │   ├── revision.toml
//! │   └── operations.json
//! └── ae1027a6acf0_add_email/
//!     ├── revision.toml
//!     └── operations.json
//! ```

pub mod compare;
pub mod dialect;
pub mod diff;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graph;
pub mod history;
pub mod operation;
pub mod render;
pub mod revision;
pub mod runner;
pub mod script;

// Re-exports
pub use compare::{Comparison, DefaultComparator, DefaultComparison, TypeComparator};
pub use dialect::{DialectCapabilities, dialect, dialect_or_default, register_dialect};
pub use diff::{
    DiffOptions, ExcludeTables, FilterCandidate, IncludeSymbol, ObjectFilter, ObjectKind,
    SchemaDiff, SchemaDiffer, SchemaObject,
};
pub use engine::{MigrationConfig, MigrationEngine};
pub use error::{BoxError, MigrateResult, MigrationError};
pub use executor::{MigrationExecutor, OfflineExecutor};
pub use graph::{BASE, HEAD, HEADS, RevisionGraph, RevisionSet};
pub use history::{InMemoryVersionStore, MigrationLock, VersionStore, version_table, version_table_ddl};
pub use operation::{Change, ColumnChanges, ExistingColumn, Operation};
pub use render::{RenderContext, RenderHook, RenderItem, RenderOutcome, RevisionScript};
pub use revision::{Revision, rev_id};
pub use runner::{Direction, MigrationResult, MigrationRunner, RunnerConfig, RunnerState};
pub use script::{ScriptDirectory, ScriptFile};
