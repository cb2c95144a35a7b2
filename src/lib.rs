//! # Keel
//!
//! Revision-based schema migrations with structural autogenerate.
//!
//! Keel provides:
//! - Backend-agnostic schema snapshots and a `keel.toml` configuration file
//! - A revision graph supporting branches and merges
//! - Autogenerate: a structural diff between a reflected and a target schema
//! - Reversible operations rendered as migration script calls
//! - A runner that applies revisions and keeps the revision marker in step
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keel::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = KeelConfig::from_file("keel.toml")?;
//!     let engine = MigrationEngine::new(MigrationConfig::from(&config));
//!
//!     let reflected = my_reflector.snapshot().await?;
//!     let target = my_models::snapshot();
//!     let script = engine.autogenerate_revision("add account", &reflected, &target).await?;
//!     println!("Generated {}", script.path.display());
//!
//!     let mut runner = engine.runner(my_executor, my_store).await?;
//!     println!("{}", runner.upgrade("head")?.summary());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Schema snapshots and configuration.
pub mod schema {
    pub use keel_schema::*;
}

/// Revision graph, differ, operations and runner.
pub mod migrate {
    pub use keel_migrate::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::migrate::{
        DiffOptions, MigrationConfig, MigrationEngine, MigrationExecutor, MigrationRunner,
        Operation, RevisionGraph, SchemaDiffer, VersionStore,
    };
    pub use crate::schema::{Column, KeelConfig, SchemaSnapshot, SqlType, Table, TableKey};
}

// Re-export key types at the crate root
pub use migrate::{MigrateResult, MigrationError};
pub use schema::{SchemaError, SchemaSnapshot};
