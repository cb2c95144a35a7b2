//! # keel-schema
//!
//! Schema snapshot model and configuration for Keel.
//!
//! This crate provides:
//! - Backend-agnostic schema snapshots (tables, columns, constraints, indexes)
//! - Column type affinities used for loose type comparison
//! - Snapshot validation
//! - Configuration parser for `keel.toml` files
//!
//! Snapshots are produced by an external reflection provider (for the live
//! database) or by declared metadata (for the target schema). This crate does
//! no I/O against a database.
//!
//! ## Example
//!
//! ```rust,ignore
//! use keel_schema::{Column, KeelConfig, SchemaSnapshot, SqlType, Table};
//!
//! let target = SchemaSnapshot::new().with_table(
//!     Table::new("user")
//!         .with_column(Column::new("id", SqlType::integer()).not_null())
//!         .with_column(Column::new("name", SqlType::string(Some(50))))
//!         .with_primary_key(["id"]),
//! );
//! keel_schema::validate_snapshot(&target)?;
//!
//! let config = KeelConfig::from_file("keel.toml")?;
//! ```

pub mod config;
pub mod error;
pub mod snapshot;
pub mod validator;

pub use config::KeelConfig;
pub use error::{SchemaError, SchemaResult};
pub use snapshot::*;
pub use validator::{Validator, validate_snapshot};
