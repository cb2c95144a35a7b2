//! Error types for the migration engine.

use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Boxed error raised by a collaborator (filter predicate, executor, store).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A revision spec matched nothing.
    #[error("Unknown revision '{id}'{}", .referenced_by.as_ref().map(|r| format!(" (referenced by '{}')", r)).unwrap_or_default())]
    UnknownRevision {
        /// The unresolved identifier or spec.
        id: String,
        /// The revision naming it as a parent, if any.
        referenced_by: Option<String>,
    },

    /// A revision prefix matched more than one revision.
    #[error("Ambiguous revision '{spec}': matches {}", .candidates.join(", "))]
    AmbiguousRevision {
        /// The spec that was given.
        spec: String,
        /// Every matching identifier.
        candidates: Vec<String>,
    },

    /// The revision graph contains a cycle.
    #[error("Cycle detected in revision graph involving: {}", .revisions.join(", "))]
    CycleDetected {
        /// Revisions on or behind the cycle.
        revisions: Vec<String>,
    },

    /// Two revisions share an identifier.
    #[error("Duplicate revision '{0}'")]
    DuplicateRevision(String),

    /// The target cannot be reached in the requested direction.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// An operation failed while a revision was being applied.
    #[error("Migration '{revision}' failed: {source}")]
    MigrationExecution {
        /// The revision being applied.
        revision: String,
        /// The collaborator's error.
        #[source]
        source: BoxError,
    },

    /// An object filter predicate failed.
    #[error("Object filter failed: {0}")]
    DiffFilter(#[source] BoxError),

    /// The runner was used out of order.
    #[error("Invalid runner state: {0}")]
    InvalidState(String),

    /// Reading or writing the revision marker failed.
    #[error("Version store error: {0}")]
    VersionStore(#[source] BoxError),

    /// Lock acquisition failed.
    #[error("Failed to acquire migration lock: {0}")]
    LockFailed(String),

    /// Invalid revision file or format.
    #[error("Invalid revision file: {0}")]
    InvalidRevisionFile(String),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML decoding error.
    #[error("TOML error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML encoding error.
    #[error("TOML error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Schema snapshot or configuration error.
    #[error("Schema error: {0}")]
    Schema(#[from] keel_schema::SchemaError),

    /// General migration error.
    #[error("Migration error: {0}")]
    Other(String),
}

impl MigrationError {
    /// Create an unknown revision error.
    pub fn unknown_revision(id: impl Into<String>) -> Self {
        Self::UnknownRevision {
            id: id.into(),
            referenced_by: None,
        }
    }

    /// Create an unknown parent error.
    pub fn unknown_parent(id: impl Into<String>, child: impl Into<String>) -> Self {
        Self::UnknownRevision {
            id: id.into(),
            referenced_by: Some(child.into()),
        }
    }

    /// Create an ambiguous revision error.
    pub fn ambiguous(spec: impl Into<String>, candidates: Vec<String>) -> Self {
        Self::AmbiguousRevision {
            spec: spec.into(),
            candidates,
        }
    }

    /// Wrap an execution failure for a revision.
    pub fn execution(
        revision: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::MigrationExecution {
            revision: revision.into(),
            source: source.into(),
        }
    }

    /// Wrap a filter predicate failure.
    pub fn filter(source: impl Into<BoxError>) -> Self {
        Self::DiffFilter(source.into())
    }

    /// Wrap a version store failure.
    pub fn version_store(source: impl Into<BoxError>) -> Self {
        Self::VersionStore(source.into())
    }

    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create an invalid target error.
    pub fn invalid_target(msg: impl Into<String>) -> Self {
        Self::InvalidTarget(msg.into())
    }

    /// Create a lock failed error.
    pub fn lock_failed(msg: impl Into<String>) -> Self {
        Self::LockFailed(msg.into())
    }

    /// Create a revision file error.
    pub fn revision_file(msg: impl Into<String>) -> Self {
        Self::InvalidRevisionFile(msg.into())
    }

    /// Create an other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Check if this is a recoverable error.
    ///
    /// A failed revision leaves the marker at the last completed revision, so
    /// the run can be retried once the cause is fixed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::LockFailed(_) | Self::MigrationExecution { .. }
        )
    }
}
