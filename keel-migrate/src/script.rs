//! Revision script directory.
//!
//! Each revision lives in its own directory named from the file template:
//!
//! ```text
//! migrations/
//!   1975ea83b712_add_account/
//!     revision.toml      # id, parents, message, created_at, rendered slots
//!     operations.json    # structured upgrade and downgrade operations
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{MigrateResult, MigrationError};
use crate::graph::RevisionGraph;
use crate::operation::Operation;
use crate::render::{RenderContext, RevisionScript};
use crate::revision::{Revision, rev_id};

/// Revision metadata file inside a revision directory.
pub const REVISION_FILE: &str = "revision.toml";

/// Structured operations file inside a revision directory.
pub const OPERATIONS_FILE: &str = "operations.json";

/// Default directory name template.
pub const DEFAULT_FILE_TEMPLATE: &str = "{rev}_{slug}";

const MAX_SLUG_LEN: usize = 40;

#[derive(Debug, Serialize, Deserialize)]
struct RevisionHeader {
    id: String,
    #[serde(default)]
    parents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    imports: Vec<String>,
    #[serde(default = "empty_slot")]
    upgrade: String,
    #[serde(default = "empty_slot")]
    downgrade: String,
}

fn empty_slot() -> String {
    RevisionScript::EMPTY_SLOT.to_string()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OperationsFile {
    #[serde(default)]
    upgrade: Vec<Operation>,
    #[serde(default)]
    downgrade: Vec<Operation>,
}

/// A revision read from (or written to) the script directory.
#[derive(Debug, Clone)]
pub struct ScriptFile {
    /// Revision directory.
    pub path: PathBuf,
    /// The revision with its structured operations.
    pub revision: Revision,
    /// Rendered slots.
    pub script: RevisionScript,
}

/// Reads and writes revision directories.
#[derive(Debug, Clone)]
pub struct ScriptDirectory {
    dir: PathBuf,
    file_template: String,
}

impl ScriptDirectory {
    /// Create a script directory rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file_template: DEFAULT_FILE_TEMPLATE.to_string(),
        }
    }

    /// Set the directory name template (`{rev}` and `{slug}` placeholders).
    pub fn with_file_template(mut self, template: impl Into<String>) -> Self {
        self.file_template = template.into();
        self
    }

    /// Get the root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ensure the root directory exists.
    pub async fn ensure_dir(&self) -> MigrateResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Directory name for a revision.
    pub fn revision_dir_name(&self, revision: &Revision) -> String {
        let slug = slugify(revision.message.as_deref().unwrap_or_default());
        let name = self
            .file_template
            .replace("{rev}", &revision.id)
            .replace("{slug}", &slug);
        name.trim_end_matches('_').to_string()
    }

    /// Write a revision and its rendered script.
    pub async fn write_revision(
        &self,
        revision: &Revision,
        script: &RevisionScript,
    ) -> MigrateResult<PathBuf> {
        self.ensure_dir().await?;
        let path = self.dir.join(self.revision_dir_name(revision));
        if tokio::fs::try_exists(&path).await? {
            return Err(MigrationError::revision_file(format!(
                "revision directory already exists: {}",
                path.display()
            )));
        }
        tokio::fs::create_dir_all(&path).await?;

        let header = RevisionHeader {
            id: revision.id.clone(),
            parents: revision.parents.clone(),
            message: revision.message.clone(),
            created_at: revision.created_at,
            imports: script.imports.clone(),
            upgrade: script.upgrade.clone(),
            downgrade: script.downgrade.clone(),
        };
        tokio::fs::write(path.join(REVISION_FILE), toml::to_string(&header)?).await?;

        let ops = OperationsFile {
            upgrade: revision.upgrade_ops.clone(),
            downgrade: revision.downgrade_ops.clone(),
        };
        tokio::fs::write(path.join(OPERATIONS_FILE), serde_json::to_string_pretty(&ops)?).await?;

        info!("Generated revision '{}' at {}", revision.id, path.display());
        Ok(path)
    }

    /// Read one revision directory.
    pub async fn read_revision(&self, path: &Path) -> MigrateResult<ScriptFile> {
        let content = tokio::fs::read_to_string(path.join(REVISION_FILE)).await?;
        let header: RevisionHeader = toml::from_str(&content)?;
        if header.id.trim().is_empty() {
            return Err(MigrationError::revision_file(format!(
                "{}: revision id is empty",
                path.display()
            )));
        }

        let ops_path = path.join(OPERATIONS_FILE);
        let ops: OperationsFile = if tokio::fs::try_exists(&ops_path).await? {
            serde_json::from_str(&tokio::fs::read_to_string(&ops_path).await?)?
        } else {
            OperationsFile::default()
        };

        let revision = Revision {
            id: header.id,
            parents: header.parents,
            message: header.message,
            created_at: header.created_at,
            upgrade_ops: ops.upgrade,
            downgrade_ops: ops.downgrade,
        };
        debug!("Read revision '{}' from {}", revision.id, path.display());
        Ok(ScriptFile {
            path: path.to_path_buf(),
            revision,
            script: RevisionScript {
                upgrade: header.upgrade,
                downgrade: header.downgrade,
                imports: header.imports,
            },
        })
    }

    /// All revisions in the directory, sorted by directory name.
    pub async fn list_revisions(&self) -> MigrateResult<Vec<ScriptFile>> {
        let mut scripts = Vec::new();
        if !tokio::fs::try_exists(&self.dir).await? {
            return Ok(scripts);
        }

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path();
            if tokio::fs::try_exists(path.join(REVISION_FILE)).await? {
                paths.push(path);
            } else {
                warn!("Skipping {}: no {}", path.display(), REVISION_FILE);
            }
        }
        paths.sort();

        for path in paths {
            scripts.push(self.read_revision(&path).await?);
        }
        Ok(scripts)
    }

    /// Build the revision graph from every revision in the directory.
    pub async fn load_graph(&self) -> MigrateResult<RevisionGraph> {
        let scripts = self.list_revisions().await?;
        debug!("Loaded {} revision(s) from {}", scripts.len(), self.dir.display());
        RevisionGraph::new(scripts.into_iter().map(|s| s.revision))
    }

    /// Write a new revision on top of the current heads.
    pub async fn generate_revision(
        &self,
        message: &str,
        ops: Vec<Operation>,
        ctx: &mut RenderContext,
    ) -> MigrateResult<ScriptFile> {
        let graph = self.load_graph().await?;
        let revision = Revision::new(rev_id(), graph.heads())
            .with_message(message)
            .with_created_at(Utc::now())
            .with_operations(ops);
        let script = RevisionScript::from_parts(ctx, &revision.upgrade_ops, &revision.downgrade_ops);
        let path = self.write_revision(&revision, &script).await?;
        Ok(ScriptFile {
            path,
            revision,
            script,
        })
    }
}

/// Lowercase the message, keep alphanumerics and join the rest with `_`.
pub fn slugify(message: &str) -> String {
    let mut slug = String::with_capacity(message.len());
    for c in message.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let mut slug = slug.trim_end_matches('_').to_string();
    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
        slug = slug.trim_end_matches('_').to_string();
    }
    slug
}
