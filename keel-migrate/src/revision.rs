//! Revision records.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::operation::Operation;

/// An authored, immutable unit of migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// Short opaque identifier.
    pub id: String,
    /// Parent identifiers; empty for a root, several for a merge point.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Human label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Operations applied on upgrade, in order.
    #[serde(default)]
    pub upgrade_ops: Vec<Operation>,
    /// Operations applied on downgrade, in order.
    #[serde(default)]
    pub downgrade_ops: Vec<Operation>,
}

impl Revision {
    /// Create a revision with no operations.
    pub fn new<I, S>(id: impl Into<String>, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            parents: parents.into_iter().map(Into::into).collect(),
            message: None,
            created_at: None,
            upgrade_ops: Vec::new(),
            downgrade_ops: Vec::new(),
        }
    }

    /// Set the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the creation time.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Set the upgrade operations; downgrade operations become their
    /// inverses in reverse order.
    pub fn with_operations(mut self, ops: Vec<Operation>) -> Self {
        self.downgrade_ops = ops.iter().rev().map(Operation::inverse).collect();
        self.upgrade_ops = ops;
        self
    }

    /// Check if this revision has no parents.
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Check if this revision merges several branches.
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// One-line description used by history listings.
    pub fn short_log(&self) -> String {
        let parents = if self.parents.is_empty() {
            "<base>".to_string()
        } else {
            self.parents.join(", ")
        };
        format!(
            "{} -> {}, {}",
            parents,
            self.id,
            self.message.as_deref().unwrap_or("empty message")
        )
    }
}

static REV_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new 12 character revision identifier.
pub fn rev_id() -> String {
    let mut hasher = Sha256::new();
    hasher.update(Utc::now().timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hasher.update(REV_COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..12].to_string()
}
