//! Migration runner.
//!
//! The runner walks the revision graph from the persisted marker to a target
//! and hands each revision's operations to the executor. The marker only
//! moves after a revision's operations have all succeeded; a failure rolls
//! back that revision (when DDL is transactional) and halts the run.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::dialect::DialectCapabilities;
use crate::error::{BoxError, MigrateResult, MigrationError};
use crate::executor::MigrationExecutor;
use crate::graph::{RevisionGraph, RevisionSet};
use crate::history::VersionStore;
use crate::operation::Operation;
use crate::revision::Revision;

/// Lifecycle state of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// No revision graph loaded.
    NoContext,
    /// Ready to run.
    Configured,
    /// A run is in progress.
    Running,
}

/// Direction of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Apply revisions.
    Upgrade,
    /// Undo revisions.
    Downgrade,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upgrade => f.write_str("upgrade"),
            Self::Downgrade => f.write_str("downgrade"),
        }
    }
}

/// Runner settings.
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// Wrap each revision in `begin`/`commit`.
    pub transactional_ddl: bool,
    /// Log every executed operation.
    pub log_operations: bool,
}

impl RunnerConfig {
    /// Create a non-transactional configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the dialect's transactional DDL capability.
    pub fn for_dialect(dialect: &DialectCapabilities) -> Self {
        Self::new().transactional_ddl(dialect.transactional_ddl)
    }

    /// Set the transactional DDL policy.
    pub fn transactional_ddl(mut self, transactional: bool) -> Self {
        self.transactional_ddl = transactional;
        self
    }

    /// Enable per-operation logging.
    pub fn log_operations(mut self, log: bool) -> Self {
        self.log_operations = log;
        self
    }
}

/// Result of a run.
#[derive(Debug, Clone)]
pub struct MigrationResult {
    /// Direction of the run.
    pub direction: Direction,
    /// Revisions applied (or undone), in execution order.
    pub applied: Vec<String>,
    /// Marker after the run.
    pub current: RevisionSet,
    /// Total duration in milliseconds.
    pub duration_ms: i64,
}

impl MigrationResult {
    /// Check if any revision ran.
    pub fn has_changes(&self) -> bool {
        !self.applied.is_empty()
    }

    /// Get a summary of the result.
    pub fn summary(&self) -> String {
        if self.applied.is_empty() {
            return "No migrations applied".to_string();
        }
        let verb = match self.direction {
            Direction::Upgrade => "upgraded",
            Direction::Downgrade => "downgraded",
        };
        format!("{} revision(s) {} in {}ms", self.applied.len(), verb, self.duration_ms)
    }
}

/// Runs revisions against an executor and tracks the marker in a store.
pub struct MigrationRunner<E, S> {
    executor: E,
    store: S,
    graph: Option<RevisionGraph>,
    config: RunnerConfig,
    state: RunnerState,
}

impl<E: MigrationExecutor, S: VersionStore> MigrationRunner<E, S> {
    /// Create an unconfigured runner.
    pub fn new(executor: E, store: S) -> Self {
        Self {
            executor,
            store,
            graph: None,
            config: RunnerConfig::default(),
            state: RunnerState::NoContext,
        }
    }

    /// Load the revision graph and settings.
    pub fn configure(&mut self, graph: RevisionGraph, config: RunnerConfig) {
        debug!("Runner configured with {} revisions", graph.len());
        self.graph = Some(graph);
        self.config = config;
        self.state = RunnerState::Configured;
    }

    /// Builder form of [`configure`](Self::configure).
    pub fn with_graph(mut self, graph: RevisionGraph, config: RunnerConfig) -> Self {
        self.configure(graph, config);
        self
    }

    /// Get the current state.
    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Get the loaded graph.
    pub fn graph(&self) -> MigrateResult<&RevisionGraph> {
        self.graph
            .as_ref()
            .ok_or_else(|| MigrationError::invalid_state("runner has no revision graph"))
    }

    /// Get the executor.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Get the marker store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Take the executor and store back.
    pub fn into_parts(self) -> (E, S) {
        (self.executor, self.store)
    }

    /// Read the persisted marker.
    pub fn current(&mut self) -> MigrateResult<RevisionSet> {
        self.store.read_current()
    }

    /// Upgrade to `target` (e.g. `head`, an id, or a prefix).
    pub fn upgrade(&mut self, target: &str) -> MigrateResult<MigrationResult> {
        self.run_migrations(Direction::Upgrade, target)
    }

    /// Downgrade to `target` (e.g. `base` or an applied id).
    pub fn downgrade(&mut self, target: &str) -> MigrateResult<MigrationResult> {
        self.run_migrations(Direction::Downgrade, target)
    }

    /// Write the marker for `target` without running any operation.
    pub fn stamp(&mut self, target: &str) -> MigrateResult<RevisionSet> {
        let graph = self.graph()?;
        let ids = graph.resolve(target)?;
        let heads = graph.heads_of(&graph.ancestors(&ids)?)?;
        let _lock = self.store.acquire_lock()?;
        self.store.write_current(&heads)?;
        info!("Stamped revision(s) {:?}", heads);
        Ok(heads)
    }

    /// Run in `direction` to `target`.
    pub fn run_migrations(
        &mut self,
        direction: Direction,
        target: &str,
    ) -> MigrateResult<MigrationResult> {
        match self.state {
            RunnerState::NoContext => {
                return Err(MigrationError::invalid_state("runner is not configured"));
            }
            RunnerState::Running => {
                return Err(MigrationError::invalid_state("a run is already in progress"));
            }
            RunnerState::Configured => {}
        }
        self.state = RunnerState::Running;
        let result = self.run(direction, target);
        self.state = RunnerState::Configured;
        result
    }

    fn run(&mut self, direction: Direction, target: &str) -> MigrateResult<MigrationResult> {
        let start = Instant::now();
        let Self {
            executor,
            store,
            graph,
            config,
            ..
        } = self;
        let graph = graph
            .as_ref()
            .ok_or_else(|| MigrationError::invalid_state("runner has no revision graph"))?;

        let _lock = store.acquire_lock()?;
        let current = store.read_current()?;
        let target_ids = graph.resolve(target)?;
        let revisions = match direction {
            Direction::Upgrade => graph.iterate_upgrade(&current, &target_ids)?,
            Direction::Downgrade => graph.iterate_downgrade(&current, &target_ids)?,
        };
        info!(
            "Running {} of {} revision(s) to '{}'",
            direction,
            revisions.len(),
            target
        );

        let mut applied_set = graph.ancestors(&current)?;
        let mut marker = current;
        let mut applied = Vec::with_capacity(revisions.len());
        for revision in revisions {
            match direction {
                Direction::Upgrade => applied_set.insert(revision.id.clone()),
                Direction::Downgrade => applied_set.remove(&revision.id),
            };
            let heads = graph.heads_of(&applied_set)?;
            run_revision(executor, store, config, direction, revision, &heads)?;
            marker = heads;
            applied.push(revision.id.clone());
        }

        let result = MigrationResult {
            direction,
            applied,
            current: marker,
            duration_ms: millis(start.elapsed()),
        };
        info!("{}", result.summary());
        Ok(result)
    }
}

fn describe(direction: Direction, revision: &Revision) -> String {
    match direction {
        Direction::Upgrade => format!("Running upgrade {}", revision.short_log()),
        Direction::Downgrade => {
            let parents = if revision.parents.is_empty() {
                "<base>".to_string()
            } else {
                revision.parents.join(", ")
            };
            format!("Running downgrade {} -> {}", revision.id, parents)
        }
    }
}

fn execute_all<E: MigrationExecutor>(
    executor: &mut E,
    ops: &[Operation],
    log_operations: bool,
) -> Result<(), BoxError> {
    for op in ops {
        if log_operations {
            info!("{} on '{}'", op.name(), op.table_key());
        }
        executor.execute(op)?;
    }
    Ok(())
}

/// Whole milliseconds, saturating at `i64::MAX`.
fn millis(elapsed: Duration) -> i64 {
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}

fn run_revision<E: MigrationExecutor, S: VersionStore>(
    executor: &mut E,
    store: &mut S,
    config: &RunnerConfig,
    direction: Direction,
    revision: &Revision,
    heads: &RevisionSet,
) -> MigrateResult<()> {
    let message = describe(direction, revision);
    info!("{}", message);
    executor
        .annotate(&message)
        .map_err(|e| MigrationError::execution(&revision.id, e))?;

    if config.transactional_ddl {
        executor
            .begin()
            .map_err(|e| MigrationError::execution(&revision.id, e))?;
    }

    let ops = match direction {
        Direction::Upgrade => &revision.upgrade_ops,
        Direction::Downgrade => &revision.downgrade_ops,
    };
    let outcome = execute_all(executor, ops, config.log_operations)
        .map_err(|e| MigrationError::execution(&revision.id, e))
        .and_then(|()| store.write_current(heads));

    if let Err(err) = outcome {
        if config.transactional_ddl {
            match executor.rollback() {
                Ok(()) => info!("Rolled back revision '{}'", revision.id),
                Err(rb) => warn!("Rollback of revision '{}' failed: {}", revision.id, rb),
            }
        }
        return Err(err);
    }
    debug!("Marker set to {:?}", heads);

    if config.transactional_ddl {
        executor
            .commit()
            .map_err(|e| MigrationError::execution(&revision.id, e))?;
    }
    Ok(())
}
