//! Execution collaborator interface.

use crate::error::BoxError;
use crate::operation::Operation;
use crate::render::RenderContext;

/// Applies operations to a live connection or an output stream.
///
/// The runner brackets each revision with `begin`/`commit` when DDL is
/// transactional and calls `rollback` when an operation fails.
pub trait MigrationExecutor {
    /// Start a transaction.
    fn begin(&mut self) -> Result<(), BoxError>;

    /// Execute one operation.
    fn execute(&mut self, op: &Operation) -> Result<(), BoxError>;

    /// Commit the current transaction.
    fn commit(&mut self) -> Result<(), BoxError>;

    /// Roll back the current transaction.
    fn rollback(&mut self) -> Result<(), BoxError>;

    /// Note a progress message, e.g. `Running upgrade r1 -> r2`.
    fn annotate(&mut self, _message: &str) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Offline executor: appends rendered operations to a text buffer.
#[derive(Debug, Default)]
pub struct OfflineExecutor {
    ctx: RenderContext,
    buffer: String,
}

impl OfflineExecutor {
    /// Create an executor rendering with the given context.
    pub fn new(ctx: RenderContext) -> Self {
        Self {
            ctx,
            buffer: String::new(),
        }
    }

    /// The script produced so far.
    pub fn output(&self) -> &str {
        &self.buffer
    }

    /// Take the produced script.
    pub fn into_output(self) -> String {
        self.buffer
    }

    fn line(&mut self, text: &str) {
        self.buffer.push_str(text);
        self.buffer.push('\n');
    }
}

impl MigrationExecutor for OfflineExecutor {
    fn begin(&mut self) -> Result<(), BoxError> {
        self.line("BEGIN;");
        Ok(())
    }

    fn execute(&mut self, op: &Operation) -> Result<(), BoxError> {
        if let Some(text) = self.ctx.render_operation(op) {
            self.line(&text);
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), BoxError> {
        self.line("COMMIT;");
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), BoxError> {
        self.line("ROLLBACK;");
        Ok(())
    }

    fn annotate(&mut self, message: &str) -> Result<(), BoxError> {
        self.line(&format!("-- {}", message));
        Ok(())
    }
}
