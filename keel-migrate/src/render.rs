//! Rendering of operations into change-script text.
//!
//! Output is a call-like representation, e.g.
//! `op.add_column('user', sa.Column('a1', sa.Text(), server_default='x', nullable=True))`.
//! Operation calls use the `op_prefix`, column and type constructors use the
//! `type_prefix`. Keyword arguments appear in a fixed order and type keyword
//! arguments are alphabetical.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use keel_schema::{
    Autoincrement, CheckConstraint, Column, Constraint, ForeignKeyConstraint, Index,
    PrimaryKeyConstraint, ServerDefault, SqlType, Table, TableKey, TypeArg, UniqueConstraint,
};

use crate::dialect::{self, DialectCapabilities};
use crate::operation::Operation;

const ALTER_INDENT: &str = "           ";

/// An object offered to the render hook.
#[derive(Debug, Clone, Copy)]
pub enum RenderItem<'a> {
    /// A whole operation.
    Operation(&'a Operation),
    /// A column inside `create_table` or `add_column`.
    Column(&'a Column),
    /// A column type.
    Type(&'a SqlType),
    /// A server default.
    ServerDefault(&'a ServerDefault),
    /// A constraint inside `create_table`.
    Constraint(&'a Constraint),
}

/// What the render hook decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Use the default rendering.
    Defer,
    /// Leave the item out. Types cannot be left out and render normally.
    Skip,
    /// Use this text verbatim.
    Text(String),
}

/// Render hook.
pub type RenderHook = Arc<dyn Fn(RenderItem<'_>) -> RenderOutcome + Send + Sync>;

/// Rendering configuration plus the import lines collected while rendering.
#[derive(Clone)]
pub struct RenderContext {
    op_prefix: String,
    type_prefix: String,
    render_item: Option<RenderHook>,
    dialect: Arc<DialectCapabilities>,
    imports: BTreeSet<String>,
}

impl fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("op_prefix", &self.op_prefix)
            .field("type_prefix", &self.type_prefix)
            .field("render_item", &self.render_item.is_some())
            .field("dialect", &self.dialect.name)
            .field("imports", &self.imports)
            .finish()
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self {
            op_prefix: "op.".to_string(),
            type_prefix: "sa.".to_string(),
            render_item: None,
            dialect: dialect::dialect_or_default("default"),
            imports: BTreeSet::new(),
        }
    }
}

impl RenderContext {
    /// Create a context with the default `op.` and `sa.` prefixes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the operation call prefix.
    pub fn op_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.op_prefix = prefix.into();
        self
    }

    /// Set the column/type constructor prefix.
    pub fn type_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.type_prefix = prefix.into();
        self
    }

    /// Install a render hook.
    pub fn with_render_item(mut self, hook: RenderHook) -> Self {
        self.render_item = Some(hook);
        self
    }

    /// Use a dialect's table option filter.
    pub fn with_dialect(mut self, dialect: Arc<DialectCapabilities>) -> Self {
        self.dialect = dialect;
        self
    }

    /// Import lines needed by rendered dialect or user types, sorted.
    pub fn imports(&self) -> Vec<String> {
        self.imports.iter().cloned().collect()
    }

    fn hook(&self, item: RenderItem<'_>) -> RenderOutcome {
        match &self.render_item {
            Some(hook) => hook(item),
            None => RenderOutcome::Defer,
        }
    }

    /// Render one operation. Returns `None` when the hook skips it.
    pub fn render_operation(&mut self, op: &Operation) -> Option<String> {
        match self.hook(RenderItem::Operation(op)) {
            RenderOutcome::Skip => return None,
            RenderOutcome::Text(text) => return Some(text),
            RenderOutcome::Defer => {}
        }
        let p = self.op_prefix.clone();
        let text = match op {
            Operation::AddTable { table } => self.render_create_table(table),
            Operation::RemoveTable { table } => {
                format!("{p}drop_table({}{})", py_repr(table.name()), schema_kw(&table.key()))
            }
            Operation::AddColumn { table, column } => {
                // a skipped column leaves nothing to add
                let column = self.render_column(column)?;
                format!(
                    "{p}add_column({}, {}{})",
                    py_repr(table.name()),
                    column,
                    schema_kw(table)
                )
            }
            Operation::RemoveColumn { table, column } => format!(
                "{p}drop_column({}, {}{})",
                py_repr(table.name()),
                py_repr(column.name()),
                schema_kw(table)
            ),
            Operation::ModifyColumn {
                table,
                column,
                existing,
                changes,
            } => {
                let mut text = format!("{p}alter_column({}, {}", py_repr(table.name()), py_repr(column));
                let mut kw = |key: &str, value: String| {
                    text.push_str(&format!(",\n{ALTER_INDENT}{key}={value}"));
                };
                kw("existing_type", self.render_type(&existing.sql_type));
                if let Some(c) = &changes.type_ {
                    kw("type_", self.render_type(&c.new));
                }
                match &changes.nullable {
                    Some(c) => kw("nullable", py_bool(c.new)),
                    None => kw("existing_nullable", py_bool(existing.nullable)),
                }
                match &changes.server_default {
                    Some(c) => kw("server_default", self.render_default_or_none(c.new.as_ref())),
                    None => {
                        if let Some(d) = &existing.server_default {
                            kw("existing_server_default", self.render_default_or_none(Some(d)));
                        }
                    }
                }
                match &changes.comment {
                    Some(c) => kw("comment", py_opt_str(c.new.as_deref())),
                    None => {
                        if let Some(comment) = &existing.comment {
                            kw("existing_comment", py_repr(comment));
                        }
                    }
                }
                if let Some(schema) = table.schema() {
                    kw("schema", py_repr(schema));
                }
                text.push(')');
                text
            }
            Operation::AddConstraint { table, constraint } => {
                self.render_add_constraint(table, constraint)
            }
            Operation::RemoveConstraint { table, constraint } => {
                let mut args = vec![
                    py_opt_str(constraint.name()),
                    py_repr(table.name()),
                ];
                if let Some(schema) = table.schema() {
                    args.push(format!("schema={}", py_repr(schema)));
                }
                args.push(format!("type_={}", py_repr(constraint.kind().as_str())));
                format!("{p}drop_constraint({})", args.join(", "))
            }
            Operation::AddIndex { table, index } => self.render_create_index(table, index),
            Operation::RemoveIndex { table, index } => format!(
                "{p}drop_index({}, table_name={}{})",
                py_repr(&index.name),
                py_repr(table.name()),
                schema_kw(table)
            ),
        };
        Some(text)
    }

    fn render_create_table(&mut self, table: &Table) -> String {
        let mut args = vec![py_repr(table.name())];
        args.extend(table.columns.values().filter_map(|c| self.render_column(c)));
        let mut constraints: Vec<String> = table
            .constraints()
            .iter()
            .filter_map(|c| self.render_constraint(c))
            .collect();
        constraints.sort();
        args.extend(constraints);

        if let Some(schema) = &table.schema {
            args.push(format!("schema={}", py_repr(schema)));
        }
        if let Some(comment) = &table.comment {
            args.push(format!("comment={}", py_repr(comment)));
        }
        for (key, value) in &table.kwargs {
            if self.dialect.renders_table_option(key) {
                args.push(format!("{}={}", key, py_repr(value)));
            }
        }
        if args.len() == 1 {
            return format!("{}create_table({})", self.op_prefix, args[0]);
        }
        format!("{}create_table({}\n)", self.op_prefix, args.join(",\n"))
    }

    fn render_add_constraint(&self, table: &TableKey, constraint: &Constraint) -> String {
        let p = &self.op_prefix;
        let name = py_opt_str(constraint.name());
        let mut args = vec![name, py_repr(table.name())];
        match constraint {
            Constraint::PrimaryKey(pk) => {
                args.push(py_list(&pk.columns));
                push_schema(&mut args, "schema", table.schema());
                format!("{p}create_primary_key({})", args.join(", "))
            }
            Constraint::ForeignKey(fk) => {
                args.push(py_repr(fk.referred_table.name()));
                args.push(py_list(&fk.columns));
                args.push(py_list(&fk.referred_columns));
                push_schema(&mut args, "source_schema", table.schema());
                push_schema(&mut args, "referent_schema", fk.referred_table.schema());
                args.extend(fk_options(fk));
                format!("{p}create_foreign_key({})", args.join(", "))
            }
            Constraint::Unique(uq) => {
                args.push(py_list(&uq.columns));
                push_schema(&mut args, "schema", table.schema());
                if let Some(d) = uq.deferrable {
                    args.push(format!("deferrable={}", py_bool(d)));
                }
                if let Some(i) = &uq.initially {
                    args.push(format!("initially={}", py_repr(i)));
                }
                format!("{p}create_unique_constraint({})", args.join(", "))
            }
            Constraint::Check(ck) => {
                args.push(py_repr(&ck.sqltext));
                push_schema(&mut args, "schema", table.schema());
                format!("{p}create_check_constraint({})", args.join(", "))
            }
        }
    }

    fn render_create_index(&self, table: &TableKey, index: &Index) -> String {
        let mut text = format!(
            "{}create_index({}, {}, {}, unique={}",
            self.op_prefix,
            py_repr(&index.name),
            py_repr(table.name()),
            py_list(&index.columns),
            py_bool(index.unique)
        );
        if let Some(schema) = table.schema() {
            text.push_str(&format!(", schema={}", py_repr(schema)));
        }
        for (key, value) in &index.kwargs {
            text.push_str(&format!(", {}={}", key, py_repr(value)));
        }
        text.push(')');
        text
    }

    /// Render a column constructor. Returns `None` when the hook skips it.
    pub fn render_column(&mut self, column: &Column) -> Option<String> {
        match self.hook(RenderItem::Column(column)) {
            RenderOutcome::Skip => return None,
            RenderOutcome::Text(text) => return Some(text),
            RenderOutcome::Defer => {}
        }
        let mut opts = Vec::new();
        if let Some(default) = &column.server_default {
            if let Some(rendered) = self.render_server_default(default) {
                opts.push(format!("server_default={}", rendered));
            }
        }
        match column.autoincrement {
            Autoincrement::Auto => {}
            Autoincrement::Enabled => opts.push("autoincrement=True".to_string()),
            Autoincrement::Disabled => opts.push("autoincrement=False".to_string()),
        }
        opts.push(format!("nullable={}", py_bool(column.nullable)));
        if let Some(key) = column.key.as_ref().filter(|k| **k != column.name) {
            opts.push(format!("key={}", py_repr(key)));
        }
        if let Some(comment) = &column.comment {
            opts.push(format!("comment={}", py_repr(comment)));
        }
        let rendered_type = self.render_type(&column.sql_type);
        Some(format!(
            "{}Column({}, {}, {})",
            self.type_prefix,
            py_repr(column.name()),
            rendered_type,
            opts.join(", ")
        ))
    }

    /// Render a type constructor, recording an import for module types.
    pub fn render_type(&mut self, sql_type: &SqlType) -> String {
        if let RenderOutcome::Text(text) = self.hook(RenderItem::Type(sql_type)) {
            return text;
        }
        let prefix = match &sql_type.module {
            Some(module) => {
                let import = if dialect::dialect(module).is_some() {
                    format!("from sqlalchemy.dialects import {}", module)
                } else {
                    format!("import {}", module)
                };
                self.imports.insert(import);
                format!("{}.", module)
            }
            None => self.type_prefix.clone(),
        };
        let mut args: Vec<String> = Vec::new();
        for arg in &sql_type.args {
            args.push(self.render_type_arg(arg));
        }
        for (key, value) in &sql_type.kwargs {
            let value = self.render_type_arg(value);
            args.push(format!("{}={}", key, value));
        }
        format!("{}{}({})", prefix, sql_type.name, args.join(", "))
    }

    fn render_type_arg(&mut self, arg: &TypeArg) -> String {
        match arg {
            TypeArg::Bool(b) => py_bool(*b),
            TypeArg::Int(i) => i.to_string(),
            TypeArg::Str(s) => py_repr(s),
            TypeArg::Type(t) => self.render_type(t),
        }
    }

    /// Render a server default. Returns `None` when the hook skips it.
    pub fn render_server_default(&mut self, default: &ServerDefault) -> Option<String> {
        match self.hook(RenderItem::ServerDefault(default)) {
            RenderOutcome::Skip => return None,
            RenderOutcome::Text(text) => return Some(text),
            RenderOutcome::Defer => {}
        }
        Some(match default {
            ServerDefault::Literal(value) => {
                let value = value.strip_prefix('\'').unwrap_or(value);
                let value = value.strip_suffix('\'').unwrap_or(value);
                py_repr(value)
            }
            ServerDefault::Expression(sql) => format!("{}text({})", self.type_prefix, py_repr(sql)),
        })
    }

    fn render_default_or_none(&mut self, default: Option<&ServerDefault>) -> String {
        default
            .and_then(|d| self.render_server_default(d))
            .unwrap_or_else(|| "None".to_string())
    }

    /// Render a constraint as it appears inside `create_table`.
    pub fn render_constraint(&mut self, constraint: &Constraint) -> Option<String> {
        match self.hook(RenderItem::Constraint(constraint)) {
            RenderOutcome::Skip => return None,
            RenderOutcome::Text(text) => return Some(text),
            RenderOutcome::Defer => {}
        }
        let p = &self.type_prefix;
        Some(match constraint {
            Constraint::PrimaryKey(pk) => render_pk(p, pk),
            Constraint::ForeignKey(fk) => render_fk(p, fk),
            Constraint::Unique(uq) => render_unique(p, uq),
            Constraint::Check(ck) => render_check(p, ck),
        })
    }
}

fn render_pk(prefix: &str, pk: &PrimaryKeyConstraint) -> String {
    let mut args: Vec<String> = pk.columns.iter().map(|c| py_repr(c)).collect();
    if let Some(name) = &pk.name {
        args.push(format!("name={}", py_repr(name)));
    }
    format!("{}PrimaryKeyConstraint({})", prefix, args.join(", "))
}

fn render_fk(prefix: &str, fk: &ForeignKeyConstraint) -> String {
    let mut opts = Vec::new();
    if let Some(name) = &fk.name {
        opts.push(format!("name={}", py_repr(name)));
    }
    opts.extend(fk_options(fk));
    let refcols: Vec<String> = fk.target_fullnames().iter().map(|c| py_repr(c)).collect();
    format!(
        "{}ForeignKeyConstraint({}, [{}], {})",
        prefix,
        py_list(&fk.columns),
        refcols.join(", "),
        opts.join(", ")
    )
}

fn fk_options(fk: &ForeignKeyConstraint) -> Vec<String> {
    let mut opts = Vec::new();
    if let Some(v) = &fk.onupdate {
        opts.push(format!("onupdate={}", py_repr(v)));
    }
    if let Some(v) = &fk.ondelete {
        opts.push(format!("ondelete={}", py_repr(v)));
    }
    if let Some(v) = &fk.initially {
        opts.push(format!("initially={}", py_repr(v)));
    }
    if let Some(v) = fk.deferrable {
        opts.push(format!("deferrable={}", py_bool(v)));
    }
    if fk.use_alter {
        opts.push("use_alter=True".to_string());
    }
    opts
}

fn render_unique(prefix: &str, uq: &UniqueConstraint) -> String {
    let mut args: Vec<String> = uq.columns.iter().map(|c| py_repr(c)).collect();
    if let Some(d) = uq.deferrable {
        args.push(format!("deferrable={}", py_bool(d)));
    }
    if let Some(i) = &uq.initially {
        args.push(format!("initially={}", py_repr(i)));
    }
    if let Some(name) = &uq.name {
        args.push(format!("name={}", py_repr(name)));
    }
    format!("{}UniqueConstraint({})", prefix, args.join(", "))
}

fn render_check(prefix: &str, ck: &CheckConstraint) -> String {
    let opts = ck
        .name
        .as_ref()
        .map(|n| format!(", name={}", py_repr(n)))
        .unwrap_or_default();
    format!("{}CheckConstraint({}{})", prefix, py_repr(&ck.sqltext), opts)
}

fn schema_kw(table: &TableKey) -> String {
    table
        .schema()
        .map(|s| format!(", schema={}", py_repr(s)))
        .unwrap_or_default()
}

fn push_schema(args: &mut Vec<String>, key: &str, schema: Option<&str>) {
    if let Some(schema) = schema {
        args.push(format!("{}={}", key, py_repr(schema)));
    }
}

/// Quote a string the way a Python `repr` does.
pub fn py_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn py_bool(b: bool) -> String {
    if b { "True" } else { "False" }.to_string()
}

fn py_opt_str(s: Option<&str>) -> String {
    s.map(py_repr).unwrap_or_else(|| "None".to_string())
}

fn py_list<S: AsRef<str>>(items: &[S]) -> String {
    let items: Vec<String> = items.iter().map(|s| py_repr(s.as_ref())).collect();
    format!("[{}]", items.join(", "))
}

/// Rendered upgrade and downgrade slots of a revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionScript {
    /// Forward operations, one call per entry, or `pass`.
    pub upgrade: String,
    /// Inverse operations in reverse order, or `pass`.
    pub downgrade: String,
    /// Import lines the rendered text needs.
    pub imports: Vec<String>,
}

impl RevisionScript {
    /// Placeholder body for an empty slot.
    pub const EMPTY_SLOT: &'static str = "pass";

    /// Render both slots from an upgrade operation sequence.
    pub fn from_operations(ctx: &mut RenderContext, ops: &[Operation]) -> Self {
        let upgrade = render_slot(ctx, ops.iter().cloned());
        let downgrade = render_slot(ctx, ops.iter().rev().map(Operation::inverse));
        Self {
            upgrade,
            downgrade,
            imports: ctx.imports(),
        }
    }

    /// Render both slots from explicit upgrade and downgrade sequences.
    pub fn from_parts(ctx: &mut RenderContext, upgrade: &[Operation], downgrade: &[Operation]) -> Self {
        let upgrade = render_slot(ctx, upgrade.iter().cloned());
        let downgrade = render_slot(ctx, downgrade.iter().cloned());
        Self {
            upgrade,
            downgrade,
            imports: ctx.imports(),
        }
    }
}

fn render_slot(ctx: &mut RenderContext, ops: impl Iterator<Item = Operation>) -> String {
    let lines: Vec<String> = ops.filter_map(|op| ctx.render_operation(&op)).collect();
    if lines.is_empty() {
        RevisionScript::EMPTY_SLOT.to_string()
    } else {
        lines.join("\n")
    }
}
