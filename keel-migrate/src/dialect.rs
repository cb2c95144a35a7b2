//! Dialect capability table.
//!
//! Each backend is described by a [`DialectCapabilities`] entry: whether it
//! runs DDL transactionally plus optional hooks for type comparison, default
//! comparison, reflected default normalization and table option rendering.
//! Entries live in a process-wide registry keyed by dialect name, seeded with
//! the built-in `default`, `postgresql`, `mysql` and `sqlite` entries.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use regex_lite::Regex;
use smol_str::SmolStr;
use tracing::debug;

use keel_schema::{Column, ServerDefault, TableKey, TypeAffinity};

use crate::compare::{
    Comparison, DefaultComparator, DefaultComparison, TypeComparator, replace_all, strip_outer,
};

/// Reflected default normalization hook: may rewrite or clear a reflected default.
pub type DefaultNormalizer =
    Arc<dyn Fn(&TableKey, &Column) -> Option<ServerDefault> + Send + Sync>;

/// Table option filter: decides which table keyword options are rendered.
pub type TableOptionFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Capabilities and comparison hooks of one backend.
#[derive(Clone)]
pub struct DialectCapabilities {
    /// Dialect name.
    pub name: SmolStr,
    /// The backend's default schema; tables in it are treated as schema-less.
    pub default_schema: Option<SmolStr>,
    /// Whether DDL can run inside a transaction.
    pub transactional_ddl: bool,
    /// Type comparison hook.
    pub compare_type: Option<TypeComparator>,
    /// Server default comparison hook.
    pub compare_server_default: Option<DefaultComparator>,
    /// Reflected default normalization hook.
    pub normalize_reflected_default: Option<DefaultNormalizer>,
    /// Table option filter used when rendering `create_table`.
    pub render_table_option: Option<TableOptionFilter>,
}

impl fmt::Debug for DialectCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialectCapabilities")
            .field("name", &self.name)
            .field("default_schema", &self.default_schema)
            .field("transactional_ddl", &self.transactional_ddl)
            .field("compare_type", &self.compare_type.is_some())
            .field("compare_server_default", &self.compare_server_default.is_some())
            .field(
                "normalize_reflected_default",
                &self.normalize_reflected_default.is_some(),
            )
            .field("render_table_option", &self.render_table_option.is_some())
            .finish()
    }
}

impl DialectCapabilities {
    /// A dialect with no hooks.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            default_schema: None,
            transactional_ddl: false,
            compare_type: None,
            compare_server_default: None,
            normalize_reflected_default: None,
            render_table_option: None,
        }
    }

    /// Set the default schema.
    pub fn default_schema(mut self, schema: impl Into<SmolStr>) -> Self {
        self.default_schema = Some(schema.into());
        self
    }

    /// Set transactional DDL support.
    pub fn transactional_ddl(mut self, transactional: bool) -> Self {
        self.transactional_ddl = transactional;
        self
    }

    /// Set the type comparison hook.
    pub fn with_compare_type(mut self, hook: TypeComparator) -> Self {
        self.compare_type = Some(hook);
        self
    }

    /// Set the server default comparison hook.
    pub fn with_compare_server_default(mut self, hook: DefaultComparator) -> Self {
        self.compare_server_default = Some(hook);
        self
    }

    /// Set the reflected default normalization hook.
    pub fn with_default_normalizer(mut self, hook: DefaultNormalizer) -> Self {
        self.normalize_reflected_default = Some(hook);
        self
    }

    /// Set the table option filter.
    pub fn with_table_option_filter(mut self, hook: TableOptionFilter) -> Self {
        self.render_table_option = Some(hook);
        self
    }

    /// The reflected default after normalization.
    pub fn reflected_default(&self, table: &TableKey, column: &Column) -> Option<ServerDefault> {
        match &self.normalize_reflected_default {
            Some(hook) => hook(table, column),
            None => column.server_default.clone(),
        }
    }

    /// Whether a table keyword option is rendered for this dialect.
    pub fn renders_table_option(&self, key: &str) -> bool {
        self.render_table_option
            .as_ref()
            .is_none_or(|filter| filter(key))
    }
}

static REGISTRY: LazyLock<RwLock<HashMap<SmolStr, Arc<DialectCapabilities>>>> =
    LazyLock::new(|| {
        let mut map = HashMap::new();
        for caps in builtin_dialects() {
            map.insert(caps.name.clone(), Arc::new(caps));
        }
        RwLock::new(map)
    });

/// Register (or replace) a dialect.
pub fn register_dialect(caps: DialectCapabilities) {
    debug!(dialect = %caps.name, "registering dialect");
    REGISTRY.write().insert(caps.name.clone(), Arc::new(caps));
}

/// Look up a dialect by name.
pub fn dialect(name: &str) -> Option<Arc<DialectCapabilities>> {
    REGISTRY.read().get(name).cloned()
}

/// Look up a dialect, falling back to the `default` entry.
pub fn dialect_or_default(name: &str) -> Arc<DialectCapabilities> {
    dialect(name)
        .or_else(|| dialect("default"))
        .unwrap_or_else(|| Arc::new(DialectCapabilities::new("default")))
}

/// Names of every registered dialect, sorted.
pub fn dialect_names() -> Vec<SmolStr> {
    let mut names: Vec<_> = REGISTRY.read().keys().cloned().collect();
    names.sort();
    names
}

fn builtin_dialects() -> Vec<DialectCapabilities> {
    vec![
        DialectCapabilities::new("default"),
        DialectCapabilities::new("postgresql")
            .default_schema("public")
            .transactional_ddl(true)
            .with_compare_server_default(Arc::new(pg_compare_server_default))
            .with_default_normalizer(Arc::new(pg_normalize_reflected_default))
            .with_table_option_filter(Arc::new(|key: &str| key.starts_with("postgresql_"))),
        DialectCapabilities::new("mysql")
            .with_compare_type(Arc::new(mysql_compare_type))
            .with_compare_server_default(Arc::new(mysql_compare_server_default))
            .with_table_option_filter(Arc::new(|key: &str| {
                key.starts_with("mysql_") || key.starts_with("mariadb_")
            })),
        DialectCapabilities::new("sqlite")
            .transactional_ddl(true)
            .with_compare_type(Arc::new(sqlite_compare_type))
            .with_table_option_filter(Arc::new(|key: &str| key.starts_with("sqlite_"))),
    ]
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

static PG_CAST: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"::[A-Za-z_][A-Za-z0-9_ ]*(\([0-9, ]*\))?(\[\])?").ok()
});

static PG_NEXTVAL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"^nextval\('(?:"?[^"'.]+"?\.)?"?([^"']+)"?'::regclass\)$"#).ok()
});

/// Normalize a PostgreSQL default: drop `::type` casts, then surrounding
/// parentheses and quotes.
pub fn pg_normalize_default(text: &str) -> String {
    strip_outer(replace_all(&PG_CAST, text, "").trim())
}

fn pg_compare_server_default(ctx: &DefaultComparison<'_>) -> Comparison {
    let (reflected, target) = match (ctx.rendered_reflected(), ctx.rendered_target()) {
        (None, None) => return Comparison::Same,
        (Some(_), None) | (None, Some(_)) => return Comparison::Different,
        (Some(r), Some(t)) => (r, t),
    };
    if reflected == target {
        return Comparison::Same;
    }

    let r = pg_normalize_default(reflected);
    let t = pg_normalize_default(target);
    match ctx.target.sql_type.affinity.generic() {
        TypeAffinity::Integer | TypeAffinity::Numeric => {
            match (r.parse::<f64>(), t.parse::<f64>()) {
                (Ok(a), Ok(b)) => Comparison::from_different(a != b),
                _ => Comparison::from_different(r != t),
            }
        }
        _ => {
            let quoted = reflected.contains('\'');
            if quoted {
                Comparison::from_different(r != t)
            } else {
                Comparison::from_different(!r.eq_ignore_ascii_case(&t))
            }
        }
    }
}

/// A SERIAL column reflects its sequence call as the default; treat it as none.
fn pg_normalize_reflected_default(table: &TableKey, column: &Column) -> Option<ServerDefault> {
    let default = column.server_default.as_ref()?;
    if column.sql_type.affinity == TypeAffinity::Integer
        && let Some(caps) = PG_NEXTVAL.as_ref().and_then(|re| re.captures(default.text()))
        && caps[1] == format!("{}_{}_seq", table.name, column.name)
    {
        return None;
    }
    Some(default.clone())
}

// ---------------------------------------------------------------------------
// MySQL
// ---------------------------------------------------------------------------

fn mysql_compare_type(reflected: &Column, target: &Column) -> Comparison {
    let r = &reflected.sql_type;
    let is_tinyint_1 = r.name.eq_ignore_ascii_case("TINYINT")
        && r.kwargs
            .get("display_width")
            .and_then(keel_schema::TypeArg::as_int)
            == Some(1);
    if is_tinyint_1 && target.sql_type.affinity == TypeAffinity::Boolean {
        return Comparison::Same;
    }
    Comparison::Defer
}

fn mysql_compare_server_default(ctx: &DefaultComparison<'_>) -> Comparison {
    let (reflected, target) = match (ctx.rendered_reflected(), ctx.rendered_target()) {
        (Some(r), Some(t)) => (r, t),
        (None, None) => return Comparison::Same,
        (Some(r), None) => {
            // integer primary keys reflect an implicit '0' default
            let implicit_zero = ctx.target.sql_type.affinity == TypeAffinity::Integer
                && ctx.table.is_primary_key_column(&ctx.target.name)
                && strip_outer(r) == "0";
            return Comparison::from_different(!implicit_zero);
        }
        (None, Some(_)) => return Comparison::Different,
    };
    let normalize = |s: &str| {
        let s = s.trim().to_ascii_lowercase();
        strip_outer(s.strip_suffix("()").unwrap_or(&s))
    };
    Comparison::from_different(normalize(reflected) != normalize(target))
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// SQLite reflects declared type names loosely; only the storage class matters.
fn sqlite_compare_type(reflected: &Column, target: &Column) -> Comparison {
    let storage = |a: TypeAffinity| match a.generic() {
        TypeAffinity::Integer | TypeAffinity::Boolean => "INTEGER",
        TypeAffinity::Numeric => "NUMERIC",
        TypeAffinity::Binary => "BLOB",
        TypeAffinity::Null => "NULL",
        _ => "TEXT",
    };
    if reflected.sql_type.is_null() || target.sql_type.is_null() {
        return Comparison::Same;
    }
    if storage(reflected.sql_type.affinity) != storage(target.sql_type.affinity) {
        Comparison::Different
    } else {
        Comparison::Defer
    }
}
