//! Column comparison rules: type and server default.
//!
//! Every comparator answers with a [`Comparison`]. Hooks are consulted in
//! order (user, then dialect) and the first answer that is not
//! [`Comparison::Defer`] wins; when all defer, the default rule decides.

use std::sync::{Arc, LazyLock};

use regex_lite::Regex;

use keel_schema::{Column, ServerDefault, SqlType, Table, TypeAffinity};

/// Outcome of a pluggable comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// The two sides differ; a change is emitted.
    Different,
    /// The two sides are equivalent.
    Same,
    /// No opinion; fall through to the next comparator.
    Defer,
}

impl Comparison {
    /// Map a "different" flag to a decided comparison.
    pub fn from_different(different: bool) -> Self {
        if different { Self::Different } else { Self::Same }
    }

    /// Check if this comparison reports a difference.
    pub fn is_different(self) -> bool {
        matches!(self, Self::Different)
    }
}

/// Type comparison hook: `(reflected, target)`.
pub type TypeComparator = Arc<dyn Fn(&Column, &Column) -> Comparison + Send + Sync>;

/// Server default comparison hook.
pub type DefaultComparator = Arc<dyn Fn(&DefaultComparison<'_>) -> Comparison + Send + Sync>;

/// Inputs to a server default comparison.
#[derive(Debug, Clone, Copy)]
pub struct DefaultComparison<'a> {
    /// Target table owning the column.
    pub table: &'a Table,
    /// Reflected column.
    pub reflected: &'a Column,
    /// Target column.
    pub target: &'a Column,
    /// Reflected default as the backend reports it.
    pub reflected_default: Option<&'a ServerDefault>,
    /// Target default.
    pub target_default: Option<&'a ServerDefault>,
}

impl<'a> DefaultComparison<'a> {
    /// Reflected default text.
    pub fn rendered_reflected(&self) -> Option<&'a str> {
        self.reflected_default.map(ServerDefault::text)
    }

    /// Target default text.
    pub fn rendered_target(&self) -> Option<&'a str> {
        self.target_default.map(ServerDefault::text)
    }
}

/// Run a chain of type comparators and fall back to [`default_compare_type`].
pub fn compare_types<'h>(
    hooks: impl IntoIterator<Item = &'h TypeComparator>,
    reflected: &Column,
    target: &Column,
) -> bool {
    for hook in hooks {
        match hook(reflected, target) {
            Comparison::Defer => continue,
            decided => return decided.is_different(),
        }
    }
    default_compare_type(&reflected.sql_type, &target.sql_type)
}

/// Run a chain of default comparators and fall back to [`default_compare_server_default`].
pub fn compare_server_defaults<'h>(
    hooks: impl IntoIterator<Item = &'h DefaultComparator>,
    ctx: &DefaultComparison<'_>,
) -> bool {
    for hook in hooks {
        match hook(ctx) {
            Comparison::Defer => continue,
            decided => return decided.is_different(),
        }
    }
    default_compare_server_default(ctx.reflected_default, ctx.target_default)
}

/// Affinity-based type comparison. Returns `true` when the types differ.
///
/// Types whose generic affinities differ are different. Within the same
/// affinity, a parameter only counts when the target sets it.
pub fn default_compare_type(reflected: &SqlType, target: &SqlType) -> bool {
    if reflected.is_null() || target.is_null() {
        return false;
    }
    let affinity = target.affinity.generic();
    if reflected.affinity.generic() != affinity {
        return true;
    }
    match affinity {
        TypeAffinity::String => target
            .length()
            .is_some_and(|len| reflected.length() != Some(len)),
        TypeAffinity::Numeric => {
            target
                .precision()
                .is_some_and(|p| reflected.precision() != Some(p))
                || target.scale().is_some_and(|s| reflected.scale() != Some(s))
        }
        TypeAffinity::DateTime | TypeAffinity::Time => {
            target.timezone().unwrap_or(false) != reflected.timezone().unwrap_or(false)
        }
        TypeAffinity::UserDefined => !reflected.name.eq_ignore_ascii_case(&target.name),
        TypeAffinity::Array => match (reflected.args.first(), target.args.first()) {
            (Some(keel_schema::TypeArg::Type(r)), Some(keel_schema::TypeArg::Type(t))) => {
                default_compare_type(r, t)
            }
            _ => false,
        },
        _ => false,
    }
}

/// Text comparison of server defaults. Returns `true` when they differ.
///
/// Surrounding parentheses and quotes are stripped from both sides. When
/// either side is a backend expression the texts must match exactly after
/// stripping, since no backend is available to evaluate them.
pub fn default_compare_server_default(
    reflected: Option<&ServerDefault>,
    target: Option<&ServerDefault>,
) -> bool {
    match (reflected, target) {
        (None, None) => false,
        (Some(_), None) | (None, Some(_)) => true,
        (Some(r), Some(t)) => strip_outer(r.text()) != strip_outer(t.text()),
    }
}

static OUTER_WRAP: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\(+|'+)|(\)+|'+)$").ok());

/// Strip leading/trailing parentheses and quotes.
pub fn strip_outer(text: &str) -> String {
    replace_all(&OUTER_WRAP, text.trim(), "")
}

pub(crate) fn replace_all(re: &LazyLock<Option<Regex>>, text: &str, rep: &str) -> String {
    match re.as_ref() {
        Some(re) => re.replace_all(text, rep).into_owned(),
        None => text.to_string(),
    }
}
