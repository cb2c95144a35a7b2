//! Column types and server defaults for schema snapshots.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Broad storage category of a column type.
///
/// Two types with the same [`TypeAffinity::generic`] roll-up are considered
/// loosely compatible; parameter comparison decides the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeAffinity {
    /// Integer types of any width.
    Integer,
    /// Fixed point numerics.
    Numeric,
    /// Floating point numerics.
    Float,
    /// Bounded character data.
    String,
    /// Unbounded character data.
    Text,
    /// Booleans.
    Boolean,
    /// Timestamps.
    DateTime,
    /// Calendar dates.
    Date,
    /// Time of day.
    Time,
    /// Intervals / durations.
    Interval,
    /// Binary data.
    Binary,
    /// JSON documents.
    Json,
    /// UUIDs.
    Uuid,
    /// Enumerations (stored as strings).
    Enum,
    /// Arrays.
    Array,
    /// User-defined or unrecognized types.
    UserDefined,
    /// Untyped / unknown sentinel.
    Null,
}

impl TypeAffinity {
    /// The generic affinity this one rolls up to.
    pub fn generic(self) -> Self {
        match self {
            Self::Float => Self::Numeric,
            Self::Text | Self::Enum => Self::String,
            other => other,
        }
    }

    /// Check if this is the untyped sentinel.
    pub fn is_null(self) -> bool {
        matches!(self, Self::Null)
    }
}

/// A constructor argument of a [`SqlType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeArg {
    /// Boolean flag, e.g. `timezone=True`.
    Bool(bool),
    /// Integer parameter, e.g. `length=50`.
    Int(i64),
    /// String parameter, e.g. an enum member.
    Str(String),
    /// Nested type, e.g. an array item type.
    Type(Box<SqlType>),
}

impl TypeArg {
    /// Get the value as an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for TypeArg {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for TypeArg {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for TypeArg {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<SqlType> for TypeArg {
    fn from(v: SqlType) -> Self {
        Self::Type(Box::new(v))
    }
}

/// The semantic type of a column.
///
/// `name` is the constructor name used when rendering (`String`, `Integer`,
/// `TINYINT`). `module` is set for dialect-specific or user types that are
/// rendered with their own prefix instead of the generic type prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlType {
    /// Constructor name.
    pub name: SmolStr,
    /// Module the constructor lives in, if not the generic one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<SmolStr>,
    /// Storage category.
    pub affinity: TypeAffinity,
    /// Positional constructor arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<TypeArg>,
    /// Keyword constructor arguments, kept in alphabetical order.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kwargs: BTreeMap<SmolStr, TypeArg>,
}

impl SqlType {
    /// Create a type with no arguments.
    pub fn new(name: impl Into<SmolStr>, affinity: TypeAffinity) -> Self {
        Self {
            name: name.into(),
            module: None,
            affinity,
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }

    /// The untyped / unknown sentinel.
    pub fn null() -> Self {
        Self::new("NullType", TypeAffinity::Null)
    }

    /// `Integer`.
    pub fn integer() -> Self {
        Self::new("Integer", TypeAffinity::Integer)
    }

    /// `BigInteger`.
    pub fn big_integer() -> Self {
        Self::new("BigInteger", TypeAffinity::Integer)
    }

    /// `SmallInteger`.
    pub fn small_integer() -> Self {
        Self::new("SmallInteger", TypeAffinity::Integer)
    }

    /// `String`, optionally bounded.
    pub fn string(length: Option<i64>) -> Self {
        let ty = Self::new("String", TypeAffinity::String);
        match length {
            Some(len) => ty.with_kwarg("length", len),
            None => ty,
        }
    }

    /// `Text`.
    pub fn text() -> Self {
        Self::new("Text", TypeAffinity::Text)
    }

    /// `Boolean`.
    pub fn boolean() -> Self {
        Self::new("Boolean", TypeAffinity::Boolean)
    }

    /// `Numeric` with optional precision and scale.
    pub fn numeric(precision: Option<i64>, scale: Option<i64>) -> Self {
        let mut ty = Self::new("Numeric", TypeAffinity::Numeric);
        if let Some(p) = precision {
            ty = ty.with_kwarg("precision", p);
        }
        if let Some(s) = scale {
            ty = ty.with_kwarg("scale", s);
        }
        ty
    }

    /// `Float`.
    pub fn float() -> Self {
        Self::new("Float", TypeAffinity::Float)
    }

    /// `DateTime`, optionally timezone-aware.
    pub fn datetime(timezone: bool) -> Self {
        let ty = Self::new("DateTime", TypeAffinity::DateTime);
        if timezone {
            ty.with_kwarg("timezone", true)
        } else {
            ty
        }
    }

    /// `Date`.
    pub fn date() -> Self {
        Self::new("Date", TypeAffinity::Date)
    }

    /// `Interval`.
    pub fn interval() -> Self {
        Self::new("Interval", TypeAffinity::Interval)
    }

    /// `JSON`.
    pub fn json() -> Self {
        Self::new("JSON", TypeAffinity::Json)
    }

    /// `Uuid`.
    pub fn uuid() -> Self {
        Self::new("Uuid", TypeAffinity::Uuid)
    }

    /// `Enum` over the given members.
    pub fn enumeration<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ty = Self::new("Enum", TypeAffinity::Enum);
        ty.args = members.into_iter().map(|m| TypeArg::Str(m.into())).collect();
        ty
    }

    /// A dialect-specific type rendered from its own module.
    pub fn dialect(
        module: impl Into<SmolStr>,
        name: impl Into<SmolStr>,
        affinity: TypeAffinity,
    ) -> Self {
        Self::new(name, affinity).with_module(module)
    }

    /// Set the module.
    pub fn with_module(mut self, module: impl Into<SmolStr>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Add a positional argument.
    pub fn with_arg(mut self, arg: impl Into<TypeArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add a keyword argument.
    pub fn with_kwarg(mut self, key: impl Into<SmolStr>, value: impl Into<TypeArg>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Check if this is the untyped sentinel.
    pub fn is_null(&self) -> bool {
        self.affinity.is_null()
    }

    /// Get an integer parameter by keyword, falling back to a positional slot.
    fn int_param(&self, key: &str, position: usize) -> Option<i64> {
        self.kwargs
            .get(key)
            .or_else(|| self.args.get(position))
            .and_then(TypeArg::as_int)
    }

    /// String length, if bounded.
    pub fn length(&self) -> Option<i64> {
        self.int_param("length", 0)
    }

    /// Numeric precision.
    pub fn precision(&self) -> Option<i64> {
        self.int_param("precision", 0)
    }

    /// Numeric scale.
    pub fn scale(&self) -> Option<i64> {
        self.int_param("scale", 1)
    }

    /// Timezone flag for temporal types.
    pub fn timezone(&self) -> Option<bool> {
        self.kwargs.get("timezone").and_then(TypeArg::as_bool)
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(module) = &self.module {
            write!(f, "{}.", module)?;
        }
        write!(f, "{}(", self.name)?;
        let mut first = true;
        for arg in &self.args {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}", arg)?;
        }
        for (key, value) in &self.kwargs {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}={}", key, value)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for TypeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(true) => write!(f, "True"),
            Self::Bool(false) => write!(f, "False"),
            Self::Int(v) => write!(f, "{}", v),
            Self::Str(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
            Self::Type(t) => write!(f, "{}", t),
        }
    }
}

/// A server-side column default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ServerDefault {
    /// A constant value, stored without surrounding quotes.
    Literal(String),
    /// An opaque backend expression, e.g. `now()`.
    Expression(String),
}

impl ServerDefault {
    /// Create a literal default.
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    /// Create an expression default.
    pub fn expression(sql: impl Into<String>) -> Self {
        Self::Expression(sql.into())
    }

    /// The raw text of the default.
    pub fn text(&self) -> &str {
        match self {
            Self::Literal(s) | Self::Expression(s) => s,
        }
    }

    /// Check if this default is evaluated by the backend.
    pub fn is_expression(&self) -> bool {
        matches!(self, Self::Expression(_))
    }
}

impl fmt::Display for ServerDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => write!(f, "'{}'", s),
            Self::Expression(s) => write!(f, "{}", s),
        }
    }
}
