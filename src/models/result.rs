//! Result data models.
//!
//! Tabular results are schema-agnostic: every row is a map from column name
//! to a JSON value. Scalar results are converted to a caller-chosen primitive
//! through [`FromScalar`].

use crate::error::{DbResult, ErrorKind, GatewayError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One materialized row: column name -> value.
pub type Row = serde_json::Map<String, JsonValue>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// Database-specific type (e.g., "INT4", "TEXT", "NUMERIC")
    pub type_name: String,
}

impl ColumnMetadata {
    /// Create new column metadata.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Ordered rows returned by a function or procedure invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularResult {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<Row>,
}

impl TabularResult {
    pub fn new(columns: Vec<ColumnMetadata>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// A successful result without rows.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Get the number of rows in the result.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

/// Tagged outcome of a tabular invocation.
///
/// Keeps "ran fine but returned nothing" apart from "failed".
#[derive(Debug)]
pub enum Outcome {
    Rows(TabularResult),
    Empty,
    Failed(GatewayError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }

    /// The failure kind, if any.
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Failed(err) => Some(err.kind()),
            _ => None,
        }
    }

    /// Turn the outcome back into a result, treating `Empty` as zero rows.
    pub fn into_result(self) -> DbResult<TabularResult> {
        match self {
            Self::Rows(result) => Ok(result),
            Self::Empty => Ok(TabularResult::empty()),
            Self::Failed(err) => Err(err),
        }
    }
}

impl From<DbResult<TabularResult>> for Outcome {
    fn from(result: DbResult<TabularResult>) -> Self {
        match result {
            Ok(table) if table.is_empty() => Self::Empty,
            Ok(table) => Self::Rows(table),
            Err(err) => Self::Failed(err),
        }
    }
}

/// Conversion from a materialized scalar to a primitive kind.
///
/// `NULL` never reaches these conversions; the gateway turns it into
/// [`GatewayError::NullResult`] first.
pub trait FromScalar: Sized {
    /// Name of the target kind, used in mismatch errors.
    const KIND: &'static str;

    fn from_scalar(value: JsonValue) -> DbResult<Self>;
}

fn describe(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "null".to_string(),
        JsonValue::Bool(b) => format!("bool {b}"),
        JsonValue::Number(n) => format!("number {n}"),
        JsonValue::String(s) => format!("text '{s}'"),
        JsonValue::Array(_) => "array".to_string(),
        JsonValue::Object(_) => "object".to_string(),
    }
}

fn integer_from(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        // NUMERIC columns are materialized as exact text
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn float_from(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

macro_rules! impl_from_scalar_int {
    ($($ty:ty => $name:literal),+ $(,)?) => {
        $(
            impl FromScalar for $ty {
                const KIND: &'static str = $name;

                fn from_scalar(value: JsonValue) -> DbResult<Self> {
                    integer_from(&value)
                        .and_then(|v| <$ty>::try_from(v).ok())
                        .ok_or_else(|| GatewayError::type_mismatch(Self::KIND, describe(&value)))
                }
            }
        )+
    };
}

impl_from_scalar_int!(i16 => "i16", i32 => "i32", i64 => "i64");

impl FromScalar for f64 {
    const KIND: &'static str = "f64";

    fn from_scalar(value: JsonValue) -> DbResult<Self> {
        float_from(&value).ok_or_else(|| GatewayError::type_mismatch(Self::KIND, describe(&value)))
    }
}

impl FromScalar for f32 {
    const KIND: &'static str = "f32";

    fn from_scalar(value: JsonValue) -> DbResult<Self> {
        float_from(&value)
            .map(|v| v as f32)
            .ok_or_else(|| GatewayError::type_mismatch(Self::KIND, describe(&value)))
    }
}

impl FromScalar for bool {
    const KIND: &'static str = "bool";

    fn from_scalar(value: JsonValue) -> DbResult<Self> {
        value
            .as_bool()
            .ok_or_else(|| GatewayError::type_mismatch(Self::KIND, describe(&value)))
    }
}

impl FromScalar for String {
    const KIND: &'static str = "string";

    fn from_scalar(value: JsonValue) -> DbResult<Self> {
        match value {
            JsonValue::String(s) => Ok(s),
            JsonValue::Number(n) => Ok(n.to_string()),
            JsonValue::Bool(b) => Ok(b.to_string()),
            other => Err(GatewayError::type_mismatch(Self::KIND, describe(&other))),
        }
    }
}
