//! Invocation-related data models.
//!
//! This module defines the typed parameter values a caller hands to the
//! gateway and the request shape the gateway plans SQL from.

use crate::error::{DbResult, GatewayError};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Exact numeric value kept as its textual representation.
///
/// Parsing validates the text so it can be embedded unquoted in SQL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DecimalText(String);

impl DecimalText {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for DecimalText {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if is_decimal_literal(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(GatewayError::invalid_argument(format!(
                "'{}' is not a valid decimal literal",
                s
            )))
        }
    }
}

impl TryFrom<String> for DecimalText {
    type Error = GatewayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DecimalText> for String {
    fn from(value: DecimalText) -> Self {
        value.0
    }
}

impl std::fmt::Display for DecimalText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// `[+-]digits[.digits][e[+-]digits]`, with at least one digit in the mantissa.
fn is_decimal_literal(s: &str) -> bool {
    let body = s.strip_prefix(['+', '-']).unwrap_or(s);
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(idx) => (&body[..idx], Some(&body[idx + 1..])),
        None => (body, None),
    };

    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };
    let digits_ok = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    if int_part.is_empty() && frac_part.is_empty() {
        return false;
    }
    if !digits_ok(int_part) || !digits_ok(frac_part) {
        return false;
    }

    match exponent {
        None => true,
        Some(exp) => {
            let exp = exp.strip_prefix(['+', '-']).unwrap_or(exp);
            !exp.is_empty() && digits_ok(exp)
        }
    }
}

/// A typed parameter value.
///
/// The variant is the declared value-kind; it decides how the value is
/// encoded as a literal and how it is bound to the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Decimal(DecimalText),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    /// Create a decimal value from its textual representation.
    pub fn decimal(text: &str) -> DbResult<Self> {
        Ok(Self::Decimal(text.parse()?))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the kind name of this value for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::BigInt(_) => "bigint",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Decimal(_) => "decimal",
            Self::Text(_) => "text",
            Self::Date(_) => "date",
            Self::Timestamp(_) => "timestamp",
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<DecimalText> for SqlValue {
    fn from(v: DecimalText) -> Self {
        Self::Decimal(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// A named argument for a function, procedure or scalar query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: SqlValue,
    /// SQL type the bound value is cast to, e.g. `date` or `public.mood`.
    /// Without it, bound function and procedure arguments take the type the
    /// target declares for them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_type: Option<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            sql_type: None,
        }
    }

    /// Cast the bound value to `sql_type`.
    pub fn typed(mut self, sql_type: impl Into<String>) -> Self {
        self.sql_type = Some(sql_type.into());
        self
    }
}

/// How a target is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationKind {
    /// `SELECT * FROM target(arg => value, ...)`
    Function,
    /// `CALL target(arg => $1, ...)`
    Procedure,
    /// Caller-supplied query text with positional binds
    Scalar,
}

impl std::fmt::Display for InvocationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Function => write!(f, "function"),
            Self::Procedure => write!(f, "procedure"),
            Self::Scalar => write!(f, "scalar"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    /// Function or procedure name, or query text for scalar invocations
    pub target: String,
    pub parameters: Vec<Parameter>,
    pub kind: InvocationKind,
}

impl InvocationRequest {
    pub fn new(kind: InvocationKind, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            parameters: Vec::new(),
            kind,
        }
    }

    pub fn function(target: impl Into<String>) -> Self {
        Self::new(InvocationKind::Function, target)
    }

    pub fn procedure(target: impl Into<String>) -> Self {
        Self::new(InvocationKind::Procedure, target)
    }

    pub fn scalar(query: impl Into<String>) -> Self {
        Self::new(InvocationKind::Scalar, query)
    }

    /// Add a parameter to this invocation.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.parameters.push(Parameter::new(name, value));
        self
    }

    pub fn with_params(mut self, params: impl IntoIterator<Item = Parameter>) -> Self {
        self.parameters.extend(params);
        self
    }

    /// Reject blank targets before anything touches the database.
    pub fn validate(&self) -> DbResult<()> {
        if self.target.trim().is_empty() {
            let what = match self.kind {
                InvocationKind::Function => "Function name",
                InvocationKind::Procedure => "Procedure name",
                InvocationKind::Scalar => "Query",
            };
            return Err(GatewayError::invalid_argument(format!(
                "{} cannot be null or empty",
                what
            )));
        }
        Ok(())
    }
}
