//! SQL planning and parameter encoding.
//!
//! Turns an [`InvocationRequest`] into a [`Statement`]: the SQL text plus
//! the values that are bound through the driver. Function arguments are
//! either bound (`name => $1`) or, in [`ArgumentMode::Inline`], encoded as
//! SQL literals (`name => 'value'`). Procedures and scalar queries always
//! bind.
//!
//! A bound value carries the driver's type for its Rust kind, which
//! PostgreSQL matches exactly when resolving a call. Bound arguments are
//! therefore cast to a type: the one the parameter declares, else the one
//! the target declares for that argument name ([`ArgumentTypes`]), else
//! `numeric` for fractional kinds, the way an unquoted literal resolves.

use crate::config::{ArgumentMode, LocaleSettings};
use crate::error::{DbResult, GatewayError};
use crate::models::{InvocationKind, InvocationRequest, Parameter, SqlValue};
use std::collections::HashMap;
use std::fmt::Write;

/// Declared SQL types of a callable's arguments, keyed by lower-case
/// argument name.
pub type ArgumentTypes = HashMap<String, String>;

/// SQL text ready for execution together with its bound values.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    /// Values for `$1..$n`, in placeholder order
    pub binds: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            binds: Vec::new(),
        }
    }

    pub fn has_binds(&self) -> bool {
        !self.binds.is_empty()
    }
}

/// Build the statement for an invocation.
pub fn plan(
    request: &InvocationRequest,
    mode: ArgumentMode,
    locale: &LocaleSettings,
) -> DbResult<Statement> {
    plan_typed(request, mode, locale, &ArgumentTypes::new())
}

/// Like [`plan`], casting bound arguments to the target's declared types.
pub fn plan_typed(
    request: &InvocationRequest,
    mode: ArgumentMode,
    locale: &LocaleSettings,
    declared: &ArgumentTypes,
) -> DbResult<Statement> {
    request.validate()?;
    let target = request.target.trim();

    match request.kind {
        InvocationKind::Function => {
            if request.parameters.is_empty() {
                return Ok(Statement::new(format!("SELECT * FROM {}", target)));
            }
            let mut statement = Statement::new("");
            let args = render_arguments(
                &request.parameters,
                mode,
                locale,
                declared,
                &mut statement.binds,
            )?;
            statement.sql = format!("SELECT * FROM {}({})", callable_name(target), args);
            Ok(statement)
        }
        InvocationKind::Procedure => {
            let mut statement = Statement::new("");
            let args = render_arguments(
                &request.parameters,
                ArgumentMode::Bound,
                locale,
                declared,
                &mut statement.binds,
            )?;
            statement.sql = format!("CALL {}({})", callable_name(target), args);
            Ok(statement)
        }
        InvocationKind::Scalar => Ok(Statement {
            sql: target.to_string(),
            binds: request.parameters.iter().map(|p| p.value.clone()).collect(),
        }),
    }
}

/// Targets may be written with an empty argument list (`schema.fn()`).
pub(crate) fn callable_name(target: &str) -> &str {
    target
        .strip_suffix("()")
        .map(str::trim_end)
        .unwrap_or(target)
}

fn render_arguments(
    parameters: &[Parameter],
    mode: ArgumentMode,
    locale: &LocaleSettings,
    declared: &ArgumentTypes,
    binds: &mut Vec<SqlValue>,
) -> DbResult<String> {
    let mut args = Vec::with_capacity(parameters.len());
    for param in parameters {
        validate_identifier(&param.name)?;
        let value = match mode {
            ArgumentMode::Inline => encode_literal(&param.value, locale)?,
            ArgumentMode::Bound => {
                let cast = match &param.sql_type {
                    Some(sql_type) => Some(validate_type_name(sql_type)?),
                    None => declared
                        .get(&param.name.to_ascii_lowercase())
                        .map(String::as_str),
                };
                placeholder(&param.value, cast, binds)
            }
        };
        args.push(format!("{} => {}", param.name, value));
    }
    Ok(args.join(", "))
}

/// Push the value and return its placeholder.
///
/// An untyped NULL stays in the SQL text so function resolution does not
/// see a typed text argument.
fn placeholder(value: &SqlValue, cast: Option<&str>, binds: &mut Vec<SqlValue>) -> String {
    match (value, cast) {
        (SqlValue::Null, None) => "NULL".to_string(),
        (SqlValue::Null, Some(sql_type)) => format!("NULL::{}", sql_type),
        (_, Some(sql_type)) => {
            binds.push(value.clone());
            format!("${}::{}", binds.len(), sql_type)
        }
        (SqlValue::Decimal(_) | SqlValue::Float(_) | SqlValue::Double(_), None) => {
            binds.push(value.clone());
            format!("${}::numeric", binds.len())
        }
        (_, None) => {
            binds.push(value.clone());
            format!("${}", binds.len())
        }
    }
}

/// Type names are interpolated after `::`.
///
/// Accepts names as `format_type` prints them (`character varying`,
/// `public.mood`, `integer[]`, `"Mood"`), nothing that could end the cast.
pub fn is_type_name(name: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_' || first == '"')
        && name.matches('"').count() % 2 == 0
        && name.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ' ' | '[' | ']' | '"')
        })
}

fn validate_type_name(name: &str) -> DbResult<&str> {
    let name = name.trim();
    if is_type_name(name) {
        Ok(name)
    } else {
        Err(GatewayError::invalid_argument(format!(
            "'{}' is not a valid SQL type name",
            name
        )))
    }
}

/// Argument names are interpolated, so they must be plain identifiers.
pub fn validate_identifier(name: &str) -> DbResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(GatewayError::invalid_argument(format!(
            "'{}' is not a valid parameter name",
            name
        )))
    }
}

/// Encode a value as a SQL literal.
///
/// Numbers are unquoted and culture-invariant; dates and timestamps use the
/// supplied patterns; everything textual is quoted with embedded quotes
/// doubled.
pub fn encode_literal(value: &SqlValue, locale: &LocaleSettings) -> DbResult<String> {
    match value {
        SqlValue::Null => Ok("NULL".to_string()),
        SqlValue::Bool(true) => Ok("TRUE".to_string()),
        SqlValue::Bool(false) => Ok("FALSE".to_string()),
        SqlValue::Int(v) => Ok(v.to_string()),
        SqlValue::BigInt(v) => Ok(v.to_string()),
        SqlValue::Float(v) => finite(v.is_finite(), v),
        SqlValue::Double(v) => finite(v.is_finite(), v),
        SqlValue::Decimal(v) => Ok(v.as_str().to_string()),
        SqlValue::Text(v) => Ok(quote(v)),
        SqlValue::Date(v) => {
            let mut out = String::new();
            write!(out, "{}", v.format(&locale.short_date_pattern)).map_err(|_| {
                GatewayError::invalid_argument(format!(
                    "Cannot format date with pattern '{}'",
                    locale.short_date_pattern
                ))
            })?;
            Ok(quote(&out))
        }
        SqlValue::Timestamp(v) => {
            let mut out = String::new();
            write!(out, "{}", v.format(&locale.long_date_pattern)).map_err(|_| {
                GatewayError::invalid_argument(format!(
                    "Cannot format timestamp with pattern '{}'",
                    locale.long_date_pattern
                ))
            })?;
            Ok(quote(&out))
        }
    }
}

fn finite(is_finite: bool, value: impl std::fmt::Display) -> DbResult<String> {
    if is_finite {
        Ok(value.to_string())
    } else {
        Err(GatewayError::invalid_argument(format!(
            "Non-finite value '{}' cannot be written as a SQL literal",
            value
        )))
    }
}

/// Wrap in single quotes, doubling embedded ones.
pub fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}
