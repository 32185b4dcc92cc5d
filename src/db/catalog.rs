//! Argument type discovery for named-notation calls.
//!
//! Before a bound function or procedure call, the gateway asks `pg_proc`
//! which types the target declares for the supplied argument names, so the
//! encoder can cast each bound value the way an untyped literal would
//! resolve. Overloads that disagree on an argument's type leave it uncast.

use crate::config::ArgumentMode;
use crate::db::encoder::{ArgumentTypes, Statement, callable_name, is_type_name};
use crate::models::{InvocationKind, InvocationRequest, SqlValue, TabularResult};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

const ARGUMENT_TYPES_SQL: &str = r#"SELECT a.name, pg_catalog.format_type(a.type_oid, NULL) AS type_name
FROM pg_catalog.pg_proc p
CROSS JOIN LATERAL unnest(
    p.proargnames,
    COALESCE(p.proallargtypes, p.proargtypes::oid[]),
    COALESCE(p.proargmodes, array_fill('i'::"char", ARRAY[p.pronargs::int]))
) AS a(name, type_oid, mode)
WHERE p.proname = $1
  AND CASE WHEN $2 = ''
           THEN pg_catalog.pg_function_is_visible(p.oid)
           ELSE p.pronamespace = (SELECT n.oid FROM pg_catalog.pg_namespace n WHERE n.nspname = $2)
      END
  AND p.prokind::text = $3
  AND a.mode::text IN ('i', 'b')
  AND a.name = ANY (pg_catalog.string_to_array($4, ','))"#;

/// Arguments that are bound without a declared type.
fn untyped_arguments(request: &InvocationRequest, mode: ArgumentMode) -> Vec<String> {
    let binds = match request.kind {
        InvocationKind::Function => mode == ArgumentMode::Bound,
        InvocationKind::Procedure => true,
        InvocationKind::Scalar => false,
    };
    if !binds {
        return Vec::new();
    }
    request
        .parameters
        .iter()
        .filter(|p| p.sql_type.is_none() && !p.value.is_null())
        .map(|p| p.name.to_ascii_lowercase())
        .collect()
}

/// The catalog query for `request`, or `None` when nothing needs a type or
/// the target is not a plain (optionally schema-qualified) name.
pub(crate) fn argument_type_query(
    request: &InvocationRequest,
    mode: ArgumentMode,
) -> Option<Statement> {
    let names = untyped_arguments(request, mode);
    if names.is_empty() {
        return None;
    }

    let target = callable_name(request.target.trim());
    if target.contains(['"', '(', ' ']) {
        return None;
    }
    let (schema, name) = match target.split('.').collect::<Vec<_>>().as_slice() {
        [name] => (String::new(), name.to_ascii_lowercase()),
        [schema, name] => (schema.to_ascii_lowercase(), name.to_ascii_lowercase()),
        _ => return None,
    };
    let prokind = match request.kind {
        InvocationKind::Procedure => "p",
        _ => "f",
    };

    Some(Statement {
        sql: ARGUMENT_TYPES_SQL.to_string(),
        binds: vec![
            SqlValue::Text(name),
            SqlValue::Text(schema),
            SqlValue::Text(prokind.to_string()),
            SqlValue::Text(names.join(",")),
        ],
    })
}

/// Collect `name -> type` pairs, dropping names whose overloads disagree.
pub(crate) fn argument_types(result: &TabularResult) -> ArgumentTypes {
    let mut found: HashMap<String, Option<String>> = HashMap::new();
    for row in &result.rows {
        let (Some(name), Some(sql_type)) = (
            row.get("name").and_then(JsonValue::as_str),
            row.get("type_name").and_then(JsonValue::as_str),
        ) else {
            continue;
        };
        if !is_type_name(sql_type) {
            continue;
        }
        found
            .entry(name.to_string())
            .and_modify(|known| {
                if known.as_deref() != Some(sql_type) {
                    *known = None;
                }
            })
            .or_insert_with(|| Some(sql_type.to_string()));
    }
    found
        .into_iter()
        .filter_map(|(name, sql_type)| sql_type.map(|t| (name, t)))
        .collect()
}
