//! Parameter binding for PostgreSQL queries.
//!
//! Binds [`SqlValue`]s to sqlx query objects. Decimals travel as text and
//! rely on the `::numeric` cast the encoder puts after their placeholder.

use crate::models::SqlValue;
use sqlx::Postgres;
use sqlx::postgres::PgArguments;

pub(crate) type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(query: PgQuery<'q>, value: &'q SqlValue) -> PgQuery<'q> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::BigInt(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Double(v) => query.bind(*v),
        SqlValue::Decimal(v) => query.bind(v.as_str()),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::Timestamp(v) => query.bind(*v),
    }
}

/// Bind every value in order.
pub(crate) fn bind_all<'q>(query: PgQuery<'q>, values: &'q [SqlValue]) -> PgQuery<'q> {
    values.iter().fold(query, bind_postgres_param)
}
