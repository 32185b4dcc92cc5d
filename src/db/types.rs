//! PostgreSQL type mappings.
//!
//! This module turns result rows of unknown shape into JSON values.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Category-specific decoders handle the actual value extraction
//!
//! The raw decoders accept both text and binary value formats. Types without
//! a dedicated decoder (enums, domains, extension types) are read from the
//! raw value: as text when it is text, base64 otherwise. A value is never
//! silently turned into `null`.

use crate::models::{ColumnMetadata, Row, TabularResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::types::{PgInterval, PgMoney};
use sqlx::postgres::{PgRow, PgTypeInfo, PgTypeKind, PgValueFormat, PgValueRef};
use sqlx::{Column, Decode, Postgres, Row as _, Type, TypeInfo, ValueRef};
use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::warn;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Date,
    Timestamp,
    TimestampTz,
    Time,
    Interval,
    Money,
    Network,
    Array,
    Unknown,
}

/// Classify a PostgreSQL type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // builtin arrays are reported as "TEXT[]", catalog-resolved ones as "_mood"
    if lower.ends_with("[]") || lower.starts_with('_') {
        return TypeCategory::Array;
    }

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    // exact names: "point" and "interval" also contain "int"
    if matches!(
        lower.as_str(),
        "int2" | "int4" | "int8" | "smallint" | "integer" | "int" | "bigint" | "smallserial"
            | "serial" | "bigserial"
    ) {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower == "bytea" {
        return TypeCategory::Binary;
    }

    match lower.as_str() {
        "date" => TypeCategory::Date,
        "timestamp" => TypeCategory::Timestamp,
        "timestamptz" => TypeCategory::TimestampTz,
        "time" => TypeCategory::Time,
        "interval" => TypeCategory::Interval,
        "money" => TypeCategory::Money,
        "inet" | "cidr" => TypeCategory::Network,
        "text" | "varchar" | "bpchar" | "char" | "name" | "citext" | "xml" => TypeCategory::Text,
        _ => TypeCategory::Unknown,
    }
}

// =============================================================================
// Raw Decoders
// =============================================================================

/// Raw NUMERIC value as exact text.
///
/// Text-format values are taken verbatim; binary-format values are rebuilt
/// from their base-10000 digit groups.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("NUMERIC")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => numeric_to_string(value.as_bytes()?)
                .map(RawDecimal)
                .ok_or_else(|| "malformed binary NUMERIC value".into()),
        }
    }
}

/// Raw UUID value in canonical hyphenated form.
#[derive(Debug)]
pub struct RawUuid(pub String);

impl Type<Postgres> for RawUuid {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("UUID")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        ty.name().eq_ignore_ascii_case("uuid")
    }
}

impl<'r> Decode<'r, Postgres> for RawUuid {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawUuid(value.as_str()?.to_string())),
            PgValueFormat::Binary => uuid_to_string(value.as_bytes()?)
                .map(RawUuid)
                .ok_or_else(|| "malformed binary UUID value".into()),
        }
    }
}

/// Render a binary NUMERIC (ndigits, weight, sign, dscale, digits...) as text.
pub fn numeric_to_string(bytes: &[u8]) -> Option<String> {
    if bytes.len() < 8 {
        return None;
    }
    let read_i16 = |at: usize| i16::from_be_bytes([bytes[at], bytes[at + 1]]);
    let read_u16 = |at: usize| u16::from_be_bytes([bytes[at], bytes[at + 1]]);

    let ndigits = usize::try_from(read_i16(0)).ok()?;
    let weight = i32::from(read_i16(2));
    let sign = read_u16(4);
    let dscale = usize::from(read_u16(6));

    if bytes.len() < 8 + ndigits * 2 {
        return None;
    }

    match sign {
        0x0000 | 0x4000 => {}
        0xC000 => return Some("NaN".to_string()),
        0xD000 => return Some("Infinity".to_string()),
        0xF000 => return Some("-Infinity".to_string()),
        _ => return None,
    }

    let digits: Vec<i16> = (0..ndigits).map(|i| read_i16(8 + i * 2)).collect();
    let digit_at = |pos: i32| -> i16 {
        usize::try_from(pos)
            .ok()
            .and_then(|p| digits.get(p).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        for pos in 0..=weight {
            let group = digit_at(pos);
            let _ = if pos == 0 {
                write!(out, "{}", group)
            } else {
                write!(out, "{:04}", group)
            };
        }
    }

    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut pos = weight + 1;
        while frac.len() < dscale {
            let _ = write!(frac, "{:04}", digit_at(pos));
            pos += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }

    Some(out)
}

fn uuid_to_string(bytes: &[u8]) -> Option<String> {
    if bytes.len() != 16 {
        return None;
    }
    let mut out = String::with_capacity(36);
    for (i, b) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        let _ = write!(out, "{:02x}", b);
    }
    Some(out)
}

// =============================================================================
// Binary Encoding
// =============================================================================

/// Encode binary data as a base64 JSON string.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    JsonValue::String(STANDARD.encode(bytes))
}

/// Render an interval the way PostgreSQL's default output style does,
/// e.g. `1 year 2 mons 3 days 04:05:06.5`.
pub fn format_interval(months: i32, days: i32, microseconds: i64) -> String {
    fn unit(parts: &mut Vec<String>, n: i64, name: &str) {
        if n != 0 {
            let plural = if n == 1 { "" } else { "s" };
            parts.push(format!("{} {}{}", n, name, plural));
        }
    }

    let mut parts = Vec::new();
    unit(&mut parts, i64::from(months / 12), "year");
    unit(&mut parts, i64::from(months % 12), "mon");
    unit(&mut parts, i64::from(days), "day");

    if microseconds != 0 || parts.is_empty() {
        let sign = if microseconds < 0 { "-" } else { "" };
        let abs = microseconds.unsigned_abs();
        let mut clock = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            abs / 3_600_000_000,
            abs / 60_000_000 % 60,
            abs / 1_000_000 % 60
        );
        let frac = abs % 1_000_000;
        if frac > 0 {
            let digits = format!("{:06}", frac);
            clock.push('.');
            clock.push_str(digits.trim_end_matches('0'));
        }
        parts.push(clock);
    }
    parts.join(" ")
}

/// Money in the server's minor unit, assuming two fractional digits.
pub fn format_money(minor_units: i64) -> String {
    let sign = if minor_units < 0 { "-" } else { "" };
    let abs = minor_units.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Binary `inet`/`cidr`: family, bits, is_cidr, length, address bytes.
pub fn inet_to_string(bytes: &[u8]) -> Option<String> {
    let [family, bits, is_cidr, len, addr @ ..] = bytes else {
        return None;
    };
    if usize::from(*len) != addr.len() {
        return None;
    }
    let (text, max_bits) = match *family {
        2 => (Ipv4Addr::from(<[u8; 4]>::try_from(addr).ok()?).to_string(), 32),
        3 => (Ipv6Addr::from(<[u8; 16]>::try_from(addr).ok()?).to_string(), 128),
        _ => return None,
    };
    if *is_cidr == 0 && *bits == max_bits {
        Some(text)
    } else {
        Some(format!("{}/{}", text, bits))
    }
}

/// Text when the bytes are printable UTF-8, base64 otherwise.
fn text_or_base64(bytes: &[u8]) -> (JsonValue, bool) {
    match std::str::from_utf8(bytes) {
        Ok(text)
            if !text
                .chars()
                .any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r')) =>
        {
            (JsonValue::String(text.to_string()), true)
        }
        _ => (encode_binary_value(bytes), false),
    }
}

// =============================================================================
// Binary Arrays
// =============================================================================

struct Reader<'a>(&'a [u8]);

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.0.len() < n {
            return None;
        }
        let (head, tail) = self.0.split_at(n);
        self.0 = tail;
        Some(head)
    }

    fn i32(&mut self) -> Option<i32> {
        self.take(4)?.try_into().ok().map(i32::from_be_bytes)
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4)?.try_into().ok().map(u32::from_be_bytes)
    }

    fn i64(&mut self) -> Option<i64> {
        self.take(8)?.try_into().ok().map(i64::from_be_bytes)
    }
}

/// Decode a binary-format array into (possibly nested) JSON arrays.
pub fn array_to_json(bytes: &[u8]) -> Option<JsonValue> {
    let mut reader = Reader(bytes);
    let ndim = usize::try_from(reader.i32()?).ok()?;
    let _has_nulls = reader.i32()?;
    let element_oid = reader.u32()?;
    if ndim == 0 {
        return Some(JsonValue::Array(Vec::new()));
    }
    // PostgreSQL's MAXDIM
    if ndim > 6 {
        return None;
    }

    let mut dims = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        dims.push(usize::try_from(reader.i32()?).ok()?);
        let _lower_bound = reader.i32()?;
    }
    let total = dims.iter().try_fold(1usize, |acc, d| acc.checked_mul(*d))?;

    let mut elements = Vec::with_capacity(total.min(4096));
    for _ in 0..total {
        let len = reader.i32()?;
        if len < 0 {
            elements.push(JsonValue::Null);
            continue;
        }
        let data = reader.take(usize::try_from(len).ok()?)?;
        elements.push(element_to_json(element_oid, data)?);
    }
    Some(nest(&dims, &mut elements.into_iter()))
}

fn nest(dims: &[usize], items: &mut impl Iterator<Item = JsonValue>) -> JsonValue {
    match dims.split_first() {
        Some((len, [])) => JsonValue::Array(items.by_ref().take(*len).collect()),
        Some((len, rest)) => JsonValue::Array((0..*len).map(|_| nest(rest, items)).collect()),
        None => JsonValue::Null,
    }
}

fn epoch_2000() -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(2000, 1, 1)?.and_hms_opt(0, 0, 0)
}

/// Binary element by type oid (`pg_type.oid`).
fn element_to_json(oid: u32, data: &[u8]) -> Option<JsonValue> {
    let mut reader = Reader(data);
    let value = match oid {
        // bool
        16 => JsonValue::Bool(*data.first()? != 0),
        // bytea
        17 => encode_binary_value(data),
        // int2
        21 => JsonValue::from(i16::from_be_bytes(data.try_into().ok()?)),
        // int4, oid
        23 | 26 => JsonValue::from(reader.i32()?),
        // int8
        20 => JsonValue::from(reader.i64()?),
        // float4
        700 => float_json(f64::from(f32::from_be_bytes(data.try_into().ok()?))),
        // float8
        701 => float_json(f64::from_be_bytes(data.try_into().ok()?)),
        // numeric
        1700 => JsonValue::String(numeric_to_string(data)?),
        // uuid
        2950 => JsonValue::String(uuid_to_string(data)?),
        // json
        114 => serde_json::from_slice(data).ok()?,
        // jsonb: version byte, then text
        3802 => serde_json::from_slice(data.get(1..)?).ok()?,
        // date
        1082 => {
            let days = reader.i32()?;
            match days {
                i32::MAX => JsonValue::String("infinity".to_string()),
                i32::MIN => JsonValue::String("-infinity".to_string()),
                _ => {
                    let date = epoch_2000()?
                        .date()
                        .checked_add_signed(chrono::Duration::days(i64::from(days)))?;
                    JsonValue::String(date.format("%Y-%m-%d").to_string())
                }
            }
        }
        // timestamp, timestamptz
        1114 | 1184 => {
            let micros = reader.i64()?;
            match micros {
                i64::MAX => JsonValue::String("infinity".to_string()),
                i64::MIN => JsonValue::String("-infinity".to_string()),
                _ => {
                    let ts = epoch_2000()?
                        .checked_add_signed(chrono::Duration::microseconds(micros))?;
                    if oid == 1184 {
                        JsonValue::String(ts.and_utc().to_rfc3339())
                    } else {
                        JsonValue::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
                    }
                }
            }
        }
        // time
        1083 => {
            let micros = reader.i64()?;
            let secs = u32::try_from(micros / 1_000_000).ok()?;
            let nanos = u32::try_from(micros % 1_000_000 * 1_000).ok()?;
            let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)?;
            JsonValue::String(time.format("%H:%M:%S%.f").to_string())
        }
        // interval
        1186 => {
            let micros = reader.i64()?;
            let days = reader.i32()?;
            let months = reader.i32()?;
            JsonValue::String(format_interval(months, days, micros))
        }
        // money
        790 => JsonValue::String(format_money(reader.i64()?)),
        // inet, cidr
        869 | 650 => JsonValue::String(inet_to_string(data)?),
        // text-like and anything else (enum labels are sent as text)
        _ => text_or_base64(data).0,
    };
    Some(value)
}

fn float_json(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

// =============================================================================
// Row to JSON
// =============================================================================

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> Row;
    fn column_metadata(&self) -> Vec<ColumnMetadata>;
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> Row {
        self.columns()
            .iter()
            .map(|col| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name);
                let value = decode_column(self, col.ordinal(), category).unwrap_or_else(|e| {
                    warn!(
                        column = col.name(),
                        type_name,
                        error = %e,
                        "Failed to decode column; returning raw bytes"
                    );
                    raw_fallback(self, col.ordinal())
                });
                (col.name().to_string(), value)
            })
            .collect()
    }

    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        self.columns()
            .iter()
            .map(|col| ColumnMetadata::new(col.name(), col.type_info().name()))
            .collect()
    }
}

/// Materialize fetched rows into a tabular result.
pub fn materialize(rows: &[PgRow]) -> TabularResult {
    let Some(first) = rows.first() else {
        return TabularResult::empty();
    };
    TabularResult::new(
        first.column_metadata(),
        rows.iter().map(RowToJson::to_json_map).collect(),
    )
}

/// Decode a single column into a JSON value.
///
/// SQL NULL is `Ok(Null)`; a value that cannot be read is an error.
pub fn decode_column(
    row: &PgRow,
    idx: usize,
    category: TypeCategory,
) -> Result<JsonValue, sqlx::Error> {
    match category {
        TypeCategory::Decimal => decode_with(row, idx, |v: RawDecimal| JsonValue::String(v.0)),
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Boolean => decode_with(row, idx, JsonValue::Bool),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Binary => decode_with(row, idx, |v: Vec<u8>| encode_binary_value(&v)),
        TypeCategory::Json => decode_with(row, idx, |v: JsonValue| v),
        TypeCategory::Uuid => decode_with(row, idx, |v: RawUuid| JsonValue::String(v.0)),
        TypeCategory::Date => decode_with(row, idx, |v: NaiveDate| {
            JsonValue::String(v.format("%Y-%m-%d").to_string())
        }),
        TypeCategory::Timestamp => decode_with(row, idx, |v: NaiveDateTime| {
            JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }),
        TypeCategory::TimestampTz => decode_with(row, idx, |v: DateTime<Utc>| {
            JsonValue::String(v.to_rfc3339())
        }),
        TypeCategory::Time => decode_with(row, idx, |v: NaiveTime| {
            JsonValue::String(v.format("%H:%M:%S%.f").to_string())
        }),
        TypeCategory::Interval => decode_with(row, idx, |v: PgInterval| {
            JsonValue::String(format_interval(v.months, v.days, v.microseconds))
        }),
        TypeCategory::Money => {
            decode_with(row, idx, |v: PgMoney| JsonValue::String(format_money(v.0)))
        }
        TypeCategory::Network => decode_raw(row, idx, |bytes| {
            inet_to_string(bytes).map(JsonValue::String)
        }),
        TypeCategory::Array => decode_raw(row, idx, array_to_json),
        TypeCategory::Text => decode_raw(row, idx, |bytes| {
            std::str::from_utf8(bytes)
                .ok()
                .map(|s| JsonValue::String(s.to_string()))
        }),
        TypeCategory::Unknown => decode_unknown(row, idx),
    }
}

fn decode_with<T, F>(row: &PgRow, idx: usize, render: F) -> Result<JsonValue, sqlx::Error>
where
    T: for<'r> Decode<'r, Postgres> + Type<Postgres>,
    F: FnOnce(T) -> JsonValue,
{
    Ok(row
        .try_get::<Option<T>, _>(idx)?
        .map_or(JsonValue::Null, render))
}

fn decode_integer(row: &PgRow, idx: usize) -> Result<JsonValue, sqlx::Error> {
    match row.column(idx).type_info().name() {
        "INT2" => decode_with(row, idx, |v: i16| JsonValue::from(v)),
        "INT4" => decode_with(row, idx, |v: i32| JsonValue::from(v)),
        _ => decode_with(row, idx, |v: i64| JsonValue::from(v)),
    }
}

fn decode_float(row: &PgRow, idx: usize) -> Result<JsonValue, sqlx::Error> {
    match row.column(idx).type_info().name() {
        "FLOAT4" => decode_with(row, idx, |v: f32| float_json(f64::from(v))),
        _ => decode_with(row, idx, float_json),
    }
}

fn malformed(idx: usize, type_name: &str) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: idx.to_string(),
        source: format!("malformed {} value", type_name).into(),
    }
}

/// Text-format values are taken as they are; binary ones go through `binary`.
fn decode_raw<F>(row: &PgRow, idx: usize, binary: F) -> Result<JsonValue, sqlx::Error>
where
    F: FnOnce(&[u8]) -> Option<JsonValue>,
{
    let value = row.try_get_raw(idx)?;
    if value.is_null() {
        return Ok(JsonValue::Null);
    }
    let type_name = value.type_info().name().to_string();
    match value.format() {
        PgValueFormat::Text => value
            .as_str()
            .map(|s| JsonValue::String(s.to_string()))
            .map_err(|_| malformed(idx, &type_name)),
        PgValueFormat::Binary => value
            .as_bytes()
            .ok()
            .and_then(binary)
            .ok_or_else(|| malformed(idx, &type_name)),
    }
}

/// Enums, domains over unknown bases and extension types.
fn decode_unknown(row: &PgRow, idx: usize) -> Result<JsonValue, sqlx::Error> {
    let column = row.column(idx);
    if let PgTypeKind::Array(_) = column.type_info().kind() {
        return decode_raw(row, idx, array_to_json);
    }
    let is_enum = matches!(column.type_info().kind(), PgTypeKind::Enum(_));

    decode_raw(row, idx, |bytes| {
        let (value, is_text) = text_or_base64(bytes);
        if !is_text && is_enum {
            return None;
        }
        if !is_text {
            warn!(
                column = column.name(),
                type_name = column.type_info().name(),
                "No decoder for column type; returning base64"
            );
        }
        Some(value)
    })
}

/// Last resort for a value a decoder rejected: the raw bytes as base64.
fn raw_fallback(row: &PgRow, idx: usize) -> JsonValue {
    match row.try_get_raw(idx) {
        Ok(value) if value.is_null() => JsonValue::Null,
        Ok(value) => match value.as_bytes() {
            Ok(bytes) => encode_binary_value(bytes),
            Err(_) => JsonValue::Null,
        },
        Err(_) => JsonValue::Null,
    }
}
