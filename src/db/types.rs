//! PostgreSQL value decoding.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Per-category decoders extract the value as JSON
//!
//! Caller SQL runs as a prepared statement, so values arrive in binary
//! format. NUMERIC, uuid and inet have no decoder in our sqlx feature set and
//! are rendered from their wire bytes here. Other types without a dedicated
//! decoder come back as text when the bytes are printable and as base64
//! otherwise.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::{Oid, PgInterval};
use sqlx::postgres::{PgRow, PgValueFormat, PgValueRef};
use sqlx::{Column, Decode, Postgres, Row, Type, TypeInfo, ValueRef};
use std::fmt::Write as _;
use std::net::IpAddr;

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
    Binary,
    Json,
    Uuid,
    Temporal,
    Interval,
    Network,
    Array,
    Unknown,
}

/// Classify a PostgreSQL type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower.ends_with("[]") {
        return TypeCategory::Array;
    }

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    match lower.as_str() {
        "int" | "int2" | "int4" | "int8" | "smallint" | "integer" | "bigint" | "oid" => {
            TypeCategory::Integer
        }
        _ if lower.contains("serial") => TypeCategory::Integer,
        "bool" | "boolean" => TypeCategory::Boolean,
        "real" | "float4" | "float8" => TypeCategory::Float,
        _ if lower.contains("double") => TypeCategory::Float,
        "json" | "jsonb" => TypeCategory::Json,
        "bytea" => TypeCategory::Binary,
        "uuid" => TypeCategory::Uuid,
        "date" | "time" | "timestamp" | "timestamptz" => TypeCategory::Temporal,
        "interval" => TypeCategory::Interval,
        "inet" | "cidr" => TypeCategory::Network,
        // text, varchar, char, name, enums, timetz, point, ...
        _ => TypeCategory::Unknown,
    }
}

// =============================================================================
// Wire Formats
// =============================================================================

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Render a binary NUMERIC exactly as PostgreSQL prints it.
///
/// The value is a header of four 16-bit words (digit count, weight of the
/// first digit, sign, display scale) followed by base-10000 digits.
pub fn decode_numeric_binary(bytes: &[u8]) -> Result<String, BoxDynError> {
    let word = |i: usize| -> Result<u16, BoxDynError> {
        bytes
            .get(i * 2..i * 2 + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated NUMERIC value".into())
    };
    let ndigits = usize::from(word(0)?);
    let weight = i32::from(word(1)? as i16);
    let sign = word(2)?;
    let dscale = usize::from(word(3)?);

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        NUMERIC_POS | NUMERIC_NEG => {}
        other => return Err(format!("invalid NUMERIC sign 0x{:04x}", other).into()),
    }
    let digits = (0..ndigits)
        .map(|i| word(4 + i))
        .collect::<Result<Vec<_>, _>>()?;
    // Digits outside the stored range are zero
    let digit = |pos: i32| -> u16 {
        usize::try_from(pos)
            .ok()
            .and_then(|p| digits.get(p).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        write!(out, "{}", digit(0))?;
        for pos in 1..=weight {
            write!(out, "{:04}", digit(pos))?;
        }
    }
    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        for group in 1..=dscale.div_ceil(4) as i32 {
            write!(frac, "{:04}", digit(weight + group))?;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(out)
}

/// Render a 16-byte uuid in its canonical hyphenated form.
pub fn format_uuid(bytes: &[u8]) -> Result<String, BoxDynError> {
    if bytes.len() != 16 {
        return Err(format!("uuid must be 16 bytes, got {}", bytes.len()).into());
    }
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    Ok(format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    ))
}

/// Render a binary inet or cidr value.
///
/// Host addresses print without a prefix length, as PostgreSQL does for inet.
pub fn format_inet(bytes: &[u8]) -> Result<String, BoxDynError> {
    let [family, bits, is_cidr, len, addr @ ..] = bytes else {
        return Err("truncated inet value".into());
    };
    if addr.len() != usize::from(*len) {
        return Err("inet address length mismatch".into());
    }
    let (ip, max_bits) = match *family {
        2 => (IpAddr::from(<[u8; 4]>::try_from(addr)?), 32),
        3 => (IpAddr::from(<[u8; 16]>::try_from(addr)?), 128),
        other => return Err(format!("unknown inet family {}", other).into()),
    };
    if *is_cidr != 0 || *bits != max_bits {
        Ok(format!("{}/{}", ip, bits))
    } else {
        Ok(ip.to_string())
    }
}

/// Render an interval in PostgreSQL's default output style,
/// e.g. `1 year 2 mons 3 days 04:05:06.5`.
pub fn format_interval(months: i32, days: i32, microseconds: i64) -> String {
    fn unit(parts: &mut Vec<String>, n: i64, singular: &str, plural: &str) {
        if n != 0 {
            let name = if n == 1 { singular } else { plural };
            parts.push(format!("{} {}", n, name));
        }
    }

    let mut parts = Vec::new();
    unit(&mut parts, i64::from(months / 12), "year", "years");
    unit(&mut parts, i64::from(months % 12), "mon", "mons");
    unit(&mut parts, i64::from(days), "day", "days");

    if microseconds != 0 || parts.is_empty() {
        let sign = if microseconds < 0 { "-" } else { "" };
        let total = microseconds.unsigned_abs();
        let secs = total / 1_000_000;
        let mut clock = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            secs % 3600 / 60,
            secs % 60
        );
        let fraction = total % 1_000_000;
        if fraction != 0 {
            let digits = format!("{:06}", fraction);
            clock.push('.');
            clock.push_str(digits.trim_end_matches('0'));
        }
        parts.push(clock);
    }
    parts.join(" ")
}

// =============================================================================
// Binary Encoding
// =============================================================================

/// Encode bytea data as a base64 JSON string.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    JsonValue::String(STANDARD.encode(bytes))
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue>;
    fn column_names(&self) -> Vec<String>;
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name);
                (
                    col.name().to_string(),
                    decode_column(self, idx, category, type_name),
                )
            })
            .collect()
    }

    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }
}

// =============================================================================
// Decoders
// =============================================================================

fn decode_column(row: &PgRow, idx: usize, category: TypeCategory, type_name: &str) -> JsonValue {
    match category {
        TypeCategory::Decimal => decode_wire(row, idx, decode_numeric_binary),
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Boolean => decode_boolean(row, idx),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Binary => decode_binary_col(row, idx),
        TypeCategory::Json => decode_json(row, idx),
        TypeCategory::Uuid => decode_wire(row, idx, format_uuid),
        TypeCategory::Temporal => decode_temporal(row, idx, type_name),
        TypeCategory::Interval => decode_interval(row, idx),
        TypeCategory::Network => decode_wire(row, idx, format_inet),
        TypeCategory::Array => decode_array(row, idx),
        TypeCategory::Unknown => decode_text(row, idx),
    }
}

fn raw_value(row: &PgRow, idx: usize) -> Option<PgValueRef<'_>> {
    row.try_get_raw(idx).ok().filter(|v| !v.is_null())
}

/// Text-format values pass through; binary ones go through `render`.
fn decode_wire(
    row: &PgRow,
    idx: usize,
    render: fn(&[u8]) -> Result<String, BoxDynError>,
) -> JsonValue {
    let Some(value) = raw_value(row, idx) else {
        return JsonValue::Null;
    };
    let rendered = match value.format() {
        PgValueFormat::Text => value.as_str().map(str::to_owned),
        PgValueFormat::Binary => value.as_bytes().and_then(render),
    };
    match rendered {
        Ok(text) => JsonValue::String(text),
        Err(e) => {
            tracing::error!("Failed to decode {}: {}", value.type_info().name(), e);
            JsonValue::Null
        }
    }
}

fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
    if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<Oid>, _>(idx) {
        return JsonValue::Number(v.0.into());
    }
    decode_text(row, idx)
}

fn decode_boolean(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<bool>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::Bool)
        .unwrap_or(JsonValue::Null)
}

fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
        return serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string()));
    }
    if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
        return serde_json::Number::from_f64(v as f64)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string()));
    }
    JsonValue::Null
}

fn decode_binary_col(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<Vec<u8>>, _>(idx)
        .ok()
        .flatten()
        .map(|v| encode_binary_value(&v))
        .unwrap_or(JsonValue::Null)
}

fn decode_json(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<JsonValue>, _>(idx)
        .ok()
        .flatten()
        .unwrap_or(JsonValue::Null)
}

fn decode_temporal(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
    let rendered = match type_name.to_lowercase().as_str() {
        "date" => row
            .try_get::<Option<NaiveDate>, _>(idx)
            .map(|v| v.map(|d| d.to_string())),
        "time" => row
            .try_get::<Option<NaiveTime>, _>(idx)
            .map(|v| v.map(|t| t.to_string())),
        "timestamp" => row
            .try_get::<Option<NaiveDateTime>, _>(idx)
            .map(|v| v.map(|ts| ts.to_string())),
        _ => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)
            .map(|v| v.map(|ts| ts.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string())),
    };
    match rendered {
        Ok(v) => v.map(JsonValue::String).unwrap_or(JsonValue::Null),
        Err(_) => decode_text(row, idx),
    }
}

fn decode_interval(row: &PgRow, idx: usize) -> JsonValue {
    match row.try_get::<Option<PgInterval>, _>(idx) {
        Ok(Some(v)) => JsonValue::String(format_interval(v.months, v.days, v.microseconds)),
        Ok(None) => JsonValue::Null,
        Err(_) => decode_text(row, idx),
    }
}

/// One-dimensional arrays of scalar elements become JSON arrays.
fn decode_array(row: &PgRow, idx: usize) -> JsonValue {
    fn elements<T>(row: &PgRow, idx: usize) -> Option<JsonValue>
    where
        Vec<Option<T>>: for<'r> Decode<'r, Postgres> + Type<Postgres>,
        JsonValue: From<T>,
    {
        let items = row.try_get::<Option<Vec<Option<T>>>, _>(idx).ok()?;
        Some(match items {
            Some(items) => items
                .into_iter()
                .map(|item| item.map(JsonValue::from).unwrap_or(JsonValue::Null))
                .collect(),
            None => JsonValue::Null,
        })
    }

    elements::<i16>(row, idx)
        .or_else(|| elements::<i32>(row, idx))
        .or_else(|| elements::<i64>(row, idx))
        .or_else(|| elements::<f32>(row, idx))
        .or_else(|| elements::<f64>(row, idx))
        .or_else(|| elements::<bool>(row, idx))
        .or_else(|| elements::<String>(row, idx))
        .unwrap_or_else(|| decode_text(row, idx))
}

fn decode_text(row: &PgRow, idx: usize) -> JsonValue {
    let Some(value) = raw_value(row, idx) else {
        return JsonValue::Null;
    };
    let Ok(bytes) = value.as_bytes() else {
        return JsonValue::Null;
    };
    match value.format() {
        PgValueFormat::Text => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
        // Text-like types (varchar, enums, citext) send their UTF-8 bytes
        PgValueFormat::Binary => match std::str::from_utf8(bytes) {
            Ok(text) if is_printable(text) => JsonValue::String(text.to_string()),
            _ => encode_binary_value(bytes),
        },
    }
}

fn is_printable(text: &str) -> bool {
    !text
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
}
