//! Typing of bind values.
//!
//! [`Value`] carries one integer and one float kind. Before a statement is
//! sent, each parameter is coerced to the column type the server declared
//! for its marker, so an `Int64` can fill an `int` or `smallint` column and
//! a `Float64` a `float` column. Values that do not fit are rejected rather
//! than narrowed or dropped.

use uuid::Uuid;

use super::{ColumnType, CqlValue};
use crate::error::ExecutionError;
use crate::value::Value;

/// Coerce positional parameters to the declared marker types.
pub fn bind_values(
    values: &[Value],
    types: &[ColumnType],
) -> Result<Vec<Option<CqlValue>>, ExecutionError> {
    if values.len() != types.len() {
        return Err(ExecutionError::InvalidQuery(format!(
            "Statement declares {} bind markers but {} values were given",
            types.len(),
            values.len()
        )));
    }
    values
        .iter()
        .zip(types)
        .map(|(value, typ)| bind_value(value, typ))
        .collect()
}

/// Coerce one value. `Null` binds as an unset cell.
pub fn bind_value(value: &Value, typ: &ColumnType) -> Result<Option<CqlValue>, ExecutionError> {
    let bound = match (value, typ) {
        (Value::Null, _) => return Ok(None),
        (Value::Bool(b), ColumnType::Boolean) => CqlValue::Boolean(*b),

        (Value::Int64(n), ColumnType::TinyInt) => CqlValue::TinyInt(narrow(*n, typ)?),
        (Value::Int64(n), ColumnType::SmallInt) => CqlValue::SmallInt(narrow(*n, typ)?),
        (Value::Int64(n), ColumnType::Int) => CqlValue::Int(narrow(*n, typ)?),
        (Value::Int64(n), ColumnType::BigInt) => CqlValue::BigInt(*n),
        (Value::Int64(n), ColumnType::Counter) => CqlValue::Counter(*n),
        (Value::Int64(n), ColumnType::Varint) => CqlValue::Varint(n.to_be_bytes().to_vec()),
        (Value::Int64(n), ColumnType::Decimal) => CqlValue::Decimal {
            unscaled: n.to_be_bytes().to_vec(),
            scale: 0,
        },
        (Value::Int64(n), ColumnType::Float) => CqlValue::Float(*n as f32),
        (Value::Int64(n), ColumnType::Double) => CqlValue::Double(*n as f64),
        (Value::Int64(n), ColumnType::Timestamp) => CqlValue::Timestamp(*n),
        (Value::Int64(n), ColumnType::Time) => CqlValue::Time(*n),

        (Value::Float64(f), ColumnType::Float) => CqlValue::Float(*f as f32),
        (Value::Float64(f), ColumnType::Double) => CqlValue::Double(*f),

        (Value::Text(s), ColumnType::Text) => CqlValue::Text(s.clone()),
        (Value::Text(s), ColumnType::Ascii) if s.is_ascii() => CqlValue::Ascii(s.clone()),
        (Value::Text(s), ColumnType::Inet) => CqlValue::Inet(parse(s, typ)?),
        (Value::Text(s), ColumnType::Uuid) => CqlValue::Uuid(parse(s, typ)?),
        (Value::Text(s), ColumnType::TimeUuid) => CqlValue::TimeUuid(parse::<Uuid>(s, typ)?),

        (Value::Bytes(b), ColumnType::Blob) => CqlValue::Blob(b.clone()),
        (Value::Timestamp(ts), ColumnType::Timestamp) => CqlValue::Timestamp(ts.timestamp_millis()),
        (Value::Uuid(id), ColumnType::Uuid) => CqlValue::Uuid(*id),
        (Value::Uuid(id), ColumnType::TimeUuid) => CqlValue::TimeUuid(*id),

        (Value::List(items), ColumnType::List(inner)) => CqlValue::List(bind_elements(items, inner)?),
        (Value::List(items), ColumnType::Set(inner)) => CqlValue::Set(bind_elements(items, inner)?),
        (Value::Map(entries), ColumnType::Map(key, val)) => CqlValue::Map(
            entries
                .iter()
                .map(|(k, v)| Ok((bind_element(k, key)?, bind_element(v, val)?)))
                .collect::<Result<_, ExecutionError>>()?,
        ),

        _ => return Err(mismatch(value, typ)),
    };
    Ok(Some(bound))
}

fn bind_elements(items: &[Value], typ: &ColumnType) -> Result<Vec<CqlValue>, ExecutionError> {
    items.iter().map(|item| bind_element(item, typ)).collect()
}

/// Collections cannot hold nulls.
fn bind_element(value: &Value, typ: &ColumnType) -> Result<CqlValue, ExecutionError> {
    bind_value(value, typ)?.ok_or_else(|| {
        ExecutionError::InvalidQuery(format!("Null element in a collection of {:?}", typ))
    })
}

fn narrow<T: TryFrom<i64>>(n: i64, typ: &ColumnType) -> Result<T, ExecutionError> {
    T::try_from(n).map_err(|_| {
        ExecutionError::InvalidQuery(format!("Value {} is out of range for a {:?} column", n, typ))
    })
}

fn parse<T: std::str::FromStr>(s: &str, typ: &ColumnType) -> Result<T, ExecutionError> {
    s.parse()
        .map_err(|_| ExecutionError::InvalidQuery(format!("'{}' is not a valid {:?}", s, typ)))
}

fn mismatch(value: &Value, typ: &ColumnType) -> ExecutionError {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Int64(_) => "integer",
        Value::Float64(_) => "float",
        Value::Text(_) => "text",
        Value::Bytes(_) => "bytes",
        Value::Timestamp(_) => "timestamp",
        Value::Uuid(_) => "uuid",
        Value::List(_) => "list",
        Value::Map(_) => "map",
    };
    ExecutionError::InvalidQuery(format!("Cannot bind a {} value to a {:?} column", kind, typ))
}
