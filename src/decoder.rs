//! Result decoding.
//!
//! Converts one driver-native page into the generic [`ResultSet`]. Only the
//! rows already delivered are decoded; decoding never fetches another page.

use chrono::{DateTime, Duration, NaiveDate};
use serde::Serialize;

use crate::driver::{CqlValue, NativeResult};
use crate::options::{Consistency, PagingState};
use crate::value::Value;

/// Metadata of one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionInfo {
    /// Trace session id. Only set when tracing was requested, and even then
    /// best effort: the store persists traces asynchronously.
    pub query_trace: Option<String>,
    /// Set when the request completed at a level other than requested.
    pub achieved_consistency_level: Option<Consistency>,
    /// Continuation token, present only when more rows remain.
    pub paging_state: Option<PagingState>,
}

/// Columns and rows of one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    column_names: Vec<String>,
    rows: Vec<Vec<Value>>,
    execution_info: ExecutionInfo,
}

impl ResultSet {
    /// Column names in the order the store reported them. May repeat.
    pub fn columns(&self) -> &[String] {
        &self.column_names
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn execution_info(&self) -> &ExecutionInfo {
        &self.execution_info
    }

    /// Number of rows in this page.
    pub fn size(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the first column with this name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names.iter().position(|c| c == name)
    }

    /// `{"columns": [...], "values": [[...], ...]}`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "columns": self.column_names,
            "values": self
                .rows
                .iter()
                .map(|row| row.iter().map(Value::to_json).collect::<Vec<_>>())
                .collect::<Vec<_>>(),
        })
    }
}

/// Decode a native page.
///
/// `tracing_requested` gates the trace id: an untraced request never
/// reports one.
pub fn decode(native: NativeResult, tracing_requested: bool) -> ResultSet {
    let column_names: Vec<String> = native.columns.into_iter().map(|c| c.name).collect();
    let width = column_names.len();

    let rows = native
        .rows
        .into_iter()
        .map(|row| {
            let mut cells: Vec<Value> = row
                .columns
                .into_iter()
                .take(width)
                .map(decode_cell)
                .collect();
            // Rows are always as wide as the column list.
            cells.resize(width, Value::Null);
            cells
        })
        .collect();

    let execution_info = ExecutionInfo {
        query_trace: if tracing_requested {
            native.tracing_id.map(|id| id.to_string())
        } else {
            None
        },
        achieved_consistency_level: native.achieved_consistency,
        paging_state: native
            .paging_state
            .filter(|raw| !raw.is_empty())
            .map(|raw| PagingState::from_bytes(&raw)),
    };

    ResultSet {
        column_names,
        rows,
        execution_info,
    }
}

fn decode_cell(cell: Option<CqlValue>) -> Value {
    match cell {
        None => Value::Null,
        Some(value) => decode_value(value),
    }
}

/// Map a native value onto [`Value`].
pub fn decode_value(value: CqlValue) -> Value {
    match value {
        CqlValue::Ascii(s) | CqlValue::Text(s) => Value::Text(s),
        CqlValue::Boolean(b) => Value::Bool(b),
        CqlValue::TinyInt(i) => Value::Int64(i as i64),
        CqlValue::SmallInt(i) => Value::Int64(i as i64),
        CqlValue::Int(i) => Value::Int64(i as i64),
        CqlValue::BigInt(i) | CqlValue::Counter(i) => Value::Int64(i),
        CqlValue::Float(f) => Value::Float64(f as f64),
        CqlValue::Double(f) => Value::Float64(f),
        CqlValue::Decimal { unscaled, scale } => Value::Text(decimal_text(&unscaled, scale)),
        CqlValue::Varint(bytes) => Value::Text(varint_text(&bytes)),
        CqlValue::Blob(b) => Value::Bytes(b),
        CqlValue::Timestamp(millis) => DateTime::from_timestamp_millis(millis)
            .map(Value::Timestamp)
            .unwrap_or(Value::Int64(millis)),
        CqlValue::Date(days) => decode_date(days),
        CqlValue::Time(nanos) => Value::Int64(nanos),
        CqlValue::Duration {
            months,
            days,
            nanoseconds,
        } => Value::Text(format!("{}mo{}d{}ns", months, days, nanoseconds)),
        CqlValue::Uuid(id) | CqlValue::TimeUuid(id) => Value::Uuid(id),
        CqlValue::Inet(addr) => Value::Text(addr.to_string()),
        CqlValue::List(items) | CqlValue::Set(items) => {
            Value::List(items.into_iter().map(decode_value).collect())
        }
        CqlValue::Map(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (decode_value(k), decode_value(v)))
                .collect(),
        ),
        CqlValue::Tuple(items) => Value::List(items.into_iter().map(decode_cell).collect()),
        CqlValue::UserDefined { fields, .. } => Value::Map(
            fields
                .into_iter()
                .map(|(name, v)| (Value::Text(name), decode_cell(v)))
                .collect(),
        ),
        CqlValue::Empty => Value::Null,
    }
}

/// Base-10 text of a big-endian two's complement integer.
pub fn varint_text(bytes: &[u8]) -> String {
    let negative = bytes.first().is_some_and(|b| b & 0x80 != 0);
    let mut magnitude: Vec<u8> = if negative {
        let mut inverted: Vec<u8> = bytes.iter().map(|b| !b).collect();
        for byte in inverted.iter_mut().rev() {
            let (sum, carry) = byte.overflowing_add(1);
            *byte = sum;
            if !carry {
                break;
            }
        }
        inverted
    } else {
        bytes.to_vec()
    };

    let mut digits = Vec::new();
    while magnitude.iter().any(|&b| b != 0) {
        let mut remainder = 0u32;
        for byte in magnitude.iter_mut() {
            let acc = (remainder << 8) | *byte as u32;
            *byte = (acc / 10) as u8;
            remainder = acc % 10;
        }
        digits.push(char::from(b'0' + remainder as u8));
    }
    if digits.is_empty() {
        digits.push('0');
    }
    if negative {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

/// Plain (non-exponent) text of `unscaled * 10^-scale`.
pub fn decimal_text(unscaled: &[u8], scale: i32) -> String {
    let text = varint_text(unscaled);
    let (sign, digits) = match text.strip_prefix('-') {
        Some(digits) => ("-", digits),
        None => ("", text.as_str()),
    };
    if scale <= 0 {
        if digits == "0" {
            return text;
        }
        return format!("{}{}{}", sign, digits, "0".repeat(scale.unsigned_abs() as usize));
    }

    let scale = scale as usize;
    let padded = if digits.len() <= scale {
        format!("{}{}", "0".repeat(scale + 1 - digits.len()), digits)
    } else {
        digits.to_string()
    };
    let (whole, fraction) = padded.split_at(padded.len() - scale);
    format!("{}{}.{}", sign, whole, fraction)
}

fn decode_date(days: u32) -> Value {
    let offset = days as i64 - (1i64 << 31);
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|epoch| epoch.checked_add_signed(Duration::days(offset)))
        .map(|date| Value::Text(date.format("%Y-%m-%d").to_string()))
        .unwrap_or(Value::Int64(offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ColumnSpec, ColumnType, NativeRow};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn native(columns: &[&str], rows: Vec<Vec<Option<CqlValue>>>) -> NativeResult {
        NativeResult {
            columns: columns
                .iter()
                .map(|c| ColumnSpec::new(*c, ColumnType::Int))
                .collect(),
            rows: rows.into_iter().map(NativeRow::new).collect(),
            ..NativeResult::default()
        }
    }

    #[test]
    fn test_order_and_width_preserved() {
        let result = decode(
            native(
                &["pk", "val", "val"],
                vec![
                    vec![Some(CqlValue::Int(2)), Some(CqlValue::Int(20)), None],
                    vec![Some(CqlValue::Int(1)), None, Some(CqlValue::Int(10))],
                ],
            ),
            false,
        );
        assert_eq!(result.columns(), &["pk", "val", "val"]);
        assert_eq!(
            result.rows(),
            &[
                vec![Value::Int64(2), Value::Int64(20), Value::Null],
                vec![Value::Int64(1), Value::Null, Value::Int64(10)],
            ]
        );
        assert_eq!(result.column_index("val"), Some(1));
    }

    #[test]
    fn test_short_row_is_padded() {
        let result = decode(native(&["a", "b"], vec![vec![Some(CqlValue::Int(1))]]), false);
        assert_eq!(result.rows()[0].len(), 2);
        assert_eq!(result.rows()[0][1], Value::Null);
    }

    #[test]
    fn test_collections_become_containers() {
        let cell = CqlValue::Map(vec![(
            CqlValue::Text("k".into()),
            CqlValue::Set(vec![CqlValue::Int(1), CqlValue::Int(2)]),
        )]);
        assert_eq!(
            decode_value(cell),
            Value::Map(vec![(
                Value::from("k"),
                Value::List(vec![Value::Int64(1), Value::Int64(2)])
            )])
        );

        let udt = CqlValue::UserDefined {
            type_name: "address".into(),
            fields: vec![("city".into(), Some(CqlValue::Text("Oslo".into()))), ("zip".into(), None)],
        };
        assert_eq!(
            decode_value(udt),
            Value::Map(vec![
                (Value::from("city"), Value::from("Oslo")),
                (Value::from("zip"), Value::Null),
            ])
        );
    }

    #[test]
    fn test_scalars() {
        assert_eq!(decode_value(CqlValue::Date(1 << 31)), Value::from("1970-01-01"));
        assert_eq!(decode_value(CqlValue::Date((1 << 31) + 1)), Value::from("1970-01-02"));
        assert_eq!(
            decode_value(CqlValue::Inet("192.168.1.1".parse().unwrap())),
            Value::from("192.168.1.1")
        );
        assert_eq!(decode_value(CqlValue::Float(1.5)), Value::Float64(1.5));
        assert_eq!(
            decode_value(CqlValue::Timestamp(1_000)),
            Value::Timestamp(DateTime::from_timestamp_millis(1_000).unwrap())
        );
        assert_eq!(decode_value(CqlValue::Empty), Value::Null);
    }

    #[test]
    fn test_varint_text() {
        assert_eq!(varint_text(&[]), "0");
        assert_eq!(varint_text(&[0x00]), "0");
        assert_eq!(varint_text(&[0x7f]), "127");
        assert_eq!(varint_text(&[0x00, 0x80]), "128");
        assert_eq!(varint_text(&[0x80]), "-128");
        assert_eq!(varint_text(&[0xff]), "-1");
        assert_eq!(varint_text(&[0xff, 0x7f]), "-129");
        assert_eq!(
            varint_text(&[0x01, 0, 0, 0, 0, 0, 0, 0, 0]),
            "18446744073709551616"
        );
    }

    #[test]
    fn test_decimal_text() {
        // 1234
        assert_eq!(decimal_text(&[0x04, 0xd2], 2), "12.34");
        assert_eq!(decimal_text(&[0x04, 0xd2], 0), "1234");
        assert_eq!(decimal_text(&[0x04, 0xd2], -2), "123400");
        assert_eq!(decimal_text(&[0x04, 0xd2], 6), "0.001234");
        assert_eq!(decimal_text(&[0xff], 3), "-0.001");
        assert_eq!(decimal_text(&[0x00], 2), "0.00");
        assert_eq!(decimal_text(&[0x00], -3), "0");
    }

    #[test]
    fn test_decimal_and_varint_cells_decode_to_numbers() {
        let rs = decode(
            native(
                &["price", "count"],
                vec![vec![
                    Some(CqlValue::Decimal {
                        unscaled: vec![0xfb, 0x2e],
                        scale: 2,
                    }),
                    Some(CqlValue::Varint(vec![0x01, 0x00])),
                ]],
            ),
            false,
        );
        assert_eq!(
            rs.rows()[0],
            vec![Value::Text("-12.34".into()), Value::Text("256".into())]
        );
    }

    #[test]
    fn test_execution_info() {
        let trace = Uuid::new_v4();
        let mut page = native(&["pk"], vec![]);
        page.tracing_id = Some(trace);
        page.paging_state = Some(vec![1, 2, 3]);
        page.achieved_consistency = Some(Consistency::One);

        let info = decode(page.clone(), false).execution_info().clone();
        assert_eq!(info.query_trace, None);
        assert_eq!(info.achieved_consistency_level, Some(Consistency::One));
        assert_eq!(info.paging_state, Some(PagingState::from_bytes(&[1, 2, 3])));

        let info = decode(page, true).execution_info().clone();
        assert_eq!(info.query_trace, Some(trace.to_string()));
    }

    #[test]
    fn test_to_json_shape() {
        let result = decode(native(&["pk"], vec![vec![Some(CqlValue::Int(7))]]), false);
        assert_eq!(
            result.to_json(),
            serde_json::json!({ "columns": ["pk"], "values": [[7]] })
        );
    }
}
