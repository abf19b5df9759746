//! Driver for real clusters, backed by the `scylla` crate.
//!
//! Speaks the native protocol to Cassandra and ScyllaDB nodes. Built only
//! with the `scylla` feature.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use scylla::frame::response::result::{ColumnType as NativeColumnType, CqlValue as NativeValue};
use scylla::frame::value::{
    Counter, CqlDate, CqlDecimal, CqlDuration, CqlTime, CqlTimestamp, CqlTimeuuid, CqlVarint,
};
use scylla::query::Query;
use scylla::retry_policy::{
    DefaultRetryPolicy, FallthroughRetryPolicy, RetryPolicy as NativeRetryPolicy,
};
use scylla::statement::{Consistency as NativeConsistency, SerialConsistency as NativeSerial};
use scylla::transport::downgrading_consistency_retry_policy::DowngradingConsistencyRetryPolicy;
use scylla::transport::errors::{DbError, QueryError, WriteType as NativeWriteType};
use scylla::{Session as NativeSession, SessionBuilder};
use tokio::sync::RwLock;
use tracing::debug;

use super::bind::bind_values;
use super::{ColumnSpec, ColumnType, CqlValue, Driver, NativeResult, NativeRow, Session};
use crate::config::ClusterOptions;
use crate::error::{ClientError, ClientResult, ExecutionError, WriteType};
use crate::options::{Consistency, RetryPolicy, SerialConsistency};
use crate::statement::Statement;

/// `Query` and `PreparedStatement` share these setters but no trait.
macro_rules! apply_options {
    ($target:ident, $statement:expr) => {{
        let statement: &Statement = $statement;
        if let Some(level) = statement.consistency {
            $target.set_consistency(native_consistency(level));
        }
        $target.set_serial_consistency(statement.serial_consistency.map(native_serial));
        $target.set_page_size(statement.page_size);
        $target.set_tracing(statement.tracing);
        $target.set_is_idempotent(statement.idempotent);
        $target.set_timestamp(statement.timestamp);
        $target.set_retry_policy(Some(native_retry_policy(statement.retry.policy())));
    }};
}

/// Opens `scylla` sessions.
#[derive(Debug, Clone, Default)]
pub struct ScyllaDriver;

impl ScyllaDriver {
    pub fn new() -> Self {
        Self
    }
}

/// An open `scylla` session. Closing drops the underlying connection pool.
pub struct ScyllaSession {
    inner: RwLock<Option<NativeSession>>,
}

#[async_trait]
impl Driver for ScyllaDriver {
    type Session = ScyllaSession;

    async fn connect(&self, options: &ClusterOptions) -> ClientResult<ScyllaSession> {
        let mut builder = SessionBuilder::new();
        for point in &options.contact_points {
            builder = builder.known_node(point.to_string());
        }
        if let Some(keyspace) = &options.keyspace {
            builder = builder.use_keyspace(keyspace, false);
        }

        debug!(points = options.contact_points.len(), "opening scylla session");
        let session = builder
            .build()
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;
        Ok(ScyllaSession {
            inner: RwLock::new(Some(session)),
        })
    }
}

#[async_trait]
impl Session for ScyllaSession {
    async fn execute(&self, statement: Statement) -> Result<NativeResult, ExecutionError> {
        let guard = self.inner.read().await;
        let Some(session) = guard.as_ref() else {
            return Err(ExecutionError::Aborted("session is closed".into()));
        };

        let paging_state = statement.paging_state.clone().map(Bytes::from);
        let outcome = if statement.values.is_empty() {
            let mut query = Query::new(statement.query.clone());
            apply_options!(query, &statement);
            session.query_paged(query, (), paging_state).await
        } else {
            // Binding needs the marker types, which only a prepare reports.
            let mut prepared = session
                .prepare(Query::new(statement.query.clone()))
                .await
                .map_err(map_query_error)?;
            apply_options!(prepared, &statement);
            let types: Vec<ColumnType> = prepared
                .get_variable_col_specs()
                .iter()
                .map(|spec| column_type(&spec.typ))
                .collect();
            let values: Vec<Option<NativeValue>> = bind_values(&statement.values, &types)?
                .into_iter()
                .map(|cell| cell.map(to_native_value))
                .collect();
            session.execute_paged(&prepared, values, paging_state).await
        };
        let result = outcome.map_err(map_query_error)?;

        Ok(NativeResult {
            columns: result
                .col_specs
                .iter()
                .map(|spec| ColumnSpec::new(spec.name.clone(), column_type(&spec.typ)))
                .collect(),
            rows: result
                .rows
                .unwrap_or_default()
                .into_iter()
                .map(|row| {
                    NativeRow::new(
                        row.columns
                            .into_iter()
                            .map(|cell| cell.map(from_native_value))
                            .collect(),
                    )
                })
                .collect(),
            paging_state: result.paging_state.map(|raw| raw.to_vec()),
            tracing_id: result.tracing_id,
            // The driver does not report the level a retry ran at.
            achieved_consistency: None,
            warnings: result.warnings,
        })
    }

    async fn close(&self) -> ClientResult<()> {
        self.inner.write().await.take();
        Ok(())
    }
}

fn native_retry_policy(policy: RetryPolicy) -> Arc<dyn NativeRetryPolicy> {
    match policy {
        RetryPolicy::Default => Arc::new(DefaultRetryPolicy::new()),
        RetryPolicy::Downgrading => Arc::new(DowngradingConsistencyRetryPolicy::new()),
        RetryPolicy::Fallthrough => Arc::new(FallthroughRetryPolicy::new()),
    }
}

fn native_serial(level: SerialConsistency) -> NativeSerial {
    match level {
        SerialConsistency::Serial => NativeSerial::Serial,
        SerialConsistency::LocalSerial => NativeSerial::LocalSerial,
    }
}

fn native_consistency(level: Consistency) -> NativeConsistency {
    match level {
        Consistency::Any => NativeConsistency::Any,
        Consistency::One => NativeConsistency::One,
        Consistency::Two => NativeConsistency::Two,
        Consistency::Three => NativeConsistency::Three,
        Consistency::Quorum => NativeConsistency::Quorum,
        Consistency::All => NativeConsistency::All,
        Consistency::LocalQuorum => NativeConsistency::LocalQuorum,
        Consistency::EachQuorum => NativeConsistency::EachQuorum,
        Consistency::LocalOne => NativeConsistency::LocalOne,
        Consistency::Serial => NativeConsistency::Serial,
        Consistency::LocalSerial => NativeConsistency::LocalSerial,
    }
}

fn consistency(level: &NativeConsistency) -> Consistency {
    match level {
        NativeConsistency::Any => Consistency::Any,
        NativeConsistency::One => Consistency::One,
        NativeConsistency::Two => Consistency::Two,
        NativeConsistency::Three => Consistency::Three,
        NativeConsistency::Quorum => Consistency::Quorum,
        NativeConsistency::All => Consistency::All,
        NativeConsistency::LocalQuorum => Consistency::LocalQuorum,
        NativeConsistency::EachQuorum => Consistency::EachQuorum,
        NativeConsistency::LocalOne => Consistency::LocalOne,
        NativeConsistency::Serial => Consistency::Serial,
        NativeConsistency::LocalSerial => Consistency::LocalSerial,
    }
}

fn write_type(kind: &NativeWriteType) -> WriteType {
    match kind {
        NativeWriteType::Simple => WriteType::Simple,
        NativeWriteType::Batch => WriteType::Batch,
        NativeWriteType::UnloggedBatch => WriteType::UnloggedBatch,
        NativeWriteType::Counter => WriteType::Counter,
        NativeWriteType::BatchLog => WriteType::BatchLog,
        NativeWriteType::Cas => WriteType::Cas,
        _ => WriteType::Other,
    }
}

fn map_query_error(error: QueryError) -> ExecutionError {
    match error {
        QueryError::DbError(db, message) => match db {
            DbError::ReadTimeout {
                consistency: level,
                received,
                required,
                data_present,
            } => ExecutionError::ReadTimeout {
                consistency: consistency(&level),
                received: received.max(0) as u32,
                required: required.max(0) as u32,
                data_present,
            },
            DbError::WriteTimeout {
                consistency: level,
                received,
                required,
                write_type: kind,
            } => ExecutionError::WriteTimeout {
                consistency: consistency(&level),
                received: received.max(0) as u32,
                required: required.max(0) as u32,
                write_type: write_type(&kind),
            },
            DbError::Unavailable {
                consistency: level,
                required,
                alive,
            } => ExecutionError::Unavailable {
                consistency: consistency(&level),
                required: required.max(0) as u32,
                alive: alive.max(0) as u32,
            },
            DbError::SyntaxError | DbError::Invalid | DbError::Unauthorized => {
                ExecutionError::InvalidQuery(message)
            }
            DbError::ProtocolError if message.contains("paging") => {
                ExecutionError::InvalidPagingState(message)
            }
            _ => ExecutionError::Server(message),
        },
        QueryError::TimeoutError | QueryError::RequestTimeout(_) => ExecutionError::Timeout,
        QueryError::BadQuery(e) => ExecutionError::InvalidQuery(e.to_string()),
        other => ExecutionError::Server(other.to_string()),
    }
}

fn to_native_value(value: CqlValue) -> NativeValue {
    match value {
        CqlValue::Ascii(s) => NativeValue::Ascii(s),
        CqlValue::Text(s) => NativeValue::Text(s),
        CqlValue::Boolean(b) => NativeValue::Boolean(b),
        CqlValue::TinyInt(n) => NativeValue::TinyInt(n),
        CqlValue::SmallInt(n) => NativeValue::SmallInt(n),
        CqlValue::Int(n) => NativeValue::Int(n),
        CqlValue::BigInt(n) => NativeValue::BigInt(n),
        CqlValue::Counter(n) => NativeValue::Counter(Counter(n)),
        CqlValue::Float(f) => NativeValue::Float(f),
        CqlValue::Double(f) => NativeValue::Double(f),
        CqlValue::Decimal { unscaled, scale } => {
            NativeValue::Decimal(CqlDecimal::from_signed_be_bytes_and_exponent(unscaled, scale))
        }
        CqlValue::Varint(bytes) => NativeValue::Varint(CqlVarint::from_signed_bytes_be(bytes)),
        CqlValue::Blob(b) => NativeValue::Blob(b),
        CqlValue::Timestamp(ms) => NativeValue::Timestamp(CqlTimestamp(ms)),
        CqlValue::Date(days) => NativeValue::Date(CqlDate(days)),
        CqlValue::Time(nanos) => NativeValue::Time(CqlTime(nanos)),
        CqlValue::Duration {
            months,
            days,
            nanoseconds,
        } => NativeValue::Duration(CqlDuration {
            months,
            days,
            nanoseconds,
        }),
        CqlValue::Uuid(id) => NativeValue::Uuid(id),
        CqlValue::TimeUuid(id) => NativeValue::Timeuuid(CqlTimeuuid::from(id)),
        CqlValue::Inet(addr) => NativeValue::Inet(addr),
        CqlValue::List(items) => NativeValue::List(items.into_iter().map(to_native_value).collect()),
        CqlValue::Set(items) => NativeValue::Set(items.into_iter().map(to_native_value).collect()),
        CqlValue::Map(entries) => NativeValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (to_native_value(k), to_native_value(v)))
                .collect(),
        ),
        CqlValue::Tuple(items) => NativeValue::Tuple(
            items
                .into_iter()
                .map(|item| item.map(to_native_value))
                .collect(),
        ),
        CqlValue::UserDefined { type_name, fields } => NativeValue::UserDefinedType {
            keyspace: String::new(),
            type_name,
            fields: fields
                .into_iter()
                .map(|(name, value)| (name, value.map(to_native_value)))
                .collect(),
        },
        CqlValue::Empty => NativeValue::Empty,
    }
}

fn from_native_value(value: NativeValue) -> CqlValue {
    match value {
        NativeValue::Ascii(s) => CqlValue::Ascii(s),
        NativeValue::Text(s) => CqlValue::Text(s),
        NativeValue::Boolean(b) => CqlValue::Boolean(b),
        NativeValue::TinyInt(n) => CqlValue::TinyInt(n),
        NativeValue::SmallInt(n) => CqlValue::SmallInt(n),
        NativeValue::Int(n) => CqlValue::Int(n),
        NativeValue::BigInt(n) => CqlValue::BigInt(n),
        NativeValue::Counter(c) => CqlValue::Counter(c.0),
        NativeValue::Float(f) => CqlValue::Float(f),
        NativeValue::Double(f) => CqlValue::Double(f),
        NativeValue::Blob(b) => CqlValue::Blob(b),
        NativeValue::Timestamp(ts) => CqlValue::Timestamp(ts.0),
        NativeValue::Date(d) => CqlValue::Date(d.0),
        NativeValue::Time(t) => CqlValue::Time(t.0),
        NativeValue::Duration(d) => CqlValue::Duration {
            months: d.months,
            days: d.days,
            nanoseconds: d.nanoseconds,
        },
        NativeValue::Uuid(id) => CqlValue::Uuid(id),
        NativeValue::Timeuuid(id) => CqlValue::TimeUuid(id.into()),
        NativeValue::Inet(addr) => CqlValue::Inet(addr),
        NativeValue::List(items) => {
            CqlValue::List(items.into_iter().map(from_native_value).collect())
        }
        NativeValue::Set(items) => {
            CqlValue::Set(items.into_iter().map(from_native_value).collect())
        }
        NativeValue::Map(entries) => CqlValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (from_native_value(k), from_native_value(v)))
                .collect(),
        ),
        NativeValue::Tuple(items) => CqlValue::Tuple(
            items
                .into_iter()
                .map(|item| item.map(from_native_value))
                .collect(),
        ),
        NativeValue::UserDefinedType {
            type_name, fields, ..
        } => CqlValue::UserDefined {
            type_name,
            fields: fields
                .into_iter()
                .map(|(name, value)| (name, value.map(from_native_value)))
                .collect(),
        },
        NativeValue::Empty => CqlValue::Empty,
        NativeValue::Decimal(d) => {
            let (unscaled, scale) = d.into_signed_be_bytes_and_exponent();
            CqlValue::Decimal { unscaled, scale }
        }
        NativeValue::Varint(v) => CqlValue::Varint(v.into_signed_bytes_be()),
    }
}

fn column_type(typ: &NativeColumnType) -> ColumnType {
    match typ {
        NativeColumnType::Ascii => ColumnType::Ascii,
        NativeColumnType::Text => ColumnType::Text,
        NativeColumnType::Boolean => ColumnType::Boolean,
        NativeColumnType::TinyInt => ColumnType::TinyInt,
        NativeColumnType::SmallInt => ColumnType::SmallInt,
        NativeColumnType::Int => ColumnType::Int,
        NativeColumnType::BigInt => ColumnType::BigInt,
        NativeColumnType::Counter => ColumnType::Counter,
        NativeColumnType::Float => ColumnType::Float,
        NativeColumnType::Double => ColumnType::Double,
        NativeColumnType::Decimal => ColumnType::Decimal,
        NativeColumnType::Varint => ColumnType::Varint,
        NativeColumnType::Blob => ColumnType::Blob,
        NativeColumnType::Timestamp => ColumnType::Timestamp,
        NativeColumnType::Date => ColumnType::Date,
        NativeColumnType::Time => ColumnType::Time,
        NativeColumnType::Duration => ColumnType::Duration,
        NativeColumnType::Uuid => ColumnType::Uuid,
        NativeColumnType::Timeuuid => ColumnType::TimeUuid,
        NativeColumnType::Inet => ColumnType::Inet,
        NativeColumnType::List(inner) => ColumnType::List(Box::new(column_type(inner))),
        NativeColumnType::Set(inner) => ColumnType::Set(Box::new(column_type(inner))),
        NativeColumnType::Map(k, v) => {
            ColumnType::Map(Box::new(column_type(k)), Box::new(column_type(v)))
        }
        NativeColumnType::Tuple(items) => ColumnType::Tuple(items.iter().map(column_type).collect()),
        NativeColumnType::UserDefinedType { type_name, .. } => ColumnType::UserDefined {
            name: type_name.clone(),
        },
        NativeColumnType::Custom(name) => ColumnType::Custom(name.to_string()),
    }
}
