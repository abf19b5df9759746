//! Backing driver seam.
//!
//! The client never speaks the wire protocol itself. A [`Driver`] opens a
//! [`Session`] for a cluster definition; the session executes built
//! [`Statement`]s and hands back one page of driver-native rows.
//!
//! - `memory` - in-process table store, always available
//! - `bind` - coercion of parameters to declared column types
//! - `scylla` - real clusters through the `scylla` crate (feature `scylla`)

pub mod bind;
pub mod memory;
#[cfg(feature = "scylla")]
pub mod scylla;

use std::net::IpAddr;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::ClusterOptions;
use crate::error::{ClientResult, ExecutionError};
use crate::options::Consistency;
use crate::statement::Statement;

/// Opens sessions against a cluster.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    type Session: Session;

    /// Connect to the cluster and select the keyspace, if any.
    async fn connect(&self, options: &ClusterOptions) -> ClientResult<Self::Session>;
}

/// An open session. Safe to share between many in-flight requests.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Execute one statement and return its current page.
    async fn execute(&self, statement: Statement) -> Result<NativeResult, ExecutionError>;

    /// Close the session and its connections.
    async fn close(&self) -> ClientResult<()>;
}

/// Column types as the backing store reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Ascii,
    Text,
    Boolean,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Counter,
    Float,
    Double,
    Decimal,
    Varint,
    Blob,
    Timestamp,
    Date,
    Time,
    Duration,
    Uuid,
    TimeUuid,
    Inet,
    List(Box<ColumnType>),
    Set(Box<ColumnType>),
    Map(Box<ColumnType>, Box<ColumnType>),
    Tuple(Vec<ColumnType>),
    UserDefined { name: String },
    Custom(String),
}

/// Name and type of a result column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub typ: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, typ: ColumnType) -> Self {
        Self {
            name: name.into(),
            typ,
        }
    }
}

/// A cell in the backing store's own type system.
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    Ascii(String),
    Text(String),
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Counter(i64),
    Float(f32),
    Double(f64),
    /// `unscaled * 10^-scale`, the unscaled part as big-endian two's
    /// complement bytes.
    Decimal { unscaled: Vec<u8>, scale: i32 },
    /// Arbitrary precision integer as big-endian two's complement bytes.
    Varint(Vec<u8>),
    Blob(Vec<u8>),
    /// Milliseconds since the epoch.
    Timestamp(i64),
    /// Days since the epoch, centred on 2^31.
    Date(u32),
    /// Nanoseconds since midnight.
    Time(i64),
    Duration {
        months: i32,
        days: i32,
        nanoseconds: i64,
    },
    Uuid(Uuid),
    TimeUuid(Uuid),
    Inet(IpAddr),
    List(Vec<CqlValue>),
    Set(Vec<CqlValue>),
    Map(Vec<(CqlValue, CqlValue)>),
    Tuple(Vec<Option<CqlValue>>),
    UserDefined {
        type_name: String,
        fields: Vec<(String, Option<CqlValue>)>,
    },
    /// A zero-length value of a non-text type.
    Empty,
}

/// One row; `None` is a null cell.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeRow {
    pub columns: Vec<Option<CqlValue>>,
}

impl NativeRow {
    pub fn new(columns: Vec<Option<CqlValue>>) -> Self {
        Self { columns }
    }
}

/// One page of a result as the driver delivered it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeResult {
    pub columns: Vec<ColumnSpec>,
    /// Rows of the current page only.
    pub rows: Vec<NativeRow>,
    /// Raw token for the next page; `None` on the last page.
    pub paging_state: Option<Vec<u8>>,
    /// Trace session id, when the request was traced.
    pub tracing_id: Option<Uuid>,
    /// Set when a retry ran at a different level than requested.
    pub achieved_consistency: Option<Consistency>,
    pub warnings: Vec<String>,
}

impl NativeResult {
    /// Result of a statement that returns no rows.
    pub fn void() -> Self {
        Self::default()
    }
}
