//! # cassandra-client
//!
//! Shared-connection client for Cassandra-compatible stores.
//!
//! Clients acquire reference-counted connection handles from a
//! [`HandleRegistry`]; every client created under the same name shares one
//! session. Statements carry per-call options (consistency, serial
//! consistency, tracing, fetch size, paging state, idempotence, retry
//! policy) and each page comes back as a generic [`ResultSet`], delivered
//! as a callback on the host's [`HostContext`].
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use cassandra_client::prelude::*;
//! use tokio::runtime::Handle;
//!
//! let registry = HandleRegistry::new(MemoryDriver::new(), Handle::current());
//! let mut context = HostContext::new();
//! let client = CassandraClient::create_shared_default(
//!     &registry,
//!     context.handle(),
//!     &ClientConfig::new(["127.0.0.1"]),
//! )?;
//!
//! let options = ExecutionOptions::new()
//!     .consistency_level(Consistency::Quorum)
//!     .fetch_size(100);
//! client.execute_with_options("SELECT * FROM users", vec![], &options, |outcome| {
//!     if let Ok(rs) = outcome {
//!         println!("{}", rs.to_json());
//!     }
//! })?;
//! context.turn().await;
//! ```
//!
//! ## Backends
//!
//! | Driver         | Feature  | Use                        |
//! |----------------|----------|----------------------------|
//! | `MemoryDriver` | always   | tests, embedding           |
//! | `ScyllaDriver` | `scylla` | Cassandra / ScyllaDB nodes |

pub mod bridge;
pub mod client;
pub mod config;
pub mod decoder;
pub mod driver;
pub mod error;
pub mod handle;
pub mod options;
pub mod registry;
pub mod retry;
pub mod statement;
pub mod value;

pub use bridge::{AsyncBridge, ContextHandle, HostContext};
pub use client::{CassandraClient, DEFAULT_CLIENT_NAME};
pub use config::ClientConfig;
pub use decoder::{ExecutionInfo, ResultSet};
pub use error::{ClientError, ClientResult, ExecutionError};
pub use handle::{ConnectionHandle, HandleState};
pub use options::{Consistency, ExecutionOptions, PagingState, RetryPolicy, SerialConsistency};
pub use registry::HandleRegistry;
pub use value::Value;

pub mod prelude {
    pub use crate::bridge::{AsyncBridge, ContextHandle, HostContext};
    pub use crate::client::{CassandraClient, DEFAULT_CLIENT_NAME};
    pub use crate::config::ClientConfig;
    pub use crate::decoder::{ExecutionInfo, ResultSet};
    pub use crate::driver::memory::MemoryDriver;
    #[cfg(feature = "scylla")]
    pub use crate::driver::scylla::ScyllaDriver;
    pub use crate::error::*;
    pub use crate::handle::{ConnectionHandle, HandleState};
    pub use crate::options::*;
    pub use crate::registry::HandleRegistry;
    pub use crate::value::Value;
}
