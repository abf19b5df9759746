//! Client facade.
//!
//! A [`CassandraClient`] holds one reference to a shared connection handle
//! and submits statements through it. Results come back either as a
//! callback on the host context or, for async callers, as a future.
//!
//! ```rust,ignore
//! let registry = HandleRegistry::new(MemoryDriver::new(), Handle::current());
//! let mut context = HostContext::new();
//! let config = ClientConfig::new(["127.0.0.1"]);
//!
//! let client = CassandraClient::create_shared(&registry, context.handle(), &config, "orders")?;
//! client.execute("SELECT * FROM system.local", |outcome| {
//!     println!("{:?}", outcome.map(|rs| rs.size()));
//! })?;
//! context.turn().await;
//! ```

use std::fmt;
use std::future::Future;

use tracing::debug;
use uuid::Uuid;

use crate::bridge::{AsyncBridge, ContextHandle};
use crate::config::ClientConfig;
use crate::decoder::{ResultSet, decode};
use crate::driver::{Driver, Session};
use crate::error::ClientResult;
use crate::handle::ConnectionHandle;
use crate::options::ExecutionOptions;
use crate::registry::HandleRegistry;
use crate::statement::{Statement, build_statement};
use crate::value::Value;

/// Registry name used by [`CassandraClient::create_shared_default`].
pub const DEFAULT_CLIENT_NAME: &str = "DEFAULT";

/// A client bound to one shared connection.
pub struct CassandraClient<D: Driver> {
    handle: ConnectionHandle<D>,
    bridge: AsyncBridge,
}

impl<D: Driver> CassandraClient<D> {
    /// Client sharing the connection registered under `name`.
    ///
    /// The configuration is validated here; an invalid one fails with
    /// [`ClientError::Configuration`](crate::error::ClientError::Configuration)
    /// and nothing is registered. When `name` is already registered the
    /// existing connection is shared and `config` is not used for it.
    pub fn create_shared(
        registry: &HandleRegistry<D>,
        context: ContextHandle,
        config: &ClientConfig,
        name: &str,
    ) -> ClientResult<Self> {
        let options = config.cluster_options()?;
        let handle = registry.acquire(name, options);
        debug!(name, refs = handle.ref_count(), "client created");
        Ok(Self {
            handle,
            bridge: AsyncBridge::new(registry.runtime().clone(), context),
        })
    }

    /// Client sharing the connection registered under [`DEFAULT_CLIENT_NAME`].
    pub fn create_shared_default(
        registry: &HandleRegistry<D>,
        context: ContextHandle,
        config: &ClientConfig,
    ) -> ClientResult<Self> {
        Self::create_shared(registry, context, config, DEFAULT_CLIENT_NAME)
    }

    /// Client with a connection of its own, registered under a fresh name.
    pub fn create_non_shared(
        registry: &HandleRegistry<D>,
        context: ContextHandle,
        config: &ClientConfig,
    ) -> ClientResult<Self> {
        let name = Uuid::new_v4().to_string();
        Self::create_shared(registry, context, config, &name)
    }

    /// Registry name of the underlying connection.
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn handle(&self) -> &ConnectionHandle<D> {
        &self.handle
    }

    /// Execute `query` with no parameters and default options.
    pub fn execute<C>(&self, query: &str, callback: C) -> ClientResult<&Self>
    where
        C: FnOnce(ClientResult<ResultSet>) + Send + 'static,
    {
        self.execute_with_options(query, Vec::new(), &ExecutionOptions::default(), callback)
    }

    /// Execute `query` with positional parameters and default options.
    pub fn execute_with_params<C>(
        &self,
        query: &str,
        parameters: Vec<Value>,
        callback: C,
    ) -> ClientResult<&Self>
    where
        C: FnOnce(ClientResult<ResultSet>) + Send + 'static,
    {
        self.execute_with_options(query, parameters, &ExecutionOptions::default(), callback)
    }

    /// Execute `query` and deliver its outcome to `callback` on the host
    /// context.
    ///
    /// Parameter and option mistakes are returned right away and the
    /// callback is dropped without running. Once submitted, the callback
    /// runs exactly once.
    pub fn execute_with_options<C>(
        &self,
        query: &str,
        parameters: Vec<Value>,
        options: &ExecutionOptions,
        callback: C,
    ) -> ClientResult<&Self>
    where
        C: FnOnce(ClientResult<ResultSet>) + Send + 'static,
    {
        let statement = build_statement(query, parameters, options)?;
        self.bridge.deliver(self.run(statement), callback);
        Ok(self)
    }

    /// Execute `query` and await the decoded page.
    pub async fn query(
        &self,
        query: &str,
        parameters: Vec<Value>,
        options: &ExecutionOptions,
    ) -> ClientResult<ResultSet> {
        let statement = build_statement(query, parameters, options)?;
        self.run(statement).await
    }

    /// Give this client's reference back to the registry.
    ///
    /// Statements already submitted still complete. The session is closed in
    /// the background once no client holds the name.
    pub fn close(self) {
        debug!(name = %self.handle.name(), "client closed");
    }

    fn run(
        &self,
        statement: Statement,
    ) -> impl Future<Output = ClientResult<ResultSet>> + Send + use<D> {
        // The statement holds its own reference until it finishes, so a
        // close() right after submission cannot tear the session down under it.
        let handle = self.handle.clone();
        async move {
            let session = handle.session().await?;
            let tracing = statement.tracing;
            let native = session.execute(statement).await?;
            Ok(decode(native, tracing))
        }
    }
}

impl<D: Driver> fmt::Debug for CassandraClient<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CassandraClient")
            .field("handle", &self.handle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::HostContext;
    use crate::driver::memory::MemoryDriver;
    use crate::driver::{ColumnSpec, ColumnType, CqlValue, NativeRow};
    use crate::error::ClientError;
    use tokio::runtime::Handle;
    use tokio::sync::oneshot;

    fn config() -> ClientConfig {
        ClientConfig::new(["127.0.0.1"])
    }

    #[tokio::test]
    async fn test_shared_and_non_shared_names() {
        let registry = HandleRegistry::new(MemoryDriver::new(), Handle::current());
        let context = HostContext::new();

        let a = CassandraClient::create_shared_default(&registry, context.handle(), &config()).unwrap();
        let b = CassandraClient::create_shared_default(&registry, context.handle(), &config()).unwrap();
        let c = CassandraClient::create_non_shared(&registry, context.handle(), &config()).unwrap();
        let d = CassandraClient::create_non_shared(&registry, context.handle(), &config()).unwrap();

        assert_eq!(a.name(), DEFAULT_CLIENT_NAME);
        assert_eq!(registry.ref_count(DEFAULT_CLIENT_NAME), Some(2));
        assert_ne!(c.name(), d.name());
        assert_eq!(registry.len(), 3);

        a.close();
        b.close();
        c.close();
        assert_eq!(registry.names(), vec![d.name().to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_config_registers_nothing() {
        let driver = MemoryDriver::new();
        let cluster = driver.cluster().clone();
        let registry = HandleRegistry::new(driver, Handle::current());
        let context = HostContext::new();

        let err = CassandraClient::create_shared(
            &registry,
            context.handle(),
            &ClientConfig::new(["not a host"]),
            "a",
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
        assert!(registry.is_empty());
        assert_eq!(cluster.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_callback_receives_rows() {
        let driver = MemoryDriver::new();
        driver.cluster().respond(
            "SELECT name FROM users",
            vec![ColumnSpec::new("name", ColumnType::Text)],
            vec![NativeRow::new(vec![Some(CqlValue::Text("ada".into()))])],
        );
        let registry = HandleRegistry::new(driver, Handle::current());
        let mut context = HostContext::new();
        let client = CassandraClient::create_shared(&registry, context.handle(), &config(), "a").unwrap();

        let (tx, rx) = oneshot::channel();
        client
            .execute("SELECT name FROM users", move |outcome| {
                let _ = tx.send(outcome);
            })
            .unwrap();

        let rs = context.run_until(rx).await.unwrap().unwrap();
        assert_eq!(rs.columns(), ["name".to_string()]);
        assert_eq!(rs.rows()[0][0], Value::from("ada"));
    }

    #[tokio::test]
    async fn test_programming_error_is_synchronous() {
        let driver = MemoryDriver::new();
        let cluster = driver.cluster().clone();
        let registry = HandleRegistry::new(driver, Handle::current());
        let context = HostContext::new();
        let client = CassandraClient::create_shared(&registry, context.handle(), &config(), "a").unwrap();

        let err = client
            .execute_with_params("SELECT * FROM t WHERE k = ?", vec![], |_| {
                panic!("callback must not run");
            })
            .unwrap_err();
        assert!(matches!(err, ClientError::Programming(_)));
        assert_eq!(cluster.connect_count(), 0);
        assert!(cluster.executed().is_empty());
    }

    #[tokio::test]
    async fn test_query_connects_once() {
        let driver = MemoryDriver::new();
        let cluster = driver.cluster().clone();
        let registry = HandleRegistry::new(driver, Handle::current());
        let context = HostContext::new();
        let client = CassandraClient::create_shared(&registry, context.handle(), &config(), "a").unwrap();

        for _ in 0..3 {
            client
                .query("SELECT * FROM t", vec![], &ExecutionOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(cluster.connect_count(), 1);
        assert_eq!(cluster.executed().len(), 3);
    }
}
