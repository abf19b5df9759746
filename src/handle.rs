//! Reference-counted connection handles.
//!
//! A handle owns at most one session, opened on first use. Handles with the
//! same registry name share that session; the last one released hands it to
//! a background teardown task.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::config::ClusterOptions;
use crate::driver::{Driver, Session};
use crate::error::{ClientError, ClientResult};
use crate::registry::RegistryInner;

/// Lifecycle of a shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// No session yet, or the last connect attempt failed.
    Unconnected,
    Connected,
    /// Released; the session is being closed.
    Closing,
    Closed,
}

/// State shared by every handle acquired under one name.
pub(crate) struct HandleShared<D: Driver> {
    pub(crate) name: String,
    options: ClusterOptions,
    driver: Arc<D>,
    /// Only changed while the registry lock is held.
    pub(crate) refs: AtomicUsize,
    state: Mutex<HandleState>,
    session: tokio::sync::Mutex<Option<Arc<D::Session>>>,
}

impl<D: Driver> HandleShared<D> {
    pub(crate) fn new(name: String, options: ClusterOptions, driver: Arc<D>) -> Self {
        Self {
            name,
            options,
            driver,
            refs: AtomicUsize::new(0),
            state: Mutex::new(HandleState::Unconnected),
            session: tokio::sync::Mutex::new(None),
        }
    }

    fn state(&self) -> HandleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: HandleState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    async fn session(&self) -> ClientResult<Arc<D::Session>> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }
        if matches!(self.state(), HandleState::Closing | HandleState::Closed) {
            return Err(ClientError::Connection(format!(
                "Handle '{}' is closed",
                self.name
            )));
        }

        debug!(name = %self.name, points = self.options.contact_points.len(), "connecting");
        let session = match self.driver.connect(&self.options).await {
            Ok(session) => Arc::new(session),
            Err(e) => {
                debug!(name = %self.name, "connect failed: {}", e);
                return Err(match e {
                    ClientError::Connection(_) => e,
                    other => ClientError::Connection(other.to_string()),
                });
            }
        };
        *slot = Some(session.clone());
        self.set_state(HandleState::Connected);
        Ok(session)
    }

    /// Close the session, if one was ever opened. Failures are discarded.
    pub(crate) async fn close(&self) {
        let session = {
            let mut slot = self.session.lock().await;
            self.set_state(HandleState::Closing);
            slot.take()
        };
        if let Some(session) = session {
            if let Err(e) = session.close().await {
                debug!(name = %self.name, "ignoring close failure: {}", e);
            }
        }
        self.set_state(HandleState::Closed);
        debug!(name = %self.name, "handle closed");
    }
}

/// An owning reference to a shared connection.
///
/// Obtained from [`HandleRegistry::acquire`](crate::registry::HandleRegistry::acquire).
/// Cloning takes another reference under the same name; dropping releases
/// one.
pub struct ConnectionHandle<D: Driver> {
    shared: Arc<HandleShared<D>>,
    registry: Arc<RegistryInner<D>>,
}

impl<D: Driver> ConnectionHandle<D> {
    pub(crate) fn new(shared: Arc<HandleShared<D>>, registry: Arc<RegistryInner<D>>) -> Self {
        Self { shared, registry }
    }

    /// Registry key of this handle.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> HandleState {
        self.shared.state()
    }

    /// References currently held under this name.
    pub fn ref_count(&self) -> usize {
        self.shared.refs.load(Ordering::Acquire)
    }

    /// The session, connecting on first use.
    ///
    /// A failed connect is reported to this caller only; the next call
    /// tries again. The returned future does not hold a reference: once the
    /// last handle is released it fails instead of reconnecting. Clone the
    /// handle into the future to keep the session open while it runs.
    pub fn session(&self) -> impl Future<Output = ClientResult<Arc<D::Session>>> + Send + use<D> {
        let shared = self.shared.clone();
        async move { shared.session().await }
    }

    /// Give the reference back. Same as dropping the handle.
    pub fn release(self) {}
}

impl<D: Driver> Clone for ConnectionHandle<D> {
    fn clone(&self) -> Self {
        self.registry.retain(&self.shared);
        Self::new(self.shared.clone(), self.registry.clone())
    }
}

impl<D: Driver> Drop for ConnectionHandle<D> {
    fn drop(&mut self) {
        self.registry.release(&self.shared);
    }
}

impl<D: Driver> fmt::Debug for ConnectionHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("name", &self.shared.name)
            .field("refs", &self.ref_count())
            .field("state", &self.state())
            .finish()
    }
}
