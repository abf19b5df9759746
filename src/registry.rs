//! Name-keyed registry of shared connection handles.
//!
//! The registry is an ordinary value owned by the application and passed to
//! every place that creates clients. All of its bookkeeping (insert,
//! reference counting, removal) happens under one mutex, so a name can never
//! be seen passing through zero references while another acquire for it is
//! in progress.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tracing::debug;

use crate::config::ClusterOptions;
use crate::driver::Driver;
use crate::handle::{ConnectionHandle, HandleShared};

/// Registry of connection handles keyed by name.
pub struct HandleRegistry<D: Driver> {
    inner: Arc<RegistryInner<D>>,
}

pub(crate) struct RegistryInner<D: Driver> {
    driver: Arc<D>,
    /// Runs session teardown after the last release.
    runtime: Handle,
    handles: Mutex<HashMap<String, Arc<HandleShared<D>>>>,
}

impl<D: Driver> Clone for HandleRegistry<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: Driver> HandleRegistry<D> {
    /// Create a registry whose sessions come from `driver` and are torn
    /// down on `runtime`.
    pub fn new(driver: D, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                driver: Arc::new(driver),
                runtime,
                handles: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn driver(&self) -> &D {
        &self.inner.driver
    }

    /// Runtime the registry tears sessions down on.
    pub fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Take a reference to the handle registered under `name`, creating it
    /// on a miss.
    ///
    /// `options` is only used when the handle is created; later acquires of
    /// the same name share the existing connection.
    pub fn acquire(&self, name: &str, options: ClusterOptions) -> ConnectionHandle<D> {
        let mut handles = self.inner.lock();
        let shared = handles
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(name, "registering handle");
                Arc::new(HandleShared::new(
                    name.to_string(),
                    options,
                    self.inner.driver.clone(),
                ))
            })
            .clone();
        shared.refs.fetch_add(1, Ordering::AcqRel);
        drop(handles);

        ConnectionHandle::new(shared, self.inner.clone())
    }

    /// Give a reference back. Same as dropping it.
    pub fn release(&self, handle: ConnectionHandle<D>) {
        handle.release();
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().contains_key(name)
    }

    /// References held under `name`, if it is registered.
    pub fn ref_count(&self, name: &str) -> Option<usize> {
        self.inner
            .lock()
            .get(name)
            .map(|shared| shared.refs.load(Ordering::Acquire))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl<D: Driver> RegistryInner<D> {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<HandleShared<D>>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take one more reference to an entry that is already held.
    pub(crate) fn retain(&self, shared: &Arc<HandleShared<D>>) {
        let _handles = self.lock();
        shared.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference. The last one unregisters the name and closes the
    /// session in the background without waiting for it.
    pub(crate) fn release(&self, shared: &Arc<HandleShared<D>>) {
        let mut handles = self.lock();
        if shared.refs.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        if handles
            .get(&shared.name)
            .is_some_and(|current| Arc::ptr_eq(current, shared))
        {
            handles.remove(&shared.name);
        }
        drop(handles);

        debug!(name = %shared.name, "last reference released");
        let shared = shared.clone();
        self.runtime.spawn(async move {
            shared.close().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::driver::memory::MemoryDriver;

    fn options() -> ClusterOptions {
        ClientConfig::new(["127.0.0.1"]).cluster_options().unwrap()
    }

    #[tokio::test]
    async fn test_same_name_shares_entry() {
        let registry = HandleRegistry::new(MemoryDriver::new(), Handle::current());

        let handles: Vec<_> = (0..3).map(|_| registry.acquire("a", options())).collect();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.ref_count("a"), Some(3));
        assert_eq!(handles[0].ref_count(), 3);

        let mut handles = handles.into_iter();
        handles.next().unwrap().release();
        assert_eq!(registry.ref_count("a"), Some(2));
        handles.next().unwrap().release();
        assert_eq!(registry.len(), 1);
        handles.next().unwrap().release();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_names_distinct_entries() {
        let registry = HandleRegistry::new(MemoryDriver::new(), Handle::current());
        let a = registry.acquire("a", options());
        let b = registry.acquire("b", options());
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);

        drop(a);
        assert!(!registry.contains("a"));
        assert!(registry.contains("b"));
        registry.release(b);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_reacquire_after_removal_creates_new_entry() {
        let registry = HandleRegistry::new(MemoryDriver::new(), Handle::current());
        let first = registry.acquire("a", options());
        drop(first);
        assert!(registry.is_empty());

        let second = registry.acquire("a", options());
        assert_eq!(registry.ref_count("a"), Some(1));
        assert_eq!(second.ref_count(), 1);
    }

    #[tokio::test]
    async fn test_cloned_handle_keeps_entry_registered() {
        let registry = HandleRegistry::new(MemoryDriver::new(), Handle::current());
        let handle = registry.acquire("a", options());
        let clone = handle.clone();
        assert_eq!(registry.ref_count("a"), Some(2));

        drop(handle);
        assert_eq!(registry.ref_count("a"), Some(1));
        assert_eq!(clone.name(), "a");

        drop(clone);
        assert!(registry.is_empty());
    }
}
