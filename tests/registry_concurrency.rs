//! Reference counting of the handle registry under concurrent use.

use cassandra_client::config::ClientConfig;
use cassandra_client::driver::memory::MemoryDriver;
use cassandra_client::{ConnectionHandle, HandleRegistry};
use tokio::runtime::Handle;

fn options() -> cassandra_client::config::ClusterOptions {
    ClientConfig::new(["127.0.0.1"]).cluster_options().unwrap()
}

async fn acquire_many(
    registry: &HandleRegistry<MemoryDriver>,
    names: impl IntoIterator<Item = String>,
) -> Vec<ConnectionHandle<MemoryDriver>> {
    let tasks: Vec<_> = names
        .into_iter()
        .map(|name| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.acquire(&name, options()) })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }
    handles
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquires_of_one_name() {
    let registry = HandleRegistry::new(MemoryDriver::new(), Handle::current());

    let handles = acquire_many(&registry, (0..64).map(|_| "shared".to_string())).await;
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.ref_count("shared"), Some(64));

    let releases: Vec<_> = handles
        .into_iter()
        .map(|handle| tokio::spawn(async move { handle.release() }))
        .collect();
    for release in releases {
        release.await.unwrap();
    }
    assert!(registry.is_empty());
    assert_eq!(registry.ref_count("shared"), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquires_of_distinct_names() {
    let registry = HandleRegistry::new(MemoryDriver::new(), Handle::current());

    let handles = acquire_many(&registry, (0..16).map(|i| format!("client-{}", i))).await;
    assert_eq!(registry.len(), 16);
    assert!(handles.iter().all(|h| h.ref_count() == 1));

    drop(handles);
    assert!(registry.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interleaved_acquire_and_release_never_loses_a_reference() {
    let registry = HandleRegistry::new(MemoryDriver::new(), Handle::current());
    // Keeps the name registered for the whole run.
    let anchor = registry.acquire("a", options());

    let churn: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    let handle = registry.acquire("a", options());
                    tokio::task::yield_now().await;
                    drop(handle);
                }
            })
        })
        .collect();
    for task in churn {
        task.await.unwrap();
    }

    assert_eq!(registry.ref_count("a"), Some(1));
    assert_eq!(anchor.ref_count(), 1);
    drop(anchor);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_three_acquires_then_releases() {
    let registry = HandleRegistry::new(MemoryDriver::new(), Handle::current());
    let handles: Vec<_> = (0..3).map(|_| registry.acquire("a", options())).collect();
    assert_eq!(handles[0].ref_count(), 3);
    assert_eq!(registry.names(), vec!["a".to_string()]);

    for (left, handle) in (0..3).rev().zip(handles) {
        handle.release();
        assert_eq!(registry.ref_count("a").unwrap_or(0), left);
    }
    assert!(registry.is_empty());
}
