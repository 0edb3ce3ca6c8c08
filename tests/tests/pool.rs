//! Pool invariants under contention: the semaphore caps concurrent
//! acquisitions at the pool size, permits never leak, and connections are
//! reused rather than re-created.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::*;
use surrealix::{Connection, ConnectionConfig, ConnectionPool, Error};
use tokio::time::sleep;

fn pool_config() -> ConnectionConfig {
    // No credentials: acquisition must not sign in anywhere.
    ConnectionConfig::new("http://127.0.0.1:1", "", "", "test", "test")
}

#[tokio::test]
async fn contention_respects_pool_size() -> Result<()> {
    init_tracing();

    let pool = ConnectionPool::new(pool_config(), 2)?;

    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let pool = pool.clone();
        let current = current.clone();
        let peak = peak.clone();
        tasks.push(tokio::spawn(async move {
            let guard = pool.acquire().await?;
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            assert!(guard.session().is_connected());
            sleep(Duration::from_millis(10)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            drop(guard);
            anyhow::Ok(())
        }));
    }
    for task in tasks {
        task.await??;
    }

    assert!(peak.load(Ordering::SeqCst) <= 2, "more than `size` connections in use at once");
    assert_eq!(pool.in_use(), 0);
    assert!(pool.total() <= 2, "pool created more connections than its size");
    // All permits returned: a full round of acquisitions succeeds again.
    let a = pool.acquire().await?;
    let b = pool.acquire().await?;
    drop((a, b));

    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn failed_acquire_does_not_leak_permits() -> Result<()> {
    init_tracing();

    // A websocket config pointing nowhere: connect() fails inside acquire.
    let config = ConnectionConfig::new("ws://127.0.0.1:1", "", "", "test", "test").without_reconnect();
    let pool = ConnectionPool::new(config, 1)?;

    for _ in 0..3 {
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }
    // If a permit leaked above, this acquire would hang rather than fail.
    let err = tokio::time::timeout(Duration::from_secs(5), pool.acquire()).await?.unwrap_err();
    assert!(matches!(err, Error::Connection(_)));

    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn closed_pool_rejects_acquires() -> Result<()> {
    let pool = ConnectionPool::new(pool_config(), 2)?;
    let guard = pool.acquire().await?;
    drop(guard);

    pool.close().await;
    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
    Ok(())
}

#[tokio::test]
async fn released_connections_are_reused() -> Result<()> {
    let pool = ConnectionPool::new(pool_config(), 3)?;

    for _ in 0..10 {
        let guard = pool.acquire().await?;
        drop(guard);
    }
    assert_eq!(pool.total(), 1, "sequential acquisitions must reuse one connection");

    pool.close().await;
    Ok(())
}
