//! Integration tests for the connection pool.
//!
//! Uses in-memory sessions from `common` so capacity, timeouts and shutdown
//! can be checked deterministically.

mod common;

use common::{fake_pool, pool_options, FakeFactory};
use pg_gateway_mcp::db::{ConnectionPool, ConnectionState};
use pg_gateway_mcp::error::DbError;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// With more callers than slots, no more than max_size sessions are ever
/// borrowed at once and no session is handed to two callers.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_never_exceeds_max_size() {
    let (pool, state) = fake_pool(2, 4);
    pool.initialize().await.unwrap();
    state.set_delay(Duration::from_millis(20));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            let mut conn = pool.acquire(Duration::from_secs(10)).await.unwrap();
            assert!(pool.status().in_use <= 4);
            conn.fetch("SELECT 1", &[], 10).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(state.peak_active.load(Ordering::SeqCst) <= 4);
    assert!(!state.double_assigned.load(Ordering::SeqCst));
    assert!(state.opened.load(Ordering::SeqCst) <= 4);
    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert!(status.size <= 4);
}

/// An exhausted pool fails the caller at the timeout, not before or long after.
#[tokio::test(start_paused = true)]
async fn test_acquire_times_out_with_pool_exhausted() {
    let (pool, _state) = fake_pool(1, 1);
    pool.initialize().await.unwrap();
    let _held = pool.acquire(Duration::from_secs(1)).await.unwrap();

    let start = tokio::time::Instant::now();
    let result = pool.acquire(Duration::from_millis(200)).await;
    let elapsed = start.elapsed();

    match result {
        Err(DbError::PoolExhausted { waited_ms }) => {
            assert!((200..=250).contains(&waited_ms), "waited {}ms", waited_ms);
        }
        other => panic!("expected PoolExhausted, got {:?}", other),
    }
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(250));
}

/// A waiter gets the session as soon as the holder releases it.
#[tokio::test(start_paused = true)]
async fn test_waiter_wakes_on_release() {
    let (pool, _state) = fake_pool(1, 1);
    pool.initialize().await.unwrap();
    let held = pool.acquire(Duration::from_secs(1)).await.unwrap();
    let held_id = held.id();

    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire(Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.release(held);

    let conn = waiter.await.unwrap().unwrap();
    assert_eq!(conn.id(), held_id);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let (pool, state) = fake_pool(3, 3);
    pool.initialize().await.unwrap();

    pool.shutdown().await;
    pool.shutdown().await;

    let status = pool.status();
    assert!(status.closed);
    assert_eq!(status.size, 0);
    assert_eq!(state.closed.load(Ordering::SeqCst), 3);
}

/// Pending acquisitions fail promptly once shutdown starts.
#[tokio::test(start_paused = true)]
async fn test_shutdown_fails_pending_acquires() {
    let (pool, _state) = fake_pool(1, 1);
    pool.initialize().await.unwrap();
    let held = pool.acquire(Duration::from_secs(1)).await.unwrap();

    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire(Duration::from_secs(60)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let shutdown = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.shutdown().await })
    };

    let start = tokio::time::Instant::now();
    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(DbError::PoolClosed)));
    assert!(start.elapsed() < Duration::from_secs(1));

    // Shutdown waits for the borrowed session within its grace period
    drop(held);
    shutdown.await.unwrap();
    assert_eq!(pool.status().size, 0);
}

/// Shutdown gives up on sessions that are not returned within the grace period.
#[tokio::test(start_paused = true)]
async fn test_shutdown_grace_is_bounded() {
    let (pool, _state) = fake_pool(1, 1);
    pool.initialize().await.unwrap();
    let held = pool.acquire(Duration::from_secs(1)).await.unwrap();

    let start = tokio::time::Instant::now();
    pool.shutdown().await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(2));

    // Returned after close: discarded rather than put back
    drop(held);
    assert_eq!(pool.status().idle, 0);
}

#[tokio::test]
async fn test_broken_connection_is_evicted_and_recreated() {
    let (pool, state) = fake_pool(1, 1);
    pool.initialize().await.unwrap();
    let first_id = {
        let mut conn = pool.acquire(Duration::from_secs(1)).await.unwrap();
        state.push(common::Step::Fail(DbError::connection_broken("reset by peer")));
        let err = conn.fetch("SELECT 1", &[], 10).await.unwrap_err();
        assert!(err.is_connection_fault());
        assert_eq!(conn.state(), ConnectionState::Broken);
        conn.id()
    };
    assert_eq!(pool.status().size, 0);

    let conn = pool.acquire(Duration::from_secs(1)).await.unwrap();
    assert_ne!(conn.id(), first_id);
    assert_eq!(state.opened.load(Ordering::SeqCst), 2);
}

/// A session whose operation was cancelled mid-flight is not reused.
#[tokio::test(start_paused = true)]
async fn test_cancelled_operation_discards_connection() {
    let (pool, state) = fake_pool(1, 1);
    pool.initialize().await.unwrap();
    state.set_delay(Duration::from_secs(10));

    let mut conn = pool.acquire(Duration::from_secs(1)).await.unwrap();
    let result =
        tokio::time::timeout(Duration::from_millis(100), conn.fetch("SELECT 1", &[], 10)).await;
    assert!(result.is_err());
    drop(conn);

    let status = pool.status();
    assert_eq!(status.size, 0);
    assert_eq!(status.in_use, 0);
}

#[tokio::test]
async fn test_health_check_evicts_failing_session() {
    let (pool, state) = fake_pool(1, 2);
    pool.initialize().await.unwrap();
    assert!(pool.health_check().await);

    state.fail_ping.store(true, Ordering::SeqCst);
    let report = pool.health_report().await;
    assert!(!report.healthy);
    assert!(report.error.is_some());
    assert_eq!(pool.status().size, 0);

    state.fail_ping.store(false, Ordering::SeqCst);
    assert!(pool.health_check().await);
}

#[tokio::test(start_paused = true)]
async fn test_health_monitor_pings_until_shutdown() {
    let (pool, state) = fake_pool(1, 2);
    pool.initialize().await.unwrap();
    let monitor = pool.spawn_health_monitor(Duration::from_secs(10));

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(state.ping_calls.load(Ordering::SeqCst), 2);

    pool.shutdown().await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(monitor.is_finished());
}

/// A borrower racing warm-up must not push the pool past max_size.
#[tokio::test(start_paused = true)]
async fn test_initialize_overlapping_acquire_stays_bounded() {
    let (pool, state) = fake_pool(2, 2);
    *state.connect_delay.lock().unwrap() = Duration::from_millis(50);

    let warmup = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.initialize().await })
    };
    tokio::task::yield_now().await;
    let conn = pool.acquire(Duration::from_secs(1)).await.unwrap();
    warmup.await.unwrap().unwrap();

    let status = pool.status();
    assert!(status.size <= status.max_size, "{:?}", status);
    assert_eq!(state.opened.load(Ordering::SeqCst), 2);
    drop(conn);
    assert_eq!(pool.status().idle, 2);
}

#[tokio::test]
async fn test_initialize_reports_connect_failure() {
    let factory = FakeFactory::default();
    factory.state.fail_connect.store(true, Ordering::SeqCst);
    let pool = ConnectionPool::new(Arc::new(factory), pool_options(2, 4)).unwrap();
    let err = pool.initialize().await.unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }));
    assert_eq!(pool.status().size, 0);
}

#[tokio::test]
async fn test_failed_open_frees_the_slot() {
    let factory = FakeFactory::default();
    let state = Arc::clone(&factory.state);
    let pool = ConnectionPool::new(Arc::new(factory), pool_options(1, 1)).unwrap();

    state.fail_connect.store(true, Ordering::SeqCst);
    assert!(pool.acquire(Duration::from_millis(100)).await.is_err());

    state.fail_connect.store(false, Ordering::SeqCst);
    assert!(pool.acquire(Duration::from_millis(100)).await.is_ok());
}

#[test]
fn test_invalid_options_rejected() {
    let result = ConnectionPool::new(Arc::new(FakeFactory::default()), pool_options(0, 4));
    assert!(matches!(result, Err(DbError::Config { .. })));
}
