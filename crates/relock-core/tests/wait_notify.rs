// Integration tests for blocked acquisitions
// Covers release wake-ups, timeouts, cancellation and store failure while waiting

mod common;

use std::time::Duration;

use common::{RESOURCE, channel_of, client_on, memory_store, wait_for_subscribers};
use relock_core::{AcquireRequest, LockError, ReleaseOutcome};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

const LEASE: Duration = Duration::from_secs(30);

#[tokio::test(start_paused = true)]
async fn test_release_wakes_waiters_without_ttl_wait() {
    let store = memory_store();
    let holder = client_on(&store);
    let owner = holder.owner(0);
    holder.acquire(RESOURCE, &owner, LEASE).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    for worker in 1..=5u64 {
        let client = client_on(&store);
        let tx = tx.clone();
        tokio::spawn(async move {
            let owner = client.owner(worker);
            client.acquire(RESOURCE, &owner, LEASE).await.unwrap();
            tx.send(Instant::now()).unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
            client.release(RESOURCE, &owner, LEASE).await.unwrap();
        });
    }
    drop(tx);

    wait_for_subscribers(&store, &channel_of(RESOURCE), 5).await;
    let released_at = Instant::now();
    assert_eq!(
        holder.release(RESOURCE, &owner, LEASE).await.unwrap(),
        ReleaseOutcome::Full
    );

    let first = rx.recv().await.unwrap();
    assert!(first - released_at < Duration::from_millis(100));

    let mut acquired = 1;
    while rx.recv().await.is_some() {
        acquired += 1;
    }
    assert_eq!(acquired, 5);
    assert_eq!(store.subscriber_count(&channel_of(RESOURCE)), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_reported_with_waited_time() {
    let store = memory_store();
    let client_a = client_on(&store);
    let client_b = client_on(&store);
    let a = client_a.owner(1);
    let b = client_b.owner(1);

    client_a.acquire(RESOURCE, &a, LEASE).await.unwrap();

    let err = client_b
        .acquire_timeout(RESOURCE, &b, LEASE, Duration::from_millis(250))
        .await
        .unwrap_err();
    match err {
        LockError::Timeout { name, waited } => {
            assert_eq!(name, RESOURCE);
            assert!(waited >= Duration::from_millis(250));
        }
        other => panic!("expected timeout, got {:?}", other),
    }

    assert_eq!(store.subscriber_count(&channel_of(RESOURCE)), 0);
    assert_eq!(client_b.stats().wait_timeouts, 1);
    assert!(!client_b.is_watchdog_armed(RESOURCE, &b));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_wait_leaves_nothing_behind() {
    let store = memory_store();
    let client_a = client_on(&store);
    let client_b = client_on(&store);
    let a = client_a.owner(1);
    let b = client_b.owner(1);

    client_a.acquire(RESOURCE, &a, LEASE).await.unwrap();

    let err = client_b
        .acquire_cancellable(
            AcquireRequest::new(RESOURCE, b).lease(LEASE),
            tokio::time::sleep(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(!err.is_timeout());
    assert_eq!(store.subscriber_count(&channel_of(RESOURCE)), 0);
    assert!(!client_b.is_held_by(RESOURCE, &b).await.unwrap());
    assert!(!client_b.is_watchdog_armed(RESOURCE, &b));
    assert_eq!(client_b.stats().wait_cancellations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_from_another_task() {
    let store = memory_store();
    let client_a = client_on(&store);
    let client_b = client_on(&store);
    let a = client_a.owner(1);
    let b = client_b.owner(1);

    client_a.acquire(RESOURCE, &a, LEASE).await.unwrap();

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let waiter = client_b.clone();
    let task = tokio::spawn(async move {
        let cancel = async move {
            let _ = cancel_rx.await;
        };
        waiter
            .acquire_cancellable(
                AcquireRequest::new(RESOURCE, b)
                    .lease(LEASE)
                    .wait(Duration::from_secs(60)),
                cancel,
            )
            .await
    });

    wait_for_subscribers(&store, &channel_of(RESOURCE), 1).await;
    cancel_tx.send(()).unwrap();

    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(store.subscriber_count(&channel_of(RESOURCE)), 0);
}

#[tokio::test(start_paused = true)]
async fn test_store_outage_while_waiting_is_a_store_error() {
    let store = memory_store();
    let client_a = client_on(&store);
    let client_b = client_on(&store);
    let a = client_a.owner(1);
    let b = client_b.owner(1);

    client_a.acquire(RESOURCE, &a, LEASE).await.unwrap();

    let waiter = client_b.clone();
    let task = tokio::spawn(async move {
        waiter
            .acquire_timeout(RESOURCE, &b, LEASE, Duration::from_secs(5))
            .await
    });

    wait_for_subscribers(&store, &channel_of(RESOURCE), 1).await;
    store.set_available(false);

    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_store());
    assert!(!err.is_timeout());
    assert_eq!(store.subscriber_count(&channel_of(RESOURCE)), 0);
}

#[tokio::test(start_paused = true)]
async fn test_force_unlock_wakes_waiter_and_old_watchdog_stops() {
    let store = memory_store();
    let client_a = client_on(&store);
    let client_b = client_on(&store);
    let admin = client_on(&store);
    let a = client_a.owner(1);
    let b = client_b.owner(1);

    client_a.acquire(RESOURCE, &a, LEASE).await.unwrap();

    let waiter = client_b.clone();
    let task = tokio::spawn(async move { waiter.acquire(RESOURCE, &b, LEASE).await });

    wait_for_subscribers(&store, &channel_of(RESOURCE), 1).await;
    assert!(admin.force_unlock(RESOURCE).await.unwrap());

    task.await.unwrap().unwrap();
    assert!(client_b.is_held_by(RESOURCE, &b).await.unwrap());

    // A's watchdog fires after lease / 3 and finds B holding the lock
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(!client_a.is_watchdog_armed(RESOURCE, &a));
    assert_eq!(client_a.stats().lost_leases, 1);
    assert!(client_b.is_held_by(RESOURCE, &b).await.unwrap());

    assert_eq!(
        client_a.release(RESOURCE, &a, LEASE).await.unwrap(),
        ReleaseOutcome::Noop
    );
}

#[tokio::test(start_paused = true)]
async fn test_handle_waits_for_release() {
    let store = memory_store();
    let client_a = client_on(&store);
    let client_b = client_on(&store);
    let lock_a = client_a.lock(RESOURCE);
    let lock_b = client_b.lock(RESOURCE);
    let a = client_a.owner(1);
    let b = client_b.owner(1);

    lock_a.acquire(&a).await.unwrap();

    let waiting = lock_b.clone();
    let task = tokio::spawn(async move { waiting.acquire(&b).await });

    wait_for_subscribers(&store, &channel_of(RESOURCE), 1).await;
    assert_eq!(lock_a.release(&a).await.unwrap(), ReleaseOutcome::Full);

    task.await.unwrap().unwrap();
    assert_eq!(lock_b.local_depth(&b), 1);
    assert_eq!(lock_b.hold_count(&b).await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_wait_duration_waits_like_acquire() {
    let store = memory_store();
    let client_a = client_on(&store);
    let client_b = client_on(&store);
    let a = client_a.owner(1);
    let b = client_b.owner(1);

    client_a.acquire(RESOURCE, &a, LEASE).await.unwrap();

    let waiter = client_b.clone();
    let task = tokio::spawn(async move {
        waiter
            .acquire_timeout(RESOURCE, &b, LEASE, Duration::MAX)
            .await
    });

    wait_for_subscribers(&store, &channel_of(RESOURCE), 1).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!task.is_finished());

    assert_eq!(
        client_a.release(RESOURCE, &a, LEASE).await.unwrap(),
        ReleaseOutcome::Full
    );

    task.await.unwrap().unwrap();
    assert!(client_b.is_held_by(RESOURCE, &b).await.unwrap());
    assert_eq!(client_b.stats().wait_timeouts, 0);
}
