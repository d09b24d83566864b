//! Concurrency Tests - Many Clients, One Store
//!
//! Reference counts must stay exact while clients create, clone, pass and
//! release handles at the same time, and a slow method on one object must
//! not hold up the rest of the store.

mod common;

use common::*;
use futures::future::join_all;
use objbroker::{Proxy, ResidencyPolicy};
use objwire::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;

const NUM_CLIENTS: usize = 8;
const CALLS_PER_CLIENT: usize = 25;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_singleton_create() {
    let store = Arc::new(start_store(ResidencyPolicy::Counted).await);
    let barrier = Arc::new(Barrier::new(NUM_CLIENTS));

    let tasks: Vec<_> = (0..NUM_CLIENTS)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                let manager = store.manager().await;
                barrier.wait().await;
                manager.create("Singleton", vec![]).await
            })
        })
        .collect();

    let handles: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.expect("task panicked").expect("create failed"))
        .collect();

    let id = handles[0].object_id().to_string();
    assert!(handles.iter().all(|h| h.object_id() == id), "one instance, one id");
    assert_eq!(store.store.refcount(&id), Some(NUM_CLIENTS as i64));
    assert_eq!(store.store.number_of_objects(), 1);

    for handle in handles {
        handle.release().await.unwrap();
    }
    assert_eq!(store.store.refcount(&id), None);

    // The instance itself lives on in the constructor, so counting restarts.
    let manager = store.manager().await;
    let again = manager.create("Singleton", vec![]).await.unwrap();
    assert_eq!(again.object_id(), id);
    assert_eq!(store.store.refcount(&id), Some(1));
    again.release().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_singleton_release_races_create() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let first = store.manager().await;
    let second = store.manager().await;

    let mut current = first.create("Singleton", vec![]).await.unwrap();
    let id = current.object_id().to_string();

    for round in 0..CALLS_PER_CLIENT {
        let creator = if round % 2 == 0 { &second } else { &first };
        let (released, created) = tokio::join!(current.release(), creator.create("Singleton", vec![]));
        released.unwrap();
        let next = created.unwrap_or_else(|e| panic!("round {round}: create failed: {e}"));

        assert_eq!(next.object_id(), id);
        assert_eq!(next.call_value("get", vec![]).await.unwrap(), Value::Int(100));
        assert_eq!(store.store.refcount(&id), Some(1), "round {round}");
        current = next;
    }

    current.release().await.unwrap();
    assert_eq!(store.store.refcount(&id), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_premature_destruction() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let manager = store.manager().await;
    let stats = Arc::new(ConcurrentStats::new());

    let original = manager.create("Counter", vec![]).await.unwrap();
    let id = original.object_id().to_string();
    let mut clones = Vec::with_capacity(NUM_CLIENTS);
    for _ in 0..NUM_CLIENTS {
        clones.push(original.try_clone().await.unwrap());
    }
    assert_eq!(store.store.refcount(&id), Some(NUM_CLIENTS as i64 + 1));

    // The creator lets go first; the clones keep the object alive.
    original.release().await.unwrap();

    let tasks: Vec<_> = clones
        .into_iter()
        .map(|handle| {
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                for _ in 0..CALLS_PER_CLIENT {
                    match handle.call("increment", vec![]).await {
                        Ok(_) => stats.record_success(),
                        Err(_) => stats.record_failure(),
                    }
                }
                handle.release().await
            })
        })
        .collect();

    for result in join_all(tasks).await {
        result.expect("task panicked").expect("release failed");
    }

    stats.report("no_premature_destruction");
    assert_eq!(stats.failures.load(std::sync::atomic::Ordering::Relaxed), 0);
    assert_eq!(
        stats.successes.load(std::sync::atomic::Ordering::Relaxed),
        (NUM_CLIENTS * CALLS_PER_CLIENT) as u64
    );
    assert_eq!(store.store.refcount(&id), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_clients_share_one_object() {
    let store = Arc::new(start_store(ResidencyPolicy::Counted).await);
    let owner = store.manager().await;
    let counter: CounterProxy = owner.create_proxy("Counter", vec![]).await.unwrap();

    let mut descriptors = Vec::with_capacity(NUM_CLIENTS);
    for _ in 0..NUM_CLIENTS {
        descriptors.push(counter.handle().serialize().await.unwrap());
    }

    let barrier = Arc::new(Barrier::new(NUM_CLIENTS));
    let tasks: Vec<_> = descriptors
        .into_iter()
        .map(|descriptor| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                let manager = store.manager().await;
                let handle: CounterProxy = manager.rebuild(&descriptor).await?.into_proxy()?;
                barrier.wait().await;
                for _ in 0..CALLS_PER_CLIENT {
                    handle.increment(1).await?;
                }
                handle.release().await
            })
        })
        .collect();

    for result in join_all(tasks).await {
        result.expect("task panicked").expect("client failed");
    }

    assert_eq!(counter.get().await.unwrap(), (NUM_CLIENTS * CALLS_PER_CLIENT) as i64);
    assert_eq!(store.store.refcount(counter.handle().object_id()), Some(1));
    counter.release().await.unwrap();
    assert_eq!(store.store.number_of_objects(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_create_and_release() {
    let store = Arc::new(start_store(ResidencyPolicy::Counted).await);

    let tasks: Vec<_> = (0..NUM_CLIENTS)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let manager = store.manager().await;
                for j in 0..10 {
                    let counter = manager.create("Counter", vec![Value::Int((i * j) as i64)]).await?;
                    let child = counter.call_handle("spawn", vec![]).await?;
                    counter.release().await?;
                    drop(child);
                }
                Ok::<_, objbroker::BrokerError>(())
            })
        })
        .collect();

    for result in join_all(tasks).await {
        result.expect("task panicked").expect("client failed");
    }

    assert_eq!(wait_for_objects(&store.store, 0).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_method_does_not_block_store() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let manager = store.manager().await;
    let counter = manager.create("Counter", vec![]).await.unwrap();

    let mut slow = Vec::new();
    for _ in 0..NUM_CLIENTS {
        let handle = counter.try_clone().await.unwrap();
        slow.push(tokio::spawn(async move {
            for _ in 0..5 {
                handle.call("slow_increment", vec![]).await?;
            }
            handle.release().await
        }));
    }

    // Table operations keep answering while the slow calls are in flight.
    let start = Instant::now();
    for _ in 0..5 {
        let snapshot = tokio::time::timeout(Duration::from_secs(2), manager.introspect())
            .await
            .expect("introspect blocked")
            .unwrap();
        assert!(snapshot.get(counter.object_id()).is_some());
    }
    println!("5 introspections took {:?}", start.elapsed());

    for result in join_all(slow).await {
        result.expect("task panicked").expect("slow call failed");
    }
    assert_eq!(
        counter.call_value("get", vec![]).await.unwrap(),
        Value::Int((NUM_CLIENTS * 5) as i64)
    );
    counter.release().await.unwrap();
}
