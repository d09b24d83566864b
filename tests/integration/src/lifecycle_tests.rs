//! Lifecycle Tests - Creation, Release and Reference Counts
//!
//! These tests drive a store over TCP and check:
//! - The inc-inc-dec creation protocol leaves every new object at count 1
//! - Redirected results become distinct objects
//! - Explicit release, drop and try_clone keep counts exact
//! - Errors come back typed without killing the connection

mod common;

use common::*;
use objbroker::store::GETVALUE;
use objbroker::{BrokerError, Handle, Manager, Proxy, ResidencyPolicy};
use objwire::{op, AuthKey, Connection, Request, Response, Value};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_spawned_counters_are_distinct() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let manager = store.manager().await;

    let c1: CounterProxy = manager.create_proxy("Counter", vec![Value::Int(5)]).await.unwrap();
    let c2 = c1.spawn().await.unwrap();
    let c3 = c1.spawn().await.unwrap();

    let ids = [
        c1.handle().object_id().to_string(),
        c2.handle().object_id().to_string(),
        c3.handle().object_id().to_string(),
    ];
    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);
    assert_ne!(ids[0], ids[2]);

    let snapshot = manager.introspect().await.unwrap();
    assert_eq!(snapshot.len(), 3, "snapshot: {snapshot:?}");
    for id in &ids {
        assert_eq!(snapshot.refcount(id), Some(1), "object {id}");
    }

    // Spawned counters start where the parent was and then diverge.
    assert_eq!(c2.get().await.unwrap(), 5);
    c2.increment(10).await.unwrap();
    assert_eq!(c2.get().await.unwrap(), 15);
    assert_eq!(c3.get().await.unwrap(), 5);
    assert_eq!(c2.handle().handle_kind(), COUNTER_KIND);

    c1.release().await.unwrap();
    c2.release().await.unwrap();
    c3.release().await.unwrap();
    assert_eq!(manager.number_of_objects().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_release_destroys_object() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let manager = store.manager().await;

    let handle = manager.create("Counter", vec![]).await.unwrap();
    let id = handle.object_id().to_string();
    assert_eq!(store.store.refcount(&id), Some(1));

    handle.release().await.unwrap();
    assert_eq!(store.store.refcount(&id), None);
    assert!(store.store.introspect().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drop_releases_in_background() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let manager = store.manager().await;

    let handle = manager.create("Counter", vec![]).await.unwrap();
    handle.call("increment", vec![]).await.unwrap();
    assert_eq!(objbroker::live_handles(store.addr), 1);
    drop(handle);

    assert_eq!(objbroker::live_handles(store.addr), 0);
    assert_eq!(wait_for_objects(&store.store, 0).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drop_without_release_on_drop_leaks() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let manager = Manager::builder(store.addr, store.key.clone())
        .release_on_drop(false)
        .connect()
        .await
        .unwrap();

    let handle = manager.create("Counter", vec![]).await.unwrap();
    let id = handle.object_id().to_string();
    drop(handle);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.store.refcount(&id), Some(1), "reference deliberately leaked");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_try_clone_owns_its_reference() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let manager = store.manager().await;

    let first = manager.create("Counter", vec![]).await.unwrap();
    let second = first.try_clone().await.unwrap();
    let id = first.object_id().to_string();
    assert_eq!(store.store.refcount(&id), Some(2));

    first.release().await.unwrap();
    assert_eq!(store.store.refcount(&id), Some(1));
    assert_eq!(second.call_value("increment", vec![]).await.unwrap(), Value::Int(1));

    second.release().await.unwrap();
    assert_eq!(store.store.refcount(&id), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_decref_floor_is_consistency_error() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let manager = store.manager().await;

    let handle = manager.create("Counter", vec![]).await.unwrap();
    let id = handle.object_id().to_string();
    handle.release().await.unwrap();

    // A second decref on the same id must fail rather than go negative.
    let mut conn = Connection::connect(store.addr, &store.key).await.unwrap();
    let response = conn
        .request(&Request::new(op::DECREF).arg(id.as_str()))
        .await
        .unwrap();
    match response {
        Response::Error(err) => {
            assert_eq!(err.kind, "ConsistencyError");
            assert!(matches!(BrokerError::from_remote(err), BrokerError::Consistency(_)));
        }
        other => panic!("unexpected {other:?}"),
    }

    // The connection survives the error.
    let response = conn.request(&Request::new(op::PING)).await.unwrap();
    assert_eq!(response, Response::Return(Value::None));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_errors_are_typed() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let manager = store.manager().await;
    let handle = manager.create("Counter", vec![]).await.unwrap();

    match handle.call("fail", vec![]).await {
        Err(BrokerError::Method(err)) => {
            assert_eq!(err.kind, "CounterError");
            assert_eq!(err.message, "asked to fail");
        }
        other => panic!("unexpected {other:?}"),
    }

    assert!(matches!(
        handle.call("reset", vec![]).await,
        Err(BrokerError::MethodNotExposed { method, .. }) if method == "reset"
    ));

    assert!(matches!(
        manager.create("Nope", vec![]).await,
        Err(BrokerError::UnknownType(_))
    ));
    assert!(matches!(
        manager.create("Internal", vec![]).await,
        Err(BrokerError::NoCreateMethod(_))
    ));
    assert!(matches!(
        manager.get_exposed_methods("feedface").await,
        Err(BrokerError::UnknownObject(id)) if id == "feedface"
    ));

    // Still usable after all of the above.
    assert_eq!(handle.call_value("increment", vec![]).await.unwrap(), Value::Int(1));
    handle.release().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fallback_methods() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let manager = store.manager().await;
    let handle = manager.create("Counter", vec![Value::Int(41)]).await.unwrap();
    handle.call("increment", vec![]).await.unwrap();

    assert_eq!(handle.call_value(GETVALUE, vec![]).await.unwrap(), Value::Int(42));
    assert_eq!(
        handle.call_value("__repr__", vec![]).await.unwrap(),
        Value::from("<Counter object>")
    );
    handle.release().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_proxy_kind_must_match() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let manager = store.manager().await;

    let result = manager
        .create_proxy::<CounterProxy>("Value", vec![Value::Int(1)])
        .await;
    assert!(matches!(result, Err(BrokerError::ProxyKindMismatch { .. })));

    // The handle was dropped on the error path and gave its reference back.
    assert_eq!(wait_for_objects(&store.store, 0).await, 0);

    let generic: Handle = manager.create_proxy("Counter", vec![]).await.unwrap();
    assert_eq!(generic.handle_kind(), COUNTER_KIND);
    generic.release().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wrong_key_is_rejected() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let result = Manager::connect(store.addr, AuthKey::from("not the key")).await;
    assert!(matches!(result, Err(BrokerError::Wire(_))));

    // The store is unaffected.
    let manager = store.manager().await;
    manager.ping().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_stops_store() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let manager = store.manager().await;
    let handle = manager.create("Counter", vec![]).await.unwrap();

    manager.shutdown().await.unwrap();
    assert!(manager.is_closed());

    let stopped = tokio::time::timeout(Duration::from_secs(5), store.server).await;
    assert!(matches!(stopped, Ok(Ok(Ok(())))));

    assert!(matches!(manager.ping().await, Err(BrokerError::ManagerClosed)));
    assert!(matches!(
        handle.call("get", vec![]).await,
        Err(BrokerError::ManagerClosed)
    ));
    // Releasing after shutdown is a no-op rather than an error.
    handle.release().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_closes_client_sessions() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let user = store.manager().await;
    let admin = store.manager().await;

    // Opens this thread's method-call session
    let counter: CounterProxy = user.create_proxy("Counter", vec![]).await.unwrap();
    assert_eq!(counter.increment(1).await.unwrap(), 1);

    admin.shutdown().await.unwrap();
    let stopped = tokio::time::timeout(Duration::from_secs(5), store.server).await;
    assert!(matches!(stopped, Ok(Ok(Ok(())))));

    // The user's manager never saw the shutdown, so only a closed
    // session can make this fail.
    assert!(!user.is_closed());
    let after = tokio::time::timeout(Duration::from_secs(5), counter.increment(1)).await;
    assert!(matches!(after, Ok(Err(_))), "call after shutdown: {after:?}");
}
