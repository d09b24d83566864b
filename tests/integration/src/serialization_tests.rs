//! Serialization Tests - Handles Passed Between Processes
//!
//! A serialized handle reserves a reference before it leaves the sender, so
//! the object survives any delay until it is rebuilt, even if the sender's
//! handle is gone by then. Each manager here stands in for a separate
//! client process.

mod common;

use common::*;
use objbroker::{BrokerError, Proxy, ResidencyPolicy};
use objwire::{HandleDescriptor, Value};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_serialized_handle_outlives_sender() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let sender = store.manager().await;
    let receiver = store.manager().await;

    let original = sender.create("Counter", vec![Value::Int(3)]).await.unwrap();
    let id = original.object_id().to_string();
    let descriptor = original.serialize().await.unwrap();
    assert_eq!(store.store.refcount(&id), Some(2));

    original.release().await.unwrap();
    assert_eq!(store.store.refcount(&id), Some(1), "reservation keeps the object alive");

    tokio::time::sleep(Duration::from_millis(200)).await;

    let rebuilt = receiver.rebuild(&descriptor).await.unwrap();
    assert_eq!(store.store.refcount(&id), Some(1), "reservation was taken over");
    assert_eq!(rebuilt.call_value("increment", vec![]).await.unwrap(), Value::Int(4));

    rebuilt.release().await.unwrap();
    assert_eq!(store.store.number_of_objects(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_descriptor_survives_wire_encoding() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let sender = store.manager().await;
    let receiver = store.manager().await;

    let original = sender.create("Value", vec![Value::from("payload")]).await.unwrap();
    let bytes = original.to_value().await.unwrap().to_bytes();
    drop(original);

    let decoded = Value::from_bytes(&bytes).unwrap();
    let descriptor = decoded.as_handle().cloned().unwrap();
    assert!(descriptor.exposed.is_some(), "generic handles carry their methods");

    let rebuilt = receiver.rebuild(&descriptor).await.unwrap();
    assert_eq!(rebuilt.call_value("get", vec![]).await.unwrap(), Value::from("payload"));
    assert_eq!(rebuilt.exposed(), descriptor.exposed.as_deref().unwrap());

    rebuilt.release().await.unwrap();
    assert_eq!(wait_for_objects(&store.store, 0).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_typed_descriptor_fetches_methods() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let manager = store.manager().await;

    let counter: CounterProxy = manager.create_proxy("Counter", vec![]).await.unwrap();
    let descriptor = counter.handle().serialize().await.unwrap();
    assert_eq!(descriptor.handle_kind, COUNTER_KIND);
    assert!(descriptor.exposed.is_none(), "typed handles derive methods from their kind");

    let rebuilt: CounterProxy = manager.rebuild(&descriptor).await.unwrap().into_proxy().unwrap();
    assert!(rebuilt.handle().exposed().contains(&"increment".to_string()));
    assert!(rebuilt.handle().exposed().contains(&"spawn".to_string()));
    assert_eq!(rebuilt.increment(2).await.unwrap(), 2);
    assert_eq!(counter.get().await.unwrap(), 2);

    counter.release().await.unwrap();
    rebuilt.release().await.unwrap();
    assert_eq!(store.store.number_of_objects(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handle_passed_as_argument() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let manager = store.manager().await;

    let counter = manager.create("Counter", vec![Value::Int(9)]).await.unwrap();
    let holder = manager.create("Value", vec![Value::List(vec![])]).await.unwrap();
    holder
        .call("append", vec![counter.to_value().await.unwrap()])
        .await
        .unwrap();

    // One reference for our handle, one for the store-side copy.
    assert_eq!(store.store.refcount(counter.object_id()), Some(2));

    let (value, handles) = holder
        .call("get_item", vec![Value::Int(0)])
        .await
        .unwrap()
        .into_parts()
        .unwrap();
    assert!(matches!(value, Value::Handle(_)));
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].call_value("get", vec![]).await.unwrap(), Value::Int(9));
    assert_eq!(store.store.refcount(counter.object_id()), Some(3));

    for handle in handles {
        handle.release().await.unwrap();
    }
    counter.release().await.unwrap();
    holder.release().await.unwrap();
    assert_eq!(store.store.number_of_objects(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rebuild_of_destroyed_object_fails() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let manager = store.manager().await;

    let counter = manager.create("Counter", vec![]).await.unwrap();
    let stale = HandleDescriptor::new(
        counter.handle_kind(),
        counter.token().clone(),
        None,
    );
    counter.release().await.unwrap();

    assert!(matches!(
        manager.rebuild(&stale).await,
        Err(BrokerError::UnknownObject(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unused_argument_handles_are_released() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let manager = store.manager().await;

    let target = manager.create("Counter", vec![]).await.unwrap();
    let passed = manager.create("Counter", vec![Value::Int(4)]).await.unwrap();
    let passed_id = passed.object_id().to_string();

    // `get` ignores its arguments
    target.call("get", vec![passed.to_value().await.unwrap()]).await.unwrap();
    assert_eq!(store.store.refcount(&passed_id), Some(1));

    // A failing method gives the reference back as well
    assert!(target.call("fail", vec![passed.to_value().await.unwrap()]).await.is_err());
    assert_eq!(store.store.refcount(&passed_id), Some(1));

    // So does a constructor that ignores the extra argument
    let built = manager
        .create("Counter", vec![Value::Int(1), passed.to_value().await.unwrap()])
        .await
        .unwrap();
    assert_eq!(store.store.refcount(&passed_id), Some(1));

    built.release().await.unwrap();
    target.release().await.unwrap();
    passed.release().await.unwrap();
    assert_eq!(store.store.refcount(&passed_id), None);
    assert_eq!(store.store.number_of_objects(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_oversized_reply_keeps_counts() {
    let store = start_store_with_frame_limit(ResidencyPolicy::Counted, 4096).await;
    let manager = store.manager().await;

    let counter = manager.create("Counter", vec![]).await.unwrap();
    let holder = manager
        .create("Value", vec![Value::List(vec![counter.to_value().await.unwrap()])])
        .await
        .unwrap();
    for _ in 0..3 {
        holder
            .call("append", vec![Value::from("x".repeat(2000))])
            .await
            .unwrap();
    }
    assert_eq!(store.store.refcount(counter.object_id()), Some(2));

    let reply = holder.call("get", vec![]).await;
    assert!(matches!(reply, Err(BrokerError::Unserializable(_))), "reply: {reply:?}");
    assert_eq!(store.store.refcount(counter.object_id()), Some(2));

    // The session survives the refused reply
    assert_eq!(holder.call_value("len", vec![]).await.unwrap(), Value::Int(4));

    holder.release().await.unwrap();
    assert_eq!(store.store.refcount(counter.object_id()), Some(1));
    counter.release().await.unwrap();
    assert_eq!(store.store.number_of_objects(), 0);
}
