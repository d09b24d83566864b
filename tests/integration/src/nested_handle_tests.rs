//! Nested Handle Tests - Handles Inside Store-Side Values
//!
//! A value hosted by the store may contain handles. Returned as a plain
//! value, every embedded handle must come back independently usable, and
//! the store must keep the referenced objects alive exactly as long as
//! something refers to them. Both residency policies are covered.

mod common;

use common::*;
use objbroker::store::GETVALUE;
use objbroker::{CallResult, ResidencyPolicy};
use objwire::Value;
use std::collections::BTreeMap;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_embedded_handle_is_independently_usable() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let manager = store.manager().await;

    let counter = manager.create("Counter", vec![Value::Int(1)]).await.unwrap();
    let counter_id = counter.object_id().to_string();
    let mut fields = BTreeMap::new();
    fields.insert("counter".to_string(), counter.to_value().await.unwrap());
    fields.insert("label".to_string(), Value::from("first"));
    let record = manager.create("Value", vec![Value::Map(fields)]).await.unwrap();

    // The record alone keeps the counter alive.
    counter.release().await.unwrap();
    assert_eq!(store.store.refcount(&counter_id), Some(1));

    let (value, handles) = record
        .call(GETVALUE, vec![])
        .await
        .unwrap()
        .into_parts()
        .unwrap();
    assert_eq!(
        value.as_map().and_then(|m| m.get("label")).cloned(),
        Some(Value::from("first"))
    );
    assert_eq!(handles.len(), 1);
    let inner = handles.into_iter().next().unwrap();
    assert_eq!(inner.object_id(), counter_id);

    // Dropping the record must not invalidate the handle we got out of it.
    record.release().await.unwrap();
    assert_eq!(store.store.refcount(&counter_id), Some(1));
    assert_eq!(inner.call_value("increment", vec![]).await.unwrap(), Value::Int(2));

    inner.release().await.unwrap();
    assert!(store.store.introspect().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_replacing_embedded_handle_releases_it() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let manager = store.manager().await;

    let counter = manager.create("Counter", vec![]).await.unwrap();
    let counter_id = counter.object_id().to_string();
    let holder = manager
        .create("Value", vec![Value::List(vec![counter.to_value().await.unwrap()])])
        .await
        .unwrap();
    counter.release().await.unwrap();
    assert_eq!(store.store.refcount(&counter_id), Some(1));

    holder
        .call("set_item", vec![Value::Int(0), Value::from("gone")])
        .await
        .unwrap();
    assert_eq!(store.store.refcount(&counter_id), None, "no one refers to it any more");
    assert_eq!(store.store.number_of_objects(), 1);

    holder.release().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pop_hands_out_the_reference() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let manager = store.manager().await;

    let counter = manager.create("Counter", vec![Value::Int(7)]).await.unwrap();
    let counter_id = counter.object_id().to_string();
    let stack = manager
        .create("Value", vec![Value::List(vec![counter.to_value().await.unwrap()])])
        .await
        .unwrap();
    counter.release().await.unwrap();

    let CallResult::Value(_, mut handles) = stack.call("pop", vec![]).await.unwrap() else {
        panic!("expected a plain value");
    };
    let popped = handles.pop().unwrap();
    assert_eq!(store.store.refcount(&counter_id), Some(1), "only the popped handle remains");
    assert_eq!(stack.call_value("len", vec![]).await.unwrap(), Value::Int(0));
    assert_eq!(popped.call_value("get", vec![]).await.unwrap(), Value::Int(7));

    popped.release().await.unwrap();
    stack.release().await.unwrap();
    assert!(store.store.introspect().is_empty());
}

/// Counted residency: nothing outlives its last handle
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_counted_residency_frees_internal_objects() {
    let store = start_store(ResidencyPolicy::Counted).await;
    let manager = store.manager().await;

    let counter = manager.create("Counter", vec![]).await.unwrap();
    let holder = manager
        .create("Value", vec![Value::List(vec![counter.to_value().await.unwrap()])])
        .await
        .unwrap();
    let counter_id = counter.object_id().to_string();

    counter.release().await.unwrap();
    holder.release().await.unwrap();

    assert_eq!(store.store.refcount(&counter_id), None);
    assert!(!store.store.is_resident(&counter_id));
    assert!(store.store.introspect().is_empty());
}

/// Pinned residency: internally referenced objects stay until unpinned
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pinned_residency_keeps_objects_alive() {
    let store = start_store(ResidencyPolicy::Pinned).await;
    let manager = store.manager().await;

    let counter = manager.create("Counter", vec![Value::Int(4)]).await.unwrap();
    let counter_id = counter.object_id().to_string();
    let holder = manager
        .create("Value", vec![Value::List(vec![counter.to_value().await.unwrap()])])
        .await
        .unwrap();
    counter.release().await.unwrap();

    // No counted reference is left, but the object is still reachable.
    assert_eq!(store.store.refcount(&counter_id), None);
    assert!(store.store.is_resident(&counter_id));
    let snapshot = manager.introspect().await.unwrap();
    let info = snapshot.get(&counter_id).unwrap();
    assert!(info.resident);
    assert_eq!(info.refcount, None);
    assert_eq!(manager.number_of_objects().await.unwrap(), 1);

    // Handing it out again resumes counting.
    let (_, handles) = holder
        .call("get_item", vec![Value::Int(0)])
        .await
        .unwrap()
        .into_parts()
        .unwrap();
    assert_eq!(store.store.refcount(&counter_id), Some(1));
    assert_eq!(handles[0].call_value("get", vec![]).await.unwrap(), Value::Int(4));

    for handle in handles {
        handle.release().await.unwrap();
    }
    holder.release().await.unwrap();

    // Every handle is gone, yet the object is still resident.
    assert_eq!(store.store.refcount(&counter_id), None);
    assert!(store.store.is_resident(&counter_id));
    assert_eq!(store.store.introspect().len(), 1);

    assert!(store.store.unpin(&counter_id));
    assert!(store.store.introspect().is_empty());
}
