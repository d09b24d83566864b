//! Plain values hosted as shared objects
//!
//! A type registered without a constructor hosts the single value passed to
//! `create`. Handles embedded in the value are rebuilt inside the store and
//! kept alive for as long as the value refers to them; handing the value
//! back out reserves a reference for every embedded handle first.

use super::shared::{Reply, SharedObject};
use crate::handle::Handle;
use crate::store::CallContext;
use crate::types::{Args, ObjectError};
use async_trait::async_trait;
use objwire::Value;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use tracing::warn;

/// Methods answered by every [`ValueObject`]
pub const VALUE_METHODS: &[&str] = &[
    "append", "get", "get_item", "keys", "len", "pop", "set", "set_item",
];

struct ValueState {
    value: Value,
    held: Vec<Handle>,
}

/// A mutex-guarded value
pub struct ValueObject {
    state: Mutex<ValueState>,
}

impl ValueObject {
    /// Host `value`, taking ownership of the handles embedded in it
    pub fn adopt(ctx: &CallContext, value: Value) -> Result<Self, ObjectError> {
        let held = rebuild_all(ctx, &value)?;
        Ok(Self {
            state: Mutex::new(ValueState { value, held }),
        })
    }

    /// Raw copy of the value; embedded handles are not reserved
    pub fn snapshot(&self) -> Value {
        self.state.lock().value.clone()
    }

    /// Number of live handles held on behalf of the value
    pub fn held_handles(&self) -> usize {
        self.state.lock().held.len()
    }

    fn get(&self) -> Result<Value, ObjectError> {
        let state = self.state.lock();
        reserve(&state.held, &state.value)?;
        Ok(state.value.clone())
    }

    fn set(&self, ctx: &CallContext, value: Value) -> Result<(), ObjectError> {
        let adopted = rebuild_all(ctx, &value)?;
        let dropped = {
            let mut state = self.state.lock();
            state.value = value;
            state.held.extend(adopted);
            retain(&mut state)
        };
        drop(dropped);
        Ok(())
    }

    fn len(&self) -> Result<usize, ObjectError> {
        let state = self.state.lock();
        match &state.value {
            Value::List(items) => Ok(items.len()),
            Value::Map(map) => Ok(map.len()),
            Value::Str(s) => Ok(s.len()),
            Value::Bytes(b) => Ok(b.len()),
            other => Err(ObjectError::unsupported(format!(
                "{} has no length",
                other.type_name()
            ))),
        }
    }

    fn append(&self, ctx: &CallContext, item: Value) -> Result<(), ObjectError> {
        let adopted = rebuild_all(ctx, &item)?;
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match &mut state.value {
            Value::List(items) => {
                items.push(item);
                state.held.extend(adopted);
                Ok(())
            }
            other => {
                let kind = other.type_name();
                drop(guard);
                drop(adopted);
                Err(ObjectError::unsupported(format!("cannot append to {kind}")))
            }
        }
    }

    fn get_item(&self, key: &Value) -> Result<Value, ObjectError> {
        let state = self.state.lock();
        let item = match (&state.value, key) {
            (Value::List(items), Value::Int(index)) => items[list_index(items.len(), *index)?].clone(),
            (Value::Map(map), Value::Str(k)) => map.get(k).cloned().ok_or_else(|| ObjectError::missing_key(k))?,
            (value, key) => return Err(bad_key(value, key)),
        };
        reserve(&state.held, &item)?;
        Ok(item)
    }

    fn set_item(&self, ctx: &CallContext, key: &Value, item: Value) -> Result<(), ObjectError> {
        let adopted = rebuild_all(ctx, &item)?;
        let result = {
            let mut state = self.state.lock();
            let stored = match (&mut state.value, key) {
                (Value::List(items), Value::Int(index)) => {
                    list_index(items.len(), *index).map(|i| items[i] = item)
                }
                (Value::Map(map), Value::Str(k)) => {
                    map.insert(k.clone(), item);
                    Ok(())
                }
                (value, key) => Err(bad_key(value, key)),
            };
            match stored {
                Ok(()) => {
                    state.held.extend(adopted);
                    Ok(retain(&mut state))
                }
                Err(e) => Err((e, adopted)),
            }
        };
        match result {
            Ok(dropped) => {
                drop(dropped);
                Ok(())
            }
            Err((e, adopted)) => {
                drop(adopted);
                Err(e)
            }
        }
    }

    fn keys(&self) -> Result<Value, ObjectError> {
        match &self.state.lock().value {
            Value::Map(map) => Ok(Value::List(map.keys().map(|k| Value::from(k.as_str())).collect())),
            other => Err(ObjectError::unsupported(format!(
                "{} has no keys",
                other.type_name()
            ))),
        }
    }

    fn pop(&self, key: Option<&Value>) -> Result<Value, ObjectError> {
        let (item, dropped) = {
            let mut state = self.state.lock();
            let item = match (&state.value, key) {
                (Value::List(items), None) if !items.is_empty() => items[items.len() - 1].clone(),
                (Value::List(_), None) => return Err(ObjectError::out_of_range("pop from empty list")),
                (Value::List(items), Some(Value::Int(index))) => {
                    items[list_index(items.len(), *index)?].clone()
                }
                (Value::Map(map), Some(Value::Str(k))) => {
                    map.get(k).cloned().ok_or_else(|| ObjectError::missing_key(k))?
                }
                (value, Some(key)) => return Err(bad_key(value, key)),
                (value, None) => {
                    return Err(ObjectError::unsupported(format!(
                        "cannot pop from {}",
                        value.type_name()
                    )))
                }
            };
            // Reserve before the held handles are let go.
            reserve(&state.held, &item)?;
            match (&mut state.value, key) {
                (Value::List(items), None) => {
                    items.pop();
                }
                (Value::List(items), Some(Value::Int(index))) => {
                    let i = list_index(items.len(), *index)?;
                    items.remove(i);
                }
                (Value::Map(map), Some(Value::Str(k))) => {
                    map.remove(k);
                }
                _ => {}
            }
            (item, retain(&mut state))
        };
        drop(dropped);
        Ok(item)
    }
}

#[async_trait]
impl SharedObject for ValueObject {
    fn public_methods(&self) -> Vec<String> {
        VALUE_METHODS.iter().map(|m| m.to_string()).collect()
    }

    async fn invoke(&self, ctx: &CallContext, method: &str, args: Args) -> Result<Reply, ObjectError> {
        let reply = match method {
            "get" => Reply::Value(self.get()?),
            "set" => {
                self.set(ctx, args.required(0)?.clone())?;
                Reply::none()
            }
            "len" => Reply::value(self.len()?),
            "append" => {
                self.append(ctx, args.required(0)?.clone())?;
                Reply::none()
            }
            "get_item" => Reply::Value(self.get_item(args.required(0)?)?),
            "set_item" => {
                self.set_item(ctx, args.required(0)?, args.required(1)?.clone())?;
                Reply::none()
            }
            "keys" => Reply::Value(self.keys()?),
            "pop" => Reply::Value(self.pop(args.get(0))?),
            other => return Err(ObjectError::unsupported(format!("value has no method '{other}'"))),
        };
        Ok(reply)
    }

    async fn get_value(&self, _ctx: &CallContext) -> Result<Value, ObjectError> {
        self.get()
    }

    fn describe(&self) -> String {
        let state = self.state.lock();
        format!("<value {} {:?}>", state.value.type_name(), state.value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn list_index(len: usize, index: i64) -> Result<usize, ObjectError> {
    let resolved = if index < 0 { len as i64 + index } else { index };
    if resolved < 0 || resolved >= len as i64 {
        return Err(ObjectError::out_of_range(format!(
            "index {index} out of range for length {len}"
        )));
    }
    Ok(resolved as usize)
}

fn bad_key(value: &Value, key: &Value) -> ObjectError {
    ObjectError::invalid_argument(format!(
        "cannot index {} with {}",
        value.type_name(),
        key.type_name()
    ))
}

fn rebuild_all(ctx: &CallContext, value: &Value) -> Result<Vec<Handle>, ObjectError> {
    value
        .handles()
        .into_iter()
        .map(|desc| ctx.rebuild(desc).map_err(ObjectError::from))
        .collect()
}

/// Take one reference for every handle embedded in `value`
///
/// All or nothing: on failure the references already taken are given back.
fn reserve(held: &[Handle], value: &Value) -> Result<(), ObjectError> {
    let mut reserved: Vec<&Handle> = Vec::new();
    for desc in value.handles() {
        let taken = held
            .iter()
            .find(|h| h.object_id() == desc.token.object_id)
            .ok_or_else(|| {
                warn!(object_id = %desc.token.object_id, "embedded handle is not held");
                ObjectError::new("UnknownObjectError", format!("no live handle for {}", desc.token))
            })
            .and_then(|handle| {
                handle.reserve_local().map_err(ObjectError::from)?;
                Ok(handle)
            });
        match taken {
            Ok(handle) => reserved.push(handle),
            Err(e) => {
                for handle in reserved {
                    if let Err(undo) = handle.unreserve_local() {
                        warn!(object_id = %handle.object_id(), error = %undo, "giving back reservation failed");
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Drop the held handles the value no longer refers to
fn retain(state: &mut ValueState) -> Vec<Handle> {
    let mut needed: HashMap<String, usize> = HashMap::new();
    for desc in state.value.handles() {
        *needed.entry(desc.token.object_id.clone()).or_default() += 1;
    }

    let mut kept = Vec::with_capacity(state.held.len());
    let mut dropped = Vec::new();
    for handle in state.held.drain(..) {
        match needed.get_mut(handle.object_id()) {
            Some(n) if *n > 0 => {
                *n -= 1;
                kept.push(handle);
            }
            _ => dropped.push(handle),
        }
    }
    state.held = kept;
    dropped
}
