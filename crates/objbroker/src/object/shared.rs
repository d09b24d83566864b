//! The shared object trait

use crate::store::CallContext;
use crate::types::{Args, ObjectError};
use async_trait::async_trait;
use objwire::Value;
use std::any::Any;
use std::sync::Arc;

/// An object hosted by an object store
#[async_trait]
pub trait SharedObject: Send + Sync + 'static {
    /// Names of the methods this object answers
    fn public_methods(&self) -> Vec<String>;

    /// Invoke a method
    ///
    /// Runs without any store lock held. Two calls into the same object may
    /// run concurrently.
    async fn invoke(&self, ctx: &CallContext, method: &str, args: Args) -> Result<Reply, ObjectError>;

    /// Snapshot of the object as a plain value (`#GETVALUE`)
    async fn get_value(&self, _ctx: &CallContext) -> Result<Value, ObjectError> {
        Err(ObjectError::unsupported("object has no value snapshot"))
    }

    /// Human-readable description (`__str__`, `__repr__`)
    fn describe(&self) -> String {
        "<shared object>".to_string()
    }

    /// Cast to Any for downcasting
    fn as_any(&self) -> &dyn Any;
}

/// Reference to a hosted object
pub type SharedRef = Arc<dyn SharedObject>;

/// Result of a method invocation
pub enum Reply {
    /// Returned to the caller by value
    Value(Value),
    /// Left in the store; only valid for redirected methods
    Object(SharedRef),
}

impl Reply {
    pub fn none() -> Self {
        Reply::Value(Value::None)
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Reply::Value(value.into())
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Value(value)
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Reply::Object(object) => f.debug_tuple("Object").field(&object.describe()).finish(),
        }
    }
}

/// Object id derived from the object's identity
///
/// Stable for as long as the object is alive and never shared by two live
/// objects. A constructor that hands out the same `Arc` twice yields the
/// same id.
pub fn object_id_of(object: &SharedRef) -> String {
    format!("{:x}", Arc::as_ptr(object) as *const () as usize)
}
