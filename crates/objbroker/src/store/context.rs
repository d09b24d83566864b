//! Per-call context

use super::object_store::ObjectStore;
use crate::handle::Handle;
use crate::object::SharedRef;
use crate::types::Result;
use objwire::{HandleDescriptor, Value};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Context passed to every method invocation
///
/// Gives methods access to the store they run in, so they can hand out
/// handles to new objects and rebuild handles they were passed.
///
/// Handles embedded in the call's arguments are rebuilt before the method
/// runs and parked here. A method that rebuilds one of those descriptors
/// gets the parked handle; the rest are released once the call returns.
#[derive(Clone)]
pub struct CallContext {
    store: Arc<ObjectStore>,
    object_id: Option<String>,
    arguments: Arc<Mutex<Vec<Handle>>>,
}

impl CallContext {
    pub(crate) fn new(store: Arc<ObjectStore>, object_id: Option<String>) -> Self {
        Self {
            store,
            object_id,
            arguments: Arc::default(),
        }
    }

    pub(crate) fn with_arguments(self, handles: Vec<Handle>) -> Self {
        *self.arguments.lock() = handles;
        self
    }

    /// Release the argument handles no method took
    pub(crate) fn release_arguments(&self) {
        let unclaimed = std::mem::take(&mut *self.arguments.lock());
        drop(unclaimed);
    }

    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    /// Id of the object being invoked, if any
    pub fn object_id(&self) -> Option<&str> {
        self.object_id.as_deref()
    }

    /// Register `object` as a `type_id` object and get a handle to it
    pub fn wrap(&self, object: SharedRef, type_id: &str) -> Result<Handle> {
        self.store.wrap(object, type_id)
    }

    /// Create a `type_id` object from a single value and get a handle to it
    pub fn wrap_value(&self, value: Value, type_id: &str) -> Result<Handle> {
        self.store.wrap_value(value, type_id)
    }

    /// Rebuild a handle that was serialized into this store
    ///
    /// Descriptors that arrived as arguments of this call hand over the
    /// handle already rebuilt for them.
    pub fn rebuild(&self, descriptor: &HandleDescriptor) -> Result<Handle> {
        let parked = {
            let mut arguments = self.arguments.lock();
            arguments
                .iter()
                .position(|handle| handle.token() == &descriptor.token)
                .map(|index| arguments.swap_remove(index))
        };
        match parked {
            Some(handle) => Ok(handle),
            None => self.store.rebuild_local(descriptor),
        }
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("store", &self.store.address())
            .field("object_id", &self.object_id)
            .field("arguments", &self.arguments.lock().len())
            .finish()
    }
}
