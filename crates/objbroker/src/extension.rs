//! Handles created inside the store
//!
//! Methods running in the store can register objects of their own and hand
//! out handles to them, and they can receive handles as arguments. Such
//! handles are resident: they talk to the store directly. How they keep
//! their objects alive depends on the store's [`ResidencyPolicy`].

use crate::handle::Handle;
use crate::object::SharedRef;
use crate::store::{ObjectStore, ResidencyPolicy, Seed};
use crate::types::{Args, BrokerError, Result};
use objwire::{HandleDescriptor, ProxyDescriptor, Value};
use tracing::debug;

impl ObjectStore {
    /// Register an already built object and get a resident handle to it
    ///
    /// The constructor registered for `type_id` is not called.
    pub fn wrap(&self, object: SharedRef, type_id: &str) -> Result<Handle> {
        let (object_id, exposed) = self.create_object(type_id, Seed::Object(object))?;
        self.adopt_reference(&object_id)?;
        debug!(type_id, object_id = %object_id, "wrapped object");
        Ok(Handle::resident(
            self.token(type_id, &object_id),
            exposed,
            self.handle_kind(type_id),
            self.weak(),
            self.residency(),
        ))
    }

    /// Create a `type_id` object from one value and get a resident handle
    pub fn wrap_value(&self, value: Value, type_id: &str) -> Result<Handle> {
        let (object_id, exposed) = self.create_object(type_id, Seed::Args(Args::new(vec![value])))?;
        self.adopt_reference(&object_id)?;
        Ok(Handle::resident(
            self.token(type_id, &object_id),
            exposed,
            self.handle_kind(type_id),
            self.weak(),
            self.residency(),
        ))
    }

    /// Rebuild a serialized handle inside this store
    ///
    /// The reference reserved at serialization is taken over by the new
    /// handle. Handles to objects of another store cannot be rebuilt here.
    pub fn rebuild_local(&self, descriptor: &HandleDescriptor) -> Result<Handle> {
        let token = &descriptor.token;
        if token.address != self.address() {
            return Err(BrokerError::Protocol(format!(
                "handle {token} belongs to another store, cannot rebuild it in {}",
                self.address()
            )));
        }
        let exposed = match &descriptor.exposed {
            Some(exposed) => exposed.clone(),
            None => self.get_exposed_methods(&token.object_id)?,
        };
        self.adopt_reference(&token.object_id)?;
        debug!(object_id = %token.object_id, "rebuilt resident handle");
        Ok(Handle::resident(
            token.clone(),
            exposed,
            descriptor.handle_kind.clone(),
            self.weak(),
            self.residency(),
        ))
    }

    /// Resident handle for the result of a redirected call
    pub(crate) fn adopt_proxy(&self, proxy: ProxyDescriptor) -> Result<Handle> {
        self.adopt_reference(&proxy.token.object_id)?;
        let kind = proxy
            .handle_kind
            .unwrap_or_else(|| self.handle_kind(&proxy.token.type_id));
        Ok(Handle::resident(
            proxy.token,
            proxy.exposed,
            kind,
            self.weak(),
            self.residency(),
        ))
    }

    /// Turn a pending reference into the one a resident handle lives on
    ///
    /// Counted: the handle takes its own reference and the pending one is
    /// dropped. Pinned: the object is pinned and the pending reference is
    /// dropped, so the count may reach zero while the object stays resident.
    fn adopt_reference(&self, object_id: &str) -> Result<()> {
        match self.residency() {
            ResidencyPolicy::Counted => {
                self.incref(object_id)?;
            }
            ResidencyPolicy::Pinned => self.pin(object_id)?,
        }
        self.decref(object_id)
    }
}
