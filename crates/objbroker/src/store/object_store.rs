//! Object store core: create, call, and reference counting

use super::context::CallContext;
use super::snapshot::{ObjectInfo, StoreSnapshot};
use super::tables::{ObjectEntry, StoreTables};
use crate::handle::Handle;
use crate::object::{object_id_of, Reply, SharedRef, ValueObject};
use crate::registry::{Registry, TypeEntry, AUTO_HANDLE_KIND};
use crate::types::{Args, BrokerError, Result};
use objwire::{ProxyDescriptor, Token, Value};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Method name answered with the object's value snapshot
pub const GETVALUE: &str = "#GETVALUE";

/// How handles created inside the store keep their objects alive
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResidencyPolicy {
    /// Internal handles own a reference like any other handle
    #[default]
    Counted,
    /// Objects behind internal handles are pinned in the residency table
    /// and survive their count reaching zero
    Pinned,
}

/// Result of a method call
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Value(Value),
    /// The result was registered as a new object
    Proxy(ProxyDescriptor),
}

/// What a new object is built from
pub(crate) enum Seed {
    /// Constructor arguments
    Args(Args),
    /// An already built object
    Object(SharedRef),
}

/// The object store
pub struct ObjectStore {
    registry: Arc<Registry>,
    address: SocketAddr,
    residency: ResidencyPolicy,
    tables: Mutex<StoreTables>,
    stop: watch::Sender<bool>,
    this: Weak<ObjectStore>,
}

impl ObjectStore {
    pub fn new(registry: Arc<Registry>, address: SocketAddr, residency: ResidencyPolicy) -> Arc<Self> {
        let (stop, _) = watch::channel(false);
        Arc::new_cyclic(|this| Self {
            registry,
            address,
            residency,
            tables: Mutex::new(StoreTables::default()),
            stop,
            this: this.clone(),
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn residency(&self) -> ResidencyPolicy {
        self.residency
    }

    /// Context handed to methods invoked on `object_id`
    pub fn context(self: &Arc<Self>, object_id: Option<String>) -> CallContext {
        CallContext::new(Arc::clone(self), object_id)
    }

    pub(crate) fn weak(&self) -> Weak<ObjectStore> {
        self.this.clone()
    }

    fn strong(&self) -> Result<Arc<ObjectStore>> {
        self.this
            .upgrade()
            .ok_or_else(|| BrokerError::Protocol("object store is being torn down".into()))
    }

    pub(crate) fn token(&self, type_id: &str, object_id: &str) -> Token {
        Token::new(type_id, self.address, object_id)
    }

    /// Handle kind registered for `type_id`
    pub fn handle_kind(&self, type_id: &str) -> String {
        self.registry
            .get(type_id)
            .map(|entry| entry.handle_kind.clone())
            .unwrap_or_else(|| AUTO_HANDLE_KIND.to_string())
    }

    /// Create an object of a registered type
    ///
    /// The new object starts with one reference, owned by the caller.
    /// Returns its id and exposed methods.
    pub fn create(&self, type_id: &str, args: Args) -> Result<(String, Vec<String>)> {
        let (object_id, exposed) = self.create_object(type_id, Seed::Args(args))?;
        Ok((object_id, exposed.to_vec()))
    }

    pub(crate) fn create_object(&self, type_id: &str, seed: Seed) -> Result<(String, Arc<[String]>)> {
        let arguments = match &seed {
            Seed::Args(args) => self.adopt_arguments(args)?,
            Seed::Object(_) => Vec::new(),
        };
        let entry = self.registry.lookup(type_id)?;
        let object = match seed {
            Seed::Object(object) => object,
            Seed::Args(args) => {
                let ctx = CallContext::new(self.strong()?, None).with_arguments(arguments);
                let object = self.construct(&entry, &ctx, args);
                ctx.release_arguments();
                object?
            }
        };

        let object_id = object_id_of(&object);
        let exposed = exposed_methods(&entry, &object);
        let record = ObjectEntry {
            type_id: type_id.to_string(),
            object,
            exposed: Arc::clone(&exposed),
            redirect: Arc::new(entry.redirect.clone()),
        };
        let count = self.tables.lock().insert_and_incref(&object_id, record);
        debug!(type_id, object_id = %object_id, refcount = count, "created object");
        Ok((object_id, exposed))
    }

    fn construct(&self, entry: &TypeEntry, ctx: &CallContext, args: Args) -> Result<SharedRef> {
        if let Some(constructor) = &entry.constructor {
            return constructor(args).map_err(BrokerError::Method);
        }
        if args.len() != 1 || !args.keyword.is_empty() {
            return Err(BrokerError::Arity(format!(
                "type '{}' has no constructor and takes exactly one positional argument, got {} positional and {} keyword",
                entry.type_id,
                args.len(),
                args.keyword.len()
            )));
        }
        let value = args.into_positional().into_iter().next().unwrap_or_default();
        let object = ValueObject::adopt(ctx, value).map_err(BrokerError::Method)?;
        Ok(Arc::new(object))
    }

    /// Take over the references reserved for handles passed as arguments
    ///
    /// Handles of other stores are left alone. If any descriptor cannot be
    /// rebuilt, the ones that could are released again and the first error
    /// is returned.
    fn adopt_arguments(&self, args: &Args) -> Result<Vec<Handle>> {
        let mut handles = Vec::new();
        let mut failure = None;
        let descriptors = args
            .positional
            .iter()
            .chain(args.keyword.values())
            .flat_map(|value| value.handles());
        for descriptor in descriptors {
            if descriptor.token.address != self.address {
                debug!(object_id = %descriptor.token.object_id, address = %descriptor.token.address, "argument handle belongs to another store");
                continue;
            }
            match self.rebuild_local(descriptor) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    warn!(object_id = %descriptor.token.object_id, error = %e, "cannot take over argument handle");
                    failure.get_or_insert(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(handles),
        }
    }

    /// Invoke `method` on an object
    ///
    /// The store lock is released before the method runs. The entry's clone
    /// keeps the object alive for the duration of the call even if its last
    /// reference is dropped concurrently. References carried by handles in
    /// `args` belong to the store for the duration of the call; whatever the
    /// method does not keep is released when it returns, success or not.
    pub async fn call(&self, object_id: &str, method: &str, args: Args) -> Result<CallOutcome> {
        let arguments = self.adopt_arguments(&args)?;
        let entry = self
            .tables
            .lock()
            .get(object_id)
            .ok_or_else(|| BrokerError::UnknownObject(object_id.to_string()))?;
        let ctx = CallContext::new(self.strong()?, Some(object_id.to_string())).with_arguments(arguments);
        let outcome = self.call_entry(&entry, &ctx, object_id, method, args).await;
        ctx.release_arguments();
        outcome
    }

    async fn call_entry(
        &self,
        entry: &ObjectEntry,
        ctx: &CallContext,
        object_id: &str,
        method: &str,
        args: Args,
    ) -> Result<CallOutcome> {
        if !entry.exposes(method) {
            return match method {
                GETVALUE => entry
                    .object
                    .get_value(ctx)
                    .await
                    .map(CallOutcome::Value)
                    .map_err(BrokerError::Method),
                "__str__" | "__repr__" => Ok(CallOutcome::Value(Value::from(entry.object.describe()))),
                _ => Err(BrokerError::MethodNotExposed {
                    object_id: object_id.to_string(),
                    method: method.to_string(),
                }),
            };
        }

        trace!(object_id, method, "invoking");
        let reply = entry
            .object
            .invoke(ctx, method, args)
            .await
            .map_err(BrokerError::Method)?;

        match (entry.redirect.get(method), reply) {
            (Some(type_id), reply) => {
                let seed = match reply {
                    Reply::Value(value) => Seed::Args(Args::new(vec![value])),
                    Reply::Object(object) => Seed::Object(object),
                };
                let (new_id, exposed) = self.create_object(type_id, seed)?;
                debug!(object_id, method, result_id = %new_id, "returning result by handle");
                Ok(CallOutcome::Proxy(
                    ProxyDescriptor::new(exposed.to_vec(), self.token(type_id, &new_id))
                        .with_handle_kind(self.handle_kind(type_id)),
                ))
            }
            (None, Reply::Value(value)) => Ok(CallOutcome::Value(value)),
            (None, Reply::Object(object)) => Err(BrokerError::Unserializable(format!(
                "method '{method}' returned {} but its result is not redirected",
                object.describe()
            ))),
        }
    }

    pub fn incref(&self, object_id: &str) -> Result<i64> {
        let count = self.tables.lock().incref(object_id)?;
        trace!(object_id, refcount = count, "incref");
        Ok(count)
    }

    /// Drop one reference; the object is destroyed when none remain
    pub fn decref(&self, object_id: &str) -> Result<()> {
        let removed = self.tables.lock().decref(object_id)?;
        match removed {
            Some(entry) => {
                debug!(object_id, type_id = %entry.type_id, "disposing of object");
                drop(entry);
            }
            None => trace!(object_id, "decref"),
        }
        Ok(())
    }

    pub fn get_exposed_methods(&self, object_id: &str) -> Result<Vec<String>> {
        self.tables
            .lock()
            .get(object_id)
            .map(|entry| entry.exposed.to_vec())
            .ok_or_else(|| BrokerError::UnknownObject(object_id.to_string()))
    }

    /// Debug listing of every live object
    pub fn introspect(&self) -> StoreSnapshot {
        let entries = self.tables.lock().entries();
        let objects = entries
            .into_iter()
            .map(|(object_id, entry, refcount, resident)| ObjectInfo {
                object_id,
                type_id: entry.type_id.clone(),
                refcount,
                resident,
                description: entry.object.describe(),
            })
            .collect();
        StoreSnapshot {
            address: self.address.to_string(),
            objects,
        }
    }

    /// Number of reference-counted objects
    pub fn number_of_objects(&self) -> usize {
        self.tables.lock().counted()
    }

    pub fn refcount(&self, object_id: &str) -> Option<i64> {
        self.tables.lock().refcount(object_id)
    }

    pub fn is_resident(&self, object_id: &str) -> bool {
        self.tables.lock().is_resident(object_id)
    }

    pub(crate) fn pin(&self, object_id: &str) -> Result<()> {
        self.tables.lock().pin(object_id)
    }

    /// Remove an object from the residency table
    ///
    /// Returns false if it was not resident. An object that is no longer
    /// reference counted is destroyed.
    pub fn unpin(&self, object_id: &str) -> bool {
        let mut tables = self.tables.lock();
        let was_resident = tables.is_resident(object_id);
        let removed = tables.unpin(object_id);
        drop(tables);
        if let Some(entry) = removed {
            debug!(object_id, type_id = %entry.type_id, "disposing of unpinned object");
        }
        was_resident
    }

    /// Set the stop flag
    pub fn shutdown(&self) {
        if !self.stop.send_replace(true) {
            info!(address = %self.address, "object store shutting down");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.stop.borrow()
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("address", &self.address)
            .field("residency", &self.residency)
            .field("objects", &self.number_of_objects())
            .finish()
    }
}

fn exposed_methods(entry: &TypeEntry, object: &SharedRef) -> Arc<[String]> {
    let mut exposed = entry
        .exposed
        .clone()
        .unwrap_or_else(|| object.public_methods());
    for method in entry.redirect.keys() {
        if !exposed.contains(method) {
            exposed.push(method.clone());
        }
    }
    exposed.into()
}
