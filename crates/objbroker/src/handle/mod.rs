//! Handles to shared objects
//!
//! A [`Handle`] owns one reference to an object in a store and forwards
//! method calls to it. Remote handles talk to the store over the network;
//! resident handles were created inside the store and call it directly.
//!
//! Releasing a handle, explicitly or by dropping it, gives its reference
//! back exactly once.

mod cache;
mod marshal;
mod proxy;

pub use cache::live_handles;
pub use proxy::Proxy;

pub(crate) use marshal::{rebuild_remote, return_reservation};

use crate::client::{self, ClientState};
use crate::registry::AUTO_HANDLE_KIND;
use crate::store::{CallOutcome, ObjectStore, ResidencyPolicy};
use crate::types::{Args, BrokerError, Result};
use objwire::{HandleDescriptor, Request, Response, Token, Value};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

enum Owner {
    Remote(Arc<ClientState>),
    Resident {
        store: Weak<ObjectStore>,
        /// False for pinned objects, whose handles hold no reference
        counted: bool,
    },
}

/// Handle to a shared object
pub struct Handle {
    token: Token,
    exposed: Arc<[String]>,
    kind: String,
    owner: Owner,
    released: AtomicBool,
}

/// Result of a method call through a handle
#[derive(Debug)]
pub enum CallResult {
    /// A plain value, with a live handle for every handle embedded in it
    Value(Value, Vec<Handle>),
    /// The method's result was registered as a new object
    Handle(Handle),
}

impl CallResult {
    /// The plain value; embedded handles are released
    pub fn into_value(self) -> Result<Value> {
        match self {
            CallResult::Value(value, _) => Ok(value),
            CallResult::Handle(handle) => Err(BrokerError::UnexpectedResponse(format!(
                "handle to {} where a value was expected",
                handle.token
            ))),
        }
    }

    pub fn into_parts(self) -> Result<(Value, Vec<Handle>)> {
        match self {
            CallResult::Value(value, handles) => Ok((value, handles)),
            CallResult::Handle(handle) => Err(BrokerError::UnexpectedResponse(format!(
                "handle to {} where a value was expected",
                handle.token
            ))),
        }
    }

    pub fn into_handle(self) -> Result<Handle> {
        match self {
            CallResult::Handle(handle) => Ok(handle),
            CallResult::Value(value, _) => Err(BrokerError::UnexpectedResponse(format!(
                "value {value:?} where a handle was expected"
            ))),
        }
    }
}

impl Handle {
    /// Remote handle that takes its own reference
    pub(crate) async fn remote(
        token: Token,
        exposed: impl Into<Arc<[String]>>,
        kind: String,
        client: Arc<ClientState>,
    ) -> Result<Self> {
        if client.is_closed() {
            return Err(BrokerError::ManagerClosed);
        }
        client::incref(token.address, &client.key, &token.object_id).await?;
        cache::register(token.address);
        debug!(object_id = %token.object_id, address = %token.address, "remote handle ready");
        Ok(Self {
            token,
            exposed: exposed.into(),
            kind,
            owner: Owner::Remote(client),
            released: AtomicBool::new(false),
        })
    }

    /// Resident handle; its reference, if any, is already taken
    pub(crate) fn resident(
        token: Token,
        exposed: impl Into<Arc<[String]>>,
        kind: String,
        store: Weak<ObjectStore>,
        residency: ResidencyPolicy,
    ) -> Self {
        Self {
            token,
            exposed: exposed.into(),
            kind,
            owner: Owner::Resident {
                store,
                counted: residency == ResidencyPolicy::Counted,
            },
            released: AtomicBool::new(false),
        }
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn object_id(&self) -> &str {
        &self.token.object_id
    }

    pub fn type_id(&self) -> &str {
        &self.token.type_id
    }

    pub fn address(&self) -> SocketAddr {
        self.token.address
    }

    pub fn exposed(&self) -> &[String] {
        &self.exposed
    }

    pub fn handle_kind(&self) -> &str {
        &self.kind
    }

    /// True for handles created inside the store
    pub fn is_resident(&self) -> bool {
        matches!(self.owner, Owner::Resident { .. })
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Call a method with positional arguments
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<CallResult> {
        self.call_with(method, Args::new(args)).await
    }

    /// Call a method
    pub async fn call_with(&self, method: &str, args: Args) -> Result<CallResult> {
        if self.is_released() {
            return Err(BrokerError::Released);
        }
        match &self.owner {
            Owner::Remote(client) => {
                if client.is_closed() {
                    return Err(BrokerError::ManagerClosed);
                }
                let request = Request::method(self.object_id(), method)
                    .with_args(args.positional)
                    .with_kwargs(args.keyword);
                let response = cache::request(self.token.address, &client.key, &request).await?;
                self.remote_result(client, response).await
            }
            Owner::Resident { store, .. } => {
                let store = upgrade(store)?;
                match store.call(self.object_id(), method, args).await? {
                    CallOutcome::Value(value) => {
                        let handles = value
                            .handles()
                            .into_iter()
                            .map(|descriptor| store.rebuild_local(descriptor))
                            .collect::<Result<Vec<_>>>()?;
                        Ok(CallResult::Value(value, handles))
                    }
                    CallOutcome::Proxy(proxy) => Ok(CallResult::Handle(store.adopt_proxy(proxy)?)),
                }
            }
        }
    }

    /// Call a method and return its plain value
    pub async fn call_value(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.call(method, args).await?.into_value()
    }

    /// Call a method whose result comes back as a handle
    pub async fn call_handle(&self, method: &str, args: Vec<Value>) -> Result<Handle> {
        self.call(method, args).await?.into_handle()
    }

    async fn remote_result(&self, client: &Arc<ClientState>, response: Response) -> Result<CallResult> {
        match response {
            Response::Return(value) => {
                let mut handles = Vec::new();
                for descriptor in value.handles() {
                    handles.push(rebuild_remote(descriptor, Arc::clone(client)).await?);
                }
                Ok(CallResult::Value(value, handles))
            }
            Response::Proxy(proxy) => {
                let kind = proxy
                    .handle_kind
                    .clone()
                    .unwrap_or_else(|| AUTO_HANDLE_KIND.to_string());
                let handle = Handle::remote(proxy.token, proxy.exposed, kind, Arc::clone(client)).await?;
                // The store took one reference when it created the result.
                return_reservation(&handle.token, client).await;
                Ok(CallResult::Handle(handle))
            }
            other => client::into_result(other).map(|value| CallResult::Value(value, Vec::new())),
        }
    }

    /// Serialize the handle, reserving a reference for the receiver
    ///
    /// The reservation is taken over by whoever rebuilds the descriptor.
    pub async fn serialize(&self) -> Result<HandleDescriptor> {
        if self.is_released() {
            return Err(BrokerError::Released);
        }
        match &self.owner {
            Owner::Remote(client) => {
                if client.is_closed() {
                    return Err(BrokerError::ManagerClosed);
                }
                client::incref(self.token.address, &client.key, self.object_id()).await?;
            }
            Owner::Resident { store, .. } => {
                upgrade(store)?.incref(self.object_id())?;
            }
        }
        debug!(object_id = %self.token.object_id, "reserved reference for serialized handle");
        Ok(self.descriptor())
    }

    /// Serialize into a [`Value`] that can be passed as an argument
    pub async fn to_value(&self) -> Result<Value> {
        Ok(Value::Handle(self.serialize().await?))
    }

    /// Serialize a resident handle without leaving the store
    pub(crate) fn reserve_local(&self) -> Result<HandleDescriptor> {
        if self.is_released() {
            return Err(BrokerError::Released);
        }
        match &self.owner {
            Owner::Resident { store, .. } => {
                upgrade(store)?.incref(self.object_id())?;
                Ok(self.descriptor())
            }
            Owner::Remote(_) => Err(BrokerError::Protocol(format!(
                "handle {} is not resident",
                self.token
            ))),
        }
    }

    /// Give back a reference taken by [`Handle::reserve_local`]
    pub(crate) fn unreserve_local(&self) -> Result<()> {
        match &self.owner {
            Owner::Resident { store, .. } => upgrade(store)?.decref(self.object_id()),
            Owner::Remote(_) => Err(BrokerError::Protocol(format!(
                "handle {} is not resident",
                self.token
            ))),
        }
    }

    fn descriptor(&self) -> HandleDescriptor {
        let exposed = (self.kind == AUTO_HANDLE_KIND).then(|| self.exposed.to_vec());
        HandleDescriptor::new(self.kind.clone(), self.token.clone(), exposed)
    }

    /// A second, independent handle to the same object
    pub async fn try_clone(&self) -> Result<Handle> {
        if self.is_released() {
            return Err(BrokerError::Released);
        }
        match &self.owner {
            Owner::Remote(client) => {
                Handle::remote(
                    self.token.clone(),
                    Arc::clone(&self.exposed),
                    self.kind.clone(),
                    Arc::clone(client),
                )
                .await
            }
            Owner::Resident { store, counted } => {
                let strong = upgrade(store)?;
                if *counted {
                    strong.incref(self.object_id())?;
                }
                Ok(Handle::resident(
                    self.token.clone(),
                    Arc::clone(&self.exposed),
                    self.kind.clone(),
                    Weak::clone(store),
                    strong.residency(),
                ))
            }
        }
    }

    /// Give the handle's reference back to the store
    pub async fn release(self) -> Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match &self.owner {
            Owner::Remote(client) => {
                cache::unregister(self.token.address);
                if client.is_closed() {
                    return Ok(());
                }
                client::decref(self.token.address, &client.key, self.object_id()).await
            }
            Owner::Resident { store, counted: true } => match store.upgrade() {
                Some(store) => store.decref(self.object_id()),
                None => Ok(()),
            },
            Owner::Resident { .. } => Ok(()),
        }
    }

    /// Convert into a typed proxy of the same kind
    pub fn into_proxy<P: Proxy>(self) -> Result<P> {
        if P::KIND != AUTO_HANDLE_KIND && P::KIND != self.kind {
            return Err(BrokerError::ProxyKindMismatch {
                expected: P::KIND.to_string(),
                found: self.kind.clone(),
            });
        }
        Ok(P::from_handle(self))
    }
}

fn upgrade(store: &Weak<ObjectStore>) -> Result<Arc<ObjectStore>> {
    store
        .upgrade()
        .ok_or_else(|| BrokerError::Protocol("object store is gone".into()))
}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let object_id = self.token.object_id.clone();
        match &self.owner {
            Owner::Resident { store, counted: true } => {
                if let Some(store) = store.upgrade() {
                    if let Err(e) = store.decref(&object_id) {
                        warn!(object_id = %object_id, error = %e, "releasing resident handle failed");
                    }
                }
            }
            Owner::Resident { .. } => {}
            Owner::Remote(client) => {
                cache::unregister(self.token.address);
                if client.is_closed() {
                    debug!(object_id = %object_id, "manager closed, not releasing");
                    return;
                }
                if !client.release_on_drop {
                    warn!(object_id = %object_id, "handle dropped without release, reference leaked");
                    return;
                }
                let address = self.token.address;
                let key = client.key.clone();
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn(async move {
                            if let Err(e) = client::decref(address, &key, &object_id).await {
                                warn!(object_id = %object_id, error = %e, "releasing dropped handle failed");
                            }
                        });
                    }
                    Err(_) => {
                        warn!(object_id = %object_id, "no runtime to release dropped handle, reference leaked");
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("token", &self.token)
            .field("kind", &self.kind)
            .field("resident", &self.is_resident())
            .field("released", &self.is_released())
            .finish()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} handle to {}>", self.kind, self.token)
    }
}
