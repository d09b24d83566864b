//! Manager: the client's entry point to an object store

use crate::client::{self, ClientState};
use crate::handle::{rebuild_remote, return_reservation, Handle, Proxy};
use crate::registry::{Registry, AUTO_HANDLE_KIND};
use crate::store::StoreSnapshot;
use crate::types::{Args, BrokerError, Result};
use objwire::{op, AuthKey, HandleDescriptor, Request, Token, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Manager configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub auth_key: AuthKey,
    /// Give references back when handles are dropped without `release`
    pub release_on_drop: bool,
}

impl ManagerConfig {
    pub fn new(auth_key: AuthKey) -> Self {
        Self {
            auth_key,
            release_on_drop: true,
        }
    }
}

/// Builder for [`Manager`]
pub struct ManagerBuilder {
    address: SocketAddr,
    config: ManagerConfig,
    registry: Option<Arc<Registry>>,
}

impl ManagerBuilder {
    pub fn new(address: SocketAddr, auth_key: AuthKey) -> Self {
        Self {
            address,
            config: ManagerConfig::new(auth_key),
            registry: None,
        }
    }

    pub fn release_on_drop(mut self, enabled: bool) -> Self {
        self.config.release_on_drop = enabled;
        self
    }

    /// Local copy of the store's registry, used to check `create` calls
    /// before they are sent
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Connect and check that the store answers
    pub async fn connect(self) -> Result<Manager> {
        let manager = Manager {
            state: Arc::new(ClientState::new(
                self.address,
                self.config.auth_key,
                self.config.release_on_drop,
            )),
            registry: self.registry,
        };
        manager.ping().await?;
        info!(address = %self.address, "connected to object store");
        Ok(manager)
    }
}

/// Client of one object store
pub struct Manager {
    state: Arc<ClientState>,
    registry: Option<Arc<Registry>>,
}

impl Manager {
    pub fn builder(address: SocketAddr, auth_key: AuthKey) -> ManagerBuilder {
        ManagerBuilder::new(address, auth_key)
    }

    pub async fn connect(address: SocketAddr, auth_key: AuthKey) -> Result<Self> {
        ManagerBuilder::new(address, auth_key).connect().await
    }

    pub fn address(&self) -> SocketAddr {
        self.state.address
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    async fn dispatch(&self, request: Request) -> Result<Value> {
        if self.state.is_closed() {
            return Err(BrokerError::ManagerClosed);
        }
        client::dispatch(self.state.address, &self.state.key, request).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.dispatch(Request::new(op::PING)).await?;
        Ok(())
    }

    /// Create an object and get a handle to it
    pub async fn create(&self, type_id: &str, args: Vec<Value>) -> Result<Handle> {
        self.create_with(type_id, Args::new(args)).await
    }

    /// Create an object with keyword arguments
    ///
    /// The store's reference from creation is traded for the handle's own,
    /// so the object's count is 1 when this returns.
    pub async fn create_with(&self, type_id: &str, args: Args) -> Result<Handle> {
        if let Some(registry) = &self.registry {
            let entry = registry.lookup(type_id)?;
            if !entry.auto_create {
                return Err(BrokerError::NoCreateMethod(type_id.to_string()));
            }
        }

        let mut positional = vec![Value::from(type_id)];
        positional.extend(args.positional);
        let reply = self
            .dispatch(Request::new(op::CREATE).with_args(positional).with_kwargs(args.keyword))
            .await?;
        let (object_id, exposed, kind) = parse_created(&reply)?;

        let token = Token::new(type_id, self.state.address, object_id.as_str());
        let handle = Handle::remote(token, exposed, kind, Arc::clone(&self.state)).await?;
        return_reservation(handle.token(), &self.state).await;
        debug!(type_id, object_id = %object_id, "created remote object");
        Ok(handle)
    }

    /// Create an object and wrap its handle in a typed proxy
    pub async fn create_proxy<P: Proxy>(&self, type_id: &str, args: Vec<Value>) -> Result<P> {
        self.create(type_id, args).await?.into_proxy()
    }

    /// Rebuild a serialized handle in this process
    pub async fn rebuild(&self, descriptor: &HandleDescriptor) -> Result<Handle> {
        if self.state.is_closed() {
            return Err(BrokerError::ManagerClosed);
        }
        rebuild_remote(descriptor, Arc::clone(&self.state)).await
    }

    pub async fn get_exposed_methods(&self, object_id: &str) -> Result<Vec<String>> {
        let reply = self
            .dispatch(Request::new(op::GET_EXPOSED_METHODS).arg(object_id))
            .await?;
        client::string_list(&reply)
    }

    /// Debug listing of the store's objects
    pub async fn introspect(&self) -> Result<StoreSnapshot> {
        let reply = self.dispatch(Request::new(op::INTROSPECT)).await?;
        StoreSnapshot::from_value(&reply)
    }

    /// Number of reference-counted objects in the store
    pub async fn number_of_objects(&self) -> Result<usize> {
        let reply = self.dispatch(Request::new(op::NUMBER_OF_OBJECTS)).await?;
        reply
            .as_int()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| BrokerError::UnexpectedResponse(format!("object count {reply:?}")))
    }

    /// Stop the store
    ///
    /// Handles from this manager stop giving references back afterwards.
    pub async fn shutdown(&self) -> Result<()> {
        self.dispatch(Request::new(op::SHUTDOWN)).await?;
        self.state.close();
        info!(address = %self.state.address, "object store shut down");
        Ok(())
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("address", &self.state.address)
            .field("closed", &self.state.is_closed())
            .finish()
    }
}

/// `[object id, [exposed...], handle kind]`
fn parse_created(reply: &Value) -> Result<(String, Vec<String>, String)> {
    match reply.as_list() {
        Some([Value::Str(object_id), exposed, kind]) => Ok((
            object_id.clone(),
            client::string_list(exposed)?,
            kind.as_str().unwrap_or(AUTO_HANDLE_KIND).to_string(),
        )),
        _ => Err(BrokerError::UnexpectedResponse(format!("create reply {reply:?}"))),
    }
}
