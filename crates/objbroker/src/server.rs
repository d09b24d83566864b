//! Object store server
//!
//! Accepts authenticated connections and serves the privileged protocol on
//! each. A connection that asks for `accept_connection` becomes a
//! long-lived method-call session for one client thread.
//!
//! # Scalability
//!
//! - Each connection runs in its own Tokio task
//! - A semaphore limits maximum concurrent connections
//! - The store lock is never held while a method runs

use crate::registry::Registry;
use crate::store::{CallOutcome, ObjectStore, ResidencyPolicy};
use crate::types::{Args, BrokerError, Result};
use futures::FutureExt;
use objwire::{op, AuthKey, Connection, Request, Response, Token, Value, WireError, DEFAULT_MAX_FRAME_SIZE};
use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Server configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub bind_addr: SocketAddr,
    pub auth_key: AuthKey,
    pub max_connections: usize,
    pub max_frame_size: usize,
    pub residency: ResidencyPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            auth_key: AuthKey::generate(),
            max_connections: 1024,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            residency: ResidencyPolicy::default(),
        }
    }
}

/// Server statistics
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_accepted: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub auth_failures: AtomicU64,
    pub requests_received: AtomicU64,
    pub requests_processed: AtomicU64,
    pub requests_failed: AtomicU64,
}

impl ServerStats {
    pub fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            requests_received: self.requests_received.load(Ordering::Relaxed),
            requests_processed: self.requests_processed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of server statistics
#[derive(Debug, Clone)]
pub struct ServerStatsSnapshot {
    pub connections_accepted: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub auth_failures: u64,
    pub requests_received: u64,
    pub requests_processed: u64,
    pub requests_failed: u64,
}

/// Builder for [`ObjectStoreServer`]
pub struct ObjectStoreServerBuilder {
    config: StoreConfig,
    registry: Arc<Registry>,
}

impl ObjectStoreServerBuilder {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            config: StoreConfig::default(),
            registry,
        }
    }

    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    pub fn auth_key(mut self, key: AuthKey) -> Self {
        self.config.auth_key = key;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    pub fn max_frame_size(mut self, max: usize) -> Self {
        self.config.max_frame_size = max;
        self
    }

    pub fn residency(mut self, residency: ResidencyPolicy) -> Self {
        self.config.residency = residency;
        self
    }

    pub async fn bind(self) -> Result<ObjectStoreServer> {
        ObjectStoreServer::bind(self.config, self.registry).await
    }
}

/// A bound object store server
pub struct ObjectStoreServer {
    listener: TcpListener,
    store: Arc<ObjectStore>,
    config: StoreConfig,
    stats: Arc<ServerStats>,
}

impl ObjectStoreServer {
    pub fn builder(registry: Arc<Registry>) -> ObjectStoreServerBuilder {
        ObjectStoreServerBuilder::new(registry)
    }

    /// Bind the listener and create the store
    ///
    /// The store's address, which goes into every token, is the bound
    /// address.
    pub async fn bind(config: StoreConfig, registry: Arc<Registry>) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await.map_err(WireError::from)?;
        let address = listener.local_addr().map_err(WireError::from)?;
        if address.ip().is_unspecified() {
            warn!("Object store bound to {}; tokens will carry an unspecified address", address);
        }
        let store = ObjectStore::new(registry, address, config.residency);
        info!(
            "Object store listening on {} (max_connections: {}, residency: {:?})",
            address, config.max_connections, config.residency
        );
        Ok(Self {
            listener,
            store,
            config,
            stats: Arc::new(ServerStats::default()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.store.address()
    }

    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    pub fn auth_key(&self) -> &AuthKey {
        &self.config.auth_key
    }

    /// Serve until the store's stop flag is set
    ///
    /// Sessions already running are left to finish on their own.
    pub async fn run(self) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));
        let mut stop = self.store.subscribe_shutdown();

        loop {
            tokio::select! {
                biased;

                _ = stopped(&mut stop) => {
                    info!("Object store at {} stopped accepting connections", self.store.address());
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                            continue;
                        }
                    };

                    let permit = match semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                            warn!("Connection limit reached, rejecting connection from {}", peer_addr);
                            drop(stream);
                            continue;
                        }
                    };

                    self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                    self.stats.connections_active.fetch_add(1, Ordering::Relaxed);
                    debug!("Accepted connection from {}", peer_addr);

                    let session = Session {
                        store: Arc::clone(&self.store),
                        stats: Arc::clone(&self.stats),
                        peer: peer_addr,
                    };
                    let key = self.config.auth_key.clone();
                    let max_frame_size = self.config.max_frame_size;

                    tokio::spawn(async move {
                        let _permit = permit;
                        let result = session.run(stream, &key, max_frame_size).await;
                        session.stats.connections_active.fetch_sub(1, Ordering::Relaxed);

                        match result {
                            Ok(()) => debug!("Connection closed normally from {}", peer_addr),
                            Err(BrokerError::Wire(WireError::ConnectionClosed)) => {
                                debug!("Connection closed from {}", peer_addr);
                            }
                            Err(e) => warn!("Connection error from {}: {}", peer_addr, e),
                        }
                    });
                }
            }
        }
    }

    /// Run on a background task
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// One accepted connection
struct Session {
    store: Arc<ObjectStore>,
    stats: Arc<ServerStats>,
    peer: SocketAddr,
}

impl Session {
    async fn run(&self, stream: TcpStream, key: &AuthKey, max_frame_size: usize) -> Result<()> {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", self.peer, e);
        }
        let mut conn = Connection::new(stream)
            .with_peer(self.peer)
            .with_max_frame_size(max_frame_size);

        if let Err(e) = conn.server_handshake(key).await {
            self.stats.auth_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Authentication failed for {}: {}", self.peer, e);
            return Err(e.into());
        }

        while let Some(request) = self.next_request(&mut conn).await? {
            if request.object_id.is_none() && request.operation == op::ACCEPT_CONNECTION {
                let thread = request.args.first().and_then(Value::as_str).unwrap_or("?");
                debug!("Serving method calls for {} (thread {})", self.peer, thread);
                self.send(&mut conn, Response::Return(Value::None)).await?;
                return self.serve_client(conn).await;
            }
            let response = self.handle(request).await;
            self.send(&mut conn, response).await?;
        }
        Ok(())
    }

    /// Method-call session; privileged operations are refused
    ///
    /// Ends when the store stops. The stop flag is checked between
    /// requests, so a call already running still gets its reply.
    async fn serve_client(&self, mut conn: Connection) -> Result<()> {
        let mut stop = self.store.subscribe_shutdown();
        loop {
            let request = tokio::select! {
                biased;

                _ = stopped(&mut stop) => {
                    debug!("Store stopped, closing method-call session for {}", self.peer);
                    return Ok(());
                }

                request = self.next_request(&mut conn) => match request? {
                    Some(request) => request,
                    None => return Ok(()),
                },
            };
            let response = if request.object_id.is_some() {
                self.handle(request).await
            } else {
                self.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
                Response::Traceback(format!(
                    "privileged operation '{}' sent on a method-call connection",
                    request.operation
                ))
            };
            self.send(&mut conn, response).await?;
        }
    }

    /// Next decodable request, or `None` once the peer hangs up
    ///
    /// Undecodable requests are answered with a traceback and skipped.
    async fn next_request(&self, conn: &mut Connection) -> Result<Option<Request>> {
        loop {
            match conn.recv_request().await {
                Ok(request) => {
                    self.stats.requests_received.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(request));
                }
                Err(WireError::ConnectionClosed) => return Ok(None),
                Err(e) if e.is_decode_error() => {
                    self.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
                    warn!("Undecodable request from {}: {}", self.peer, e);
                    self.send(conn, Response::Traceback(format!("undecodable request: {e}")))
                        .await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send a response, falling back to `UNSERIALIZABLE` when it is too large
    ///
    /// Any other send failure ends the connection. Either way the
    /// references the undelivered response carried are given back.
    async fn send(&self, conn: &mut Connection, response: Response) -> Result<()> {
        match conn.send_response(&response).await {
            Ok(()) => Ok(()),
            Err(WireError::FrameTooLarge { size, max }) => {
                warn!("Response of {} bytes to {} exceeds the {} byte limit", size, self.peer, max);
                self.release_undelivered(&response);
                conn.send_response(&Response::Unserializable(format!(
                    "response of {size} bytes exceeds the {max} byte frame limit"
                )))
                .await?;
                Ok(())
            }
            Err(e) => {
                self.release_undelivered(&response);
                Err(e.into())
            }
        }
    }

    /// Drop the references held for a response that never reached the client
    fn release_undelivered(&self, response: &Response) {
        let tokens: Vec<&Token> = match response {
            Response::Return(value) => value.handles().into_iter().map(|d| &d.token).collect(),
            Response::Proxy(proxy) => vec![&proxy.token],
            _ => Vec::new(),
        };
        for token in tokens {
            if token.address != self.store.address() {
                warn!("Cannot release {} held by another store at {}", token.object_id, token.address);
                continue;
            }
            if let Err(e) = self.store.decref(&token.object_id) {
                warn!("Failed to release undelivered reference to {}: {}", token.object_id, e);
            }
        }
    }

    /// Serve one request; panics in the handler become tracebacks
    async fn handle(&self, request: Request) -> Response {
        let operation = request.operation.clone();
        let response = match AssertUnwindSafe(dispatch(&self.store, request)).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                debug!("Request '{}' from {} failed: {}", operation, self.peer, err);
                error_response(err)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Handler for '{}' panicked: {}", operation, message);
                Response::Traceback(format!("panic while serving '{operation}': {message}"))
            }
        };
        match response {
            Response::Return(_) | Response::Proxy(_) => {
                self.stats.requests_processed.fetch_add(1, Ordering::Relaxed)
            }
            _ => self.stats.requests_failed.fetch_add(1, Ordering::Relaxed),
        };
        response
    }
}

/// Route a request to the store
async fn dispatch(store: &Arc<ObjectStore>, request: Request) -> Result<Response> {
    let Request {
        object_id,
        operation,
        args,
        kwargs,
    } = request;

    if let Some(object_id) = object_id {
        return call(store, &object_id, &operation, Args { positional: args, keyword: kwargs }).await;
    }

    let mut args = args.into_iter();
    match operation.as_str() {
        op::CREATE => {
            let type_id = text_arg(args.next(), "type id")?;
            let rest = Args {
                positional: args.collect(),
                keyword: kwargs,
            };
            let (object_id, exposed) = store.create(&type_id, rest)?;
            Ok(Response::Return(Value::List(vec![
                Value::from(object_id),
                names(exposed),
                Value::from(store.handle_kind(&type_id)),
            ])))
        }
        op::CALL => {
            let object_id = text_arg(args.next(), "object id")?;
            let method = text_arg(args.next(), "method name")?;
            let rest = Args {
                positional: args.collect(),
                keyword: kwargs,
            };
            call(store, &object_id, &method, rest).await
        }
        op::INCREF => {
            store.incref(&text_arg(args.next(), "object id")?)?;
            Ok(Response::Return(Value::None))
        }
        op::DECREF => {
            store.decref(&text_arg(args.next(), "object id")?)?;
            Ok(Response::Return(Value::None))
        }
        op::GET_EXPOSED_METHODS => {
            let exposed = store.get_exposed_methods(&text_arg(args.next(), "object id")?)?;
            Ok(Response::Return(names(exposed)))
        }
        op::INTROSPECT => Ok(Response::Return(store.introspect().to_value())),
        op::NUMBER_OF_OBJECTS => Ok(Response::Return(Value::from(store.number_of_objects()))),
        op::SHUTDOWN => {
            store.shutdown();
            Ok(Response::Return(Value::None))
        }
        op::PING => Ok(Response::Return(Value::None)),
        other => Err(BrokerError::Protocol(format!("unknown operation '{other}'"))),
    }
}

async fn call(store: &Arc<ObjectStore>, object_id: &str, method: &str, args: Args) -> Result<Response> {
    Ok(match store.call(object_id, method, args).await? {
        CallOutcome::Value(value) => Response::Return(value),
        CallOutcome::Proxy(proxy) => Response::Proxy(proxy),
    })
}

fn text_arg(value: Option<Value>, what: &str) -> Result<String> {
    match value {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(BrokerError::Protocol(format!(
            "{what} must be a string, got {}",
            other.type_name()
        ))),
        None => Err(BrokerError::Protocol(format!("missing {what}"))),
    }
}

fn names(names: Vec<String>) -> Value {
    Value::List(names.into_iter().map(Value::from).collect())
}

fn error_response(err: BrokerError) -> Response {
    match err {
        BrokerError::Traceback(text) => Response::Traceback(text),
        BrokerError::Unserializable(text) => Response::Unserializable(text),
        other => Response::Error(other.to_remote()),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
