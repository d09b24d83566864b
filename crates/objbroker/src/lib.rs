//! Shared-object broker
//!
//! An object store process hosts objects and hands out handles to them.
//! Clients in other processes call methods through those handles; the store
//! keeps each object alive for exactly as long as some handle refers to it.
//!
//! # Layout
//!
//! - [`registry`]: type ids, constructors and exposure rules
//! - [`object`]: the [`SharedObject`] trait and method tables
//! - [`store`]: object table, reference counts and method dispatch
//! - [`server`]: the network front end of a store
//! - [`manager`] and [`handle`]: the client side
//!
//! # Example
//!
//! ```no_run
//! use objbroker::{Manager, ObjectStoreServer, Registry, TypeEntry};
//! use objwire::{AuthKey, Value};
//! use std::sync::Arc;
//!
//! # async fn demo() -> objbroker::Result<()> {
//! let registry = Registry::new().with(TypeEntry::new("Value"))?;
//! let key = AuthKey::generate();
//! let server = ObjectStoreServer::builder(Arc::new(registry))
//!     .auth_key(key.clone())
//!     .bind()
//!     .await?;
//! let addr = server.local_addr();
//! server.spawn();
//!
//! let manager = Manager::connect(addr, key).await?;
//! let list = manager.create("Value", vec![Value::List(vec![])]).await?;
//! list.call("append", vec![Value::Int(1)]).await?;
//! list.release().await?;
//! # Ok(())
//! # }
//! ```

mod client;
pub mod extension;
pub mod handle;
pub mod manager;
pub mod object;
pub mod registry;
pub mod server;
pub mod store;
pub mod types;

pub use handle::{live_handles, CallResult, Handle, Proxy};
pub use manager::{Manager, ManagerBuilder, ManagerConfig};
pub use object::{MethodTable, Reply, SharedObject, SharedRef, TableObject, ValueObject};
pub use registry::{DuplicatePolicy, Registry, TypeEntry, AUTO_HANDLE_KIND};
pub use server::{ObjectStoreServer, ObjectStoreServerBuilder, ServerStats, ServerStatsSnapshot, StoreConfig};
pub use store::{CallContext, CallOutcome, ObjectInfo, ObjectStore, ResidencyPolicy, StoreSnapshot};
pub use types::{Args, BrokerError, ObjectError, Result};
