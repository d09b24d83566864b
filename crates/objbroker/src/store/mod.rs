//! The object store
//!
//! Owns every shared object and its reference count. The network side lives
//! in [`crate::server`]; everything here is callable in-process as well.

mod context;
mod object_store;
mod snapshot;
mod tables;

pub use context::CallContext;
pub use object_store::{CallOutcome, ObjectStore, ResidencyPolicy, GETVALUE};
pub use snapshot::{ObjectInfo, StoreSnapshot};

pub(crate) use object_store::Seed;
