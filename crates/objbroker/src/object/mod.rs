//! Shared objects and their method tables
//!
//! Objects hosted by a store implement [`SharedObject`]. Most types do not
//! implement it by hand: they build a [`MethodTable`] once and wrap each
//! instance in a [`TableObject`]. Types registered without a constructor
//! host plain values through [`ValueObject`].

mod shared;
mod table;
mod value_object;

pub use shared::{object_id_of, Reply, SharedObject, SharedRef};
pub use table::{Method, MethodFuture, MethodTable, TableObject};
pub use value_object::{ValueObject, VALUE_METHODS};
