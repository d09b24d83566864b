//! Typed handles

use super::Handle;
use crate::registry::AUTO_HANDLE_KIND;

/// A typed wrapper around a [`Handle`]
///
/// `KIND` must match the handle kind the type is registered with. Proxies
/// for result types are picked by that kind when a redirected call returns.
pub trait Proxy: Sized + Send {
    const KIND: &'static str;

    fn from_handle(handle: Handle) -> Self;

    fn handle(&self) -> &Handle;

    fn into_handle(self) -> Handle;
}

impl Proxy for Handle {
    const KIND: &'static str = AUTO_HANDLE_KIND;

    fn from_handle(handle: Handle) -> Self {
        handle
    }

    fn handle(&self) -> &Handle {
        self
    }

    fn into_handle(self) -> Handle {
        self
    }
}
