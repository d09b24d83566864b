//! Client side of the privileged protocol
//!
//! Every privileged operation runs on a fresh connection: connect,
//! authenticate, one request, one response, close.

use crate::types::{BrokerError, Result};
use objwire::{op, AuthKey, Connection, Request, Response, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

/// State shared by a manager and every remote handle it produced
#[derive(Debug)]
pub(crate) struct ClientState {
    pub address: SocketAddr,
    pub key: AuthKey,
    pub release_on_drop: bool,
    closed: AtomicBool,
}

impl ClientState {
    pub fn new(address: SocketAddr, key: AuthKey, release_on_drop: bool) -> Self {
        Self {
            address,
            key,
            release_on_drop,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Send one privileged request on its own connection
pub(crate) async fn dispatch(address: SocketAddr, key: &AuthKey, request: Request) -> Result<Value> {
    let mut conn = Connection::connect(address, key).await?;
    let response = conn.request(&request).await?;
    if let Err(e) = conn.shutdown().await {
        trace!(%address, error = %e, "closing privileged connection");
    }
    into_result(response)
}

/// Unwrap a `RETURN` response; every other kind becomes an error
pub(crate) fn into_result(response: Response) -> Result<Value> {
    match response {
        Response::Return(value) => Ok(value),
        Response::Error(err) => Err(BrokerError::from_remote(err)),
        Response::Traceback(text) => Err(BrokerError::Traceback(text)),
        Response::Unserializable(text) => Err(BrokerError::Unserializable(text)),
        Response::Proxy(proxy) => Err(BrokerError::UnexpectedResponse(format!(
            "handle to {} where a value was expected",
            proxy.token
        ))),
    }
}

pub(crate) async fn incref(address: SocketAddr, key: &AuthKey, object_id: &str) -> Result<()> {
    dispatch(address, key, Request::new(op::INCREF).arg(object_id)).await?;
    Ok(())
}

pub(crate) async fn decref(address: SocketAddr, key: &AuthKey, object_id: &str) -> Result<()> {
    dispatch(address, key, Request::new(op::DECREF).arg(object_id)).await?;
    Ok(())
}

pub(crate) async fn exposed_methods(address: SocketAddr, key: &AuthKey, object_id: &str) -> Result<Vec<String>> {
    let reply = dispatch(address, key, Request::new(op::GET_EXPOSED_METHODS).arg(object_id)).await?;
    string_list(&reply)
}

pub(crate) fn string_list(value: &Value) -> Result<Vec<String>> {
    value
        .as_list()
        .and_then(|items| {
            items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        })
        .ok_or_else(|| BrokerError::UnexpectedResponse(format!("expected a list of names, got {value:?}")))
}
