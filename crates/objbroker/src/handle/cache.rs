//! Per-thread method-call connections
//!
//! Method calls through remote handles reuse one connection per store and
//! thread. The connection is opened lazily and closed when the last live
//! handle to that store goes away. Tasks that migrate between worker
//! threads simply pick up the connection of the thread they resume on.

use crate::client;
use crate::types::Result;
use objwire::{op, AuthKey, Connection, Request, Response};
use parking_lot::const_mutex;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};

type SharedConnection = Arc<Mutex<Connection>>;

thread_local! {
    static CONNECTIONS: RefCell<HashMap<SocketAddr, SharedConnection>> = RefCell::new(HashMap::new());
}

/// Live remote handles per store address, across all threads
static LIVE_HANDLES: parking_lot::Mutex<BTreeMap<SocketAddr, usize>> = const_mutex(BTreeMap::new());

pub(crate) fn register(address: SocketAddr) {
    *LIVE_HANDLES.lock().entry(address).or_default() += 1;
}

/// Forget one live handle; the last one closes this thread's connection
pub(crate) fn unregister(address: SocketAddr) {
    let remaining = {
        let mut live = LIVE_HANDLES.lock();
        match live.get_mut(&address) {
            Some(count) if *count > 1 => {
                *count -= 1;
                *count
            }
            Some(_) => {
                live.remove(&address);
                0
            }
            None => 0,
        }
    };
    if remaining == 0 {
        forget(address);
    }
}

/// Number of live remote handles to `address` in this process
pub fn live_handles(address: SocketAddr) -> usize {
    LIVE_HANDLES.lock().get(&address).copied().unwrap_or(0)
}

/// Drop this thread's connection to `address`
pub(crate) fn forget(address: SocketAddr) {
    // The thread-local may already be gone during thread teardown.
    let removed = CONNECTIONS
        .try_with(|conns| conns.borrow_mut().remove(&address))
        .ok()
        .flatten();
    if removed.is_some() {
        debug!(%address, "closed handle connection");
    }
}

/// Send a method call over this thread's connection to `address`
pub(crate) async fn request(address: SocketAddr, key: &AuthKey, request: &Request) -> Result<Response> {
    let conn = match cached(address) {
        Some(conn) => conn,
        None => open(address, key).await?,
    };
    let mut guard = conn.lock().await;
    match guard.request(request).await {
        Ok(response) => Ok(response),
        Err(e) => {
            drop(guard);
            evict(address, &conn);
            Err(e.into())
        }
    }
}

fn cached(address: SocketAddr) -> Option<SharedConnection> {
    CONNECTIONS.with(|conns| conns.borrow().get(&address).cloned())
}

async fn open(address: SocketAddr, key: &AuthKey) -> Result<SharedConnection> {
    let mut conn = Connection::connect(address, key).await?;
    let thread = std::thread::current();
    let name = thread.name().unwrap_or("unnamed");
    let ack = conn.request(&Request::new(op::ACCEPT_CONNECTION).arg(name)).await?;
    client::into_result(ack)?;

    let conn = Arc::new(Mutex::new(conn));
    // Another task on this thread may have won the race; use its connection.
    let conn = CONNECTIONS.with(|conns| {
        conns
            .borrow_mut()
            .entry(address)
            .or_insert_with(|| Arc::clone(&conn))
            .clone()
    });
    debug!(%address, thread = name, "opened handle connection");
    Ok(conn)
}

fn evict(address: SocketAddr, conn: &SharedConnection) {
    let _ = CONNECTIONS.try_with(|conns| {
        let mut conns = conns.borrow_mut();
        if conns.get(&address).is_some_and(|current| Arc::ptr_eq(current, conn)) {
            conns.remove(&address);
            trace!(%address, "evicted broken handle connection");
        }
    });
}
