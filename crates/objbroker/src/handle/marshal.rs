//! Rebuilding serialized handles outside the store

use super::Handle;
use crate::client::{self, ClientState};
use crate::types::Result;
use objwire::{HandleDescriptor, Token};
use std::sync::Arc;
use tracing::{debug, warn};

/// Rebuild a descriptor into a remote handle
///
/// The new handle takes its own reference first; only then is the
/// reference reserved at serialization given back, so the count never
/// touches zero in between. A failure to give the reservation back leaks
/// it but still hands out the handle, which owns a reference of its own.
pub(crate) async fn rebuild_remote(descriptor: &HandleDescriptor, client: Arc<ClientState>) -> Result<Handle> {
    let token = &descriptor.token;
    let exposed = match &descriptor.exposed {
        Some(exposed) => exposed.clone(),
        None => client::exposed_methods(token.address, &client.key, &token.object_id).await?,
    };
    let handle = Handle::remote(
        token.clone(),
        exposed,
        descriptor.handle_kind.clone(),
        Arc::clone(&client),
    )
    .await?;
    return_reservation(token, &client).await;
    debug!(object_id = %token.object_id, "rebuilt remote handle");
    Ok(handle)
}

/// Give back a reference the store reserved for this client
///
/// Only called once a handle owns its own reference, so a failure here
/// leaks one reference and nothing else.
pub(crate) async fn return_reservation(token: &Token, client: &ClientState) {
    if let Err(e) = client::decref(token.address, &client.key, &token.object_id).await {
        warn!(
            object_id = %token.object_id,
            address = %token.address,
            error = %e,
            "returning reserved reference failed, reference leaked"
        );
    }
}
