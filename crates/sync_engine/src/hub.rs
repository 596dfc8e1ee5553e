use std::sync::Arc;

use shared::{
    domain::{ContactId, Conversation, ConversationMap},
    protocol::{GatewayStatus, ServerEvent},
};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::{error::SyncError, run_detached, SyncContext};

/// Receiving half held by one viewer.
pub type ViewerStream = broadcast::Receiver<ServerEvent>;

/// Fan-out of change and status notifications to connected viewers.
///
/// Delivery is best-effort: a viewer that falls behind or reconnects must
/// bootstrap again from a snapshot.
#[derive(Clone, Debug)]
pub struct DistributionHub {
    events: broadcast::Sender<ServerEvent>,
    status: Arc<watch::Sender<Option<GatewayStatus>>>,
}

impl DistributionHub {
    pub fn new(buffer: usize) -> Self {
        let (events, _) = broadcast::channel(buffer.max(1));
        let (status, _) = watch::channel(None);
        Self {
            events,
            status: Arc::new(status),
        }
    }

    /// Register a viewer for future notifications only.
    pub fn subscribe(&self) -> ViewerStream {
        self.events.subscribe()
    }

    /// Deliver to every current viewer; returns how many were reached.
    pub fn publish(&self, event: ServerEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    pub fn viewer_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn latest_status(&self) -> Option<GatewayStatus> {
        self.status.borrow().clone()
    }

    /// Remember `status` for late joiners and forward it to current viewers.
    pub fn publish_status(&self, status: GatewayStatus) -> usize {
        self.status.send_replace(Some(status.clone()));
        self.publish(ServerEvent::Status { status })
    }
}

/// Full copy of the current store contents.
pub async fn snapshot(ctx: &SyncContext) -> ConversationMap {
    ctx.store.lock().await.snapshot().clone()
}

pub async fn conversation(ctx: &SyncContext, contact_id: &ContactId) -> Option<Conversation> {
    ctx.store.lock().await.get(contact_id).cloned()
}

/// Conversations whose name or contact id matches `query`.
pub async fn search(ctx: &SyncContext, query: &str) -> Vec<Conversation> {
    ctx.store
        .lock()
        .await
        .snapshot()
        .values()
        .filter(|conversation| conversation.matches_query(query))
        .cloned()
        .collect()
}

/// Join as a viewer: a bootstrap snapshot plus a stream of everything after it.
///
/// Both are taken under the store lock, and notifications are only published
/// under that lock, so nothing is missed or seen twice.
pub async fn attach(ctx: &SyncContext) -> (ServerEvent, ViewerStream) {
    let store = ctx.store.lock().await;
    let stream = ctx.hub.subscribe();
    let bootstrap = ServerEvent::Snapshot {
        conversations: store.snapshot().clone(),
        status: ctx.hub.latest_status(),
    };
    drop(store);
    debug!(viewers = ctx.hub.viewer_count(), "viewer attached");
    (bootstrap, stream)
}

/// Reset the unread counter for `contact_id`. Setting it twice is harmless.
pub async fn mark_read(
    ctx: &SyncContext,
    contact_id: &ContactId,
) -> Result<Conversation, SyncError> {
    let ctx = ctx.clone();
    let contact_id = contact_id.clone();
    run_detached(async move { reset_unread(&ctx, &contact_id).await }).await
}

async fn reset_unread(
    ctx: &SyncContext,
    contact_id: &ContactId,
) -> Result<Conversation, SyncError> {
    let mut store = ctx.store.lock().await;
    let Some(current) = store.get(contact_id) else {
        return Err(SyncError::NotFound(contact_id.clone()));
    };
    if current.unread_count == 0 {
        return Ok(current.clone());
    }

    let mut updated = current.clone();
    updated.unread_count = 0;
    store
        .commit(updated.clone())
        .await
        .map_err(SyncError::Storage)?;
    info!(contact_id = %contact_id, "conversation marked read");

    ctx.hub.publish(ServerEvent::ConversationUpdated {
        conversation: updated.clone(),
    });
    Ok(updated)
}

#[cfg(test)]
#[path = "tests/hub_tests.rs"]
mod tests;
