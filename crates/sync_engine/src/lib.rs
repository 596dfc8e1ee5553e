//! Conversation synchronization: fold incoming and outgoing messages into the
//! durable store and fan the results out to viewers.
//!
//! Every mutation runs under the single store lock, so folds from the
//! ingestion loop, sends, and mark-read requests are serialized and each
//! notification is published only after its snapshot is on disk.

use std::{future::Future, sync::Arc};

use shared::{domain::Conversation, domain::Message, protocol::ServerEvent};
use storage::ConversationStore;
use tokio::sync::Mutex;
use tracing::debug;

pub mod error;
pub mod fold;
pub mod hub;
pub mod ingest;
pub mod send;

pub use error::SyncError;
pub use fold::{fold, DedupPolicy, Fold, DEFAULT_DEDUP_WINDOW};
pub use hub::{DistributionHub, ViewerStream};
pub use ingest::{ingest_event, run_ingestion, IngestOutcome, MalformedEvent};
pub use send::send_message;

pub type SharedStore = Arc<Mutex<ConversationStore>>;

#[derive(Clone, Debug)]
pub struct SyncContext {
    pub store: SharedStore,
    pub hub: DistributionHub,
    pub policy: DedupPolicy,
}

impl SyncContext {
    pub fn new(store: ConversationStore, hub: DistributionHub, policy: DedupPolicy) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            hub,
            policy,
        }
    }
}

/// Fold one message, persist the result, then notify viewers.
///
/// Returns `Ok(None)` when the message was a duplicate; nothing is written or
/// published in that case. A failed write leaves the store unchanged.
pub async fn apply_message(
    ctx: &SyncContext,
    message: Message,
) -> Result<Option<Conversation>, SyncError> {
    let ctx = ctx.clone();
    run_detached(async move { fold_and_commit(&ctx, message).await }).await
}

async fn fold_and_commit(
    ctx: &SyncContext,
    message: Message,
) -> Result<Option<Conversation>, SyncError> {
    let mut store = ctx.store.lock().await;
    let contact_id = message.counterpart_id.clone();

    match fold(store.snapshot(), message, &ctx.policy) {
        Fold::Duplicate => {
            debug!(contact_id = %contact_id, "dropping duplicate message");
            Ok(None)
        }
        Fold::Accepted(conversation) => {
            store
                .commit(conversation.clone())
                .await
                .map_err(SyncError::Storage)?;
            ctx.hub.publish(ServerEvent::ConversationUpdated {
                conversation: conversation.clone(),
            });
            Ok(Some(conversation))
        }
    }
}

/// Run a store mutation on its own task.
///
/// Dropping the caller's future (a client hanging up mid-request) then cannot
/// stop the mutation between the write and the notification.
pub(crate) async fn run_detached<T, F>(mutation: F) -> Result<T, SyncError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, SyncError>> + Send + 'static,
{
    tokio::spawn(mutation)
        .await
        .map_err(|error| SyncError::Internal(format!("store mutation task failed: {error}")))?
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
