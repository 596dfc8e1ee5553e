use shared::domain::{ContactId, Direction, Message};
use storage::ConversationStore;
use tempfile::TempDir;

use crate::{DedupPolicy, DistributionHub, SyncContext};

pub(crate) async fn temp_context() -> (SyncContext, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let store = ConversationStore::open(dir.path().join("chats.json")).await;
    let ctx = SyncContext::new(store, DistributionHub::new(64), DedupPolicy::default());
    (ctx, dir)
}

pub(crate) fn contact(raw: &str) -> ContactId {
    ContactId::parse(raw).expect("contact id")
}

pub(crate) fn inbound(from: &str, body: &str, timestamp: i64) -> Message {
    Message {
        direction: Direction::Inbound,
        counterpart_id: contact(from),
        body: body.to_string(),
        timestamp,
        sender_display_name: None,
        is_group_originated: false,
    }
}

pub(crate) fn outbound(to: &str, body: &str, timestamp: i64) -> Message {
    Message {
        direction: Direction::Outbound,
        ..inbound(to, body, timestamp)
    }
}
