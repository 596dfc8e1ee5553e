use std::time::Duration;

use chrono::Utc;
use gateway::Gateway;
use shared::{
    domain::{ContactId, Conversation, Direction, Message},
    protocol::SendMessageRequest,
};
use tracing::{info, warn};

use crate::{apply_message, error::SyncError, SyncContext};

/// Send a viewer's message through the gateway, then record it.
///
/// The outbound message is only folded after the gateway acknowledges it, and
/// it goes through the same fold path as inbound traffic. Nothing is recorded
/// on failure or timeout, and nothing is retried here.
///
/// Returns `Ok(None)` when the gateway echo for this send was already folded.
pub async fn send_message<G>(
    ctx: &SyncContext,
    gateway: &G,
    request: SendMessageRequest,
    timeout: Duration,
) -> Result<Option<Conversation>, SyncError>
where
    G: Gateway + ?Sized,
{
    let contact_id = ContactId::parse(&request.contact_id)
        .ok_or_else(|| SyncError::Validation("contact id cannot be empty".into()))?;
    if request.body.trim().is_empty() {
        return Err(SyncError::Validation("message body cannot be empty".into()));
    }

    match tokio::time::timeout(timeout, gateway.send_text(&contact_id, &request.body)).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            warn!(contact_id = %contact_id, %error, "gateway rejected outgoing message");
            return Err(SyncError::Gateway(error.to_string()));
        }
        Err(_) => {
            warn!(
                contact_id = %contact_id,
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "gateway send timed out"
            );
            return Err(SyncError::GatewayTimeout(timeout));
        }
    }

    info!(contact_id = %contact_id, "gateway acknowledged outgoing message");
    let message = Message {
        direction: Direction::Outbound,
        counterpart_id: contact_id,
        body: request.body,
        timestamp: Utc::now().timestamp_millis(),
        sender_display_name: None,
        is_group_originated: false,
    };
    apply_message(ctx, message).await
}

#[cfg(test)]
#[path = "tests/send_tests.rs"]
mod tests;
