use shared::{
    domain::{ContactId, Conversation, Message},
    protocol::{GatewayEvent, GatewayStatus, RawMessage},
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::{apply_message, error::SyncError, SyncContext};

const QR_PAYLOAD_KEYS: [&str; 3] = ["code", "qr", "data"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedEvent {
    #[error("message event is missing '{0}'")]
    MissingField(&'static str),
    #[error("message event has an unusable counterpart id '{0}'")]
    InvalidCounterpart(String),
    #[error("message event has an unparseable timestamp")]
    InvalidTimestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted(Conversation),
    Duplicate,
    /// Malformed message event; nothing was folded.
    Dropped(MalformedEvent),
    /// Status event forwarded to viewers.
    Status(GatewayStatus),
}

/// Turn a raw gateway message into a [`Message`], or explain why it cannot be.
pub fn normalize_message(raw: RawMessage) -> Result<Message, MalformedEvent> {
    let direction = raw
        .direction
        .ok_or(MalformedEvent::MissingField("direction"))?;
    let raw_counterpart = raw
        .counterpart_id
        .ok_or(MalformedEvent::MissingField("counterpart_id"))?;
    let counterpart_id = ContactId::parse(&raw_counterpart)
        .ok_or_else(|| MalformedEvent::InvalidCounterpart(raw_counterpart.clone()))?;
    let body = raw.body.ok_or(MalformedEvent::MissingField("body"))?;
    let timestamp = raw
        .timestamp
        .ok_or(MalformedEvent::MissingField("timestamp"))?
        .to_millis()
        .ok_or(MalformedEvent::InvalidTimestamp)?;

    Ok(Message {
        direction,
        counterpart_id,
        body,
        timestamp,
        sender_display_name: raw
            .sender_display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty()),
        is_group_originated: raw.is_group_originated.unwrap_or(false),
    })
}

/// Pull the scannable code out of a QR challenge.
///
/// Some gateways wrap the code in a JSON object; plain strings pass through.
pub fn extract_qr_code(payload: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(serde_json::Value::Object(fields)) => QR_PAYLOAD_KEYS
            .iter()
            .find_map(|key| fields.get(*key).and_then(|value| value.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| payload.to_string()),
        _ => payload.to_string(),
    }
}

fn status_for(event: GatewayEvent) -> Result<GatewayStatus, RawMessage> {
    match event {
        GatewayEvent::Connected => Ok(GatewayStatus::Connected),
        GatewayEvent::QrChallenge(payload) => Ok(GatewayStatus::QrChallenge(extract_qr_code(
            &payload,
        ))),
        GatewayEvent::Ready => Ok(GatewayStatus::Ready),
        GatewayEvent::Disconnected => Ok(GatewayStatus::Disconnected),
        GatewayEvent::AuthFailure(reason) => Ok(GatewayStatus::AuthFailure(reason)),
        GatewayEvent::Message(raw) => Err(raw),
    }
}

/// Process one gateway event.
///
/// Only message events reach the fold path. An error means an accepted message
/// could not be persisted.
pub async fn ingest_event(
    ctx: &SyncContext,
    event: GatewayEvent,
) -> Result<IngestOutcome, SyncError> {
    let raw = match status_for(event) {
        Ok(status) => {
            info!(?status, "gateway status changed");
            ctx.hub.publish_status(status.clone());
            return Ok(IngestOutcome::Status(status));
        }
        Err(raw) => raw,
    };

    let message = match normalize_message(raw) {
        Ok(message) => message,
        Err(reason) => {
            warn!(%reason, "dropping malformed gateway message");
            return Ok(IngestOutcome::Dropped(reason));
        }
    };

    Ok(match apply_message(ctx, message).await? {
        Some(conversation) => IngestOutcome::Accepted(conversation),
        None => IngestOutcome::Duplicate,
    })
}

/// Drain gateway events one at a time until the sender side closes.
pub async fn run_ingestion(ctx: SyncContext, mut events: mpsc::Receiver<GatewayEvent>) {
    while let Some(event) = events.recv().await {
        if let Err(error) = ingest_event(&ctx, event).await {
            error!(%error, "failed to ingest gateway message");
        }
    }
    info!("gateway event stream closed; ingestion stopped");
}

#[cfg(test)]
#[path = "tests/ingest_tests.rs"]
mod tests;
