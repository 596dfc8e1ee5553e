use std::time::Duration;

use shared::domain::{Conversation, ConversationMap, Direction, Message};

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_millis(1000);

/// Duplicate-detection rule: same body, same direction, timestamps closer
/// than `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupPolicy {
    window_ms: u64,
}

impl DedupPolicy {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn is_duplicate(&self, candidate: &Message, existing: &Message) -> bool {
        candidate.body == existing.body
            && candidate.direction == existing.direction
            && candidate.timestamp.abs_diff(existing.timestamp) < self.window_ms
    }
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fold {
    /// The message was appended; carries the updated conversation.
    Accepted(Conversation),
    Duplicate,
}

impl Fold {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Decide how `message` changes `conversations` without touching them.
///
/// The message is keyed by its counterpart, which is the sender for inbound
/// and the recipient for outbound traffic. Accepted messages always go to the
/// tail, whatever their timestamp.
pub fn fold(conversations: &ConversationMap, message: Message, policy: &DedupPolicy) -> Fold {
    let contact_id = &message.counterpart_id;
    let mut conversation = match conversations.get(contact_id) {
        Some(existing) => {
            if existing
                .messages
                .iter()
                .any(|previous| policy.is_duplicate(&message, previous))
            {
                return Fold::Duplicate;
            }
            existing.clone()
        }
        None => Conversation::new(contact_id.clone(), message.sender_display_name.clone()),
    };

    if conversation.has_placeholder_name() && !message.is_group_originated {
        if let Some(name) = message
            .sender_display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
        {
            conversation.display_name = name.to_string();
        }
    }

    if message.direction == Direction::Inbound {
        conversation.unread_count = conversation.unread_count.saturating_add(1);
    }
    conversation.last_message = Some(message.clone());
    conversation.messages.push(message);

    Fold::Accepted(conversation)
}

#[cfg(test)]
#[path = "tests/fold_tests.rs"]
mod tests;
