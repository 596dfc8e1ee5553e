use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Stable identifier of a remote contact, with any gateway suffix removed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(String);

impl ContactId {
    /// Build an identifier from a raw gateway address such as `15550001111@c.us`.
    ///
    /// Returns `None` when nothing is left after trimming and stripping the suffix.
    pub fn parse(raw: &str) -> Option<Self> {
        let stripped = strip_gateway_suffix(raw.trim());
        if stripped.is_empty() {
            return None;
        }
        Some(Self(stripped.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn strip_gateway_suffix(raw: &str) -> &str {
    let Some(at) = raw.rfind('@') else {
        return raw;
    };
    let suffix = &raw[at + 1..];
    if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_alphabetic() || c == '.') {
        &raw[..at]
    } else {
        raw
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One chat message. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub direction: Direction,
    pub counterpart_id: ContactId,
    pub body: String,
    /// Gateway-assigned event time in epoch milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_display_name: Option<String>,
    #[serde(default)]
    pub is_group_originated: bool,
}

/// Full ordered history and metadata for one contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub contact_id: ContactId,
    pub display_name: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub unread_count: u64,
}

impl Conversation {
    pub fn new(contact_id: ContactId, display_name: Option<String>) -> Self {
        let display_name = display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| contact_id.to_string());
        Self {
            contact_id,
            display_name,
            messages: Vec::new(),
            last_message: None,
            unread_count: 0,
        }
    }

    /// True until a real name has been observed for this contact.
    pub fn has_placeholder_name(&self) -> bool {
        self.display_name == self.contact_id.as_str()
    }

    pub fn matches_query(&self, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return true;
        }
        self.display_name
            .to_lowercase()
            .contains(&query.to_lowercase())
            || self.contact_id.as_str().contains(query)
    }
}

/// Whole-store snapshot keyed by contact. Ordered so the persisted file diffs cleanly.
pub type ConversationMap = BTreeMap<ContactId, Conversation>;
