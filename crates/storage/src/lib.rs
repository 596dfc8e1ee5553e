use anyhow::{Context, Result};
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{error, info, warn};

use shared::domain::{ContactId, Conversation, ConversationMap};

pub const DEFAULT_DATA_FILE: &str = "./data/chats.json";

/// Durable conversation snapshot backed by a single JSON file.
///
/// The in-memory map always mirrors the last snapshot that was written
/// successfully. Writes go to a sibling temp file which is then renamed over
/// the target, so the file on disk is either the old or the new snapshot.
#[derive(Debug)]
pub struct ConversationStore {
    path: PathBuf,
    conversations: ConversationMap,
}

impl ConversationStore {
    /// Open the store, falling back to an empty mapping when the file cannot be read.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let conversations = load(&path).await;
        Self {
            path,
            conversations,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> &ConversationMap {
        &self.conversations
    }

    pub fn get(&self, contact_id: &ContactId) -> Option<&Conversation> {
        self.conversations.get(contact_id)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Replace one conversation and write the whole snapshot.
    ///
    /// Memory only moves to the new snapshot once it is on disk, so a failed
    /// or abandoned write leaves the last durable snapshot in place.
    pub async fn commit(&mut self, conversation: Conversation) -> Result<()> {
        let contact_id = conversation.contact_id.clone();
        let mut next = self.conversations.clone();
        next.insert(contact_id.clone(), conversation);

        if let Err(error) = save(&self.path, &next).await {
            error!(
                contact_id = %contact_id,
                path = %self.path.display(),
                error = %format!("{error:#}"),
                "conversation write failed; keeping last durable snapshot"
            );
            return Err(error);
        }

        self.conversations = next;
        Ok(())
    }
}

/// Read the snapshot at `path`.
///
/// A missing file is initialised to an empty mapping. An unreadable or corrupt
/// file is moved aside and the store starts empty.
pub async fn load(path: &Path) -> ConversationMap {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            let empty = ConversationMap::new();
            match save(path, &empty).await {
                Ok(()) => info!(path = %path.display(), "initialised empty conversation store"),
                Err(error) => warn!(
                    path = %path.display(),
                    error = %format!("{error:#}"),
                    "could not write empty conversation store baseline"
                ),
            }
            return empty;
        }
        Err(error) => {
            warn!(
                path = %path.display(),
                %error,
                "conversation store is unreadable; starting empty"
            );
            return ConversationMap::new();
        }
    };

    match serde_json::from_slice::<ConversationMap>(&raw) {
        Ok(conversations) => {
            info!(
                path = %path.display(),
                conversations = conversations.len(),
                "loaded conversation store"
            );
            conversations
        }
        Err(error) => {
            let quarantine = sibling_path(path, ".corrupt");
            warn!(
                path = %path.display(),
                quarantine = %quarantine.display(),
                %error,
                "conversation store is corrupt; starting empty"
            );
            if let Err(error) = fs::rename(path, &quarantine).await {
                warn!(%error, "failed to move corrupt conversation store aside");
            }
            ConversationMap::new()
        }
    }
}

/// Write the full snapshot atomically: temp file, fsync, rename.
pub async fn save(path: &Path, conversations: &ConversationMap) -> Result<()> {
    ensure_parent_dir_exists(path).await?;

    let encoded =
        serde_json::to_vec_pretty(conversations).context("failed to encode conversations")?;
    let temp_path = sibling_path(path, ".tmp");

    if let Err(error) = write_synced(&temp_path, &encoded).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(error);
    }

    if let Err(error) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(error).with_context(|| {
            format!(
                "failed to replace '{}' with '{}'",
                path.display(),
                temp_path.display()
            )
        });
    }

    Ok(())
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)
        .await
        .with_context(|| format!("failed to create '{}'", path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("failed to write '{}'", path.display()))?;
    file.sync_all()
        .await
        .with_context(|| format!("failed to sync '{}'", path.display()))?;
    Ok(())
}

async fn ensure_parent_dir_exists(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent).await.with_context(|| {
        format!(
            "failed to create parent directory '{}' for conversation store '{}'",
            parent.display(),
            path.display()
        )
    })
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| OsString::from("chats.json"));
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
