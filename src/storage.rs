use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::types::normalized::MessageKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Open,
    Closed,
    Archived,
}

/// The canonical conversation row for one (instance id, chat phone) pair.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationRecord {
    pub id: u64,
    pub instance_id: String,
    pub contact_phone: String,
    pub contact_name: Option<String>,
    pub is_group: bool,
    pub status: ConversationStatus,
    pub unread_count: u32,
    pub last_message_at: Option<i64>,
    pub last_message_preview: Option<String>,
    /// True while `contact_name` is a generated fallback the chat-metadata
    /// pass may replace; cleared once a real name lands.
    pub name_is_placeholder: bool,
}

/// Seed values used only when `upsert_conversation` creates the row.
#[derive(Debug, Clone, Default)]
pub struct NewConversation {
    pub contact_name: Option<String>,
    pub is_group: bool,
    pub name_is_placeholder: bool,
}

/// Conversation-side effect of one committed message. The store applies the
/// preview/timestamp part only when `timestamp_ms` is strictly newer than
/// the recorded last-message timestamp; the unread/reopen flags apply
/// unconditionally (they are set only for live inbound messages).
#[derive(Debug, Clone)]
pub struct ConversationTouch {
    pub timestamp_ms: i64,
    pub preview: String,
    pub increment_unread: bool,
    pub reopen: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReactionEntry {
    pub participant: String,
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub protocol_id: String,
    pub conversation_id: u64,
    pub instance_id: String,
    pub chat_phone: String,
    pub sender_phone: String,
    pub from_me: bool,
    pub kind: MessageKind,
    pub text: String,
    pub caption: Option<String>,
    pub media_url: Option<String>,
    pub media_mimetype: Option<String>,
    pub file_name: Option<String>,
    pub quoted_protocol_id: Option<String>,
    pub timestamp_ms: i64,
    pub is_historical: bool,
    pub reactions: Vec<ReactionEntry>,
}

/// The operation contract the core requires from the storage collaborator.
/// Implementations must make `upsert_conversation` safe under concurrent
/// calls for the same key: first-writer-wins on create, never a duplicate
/// row for one (instance, phone) pair.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Dedup guard keyed by protocol message id.
    async fn message_exists(
        &self,
        instance_id: &str,
        protocol_id: &str,
    ) -> Result<bool, StoreError>;

    /// Resolve (creating lazily) the canonical conversation for the pair.
    async fn upsert_conversation(
        &self,
        instance_id: &str,
        chat_phone: &str,
        seed: NewConversation,
    ) -> Result<ConversationRecord, StoreError>;

    async fn insert_message(&self, message: StoredMessage) -> Result<(), StoreError>;

    /// Conditional conversation update on a newly committed message.
    async fn apply_message_update(
        &self,
        conversation_id: u64,
        touch: ConversationTouch,
    ) -> Result<(), StoreError>;

    /// Mutate the reaction set of an existing message: added or replaced by
    /// participant key, removed when `emoji` is `None` or empty. A missing
    /// target is not an error (the reacted-to message may predate us).
    async fn update_reaction(
        &self,
        instance_id: &str,
        target_protocol_id: &str,
        participant: &str,
        emoji: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn upsert_contact(
        &self,
        instance_id: &str,
        phone: &str,
        name: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn contact_name(
        &self,
        instance_id: &str,
        phone: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Refresh the display name of an existing conversation (chat-metadata
    /// pass). Only placeholder or missing names are replaced; a name a user
    /// actually chose stays. Returns false when no conversation exists for
    /// the pair; this operation never creates one.
    async fn update_conversation_name(
        &self,
        instance_id: &str,
        chat_phone: &str,
        name: &str,
        is_group: bool,
    ) -> Result<bool, StoreError>;
}

#[derive(Default)]
struct MemoryInner {
    next_id: u64,
    conversations: HashMap<(String, String), ConversationRecord>,
    messages: HashMap<(String, String), StoredMessage>,
    insertion_order: Vec<String>,
    contacts: HashMap<(String, String), String>,
}

/// Reference in-memory implementation of the store contract; the single
/// mutex makes the upsert trivially race-free. Production deployments plug
/// in their relational backend instead.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn conversation(
        &self,
        instance_id: &str,
        chat_phone: &str,
    ) -> Option<ConversationRecord> {
        self.inner
            .lock()
            .await
            .conversations
            .get(&(instance_id.to_string(), chat_phone.to_string()))
            .cloned()
    }

    pub async fn message(&self, instance_id: &str, protocol_id: &str) -> Option<StoredMessage> {
        self.inner
            .lock()
            .await
            .messages
            .get(&(instance_id.to_string(), protocol_id.to_string()))
            .cloned()
    }

    pub async fn message_count(&self) -> usize {
        self.inner.lock().await.messages.len()
    }

    pub async fn conversation_count(&self) -> usize {
        self.inner.lock().await.conversations.len()
    }

    /// Protocol ids in insertion order; used to assert replay ordering.
    pub async fn inserted_order(&self) -> Vec<String> {
        self.inner.lock().await.insertion_order.clone()
    }

    /// Test hook: force a conversation's status.
    pub async fn set_conversation_status(
        &self,
        instance_id: &str,
        chat_phone: &str,
        status: ConversationStatus,
    ) {
        let mut inner = self.inner.lock().await;
        if let Some(conv) = inner
            .conversations
            .get_mut(&(instance_id.to_string(), chat_phone.to_string()))
        {
            conv.status = status;
        }
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn message_exists(
        &self,
        instance_id: &str,
        protocol_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .messages
            .contains_key(&(instance_id.to_string(), protocol_id.to_string())))
    }

    async fn upsert_conversation(
        &self,
        instance_id: &str,
        chat_phone: &str,
        seed: NewConversation,
    ) -> Result<ConversationRecord, StoreError> {
        let mut inner = self.inner.lock().await;
        let key = (instance_id.to_string(), chat_phone.to_string());
        if let Some(existing) = inner.conversations.get(&key) {
            return Ok(existing.clone());
        }
        inner.next_id += 1;
        let record = ConversationRecord {
            id: inner.next_id,
            instance_id: instance_id.to_string(),
            contact_phone: chat_phone.to_string(),
            contact_name: seed.contact_name,
            is_group: seed.is_group,
            status: ConversationStatus::Open,
            unread_count: 0,
            last_message_at: None,
            last_message_preview: None,
            name_is_placeholder: seed.name_is_placeholder,
        };
        inner.conversations.insert(key, record.clone());
        Ok(record)
    }

    async fn insert_message(&self, message: StoredMessage) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let key = (message.instance_id.clone(), message.protocol_id.clone());
        if inner.messages.contains_key(&key) {
            // Idempotent under replay.
            return Ok(());
        }
        inner.insertion_order.push(message.protocol_id.clone());
        inner.messages.insert(key, message);
        Ok(())
    }

    async fn apply_message_update(
        &self,
        conversation_id: u64,
        touch: ConversationTouch,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(conv) = inner
            .conversations
            .values_mut()
            .find(|c| c.id == conversation_id)
        else {
            return Err(StoreError::Backend(format!(
                "conversation {conversation_id} not found"
            )));
        };
        if touch.timestamp_ms > conv.last_message_at.unwrap_or(i64::MIN) {
            conv.last_message_at = Some(touch.timestamp_ms);
            conv.last_message_preview = Some(touch.preview);
        }
        if touch.increment_unread {
            conv.unread_count += 1;
        }
        if touch.reopen && conv.status != ConversationStatus::Open {
            conv.status = ConversationStatus::Open;
        }
        Ok(())
    }

    async fn update_reaction(
        &self,
        instance_id: &str,
        target_protocol_id: &str,
        participant: &str,
        emoji: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let key = (instance_id.to_string(), target_protocol_id.to_string());
        let Some(message) = inner.messages.get_mut(&key) else {
            return Ok(());
        };
        message.reactions.retain(|r| r.participant != participant);
        if let Some(emoji) = emoji.filter(|e| !e.is_empty()) {
            message.reactions.push(ReactionEntry {
                participant: participant.to_string(),
                emoji: emoji.to_string(),
            });
        }
        Ok(())
    }

    async fn upsert_contact(
        &self,
        instance_id: &str,
        phone: &str,
        name: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let key = (instance_id.to_string(), phone.to_string());
        let name = name.unwrap_or(phone);
        inner.contacts.insert(key, name.to_string());
        Ok(())
    }

    async fn contact_name(
        &self,
        instance_id: &str,
        phone: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .contacts
            .get(&(instance_id.to_string(), phone.to_string()))
            .cloned())
    }

    async fn update_conversation_name(
        &self,
        instance_id: &str,
        chat_phone: &str,
        name: &str,
        is_group: bool,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(conv) = inner
            .conversations
            .get_mut(&(instance_id.to_string(), chat_phone.to_string()))
        else {
            return Ok(false);
        };
        if conv.name_is_placeholder || conv.contact_name.is_none() {
            conv.contact_name = Some(name.to_string());
            conv.name_is_placeholder = false;
        }
        if is_group {
            conv.is_group = true;
        }
        Ok(true)
    }
}
