use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::contact_cache::ContactCache;
use crate::decoder;
use crate::error::StoreError;
use crate::media::MediaFetcher;
use crate::session::ProtocolSession;
use crate::storage::{ConversationStore, ConversationTouch, NewConversation, StoredMessage};
use crate::types::envelope::Envelope;
use crate::types::events::SyncProgress;
use crate::types::normalized::{MessageKind, NormalizedMessage};
use crate::webhook::{EventKind, EventSink, OutboundEvent};

/// The shared per-message pipeline: decode, resolve media, persist
/// idempotently, update the conversation aggregate, notify. Live and
/// historical traffic go through the same path; the `historical` flag only
/// changes unread/reopen semantics and log levels.
pub(crate) struct MessagePipeline {
    instance_id: String,
    store: Arc<dyn ConversationStore>,
    sink: Arc<dyn EventSink>,
    contacts: Arc<ContactCache>,
    progress: Arc<RwLock<SyncProgress>>,
}

impl MessagePipeline {
    pub(crate) fn new(
        instance_id: String,
        store: Arc<dyn ConversationStore>,
        sink: Arc<dyn EventSink>,
        contacts: Arc<ContactCache>,
        progress: Arc<RwLock<SyncProgress>>,
    ) -> Self {
        Self {
            instance_id,
            store,
            sink,
            contacts,
            progress,
        }
    }

    /// Live delivery. Failures are swallowed with a warning; one bad
    /// message must never stall the event loop.
    pub(crate) async fn process_live(&self, session: &dyn ProtocolSession, envelope: &Envelope) {
        if let Err(e) = self.process(session, envelope, false).await {
            warn!(
                "[{}] failed to process live message {}: {e}",
                self.instance_id, envelope.key.id
            );
        }
    }

    /// Historical replay. Store errors propagate so the synchronizer can
    /// mark the pass as failed; everything message-local is swallowed.
    pub(crate) async fn process_historical(
        &self,
        session: &dyn ProtocolSession,
        envelope: &Envelope,
    ) -> Result<(), StoreError> {
        self.process(session, envelope, true).await
    }

    async fn process(
        &self,
        session: &dyn ProtocolSession,
        envelope: &Envelope,
        historical: bool,
    ) -> Result<(), StoreError> {
        if envelope.is_broadcast() {
            return Ok(());
        }

        let mut message = decoder::decode(envelope);

        // Protocol signals carry no user-facing content.
        if message.kind == MessageKind::Protocol {
            return Ok(());
        }

        // Reactions mutate the target message instead of creating a row.
        if message.kind == MessageKind::Reaction {
            return self.apply_reaction(&message, historical).await;
        }

        // Poll votes reference a target ballot we never materialize; they
        // only flow outward as notifications.
        if message.kind == MessageKind::PollVote {
            self.notify(&message, historical);
            return Ok(());
        }

        // Dedup guard: the same envelope can arrive via both the live and
        // the historical channel.
        if self
            .store
            .message_exists(&self.instance_id, &message.protocol_id)
            .await?
        {
            debug!(
                "[{}] skipping duplicate message {}",
                self.instance_id, message.protocol_id
            );
            return Ok(());
        }

        if message.has_media {
            self.resolve_media(session, envelope, &mut message, historical)
                .await;
        }

        self.remember_sender(&message).await;

        let display_name = self.resolve_display_name(&message).await;
        // Groups without a resolvable name get a marked placeholder the
        // chat-metadata pass can later replace.
        let name_is_placeholder = display_name.is_none() && message.is_group;
        let contact_name = display_name.or_else(|| {
            message
                .is_group
                .then(|| format!("Group {}", message.chat_id))
        });
        let conversation = self
            .store
            .upsert_conversation(
                &self.instance_id,
                &message.chat_id,
                NewConversation {
                    contact_name,
                    is_group: message.is_group,
                    name_is_placeholder,
                },
            )
            .await?;

        self.store
            .insert_message(to_stored(
                &self.instance_id,
                conversation.id,
                &message,
                historical,
            ))
            .await?;

        // Historical messages never bump unread nor reopen a closed
        // conversation; only live inbound traffic does.
        let live_inbound = !historical && !message.from_me;
        self.store
            .apply_message_update(
                conversation.id,
                ConversationTouch {
                    timestamp_ms: message.timestamp_ms,
                    preview: message.preview(),
                    increment_unread: live_inbound,
                    reopen: live_inbound,
                },
            )
            .await?;

        self.notify(&message, historical);
        Ok(())
    }

    async fn apply_reaction(
        &self,
        message: &NormalizedMessage,
        historical: bool,
    ) -> Result<(), StoreError> {
        let Some(reaction) = &message.reaction else {
            return Ok(());
        };
        let emoji = (!reaction.emoji.is_empty()).then_some(reaction.emoji.as_str());
        self.store
            .update_reaction(
                &self.instance_id,
                &reaction.target_id,
                &message.sender_id,
                emoji,
            )
            .await?;
        self.notify(message, historical);
        Ok(())
    }

    /// Fetch-and-decrypt is fallible and must not block persisting the
    /// message metadata; a miss only flips counters and log levels.
    async fn resolve_media(
        &self,
        session: &dyn ProtocolSession,
        envelope: &Envelope,
        message: &mut NormalizedMessage,
        historical: bool,
    ) {
        let mimetype = message
            .media
            .as_ref()
            .and_then(|m| m.mimetype.clone());
        match MediaFetcher::fetch(session, envelope, mimetype.as_deref()).await {
            Ok(payload) => {
                if let Some(media) = message.media.as_mut() {
                    media.payload = Some(payload);
                }
                self.progress.write().await.media_downloaded += 1;
            }
            Err(e) => {
                self.progress.write().await.media_failed += 1;
                if historical {
                    // Backfill, not user-facing delivery.
                    debug!(
                        "[{}] media fetch miss for historical message {}: {e}",
                        self.instance_id, message.protocol_id
                    );
                } else {
                    warn!(
                        "[{}] media fetch failed for message {}: {e}",
                        self.instance_id, message.protocol_id
                    );
                }
            }
        }
    }

    /// Opportunistically learn the sender's display name from the push
    /// name carried on inbound messages.
    async fn remember_sender(&self, message: &NormalizedMessage) {
        if message.from_me {
            return;
        }
        let Some(name) = message.push_name.as_deref().filter(|n| !n.is_empty()) else {
            return;
        };
        self.contacts
            .insert(&self.instance_id, &message.sender_id, name);
        if let Err(e) = self
            .store
            .upsert_contact(&self.instance_id, &message.sender_id, Some(name))
            .await
        {
            debug!("[{}] failed to upsert contact: {e}", self.instance_id);
        }
    }

    /// Name used only when this message creates the conversation: cache
    /// first, then the relational lookup, then the push name.
    async fn resolve_display_name(&self, message: &NormalizedMessage) -> Option<String> {
        if let Some(cached) = self.contacts.get(&self.instance_id, &message.chat_id) {
            return Some(cached);
        }
        if let Ok(Some(stored)) = self
            .store
            .contact_name(&self.instance_id, &message.chat_id)
            .await
        {
            return Some(stored);
        }
        if !message.is_group && !message.from_me {
            if let Some(push) = message.push_name.as_deref().filter(|n| !n.is_empty()) {
                return Some(push.to_string());
            }
        }
        None
    }

    fn notify(&self, message: &NormalizedMessage, historical: bool) {
        let kind = if historical {
            EventKind::HistoryMessage
        } else {
            EventKind::NewMessage
        };
        match serde_json::to_value(message) {
            Ok(data) => self
                .sink
                .deliver(OutboundEvent::new(&self.instance_id, kind, data)),
            Err(e) => debug!(
                "[{}] failed to serialize message notification: {e}",
                self.instance_id
            ),
        }
    }
}

fn to_stored(
    instance_id: &str,
    conversation_id: u64,
    message: &NormalizedMessage,
    historical: bool,
) -> StoredMessage {
    StoredMessage {
        protocol_id: message.protocol_id.clone(),
        conversation_id,
        instance_id: instance_id.to_string(),
        chat_phone: message.chat_id.clone(),
        sender_phone: message.sender_id.clone(),
        from_me: message.from_me,
        kind: message.kind,
        text: message.text.clone(),
        caption: message.caption.clone(),
        media_url: message.media.as_ref().and_then(|m| m.payload.clone()),
        media_mimetype: message.media.as_ref().and_then(|m| m.mimetype.clone()),
        file_name: message.media.as_ref().and_then(|m| m.file_name.clone()),
        quoted_protocol_id: message.quoted.as_ref().map(|q| q.id.clone()),
        timestamp_ms: message.timestamp_ms,
        is_historical: historical,
        reactions: Vec::new(),
    }
}
