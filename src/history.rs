use chrono::Utc;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::pipeline::MessagePipeline;
use crate::session::ProtocolSession;
use crate::storage::ConversationStore;
use crate::types::envelope::{Envelope, jid_is_broadcast, jid_is_group, jid_user};
use crate::types::events::{ChatSnapshot, ContactSnapshot, HistorySnapshot, SyncProgress, SyncState};

/// Replays bulk historical snapshots through the same per-message pipeline
/// used for live traffic: contacts first (so name resolution works), then
/// chat metadata, then messages grouped per chat and sorted ascending by
/// timestamp. Runs inline on the instance event loop so history never
/// interleaves with live processing.
pub(crate) struct HistorySynchronizer {
    instance_id: String,
    store: Arc<dyn ConversationStore>,
    pipeline: Arc<MessagePipeline>,
    progress: Arc<RwLock<SyncProgress>>,
    batch_size: usize,
}

impl HistorySynchronizer {
    pub(crate) fn new(
        instance_id: String,
        store: Arc<dyn ConversationStore>,
        pipeline: Arc<MessagePipeline>,
        progress: Arc<RwLock<SyncProgress>>,
        batch_size: usize,
    ) -> Self {
        Self {
            instance_id,
            store,
            pipeline,
            progress,
            batch_size: batch_size.max(1),
        }
    }

    pub(crate) async fn run(&self, session: &dyn ProtocolSession, snapshot: HistorySnapshot) {
        info!(
            "[{}] history snapshot: {} messages, {} chats, {} contacts",
            self.instance_id,
            snapshot.messages.len(),
            snapshot.chats.len(),
            snapshot.contacts.len()
        );
        if !snapshot.contacts.is_empty() {
            self.save_contacts(&snapshot.contacts).await;
        }
        if !snapshot.chats.is_empty() {
            self.apply_chats(session, &snapshot.chats).await;
        }
        if !snapshot.messages.is_empty() {
            self.replay_messages(session, snapshot.messages).await;
        }
    }

    pub(crate) async fn save_contacts(&self, contacts: &[ContactSnapshot]) {
        let mut saved = 0usize;
        for contact in contacts {
            if jid_is_group(&contact.jid) || jid_is_broadcast(&contact.jid) {
                continue;
            }
            let phone = jid_user(&contact.jid);
            // Save even without a name; a later update may fill it in.
            match self
                .store
                .upsert_contact(&self.instance_id, phone, contact.best_name())
                .await
            {
                Ok(()) => saved += 1,
                Err(e) => debug!("[{}] failed to save contact {phone}: {e}", self.instance_id),
            }
        }
        info!("[{}] {saved} contacts saved", self.instance_id);
    }

    /// Chat-level metadata pass. Refreshes names of existing conversations
    /// only; bare chat snapshots never create conversations, so empty
    /// placeholder rows cannot appear ahead of their first message.
    pub(crate) async fn apply_chats(&self, session: &dyn ProtocolSession, chats: &[ChatSnapshot]) {
        for chat in chats {
            if jid_is_broadcast(&chat.jid) {
                continue;
            }
            let phone = jid_user(&chat.jid);
            let is_group = jid_is_group(&chat.jid);

            let mut name = chat
                .subject
                .clone()
                .or_else(|| chat.name.clone())
                .filter(|n| !n.is_empty());

            // Groups without an inline subject get one metadata query;
            // best-effort, never blocking the pass.
            if name.is_none() && is_group {
                match session.group_subject(&chat.jid).await {
                    Ok(subject) => name = subject.filter(|s| !s.is_empty()),
                    Err(e) => debug!(
                        "[{}] group metadata lookup failed for {phone}: {e}",
                        self.instance_id
                    ),
                }
            }

            let Some(name) = name else { continue };
            match self
                .store
                .update_conversation_name(&self.instance_id, phone, &name, is_group)
                .await
            {
                Ok(true) => {}
                Ok(false) => debug!(
                    "[{}] chat {phone} has no conversation yet; it will be created with its first message",
                    self.instance_id
                ),
                Err(e) => debug!(
                    "[{}] failed to refresh conversation name for {phone}: {e}",
                    self.instance_id
                ),
            }
        }
    }

    async fn replay_messages(&self, session: &dyn ProtocolSession, messages: Vec<Envelope>) {
        // Group by chat; broadcast traffic is dropped up front so the
        // progress totals reflect only work we will actually do.
        let mut by_chat: BTreeMap<String, Vec<Envelope>> = BTreeMap::new();
        for envelope in messages {
            if envelope.is_broadcast() {
                continue;
            }
            by_chat
                .entry(envelope.key.chat_jid.clone())
                .or_default()
                .push(envelope);
        }

        let total_messages: usize = by_chat.values().map(Vec::len).sum();
        let total_conversations = by_chat.len();
        self.progress
            .write()
            .await
            .begin(total_messages, total_conversations);
        info!(
            "[{}] replaying {total_messages} messages across {total_conversations} chats",
            self.instance_id
        );

        for (chat_jid, mut chat_messages) in by_chat {
            let phone = jid_user(&chat_jid).to_string();
            self.progress.write().await.current_conversation = Some(phone.clone());

            // Oldest first, after merging split halves and correcting the
            // seconds/milliseconds ambiguity.
            chat_messages.sort_by_key(|m| m.timestamp.to_millis());

            for batch in chat_messages.chunks(self.batch_size) {
                for envelope in batch {
                    if let Err(e) = self.pipeline.process_historical(session, envelope).await {
                        // The store itself failing is unrecoverable for
                        // this pass; message-local failures never reach
                        // here.
                        warn!(
                            "[{}] history sync aborted on storage failure: {e}",
                            self.instance_id
                        );
                        let mut progress = self.progress.write().await;
                        progress.state = SyncState::Error;
                        progress.completed_at = Some(Utc::now());
                        progress.current_conversation = None;
                        return;
                    }
                    self.progress.write().await.processed_messages += 1;
                }
            }
            self.progress.write().await.processed_conversations += 1;
        }

        let mut progress = self.progress.write().await;
        progress.state = SyncState::Completed;
        progress.completed_at = Some(Utc::now());
        progress.current_conversation = None;
        info!(
            "[{}] history sync completed: {} messages in {} chats",
            self.instance_id, progress.processed_messages, progress.processed_conversations
        );
    }
}
