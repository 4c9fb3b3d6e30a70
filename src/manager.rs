use dashmap::DashMap;
use log::{info, warn};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::BridgeConfig;
use crate::connection::{InstanceConnection, InstanceShared};
use crate::contact_cache::ContactCache;
use crate::credentials::CredentialStore;
use crate::error::{ManagerError, SendError};
use crate::history::HistorySynchronizer;
use crate::media;
use crate::pipeline::MessagePipeline;
use crate::session::{
    OutgoingMedia, OutgoingMediaKind, OutgoingMessage, ProtocolSession, SessionFactory,
};
use crate::storage::ConversationStore;
use crate::types::events::{ConnectionStatus, InstanceStatus, SyncProgress};
use crate::webhook::EventSink;

const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
const PTT_MIMETYPE: &str = "audio/ogg; codecs=opus";
const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

/// Outbound media described the way API callers hand it to us: a typed
/// string plus a base64 (or data URI) payload.
#[derive(Debug, Clone)]
pub struct MediaSendRequest {
    /// One of "image", "video", "audio", "ptt", "document".
    pub kind: String,
    /// Data URI or bare base64.
    pub payload: String,
    pub mimetype: Option<String>,
    pub file_name: Option<String>,
    pub caption: Option<String>,
}

struct InstanceHandle {
    shared: Arc<InstanceShared>,
    pairing_phone: Option<String>,
    task: JoinHandle<()>,
}

/// Owns every instance: spawns one event-loop task per instance id and
/// serves the command surface (connect, disconnect, reset, send, status)
/// against the shared state those tasks maintain. At most one live socket
/// exists per instance id.
pub struct InstanceManager {
    config: BridgeConfig,
    factory: Arc<dyn SessionFactory>,
    store: Arc<dyn ConversationStore>,
    credentials: Arc<dyn CredentialStore>,
    sink: Arc<dyn EventSink>,
    contacts: Arc<ContactCache>,
    instances: DashMap<String, InstanceHandle>,
}

impl InstanceManager {
    pub fn new(
        config: BridgeConfig,
        factory: Arc<dyn SessionFactory>,
        store: Arc<dyn ConversationStore>,
        credentials: Arc<dyn CredentialStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let contacts = Arc::new(ContactCache::new(config.contact_cache_ttl));
        Self {
            config,
            factory,
            store,
            credentials,
            sink,
            contacts,
            instances: DashMap::new(),
        }
    }

    /// Start (or restart) the event loop for an instance. An existing
    /// session for the same id is torn down first.
    pub async fn connect_instance(&self, instance_id: &str, pairing_phone: Option<String>) {
        if let Some((_, handle)) = self.instances.remove(instance_id) {
            info!("[{instance_id}] replacing existing session");
            self.teardown(handle).await;
        }

        let shared = Arc::new(InstanceShared::new(instance_id.to_string()));
        let pipeline = Arc::new(MessagePipeline::new(
            instance_id.to_string(),
            Arc::clone(&self.store),
            Arc::clone(&self.sink),
            Arc::clone(&self.contacts),
            Arc::clone(&shared.progress),
        ));
        let history = HistorySynchronizer::new(
            instance_id.to_string(),
            Arc::clone(&self.store),
            Arc::clone(&pipeline),
            Arc::clone(&shared.progress),
            self.config.history_batch_size,
        );
        let connection = InstanceConnection::new(
            Arc::clone(&shared),
            self.config.clone(),
            Arc::clone(&self.factory),
            Arc::clone(&self.credentials),
            Arc::clone(&self.sink),
            pipeline,
            history,
            pairing_phone.clone(),
        );

        let task = tokio::spawn(connection.run());
        self.instances.insert(
            instance_id.to_string(),
            InstanceHandle {
                shared,
                pairing_phone,
                task,
            },
        );
    }

    /// Log the instance out (best-effort), stop its event loop, and wipe
    /// its stored credentials so the next connect starts a fresh pairing.
    pub async fn disconnect_instance(&self, instance_id: &str) -> Result<(), ManagerError> {
        let (_, handle) = self
            .instances
            .remove(instance_id)
            .ok_or_else(|| ManagerError::InstanceNotFound(instance_id.to_string()))?;

        let session = handle.shared.session.read().await.clone();
        if let Some(session) = session {
            if let Err(e) = session.logout().await {
                warn!("[{instance_id}] logout failed: {e}");
            }
        }
        self.teardown(handle).await;
        self.credentials.delete(instance_id).await?;
        info!("[{instance_id}] disconnected and credentials wiped");
        Ok(())
    }

    /// Drop the current session and credentials, then reconnect from
    /// scratch to produce a new pairing challenge.
    pub async fn reset_instance(&self, instance_id: &str) -> Result<(), ManagerError> {
        let pairing_phone = match self.instances.remove(instance_id) {
            Some((_, handle)) => {
                let phone = handle.pairing_phone.clone();
                self.teardown(handle).await;
                phone
            }
            None => None,
        };
        self.credentials.delete(instance_id).await?;
        self.connect_instance(instance_id, pairing_phone).await;
        Ok(())
    }

    pub async fn send_text(
        &self,
        instance_id: &str,
        to: &str,
        body: &str,
    ) -> Result<String, ManagerError> {
        let session = self.connected_session(instance_id).await?;
        let id = session
            .send_message(
                &to_jid(to),
                OutgoingMessage::Text {
                    body: body.to_string(),
                },
            )
            .await?;
        Ok(id)
    }

    pub async fn send_media(
        &self,
        instance_id: &str,
        to: &str,
        request: MediaSendRequest,
    ) -> Result<String, ManagerError> {
        let session = self.connected_session(instance_id).await?;

        let (detected_mime, data) = media::parse_media_payload(&request.payload)?;
        let ptt = request.kind == "ptt";
        let kind = match request.kind.as_str() {
            "image" => OutgoingMediaKind::Image,
            "video" => OutgoingMediaKind::Video,
            "audio" | "ptt" => OutgoingMediaKind::Audio,
            "document" => OutgoingMediaKind::Document,
            other => {
                return Err(SendError::InvalidPayload(format!(
                    "unsupported media kind {other:?}"
                ))
                .into());
            }
        };

        // Voice notes must go out as opus regardless of what the caller
        // declared, or the recipient renders them as plain audio files.
        let mimetype = if ptt {
            PTT_MIMETYPE.to_string()
        } else {
            request
                .mimetype
                .or(detected_mime)
                .unwrap_or_else(|| "application/octet-stream".to_string())
        };
        let duration_secs = ptt.then(|| media::estimate_ptt_seconds(data.len()));

        let outgoing = OutgoingMessage::Media(OutgoingMedia {
            kind,
            data,
            mimetype,
            file_name: request.file_name,
            caption: request.caption,
            ptt,
            duration_secs,
        });

        let jid = to_jid(to);
        let send = session.send_message(&jid, outgoing);
        match timeout(self.config.send_media_timeout, send).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SendError::Timeout.into()),
        }
    }

    pub async fn status(&self, instance_id: &str) -> InstanceStatus {
        match self.shared(instance_id) {
            Some(shared) => shared.status.read().await.clone(),
            None => InstanceStatus::default(),
        }
    }

    pub async fn sync_progress(&self, instance_id: &str) -> Option<SyncProgress> {
        let shared = self.shared(instance_id)?;
        Some(shared.progress.read().await.clone())
    }

    /// Ids of instances whose socket is currently open and authenticated.
    pub async fn list_active(&self) -> Vec<String> {
        let entries: Vec<(String, Arc<InstanceShared>)> = self
            .instances
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(&e.value().shared)))
            .collect();
        let mut active = Vec::new();
        for (id, shared) in entries {
            if shared.status.read().await.connection == ConnectionStatus::Connected {
                active.push(id);
            }
        }
        active
    }

    /// Graceful shutdown of every instance without logging any of them out,
    /// so stored sessions resume on the next start.
    pub async fn disconnect_all(&self) {
        let ids: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, handle)) = self.instances.remove(&id) {
                self.teardown(handle).await;
            }
        }
    }

    // Registry guards must never be held across an await; clone the shared
    // state out first.
    fn shared(&self, instance_id: &str) -> Option<Arc<InstanceShared>> {
        self.instances
            .get(instance_id)
            .map(|handle| Arc::clone(&handle.shared))
    }

    async fn connected_session(
        &self,
        instance_id: &str,
    ) -> Result<Arc<dyn ProtocolSession>, ManagerError> {
        let shared = self
            .shared(instance_id)
            .ok_or_else(|| ManagerError::InstanceNotFound(instance_id.to_string()))?;
        if shared.status.read().await.connection != ConnectionStatus::Connected {
            return Err(ManagerError::NotConnected(instance_id.to_string()));
        }
        shared
            .session
            .read()
            .await
            .clone()
            .ok_or_else(|| ManagerError::NotConnected(instance_id.to_string()))
    }

    async fn teardown(&self, handle: InstanceHandle) {
        handle.shared.shutting_down.store(true, Ordering::SeqCst);
        handle.shared.shutdown.notify_one();
        let abort = handle.task.abort_handle();
        if timeout(TEARDOWN_GRACE, handle.task).await.is_err() {
            warn!(
                "[{}] event loop did not stop in time; aborting",
                handle.shared.instance_id
            );
            abort.abort();
        }
    }
}

/// Accept either a full JID or a bare phone number.
fn to_jid(to: &str) -> String {
    if to.contains('@') {
        to.to_string()
    } else {
        format!("{to}@{DEFAULT_USER_SERVER}")
    }
}
