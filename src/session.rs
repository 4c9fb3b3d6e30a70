use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::credentials::CredentialBundle;
use crate::error::{MediaError, SendError, SessionError};
use crate::types::envelope::Envelope;
use crate::types::events::SessionEvent;

/// Everything the bridge needs from one open connection to the WhatsApp
/// multi-device network. End-to-end crypto, framing, and retransmission
/// live behind this boundary.
#[async_trait]
pub trait ProtocolSession: Send + Sync {
    /// Send a message, returning the protocol message id assigned to it.
    async fn send_message(
        &self,
        chat_jid: &str,
        message: OutgoingMessage,
    ) -> Result<String, SendError>;

    /// Download and decrypt the binary payload referenced by this envelope.
    async fn download_media(&self, envelope: &Envelope) -> Result<Vec<u8>, MediaError>;

    /// Request a textual pairing code bound to the given phone number.
    async fn request_pairing_code(&self, phone: &str) -> Result<String, SessionError>;

    /// Resolve a group's subject. Best-effort; used to name group
    /// conversations during history sync.
    async fn group_subject(&self, group_jid: &str) -> Result<Option<String>, SessionError>;

    /// Explicit logout, invalidating the session on the server side.
    async fn logout(&self) -> Result<(), SessionError>;

    /// Tear down the socket without logging out.
    async fn close(&self);
}

/// Parameters for one connection attempt.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub instance_id: String,
    /// Persisted credential material, or `None` to start fresh pairing.
    pub credentials: Option<CredentialBundle>,
    /// When set and no credentials exist, pairing happens via numeric code
    /// instead of (or in addition to) the QR challenge.
    pub pairing_phone: Option<String>,
}

/// Boundary to the underlying protocol library: opens one socket and hands
/// back the session handle plus its ordered event channel.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(
        &self,
        config: SessionConfig,
    ) -> Result<(Arc<dyn ProtocolSession>, mpsc::Receiver<SessionEvent>), SessionError>;
}

#[derive(Debug, Clone)]
pub enum OutgoingMessage {
    Text { body: String },
    Media(OutgoingMedia),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingMediaKind {
    Image,
    Video,
    Audio,
    Document,
}

#[derive(Debug, Clone)]
pub struct OutgoingMedia {
    pub kind: OutgoingMediaKind,
    pub data: Vec<u8>,
    pub mimetype: String,
    pub file_name: Option<String>,
    pub caption: Option<String>,
    /// Voice note (push-to-talk) flag; only meaningful for audio.
    pub ptt: bool,
    pub duration_secs: Option<u32>,
}
