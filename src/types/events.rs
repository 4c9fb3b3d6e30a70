use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::credentials::CredentialBundle;
use crate::types::envelope::{Envelope, EnvelopeTimestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    AwaitingPairing,
    Connected,
}

/// Externally visible state of one instance session.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub connection: ConnectionStatus,
    pub qr_code: Option<String>,
    pub pairing_code: Option<String>,
    pub phone_number: Option<String>,
    pub retry_count: u32,
}

impl Default for InstanceStatus {
    fn default() -> Self {
        Self {
            connection: ConnectionStatus::Disconnected,
            qr_code: None,
            pairing_code: None,
            phone_number: None,
            retry_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Syncing,
    Completed,
    Error,
}

/// Progress of one historical sync pass. In-memory only; reset at the start
/// of each sync and never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SyncProgress {
    pub state: SyncState,
    pub total_messages: usize,
    pub processed_messages: usize,
    pub total_conversations: usize,
    pub processed_conversations: usize,
    pub current_conversation: Option<String>,
    pub media_downloaded: usize,
    pub media_failed: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            total_messages: 0,
            processed_messages: 0,
            total_conversations: 0,
            processed_conversations: 0,
            current_conversation: None,
            media_downloaded: 0,
            media_failed: 0,
            started_at: None,
            completed_at: None,
        }
    }
}

impl SyncProgress {
    /// Reset counters and mark the pass started.
    pub fn begin(&mut self, total_messages: usize, total_conversations: usize) {
        *self = Self {
            state: SyncState::Syncing,
            total_messages,
            total_conversations,
            started_at: Some(Utc::now()),
            ..Self::default()
        };
    }
}

/// Why the session library closed the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    ConnectionLost,
    TimedOut,
    PairingTimedOut,
    StreamReplaced,
    LoggedOut,
    Unauthorized,
}

impl DisconnectCause {
    /// Transient drops are recovered locally with the bounded retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost | Self::TimedOut | Self::StreamReplaced
        )
    }

    /// Invalid-session causes force fresh pairing on the next connect.
    pub fn wipes_credentials(&self) -> bool {
        matches!(self, Self::LoggedOut | Self::Unauthorized)
    }
}

/// Chat-level metadata from a bulk snapshot or incremental update. Never
/// creates conversations on its own; only refreshes existing ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatSnapshot {
    pub jid: String,
    pub name: Option<String>,
    /// Resolved group subject, when the protocol layer had it inline.
    pub subject: Option<String>,
    pub unread_count: u32,
    pub conversation_timestamp: Option<EnvelopeTimestamp>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactSnapshot {
    pub jid: String,
    pub name: Option<String>,
    /// The name the contact set for themselves (push name).
    pub notify: Option<String>,
    pub verified_name: Option<String>,
}

impl ContactSnapshot {
    pub fn best_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or(self.notify.as_deref())
            .or(self.verified_name.as_deref())
            .filter(|n| !n.is_empty())
    }
}

/// Bulk historical delivery at (re)connect time.
#[derive(Debug, Clone, Default)]
pub struct HistorySnapshot {
    pub chats: Vec<ChatSnapshot>,
    pub contacts: Vec<ContactSnapshot>,
    pub messages: Vec<Envelope>,
    pub is_latest: bool,
}

/// Everything the underlying session library can emit on the per-instance
/// event channel. One channel per instance, consumed by a single ordered
/// processing loop.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Pairing challenge payload to render as a QR code.
    QrCode(String),
    /// Textual pairing code (phone-number pairing flow).
    PairingCode(String),
    /// Socket open and authenticated.
    Opened { phone_number: String },
    /// Credential material changed; must be persisted to survive restart.
    CredentialsUpdated(CredentialBundle),
    /// Live message batch, in delivery order.
    LiveMessages(Vec<Envelope>),
    /// Bulk historical snapshot.
    History(HistorySnapshot),
    /// Incremental contact updates.
    ContactsUpdated(Vec<ContactSnapshot>),
    /// Incremental chat metadata updates.
    ChatsUpdated(Vec<ChatSnapshot>),
    /// Terminal event for this connection.
    Closed(DisconnectCause),
}
