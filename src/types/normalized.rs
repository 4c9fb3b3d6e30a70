use serde::{Deserialize, Serialize};

/// Closed set of user-facing message types. `Protocol` marks envelopes with
/// no displayable content; they are filtered from user-facing history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Ptt,
    Document,
    Sticker,
    Location,
    LiveLocation,
    Contact,
    Contacts,
    Reaction,
    Poll,
    PollVote,
    ButtonResponse,
    ListResponse,
    Edit,
    Delete,
    GroupInvite,
    Order,
    Protocol,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Ptt => "ptt",
            Self::Document => "document",
            Self::Sticker => "sticker",
            Self::Location => "location",
            Self::LiveLocation => "live_location",
            Self::Contact => "contact",
            Self::Contacts => "contacts",
            Self::Reaction => "reaction",
            Self::Poll => "poll",
            Self::PollVote => "poll_vote",
            Self::ButtonResponse => "button_response",
            Self::ListResponse => "list_response",
            Self::Edit => "edit",
            Self::Delete => "delete",
            Self::GroupInvite => "group_invite",
            Self::Order => "order",
            Self::Protocol => "protocol",
        }
    }
}

/// Binary payload metadata. `thumbnail` is a data URI built from inline
/// bytes; `payload` stays empty until the media fetcher resolves it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub mimetype: Option<String>,
    pub byte_length: Option<u64>,
    pub duration_secs: Option<u32>,
    pub file_name: Option<String>,
    pub thumbnail: Option<String>,
    pub payload: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotedRef {
    pub id: String,
    /// Human-readable preview, recoverable for every quotable type without
    /// downloading the quoted payload.
    pub preview: String,
    pub kind: MessageKind,
    pub participant: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionRef {
    pub target_id: String,
    pub participant: Option<String>,
    /// Empty string means the reaction was removed.
    pub emoji: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationRef {
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactCard {
    pub display_name: String,
    pub vcard: String,
}

/// The decoder's output unit: one envelope, normalized. Transient; mapped
/// into the persistence schema, never stored as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMessage {
    /// Protocol message id; the global dedup key.
    pub protocol_id: String,
    /// Chat phone (individual) or group id.
    pub chat_id: String,
    /// Sending participant; equals `chat_id` outside group chats.
    pub sender_id: String,
    pub from_me: bool,
    pub is_group: bool,
    pub push_name: Option<String>,
    pub kind: MessageKind,
    pub text: String,
    pub caption: Option<String>,
    pub has_media: bool,
    pub media: Option<MediaDescriptor>,
    pub quoted: Option<QuotedRef>,
    pub mentions: Vec<String>,
    pub reaction: Option<ReactionRef>,
    /// Target of an edit, delete, or poll-vote signal.
    pub target_id: Option<String>,
    pub location: Option<LocationRef>,
    pub contact_card: Option<ContactCard>,
    pub timestamp_ms: i64,
}

impl NormalizedMessage {
    /// Short chat-displayable string used for the conversation preview.
    pub fn preview(&self) -> String {
        if !self.text.is_empty() {
            return self.text.clone();
        }
        match self.kind {
            MessageKind::Image => "Photo".into(),
            MessageKind::Video => "Video".into(),
            MessageKind::Ptt => "Voice message".into(),
            MessageKind::Audio => "Audio".into(),
            MessageKind::Document => self
                .media
                .as_ref()
                .and_then(|m| m.file_name.clone())
                .unwrap_or_else(|| "Document".into()),
            MessageKind::Sticker => "Sticker".into(),
            MessageKind::Location | MessageKind::LiveLocation => "Location".into(),
            MessageKind::Contact | MessageKind::Contacts => "Contact".into(),
            MessageKind::Poll => "Poll".into(),
            MessageKind::GroupInvite => "Group invite".into(),
            MessageKind::Order => "Order".into(),
            _ => String::new(),
        }
    }
}
