use serde::{Deserialize, Serialize};

/// Timestamps before this value (2000-01-01 in epoch milliseconds) are
/// assumed to be epoch seconds and scaled up. The protocol layer is
/// inconsistent about the unit, and 64-bit values may additionally arrive
/// split across two 32-bit halves.
const MILLIS_EPOCH_THRESHOLD: i64 = 946_684_800_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeTimestamp {
    Unix(i64),
    Split { low: u32, high: u32 },
}

impl EnvelopeTimestamp {
    /// Reconstruct a single epoch-millisecond value, merging split halves
    /// and correcting second-vs-millisecond ambiguity.
    pub fn to_millis(self) -> i64 {
        let raw = match self {
            Self::Unix(value) => value,
            Self::Split { low, high } => ((high as i64) << 32) | (low as i64),
        };
        if raw > 0 && raw < MILLIS_EPOCH_THRESHOLD {
            raw * 1000
        } else {
            raw
        }
    }
}

impl Default for EnvelopeTimestamp {
    fn default() -> Self {
        Self::Unix(0)
    }
}

/// Routing key of one protocol envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageKey {
    /// Protocol message id, globally unique; the dedup key.
    pub id: String,
    /// Chat JID ("<phone>@s.whatsapp.net" or "<id>@g.us").
    pub chat_jid: String,
    /// Sending participant JID; only set in group chats.
    pub participant: Option<String>,
    pub from_me: bool,
}

/// One raw message object as delivered by the underlying session library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub key: MessageKey,
    pub push_name: Option<String>,
    pub timestamp: EnvelopeTimestamp,
    /// `None` for bare protocol signals that carry no content at all.
    pub content: Option<Content>,
}

impl Envelope {
    pub fn chat_id(&self) -> &str {
        jid_user(&self.key.chat_jid)
    }

    pub fn sender_id(&self) -> &str {
        jid_user(self.key.participant.as_deref().unwrap_or(&self.key.chat_jid))
    }

    pub fn is_group(&self) -> bool {
        self.key.chat_jid.ends_with("@g.us")
    }

    pub fn is_broadcast(&self) -> bool {
        self.key.chat_jid.contains("broadcast")
    }
}

/// The user part of a JID ("5511999@s.whatsapp.net" -> "5511999").
pub fn jid_user(jid: &str) -> &str {
    jid.split('@').next().unwrap_or(jid)
}

pub fn jid_is_group(jid: &str) -> bool {
    jid.ends_with("@g.us")
}

pub fn jid_is_broadcast(jid: &str) -> bool {
    jid.contains("broadcast")
}

/// Binary payload descriptor shared by all media-bearing variants. The
/// thumbnail is inline (already decrypted); the payload itself requires a
/// separate download keyed by `media_key`/`direct_path`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaContent {
    pub mimetype: Option<String>,
    pub caption: Option<String>,
    pub file_length: Option<u64>,
    pub seconds: Option<u32>,
    pub file_name: Option<String>,
    pub jpeg_thumbnail: Option<Vec<u8>>,
    pub media_key: Option<Vec<u8>>,
    pub direct_path: Option<String>,
    pub gif_playback: bool,
    pub context: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationContent {
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
    pub address: Option<String>,
    pub jpeg_thumbnail: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactContent {
    pub display_name: String,
    pub vcard: String,
}

/// Quote/mention context attached to text and media variants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextInfo {
    /// Protocol id of the quoted message.
    pub stanza_id: Option<String>,
    pub participant: Option<String>,
    pub mentioned_jids: Vec<String>,
    pub quoted: Option<Box<Content>>,
}

/// Closed set of envelope shapes. Wrappers (`ViewOnce`, `Ephemeral`,
/// `Edited`) recurse exactly one level into their inner content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Content {
    Text(String),
    ExtendedText {
        text: String,
        context: Option<ContextInfo>,
    },
    Image(MediaContent),
    Video(MediaContent),
    Audio {
        media: MediaContent,
        ptt: bool,
    },
    Document(MediaContent),
    /// Document wrapped in its caption carrier; decodes like `Document`.
    DocumentWithCaption(MediaContent),
    Sticker(MediaContent),
    Location(LocationContent),
    LiveLocation(LocationContent),
    Contact(ContactContent),
    ContactsArray {
        display_name: Option<String>,
        contacts: Vec<ContactContent>,
    },
    Reaction {
        target_id: String,
        target_participant: Option<String>,
        /// Empty string removes the sender's reaction.
        emoji: String,
    },
    PollCreation {
        name: String,
        options: Vec<String>,
    },
    PollVote {
        target_id: String,
    },
    ButtonsResponse {
        selected_id: Option<String>,
        selected_text: Option<String>,
    },
    ListResponse {
        title: Option<String>,
        row_id: Option<String>,
    },
    /// In-place edit delivered as a protocol signal.
    ProtocolEdit {
        target_id: String,
        edited_text: Option<String>,
    },
    /// Message revocation ("delete for everyone").
    ProtocolRevoke {
        target_id: String,
    },
    /// Any other protocol-level signal (key distribution, sync, ...).
    ProtocolOther,
    ViewOnce(Box<Content>),
    Ephemeral(Box<Content>),
    Edited(Box<Content>),
    GroupInvite {
        group_jid: String,
        group_name: Option<String>,
    },
    Order {
        title: Option<String>,
        item_count: u32,
    },
    /// Shape the session library could not classify; kept as raw JSON so the
    /// decoder can still scan it for displayable text.
    Unknown(serde_json::Value),
}
