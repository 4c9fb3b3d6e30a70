//! Pure mapping from one raw protocol envelope to a normalized message.
//!
//! Unknown content is data, not a failure: anything that matches no known
//! shape comes out as `MessageKind::Protocol` and is filtered from
//! user-facing history downstream.

use serde_json::Value;

use crate::media::data_uri;
use crate::types::envelope::{Content, ContextInfo, Envelope, LocationContent, MediaContent};
use crate::types::normalized::{
    ContactCard, LocationRef, MediaDescriptor, MessageKind, NormalizedMessage, QuotedRef,
    ReactionRef,
};

/// Wrappers (view-once, ephemeral, edited) recurse exactly this many levels
/// into their inner content.
const MAX_UNWRAP_DEPTH: u8 = 1;

pub fn decode(envelope: &Envelope) -> NormalizedMessage {
    let mut message = NormalizedMessage {
        protocol_id: envelope.key.id.clone(),
        chat_id: envelope.chat_id().to_string(),
        sender_id: envelope.sender_id().to_string(),
        from_me: envelope.key.from_me,
        is_group: envelope.is_group(),
        push_name: envelope.push_name.clone(),
        kind: MessageKind::Protocol,
        text: String::new(),
        caption: None,
        has_media: false,
        media: None,
        quoted: None,
        mentions: Vec::new(),
        reaction: None,
        target_id: None,
        location: None,
        contact_card: None,
        timestamp_ms: envelope.timestamp.to_millis(),
    };

    if let Some(content) = &envelope.content {
        extract(content, &mut message, 0);
    }

    message
}

fn extract(content: &Content, out: &mut NormalizedMessage, depth: u8) {
    match content {
        Content::Text(text) => {
            out.kind = MessageKind::Text;
            out.text = text.clone();
        }
        Content::ExtendedText { text, context } => {
            out.kind = MessageKind::Text;
            out.text = text.clone();
            apply_context(context.as_ref(), out);
        }
        Content::Image(media) => extract_media(media, MessageKind::Image, "image/jpeg", out),
        Content::Video(media) => extract_media(media, MessageKind::Video, "video/mp4", out),
        Content::Audio { media, ptt } => {
            let kind = if *ptt {
                MessageKind::Ptt
            } else {
                MessageKind::Audio
            };
            extract_media(media, kind, "audio/ogg", out);
        }
        Content::Document(media) | Content::DocumentWithCaption(media) => {
            extract_media(media, MessageKind::Document, "application/octet-stream", out)
        }
        Content::Sticker(media) => extract_media(media, MessageKind::Sticker, "image/webp", out),
        Content::Location(location) => extract_location(location, MessageKind::Location, out),
        Content::LiveLocation(location) => {
            extract_location(location, MessageKind::LiveLocation, out)
        }
        Content::Contact(contact) => {
            out.kind = MessageKind::Contact;
            out.text = contact.display_name.clone();
            out.contact_card = Some(ContactCard {
                display_name: contact.display_name.clone(),
                vcard: contact.vcard.clone(),
            });
        }
        Content::ContactsArray {
            display_name,
            contacts,
        } => {
            out.kind = MessageKind::Contacts;
            out.text = display_name
                .clone()
                .unwrap_or_else(|| format!("{} contacts", contacts.len()));
        }
        Content::Reaction {
            target_id,
            target_participant,
            emoji,
        } => {
            out.kind = MessageKind::Reaction;
            out.text = emoji.clone();
            out.target_id = Some(target_id.clone());
            out.reaction = Some(ReactionRef {
                target_id: target_id.clone(),
                participant: target_participant.clone(),
                emoji: emoji.clone(),
            });
        }
        Content::PollCreation { name, .. } => {
            out.kind = MessageKind::Poll;
            out.text = name.clone();
        }
        Content::PollVote { target_id } => {
            out.kind = MessageKind::PollVote;
            out.target_id = Some(target_id.clone());
        }
        Content::ButtonsResponse {
            selected_id,
            selected_text,
        } => {
            out.kind = MessageKind::ButtonResponse;
            out.text = selected_text
                .clone()
                .or_else(|| selected_id.clone())
                .unwrap_or_default();
        }
        Content::ListResponse { title, row_id } => {
            out.kind = MessageKind::ListResponse;
            out.text = title
                .clone()
                .or_else(|| row_id.clone())
                .unwrap_or_default();
        }
        Content::ProtocolEdit {
            target_id,
            edited_text,
        } => {
            out.kind = MessageKind::Edit;
            out.text = edited_text.clone().unwrap_or_default();
            out.target_id = Some(target_id.clone());
        }
        Content::ProtocolRevoke { target_id } => {
            out.kind = MessageKind::Delete;
            out.target_id = Some(target_id.clone());
        }
        Content::ProtocolOther => {
            out.kind = MessageKind::Protocol;
        }
        Content::ViewOnce(inner) | Content::Ephemeral(inner) | Content::Edited(inner) => {
            if depth < MAX_UNWRAP_DEPTH {
                extract(inner, out, depth + 1);
            } else {
                out.kind = MessageKind::Protocol;
            }
        }
        Content::GroupInvite {
            group_name,
            group_jid: _,
        } => {
            out.kind = MessageKind::GroupInvite;
            out.text = group_name.clone().unwrap_or_else(|| "Group invite".into());
        }
        Content::Order { title, item_count } => {
            out.kind = MessageKind::Order;
            out.text = title
                .clone()
                .unwrap_or_else(|| format!("Order ({item_count} items)"));
        }
        Content::Unknown(value) => match scan_for_text(value) {
            Some(text) => {
                out.kind = MessageKind::Text;
                out.text = text;
            }
            None => {
                out.kind = MessageKind::Protocol;
            }
        },
    }
}

fn extract_media(
    media: &MediaContent,
    kind: MessageKind,
    fallback_mime: &str,
    out: &mut NormalizedMessage,
) {
    out.kind = kind;
    out.text = media.caption.clone().unwrap_or_default();
    out.caption = media.caption.clone();
    out.has_media = true;
    out.media = Some(MediaDescriptor {
        mimetype: Some(
            media
                .mimetype
                .clone()
                .unwrap_or_else(|| fallback_mime.to_string()),
        ),
        byte_length: media.file_length,
        duration_secs: media.seconds,
        file_name: media.file_name.clone(),
        thumbnail: media
            .jpeg_thumbnail
            .as_deref()
            .map(|bytes| data_uri("image/jpeg", bytes)),
        payload: None,
    });
    apply_context(media.context.as_ref(), out);
}

fn extract_location(location: &LocationContent, kind: MessageKind, out: &mut NormalizedMessage) {
    out.kind = kind;
    out.text = location
        .name
        .clone()
        .or_else(|| location.address.clone())
        .unwrap_or_default();
    out.location = Some(LocationRef {
        latitude: location.latitude,
        longitude: location.longitude,
        name: location.name.clone(),
    });
    if let Some(thumb) = location.jpeg_thumbnail.as_deref() {
        out.media = Some(MediaDescriptor {
            thumbnail: Some(data_uri("image/jpeg", thumb)),
            ..MediaDescriptor::default()
        });
    }
}

fn apply_context(context: Option<&ContextInfo>, out: &mut NormalizedMessage) {
    let Some(ctx) = context else { return };
    out.mentions = ctx.mentioned_jids.clone();
    if let Some(quoted) = ctx.quoted.as_deref() {
        let (preview, kind) = quoted_preview(quoted);
        out.quoted = Some(QuotedRef {
            id: ctx.stanza_id.clone().unwrap_or_default(),
            preview,
            kind,
            participant: ctx.participant.clone(),
        });
    }
}

/// Human-readable preview for a quoted message. Must produce something for
/// every quotable type without downloading the quoted payload.
fn quoted_preview(content: &Content) -> (String, MessageKind) {
    match content {
        Content::Text(text) => (text.clone(), MessageKind::Text),
        Content::ExtendedText { text, .. } => (text.clone(), MessageKind::Text),
        Content::Image(media) => (
            media.caption.clone().unwrap_or_else(|| "Photo".into()),
            MessageKind::Image,
        ),
        Content::Video(media) => (
            media.caption.clone().unwrap_or_else(|| "Video".into()),
            MessageKind::Video,
        ),
        Content::Audio { ptt, .. } => {
            if *ptt {
                ("Voice message".into(), MessageKind::Ptt)
            } else {
                ("Audio".into(), MessageKind::Audio)
            }
        }
        Content::Document(media) | Content::DocumentWithCaption(media) => (
            media.file_name.clone().unwrap_or_else(|| "Document".into()),
            MessageKind::Document,
        ),
        Content::Sticker(_) => ("Sticker".into(), MessageKind::Sticker),
        _ => ("Message".into(), MessageKind::Text),
    }
}

/// Last-resort scan of an unclassified shape for any displayable text:
/// top-level string fields first, then well-known text keys one level down.
fn scan_for_text(value: &Value) -> Option<String> {
    const TEXT_KEYS: [&str; 6] = ["text", "caption", "body", "content", "title", "description"];

    let Value::Object(map) = value else {
        if let Value::String(s) = value {
            if !s.is_empty() {
                return Some(s.clone());
            }
        }
        return None;
    };

    for field in map.values() {
        if let Value::String(s) = field {
            if !s.is_empty() {
                return Some(s.clone());
            }
        }
    }
    for field in map.values() {
        if let Value::Object(inner) = field {
            for key in TEXT_KEYS {
                if let Some(Value::String(s)) = inner.get(key) {
                    if !s.is_empty() {
                        return Some(s.clone());
                    }
                }
            }
        }
    }
    None
}
