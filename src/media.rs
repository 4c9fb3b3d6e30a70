use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::{MediaError, SendError};
use crate::session::ProtocolSession;
use crate::types::envelope::Envelope;

const FALLBACK_MIMETYPE: &str = "application/octet-stream";

/// Downloads and decrypts the binary payload of a media envelope through
/// the session, inlining it as a base64 data URI.
///
/// Media is encrypted separately from the message envelope, so this is a
/// distinct fallible step: a failure here must never block storing the
/// message metadata (text, caption, and thumbnail are already available).
pub struct MediaFetcher;

impl MediaFetcher {
    pub async fn fetch(
        session: &dyn ProtocolSession,
        envelope: &Envelope,
        mimetype: Option<&str>,
    ) -> Result<String, MediaError> {
        let bytes = session.download_media(envelope).await?;
        Ok(data_uri(mimetype.unwrap_or(FALLBACK_MIMETYPE), &bytes))
    }
}

pub fn data_uri(mimetype: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mimetype, BASE64.encode(bytes))
}

/// Decode an inbound base64 media payload for outbound sending. Accepts a
/// full data URI ("data:image/png;base64,...."), a bare "<prefix>,<data>"
/// pair, or raw base64; returns the detected mimetype (if any) and bytes.
pub fn parse_media_payload(data: &str) -> Result<(Option<String>, Vec<u8>), SendError> {
    let (mimetype, encoded) = if let Some(rest) = data.strip_prefix("data:") {
        match rest.split_once(";base64,") {
            Some((mime, payload)) => (Some(mime.to_string()), payload),
            None => (
                None,
                rest.split_once(',').map(|(_, p)| p).unwrap_or(rest),
            ),
        }
    } else if let Some((_, payload)) = data.split_once("base64,") {
        (None, payload)
    } else {
        (None, data)
    };

    BASE64
        .decode(encoded.trim())
        .map(|bytes| (mimetype, bytes))
        .map_err(|e| SendError::InvalidPayload(format!("bad base64 media data: {e}")))
}

/// Rough voice-note duration from the opus payload size, matching what the
/// network expects when no real duration is known.
pub fn estimate_ptt_seconds(byte_len: usize) -> u32 {
    (byte_len / 16_000) as u32
}
