use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the bridge. Defaults mirror the behavior of a
/// production deployment; `from_env` overrides the deployment-specific bits.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Directory holding one opaque credential bundle per instance id.
    /// Read by the embedding layer when it constructs the
    /// `FileCredentialStore`; the core itself never touches it.
    pub sessions_path: PathBuf,
    /// Webhook endpoint for message/status notifications. `None` disables
    /// HTTP delivery. Wiring this into an `HttpEventSink` is likewise the
    /// embedding layer's job; events flow to whatever sink is injected.
    pub webhook_url: Option<String>,
    /// Number of historical messages processed per batch within one chat.
    pub history_batch_size: usize,
    /// Fixed delay between reconnect attempts after a transient drop.
    pub reconnect_delay: Duration,
    /// Reconnect attempts before giving up and reporting Disconnected.
    pub max_reconnect_attempts: u32,
    /// Bound on a single connection setup (socket open + pairing challenge).
    pub connect_timeout: Duration,
    /// Generous bound for outbound media sends; large payloads are slow and
    /// an expired timeout is a retryable-by-caller condition, not corruption.
    pub send_media_timeout: Duration,
    /// TTL for the opportunistic (instance, phone) -> display name cache.
    pub contact_cache_ttl: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            sessions_path: PathBuf::from("./sessions"),
            webhook_url: None,
            history_batch_size: 20,
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 3,
            connect_timeout: Duration::from_secs(60),
            send_media_timeout: Duration::from_secs(120),
            contact_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("WA_SESSIONS_PATH") {
            config.sessions_path = PathBuf::from(path);
        }
        if let Ok(url) = std::env::var("WA_WEBHOOK_URL") {
            if !url.is_empty() {
                config.webhook_url = Some(url);
            }
        }
        config
    }
}
