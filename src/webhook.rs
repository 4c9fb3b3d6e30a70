use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;

/// Event kinds delivered to the excluded webhook/API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    #[serde(rename = "NEW_MESSAGE")]
    NewMessage,
    #[serde(rename = "HISTORY_MESSAGE")]
    HistoryMessage,
    #[serde(rename = "CONNECTION_UPDATE")]
    ConnectionUpdate,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundEvent {
    pub instance_id: String,
    pub event: EventKind,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl OutboundEvent {
    pub fn new(instance_id: &str, event: EventKind, data: serde_json::Value) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            event,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Fire-and-forget notification sink. Delivery failure is logged, never
/// retried, and must never block message processing; implementations do
/// their I/O off the caller's task.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: OutboundEvent);
}

/// Sink that drops everything; useful when no webhook is configured.
pub struct NullSink;

impl EventSink for NullSink {
    fn deliver(&self, _event: OutboundEvent) {}
}

/// POSTs each event as JSON to a fixed webhook endpoint.
pub struct HttpEventSink {
    url: String,
}

impl HttpEventSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl EventSink for HttpEventSink {
    fn deliver(&self, event: OutboundEvent) {
        let url = self.url.clone();
        tokio::task::spawn_blocking(move || {
            let body = match serde_json::to_vec(&event) {
                Ok(body) => body,
                Err(e) => {
                    debug!("failed to serialize webhook event: {e}");
                    return;
                }
            };
            let result = ureq::post(&url)
                .header("content-type", "application/json")
                .send(&body[..]);
            if let Err(e) = result {
                debug!(
                    "[{}] webhook delivery to {url} failed (not retried): {e}",
                    event.instance_id
                );
            }
        });
    }
}
