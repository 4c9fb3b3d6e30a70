#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use whatsapp_bridge::config::BridgeConfig;
use whatsapp_bridge::credentials::{CredentialStore, MemoryCredentialStore};
use whatsapp_bridge::error::{MediaError, SendError, SessionError};
use whatsapp_bridge::manager::InstanceManager;
use whatsapp_bridge::storage::{ConversationStore, MemoryStore};
use whatsapp_bridge::session::{
    OutgoingMessage, ProtocolSession, SessionConfig, SessionFactory,
};
use whatsapp_bridge::types::envelope::{Content, Envelope, EnvelopeTimestamp, MessageKey};
use whatsapp_bridge::types::events::SessionEvent;
use whatsapp_bridge::webhook::{EventKind, EventSink, OutboundEvent};

/// Config tuned so retry/backoff paths run in milliseconds.
pub fn fast_config() -> BridgeConfig {
    BridgeConfig {
        reconnect_delay: Duration::from_millis(10),
        connect_timeout: Duration::from_secs(5),
        send_media_timeout: Duration::from_secs(5),
        ..BridgeConfig::default()
    }
}

#[derive(Clone)]
pub enum MediaBehavior {
    Succeed(Vec<u8>),
    Fail,
}

/// One scripted connection: the events the fake session emits after the
/// socket opens, plus how it answers session calls.
pub struct SessionScript {
    pub events: Vec<SessionEvent>,
    /// Keep the event channel open after the scripted events so the
    /// connection stays up until shutdown.
    pub keep_open: bool,
    pub media: MediaBehavior,
    pub pairing_code: Option<String>,
    /// (group jid, subject) answers for group metadata queries.
    pub group_subjects: Vec<(String, String)>,
}

impl Default for SessionScript {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            keep_open: true,
            media: MediaBehavior::Fail,
            pairing_code: None,
            group_subjects: Vec::new(),
        }
    }
}

pub enum Script {
    /// Connection attempt fails outright.
    Fail(SessionError),
    /// Connection attempt never resolves, to exercise the connect timeout.
    Hang,
    /// Connection attempt succeeds and plays this script.
    Session(SessionScript),
}

#[derive(Default)]
pub struct SendLog {
    pub sent: Mutex<Vec<(String, OutgoingMessage)>>,
    pub logouts: AtomicUsize,
}

pub struct FakeSession {
    log: Arc<SendLog>,
    media: MediaBehavior,
    pairing_code: Option<String>,
    group_subjects: Vec<(String, String)>,
    send_counter: AtomicUsize,
    // Keeps the event channel open while the session lives.
    _keeper: Option<mpsc::Sender<SessionEvent>>,
}

#[async_trait]
impl ProtocolSession for FakeSession {
    async fn send_message(
        &self,
        chat_jid: &str,
        message: OutgoingMessage,
    ) -> Result<String, SendError> {
        let n = self.send_counter.fetch_add(1, Ordering::SeqCst);
        self.log
            .sent
            .lock()
            .unwrap()
            .push((chat_jid.to_string(), message));
        Ok(format!("WAMID-{n}"))
    }

    async fn download_media(&self, _envelope: &Envelope) -> Result<Vec<u8>, MediaError> {
        match &self.media {
            MediaBehavior::Succeed(bytes) => Ok(bytes.clone()),
            MediaBehavior::Fail => Err(MediaError::Download("scripted failure".into())),
        }
    }

    async fn request_pairing_code(&self, _phone: &str) -> Result<String, SessionError> {
        self.pairing_code
            .clone()
            .ok_or_else(|| SessionError::Transport("no pairing code scripted".into()))
    }

    async fn group_subject(&self, group_jid: &str) -> Result<Option<String>, SessionError> {
        Ok(self
            .group_subjects
            .iter()
            .find(|(jid, _)| jid == group_jid)
            .map(|(_, subject)| subject.clone()))
    }

    async fn logout(&self) -> Result<(), SessionError> {
        self.log.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {}
}

/// Factory that plays a queue of scripted connection attempts. Once the
/// queue is exhausted every further attempt fails.
pub struct ScriptedFactory {
    scripts: Mutex<VecDeque<Script>>,
    pub connect_attempts: AtomicUsize,
    pub configs: Mutex<Vec<SessionConfig>>,
    pub log: Arc<SendLog>,
    /// Event-channel senders of every opened session, for injecting events
    /// mid-test.
    pub senders: Mutex<Vec<mpsc::Sender<SessionEvent>>>,
}

impl ScriptedFactory {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            connect_attempts: AtomicUsize::new(0),
            configs: Mutex::new(Vec::new()),
            log: Arc::new(SendLog::default()),
            senders: Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(String, OutgoingMessage)> {
        self.log.sent.lock().unwrap().clone()
    }

    /// Push an event into the most recently opened session's channel.
    pub async fn inject(&self, event: SessionEvent) {
        let sender = self
            .senders
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no session opened yet");
        sender.send(event).await.expect("event channel closed");
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn connect(
        &self,
        config: SessionConfig,
    ) -> Result<(Arc<dyn ProtocolSession>, mpsc::Receiver<SessionEvent>), SessionError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        self.configs.lock().unwrap().push(config);

        let script = self.scripts.lock().unwrap().pop_front();
        let script = match script {
            Some(Script::Session(script)) => script,
            Some(Script::Fail(e)) => return Err(e),
            Some(Script::Hang) => return std::future::pending().await,
            None => return Err(SessionError::Transport("script exhausted".into())),
        };

        let (tx, rx) = mpsc::channel(script.events.len().max(1) + 16);
        for event in script.events {
            // Capacity covers the whole script, so this never blocks.
            let _ = tx.try_send(event);
        }
        let keeper = script.keep_open.then(|| tx.clone());
        if script.keep_open {
            self.senders.lock().unwrap().push(tx.clone());
        }
        drop(tx);

        let session = FakeSession {
            log: Arc::clone(&self.log),
            media: script.media,
            pairing_code: script.pairing_code,
            group_subjects: script.group_subjects,
            send_counter: AtomicUsize::new(0),
            _keeper: keeper,
        };
        Ok((Arc::new(session), rx))
    }
}

/// Sink that records every delivered event for assertions.
#[derive(Clone, Default)]
pub struct CapturingSink {
    events: Arc<Mutex<Vec<OutboundEvent>>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<OutboundEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event == kind)
            .cloned()
            .collect()
    }
}

impl EventSink for CapturingSink {
    fn deliver(&self, event: OutboundEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Poll an async condition until it holds, panicking after ~2 seconds.
pub async fn wait_until<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// A manager wired to in-memory collaborators and a scripted factory.
pub struct Harness {
    pub manager: InstanceManager,
    pub store: Arc<MemoryStore>,
    pub credentials: Arc<MemoryCredentialStore>,
    pub sink: CapturingSink,
}

pub fn harness(config: BridgeConfig, factory: Arc<ScriptedFactory>) -> Harness {
    whatsapp_bridge::logging::init();
    let store = Arc::new(MemoryStore::new());
    let credentials = Arc::new(MemoryCredentialStore::new());
    let sink = CapturingSink::new();
    let manager = InstanceManager::new(
        config,
        factory,
        Arc::clone(&store) as Arc<dyn ConversationStore>,
        Arc::clone(&credentials) as Arc<dyn CredentialStore>,
        Arc::new(sink.clone()),
    );
    Harness {
        manager,
        store,
        credentials,
        sink,
    }
}

pub fn envelope(id: &str, chat_jid: &str, ts_ms: i64, content: Content) -> Envelope {
    Envelope {
        key: MessageKey {
            id: id.to_string(),
            chat_jid: chat_jid.to_string(),
            participant: None,
            from_me: false,
        },
        push_name: None,
        timestamp: EnvelopeTimestamp::Unix(ts_ms),
        content: Some(content),
    }
}

pub fn text_envelope(id: &str, chat_jid: &str, ts_ms: i64, body: &str) -> Envelope {
    envelope(id, chat_jid, ts_ms, Content::Text(body.to_string()))
}

/// The standard happy-path opener: connected as the given number.
pub fn opened(phone: &str) -> SessionEvent {
    SessionEvent::Opened {
        phone_number: phone.to_string(),
    }
}
