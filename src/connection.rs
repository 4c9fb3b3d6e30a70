use log::{debug, info, warn};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, RwLock};
use tokio::time::timeout;

use crate::config::BridgeConfig;
use crate::credentials::CredentialStore;
use crate::error::SessionError;
use crate::history::HistorySynchronizer;
use crate::pipeline::MessagePipeline;
use crate::session::{ProtocolSession, SessionConfig, SessionFactory};
use crate::types::events::{
    ConnectionStatus, DisconnectCause, InstanceStatus, SessionEvent, SyncProgress,
};
use crate::webhook::{EventKind, EventSink, OutboundEvent};

/// State shared between an instance's event loop task and the manager
/// serving status/send requests concurrently.
pub(crate) struct InstanceShared {
    pub(crate) instance_id: String,
    pub(crate) status: RwLock<InstanceStatus>,
    pub(crate) progress: Arc<RwLock<SyncProgress>>,
    /// Present only while a socket is open.
    pub(crate) session: RwLock<Option<Arc<dyn ProtocolSession>>>,
    pub(crate) shutdown: Notify,
    pub(crate) shutting_down: AtomicBool,
}

impl InstanceShared {
    pub(crate) fn new(instance_id: String) -> Self {
        Self {
            instance_id,
            status: RwLock::new(InstanceStatus::default()),
            progress: Arc::new(RwLock::new(SyncProgress::default())),
            session: RwLock::new(None),
            shutdown: Notify::new(),
            shutting_down: AtomicBool::new(false),
        }
    }
}

enum LoopExit {
    Shutdown,
    Closed(DisconnectCause),
}

/// Drives one instance: connect, consume the ordered event stream, and
/// reconnect with a bounded fixed-delay retry policy when the socket drops.
/// All message processing for the instance happens on this task, so live
/// traffic and history replay can never interleave.
pub(crate) struct InstanceConnection {
    shared: Arc<InstanceShared>,
    config: BridgeConfig,
    factory: Arc<dyn SessionFactory>,
    credentials: Arc<dyn CredentialStore>,
    sink: Arc<dyn EventSink>,
    pipeline: Arc<MessagePipeline>,
    history: HistorySynchronizer,
    pairing_phone: Option<String>,
}

impl InstanceConnection {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        shared: Arc<InstanceShared>,
        config: BridgeConfig,
        factory: Arc<dyn SessionFactory>,
        credentials: Arc<dyn CredentialStore>,
        sink: Arc<dyn EventSink>,
        pipeline: Arc<MessagePipeline>,
        history: HistorySynchronizer,
        pairing_phone: Option<String>,
    ) -> Self {
        Self {
            shared,
            config,
            factory,
            credentials,
            sink,
            pipeline,
            history,
            pairing_phone,
        }
    }

    pub(crate) async fn run(self) {
        loop {
            let exit = self.connect_and_drive().await;
            self.shared.session.write().await.take();

            match exit {
                LoopExit::Shutdown => {
                    debug!("[{}] event loop shut down", self.shared.instance_id);
                    self.go_disconnected().await;
                    return;
                }
                LoopExit::Closed(cause) => {
                    // A teardown may race the close; never reconnect once
                    // the manager has let go of this instance.
                    if self.shared.shutting_down.load(Ordering::SeqCst) {
                        self.go_disconnected().await;
                        return;
                    }
                    if cause.wipes_credentials() {
                        warn!(
                            "[{}] session invalidated ({cause:?}); wiping credentials",
                            self.shared.instance_id
                        );
                        if let Err(e) = self.credentials.delete(&self.shared.instance_id).await {
                            warn!(
                                "[{}] failed to delete credentials: {e}",
                                self.shared.instance_id
                            );
                        }
                        self.go_disconnected().await;
                        return;
                    }
                    if !cause.is_retryable() {
                        info!(
                            "[{}] connection closed ({cause:?}); not retrying",
                            self.shared.instance_id
                        );
                        self.go_disconnected().await;
                        return;
                    }

                    let retry = {
                        let mut status = self.shared.status.write().await;
                        status.retry_count += 1;
                        status.retry_count
                    };
                    if retry > self.config.max_reconnect_attempts {
                        warn!(
                            "[{}] giving up after {} reconnect attempts",
                            self.shared.instance_id, self.config.max_reconnect_attempts
                        );
                        self.go_disconnected().await;
                        return;
                    }

                    info!(
                        "[{}] reconnecting in {:?} (attempt {retry}/{})",
                        self.shared.instance_id,
                        self.config.reconnect_delay,
                        self.config.max_reconnect_attempts
                    );
                    tokio::select! {
                        _ = self.shared.shutdown.notified() => {
                            self.go_disconnected().await;
                            return;
                        }
                        _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                    }
                }
            }
        }
    }

    async fn connect_and_drive(&self) -> LoopExit {
        {
            let mut status = self.shared.status.write().await;
            status.connection = ConnectionStatus::Connecting;
            status.qr_code = None;
            status.pairing_code = None;
        }
        self.publish_status().await;

        let credentials = match self.credentials.load(&self.shared.instance_id).await {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(
                    "[{}] failed to load credentials, starting fresh: {e}",
                    self.shared.instance_id
                );
                None
            }
        };
        let fresh = credentials.is_none();

        let session_config = SessionConfig {
            instance_id: self.shared.instance_id.clone(),
            credentials,
            pairing_phone: self.pairing_phone.clone(),
        };

        let connect = timeout(
            self.config.connect_timeout,
            self.factory.connect(session_config),
        );
        let result = tokio::select! {
            _ = self.shared.shutdown.notified() => return LoopExit::Shutdown,
            result = connect => result,
        };
        let (session, mut events) = match result {
            Ok(Ok(pair)) => pair,
            Ok(Err(SessionError::Unauthorized)) => {
                return LoopExit::Closed(DisconnectCause::Unauthorized);
            }
            Ok(Err(e)) => {
                warn!("[{}] connect failed: {e}", self.shared.instance_id);
                return LoopExit::Closed(DisconnectCause::ConnectionLost);
            }
            Err(_) => {
                warn!(
                    "[{}] connect timed out after {:?}",
                    self.shared.instance_id, self.config.connect_timeout
                );
                return LoopExit::Closed(DisconnectCause::TimedOut);
            }
        };

        *self.shared.session.write().await = Some(Arc::clone(&session));

        // Phone-number pairing only applies when there is no stored
        // session to resume.
        if fresh {
            if let Some(phone) = self.pairing_phone.clone() {
                self.request_pairing_code(session.as_ref(), &phone).await;
            }
        }

        loop {
            tokio::select! {
                _ = self.shared.shutdown.notified() => {
                    session.close().await;
                    return LoopExit::Shutdown;
                }
                event = events.recv() => match event {
                    // Channel dropped without a Closed event; treat it as a
                    // transient loss so the retry policy applies.
                    None => return LoopExit::Closed(DisconnectCause::ConnectionLost),
                    Some(event) => {
                        if let Some(exit) = self.handle_event(session.as_ref(), event).await {
                            return exit;
                        }
                    }
                },
            }
        }
    }

    async fn handle_event(
        &self,
        session: &dyn ProtocolSession,
        event: SessionEvent,
    ) -> Option<LoopExit> {
        match event {
            SessionEvent::QrCode(qr) => {
                info!("[{}] pairing challenge received", self.shared.instance_id);
                let mut status = self.shared.status.write().await;
                status.connection = ConnectionStatus::AwaitingPairing;
                status.qr_code = Some(qr);
                drop(status);
                self.publish_status().await;
            }
            SessionEvent::PairingCode(code) => {
                let mut status = self.shared.status.write().await;
                status.connection = ConnectionStatus::AwaitingPairing;
                status.pairing_code = Some(code);
                drop(status);
                self.publish_status().await;
            }
            SessionEvent::Opened { phone_number } => {
                info!(
                    "[{}] connected as {phone_number}",
                    self.shared.instance_id
                );
                let mut status = self.shared.status.write().await;
                status.connection = ConnectionStatus::Connected;
                status.phone_number = Some(phone_number);
                status.qr_code = None;
                status.pairing_code = None;
                status.retry_count = 0;
                drop(status);
                self.publish_status().await;
            }
            SessionEvent::CredentialsUpdated(bundle) => {
                if let Err(e) = self
                    .credentials
                    .save(&self.shared.instance_id, &bundle)
                    .await
                {
                    warn!(
                        "[{}] failed to persist credentials: {e}",
                        self.shared.instance_id
                    );
                }
            }
            SessionEvent::LiveMessages(envelopes) => {
                for envelope in &envelopes {
                    self.pipeline.process_live(session, envelope).await;
                }
            }
            SessionEvent::History(snapshot) => {
                self.history.run(session, snapshot).await;
            }
            SessionEvent::ContactsUpdated(contacts) => {
                self.history.save_contacts(&contacts).await;
            }
            SessionEvent::ChatsUpdated(chats) => {
                self.history.apply_chats(session, &chats).await;
            }
            SessionEvent::Closed(cause) => return Some(LoopExit::Closed(cause)),
        }
        None
    }

    async fn request_pairing_code(&self, session: &dyn ProtocolSession, phone: &str) {
        match session.request_pairing_code(phone).await {
            Ok(code) => {
                info!("[{}] pairing code issued", self.shared.instance_id);
                let mut status = self.shared.status.write().await;
                status.connection = ConnectionStatus::AwaitingPairing;
                status.pairing_code = Some(code);
                drop(status);
                self.publish_status().await;
            }
            Err(e) => warn!(
                "[{}] pairing code request failed: {e}",
                self.shared.instance_id
            ),
        }
    }

    async fn go_disconnected(&self) {
        {
            let mut status = self.shared.status.write().await;
            status.connection = ConnectionStatus::Disconnected;
            status.qr_code = None;
            status.pairing_code = None;
        }
        self.publish_status().await;
    }

    async fn publish_status(&self) {
        let status = self.shared.status.read().await.clone();
        self.sink.deliver(OutboundEvent::new(
            &self.shared.instance_id,
            EventKind::ConnectionUpdate,
            json!({
                "status": status.connection,
                "qr_code": status.qr_code,
                "pairing_code": status.pairing_code,
                "phone_number": status.phone_number,
            }),
        ));
    }
}
