mod common;

use serde_json::json;
use std::sync::Arc;

use common::{
    Script, ScriptedFactory, SessionScript, fast_config, harness, opened, wait_until,
};
use whatsapp_bridge::config::BridgeConfig;
use whatsapp_bridge::credentials::{CredentialBundle, CredentialStore};
use whatsapp_bridge::error::SessionError;
use whatsapp_bridge::types::events::{ConnectionStatus, DisconnectCause, SessionEvent};
use whatsapp_bridge::webhook::EventKind;

#[tokio::test]
async fn qr_pairing_flow_reaches_connected() {
    let factory = ScriptedFactory::new(vec![Script::Session(SessionScript {
        events: vec![
            SessionEvent::QrCode("2@pairing-challenge".into()),
            opened("5511999887766"),
        ],
        ..SessionScript::default()
    })]);
    let h = harness(fast_config(), Arc::clone(&factory));

    h.manager.connect_instance("inst", None).await;
    wait_until("instance connected", || async {
        h.manager.status("inst").await.connection == ConnectionStatus::Connected
    })
    .await;

    let status = h.manager.status("inst").await;
    assert_eq!(status.phone_number.as_deref(), Some("5511999887766"));
    // Pairing artifacts are cleared once the session opens.
    assert!(status.qr_code.is_none());
    assert_eq!(status.retry_count, 0);

    // The status stream walked through the pairing phase.
    let updates = h.sink.of_kind(EventKind::ConnectionUpdate);
    let phases: Vec<String> = updates
        .iter()
        .filter_map(|e| e.data["status"].as_str().map(str::to_string))
        .collect();
    assert!(phases.contains(&"CONNECTING".to_string()));
    assert!(phases.contains(&"AWAITING_PAIRING".to_string()));
    assert_eq!(phases.last().map(String::as_str), Some("CONNECTED"));

    let qr_update = updates
        .iter()
        .find(|e| e.data["status"] == "AWAITING_PAIRING")
        .unwrap();
    assert_eq!(qr_update.data["qr_code"], "2@pairing-challenge");
}

#[tokio::test]
async fn pairing_code_issued_for_fresh_phone_pairing() {
    let factory = ScriptedFactory::new(vec![Script::Session(SessionScript {
        pairing_code: Some("ABCD-1234".into()),
        ..SessionScript::default()
    })]);
    let h = harness(fast_config(), Arc::clone(&factory));

    h.manager
        .connect_instance("inst", Some("5511999887766".into()))
        .await;
    wait_until("pairing code surfaced", || async {
        h.manager.status("inst").await.pairing_code.is_some()
    })
    .await;

    let status = h.manager.status("inst").await;
    assert_eq!(status.connection, ConnectionStatus::AwaitingPairing);
    assert_eq!(status.pairing_code.as_deref(), Some("ABCD-1234"));
}

#[tokio::test]
async fn stored_credentials_skip_pairing() {
    let factory = ScriptedFactory::new(vec![Script::Session(SessionScript {
        events: vec![opened("5511999887766")],
        pairing_code: Some("SHOULD-NOT-BE-REQUESTED".into()),
        ..SessionScript::default()
    })]);
    let h = harness(fast_config(), Arc::clone(&factory));
    h.credentials
        .seed("inst", CredentialBundle(json!({"registration_id": 7})));

    h.manager
        .connect_instance("inst", Some("5511999887766".into()))
        .await;
    wait_until("instance connected", || async {
        h.manager.status("inst").await.connection == ConnectionStatus::Connected
    })
    .await;

    // The stored bundle was handed to the session library and no pairing
    // code was requested on top of it.
    assert!(h.manager.status("inst").await.pairing_code.is_none());
    let configs = factory.configs.lock().unwrap();
    assert!(configs[0].credentials.is_some());
}

#[tokio::test]
async fn transient_drops_retry_with_bounded_attempts() {
    let factory = ScriptedFactory::new(vec![
        Script::Session(SessionScript {
            events: vec![
                opened("5511999887766"),
                SessionEvent::Closed(DisconnectCause::ConnectionLost),
            ],
            keep_open: false,
            ..SessionScript::default()
        }),
        Script::Fail(SessionError::Transport("refused".into())),
        Script::Fail(SessionError::Transport("refused".into())),
        Script::Fail(SessionError::Transport("refused".into())),
    ]);
    let h = harness(fast_config(), Arc::clone(&factory));

    h.manager.connect_instance("inst", None).await;
    wait_until("instance gave up", || async {
        factory.attempts() == 4
            && h.manager.status("inst").await.connection == ConnectionStatus::Disconnected
    })
    .await;

    // One initial connect plus max_reconnect_attempts retries, no more.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(factory.attempts(), 4);
}

#[tokio::test]
async fn successful_open_resets_the_retry_counter() {
    let factory = ScriptedFactory::new(vec![
        Script::Fail(SessionError::Transport("refused".into())),
        Script::Session(SessionScript {
            events: vec![opened("5511999887766")],
            ..SessionScript::default()
        }),
    ]);
    let h = harness(fast_config(), Arc::clone(&factory));

    h.manager.connect_instance("inst", None).await;
    wait_until("instance connected", || async {
        h.manager.status("inst").await.connection == ConnectionStatus::Connected
    })
    .await;
    assert_eq!(h.manager.status("inst").await.retry_count, 0);
}

#[tokio::test]
async fn connect_timeout_counts_as_transient_failure() {
    let factory = ScriptedFactory::new(vec![
        Script::Hang,
        Script::Session(SessionScript {
            events: vec![opened("5511999887766")],
            ..SessionScript::default()
        }),
    ]);
    let config = BridgeConfig {
        connect_timeout: std::time::Duration::from_millis(50),
        ..fast_config()
    };
    let h = harness(config, Arc::clone(&factory));

    h.manager.connect_instance("inst", None).await;
    wait_until("instance connected after timeout retry", || async {
        h.manager.status("inst").await.connection == ConnectionStatus::Connected
    })
    .await;
    assert_eq!(factory.attempts(), 2);
}

#[tokio::test]
async fn unauthorized_close_wipes_credentials_and_stops_retrying() {
    let factory = ScriptedFactory::new(vec![Script::Session(SessionScript {
        events: vec![SessionEvent::Closed(DisconnectCause::Unauthorized)],
        keep_open: false,
        ..SessionScript::default()
    })]);
    let h = harness(fast_config(), Arc::clone(&factory));
    h.credentials
        .seed("inst", CredentialBundle(json!({"registration_id": 7})));

    h.manager.connect_instance("inst", None).await;
    wait_until("credentials wiped", || async {
        !h.credentials.contains("inst")
            && h.manager.status("inst").await.connection == ConnectionStatus::Disconnected
    })
    .await;

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(factory.attempts(), 1, "invalid sessions are never retried");
}

#[tokio::test]
async fn logged_out_close_wipes_credentials() {
    let factory = ScriptedFactory::new(vec![Script::Session(SessionScript {
        events: vec![
            opened("5511999887766"),
            SessionEvent::Closed(DisconnectCause::LoggedOut),
        ],
        keep_open: false,
        ..SessionScript::default()
    })]);
    let h = harness(fast_config(), Arc::clone(&factory));
    h.credentials
        .seed("inst", CredentialBundle(json!({"registration_id": 7})));

    h.manager.connect_instance("inst", None).await;
    wait_until("credentials wiped", || async { !h.credentials.contains("inst") }).await;
    assert_eq!(factory.attempts(), 1);
}

#[tokio::test]
async fn credential_updates_are_persisted_as_they_arrive() {
    let bundle = CredentialBundle(json!({"noise_key": "rotated"}));
    let factory = ScriptedFactory::new(vec![Script::Session(SessionScript {
        events: vec![
            opened("5511999887766"),
            SessionEvent::CredentialsUpdated(bundle.clone()),
        ],
        ..SessionScript::default()
    })]);
    let h = harness(fast_config(), Arc::clone(&factory));

    h.manager.connect_instance("inst", None).await;
    wait_until("credentials persisted", || async { h.credentials.contains("inst") }).await;

    let stored = h.credentials.load("inst").await.unwrap();
    assert_eq!(stored, Some(bundle));
}

#[tokio::test]
async fn event_channel_drop_is_treated_as_connection_loss() {
    let factory = ScriptedFactory::new(vec![
        Script::Session(SessionScript {
            events: vec![opened("5511999887766")],
            keep_open: false,
            ..SessionScript::default()
        }),
        Script::Session(SessionScript {
            events: vec![opened("5511999887766")],
            ..SessionScript::default()
        }),
    ]);
    let h = harness(fast_config(), Arc::clone(&factory));

    h.manager.connect_instance("inst", None).await;
    wait_until("reconnected after channel drop", || async {
        factory.attempts() == 2
            && h.manager.status("inst").await.connection == ConnectionStatus::Connected
    })
    .await;
}
