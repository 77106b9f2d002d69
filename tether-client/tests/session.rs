//! Connect and authentication flows against the scripted server.

mod common;

use std::sync::Arc;

use common::*;
use tether_client::{
    AuthMethod, Authenticator, Challenge, ClientError, ConnectionState, CredentialStore, Event,
    InMemoryStore, JsonFileStore, PairingCodeAuth, QrAuth, ResumeAuth, SessionConnection,
};

fn connection(server: &MockServer) -> SessionConnection {
    SessionConnection::with_transport(config(), server.factory())
}

#[tokio::test(start_paused = true)]
async fn qr_login_end_to_end() {
    let server = MockServer::new();
    let conn = connection(&server);
    let mut events = conn.subscribe();

    conn.connect().await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Connecting);
    assert_eq!(next_event(&mut events).await, Event::Connecting);
    assert_eq!(next_event(&mut events).await, Event::AuthMethodRequired);

    let qr = conn.request_qr_code().await.unwrap();
    assert_eq!(qr, QR);
    assert_eq!(conn.state(), ConnectionState::Authenticating);
    assert_eq!(next_event(&mut events).await, Event::Qr(QR.into()));

    let partial = conn.credentials().unwrap();
    assert_eq!(partial.qr_code.as_deref(), Some(QR));
    assert!(!partial.is_resumable());
    assert_eq!(server.sent_of("request_qr")[0]["data"]["publicKey"], partial.public_key.as_str());

    let waiter = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.wait_for_authentication().await })
    };
    server.approve();
    let creds = waiter.await.unwrap().unwrap();

    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(creds.public_key, partial.public_key);
    assert_eq!(creds.session.as_deref(), Some(SESSION));
    assert_eq!(creds.server_public_key, server_public_key());
    assert!(creds.is_resumable());
    assert_eq!(conn.credentials(), Some(creds.clone()));
    assert!(conn.connected_since().is_some());

    assert_eq!(next_event(&mut events).await, Event::Authenticated(creds));
    assert_eq!(next_event(&mut events).await, Event::Ready);
}

#[tokio::test(start_paused = true)]
async fn auth_success_with_top_level_credentials() {
    let server = MockServer::new();
    let conn = connection(&server);
    conn.connect().await.unwrap();
    conn.request_qr_code().await.unwrap();

    server.push_raw(r#"{"type":"auth_success","credentials":{"session":"abc"}}"#);
    let creds = conn.wait_for_authentication().await.unwrap();

    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(creds.session.as_deref(), Some("abc"));
    assert_eq!(conn.credentials().unwrap().session.as_deref(), Some("abc"));
}

#[tokio::test(start_paused = true)]
async fn pairing_code_login_carries_the_phone_number() {
    let server = MockServer::new();
    let conn = connection(&server);
    let mut events = conn.subscribe();
    conn.connect().await.unwrap();

    let code = conn.request_pairing_code(Some("+15551234567")).await.unwrap();
    assert_eq!(code, PAIRING_CODE);
    let sent = &server.sent_of("request_pairing_code")[0]["data"];
    assert_eq!(sent["phoneNumber"], "+15551234567");
    assert!(sent["publicKey"].is_string());

    server.approve();
    let creds = conn.wait_for_authentication().await.unwrap();
    assert_eq!(creds.pairing_code.as_deref(), Some(PAIRING_CODE));
    assert_eq!(conn.state(), ConnectionState::Connected);

    let names: Vec<_> = drain(&mut events).iter().map(Event::name).collect();
    assert_eq!(
        names,
        ["connecting", "auth_method_required", "pairing_code", "authenticated", "ready"]
    );
}

#[tokio::test(start_paused = true)]
async fn stored_credentials_resume_without_a_challenge() {
    let server = MockServer::new();
    let store = Arc::new(InMemoryStore::with(resumable_credentials()));
    let mut cfg = config();
    cfg.credential_store = store.clone();
    let conn = SessionConnection::with_transport(cfg, server.factory());
    let mut events = conn.subscribe();

    conn.connect().await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Connected);

    assert_eq!(server.sent_kinds(), ["init", "auth"]);
    let init = &server.sent_of("init")[0]["data"];
    assert_eq!(init["resume"], true);
    let auth = &server.sent_of("auth")[0]["data"];
    assert_eq!(auth["session"], SESSION);
    assert_eq!(auth["publicKey"], resumable_credentials().public_key.as_str());
    assert!(auth["signature"].is_string());

    assert_eq!(next_event(&mut events).await, Event::Connecting);
    assert!(matches!(next_event(&mut events).await, Event::Authenticated(_)));
    assert_eq!(next_event(&mut events).await, Event::Ready);
    assert!(drain(&mut events).iter().all(|e| !matches!(e, Event::Qr(_) | Event::AuthMethodRequired)));
}

#[tokio::test(start_paused = true)]
async fn rejected_resume_ends_disconnected() {
    let server = MockServer::new();
    server.set_auth(AuthReply::Reject("logged-out".into()));
    let conn = connection(&server);
    let mut events = conn.subscribe();

    let err = conn.connect_with_credentials(resumable_credentials()).await.unwrap_err();
    assert!(err.is_auth(), "{err:?}");
    assert!(err.to_string().contains("logged-out"));
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(!server.is_connected());

    let names: Vec<_> = drain(&mut events).iter().map(Event::name).collect();
    assert!(names.contains(&"auth_failure"));
    assert!(!names.contains(&"reconnecting"));
}

#[tokio::test(start_paused = true)]
async fn silent_resume_times_out_as_authentication_failure() {
    let server = MockServer::new();
    server.set_auth(AuthReply::Silent);
    let conn = connection(&server);

    let started = tokio::time::Instant::now();
    let err = conn.connect_with_credentials(resumable_credentials()).await.unwrap_err();
    assert!(err.is_auth(), "{err:?}");
    assert!(started.elapsed() >= conn.config().auth_timeout);
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(conn.pending_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn auth_failure_push_rejects_the_waiter_and_allows_another_try() {
    let server = MockServer::new();
    let conn = connection(&server);
    let mut events = conn.subscribe();
    conn.connect().await.unwrap();
    conn.request_qr_code().await.unwrap();

    server.reject("qr-expired");
    let err = conn.wait_for_authentication().await.unwrap_err();
    assert_eq!(err, ClientError::Authentication("qr-expired".into()));
    assert_eq!(conn.state(), ConnectionState::Connecting);
    assert!(drain(&mut events).contains(&Event::AuthFailure("qr-expired".into())));

    // A fresh challenge is allowed.
    assert_eq!(conn.request_qr_code().await.unwrap(), QR);
    assert_eq!(conn.state(), ConnectionState::Authenticating);
}

#[tokio::test(start_paused = true)]
async fn waiting_before_the_challenge_is_issued_is_illegal() {
    let server = MockServer::new();
    let conn = connection(&server);
    conn.connect().await.unwrap();
    server.hold(true);

    let challenge = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.request_qr_code().await })
    };
    while server.held() < 1 {
        tokio::task::yield_now().await;
    }
    assert_eq!(conn.state(), ConnectionState::Connecting);
    assert!(conn.wait_for_authentication().await.unwrap_err().is_illegal_state());

    server.release_reversed();
    assert_eq!(challenge.await.unwrap().unwrap(), QR);
    assert_eq!(conn.state(), ConnectionState::Authenticating);
    server.approve();
    assert!(conn.wait_for_authentication().await.unwrap().is_resumable());
}

#[tokio::test(start_paused = true)]
async fn connection_drop_during_auth_rejects_the_waiter() {
    let server = MockServer::new();
    let conn = connection(&server);
    let mut events = conn.subscribe();
    conn.connect().await.unwrap();
    conn.request_qr_code().await.unwrap();

    let waiter = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.wait_for_authentication().await })
    };
    server.drop_connection(1006, "network");

    let err = waiter.await.unwrap().unwrap_err();
    assert!(err.is_auth(), "{err:?}");
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    // Partial credentials are not resumable, so nothing reconnects.
    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    assert_eq!(server.opens(), 1);
    let names: Vec<_> = drain(&mut events).iter().map(Event::name).collect();
    assert!(names.contains(&"disconnected"));
    assert!(!names.contains(&"reconnecting"));
}

#[tokio::test(start_paused = true)]
async fn explicit_disconnect_during_auth_reports_connection_closed() {
    let server = MockServer::new();
    let conn = connection(&server);
    conn.connect().await.unwrap();
    conn.request_pairing_code(None).await.unwrap();

    let waiter = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.wait_for_authentication().await })
    };
    tokio::task::yield_now().await;
    conn.disconnect().await;

    assert_eq!(waiter.await.unwrap().unwrap_err(), ClientError::ConnectionClosed);
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn lifecycle_guards() {
    let server = MockServer::new();
    let conn = connection(&server);

    // Nothing is legal before connect.
    assert!(conn.request_qr_code().await.unwrap_err().is_illegal_state());
    assert!(conn.wait_for_authentication().await.unwrap_err().is_illegal_state());

    conn.connect().await.unwrap();
    assert!(conn.connect().await.unwrap_err().is_illegal_state());
    assert!(conn.connect_with_credentials(resumable_credentials()).await.unwrap_err().is_illegal_state());
    assert!(conn.wait_for_authentication().await.unwrap_err().is_illegal_state());

    conn.request_qr_code().await.unwrap();
    assert!(conn.request_pairing_code(None).await.unwrap_err().is_illegal_state());

    // Only one waiter gets the outcome.
    let first = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.wait_for_authentication().await })
    };
    tokio::task::yield_now().await;
    assert!(conn.wait_for_authentication().await.unwrap_err().is_illegal_state());

    server.approve();
    first.await.unwrap().unwrap();
    assert!(conn.request_qr_code().await.unwrap_err().is_illegal_state());
    assert_eq!(server.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent() {
    let server = MockServer::new();
    let conn = connection(&server);
    let mut events = conn.subscribe();

    conn.disconnect().await;
    conn.connect_with_credentials(resumable_credentials()).await.unwrap();
    drain(&mut events);

    conn.disconnect().await;
    conn.disconnect().await;
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(
        drain(&mut events),
        [Event::Disconnected { code: 1000, reason: "client disconnect".into() }]
    );
}

#[tokio::test(start_paused = true)]
async fn json_store_persists_across_connections_until_logout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("creds.json");
    let server = MockServer::new();

    let mut cfg = config();
    cfg.credential_store = Arc::new(JsonFileStore::new(&path));
    let first = SessionConnection::with_transport(cfg.clone(), server.factory());
    first.connect().await.unwrap();
    first.request_qr_code().await.unwrap();
    server.approve();
    let creds = first.wait_for_authentication().await.unwrap();
    assert_eq!(JsonFileStore::new(&path).load().unwrap(), Some(creds.clone()));
    first.disconnect().await;

    let second = SessionConnection::with_transport(cfg, server.factory());
    second.connect().await.unwrap();
    assert_eq!(second.state(), ConnectionState::Connected);
    assert_eq!(second.credentials().unwrap().public_key, creds.public_key);
    assert_eq!(server.sent_of("request_qr").len(), 1);

    std::fs::remove_file(&path).unwrap();
    second.save_credentials().unwrap();
    assert!(path.exists());

    second.logout().await.unwrap();
    assert!(!path.exists());
    assert_eq!(second.credentials(), None);
    assert!(second.save_credentials().unwrap_err().is_illegal_state());
    assert_eq!(second.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn strategies_share_one_contract() {
    let server = MockServer::new();
    let conn = connection(&server);
    conn.connect().await.unwrap();

    let mut qr = QrAuth;
    assert_eq!(qr.method(), AuthMethod::Qr);
    assert_eq!(qr.initiate(&conn).await.unwrap(), Challenge::Qr(QR.into()));
    server.approve();
    let creds = qr.await_completion(&conn).await.unwrap();
    conn.disconnect().await;

    let mut resume = ResumeAuth::new(creds.clone());
    let other = connection(&server);
    other.connect().await.unwrap();
    assert_eq!(resume.initiate(&other).await.unwrap(), Challenge::None);
    assert_eq!(resume.await_completion(&other).await.unwrap().session, creds.session);
    assert_eq!(other.state(), ConnectionState::Connected);

    let third = connection(&server);
    third.connect().await.unwrap();
    let mut pairing = PairingCodeAuth::for_phone("+4915112345678");
    let pending = {
        let third = third.clone();
        tokio::spawn(async move { third.authenticate(&mut pairing).await })
    };
    while third.state() != ConnectionState::Authenticating {
        tokio::task::yield_now().await;
    }
    server.approve();
    assert!(pending.await.unwrap().unwrap().pairing_code.is_some());
}
