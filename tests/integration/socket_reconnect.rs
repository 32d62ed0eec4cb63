// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::redundant_pub_crate,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for automatic reconnection of the WebSocket strategy.
//!
//! These tests validate:
//! - an unexpected server close publishes `close` then `closed`, and a
//!   timer-driven retry reopens the socket
//! - the attempt counter resets once a retry succeeds
//! - an explicit disconnect suppresses retries
//! - a bounded retry policy gives up and stays `closed`
//! - sends deferred on a failed attempt are dropped, not replayed later
//!
//! Backoff delays are shrunk to a few milliseconds so the suite stays fast.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use recipechat::client::ChatClient;
use recipechat::events::Subscription;
use recipechat::status::ConnectionStatus;
use recipechat::transport::backoff::ReconnectConfig;
use recipechat::transport::socket::{SocketOptions, SocketTransport};
use recipechat::transport::CloseInfo;
use recipechat_devserver::server::{self, DevState, SCRIPT_CLOSE};
use recipechat_proto::message::Metadata;
use url::Url;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn start_dev_server() -> (String, Arc<DevState>) {
    let state = Arc::new(DevState::new());
    let (addr, _handle) = server::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start dev server");
    (format!("ws://{addr}/ws"), state)
}

fn fast_options() -> SocketOptions {
    SocketOptions {
        connect_timeout: Duration::from_secs(2),
        close_timeout: Duration::from_millis(200),
        reconnect: ReconnectConfig::default()
            .initial_delay(Duration::from_millis(20))
            .max_delay(Duration::from_millis(80)),
    }
}

fn socket_client(url: &str, options: SocketOptions) -> ChatClient<SocketTransport> {
    let transport = SocketTransport::new(Url::parse(url).unwrap(), options).unwrap();
    ChatClient::new(transport)
}

/// Unused ports on the loopback interface refuse connections immediately.
async fn refused_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}/ws")
}

fn record_statuses(client: &ChatClient<SocketTransport>) -> (Arc<Mutex<Vec<ConnectionStatus>>>, Subscription) {
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sub = {
        let statuses = Arc::clone(&statuses);
        client.on_status(move |s| statuses.lock().push(*s))
    };
    (statuses, sub)
}

async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_close_triggers_reconnect() {
    let (url, state) = start_dev_server().await;
    let client = socket_client(&url, fast_options());
    let (statuses, _status_sub) = record_statuses(&client);

    let closes = Arc::new(Mutex::new(Vec::<(CloseInfo, ConnectionStatus)>::new()));
    let _close_sub = {
        let closes = Arc::clone(&closes);
        let statuses = Arc::clone(&statuses);
        client.on_close(move |info| {
            let last = statuses.lock().last().copied().unwrap_or_default();
            closes.lock().push((info.clone(), last));
        })
    };

    client.connect();
    assert!(wait_until(WAIT, || client.status() == ConnectionStatus::Open).await);

    client.send_user_message(SCRIPT_CLOSE, Metadata::new()).await;
    assert!(wait_until(WAIT, || !closes.lock().is_empty()).await);
    assert!(wait_until(WAIT, || state.accepted_connections() == 2).await);
    assert!(wait_until(WAIT, || client.status() == ConnectionStatus::Open).await);

    let (info, status_at_close) = closes.lock()[0].clone();
    assert!(!info.initiated_locally);
    assert_eq!(info.code, Some(1000));
    // The close event precedes the `closed` status.
    assert_eq!(status_at_close, ConnectionStatus::Open);

    let seen = statuses.lock().clone();
    assert_eq!(
        seen,
        vec![
            ConnectionStatus::Connecting,
            ConnectionStatus::Open,
            ConnectionStatus::Closed,
            ConnectionStatus::Connecting,
            ConnectionStatus::Open,
        ]
    );
    assert_eq!(client.transport().reconnect_attempts(), 0);

    client.disconnect();
}

#[tokio::test]
async fn close_all_connections_is_survived() {
    let (url, state) = start_dev_server().await;
    let client = socket_client(&url, fast_options());

    client.connect();
    assert!(wait_until(WAIT, || client.status() == ConnectionStatus::Open).await);

    for round in 2..=3 {
        state.close_all_connections().await;
        assert!(
            wait_until(WAIT, || state.accepted_connections() == round).await,
            "round {round} never reconnected"
        );
        assert!(wait_until(WAIT, || client.status() == ConnectionStatus::Open).await);
    }
    assert_eq!(client.transport().live_channels(), 1);

    client.disconnect();
}

#[tokio::test]
async fn disconnect_suppresses_reconnect() {
    let (url, state) = start_dev_server().await;
    let client = socket_client(&url, fast_options());
    let (statuses, _sub) = record_statuses(&client);

    let locals = Arc::new(Mutex::new(Vec::new()));
    let _close_sub = {
        let locals = Arc::clone(&locals);
        client.on_close(move |info| locals.lock().push(info.initiated_locally))
    };

    client.connect();
    assert!(wait_until(WAIT, || client.status() == ConnectionStatus::Open).await);
    client.disconnect();
    assert_eq!(client.status(), ConnectionStatus::Closed);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.status(), ConnectionStatus::Closed);
    assert!(!client.transport().reconnect_pending());
    assert_eq!(state.accepted_connections(), 1);
    assert_eq!(*locals.lock(), vec![true]);
    assert_eq!(
        *statuses.lock(),
        vec![
            ConnectionStatus::Connecting,
            ConnectionStatus::Open,
            ConnectionStatus::Closing,
            ConnectionStatus::Closed,
        ]
    );
}

#[tokio::test]
async fn disconnect_cancels_pending_retry() {
    let url = refused_url().await;
    let options = SocketOptions {
        reconnect: ReconnectConfig::default()
            .initial_delay(Duration::from_millis(200))
            .max_delay(Duration::from_millis(200)),
        ..fast_options()
    };
    let client = socket_client(&url, options);

    client.connect();
    assert!(wait_until(WAIT, || client.transport().reconnect_pending()).await);
    client.disconnect();
    assert!(!client.transport().reconnect_pending());

    let attempts = client.transport().reconnect_attempts();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(client.transport().reconnect_attempts(), attempts);
    assert_eq!(client.status(), ConnectionStatus::Closed);
}

#[tokio::test]
async fn bounded_policy_gives_up() {
    let url = refused_url().await;
    let options = SocketOptions {
        reconnect: ReconnectConfig::default()
            .initial_delay(Duration::from_millis(5))
            .max_delay(Duration::from_millis(10))
            .max_attempts(2),
        ..fast_options()
    };
    let client = socket_client(&url, options);

    let errors = Arc::new(Mutex::new(0usize));
    let _sub = {
        let errors = Arc::clone(&errors);
        client.on_error(move |_| *errors.lock() += 1)
    };

    client.connect();
    // One initial attempt plus two retries.
    assert!(wait_until(WAIT, || *errors.lock() == 3).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(*errors.lock(), 3);
    assert_eq!(client.transport().reconnect_attempts(), 2);
    assert!(!client.transport().reconnect_pending());
    assert_eq!(client.status(), ConnectionStatus::Closed);

    // An explicit connect is always honored.
    client.connect();
    assert!(wait_until(WAIT, || *errors.lock() == 4).await);
    client.disconnect();
}

#[tokio::test]
async fn send_deferred_on_failed_attempt_is_not_replayed() {
    // Nobody listens yet: the first attempt is refused.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let options = SocketOptions {
        reconnect: ReconnectConfig::default()
            .initial_delay(Duration::from_millis(150))
            .max_delay(Duration::from_millis(150)),
        ..fast_options()
    };
    let client = socket_client(&format!("ws://{addr}/ws"), options);
    let (statuses, _sub) = record_statuses(&client);

    client.send_user_message("lost in transit", Metadata::new()).await;
    client.send_raw(r#"{"type":"user_message","text":"also lost"}"#);
    assert!(wait_until(WAIT, || statuses.lock().contains(&ConnectionStatus::Error)).await);
    assert!(wait_until(WAIT, || client.status() == ConnectionStatus::Closed).await);

    // The server comes up on the same port before the retry fires.
    let state = Arc::new(DevState::new());
    server::start_server_with_state(&addr.to_string(), Arc::clone(&state))
        .await
        .expect("failed to start dev server on the refused port");

    assert!(wait_until(WAIT, || client.status() == ConnectionStatus::Open).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(state.received().await.is_empty());

    // The reopened channel itself carries new sends.
    client.send_user_message("fresh", Metadata::new()).await;
    let mut delivered = Vec::new();
    for _ in 0..200 {
        delivered = state.received().await;
        if !delivered.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let texts: Vec<_> = delivered.iter().map(|p| p.text.as_str()).collect();
    assert_eq!(texts, vec!["fresh"]);

    client.disconnect();
}
