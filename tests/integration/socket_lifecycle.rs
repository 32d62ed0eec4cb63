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

//! Integration tests for the WebSocket strategy against the dev server.
//!
//! These tests validate:
//! - connect drives `connecting -> open` and fires `open` once
//! - streamed replies fold into a single transcript entry
//! - prompts sent before the socket opens are delivered once it does
//! - blank prompts never reach the wire
//! - the `token` query parameter is honored and rejected tokens surface as
//!   an error followed by `closed`
//! - disconnect followed by connect never holds two live sockets

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use recipechat::client::ChatClient;
use recipechat::events::Subscription;
use recipechat::status::ConnectionStatus;
use recipechat::transcript::{Role, Transcript};
use recipechat::transport::socket::{SocketOptions, SocketTransport};
use recipechat::transport::TransportError;
use recipechat_devserver::server::{self, DevState, ReplyMode};
use recipechat_proto::message::{ChatMessage, Metadata};
use url::Url;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn start_dev_server(state: DevState) -> (String, Arc<DevState>) {
    let state = Arc::new(state);
    let (addr, _handle) = server::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start dev server");
    (format!("ws://{addr}/ws"), state)
}

fn socket_client(url: &str) -> ChatClient<SocketTransport> {
    let transport = SocketTransport::new(Url::parse(url).unwrap(), SocketOptions::default())
        .expect("ws url accepted");
    ChatClient::new(transport)
}

/// Records everything the client publishes.
#[derive(Default)]
struct Recorder {
    statuses: Mutex<Vec<ConnectionStatus>>,
    messages: Mutex<Vec<ChatMessage>>,
    errors: Mutex<Vec<TransportError>>,
    opens: Mutex<usize>,
    closes: Mutex<usize>,
}

impl Recorder {
    fn attach(client: &ChatClient<SocketTransport>) -> (Arc<Self>, Vec<Subscription>) {
        let rec = Arc::new(Self::default());
        let subs = vec![
            {
                let rec = Arc::clone(&rec);
                client.on_status(move |s| rec.statuses.lock().push(*s))
            },
            {
                let rec = Arc::clone(&rec);
                client.on_message(move |m| rec.messages.lock().push(m.clone()))
            },
            {
                let rec = Arc::clone(&rec);
                client.on_error(move |e| rec.errors.lock().push(e.clone()))
            },
            {
                let rec = Arc::clone(&rec);
                client.on_open(move || *rec.opens.lock() += 1)
            },
            {
                let rec = Arc::clone(&rec);
                client.on_close(move |_| *rec.closes.lock() += 1)
            },
        ];
        (rec, subs)
    }

    fn saw_done(&self) -> bool {
        self.messages
            .lock()
            .iter()
            .any(|m| matches!(m, ChatMessage::AssistantDone))
    }
}

/// Polls `condition` every 10ms until it holds or `timeout` elapses.
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
async fn connect_opens_and_streams_reply_into_one_entry() {
    let (url, _state) = start_dev_server(DevState::new()).await;
    let client = socket_client(&url);
    let (rec, _subs) = Recorder::attach(&client);

    client.connect();
    assert!(wait_until(WAIT, || client.status() == ConnectionStatus::Open).await);
    assert_eq!(
        *rec.statuses.lock(),
        vec![ConnectionStatus::Connecting, ConnectionStatus::Open]
    );
    assert_eq!(*rec.opens.lock(), 1);

    client
        .send_user_message("  Plan a vegan week  ", Metadata::new())
        .await;
    assert!(wait_until(WAIT, || rec.saw_done()).await, "stream never finished");

    let mut transcript = Transcript::new();
    for message in rec.messages.lock().iter() {
        transcript.apply(message);
    }
    assert_eq!(transcript.len(), 1);
    let entry = &transcript.entries()[0];
    assert_eq!(entry.role, Role::Assistant);
    assert_eq!(entry.text, "You asked: Plan a vegan week");
    assert!(transcript.active_stream().is_none());
    assert!(rec.errors.lock().is_empty());

    client.disconnect();
}

#[tokio::test]
async fn whole_reply_mode_delivers_single_assistant_message() {
    let (url, _state) = start_dev_server(DevState::with_config(None, ReplyMode::Whole)).await;
    let client = socket_client(&url);
    let (rec, _subs) = Recorder::attach(&client);

    client.connect();
    assert!(wait_until(WAIT, || client.status() == ConnectionStatus::Open).await);
    client.send_user_message("soup?", Metadata::new()).await;

    assert!(wait_until(WAIT, || !rec.messages.lock().is_empty()).await);
    assert_eq!(
        rec.messages.lock()[0],
        ChatMessage::assistant("You asked: soup?")
    );

    client.disconnect();
}

#[tokio::test]
async fn send_before_open_is_delivered_after_open() {
    let (url, state) = start_dev_server(DevState::new()).await;
    let client = socket_client(&url);
    let (rec, _subs) = Recorder::attach(&client);

    // Not connected yet: the send starts the connection and waits for it.
    let mut metadata = Metadata::new();
    metadata.insert("ts".to_string(), serde_json::json!(1_700_000_000_000_u64));
    client.send_user_message("early bird", metadata).await;

    assert!(wait_until(WAIT, || rec.saw_done()).await);
    let received = state.received().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].text, "early bird");
    assert_eq!(
        received[0].metadata.get("ts"),
        Some(&serde_json::json!(1_700_000_000_000_u64))
    );

    client.disconnect();
}

#[tokio::test]
async fn blank_prompts_are_not_sent() {
    let (url, state) = start_dev_server(DevState::new()).await;
    let client = socket_client(&url);

    client.connect();
    assert!(wait_until(WAIT, || client.status() == ConnectionStatus::Open).await);
    client.send_user_message("", Metadata::new()).await;
    client.send_user_message("   \n\t", Metadata::new()).await;
    client.send_user_message("real one", Metadata::new()).await;

    let mut delivered = false;
    for _ in 0..200 {
        if !state.received().await.is_empty() {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(delivered);
    let received = state.received().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].text, "real one");

    client.disconnect();
}

#[tokio::test]
async fn token_in_query_is_accepted() {
    let (url, state) =
        start_dev_server(DevState::with_config(Some("s3cret".to_string()), ReplyMode::Stream)).await;
    let mut url = Url::parse(&url).unwrap();
    url.query_pairs_mut().append_pair("token", "s3cret");
    let client = socket_client(url.as_str());

    client.connect();
    assert!(wait_until(WAIT, || client.status() == ConnectionStatus::Open).await);
    assert_eq!(state.accepted_connections(), 1);

    client.disconnect();
}

#[tokio::test]
async fn rejected_token_reports_error_then_closed() {
    let (url, state) =
        start_dev_server(DevState::with_config(Some("s3cret".to_string()), ReplyMode::Stream)).await;
    let client = socket_client(&format!("{url}?token=wrong"));
    let (rec, _subs) = Recorder::attach(&client);

    client.connect();
    assert!(wait_until(WAIT, || !rec.errors.lock().is_empty()).await);
    assert!(wait_until(WAIT, || rec.statuses.lock().contains(&ConnectionStatus::Closed)).await);

    let statuses = rec.statuses.lock().clone();
    assert_eq!(
        &statuses[..3],
        &[
            ConnectionStatus::Connecting,
            ConnectionStatus::Error,
            ConnectionStatus::Closed
        ]
    );
    assert_eq!(*rec.opens.lock(), 0);
    assert_eq!(state.accepted_connections(), 0);

    client.disconnect();
    assert_eq!(client.status(), ConnectionStatus::Closed);
}

#[tokio::test]
async fn reconnect_after_disconnect_never_overlaps_sockets() {
    let (url, state) = start_dev_server(DevState::new()).await;
    let client = Arc::new(socket_client(&url));

    // Sampled from inside the open callback, after the new socket has been
    // counted.
    let samples = Arc::new(Mutex::new(Vec::new()));
    let _sub = {
        let samples = Arc::clone(&samples);
        let weak = Arc::downgrade(&client);
        client.on_open(move || {
            if let Some(client) = weak.upgrade() {
                samples.lock().push(client.transport().live_channels());
            }
        })
    };

    client.connect();
    assert!(wait_until(WAIT, || client.status() == ConnectionStatus::Open).await);
    for _ in 0..3 {
        client.disconnect();
        client.connect();
        assert!(wait_until(WAIT, || client.status() == ConnectionStatus::Open).await);
    }

    let samples = samples.lock().clone();
    assert_eq!(samples, vec![1, 1, 1, 1]);

    client.disconnect();
    let mut drained = false;
    for _ in 0..200 {
        if state.open_connections().await == 0 {
            drained = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(drained, "server still holds sockets after disconnect");
    assert_eq!(state.accepted_connections(), 4);
}

#[tokio::test]
async fn scripted_error_and_plain_text_are_normalized() {
    let (url, _state) = start_dev_server(DevState::new()).await;
    let client = socket_client(&url);
    let (rec, _subs) = Recorder::attach(&client);

    client.connect();
    assert!(wait_until(WAIT, || client.status() == ConnectionStatus::Open).await);

    client.send_user_message("!error", Metadata::new()).await;
    assert!(wait_until(WAIT, || !rec.messages.lock().is_empty()).await);
    assert_eq!(rec.messages.lock()[0], ChatMessage::error("Scripted failure"));

    client.send_user_message("!plain", Metadata::new()).await;
    assert!(wait_until(WAIT, || rec.messages.lock().len() >= 2).await);
    assert_eq!(
        rec.messages.lock()[1],
        ChatMessage::assistant("You asked: !plain")
    );

    // Server-side error envelopes are chat entries, not transport errors.
    assert!(rec.errors.lock().is_empty());
    assert_eq!(client.status(), ConnectionStatus::Open);

    client.disconnect();
}
