//! Dev server core: shared state, WebSocket handler, scripted replies and the
//! AI proxy endpoint.
//!
//! Every user prompt is answered with `You asked: <prompt>`. Three prompts
//! are scripted to exercise failure paths:
//! - `!error` answers with an `error` envelope
//! - `!plain` answers with a bare, non-JSON text frame
//! - `!close` closes the socket from the server side

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use axum::Json;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{RwLock, mpsc};

use recipechat_proto::envelope::{InboundEnvelope, decode_user_message, encode_inbound};
use recipechat_proto::message::Metadata;
use recipechat_proto::proxy::ProxyRequest;

/// Result error type of the server entry points.
pub type ServerError = Box<dyn std::error::Error + Send + Sync>;

/// Path of the chat socket.
pub const WS_PATH: &str = "/ws";

/// Path of the AI proxy endpoint.
pub const PROXY_PATH: &str = "/api/ai/perplexity";

/// Prompt answered with an `error` envelope.
pub const SCRIPT_ERROR: &str = "!error";

/// Prompt answered with a bare text frame.
pub const SCRIPT_PLAIN: &str = "!plain";

/// Prompt that makes the server close the socket.
pub const SCRIPT_CLOSE: &str = "!close";

/// How socket replies are framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyMode {
    /// Word-sized `assistant_delta` frames followed by `assistant_done`.
    #[default]
    Stream,
    /// One `assistant_message` frame.
    Whole,
}

/// A prompt the server received, over either endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPrompt {
    /// Prompt text.
    pub text: String,
    /// Envelope metadata (socket) or the remaining request fields (proxy).
    pub metadata: Metadata,
}

/// Shared dev server state.
pub struct DevState {
    /// Token clients must present, if any.
    token: Option<String>,
    reply_mode: ReplyMode,
    /// Writer channels of the open sockets, keyed by connection id.
    connections: RwLock<HashMap<u64, mpsc::UnboundedSender<Message>>>,
    next_id: AtomicU64,
    accepted: AtomicUsize,
    received: RwLock<Vec<ReceivedPrompt>>,
}

impl Default for DevState {
    fn default() -> Self {
        Self::new()
    }
}

impl DevState {
    /// Creates an open (token-less) server state streaming its replies.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(None, ReplyMode::default())
    }

    /// Creates a state with an optional token requirement and reply mode.
    #[must_use]
    pub fn with_config(token: Option<String>, reply_mode: ReplyMode) -> Self {
        Self {
            token,
            reply_mode,
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            accepted: AtomicUsize::new(0),
            received: RwLock::new(Vec::new()),
        }
    }

    fn authorized(&self, presented: Option<&str>) -> bool {
        self.token.as_deref().is_none_or(|t| presented == Some(t))
    }

    /// Number of sockets currently open.
    pub async fn open_connections(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Number of sockets accepted since start.
    #[must_use]
    pub fn accepted_connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Prompts received so far, in arrival order.
    pub async fn received(&self) -> Vec<ReceivedPrompt> {
        self.received.read().await.clone()
    }

    /// Send a close frame to every open socket.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (id, sender) in conns.iter() {
            tracing::info!(conn = id, "sending close frame");
            let _ = sender.send(close_message("server shutdown"));
        }
    }

    async fn record(&self, text: String, metadata: Metadata) {
        self.received
            .write()
            .await
            .push(ReceivedPrompt { text, metadata });
    }
}

/// The scripted reply text for `prompt`.
#[must_use]
pub fn scripted_reply(prompt: &str) -> String {
    format!("You asked: {prompt}")
}

/// Splits `reply` into word-sized chunks that concatenate back to it.
#[must_use]
pub fn word_chunks(reply: &str) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    for (i, word) in reply.split(' ').enumerate() {
        if i == 0 {
            chunks.push(word.to_string());
        } else {
            chunks.push(format!(" {word}"));
        }
    }
    chunks.retain(|c| !c.is_empty());
    chunks
}

fn close_message(reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code: axum::extract::ws::close_code::NORMAL,
        reason: reason.to_string().into(),
    }))
}

fn envelope_message(envelope: &InboundEnvelope) -> Option<Message> {
    match encode_inbound(envelope) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode envelope");
            None
        }
    }
}

/// Frames to send in answer to one prompt. `None` means close the socket.
fn reply_frames(prompt: &str, mode: ReplyMode) -> Option<Vec<Message>> {
    let envelopes = match prompt {
        SCRIPT_CLOSE => return None,
        SCRIPT_PLAIN => return Some(vec![Message::Text(scripted_reply(prompt).into())]),
        SCRIPT_ERROR => vec![InboundEnvelope::Error {
            message: Some("Scripted failure".to_string()),
        }],
        _ => {
            let reply = scripted_reply(prompt);
            match mode {
                ReplyMode::Whole => vec![InboundEnvelope::AssistantMessage { text: reply }],
                ReplyMode::Stream => word_chunks(&reply)
                    .into_iter()
                    .map(|text| InboundEnvelope::AssistantDelta { text })
                    .chain(std::iter::once(InboundEnvelope::AssistantDone))
                    .collect(),
            }
        }
    };
    Some(envelopes.iter().filter_map(envelope_message).collect())
}

/// Handles an upgraded WebSocket connection.
///
/// Replies are queued on a channel drained by a writer task, which is also
/// how [`DevState::close_all_connections`] reaches the socket.
pub async fn handle_socket(socket: WebSocket, state: Arc<DevState>) {
    let conn = state.next_id.fetch_add(1, Ordering::SeqCst);
    state.accepted.fetch_add(1, Ordering::SeqCst);
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.connections.write().await.insert(conn, tx.clone());
    tracing::info!(conn, "client connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if !handle_text(conn, text.as_str(), &reader_state, &tx).await {
                        break;
                    }
                }
                Message::Close(_) => {
                    tracing::info!(conn, "received close frame");
                    // Completes the close handshake.
                    let _ = tx.send(Message::Close(None));
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => {
            // Give queued replies (and a scripted close) a moment to flush.
            let _ = tokio::time::timeout(std::time::Duration::from_millis(200), &mut write_task).await;
            write_task.abort();
        }
    }

    state.connections.write().await.remove(&conn);
    tracing::info!(conn, "client disconnected");
}

/// Processes one text frame. Returns `false` once the socket should stop
/// reading.
async fn handle_text(
    conn: u64,
    text: &str,
    state: &DevState,
    tx: &mpsc::UnboundedSender<Message>,
) -> bool {
    let (prompt, metadata) = match decode_user_message(text) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!(conn, error = %e, "unsupported payload");
            let reply = InboundEnvelope::Error {
                message: Some(format!("unsupported payload: {e}")),
            };
            if let Some(msg) = envelope_message(&reply) {
                let _ = tx.send(msg);
            }
            return true;
        }
    };

    tracing::debug!(conn, prompt = %prompt, "user message");
    let frames = reply_frames(&prompt, state.reply_mode);
    state.record(prompt, metadata).await;

    let Some(frames) = frames else {
        tracing::info!(conn, "scripted close");
        let _ = tx.send(close_message("scripted close"));
        return false;
    };
    for frame in frames {
        if tx.send(frame).is_err() {
            return false;
        }
    }
    true
}

/// Query string of the socket upgrade request.
#[derive(Debug, Default, serde::Deserialize)]
pub struct WsQuery {
    /// Token presented by the client.
    pub token: Option<String>,
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<DevState>>,
) -> Response {
    if !state.authorized(query.token.as_deref()) {
        tracing::warn!("rejecting socket with missing or wrong token");
        return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// axum handler for the AI proxy endpoint.
async fn proxy_handler(
    State(state): State<Arc<DevState>>,
    headers: HeaderMap,
    Json(request): Json<ProxyRequest>,
) -> Response {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if !state.authorized(bearer) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid token" })),
        )
            .into_response();
    }

    let prompt = request.prompt.trim();
    if prompt.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "prompt is required" })),
        )
            .into_response();
    }

    let mut metadata = Metadata::new();
    if let Some(model) = &request.model {
        metadata.insert("model".into(), json!(model));
    }
    if let Some(system) = &request.system {
        metadata.insert("system".into(), json!(system));
    }
    let reply = scripted_reply(prompt);
    state.record(prompt.to_string(), metadata).await;
    Json(json!({ "text": reply })).into_response()
}

/// Builds the dev server router.
pub fn router(state: Arc<DevState>) -> axum::Router {
    axum::Router::new()
        .route(WS_PATH, axum::routing::get(ws_handler))
        .route(PROXY_PATH, axum::routing::post(proxy_handler))
        .with_state(state)
}

/// Starts the dev server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>), ServerError> {
    start_server_with_state(addr, Arc::new(DevState::new())).await
}

/// Starts the dev server with a pre-configured [`DevState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<DevState>,
) -> Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>), ServerError> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "dev server error");
        }
    });

    Ok((bound_addr, handle))
}
