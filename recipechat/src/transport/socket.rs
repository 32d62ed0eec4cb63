//! Persistent WebSocket transport with automatic reconnection.
//!
//! Each connection attempt runs in its own background task tagged with an
//! epoch. Only the task whose epoch is current may change the client status or
//! publish events; a superseded task closes its socket quietly. A new attempt
//! waits for the previous task to finish its close handshake before dialing,
//! so at most one socket is ever held.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use recipechat_proto::envelope::encode_user_message;
use recipechat_proto::message::UserMessage;

use super::backoff::ReconnectConfig;
use super::{ChatTransport, ClientCore, CloseInfo, RawPayload, TransportError, TransportKind};
use crate::events::Subscription;
use crate::normalize::Inbound;
use crate::status::ConnectionStatus;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, Message>;
type WsReader = futures_util::stream::SplitStream<WsStream>;

/// Close code reported when the socket vanished without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Tunables for [`SocketTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    /// Bound on the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Bound on the close handshake of a released socket.
    pub close_timeout: Duration,
    /// Retry policy after unexpected closes.
    pub reconnect: ReconnectConfig,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(1),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Instructions from the caller side to the channel task.
#[derive(Debug)]
enum Command {
    Send(String),
    Close,
}

struct ChannelHandle {
    epoch: u64,
    outbound: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
    open: bool,
}

#[derive(Default)]
struct ReconnectState {
    attempt: u32,
    timer: Option<JoinHandle<()>>,
    manual_close: bool,
}

#[derive(Default)]
struct SocketState {
    epoch: u64,
    channel: Option<ChannelHandle>,
    /// Tasks of released channels that may still be closing their socket.
    retired: Vec<JoinHandle<()>>,
    reconnect: ReconnectState,
    /// One-shot `open` subscriptions carrying sends made while connecting.
    deferred: Vec<Subscription>,
}

struct SocketInner {
    core: Arc<ClientCore>,
    url: Url,
    options: SocketOptions,
    state: Mutex<SocketState>,
    live: Arc<AtomicUsize>,
}

/// Counts a held socket for as long as it is alive.
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// WebSocket strategy for [`ChatTransport`].
///
/// Dropping the transport disconnects it.
pub struct SocketTransport {
    inner: Arc<SocketInner>,
}

impl SocketTransport {
    /// Creates a transport for `url` in the `idle` state. Nothing is dialed
    /// until [`connect`](ChatTransport::connect) or a send.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidAddress`] unless `url` uses the `ws`
    /// or `wss` scheme.
    pub fn new(url: Url, options: SocketOptions) -> Result<Self, TransportError> {
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidAddress(format!(
                "expected a ws:// or wss:// URL, got {url}"
            )));
        }
        Ok(Self {
            inner: Arc::new(SocketInner {
                core: Arc::new(ClientCore::new()),
                url,
                options,
                state: Mutex::new(SocketState::default()),
                live: Arc::new(AtomicUsize::new(0)),
            }),
        })
    }

    /// The endpoint this transport dials.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Number of sockets currently held (0 or 1).
    #[must_use]
    pub fn live_channels(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Number of reconnects scheduled since the last successful open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state.lock().reconnect.attempt
    }

    /// Whether a reconnect timer is pending.
    #[must_use]
    pub fn reconnect_pending(&self) -> bool {
        self.inner
            .state
            .lock()
            .reconnect
            .timer
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

impl ChatTransport for SocketTransport {
    fn connect(&self) {
        self.inner.open_channel(true);
    }

    fn disconnect(&self) {
        self.inner.release();
    }

    fn send_raw(&self, payload: RawPayload) {
        self.inner.send_text(payload.into_text());
    }

    async fn send_user_message(&self, message: UserMessage) {
        match encode_user_message(&message) {
            Ok(text) => self.inner.send_text(text),
            Err(e) => tracing::warn!(err = %e, "failed to encode user message, dropping"),
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn core(&self) -> &Arc<ClientCore> {
        &self.inner.core
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.reconnect.manual_close = true;
        if let Some(timer) = state.reconnect.timer.take() {
            timer.abort();
        }
        if let Some(channel) = state.channel.take() {
            let _ = channel.outbound.send(Command::Close);
        }
    }
}

impl SocketInner {
    fn is_current(&self, epoch: u64) -> bool {
        self.state
            .lock()
            .channel
            .as_ref()
            .is_some_and(|c| c.epoch == epoch)
    }

    /// Starts a connection attempt unless a channel is already held.
    ///
    /// `explicit` attempts come from the caller and clear the manual-close
    /// flag; timer-driven attempts respect it.
    fn open_channel(self: &Arc<Self>, explicit: bool) {
        let (epoch, commands, previous) = {
            let mut state = self.state.lock();
            if explicit {
                state.reconnect.manual_close = false;
                if let Some(timer) = state.reconnect.timer.take() {
                    timer.abort();
                }
            } else {
                state.reconnect.timer = None;
                if state.reconnect.manual_close {
                    return;
                }
            }
            if state.channel.is_some() {
                return;
            }

            state.epoch += 1;
            let epoch = state.epoch;
            let (tx, rx) = mpsc::unbounded_channel();
            state.channel = Some(ChannelHandle {
                epoch,
                outbound: tx,
                task: None,
                open: false,
            });
            (epoch, rx, std::mem::take(&mut state.retired))
        };

        tracing::info!(url = %self.url, epoch, explicit, "connecting");
        self.core.set_status(ConnectionStatus::Connecting);

        let task = tokio::spawn(Arc::clone(self).run_channel(epoch, commands, previous));

        let mut state = self.state.lock();
        match state.channel.as_mut() {
            Some(channel) if channel.epoch == epoch => channel.task = Some(task),
            _ => state.retired.push(task),
        }
    }

    /// Body of one connection attempt.
    async fn run_channel(
        self: Arc<Self>,
        epoch: u64,
        mut commands: mpsc::UnboundedReceiver<Command>,
        previous: Vec<JoinHandle<()>>,
    ) {
        for task in previous {
            let _ = task.await;
        }

        let connect_timeout = self.options.connect_timeout;
        let mut dial = std::pin::pin!(tokio::time::timeout(
            connect_timeout,
            connect_async(self.url.as_str())
        ));
        let dialed = loop {
            tokio::select! {
                result = &mut dial => break result,
                command = commands.recv() => match command {
                    Some(Command::Send(_)) => {
                        tracing::debug!(epoch, "send before open, dropping");
                    }
                    Some(Command::Close) | None => {
                        tracing::debug!(epoch, "connection attempt abandoned");
                        return;
                    }
                },
            }
        };

        let ws = match dialed {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                tracing::warn!(url = %self.url, err = %e, "WebSocket connect failed");
                self.fail_attempt(epoch, map_ws_connect_error(&e));
                return;
            }
            Err(_) => {
                tracing::warn!(url = %self.url, "WebSocket connect timed out");
                self.fail_attempt(epoch, TransportError::ConnectTimeout(connect_timeout));
                return;
            }
        };

        let live = LiveGuard::acquire(&self.live);
        let (mut sink, mut stream) = ws.split();

        if !self.handle_open(epoch) {
            tracing::debug!(epoch, "attempt superseded while dialing, closing");
            self.shut_down(&mut sink, &mut stream).await;
            return;
        }

        let closed = self.pump(epoch, &mut sink, &mut stream, &mut commands).await;
        match closed {
            Some(info) => {
                // Flushes tungstenite's queued close reply, if any.
                let _ = tokio::time::timeout(self.options.close_timeout, sink.close()).await;
                drop((sink, stream, live));
                self.handle_closed(epoch, info);
            }
            None => self.shut_down(&mut sink, &mut stream).await,
        }
    }

    /// Moves frames in both directions until the socket ends or the caller
    /// releases the channel.
    ///
    /// Returns `None` when the caller asked for the close; the socket is then
    /// still usable for a graceful shutdown and nothing is published.
    async fn pump(
        &self,
        epoch: u64,
        sink: &mut WsSink,
        stream: &mut WsReader,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Option<CloseInfo> {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Send(text)) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            let reason = e.to_string();
                            self.handle_error(epoch, TransportError::Socket(reason.clone()));
                            return Some(CloseInfo::remote(Some(ABNORMAL_CLOSURE), reason));
                        }
                    }
                    Some(Command::Close) | None => return None,
                },
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_frame(epoch, text.to_string());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        self.handle_frame(epoch, String::from_utf8_lossy(&data).into_owned());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let info = frame.map_or_else(
                            || CloseInfo::remote(None, ""),
                            |f| CloseInfo::remote(Some(u16::from(f.code)), f.reason.to_string()),
                        );
                        tracing::info!(
                            epoch,
                            code = ?info.code,
                            reason = %info.reason,
                            "server closed the socket"
                        );
                        return Some(info);
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                        // Pongs are sent by tungstenite.
                    }
                    Some(Err(e)) => {
                        let reason = e.to_string();
                        self.handle_error(epoch, TransportError::Socket(reason.clone()));
                        return Some(CloseInfo::remote(Some(ABNORMAL_CLOSURE), reason));
                    }
                    None => {
                        return Some(CloseInfo::remote(Some(ABNORMAL_CLOSURE), "connection lost"));
                    }
                },
            }
        }
    }

    /// Sends a close frame and waits for the peer's reply, bounded by the
    /// close timeout.
    async fn shut_down(&self, sink: &mut WsSink, stream: &mut WsReader) {
        let handshake = async {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: String::from("client disconnect").into(),
            };
            if sink.send(Message::Close(Some(frame))).await.is_err() {
                return;
            }
            while let Some(Ok(msg)) = stream.next().await {
                if msg.is_close() {
                    break;
                }
            }
        };
        if tokio::time::timeout(self.options.close_timeout, handshake)
            .await
            .is_err()
        {
            tracing::debug!(url = %self.url, "close handshake timed out");
        }
    }

    fn handle_frame(&self, epoch: u64, text: String) {
        if !self.is_current(epoch) {
            return;
        }
        self.core.ingest(Inbound::Text(text));
    }

    /// Marks the attempt open. Returns `false` if it has been superseded.
    fn handle_open(&self, epoch: u64) -> bool {
        {
            let mut state = self.state.lock();
            match state.channel.as_mut() {
                Some(channel) if channel.epoch == epoch => channel.open = true,
                _ => return false,
            }
            state.reconnect.attempt = 0;
        }
        // A concurrent release may have closed the client since the check.
        if !self
            .core
            .transition_from(ConnectionStatus::Connecting, ConnectionStatus::Open)
            || !self.is_current(epoch)
        {
            tracing::debug!(epoch, "released before open, not announcing");
            return false;
        }
        tracing::info!(url = %self.url, epoch, "socket open");
        self.core.events().open.publish(&());

        // Deferred sends for this attempt have fired by now.
        let fired = std::mem::take(&mut self.state.lock().deferred);
        drop(fired);
        true
    }

    fn handle_error(&self, epoch: u64, err: TransportError) {
        let deferred = {
            let mut state = self.state.lock();
            if !state.channel.as_ref().is_some_and(|c| c.epoch == epoch) {
                return;
            }
            std::mem::take(&mut state.deferred)
        };
        abandon(&deferred);
        self.core.set_status(ConnectionStatus::Error);
        self.core.publish_error(&err);
    }

    fn handle_closed(self: &Arc<Self>, epoch: u64, info: CloseInfo) {
        let deferred = {
            let mut state = self.state.lock();
            if !state.channel.as_ref().is_some_and(|c| c.epoch == epoch) {
                return;
            }
            state.channel = None;
            std::mem::take(&mut state.deferred)
        };
        abandon(&deferred);
        self.core.events().close.publish(&info);
        self.core.set_status(ConnectionStatus::Closed);
        self.schedule_reconnect();
    }

    fn fail_attempt(self: &Arc<Self>, epoch: u64, err: TransportError) {
        let reason = err.to_string();
        self.handle_error(epoch, err);
        self.handle_closed(epoch, CloseInfo::remote(Some(ABNORMAL_CLOSURE), reason));
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.reconnect.manual_close || state.channel.is_some() {
            return;
        }
        if state
            .reconnect
            .timer
            .as_ref()
            .is_some_and(|t| !t.is_finished())
        {
            return;
        }

        let attempt = state.reconnect.attempt;
        let policy = &self.options.reconnect;
        if !policy.allows(attempt) {
            tracing::warn!(attempts = attempt, "reconnect attempts exhausted, staying closed");
            return;
        }
        let delay = policy.delay_for_attempt(attempt);
        state.reconnect.attempt = attempt + 1;
        tracing::info!(
            attempt = attempt + 1,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling reconnect"
        );

        let weak = Arc::downgrade(self);
        state.reconnect.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.open_channel(false);
            }
        }));
    }

    /// Caller-initiated disconnect.
    fn release(&self) {
        let (channel, deferred) = {
            let mut state = self.state.lock();
            state.reconnect.manual_close = true;
            if let Some(timer) = state.reconnect.timer.take() {
                timer.abort();
            }
            let mut channel = state.channel.take();
            if let Some(task) = channel.as_mut().and_then(|c| c.task.take()) {
                state.retired.push(task);
            }
            (channel, std::mem::take(&mut state.deferred))
        };
        abandon(&deferred);

        if self.core.status() != ConnectionStatus::Closed {
            self.core.set_status(ConnectionStatus::Closing);
        }
        if let Some(channel) = &channel {
            tracing::info!(url = %self.url, epoch = channel.epoch, "disconnecting");
            let _ = channel.outbound.send(Command::Close);
        }
        self.core.set_status(ConnectionStatus::Closed);
        if channel.is_some() {
            self.core.events().close.publish(&CloseInfo::local());
        }
    }

    /// Sends `text` now if the channel is open, otherwise connects and defers
    /// it until this attempt opens.
    fn send_text(self: &Arc<Self>, text: String) {
        if self.try_send_or_defer(text.clone()) {
            return;
        }
        self.open_channel(true);
        if !self.try_send_or_defer(text) {
            tracing::warn!("no channel after connect, dropping outbound payload");
        }
    }

    /// Returns `false` only when no channel exists.
    fn try_send_or_defer(self: &Arc<Self>, text: String) -> bool {
        let mut state = self.state.lock();
        let Some(channel) = state.channel.as_ref() else {
            return false;
        };
        let epoch = channel.epoch;

        if channel.open {
            if channel.outbound.send(Command::Send(text)).is_err() {
                tracing::debug!(epoch, "channel task gone, dropping outbound payload");
            }
            return true;
        }

        tracing::debug!(epoch, "channel connecting, deferring send until open");
        let weak = Arc::downgrade(self);
        let payload = Mutex::new(Some(text));
        let subscription = self.core.events().open.subscribe_once(move |()| {
            let (Some(inner), Some(text)) = (weak.upgrade(), payload.lock().take()) else {
                return;
            };
            let state = inner.state.lock();
            match state.channel.as_ref() {
                Some(channel) if channel.epoch == epoch && channel.open => {
                    let _ = channel.outbound.send(Command::Send(text));
                }
                _ => tracing::debug!(epoch, "deferred send outlived its attempt, dropping"),
            }
        });
        state.deferred.push(subscription);
        true
    }
}

fn abandon(deferred: &[Subscription]) {
    if !deferred.is_empty() {
        tracing::debug!(count = deferred.len(), "abandoning deferred sends");
    }
    for subscription in deferred {
        subscription.unsubscribe();
    }
}

fn map_ws_connect_error(err: &tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Http(response) => {
            TransportError::Connect(format!("HTTP {} during handshake", response.status()))
        }
        WsError::Url(e) => TransportError::InvalidAddress(e.to_string()),
        other => TransportError::Connect(other.to_string()),
    }
}
