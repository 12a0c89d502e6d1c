//! Per-connection push session.
//!
//! # Lifecycle
//! `Connecting → AuthPending → Admitted → Active → Closing → Closed`.
//!
//! - `AuthPending`: the upgrade request's token has been checked; a rejected
//!   caller is closed with 1008 before anything else is sent.
//! - `Admitted`: the connection is registered under the caller's tenant and the
//!   `connected` acknowledgment goes out.
//! - `Active`: control messages are answered and dispatched events are written
//!   while the client is subscribed.
//! - `Closing`/`Closed`: the loop ended (client close, socket error, keepalive
//!   expiry, eviction or server shutdown). The admission guard removes the
//!   connection from the registry on every exit path.
use super::messages::{ClientMessage, ServerMessage};
use crate::auth::AuthError;
use crate::config::PushConfig;
use crate::model::Caller;
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use camgate_hub::{Connection, ConnectionRegistry};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    AuthPending,
    Admitted,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid session transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

impl SessionState {
    pub fn transition(self, to: SessionState) -> Result<SessionState, InvalidTransition> {
        use SessionState::*;
        let allowed = matches!(
            (self, to),
            (Connecting, AuthPending)
                | (Connecting, Closing)
                | (AuthPending, Admitted)
                | (AuthPending, Closing)
                | (Admitted, Active)
                | (Admitted, Closing)
                | (Active, Closing)
                | (Closing, Closed)
        );
        if allowed {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Unauthorized,
    ClientClosed,
    SocketError,
    IdleTimeout,
    Evicted,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Unauthorized => "unauthorized",
            CloseReason::ClientClosed => "client_closed",
            CloseReason::SocketError => "socket_error",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::Evicted => "evicted",
            CloseReason::Shutdown => "shutdown",
        }
    }

    /// Close frame the server sends, if the server is the one closing.
    fn close_frame(self) -> Option<CloseFrame<'static>> {
        let (code, reason) = match self {
            CloseReason::Unauthorized => (close_code::POLICY, "authentication failed"),
            CloseReason::IdleTimeout => (close_code::NORMAL, "idle timeout"),
            CloseReason::Evicted => (close_code::NORMAL, "connection evicted"),
            CloseReason::Shutdown => (close_code::AWAY, "server shutting down"),
            CloseReason::ClientClosed | CloseReason::SocketError => return None,
        };
        Some(CloseFrame {
            code,
            reason: reason.into(),
        })
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PushSettings {
    pub queue_capacity: usize,
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
}

impl From<&PushConfig> for PushSettings {
    fn from(config: &PushConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity,
            ping_interval: config.ping_interval(),
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// Process-wide signal telling every push session to close with 1001.
#[derive(Debug, Clone)]
pub struct SessionShutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for SessionShutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionShutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub settings: PushSettings,
    pub shutdown: SessionShutdown,
}

struct Lifecycle {
    state: SessionState,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: SessionState::Connecting,
        }
    }

    fn advance(&mut self, to: SessionState) {
        match self.state.transition(to) {
            Ok(next) => self.state = next,
            Err(err) => tracing::error!(error = %err, "push session state machine violated"),
        }
    }
}

/// Drive one push socket from upgrade to close.
pub async fn run_session(
    mut socket: WebSocket,
    auth: Result<Caller, AuthError>,
    ctx: SessionContext,
) -> CloseReason {
    let mut lifecycle = Lifecycle::new();
    lifecycle.advance(SessionState::AuthPending);

    let caller = match auth {
        Ok(caller) => caller,
        Err(_) => {
            lifecycle.advance(SessionState::Closing);
            let _ = socket
                .send(Message::Close(CloseReason::Unauthorized.close_frame()))
                .await;
            drain_until_closed(&mut socket).await;
            lifecycle.advance(SessionState::Closed);
            return CloseReason::Unauthorized;
        }
    };

    let (connection, mut push_rx) = Connection::open(
        caller.tenant_id.as_str(),
        caller.user_id.as_str(),
        ctx.settings.queue_capacity,
    );
    let connection_id = connection.id();
    let admission = ctx.registry.admit_guarded(&connection);
    // The registry holds the only sender from here on; if it lets go, the
    // queue closes and the session ends as evicted.
    drop(connection);
    lifecycle.advance(SessionState::Admitted);

    let span = tracing::info_span!(
        "push.session",
        tenant_id = %caller.tenant_id,
        user_id = %caller.user_id,
        %connection_id
    );
    let reason = async {
        tracing::info!("push session admitted");
        let ack = ServerMessage::connected(
            connection_id.to_string(),
            &caller.tenant_id,
            &caller.user_id,
        );
        if send_message(&mut socket, &ack).await.is_err() {
            lifecycle.advance(SessionState::Closing);
            return CloseReason::SocketError;
        }
        lifecycle.advance(SessionState::Active);
        let (ws_tx, ws_rx) = socket.split();
        let mut active = ActiveSession {
            ws_tx,
            ws_rx,
            subscribed: true,
            last_seen: Instant::now(),
        };
        let reason = active.run(&mut push_rx, &ctx).await;
        lifecycle.advance(SessionState::Closing);
        active.close(reason).await;
        tracing::info!(reason = %reason, "push session closed");
        reason
    }
    .instrument(span)
    .await;

    push_rx.close();
    drop(admission);
    lifecycle.advance(SessionState::Closed);
    reason
}

struct ActiveSession {
    ws_tx: SplitSink<WebSocket, Message>,
    ws_rx: SplitStream<WebSocket>,
    subscribed: bool,
    last_seen: Instant,
}

impl ActiveSession {
    async fn run(
        &mut self,
        push_rx: &mut camgate_hub::PushReceiver,
        ctx: &SessionContext,
    ) -> CloseReason {
        let mut shutdown = ctx.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return CloseReason::Shutdown;
        }
        let ping_interval = ctx.settings.ping_interval;
        let idle_timeout = ctx.settings.idle_timeout;
        let mut ticker = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        return CloseReason::Shutdown;
                    }
                }
                frame = push_rx.recv() => {
                    let Some(frame) = frame else {
                        return CloseReason::Evicted;
                    };
                    if self.subscribed
                        && self.ws_tx.send(Message::Text(frame.text().to_string())).await.is_err()
                    {
                        return CloseReason::SocketError;
                    }
                }
                _ = ticker.tick() => {
                    if self.last_seen.elapsed() >= idle_timeout {
                        tracing::debug!(
                            idle_ms = self.last_seen.elapsed().as_millis() as u64,
                            "push session idle"
                        );
                        return CloseReason::IdleTimeout;
                    }
                    if self.ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                        return CloseReason::SocketError;
                    }
                }
                inbound = self.ws_rx.next() => {
                    let message = match inbound {
                        Some(Ok(message)) => message,
                        Some(Err(err)) => {
                            tracing::debug!(error = %err, "push socket read failed");
                            return CloseReason::SocketError;
                        }
                        None => return CloseReason::ClientClosed,
                    };
                    self.last_seen = Instant::now();
                    let reply = match message {
                        Message::Text(text) => Some(self.handle_control(&text)),
                        Message::Binary(_) => Some(ServerMessage::error(
                            "invalid_message",
                            "binary messages are not supported",
                        )),
                        Message::Ping(_) | Message::Pong(_) => None,
                        Message::Close(_) => return CloseReason::ClientClosed,
                    };
                    if let Some(reply) = reply
                        && self.send(&reply).await.is_err()
                    {
                        return CloseReason::SocketError;
                    }
                }
            }
        }
    }

    fn handle_control(&mut self, text: &str) -> ServerMessage {
        match ClientMessage::parse(text) {
            Ok(message) => {
                match message {
                    ClientMessage::Subscribe => self.subscribed = true,
                    ClientMessage::Unsubscribe => self.subscribed = false,
                    ClientMessage::Ping => {}
                }
                message.reply()
            }
            Err(err) => {
                tracing::debug!(error = %err, "unrecognized push control message");
                ServerMessage::error("invalid_message", "unrecognized message")
            }
        }
    }

    async fn send(&mut self, message: &ServerMessage) -> Result<(), axum::Error> {
        match message.to_json() {
            Ok(text) => self.ws_tx.send(Message::Text(text)).await,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode push message");
                Ok(())
            }
        }
    }

    async fn close(&mut self, reason: CloseReason) {
        let Some(frame) = reason.close_frame() else {
            return;
        };
        if self.ws_tx.send(Message::Close(Some(frame))).await.is_err() {
            return;
        }
        // Wait briefly for the peer's close echo.
        let _ = tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, async {
            while let Some(Ok(message)) = self.ws_rx.next().await {
                if matches!(message, Message::Close(_)) {
                    break;
                }
            }
        })
        .await;
    }
}

async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    match message.to_json() {
        Ok(text) => socket.send(Message::Text(text)).await,
        Err(err) => {
            tracing::error!(error = %err, "failed to encode push message");
            Ok(())
        }
    }
}

async fn drain_until_closed(socket: &mut WebSocket) {
    let _ = tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, async {
        while let Some(Ok(message)) = socket.recv().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut state = SessionState::Connecting;
        for next in [
            SessionState::AuthPending,
            SessionState::Admitted,
            SessionState::Active,
            SessionState::Closing,
            SessionState::Closed,
        ] {
            state = state.transition(next).expect("allowed");
        }
        assert!(state.is_terminal());
    }

    #[test]
    fn rejected_caller_goes_straight_to_closing() {
        let state = SessionState::AuthPending
            .transition(SessionState::Closing)
            .expect("auth failure closes");
        assert_eq!(state, SessionState::Closing);
    }

    #[test]
    fn skipping_admission_is_rejected() {
        assert_eq!(
            SessionState::AuthPending.transition(SessionState::Active),
            Err(InvalidTransition {
                from: SessionState::AuthPending,
                to: SessionState::Active,
            })
        );
        assert!(SessionState::Closed.transition(SessionState::Active).is_err());
        assert!(SessionState::Active.transition(SessionState::Closed).is_err());
    }

    #[test]
    fn close_codes_follow_reason() {
        let code = |reason: CloseReason| reason.close_frame().map(|frame| frame.code);
        assert_eq!(code(CloseReason::Unauthorized), Some(close_code::POLICY));
        assert_eq!(code(CloseReason::Shutdown), Some(close_code::AWAY));
        assert_eq!(code(CloseReason::IdleTimeout), Some(close_code::NORMAL));
        assert_eq!(code(CloseReason::ClientClosed), None);
    }

    #[tokio::test]
    async fn shutdown_signal_is_observed_by_late_subscribers() {
        let shutdown = SessionShutdown::new();
        shutdown.trigger();
        let rx = shutdown.subscribe();
        assert!(*rx.borrow());
        assert!(shutdown.is_triggered());
    }
}
