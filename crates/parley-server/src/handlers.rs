//! Connection handlers for the Parley relay server.
//!
//! Each WebSocket connection performs the `connect` handshake and then
//! joins rooms, announces presence and relays call signals through the
//! shared [`RoomHub`]. Room events are forwarded back to the socket as
//! `presence` and `broadcast` frames.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{bail, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::{Bytes, BytesMut};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use parley_core::{RoomEvent, RoomHub};
use parley_protocol::{
    codec, codes, Frame, ParticipantId, SignalKind, Version, PROTOCOL_VERSION,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type WsSender = SplitSink<WebSocket, Message>;

/// A room event on its way to one connection.
type RoomFeed = (String, Arc<RoomEvent>);

/// Shared server state.
pub struct AppState {
    /// The room hub.
    pub hub: Arc<RoomHub>,
    /// Server configuration.
    pub config: Config,
    connections: AtomicUsize,
    next_connection_id: AtomicU64,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            hub: RoomHub::shared(config.hub_config()),
            config,
            connections: AtomicUsize::new(0),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Number of open connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

/// Reserves one connection under `max_connections`; released on drop.
struct ConnectionSlot {
    state: Arc<AppState>,
}

impl ConnectionSlot {
    fn try_acquire(state: &Arc<AppState>) -> Option<Self> {
        let max = state.config.limits.max_connections;
        state
            .connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        Some(Self {
            state: state.clone(),
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server stops with an I/O error.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Parley server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, Arc::new(AppState::new(config))).await
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION.to_string(),
        "connections": state.active_connections(),
        "rooms": stats.room_count,
        "participants": stats.participant_count,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let Some(slot) = ConnectionSlot::try_acquire(&state) else {
        warn!(
            max = state.config.limits.max_connections,
            "Connection limit reached"
        );
        metrics::record_error("connection_limit");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    ws.on_upgrade(move |socket| handle_websocket(socket, state, slot))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, _slot: ConnectionSlot) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = format!(
        "conn_{}",
        state.next_connection_id.fetch_add(1, Ordering::Relaxed)
    );
    debug!(connection = %connection_id, "WebSocket connected");

    let (sender, mut receiver) = socket.split();
    let (feed_tx, mut feed_rx) = mpsc::unbounded_channel::<RoomFeed>();
    let mut connection = ClientConnection::new(connection_id, state.clone(), sender, feed_tx);

    let max_message_size = state.config.limits.max_message_size;
    let heartbeat = state.config.heartbeat.interval();
    let heartbeat_timeout = state.config.heartbeat.timeout();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
    let mut last_seen = Instant::now();
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            biased;

            Some((room, event)) = feed_rx.recv() => {
                if connection.forward(room, &event).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                let data = match msg {
                    Some(Ok(Message::Binary(data))) => data,
                    // Treat text as binary
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Ping(data))) => {
                        last_seen = Instant::now();
                        if connection.sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_seen = Instant::now();
                        continue;
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection.id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection.id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection.id, "WebSocket stream ended");
                        break;
                    }
                };

                last_seen = Instant::now();
                metrics::record_frame(data.len(), "inbound");
                if data.len() > max_message_size {
                    warn!(
                        connection = %connection.id,
                        size = data.len(),
                        max = max_message_size,
                        "Message too large"
                    );
                    metrics::record_error("oversized");
                    let _ = connection
                        .send(&Frame::error(0, codes::INVALID_FRAME, "Message too large"))
                        .await;
                    break;
                }

                read_buffer.extend_from_slice(&data);
                if let Err(e) = connection.drain(&mut read_buffer).await {
                    debug!(connection = %connection.id, error = %e, "Closing connection");
                    break;
                }
            }

            _ = ticker.tick() => {
                if last_seen.elapsed() > heartbeat_timeout {
                    info!(connection = %connection.id, "Heartbeat timeout");
                    break;
                }
                if connection.send(&Frame::ping(Some(now_millis()))).await.is_err() {
                    break;
                }
            }
        }
    }

    connection.close();
    debug!(connection = %connection.id, "WebSocket disconnected");
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A room joined over one connection.
struct Membership {
    member: ParticipantId,
    forward: JoinHandle<()>,
}

/// Per-connection protocol state.
struct ClientConnection {
    id: String,
    state: Arc<AppState>,
    sender: WsSender,
    /// Negotiated version; `None` until the handshake completes.
    version: Option<Version>,
    memberships: HashMap<String, Membership>,
    feed_tx: mpsc::UnboundedSender<RoomFeed>,
}

impl ClientConnection {
    fn new(
        id: String,
        state: Arc<AppState>,
        sender: WsSender,
        feed_tx: mpsc::UnboundedSender<RoomFeed>,
    ) -> Self {
        Self {
            id,
            state,
            sender,
            version: None,
            memberships: HashMap::new(),
            feed_tx,
        }
    }

    async fn send(&mut self, frame: &Frame) -> Result<()> {
        let data = codec::encode(frame)?;
        metrics::record_frame(data.len(), "outbound");
        self.sender.send(Message::Binary(data.to_vec())).await?;
        Ok(())
    }

    /// Decode and handle every complete frame in the buffer.
    async fn drain(&mut self, buffer: &mut BytesMut) -> Result<()> {
        let start = Instant::now();
        loop {
            match codec::decode_from(buffer) {
                Ok(Some(frame)) => self.handle_frame(frame).await?,
                Ok(None) => break,
                Err(e) => {
                    warn!(connection = %self.id, error = %e, "Invalid frame");
                    metrics::record_error("decode");
                    buffer.clear();
                    self.send(&Frame::error(0, codes::INVALID_FRAME, e.to_string()))
                        .await?;
                    break;
                }
            }
        }
        metrics::record_latency(start.elapsed().as_secs_f64());
        Ok(())
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        if self.version.is_none() && !matches!(frame, Frame::Connect { .. }) {
            warn!(connection = %self.id, frame_type = ?frame.frame_type(), "Frame before connect");
            let id = frame.request_id().unwrap_or(0);
            return self
                .send(&Frame::error(id, codes::INVALID_FRAME, "Expected connect"))
                .await;
        }

        match frame {
            Frame::Connect { version } => self.on_connect(version).await,
            Frame::Join { id, room, member } => self.on_join(id, room, member).await,
            Frame::Leave { id, room } => self.on_leave(id, room).await,
            Frame::Track { id, room, data } => self.on_track(id, room, data).await,
            Frame::Broadcast {
                id,
                room,
                event,
                payload,
                ..
            } => self.on_broadcast(id, room, event, payload).await,
            Frame::Ping { timestamp } => self.send(&Frame::pong(timestamp)).await,
            Frame::Pong { .. } => Ok(()),
            other => {
                warn!(connection = %self.id, frame_type = ?other.frame_type(), "Unexpected frame type");
                Ok(())
            }
        }
    }

    async fn on_connect(&mut self, requested: Version) -> Result<()> {
        if let Some(version) = self.version {
            debug!(connection = %self.id, version = %version, "Connect frame (already connected)");
            return Ok(());
        }

        let Some(version) = PROTOCOL_VERSION.negotiate(requested) else {
            warn!(connection = %self.id, requested = %requested, "Unsupported protocol version");
            self.send(&Frame::error(
                0,
                codes::UNSUPPORTED_VERSION,
                format!("Unsupported protocol version {requested}, server speaks {PROTOCOL_VERSION}"),
            ))
            .await?;
            bail!("unsupported protocol version {requested}");
        };

        self.version = Some(version);
        let heartbeat = u32::try_from(self.state.config.heartbeat.interval_ms).unwrap_or(u32::MAX);
        let connected = Frame::connected(self.id.clone(), version, heartbeat);
        self.send(&connected).await?;
        debug!(connection = %self.id, version = %version, "Handshake complete");
        Ok(())
    }

    async fn on_join(&mut self, id: u64, room: String, member: ParticipantId) -> Result<()> {
        debug!(connection = %self.id, room = %room, participant = %member, "Join request");

        if self.memberships.contains_key(&room) {
            let message = format!("Connection already joined {room}");
            return self
                .send(&Frame::error(id, codes::JOIN_FAILED, message))
                .await;
        }

        let rx = match self.state.hub.join(&room, &member) {
            Ok(rx) => rx,
            Err(e) => {
                warn!(connection = %self.id, room = %room, error = %e, "Join failed");
                metrics::record_error("join");
                return self
                    .send(&Frame::error(id, codes::JOIN_FAILED, e.to_string()))
                    .await;
            }
        };

        let forward = spawn_forward(room.clone(), member.clone(), rx, self.feed_tx.clone());
        self.memberships
            .insert(room.clone(), Membership { member, forward });
        metrics::record_join();
        metrics::set_active_rooms(self.state.hub.stats().room_count);

        self.send(&Frame::ack(id)).await?;
        let roster = self.state.hub.presence(&room);
        self.send(&Frame::presence(room, roster)).await
    }

    async fn on_leave(&mut self, id: u64, room: String) -> Result<()> {
        debug!(connection = %self.id, room = %room, "Leave request");

        let Some(membership) = self.memberships.remove(&room) else {
            return self
                .send(&Frame::error(id, codes::NOT_JOINED, format!("Not joined to {room}")))
                .await;
        };
        membership.forward.abort();

        let response = match self.state.hub.leave(&room, &membership.member) {
            Ok(()) => Frame::ack(id),
            Err(e) => Frame::error(id, codes::NOT_JOINED, e.to_string()),
        };
        metrics::set_active_rooms(self.state.hub.stats().room_count);
        self.send(&response).await
    }

    async fn on_track(
        &mut self,
        id: u64,
        room: String,
        data: Option<serde_json::Value>,
    ) -> Result<()> {
        let Some(member) = self.member_of(&room) else {
            return self
                .send(&Frame::error(id, codes::NOT_JOINED, format!("Not joined to {room}")))
                .await;
        };

        let response = match self.state.hub.track(&room, &member, data) {
            Ok(_) => Frame::ack(id),
            Err(e) => {
                metrics::record_error("track");
                Frame::error(id, codes::TRACK_FAILED, e.to_string())
            }
        };
        self.send(&response).await
    }

    async fn on_broadcast(
        &mut self,
        id: Option<u64>,
        room: String,
        event: String,
        payload: Vec<u8>,
    ) -> Result<()> {
        let Some(member) = self.member_of(&room) else {
            let message = format!("Not joined to {room}");
            return self
                .send(&Frame::error(id.unwrap_or(0), codes::NOT_JOINED, message))
                .await;
        };

        let Some(kind) = SignalKind::from_event(&event) else {
            warn!(connection = %self.id, room = %room, event = %event, "Refusing non-signal broadcast");
            metrics::record_error("event");
            let message = format!("Unknown signal event {event}");
            return self
                .send(&Frame::error(id.unwrap_or(0), codes::INVALID_FRAME, message))
                .await;
        };

        // The joined member is the source; a client-supplied source is ignored.
        match self
            .state
            .hub
            .broadcast(&room, &member, event.as_str(), Bytes::from(payload))
        {
            Ok(recipients) => {
                metrics::record_signal(kind);
                debug!(
                    connection = %self.id,
                    room = %room,
                    event = %event,
                    recipients,
                    "Relayed"
                );
                if let Some(id) = id {
                    self.send(&Frame::ack(id)).await?;
                }
                Ok(())
            }
            Err(e) => {
                let id = id.unwrap_or(0);
                self.send(&Frame::error(id, codes::NOT_JOINED, e.to_string()))
                    .await
            }
        }
    }

    /// Push a room event to the client.
    async fn forward(&mut self, room: String, event: &RoomEvent) -> Result<()> {
        // Events queued before a leave are stale.
        if !self.memberships.contains_key(&room) {
            return Ok(());
        }

        let frame = match event {
            RoomEvent::PresenceSync { members } => Frame::presence(room, members.clone()),
            RoomEvent::Broadcast {
                source,
                event,
                payload,
            } => Frame::Broadcast {
                id: None,
                room,
                event: event.clone(),
                source: Some(source.clone()),
                payload: payload.to_vec(),
            },
        };
        self.send(&frame).await
    }

    fn member_of(&self, room: &str) -> Option<ParticipantId> {
        self.memberships.get(room).map(|m| m.member.clone())
    }

    /// Leave every joined room. Peers see the presence change.
    fn close(&mut self) {
        for (room, membership) in self.memberships.drain() {
            membership.forward.abort();
            if let Err(e) = self.state.hub.leave(&room, &membership.member) {
                debug!(connection = %self.id, room = %room, error = %e, "Leave on disconnect failed");
            }
        }
        metrics::set_active_rooms(self.state.hub.stats().room_count);
    }
}

/// Forward one room's events to the connection, skipping the member's own
/// broadcasts.
fn spawn_forward(
    room: String,
    member: ParticipantId,
    mut rx: broadcast::Receiver<Arc<RoomEvent>>,
    tx: mpsc::UnboundedSender<RoomFeed>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.is_from(&member) {
                        continue;
                    }
                    if tx.send((room.clone(), event)).is_err() {
                        break; // Connection gone
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(room = %room, participant = %member, skipped, "Room feed lagged");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::{SinkExt, StreamExt};
    use parley_call::{
        CallConfig, CallOutcome, CallSession, ConnectionError, FixedIdentity, NoopObserver,
        PeerConnection,
    };
    use parley_protocol::{IceCandidate, SessionDescription, Signal};
    use parley_transport::{
        ChannelEvent, RoomChannel, TransportError, WebSocketConfig, WebSocketRoomChannel,
    };
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

    async fn start_server(config: Config) -> (SocketAddr, Arc<AppState>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(AppState::new(config));
        tokio::spawn(serve(listener, state.clone()));
        (addr, state)
    }

    fn channel(addr: SocketAddr, name: &str) -> WebSocketRoomChannel {
        let config = WebSocketConfig {
            url: format!("ws://{addr}/ws"),
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        WebSocketRoomChannel::new(config, "video-room-1", name.into())
    }

    async fn next_event(channel: &mut WebSocketRoomChannel) -> ChannelEvent {
        tokio::time::timeout(Duration::from_secs(2), channel.next_event())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    async fn wait_for_roster(channel: &mut WebSocketRoomChannel, expected: &[&str]) {
        let expected: Vec<ParticipantId> = expected.iter().map(|n| ParticipantId::from(*n)).collect();
        loop {
            match next_event(channel).await {
                ChannelEvent::Presence(members) if members == expected => return,
                _ => continue,
            }
        }
    }

    async fn next_signal(channel: &mut WebSocketRoomChannel) -> Signal {
        loop {
            if let ChannelEvent::Signal(signal) = next_event(channel).await {
                return signal.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_signals_relay_between_websocket_clients() {
        let (addr, state) = start_server(Config::default()).await;
        let mut alice = channel(addr, "alice");
        let mut bob = channel(addr, "bob");

        alice.subscribe().await.unwrap();
        assert!(alice.connection_id().is_some());
        alice.track(None).await.unwrap();
        bob.subscribe().await.unwrap();
        bob.track(None).await.unwrap();

        wait_for_roster(&mut alice, &["alice", "bob"]).await;
        wait_for_roster(&mut bob, &["alice", "bob"]).await;
        assert_eq!(state.hub.member_count("video-room-1"), 2);

        let offer = Signal::Offer(SessionDescription::offer("v=0 offer"));
        bob.send(&offer).await.unwrap();
        assert_eq!(next_signal(&mut alice).await, offer);

        let answer = Signal::Answer(SessionDescription::answer("v=0 answer"));
        alice.send(&answer).await.unwrap();
        assert_eq!(next_signal(&mut bob).await, answer);

        let candidate = Signal::IceCandidate(IceCandidate::new("candidate:1").with_media("0", 0));
        bob.send(&candidate).await.unwrap();
        assert_eq!(next_signal(&mut alice).await, candidate);

        alice.send(&Signal::Leave).await.unwrap();
        assert_eq!(next_signal(&mut bob).await, Signal::Leave);
        alice.unsubscribe().await.unwrap();
        wait_for_roster(&mut bob, &["bob"]).await;
    }

    #[tokio::test]
    async fn test_disconnect_drops_presence() {
        let (addr, state) = start_server(Config::default()).await;
        let mut alice = channel(addr, "alice");
        let mut bob = channel(addr, "bob");

        alice.subscribe().await.unwrap();
        alice.track(None).await.unwrap();
        bob.subscribe().await.unwrap();
        bob.track(None).await.unwrap();
        wait_for_roster(&mut alice, &["alice", "bob"]).await;

        drop(bob);
        wait_for_roster(&mut alice, &["alice"]).await;
        assert_eq!(state.hub.member_count("video-room-1"), 1);
    }

    #[tokio::test]
    async fn test_third_member_is_refused() {
        let (addr, _state) = start_server(Config::default()).await;
        let mut alice = channel(addr, "alice");
        let mut bob = channel(addr, "bob");
        let mut carol = channel(addr, "carol");

        alice.subscribe().await.unwrap();
        bob.subscribe().await.unwrap();
        assert!(matches!(
            carol.subscribe().await,
            Err(TransportError::SubscribeFailed(_))
        ));
        assert!(!carol.is_subscribed());
    }

    async fn raw_request(addr: SocketAddr, frames: Vec<Frame>, expected: usize) -> Vec<Frame> {
        let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        for frame in &frames {
            let data = codec::encode(frame).unwrap();
            socket.send(WsMessage::Binary(data.to_vec())).await.unwrap();
        }

        let mut replies = Vec::new();
        while replies.len() < expected {
            let msg = tokio::time::timeout(Duration::from_secs(2), socket.next())
                .await
                .unwrap();
            match msg {
                Some(Ok(WsMessage::Binary(data))) => {
                    let mut buffer = BytesMut::from(&data[..]);
                    while let Some(frame) = codec::decode_from(&mut buffer).unwrap() {
                        replies.push(frame);
                    }
                }
                Some(Ok(_)) => continue,
                _ => break,
            }
        }
        replies
    }

    #[tokio::test]
    async fn test_unsupported_version_is_refused() {
        let (addr, _state) = start_server(Config::default()).await;
        let replies = raw_request(addr, vec![Frame::connect(Version::new(2, 0))], 1).await;

        assert!(matches!(
            replies.first(),
            Some(Frame::Error { code, .. }) if *code == codes::UNSUPPORTED_VERSION
        ));
    }

    #[tokio::test]
    async fn test_requests_before_connect_and_join() {
        let (addr, _state) = start_server(Config::default()).await;

        let replies =
            raw_request(addr, vec![Frame::join(1, "video-room-1", "alice".into())], 1).await;
        assert!(matches!(
            replies.first(),
            Some(Frame::Error { id: 1, code, .. }) if *code == codes::INVALID_FRAME
        ));

        let replies = raw_request(
            addr,
            vec![
                Frame::connect(PROTOCOL_VERSION),
                Frame::track(7, "video-room-1", None),
            ],
            2,
        )
        .await;
        assert!(matches!(replies[0], Frame::Connected { version, .. } if version == PROTOCOL_VERSION));
        assert!(matches!(
            replies[1],
            Frame::Error { id: 7, code, .. } if code == codes::NOT_JOINED
        ));
    }

    #[tokio::test]
    async fn test_non_signal_broadcast_is_refused() {
        let (addr, _state) = start_server(Config::default()).await;
        let broadcast = |id: u64, event: &str| Frame::Broadcast {
            id: Some(id),
            room: "video-room-1".to_string(),
            event: event.to_string(),
            source: None,
            payload: Vec::new(),
        };

        let replies = raw_request(
            addr,
            vec![
                Frame::connect(PROTOCOL_VERSION),
                Frame::join(1, "video-room-1", "alice".into()),
                broadcast(2, "typing"),
                broadcast(3, "leave"),
            ],
            5,
        )
        .await;

        assert!(matches!(replies[1], Frame::Ack { id: 1 }));
        assert!(matches!(replies[2], Frame::Presence { .. }));
        assert!(matches!(
            &replies[3],
            Frame::Error { id: 2, code, message } if *code == codes::INVALID_FRAME && message.contains("typing")
        ));
        assert!(matches!(replies[4], Frame::Ack { id: 3 }));
    }

    #[derive(Default)]
    struct CallLog {
        offers: usize,
        answers: usize,
        remote_descriptions: usize,
        closed: usize,
    }

    /// Peer connection that only counts what the session asks of it.
    struct CountingConnection {
        log: Arc<Mutex<CallLog>>,
        has_remote: bool,
    }

    impl CountingConnection {
        fn new() -> (Self, Arc<Mutex<CallLog>>) {
            let log = Arc::new(Mutex::new(CallLog::default()));
            let connection = Self {
                log: log.clone(),
                has_remote: false,
            };
            (connection, log)
        }
    }

    #[async_trait]
    impl PeerConnection for CountingConnection {
        async fn start_local_media(&mut self) -> Result<(), ConnectionError> {
            Ok(())
        }

        async fn create_offer(&mut self) -> Result<SessionDescription, ConnectionError> {
            self.log.lock().unwrap().offers += 1;
            Ok(SessionDescription::offer("v=0 offer"))
        }

        async fn create_answer(&mut self) -> Result<SessionDescription, ConnectionError> {
            self.log.lock().unwrap().answers += 1;
            Ok(SessionDescription::answer("v=0 answer"))
        }

        async fn set_remote_description(
            &mut self,
            _description: SessionDescription,
        ) -> Result<(), ConnectionError> {
            self.has_remote = true;
            self.log.lock().unwrap().remote_descriptions += 1;
            Ok(())
        }

        fn has_remote_description(&self) -> bool {
            self.has_remote
        }

        async fn add_ice_candidate(&mut self, _candidate: IceCandidate) -> Result<(), ConnectionError> {
            Ok(())
        }

        fn take_local_candidates(&mut self) -> Option<mpsc::UnboundedReceiver<IceCandidate>> {
            None
        }

        async fn close(&mut self) {
            self.log.lock().unwrap().closed += 1;
        }
    }

    #[tokio::test]
    async fn test_call_sessions_over_websocket() {
        let (addr, state) = start_server(Config::default()).await;
        let websocket = WebSocketConfig {
            url: format!("ws://{addr}/ws"),
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let config = CallConfig::default();

        let (connection, alice_log) = CountingConnection::new();
        let (alice, alice_handle) = CallSession::over_websocket(
            websocket.clone(),
            &config,
            "room-1",
            &FixedIdentity("alice".into()),
            connection,
            NoopObserver,
        )
        .await;
        let (connection, bob_log) = CountingConnection::new();
        let (bob, _bob_handle) = CallSession::over_websocket(
            websocket,
            &config,
            "room-1",
            &FixedIdentity("bob".into()),
            connection,
            NoopObserver,
        )
        .await;

        let alice_task = tokio::spawn(alice.run());
        let bob_task = tokio::spawn(bob.run());

        // bob initiates; the call is up once his side has alice's answer.
        let connected = tokio::time::timeout(Duration::from_secs(5), async {
            while bob_log.lock().unwrap().remote_descriptions == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(connected.is_ok(), "call never connected");
        assert_eq!(bob_log.lock().unwrap().offers, 1);
        assert_eq!(alice_log.lock().unwrap().offers, 0);
        assert_eq!(alice_log.lock().unwrap().answers, 1);
        assert_eq!(alice_log.lock().unwrap().remote_descriptions, 1);

        alice_handle.leave();
        let alice_outcome = tokio::time::timeout(Duration::from_secs(5), alice_task)
            .await
            .expect("alice did not finish")
            .unwrap();
        let bob_outcome = tokio::time::timeout(Duration::from_secs(5), bob_task)
            .await
            .expect("bob did not finish")
            .unwrap();

        assert_eq!(alice_outcome.unwrap(), CallOutcome::LocalLeft);
        assert_eq!(bob_outcome.unwrap(), CallOutcome::RemoteLeft);
        assert_eq!(alice_log.lock().unwrap().closed, 1);
        assert_eq!(bob_log.lock().unwrap().closed, 1);
        assert_eq!(state.hub.stats().room_count, 0);
    }

    #[test]
    fn test_connection_slots_respect_limit() {
        let mut config = Config::default();
        config.limits.max_connections = 1;
        let state = Arc::new(AppState::new(config));

        let first = ConnectionSlot::try_acquire(&state).unwrap();
        assert!(ConnectionSlot::try_acquire(&state).is_none());
        assert_eq!(state.active_connections(), 1);

        drop(first);
        assert_eq!(state.active_connections(), 0);
        assert!(ConnectionSlot::try_acquire(&state).is_some());
    }
}
