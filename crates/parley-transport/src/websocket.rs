//! WebSocket room channel.
//!
//! Connects to a Parley relay server with tokio-tungstenite and speaks the
//! framed room protocol: `connect` handshake, then `join`, `track`,
//! `broadcast` and `leave` against one room topic.

use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use parley_protocol::{codec, Frame, ParticipantId, Signal, PROTOCOL_VERSION};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::traits::{ChannelEvent, RoomChannel, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket channel configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Relay server endpoint, e.g. `ws://127.0.0.1:8080/ws`.
    pub url: String,
    /// How long to wait for the handshake and for request acknowledgments.
    pub request_timeout: Duration,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            request_timeout: Duration::from_secs(5),
            max_message_size: 64 * 1024, // 64 KB
        }
    }
}

/// A room channel backed by a WebSocket connection to the relay server.
pub struct WebSocketRoomChannel {
    config: WebSocketConfig,
    topic: String,
    local_id: ParticipantId,
    stream: Option<WsStream>,
    connection_id: Option<String>,
    read_buffer: BytesMut,
    next_request_id: u64,
    roster: Vec<ParticipantId>,
    /// Events that arrived while waiting for an acknowledgment.
    pending: VecDeque<ChannelEvent>,
}

impl WebSocketRoomChannel {
    /// Create an unconnected channel. Connecting happens in `subscribe`.
    #[must_use]
    pub fn new(config: WebSocketConfig, topic: impl Into<String>, local_id: ParticipantId) -> Self {
        Self {
            config,
            topic: topic.into(),
            local_id,
            stream: None,
            connection_id: None,
            read_buffer: BytesMut::with_capacity(4096),
            next_request_id: 1,
            roster: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    /// Server-assigned connection id, once connected.
    #[must_use]
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    fn allocate_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::ChannelClosed)?;
        let data = codec::encode(frame)?;
        stream
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Read the next frame. `Ok(None)` means the server closed the socket.
    async fn recv_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            if let Some(frame) = codec::decode_from(&mut self.read_buffer)? {
                return Ok(Some(frame));
            }

            let stream = self.stream.as_mut().ok_or(TransportError::ChannelClosed)?;
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    if data.len() > self.config.max_message_size {
                        warn!(
                            "Message too large: {} bytes (max: {})",
                            data.len(),
                            self.config.max_message_size
                        );
                        return Err(TransportError::Protocol(
                            parley_protocol::ProtocolError::FrameTooLarge(data.len()),
                        ));
                    }
                    self.read_buffer.extend_from_slice(&data);
                }
                Some(Ok(Message::Text(text))) => {
                    self.read_buffer.extend_from_slice(text.as_bytes());
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = stream.send(Message::Pong(data)).await {
                        warn!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | Some(Err(WsError::ConnectionClosed)) | None => {
                    debug!(room = %self.topic, "WebSocket closed by server");
                    self.stream = None;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!(room = %self.topic, "WebSocket error: {}", e);
                    self.stream = None;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    /// Turn a pushed frame into a channel event, answering pings on the way.
    async fn absorb(&mut self, frame: Frame) -> Option<ChannelEvent> {
        match frame {
            Frame::Presence { room, members } if room == self.topic => {
                self.roster = members.clone();
                Some(ChannelEvent::Presence(members))
            }
            Frame::Broadcast {
                room,
                event,
                source,
                payload,
                ..
            } if room == self.topic => {
                if source.as_ref() == Some(&self.local_id) {
                    return None;
                }
                ChannelEvent::from_broadcast(&event, &payload)
            }
            Frame::Ping { timestamp } => {
                if let Err(e) = self.send_frame(&Frame::pong(timestamp)).await {
                    warn!(room = %self.topic, error = %e, "Failed to answer ping");
                }
                None
            }
            Frame::Error { id, code, message } => {
                warn!(room = %self.topic, id, code, message = %message, "Server error");
                None
            }
            other => {
                debug!(room = %self.topic, frame_type = ?other.frame_type(), "Ignoring frame");
                None
            }
        }
    }

    /// Send a request and wait for its Ack, queueing events seen meanwhile.
    async fn request(&mut self, frame: Frame, what: &'static str) -> Result<(), TransportError> {
        let Some(id) = frame.request_id() else {
            return self.send_frame(&frame).await;
        };
        self.send_frame(&frame).await?;

        let timeout = self.config.request_timeout;
        tokio::time::timeout(timeout, self.await_ack(id))
            .await
            .map_err(|_| TransportError::Timeout(what))?
    }

    async fn await_ack(&mut self, id: u64) -> Result<(), TransportError> {
        loop {
            match self.recv_frame().await? {
                Some(Frame::Ack { id: acked }) if acked == id => return Ok(()),
                Some(Frame::Error {
                    id: failed,
                    code,
                    message,
                }) if failed == id => return Err(TransportError::Server { code, message }),
                Some(other) => {
                    if let Some(event) = self.absorb(other).await {
                        self.pending.push_back(event);
                    }
                }
                None => return Err(TransportError::ChannelClosed),
            }
        }
    }

    async fn await_connected(&mut self) -> Result<String, TransportError> {
        loop {
            match self.recv_frame().await? {
                Some(Frame::Connected {
                    connection_id,
                    version,
                    heartbeat,
                }) => {
                    info!(
                        connection = %connection_id,
                        version = %version,
                        heartbeat,
                        "Connected to relay"
                    );
                    return Ok(connection_id);
                }
                Some(Frame::Error { code, message, .. }) => {
                    return Err(TransportError::Server { code, message })
                }
                Some(_) => continue,
                None => return Err(TransportError::ChannelClosed),
            }
        }
    }

    async fn connect_and_join(&mut self) -> Result<(), TransportError> {
        let (stream, _) = connect_async(self.config.url.as_str())
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
        self.stream = Some(stream);
        self.send_frame(&Frame::connect(PROTOCOL_VERSION)).await?;

        let timeout = self.config.request_timeout;
        let connection_id = tokio::time::timeout(timeout, self.await_connected())
            .await
            .map_err(|_| TransportError::Timeout("connected"))??;
        self.connection_id = Some(connection_id);

        let id = self.allocate_request_id();
        let join = Frame::join(id, self.topic.clone(), self.local_id.clone());
        self.request(join, "join").await
    }
}

#[async_trait]
impl RoomChannel for WebSocketRoomChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    fn is_subscribed(&self) -> bool {
        self.stream.is_some()
    }

    async fn subscribe(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }

        if let Err(e) = self.connect_and_join().await {
            self.stream = None;
            self.read_buffer.clear();
            return Err(match e {
                TransportError::SubscribeFailed(_) => e,
                other => TransportError::SubscribeFailed(other.to_string()),
            });
        }

        debug!(room = %self.topic, participant = %self.local_id, "WebSocket channel subscribed");
        Ok(())
    }

    async fn track(&mut self, data: Option<serde_json::Value>) -> Result<(), TransportError> {
        if self.stream.is_none() {
            return Err(TransportError::NotSubscribed(self.topic.clone()));
        }
        let id = self.allocate_request_id();
        self.request(Frame::track(id, self.topic.clone(), data), "track")
            .await
    }

    async fn send(&mut self, signal: &Signal) -> Result<(), TransportError> {
        if self.stream.is_none() {
            return Err(TransportError::NotSubscribed(self.topic.clone()));
        }
        let frame = Frame::signal(self.topic.clone(), signal)?;
        self.send_frame(&frame).await
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }

        loop {
            match self.recv_frame().await {
                Ok(Some(frame)) => {
                    if let Some(event) = self.absorb(frame).await {
                        return Some(event);
                    }
                }
                Ok(None) => return None,
                Err(TransportError::ChannelClosed) => return None,
                Err(e) => {
                    warn!(room = %self.topic, error = %e, "Room channel receive failed");
                    self.read_buffer.clear();
                    if self.stream.is_none() {
                        return None;
                    }
                }
            }
        }
    }

    fn presence_state(&self) -> Vec<ParticipantId> {
        self.roster.clone()
    }

    async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        if self.stream.is_none() {
            return Ok(());
        }

        let id = self.allocate_request_id();
        let left = self.request(Frame::leave(id, self.topic.clone()), "leave").await;

        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                debug!(room = %self.topic, "Close after leave failed: {}", e);
            }
        }
        self.roster.clear();
        self.pending.clear();
        left
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.url, "ws://127.0.0.1:8080/ws");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.max_message_size, 64 * 1024);
    }

    #[tokio::test]
    async fn test_operations_before_subscribe() {
        let mut channel = WebSocketRoomChannel::new(
            WebSocketConfig::default(),
            "video-room-1",
            ParticipantId::from("alice"),
        );

        assert!(!channel.is_subscribed());
        assert!(matches!(
            channel.send(&Signal::Leave).await,
            Err(TransportError::NotSubscribed(_))
        ));
        assert!(channel.next_event().await.is_none());
        assert!(channel.unsubscribe().await.is_ok());
    }

    #[tokio::test]
    async fn test_subscribe_to_unreachable_server_fails() {
        let config = WebSocketConfig {
            // Port 9 (discard) is not a WebSocket server.
            url: "ws://127.0.0.1:9/ws".to_string(),
            request_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        let mut channel = WebSocketRoomChannel::new(config, "video-room-1", "alice".into());

        assert!(matches!(
            channel.subscribe().await,
            Err(TransportError::SubscribeFailed(_))
        ));
        assert!(!channel.is_subscribed());
    }
}
