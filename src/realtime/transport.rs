//! Chat transport: STOMP over WebSocket
//!
//! One shared connection per process. Room topics are subscribed
//! additively and survive reconnects; every subscription must be released
//! with `Subscription::unsubscribe`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, InvalidHeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::connection::{retry_loop, ConnectionMachine, ConnectionState, RetryPolicy};
use super::events::{
    ChatEvent, DecodeError, RoomTopic, JOIN_DESTINATION, MARK_READ_DESTINATION,
    SEND_DESTINATION, TYPING_DESTINATION,
};
use super::locked;
use super::stomp::{Command, Frame, FrameError};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Upper bound on waiting for queued frames to flush on disconnect.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("chat transport is not connected")]
    NotConnected,
    #[error("no bearer token; call connect() first")]
    MissingToken,
    #[error("STOMP handshake rejected: {0}")]
    Handshake(String),
    #[error("STOMP handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid Authorization header: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),
    #[error("bad STOMP frame: {0}")]
    Frame(#[from] FrameError),
}

pub type EventResult = Result<ChatEvent, DecodeError>;

type Release = Box<dyn FnOnce(&str) + Send + Sync>;

/// Live feed of one room topic.
pub struct Subscription {
    id: String,
    rx: mpsc::UnboundedReceiver<EventResult>,
    release: Option<Release>,
}

impl Subscription {
    pub fn new(
        id: String,
        rx: mpsc::UnboundedReceiver<EventResult>,
        release: impl FnOnce(&str) + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            rx,
            release: Some(Box::new(release)),
        }
    }

    /// Next decoded event; `None` once the subscription is gone.
    pub async fn recv(&mut self) -> Option<EventResult> {
        self.rx.recv().await
    }

    pub fn unsubscribe(mut self) {
        if let Some(release) = self.release.take() {
            release(&self.id);
        }
    }
}

/// What the chat controller needs from a message-broker connection.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Resolves once the broker acknowledges the session. On failure the
    /// transport keeps retrying in the background per its policy. A call
    /// made while an attempt or retry sequence is in flight shares its
    /// outcome.
    async fn connect(&self, token: &str) -> Result<(), TransportError>;

    /// Graceful close; idempotent.
    async fn disconnect(&self);

    fn state(&self) -> ConnectionState;

    fn watch_state(&self) -> watch::Receiver<ConnectionState>;

    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Register a room topic. Registered while offline, it is sent to the
    /// broker once a session exists.
    async fn subscribe(&self, room_id: &str, topic: RoomTopic) -> Subscription;

    async fn publish(
        &self,
        destination: &str,
        body: serde_json::Value,
    ) -> Result<(), TransportError>;

    async fn subscribe_to_chat(&self, room_id: &str) -> Subscription {
        self.subscribe(room_id, RoomTopic::Messages).await
    }

    async fn subscribe_to_typing(&self, room_id: &str) -> Subscription {
        self.subscribe(room_id, RoomTopic::Typing).await
    }

    async fn subscribe_to_read_receipts(&self, room_id: &str) -> Subscription {
        self.subscribe(room_id, RoomTopic::ReadReceipts).await
    }

    async fn subscribe_to_user_status(&self, room_id: &str) -> Subscription {
        self.subscribe(room_id, RoomTopic::Status).await
    }

    /// The only publish that fails when offline, so callers can fall back
    /// to REST.
    async fn send_message(&self, room_id: &str, text: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let body = serde_json::json!({ "chatRoomId": room_id, "message": text });
        self.publish(SEND_DESTINATION, body).await
    }

    async fn send_typing_indicator(&self, room_id: &str, is_typing: bool) {
        let body = serde_json::json!({ "chatRoomId": room_id, "isTyping": is_typing });
        self.publish_quietly(TYPING_DESTINATION, body).await
    }

    async fn mark_as_read(&self, room_id: &str) {
        let body = serde_json::json!({ "chatRoomId": room_id });
        self.publish_quietly(MARK_READ_DESTINATION, body).await
    }

    async fn join_chat_room(&self, room_id: &str) {
        let body = serde_json::json!({ "chatRoomId": room_id });
        self.publish_quietly(JOIN_DESTINATION, body).await
    }

    /// Fire-and-forget publish: logged, never returned.
    async fn publish_quietly(&self, destination: &str, body: serde_json::Value) {
        if !self.is_connected() {
            tracing::debug!("Not connected; dropping publish to {}", destination);
            return;
        }
        if let Err(e) = self.publish(destination, body).await {
            tracing::warn!("Publish to {} failed: {}", destination, e);
        }
    }
}

struct Route {
    room_id: String,
    topic: RoomTopic,
    tx: mpsc::UnboundedSender<EventResult>,
}

#[derive(Default)]
struct Tasks {
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

struct Inner {
    url: String,
    handshake_timeout: Duration,
    machine: Mutex<ConnectionMachine>,
    token: Mutex<Option<String>>,
    /// Writer queue of the live session, if any. Locked after `routes`.
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    routes: Mutex<HashMap<String, Route>>,
    tasks: Mutex<Tasks>,
}

impl Inner {
    fn dispatch(&self, frame: Frame) {
        match frame.command {
            Command::Message => {
                let Some(sub_id) = frame.get("subscription") else {
                    tracing::warn!("MESSAGE frame without subscription header");
                    return;
                };
                let routes = locked(&self.routes);
                let Some(route) = routes.get(sub_id) else {
                    tracing::debug!("MESSAGE for released subscription {}", sub_id);
                    return;
                };
                let event = ChatEvent::decode(route.topic, &frame.body);
                if let Err(ref e) = event {
                    tracing::warn!("Room {}: {}", route.room_id, e);
                }
                let _ = route.tx.send(event);
            }
            Command::Receipt => {
                tracing::debug!("Receipt {}", frame.get("receipt-id").unwrap_or("?"));
            }
            other => tracing::debug!("Ignoring {} frame", other),
        }
    }

    fn release(&self, id: &str) {
        let mut routes = locked(&self.routes);
        let Some(route) = routes.remove(id) else {
            return;
        };
        tracing::debug!("Unsubscribing {}", route.topic.destination(&route.room_id));
        if let Some(out) = locked(&self.outbound).as_ref() {
            let _ = out.send(Message::Text(Frame::unsubscribe(id).encode()));
        }
    }

    fn connection_lost(self: &Arc<Self>, reason: &str) {
        locked(&self.outbound).take();
        let delay = locked(&self.machine).on_failure();
        match delay {
            Some(delay) => {
                tracing::warn!(
                    "Chat transport lost ({}). Reconnecting in {}s...",
                    reason,
                    delay.as_secs()
                );
                self.schedule_reconnect(delay);
            }
            None => tracing::debug!("Chat transport closed ({})", reason),
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, delay: Duration) {
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let target = Arc::clone(&inner);
            retry_loop(&inner.machine, delay, move || establish(Arc::clone(&target))).await;
        });
        let previous = locked(&self.tasks).reconnect.replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

/// Open the socket, run the STOMP handshake and start the session tasks.
/// The socket open and handshake together are bounded by the handshake
/// timeout.
async fn establish(inner: Arc<Inner>) -> Result<(), TransportError> {
    let token = locked(&inner.token)
        .clone()
        .ok_or(TransportError::MissingToken)?;

    let mut request = inner.url.as_str().into_client_request()?;
    let host = request.uri().host().unwrap_or("localhost").to_string();
    request.headers_mut().insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", token))?,
    );

    tracing::info!("Connecting chat transport to {}", inner.url);
    let handshake = async {
        let (mut ws, response) = connect_async(request).await?;
        tracing::debug!("WebSocket upgraded (status={})", response.status());
        ws.send(Message::Text(Frame::connect(&host, &token).encode()))
            .await?;
        let connected = await_connected(&mut ws).await?;
        Ok::<_, TransportError>((ws, connected))
    };
    let (ws, connected) = time::timeout(inner.handshake_timeout, handshake)
        .await
        .map_err(|_| TransportError::HandshakeTimeout(inner.handshake_timeout))??;
    tracing::info!(
        "STOMP session established (version={})",
        connected.get("version").unwrap_or("1.0")
    );

    let (sink, stream) = ws.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    {
        let routes = locked(&inner.routes);
        for (id, route) in routes.iter() {
            let destination = route.topic.destination(&route.room_id);
            let _ = out_tx.send(Message::Text(Frame::subscribe(id, &destination).encode()));
        }
        *locked(&inner.outbound) = Some(out_tx.clone());
    }

    let writer = tokio::spawn(write_loop(sink, out_rx));
    let reader = tokio::spawn(read_loop(Arc::downgrade(&inner), stream, out_tx));
    let (old_reader, old_writer) = {
        let mut tasks = locked(&inner.tasks);
        (tasks.reader.replace(reader), tasks.writer.replace(writer))
    };
    for old in [old_reader, old_writer].into_iter().flatten() {
        old.abort();
    }

    locked(&inner.machine).on_connected();
    Ok(())
}

async fn await_connected(ws: &mut WsStream) -> Result<Frame, TransportError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => match Frame::decode(&text)? {
                Some(frame) if frame.command == Command::Connected => return Ok(frame),
                Some(frame) if frame.command == Command::Error => {
                    let reason = frame.get("message").unwrap_or(frame.body.as_str());
                    return Err(TransportError::Handshake(reason.to_string()));
                }
                Some(frame) => tracing::debug!("Ignoring {} before CONNECTED", frame.command),
                None => {}
            },
            Some(Ok(Message::Ping(data))) => ws.send(Message::Pong(data)).await?,
            Some(Ok(Message::Close(frame))) => {
                return Err(TransportError::Handshake(format!(
                    "socket closed during handshake: {:?}",
                    frame
                )));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(TransportError::Handshake(
                    "socket closed during handshake".to_string(),
                ))
            }
        }
    }
}

async fn write_loop(mut sink: SplitSink<WsStream, Message>, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = sink.send(msg).await {
            tracing::warn!("WebSocket send failed: {}", e);
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    inner: Weak<Inner>,
    mut stream: SplitStream<WsStream>,
    out: mpsc::UnboundedSender<Message>,
) {
    let reason = loop {
        let msg = match stream.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => break format!("receive error: {}", e),
            None => break "stream ended".to_string(),
        };
        let Some(strong) = inner.upgrade() else {
            return;
        };
        match msg {
            Message::Text(text) => match Frame::decode(&text) {
                Ok(Some(frame)) if frame.command == Command::Error => {
                    let detail = frame.get("message").unwrap_or(frame.body.as_str());
                    break format!("broker error: {}", detail);
                }
                Ok(Some(frame)) => strong.dispatch(frame),
                Ok(None) => {}
                Err(e) => tracing::warn!("Dropping undecodable frame: {}", e),
            },
            Message::Ping(data) => {
                let _ = out.send(Message::Pong(data));
            }
            Message::Close(frame) => break format!("closed by server: {:?}", frame),
            other => tracing::debug!("WS frame (ignored): {:?}", other),
        }
    };

    if let Some(strong) = inner.upgrade() {
        strong.connection_lost(&reason);
    }
}

/// `ChatTransport` over a real broker.
pub struct StompTransport {
    inner: Arc<Inner>,
}

impl StompTransport {
    /// Outcome of the attempt already in flight, automatic retries included.
    async fn join_attempt(&self) -> Result<(), TransportError> {
        tracing::debug!("Chat transport connect already in progress; joining it");
        let mut states = self.watch_state();
        let settled = |s: &ConnectionState| {
            !matches!(
                s,
                ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
            )
        };
        let outcome = match states.wait_for(settled).await {
            Ok(state) if state.is_connected() => Ok(()),
            _ => Err(TransportError::NotConnected),
        };
        outcome
    }

    pub fn new(url: &str, policy: RetryPolicy, handshake_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.to_string(),
                handshake_timeout,
                machine: Mutex::new(ConnectionMachine::new(policy)),
                token: Mutex::new(None),
                outbound: Mutex::new(None),
                routes: Mutex::new(HashMap::new()),
                tasks: Mutex::new(Tasks::default()),
            }),
        }
    }
}

#[async_trait]
impl ChatTransport for StompTransport {
    async fn connect(&self, token: &str) -> Result<(), TransportError> {
        *locked(&self.inner.token) = Some(token.to_string());
        let claimed = locked(&self.inner.machine).try_begin();
        match claimed {
            Ok(()) => {}
            Err(ConnectionState::Connected) => {
                tracing::debug!("Chat transport already connected");
                return Ok(());
            }
            Err(_) => return self.join_attempt().await,
        }
        let pending = locked(&self.inner.tasks).reconnect.take();
        if let Some(pending) = pending {
            pending.abort();
        }

        match establish(Arc::clone(&self.inner)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!("Chat transport connect failed: {}", e);
                let delay = locked(&self.inner.machine).on_failure();
                if let Some(delay) = delay {
                    self.inner.schedule_reconnect(delay);
                }
                Err(e)
            }
        }
    }

    async fn disconnect(&self) {
        let previous = locked(&self.inner.machine).on_disconnect();
        let (reader, writer, reconnect) = {
            let mut tasks = locked(&self.inner.tasks);
            (tasks.reader.take(), tasks.writer.take(), tasks.reconnect.take())
        };
        if let Some(reconnect) = reconnect {
            reconnect.abort();
        }

        let outbound = locked(&self.inner.outbound).take();
        if let Some(out) = outbound {
            let _ = out.send(Message::Text(Frame::disconnect().encode()));
            let _ = out.send(Message::Close(None));
        }
        if let Some(reader) = reader {
            reader.abort();
        }
        if let Some(writer) = writer {
            if time::timeout(FLUSH_TIMEOUT, writer).await.is_err() {
                tracing::debug!("Writer did not flush within {:?}", FLUSH_TIMEOUT);
            }
        }

        if previous == ConnectionState::Disconnected {
            tracing::debug!("Chat transport already disconnected");
        } else {
            tracing::info!("Chat transport disconnected");
        }
    }

    fn state(&self) -> ConnectionState {
        locked(&self.inner.machine).state()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        locked(&self.inner.machine).watch()
    }

    async fn subscribe(&self, room_id: &str, topic: RoomTopic) -> Subscription {
        let id = format!("sub-{}", uuid::Uuid::new_v4());
        let destination = topic.destination(room_id);
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut routes = locked(&self.inner.routes);
            routes.insert(
                id.clone(),
                Route {
                    room_id: room_id.to_string(),
                    topic,
                    tx,
                },
            );
            match locked(&self.inner.outbound).as_ref() {
                Some(out) => {
                    tracing::debug!("Subscribing {} as {}", destination, id);
                    let _ = out.send(Message::Text(Frame::subscribe(&id, &destination).encode()));
                }
                None => tracing::debug!("Offline; {} will be subscribed on connect", destination),
            }
        }

        let inner = Arc::downgrade(&self.inner);
        Subscription::new(id, rx, move |id| {
            if let Some(inner) = inner.upgrade() {
                inner.release(id);
            }
        })
    }

    async fn publish(
        &self,
        destination: &str,
        body: serde_json::Value,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let out = locked(&self.inner.outbound)
            .clone()
            .ok_or(TransportError::NotConnected)?;
        tracing::debug!("SEND {}", destination);
        out.send(Message::Text(Frame::send_json(destination, &body).encode()))
            .map_err(|_| TransportError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn next_frame(ws: &mut WebSocketStream<TcpStream>) -> Frame {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => {
                    if let Some(frame) = Frame::decode(&text).unwrap() {
                        return frame;
                    }
                }
                _ => continue,
            }
        }
    }

    async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let (tcp, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_async(tcp).await.unwrap()
    }

    fn transport_for(listener: &TcpListener) -> StompTransport {
        transport_with(listener, RetryPolicy::bounded(5, Duration::from_secs(3)))
    }

    fn transport_with(listener: &TcpListener, policy: RetryPolicy) -> StompTransport {
        let addr = listener.local_addr().unwrap();
        StompTransport::new(&format!("ws://{}/ws", addr), policy, Duration::from_secs(5))
    }

    /// Accept one socket and answer its CONNECT.
    async fn handshake(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let mut ws = accept(listener).await;
        let connect = next_frame(&mut ws).await;
        assert_eq!(connect.command, Command::Connect);
        ws.send(Message::Text(
            Frame::new(Command::Connected).header("version", "1.2").encode(),
        ))
        .await
        .unwrap();
        ws
    }

    #[tokio::test]
    async fn test_handshake_subscribe_and_publish() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let transport = transport_for(&listener);

        let broker = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let connect = next_frame(&mut ws).await;
            assert_eq!(connect.command, Command::Connect);
            assert_eq!(connect.get("Authorization"), Some("Bearer tok"));
            ws.send(Message::Text(
                Frame::new(Command::Connected).header("version", "1.2").encode(),
            ))
            .await
            .unwrap();

            let subscribe = next_frame(&mut ws).await;
            assert_eq!(subscribe.command, Command::Subscribe);
            assert_eq!(subscribe.get("destination"), Some("/topic/chat/4"));
            let sub_id = subscribe.get("id").unwrap().to_string();

            let body = r#"{"id":1,"chatRoomId":4,"senderId":2,"senderName":"Jane",
                           "message":"hi","sentAt":"2024-05-01T09:00:00"}"#;
            ws.send(Message::Text(
                Frame::new(Command::Message)
                    .header("subscription", sub_id)
                    .header("destination", "/topic/chat/4")
                    .body(body)
                    .encode(),
            ))
            .await
            .unwrap();

            let send = next_frame(&mut ws).await;
            assert_eq!(send.command, Command::Send);
            assert_eq!(send.get("destination"), Some(SEND_DESTINATION));
            let payload: serde_json::Value = serde_json::from_str(&send.body).unwrap();
            assert_eq!(payload["message"], "hello back");

            let unsubscribe = next_frame(&mut ws).await;
            assert_eq!(unsubscribe.command, Command::Unsubscribe);

            let disconnect = next_frame(&mut ws).await;
            assert_eq!(disconnect.command, Command::Disconnect);
        });

        transport.connect("tok").await.unwrap();
        assert!(transport.is_connected());

        let mut sub = transport.subscribe_to_chat("4").await;
        match sub.recv().await.unwrap().unwrap() {
            ChatEvent::Message(msg) => {
                assert_eq!(msg.id, "1");
                assert_eq!(msg.message, "hi");
            }
            other => panic!("unexpected event {:?}", other),
        }

        transport.send_message("4", "hello back").await.unwrap();
        sub.unsubscribe();
        transport.disconnect().await;
        assert_eq!(transport.state(), ConnectionState::Disconnected);

        broker.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_handshake_schedules_retry() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let transport = transport_for(&listener);

        let broker = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let _ = next_frame(&mut ws).await;
            ws.send(Message::Text(
                Frame::new(Command::Error)
                    .header("message", "bad token")
                    .encode(),
            ))
            .await
            .unwrap();
        });

        let err = transport.connect("expired").await.unwrap_err();
        assert!(matches!(err, TransportError::Handshake(ref m) if m == "bad token"));
        assert_eq!(
            transport.state(),
            ConnectionState::Reconnecting { attempt: 1 }
        );

        // Disconnect cancels the pending reconnect timer.
        transport.disconnect().await;
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let transport = transport_for(&listener);

        let broker = tokio::spawn(async move {
            let ws = handshake(&listener).await;
            let second = time::timeout(Duration::from_millis(300), listener.accept()).await;
            assert!(second.is_err(), "a second socket was opened");
            ws
        });

        let (first, second) = tokio::join!(transport.connect("tok"), transport.connect("tok"));
        first.unwrap();
        second.unwrap();
        assert!(transport.is_connected());

        let _ws = broker.await.unwrap();
        // Already connected: no new attempt.
        transport.connect("tok").await.unwrap();
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn test_subscriptions_survive_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let transport = transport_with(
            &listener,
            RetryPolicy::bounded(5, Duration::from_millis(50)),
        );

        let broker = tokio::spawn(async move {
            let mut ws = handshake(&listener).await;
            let subscribe = next_frame(&mut ws).await;
            assert_eq!(subscribe.command, Command::Subscribe);
            let sub_id = subscribe.get("id").unwrap().to_string();
            ws.close(None).await.unwrap();
            drop(ws);

            let mut ws = handshake(&listener).await;
            let resubscribe = next_frame(&mut ws).await;
            assert_eq!(resubscribe.command, Command::Subscribe);
            assert_eq!(resubscribe.get("id"), Some(sub_id.as_str()));
            assert_eq!(resubscribe.get("destination"), Some("/topic/chat/4"));

            let body = r#"{"id":7,"chatRoomId":4,"senderId":2,"senderName":"Jane",
                           "message":"back again","sentAt":"2024-05-01T09:05:00"}"#;
            ws.send(Message::Text(
                Frame::new(Command::Message)
                    .header("subscription", sub_id)
                    .header("destination", "/topic/chat/4")
                    .body(body)
                    .encode(),
            ))
            .await
            .unwrap();
            ws
        });

        transport.connect("tok").await.unwrap();
        let mut sub = transport.subscribe_to_chat("4").await;

        // The broker drops the first socket; the message only arrives on
        // the second one.
        let event = time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match event {
            ChatEvent::Message(msg) => assert_eq!(msg.message, "back again"),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(transport.is_connected());

        let _ws = broker.await.unwrap();
        sub.unsubscribe();
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn test_offline_publishes() {
        let transport = StompTransport::new(
            "ws://127.0.0.1:9/ws",
            RetryPolicy::bounded(5, Duration::from_secs(3)),
            Duration::from_secs(1),
        );
        assert!(matches!(
            transport.send_message("1", "hi").await,
            Err(TransportError::NotConnected)
        ));
        // Silent no-ops.
        transport.send_typing_indicator("1", true).await;
        transport.mark_as_read("1").await;
        transport.join_chat_room("1").await;
        // Idempotent.
        transport.disconnect().await;
        transport.disconnect().await;
    }
}
