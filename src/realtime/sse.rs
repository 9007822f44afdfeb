//! Service update event stream (server-sent events)
//!
//! One long-lived `text/event-stream` GET per subject. Every `message`
//! event carries a partial `ServiceUpdate` that is fanned out to all
//! registered listeners. Drops are retried forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use reqwest::header::ACCEPT;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_stream::StreamExt;
use url::Url;

use super::connection::{ConnectionMachine, ConnectionState, RetryPolicy};
use super::locked;
use crate::api::client::{check_response, ApiError};
use crate::api::ApiClient;
use crate::models::ServiceUpdate;

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental `text/event-stream` parser. Chunks may split lines (and
/// UTF-8 sequences) anywhere.
#[derive(Debug, Default)]
pub struct SseParser {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    last_id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every event completed by this chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..pos]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.line(line) {
                events.push(event);
            }
        }
        events
    }

    fn line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.last_id = Some(value.to_string()),
            "retry" => {}
            other => tracing::debug!("Ignoring SSE field {:?}", other),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "message".to_string()),
            data,
            id: self.last_id.clone(),
        })
    }
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    senders: HashMap<u64, mpsc::UnboundedSender<ServiceUpdate>>,
}

/// Fan-out registry shared by a feed and its listeners.
#[derive(Clone, Default)]
pub struct ListenerSet {
    inner: Arc<Mutex<Listeners>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> UpdateListener {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut listeners = locked(&self.inner);
            listeners.next_id += 1;
            let id = listeners.next_id;
            listeners.senders.insert(id, tx);
            id
        };
        UpdateListener {
            id,
            rx,
            set: self.clone(),
        }
    }

    /// Deliver to every live listener; returns how many received it.
    pub fn broadcast(&self, update: &ServiceUpdate) -> usize {
        let mut listeners = locked(&self.inner);
        listeners
            .senders
            .retain(|_, tx| tx.send(update.clone()).is_ok());
        listeners.senders.len()
    }

    fn remove(&self, id: u64) {
        locked(&self.inner).senders.remove(&id);
    }
}

/// A registered update callback. Release it with `unsubscribe`.
pub struct UpdateListener {
    id: u64,
    rx: mpsc::UnboundedReceiver<ServiceUpdate>,
    set: ListenerSet,
}

impl UpdateListener {
    pub async fn recv(&mut self) -> Option<ServiceUpdate> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {
        self.set.remove(self.id);
    }
}

/// What the service list controller needs from a push feed.
pub trait UpdateFeed: Send + Sync {
    /// Open the stream for `subject_id`. No-op while a stream is running.
    fn connect(&self, subject_id: &str);

    fn on_update(&self) -> UpdateListener;

    /// Close the stream; a later `connect` opens a fresh one.
    fn disconnect(&self);

    fn state(&self) -> ConnectionState;
}

/// `UpdateFeed` over `GET /slot-appointments/sse/{subjectId}`.
pub struct EventStreamClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    machine: Arc<Mutex<ConnectionMachine>>,
    listeners: ListenerSet,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventStreamClient {
    pub fn new(api: &ApiClient, policy: RetryPolicy) -> Self {
        Self {
            http: api.http().clone(),
            base_url: api.base_url().to_string(),
            token: api.token().to_string(),
            machine: Arc::new(Mutex::new(ConnectionMachine::new(policy))),
            listeners: ListenerSet::new(),
            task: Mutex::new(None),
        }
    }

    /// The subject id is escaped as one path segment.
    fn stream_url(&self, subject_id: &str) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(["slot-appointments", "sse", subject_id]);
        Ok(url)
    }
}

impl UpdateFeed for EventStreamClient {
    fn connect(&self, subject_id: &str) {
        let mut task = locked(&self.task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::debug!("Service update stream already running");
            return;
        }

        let url = match self.stream_url(subject_id) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!("Cannot build service update URL from {}: {}", self.base_url, e);
                return;
            }
        };
        locked(&self.machine).begin();
        let stream = StreamTask {
            http: self.http.clone(),
            url: url.to_string(),
            token: self.token.clone(),
            machine: Arc::clone(&self.machine),
            listeners: self.listeners.clone(),
        };
        *task = Some(tokio::spawn(stream.run()));
    }

    fn on_update(&self) -> UpdateListener {
        self.listeners.register()
    }

    fn disconnect(&self) {
        let task = locked(&self.task).take();
        if let Some(task) = task {
            task.abort();
            tracing::info!("Service update stream closed");
        }
        locked(&self.machine).on_disconnect();
    }

    fn state(&self) -> ConnectionState {
        locked(&self.machine).state()
    }
}

impl Drop for EventStreamClient {
    fn drop(&mut self) {
        if let Some(task) = locked(&self.task).take() {
            task.abort();
        }
    }
}

/// Everything the background stream task owns.
struct StreamTask {
    http: reqwest::Client,
    url: String,
    token: String,
    machine: Arc<Mutex<ConnectionMachine>>,
    listeners: ListenerSet,
}

impl StreamTask {
    async fn run(self) {
        loop {
            let reason = match self.open().await {
                Ok(()) => "stream ended".to_string(),
                Err(e) => e.to_string(),
            };

            let delay = locked(&self.machine).on_failure();
            let Some(delay) = delay else {
                return;
            };
            tracing::warn!(
                "Service update stream lost ({}). Reconnecting in {}s...",
                reason,
                delay.as_secs()
            );
            time::sleep(delay).await;
        }
    }

    async fn open(&self) -> Result<(), ApiError> {
        tracing::info!("Opening service update stream {}", self.url);
        let resp = self
            .http
            .get(&self.url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|source| ApiError::Http {
                url: self.url.clone(),
                source,
            })?;
        let resp = check_response(resp, &self.url).await?;
        locked(&self.machine).on_connected();

        let mut parser = SseParser::new();
        let body = resp.bytes_stream();
        tokio::pin!(body);
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|source| ApiError::Http {
                url: self.url.clone(),
                source,
            })?;
            for event in parser.feed(&chunk) {
                self.dispatch(event);
            }
        }
        Ok(())
    }

    fn dispatch(&self, event: SseEvent) {
        if event.event != "message" {
            tracing::debug!("Ignoring SSE event {:?}", event.event);
            return;
        }
        match serde_json::from_str::<ServiceUpdate>(&event.data) {
            Ok(update) => {
                let delivered = self.listeners.broadcast(&update);
                tracing::debug!("Service update {} -> {} listener(s)", update.id, delivered);
            }
            Err(e) => tracing::warn!("Skipping malformed service update: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceStatus;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_parser_handles_split_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: {\"id\":").is_empty());
        assert!(parser.feed(b" 1}\r").is_empty());
        let events = parser.feed(b"\n\r\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "message".into(),
                data: "{\"id\": 1}".into(),
                id: None,
            }]
        );
    }

    #[test]
    fn test_parser_fields_and_comments() {
        let mut parser = SseParser::new();
        let events = parser.feed(
            b": keep-alive\n\nevent: connected\ndata: ok\n\nid: 7\ndata: line one\ndata:line two\n\n",
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "connected");
        assert_eq!(events[0].data, "ok");
        assert_eq!(events[1].event, "message");
        assert_eq!(events[1].data, "line one\nline two");
        assert_eq!(events[1].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_parser_drops_event_without_data() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"event: ping\n\n").is_empty());
        // The event name does not leak into the next block.
        let events = parser.feed(b"data: x\n\n");
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn test_parser_utf8_split_across_chunks() {
        let mut parser = SseParser::new();
        let bytes = "data: Müller\n\n".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
        assert!(parser.feed(&bytes[..split]).is_empty());
        let events = parser.feed(&bytes[split..]);
        assert_eq!(events[0].data, "Müller");
    }

    #[tokio::test]
    async fn test_listener_set_fan_out_and_unsubscribe() {
        let set = ListenerSet::new();
        let mut a = set.register();
        let b = set.register();

        let update = ServiceUpdate {
            id: "5".into(),
            status: Some(ServiceStatus::Completed),
            ..Default::default()
        };
        assert_eq!(set.broadcast(&update), 2);
        assert_eq!(a.recv().await.unwrap().id, "5");

        b.unsubscribe();
        assert_eq!(set.broadcast(&update), 1);

        // Dropped listeners are pruned on the next broadcast.
        drop(a);
        assert_eq!(set.broadcast(&update), 0);
    }

    async fn read_request(tcp: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = tcp.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending a request");
            buf.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8_lossy(&buf).to_lowercase()
    }

    async fn respond(tcp: &mut TcpStream, events: &str) {
        tcp.write_all(
            b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncache-control: no-cache\r\n\r\n",
        )
        .await
        .unwrap();
        tcp.write_all(events.as_bytes()).await.unwrap();
        tcp.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_delivers_updates_and_reopens_after_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let api = ApiClient::new(&format!("http://{}/api", addr), "tok");
        let client = EventStreamClient::new(&api, RetryPolicy::unbounded(Duration::from_secs(3)));

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            let request = read_request(&mut first).await;
            assert!(request.starts_with("get /api/slot-appointments/sse/42 "));
            assert!(request.contains("authorization: bearer tok"));
            assert!(request.contains("accept: text/event-stream"));
            respond(
                &mut first,
                "event: connected\ndata: hi\n\n\
                 data: not json\n\n\
                 data: {\"id\": 3, \"status\": \"IN_PROGRESS\"}\n\n",
            )
            .await;

            let (mut second, _) = listener.accept().await.unwrap();
            read_request(&mut second).await;
            respond(&mut second, "data: {\"id\": \"3\", \"centerSlot\": \"Bay 2\"}\n\n").await;

            let _ = release_rx.await;
            drop(first);
        });

        let mut updates = client.on_update();
        client.connect("42");
        client.connect("42");

        let first = updates.recv().await.unwrap();
        assert_eq!(first.id, "3");
        assert_eq!(first.status, Some(ServiceStatus::InProgress));
        assert_eq!(client.state(), ConnectionState::Connected);

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.connect("42");
        let second = updates.recv().await.unwrap();
        assert_eq!(second.center_slot.as_deref(), Some("Bay 2"));
        assert_eq!(second.status, None);

        updates.unsubscribe();
        client.disconnect();
        let _ = release_tx.send(());
        server.await.unwrap();
    }

    #[test]
    fn test_stream_url_escapes_subject_as_path_segment() {
        let api = ApiClient::new("http://localhost:8080/api/", "tok");
        let client = EventStreamClient::new(&api, RetryPolicy::unbounded(Duration::from_secs(3)));

        let url = client.stream_url("42").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/slot-appointments/sse/42");

        let url = client.stream_url("a b/c?d").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/api/slot-appointments/sse/a%20b%2Fc%3Fd"
        );
    }

    #[tokio::test]
    async fn test_failed_open_schedules_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let api = ApiClient::new(&format!("http://{}/api", addr), "tok");
        let client = EventStreamClient::new(&api, RetryPolicy::unbounded(Duration::from_secs(3)));
        let mut states = locked(&client.machine).watch();

        let server = tokio::spawn(async move {
            let (mut tcp, _) = listener.accept().await.unwrap();
            read_request(&mut tcp).await;
            tcp.write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
        });

        client.connect("42");
        loop {
            states.changed().await.unwrap();
            if *states.borrow() == (ConnectionState::Reconnecting { attempt: 1 }) {
                break;
            }
        }

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        server.await.unwrap();
    }
}
