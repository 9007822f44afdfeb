//! Chat session controller
//!
//! Owns the state of one open chat room: history plus live updates from
//! the transport, typing and presence of the other participant, and the
//! dual send path (live publish when connected, REST otherwise).
//!
//! Lifecycle: `Unloaded -> Loading -> Loaded { live } -> Unmounted`, with
//! `NoChatRoom` and `Failed` as terminal setup outcomes.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::api::{ApiError, ChatApi};
use crate::auth::Session;
use crate::models::{ChatMessage, ChatRoom, PresenceStatus, Viewer};
use crate::realtime::transport::EventResult;
use crate::realtime::{ChatEvent, ChatTransport, ConnectionState, Subscription, TransportError};

/// How long a remote typing signal stays visible.
pub const TYPING_VISIBLE: Duration = Duration::from_secs(3);
/// Input idle time before "stopped typing" is published.
pub const TYPING_IDLE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Unloaded,
    Loading,
    /// History is in state; `live` tracks whether the transport is usable.
    Loaded { live: bool },
    /// No room exists for the appointment yet. Terminal.
    NoChatRoom,
    Failed(String),
    Unmounted,
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("No chat room yet. A room opens once an employee is assigned to the appointment.")]
    NoChatRoom,
    #[error("Failed to load chat: {0}")]
    Load(#[source] ApiError),
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("message is empty")]
    Empty,
    #[error("chat is not loaded")]
    NotLoaded,
    #[error("Failed to send message: {0}")]
    Rest(#[from] ApiError),
}

/// Which outbound path a message took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageId {
    /// Accepted by REST; the id is the server's.
    Server(String),
    /// Published live; the server id arrives with the echo.
    Local(String),
}

impl MessageId {
    pub fn as_str(&self) -> &str {
        match self {
            MessageId::Server(id) | MessageId::Local(id) => id,
        }
    }
}

/// What the list shows between a live publish and its echo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SendPolicy {
    /// Nothing until the echo arrives.
    #[default]
    AwaitEcho,
    /// A pending entry that the echo replaces.
    Optimistic,
}

/// Requests from the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// A keystroke in the compose box.
    Input,
    Send(String),
    DismissError,
    Close,
}

/// Render snapshot published after every state change.
#[derive(Debug, Clone, Default)]
pub struct ChatView {
    pub phase: Phase,
    pub title: String,
    pub counterpart: String,
    pub messages: Vec<ChatMessage>,
    pub connection: ConnectionState,
    /// Name of the other participant while their typing signal is fresh.
    pub typing: Option<String>,
    pub other_online: bool,
    pub error: Option<String>,
}

/// The four room subscriptions, held while the room is live.
struct RoomFeeds {
    messages: Subscription,
    typing: Subscription,
    read: Subscription,
    status: Subscription,
}

impl RoomFeeds {
    async fn attach(transport: &dyn ChatTransport, room_id: &str) -> Self {
        Self {
            messages: transport.subscribe_to_chat(room_id).await,
            typing: transport.subscribe_to_typing(room_id).await,
            read: transport.subscribe_to_read_receipts(room_id).await,
            status: transport.subscribe_to_user_status(room_id).await,
        }
    }

    async fn next(&mut self) -> Option<EventResult> {
        tokio::select! {
            Some(event) = self.messages.recv() => Some(event),
            Some(event) = self.typing.recv() => Some(event),
            Some(event) = self.read.recv() => Some(event),
            Some(event) = self.status.recv() => Some(event),
            else => None,
        }
    }

    fn unsubscribe(self) {
        self.messages.unsubscribe();
        self.typing.unsubscribe();
        self.read.unsubscribe();
        self.status.unsubscribe();
    }
}

async fn next_event(feeds: &mut Option<RoomFeeds>) -> Option<EventResult> {
    match feeds {
        Some(feeds) => feeds.next().await,
        None => std::future::pending().await,
    }
}

/// Handshake still running after the room loaded.
type ConnectTask = JoinHandle<Result<(), TransportError>>;

async fn join_connect(task: &mut Option<ConnectTask>) -> Option<Result<(), TransportError>> {
    let Some(handle) = task.as_mut() else {
        return std::future::pending().await;
    };
    let outcome = handle.await;
    *task = None;
    match outcome {
        Ok(result) => Some(result),
        Err(e) => {
            tracing::debug!("Transport connect task ended: {}", e);
            None
        }
    }
}

fn log_connect(result: Result<(), TransportError>) {
    if let Err(e) = result {
        tracing::warn!("Chat transport unavailable, sends will use REST: {}", e);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Room lookup, history, then a best-effort mark-read.
async fn load_room(
    api: &dyn ChatApi,
    appointment_id: &str,
    viewer: &Viewer,
) -> Result<(ChatRoom, Vec<ChatMessage>), SetupError> {
    let room = api
        .chat_room_for_appointment(appointment_id)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                SetupError::NoChatRoom
            } else {
                SetupError::Load(e)
            }
        })?;

    let history = api.messages(&room.id).await.map_err(SetupError::Load)?;
    let history = history
        .into_iter()
        .map(|m| m.for_viewer(&viewer.id))
        .collect();

    if let Err(e) = api.mark_read(&room.id).await {
        tracing::warn!("Failed to mark room {} read: {}", room.id, e);
    }
    Ok((room, history))
}

pub struct ChatSession {
    api: Arc<dyn ChatApi>,
    transport: Arc<dyn ChatTransport>,
    viewer: Viewer,
    token: String,
    appointment_id: String,
    policy: SendPolicy,

    phase: Phase,
    room: Option<ChatRoom>,
    messages: Vec<ChatMessage>,
    connection: ConnectionState,
    feeds: Option<RoomFeeds>,
    connecting: Option<ConnectTask>,
    joined: bool,
    other_typing: Option<(String, Instant)>,
    other_online: bool,
    error: Option<String>,
    typing_stop_at: Option<Instant>,
}

impl ChatSession {
    pub fn new(
        api: Arc<dyn ChatApi>,
        transport: Arc<dyn ChatTransport>,
        session: &Session,
        appointment_id: &str,
    ) -> Self {
        Self {
            api,
            transport,
            viewer: session.viewer.clone(),
            token: session.token.clone(),
            appointment_id: appointment_id.to_string(),
            policy: SendPolicy::default(),
            phase: Phase::Unloaded,
            room: None,
            messages: Vec::new(),
            connection: ConnectionState::Disconnected,
            feeds: None,
            connecting: None,
            joined: false,
            other_typing: None,
            other_online: false,
            error: None,
            typing_stop_at: None,
        }
    }

    pub fn with_send_policy(mut self, policy: SendPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_live(&self) -> bool {
        matches!(self.phase, Phase::Loaded { live: true })
    }

    fn room_id(&self) -> Option<String> {
        self.room.as_ref().map(|r| r.id.clone())
    }

    /// Load the room while the transport connects. The room never waits on
    /// the handshake: a connect still pending afterwards moves to a task
    /// and `run` picks up the state change. Live wiring happens only after
    /// history is in state.
    pub async fn mount(&mut self) -> Result<(), SetupError> {
        if self.phase != Phase::Unloaded {
            tracing::debug!("Chat session already mounted ({:?})", self.phase);
            return Ok(());
        }
        self.phase = Phase::Loading;
        tracing::info!("Opening chat for appointment {}", self.appointment_id);

        let transport = Arc::clone(&self.transport);
        let token = self.token.clone();
        let mut connect = Box::pin(async move { transport.connect(&token).await });
        let mut connect_pending = true;

        let loaded = {
            let load = load_room(self.api.as_ref(), &self.appointment_id, &self.viewer);
            tokio::pin!(load);
            loop {
                tokio::select! {
                    biased;
                    result = &mut connect, if connect_pending => {
                        connect_pending = false;
                        log_connect(result);
                    }
                    loaded = &mut load => break loaded,
                }
            }
        };
        if connect_pending {
            tracing::debug!("Room loaded before the transport handshake finished");
            self.connecting = Some(tokio::spawn(connect));
        }

        let (room, history) = match loaded {
            Ok(loaded) => loaded,
            Err(SetupError::NoChatRoom) => {
                tracing::info!("No chat room for appointment {}", self.appointment_id);
                self.phase = Phase::NoChatRoom;
                self.release_transport().await;
                return Err(SetupError::NoChatRoom);
            }
            Err(e) => {
                tracing::error!("{}", e);
                self.phase = Phase::Failed(e.to_string());
                self.release_transport().await;
                return Err(e);
            }
        };

        tracing::info!("Loaded {} message(s) for room {}", history.len(), room.id);
        self.room = Some(room);
        self.messages = history;
        self.connection = self.transport.state();
        let live = self.connection.is_connected();
        self.phase = Phase::Loaded { live };
        if live {
            self.go_live().await;
        }
        Ok(())
    }

    /// Stop a pending connect and close the transport.
    async fn release_transport(&mut self) {
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        self.transport.disconnect().await;
    }

    /// Attach room subscriptions (once) and join the room (once per session).
    async fn go_live(&mut self) {
        let Some(room_id) = self.room_id() else {
            return;
        };
        if self.feeds.is_none() {
            self.feeds = Some(RoomFeeds::attach(self.transport.as_ref(), &room_id).await);
        }
        if !self.joined {
            self.transport.join_chat_room(&room_id).await;
            self.joined = true;
        }
    }

    pub async fn on_transport_state(&mut self, state: ConnectionState) {
        self.connection = state;
        let Phase::Loaded { live } = self.phase else {
            return;
        };
        let now_live = state.is_connected();
        if now_live == live {
            return;
        }

        self.phase = Phase::Loaded { live: now_live };
        if now_live {
            tracing::info!("Chat is live");
            self.go_live().await;
        } else {
            tracing::info!("Chat transport {}; sends fall back to REST", state);
            self.joined = false;
        }
    }

    async fn handle_result(&mut self, event: EventResult) {
        match event {
            Ok(event) => self.handle_event(event).await,
            Err(e) => tracing::debug!("Dropped room event: {}", e),
        }
    }

    pub async fn handle_event(&mut self, event: ChatEvent) {
        let Some(room_id) = self.room_id() else {
            tracing::debug!("Event before room load ignored");
            return;
        };

        match event {
            ChatEvent::Message(msg) => {
                let msg = msg.for_viewer(&self.viewer.id);
                if self.messages.iter().any(|m| m.id == msg.id) {
                    tracing::debug!("Duplicate message {} ignored", msg.id);
                    return;
                }
                if msg.is_own {
                    let placeholder = self
                        .messages
                        .iter()
                        .position(|m| m.pending && m.message == msg.message);
                    if let Some(pos) = placeholder {
                        self.messages[pos] = msg;
                        return;
                    }
                }

                let from_other = !msg.is_own;
                self.messages.push(msg);
                if from_other {
                    self.transport.mark_as_read(&room_id).await;
                }
            }
            ChatEvent::Typing(t) => {
                if self
                    .viewer
                    .is_subject(t.user_id.as_deref(), t.user_name.as_deref())
                {
                    return;
                }
                if t.is_typing {
                    // Repeats keep the first deadline; only an expired flag restarts it.
                    let now = Instant::now();
                    let until = match &self.other_typing {
                        Some((_, until)) if *until > now => *until,
                        _ => now + TYPING_VISIBLE,
                    };
                    let name = t.user_name.unwrap_or_else(|| "Someone".to_string());
                    self.other_typing = Some((name, until));
                } else {
                    self.other_typing = None;
                }
            }
            ChatEvent::ReadReceipt(r) => {
                if r.user_id.as_deref() == Some(self.viewer.id.as_str()) {
                    return;
                }
                for m in self.messages.iter_mut().filter(|m| m.is_own) {
                    m.is_read = true;
                }
            }
            ChatEvent::Status(s) => {
                if s.user_id == self.viewer.id {
                    return;
                }
                self.other_online = s.status == PresenceStatus::Online;
            }
        }
    }

    /// Send through the live transport, falling back to REST.
    pub async fn send(&mut self, text: &str) -> Result<MessageId, SendError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SendError::Empty);
        }
        let Some(room_id) = self.room_id() else {
            return Err(SendError::NotLoaded);
        };
        self.typing_stop_at = None;

        if self.is_live() {
            match self.transport.send_message(&room_id, text).await {
                Ok(()) => {
                    let local_id = format!("local-{}", uuid::Uuid::new_v4());
                    if self.policy == SendPolicy::Optimistic {
                        self.messages.push(ChatMessage {
                            id: local_id.clone(),
                            chat_room_id: room_id,
                            sender_id: self.viewer.id.clone(),
                            sender_name: self.viewer.name.clone(),
                            message: text.to_string(),
                            sent_at: chrono::Utc::now(),
                            is_read: false,
                            is_own: true,
                            pending: true,
                        });
                    }
                    return Ok(MessageId::Local(local_id));
                }
                Err(e) => tracing::warn!("Live send failed, using REST: {}", e),
            }
        }

        match self.api.send_message(&room_id, text).await {
            Ok(receipt) => {
                if !self.messages.iter().any(|m| m.id == receipt.message_id) {
                    self.messages.push(ChatMessage {
                        id: receipt.message_id.clone(),
                        chat_room_id: room_id,
                        sender_id: self.viewer.id.clone(),
                        sender_name: self.viewer.name.clone(),
                        message: text.to_string(),
                        sent_at: receipt.sent_at,
                        is_read: false,
                        is_own: true,
                        pending: false,
                    });
                }
                Ok(MessageId::Server(receipt.message_id))
            }
            Err(e) => {
                let err = SendError::Rest(e);
                tracing::warn!("{}", err);
                self.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// A compose keystroke: publish "typing" and restart the idle timer.
    pub async fn on_input(&mut self) {
        let Some(room_id) = self.room_id() else {
            return;
        };
        self.transport.send_typing_indicator(&room_id, true).await;
        self.typing_stop_at = Some(Instant::now() + TYPING_IDLE);
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    /// Earliest pending timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        let typing = self.other_typing.as_ref().map(|(_, until)| *until);
        match (typing, self.typing_stop_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fire every timer due at `now`.
    pub async fn poll_timers(&mut self, now: Instant) {
        if self
            .other_typing
            .as_ref()
            .is_some_and(|(_, until)| now >= *until)
        {
            self.other_typing = None;
        }
        if self.typing_stop_at.is_some_and(|at| now >= at) {
            self.typing_stop_at = None;
            if let Some(room_id) = self.room_id() {
                self.transport.send_typing_indicator(&room_id, false).await;
            }
        }
    }

    pub fn view(&self) -> ChatView {
        let now = Instant::now();
        let (title, counterpart) = match &self.room {
            Some(room) => (
                room.title(),
                room.counterpart_name(&self.viewer.id).to_string(),
            ),
            None => (format!("Appointment #{}", self.appointment_id), String::new()),
        };
        ChatView {
            phase: self.phase.clone(),
            title,
            counterpart,
            messages: self.messages.clone(),
            connection: self.connection,
            typing: self
                .other_typing
                .as_ref()
                .filter(|(_, until)| now < *until)
                .map(|(name, _)| name.clone()),
            other_online: self.other_online,
            error: self.error.clone(),
        }
    }

    /// Drive the session until the view closes, then tear down.
    pub async fn run(
        &mut self,
        mut commands: mpsc::UnboundedReceiver<ChatCommand>,
        view: watch::Sender<ChatView>,
    ) {
        let mut states = self.transport.watch_state();
        let current = *states.borrow_and_update();
        self.on_transport_state(current).await;
        view.send_replace(self.view());

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(ChatCommand::Input) => self.on_input().await,
                    Some(ChatCommand::Send(text)) => match self.send(&text).await {
                        Ok(id) => tracing::debug!("Message {} handed off", id.as_str()),
                        Err(e) => tracing::debug!("Send not delivered: {}", e),
                    },
                    Some(ChatCommand::DismissError) => self.dismiss_error(),
                    Some(ChatCommand::Close) | None => break,
                },
                Some(event) = next_event(&mut self.feeds) => self.handle_result(event).await,
                Some(result) = join_connect(&mut self.connecting) => log_connect(result),
                Ok(()) = states.changed() => {
                    let state = *states.borrow_and_update();
                    self.on_transport_state(state).await;
                }
                _ = sleep_until(deadline) => self.poll_timers(Instant::now()).await,
            }
            view.send_replace(self.view());
        }

        self.unmount().await;
        view.send_replace(self.view());
    }

    /// Release subscriptions, clear timers and close the transport.
    pub async fn unmount(&mut self) {
        if self.phase == Phase::Unmounted {
            return;
        }
        if let Some(feeds) = self.feeds.take() {
            feeds.unsubscribe();
        }
        self.typing_stop_at = None;
        self.other_typing = None;
        self.joined = false;
        self.release_transport().await;
        self.phase = Phase::Unmounted;
        tracing::info!("Chat for appointment {} closed", self.appointment_id);
    }
}
