use chat_api::{ClientEvent, ConversationId, RoomRef};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::{
    error::{ClientError, Result},
    events::{ChatEvent, EventBus},
    wire,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state published by the socket task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    /// Reconnect attempts are used up; waiting for a focus regain.
    Exhausted,
    Closed,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    /// Lost or given up; the initial connect does not count as down.
    pub fn is_down(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Exhausted)
    }
}

#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub url: String,
    /// Reconnects tried after a failure before giving up.
    pub reconnect_attempts: u32,
    /// Fixed delay between reconnects.
    pub reconnect_delay: Duration,
}

enum Command {
    Join(ConversationId),
    Leave,
    Rejoin,
    Shutdown,
}

enum Exit {
    Lost(String),
    Shutdown,
}

/// Owns the one real-time connection of a screen.
pub struct SocketManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
}

impl SocketManager {
    /// Start connecting in the background. `room` is joined on every connect.
    pub fn spawn(
        options: SocketOptions,
        token: String,
        room: Option<ConversationId>,
        bus: EventBus<ChatEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let worker = Worker {
            options,
            token,
            room,
            bus,
            state: state_tx,
            commands: rx,
        };
        let task = tokio::spawn(worker.run());
        Self {
            commands: tx,
            state: state_rx,
            task: Some(task),
        }
    }

    /// Switch the active conversation, leaving the previous one.
    pub fn join(&self, conversation_id: impl Into<ConversationId>) {
        let _ = self.commands.send(Command::Join(conversation_id.into()));
    }

    pub fn leave(&self) {
        let _ = self.commands.send(Command::Leave);
    }

    /// Re-emit the join for the active conversation. After reconnects were
    /// exhausted this starts a fresh round of attempts.
    pub fn rejoin(&self) {
        let _ = self.commands.send(Command::Rejoin);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Leave the room, close the socket and stop reconnecting.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(mut task) = self.task.take() {
            if timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
    }
}

impl Drop for SocketManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn join_event(conversation_id: ConversationId) -> ClientEvent {
    ClientEvent::JoinConversation(RoomRef { conversation_id })
}

fn leave_event(conversation_id: ConversationId) -> ClientEvent {
    ClientEvent::LeaveConversation(RoomRef { conversation_id })
}

struct Worker {
    options: SocketOptions,
    token: String,
    room: Option<ConversationId>,
    bus: EventBus<ChatEvent>,
    state: watch::Sender<ConnectionState>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Worker {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn lost(&self, reason: String) {
        self.set_state(ConnectionState::Disconnected);
        self.bus.publish(ChatEvent::Disconnected { reason });
    }

    async fn run(mut self) {
        let mut failures = 0u32;
        loop {
            self.set_state(ConnectionState::Connecting);
            match self.connect().await {
                Ok(ws) => {
                    info!("socket connected to {}", self.options.url);
                    failures = 0;
                    self.set_state(ConnectionState::Connected);
                    self.bus.publish(ChatEvent::Connected);
                    match self.drive(ws).await {
                        Exit::Shutdown => break,
                        Exit::Lost(reason) => {
                            warn!("socket disconnected: {reason}");
                            self.lost(reason);
                        }
                    }
                }
                Err(e) => {
                    warn!("socket connect failed: {e}");
                    self.lost(e.to_string());
                }
            }

            failures += 1;
            if failures > self.options.reconnect_attempts {
                warn!("giving up after {} reconnect attempts", self.options.reconnect_attempts);
                self.set_state(ConnectionState::Exhausted);
                self.bus.publish(ChatEvent::ReconnectExhausted);
                if !self.idle_until_rejoin().await {
                    break;
                }
                failures = 0;
                continue;
            }
            let delay = self.options.reconnect_delay;
            self.bus.publish(ChatEvent::ReconnectScheduled {
                attempt: failures,
                delay,
            });
            if !self.wait(delay).await {
                break;
            }
        }
        self.set_state(ConnectionState::Closed);
        debug!("socket task finished");
    }

    async fn connect(&self) -> Result<WsStream> {
        let mut req = self.options.url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|_| ClientError::Unauthorized)?;
        req.headers_mut().insert(AUTHORIZATION, bearer);
        let (ws, _resp) = timeout(CONNECT_TIMEOUT, connect_async(req))
            .await
            .map_err(|_| {
                ClientError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "socket connect timed out",
                ))
            })??;
        Ok(ws)
    }

    fn apply_room_command(&mut self, cmd: Command) -> Option<Vec<ClientEvent>> {
        match cmd {
            Command::Join(id) => {
                let mut out = Vec::new();
                match self.room.replace(id.clone()) {
                    Some(prev) if prev != id => out.push(leave_event(prev)),
                    _ => {}
                }
                out.push(join_event(id));
                Some(out)
            }
            Command::Leave => Some(self.room.take().map(leave_event).into_iter().collect()),
            Command::Rejoin => Some(self.room.clone().map(join_event).into_iter().collect()),
            Command::Shutdown => None,
        }
    }

    async fn drive(&mut self, ws: WsStream) -> Exit {
        let (mut sink, mut stream) = ws.split();
        if let Some(room) = self.room.clone() {
            debug!("joining conversation {room}");
            if let Err(e) = wire::write_event(&mut sink, &join_event(room)).await {
                return Exit::Lost(e.to_string());
            }
        }
        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Close(_))) | None => {
                        return Exit::Lost("closed by server".into());
                    }
                    Some(Ok(msg)) => match wire::decode(&msg) {
                        Ok(Some(event)) => self.bus.publish(ChatEvent::Server(event)),
                        Ok(None) => {}
                        Err(e) => warn!("dropping undecodable frame: {e}"),
                    },
                    Some(Err(e)) => return Exit::Lost(e.to_string()),
                },
                cmd = self.commands.recv() => {
                    let outgoing = match cmd.and_then(|c| self.apply_room_command(c)) {
                        Some(events) => events,
                        None => {
                            if let Some(room) = self.room.take() {
                                let _ = wire::write_event(&mut sink, &leave_event(room)).await;
                            }
                            let _ = sink.close().await;
                            return Exit::Shutdown;
                        }
                    };
                    for event in &outgoing {
                        if let Err(e) = wire::write_event(&mut sink, event).await {
                            return Exit::Lost(e.to_string());
                        }
                    }
                }
            }
        }
    }

    /// Sleep out the full reconnect delay while still honouring commands.
    /// A rejoin here only refreshes the room; the next connect joins it.
    /// Returns false when the manager shut down.
    async fn wait(&mut self, delay: Duration) -> bool {
        let timer = sleep(delay);
        tokio::pin!(timer);
        loop {
            tokio::select! {
                _ = &mut timer => return true,
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => return false,
                    Some(other) => {
                        self.apply_room_command(other);
                    }
                },
            }
        }
    }

    async fn idle_until_rejoin(&mut self) -> bool {
        loop {
            match self.commands.recv().await {
                Some(Command::Rejoin) => return true,
                Some(Command::Shutdown) | None => return false,
                Some(other) => {
                    self.apply_room_command(other);
                }
            }
        }
    }
}
