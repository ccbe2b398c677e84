use chat_api::{Attachment, ConversationId, MessageKind, ServerEvent};
use std::{sync::Arc, time::Duration};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{
    api::ChatBackend,
    conversations::ConversationList,
    error::{ClientError, Result},
    events::{ChatEvent, EventBus, Subscription},
    polling::PollingFallback,
    reconciler::{Message, Reconciler},
    session::SharedSession,
    socket::{ConnectionState, SocketManager, SocketOptions},
};

#[derive(Debug, Clone)]
pub struct ScreenOptions {
    pub socket: SocketOptions,
    /// Conversation refresh interval while the socket is down.
    pub poll_interval: Duration,
}

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// A mounted chat screen: the conversation list plus, optionally, one open
/// conversation. Owns the socket and the polling fallback for its lifetime.
///
/// All list mutations happen through `&mut self`, so socket events, REST
/// confirmations and refreshes are applied one at a time.
pub struct ChatScreen {
    session: SharedSession,
    backend: Arc<dyn ChatBackend>,
    token: String,
    bus: EventBus<ChatEvent>,
    events: Subscription<ChatEvent>,
    socket: Option<SocketManager>,
    polling: Option<PollingFallback>,
    conversation: Option<Reconciler>,
    conversations: ConversationList,
}

impl ChatScreen {
    /// Mount the screen. Fails with [`ClientError::NotSignedIn`] when no
    /// session is stored; a rejected token clears the session.
    pub async fn open(
        session: SharedSession,
        backend: Arc<dyn ChatBackend>,
        options: ScreenOptions,
        conversation_id: Option<ConversationId>,
    ) -> Result<Self> {
        let (token, me) = {
            let guard = session.lock().await;
            match (guard.token(), guard.user()) {
                (Some(token), Some(user)) => (token.to_string(), user.id.clone()),
                _ => return Err(ClientError::NotSignedIn),
            }
        };

        let bus = EventBus::new();
        let events = bus.subscribe();
        // connect before loading so nothing sent in between is missed;
        // the reconciler drops whatever the history already holds
        let socket = SocketManager::spawn(
            options.socket,
            token.clone(),
            conversation_id.clone(),
            bus.clone(),
        );
        let polling = PollingFallback::spawn(
            backend.clone(),
            token.clone(),
            socket.watch_state(),
            options.poll_interval,
            bus.clone(),
        );

        let mut screen = Self {
            session,
            backend,
            token,
            bus,
            events,
            socket: Some(socket),
            polling: Some(polling),
            conversation: conversation_id.map(|id| Reconciler::new(id, me)),
            conversations: ConversationList::new(),
        };
        if let Err(e) = screen.refresh().await {
            screen.close().await;
            return Err(e);
        }
        info!(
            "chat screen opened ({} conversations)",
            screen.conversations.items().len()
        );
        Ok(screen)
    }

    /// Reload the conversation list and the open conversation's history.
    pub async fn refresh(&mut self) -> Result<()> {
        let list = self.backend.list_conversations(&self.token).await;
        let list = self.check(list).await?;
        self.conversations.replace(list);

        if let Some(conversation_id) = self.conversation_id() {
            let history = self
                .backend
                .list_messages(&self.token, &conversation_id)
                .await;
            let history = self.check(history).await?;
            if let Some(reconciler) = self.conversation.as_mut() {
                reconciler.load_history(history);
            }
        }
        Ok(())
    }

    /// Send a text message in the open conversation.
    pub async fn send(&mut self, text: &str) -> Result<Message> {
        self.send_with(text, Vec::new(), MessageKind::Text).await
    }

    /// Send a message with attachments. The message shows up immediately
    /// as sending and is replaced by the server record on success or
    /// removed on failure.
    pub async fn send_with(
        &mut self,
        text: &str,
        files: Vec<Attachment>,
        kind: MessageKind,
    ) -> Result<Message> {
        let text = text.trim();
        if text.is_empty() && files.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let reconciler = self
            .conversation
            .as_mut()
            .ok_or(ClientError::NoConversation)?;
        let req = reconciler.begin_send(text, files, kind, now_ms());
        let conversation_id = reconciler.conversation_id().to_string();

        let res = self
            .backend
            .send_message(&self.token, &conversation_id, &req)
            .await;

        let reconciler = self
            .conversation
            .as_mut()
            .ok_or(ClientError::NoConversation)?;
        match res {
            Ok(record) => {
                let id = record.id.clone();
                let outcome = reconciler.confirm(&req.temp_id, record);
                debug!("send {} confirmed as {id}: {outcome:?}", req.temp_id);
                reconciler
                    .find_by_server_id(&id)
                    .cloned()
                    .ok_or(ClientError::Unconfirmed(id))
            }
            Err(e) => {
                reconciler.fail(&req.temp_id);
                warn!("send in {conversation_id} failed: {e}");
                if e.is_unauthorized() {
                    self.expire().await;
                }
                Err(e)
            }
        }
    }

    /// Mark the open conversation as read on the backend and locally.
    pub async fn mark_read(&mut self) -> Result<()> {
        let conversation_id = self.conversation_id().ok_or(ClientError::NoConversation)?;
        let res = self.backend.mark_read(&self.token, &conversation_id).await;
        self.check(res).await?;
        self.conversations.mark_read(&conversation_id);
        Ok(())
    }

    /// The screen regained focus: re-join the room, restarting reconnects
    /// if they were exhausted.
    pub fn focus(&self) {
        if let Some(socket) = &self.socket {
            socket.rejoin();
        }
    }

    /// Wait for the next event and apply it. Returns `None` once the
    /// screen is closed.
    ///
    /// Not cancel-safe: applying may await. Inside `tokio::select!` use
    /// [`ChatScreen::recv_event`] and call [`ChatScreen::apply`] after the
    /// select.
    pub async fn next_event(&mut self) -> Option<ChatEvent> {
        let event = self.recv_event().await?;
        self.apply(&event).await;
        Some(event)
    }

    /// Receive the next event without applying it. Cancel-safe.
    pub async fn recv_event(&mut self) -> Option<ChatEvent> {
        self.events.recv().await
    }

    /// Apply one event. Returns whether the message list or the
    /// conversation list changed.
    pub async fn apply(&mut self, event: &ChatEvent) -> bool {
        match event {
            ChatEvent::Server(ServerEvent::NewMessage(record)) => {
                let Some(reconciler) = self.conversation.as_mut() else {
                    return false;
                };
                let outcome = reconciler.apply_incoming(record.clone());
                debug!("new_message {}: {outcome:?}", record.id);
                outcome.changed()
            }
            ChatEvent::Server(ServerEvent::MessageSent(record)) => {
                let Some(reconciler) = self.conversation.as_mut() else {
                    return false;
                };
                let outcome = reconciler.apply_ack(record.clone());
                debug!("message_sent {}: {outcome:?}", record.id);
                outcome.changed()
            }
            ChatEvent::Server(ServerEvent::ConversationUpdated(summary)) => {
                self.conversations.apply_update(summary.clone());
                true
            }
            ChatEvent::Server(ServerEvent::Error(err)) => {
                warn!("server error {}: {}", err.code, err.message);
                false
            }
            ChatEvent::ConversationsRefreshed(list) => {
                self.conversations.replace(list.clone());
                true
            }
            ChatEvent::SessionExpired => {
                self.clear_session().await;
                self.stop_background();
                false
            }
            ChatEvent::Connected
            | ChatEvent::Disconnected { .. }
            | ChatEvent::ReconnectScheduled { .. }
            | ChatEvent::ReconnectExhausted => false,
        }
    }

    pub fn messages(&self) -> &[Message] {
        self.conversation
            .as_ref()
            .map(Reconciler::messages)
            .unwrap_or(&[])
    }

    pub fn conversations(&self) -> &ConversationList {
        &self.conversations
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation
            .as_ref()
            .map(|r| r.conversation_id().to_string())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.socket
            .as_ref()
            .map(SocketManager::state)
            .unwrap_or(ConnectionState::Closed)
    }

    pub fn is_polling(&self) -> bool {
        self.polling
            .as_ref()
            .map(PollingFallback::is_active)
            .unwrap_or(false)
    }

    /// Unmount: leave the room, close the socket and stop polling.
    pub async fn close(mut self) {
        if let Some(polling) = self.polling.take() {
            polling.stop();
        }
        if let Some(socket) = self.socket.take() {
            socket.shutdown().await;
        }
        debug!("chat screen closed");
    }

    async fn check<T>(&mut self, res: Result<T>) -> Result<T> {
        if matches!(res, Err(ClientError::Unauthorized)) {
            self.expire().await;
        }
        res
    }

    async fn expire(&mut self) {
        warn!("access token rejected, signing out");
        self.clear_session().await;
        self.stop_background();
        self.bus.publish(ChatEvent::SessionExpired);
    }

    async fn clear_session(&self) {
        if let Err(e) = self.session.lock().await.clear().await {
            warn!("failed to clear session: {e}");
        }
    }

    fn stop_background(&mut self) {
        if let Some(polling) = self.polling.take() {
            polling.stop();
        }
        // dropping aborts the socket task
        self.socket.take();
    }
}
