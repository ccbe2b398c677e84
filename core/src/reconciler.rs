//! Merges the three ways a chat message reaches the screen (optimistic local
//! echo, REST confirmation and socket broadcast) into one list.
//!
//! Every insertion of a server record goes through the `seen` set, and all
//! operations take `&mut self`, so a server id can never be inserted twice
//! regardless of whether the REST response or the socket event lands first.

use chat_api::{
    Attachment, ConversationId, MessageKind, SendMessageRequest, ServerMessage, UserId,
};
use std::collections::HashSet;
use tracing::{debug, trace};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    Me,
    Other,
}

/// A message as shown on the conversation screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Temporary id while sending, server id once confirmed.
    pub id: String,
    pub server_id: Option<String>,
    pub temp_id: Option<String>,
    /// Per-conversation insertion sequence, strictly increasing along the list.
    pub seq: u64,
    pub text: String,
    pub sender: Sender,
    pub time: i64,
    pub files: Vec<Attachment>,
    pub kind: MessageKind,
    pub is_sending: bool,
}

/// What an operation did to the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Appended,
    /// An optimistic entry was replaced in place by its server record.
    Confirmed,
    /// The server id was already present; nothing was added.
    Duplicate,
    /// A broadcast of our own message; the REST path owns it.
    OwnEcho,
    OtherConversation,
}

impl Outcome {
    pub fn changed(self) -> bool {
        matches!(self, Outcome::Appended | Outcome::Confirmed)
    }
}

pub struct Reconciler {
    conversation_id: ConversationId,
    me: UserId,
    messages: Vec<Message>,
    seen: HashSet<String>,
    next_seq: u64,
}

impl Reconciler {
    pub fn new(conversation_id: impl Into<ConversationId>, me: impl Into<UserId>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            me: me.into(),
            messages: Vec::new(),
            seen: HashSet::new(),
            next_seq: 1,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_sending).count()
    }

    pub fn find_by_server_id(&self, server_id: &str) -> Option<&Message> {
        self.messages
            .iter()
            .find(|m| m.server_id.as_deref() == Some(server_id))
    }

    fn bump(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn pending_position(&self, temp_id: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.is_sending && m.temp_id.as_deref() == Some(temp_id))
    }

    fn entry_from(&mut self, record: ServerMessage) -> Message {
        let seq = self.bump();
        let sender = if record.sender_id == self.me {
            Sender::Me
        } else {
            Sender::Other
        };
        Message {
            id: record.id.clone(),
            server_id: Some(record.id),
            temp_id: record.temp_id,
            seq,
            text: record.text,
            sender,
            time: record.created_at,
            files: record.files,
            kind: record.kind,
            is_sending: false,
        }
    }

    /// Append `record` unless its server id is already in the list.
    fn admit(&mut self, record: ServerMessage) -> Outcome {
        if !self.seen.insert(record.id.clone()) {
            trace!(id = %record.id, "dropping duplicate message");
            return Outcome::Duplicate;
        }
        let entry = self.entry_from(record);
        self.messages.push(entry);
        Outcome::Appended
    }

    /// Append an optimistic entry and return the request that sends it.
    pub fn begin_send(
        &mut self,
        text: impl Into<String>,
        files: Vec<Attachment>,
        kind: MessageKind,
        now: i64,
    ) -> SendMessageRequest {
        let text = text.into();
        let seq = self.bump();
        let temp_id = format!("tmp-{seq}-{}", Uuid::new_v4().simple());
        self.messages.push(Message {
            id: temp_id.clone(),
            server_id: None,
            temp_id: Some(temp_id.clone()),
            seq,
            text: text.clone(),
            sender: Sender::Me,
            time: now,
            files: files.clone(),
            kind,
            is_sending: true,
        });
        debug!(%temp_id, "optimistic message appended");
        SendMessageRequest {
            text,
            files,
            kind,
            temp_id,
        }
    }

    /// Replace the optimistic entry `temp_id` with the server record.
    pub fn confirm(&mut self, temp_id: &str, record: ServerMessage) -> Outcome {
        let pos = self.pending_position(temp_id);
        if self.seen.contains(&record.id) {
            if let Some(pos) = pos {
                self.messages.remove(pos);
            }
            return Outcome::Duplicate;
        }
        let Some(pos) = pos else {
            return self.admit(record);
        };
        self.seen.insert(record.id.clone());
        let entry = &mut self.messages[pos];
        entry.id = record.id.clone();
        entry.server_id = Some(record.id);
        entry.text = record.text;
        entry.time = record.created_at;
        entry.files = record.files;
        entry.kind = record.kind;
        entry.is_sending = false;
        debug!(%temp_id, server_id = %entry.id, "message confirmed");
        Outcome::Confirmed
    }

    /// Roll back a send that failed. Returns the removed entry.
    pub fn fail(&mut self, temp_id: &str) -> Option<Message> {
        let pos = self.pending_position(temp_id)?;
        debug!(%temp_id, "rolling back optimistic message");
        Some(self.messages.remove(pos))
    }

    /// Handle a `new_message` broadcast.
    pub fn apply_incoming(&mut self, record: ServerMessage) -> Outcome {
        if record.conversation_id != self.conversation_id {
            return Outcome::OtherConversation;
        }
        if record.sender_id == self.me {
            return Outcome::OwnEcho;
        }
        self.admit(record)
    }

    /// Handle a `message_sent` acknowledgement addressed to this client.
    pub fn apply_ack(&mut self, record: ServerMessage) -> Outcome {
        if record.conversation_id != self.conversation_id {
            return Outcome::OtherConversation;
        }
        match record.temp_id.clone() {
            Some(temp_id) => self.confirm(&temp_id, record),
            None => self.admit(record),
        }
    }

    /// Replace the confirmed part of the list with fetched history, oldest
    /// first by `created_at`; equal timestamps keep the server's order.
    /// Messages still being sent stay at the end.
    pub fn load_history(&mut self, mut records: Vec<ServerMessage>) {
        let pending: Vec<Message> = self.messages.drain(..).filter(|m| m.is_sending).collect();
        self.seen.clear();
        records.retain(|r| r.conversation_id == self.conversation_id);
        records.sort_by_key(|r| r.created_at);
        for record in records {
            self.admit(record);
        }
        for mut entry in pending {
            entry.seq = self.bump();
            self.messages.push(entry);
        }
    }
}
