use serde::{Deserialize, Serialize};

pub type ConversationId = String;
pub type MessageId = String;
pub type UserId = String;

/// Content type of a chat message, sent on the wire as `type`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    System,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
}

/// A message as persisted by the backend.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    /// Echo of the client's temporary id, present on messages the caller sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub files: Vec<Attachment>,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    /// Unix timestamp in milliseconds.
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub text: String,
    pub sender_id: UserId,
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub peer: Peer,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread_count: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: UserProfile,
}

/// Body of `POST /api/chat/conversations/{id}/messages`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<Attachment>,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    pub temp_id: String,
}

/// Error object carried by failed replies and socket `error` events.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

/// Envelope of every REST response body.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Reply<T> {
    Ok { data: T },
    Error { error: ApiError },
}

impl<T> Reply<T> {
    pub fn into_result(self) -> Result<T, ApiError> {
        match self {
            Reply::Ok { data } => Ok(data),
            Reply::Error { error } => Err(error),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub conversation_id: ConversationId,
}

/// Events the client emits on the socket.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinConversation(RoomRef),
    LeaveConversation(RoomRef),
}

/// Events the server pushes on the socket.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Broadcast to every member of the conversation room.
    NewMessage(ServerMessage),
    /// Acknowledgement sent only to the author, carrying its `tempId`.
    MessageSent(ServerMessage),
    ConversationUpdated(ConversationSummary),
    Error(ApiError),
}

impl ServerEvent {
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            ServerEvent::NewMessage(m) | ServerEvent::MessageSent(m) => Some(&m.conversation_id),
            ServerEvent::ConversationUpdated(c) => Some(&c.id),
            ServerEvent::Error(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_new_message_frame() {
        let frame = json!({
            "event": "new_message",
            "data": {
                "id": "m1",
                "conversationId": "c1",
                "senderId": "u2",
                "text": "Xe còn không bạn?",
                "createdAt": 1700000000000i64
            }
        });
        let ev: ServerEvent = serde_json::from_value(frame).unwrap();
        match ev {
            ServerEvent::NewMessage(m) => {
                assert_eq!(m.conversation_id, "c1");
                assert_eq!(m.kind, MessageKind::Text);
                assert!(m.temp_id.is_none());
                assert!(m.files.is_empty());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn join_event_wire_shape() {
        let ev = ClientEvent::JoinConversation(RoomRef {
            conversation_id: "c9".into(),
        });
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v, json!({"event":"join_conversation","data":{"conversationId":"c9"}}));
    }

    #[test]
    fn unknown_event_is_rejected() {
        let frame = json!({"event": "typing", "data": {}});
        assert!(serde_json::from_value::<ServerEvent>(frame).is_err());
    }

    #[test]
    fn reply_error_into_result() {
        let body = json!({"status":"error","error":{"code":"forbidden","message":"no"}});
        let reply: Reply<ServerMessage> = serde_json::from_value(body).unwrap();
        let err = reply.into_result().unwrap_err();
        assert_eq!(err.code, "forbidden");
    }

    #[test]
    fn reply_ok_carries_data() {
        let body = json!({"status":"ok","data":[{"id":"c1","peer":{"id":"u2","name":"Lan"}}]});
        let reply: Reply<Vec<ConversationSummary>> = serde_json::from_value(body).unwrap();
        let list = reply.into_result().unwrap();
        assert_eq!(list[0].unread_count, 0);
        assert!(list[0].last_message.is_none());
    }
}
