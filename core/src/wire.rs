use chat_api::{ClientEvent, ServerEvent};
use futures::{Sink, SinkExt};
use tokio_tungstenite::tungstenite::Message;

use crate::error::Result;

/// Encode a client event as a JSON text frame.
pub fn encode(event: &ClientEvent) -> Result<Message> {
    Ok(Message::Text(serde_json::to_string(event)?))
}

/// Decode a frame received from the server. Control and binary frames
/// carry no event and yield `None`.
pub fn decode(frame: &Message) -> Result<Option<ServerEvent>> {
    match frame {
        Message::Text(text) => Ok(Some(serde_json::from_str(text)?)),
        _ => Ok(None),
    }
}

/// Write a single event to the socket sink.
pub async fn write_event<S>(sink: &mut S, event: &ClientEvent) -> Result<()>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    sink.send(encode(event)?).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_api::RoomRef;

    #[test]
    fn ping_frames_are_skipped() {
        assert!(decode(&Message::Ping(vec![1])).unwrap().is_none());
    }

    #[test]
    fn garbage_text_is_an_error() {
        assert!(decode(&Message::Text("hello".into())).is_err());
    }

    #[test]
    fn leave_frame_text() {
        let frame = encode(&ClientEvent::LeaveConversation(RoomRef {
            conversation_id: "c1".into(),
        }))
        .unwrap();
        assert_eq!(
            frame.into_text().unwrap(),
            r#"{"event":"leave_conversation","data":{"conversationId":"c1"}}"#
        );
    }
}
