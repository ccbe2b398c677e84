use async_trait::async_trait;
use chat_api::{
    ConversationSummary, LoginRequest, LoginResponse, Reply, SendMessageRequest, ServerMessage,
    UserProfile,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{ClientError, Result};

/// REST operations the chat screens depend on.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn list_conversations(&self, token: &str) -> Result<Vec<ConversationSummary>>;

    async fn list_messages(&self, token: &str, conversation_id: &str)
        -> Result<Vec<ServerMessage>>;

    async fn send_message(
        &self,
        token: &str,
        conversation_id: &str,
        req: &SendMessageRequest,
    ) -> Result<ServerMessage>;

    async fn mark_read(&self, token: &str, conversation_id: &str) -> Result<()>;
}

/// [`ChatBackend`] talking to the marketplace HTTP API.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(base: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ClientError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    /// `POST /api/auth/login`
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let body = LoginRequest {
            email: email.into(),
            password: password.into(),
        };
        let resp = self
            .client
            .post(self.endpoint(&["api", "auth", "login"])?)
            .json(&body)
            .send()
            .await?;
        read_reply(resp).await
    }

    /// `GET /api/profile`
    pub async fn profile(&self, token: &str) -> Result<UserProfile> {
        let resp = self
            .client
            .get(self.endpoint(&["api", "profile"])?)
            .bearer_auth(token)
            .send()
            .await?;
        read_reply(resp).await
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn list_conversations(&self, token: &str) -> Result<Vec<ConversationSummary>> {
        let resp = self
            .client
            .get(self.endpoint(&["api", "chat", "conversations"])?)
            .bearer_auth(token)
            .send()
            .await?;
        read_reply(resp).await
    }

    async fn list_messages(
        &self,
        token: &str,
        conversation_id: &str,
    ) -> Result<Vec<ServerMessage>> {
        let resp = self
            .client
            .get(self.endpoint(&["api", "chat", "conversations", conversation_id, "messages"])?)
            .bearer_auth(token)
            .send()
            .await?;
        read_reply(resp).await
    }

    async fn send_message(
        &self,
        token: &str,
        conversation_id: &str,
        req: &SendMessageRequest,
    ) -> Result<ServerMessage> {
        debug!(temp_id = %req.temp_id, "posting message to {conversation_id}");
        let resp = self
            .client
            .post(self.endpoint(&["api", "chat", "conversations", conversation_id, "messages"])?)
            .bearer_auth(token)
            .json(req)
            .send()
            .await?;
        read_reply(resp).await
    }

    async fn mark_read(&self, token: &str, conversation_id: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.endpoint(&["api", "chat", "conversations", conversation_id, "read"])?)
            .bearer_auth(token)
            .send()
            .await?;
        read_reply::<serde_json::Value>(resp).await.map(|_| ())
    }
}

/// Decode a tagged reply. 401 wins over whatever the body says; a body that
/// does not decode on an error status is reported by status code.
async fn read_reply<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ClientError::Unauthorized);
    }
    let bytes = resp.bytes().await?;
    match serde_json::from_slice::<Reply<T>>(&bytes) {
        Ok(reply) => reply.into_result().map_err(ClientError::Api),
        Err(e) if status.is_success() => Err(e.into()),
        Err(_) => Err(ClientError::Status {
            status: status.as_u16(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_keeps_base_prefix() {
        let backend = HttpBackend::new(Url::parse("https://api.evmarket.vn/v1/").unwrap()).unwrap();
        let url = backend
            .endpoint(&["api", "chat", "conversations", "a b", "messages"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.evmarket.vn/v1/api/chat/conversations/a%20b/messages"
        );
    }

    #[test]
    fn endpoint_on_bare_origin() {
        let backend = HttpBackend::new(Url::parse("http://127.0.0.1:8080").unwrap()).unwrap();
        let url = backend.endpoint(&["api", "profile"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/api/profile");
    }
}
