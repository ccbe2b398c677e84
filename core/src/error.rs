use chat_api::ApiError;
use thiserror::Error;

/// Errors produced by the chat client library.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No access token is stored; the caller must sign in first.
    #[error("not signed in")]
    NotSignedIn,
    /// The backend answered 401. The session has been (or must be) cleared.
    #[error("session expired")]
    Unauthorized,
    #[error("backend rejected request: {}: {}", .0.code, .0.message)]
    Api(ApiError),
    #[error("unexpected status {status}")]
    Status { status: u16 },
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("socket: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("message is empty")]
    EmptyMessage,
    #[error("no conversation is open")]
    NoConversation,
    #[error("message {0} missing after confirmation")]
    Unconfirmed(String),
}

impl ClientError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Unauthorized)
    }

    /// Alert text shown to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            ClientError::NotSignedIn | ClientError::Unauthorized => {
                "Phiên đăng nhập đã hết hạn. Vui lòng đăng nhập lại."
            }
            ClientError::Http(_) | ClientError::Socket(_) | ClientError::Io(_) => {
                "Không thể kết nối máy chủ. Vui lòng kiểm tra mạng và thử lại."
            }
            ClientError::EmptyMessage => "Vui lòng nhập nội dung tin nhắn.",
            _ => "Không thể gửi tin nhắn. Vui lòng thử lại.",
        }
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
