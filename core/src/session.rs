use chat_api::{LoginResponse, UserProfile};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::Arc};
use tokio::{fs, sync::Mutex};
use tracing::{debug, warn};

use crate::{api::HttpBackend, error::Result};

/// Session shared between the screens of one process.
pub type SharedSession = Arc<Mutex<Session>>;

/// Tokens and profile of the signed-in user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: UserProfile,
}

impl From<LoginResponse> for Credentials {
    fn from(resp: LoginResponse) -> Self {
        Self {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            user: resp.user,
        }
    }
}

/// Authentication state persisted as JSON between runs.
#[derive(Debug)]
pub struct Session {
    file: PathBuf,
    credentials: Option<Credentials>,
}

impl Session {
    /// Load the session stored at `file`. A missing or unreadable file
    /// yields a signed-out session.
    pub async fn load(file: PathBuf) -> Self {
        let credentials = match fs::read(&file).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!("ignoring corrupt session file {}: {e}", file.display());
                    None
                }
            },
            Err(_) => None,
        };
        Self { file, credentials }
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    /// Store credentials in memory and on disk.
    pub async fn save(&mut self, credentials: Credentials) -> Result<()> {
        if let Some(dir) = self.file.parent() {
            fs::create_dir_all(dir).await?;
        }
        let bytes = serde_json::to_vec(&credentials)?;
        fs::write(&self.file, bytes).await?;
        debug!("session saved for {}", credentials.user.email);
        self.credentials = Some(credentials);
        Ok(())
    }

    /// Exchange email and password for tokens and persist them.
    pub async fn sign_in(
        &mut self,
        backend: &HttpBackend,
        email: &str,
        password: &str,
    ) -> Result<UserProfile> {
        let credentials = Credentials::from(backend.login(email, password).await?);
        let user = credentials.user.clone();
        self.save(credentials).await?;
        Ok(user)
    }

    /// Forget the credentials and remove the file.
    pub async fn clear(&mut self) -> Result<()> {
        self.credentials = None;
        match fs::remove_file(&self.file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.access_token.as_str())
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.credentials.as_ref().map(|c| &c.user)
    }

    pub fn is_signed_in(&self) -> bool {
        self.credentials.is_some()
    }
}

/// Default location of the session file in the platform data directory.
pub fn default_session_file() -> PathBuf {
    match ProjectDirs::from("vn", "evmarket", "evchat") {
        Some(proj) => proj.data_dir().join("session.json"),
        None => PathBuf::from("./evchat_data/session.json"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            access_token: "tok".into(),
            refresh_token: None,
            user: UserProfile {
                id: "u1".into(),
                email: "an@example.vn".into(),
                full_name: "Nguyễn Văn An".into(),
                avatar_url: None,
            },
        }
    }

    #[tokio::test]
    async fn save_load_clear() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("session.json");
        let mut session = Session::load(path.clone()).await;
        assert!(!session.is_signed_in());

        session.save(creds()).await.unwrap();
        let reloaded = Session::load(path.clone()).await;
        assert_eq!(reloaded.token(), Some("tok"));
        assert_eq!(reloaded.user().unwrap().id, "u1");

        session.clear().await.unwrap();
        assert!(session.token().is_none());
        assert!(!path.exists());
        // clearing twice is fine
        session.clear().await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_file_is_signed_out() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("session.json");
        std::fs::write(&path, b"{not json").unwrap();
        let session = Session::load(path).await;
        assert!(!session.is_signed_in());
    }
}
