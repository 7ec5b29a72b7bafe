use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::LoginResponse;

/// Source of the bearer token attached to remote calls. Implemented by
/// the on-disk credential store in production and by fixed tokens in
/// tests.
pub trait TokenProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
    fn is_valid(&self) -> bool;
    fn user_id(&self) -> Option<i64>;
    fn username(&self) -> Option<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedSession {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user_id: i64,
    pub username: String,
    pub acquired_at: String,
}

impl SavedSession {
    fn is_fresh(&self) -> bool {
        if self.expires_in <= 0 {
            return false;
        }
        match DateTime::parse_from_rfc3339(&self.acquired_at) {
            Ok(acquired) => {
                let age = Utc::now().signed_duration_since(acquired.with_timezone(&Utc));
                age.num_seconds() < self.expires_in
            }
            Err(_) => false,
        }
    }
}

/// JSON file holding the last login. Survives restarts so the operator
/// does not have to log in again while the token is still fresh.
pub struct CredentialFile {
    path: PathBuf,
    state: Mutex<Option<SavedSession>>,
}

impl CredentialFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<SavedSession>(&raw) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!("Ignoring unreadable credential file {:?}: {}", path, e);
                    None
                }
            },
            Err(_) => None,
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn save(&self, login: &LoginResponse) -> Result<()> {
        let session = SavedSession {
            access_token: login.access_token.clone(),
            token_type: login.token_type.clone(),
            expires_in: login.expires_in,
            user_id: login.user_id,
            username: login.username.clone(),
            acquired_at: Utc::now().to_rfc3339(),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&session)?)?;

        let mut guard = self
            .state
            .lock()
            .map_err(|_| anyhow!("Credential store lock poisoned"))?;
        *guard = Some(session);
        debug!("Saved session for {} to {:?}", login.username, self.path);
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        let mut guard = self
            .state
            .lock()
            .map_err(|_| anyhow!("Credential store lock poisoned"))?;
        *guard = None;
        debug!("Cleared saved session at {:?}", self.path);
        Ok(())
    }

    fn session(&self) -> Option<SavedSession> {
        self.state.lock().ok()?.clone()
    }
}

impl TokenProvider for CredentialFile {
    fn bearer_token(&self) -> Option<String> {
        self.session().map(|s| s.access_token)
    }

    fn is_valid(&self) -> bool {
        self.session().map(|s| s.is_fresh()).unwrap_or(false)
    }

    fn user_id(&self) -> Option<i64> {
        self.session().map(|s| s.user_id)
    }

    fn username(&self) -> Option<String> {
        self.session().map(|s| s.username)
    }
}
