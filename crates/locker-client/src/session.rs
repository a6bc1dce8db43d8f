use std::sync::Arc;

use anyhow::Context;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{info, warn};

use locker_store::{KeyValueStore, MemoryStore};
use locker_types::events::SessionEvent;
use locker_types::models::User;

use crate::error::ApiError;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_DATA_KEY: &str = "user_data";

/// Owner of the token pair and the current user snapshot.
///
/// Every credential mutation goes through this type. The API client reads
/// tokens from it and swaps the access token after a refresh. The auth
/// coordinator establishes and clears sessions.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    store: Arc<dyn KeyValueStore>,
    state: RwLock<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

#[derive(Debug, Default, Clone)]
struct SessionState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    user: Option<User>,
}

impl Session {
    /// Loads persisted credentials.
    ///
    /// The snapshot is trusted without asking the server. A stale token is
    /// caught by the first request that comes back 401.
    pub fn restore(store: Arc<dyn KeyValueStore>) -> Result<Self, ApiError> {
        let mut state = SessionState {
            access_token: store.get(ACCESS_TOKEN_KEY)?,
            refresh_token: store.get(REFRESH_TOKEN_KEY)?,
            user: None,
        };

        if let (Some(_), Some(raw)) = (&state.access_token, store.get(USER_DATA_KEY)?) {
            match serde_json::from_str::<User>(&raw) {
                Ok(user) => {
                    info!(user_id = user.id, username = %user.username, "Restored session");
                    state.user = Some(user);
                }
                Err(e) => {
                    warn!("Discarding unreadable user snapshot: {}", e);
                    store.remove(ACCESS_TOKEN_KEY)?;
                    store.remove(USER_DATA_KEY)?;
                    state.access_token = None;
                }
            }
        }

        let (events, _) = broadcast::channel(64);
        Ok(Self {
            inner: Arc::new(SessionInner {
                store,
                state: RwLock::new(state),
                events,
            }),
        })
    }

    /// Session backed by process memory only.
    pub fn ephemeral() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(SessionInner {
                store: Arc::new(MemoryStore::new()),
                state: RwLock::new(SessionState::default()),
                events,
            }),
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.state.read().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.inner.state.read().refresh_token.clone()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.state.read().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.read().user.is_some()
    }

    /// Persists a freshly issued session.
    ///
    /// A missing refresh token also removes any stored one, so a later 401
    /// cannot refresh with credentials from an older login.
    pub fn establish(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        user: &User,
    ) -> Result<(), ApiError> {
        let user_json = serde_json::to_string(user).map_err(ApiError::Json)?;
        let store = &self.inner.store;

        store
            .set(ACCESS_TOKEN_KEY, access_token)
            .context("Failed to persist access token")?;
        let refresh_saved = match refresh_token {
            Some(token) => store.set(REFRESH_TOKEN_KEY, token),
            None => store.remove(REFRESH_TOKEN_KEY),
        };
        refresh_saved.context("Failed to persist refresh token")?;
        store
            .set(USER_DATA_KEY, &user_json)
            .context("Failed to persist user snapshot")?;

        *self.inner.state.write() = SessionState {
            access_token: Some(access_token.to_string()),
            refresh_token: refresh_token.map(str::to_string),
            user: Some(user.clone()),
        };
        Ok(())
    }

    pub(crate) fn set_access_token(&self, token: &str) -> Result<(), ApiError> {
        self.inner
            .store
            .set(ACCESS_TOKEN_KEY, token)
            .context("Failed to persist refreshed access token")?;
        self.inner.state.write().access_token = Some(token.to_string());
        Ok(())
    }

    /// Drops all credentials, in memory first and then in storage.
    ///
    /// Every key removal is attempted even if an earlier one fails. The first
    /// failure is returned.
    pub fn clear(&self) -> Result<(), ApiError> {
        *self.inner.state.write() = SessionState::default();

        let mut first_err = None;
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_DATA_KEY] {
            if let Err(e) = self.inner.store.remove(key) {
                warn!("Failed to remove {} from session store: {}", key, e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(ApiError::Storage(e)),
            None => Ok(()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn publish(&self, event: SessionEvent) {
        let _ = self.inner.events.send(event);
    }
}
