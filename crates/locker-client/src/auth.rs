use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{info, warn};

use locker_types::api::RegisterRequest;
use locker_types::events::{AuthStatus, SessionEvent};
use locker_types::models::User;

use crate::TaskHandle;
use crate::api::ApiClient;
use crate::error::ApiError;
use crate::session::Session;

/// Application-wide identity: login, register, logout, and the observable auth status.
#[derive(Clone)]
pub struct Auth {
    api: ApiClient,
    status: Arc<watch::Sender<AuthStatus>>,
}

impl Auth {
    pub fn new(api: ApiClient) -> Self {
        let initial = match api.session().user() {
            Some(user) => AuthStatus::Authenticated(user),
            None => AuthStatus::Unauthenticated,
        };
        let (status, _) = watch::channel(initial);
        Self {
            api,
            status: Arc::new(status),
        }
    }

    fn session(&self) -> &Session {
        self.api.session()
    }

    pub fn status(&self) -> AuthStatus {
        self.status.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<AuthStatus> {
        self.status.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(*self.status.borrow(), AuthStatus::Authenticated(_))
    }

    pub fn current_user(&self) -> Option<User> {
        self.status.borrow().user().cloned()
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<User, ApiError> {
        let response = self.api.login(username, password).await?;
        let user = response.user();

        self.session().establish(
            &response.access_token,
            response.refresh_token.as_deref(),
            &user,
        )?;

        info!(user_id = user.id, role = user.role.as_str(), "Logged in");
        self.status.send_replace(AuthStatus::Authenticated(user.clone()));
        Ok(user)
    }

    /// Creates the account, then logs in with the same credentials.
    pub async fn register(&self, req: &RegisterRequest) -> Result<User, ApiError> {
        let created = self.api.register(req).await?;
        info!(user_id = created.id, username = %created.username, "Registered");
        self.login(&req.username, &req.password).await
    }

    /// Ends the session. The server is told on a best-effort basis; local
    /// credentials are always dropped.
    pub async fn logout(&self) -> Result<(), ApiError> {
        if self.session().access_token().is_some() {
            if let Err(e) = self.api.logout().await {
                warn!("Server logout failed, clearing local session anyway: {}", e);
            }
        }
        self.end_session()
    }

    fn end_session(&self) -> Result<(), ApiError> {
        let cleared = self.session().clear();
        self.status.send_replace(AuthStatus::Unauthenticated);
        info!("Logged out");
        cleared
    }

    /// Follows the API client's forced-logout signal.
    ///
    /// The client has already purged the credentials by the time the event
    /// arrives. The listener only moves the published status. Dropping the
    /// returned handle stops the listener.
    pub fn spawn_logout_listener(&self) -> TaskHandle {
        let mut events = self.session().subscribe();
        let auth = self.clone();

        TaskHandle::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::ForcedLogout) => {
                        warn!("Session expired, logging out");
                        if let Err(e) = auth.end_session() {
                            warn!("Failed to clear session: {}", e);
                        }
                    }
                    Ok(SessionEvent::TokenRefreshed) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Session events lagged");
                        if !auth.session().is_authenticated() && auth.is_authenticated() {
                            auth.status.send_replace(AuthStatus::Unauthenticated);
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
