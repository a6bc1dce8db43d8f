use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use locker_types::api::RefreshResponse;
use locker_types::events::SessionEvent;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::refresh::{RefreshFailure, RefreshGate};
use crate::session::Session;

/// What to do when a request comes back 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Join (or start) the single-flight refresh, then replay once.
    RefreshOnUnauthorized,
    /// Surface the 401 like any other error.
    Surface,
}

/// Single point of contact with the locker backend.
///
/// Cheap to clone. Clones share the HTTP pool, the session and the refresh gate.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiInner>,
}

struct ApiInner {
    http: Client,
    base_url: String,
    session: Session,
    refresh: RefreshGate,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        session: Session,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::Network)?;

        Ok(Self {
            inner: Arc::new(ApiInner {
                http,
                base_url: base_url.into().trim_end_matches('/').to_string(),
                session,
                refresh: RefreshGate::default(),
            }),
        })
    }

    pub fn from_config(config: &ClientConfig, session: Session) -> Result<Self, ApiError> {
        Self::new(config.base_url.clone(), config.http_timeout, session)
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.inner.base_url, path)
    }

    /// Sends a request and decodes the JSON response.
    ///
    /// With `RetryPolicy::RefreshOnUnauthorized` a 401 goes through the refresh
    /// gate and the request is replayed exactly once. The replay surfaces any
    /// further 401 as-is.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        retry: RetryPolicy,
    ) -> Result<T, ApiError> {
        let sent_token = self.session().access_token();
        let response = self
            .send(&method, path, body.as_ref(), sent_token.as_deref())
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED && retry == RetryPolicy::RefreshOnUnauthorized {
            debug!(%method, path, "Unauthorized, recovering session");
            self.recover_unauthorized(sent_token.as_deref()).await?;

            let token = self.session().access_token();
            let replay = self.send(&method, path, body.as_ref(), token.as_deref()).await?;
            return decode(replay).await;
        }

        decode(response).await
    }

    async fn send(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<Response, ApiError> {
        let mut builder = self.inner.http.request(method.clone(), self.url(path));
        if *method != Method::GET {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        builder.send().await.map_err(|e| {
            warn!(%method, path, "Request failed: {}", e);
            ApiError::Network(e)
        })
    }

    /// Makes the session usable again after a 401, or fails with `SessionExpired`.
    async fn recover_unauthorized(&self, sent_token: Option<&str>) -> Result<(), ApiError> {
        // A 401 for a token that has since been replaced means another caller
        // already finished the refresh (or tore the session down).
        let current = self.session().access_token();
        if current.as_deref() != sent_token {
            return match current {
                Some(_) => Ok(()),
                None => Err(ApiError::SessionExpired),
            };
        }

        match self.inner.refresh.run(|| self.refresh_access_token()).await {
            Ok(()) => Ok(()),
            Err(RefreshFailure::Follower) => Err(ApiError::SessionExpired),
            Err(RefreshFailure::Leader(cause)) => {
                warn!("Token refresh failed, ending session: {}", cause);
                self.expire_session();
                Err(ApiError::SessionExpired)
            }
        }
    }

    async fn refresh_access_token(&self) -> Result<(), ApiError> {
        let refresh_token = self
            .session()
            .refresh_token()
            .ok_or(ApiError::MissingRefreshToken)?;

        let response = self
            .inner
            .http
            .post(self.url("/refresh"))
            .header(CONTENT_TYPE, "application/json")
            .bearer_auth(&refresh_token)
            .send()
            .await
            .map_err(ApiError::Network)?;
        let refreshed: RefreshResponse = decode(response).await?;

        self.session().set_access_token(&refreshed.access_token)?;
        self.session().publish(SessionEvent::TokenRefreshed);
        info!("Access token refreshed");
        Ok(())
    }

    fn expire_session(&self) {
        if let Err(e) = self.session().clear() {
            warn!("Session purge incomplete: {}", e);
        }
        self.session().publish(SessionEvent::ForcedLogout);
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(ApiError::Network)?;

    if !status.is_success() {
        return Err(ApiError::from_response(status.as_u16(), &bytes));
    }

    // 204s and empty 200s decode as JSON null, which unit-like targets accept
    let payload: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"null"
    } else {
        &bytes
    };
    serde_json::from_slice(payload).map_err(ApiError::Json)
}
