use super::backend::StoreError;
use super::value_store::ValueStore;
use super::{KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN, KEY_TOKEN_EXPIRY, KEY_USER_DATA};
use crate::api::{ApiClient, AuthHooks, ClientError};
use crate::config::ClientConfig;
use crate::token::{decode_token, is_token_expired};
use crate::types::ApiResult;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;

/// Typed access to the persisted session.
#[derive(Clone)]
pub struct SessionStore {
    store: ValueStore,
}

impl SessionStore {
    pub fn new(store: ValueStore) -> Self {
        Self { store }
    }

    /// Stores the token pair and the access token's `exp` claim as the expiry marker.
    pub async fn save_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(), StoreError> {
        self.store.set(KEY_ACCESS_TOKEN, access_token).await?;
        if let Some(refresh_token) = refresh_token {
            self.store.set(KEY_REFRESH_TOKEN, refresh_token).await?;
        }
        match decode_token(access_token).and_then(|c| c.exp) {
            Some(exp) => self.store.set(KEY_TOKEN_EXPIRY, &exp.to_string()).await,
            None => self.store.delete(KEY_TOKEN_EXPIRY).await,
        }
    }

    pub async fn access_token(&self) -> Result<Option<String>, StoreError> {
        self.store.get(KEY_ACCESS_TOKEN).await
    }

    pub async fn refresh_token(&self) -> Result<Option<String>, StoreError> {
        self.store.get(KEY_REFRESH_TOKEN).await
    }

    pub async fn token_expiry(&self) -> Result<Option<i64>, StoreError> {
        Ok(self
            .store
            .get(KEY_TOKEN_EXPIRY)
            .await?
            .and_then(|v| v.trim().parse().ok()))
    }

    pub async fn save_user<U: Serialize>(&self, user: &U) -> Result<(), StoreError> {
        let data = serde_json::to_string(user)?;
        self.store.set(KEY_USER_DATA, &data).await
    }

    /// A cached user record that no longer parses reads as absent.
    pub async fn user<U: DeserializeOwned>(&self) -> Result<Option<U>, StoreError> {
        let Some(data) = self.store.get(KEY_USER_DATA).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&data) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                tracing::warn!(error = %e, "cached user record is unreadable");
                Ok(None)
            }
        }
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.clear_all().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Active,
    LoggedOut,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    #[serde(alias = "access_token")]
    access_token: String,
    #[serde(default, alias = "refresh_token")]
    refresh_token: Option<String>,
}

/// Default [`AuthHooks`]: renews tokens against the refresh endpoint and wipes the
/// session on logout.
pub struct SessionAuth {
    api: ApiClient,
    session: SessionStore,
    events: watch::Sender<SessionEvent>,
}

impl SessionAuth {
    pub fn new(config: ClientConfig, session: SessionStore) -> Result<Self, ClientError> {
        let (events, _) = watch::channel(SessionEvent::Active);
        Ok(Self {
            api: ApiClient::new(config)?,
            session,
            events,
        })
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The stored access token, refreshed first when it expires within `buffer_secs`.
    pub async fn valid_access_token(&self, buffer_secs: i64) -> Option<String> {
        let token = match self.session.access_token().await {
            Ok(Some(t)) => t,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "could not read access token");
                return None;
            }
        };
        if !is_token_expired(&token, buffer_secs) {
            return Some(token);
        }
        tracing::debug!(buffer_secs, "access token near expiry; refreshing ahead of time");
        self.refresh().await
    }
}

#[async_trait]
impl AuthHooks for SessionAuth {
    async fn refresh(&self) -> Option<String> {
        let refresh_token = match self.session.refresh_token().await {
            Ok(Some(t)) => t,
            Ok(None) => {
                tracing::debug!("no refresh token stored");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not read refresh token");
                return None;
            }
        };

        let path = self.api.config().refresh_path.clone();
        let result: ApiResult<RefreshResponse> = self
            .api
            .post(&path, json!({ "refreshToken": refresh_token }), None)
            .await;
        let tokens = match result.into_result() {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(status = e.status_code, message = %e.message, "token refresh rejected");
                return None;
            }
        };

        if let Err(e) = self
            .session
            .save_tokens(&tokens.access_token, tokens.refresh_token.as_deref())
            .await
        {
            tracing::warn!(error = %e, "refreshed tokens could not be persisted");
        }
        self.events.send_replace(SessionEvent::Active);
        Some(tokens.access_token)
    }

    async fn logout(&self) {
        if let Err(e) = self.session.clear().await {
            tracing::warn!(error = %e, "session storage was not fully cleared");
        }
        self.events.send_replace(SessionEvent::LoggedOut);
    }
}
