use super::auth::{AuthHooks, RefreshGate};
use super::request::ApiRequest;
use crate::config::ClientConfig;
use crate::redact::redact_secrets;
use crate::types::{ApiError, ApiResult, NETWORK_ERROR_STATUS};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Please log in again.";
pub const NETWORK_ERROR_MESSAGE: &str = "Network error. Please check your connection and try again.";
pub const INVALID_RESPONSE_MESSAGE: &str = "Invalid response from server.";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build http client")]
    Http(#[from] reqwest::Error),
}

pub(super) struct RawResponse {
    pub(super) status: u16,
    pub(super) body: String,
}

pub(super) fn build_headers(token: Option<&str>, extra: &HeaderMap, json: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if json {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    if let Some(token) = token {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
            headers.insert(AUTHORIZATION, value);
        }
    }
    for (name, value) in extra {
        headers.insert(name.clone(), value.clone());
    }
    headers
}

fn read_message(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        // Validation errors arrive as a list of messages.
        Value::Array(items) => {
            let parts: Vec<&str> = items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        _ => None,
    }
}

/// Best-effort error envelope from a non-2xx body. Unparseable bodies count as `{}`.
pub(super) fn error_from_body(status: u16, body: &str) -> ApiError {
    let json: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let root = json.as_object().cloned().unwrap_or_default();

    let error_code = root
        .get("error")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let message = read_message(root.get("message"))
        .or_else(|| error_code.clone())
        .unwrap_or_else(|| format!("Request failed with status {status}"));

    ApiError {
        message,
        status_code: status,
        error_code,
    }
}

pub(super) fn network_error(err: &reqwest::Error) -> ApiError {
    tracing::warn!(error = %redact_secrets(&err.to_string()), "request failed before a response arrived");
    ApiError::new(NETWORK_ERROR_STATUS, NETWORK_ERROR_MESSAGE).with_code("network_error")
}

pub(super) fn map_response<T: DeserializeOwned>(raw: RawResponse) -> ApiResult<T> {
    if !(200..300).contains(&raw.status) {
        return ApiResult::failure(error_from_body(raw.status, &raw.body));
    }

    let parsed = if raw.status == 204 || raw.body.trim().is_empty() {
        serde_json::from_value(Value::Null)
    } else {
        serde_json::from_str(&raw.body)
    };
    match parsed {
        Ok(data) => ApiResult::success(data),
        Err(e) => {
            tracing::warn!(status = raw.status, error = %e, "response body did not match the expected shape");
            ApiResult::failure(
                ApiError::new(raw.status, INVALID_RESPONSE_MESSAGE).with_code("invalid_response"),
            )
        }
    }
}

/// Authenticated dispatcher for the CRM backend.
///
/// Every call returns an [`ApiResult`]; transport and server failures never surface as
/// `Err`. A 401 gets exactly one refresh-and-retry when [`AuthHooks`] are installed.
pub struct ApiClient {
    pub(super) http: reqwest::Client,
    pub(super) config: ClientConfig,
    hooks: Option<Arc<dyn AuthHooks>>,
    refresh_gate: RefreshGate,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            config,
            hooks: None,
            refresh_gate: RefreshGate::new(),
        })
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn AuthHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn send(&self, req: &ApiRequest) -> Result<RawResponse, reqwest::Error> {
        let url = self.config.url_for(&req.path_and_query());
        tracing::debug!(method = req.method().as_str(), path = req.path(), "dispatching request");

        let mut builder = self
            .http
            .request(req.method().into(), url)
            .headers(build_headers(req.token(), &req.headers, true));
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let res = builder.send().await?;
        let status = res.status().as_u16();
        let body = res.text().await?;
        Ok(RawResponse { status, body })
    }

    pub async fn request<T: DeserializeOwned>(&self, req: ApiRequest) -> ApiResult<T> {
        let ticket = self.refresh_gate.generation();
        let first = match self.send(&req).await {
            Ok(raw) => raw,
            Err(e) => return ApiResult::failure(network_error(&e)),
        };

        if first.status == 401 {
            if let Some(hooks) = &self.hooks {
                return self.retry_after_refresh(&req, ticket, hooks).await;
            }
        }

        map_response(first)
    }

    async fn retry_after_refresh<T: DeserializeOwned>(
        &self,
        req: &ApiRequest,
        ticket: u64,
        hooks: &Arc<dyn AuthHooks>,
    ) -> ApiResult<T> {
        let outcome = self.refresh_gate.refresh(ticket, hooks).await;
        let Some(token) = outcome.token else {
            if outcome.ran_refresh {
                tracing::warn!(path = req.path(), "credential refresh failed; logging out");
                hooks.logout().await;
            } else {
                tracing::debug!(path = req.path(), "session already ended by a concurrent refresh");
            }
            return ApiResult::failure(
                ApiError::new(401, SESSION_EXPIRED_MESSAGE).with_code("session_expired"),
            );
        };

        let retry = match self.send(&req.with_token(token)).await {
            Ok(raw) => raw,
            Err(e) => return ApiResult::failure(network_error(&e)),
        };

        if retry.status == 401 {
            tracing::warn!(path = req.path(), "request still unauthorized after refresh; logging out");
            hooks.logout().await;
            return ApiResult::failure(error_from_body(401, &retry.body));
        }

        map_response(retry)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, token: Option<&str>) -> ApiResult<T> {
        self.request(ApiRequest::get(path).bearer(token)).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
        token: Option<&str>,
    ) -> ApiResult<T> {
        self.request(ApiRequest::post(path).json(body).bearer(token))
            .await
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
        token: Option<&str>,
    ) -> ApiResult<T> {
        self.request(ApiRequest::put(path).json(body).bearer(token))
            .await
    }

    pub async fn patch<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
        token: Option<&str>,
    ) -> ApiResult<T> {
        self.request(ApiRequest::patch(path).json(body).bearer(token))
            .await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        token: Option<&str>,
    ) -> ApiResult<T> {
        self.request(ApiRequest::delete(path).bearer(token)).await
    }
}
