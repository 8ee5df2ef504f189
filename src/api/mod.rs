mod auth;
mod client;
mod request;
mod upload;

pub use auth::{AuthHooks, RefreshGate, RefreshOutcome};
pub use client::{
    ApiClient, ClientError, INVALID_RESPONSE_MESSAGE, NETWORK_ERROR_MESSAGE,
    SESSION_EXPIRED_MESSAGE,
};
pub use request::ApiRequest;
