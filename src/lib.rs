//! Client core for the CRM mobile app.
//!
//! Two independent pieces live here: an authenticated request dispatcher ([`api`]) that
//! maps every call onto an [`types::ApiResult`] envelope, and a chunked secure value store
//! ([`state`]) for tokens and the cached user record.

pub mod api;
pub mod config;
pub mod logging;
pub mod redact;
pub mod state;
pub mod token;
pub mod types;

pub use api::{ApiClient, ApiRequest, AuthHooks};
pub use config::ClientConfig;
pub use state::{SessionAuth, SessionStore, ValueStore};
pub use types::{ApiError, ApiResult, HttpMethod, UploadFile};
