mod backend;
mod session;
mod value_store;

pub use backend::{KeyringBackend, PlainBackend, SecretBackend, StoreError, KEYRING_ITEM_LIMIT};
pub use session::{SessionAuth, SessionEvent, SessionStore};
pub use value_store::{chunk_count_key, chunk_key, ValueStore, CHUNK_SIZE};

pub const KEY_ACCESS_TOKEN: &str = "access_token";
pub const KEY_REFRESH_TOKEN: &str = "refresh_token";
pub const KEY_USER_DATA: &str = "user_data";
pub const KEY_TOKEN_EXPIRY: &str = "token_expiry";

/// Everything a logout must remove.
pub const SESSION_KEYS: [&str; 4] = [
    KEY_ACCESS_TOKEN,
    KEY_REFRESH_TOKEN,
    KEY_USER_DATA,
    KEY_TOKEN_EXPIRY,
];
