use super::backend::{KeyringBackend, PlainBackend, SecretBackend, StoreError};
use super::SESSION_KEYS;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Chunk size used under the keyring's 2048-byte item limit.
pub const CHUNK_SIZE: usize = 1800;
const CHUNK_SAFETY_MARGIN: usize = 2048 - CHUNK_SIZE;
const CHUNK_COUNT_SUFFIX: &str = "_chunk_count";
const PLAIN_STORE_FILE: &str = "session-store.json";

pub fn chunk_count_key(key: &str) -> String {
    format!("{key}{CHUNK_COUNT_SUFFIX}")
}

pub fn chunk_key(key: &str, index: usize) -> String {
    format!("{key}_{index}")
}

/// Splits into pieces of at most `size` bytes without cutting a UTF-8 character. A
/// character wider than `size` gets a piece of its own.
fn split_chunks(value: &str, size: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < value.len() {
        let mut end = (start + size).min(value.len());
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            end = start
                + value[start..]
                    .chars()
                    .next()
                    .map(char::len_utf8)
                    .unwrap_or(1);
        }
        chunks.push(&value[start..end]);
        start = end;
    }
    chunks
}

/// String values over a size-bounded [`SecretBackend`].
///
/// Values longer than the chunk size are stored as `<key>_chunk_count` plus
/// `<key>_0 .. <key>_(n-1)`; shorter ones sit directly under `<key>`. A key only ever holds
/// one of the two layouts after a successful write.
#[derive(Clone)]
pub struct ValueStore {
    backend: Arc<dyn SecretBackend>,
    chunk_size: Option<usize>,
}

impl ValueStore {
    pub fn new(backend: Arc<dyn SecretBackend>) -> Self {
        let chunk_size = backend
            .item_limit()
            .map(|limit| limit.saturating_sub(CHUNK_SAFETY_MARGIN).max(1));
        Self {
            backend,
            chunk_size,
        }
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    pub fn chunk_size(&self) -> Option<usize> {
        self.chunk_size
    }

    /// Secure storage when the platform has it, otherwise a plain file in `data_dir`.
    pub async fn open_default(data_dir: &Path) -> Result<Self, StoreError> {
        let keyring = KeyringBackend::default();
        let probe = keyring.clone();
        let available = tokio::task::spawn_blocking(move || probe.is_available())
            .await
            .unwrap_or(false);
        if available {
            tracing::debug!("using OS secure storage");
            return Ok(Self::new(Arc::new(keyring)));
        }

        let path = data_dir.join(PLAIN_STORE_FILE);
        tracing::warn!(path = %path.display(), "secure storage unavailable; falling back to an unencrypted store");
        let plain = PlainBackend::open(path).await?;
        Ok(Self::new(Arc::new(plain)))
    }

    async fn stored_chunk_count(&self, key: &str) -> Result<Option<usize>, StoreError> {
        let Some(raw) = self.backend.get(&chunk_count_key(key)).await? else {
            return Ok(None);
        };
        match raw.trim().parse::<usize>() {
            Ok(count) => Ok(Some(count)),
            Err(_) => {
                // A marker that exists at all shadows the direct slot, even when it is garbage.
                tracing::warn!(key, marker = %raw, "unparseable chunk count marker");
                Ok(Some(0))
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        match self.chunk_size {
            Some(size) if value.len() > size => self.set_chunked(key, value, size).await,
            _ => self.set_direct(key, value).await,
        }
    }

    async fn set_direct(&self, key: &str, value: &str) -> Result<(), StoreError> {
        // Dropping the marker first means a reader falls through to the direct slot.
        let previous = self.stored_chunk_count(key).await?;
        if previous.is_some() {
            self.backend.delete(&chunk_count_key(key)).await?;
        }
        self.backend.set(key, value).await?;
        self.remove_chunk_slots(key, 0, previous.unwrap_or(0)).await;
        Ok(())
    }

    async fn set_chunked(&self, key: &str, value: &str, size: usize) -> Result<(), StoreError> {
        // Without a marker an interrupted overwrite reads as absent, never as a mix of
        // old and new chunks.
        let previous = self.stored_chunk_count(key).await?;
        if previous.is_some() {
            self.backend.delete(&chunk_count_key(key)).await?;
        }

        let chunks = split_chunks(value, size);
        tracing::debug!(key, chunks = chunks.len(), "writing chunked value");

        let mut writes = JoinSet::new();
        for (index, chunk) in chunks.iter().enumerate() {
            let backend = self.backend.clone();
            let slot = chunk_key(key, index);
            let chunk = chunk.to_string();
            writes.spawn(async move { backend.set(&slot, &chunk).await });
        }
        while let Some(result) = writes.join_next().await {
            result??;
        }

        self.backend
            .set(&chunk_count_key(key), &chunks.len().to_string())
            .await?;

        self.remove_chunk_slots(key, chunks.len(), previous.unwrap_or(0)).await;
        if let Err(e) = self.backend.delete(key).await {
            tracing::warn!(key, error = %e, "could not clear stale direct value");
        }
        Ok(())
    }

    /// Best-effort cleanup of `<key>_from .. <key>_(to-1)` once no marker points at them.
    async fn remove_chunk_slots(&self, key: &str, from: usize, to: usize) {
        for index in from..to {
            if let Err(e) = self.backend.delete(&chunk_key(key, index)).await {
                tracing::warn!(key, index, error = %e, "could not clear stale chunk");
            }
        }
    }

    /// `None` when the key was never written, or when its chunk set is incomplete.
    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let Some(count) = self.stored_chunk_count(key).await? else {
            return self.backend.get(key).await;
        };

        let mut out = String::new();
        for index in 0..count {
            match self.backend.get(&chunk_key(key, index)).await? {
                Some(chunk) => out.push_str(&chunk),
                None => {
                    tracing::warn!(key, index, count, "missing chunk; treating value as absent");
                    return Ok(None);
                }
            }
        }
        if count == 0 {
            return Ok(None);
        }
        Ok(Some(out))
    }

    async fn delete_chunks(&self, key: &str) -> Result<(), StoreError> {
        let Some(count) = self.stored_chunk_count(key).await? else {
            return Ok(());
        };
        self.backend.delete(&chunk_count_key(key)).await?;
        for index in 0..count {
            self.backend.delete(&chunk_key(key, index)).await?;
        }
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.delete_chunks(key).await?;
        self.backend.delete(key).await
    }

    pub async fn clear_all(&self) -> Result<(), StoreError> {
        let mut first_error = None;
        for key in SESSION_KEYS {
            if let Err(e) = self.delete(key).await {
                tracing::warn!(key, error = %e, "failed to clear stored value");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN, KEY_TOKEN_EXPIRY, KEY_USER_DATA};
    use async_trait::async_trait;

    /// In-memory backend that rejects values over a hard limit, like the keyring.
    struct LimitedBackend {
        inner: PlainBackend,
        limit: usize,
    }

    #[async_trait]
    impl SecretBackend for LimitedBackend {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            if value.len() > self.limit {
                return Err(StoreError::TooLarge {
                    key: key.to_string(),
                    len: value.len(),
                    limit: self.limit,
                });
            }
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }

        fn item_limit(&self) -> Option<usize> {
            Some(self.limit)
        }
    }

    /// In-memory backend whose writes or deletes of one chosen key fail on demand.
    #[derive(Default)]
    struct FlakyBackend {
        inner: PlainBackend,
        fail_set: std::sync::Mutex<Option<String>>,
        fail_delete: std::sync::Mutex<Option<String>>,
    }

    impl FlakyBackend {
        fn fail_set_on(&self, key: &str) {
            *self.fail_set.lock().unwrap() = Some(key.to_string());
        }

        fn fail_delete_on(&self, key: &str) {
            *self.fail_delete.lock().unwrap() = Some(key.to_string());
        }

        fn injected(key: &str) -> StoreError {
            StoreError::Io(std::io::Error::other(format!("injected failure for {key}")))
        }
    }

    #[async_trait]
    impl SecretBackend for FlakyBackend {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            if self.fail_set.lock().unwrap().as_deref() == Some(key) {
                return Err(Self::injected(key));
            }
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            if self.fail_delete.lock().unwrap().as_deref() == Some(key) {
                return Err(Self::injected(key));
            }
            self.inner.delete(key).await
        }
    }

    fn flaky_store() -> (Arc<FlakyBackend>, ValueStore) {
        let backend = Arc::new(FlakyBackend::default());
        let store = ValueStore::new(backend.clone()).with_chunk_size(4);
        (backend, store)
    }

    fn small_store() -> (Arc<PlainBackend>, ValueStore) {
        let backend = Arc::new(PlainBackend::in_memory());
        let store = ValueStore::new(backend.clone()).with_chunk_size(4);
        (backend, store)
    }

    #[test]
    fn split_chunks_respects_char_boundaries() {
        assert_eq!(split_chunks("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(split_chunks("", 4), Vec::<&str>::new());
        // 'é' is two bytes; a chunk never ends in the middle of it.
        assert_eq!(split_chunks("aébc", 2), vec!["a", "é", "bc"]);
        assert_eq!(split_chunks("€", 1), vec!["€"]);
    }

    #[test]
    fn chunk_size_follows_backend_limit() {
        let keyring_sized = ValueStore::new(Arc::new(LimitedBackend {
            inner: PlainBackend::in_memory(),
            limit: 2048,
        }));
        assert_eq!(keyring_sized.chunk_size(), Some(CHUNK_SIZE));

        let plain = ValueStore::new(Arc::new(PlainBackend::in_memory()));
        assert_eq!(plain.chunk_size(), None);
    }

    #[tokio::test]
    async fn round_trips_values_around_the_threshold() {
        let (_backend, store) = small_store();
        for value in ["", "abc", "abcd", "abcde", "abcdefghijklmnopq", "ünïcödé-välüe"] {
            store.set("k", value).await.unwrap();
            assert_eq!(store.get("k").await.unwrap().as_deref(), Some(value), "value {value:?}");
        }
    }

    #[tokio::test]
    async fn long_values_are_stored_in_chunks() {
        let (backend, store) = small_store();
        store.set("user_data", "0123456789").await.unwrap();

        assert_eq!(
            backend.get("user_data_chunk_count").await.unwrap().as_deref(),
            Some("3")
        );
        assert_eq!(backend.get("user_data_0").await.unwrap().as_deref(), Some("0123"));
        assert_eq!(backend.get("user_data_2").await.unwrap().as_deref(), Some("89"));
        assert_eq!(backend.get("user_data").await.unwrap(), None);
    }

    #[tokio::test]
    async fn chunked_to_direct_leaves_no_chunks() {
        let (backend, store) = small_store();
        store.set("k", "0123456789").await.unwrap();
        store.set("k", "ab").await.unwrap();

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("ab"));
        assert_eq!(backend.keys().await, vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn direct_to_chunked_leaves_no_direct_slot() {
        let (backend, store) = small_store();
        store.set("k", "ab").await.unwrap();
        store.set("k", "0123456789").await.unwrap();

        assert_eq!(backend.get("k").await.unwrap(), None);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("0123456789"));
    }

    #[tokio::test]
    async fn shrinking_chunked_value_drops_extra_chunks() {
        let (backend, store) = small_store();
        store.set("k", "0123456789abcdef").await.unwrap();
        store.set("k", "012345").await.unwrap();

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("012345"));
        let mut keys = backend.keys().await;
        keys.sort();
        assert_eq!(keys, vec!["k_0", "k_1", "k_chunk_count"]);
    }

    #[tokio::test]
    async fn missing_chunk_reads_as_absent() {
        let (backend, store) = small_store();
        store.set("k", "0123456789").await.unwrap();
        backend.delete("k_1").await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_marker_reads_as_absent() {
        let (backend, store) = small_store();
        backend.set("k_chunk_count", "lots").await.unwrap();
        backend.set("k", "direct").await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (backend, store) = small_store();
        store.delete("never-written").await.unwrap();
        assert!(backend.keys().await.is_empty());

        store.set("k", "0123456789").await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(backend.keys().await.is_empty());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_covers_legacy_direct_value_next_to_chunks() {
        let (backend, store) = small_store();
        store.set("k", "0123456789").await.unwrap();
        backend.set("k", "legacy").await.unwrap();

        store.delete("k").await.unwrap();
        assert!(backend.keys().await.is_empty());
    }

    #[tokio::test]
    async fn clear_all_removes_session_keys_only() {
        let (backend, store) = small_store();
        store.set(KEY_ACCESS_TOKEN, "access-token-value").await.unwrap();
        store.set(KEY_REFRESH_TOKEN, "r").await.unwrap();
        store.set(KEY_USER_DATA, r#"{"id":"u1","name":"Ada"}"#).await.unwrap();
        store.set(KEY_TOKEN_EXPIRY, "1700000000").await.unwrap();
        store.set("device_id", "d1").await.unwrap();

        store.clear_all().await.unwrap();
        assert_eq!(backend.keys().await, vec!["device_id".to_string()]);
    }

    #[tokio::test]
    async fn chunks_fit_a_limited_backend() {
        let backend = Arc::new(LimitedBackend {
            inner: PlainBackend::in_memory(),
            limit: 2048,
        });
        let store = ValueStore::new(backend.clone());
        let value = "x".repeat(5000);

        store.set(KEY_USER_DATA, &value).await.unwrap();
        assert_eq!(store.get(KEY_USER_DATA).await.unwrap(), Some(value));
        assert_eq!(
            backend.get("user_data_chunk_count").await.unwrap().as_deref(),
            Some("3")
        );
    }

    #[tokio::test]
    async fn failed_chunk_write_surfaces_error() {
        let backend = Arc::new(LimitedBackend {
            inner: PlainBackend::in_memory(),
            limit: 3,
        });
        let store = ValueStore::new(backend).with_chunk_size(8);
        assert!(matches!(
            store.set("k", "0123456789").await,
            Err(StoreError::TooLarge { .. })
        ));
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_overwrite_never_reads_as_mixed_chunks() {
        let (backend, store) = flaky_store();
        store.set("k", "AAAABBBBCCCC").await.unwrap();

        backend.fail_set_on("k_2");
        assert!(store.set("k", "xxxxyyyyzzzz").await.is_err());

        let read = store.get("k").await.unwrap();
        assert!(
            read.is_none() || read.as_deref() == Some("AAAABBBBCCCC"),
            "read {read:?}"
        );
    }

    #[tokio::test]
    async fn direct_write_survives_failed_chunk_cleanup() {
        let (backend, store) = flaky_store();
        store.set("k", "0123456789").await.unwrap();

        backend.fail_delete_on("k_1");
        store.set("k", "ab").await.unwrap();

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("ab"));
        assert_eq!(backend.inner.get("k_chunk_count").await.unwrap(), None);
    }
}
