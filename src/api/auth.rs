use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Host-side credential callbacks the dispatcher calls on a 401.
#[async_trait]
pub trait AuthHooks: Send + Sync {
    /// A fresh access token, or `None` when the session cannot be renewed.
    async fn refresh(&self) -> Option<String>;

    async fn logout(&self);
}

#[derive(Debug, Default)]
struct GateState {
    last_token: Option<String>,
}

/// What a caller got back from [`RefreshGate::refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub token: Option<String>,
    /// `true` for the one caller that actually ran [`AuthHooks::refresh`]. Only that caller
    /// acts on a failed refresh.
    pub ran_refresh: bool,
}

/// Single-flight guard around [`AuthHooks::refresh`].
///
/// Callers take a [`RefreshGate::generation`] ticket before sending. When several requests
/// fail with 401 under the same ticket, the first one through runs the refresh and the
/// rest reuse its outcome.
#[derive(Debug, Default)]
pub struct RefreshGate {
    generation: AtomicU64,
    state: Mutex<GateState>,
}

impl RefreshGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub async fn refresh(&self, ticket: u64, hooks: &Arc<dyn AuthHooks>) -> RefreshOutcome {
        let mut state = self.state.lock().await;
        if self.generation() != ticket {
            tracing::debug!(ticket, "reusing credential refresh finished by another request");
            return RefreshOutcome {
                token: state.last_token.clone(),
                ran_refresh: false,
            };
        }

        let token = hooks
            .refresh()
            .await
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        state.last_token = token.clone();
        self.generation.fetch_add(1, Ordering::AcqRel);
        RefreshOutcome {
            token,
            ran_refresh: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingHooks {
        refreshes: AtomicUsize,
        token: Option<&'static str>,
    }

    #[async_trait]
    impl AuthHooks for CountingHooks {
        async fn refresh(&self) -> Option<String> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.token.map(str::to_string)
        }

        async fn logout(&self) {}
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_call() {
        let counting = Arc::new(CountingHooks {
            refreshes: AtomicUsize::new(0),
            token: Some("fresh"),
        });
        let hooks: Arc<dyn AuthHooks> = counting.clone();
        let gate = Arc::new(RefreshGate::new());
        let ticket = gate.generation();

        let mut set = tokio::task::JoinSet::new();
        for _ in 0..5 {
            let gate = gate.clone();
            let hooks = hooks.clone();
            set.spawn(async move { gate.refresh(ticket, &hooks).await });
        }
        let mut owners = 0;
        while let Some(result) = set.join_next().await {
            let outcome = result.unwrap();
            assert_eq!(outcome.token.as_deref(), Some("fresh"));
            owners += usize::from(outcome.ran_refresh);
        }

        assert_eq!(owners, 1);
        assert_eq!(counting.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(gate.generation(), ticket + 1);
    }

    #[tokio::test]
    async fn new_ticket_triggers_new_refresh() {
        let counting = Arc::new(CountingHooks {
            refreshes: AtomicUsize::new(0),
            token: None,
        });
        let hooks: Arc<dyn AuthHooks> = counting.clone();
        let gate = RefreshGate::new();

        for _ in 0..2 {
            let outcome = gate.refresh(gate.generation(), &hooks).await;
            assert_eq!(outcome.token, None);
            assert!(outcome.ran_refresh);
        }
        assert_eq!(counting.refreshes.load(Ordering::SeqCst), 2);
    }
}
