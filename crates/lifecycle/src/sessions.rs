//! Session eviction.

use std::sync::Arc;

use serde::Serialize;

use crate::config::EvictionPolicy;
use crate::error::StoreResult;
use crate::store::{SessionInfo, TenantStore};

/// Result of an eviction run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    /// Passes run, including the final one that found nothing.
    pub passes: u32,
    /// Sessions terminated across all passes.
    pub terminated: usize,
    /// Sessions still attributed to the tenant after the last pass.
    pub remaining: usize,
}

/// Terminates live sessions attributed to a tenant.
///
/// Clients may reconnect while they are being evicted, so each pass
/// re-enumerates. The loop is bounded by the policy and gives no guarantee
/// that zero sessions remain.
#[derive(Debug, Clone)]
pub struct SessionEvictor {
    store: Arc<dyn TenantStore>,
    policy: EvictionPolicy,
}

impl SessionEvictor {
    /// Creates an evictor with the given policy.
    pub fn new(store: Arc<dyn TenantStore>, policy: EvictionPolicy) -> Self {
        Self { store, policy }
    }

    /// Lists the sessions currently attributed to the tenant.
    pub async fn sessions(&self, tenant: &str, principal: Option<&str>) -> StoreResult<Vec<SessionInfo>> {
        self.store.list_sessions(tenant, principal).await
    }

    /// Runs up to `max_passes` enumerate-and-terminate passes.
    pub async fn evict(&self, tenant: &str, principal: Option<&str>) -> StoreResult<EvictionReport> {
        let mut report = EvictionReport::default();

        for pass in 1..=self.policy.max_passes.max(1) {
            let sessions = self.store.list_sessions(tenant, principal).await?;
            report.passes = pass;
            if sessions.is_empty() {
                report.remaining = 0;
                return Ok(report);
            }

            for session in &sessions {
                match self.store.terminate_session(session.pid).await {
                    Ok(true) => {
                        tracing::debug!(tenant, pid = session.pid, user = ?session.user, "Terminated session");
                        report.terminated += 1;
                    }
                    Ok(false) => {
                        tracing::debug!(tenant, pid = session.pid, "Session already gone");
                    }
                    Err(e) => {
                        tracing::warn!(tenant, pid = session.pid, error = %e, "Failed to terminate session");
                    }
                }
            }

            if pass < self.policy.max_passes && !self.policy.pass_interval().is_zero() {
                tokio::time::sleep(self.policy.pass_interval()).await;
            }
        }

        report.remaining = self.store.list_sessions(tenant, principal).await?.len();
        if report.remaining > 0 {
            tracing::warn!(
                tenant,
                remaining = report.remaining,
                passes = report.passes,
                "Sessions survived eviction"
            );
        } else {
            tracing::info!(tenant, terminated = report.terminated, "Sessions evicted");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_evict_stops_early_when_clear() {
        let store = Arc::new(MemoryStore::new());
        store.open_session(Some("acme"), None);
        store.open_session(Some("other"), Some("acme"));
        store.open_session(Some("other"), None);

        let evictor = SessionEvictor::new(store.clone(), EvictionPolicy::immediate(3));
        let report = evictor.evict("acme", Some("acme")).await.unwrap();
        assert_eq!(report.terminated, 2);
        assert_eq!(report.passes, 2);
        assert_eq!(report.remaining, 0);
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn test_evict_is_bounded_against_reconnects() {
        let store = Arc::new(MemoryStore::new());
        store.open_session(Some("acme"), None);
        store.reconnect_on_terminate("acme", 10);

        let evictor = SessionEvictor::new(store.clone(), EvictionPolicy::immediate(3));
        let report = evictor.evict("acme", Some("acme")).await.unwrap();
        assert_eq!(report.passes, 3);
        assert_eq!(report.terminated, 3);
        assert_eq!(report.remaining, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_waits_between_passes() {
        let store = Arc::new(MemoryStore::new());
        store.open_session(Some("acme"), None);
        store.reconnect_on_terminate("acme", 1);

        let evictor = SessionEvictor::new(store.clone(), EvictionPolicy::default());
        let started = tokio::time::Instant::now();
        let report = evictor.evict("acme", Some("acme")).await.unwrap();
        assert_eq!(report.terminated, 2);
        assert_eq!(report.remaining, 0);
        assert!(started.elapsed() >= std::time::Duration::from_millis(400));
    }
}
