//! Grant manager.
//!
//! Applies the tenant privilege bundle to a principal and removes it again.
//! The bundle for a namespace is:
//!
//! 1. usage on the namespace,
//! 2. full access to every object of every [`ObjectClass`] currently in it,
//! 3. a default-privileges policy for every class that has one, so objects
//!    created later inherit the same access.
//!
//! Revocation is best-effort per target and collected into a [`RevokeReport`];
//! the caller decides what a failure means.

use std::sync::Arc;

use serde::Serialize;

use crate::error::StoreResult;
use crate::store::{GrantTarget, ObjectClass, TenantStore};

/// Outcome of [`GrantManager::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    /// Every target of the bundle was granted.
    Applied(Vec<GrantTarget>),
    /// The principal does not exist; nothing was granted.
    PrincipalMissing,
}

/// Outcome of revoking one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum RevokeOutcome {
    Revoked,
    Skipped { reason: String },
    Failed { message: String },
}

/// One target in a [`RevokeReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevokeEntry {
    /// What was revoked.
    pub target: GrantTarget,
    /// How it went.
    pub outcome: RevokeOutcome,
}

/// Aggregated result of a revoke pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RevokeReport {
    /// Every attempted target, in order.
    pub entries: Vec<RevokeEntry>,
}

impl RevokeReport {
    fn push(&mut self, target: GrantTarget, outcome: RevokeOutcome) {
        self.entries.push(RevokeEntry { target, outcome });
    }

    /// Number of targets revoked.
    pub fn revoked(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.outcome == RevokeOutcome::Revoked)
            .count()
    }

    /// Entries that failed.
    pub fn failures(&self) -> impl Iterator<Item = &RevokeEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, RevokeOutcome::Failed { .. }))
    }

    /// Returns `true` if nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Appends another report.
    pub fn extend(&mut self, other: RevokeReport) {
        self.entries.extend(other.entries);
    }
}

/// The grant targets that make up the tenant bundle for `namespace`, in
/// grant order.
pub fn bundle(namespace: &str) -> Vec<GrantTarget> {
    let mut targets = vec![GrantTarget::Namespace {
        namespace: namespace.to_string(),
    }];
    targets.extend(ObjectClass::ALL.iter().map(|class| GrantTarget::AllInNamespace {
        namespace: namespace.to_string(),
        class: *class,
    }));
    targets.extend(
        ObjectClass::ALL
            .iter()
            .filter(|class| class.has_default_policy())
            .map(|class| GrantTarget::DefaultPrivileges {
                namespace: namespace.to_string(),
                class: *class,
            }),
    );
    targets
}

/// Applies and revokes the tenant privilege bundle.
#[derive(Debug, Clone)]
pub struct GrantManager {
    store: Arc<dyn TenantStore>,
}

impl GrantManager {
    /// Creates a grant manager over a store.
    pub fn new(store: Arc<dyn TenantStore>) -> Self {
        Self { store }
    }

    /// Grants the bundle for `namespace` to `principal`.
    ///
    /// Does nothing, with a warning, when the principal does not exist.
    pub async fn apply(&self, namespace: &str, principal: &str) -> StoreResult<GrantOutcome> {
        if !self.store.principal_exists(principal).await? {
            tracing::warn!(namespace, principal, "Principal does not exist, skipping grants");
            return Ok(GrantOutcome::PrincipalMissing);
        }

        let targets = bundle(namespace);
        for target in &targets {
            tracing::debug!(namespace, principal, target = %target, "Granting");
            self.store.grant(target, principal).await?;
        }

        tracing::info!(namespace, principal, targets = targets.len(), "Grants applied");
        Ok(GrantOutcome::Applied(targets))
    }

    /// Revokes the bundle for `namespace` and for each shared area.
    ///
    /// Areas that do not exist are skipped. A failure on one target is
    /// recorded and the pass continues.
    pub async fn revoke(
        &self,
        namespace: Option<&str>,
        principal: &str,
        shared_areas: &[String],
    ) -> RevokeReport {
        let mut report = RevokeReport::default();

        let mut areas: Vec<&str> = namespace.into_iter().collect();
        for area in shared_areas {
            if !areas.contains(&area.as_str()) {
                areas.push(area);
            }
        }

        for area in areas {
            let usage = GrantTarget::Namespace {
                namespace: area.to_string(),
            };
            match self.store.namespace_exists(area).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(namespace = area, principal, "Area does not exist, nothing to revoke");
                    report.push(
                        usage,
                        RevokeOutcome::Skipped {
                            reason: format!("namespace {area} does not exist"),
                        },
                    );
                    continue;
                }
                Err(e) => {
                    tracing::warn!(namespace = area, principal, error = %e, "Cannot inspect area");
                    report.push(
                        usage,
                        RevokeOutcome::Failed {
                            message: e.to_string(),
                        },
                    );
                    continue;
                }
            }

            // Reverse grant order: stop future inheritance first.
            let mut targets = bundle(area);
            targets.reverse();
            report.extend(self.revoke_targets(principal, targets).await);
        }

        report
    }

    /// Revokes each target independently.
    pub async fn revoke_targets(
        &self,
        principal: &str,
        targets: impl IntoIterator<Item = GrantTarget>,
    ) -> RevokeReport {
        let mut report = RevokeReport::default();
        for target in targets {
            let outcome = match self.store.revoke(&target, principal).await {
                Ok(()) => RevokeOutcome::Revoked,
                Err(e) if e.is_not_found() => RevokeOutcome::Skipped {
                    reason: e.to_string(),
                },
                Err(e) => {
                    tracing::warn!(principal, target = %target, error = %e, "Revoke failed, continuing");
                    RevokeOutcome::Failed {
                        message: e.to_string(),
                    }
                }
            };
            report.push(target, outcome);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{FailPoint, MemoryStore, ObjectDef, ObjectKind};

    fn setup() -> (Arc<MemoryStore>, GrantManager) {
        let store = Arc::new(MemoryStore::new());
        let grants = GrantManager::new(store.clone());
        (store, grants)
    }

    #[test]
    fn test_bundle_shape() {
        let targets = bundle("acme");
        assert_eq!(targets.len(), 1 + 5 + 4);
        assert_eq!(
            targets[0],
            GrantTarget::Namespace {
                namespace: "acme".to_string()
            }
        );
        assert!(!targets.contains(&GrantTarget::DefaultPrivileges {
            namespace: "acme".to_string(),
            class: ObjectClass::Procedures,
        }));
    }

    #[tokio::test]
    async fn test_apply_without_principal_is_noop() {
        let (store, grants) = setup();
        store.create_namespace("acme").await.unwrap();
        let outcome = grants.apply("acme", "acme").await.unwrap();
        assert_eq!(outcome, GrantOutcome::PrincipalMissing);
    }

    #[tokio::test]
    async fn test_apply_then_revoke_leaves_nothing() {
        let (store, grants) = setup();
        store.create_namespace("acme").await.unwrap();
        store.create_principal("acme", "pw").await.unwrap();
        store
            .create_object("acme", &ObjectDef::new("records", ObjectKind::Table, ""))
            .await
            .unwrap();

        grants.apply("acme", "acme").await.unwrap();
        assert!(store.can_use("acme", "acme", "records"));

        let report = grants.revoke(Some("acme"), "acme", &["public".to_string()]).await;
        assert!(report.is_clean());
        assert_eq!(store.grant_count("acme"), 0);
    }

    #[tokio::test]
    async fn test_revoke_skips_missing_areas_and_continues_past_failures() {
        let (store, grants) = setup();
        store.create_namespace("acme").await.unwrap();
        store.create_principal("acme", "pw").await.unwrap();
        store.fail_next(
            FailPoint::Revoke,
            StoreError::PermissionDenied {
                operation: "revoke",
                subject: "acme".to_string(),
                message: "must be owner".to_string(),
            },
        );

        let report = grants
            .revoke(Some("acme"), "acme", &["common".to_string()])
            .await;
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.revoked(), bundle("acme").len() - 1);
        assert!(report.entries.iter().any(|e| matches!(
            (&e.target, &e.outcome),
            (GrantTarget::Namespace { namespace }, RevokeOutcome::Skipped { .. }) if namespace == "common"
        )));
    }
}
