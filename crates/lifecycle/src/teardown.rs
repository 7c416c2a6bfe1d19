//! Teardown coordinator.
//!
//! Removes a tenant's namespace and principal. Teardown is not one
//! transaction: each step is atomic on its own and the sequence is safe to
//! re-run, so a call that stopped part-way (crash, conflict, dependency) is
//! completed by the next call with the same tenant name.
//!
//! The sequence:
//!
//! 1. Inspect the namespace and the principal independently. Nothing there
//!    means nothing to do.
//! 2. With a namespace: count its objects and the tenant's live sessions.
//!    Sessions abort the teardown unless `force` is set, in which case they are
//!    evicted.
//! 3. With a principal: revoke its grants in the namespace and in every shared
//!    area, best-effort.
//! 4. Drop the namespace and everything in it.
//! 5. With a principal: refuse to continue while it still owns objects
//!    elsewhere, unless `force` is set.
//! 6. Drop the principal. Under `force`, a residual dependency triggers one
//!    extra cleanup of whatever grants remain and one retry.

use std::sync::Arc;

use serde::Serialize;

use crate::config::LifecycleConfig;
use crate::error::{EntityKind, StoreError, TeardownError, TeardownResult, TeardownStep};
use crate::grants::{GrantManager, RevokeOutcome, RevokeReport};
use crate::names::ReservedNames;
use crate::notice::Notice;
use crate::sessions::{EvictionReport, SessionEvictor};
use crate::store::TenantStore;

/// Input to [`TeardownCoordinator::teardown`].
#[derive(Debug, Clone)]
pub struct TeardownRequest {
    /// Tenant name; also the principal name.
    pub tenant: String,
    /// Evict sessions and continue past principal dependencies.
    pub force: bool,
    /// Namespace name used at provisioning; defaults to the tenant name.
    pub namespace: Option<String>,
}

impl TeardownRequest {
    /// A non-forced request for the default namespace.
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            force: false,
            namespace: None,
        }
    }

    /// Sets force mode.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Overrides the namespace name.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Terminal state of a successful teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownState {
    /// Something was removed.
    #[default]
    Removed,
    /// Neither the namespace nor the principal existed.
    AlreadyAbsent,
}

/// What a teardown run did.
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    /// Tenant name.
    pub tenant: String,
    /// Namespace name.
    pub namespace: String,
    /// Terminal state.
    pub state: TeardownState,
    /// Whether this run dropped the namespace.
    pub namespace_dropped: bool,
    /// Objects the namespace held when it was dropped.
    pub objects_dropped: u64,
    /// Whether this run dropped the principal.
    pub principal_dropped: bool,
    /// Sessions attributed to the tenant before eviction.
    pub sessions_found: usize,
    /// Eviction result, when sessions were evicted.
    pub eviction: Option<EvictionReport>,
    /// Revokes in the namespace and shared areas.
    pub revokes: RevokeReport,
    /// Revokes of residual grants during the forced retry.
    pub residual_revokes: Option<RevokeReport>,
    /// Non-fatal conditions, in the order they were seen.
    pub notices: Vec<Notice>,
}

impl TeardownReport {
    fn note(&mut self, notice: Notice) {
        if notice.is_idempotence_hit() {
            tracing::info!(tenant = %self.tenant, "{}", notice);
        } else {
            tracing::warn!(tenant = %self.tenant, "{}", notice);
        }
        self.notices.push(notice);
    }

    fn note_revoke_failures(&mut self, revokes: &RevokeReport) {
        for entry in revokes.failures() {
            if let RevokeOutcome::Failed { message } = &entry.outcome {
                self.notices.push(Notice::RevokeBestEffortFailure {
                    target: entry.target.to_string(),
                    message: message.clone(),
                });
            }
        }
    }
}

/// Tears tenants down.
#[derive(Debug, Clone)]
pub struct TeardownCoordinator {
    store: Arc<dyn TenantStore>,
    grants: GrantManager,
    evictor: SessionEvictor,
    config: LifecycleConfig,
}

impl TeardownCoordinator {
    /// Creates a teardown coordinator.
    pub fn new(store: Arc<dyn TenantStore>, config: LifecycleConfig) -> Self {
        Self {
            grants: GrantManager::new(store.clone()),
            evictor: SessionEvictor::new(store.clone(), config.eviction.clone()),
            store,
            config,
        }
    }

    /// Tears a tenant down.
    pub async fn teardown(&self, request: &TeardownRequest) -> TeardownResult<TeardownReport> {
        let (tenant, namespace) =
            ReservedNames::new(&self.config.shared_areas, self.store.admin_principal())
                .resolve(&request.tenant, request.namespace.as_deref())?;
        let principal = tenant.principal().as_str();
        let ns = namespace.as_str();
        let force = request.force;

        let store_err = |step: TeardownStep| {
            let tenant = tenant.to_string();
            move |source: StoreError| TeardownError::Store {
                tenant,
                step,
                source,
            }
        };

        let mut report = TeardownReport {
            tenant: tenant.to_string(),
            namespace: ns.to_string(),
            ..Default::default()
        };

        // 1. Inspect
        let namespace_exists = self
            .store
            .namespace_exists(ns)
            .await
            .map_err(store_err(TeardownStep::Inspect))?;
        let principal_exists = self
            .store
            .principal_exists(principal)
            .await
            .map_err(store_err(TeardownStep::Inspect))?;

        tracing::info!(
            tenant = %tenant,
            namespace = ns,
            namespace_exists,
            principal_exists,
            force,
            "Tearing down tenant"
        );

        if !namespace_exists && !principal_exists {
            report.note(Notice::NotFound {
                kind: EntityKind::Namespace,
                name: ns.to_string(),
            });
            report.note(Notice::NotFound {
                kind: EntityKind::Principal,
                name: principal.to_string(),
            });
            report.state = TeardownState::AlreadyAbsent;
            return Ok(report);
        }

        // 2. Objects and sessions
        if namespace_exists {
            report.objects_dropped = self
                .store
                .count_namespace_objects(ns)
                .await
                .map_err(store_err(TeardownStep::CountObjects))?;

            let sessions = self
                .evictor
                .sessions(tenant.as_str(), Some(principal))
                .await
                .map_err(store_err(TeardownStep::CountSessions))?;
            report.sessions_found = sessions.len();
            tracing::debug!(
                tenant = %tenant,
                objects = report.objects_dropped,
                sessions = sessions.len(),
                "Namespace inspected"
            );

            if !sessions.is_empty() {
                if !force {
                    return Err(TeardownError::ActiveSessionConflict {
                        tenant: tenant.to_string(),
                        pids: sessions.iter().map(|s| s.pid).collect(),
                    });
                }
                let eviction = self
                    .evictor
                    .evict(tenant.as_str(), Some(principal))
                    .await
                    .map_err(store_err(TeardownStep::EvictSessions))?;
                if eviction.remaining > 0 {
                    report.note(Notice::SessionsRemaining {
                        count: eviction.remaining,
                    });
                }
                report.eviction = Some(eviction);
            }
        }

        // 3. Revoke
        if principal_exists {
            let revokes = self
                .grants
                .revoke(
                    namespace_exists.then_some(ns),
                    principal,
                    &self.config.shared_areas,
                )
                .await;
            report.note_revoke_failures(&revokes);
            report.revokes = revokes;
        }

        // 4. Drop the namespace
        if namespace_exists {
            match self.store.drop_namespace_cascade(ns).await {
                Ok(()) => {
                    tracing::info!(tenant = %tenant, namespace = ns, objects = report.objects_dropped, "Namespace dropped");
                    report.namespace_dropped = true;
                }
                Err(e) if e.is_not_found() => report.note(Notice::NotFound {
                    kind: EntityKind::Namespace,
                    name: ns.to_string(),
                }),
                Err(e) => return Err(store_err(TeardownStep::DropNamespace)(e)),
            }
        } else {
            report.note(Notice::NotFound {
                kind: EntityKind::Namespace,
                name: ns.to_string(),
            });
        }

        if !principal_exists {
            report.note(Notice::NotFound {
                kind: EntityKind::Principal,
                name: principal.to_string(),
            });
            return Ok(report);
        }

        // 5. Ownership outside the namespace
        let owned = self
            .store
            .owned_objects(principal)
            .await
            .map_err(store_err(TeardownStep::CheckOwnership))?;
        if !owned.is_empty() {
            let objects: Vec<String> = owned.iter().map(ToString::to_string).collect();
            if !force {
                return Err(TeardownError::PermissionDependency {
                    tenant: tenant.to_string(),
                    principal: principal.to_string(),
                    dependencies: objects,
                });
            }
            report.note(Notice::ForcedPastDependency {
                principal: principal.to_string(),
                objects,
            });
        }

        // 6. Drop the principal
        match self.store.drop_principal(principal).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                report.note(Notice::NotFound {
                    kind: EntityKind::Principal,
                    name: principal.to_string(),
                });
                return Ok(report);
            }
            Err(e) if e.is_dependency() => {
                if !force {
                    let dependencies = self.dependencies(principal, &e).await;
                    return Err(TeardownError::PermissionDependency {
                        tenant: tenant.to_string(),
                        principal: principal.to_string(),
                        dependencies,
                    });
                }

                tracing::warn!(tenant = %tenant, principal, error = %e, "Principal still has dependencies, cleaning up residual grants");
                let residual = self
                    .store
                    .residual_grants(principal)
                    .await
                    .map_err(store_err(TeardownStep::DropPrincipal))?;
                let revokes = self.grants.revoke_targets(principal, residual).await;
                report.note_revoke_failures(&revokes);
                report.residual_revokes = Some(revokes);

                self.store.drop_principal(principal).await.map_err(|source| {
                    TeardownError::PrincipalRemoval {
                        tenant: tenant.to_string(),
                        principal: principal.to_string(),
                        source,
                    }
                })?;
            }
            Err(e) => return Err(store_err(TeardownStep::DropPrincipal)(e)),
        }

        tracing::info!(tenant = %tenant, principal, "Principal dropped");
        report.principal_dropped = true;
        Ok(report)
    }

    /// Everything the principal still depends on, for error reporting.
    async fn dependencies(&self, principal: &str, err: &StoreError) -> Vec<String> {
        let mut dependencies: Vec<String> = match self.store.owned_objects(principal).await {
            Ok(owned) => owned.iter().map(ToString::to_string).collect(),
            Err(_) => Vec::new(),
        };
        if let Ok(grants) = self.store.residual_grants(principal).await {
            dependencies.extend(grants.iter().map(|g| format!("grant: {g}")));
        }
        if dependencies.is_empty() {
            dependencies.push(err.to_string());
        }
        dependencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FailPoint, GrantTarget, MemoryStore, ObjectKind, ObjectRef};

    fn coordinator(store: Arc<MemoryStore>) -> TeardownCoordinator {
        let config = LifecycleConfig::default()
            .with_eviction(crate::config::EvictionPolicy::immediate(3));
        TeardownCoordinator::new(store, config)
    }

    async fn seed(store: &MemoryStore) {
        store.create_namespace("acme").await.unwrap();
        store.create_principal("acme", "pw").await.unwrap();
    }

    #[tokio::test]
    async fn test_nothing_to_remove() {
        let store = Arc::new(MemoryStore::new());
        let report = coordinator(store)
            .teardown(&TeardownRequest::new("acme"))
            .await
            .unwrap();
        assert_eq!(report.state, TeardownState::AlreadyAbsent);
        assert_eq!(report.notices.len(), 2);
        assert!(report.notices.iter().all(Notice::is_idempotence_hit));
    }

    #[tokio::test]
    async fn test_principal_only() {
        let store = Arc::new(MemoryStore::new());
        store.create_principal("acme", "pw").await.unwrap();

        let report = coordinator(store.clone())
            .teardown(&TeardownRequest::new("acme"))
            .await
            .unwrap();
        assert!(report.principal_dropped);
        assert!(!report.namespace_dropped);
        assert!(!store.principal_exists("acme").await.unwrap());
    }

    #[tokio::test]
    async fn test_owned_object_elsewhere_blocks_without_force() {
        let store = Arc::new(MemoryStore::new());
        seed(&store).await;
        store
            .create_owned_object("public", "audit", ObjectKind::Table, "acme")
            .unwrap();

        let err = coordinator(store.clone())
            .teardown(&TeardownRequest::new("acme"))
            .await
            .unwrap_err();
        match err {
            TeardownError::PermissionDependency { dependencies, .. } => {
                assert_eq!(dependencies, vec!["table public.audit".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        // namespace removal is not undone
        assert!(!store.namespace_exists("acme").await.unwrap());
        assert!(store.principal_exists("acme").await.unwrap());
    }

    #[tokio::test]
    async fn test_forced_removal_surfaces_ownership_failure() {
        let store = Arc::new(MemoryStore::new());
        seed(&store).await;
        store
            .create_owned_object("public", "audit", ObjectKind::Table, "acme")
            .unwrap();

        let err = coordinator(store.clone())
            .teardown(&TeardownRequest::new("acme").force(true))
            .await
            .unwrap_err();
        assert!(matches!(err, TeardownError::PrincipalRemoval { .. }));
    }

    #[tokio::test]
    async fn test_forced_retry_revokes_residual_grants() {
        let store = Arc::new(MemoryStore::new());
        seed(&store).await;
        store.create_namespace("common").await.unwrap();
        store
            .create_owned_object("common", "lookup", ObjectKind::Table, "postgres")
            .unwrap();
        let stray = GrantTarget::Object {
            object: ObjectRef::new("common", "lookup", ObjectKind::Table),
        };
        store.grant(&stray, "acme").await.unwrap();

        // "common" is not a configured shared area, so only the retry finds it.
        let err = coordinator(store.clone())
            .teardown(&TeardownRequest::new("acme"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TeardownError::PermissionDependency { ref dependencies, .. }
                if dependencies == &vec!["grant: table common.lookup".to_string()]
        ));

        let report = coordinator(store.clone())
            .teardown(&TeardownRequest::new("acme").force(true))
            .await
            .unwrap();
        assert!(report.principal_dropped);
        assert_eq!(report.residual_revokes.map(|r| r.revoked()), Some(1));
        assert!(!store.has_grant("acme", &stray));
    }

    #[tokio::test]
    async fn test_drop_namespace_failure_names_step() {
        let store = Arc::new(MemoryStore::new());
        seed(&store).await;
        store.fail_next(
            FailPoint::DropNamespace,
            StoreError::query("drop-namespace", "acme", "lock timeout"),
        );

        let err = coordinator(store.clone())
            .teardown(&TeardownRequest::new("acme"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TeardownError::Store {
                step: TeardownStep::DropNamespace,
                ..
            }
        ));
        assert!(err.to_string().contains("drop-namespace"));
    }
}
