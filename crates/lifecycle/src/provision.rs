//! Namespace provisioner.
//!
//! Creates a tenant's namespace and principal, runs the structural registry
//! against the namespace and applies the grant bundle. Every step tolerates
//! finding its work already done, so provisioning can be re-run on a tenant
//! in any state. A failing structural step aborts provisioning; steps applied
//! before it stay in place.

use std::fmt;
use std::sync::Arc;

use crate::config::LifecycleConfig;
use crate::error::{EntityKind, ProvisionError, ProvisionResult, ProvisionStep, StoreError};
use crate::grants::{GrantManager, GrantOutcome};
use crate::names::ReservedNames;
use crate::notice::Notice;
use crate::registry::{RegistryReport, StepStatus, StructuralRegistry};
use crate::store::TenantStore;

/// A login credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps a secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The secret itself.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl From<&str> for Credential {
    fn from(secret: &str) -> Self {
        Self::new(secret)
    }
}

impl From<String> for Credential {
    fn from(secret: String) -> Self {
        Self::new(secret)
    }
}

/// Input to [`Provisioner::provision`].
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    /// Tenant name; also the principal name.
    pub tenant: String,
    /// Credential for a principal that does not exist yet.
    pub credential: Option<Credential>,
    /// Namespace name; defaults to the tenant name.
    pub namespace: Option<String>,
    /// Whether to apply grants.
    pub grant: bool,
}

impl ProvisionRequest {
    /// A request with no credential, the default namespace and grants on.
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            credential: None,
            namespace: None,
            grant: true,
        }
    }

    /// Sets the credential.
    pub fn with_credential(mut self, credential: impl Into<Credential>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Overrides the namespace name.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Turns grants off.
    pub fn without_grants(mut self) -> Self {
        self.grant = false;
        self
    }
}

/// What a provisioning run did.
#[derive(Debug, Clone, Default)]
pub struct ProvisionReport {
    /// Tenant name.
    pub tenant: String,
    /// Namespace name.
    pub namespace: String,
    /// The principal, when it exists after the run.
    pub principal: Option<String>,
    /// Whether this run created the namespace.
    pub namespace_created: bool,
    /// Whether this run created the principal.
    pub principal_created: bool,
    /// Per-step outcome of the structural registry.
    pub registry: RegistryReport,
    /// Whether grants were applied.
    pub grants_applied: bool,
    /// Non-fatal conditions, in the order they were seen.
    pub notices: Vec<Notice>,
}

impl ProvisionReport {
    fn note(&mut self, notice: Notice) {
        if notice.is_idempotence_hit() {
            tracing::info!(tenant = %self.tenant, "{}", notice);
        } else {
            tracing::warn!(tenant = %self.tenant, "{}", notice);
        }
        self.notices.push(notice);
    }
}

/// Provisions tenants.
#[derive(Debug, Clone)]
pub struct Provisioner {
    store: Arc<dyn TenantStore>,
    registry: Arc<StructuralRegistry>,
    grants: GrantManager,
    config: LifecycleConfig,
}

impl Provisioner {
    /// Creates a provisioner.
    pub fn new(
        store: Arc<dyn TenantStore>,
        registry: Arc<StructuralRegistry>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            grants: GrantManager::new(store.clone()),
            store,
            registry,
            config,
        }
    }

    /// Provisions a tenant.
    pub async fn provision(&self, request: &ProvisionRequest) -> ProvisionResult<ProvisionReport> {
        let (tenant, namespace) =
            ReservedNames::new(&self.config.shared_areas, self.store.admin_principal())
                .resolve(&request.tenant, request.namespace.as_deref())?;
        let principal = tenant.principal().as_str();
        let ns = namespace.as_str();

        let store_err = |step: ProvisionStep| {
            let tenant = tenant.to_string();
            move |source: StoreError| ProvisionError::Store {
                tenant,
                step,
                source,
            }
        };

        let mut report = ProvisionReport {
            tenant: tenant.to_string(),
            namespace: ns.to_string(),
            ..Default::default()
        };

        tracing::info!(tenant = %tenant, namespace = ns, "Provisioning tenant");

        // Namespace
        match self.store.create_namespace(ns).await {
            Ok(()) => {
                tracing::info!(tenant = %tenant, namespace = ns, "Namespace created");
                report.namespace_created = true;
            }
            Err(e) if e.is_already_exists() => report.note(Notice::AlreadyExists {
                kind: EntityKind::Namespace,
                name: ns.to_string(),
            }),
            Err(e) => return Err(store_err(ProvisionStep::CreateNamespace)(e)),
        }

        // Principal
        let mut principal_exists = self
            .store
            .principal_exists(principal)
            .await
            .map_err(store_err(ProvisionStep::Inspect))?;
        if principal_exists {
            report.note(Notice::AlreadyExists {
                kind: EntityKind::Principal,
                name: principal.to_string(),
            });
        } else if let Some(credential) = &request.credential {
            match self.store.create_principal(principal, credential.expose()).await {
                Ok(()) => {
                    tracing::info!(tenant = %tenant, principal, "Principal created");
                    report.principal_created = true;
                }
                Err(e) if e.is_already_exists() => report.note(Notice::AlreadyExists {
                    kind: EntityKind::Principal,
                    name: principal.to_string(),
                }),
                Err(e) => return Err(store_err(ProvisionStep::CreatePrincipal)(e)),
            }
            principal_exists = true;
        } else {
            report.note(Notice::PrincipalMissing {
                principal: principal.to_string(),
            });
        }

        if principal_exists {
            let path = self.search_path(ns);
            self.store
                .set_principal_search_path(principal, &path)
                .await
                .map_err(store_err(ProvisionStep::SetSearchPath))?;
            tracing::debug!(principal, search_path = ?path, "Search path set");
            report.principal = Some(principal.to_string());
        }

        // Structural units
        report.registry = self
            .registry
            .run(self.store.as_ref(), ns)
            .await
            .map_err(|source| ProvisionError::Registry {
                tenant: tenant.to_string(),
                source,
            })?;
        for outcome in &report.registry.steps {
            if let StepStatus::NotImplemented { reason } = &outcome.status {
                report.notices.push(Notice::StepNotImplemented {
                    step: outcome.step.clone(),
                    reason: reason.clone(),
                });
            }
        }

        // Grants
        if request.grant && principal_exists {
            let outcome = self
                .grants
                .apply(ns, principal)
                .await
                .map_err(store_err(ProvisionStep::ApplyGrants))?;
            report.grants_applied = matches!(outcome, GrantOutcome::Applied(_));
        }

        tracing::info!(
            tenant = %tenant,
            namespace = ns,
            principal = ?report.principal,
            notices = report.notices.len(),
            "Tenant provisioned"
        );
        Ok(report)
    }

    fn search_path(&self, namespace: &str) -> Vec<String> {
        let mut path = vec![namespace.to_string()];
        if self.config.search_path_includes_shared {
            for area in &self.config.shared_areas {
                if area != namespace {
                    path.push(area.clone());
                }
            }
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn provisioner(store: Arc<MemoryStore>) -> Provisioner {
        Provisioner::new(
            store,
            Arc::new(StructuralRegistry::standard()),
            LifecycleConfig::default(),
        )
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let request = ProvisionRequest::new("acme").with_credential("s3cret");
        assert!(!format!("{:?}", request).contains("s3cret"));
    }

    #[tokio::test]
    async fn test_provision_creates_everything() {
        let store = Arc::new(MemoryStore::new());
        let report = provisioner(store.clone())
            .provision(&ProvisionRequest::new("acme").with_credential("pw"))
            .await
            .unwrap();

        assert!(report.namespace_created);
        assert!(report.principal_created);
        assert!(report.grants_applied);
        assert!(report.notices.is_empty());
        assert_eq!(report.registry.applied().len(), 4);
        assert_eq!(
            store.principal_search_path("acme"),
            Some(vec!["acme".to_string(), "public".to_string()])
        );
        assert!(store.can_use("acme", "acme", "records"));
    }

    #[tokio::test]
    async fn test_provision_without_credential_degrades() {
        let store = Arc::new(MemoryStore::new());
        let report = provisioner(store.clone())
            .provision(&ProvisionRequest::new("acme"))
            .await
            .unwrap();

        assert!(report.namespace_created);
        assert!(report.principal.is_none());
        assert!(!report.grants_applied);
        assert!(matches!(report.notices[0], Notice::PrincipalMissing { .. }));
        assert_eq!(store.object_names("acme").len(), 8);
    }

    #[tokio::test]
    async fn test_provision_with_namespace_override() {
        let store = Arc::new(MemoryStore::new());
        provisioner(store.clone())
            .provision(
                &ProvisionRequest::new("acme")
                    .with_credential("pw")
                    .with_namespace("acme_data"),
            )
            .await
            .unwrap();

        assert!(store.namespace_exists("acme_data").await.unwrap());
        assert!(!store.namespace_exists("acme").await.unwrap());
        assert!(store.can_use("acme", "acme_data", "record_links"));
    }

    #[tokio::test]
    async fn test_invalid_name_rejected_before_store_calls() {
        let store = Arc::new(MemoryStore::new());
        let err = provisioner(store.clone())
            .provision(&ProvisionRequest::new("Acme Corp"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidName(_)));
        assert_eq!(store.snapshot().namespaces.len(), 1);
    }
}
