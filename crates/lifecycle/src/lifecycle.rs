//! Entry points.

use std::sync::Arc;

use serde::Serialize;

use crate::config::LifecycleConfig;
use crate::error::LifecycleError;
use crate::names::ReservedNames;
use crate::provision::{ProvisionReport, ProvisionRequest, Provisioner};
use crate::registry::StructuralRegistry;
use crate::store::TenantStore;
use crate::teardown::{TeardownCoordinator, TeardownReport, TeardownRequest};

/// Observed state of a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantStatus {
    /// Tenant name.
    pub tenant: String,
    /// Namespace name.
    pub namespace: String,
    /// Whether the namespace exists.
    pub namespace_exists: bool,
    /// Whether the principal exists.
    pub principal_exists: bool,
    /// Objects in the namespace, when it exists.
    pub object_count: Option<u64>,
    /// Live sessions attributed to the tenant.
    pub session_count: usize,
}

impl TenantStatus {
    /// Neither namespace nor principal exists.
    pub fn is_absent(&self) -> bool {
        !self.namespace_exists && !self.principal_exists
    }

    /// Both namespace and principal exist.
    pub fn is_complete(&self) -> bool {
        self.namespace_exists && self.principal_exists
    }
}

/// Result of [`TenantLifecycle::recreate`].
#[derive(Debug, Clone)]
pub struct RecreateReport {
    /// The teardown, when the tenant existed.
    pub teardown: Option<TeardownReport>,
    /// The provisioning run.
    pub provision: ProvisionReport,
}

/// Provisioning and teardown over one store.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use burrow_lifecycle::{MemoryStore, ProvisionRequest, TeardownRequest, TenantLifecycle};
///
/// # tokio_test::block_on(async {
/// let lifecycle = TenantLifecycle::with_defaults(Arc::new(MemoryStore::new()));
///
/// lifecycle
///     .provision(&ProvisionRequest::new("acme").with_credential("secret"))
///     .await
///     .unwrap();
/// assert!(lifecycle.status("acme", None).await.unwrap().is_complete());
///
/// lifecycle.teardown(&TeardownRequest::new("acme")).await.unwrap();
/// assert!(lifecycle.status("acme", None).await.unwrap().is_absent());
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct TenantLifecycle {
    store: Arc<dyn TenantStore>,
    registry: Arc<StructuralRegistry>,
    config: LifecycleConfig,
    provisioner: Provisioner,
    coordinator: TeardownCoordinator,
}

impl TenantLifecycle {
    /// Creates a lifecycle manager.
    pub fn new(
        store: Arc<dyn TenantStore>,
        registry: StructuralRegistry,
        config: LifecycleConfig,
    ) -> Self {
        let registry = Arc::new(registry);
        Self {
            provisioner: Provisioner::new(store.clone(), registry.clone(), config.clone()),
            coordinator: TeardownCoordinator::new(store.clone(), config.clone()),
            store,
            registry,
            config,
        }
    }

    /// Creates a lifecycle manager with the standard registry and default
    /// configuration.
    pub fn with_defaults(store: Arc<dyn TenantStore>) -> Self {
        Self::new(store, StructuralRegistry::standard(), LifecycleConfig::default())
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn TenantStore> {
        &self.store
    }

    /// The structural registry.
    pub fn registry(&self) -> &StructuralRegistry {
        &self.registry
    }

    /// The configuration.
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Provisions a tenant. See [`Provisioner::provision`].
    pub async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionReport, LifecycleError> {
        Ok(self.provisioner.provision(request).await?)
    }

    /// Tears a tenant down. See [`TeardownCoordinator::teardown`].
    pub async fn teardown(&self, request: &TeardownRequest) -> Result<TeardownReport, LifecycleError> {
        Ok(self.coordinator.teardown(request).await?)
    }

    /// Tears the tenant down if any part of it exists, then provisions it.
    ///
    /// Fails with [`LifecycleError::CredentialRequired`] before changing
    /// anything if the principal exists and the request carries no
    /// credential to create it again.
    pub async fn recreate(
        &self,
        request: &ProvisionRequest,
        force: bool,
    ) -> Result<RecreateReport, LifecycleError> {
        let status = self
            .status(&request.tenant, request.namespace.as_deref())
            .await?;

        if status.principal_exists && request.credential.is_none() {
            return Err(LifecycleError::CredentialRequired {
                tenant: status.tenant,
            });
        }

        let teardown = if status.is_absent() {
            None
        } else {
            let mut teardown = TeardownRequest::new(request.tenant.as_str()).force(force);
            teardown.namespace = request.namespace.clone();
            Some(self.teardown(&teardown).await?)
        };

        let provision = self.provision(request).await?;
        Ok(RecreateReport {
            teardown,
            provision,
        })
    }

    /// Reports what exists for a tenant without changing anything.
    pub async fn status(&self, tenant: &str, namespace: Option<&str>) -> Result<TenantStatus, LifecycleError> {
        let (tenant, namespace) =
            ReservedNames::new(&self.config.shared_areas, self.store.admin_principal())
                .resolve(tenant, namespace)?;
        let principal = tenant.principal().as_str();

        let namespace_exists = self.store.namespace_exists(namespace.as_str()).await?;
        let principal_exists = self.store.principal_exists(principal).await?;
        let object_count = if namespace_exists {
            Some(self.store.count_namespace_objects(namespace.as_str()).await?)
        } else {
            None
        };
        let session_count = self
            .store
            .list_sessions(tenant.as_str(), Some(principal))
            .await?
            .len();

        Ok(TenantStatus {
            tenant: tenant.to_string(),
            namespace: namespace.to_string(),
            namespace_exists,
            principal_exists,
            object_count,
            session_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NameError;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_status_of_partial_tenant() {
        let store = Arc::new(MemoryStore::new());
        store.create_principal("acme", "pw").await.unwrap();
        store.open_session(Some("acme"), None);

        let lifecycle = TenantLifecycle::with_defaults(store);
        let status = lifecycle.status("acme", None).await.unwrap();
        assert!(!status.namespace_exists);
        assert!(status.principal_exists);
        assert_eq!(status.object_count, None);
        assert_eq!(status.session_count, 1);
        assert!(!status.is_absent());
        assert!(!status.is_complete());
    }

    #[tokio::test]
    async fn test_recreate_resets_namespace() {
        let store = Arc::new(MemoryStore::new());
        let lifecycle = TenantLifecycle::with_defaults(store.clone());
        let request = ProvisionRequest::new("acme").with_credential("pw");

        let first = lifecycle.recreate(&request, false).await.unwrap();
        assert!(first.teardown.is_none());

        store
            .create_owned_object("acme", "scratch", crate::store::ObjectKind::Table, "postgres")
            .unwrap();
        let second = lifecycle.recreate(&request, false).await.unwrap();
        assert!(second.teardown.is_some());
        assert!(!store.object_names("acme").contains(&"scratch".to_string()));
        assert!(lifecycle.status("acme", None).await.unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_recreate_without_credential_keeps_principal() {
        let store = Arc::new(MemoryStore::new());
        let lifecycle = TenantLifecycle::with_defaults(store.clone());
        lifecycle
            .provision(&ProvisionRequest::new("acme").with_credential("pw"))
            .await
            .unwrap();
        let before = store.snapshot();

        let err = lifecycle
            .recreate(&ProvisionRequest::new("acme"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::CredentialRequired { ref tenant } if tenant == "acme"));
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn test_recreate_without_credential_when_principal_absent() {
        let store = Arc::new(MemoryStore::new());
        let lifecycle = TenantLifecycle::with_defaults(store.clone());
        store.create_namespace("acme").await.unwrap();

        let report = lifecycle
            .recreate(&ProvisionRequest::new("acme"), false)
            .await
            .unwrap();
        assert!(report.teardown.is_some());
        assert!(report.provision.principal.is_none());
    }

    #[tokio::test]
    async fn test_status_rejects_reserved_names() {
        let store = Arc::new(MemoryStore::new());
        let lifecycle = TenantLifecycle::with_defaults(store);
        for (tenant, namespace) in [("public", None), ("acme", Some("public")), ("postgres", None)] {
            let err = lifecycle.status(tenant, namespace).await.unwrap_err();
            assert!(
                matches!(err, LifecycleError::InvalidName(NameError::Reserved { .. })),
                "{tenant}/{namespace:?} was accepted"
            );
        }
    }
}
