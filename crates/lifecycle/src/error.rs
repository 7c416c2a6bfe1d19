//! Error types for the tenant lifecycle.
//!
//! Fatal conditions are modeled here as `thiserror` enums, one per layer:
//! [`StoreError`] for the underlying database, [`RegistryError`] for the
//! structural registry, and [`ProvisionError`] / [`TeardownError`] for the two
//! entry points. Non-fatal conditions (already exists, nothing to remove,
//! skipped steps, best-effort revoke failures) are not errors at all; they are
//! reported as [`Notice`](crate::notice::Notice)s.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

/// The kind of store entity an error or notice refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A namespace (PostgreSQL schema).
    Namespace,
    /// A principal (PostgreSQL login role).
    Principal,
    /// An object inside a namespace.
    Object,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Namespace => write!(f, "namespace"),
            EntityKind::Principal => write!(f, "principal"),
            EntityKind::Object => write!(f, "object"),
        }
    }
}

/// Errors originating from the underlying relational store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection to the store failed.
    #[error("connection failed to {backend}: {message}")]
    ConnectionFailed {
        backend: &'static str,
        message: String,
    },

    /// A statement failed for a reason not covered by a more specific variant.
    #[error("{operation} failed for {subject}: {message}")]
    Query {
        operation: &'static str,
        subject: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The entity already exists.
    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: EntityKind, name: String },

    /// The entity does not exist.
    #[error("{kind} not found: {name}")]
    NotFound { kind: EntityKind, name: String },

    /// A principal cannot be removed because something still depends on it.
    #[error("principal {principal} cannot be removed: {detail}")]
    Dependency { principal: String, detail: String },

    /// The acting role lacks a privilege required by the operation.
    #[error("permission denied during {operation} on {subject}: {message}")]
    PermissionDenied {
        operation: &'static str,
        subject: String,
        message: String,
    },

    /// An object references another object that was never created.
    #[error("object {object} in {namespace} references missing object {reference}")]
    MissingReference {
        namespace: String,
        object: String,
        reference: String,
    },

    /// The store configuration cannot be used.
    #[error("invalid {backend} configuration: {message}")]
    InvalidConfig {
        backend: &'static str,
        message: String,
    },

    /// The backend cannot perform the requested operation.
    #[error("operation {operation} not supported by {backend}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },
}

impl StoreError {
    /// Builds a [`StoreError::Query`] without an underlying source.
    pub fn query(operation: &'static str, subject: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Query {
            operation,
            subject: subject.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Returns `true` for [`StoreError::AlreadyExists`].
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    /// Returns `true` for [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Returns `true` for [`StoreError::Dependency`].
    pub fn is_dependency(&self) -> bool {
        matches!(self, StoreError::Dependency { .. })
    }
}

/// Errors raised when validating tenant, namespace or principal names.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("name must not be empty")]
    Empty,

    #[error("name {name:?} exceeds the maximum identifier length of {max} bytes")]
    TooLong { name: String, max: usize },

    #[error(
        "name {name:?} must start with a lowercase letter or underscore and contain only lowercase letters, digits and underscores"
    )]
    InvalidCharacters { name: String },

    /// The name belongs to something a tenant must never own or remove.
    #[error("name {name:?} is reserved: {reason}")]
    Reserved { name: String, reason: &'static str },
}

/// Errors raised by the structural registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Two steps were registered under the same name.
    #[error("structural step {step} is registered more than once")]
    DuplicateStep { step: String },

    /// A step depends on something only a later step (or no step) provides.
    #[error("structural step {step} is registered before its dependency {missing}")]
    OrderingViolation { step: String, missing: String },

    /// A step's routine failed; remaining steps were not run.
    #[error("structural step {step} failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: StoreError,
    },

    /// A manifest directory could not be read.
    #[error("cannot load structural manifest {path}: {message}")]
    Manifest { path: String, message: String },
}

/// The provisioning step at which a store failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    Inspect,
    CreateNamespace,
    CreatePrincipal,
    SetSearchPath,
    ApplyGrants,
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProvisionStep::Inspect => "inspect",
            ProvisionStep::CreateNamespace => "create-namespace",
            ProvisionStep::CreatePrincipal => "create-principal",
            ProvisionStep::SetSearchPath => "set-search-path",
            ProvisionStep::ApplyGrants => "apply-grants",
        };
        f.write_str(name)
    }
}

/// Errors returned by [`Provisioner`](crate::provision::Provisioner).
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("invalid name: {0}")]
    InvalidName(#[from] NameError),

    #[error("provisioning tenant {tenant} failed at {step}: {source}")]
    Store {
        tenant: String,
        step: ProvisionStep,
        #[source]
        source: StoreError,
    },

    #[error("provisioning tenant {tenant} aborted: {source}")]
    Registry {
        tenant: String,
        #[source]
        source: RegistryError,
    },
}

impl ProvisionError {
    /// Name of the structural step that failed, if the failure came from one.
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            ProvisionError::Registry {
                source: RegistryError::StepFailed { step, .. },
                ..
            } => Some(step),
            _ => None,
        }
    }
}

/// The teardown step at which a store failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    Inspect,
    CountObjects,
    CountSessions,
    EvictSessions,
    DropNamespace,
    CheckOwnership,
    DropPrincipal,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TeardownStep::Inspect => "inspect",
            TeardownStep::CountObjects => "count-objects",
            TeardownStep::CountSessions => "count-sessions",
            TeardownStep::EvictSessions => "evict-sessions",
            TeardownStep::DropNamespace => "drop-namespace",
            TeardownStep::CheckOwnership => "check-ownership",
            TeardownStep::DropPrincipal => "drop-principal",
        };
        f.write_str(name)
    }
}

/// Errors returned by [`TeardownCoordinator`](crate::teardown::TeardownCoordinator).
#[derive(Error, Debug)]
pub enum TeardownError {
    #[error("invalid name: {0}")]
    InvalidName(#[from] NameError),

    /// Sessions are still attributed to the tenant and force was not set.
    /// Nothing has been changed.
    #[error(
        "teardown of tenant {tenant} aborted: {} active session(s) (pids {}); retry with force to evict them",
        .pids.len(),
        join(.pids)
    )]
    ActiveSessionConflict { tenant: String, pids: Vec<i32> },

    /// The principal still owns objects or holds grants and force was not set.
    /// The namespace may already have been dropped.
    #[error(
        "teardown of tenant {tenant} stopped: principal {principal} still depends on {}",
        join(.dependencies)
    )]
    PermissionDependency {
        tenant: String,
        principal: String,
        dependencies: Vec<String>,
    },

    /// Removing the principal failed even after the forced cleanup pass.
    #[error("failed to remove principal {principal} of tenant {tenant}: {source}")]
    PrincipalRemoval {
        tenant: String,
        principal: String,
        #[source]
        source: StoreError,
    },

    #[error("teardown of tenant {tenant} failed at {step}: {source}")]
    Store {
        tenant: String,
        step: TeardownStep,
        #[source]
        source: StoreError,
    },
}

/// Errors returned by the [`TenantLifecycle`](crate::lifecycle::TenantLifecycle) facade.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error(transparent)]
    InvalidName(#[from] NameError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Teardown(#[from] TeardownError),

    /// Recreating would remove the principal without a way to create it again.
    #[error("recreating tenant {tenant} requires a credential: its principal would be dropped and not recreated")]
    CredentialRequired { tenant: String },
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for provisioning.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Result type alias for teardown.
pub type TeardownResult<T> = Result<T, TeardownError>;
