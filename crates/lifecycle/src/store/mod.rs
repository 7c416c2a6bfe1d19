//! The relational store the lifecycle operates on.
//!
//! [`TenantStore`] is the narrow set of primitives the provisioner and the
//! teardown coordinator need: namespace and principal existence, creation and
//! removal, grant and revoke at a few scopes, default-privilege policies and
//! live session enumeration. Each primitive is atomic in isolation; nothing in
//! this trait spans several of them.
//!
//! Two implementations exist:
//!
//! - [`PostgresStore`](postgres::PostgresStore) (feature `postgres`) against a
//!   real database through a deadpool connection pool.
//! - [`MemoryStore`] which models the same semantics in process. It backs the
//!   lifecycle tests and supports fault injection.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{FailPoint, MemorySnapshot, MemoryStore};

/// Application name announced by the coordinator's own connections.
pub const COORDINATOR_APPLICATION_NAME: &str = "burrow";

/// A set of objects a grant can cover in bulk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    /// Tables and views.
    Tables,
    /// Sequences.
    Sequences,
    /// Functions.
    Functions,
    /// Procedures.
    Procedures,
    /// User-defined types.
    Types,
}

impl ObjectClass {
    /// Every object class, in the order grants are applied.
    pub const ALL: [ObjectClass; 5] = [
        ObjectClass::Tables,
        ObjectClass::Sequences,
        ObjectClass::Functions,
        ObjectClass::Procedures,
        ObjectClass::Types,
    ];

    /// Whether a default-privileges policy exists for this class.
    ///
    /// PostgreSQL folds procedures into the function policy.
    pub fn has_default_policy(self) -> bool {
        !matches!(self, ObjectClass::Procedures)
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectClass::Tables => "tables",
            ObjectClass::Sequences => "sequences",
            ObjectClass::Functions => "functions",
            ObjectClass::Procedures => "procedures",
            ObjectClass::Types => "types",
        };
        f.write_str(name)
    }
}

/// The kind of a single store object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum ObjectKind {
    Schema,
    Table,
    View,
    Sequence,
    Function,
    Procedure,
    Type,
}

impl ObjectKind {
    /// The bulk grant class covering this kind, if any.
    pub fn class(self) -> Option<ObjectClass> {
        match self {
            ObjectKind::Schema => None,
            ObjectKind::Table | ObjectKind::View => Some(ObjectClass::Tables),
            ObjectKind::Sequence => Some(ObjectClass::Sequences),
            ObjectKind::Function => Some(ObjectClass::Functions),
            ObjectKind::Procedure => Some(ObjectClass::Procedures),
            ObjectKind::Type => Some(ObjectClass::Types),
        }
    }

    /// The class whose default-privileges policy covers newly created objects
    /// of this kind.
    pub fn default_policy_class(self) -> Option<ObjectClass> {
        match self.class()? {
            ObjectClass::Procedures => Some(ObjectClass::Functions),
            class => Some(class),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Schema => "schema",
            ObjectKind::Table => "table",
            ObjectKind::View => "view",
            ObjectKind::Sequence => "sequence",
            ObjectKind::Function => "function",
            ObjectKind::Procedure => "procedure",
            ObjectKind::Type => "type",
        };
        f.write_str(name)
    }
}

/// A reference to one object in the store.
///
/// For routines `name` carries the identity signature, e.g. `touch(bigint)`.
/// For schemas `namespace` and `name` are both the schema name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Containing namespace.
    pub namespace: String,
    /// Object name.
    pub name: String,
    /// Object kind.
    pub kind: ObjectKind,
}

impl ObjectRef {
    /// Creates a reference to an object.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind,
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind == ObjectKind::Schema {
            write!(f, "schema {}", self.namespace)
        } else {
            write!(f, "{} {}.{}", self.kind, self.namespace, self.name)
        }
    }
}

/// What a grant or revoke applies to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum GrantTarget {
    /// Usage of the namespace itself.
    Namespace { namespace: String },
    /// Every object of a class currently in the namespace.
    AllInNamespace { namespace: String, class: ObjectClass },
    /// The policy applied to objects of a class created later in the namespace.
    DefaultPrivileges { namespace: String, class: ObjectClass },
    /// One named object.
    Object { object: ObjectRef },
}

impl GrantTarget {
    /// The namespace this target lives in.
    pub fn namespace(&self) -> &str {
        match self {
            GrantTarget::Namespace { namespace }
            | GrantTarget::AllInNamespace { namespace, .. }
            | GrantTarget::DefaultPrivileges { namespace, .. } => namespace,
            GrantTarget::Object { object } => &object.namespace,
        }
    }
}

impl fmt::Display for GrantTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrantTarget::Namespace { namespace } => write!(f, "usage on namespace {namespace}"),
            GrantTarget::AllInNamespace { namespace, class } => {
                write!(f, "all {class} in {namespace}")
            }
            GrantTarget::DefaultPrivileges { namespace, class } => {
                write!(f, "default privileges on {class} in {namespace}")
            }
            GrantTarget::Object { object } => write!(f, "{object}"),
        }
    }
}

/// One object a structural unit creates.
///
/// `ddl` is run with the search path set to the target namespace and must be
/// idempotent (`IF NOT EXISTS`, `OR REPLACE`) so provisioning can be re-run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDef {
    /// Object name, unqualified.
    pub name: String,
    /// Object kind.
    pub kind: ObjectKind,
    /// Objects in the same namespace this one references.
    pub references: Vec<String>,
    /// Statement creating the object.
    pub ddl: String,
}

impl ObjectDef {
    /// Creates an object definition with no references.
    pub fn new(name: impl Into<String>, kind: ObjectKind, ddl: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            references: Vec::new(),
            ddl: ddl.into(),
        }
    }

    /// Adds a reference to another object in the same namespace.
    pub fn references(mut self, name: impl Into<String>) -> Self {
        self.references.push(name.into());
        self
    }
}

/// How a live session was attributed to a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAttribution {
    /// The session is logged in as the tenant's principal.
    Principal,
    /// The session announced the tenant name as its application name.
    ApplicationName,
}

/// A live connection attributed to a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Backend process id.
    pub pid: i32,
    /// Session user.
    pub user: Option<String>,
    /// Announced application name.
    pub application_name: Option<String>,
    /// Why the session belongs to the tenant.
    pub attribution: SessionAttribution,
    /// When the backend started.
    pub started_at: Option<DateTime<Utc>>,
}

/// Primitives of the shared relational store.
#[async_trait]
pub trait TenantStore: Send + Sync + fmt::Debug {
    /// Short backend name used in logs and errors.
    fn backend_name(&self) -> &'static str;

    /// The administrative role the store acts as.
    fn admin_principal(&self) -> &str;

    /// Returns `true` if the namespace exists.
    async fn namespace_exists(&self, namespace: &str) -> StoreResult<bool>;

    /// Creates the namespace, owned by the acting (administrative) role.
    async fn create_namespace(&self, namespace: &str) -> StoreResult<()>;

    /// Drops the namespace and everything in it.
    async fn drop_namespace_cascade(&self, namespace: &str) -> StoreResult<()>;

    /// Counts the objects contained in the namespace.
    async fn count_namespace_objects(&self, namespace: &str) -> StoreResult<u64>;

    /// Returns `true` if the principal exists.
    async fn principal_exists(&self, principal: &str) -> StoreResult<bool>;

    /// Creates a login principal with the given credential.
    async fn create_principal(&self, principal: &str, credential: &str) -> StoreResult<()>;

    /// Removes the principal. Fails with
    /// [`StoreError::Dependency`](crate::error::StoreError::Dependency) while it
    /// still owns objects or holds grants.
    async fn drop_principal(&self, principal: &str) -> StoreResult<()>;

    /// Sets the principal's default search path.
    async fn set_principal_search_path(&self, principal: &str, namespaces: &[String]) -> StoreResult<()>;

    /// Creates one object inside the namespace.
    async fn create_object(&self, namespace: &str, object: &ObjectDef) -> StoreResult<()>;

    /// Runs a script inside the namespace.
    async fn execute_script(&self, namespace: &str, script: &str) -> StoreResult<()>;

    /// Grants the privilege bundle for `target` to the principal.
    async fn grant(&self, target: &GrantTarget, principal: &str) -> StoreResult<()>;

    /// Revokes every privilege the principal holds on `target`.
    async fn revoke(&self, target: &GrantTarget, principal: &str) -> StoreResult<()>;

    /// Lists live sessions attributed to the tenant, by principal identity or
    /// by application name. Never includes the caller's own session.
    async fn list_sessions(&self, tenant: &str, principal: Option<&str>) -> StoreResult<Vec<SessionInfo>>;

    /// Terminates a session. Returns `false` if it was already gone.
    async fn terminate_session(&self, pid: i32) -> StoreResult<bool>;

    /// Lists every object the principal owns.
    async fn owned_objects(&self, principal: &str) -> StoreResult<Vec<ObjectRef>>;

    /// Lists every grant the principal still holds.
    async fn residual_grants(&self, principal: &str) -> StoreResult<Vec<GrantTarget>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_to_class() {
        assert_eq!(ObjectKind::View.class(), Some(ObjectClass::Tables));
        assert_eq!(ObjectKind::Schema.class(), None);
        assert_eq!(
            ObjectKind::Procedure.default_policy_class(),
            Some(ObjectClass::Functions)
        );
        assert_eq!(
            ObjectKind::Sequence.default_policy_class(),
            Some(ObjectClass::Sequences)
        );
    }

    #[test]
    fn test_default_policy_classes() {
        let with_policy: Vec<_> = ObjectClass::ALL
            .into_iter()
            .filter(|c| c.has_default_policy())
            .collect();
        assert_eq!(with_policy.len(), 4);
        assert!(!with_policy.contains(&ObjectClass::Procedures));
    }

    #[test]
    fn test_display() {
        let object = ObjectRef::new("public", "audit", ObjectKind::Table);
        assert_eq!(object.to_string(), "table public.audit");
        let schema = ObjectRef::new("acme", "acme", ObjectKind::Schema);
        assert_eq!(schema.to_string(), "schema acme");

        let target = GrantTarget::DefaultPrivileges {
            namespace: "acme".to_string(),
            class: ObjectClass::Tables,
        };
        assert_eq!(target.to_string(), "default privileges on tables in acme");
        assert_eq!(target.namespace(), "acme");
    }
}
