//! In-process store.
//!
//! [`MemoryStore`] models the parts of PostgreSQL the lifecycle relies on:
//! namespaces owned by the acting role, objects with owners and in-namespace
//! references, per-object grants, default-privilege policies that are applied
//! when an object is created, live sessions, and the rule that a principal
//! cannot be dropped while it owns objects or holds grants. Failures can be
//! injected per operation to exercise partial-state recovery.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::error::{EntityKind, StoreError, StoreResult};

use super::{
    GrantTarget, ObjectDef, ObjectKind, ObjectRef, SessionAttribution, SessionInfo, TenantStore,
};

const BACKEND: &str = "memory";

/// Operations a failure can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum FailPoint {
    CreateNamespace,
    DropNamespace,
    CreatePrincipal,
    DropPrincipal,
    SetSearchPath,
    CreateObject,
    ExecuteScript,
    Grant,
    Revoke,
    ListSessions,
    TerminateSession,
    OwnedObjects,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MemObject {
    kind: ObjectKind,
    owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MemNamespace {
    owner: String,
    objects: BTreeMap<String, MemObject>,
}

#[derive(Debug, Clone)]
struct MemSession {
    user: Option<String>,
    application_name: Option<String>,
    started_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    namespaces: BTreeMap<String, MemNamespace>,
    /// Principal name to its configured search path.
    principals: BTreeMap<String, Vec<String>>,
    grants: BTreeSet<(String, GrantTarget)>,
    sessions: BTreeMap<i32, MemSession>,
    /// Remaining reconnects keyed by session user or application name.
    reconnects: HashMap<String, u32>,
    failures: HashMap<FailPoint, VecDeque<StoreError>>,
    scripts: Vec<(String, String)>,
    next_pid: i32,
}

/// Comparable view of the durable part of a [`MemoryStore`].
///
/// Sessions and injected failures are excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySnapshot {
    /// Namespace to (object, kind, owner).
    pub namespaces: BTreeMap<String, Vec<(String, ObjectKind, String)>>,
    /// Principal to search path.
    pub principals: BTreeMap<String, Vec<String>>,
    /// (principal, target) pairs.
    pub grants: BTreeSet<(String, GrantTarget)>,
}

/// An in-memory [`TenantStore`].
///
/// # Example
///
/// ```
/// use burrow_lifecycle::store::{MemoryStore, TenantStore};
///
/// # tokio_test::block_on(async {
/// let store = MemoryStore::new();
/// store.create_namespace("acme").await.unwrap();
/// assert!(store.namespace_exists("acme").await.unwrap());
/// # });
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    admin: String,
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates a store acting as `postgres` with an existing `public` namespace.
    pub fn new() -> Self {
        Self::with_admin("postgres")
    }

    /// Creates a store acting as the given administrative role.
    pub fn with_admin(admin: impl Into<String>) -> Self {
        let admin = admin.into();
        let mut state = State {
            next_pid: 1000,
            ..Default::default()
        };
        state.namespaces.insert(
            "public".to_string(),
            MemNamespace {
                owner: admin.clone(),
                objects: BTreeMap::new(),
            },
        );
        Self {
            admin,
            state: Mutex::new(state),
        }
    }

    /// Makes the next call of `point` fail with `error`. Calls queue up.
    pub fn fail_next(&self, point: FailPoint, error: StoreError) {
        self.state
            .lock()
            .failures
            .entry(point)
            .or_default()
            .push_back(error);
    }

    /// Opens a live session and returns its pid.
    pub fn open_session(&self, user: Option<&str>, application_name: Option<&str>) -> i32 {
        let mut state = self.state.lock();
        state.open_session(user.map(str::to_string), application_name.map(str::to_string))
    }

    /// Makes sessions keyed by `user_or_application` reconnect immediately
    /// after being terminated, `times` times.
    pub fn reconnect_on_terminate(&self, user_or_application: &str, times: u32) {
        self.state
            .lock()
            .reconnects
            .insert(user_or_application.to_string(), times);
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Creates an object owned by `owner`, bypassing default policies.
    pub fn create_owned_object(
        &self,
        namespace: &str,
        name: &str,
        kind: ObjectKind,
        owner: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        let ns = state.namespace_mut(namespace)?;
        ns.objects.insert(
            name.to_string(),
            MemObject {
                kind,
                owner: owner.to_string(),
            },
        );
        Ok(())
    }

    /// Names of the objects in a namespace, sorted.
    pub fn object_names(&self, namespace: &str) -> Vec<String> {
        self.state
            .lock()
            .namespaces
            .get(namespace)
            .map(|ns| ns.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns `true` if the principal holds a grant on exactly `target`.
    pub fn has_grant(&self, principal: &str, target: &GrantTarget) -> bool {
        self.state
            .lock()
            .grants
            .contains(&(principal.to_string(), target.clone()))
    }

    /// Number of grants the principal holds.
    pub fn grant_count(&self, principal: &str) -> usize {
        self.state
            .lock()
            .grants
            .iter()
            .filter(|(p, _)| p == principal)
            .count()
    }

    /// Returns `true` if the principal can reach and use the named object:
    /// usage on its namespace plus a grant on the object itself.
    pub fn can_use(&self, principal: &str, namespace: &str, object: &str) -> bool {
        let state = self.state.lock();
        let Some(kind) = state
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.objects.get(object))
            .map(|o| o.kind)
        else {
            return false;
        };
        let usage = GrantTarget::Namespace {
            namespace: namespace.to_string(),
        };
        let on_object = GrantTarget::Object {
            object: ObjectRef::new(namespace, object, kind),
        };
        state.grants.contains(&(principal.to_string(), usage))
            && state.grants.contains(&(principal.to_string(), on_object))
    }

    /// The principal's configured search path, if the principal exists.
    pub fn principal_search_path(&self, principal: &str) -> Option<Vec<String>> {
        self.state.lock().principals.get(principal).cloned()
    }

    /// Scripts executed in a namespace, in order.
    pub fn executed_scripts(&self, namespace: &str) -> Vec<String> {
        self.state
            .lock()
            .scripts
            .iter()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, script)| script.clone())
            .collect()
    }

    /// Captures the durable state for comparison.
    pub fn snapshot(&self) -> MemorySnapshot {
        let state = self.state.lock();
        MemorySnapshot {
            namespaces: state
                .namespaces
                .iter()
                .map(|(name, ns)| {
                    let objects = ns
                        .objects
                        .iter()
                        .map(|(o, obj)| (o.clone(), obj.kind, obj.owner.clone()))
                        .collect();
                    (name.clone(), objects)
                })
                .collect(),
            principals: state.principals.clone(),
            grants: state.grants.clone(),
        }
    }
}

impl State {
    fn check(&mut self, point: FailPoint) -> StoreResult<()> {
        match self.failures.get_mut(&point).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn open_session(&mut self, user: Option<String>, application_name: Option<String>) -> i32 {
        let pid = self.next_pid;
        self.next_pid += 1;
        self.sessions.insert(
            pid,
            MemSession {
                user,
                application_name,
                started_at: Utc::now(),
            },
        );
        pid
    }

    fn namespace_mut(&mut self, namespace: &str) -> StoreResult<&mut MemNamespace> {
        self.namespaces
            .get_mut(namespace)
            .ok_or_else(|| not_found(EntityKind::Namespace, namespace))
    }

    fn require_namespace(&self, namespace: &str) -> StoreResult<&MemNamespace> {
        self.namespaces
            .get(namespace)
            .ok_or_else(|| not_found(EntityKind::Namespace, namespace))
    }

    fn require_principal(&self, principal: &str) -> StoreResult<()> {
        if self.principals.contains_key(principal) {
            Ok(())
        } else {
            Err(not_found(EntityKind::Principal, principal))
        }
    }

    fn require_object(&self, object: &ObjectRef) -> StoreResult<()> {
        let exists = self
            .namespaces
            .get(&object.namespace)
            .and_then(|ns| ns.objects.get(&object.name))
            .is_some_and(|o| o.kind == object.kind);
        if exists {
            Ok(())
        } else {
            Err(not_found(EntityKind::Object, &object.to_string()))
        }
    }

    fn owned_by(&self, principal: &str) -> Vec<ObjectRef> {
        let mut owned = Vec::new();
        for (name, ns) in &self.namespaces {
            if ns.owner == principal {
                owned.push(ObjectRef::new(name, name, ObjectKind::Schema));
            }
            for (object, meta) in &ns.objects {
                if meta.owner == principal {
                    owned.push(ObjectRef::new(name, object, meta.kind));
                }
            }
        }
        owned
    }

    fn objects_of_class(&self, namespace: &str, class: super::ObjectClass) -> Vec<ObjectRef> {
        self.namespaces
            .get(namespace)
            .map(|ns| {
                ns.objects
                    .iter()
                    .filter(|(_, o)| o.kind.class() == Some(class))
                    .map(|(name, o)| ObjectRef::new(namespace, name, o.kind))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn not_found(kind: EntityKind, name: &str) -> StoreError {
    StoreError::NotFound {
        kind,
        name: name.to_string(),
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn admin_principal(&self) -> &str {
        &self.admin
    }

    async fn namespace_exists(&self, namespace: &str) -> StoreResult<bool> {
        Ok(self.state.lock().namespaces.contains_key(namespace))
    }

    async fn create_namespace(&self, namespace: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check(FailPoint::CreateNamespace)?;
        if state.namespaces.contains_key(namespace) {
            return Err(StoreError::AlreadyExists {
                kind: EntityKind::Namespace,
                name: namespace.to_string(),
            });
        }
        state.namespaces.insert(
            namespace.to_string(),
            MemNamespace {
                owner: self.admin.clone(),
                objects: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn drop_namespace_cascade(&self, namespace: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check(FailPoint::DropNamespace)?;
        if state.namespaces.remove(namespace).is_none() {
            return Err(not_found(EntityKind::Namespace, namespace));
        }
        state.grants.retain(|(_, target)| target.namespace() != namespace);
        for path in state.principals.values_mut() {
            path.retain(|ns| ns != namespace);
        }
        Ok(())
    }

    async fn count_namespace_objects(&self, namespace: &str) -> StoreResult<u64> {
        let state = self.state.lock();
        Ok(state.require_namespace(namespace)?.objects.len() as u64)
    }

    async fn principal_exists(&self, principal: &str) -> StoreResult<bool> {
        Ok(self.state.lock().principals.contains_key(principal))
    }

    async fn create_principal(&self, principal: &str, _credential: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check(FailPoint::CreatePrincipal)?;
        if state.principals.contains_key(principal) {
            return Err(StoreError::AlreadyExists {
                kind: EntityKind::Principal,
                name: principal.to_string(),
            });
        }
        state.principals.insert(principal.to_string(), Vec::new());
        Ok(())
    }

    async fn drop_principal(&self, principal: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check(FailPoint::DropPrincipal)?;
        state.require_principal(principal)?;

        let owned = state.owned_by(principal);
        let held = state
            .grants
            .iter()
            .filter(|(p, _)| p == principal)
            .map(|(_, target)| target.to_string())
            .collect::<Vec<_>>();
        if !owned.is_empty() || !held.is_empty() {
            let mut detail = Vec::new();
            for object in &owned {
                detail.push(format!("owner of {object}"));
            }
            for target in &held {
                detail.push(format!("privileges for {target}"));
            }
            return Err(StoreError::Dependency {
                principal: principal.to_string(),
                detail: detail.join("; "),
            });
        }

        state.principals.remove(principal);
        Ok(())
    }

    async fn set_principal_search_path(&self, principal: &str, namespaces: &[String]) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check(FailPoint::SetSearchPath)?;
        let path = state
            .principals
            .get_mut(principal)
            .ok_or_else(|| not_found(EntityKind::Principal, principal))?;
        *path = namespaces.to_vec();
        Ok(())
    }

    async fn create_object(&self, namespace: &str, object: &ObjectDef) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check(FailPoint::CreateObject)?;
        let ns = state.require_namespace(namespace)?;

        if let Some(existing) = ns.objects.get(&object.name) {
            if existing.kind == object.kind {
                return Ok(());
            }
            return Err(StoreError::AlreadyExists {
                kind: EntityKind::Object,
                name: format!("{}.{}", namespace, object.name),
            });
        }
        if let Some(missing) = object
            .references
            .iter()
            .find(|r| !ns.objects.contains_key(r.as_str()))
        {
            return Err(StoreError::MissingReference {
                namespace: namespace.to_string(),
                object: object.name.clone(),
                reference: missing.clone(),
            });
        }

        state.namespace_mut(namespace)?.objects.insert(
            object.name.clone(),
            MemObject {
                kind: object.kind,
                owner: self.admin.clone(),
            },
        );

        if let Some(class) = object.kind.default_policy_class() {
            let inherited: Vec<String> = state
                .grants
                .iter()
                .filter(|(_, target)| {
                    matches!(target, GrantTarget::DefaultPrivileges { namespace: ns, class: c }
                        if ns == namespace && *c == class)
                })
                .map(|(p, _)| p.clone())
                .collect();
            let object_ref = ObjectRef::new(namespace, &object.name, object.kind);
            for principal in inherited {
                state.grants.insert((
                    principal,
                    GrantTarget::Object {
                        object: object_ref.clone(),
                    },
                ));
            }
        }
        Ok(())
    }

    async fn execute_script(&self, namespace: &str, script: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check(FailPoint::ExecuteScript)?;
        state.require_namespace(namespace)?;
        state
            .scripts
            .push((namespace.to_string(), script.to_string()));
        Ok(())
    }

    async fn grant(&self, target: &GrantTarget, principal: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check(FailPoint::Grant)?;
        state.require_principal(principal)?;
        state.require_namespace(target.namespace())?;

        let granted = match target {
            GrantTarget::AllInNamespace { namespace, class } => state
                .objects_of_class(namespace, *class)
                .into_iter()
                .map(|object| GrantTarget::Object { object })
                .collect(),
            GrantTarget::Object { object } => {
                state.require_object(object)?;
                vec![target.clone()]
            }
            GrantTarget::Namespace { .. } | GrantTarget::DefaultPrivileges { .. } => {
                vec![target.clone()]
            }
        };
        for target in granted {
            state.grants.insert((principal.to_string(), target));
        }
        Ok(())
    }

    async fn revoke(&self, target: &GrantTarget, principal: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check(FailPoint::Revoke)?;
        state.require_principal(principal)?;
        state.require_namespace(target.namespace())?;

        match target {
            GrantTarget::AllInNamespace { namespace, class } => {
                state.grants.retain(|(p, t)| {
                    !(p == principal
                        && matches!(t, GrantTarget::Object { object }
                            if object.namespace == *namespace && object.kind.class() == Some(*class)))
                });
            }
            GrantTarget::Object { object } => {
                state.require_object(object)?;
                state.grants.remove(&(principal.to_string(), target.clone()));
            }
            GrantTarget::Namespace { .. } | GrantTarget::DefaultPrivileges { .. } => {
                state.grants.remove(&(principal.to_string(), target.clone()));
            }
        }
        Ok(())
    }

    async fn list_sessions(&self, tenant: &str, principal: Option<&str>) -> StoreResult<Vec<SessionInfo>> {
        let mut state = self.state.lock();
        state.check(FailPoint::ListSessions)?;
        let sessions = state
            .sessions
            .iter()
            .filter_map(|(pid, session)| {
                let attribution = if principal.is_some() && session.user.as_deref() == principal {
                    SessionAttribution::Principal
                } else if session.application_name.as_deref() == Some(tenant) {
                    SessionAttribution::ApplicationName
                } else {
                    return None;
                };
                Some(SessionInfo {
                    pid: *pid,
                    user: session.user.clone(),
                    application_name: session.application_name.clone(),
                    attribution,
                    started_at: Some(session.started_at),
                })
            })
            .collect();
        Ok(sessions)
    }

    async fn terminate_session(&self, pid: i32) -> StoreResult<bool> {
        let mut state = self.state.lock();
        state.check(FailPoint::TerminateSession)?;
        let Some(session) = state.sessions.remove(&pid) else {
            return Ok(false);
        };

        let key = [session.user.as_deref(), session.application_name.as_deref()]
            .into_iter()
            .flatten()
            .find(|k| state.reconnects.get(*k).is_some_and(|n| *n > 0))
            .map(str::to_string);
        if let Some(key) = key {
            if let Some(remaining) = state.reconnects.get_mut(&key) {
                *remaining -= 1;
            }
            state.open_session(session.user, session.application_name);
        }
        Ok(true)
    }

    async fn owned_objects(&self, principal: &str) -> StoreResult<Vec<ObjectRef>> {
        let mut state = self.state.lock();
        state.check(FailPoint::OwnedObjects)?;
        Ok(state.owned_by(principal))
    }

    async fn residual_grants(&self, principal: &str) -> StoreResult<Vec<GrantTarget>> {
        Ok(self
            .state
            .lock()
            .grants
            .iter()
            .filter(|(p, _)| p == principal)
            .map(|(_, target)| target.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ObjectClass;

    fn table(name: &str) -> ObjectDef {
        ObjectDef::new(name, ObjectKind::Table, format!("CREATE TABLE {name} ()"))
    }

    #[tokio::test]
    async fn test_default_privileges_apply_to_new_objects() {
        let store = MemoryStore::new();
        store.create_namespace("acme").await.unwrap();
        store.create_principal("acme", "pw").await.unwrap();
        store
            .grant(
                &GrantTarget::DefaultPrivileges {
                    namespace: "acme".to_string(),
                    class: ObjectClass::Tables,
                },
                "acme",
            )
            .await
            .unwrap();
        store
            .grant(
                &GrantTarget::Namespace {
                    namespace: "acme".to_string(),
                },
                "acme",
            )
            .await
            .unwrap();

        store.create_object("acme", &table("records")).await.unwrap();
        assert!(store.can_use("acme", "acme", "records"));
    }

    #[tokio::test]
    async fn test_missing_reference_fails() {
        let store = MemoryStore::new();
        store.create_namespace("acme").await.unwrap();
        let err = store
            .create_object("acme", &table("links").references("records"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingReference { ref reference, .. } if reference == "records"));
    }

    #[tokio::test]
    async fn test_create_object_is_idempotent() {
        let store = MemoryStore::new();
        store.create_namespace("acme").await.unwrap();
        store.create_object("acme", &table("records")).await.unwrap();
        store.create_object("acme", &table("records")).await.unwrap();
        assert_eq!(store.object_names("acme"), vec!["records".to_string()]);
    }

    #[tokio::test]
    async fn test_drop_principal_blocked_by_grants_and_ownership() {
        let store = MemoryStore::new();
        store.create_principal("acme", "pw").await.unwrap();
        store
            .create_owned_object("public", "audit", ObjectKind::Table, "acme")
            .unwrap();

        let err = store.drop_principal("acme").await.unwrap_err();
        assert!(err.is_dependency());
        assert!(err.to_string().contains("table public.audit"));
    }

    #[tokio::test]
    async fn test_drop_namespace_removes_its_grants() {
        let store = MemoryStore::new();
        store.create_namespace("acme").await.unwrap();
        store.create_principal("acme", "pw").await.unwrap();
        store.create_object("acme", &table("records")).await.unwrap();
        store
            .grant(
                &GrantTarget::AllInNamespace {
                    namespace: "acme".to_string(),
                    class: ObjectClass::Tables,
                },
                "acme",
            )
            .await
            .unwrap();
        assert_eq!(store.grant_count("acme"), 1);

        store.drop_namespace_cascade("acme").await.unwrap();
        assert_eq!(store.grant_count("acme"), 0);
        store.drop_principal("acme").await.unwrap();
    }

    #[tokio::test]
    async fn test_terminated_sessions_reconnect() {
        let store = MemoryStore::new();
        let pid = store.open_session(Some("acme"), None);
        store.reconnect_on_terminate("acme", 1);

        assert!(store.terminate_session(pid).await.unwrap());
        assert_eq!(store.session_count(), 1);
        let pid = store.list_sessions("acme", Some("acme")).await.unwrap()[0].pid;
        assert!(store.terminate_session(pid).await.unwrap());
        assert_eq!(store.session_count(), 0);
        assert!(!store.terminate_session(pid).await.unwrap());
    }

    #[tokio::test]
    async fn test_session_attribution() {
        let store = MemoryStore::new();
        store.open_session(Some("acme"), Some("psql"));
        store.open_session(Some("postgres"), Some("acme"));
        store.open_session(Some("other"), Some("other"));

        let sessions = store.list_sessions("acme", Some("acme")).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].attribution, SessionAttribution::Principal);
        assert_eq!(sessions[1].attribution, SessionAttribution::ApplicationName);

        let sessions = store.list_sessions("acme", None).await.unwrap();
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed() {
        let store = MemoryStore::new();
        store.fail_next(
            FailPoint::CreateNamespace,
            StoreError::query("create-namespace", "acme", "disk full"),
        );
        assert!(store.create_namespace("acme").await.is_err());
        assert!(store.create_namespace("acme").await.is_ok());
    }
}
