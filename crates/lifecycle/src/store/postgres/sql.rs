//! SQL text for the PostgreSQL store.
//!
//! Statement builders are pure functions so the exact text can be unit tested
//! without a database. Identifiers are always double-quoted; the credential is
//! the only literal ever interpolated.

use crate::names::{quote_ident, quote_literal};
use crate::store::{GrantTarget, ObjectClass, ObjectKind, ObjectRef};

pub const NAMESPACE_EXISTS: &str = "SELECT EXISTS (SELECT 1 FROM pg_namespace WHERE nspname = $1)";

pub const PRINCIPAL_EXISTS: &str = "SELECT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = $1)";

/// Relations (including standalone composite types), routines and the
/// remaining user-defined types of a namespace. No row when it is missing.
pub const COUNT_NAMESPACE_OBJECTS: &str = r#"
SELECT
    (SELECT count(*) FROM pg_class c
       WHERE c.relnamespace = n.oid AND c.relkind IN ('r', 'p', 'v', 'm', 'S', 'f', 'c'))
  + (SELECT count(*) FROM pg_proc p WHERE p.pronamespace = n.oid)
  + (SELECT count(*) FROM pg_type t
       WHERE t.typnamespace = n.oid AND t.typtype IN ('d', 'e', 'r', 'm'))
FROM pg_namespace n
WHERE n.nspname = $1
"#;

/// Whether a relation, type or routine with the given name exists in a namespace.
pub const OBJECT_EXISTS: &str = r#"
SELECT EXISTS (
    SELECT 1 FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace
     WHERE n.nspname = $1 AND c.relname = $2
    UNION ALL
    SELECT 1 FROM pg_type t JOIN pg_namespace n ON n.oid = t.typnamespace
     WHERE n.nspname = $1 AND t.typname = $2
    UNION ALL
    SELECT 1 FROM pg_proc p JOIN pg_namespace n ON n.oid = p.pronamespace
     WHERE n.nspname = $1 AND p.proname = $2
)
"#;

/// User-defined types of a namespace. `GRANT ... ON ALL TYPES` does not exist,
/// so bulk type grants are expanded from this list.
pub const LIST_TYPES: &str = r#"
SELECT t.typname::text
FROM pg_type t
JOIN pg_namespace n ON n.oid = t.typnamespace
LEFT JOIN pg_class c ON c.oid = t.typrelid
WHERE n.nspname = $1
  AND (t.typtype IN ('d', 'e', 'r', 'm') OR (t.typtype = 'c' AND c.relkind = 'c'))
ORDER BY 1
"#;

/// Sessions logged in as `$1` or announcing `$2` as application name,
/// excluding the caller's own backend and every other coordinator connection
/// (current user announcing `$3`).
pub const LIST_SESSIONS: &str = r#"
SELECT pid, usename::text, application_name, backend_start
FROM pg_stat_activity
WHERE pid <> pg_backend_pid()
  AND NOT (usename = current_user AND application_name IS NOT DISTINCT FROM $3)
  AND (usename = $1 OR application_name = $2)
ORDER BY pid
"#;

pub const TERMINATE_SESSION: &str = "SELECT pg_terminate_backend($1)";

/// Everything owned by role `$1`, as (namespace, name, kind).
pub const OWNED_OBJECTS: &str = r#"
SELECT n.nspname::text, n.nspname::text, 'schema'
FROM pg_namespace n JOIN pg_roles r ON r.oid = n.nspowner
WHERE r.rolname = $1
UNION ALL
SELECT n.nspname::text, c.relname::text,
       CASE c.relkind WHEN 'S' THEN 'sequence' WHEN 'v' THEN 'view' WHEN 'm' THEN 'view'
                      WHEN 'c' THEN 'type' ELSE 'table' END
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
JOIN pg_roles r ON r.oid = c.relowner
WHERE r.rolname = $1 AND c.relkind IN ('r', 'p', 'v', 'm', 'S', 'f', 'c')
UNION ALL
SELECT n.nspname::text,
       p.proname || '(' || pg_get_function_identity_arguments(p.oid) || ')',
       CASE p.prokind WHEN 'p' THEN 'procedure' ELSE 'function' END
FROM pg_proc p
JOIN pg_namespace n ON n.oid = p.pronamespace
JOIN pg_roles r ON r.oid = p.proowner
WHERE r.rolname = $1
UNION ALL
SELECT n.nspname::text, t.typname::text, 'type'
FROM pg_type t
JOIN pg_namespace n ON n.oid = t.typnamespace
JOIN pg_roles r ON r.oid = t.typowner
WHERE r.rolname = $1 AND t.typtype IN ('d', 'e', 'r', 'm')
ORDER BY 1, 2
"#;

/// Every grant role `$1` still holds, as (scope, namespace, name, kind).
///
/// Default-privilege entries are limited to those defined by the acting role,
/// the only ones it can revoke.
pub const RESIDUAL_GRANTS: &str = r#"
SELECT 'namespace', n.nspname::text, NULL::text, NULL::text
FROM pg_namespace n
CROSS JOIN LATERAL aclexplode(n.nspacl) a
JOIN pg_roles r ON r.oid = a.grantee
WHERE r.rolname = $1
UNION
SELECT 'object', n.nspname::text, c.relname::text,
       CASE c.relkind WHEN 'S' THEN 'sequence' WHEN 'v' THEN 'view' WHEN 'm' THEN 'view'
                      ELSE 'table' END
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
CROSS JOIN LATERAL aclexplode(c.relacl) a
JOIN pg_roles r ON r.oid = a.grantee
WHERE r.rolname = $1 AND c.relkind IN ('r', 'p', 'v', 'm', 'S', 'f')
UNION
SELECT 'object', n.nspname::text,
       p.proname || '(' || pg_get_function_identity_arguments(p.oid) || ')',
       CASE p.prokind WHEN 'p' THEN 'procedure' ELSE 'function' END
FROM pg_proc p
JOIN pg_namespace n ON n.oid = p.pronamespace
CROSS JOIN LATERAL aclexplode(p.proacl) a
JOIN pg_roles r ON r.oid = a.grantee
WHERE r.rolname = $1
UNION
SELECT 'object', n.nspname::text, t.typname::text, 'type'
FROM pg_type t
JOIN pg_namespace n ON n.oid = t.typnamespace
LEFT JOIN pg_class c ON c.oid = t.typrelid
CROSS JOIN LATERAL aclexplode(t.typacl) a
JOIN pg_roles r ON r.oid = a.grantee
WHERE r.rolname = $1
  AND (t.typtype IN ('d', 'e', 'r', 'm') OR (t.typtype = 'c' AND c.relkind = 'c'))
UNION
SELECT 'default', n.nspname::text, NULL::text,
       CASE d.defaclobjtype WHEN 'r' THEN 'tables' WHEN 'S' THEN 'sequences'
                            WHEN 'f' THEN 'functions' WHEN 'T' THEN 'types' END
FROM pg_default_acl d
JOIN pg_namespace n ON n.oid = d.defaclnamespace
CROSS JOIN LATERAL aclexplode(d.defaclacl) a
JOIN pg_roles r ON r.oid = a.grantee
WHERE r.rolname = $1
  AND d.defaclobjtype IN ('r', 'S', 'f', 'T')
  AND d.defaclrole = (SELECT oid FROM pg_roles WHERE rolname = current_user)
ORDER BY 1, 2, 3
"#;

pub fn create_schema(namespace: &str) -> String {
    format!("CREATE SCHEMA {}", quote_ident(namespace))
}

pub fn drop_schema_cascade(namespace: &str) -> String {
    format!("DROP SCHEMA {} CASCADE", quote_ident(namespace))
}

pub fn create_role(principal: &str, credential: &str) -> String {
    format!(
        "CREATE ROLE {} WITH LOGIN PASSWORD {}",
        quote_ident(principal),
        quote_literal(credential)
    )
}

pub fn drop_role(principal: &str) -> String {
    format!("DROP ROLE {}", quote_ident(principal))
}

pub fn set_role_search_path(principal: &str, namespaces: &[String]) -> String {
    if namespaces.is_empty() {
        return format!("ALTER ROLE {} RESET search_path", quote_ident(principal));
    }
    let path = namespaces
        .iter()
        .map(|ns| quote_ident(ns))
        .collect::<Vec<_>>()
        .join(", ");
    format!("ALTER ROLE {} SET search_path TO {}", quote_ident(principal), path)
}

pub fn set_local_search_path(namespace: &str) -> String {
    format!("SET LOCAL search_path TO {}", quote_ident(namespace))
}

/// The privilege bundle granted for a class.
fn class_privileges(class: ObjectClass) -> &'static str {
    match class {
        ObjectClass::Tables => "ALL PRIVILEGES",
        ObjectClass::Sequences => "USAGE, SELECT, UPDATE",
        ObjectClass::Functions | ObjectClass::Procedures => "EXECUTE",
        ObjectClass::Types => "USAGE",
    }
}

fn all_in_schema_keyword(class: ObjectClass) -> Option<&'static str> {
    match class {
        ObjectClass::Tables => Some("ALL TABLES"),
        ObjectClass::Sequences => Some("ALL SEQUENCES"),
        ObjectClass::Functions => Some("ALL FUNCTIONS"),
        ObjectClass::Procedures => Some("ALL PROCEDURES"),
        ObjectClass::Types => None,
    }
}

fn default_privileges_keyword(class: ObjectClass) -> Option<&'static str> {
    match class {
        ObjectClass::Tables => Some("TABLES"),
        ObjectClass::Sequences => Some("SEQUENCES"),
        ObjectClass::Functions => Some("FUNCTIONS"),
        ObjectClass::Types => Some("TYPES"),
        ObjectClass::Procedures => None,
    }
}

fn object_keyword(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::Schema => "SCHEMA",
        ObjectKind::Table | ObjectKind::View => "TABLE",
        ObjectKind::Sequence => "SEQUENCE",
        ObjectKind::Function => "FUNCTION",
        ObjectKind::Procedure => "PROCEDURE",
        ObjectKind::Type => "TYPE",
    }
}

/// Qualified object name. Routine names carry their identity arguments, which
/// stay unquoted.
fn qualified(object: &ObjectRef) -> String {
    if object.kind == ObjectKind::Schema {
        return quote_ident(&object.namespace);
    }
    let (base, args) = match object.name.find('(') {
        Some(idx) => object.name.split_at(idx),
        None => (object.name.as_str(), ""),
    };
    format!("{}.{}{}", quote_ident(&object.namespace), quote_ident(base), args)
}

/// The `GRANT` statement for a target, or `None` when the target has to be
/// expanded per object first (all types in a namespace).
pub fn grant(target: &GrantTarget, principal: &str) -> Option<String> {
    let grantee = quote_ident(principal);
    let statement = match target {
        GrantTarget::Namespace { namespace } => {
            format!("GRANT USAGE ON SCHEMA {} TO {}", quote_ident(namespace), grantee)
        }
        GrantTarget::AllInNamespace { namespace, class } => format!(
            "GRANT {} ON {} IN SCHEMA {} TO {}",
            class_privileges(*class),
            all_in_schema_keyword(*class)?,
            quote_ident(namespace),
            grantee
        ),
        GrantTarget::DefaultPrivileges { namespace, class } => format!(
            "ALTER DEFAULT PRIVILEGES IN SCHEMA {} GRANT {} ON {} TO {}",
            quote_ident(namespace),
            class_privileges(*class),
            default_privileges_keyword(*class)?,
            grantee
        ),
        GrantTarget::Object { object } => {
            let privileges = match object.kind.class() {
                Some(class) => class_privileges(class),
                None => "USAGE",
            };
            format!(
                "GRANT {} ON {} {} TO {}",
                privileges,
                object_keyword(object.kind),
                qualified(object),
                grantee
            )
        }
    };
    Some(statement)
}

/// The `REVOKE` statement for a target, or `None` when the target has to be
/// expanded per object first.
pub fn revoke(target: &GrantTarget, principal: &str) -> Option<String> {
    let grantee = quote_ident(principal);
    let statement = match target {
        GrantTarget::Namespace { namespace } => {
            format!("REVOKE ALL ON SCHEMA {} FROM {}", quote_ident(namespace), grantee)
        }
        GrantTarget::AllInNamespace { namespace, class } => format!(
            "REVOKE ALL ON {} IN SCHEMA {} FROM {}",
            all_in_schema_keyword(*class)?,
            quote_ident(namespace),
            grantee
        ),
        GrantTarget::DefaultPrivileges { namespace, class } => format!(
            "ALTER DEFAULT PRIVILEGES IN SCHEMA {} REVOKE ALL ON {} FROM {}",
            quote_ident(namespace),
            default_privileges_keyword(*class)?,
            grantee
        ),
        GrantTarget::Object { object } => format!(
            "REVOKE ALL ON {} {} FROM {}",
            object_keyword(object.kind),
            qualified(object),
            grantee
        ),
    };
    Some(statement)
}

pub fn parse_kind(kind: &str) -> Option<ObjectKind> {
    match kind {
        "schema" => Some(ObjectKind::Schema),
        "table" => Some(ObjectKind::Table),
        "view" => Some(ObjectKind::View),
        "sequence" => Some(ObjectKind::Sequence),
        "function" => Some(ObjectKind::Function),
        "procedure" => Some(ObjectKind::Procedure),
        "type" => Some(ObjectKind::Type),
        _ => None,
    }
}

pub fn parse_class(class: &str) -> Option<ObjectClass> {
    match class {
        "tables" => Some(ObjectClass::Tables),
        "sequences" => Some(ObjectClass::Sequences),
        "functions" => Some(ObjectClass::Functions),
        "procedures" => Some(ObjectClass::Procedures),
        "types" => Some(ObjectClass::Types),
        _ => None,
    }
}

/// Builds a grant target from one [`RESIDUAL_GRANTS`] row.
pub fn residual_target(
    scope: &str,
    namespace: String,
    name: Option<String>,
    kind: Option<&str>,
) -> Option<GrantTarget> {
    match scope {
        "namespace" => Some(GrantTarget::Namespace { namespace }),
        "default" => Some(GrantTarget::DefaultPrivileges {
            namespace,
            class: parse_class(kind?)?,
        }),
        "object" => Some(GrantTarget::Object {
            object: ObjectRef::new(namespace, name?, parse_kind(kind?)?),
        }),
        _ => None,
    }
}

/// How a SQLSTATE maps onto the store error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlClass {
    AlreadyExists,
    NamespaceMissing,
    ObjectMissing,
    Dependency,
    PermissionDenied,
    Other,
}

pub fn classify_sqlstate(code: &str) -> SqlClass {
    match code {
        // duplicate_schema, duplicate_object, duplicate_table, duplicate_function
        "42P06" | "42710" | "42P07" | "42723" => SqlClass::AlreadyExists,
        // invalid_schema_name
        "3F000" => SqlClass::NamespaceMissing,
        // undefined_object, undefined_table, undefined_function
        "42704" | "42P01" | "42883" => SqlClass::ObjectMissing,
        // dependent_objects_still_exist
        "2BP01" => SqlClass::Dependency,
        // insufficient_privilege
        "42501" => SqlClass::PermissionDenied,
        _ => SqlClass::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_role_quotes_credential() {
        assert_eq!(
            create_role("acme", "it's"),
            r#"CREATE ROLE "acme" WITH LOGIN PASSWORD 'it''s'"#
        );
    }

    #[test]
    fn test_search_path() {
        let path = vec!["acme".to_string(), "public".to_string()];
        assert_eq!(
            set_role_search_path("acme", &path),
            r#"ALTER ROLE "acme" SET search_path TO "acme", "public""#
        );
        assert_eq!(
            set_role_search_path("acme", &[]),
            r#"ALTER ROLE "acme" RESET search_path"#
        );
    }

    #[test]
    fn test_grant_statements() {
        let ns = "acme".to_string();
        let usage = GrantTarget::Namespace { namespace: ns.clone() };
        assert_eq!(
            grant(&usage, "acme").unwrap(),
            r#"GRANT USAGE ON SCHEMA "acme" TO "acme""#
        );

        let sequences = GrantTarget::AllInNamespace {
            namespace: ns.clone(),
            class: ObjectClass::Sequences,
        };
        assert_eq!(
            grant(&sequences, "acme").unwrap(),
            r#"GRANT USAGE, SELECT, UPDATE ON ALL SEQUENCES IN SCHEMA "acme" TO "acme""#
        );

        let types = GrantTarget::AllInNamespace {
            namespace: ns.clone(),
            class: ObjectClass::Types,
        };
        assert!(grant(&types, "acme").is_none());

        let defaults = GrantTarget::DefaultPrivileges {
            namespace: ns.clone(),
            class: ObjectClass::Functions,
        };
        assert_eq!(
            grant(&defaults, "acme").unwrap(),
            r#"ALTER DEFAULT PRIVILEGES IN SCHEMA "acme" GRANT EXECUTE ON FUNCTIONS TO "acme""#
        );

        let procedures = GrantTarget::DefaultPrivileges {
            namespace: ns,
            class: ObjectClass::Procedures,
        };
        assert!(grant(&procedures, "acme").is_none());
    }

    #[test]
    fn test_revoke_routine_keeps_signature() {
        let target = GrantTarget::Object {
            object: ObjectRef::new("public", "touch(bigint)", ObjectKind::Function),
        };
        assert_eq!(
            revoke(&target, "acme").unwrap(),
            r#"REVOKE ALL ON FUNCTION "public"."touch"(bigint) FROM "acme""#
        );
    }

    #[test]
    fn test_residual_target() {
        let target = residual_target("default", "acme".into(), None, Some("tables")).unwrap();
        assert_eq!(
            target,
            GrantTarget::DefaultPrivileges {
                namespace: "acme".into(),
                class: ObjectClass::Tables
            }
        );
        let target =
            residual_target("object", "public".into(), Some("audit".into()), Some("table")).unwrap();
        assert_eq!(target.to_string(), "table public.audit");
        assert!(residual_target("object", "public".into(), None, Some("table")).is_none());
        assert!(residual_target("column", "public".into(), None, None).is_none());
    }

    #[test]
    fn test_classify_sqlstate() {
        assert_eq!(classify_sqlstate("42P06"), SqlClass::AlreadyExists);
        assert_eq!(classify_sqlstate("2BP01"), SqlClass::Dependency);
        assert_eq!(classify_sqlstate("3F000"), SqlClass::NamespaceMissing);
        assert_eq!(classify_sqlstate("42704"), SqlClass::ObjectMissing);
        assert_eq!(classify_sqlstate("42501"), SqlClass::PermissionDenied);
        assert_eq!(classify_sqlstate("23505"), SqlClass::Other);
    }
}
