//! Validated names for tenants, namespaces and principals.
//!
//! Every name that reaches the store is an [`Identifier`]: lowercase ASCII,
//! digits and underscores, starting with a letter or underscore, and no longer
//! than the PostgreSQL identifier limit. Validation happens once, before any
//! store call, so the lifecycle never has to deal with half-applied changes
//! caused by a malformed name.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::NameError;
use crate::store::COORDINATOR_APPLICATION_NAME;

/// Maximum identifier length accepted by PostgreSQL (`NAMEDATALEN - 1`).
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Prefix PostgreSQL reserves for system schemas and roles.
pub const SYSTEM_PREFIX: &str = "pg_";

/// Schemas every database carries.
const SYSTEM_NAMESPACES: &[&str] = &["public", "information_schema"];

static IDENTIFIER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_]*$").expect("identifier pattern is a valid regex")
});

/// A validated store identifier (namespace or principal name).
///
/// # Examples
///
/// ```
/// use burrow_lifecycle::names::Identifier;
///
/// let ident = Identifier::new("acme_research").unwrap();
/// assert_eq!(ident.as_str(), "acme_research");
/// assert!(Identifier::new("Acme-Research").is_err());
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Validates and wraps the given name.
    pub fn new(name: impl Into<String>) -> Result<Self, NameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(NameError::Empty);
        }
        if name.len() > MAX_IDENTIFIER_LENGTH {
            return Err(NameError::TooLong {
                name,
                max: MAX_IDENTIFIER_LENGTH,
            });
        }
        if !IDENTIFIER_PATTERN.is_match(&name) {
            return Err(NameError::InvalidCharacters { name });
        }
        Ok(Self(name))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the identifier double-quoted for inclusion in SQL.
    pub fn quoted(&self) -> String {
        quote_ident(&self.0)
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identifier {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Identifier {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The logical name of a tenant.
///
/// A tenant materializes as a namespace and a principal. The principal always
/// carries the tenant name; the namespace defaults to it but may be
/// overridden at provisioning time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantName(Identifier);

impl TenantName {
    /// Validates and wraps a tenant name.
    pub fn new(name: impl Into<String>) -> Result<Self, NameError> {
        Identifier::new(name).map(Self)
    }

    /// Returns the tenant name as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// The principal (login role) owned by this tenant.
    pub fn principal(&self) -> &Identifier {
        &self.0
    }

    /// The namespace for this tenant, honoring an optional override.
    pub fn namespace(&self, override_name: Option<&str>) -> Result<Identifier, NameError> {
        match override_name {
            Some(name) => Identifier::new(name),
            None => Ok(self.0.clone()),
        }
    }
}

impl fmt::Display for TenantName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for TenantName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Names outside any tenant's reach.
///
/// A tenant's namespace is dropped and its principal's grants are revoked on
/// teardown, so neither may coincide with a shared area, the administrative
/// role, a system schema or the coordinator's own sessions.
#[derive(Debug, Clone, Copy)]
pub struct ReservedNames<'a> {
    shared_areas: &'a [String],
    admin: &'a str,
}

impl<'a> ReservedNames<'a> {
    /// Reserves the given shared areas and administrative role on top of the
    /// system names.
    pub fn new(shared_areas: &'a [String], admin: &'a str) -> Self {
        Self {
            shared_areas,
            admin,
        }
    }

    /// Fails with [`NameError::Reserved`] if a tenant may not use `name`.
    pub fn check(&self, name: &Identifier) -> Result<(), NameError> {
        let name = name.as_str();
        let reason = if self.shared_areas.iter().any(|area| area == name) {
            "it is a shared area"
        } else if name == self.admin {
            "it is the administrative role"
        } else if SYSTEM_NAMESPACES.contains(&name) || name.starts_with(SYSTEM_PREFIX) {
            "it is a system name"
        } else if name == COORDINATOR_APPLICATION_NAME {
            "it identifies the lifecycle coordinator's own sessions"
        } else {
            return Ok(());
        };
        Err(NameError::Reserved {
            name: name.to_string(),
            reason,
        })
    }

    /// Validates a tenant name and its namespace and checks both against the
    /// reserved names.
    pub fn resolve(
        &self,
        tenant: &str,
        namespace: Option<&str>,
    ) -> Result<(TenantName, Identifier), NameError> {
        let tenant = TenantName::new(tenant)?;
        let namespace = tenant.namespace(namespace)?;
        self.check(tenant.principal())?;
        self.check(&namespace)?;
        Ok((tenant, namespace))
    }
}

/// Quotes an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes an SQL string literal, doubling embedded single quotes.
///
/// Only for utility statements that cannot take bind parameters
/// (`CREATE ROLE ... PASSWORD`).
pub fn quote_literal(value: &str) -> String {
    if value.contains('\\') {
        format!("E'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
    } else {
        format!("'{}'", value.replace('\'', "''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        for name in ["acme", "_internal", "tenant_42", "a"] {
            assert!(Identifier::new(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_rejects_invalid_characters() {
        for name in ["Acme", "acme-corp", "acme/research", "1tenant", "a b", "ac\"me"] {
            assert!(
                matches!(
                    Identifier::new(name),
                    Err(NameError::InvalidCharacters { .. })
                ),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_empty_and_long() {
        assert!(matches!(Identifier::new(""), Err(NameError::Empty)));
        let long = "a".repeat(MAX_IDENTIFIER_LENGTH + 1);
        assert!(matches!(
            Identifier::new(long),
            Err(NameError::TooLong { max: 63, .. })
        ));
        assert!(Identifier::new("a".repeat(MAX_IDENTIFIER_LENGTH)).is_ok());
    }

    #[test]
    fn test_tenant_namespace_override() {
        let tenant = TenantName::new("acme").unwrap();
        assert_eq!(tenant.principal().as_str(), "acme");
        assert_eq!(tenant.namespace(None).unwrap().as_str(), "acme");
        assert_eq!(
            tenant.namespace(Some("acme_data")).unwrap().as_str(),
            "acme_data"
        );
        assert!(tenant.namespace(Some("Acme Data")).is_err());
    }

    fn reserved(shared: &[String]) -> ReservedNames<'_> {
        ReservedNames::new(shared, "postgres")
    }

    #[test]
    fn test_reserved_names_rejected() {
        let shared = vec!["public".to_string(), "reference".to_string()];
        let reserved = reserved(&shared);
        for name in [
            "public",
            "reference",
            "postgres",
            "information_schema",
            "pg_catalog",
            "pg_toast",
            "burrow",
        ] {
            assert!(
                matches!(
                    reserved.check(&Identifier::new(name).unwrap()),
                    Err(NameError::Reserved { .. })
                ),
                "{name} should be reserved"
            );
        }
        assert!(reserved.check(&Identifier::new("acme").unwrap()).is_ok());
        assert!(reserved.check(&Identifier::new("page_views").unwrap()).is_ok());
    }

    #[test]
    fn test_resolve_checks_tenant_and_namespace() {
        let shared = vec!["public".to_string()];
        let reserved = reserved(&shared);

        let (tenant, namespace) = reserved.resolve("acme", Some("acme_data")).unwrap();
        assert_eq!(tenant.as_str(), "acme");
        assert_eq!(namespace.as_str(), "acme_data");

        let err = reserved.resolve("acme", Some("public")).unwrap_err();
        assert_eq!(
            err,
            NameError::Reserved {
                name: "public".to_string(),
                reason: "it is a shared area",
            }
        );
        assert!(matches!(
            reserved.resolve("postgres", Some("postgres_data")),
            Err(NameError::Reserved { ref name, .. }) if name == "postgres"
        ));
        assert!(matches!(
            reserved.resolve("Public", None),
            Err(NameError::InvalidCharacters { .. })
        ));
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident("acme"), "\"acme\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("s3cret"), "'s3cret'");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal("back\\slash"), "E'back\\\\slash'");
    }

    #[test]
    fn test_identifier_serde() {
        let ident: Identifier = serde_json::from_str("\"acme\"").unwrap();
        assert_eq!(ident.as_str(), "acme");
        assert!(serde_json::from_str::<Identifier>("\"Not Valid\"").is_err());
        assert_eq!(serde_json::to_string(&ident).unwrap(), "\"acme\"");
    }
}
