//! Burrow Tenant Lifecycle
//!
//! Provisioning and teardown of isolated per-tenant namespaces inside a shared
//! PostgreSQL database. A tenant materializes as a schema (its namespace) and
//! a login role of the same name (its principal). This crate creates both,
//! populates the schema from an ordered registry of structural units, grants
//! the principal exactly the access it needs, and removes everything again,
//! safely and idempotently, even after a previous attempt stopped half-way.
//!
//! # Architecture
//!
//! - [`store`] - The [`TenantStore`] trait and its PostgreSQL and in-memory
//!   implementations
//! - [`registry`] - Ordered structural units that populate a namespace
//! - [`grants`] - The privilege bundle and its best-effort revocation
//! - [`sessions`] - Bounded eviction of live tenant sessions
//! - [`provision`] - The namespace provisioner
//! - [`teardown`] - The teardown coordinator
//! - [`lifecycle`] - [`TenantLifecycle`], the entry point tying them together
//!
//! # Features
//!
//! - `postgres` (default) - [`PostgresStore`](store::postgres::PostgresStore)
//!   over deadpool-postgres
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use burrow_lifecycle::store::postgres::{PostgresConfig, PostgresStore};
//! use burrow_lifecycle::{ProvisionRequest, TeardownRequest, TenantLifecycle};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresStore::new(PostgresConfig::from_env()).await?;
//! let lifecycle = TenantLifecycle::with_defaults(Arc::new(store));
//!
//! lifecycle
//!     .provision(&ProvisionRequest::new("acme").with_credential("secret"))
//!     .await?;
//!
//! // Sessions of the tenant block removal unless force is set.
//! lifecycle
//!     .teardown(&TeardownRequest::new("acme").force(true))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Convergence
//!
//! Both entry points can be re-run on a tenant in any state. A second
//! provisioning run reports what already existed; a second teardown reports
//! what was already gone. Non-fatal conditions are collected as [`Notice`]s in
//! the returned report, never as errors.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod error;
pub mod grants;
pub mod lifecycle;
pub mod names;
pub mod notice;
pub mod provision;
pub mod registry;
pub mod sessions;
pub mod store;
pub mod teardown;

// Re-export commonly used types at crate root
pub use config::{EvictionPolicy, LifecycleConfig};
pub use error::{
    LifecycleError, NameError, ProvisionError, RegistryError, StoreError, StoreResult,
    TeardownError,
};
pub use lifecycle::{RecreateReport, TenantLifecycle, TenantStatus};
pub use names::{Identifier, TenantName};
pub use notice::Notice;
pub use provision::{Credential, ProvisionReport, ProvisionRequest};
pub use registry::{StepDescriptor, StructuralRegistry};
pub use store::{MemoryStore, TenantStore};
pub use teardown::{TeardownReport, TeardownRequest, TeardownState};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
