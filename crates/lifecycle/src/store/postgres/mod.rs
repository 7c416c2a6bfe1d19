//! PostgreSQL store.
//!
//! Namespaces are schemas and principals are login roles. The store connects
//! through a deadpool-postgres pool as an administrative role that owns every
//! tenant schema it creates; tenant roles only ever receive grants.
//!
//! # Example
//!
//! ```no_run
//! use burrow_lifecycle::store::postgres::{PostgresConfig, PostgresStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresStore::new(PostgresConfig::from_env()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Privilege bundle
//!
//! | Class | Privileges | Default policy |
//! |-------|------------|----------------|
//! | schema | `USAGE` | |
//! | tables, views | `ALL PRIVILEGES` | `TABLES` |
//! | sequences | `USAGE, SELECT, UPDATE` | `SEQUENCES` |
//! | functions, procedures | `EXECUTE` | `FUNCTIONS` (covers both) |
//! | types | `USAGE`, one statement per type | `TYPES` |

mod backend;
pub(crate) mod sql;

pub use backend::{PostgresConfig, PostgresSslMode, PostgresStore};
