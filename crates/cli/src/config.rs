//! Command line configuration.
//!
//! Every connection and lifecycle setting can be given as a flag or through
//! the environment.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BURROW_DATABASE_URL` | | `postgres://` URL; overrides the `BURROW_PG_*` settings |
//! | `BURROW_PG_HOST` | localhost | PostgreSQL host |
//! | `BURROW_PG_PORT` | 5432 | PostgreSQL port |
//! | `BURROW_PG_DBNAME` | postgres | Database holding the tenants |
//! | `BURROW_PG_USER` | postgres | Administrative role |
//! | `BURROW_PG_PASSWORD` | | Administrative password |
//! | `BURROW_LOG_LEVEL` | info | Log level |
//! | `BURROW_SHARED_AREAS` | public | Namespaces to clean cross-namespace grants from |
//! | `BURROW_EVICTION_PASSES` | 3 | Session eviction passes |
//! | `BURROW_EVICTION_INTERVAL` | 200ms | Pause between eviction passes |
//! | `BURROW_SEARCH_PATH_SHARED` | true | Append shared areas to a new principal's search path |
//! | `BURROW_TENANT_PASSWORD` | | Credential for a new tenant principal |

use std::path::PathBuf;
use std::time::Duration;

use burrow_lifecycle::config::parse_list;
use burrow_lifecycle::names::Identifier;
use burrow_lifecycle::store::postgres::PostgresConfig;
use burrow_lifecycle::{EvictionPolicy, LifecycleConfig, StoreResult};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};

/// Tenant lifecycle manager.
#[derive(Debug, Parser)]
#[command(name = "burrow")]
#[command(about = "Provision and tear down per-tenant PostgreSQL namespaces", version)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub lifecycle: LifecycleArgs,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, global = true, env = "BURROW_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Where the shared database lives.
#[derive(Debug, Clone, Args)]
pub struct ConnectionArgs {
    /// Connection URL; takes precedence over the individual settings.
    #[arg(long, global = true, env = "BURROW_DATABASE_URL")]
    pub database_url: Option<String>,

    /// PostgreSQL host.
    #[arg(long, global = true, env = "BURROW_PG_HOST", default_value = "localhost")]
    pub host: String,

    /// PostgreSQL port.
    #[arg(long, global = true, env = "BURROW_PG_PORT", default_value = "5432")]
    pub port: u16,

    /// Database name.
    #[arg(long, global = true, env = "BURROW_PG_DBNAME", default_value = "postgres")]
    pub dbname: String,

    /// Administrative user.
    #[arg(long, global = true, env = "BURROW_PG_USER", default_value = "postgres")]
    pub user: String,

    /// Administrative password.
    #[arg(long = "pg-password", global = true, env = "BURROW_PG_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

/// Lifecycle tuning.
#[derive(Debug, Clone, Args)]
pub struct LifecycleArgs {
    /// Comma-separated namespaces to clean cross-namespace grants from.
    #[arg(long, global = true, env = "BURROW_SHARED_AREAS", default_value = "public")]
    pub shared_areas: String,

    /// Session eviction passes during forced teardown.
    #[arg(long, global = true, env = "BURROW_EVICTION_PASSES", default_value = "3")]
    pub eviction_passes: u32,

    /// Pause between eviction passes, e.g. `250ms`.
    #[arg(
        long,
        global = true,
        env = "BURROW_EVICTION_INTERVAL",
        default_value = "200ms",
        value_parser = humantime::parse_duration
    )]
    pub eviction_interval: Duration,

    /// Append the shared areas to the principal's search path (`true`/`false`).
    #[arg(
        long,
        global = true,
        env = "BURROW_SEARCH_PATH_SHARED",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub search_path_shared: bool,
}

/// Lifecycle commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Provision a tenant: namespace, principal, structural units and grants.
    Create {
        /// Tenant name; also the principal name.
        tenant: String,

        /// Credential for the tenant principal, if it does not exist yet.
        #[arg(long, env = "BURROW_TENANT_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Namespace name; defaults to the tenant name.
        #[arg(long)]
        namespace: Option<String>,

        /// Skip granting the principal access.
        #[arg(long)]
        no_grant: bool,

        /// Directory holding an `init.conf` manifest of unit scripts.
        #[arg(long)]
        units_dir: Option<PathBuf>,
    },

    /// Tear a tenant down.
    Drop {
        /// Tenant name.
        tenant: String,

        /// Evict live sessions and continue past principal dependencies.
        #[arg(long)]
        force: bool,

        /// Namespace name used at provisioning.
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Tear a tenant down if it exists, then provision it again.
    Recreate {
        /// Tenant name.
        tenant: String,

        /// Credential for the recreated tenant principal.
        #[arg(long, env = "BURROW_TENANT_PASSWORD", hide_env_values = true)]
        password: String,

        /// Evict live sessions and continue past principal dependencies.
        #[arg(long)]
        force: bool,

        /// Namespace name; defaults to the tenant name.
        #[arg(long)]
        namespace: Option<String>,

        /// Directory holding an `init.conf` manifest of unit scripts.
        #[arg(long)]
        units_dir: Option<PathBuf>,
    },

    /// Show what exists for a tenant.
    Status {
        /// Tenant name.
        tenant: String,

        /// Namespace name used at provisioning.
        #[arg(long)]
        namespace: Option<String>,
    },
}

impl Command {
    /// The subcommand name.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Create { .. } => "create",
            Command::Drop { .. } => "drop",
            Command::Recreate { .. } => "recreate",
            Command::Status { .. } => "status",
        }
    }

    /// The tenant the command acts on.
    pub fn tenant(&self) -> &str {
        match self {
            Command::Create { tenant, .. }
            | Command::Drop { tenant, .. }
            | Command::Recreate { tenant, .. }
            | Command::Status { tenant, .. } => tenant,
        }
    }

    fn namespace(&self) -> Option<&str> {
        match self {
            Command::Create { namespace, .. }
            | Command::Drop { namespace, .. }
            | Command::Recreate { namespace, .. }
            | Command::Status { namespace, .. } => namespace.as_deref(),
        }
    }
}

impl Cli {
    /// Connection settings for the store.
    pub fn postgres_config(&self) -> StoreResult<PostgresConfig> {
        if let Some(url) = &self.connection.database_url {
            return PostgresConfig::from_url(url);
        }
        Ok(PostgresConfig {
            host: self.connection.host.clone(),
            port: self.connection.port,
            dbname: self.connection.dbname.clone(),
            user: self.connection.user.clone(),
            password: self.connection.password.clone(),
            ..Default::default()
        })
    }

    /// Lifecycle settings.
    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig::default()
            .with_shared_areas(parse_list(&self.lifecycle.shared_areas))
            .with_eviction(EvictionPolicy {
                max_passes: self.lifecycle.eviction_passes,
                pass_interval_ms: self.lifecycle.eviction_interval.as_millis() as u64,
            })
            .with_search_path_shared(self.lifecycle.search_path_shared)
    }

    /// Validates the configuration and returns errors if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        match self.postgres_config() {
            Ok(config) if config.port == 0 => errors.push("Port cannot be 0".to_string()),
            Ok(_) => {}
            Err(e) => errors.push(format!("Database URL is invalid: {}", e)),
        }

        if let Err(e) = Identifier::new(self.command.tenant()) {
            errors.push(format!("Tenant name is invalid: {}", e));
        }

        if let Some(namespace) = self.command.namespace()
            && let Err(e) = Identifier::new(namespace)
        {
            errors.push(format!("Namespace name is invalid: {}", e));
        }

        if let Command::Create {
            units_dir: Some(dir),
            ..
        }
        | Command::Recreate {
            units_dir: Some(dir),
            ..
        } = &self.command
            && !dir.is_dir()
        {
            errors.push(format!("Units directory {} does not exist", dir.display()));
        }

        if let Err(lifecycle_errors) = self.lifecycle_config().validate() {
            errors.extend(lifecycle_errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["burrow"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_create() {
        let cli = parse(&["create", "acme", "--password", "pw", "--no-grant"]);
        match &cli.command {
            Command::Create {
                tenant,
                password,
                no_grant,
                namespace,
                units_dir,
            } => {
                assert_eq!(tenant, "acme");
                assert_eq!(password.as_deref(), Some("pw"));
                assert!(*no_grant);
                assert!(namespace.is_none());
                assert!(units_dir.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_parse_drop_force() {
        let cli = parse(&["drop", "acme", "--force", "--namespace", "acme_data"]);
        assert!(matches!(
            cli.command,
            Command::Drop { force: true, ref namespace, .. } if namespace.as_deref() == Some("acme_data")
        ));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&[
            "status",
            "acme",
            "--host",
            "db.internal",
            "--shared-areas",
            "public, reference",
            "--eviction-interval",
            "1s",
        ]);
        let pg = cli.postgres_config().unwrap();
        assert_eq!(pg.host, "db.internal");

        let config = cli.lifecycle_config();
        assert_eq!(config.shared_areas, vec!["public", "reference"]);
        assert_eq!(config.eviction.pass_interval_ms, 1000);
    }

    #[test]
    fn test_database_url_wins() {
        let cli = parse(&[
            "--database-url",
            "postgres://admin:pw@db:6543/tenants",
            "--host",
            "ignored",
            "status",
            "acme",
        ]);
        let pg = cli.postgres_config().unwrap();
        assert_eq!(pg.host, "db");
        assert_eq!(pg.port, 6543);
        assert_eq!(pg.dbname, "tenants");
    }

    #[test]
    fn test_validate_rejects_bad_names() {
        let cli = parse(&["create", "Acme", "--namespace", "acme-data", "--eviction-passes", "0"]);
        let errors = cli.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_validate_rejects_missing_units_dir() {
        let cli = parse(&["create", "acme", "--units-dir", "/nonexistent/burrow-units"]);
        let errors = cli.validate().unwrap_err();
        assert!(errors[0].contains("Units directory"));
    }

    #[test]
    fn test_validate_rejects_bad_url_port() {
        let cli = parse(&["--database-url", "postgres://admin@db:54x2/tenants", "status", "acme"]);
        assert!(cli.postgres_config().is_err());
        let errors = cli.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Database URL is invalid"));
    }

    #[test]
    fn test_recreate_requires_password() {
        let err = Cli::try_parse_from(["burrow", "recreate", "acme"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let cli = parse(&["recreate", "acme", "--password", "pw", "--force"]);
        assert!(matches!(
            cli.command,
            Command::Recreate { ref password, force: true, .. } if password == "pw"
        ));
    }

    #[test]
    fn test_search_path_shared_flag() {
        let cli = parse(&["status", "acme"]);
        assert!(cli.lifecycle_config().search_path_includes_shared);

        let cli = parse(&["status", "acme", "--search-path-shared", "false"]);
        assert!(!cli.lifecycle_config().search_path_includes_shared);

        let cli = parse(&["--search-path-shared", "no", "status", "acme"]);
        assert!(!cli.lifecycle_config().search_path_includes_shared);
    }
}
