//! Burrow tenant lifecycle CLI.
//!
//! Creates, drops, recreates and inspects tenants of a shared PostgreSQL
//! database.

mod config;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use burrow_lifecycle::store::postgres::PostgresStore;
use burrow_lifecycle::{
    Notice, ProvisionReport, ProvisionRequest, StructuralRegistry, TeardownReport,
    TeardownRequest, TeardownState, TenantLifecycle,
};
use clap::Parser;
use tracing::info;

use crate::config::{Cli, Command};

/// Initializes logging. `RUST_LOG` takes precedence over `level`.
fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("burrow={0},burrow_lifecycle={0}", level)));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_registry(units_dir: Option<&Path>) -> anyhow::Result<StructuralRegistry> {
    match units_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Loading structural units from manifest");
            StructuralRegistry::from_manifest_dir(dir)
                .with_context(|| format!("Invalid units directory {}", dir.display()))
        }
        None => Ok(StructuralRegistry::standard()),
    }
}

fn provision_request(
    tenant: &str,
    password: Option<&str>,
    namespace: Option<&str>,
    grant: bool,
) -> ProvisionRequest {
    let mut request = ProvisionRequest::new(tenant);
    if let Some(password) = password {
        request = request.with_credential(password);
    }
    if let Some(namespace) = namespace {
        request = request.with_namespace(namespace);
    }
    if !grant {
        request = request.without_grants();
    }
    request
}

fn print_notices(notices: &[Notice]) {
    for notice in notices {
        println!("  note: {}", notice);
    }
}

fn print_provision(report: &ProvisionReport) {
    println!(
        "tenant {} provisioned in namespace {}",
        report.tenant, report.namespace
    );
    println!(
        "  namespace: {}",
        if report.namespace_created { "created" } else { "existing" }
    );
    match &report.principal {
        Some(principal) if report.principal_created => println!("  principal: {} (created)", principal),
        Some(principal) => println!("  principal: {} (existing)", principal),
        None => println!("  principal: none"),
    }
    println!(
        "  units: {} applied, {} skipped",
        report.registry.applied().len(),
        report.registry.skipped().len()
    );
    println!("  grants: {}", if report.grants_applied { "applied" } else { "not applied" });
    print_notices(&report.notices);
}

fn print_teardown(report: &TeardownReport) {
    if report.state == TeardownState::AlreadyAbsent {
        println!("tenant {} does not exist; nothing to remove", report.tenant);
        return;
    }
    println!("tenant {} removed", report.tenant);
    if report.namespace_dropped {
        println!(
            "  namespace: {} dropped ({} objects)",
            report.namespace, report.objects_dropped
        );
    }
    if let Some(eviction) = &report.eviction {
        println!(
            "  sessions: {} terminated in {} passes, {} remaining",
            eviction.terminated, eviction.passes, eviction.remaining
        );
    }
    println!("  revokes: {}", report.revokes.revoked());
    if report.principal_dropped {
        println!("  principal: {} dropped", report.tenant);
    }
    print_notices(&report.notices);
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let pg_config = cli.postgres_config()?;
    info!(host = %pg_config.host, port = pg_config.port, dbname = %pg_config.dbname, "Connecting to PostgreSQL");
    let store = PostgresStore::new(pg_config)
        .await
        .context("Failed to connect to PostgreSQL")?;
    let store = Arc::new(store);
    let config = cli.lifecycle_config();

    match &cli.command {
        Command::Create {
            tenant,
            password,
            namespace,
            no_grant,
            units_dir,
        } => {
            let registry = load_registry(units_dir.as_deref())?;
            let lifecycle = TenantLifecycle::new(store, registry, config);
            let request = provision_request(tenant, password.as_deref(), namespace.as_deref(), !no_grant);
            let report = lifecycle.provision(&request).await?;
            print_provision(&report);
        }
        Command::Drop {
            tenant,
            force,
            namespace,
        } => {
            let lifecycle = TenantLifecycle::new(store, StructuralRegistry::empty(), config);
            let mut request = TeardownRequest::new(tenant.as_str()).force(*force);
            if let Some(namespace) = namespace {
                request = request.with_namespace(namespace.as_str());
            }
            let report = lifecycle.teardown(&request).await?;
            print_teardown(&report);
        }
        Command::Recreate {
            tenant,
            password,
            force,
            namespace,
            units_dir,
        } => {
            let registry = load_registry(units_dir.as_deref())?;
            let lifecycle = TenantLifecycle::new(store, registry, config);
            let request = provision_request(tenant, Some(password.as_str()), namespace.as_deref(), true);
            let report = lifecycle.recreate(&request, *force).await?;
            if let Some(teardown) = &report.teardown {
                print_teardown(teardown);
            }
            print_provision(&report.provision);
        }
        Command::Status { tenant, namespace } => {
            let lifecycle = TenantLifecycle::new(store, StructuralRegistry::empty(), config);
            let status = lifecycle.status(tenant, namespace.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    if let Err(errors) = cli.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    info!(
        command = cli.command.name(),
        tenant = cli.command.tenant(),
        "Starting burrow"
    );

    run(cli).await
}
