//! Script manifests.
//!
//! A manifest directory holds an `init.conf` listing one script per line, in
//! run order. Blank lines and lines starting with `#` are ignored. Each entry
//! names `<entry>.sql` in the same directory (or the file itself when the entry
//! already ends in `.sql`).
//!
//! ```text
//! units/
//! ├── init.conf          # base_records\nrelationship_graph\n...
//! ├── base_records.sql
//! └── relationship_graph.sql
//! ```
//!
//! Lines starting with `\` are psql meta-commands and are dropped before the
//! script runs. A listed script that is missing, or empty once filtered, is
//! registered as an absent step.

use std::fs;
use std::path::Path;

use crate::error::RegistryError;

use super::{ScriptUnit, StepDescriptor, StructuralRegistry};

/// Name of the manifest file inside a units directory.
pub const MANIFEST_FILE: &str = "init.conf";

/// Parses manifest text into entries, in order.
pub fn parse_manifest(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Removes psql meta-command lines from a script.
pub fn strip_meta_commands(script: &str) -> String {
    script
        .lines()
        .filter(|line| !line.trim_start().starts_with('\\'))
        .collect::<Vec<_>>()
        .join("\n")
}

impl StructuralRegistry {
    /// Builds a registry from a manifest directory.
    ///
    /// Fails when `init.conf` cannot be read, when a listed script exists but
    /// cannot be read, or when two entries share a step name.
    pub fn from_manifest_dir(dir: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let dir = dir.as_ref();
        let manifest_path = dir.join(MANIFEST_FILE);
        let contents = fs::read_to_string(&manifest_path).map_err(|e| RegistryError::Manifest {
            path: manifest_path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut builder = StructuralRegistry::builder();
        for entry in parse_manifest(&contents) {
            let (name, file) = match entry.strip_suffix(".sql") {
                Some(stem) => (stem.to_string(), entry.clone()),
                None => (entry.clone(), format!("{entry}.sql")),
            };
            let path = dir.join(&file);

            if !path.is_file() {
                tracing::debug!(step = %name, path = %path.display(), "Script listed in manifest is missing");
                builder = builder.step(StepDescriptor::absent(
                    name,
                    format!("script {} not found", path.display()),
                ));
                continue;
            }

            let raw = fs::read_to_string(&path).map_err(|e| RegistryError::Manifest {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            let script = strip_meta_commands(&raw);
            if script.trim().is_empty() {
                builder = builder.step(StepDescriptor::absent(
                    name,
                    format!("script {file} is empty after filtering"),
                ));
                continue;
            }

            builder = builder.step(StepDescriptor::implemented(name, ScriptUnit::new(script)));
        }

        let registry = builder.build()?;
        tracing::debug!(dir = %dir.display(), steps = registry.len(), "Loaded structural manifest");
        Ok(registry)
    }
}
