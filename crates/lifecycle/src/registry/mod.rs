//! Structural registry.
//!
//! A [`StructuralRegistry`] is an ordered list of named steps that populate a
//! tenant namespace. Each step is either implemented by a
//! [`StructuralRoutine`] or registered as absent; absent steps are skipped with
//! a warning when the registry runs. Steps run strictly in registration order
//! and the first failing step aborts the rest.
//!
//! Ordering is checked once, when the registry is built: a step may only
//! require steps registered before it, and objects a step references must not
//! be provided by a later step.
//!
//! # Example
//!
//! ```
//! use burrow_lifecycle::registry::{ScriptUnit, StepDescriptor, StructuralRegistry};
//!
//! let registry = StructuralRegistry::builder()
//!     .step(StepDescriptor::implemented(
//!         "audit",
//!         ScriptUnit::new("CREATE TABLE IF NOT EXISTS {namespace}.audit (id BIGINT)"),
//!     ))
//!     .step(StepDescriptor::absent("reports", "not shipped yet").requires("audit"))
//!     .build()
//!     .unwrap();
//! assert_eq!(registry.step_names(), vec!["audit", "reports"]);
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{RegistryError, StoreResult};
use crate::store::TenantStore;

mod manifest;
mod units;

pub use manifest::{parse_manifest, strip_meta_commands, MANIFEST_FILE};
pub use units::{standard_steps, DeclaredUnit, ScriptUnit};

/// The routine behind an implemented structural step.
#[async_trait]
pub trait StructuralRoutine: Send + Sync + fmt::Debug {
    /// Creates this step's objects inside `namespace`.
    async fn apply(&self, store: &dyn TenantStore, namespace: &str) -> StoreResult<()>;

    /// Names of the objects this step creates.
    fn provides(&self) -> Vec<String> {
        Vec::new()
    }

    /// Names of objects this step's objects reference.
    fn references(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Whether a step has an implementation.
#[derive(Debug, Clone)]
pub enum StepBody {
    /// The step runs this routine.
    Implemented(Arc<dyn StructuralRoutine>),
    /// The step is known but has no implementation.
    Absent {
        /// Why there is no implementation.
        reason: String,
    },
}

/// One named step of a [`StructuralRegistry`].
#[derive(Debug, Clone)]
pub struct StepDescriptor {
    name: String,
    body: StepBody,
    requires: Vec<String>,
}

impl StepDescriptor {
    /// A step backed by a routine.
    pub fn implemented(name: impl Into<String>, routine: impl StructuralRoutine + 'static) -> Self {
        Self {
            name: name.into(),
            body: StepBody::Implemented(Arc::new(routine)),
            requires: Vec::new(),
        }
    }

    /// A step without an implementation.
    pub fn absent(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: StepBody::Absent {
                reason: reason.into(),
            },
            requires: Vec::new(),
        }
    }

    /// Declares that this step must run after `step`.
    pub fn requires(mut self, step: impl Into<String>) -> Self {
        self.requires.push(step.into());
        self
    }

    /// The step name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The step body.
    pub fn body(&self) -> &StepBody {
        &self.body
    }

    /// Returns `true` if the step has a routine.
    pub fn is_implemented(&self) -> bool {
        matches!(self.body, StepBody::Implemented(_))
    }

    /// Steps this one explicitly requires.
    pub fn required_steps(&self) -> &[String] {
        &self.requires
    }

    fn provides(&self) -> Vec<String> {
        match &self.body {
            StepBody::Implemented(routine) => routine.provides(),
            StepBody::Absent { .. } => Vec::new(),
        }
    }

    fn references(&self) -> Vec<String> {
        match &self.body {
            StepBody::Implemented(routine) => routine.references(),
            StepBody::Absent { .. } => Vec::new(),
        }
    }
}

/// Builder that validates step order.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    steps: Vec<StepDescriptor>,
}

impl RegistryBuilder {
    /// Appends a step.
    pub fn step(mut self, step: StepDescriptor) -> Self {
        self.steps.push(step);
        self
    }

    /// Appends several steps.
    pub fn steps(mut self, steps: impl IntoIterator<Item = StepDescriptor>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Validates names and ordering and builds the registry.
    pub fn build(self) -> Result<StructuralRegistry, RegistryError> {
        validate(&self.steps)?;
        Ok(StructuralRegistry { steps: self.steps })
    }
}

fn validate(steps: &[StepDescriptor]) -> Result<(), RegistryError> {
    let mut positions = HashMap::new();
    for (idx, step) in steps.iter().enumerate() {
        if positions.insert(step.name.as_str(), idx).is_some() {
            return Err(RegistryError::DuplicateStep {
                step: step.name.clone(),
            });
        }
    }

    // object name -> index of the first step providing it
    let mut providers: HashMap<String, usize> = HashMap::new();
    for (idx, step) in steps.iter().enumerate() {
        for object in step.provides() {
            providers.entry(object).or_insert(idx);
        }
    }

    for (idx, step) in steps.iter().enumerate() {
        for required in &step.requires {
            match positions.get(required.as_str()) {
                Some(pos) if *pos < idx => {}
                _ => {
                    return Err(RegistryError::OrderingViolation {
                        step: step.name.clone(),
                        missing: required.clone(),
                    });
                }
            }
        }

        let own: HashSet<String> = step.provides().into_iter().collect();
        for reference in step.references() {
            if own.contains(&reference) {
                continue;
            }
            // References nobody provides are external to the registry.
            if let Some(pos) = providers.get(&reference)
                && *pos > idx
            {
                return Err(RegistryError::OrderingViolation {
                    step: step.name.clone(),
                    missing: reference,
                });
            }
        }
    }

    Ok(())
}

/// How one step ended in a registry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    /// The routine ran successfully.
    Applied,
    /// The step had no implementation and was skipped.
    #[allow(missing_docs)]
    NotImplemented { reason: String },
}

/// One step in a [`RegistryReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    /// Step name.
    pub step: String,
    /// How the step ended.
    pub status: StepStatus,
}

/// Result of a successful registry run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryReport {
    /// Every step, in run order.
    pub steps: Vec<StepOutcome>,
}

impl RegistryReport {
    /// Names of the steps that ran.
    pub fn applied(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Applied)
            .map(|s| s.step.as_str())
            .collect()
    }

    /// Names of the steps that were skipped.
    pub fn skipped(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.status != StepStatus::Applied)
            .map(|s| s.step.as_str())
            .collect()
    }
}

/// Ordered catalog of structural steps.
#[derive(Debug, Clone)]
pub struct StructuralRegistry {
    steps: Vec<StepDescriptor>,
}

impl Default for StructuralRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl StructuralRegistry {
    /// Starts an empty builder.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// The standard units: `base_records`, `relationship_graph`,
    /// `association_graph` and `read_views`, in dependency order.
    pub fn standard() -> Self {
        Self {
            steps: standard_steps(),
        }
    }

    /// A registry with no steps.
    pub fn empty() -> Self {
        Self { steps: Vec::new() }
    }

    /// The registered steps, in order.
    pub fn steps(&self) -> &[StepDescriptor] {
        &self.steps
    }

    /// The registered step names, in order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if no steps are registered.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every step against `namespace`, in order.
    ///
    /// Absent steps are skipped with a warning. The first failing step stops
    /// the run; steps applied before it are not rolled back.
    pub async fn run(
        &self,
        store: &dyn TenantStore,
        namespace: &str,
    ) -> Result<RegistryReport, RegistryError> {
        let mut report = RegistryReport::default();

        for step in &self.steps {
            let status = match &step.body {
                StepBody::Absent { reason } => {
                    tracing::warn!(namespace, step = %step.name, reason = %reason, "Structural step not implemented, skipping");
                    StepStatus::NotImplemented {
                        reason: reason.clone(),
                    }
                }
                StepBody::Implemented(routine) => {
                    tracing::debug!(namespace, step = %step.name, "Applying structural step");
                    routine.apply(store, namespace).await.map_err(|source| {
                        tracing::error!(namespace, step = %step.name, error = %source, "Structural step failed");
                        RegistryError::StepFailed {
                            step: step.name.clone(),
                            source,
                        }
                    })?;
                    StepStatus::Applied
                }
            };
            report.steps.push(StepOutcome {
                step: step.name.clone(),
                status,
            });
        }

        tracing::info!(
            namespace,
            applied = report.applied().len(),
            skipped = report.skipped().len(),
            "Structural registry complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, ObjectDef, ObjectKind};

    fn table(name: &str) -> ObjectDef {
        ObjectDef::new(name, ObjectKind::Table, format!("CREATE TABLE IF NOT EXISTS {name} ()"))
    }

    #[test]
    fn test_standard_registry_is_valid() {
        let registry = StructuralRegistry::builder()
            .steps(standard_steps())
            .build()
            .unwrap();
        assert_eq!(
            registry.step_names(),
            vec!["base_records", "relationship_graph", "association_graph", "read_views"]
        );
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let err = StructuralRegistry::builder()
            .step(StepDescriptor::absent("a", "none"))
            .step(StepDescriptor::absent("a", "none"))
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateStep { step } if step == "a"));
    }

    #[test]
    fn test_requires_must_be_earlier() {
        let err = StructuralRegistry::builder()
            .step(StepDescriptor::absent("views", "none").requires("tables"))
            .step(StepDescriptor::absent("tables", "none"))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::OrderingViolation { step, missing } if step == "views" && missing == "tables"
        ));
    }

    #[test]
    fn test_reference_to_later_step_rejected() {
        let links = DeclaredUnit::new(vec![table("links").references("records")]);
        let records = DeclaredUnit::new(vec![table("records")]);
        let err = StructuralRegistry::builder()
            .step(StepDescriptor::implemented("links", links))
            .step(StepDescriptor::implemented("records", records))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::OrderingViolation { step, missing } if step == "links" && missing == "records"
        ));
    }

    #[test]
    fn test_external_reference_allowed() {
        let unit = DeclaredUnit::new(vec![table("links").references("shared_lookup")]);
        assert!(StructuralRegistry::builder()
            .step(StepDescriptor::implemented("links", unit))
            .build()
            .is_ok());
    }

    #[tokio::test]
    async fn test_run_skips_absent_and_fails_fast() {
        let store = MemoryStore::new();
        store.create_namespace("acme").await.unwrap();

        let registry = StructuralRegistry::builder()
            .step(StepDescriptor::implemented(
                "records",
                DeclaredUnit::new(vec![table("records")]),
            ))
            .step(StepDescriptor::absent("audit", "no routine"))
            .step(StepDescriptor::implemented(
                "links",
                DeclaredUnit::new(vec![table("links").references("missing_table")]),
            ))
            .step(StepDescriptor::implemented(
                "tags",
                DeclaredUnit::new(vec![table("tags")]),
            ))
            .build()
            .unwrap();

        let err = registry.run(&store, "acme").await.unwrap_err();
        assert!(matches!(err, RegistryError::StepFailed { ref step, .. } if step == "links"));
        assert_eq!(store.object_names("acme"), vec!["records".to_string()]);
    }

    #[tokio::test]
    async fn test_run_reports_each_step() {
        let store = MemoryStore::new();
        store.create_namespace("acme").await.unwrap();

        let registry = StructuralRegistry::builder()
            .step(StepDescriptor::implemented(
                "records",
                DeclaredUnit::new(vec![table("records")]),
            ))
            .step(StepDescriptor::absent("audit", "no routine"))
            .build()
            .unwrap();

        let report = registry.run(&store, "acme").await.unwrap();
        assert_eq!(report.applied(), vec!["records"]);
        assert_eq!(report.skipped(), vec!["audit"]);
    }
}
