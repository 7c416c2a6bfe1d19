//! Structural routines and the standard unit set.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::names::quote_ident;
use crate::store::{ObjectDef, ObjectKind, TenantStore};

use super::{StepDescriptor, StructuralRoutine};

/// A unit described as a list of objects, created in order.
#[derive(Debug, Clone)]
pub struct DeclaredUnit {
    objects: Vec<ObjectDef>,
}

impl DeclaredUnit {
    /// Creates a unit from its objects.
    pub fn new(objects: Vec<ObjectDef>) -> Self {
        Self { objects }
    }

    /// The unit's objects.
    pub fn objects(&self) -> &[ObjectDef] {
        &self.objects
    }
}

#[async_trait]
impl StructuralRoutine for DeclaredUnit {
    async fn apply(&self, store: &dyn TenantStore, namespace: &str) -> StoreResult<()> {
        for object in &self.objects {
            tracing::debug!(namespace, object = %object.name, kind = %object.kind, "Creating object");
            store.create_object(namespace, object).await?;
        }
        Ok(())
    }

    fn provides(&self) -> Vec<String> {
        self.objects.iter().map(|o| o.name.clone()).collect()
    }

    fn references(&self) -> Vec<String> {
        let mut references: Vec<String> = self
            .objects
            .iter()
            .flat_map(|o| o.references.iter().cloned())
            .collect();
        references.sort();
        references.dedup();
        references
    }
}

/// A unit backed by a SQL script.
///
/// `{namespace}` in the script is replaced with the quoted namespace name
/// before it runs.
#[derive(Debug, Clone)]
pub struct ScriptUnit {
    script: String,
}

impl ScriptUnit {
    /// Creates a unit from script text.
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
        }
    }

    /// The script with placeholders substituted for `namespace`.
    pub fn render(&self, namespace: &str) -> String {
        self.script.replace("{namespace}", &quote_ident(namespace))
    }
}

#[async_trait]
impl StructuralRoutine for ScriptUnit {
    async fn apply(&self, store: &dyn TenantStore, namespace: &str) -> StoreResult<()> {
        store.execute_script(namespace, &self.render(namespace)).await
    }
}

const RECORD_KIND: &str = r#"DO $$
BEGIN
    CREATE TYPE record_kind AS ENUM ('note', 'fact', 'event', 'reference');
EXCEPTION
    WHEN duplicate_object THEN NULL;
END
$$"#;

const RECORD_IDS: &str = "CREATE SEQUENCE IF NOT EXISTS record_ids";

const RECORDS: &str = r#"CREATE TABLE IF NOT EXISTS records (
    id BIGINT PRIMARY KEY DEFAULT nextval('record_ids'),
    kind record_kind NOT NULL DEFAULT 'note',
    body TEXT NOT NULL,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)"#;

const TOUCH_RECORD: &str = r#"CREATE OR REPLACE PROCEDURE touch_record(target BIGINT)
LANGUAGE sql
AS $$
    UPDATE records SET updated_at = now() WHERE id = target
$$"#;

const RECORD_LINKS: &str = r#"CREATE TABLE IF NOT EXISTS record_links (
    source_id BIGINT NOT NULL REFERENCES records (id) ON DELETE CASCADE,
    target_id BIGINT NOT NULL REFERENCES records (id) ON DELETE CASCADE,
    relation TEXT NOT NULL,
    weight DOUBLE PRECISION NOT NULL DEFAULT 1.0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (source_id, target_id, relation)
)"#;

const RECORD_ASSOCIATIONS: &str = r#"CREATE TABLE IF NOT EXISTS record_associations (
    record_id BIGINT NOT NULL REFERENCES records (id) ON DELETE CASCADE,
    label TEXT NOT NULL,
    score REAL,
    PRIMARY KEY (record_id, label)
)"#;

const RECORD_OVERVIEW: &str = r#"CREATE OR REPLACE VIEW record_overview AS
SELECT r.id,
       r.kind,
       r.body,
       count(DISTINCT l.target_id) AS link_count,
       count(DISTINCT a.label) AS association_count
FROM records r
LEFT JOIN record_links l ON l.source_id = r.id
LEFT JOIN record_associations a ON a.record_id = r.id
GROUP BY r.id, r.kind, r.body"#;

const RECORD_DEGREE: &str = r#"CREATE OR REPLACE FUNCTION record_degree(node BIGINT)
RETURNS BIGINT
LANGUAGE sql STABLE
AS $$
    SELECT count(*) FROM record_links WHERE source_id = node OR target_id = node
$$"#;

/// The standard units in dependency order.
pub fn standard_steps() -> Vec<StepDescriptor> {
    let base_records = DeclaredUnit::new(vec![
        ObjectDef::new("record_kind", ObjectKind::Type, RECORD_KIND),
        ObjectDef::new("record_ids", ObjectKind::Sequence, RECORD_IDS),
        ObjectDef::new("records", ObjectKind::Table, RECORDS)
            .references("record_kind")
            .references("record_ids"),
        ObjectDef::new("touch_record", ObjectKind::Procedure, TOUCH_RECORD).references("records"),
    ]);

    let relationship_graph = DeclaredUnit::new(vec![
        ObjectDef::new("record_links", ObjectKind::Table, RECORD_LINKS).references("records"),
    ]);

    let association_graph = DeclaredUnit::new(vec![
        ObjectDef::new("record_associations", ObjectKind::Table, RECORD_ASSOCIATIONS)
            .references("records"),
    ]);

    let read_views = DeclaredUnit::new(vec![
        ObjectDef::new("record_overview", ObjectKind::View, RECORD_OVERVIEW)
            .references("records")
            .references("record_links")
            .references("record_associations"),
        ObjectDef::new("record_degree", ObjectKind::Function, RECORD_DEGREE)
            .references("record_links"),
    ]);

    vec![
        StepDescriptor::implemented("base_records", base_records),
        StepDescriptor::implemented("relationship_graph", relationship_graph)
            .requires("base_records"),
        StepDescriptor::implemented("association_graph", association_graph)
            .requires("base_records"),
        StepDescriptor::implemented("read_views", read_views)
            .requires("relationship_graph")
            .requires("association_graph"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_unit_substitutes_namespace() {
        let unit = ScriptUnit::new("CREATE TABLE {namespace}.t (); GRANT SELECT ON {namespace}.t TO x");
        assert_eq!(
            unit.render("acme"),
            r#"CREATE TABLE "acme".t (); GRANT SELECT ON "acme".t TO x"#
        );
    }

    #[test]
    fn test_declared_unit_provides_and_references() {
        let steps = standard_steps();
        let read_views = steps[3].provides();
        assert_eq!(read_views, vec!["record_overview", "record_degree"]);
        assert_eq!(
            steps[3].references(),
            vec!["record_associations", "record_links", "records"]
        );
    }

    #[test]
    fn test_standard_ddl_is_rerunnable() {
        for step in standard_steps() {
            assert!(step.is_implemented(), "{} has no routine", step.name());
        }
        for ddl in [RECORD_IDS, RECORDS, RECORD_LINKS, RECORD_ASSOCIATIONS] {
            assert!(ddl.contains("IF NOT EXISTS"));
        }
        for ddl in [TOUCH_RECORD, RECORD_OVERVIEW, RECORD_DEGREE] {
            assert!(ddl.contains("OR REPLACE"));
        }
        assert!(RECORD_KIND.contains("duplicate_object"));
    }
}
