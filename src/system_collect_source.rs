//! `SystemCollectSource`: the illustrative `CollectSource` plug-in for
//! catalog tables (`information_schema`, `sys`, `pg_catalog`). Catalog
//! lookup - how a relation name maps to a table definition in the real
//! system - is out of scope; this module ships just enough of a static
//! registry to make the seam concrete and testable.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::batch_iterator::{BatchIterator, VecBatchIterator};
use crate::error::{CollectError, SourceError};
use crate::phase::Phase;
use crate::row::{Cell, Row};
use crate::source::CollectSource;
use crate::task::CollectTask;

/// One untyped record as produced by a system table's record source -
/// column name to cell, prior to projection into row order.
pub type SystemRecord = HashMap<Arc<str>, Cell>;

/// A static definition of one system table: its column order and a
/// callback that asynchronously retrieves the records backing it for a
/// given user.
pub struct SystemTableDefinition {
    pub columns: Vec<Arc<str>>,
    pub records: Arc<dyn Fn(Arc<str>) -> BoxFuture<'static, Vec<SystemRecord>> + Send + Sync>,
}

impl SystemTableDefinition {
    pub fn new(
        columns: Vec<Arc<str>>,
        records: impl Fn(Arc<str>) -> BoxFuture<'static, Vec<SystemRecord>> + Send + Sync + 'static,
    ) -> Self {
        SystemTableDefinition {
            columns,
            records: Arc::new(records),
        }
    }

    fn project(&self, record: &SystemRecord) -> Row {
        self.columns
            .iter()
            .map(|col| record.get(col).cloned().unwrap_or(Cell::Null))
            .collect()
    }
}

/// `schema -> relation -> definition`. Populated by whoever wires up this
/// crate's catalog; resolving *which* relations exist per schema is
/// out-of-scope catalog logic.
#[derive(Default)]
pub struct SystemTableCatalog {
    schemas: HashMap<Arc<str>, HashMap<Arc<str>, Arc<SystemTableDefinition>>>,
}

impl SystemTableCatalog {
    pub fn new() -> Self {
        SystemTableCatalog::default()
    }

    pub fn register(
        &mut self,
        schema: impl Into<Arc<str>>,
        relation: impl Into<Arc<str>>,
        definition: SystemTableDefinition,
    ) {
        self.schemas
            .entry(schema.into())
            .or_default()
            .insert(relation.into(), Arc::new(definition));
    }

    fn lookup(&self, schema: &str, relation: &str) -> Result<Arc<SystemTableDefinition>, SourceError> {
        let tables = self
            .schemas
            .get(schema)
            .ok_or_else(|| SourceError::SchemaUnknown(schema.to_string()))?;
        tables
            .get(relation)
            .cloned()
            .ok_or_else(|| SourceError::RelationUnknown {
                schema: schema.to_string(),
                relation: relation.to_string(),
            })
    }
}

/// Reads a single local catalog table: resolves `(schema, relation)` to a
/// static [`SystemTableDefinition`], retrieves records for `user`, and
/// projects them lazily into `Row`s. Kill is a no-op at this layer - the
/// records are either already local by the time `get_iterator` returns, or
/// the retrieval was a remote call that already completed.
pub struct SystemCollectSource {
    catalog: Arc<SystemTableCatalog>,
    user: Arc<str>,
}

impl SystemCollectSource {
    pub fn new(catalog: Arc<SystemTableCatalog>, user: impl Into<Arc<str>>) -> Self {
        SystemCollectSource {
            catalog,
            user: user.into(),
        }
    }
}

#[async_trait]
impl CollectSource for SystemCollectSource {
    async fn get_iterator(
        &self,
        phase: &Phase,
        _task: &CollectTask,
        _support_move_to_start: bool,
    ) -> Result<Box<dyn BatchIterator>, CollectError> {
        let (schema, relation) = match phase {
            Phase::SystemTable { schema, relation, .. } => (schema, relation),
            other => {
                return Err(SourceError::RelationUnknown {
                    schema: String::new(),
                    relation: other.name().to_string(),
                }
                .into())
            }
        };

        let definition = self.catalog.lookup(schema, relation)?;
        let records = (definition.records)(self.user.clone()).await;
        let rows = records.iter().map(|record| definition.project(record)).collect();
        Ok(Box::new(VecBatchIterator::new(rows)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PhaseId;
    use futures::FutureExt;

    fn catalog() -> Arc<SystemTableCatalog> {
        let mut catalog = SystemTableCatalog::new();
        catalog.register(
            "sys",
            "summits",
            SystemTableDefinition::new(
                vec![Arc::from("mountain"), Arc::from("height")],
                |_user| {
                    async {
                        vec![
                            SystemRecord::from([
                                (Arc::from("mountain"), Cell::text("Mont Blanc")),
                                (Arc::from("height"), Cell::I64(4808)),
                            ]),
                            SystemRecord::from([
                                (Arc::from("mountain"), Cell::text("Grossglockner")),
                                (Arc::from("height"), Cell::I64(3798)),
                            ]),
                        ]
                    }
                    .boxed()
                },
            ),
        );
        Arc::new(catalog)
    }

    fn system_table_phase(schema: &str, relation: &str) -> Phase {
        Phase::SystemTable {
            id: PhaseId::nil(),
            name: Arc::from(relation),
            schema: Arc::from(schema),
            relation: Arc::from(relation),
        }
    }

    #[tokio::test]
    async fn unknown_schema_is_rejected() {
        let catalog = catalog();
        let definition = catalog.lookup("no_such_schema", "summits");
        assert!(matches!(definition, Err(SourceError::SchemaUnknown(_))));
    }

    #[tokio::test]
    async fn unknown_relation_in_known_schema_is_rejected() {
        let catalog = catalog();
        let definition = catalog.lookup("sys", "no_such_table");
        assert!(matches!(
            definition,
            Err(SourceError::RelationUnknown { .. })
        ));
    }

    #[tokio::test]
    async fn projects_records_into_rows_in_column_order() {
        let catalog = catalog();
        let definition = catalog.lookup("sys", "summits").unwrap();
        let records = (definition.records)(Arc::from("crate")).await;
        let rows: Vec<Row> = records.iter().map(|r| definition.project(r)).collect();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get(0), Some(&Cell::text("Mont Blanc")));
        assert_eq!(rows[0].get(1), Some(&Cell::I64(4808)));
    }

    #[test]
    fn phase_accessors_report_schema_relation_via_name() {
        let phase = system_table_phase("sys", "summits");
        assert_eq!(phase.name().as_ref(), "summits");
    }
}
