use dynquery_core::error::{DynQueryError, Result};
use dynquery_core::expr::ProjectionExpr;
use dynquery_core::provider::GroupOptions;
use dynquery_core::query::{DynQuery, Stage};
use dynquery_core::resolve::MaterializeOptions;
use dynquery_core::shape::ShapeRef;
use dynquery_core::value::{Record, Value};
use dynquery_core::{ITEMS_FIELD, KEY_FIELD};

use crate::collection::DocCollection;
use crate::convert::document_to_value;

/// The driver's native grouping plan node, carried as a custom stage.
///
/// The standard grouping stage never appears in a docstore pipeline; the
/// provider substitutes this node when a grouped query is composed.
#[derive(Debug, Clone)]
pub struct AggregateGroupStage {
    pub key: ProjectionExpr,
    pub key_shape: ShapeRef,
    pub options: GroupOptions,
}

/// Runs a pipeline over its document collection.
///
/// The cancel token is checked between stages, so a cancelled materialization
/// stops at the next stage boundary.
pub async fn execute(query: DynQuery, options: MaterializeOptions) -> Result<Vec<Value>> {
    let collection = query
        .source()
        .as_any()
        .downcast_ref::<DocCollection>()
        .ok_or_else(|| {
            DynQueryError::Execution("pipeline source is not a document collection".into())
        })?;
    if let Some(clause) = query.raw_filters().first() {
        return Err(DynQueryError::Execution(format!(
            "docstore driver cannot apply raw filter clause '{clause}'"
        )));
    }
    if let Some(clause) = query.raw_orderings().first() {
        return Err(DynQueryError::Execution(format!(
            "docstore driver cannot apply raw ordering clause '{clause}'"
        )));
    }
    if options.cancelled() {
        return Err(DynQueryError::Cancelled);
    }

    let documents = collection.fetch().await?;
    let mut rows: Vec<Value> = documents.iter().map(document_to_value).collect();
    for stage in query.stages() {
        if options.cancelled() {
            return Err(DynQueryError::Cancelled);
        }
        tokio::task::yield_now().await;
        rows = match stage {
            Stage::GroupBy { .. } => {
                return Err(DynQueryError::Execution(
                    "docstore pipelines group through their native aggregate stage".into(),
                ));
            }
            Stage::Select { projection, .. } => rows
                .iter()
                .map(|row| projection.eval_for(row))
                .collect::<Result<_>>()?,
            Stage::Skip(count) => rows.into_iter().skip(*count).collect(),
            Stage::Take(count) => rows.into_iter().take(*count).collect(),
            Stage::Custom { driver, stage } => {
                let aggregate = stage
                    .downcast_ref::<AggregateGroupStage>()
                    .filter(|_| *driver == crate::collection::DOCSTORE_DRIVER)
                    .ok_or_else(|| {
                        DynQueryError::Execution(format!(
                            "docstore driver cannot execute a '{driver}' stage"
                        ))
                    })?;
                aggregate_group(rows, aggregate)?
            }
        };
    }
    Ok(rows)
}

/// Partitions rows into group records in first-encounter key order. The
/// stage options can relax the ordering guarantee for a remote backend;
/// in-process grouping satisfies it either way.
fn aggregate_group(rows: Vec<Value>, stage: &AggregateGroupStage) -> Result<Vec<Value>> {
    let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
    for row in rows {
        let key_value = stage.key.eval_for(&row)?;
        match groups.iter_mut().find(|(existing, _)| *existing == key_value) {
            Some((_, members)) => members.push(row),
            None => groups.push((key_value, vec![row])),
        }
    }
    Ok(groups
        .into_iter()
        .map(|(key_value, members)| {
            let mut record = Record::with_capacity(2);
            record.push(KEY_FIELD, key_value);
            record.push(ITEMS_FIELD, Value::Seq(members));
            Value::Record(record)
        })
        .collect())
}
