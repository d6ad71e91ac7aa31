use dynquery_core::error::{DynQueryError, Result};
use dynquery_core::expr::ProjectionExpr;
use dynquery_core::query::{DynQuery, Stage};
use dynquery_core::value::{Record, Value};
use dynquery_core::{ITEMS_FIELD, KEY_FIELD};

use crate::collection::MemoryCollection;

/// Runs a pipeline over its in-memory collection, one stage at a time.
///
/// Raw filter and ordering clauses are backend-native syntax this driver has
/// no parser for, so their presence is an error rather than a silent no-op.
pub fn execute(query: &DynQuery) -> Result<Vec<Value>> {
    let collection = query
        .source()
        .as_any()
        .downcast_ref::<MemoryCollection>()
        .ok_or_else(|| {
            DynQueryError::Execution("pipeline source is not a memory collection".into())
        })?;
    if let Some(clause) = query.raw_filters().first() {
        return Err(DynQueryError::Execution(format!(
            "memory driver cannot apply raw filter clause '{clause}'"
        )));
    }
    if let Some(clause) = query.raw_orderings().first() {
        return Err(DynQueryError::Execution(format!(
            "memory driver cannot apply raw ordering clause '{clause}'"
        )));
    }

    let mut rows = collection.rows().to_vec();
    for stage in query.stages() {
        rows = match stage {
            Stage::GroupBy { key, .. } => group_rows(rows, key)?,
            Stage::Select { projection, .. } => rows
                .iter()
                .map(|row| projection.eval_for(row))
                .collect::<Result<_>>()?,
            Stage::Skip(count) => rows.into_iter().skip(*count).collect(),
            Stage::Take(count) => rows.into_iter().take(*count).collect(),
            Stage::Custom { driver, .. } => {
                return Err(DynQueryError::Execution(format!(
                    "memory driver cannot execute a '{driver}' stage"
                )));
            }
        };
    }
    Ok(rows)
}

/// Partitions rows into group records, keeping groups in first-encounter
/// order of their keys.
fn group_rows(rows: Vec<Value>, key: &ProjectionExpr) -> Result<Vec<Value>> {
    let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
    for row in rows {
        let key_value = key.eval_for(&row)?;
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
