use std::sync::Arc;

use dynquery_core::error::{DynQueryError, Result};
use dynquery_core::provider::{Operator, OperatorRegistry, QueryProvider, register_standard_ops};
use dynquery_core::query::DynQuery;
use dynquery_core::shape::ShapeCache;
use dynquery_core::trace_drain;
use dynquery_core::value::Value;

use crate::executor;

/// Drain operator enumerating a memory pipeline into a vector.
pub const TO_VEC_OP: &str = "to_vec";

/// Provider over in-memory collections. The standard grouping and projection
/// operators apply unchanged; only the drain operator is driver-specific.
#[derive(Debug)]
pub struct MemoryProvider {
    registry: OperatorRegistry,
    cache: ShapeCache,
}

impl MemoryProvider {
    pub fn new() -> Self {
        let registry = OperatorRegistry::new();
        register_standard_ops(&registry);
        register_memory_ops(&registry);
        Self {
            registry,
            cache: ShapeCache::new(),
        }
    }

    /// Synchronous enumeration, for callers that have no executor running.
    pub fn to_vec(&self, query: &DynQuery) -> Result<Vec<Value>> {
        executor::execute(query)
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryProvider for MemoryProvider {
    fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    fn shape_cache(&self) -> &ShapeCache {
        &self.cache
    }

    fn drain_operator_name(&self) -> &'static str {
        TO_VEC_OP
    }
}

/// Registers the memory drain operator. Execution is synchronous; the future
/// only wraps the result so the async materialization surface stays uniform
/// across drivers.
pub fn register_memory_ops(registry: &OperatorRegistry) {
    registry.register(
        dynquery_core::STD_NAMESPACE,
        TO_VEC_OP,
        Arc::new(|_shape| {
            Some(Operator::Drain(Arc::new(|query, options| {
                Box::pin(async move {
                    if options.cancelled() {
                        return Err(DynQueryError::Cancelled);
                    }
                    let rows = executor::execute(&query)?;
                    trace_drain!("to_vec", "memory", rows.len());
                    Ok(rows)
                })
            })))
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::MemoryCollection;
    use dynquery_core::record;
    use dynquery_core::resolve::{CancelToken, MaterializeOptions};
    use dynquery_core::shape::{FieldDef, FieldKind, Shape};

    fn sales_query() -> DynQuery {
        let shape = Shape::new(
            "Sale",
            vec![
                FieldDef::new("city", FieldKind::Text),
                FieldDef::new("total", FieldKind::Int),
            ],
        )
        .into_ref();
        MemoryCollection::new(
            shape,
            vec![
                Value::Record(record! { city: "A", total: 10 }),
                Value::Record(record! { city: "B", total: 3 }),
            ],
        )
        .into_query()
    }

    #[tokio::test]
    async fn materialize_matches_synchronous_enumeration() {
        let provider = MemoryProvider::new();
        let query = provider.query(sales_query(), "select=city").unwrap();
        let sync_rows = provider.to_vec(&query).unwrap();
        let async_rows = provider
            .materialize(query, MaterializeOptions::default())
            .await
            .unwrap();
        assert_eq!(sync_rows, async_rows);
    }

    #[tokio::test]
    async fn cancelled_token_aborts_materialization() {
        let provider = MemoryProvider::new();
        let query = provider.query(sales_query(), "select=city").unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = provider
            .materialize(query, MaterializeOptions::with_cancel(cancel))
            .await
            .unwrap_err();
        assert!(matches!(err, DynQueryError::Cancelled));
    }
}
