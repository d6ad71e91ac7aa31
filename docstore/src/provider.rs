use std::sync::Arc;

use dynquery_core::error::{DynQueryError, Result};
use dynquery_core::expr::ProjectionExpr;
use dynquery_core::provider::{
    GroupOptions, Operator, OperatorRegistry, QueryProvider, register_standard_ops,
};
use dynquery_core::query::{DynQuery, Stage};
use dynquery_core::shape::{ShapeCache, ShapeRef};
use dynquery_core::trace_drain;

use crate::collection::DOCSTORE_DRIVER;
use crate::executor::{self, AggregateGroupStage};

/// Namespace the docstore operators are registered under.
pub const DOCSTORE_NAMESPACE: &str = "docstore";
/// The driver's native grouping operator.
pub const AGGREGATE_GROUP_OP: &str = "aggregate_group";
/// Drain operator running a docstore pipeline to completion.
pub const FIND_TO_VEC_OP: &str = "find_to_vec";

/// Provider over document collections.
///
/// The backend's grouping operator takes options the standard one does not,
/// so `invoke_group_by` is overridden to resolve the driver's own operator
/// shape; everything else reuses the shared translation.
#[derive(Debug)]
pub struct DocStoreProvider {
    registry: OperatorRegistry,
    cache: ShapeCache,
    group_options: GroupOptions,
}

impl DocStoreProvider {
    pub fn new() -> Self {
        Self::with_group_options(GroupOptions::default())
    }

    pub fn with_group_options(group_options: GroupOptions) -> Self {
        let registry = OperatorRegistry::new();
        register_standard_ops(&registry);
        register_docstore_ops(&registry);
        Self {
            registry,
            cache: ShapeCache::new(),
            group_options,
        }
    }
}

impl Default for DocStoreProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryProvider for DocStoreProvider {
    fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    fn shape_cache(&self) -> &ShapeCache {
        &self.cache
    }

    fn extensions_namespace(&self) -> &'static str {
        DOCSTORE_NAMESPACE
    }

    fn drain_operator_name(&self) -> &'static str {
        FIND_TO_VEC_OP
    }

    fn invoke_group_by(
        &self,
        query: DynQuery,
        key: ProjectionExpr,
        key_shape: ShapeRef,
        group_shape: ShapeRef,
    ) -> Result<DynQuery> {
        let shape = query.shape();
        match self
            .registry
            .resolve(DOCSTORE_NAMESPACE, AGGREGATE_GROUP_OP, &shape)
            .as_deref()
        {
            Some(Operator::GroupByWithOptions(apply)) => apply(
                query,
                key,
                key_shape,
                group_shape,
                self.group_options.clone(),
            ),
            _ => Err(DynQueryError::UnsupportedOperatorShape {
                namespace: DOCSTORE_NAMESPACE.to_string(),
                operator: AGGREGATE_GROUP_OP.to_string(),
            }),
        }
    }
}

/// Registers the docstore grouping and drain operators.
pub fn register_docstore_ops(registry: &OperatorRegistry) {
    registry.register(
        DOCSTORE_NAMESPACE,
        AGGREGATE_GROUP_OP,
        Arc::new(|_shape| {
            Some(Operator::GroupByWithOptions(Arc::new(
                |query, key, key_shape, group_shape, options| {
                    Ok(query.with_stage(
                        Stage::Custom {
                            driver: DOCSTORE_DRIVER,
                            stage: Arc::new(AggregateGroupStage {
                                key,
                                key_shape,
                                options,
                            }),
                        },
                        group_shape,
                    ))
                },
            )))
        }),
    );
    registry.register(
        DOCSTORE_NAMESPACE,
        FIND_TO_VEC_OP,
        Arc::new(|_shape| {
            Some(Operator::Drain(Arc::new(|query, options| {
                Box::pin(async move {
                    let rows = executor::execute(query, options).await?;
                    trace_drain!("find_to_vec", "docstore", rows.len());
                    Ok(rows)
                })
            })))
        }),
    );
}
