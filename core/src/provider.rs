use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use compact_str::CompactString;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::descriptor::QueryDescriptor;
use crate::error::{DynQueryError, Result};
use crate::expr::{Expr, ParamId, ProjectionExpr};
use crate::group::build_grouped_query;
use crate::projection::build_projection;
use crate::query::{DynQuery, Stage};
use crate::resolve::MaterializeOptions;
use crate::shape::{ShapeCache, ShapeRef};
use crate::value::Value;
use crate::trace_op;

/// Namespace the built-in operators are registered under.
pub const STD_NAMESPACE: &str = "std";
/// Operator name for the standard grouping stage.
pub const GROUP_BY_OP: &str = "group_by";
/// Operator name for the standard projection stage.
pub const SELECT_OP: &str = "select";

/// Options a driver-native grouping operator accepts alongside the key.
#[derive(Debug, Clone)]
pub struct GroupOptions {
    /// Keep groups in first-encounter order of their keys.
    pub preserve_order: bool,
    /// Let the backend spill grouping state out of memory.
    pub allow_disk_use: bool,
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self {
            preserve_order: true,
            allow_disk_use: false,
        }
    }
}

type GroupByFn =
    dyn Fn(DynQuery, ProjectionExpr, ShapeRef, ShapeRef) -> Result<DynQuery> + Send + Sync;
type GroupByWithOptionsFn = dyn Fn(DynQuery, ProjectionExpr, ShapeRef, ShapeRef, GroupOptions) -> Result<DynQuery>
    + Send
    + Sync;
type SelectFn = dyn Fn(DynQuery, ProjectionExpr, ShapeRef) -> Result<DynQuery> + Send + Sync;
type DrainFn =
    dyn Fn(DynQuery, MaterializeOptions) -> BoxFuture<'static, Result<Vec<Value>>> + Send + Sync;

/// A resolved query operator. Each variant carries a distinct call shape;
/// callers that expect one variant and resolve another report
/// [`DynQueryError::UnsupportedOperatorShape`] instead of guessing.
#[derive(Clone)]
pub enum Operator {
    /// Append a grouping over a key projection.
    GroupBy(Arc<GroupByFn>),
    /// Grouping that additionally takes backend options. Drivers whose native
    /// operator is incompatible with the standard one register this shape.
    GroupByWithOptions(Arc<GroupByWithOptionsFn>),
    /// Append a per-element projection.
    Select(Arc<SelectFn>),
    /// Enumerate the pipeline to completion.
    Drain(Arc<DrainFn>),
}

impl Operator {
    fn variant(&self) -> &'static str {
        match self {
            Operator::GroupBy(_) => "group_by",
            Operator::GroupByWithOptions(_) => "group_by_with_options",
            Operator::Select(_) => "select",
            Operator::Drain(_) => "drain",
        }
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Operator").field(&self.variant()).finish()
    }
}

/// Produces an operator for a concrete element shape, or `None` when the
/// operator does not apply to it.
pub type OperatorFactory = Arc<dyn Fn(&ShapeRef) -> Option<Operator> + Send + Sync>;

/// Registry of named operator factories plus a cache of resolved operators.
///
/// Factories are keyed by `(namespace, name)`; resolutions are additionally
/// keyed by the element shape's name, so a factory runs once per shape it is
/// asked about. Concurrent first resolutions converge on one published
/// operator.
#[derive(Default)]
pub struct OperatorRegistry {
    factories: RwLock<HashMap<(CompactString, CompactString), OperatorFactory>>,
    resolved: RwLock<HashMap<(CompactString, CompactString, CompactString), Arc<Operator>>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory, replacing any previous one under the same name.
    /// Cached resolutions from the replaced factory are dropped.
    pub fn register(
        &self,
        namespace: impl Into<CompactString>,
        name: impl Into<CompactString>,
        factory: OperatorFactory,
    ) {
        let namespace = namespace.into();
        let name = name.into();
        {
            let mut resolved = self
                .resolved
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            resolved.retain(|(ns, op, _), _| *ns != namespace || *op != name);
        }
        let mut factories = self
            .factories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        factories.insert((namespace, name), factory);
    }

    /// Resolves an operator for the given element shape, memoizing the
    /// result per shape name.
    pub fn resolve(&self, namespace: &str, name: &str, shape: &ShapeRef) -> Option<Arc<Operator>> {
        let key = (
            CompactString::from(namespace),
            CompactString::from(name),
            CompactString::from(shape.name()),
        );
        {
            let resolved = self.resolved.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(operator) = resolved.get(&key) {
                return Some(operator.clone());
            }
        }
        let factory = {
            let factories = self
                .factories
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            factories
                .get(&(key.0.clone(), key.1.clone()))
                .cloned()
        }?;
        let operator = Arc::new(factory(shape)?);
        let mut resolved = self
            .resolved
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Some(resolved.entry(key).or_insert(operator).clone())
    }
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let factories = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("OperatorRegistry")
            .field("factories", &factories.len())
            .finish()
    }
}

/// Registers the standard grouping and projection operators. They apply to
/// every element shape and append plain pipeline stages.
pub fn register_standard_ops(registry: &OperatorRegistry) {
    registry.register(
        STD_NAMESPACE,
        GROUP_BY_OP,
        Arc::new(|_shape| {
            Some(Operator::GroupBy(Arc::new(
                |query, key, key_shape, group_shape| {
                    Ok(query.with_stage(Stage::GroupBy { key, key_shape }, group_shape))
                },
            )))
        }),
    );
    registry.register(
        STD_NAMESPACE,
        SELECT_OP,
        Arc::new(|_shape| {
            Some(Operator::Select(Arc::new(|query, projection, shape| {
                Ok(query.with_stage(
                    Stage::Select {
                        projection,
                        shape: shape.clone(),
                    },
                    shape,
                ))
            })))
        }),
    );
}

/// A backend's entry point into the translation engine.
///
/// The provided methods implement the whole descriptor-to-pipeline
/// translation; drivers supply the registry, the shape cache and the name of
/// their drain operator, and override `invoke_group_by` only when their
/// native grouping operator has a different call shape.
pub trait QueryProvider: Send + Sync {
    fn registry(&self) -> &OperatorRegistry;

    fn shape_cache(&self) -> &ShapeCache;

    /// Namespace the driver's own operators are registered under.
    fn extensions_namespace(&self) -> &'static str {
        STD_NAMESPACE
    }

    /// Name of the operator that enumerates a pipeline to completion.
    fn drain_operator_name(&self) -> &'static str;

    /// Appends a grouping over `key` to the pipeline.
    fn invoke_group_by(
        &self,
        query: DynQuery,
        key: ProjectionExpr,
        key_shape: ShapeRef,
        group_shape: ShapeRef,
    ) -> Result<DynQuery> {
        let shape = query.shape();
        match self
            .registry()
            .resolve(STD_NAMESPACE, GROUP_BY_OP, &shape)
            .as_deref()
        {
            Some(Operator::GroupBy(apply)) => apply(query, key, key_shape, group_shape),
            _ => Err(DynQueryError::UnsupportedOperatorShape {
                namespace: STD_NAMESPACE.to_string(),
                operator: GROUP_BY_OP.to_string(),
            }),
        }
    }

    /// Appends a per-element projection to the pipeline.
    fn invoke_select(
        &self,
        query: DynQuery,
        projection: ProjectionExpr,
        shape: ShapeRef,
    ) -> Result<DynQuery> {
        let element = query.shape();
        match self
            .registry()
            .resolve(STD_NAMESPACE, SELECT_OP, &element)
            .as_deref()
        {
            Some(Operator::Select(apply)) => apply(query, projection, shape),
            _ => Err(DynQueryError::UnsupportedOperatorShape {
                namespace: STD_NAMESPACE.to_string(),
                operator: SELECT_OP.to_string(),
            }),
        }
    }

    /// Composes a grouped pipeline from grouping and selection paths.
    fn group_by(
        &self,
        query: DynQuery,
        group_paths: &[String],
        select_paths: &[String],
    ) -> Result<DynQuery> {
        build_grouped_query(self, query, group_paths, select_paths)
    }

    /// Parses a raw query string and applies it to the pipeline.
    fn query(&self, query: DynQuery, raw: &str) -> Result<DynQuery> {
        let descriptor = QueryDescriptor::parse(raw)?;
        self.apply(query, &descriptor)
    }

    /// Applies a parsed descriptor to the pipeline: filters and orderings
    /// ride along raw, grouping composes key and output projections, a bare
    /// selection becomes one projection stage, and pagination comes last.
    fn apply(&self, query: DynQuery, descriptor: &QueryDescriptor) -> Result<DynQuery> {
        trace_op!("apply", query.source().driver(), query.shape().name());
        let mut query = query
            .with_raw_filters(descriptor.where_.clone())
            .with_raw_orderings(descriptor.order_by.clone());
        if !descriptor.group_by.is_empty() {
            query = self.group_by(query, &descriptor.group_by, &descriptor.select)?;
        } else if !descriptor.select.is_empty() {
            let source_shape = query.shape();
            let param = ParamId::fresh();
            let built = build_projection(
                &descriptor.select,
                &source_shape,
                Expr::Param(param),
                false,
                self.shape_cache(),
            )?;
            let shape = built.record_shape().cloned().ok_or_else(|| {
                DynQueryError::Execution("selection must yield records".into())
            })?;
            query = self.invoke_select(query, ProjectionExpr::new(param, built.expr), shape)?;
        }
        if descriptor.skip > 0 {
            let shape = query.shape();
            query = query.with_stage(Stage::Skip(descriptor.skip), shape);
        }
        if descriptor.take > 0 {
            let shape = query.shape();
            query = query.with_stage(Stage::Take(descriptor.take), shape);
        }
        Ok(query)
    }

    /// Enumerates the pipeline to completion through the driver's drain
    /// operator.
    fn materialize(
        &self,
        query: DynQuery,
        options: MaterializeOptions,
    ) -> BoxFuture<'static, Result<Vec<Value>>> {
        let namespace = self.extensions_namespace();
        let name = self.drain_operator_name();
        trace_op!("materialize", query.source().driver(), query.shape().name());
        let shape = query.shape();
        match self.registry().resolve(namespace, name, &shape).as_deref() {
            Some(Operator::Drain(drain)) => drain(query, options),
            _ => futures_util::future::ready(Err(DynQueryError::UnsupportedOperatorShape {
                namespace: namespace.to_string(),
                operator: name.to_string(),
            }))
            .boxed(),
        }
    }
}
