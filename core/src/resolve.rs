use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use compact_str::CompactString;

use crate::error::{DynQueryError, Result};
use crate::provider::{Operator, OperatorRegistry};
use crate::query::DynQuery;
use crate::value::Value;

/// Cooperative cancellation handle for in-flight materializations.
///
/// Clones share one flag; cancelling any clone cancels them all. Drain
/// operators check the flag between units of work, so cancellation takes
/// effect at the next checkpoint rather than immediately.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Options threaded through to a drain operator.
#[derive(Debug, Clone, Default)]
pub struct MaterializeOptions {
    pub cancel: Option<CancelToken>,
}

impl MaterializeOptions {
    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self {
            cancel: Some(cancel),
        }
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

/// Late-bound handle to a named drain operator.
///
/// Holds only the operator's coordinates; the operator itself is resolved
/// against the element shape at call time, with repeat lookups served from
/// the registry's resolution cache.
#[derive(Debug, Clone)]
pub struct AsyncResolver {
    namespace: CompactString,
    method: CompactString,
}

impl AsyncResolver {
    pub fn new(namespace: impl Into<CompactString>, method: impl Into<CompactString>) -> Self {
        Self {
            namespace: namespace.into(),
            method: method.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Resolves the drain operator for the pipeline's element shape and
    /// awaits its completion.
    pub async fn resolve(
        &self,
        registry: &OperatorRegistry,
        query: DynQuery,
        options: MaterializeOptions,
    ) -> Result<Vec<Value>> {
        let shape = query.shape();
        match registry
            .resolve(&self.namespace, &self.method, &shape)
            .as_deref()
        {
            Some(Operator::Drain(drain)) => drain(query, options).await,
            _ => Err(DynQueryError::UnsupportedOperatorShape {
                namespace: self.namespace.to_string(),
                operator: self.method.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QuerySource;
    use crate::shape::{FieldDef, FieldKind, Shape, ShapeRef};
    use std::any::Any;

    struct StubSource(ShapeRef);

    impl QuerySource for StubSource {
        fn shape(&self) -> ShapeRef {
            self.0.clone()
        }

        fn driver(&self) -> &'static str {
            "stub"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn stub_query() -> DynQuery {
        let shape = Shape::new("Row", vec![FieldDef::new("a", FieldKind::Int)]).into_ref();
        DynQuery::new(Arc::new(StubSource(shape)))
    }

    #[test]
    fn cancel_propagates_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn default_options_are_not_cancelled() {
        assert!(!MaterializeOptions::default().cancelled());
    }

    #[tokio::test]
    async fn unresolvable_drain_reports_operator_coordinates() {
        let registry = OperatorRegistry::new();
        let resolver = AsyncResolver::new("docs", "find_to_vec");
        let err = resolver
            .resolve(&registry, stub_query(), MaterializeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DynQueryError::UnsupportedOperatorShape { ref namespace, ref operator }
                if namespace == "docs" && operator == "find_to_vec"
        ));
    }

    #[tokio::test]
    async fn resolver_awaits_a_registered_drain() {
        let registry = OperatorRegistry::new();
        registry.register(
            "docs",
            "find_to_vec",
            Arc::new(|_shape| {
                Some(Operator::Drain(Arc::new(|_query, _options| {
                    Box::pin(async { Ok(vec![Value::Int(1)]) })
                })))
            }),
        );
        let resolver = AsyncResolver::new("docs", "find_to_vec");
        let rows = resolver
            .resolve(&registry, stub_query(), MaterializeOptions::default())
            .await
            .unwrap();
        assert_eq!(rows, vec![Value::Int(1)]);
    }
}
