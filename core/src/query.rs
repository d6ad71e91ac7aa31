use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::expr::ProjectionExpr;
use crate::shape::ShapeRef;

/// A backend-owned row source feeding a pipeline.
pub trait QuerySource: Send + Sync {
    /// Declared shape of the items this source yields.
    fn shape(&self) -> ShapeRef;

    /// Name of the driver that can execute pipelines over this source.
    fn driver(&self) -> &'static str;

    /// Downcast hook for the owning driver's executor.
    fn as_any(&self) -> &dyn Any;
}

/// One deferred operator application in a pipeline.
#[derive(Clone)]
pub enum Stage {
    /// Partition by a key projection; the element shape becomes the
    /// synthesized group shape.
    GroupBy {
        key: ProjectionExpr,
        key_shape: ShapeRef,
    },
    /// Map each element through a projection.
    Select {
        projection: ProjectionExpr,
        shape: ShapeRef,
    },
    Skip(usize),
    Take(usize),
    /// Driver-private plan node, interpreted only by the named driver.
    Custom {
        driver: &'static str,
        stage: Arc<dyn Any + Send + Sync>,
    },
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::GroupBy { key_shape, .. } => f
                .debug_struct("GroupBy")
                .field("key_shape", &key_shape.name())
                .finish(),
            Stage::Select { shape, .. } => f
                .debug_struct("Select")
                .field("shape", &shape.name())
                .finish(),
            Stage::Skip(n) => f.debug_tuple("Skip").field(n).finish(),
            Stage::Take(n) => f.debug_tuple("Take").field(n).finish(),
            Stage::Custom { driver, .. } => f
                .debug_struct("Custom")
                .field("driver", driver)
                .field("stage", &"<opaque>")
                .finish(),
        }
    }
}

/// An unexecuted, composable query pipeline.
///
/// Each builder call produces a fresh pipeline value; nothing is shared or
/// mutated once a pipeline is handed back to the caller. Raw `where` and
/// `orderby` clauses ride along untouched for backends that can apply them
/// natively; the translation engine never interprets them.
#[derive(Clone)]
pub struct DynQuery {
    source: Arc<dyn QuerySource>,
    shape: ShapeRef,
    stages: Vec<Stage>,
    raw_filters: Vec<String>,
    raw_orderings: Vec<String>,
}

impl DynQuery {
    pub fn new(source: Arc<dyn QuerySource>) -> Self {
        let shape = source.shape();
        Self {
            source,
            shape,
            stages: Vec::new(),
            raw_filters: Vec::new(),
            raw_orderings: Vec::new(),
        }
    }

    pub fn source(&self) -> &Arc<dyn QuerySource> {
        &self.source
    }

    /// Shape of the elements the pipeline currently yields.
    pub fn shape(&self) -> ShapeRef {
        self.shape.clone()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn raw_filters(&self) -> &[String] {
        &self.raw_filters
    }

    pub fn raw_orderings(&self) -> &[String] {
        &self.raw_orderings
    }

    /// Appends a stage, updating the element shape it yields.
    #[must_use]
    pub fn with_stage(mut self, stage: Stage, shape: ShapeRef) -> Self {
        self.stages.push(stage);
        self.shape = shape;
        self
    }

    #[must_use]
    pub fn with_raw_filters(mut self, filters: Vec<String>) -> Self {
        self.raw_filters.extend(filters);
        self
    }

    #[must_use]
    pub fn with_raw_orderings(mut self, orderings: Vec<String>) -> Self {
        self.raw_orderings.extend(orderings);
        self
    }
}

impl fmt::Debug for DynQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynQuery")
            .field("driver", &self.source.driver())
            .field("shape", &self.shape.name())
            .field("stages", &self.stages)
            .finish()
    }
}
