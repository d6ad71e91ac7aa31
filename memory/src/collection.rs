use std::any::Any;
use std::sync::Arc;

use dynquery_core::{DynQuery, QuerySource, ShapeRef, Value};

pub const MEMORY_DRIVER: &str = "memory";

/// A declared-shape collection of in-memory rows.
#[derive(Debug, Clone)]
pub struct MemoryCollection {
    shape: ShapeRef,
    rows: Vec<Value>,
}

impl MemoryCollection {
    pub fn new(shape: ShapeRef, rows: Vec<Value>) -> Self {
        Self { shape, rows }
    }

    pub fn rows(&self) -> &[Value] {
        &self.rows
    }

    /// Wraps the collection as an unexecuted pipeline.
    pub fn into_query(self) -> DynQuery {
        DynQuery::new(Arc::new(self))
    }
}

impl QuerySource for MemoryCollection {
    fn shape(&self) -> ShapeRef {
        self.shape.clone()
    }

    fn driver(&self) -> &'static str {
        MEMORY_DRIVER
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
