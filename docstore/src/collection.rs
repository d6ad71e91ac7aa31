use std::any::Any;
use std::sync::Arc;

use dynquery_core::error::Result;
use dynquery_core::{DynQuery, QuerySource, ShapeRef};

pub const DOCSTORE_DRIVER: &str = "docstore";

/// A declared-shape collection of JSON documents behind an async fetch.
#[derive(Debug, Clone)]
pub struct DocCollection {
    shape: ShapeRef,
    documents: Vec<serde_json::Value>,
}

impl DocCollection {
    pub fn new(shape: ShapeRef, documents: Vec<serde_json::Value>) -> Self {
        Self { shape, documents }
    }

    /// Fetches the raw documents. Yields once so the call behaves like the
    /// round trip a remote store would make.
    pub async fn fetch(&self) -> Result<Vec<serde_json::Value>> {
        tokio::task::yield_now().await;
        Ok(self.documents.clone())
    }

    /// Wraps the collection as an unexecuted pipeline.
    pub fn into_query(self) -> DynQuery {
        DynQuery::new(Arc::new(self))
    }
}

impl QuerySource for DocCollection {
    fn shape(&self) -> ShapeRef {
        self.shape.clone()
    }

    fn driver(&self) -> &'static str {
        DOCSTORE_DRIVER
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
