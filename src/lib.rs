//! # dynquery
//!
//! Query-string-driven projection and grouping over declarative query
//! sources, with pluggable backend drivers.
//!
//! ## Quick Start
//!
//! ```rust
//! use dynquery::core::{FieldDef, FieldKind, QueryProvider, Shape, Value};
//! use dynquery::memory::{MemoryCollection, MemoryProvider};
//! use dynquery::record;
//!
//! # fn main() -> dynquery::Result<()> {
//! let shape = Shape::new(
//!     "Sale",
//!     vec![
//!         FieldDef::new("city", FieldKind::Text),
//!         FieldDef::new("total", FieldKind::Int),
//!     ],
//! )
//! .into_ref();
//! let rows = vec![
//!     Value::Record(record! { city: "A", total: 10 }),
//!     Value::Record(record! { city: "B", total: 3 }),
//! ];
//!
//! let provider = MemoryProvider::new();
//! let query = provider.query(
//!     MemoryCollection::new(shape, rows).into_query(),
//!     "select=city&take=1",
//! )?;
//! let cities = provider.to_vec(&query)?;
//! assert_eq!(cities.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Backend Support
//!
//! | Backend           | Driver crate        | Feature Flag | Grouping operator       |
//! |-------------------|---------------------|--------------|-------------------------|
//! | In-memory rows    | `dynquery-memory`   | `memory`     | standard `group_by`     |
//! | JSON doc store    | `dynquery-docstore` | `docstore`   | native `aggregate_group`|

// =============================================================================
// Root-level exports
// =============================================================================

/// Result type for query building and materialization
pub use dynquery_core::error::Result;

/// Record construction macro
pub use dynquery_core::record;

/// Error types
pub mod error {
    pub use dynquery_core::error::DynQueryError;
}

// =============================================================================
// Core module - shared functionality
// =============================================================================

/// Core types and traits shared across all backend drivers.
///
/// - **Values**: `Value` and `Record`, the runtime data model.
/// - **Shapes**: `Shape`, `FieldKind` and `ShapeCache`, the structural
///   descriptions paths are validated against.
/// - **Pipelines**: `DynQuery` and `Stage`, unexecuted compositions over a
///   `QuerySource`.
/// - **Providers**: `QueryProvider` and the operator registry that backs it.
pub mod core {
    pub use dynquery_core::descriptor::QueryDescriptor;
    pub use dynquery_core::error::{DynQueryError, Result};
    pub use dynquery_core::expr::{Env, Expr, ExprDecl, ParamId, ProjectionExpr};
    pub use dynquery_core::group::{ITEMS_FIELD, KEY_FIELD, build_grouped_query, group_shape};
    pub use dynquery_core::projection::{BuiltProjection, build_projection};
    pub use dynquery_core::provider::{
        GROUP_BY_OP, GroupOptions, Operator, OperatorFactory, OperatorRegistry, QueryProvider,
        SELECT_OP, STD_NAMESPACE, register_standard_ops,
    };
    pub use dynquery_core::query::{DynQuery, QuerySource, Stage};
    pub use dynquery_core::resolve::{AsyncResolver, CancelToken, MaterializeOptions};
    pub use dynquery_core::shape::{FieldDef, FieldKind, Shape, ShapeCache, ShapeRef};
    pub use dynquery_core::value::{Record, Value};
}

// =============================================================================
// Memory driver module
// =============================================================================

/// In-memory backend: the standard provider over plain row vectors.
#[cfg(feature = "memory")]
pub mod memory {
    pub use dynquery_memory::collection::{MEMORY_DRIVER, MemoryCollection};
    pub use dynquery_memory::executor;
    pub use dynquery_memory::provider::{MemoryProvider, TO_VEC_OP, register_memory_ops};

    /// Memory prelude - everything a memory-backed query needs.
    pub mod prelude {
        pub use crate::core::{
            DynQuery, FieldDef, FieldKind, MaterializeOptions, QueryDescriptor, QueryProvider,
            Shape, Value,
        };
        pub use dynquery_core::record;

        pub use super::{MemoryCollection, MemoryProvider};
    }
}

// =============================================================================
// Docstore driver module
// =============================================================================

/// Async document-store backend, grouping through its own native operator.
#[cfg(feature = "docstore")]
pub mod docstore {
    pub use dynquery_docstore::collection::{DOCSTORE_DRIVER, DocCollection};
    pub use dynquery_docstore::convert::document_to_value;
    pub use dynquery_docstore::executor::AggregateGroupStage;
    pub use dynquery_docstore::provider::{
        AGGREGATE_GROUP_OP, DOCSTORE_NAMESPACE, DocStoreProvider, FIND_TO_VEC_OP,
        register_docstore_ops,
    };

    /// Docstore prelude - everything a document-backed query needs.
    pub mod prelude {
        pub use crate::core::{
            CancelToken, DynQuery, FieldDef, FieldKind, GroupOptions, MaterializeOptions,
            QueryDescriptor, QueryProvider, Shape, Value,
        };
        pub use dynquery_core::record;

        pub use super::{DocCollection, DocStoreProvider};
    }
}
