pub mod descriptor;
pub mod error;
pub mod expr;
pub mod group;
pub mod projection;
pub mod provider;
pub mod query;
pub mod resolve;
pub mod shape;
pub mod trace;
pub mod value;

// Re-export key types and traits
pub use descriptor::QueryDescriptor;
pub use error::{DynQueryError, Result};
pub use expr::{Env, Expr, ExprDecl, ParamId, ProjectionExpr};
pub use group::{ITEMS_FIELD, KEY_FIELD, build_grouped_query, group_shape};
pub use projection::{BuiltProjection, build_projection};
pub use provider::{
    GROUP_BY_OP, GroupOptions, Operator, OperatorFactory, OperatorRegistry, QueryProvider,
    SELECT_OP, STD_NAMESPACE, register_standard_ops,
};
pub use query::{DynQuery, QuerySource, Stage};
pub use resolve::{AsyncResolver, CancelToken, MaterializeOptions};
pub use shape::{FieldDef, FieldKind, Shape, ShapeCache, ShapeRef};
pub use value::{Record, Value};
