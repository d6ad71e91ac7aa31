pub mod collection;
pub mod convert;
pub mod executor;
pub mod provider;

pub use collection::{DOCSTORE_DRIVER, DocCollection};
pub use convert::document_to_value;
pub use executor::AggregateGroupStage;
pub use provider::{
    AGGREGATE_GROUP_OP, DOCSTORE_NAMESPACE, DocStoreProvider, FIND_TO_VEC_OP,
    register_docstore_ops,
};
